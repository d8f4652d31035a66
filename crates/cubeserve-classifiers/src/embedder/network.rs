//! Embedder that delegates to a remote embedder service.
//!
//! The peer exposes `POST {base}/encode_tokens`, `POST {base}/encode_queries`
//! and `POST {base}/get_tokenizer_mode`. Any non-success status, transport
//! failure, timeout, or body without the expected field is a backend error;
//! nothing is retried.

use super::{fill_empty_tokens, Embedder};
use async_trait::async_trait;
use cubeserve_core::{Error, Result, Vector};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

/// Default per-request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
struct EncodeTokensRequest<'a> {
    tokens: &'a [Vec<String>],
}

#[derive(Serialize)]
struct EncodeQueriesRequest<'a> {
    queries: &'a [String],
}

#[derive(Deserialize)]
struct VectorsResponse {
    vectors: Option<Vec<Vector>>,
}

#[derive(Deserialize)]
struct TokenizerModeResponse {
    tokenizer_mode: Option<String>,
}

/// Remote embedder reached over HTTP
#[derive(Debug, Clone)]
pub struct NetworkEmbedder {
    base_url: String,
    mode: String,
    client: reqwest::Client,
}

impl NetworkEmbedder {
    /// Create an embedder for `base_url` with its own client.
    ///
    /// When `mode` is `None` it is taken from the URL's last path segment.
    pub fn new(
        base_url: impl Into<String>,
        mode: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self::with_client(base_url, mode, client))
    }

    /// Create an embedder sharing an existing client
    pub fn with_client(
        base_url: impl Into<String>,
        mode: Option<String>,
        client: reqwest::Client,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let mode = mode.unwrap_or_else(|| {
            base_url
                .rsplit('/')
                .next()
                .unwrap_or_default()
                .to_string()
        });

        Self {
            base_url,
            mode,
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<B, R>(&self, endpoint: &str, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        let url = format!("{}/{}", self.base_url, endpoint);
        debug!(url = %url, mode = %self.mode, "Calling network embedder");

        let response = self.client.post(&url).json(body).send().await.map_err(|e| {
            let message = if e.is_timeout() {
                format!("request timed out: {}", e)
            } else {
                format!("request failed: {}", e)
            };
            error!(url = %url, mode = %self.mode, "{}", message);
            Error::backend(&url, message)
        })?;

        let status = response.status();
        if !status.is_success() {
            error!(
                url = %url,
                mode = %self.mode,
                status = status.as_u16(),
                "Network embedder returned error status"
            );
            return Err(Error::backend(&url, format!("status code {}", status.as_u16())));
        }

        response
            .json::<R>()
            .await
            .map_err(|e| Error::backend(&url, format!("malformed response body: {}", e)))
    }

    fn check_vectors(
        &self,
        endpoint: &str,
        expected: usize,
        vectors: Option<Vec<Vector>>,
    ) -> Result<Vec<Vector>> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let vectors = vectors.ok_or_else(|| Error::backend(&url, "no `vectors` in response"))?;

        if vectors.len() != expected {
            return Err(Error::backend(
                &url,
                format!("expected {} vectors, received {}", expected, vectors.len()),
            ));
        }
        if let Some(first) = vectors.first() {
            if vectors.iter().any(|v| v.len() != first.len()) {
                return Err(Error::backend(&url, "vectors have inconsistent dimensionality"));
            }
        }
        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for NetworkEmbedder {
    async fn encode_tokens(&self, mut batch: Vec<Vec<String>>) -> Result<Vec<Vector>> {
        fill_empty_tokens(&mut batch);
        let response: VectorsResponse = self
            .post("encode_tokens", &EncodeTokensRequest { tokens: &batch })
            .await?;
        self.check_vectors("encode_tokens", batch.len(), response.vectors)
    }

    async fn encode_queries(&self, queries: &[String]) -> Result<Vec<Vector>> {
        let response: VectorsResponse = self
            .post("encode_queries", &EncodeQueriesRequest { queries })
            .await?;
        self.check_vectors("encode_queries", queries.len(), response.vectors)
    }

    async fn tokenizer_mode(&self) -> Result<String> {
        let response: TokenizerModeResponse = self
            .post("get_tokenizer_mode", &serde_json::json!({}))
            .await?;
        response.tokenizer_mode.ok_or_else(|| {
            Error::backend(
                format!("{}/get_tokenizer_mode", self.base_url),
                "no `tokenizer_mode` in response",
            )
        })
    }

    fn embedder_mode(&self) -> &str {
        &self.mode
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::post, Json, Router};
    use serde_json::{json, Value};

    async fn spawn_peer(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn echo_peer() -> Router {
        // One 2-d vector per token list: [token count, length of first token]
        Router::new()
            .route(
                "/ru/encode_tokens",
                post(|Json(body): Json<Value>| async move {
                    let vectors: Vec<Vec<f32>> = body["tokens"]
                        .as_array()
                        .unwrap()
                        .iter()
                        .map(|tokens| {
                            let tokens = tokens.as_array().unwrap();
                            let first = tokens[0].as_str().unwrap();
                            vec![tokens.len() as f32, first.chars().count() as f32]
                        })
                        .collect();
                    Json(json!({ "vectors": vectors }))
                }),
            )
            .route(
                "/ru/encode_queries",
                post(|Json(body): Json<Value>| async move {
                    let count = body["queries"].as_array().unwrap().len();
                    Json(json!({ "vectors": vec![vec![1.0, 2.0]; count] }))
                }),
            )
            .route(
                "/ru/get_tokenizer_mode",
                post(|| async { Json(json!({ "tokenizer_mode": "token" })) }),
            )
    }

    #[tokio::test]
    async fn test_encode_round_trip() {
        let base = spawn_peer(echo_peer()).await;
        let embedder = NetworkEmbedder::new(format!("{}/ru", base), None, DEFAULT_TIMEOUT).unwrap();

        assert_eq!(embedder.embedder_mode(), "ru");

        let vectors = embedder
            .encode_tokens(vec![vec!["робот".into(), "вера".into()]])
            .await
            .unwrap();
        assert_eq!(vectors, vec![vec![2.0, 5.0]]);

        let vectors = embedder
            .encode_queries(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors.len(), 2);

        assert_eq!(embedder.tokenizer_mode().await.unwrap(), "token");
    }

    #[tokio::test]
    async fn test_empty_token_lists_are_replaced_before_dispatch() {
        // Empty lists are sent as [""]: the peer sees one token of length 0.
        let base = spawn_peer(echo_peer()).await;
        let embedder = NetworkEmbedder::new(format!("{}/ru", base), None, DEFAULT_TIMEOUT).unwrap();

        let vectors = embedder
            .encode_tokens(vec![vec![], vec!["да".into()]])
            .await
            .unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![1.0, 2.0]]);
    }

    #[tokio::test]
    async fn test_server_error_is_backend_error() {
        let router = Router::new().route(
            "/ru/encode_tokens",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        );
        let base = spawn_peer(router).await;
        let embedder = NetworkEmbedder::new(format!("{}/ru", base), None, DEFAULT_TIMEOUT).unwrap();

        let err = embedder
            .encode_tokens(vec![vec!["x".into()]])
            .await
            .unwrap_err();
        match err {
            Error::Backend { context, message } => {
                assert!(context.ends_with("/ru/encode_tokens"));
                assert!(message.contains("500"));
            }
            other => panic!("expected backend error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_vectors_is_backend_error() {
        let router = Router::new()
            .route("/ru/encode_queries", post(|| async { Json(json!({ "result": [] })) }))
            .route("/ru/get_tokenizer_mode", post(|| async { Json(json!({})) }));
        let base = spawn_peer(router).await;
        let embedder = NetworkEmbedder::new(format!("{}/ru", base), None, DEFAULT_TIMEOUT).unwrap();

        let err = embedder.encode_queries(&["q".to_string()]).await.unwrap_err();
        assert!(err.to_string().contains("no `vectors`"));

        let err = embedder.tokenizer_mode().await.unwrap_err();
        assert!(matches!(err, Error::Backend { .. }));
    }

    #[tokio::test]
    async fn test_vector_count_mismatch_is_backend_error() {
        let router = Router::new().route(
            "/ru/encode_queries",
            post(|| async { Json(json!({ "vectors": [] })) }),
        );
        let base = spawn_peer(router).await;
        let embedder = NetworkEmbedder::new(format!("{}/ru", base), None, DEFAULT_TIMEOUT).unwrap();

        let err = embedder.encode_queries(&["q".to_string()]).await.unwrap_err();
        assert!(err.to_string().contains("expected 1 vectors"));
    }

    #[tokio::test]
    async fn test_timeout_is_backend_error() {
        let router = Router::new().route(
            "/ru/encode_queries",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Json(json!({ "vectors": [[0.0]] }))
            }),
        );
        let base = spawn_peer(router).await;
        let embedder =
            NetworkEmbedder::new(format!("{}/ru", base), None, Duration::from_millis(100)).unwrap();

        let err = embedder.encode_queries(&["q".to_string()]).await.unwrap_err();
        match err {
            Error::Backend { message, .. } => assert!(message.contains("timed out")),
            other => panic!("expected backend error, got {:?}", other),
        }
    }
}
