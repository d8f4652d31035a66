//! HTTP routes and handlers

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use cubeserve_classifiers::{
    Classifier, Embedder, EmbedderSpec, GroupedExample, IntentClassifier, LiveDialogClassifier,
    LiveDialogConfig, Model, MultistageClassifier, TokenizerMode,
};
use cubeserve_core::{Error, LabelScore, ModelId, Vector};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{debug, error, info, warn};

use crate::state::AppState;

/// Threshold reported to intent and multistage clients
const ANSWER_THRESHOLD: f32 = 0.3;

pub fn create_router(state: AppState) -> Router {
    let max_body_bytes = state.config.max_body_bytes;

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .route("/classifier/predict", post(classifier_predict))
        .route("/classifier/train", post(classifier_train))
        .route("/multistage/predict", post(multistage_predict))
        .route("/multistage/train", post(multistage_train))
        .route("/live-dialog/predict", post(live_dialog_predict))
        .route("/live-dialog/train", post(live_dialog_train))
        .route("/embedders/:mode/encode_tokens", post(encode_tokens))
        .route("/embedders/:mode/encode_queries", post(encode_queries))
        .route("/embedders/:mode/get_tokenizer_mode", post(get_tokenizer_mode))
        .fallback(fallback)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}

async fn metrics(State(state): State<AppState>) -> String {
    state
        .metrics_handle
        .as_ref()
        .map(|handle| handle.render())
        .unwrap_or_default()
}

async fn fallback() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "Not found")
}

fn count_request(endpoint: &'static str) {
    metrics::counter!("cubeserve_requests_total", "endpoint" => endpoint).increment(1);
}

fn record_latency(endpoint: &'static str, start: Instant) {
    metrics::histogram!("cubeserve_predict_latency_us", "endpoint" => endpoint)
        .record(start.elapsed().as_micros() as f64);
}

/// Single-query prediction request
#[derive(Debug, Deserialize)]
struct PredictRequest {
    query: String,
    model_id: ModelId,
}

/// Prediction request whose model defaults to the configured one
#[derive(Debug, Deserialize)]
struct MultistagePredictRequest {
    query: String,
    #[serde(default)]
    model_id: Option<ModelId>,
}

#[derive(Debug, Deserialize)]
struct LiveDialogPredictRequest {
    query: String,
    model_id: ModelId,
    #[serde(default)]
    labels: Option<Vec<String>>,
}

/// One ranked answer of the intent and multistage endpoints
#[derive(Debug, Serialize)]
struct Answer {
    answer: String,
    probability: Option<f32>,
    threshold: f32,
    accuracy_score: Option<f32>,
}

impl From<LabelScore> for Answer {
    fn from(score: LabelScore) -> Self {
        Self {
            answer: score.label,
            probability: score.probability,
            threshold: ANSWER_THRESHOLD,
            accuracy_score: None,
        }
    }
}

/// One ranked label of the live-dialog endpoint
#[derive(Debug, Serialize)]
struct LabelProba {
    label: String,
    proba: Option<f32>,
}

#[derive(Debug, Serialize)]
struct TrainResponse {
    message: String,
    model_id: ModelId,
}

impl TrainResponse {
    fn created(model_id: ModelId) -> Json<Self> {
        Json(Self {
            message: format!("Created model with model_id {}", model_id),
            model_id,
        })
    }
}

#[derive(Debug, Deserialize)]
struct Intent {
    label: String,
    phrases: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ClassifierTrainRequest {
    lang: String,
    intents: Vec<Intent>,
}

#[derive(Debug, Deserialize)]
struct MultistageTrainRequest {
    lang: String,
    examples: Vec<GroupedExample>,
}

/// Live-dialog configuration, inline or JSON-encoded
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ConfigPayload {
    Inline(LiveDialogConfig),
    Encoded(String),
}

#[derive(Debug, Deserialize)]
struct LiveDialogTrainRequest {
    config: ConfigPayload,
}

async fn classifier_predict(
    State(state): State<AppState>,
    payload: Result<Json<PredictRequest>, JsonRejection>,
) -> Result<Json<Vec<Answer>>, AppError> {
    let Json(req) = payload?;
    count_request("classifier_predict");
    let start = Instant::now();

    let model = state.registry.get_or_load(req.model_id).await?;
    let classifier = model.as_intent_classifier(req.model_id)?;
    let ranking = classifier
        .predict(std::slice::from_ref(&req.query))
        .await?
        .into_iter()
        .next()
        .unwrap_or_default();

    record_latency("classifier_predict", start);
    debug!(model_id = req.model_id, query = %req.query, "Received query");
    if let Some(top) = ranking.first() {
        info!(
            model_id = req.model_id,
            label = %top.label,
            probability = ?top.probability,
            "Top predicted label"
        );
    }

    Ok(Json(ranking.into_iter().map(Answer::from).collect()))
}

async fn classifier_train(
    State(state): State<AppState>,
    payload: Result<Json<ClassifierTrainRequest>, JsonRejection>,
) -> Result<Json<TrainResponse>, AppError> {
    let Json(req) = payload?;
    count_request("classifier_train");

    let spec = state.config.embedder_for(&req.lang)?;
    let (phrases, labels): (Vec<String>, Vec<String>) = req
        .intents
        .iter()
        .flat_map(|intent| {
            intent
                .phrases
                .iter()
                .map(move |phrase| (phrase.clone(), intent.label.clone()))
        })
        .unzip();

    let embedder = state.embedder(&spec).await?;
    let classifier = IntentClassifier::train(embedder, spec, &phrases, &labels).await?;
    let model_id = state.registry.create(Model::IntentClassifier(classifier)).await?;

    Ok(TrainResponse::created(model_id))
}

async fn multistage_predict(
    State(state): State<AppState>,
    payload: Result<Json<MultistagePredictRequest>, JsonRejection>,
) -> Result<Json<Vec<Answer>>, AppError> {
    let Json(req) = payload?;
    count_request("multistage_predict");
    let start = Instant::now();

    let model_id = req
        .model_id
        .or(state.config.multistage_model_id)
        .ok_or_else(|| {
            AppError::InvalidRequest("`model_id` is required: no default multistage model".into())
        })?;

    let model = state.registry.get_or_load(model_id).await?;
    let classifier = model.as_multistage(model_id)?;
    let labels = classifier.predict(std::slice::from_ref(&req.query)).await?;

    record_latency("multistage_predict", start);
    if let Some(label) = labels.first() {
        info!(model_id, label = %label, "Top predicted label");
    }

    Ok(Json(
        labels
            .into_iter()
            .map(|label| Answer::from(LabelScore::unscored(label)))
            .collect(),
    ))
}

async fn multistage_train(
    State(state): State<AppState>,
    payload: Result<Json<MultistageTrainRequest>, JsonRejection>,
) -> Result<Json<TrainResponse>, AppError> {
    let Json(req) = payload?;
    count_request("multistage_train");

    let spec = state.config.embedder_for(&req.lang)?;
    let embedder = state.embedder(&spec).await?;
    let classifier = MultistageClassifier::train(embedder, spec, &req.examples).await?;
    let model_id = state.registry.create(Model::Multistage(classifier)).await?;

    Ok(TrainResponse::created(model_id))
}

async fn live_dialog_predict(
    State(state): State<AppState>,
    payload: Result<Json<LiveDialogPredictRequest>, JsonRejection>,
) -> Result<Json<Vec<LabelProba>>, AppError> {
    let Json(req) = payload?;
    count_request("live_dialog_predict");
    let start = Instant::now();

    let model = state.registry.get_or_load(req.model_id).await?;
    let classifier = model.as_live_dialog(req.model_id)?;
    let ranking = classifier
        .predict_with_labels(std::slice::from_ref(&req.query), req.labels.as_deref())
        .await?
        .into_iter()
        .next()
        .unwrap_or_default();

    record_latency("live_dialog_predict", start);
    debug!(model_id = req.model_id, query = %req.query, labels = ?req.labels, "Received query");
    if let Some(top) = ranking.first() {
        info!(
            model_id = req.model_id,
            label = %top.label,
            probability = ?top.probability,
            "Top predicted label"
        );
    }

    Ok(Json(
        ranking
            .into_iter()
            .map(|score| LabelProba {
                label: score.label,
                proba: score.probability,
            })
            .collect(),
    ))
}

async fn live_dialog_train(
    State(state): State<AppState>,
    payload: Result<Json<LiveDialogTrainRequest>, JsonRejection>,
) -> Result<Json<TrainResponse>, AppError> {
    let Json(req) = payload?;
    count_request("live_dialog_train");

    let mut config = match req.config {
        ConfigPayload::Inline(config) => config,
        ConfigPayload::Encoded(text) => serde_json::from_str(&text)
            .map_err(|e| AppError::InvalidRequest(format!("invalid `config`: {}", e)))?,
    };

    let spec = live_dialog_spec(&state, &config)?;
    config.embedder_mode = Some(spec.mode.clone());
    config.tokenizer_mode = Some(spec.tokenizer_mode.to_string());
    info!(mode = %spec.mode, tokenizer_mode = %spec.tokenizer_mode, "Training live dialog model");

    let embedder = state.embedder(&spec).await?;
    let classifier = LiveDialogClassifier::train(embedder, spec, config, &state.vocabulary).await?;
    let model_id = state.registry.create(Model::LiveDialog(classifier)).await?;

    Ok(TrainResponse::created(model_id))
}

/// `lang` wins; otherwise explicit modes in the config
fn live_dialog_spec(state: &AppState, config: &LiveDialogConfig) -> Result<EmbedderSpec, Error> {
    if let Some(lang) = &config.lang {
        return state.config.embedder_for(lang);
    }

    let mode = config
        .embedder_mode
        .clone()
        .ok_or_else(|| Error::config("config needs `lang` or `embedder_mode`"))?;
    let tokenizer_mode = match &config.tokenizer_mode {
        Some(name) => name.parse::<TokenizerMode>()?,
        None => TokenizerMode::default(),
    };
    Ok(EmbedderSpec::new(mode, tokenizer_mode))
}

#[derive(Debug, Deserialize)]
struct EncodeTokensRequest {
    tokens: Vec<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct EncodeQueriesRequest {
    queries: Vec<String>,
}

#[derive(Debug, Serialize)]
struct VectorsResponse {
    vectors: Vec<Vector>,
}

fn served_embedder(state: &AppState, mode: &str) -> Result<Arc<dyn Embedder>, AppError> {
    state.embedders.get(mode).cloned().ok_or_else(|| {
        warn!(mode = %mode, "Attempt to use unknown embedder");
        AppError::UnknownEmbedder(mode.to_string())
    })
}

async fn encode_tokens(
    State(state): State<AppState>,
    Path(mode): Path<String>,
    payload: Result<Json<EncodeTokensRequest>, JsonRejection>,
) -> Result<Json<VectorsResponse>, AppError> {
    let Json(req) = payload?;
    count_request("encode_tokens");
    let embedder = served_embedder(&state, &mode)?;
    let vectors = embedder.encode_tokens(req.tokens).await?;
    Ok(Json(VectorsResponse { vectors }))
}

async fn encode_queries(
    State(state): State<AppState>,
    Path(mode): Path<String>,
    payload: Result<Json<EncodeQueriesRequest>, JsonRejection>,
) -> Result<Json<VectorsResponse>, AppError> {
    let Json(req) = payload?;
    count_request("encode_queries");
    let embedder = served_embedder(&state, &mode)?;
    let vectors = embedder.encode_queries(&req.queries).await?;
    Ok(Json(VectorsResponse { vectors }))
}

async fn get_tokenizer_mode(
    State(state): State<AppState>,
    Path(mode): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let embedder = served_embedder(&state, &mode)?;
    let tokenizer_mode = embedder.tokenizer_mode().await?;
    Ok(Json(json!({ "tokenizer_mode": tokenizer_mode })))
}

/// Error handling
#[derive(Debug)]
enum AppError {
    InvalidRequest(String),
    UnknownEmbedder(String),
    Model(Error),
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        AppError::Model(err)
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::InvalidRequest(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match self {
            AppError::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, "invalid_request", msg),
            AppError::UnknownEmbedder(mode) => (
                StatusCode::NOT_FOUND,
                "unknown_embedder",
                format!("`{}` embedder doesn't exist", mode),
            ),
            AppError::Model(err) => {
                let status = match &err {
                    Error::ModelNotFound { .. } => StatusCode::NOT_FOUND,
                    Error::Backend { .. } => StatusCode::BAD_GATEWAY,
                    e if e.is_client_error() => StatusCode::BAD_REQUEST,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                if status.is_server_error() {
                    error!(kind = err.kind(), error = %err, "Request failed");
                } else {
                    warn!(kind = err.kind(), error = %err, "Request rejected");
                }
                (status, err.kind(), err.to_string())
            }
        };

        metrics::counter!("cubeserve_errors_total", "kind" => kind).increment(1);

        let body = json!({
            "error": {
                "message": message,
                "type": kind,
            }
        });

        (status, Json(body)).into_response()
    }
}
