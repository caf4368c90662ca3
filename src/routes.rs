use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::error::{ApiError, ApiResult};
use crate::labels::ModelKind;
use crate::prediction::{get_prediction, Prediction};
use crate::state::AppState;

const IMAGE_FIELD: &str = "image";

pub fn create_router(state: Arc<AppState>, body_limit_bytes: usize) -> Router {
    Router::new()
        .route("/predict/fruit", post(predict_fruit))
        .route("/predict/leaf", post(predict_leaf))
        .route("/models", get(list_models))
        .route("/health", get(health_check))
        .layer(DefaultBodyLimit::max(body_limit_bytes))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

async fn predict_fruit(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> ApiResult<Json<Prediction>> {
    predict(state, ModelKind::Fruit, multipart).await
}

async fn predict_leaf(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> ApiResult<Json<Prediction>> {
    predict(state, ModelKind::Leaf, multipart).await
}

async fn predict(
    state: Arc<AppState>,
    kind: ModelKind,
    multipart: Multipart,
) -> ApiResult<Json<Prediction>> {
    let production = state.production;
    run_prediction(state, kind, multipart)
        .await
        .map_err(|err| err.redact(production))
}

async fn run_prediction(
    state: Arc<AppState>,
    kind: ModelKind,
    mut multipart: Multipart,
) -> ApiResult<Json<Prediction>> {
    let mut image_data = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::upload(err, "Invalid multipart body"))?
    {
        if field.name() == Some(IMAGE_FIELD) {
            let bytes = field
                .bytes()
                .await
                .map_err(|err| ApiError::upload(err, "Failed to read image"))?;
            image_data = Some(bytes);
            break;
        }
    }

    let image_data = image_data.ok_or_else(|| ApiError::bad_request("No image file provided"))?;
    debug!(model = %kind, bytes = image_data.len(), "received image");

    let model = state.model(kind).clone();
    let include_treatment = state.include_treatment;

    let prediction = tokio::task::spawn_blocking(move || {
        get_prediction(&model, &image_data, include_treatment)
    })
    .await
    .map_err(|err| ApiError::internal(format!("Prediction task failed: {err}")))??;

    info!(
        model = %kind,
        class = %prediction.predicted_class,
        confidence = prediction.confidence,
        "prediction served"
    );

    Ok(Json(prediction))
}

#[derive(Serialize)]
struct ModelInfo {
    name: String,
    input_shape: [u32; 3],
    labels: Vec<String>,
}

async fn list_models(
    State(state): State<Arc<AppState>>,
) -> Json<BTreeMap<&'static str, ModelInfo>> {
    let models = ModelKind::ALL
        .into_iter()
        .map(|kind| {
            let model = state.model(kind);
            let info = ModelInfo {
                name: model.spec.name.clone(),
                input_shape: [model.spec.height, model.spec.width, model.spec.channels],
                labels: model.catalog.labels().to_vec(),
            };
            (kind.name(), info)
        })
        .collect();

    Json(models)
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({ "status": "OK", "uptimeSeconds": state.uptime_seconds() }))
}
