//! Router-level tests against a fake classifier.

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use image::{DynamicImage, ImageBuffer, ImageOutputFormat, Rgb};
use serde_json::Value;
use tower::ServiceExt;

use orchard_classifier::error::ModelError;
use orchard_classifier::keras_config::ModelSpec;
use orchard_classifier::labels::{LabelCatalog, ModelKind};
use orchard_classifier::model::Classifier;
use orchard_classifier::preprocess::InputTensor;
use orchard_classifier::state::ServedModel;
use orchard_classifier::{create_router, AppState};

const BOUNDARY: &str = "orchard-test-boundary";

struct FakeClassifier {
    scores: Vec<f32>,
    calls: AtomicUsize,
}

impl FakeClassifier {
    fn new(scores: Vec<f32>) -> Arc<Self> {
        Arc::new(Self {
            scores,
            calls: AtomicUsize::new(0),
        })
    }
}

impl Classifier for FakeClassifier {
    fn predict(&self, input: &InputTensor) -> Result<Vec<f32>, ModelError> {
        assert_eq!(input.dims(), [1, 224, 224, 3]);
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.scores.clone())
    }
}

struct FailingClassifier;

impl Classifier for FailingClassifier {
    fn predict(&self, _input: &InputTensor) -> Result<Vec<f32>, ModelError> {
        Err(ModelError::EmptyOutput)
    }
}

fn served(kind: ModelKind, classifier: Arc<dyn Classifier>) -> ServedModel {
    ServedModel::new(
        kind,
        ModelSpec::default(),
        LabelCatalog::builtin(kind),
        classifier,
    )
    .unwrap()
}

fn state_with(
    fruit: Arc<dyn Classifier>,
    leaf: Arc<dyn Classifier>,
    include_treatment: bool,
) -> AppState {
    AppState::new(
        served(ModelKind::Fruit, fruit),
        served(ModelKind::Leaf, leaf),
        include_treatment,
    )
}

fn app_with(
    fruit: Arc<dyn Classifier>,
    leaf: Arc<dyn Classifier>,
    include_treatment: bool,
) -> axum::Router {
    let state = state_with(fruit, leaf, include_treatment);
    create_router(Arc::new(state), 5 * 1024 * 1024)
}

fn jpeg_bytes() -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(ImageBuffer::from_pixel(300, 200, Rgb([90, 140, 60])));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageOutputFormat::Jpeg(90)).unwrap();
    buf.into_inner()
}

fn multipart_request(uri: &str, field: &str, data: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{field}\"; filename=\"apple.jpg\"\r\n\
             Content-Type: image/jpeg\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = app_with(
        FakeClassifier::new(vec![0.25; 4]),
        FakeClassifier::new(vec![0.25; 4]),
        true,
    );

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "OK");
}

#[tokio::test]
async fn test_predict_leaf_with_treatment() {
    let leaf = FakeClassifier::new(vec![0.02, 0.03, 0.9, 0.05]);
    let app = app_with(FakeClassifier::new(vec![0.25; 4]), leaf.clone(), true);

    let response = app
        .oneshot(multipart_request("/predict/leaf", "image", &jpeg_bytes()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["predictedClass"], "AppleLeaf___Cedar_apple_rust");
    assert_eq!(body["confidence"], 90.0);
    assert_eq!(body["probs"].as_array().unwrap().len(), 4);
    assert_eq!(body["healthy"], false);
    assert!(body["recommendation"]
        .as_str()
        .unwrap()
        .starts_with("Cedar apple rust"));
    assert_eq!(leaf.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_predict_fruit_without_treatment() {
    let fruit = FakeClassifier::new(vec![0.1, 0.1, 0.1, 0.7]);
    let leaf = FakeClassifier::new(vec![0.25; 4]);
    let app = app_with(fruit.clone(), leaf.clone(), false);

    let response = app
        .oneshot(multipart_request("/predict/fruit", "image", &jpeg_bytes()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["predictedClass"], "Apple___healthy");
    assert_eq!(body["healthy"], true);
    assert!(body.get("recommendation").is_none());
    assert_eq!(fruit.calls.load(Ordering::SeqCst), 1);
    assert_eq!(leaf.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_missing_image_field() {
    let app = app_with(
        FakeClassifier::new(vec![0.25; 4]),
        FakeClassifier::new(vec![0.25; 4]),
        true,
    );

    let response = app
        .oneshot(multipart_request("/predict/leaf", "file", &jpeg_bytes()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "No image file provided");
}

#[tokio::test]
async fn test_undecodable_image() {
    let app = app_with(
        FakeClassifier::new(vec![0.25; 4]),
        FakeClassifier::new(vec![0.25; 4]),
        true,
    );

    let response = app
        .oneshot(multipart_request("/predict/fruit", "image", b"not an image"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(json_body(response).await["error"]
        .as_str()
        .unwrap()
        .contains("decode"));
}

#[tokio::test]
async fn test_inference_failure_is_500() {
    let app = app_with(
        Arc::new(FailingClassifier),
        FakeClassifier::new(vec![0.25; 4]),
        true,
    );

    let response = app
        .oneshot(multipart_request("/predict/fruit", "image", &jpeg_bytes()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json_body(response).await["error"], "model produced no scores");
}

#[tokio::test]
async fn test_wrong_output_width_is_500() {
    let app = app_with(
        FakeClassifier::new(vec![0.5, 0.5]),
        FakeClassifier::new(vec![0.25; 4]),
        true,
    );

    let response = app
        .oneshot(multipart_request("/predict/fruit", "image", &jpeg_bytes()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_list_models() {
    let app = app_with(
        FakeClassifier::new(vec![0.25; 4]),
        FakeClassifier::new(vec![0.25; 4]),
        true,
    );

    let response = app
        .oneshot(Request::builder().uri("/models").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["fruit"]["input_shape"], serde_json::json!([224, 224, 3]));
    assert_eq!(body["leaf"]["labels"][3], "AppleLeaf___healthy");
}

#[tokio::test]
async fn test_get_on_predict_is_rejected() {
    let app = app_with(
        FakeClassifier::new(vec![0.25; 4]),
        FakeClassifier::new(vec![0.25; 4]),
        true,
    );

    let response = app
        .oneshot(Request::builder().uri("/predict/leaf").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_oversized_upload_is_413() {
    let leaf = FakeClassifier::new(vec![0.25; 4]);
    let state = state_with(FakeClassifier::new(vec![0.25; 4]), leaf.clone(), true);
    let app = create_router(Arc::new(state), 1024);

    let response = app
        .oneshot(multipart_request("/predict/leaf", "image", &[0u8; 64 * 1024]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert!(json_body(response).await["error"]
        .as_str()
        .unwrap()
        .starts_with("Invalid multipart body"));
    assert_eq!(leaf.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_upload_under_limit_is_accepted() {
    let state = state_with(
        FakeClassifier::new(vec![0.25; 4]),
        FakeClassifier::new(vec![0.25; 4]),
        true,
    );
    let image = jpeg_bytes();
    let app = create_router(Arc::new(state), image.len() + 1024);

    let response = app
        .oneshot(multipart_request("/predict/fruit", "image", &image))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_production_hides_internal_errors() {
    let state = state_with(
        Arc::new(FailingClassifier),
        FakeClassifier::new(vec![0.25; 4]),
        true,
    )
    .with_production(true);
    let app = create_router(Arc::new(state), 5 * 1024 * 1024);

    let response = app
        .oneshot(multipart_request("/predict/fruit", "image", &jpeg_bytes()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json_body(response).await["error"], "An internal error occurred");
}

#[tokio::test]
async fn test_production_keeps_client_error_messages() {
    let state = state_with(
        FakeClassifier::new(vec![0.25; 4]),
        FakeClassifier::new(vec![0.25; 4]),
        true,
    )
    .with_production(true);
    let app = create_router(Arc::new(state), 5 * 1024 * 1024);

    let response = app
        .oneshot(multipart_request("/predict/leaf", "file", &jpeg_bytes()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "No image file provided");
}
