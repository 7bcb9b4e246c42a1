//! Integration tests for the serving API endpoints

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use neo_server::api::{create_router, AppState, MODEL_VERSION_HEADER, WELCOME_MESSAGE};
use serving_lib::{
    drift::{DriftMonitor, ReferenceDistribution, StatTest},
    health::{components, HealthRegistry},
    observability::StructuredLogger,
    predictor::{DegeneracyPolicy, FeatureEngineer},
    registry::{ModelArtifact, ModelKey, ModelProvider, ModelRegistry, ProviderConfig, RegistryError},
    store::MetricsStore,
    FeatureRecord, PipelineConfig, ServingPipeline, FEATURE_COUNT, RELATIVE_VELOCITY,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

#[derive(Clone, Copy)]
enum RegistryMode {
    Serving,
    NotPromoted,
    Broken,
}

struct TestRegistry {
    mode: RegistryMode,
    calls: AtomicU32,
}

#[async_trait]
impl ModelRegistry for TestRegistry {
    async fn resolve(&self, name: &str, stage: &str) -> Result<ModelArtifact, RegistryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            RegistryMode::NotPromoted => Err(RegistryError::NotFound(format!("{name}/{stage}"))),
            RegistryMode::Broken => Err(RegistryError::Other("403 PERMISSION_DENIED".to_string())),
            RegistryMode::Serving => {
                let mut weights = vec![0.0; FEATURE_COUNT];
                weights[RELATIVE_VELOCITY] = 1.0;
                let body = serde_json::json!({"weights": weights, "bias": -50_000.0});
                Ok(ModelArtifact {
                    name: name.to_string(),
                    stage: stage.to_string(),
                    version: "12".to_string(),
                    path: "model.json".to_string(),
                    bytes: body.to_string().into_bytes(),
                })
            }
        }
    }
}

struct TestApp {
    router: Router,
    state: Arc<AppState>,
    registry: Arc<TestRegistry>,
}

fn reference() -> ReferenceDistribution {
    let rows: Vec<FeatureRecord> = (0..40)
        .map(|i| {
            let v = 15_000.0 + f64::from(i) * 1_500.0;
            FeatureRecord {
                absolute_magnitude: 20.0,
                estimated_diameter_min: 0.2,
                estimated_diameter_max: 0.4,
                relative_velocity: v,
                miss_distance: 3.0e7,
                average_diameter: 0.3,
                scaled_relative_velocity: f64::from(i) / 39.0,
                momentum: v * 0.3,
                velocity_distance_ratio: v / 3.0e7,
                diameter_magnitude_ratio: 0.015,
            }
        })
        .collect();
    ReferenceDistribution::from_records(&rows).unwrap()
}

async fn setup_test_app(mode: RegistryMode, policy: DegeneracyPolicy) -> TestApp {
    let registry = Arc::new(TestRegistry {
        mode,
        calls: AtomicU32::new(0),
    });
    let health = HealthRegistry::new();
    health.register(components::MODEL).await;
    health.register(components::METRICS_STORE).await;
    health.set_started(true).await;

    let provider = ModelProvider::with_health(
        registry.clone(),
        ProviderConfig {
            polling_interval: Duration::from_millis(1),
            max_attempts: 2,
            request_timeout: Duration::from_secs(1),
        },
        health.clone(),
    );

    let store = MetricsStore::in_memory().await.unwrap();
    store.ensure_schema().await.unwrap();

    let pipeline = ServingPipeline::new(
        FeatureEngineer::new(policy),
        provider,
        DriftMonitor::new(Arc::new(reference()), StatTest::Auto),
        store,
        PipelineConfig {
            model: ModelKey::new("neo-prediction", "Production"),
            monitoring_required: false,
        },
        health,
        StructuredLogger::new("api-tests"),
    );

    let state = Arc::new(AppState::new(Arc::new(pipeline)));
    TestApp {
        router: create_router(state.clone()),
        state,
        registry,
    }
}

fn record(id: i64, velocity: f64) -> serde_json::Value {
    serde_json::json!({
        "neo_id": id,
        "name": format!("({id})"),
        "absolute_magnitude": 20.5,
        "estimated_diameter_min": 0.2,
        "estimated_diameter_max": 0.4,
        "orbiting_body": "Earth",
        "relative_velocity": velocity,
        "miss_distance": 3.0e7
    })
}

fn predict_request(body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/predict")
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_welcome() {
    let app = setup_test_app(RegistryMode::Serving, DegeneracyPolicy::Substitute).await;

    let response = app.router.oneshot(get("/")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&body[..], WELCOME_MESSAGE.as_bytes());
}

#[tokio::test]
async fn test_predict_returns_one_label_per_row() {
    let app = setup_test_app(RegistryMode::Serving, DegeneracyPolicy::Substitute).await;
    let batch = serde_json::json!([record(1, 20_000.0), record(2, 75_000.0), record(3, 40_000.0)]);

    let response = app
        .router
        .oneshot(predict_request(serde_json::to_vec(&batch).unwrap()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[MODEL_VERSION_HEADER], "12");
    assert_eq!(body_json(response).await, serde_json::json!([0, 1, 0]));
    assert_eq!(app.state.pipeline.store().count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_predict_accepts_string_encoded_batch() {
    let app = setup_test_app(RegistryMode::Serving, DegeneracyPolicy::Substitute).await;
    // The legacy client posts the records serialized a second time
    let inner = serde_json::json!([record(1, 80_000.0), record(2, 10_000.0)]).to_string();

    let response = app
        .router
        .oneshot(predict_request(serde_json::to_vec(&inner).unwrap()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, serde_json::json!([1, 0]));
}

#[tokio::test]
async fn test_null_names_leave_nothing_to_score() {
    let app = setup_test_app(RegistryMode::Serving, DegeneracyPolicy::Substitute).await;
    let mut batch = serde_json::json!([record(1, 20_000.0), record(2, 75_000.0)]);
    for row in batch.as_array_mut().unwrap() {
        row["name"] = serde_json::Value::Null;
    }

    let response = app
        .router
        .oneshot(predict_request(serde_json::to_vec(&batch).unwrap()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, serde_json::json!([]));
    assert_eq!(app.registry.calls.load(Ordering::SeqCst), 0);
    assert_eq!(app.state.pipeline.store().count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_malformed_body_is_bad_request_without_model_load() {
    let app = setup_test_app(RegistryMode::Serving, DegeneracyPolicy::Substitute).await;

    let response = app
        .router
        .oneshot(predict_request(b"{\"neo_id\": ".to_vec()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["kind"], "input");
    assert_eq!(app.registry.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_rejected_degeneracy_is_bad_request() {
    let app = setup_test_app(RegistryMode::Serving, DegeneracyPolicy::Reject).await;
    let batch = serde_json::json!([record(1, 20_000.0)]);

    let response = app
        .router
        .oneshot(predict_request(serde_json::to_vec(&batch).unwrap()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["kind"], "input");
    assert!(body["error"].as_str().unwrap().contains("scaled_relative_velocity"));
}

#[tokio::test]
async fn test_unpromoted_model_is_service_unavailable() {
    let app = setup_test_app(RegistryMode::NotPromoted, DegeneracyPolicy::Substitute).await;
    let batch = serde_json::json!([record(1, 20_000.0), record(2, 30_000.0)]);

    let response = app
        .router
        .oneshot(predict_request(serde_json::to_vec(&batch).unwrap()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["kind"], "model_unavailable");
    assert_eq!(app.registry.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_registry_failure_is_bad_gateway() {
    let app = setup_test_app(RegistryMode::Broken, DegeneracyPolicy::Substitute).await;
    let batch = serde_json::json!([record(1, 20_000.0), record(2, 30_000.0)]);

    let response = app
        .router
        .oneshot(predict_request(serde_json::to_vec(&batch).unwrap()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(body_json(response).await["kind"], "registry");
    assert_eq!(app.registry.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_healthz_reports_components() {
    let app = setup_test_app(RegistryMode::Serving, DegeneracyPolicy::Substitute).await;

    let response = app.router.oneshot(get("/healthz")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let health = body_json(response).await;
    assert_eq!(health["status"], "healthy");
    assert!(health["components"].get("model").is_some());
}

#[tokio::test]
async fn test_healthz_returns_503_after_failed_load() {
    let app = setup_test_app(RegistryMode::Broken, DegeneracyPolicy::Substitute).await;
    let batch = serde_json::json!([record(1, 20_000.0), record(2, 30_000.0)]);
    app.router
        .clone()
        .oneshot(predict_request(serde_json::to_vec(&batch).unwrap()))
        .await
        .unwrap();

    let response = app.router.oneshot(get("/healthz")).await.unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["status"], "unhealthy");
}

#[tokio::test]
async fn test_readyz_waits_for_model() {
    let app = setup_test_app(RegistryMode::Serving, DegeneracyPolicy::Substitute).await;

    let response = app.router.clone().oneshot(get("/readyz")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["ready"], false);

    app.state.pipeline.warm_up().await.unwrap();

    let response = app.router.oneshot(get("/readyz")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let readiness = body_json(response).await;
    assert_eq!(readiness["ready"], true);
    assert_eq!(readiness["model_version"], "12");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = setup_test_app(RegistryMode::Serving, DegeneracyPolicy::Substitute).await;
    let batch = serde_json::json!([record(1, 20_000.0), record(2, 30_000.0)]);
    app.router
        .clone()
        .oneshot(predict_request(serde_json::to_vec(&batch).unwrap()))
        .await
        .unwrap();

    let response = app.router.oneshot(get("/metrics")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("neo_serving_batches_total"));
    assert!(text.contains("neo_serving_model_version_info"));
}
