//! HTTP inference endpoint
//!
//! Owns the application context (generator, metrics, config) and serves:
//!
//! - `GET /` fixed health acknowledgement
//! - `POST /infer?prompt=..&max_length=..`
//! - `POST /infer/{prompt}?max_length=..` (and the `/predict/{prompt}` alias)
//! - `GET /metrics` Prometheus exposition, when monitoring is enabled

use anyhow::{anyhow, Context, Result};
use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::ServiceConfig;
use crate::error::{ServiceError, ServiceResult};
use crate::generation::{GenerationRequest, ModelGenerator, TextGenerator};
use crate::metrics::{spawn_sampler, MetricsRecorder, SysinfoStats, PROMETHEUS_CONTENT_TYPE};

/// Shared, read-only application context handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub generator: Arc<dyn TextGenerator>,
    pub metrics: Arc<MetricsRecorder>,
    pub config: Arc<ServiceConfig>,
}

impl AppState {
    pub fn new(generator: Arc<dyn TextGenerator>, config: ServiceConfig) -> Self {
        Self {
            generator,
            metrics: Arc::new(MetricsRecorder::new()),
            config: Arc::new(config),
        }
    }
}

/// Body of `GET /`
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthResponse {
    pub message: String,
    #[serde(rename = "status-code")]
    pub status_code: u16,
}

/// Query parameters accepted by the inference routes
#[derive(Debug, Default, Deserialize)]
pub struct InferQuery {
    pub prompt: Option<String>,
    /// Kept as raw text so that malformed values map to a 400 with a
    /// useful message
    pub max_length: Option<String>,
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/", get(health_handler))
        .route("/infer", post(infer_query_handler))
        .route("/infer/:prompt", post(infer_path_handler))
        .route("/predict/:prompt", post(infer_path_handler));

    if state.config.metrics.enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    router.with_state(state)
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        message: "OK".to_string(),
        status_code: 200,
    })
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
        state.metrics.to_prometheus(),
    )
}

async fn infer_query_handler(
    State(state): State<AppState>,
    Query(query): Query<InferQuery>,
) -> ServiceResult<Json<String>> {
    let prompt = query.prompt.unwrap_or_default();
    run_generation(state, prompt, query.max_length.as_deref()).await
}

async fn infer_path_handler(
    State(state): State<AppState>,
    Path(prompt): Path<String>,
    Query(query): Query<InferQuery>,
) -> ServiceResult<Json<String>> {
    run_generation(state, prompt, query.max_length.as_deref()).await
}

/// Validate, then generate on a blocking worker inside the latency scope
async fn run_generation(
    state: AppState,
    prompt: String,
    max_length: Option<&str>,
) -> ServiceResult<Json<String>> {
    let request = GenerationRequest::resolve(
        prompt,
        max_length,
        state.config.generation.default_max_length,
    )?;

    let generator = Arc::clone(&state.generator);
    let metrics = Arc::clone(&state.metrics);
    let max_length = request.max_length;

    let (result, elapsed) = tokio::task::spawn_blocking(move || {
        let timer = metrics.time_inference();
        let result = generator.generate(&request.prompt, request.max_length);
        (result, timer.stop())
    })
    .await
    .map_err(|e| ServiceError::Generation(anyhow!("Generation task failed: {}", e)))?;

    let text = result?;
    tracing::info!(
        "Generated {} chars (max_length={}) in {:.3}s",
        text.len(),
        max_length,
        elapsed.as_secs_f64()
    );
    Ok(Json(text))
}

/// Load the model, start the sampler and serve until Ctrl-C or SIGTERM.
///
/// Model or tokenizer load failures are fatal: the listener is never bound.
pub async fn serve(config: ServiceConfig) -> Result<()> {
    tracing::info!("Starting inference server");
    tracing::info!("  Model directory: {:?}", config.model_dir);
    tracing::info!("  Device: {}", config.device);
    tracing::info!(
        "  Default max_length: {}",
        config.generation.default_max_length
    );

    let load_config = config.clone();
    let generator = tokio::task::spawn_blocking(move || ModelGenerator::load(&load_config))
        .await
        .context("Model loading task failed")??;
    tracing::info!("  Generation: {:?}", generator.params());

    let bind_addr = config.server.bind_addr();
    let metrics_config = config.metrics.clone();
    let state = AppState::new(Arc::new(generator), config);

    let sampler = metrics_config.enabled.then(|| {
        spawn_sampler(
            Arc::clone(&state.metrics),
            SysinfoStats::new(),
            &metrics_config,
        )
    });

    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;
    tracing::info!("Listening on http://{}", bind_addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    if let Some(sampler) = sampler {
        sampler.shutdown().await;
    }
    served.context("Server error")?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on Unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl-C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    /// Returns "X" and remembers how it was called
    #[derive(Default)]
    struct StubGenerator {
        calls: AtomicUsize,
        last_max_length: AtomicUsize,
    }

    impl TextGenerator for StubGenerator {
        fn generate(&self, _prompt: &str, max_length: usize) -> ServiceResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.last_max_length.store(max_length, Ordering::SeqCst);
            Ok("X".to_string())
        }
    }

    struct FailingGenerator;

    impl TextGenerator for FailingGenerator {
        fn generate(&self, _prompt: &str, _max_length: usize) -> ServiceResult<String> {
            Err(ServiceError::Generation(anyhow!("out of memory")))
        }
    }

    fn test_app() -> (Router, Arc<StubGenerator>, Arc<MetricsRecorder>) {
        let stub = Arc::new(StubGenerator::default());
        let state = AppState::new(stub.clone(), ServiceConfig::default());
        let metrics = Arc::clone(&state.metrics);
        (create_router(state), stub, metrics)
    }

    async fn send(app: Router, method: &str, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_root_returns_fixed_payload() {
        let (app, _, _) = test_app();
        let (status, body) = send(app, "GET", "/").await;

        assert_eq!(status, StatusCode::OK);
        let value: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"message": "OK", "status-code": 200})
        );
    }

    #[tokio::test]
    async fn test_infer_returns_json_string() {
        let (app, stub, _) = test_app();
        let (status, body) = send(app, "POST", "/infer?prompt=hello&max_length=20").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "\"X\"");
        assert_eq!(stub.last_max_length.load(Ordering::SeqCst), 20);
    }

    #[tokio::test]
    async fn test_path_prompt_variants() {
        for uri in ["/infer/hello%20world", "/predict/hello?max_length=5"] {
            let (app, stub, _) = test_app();
            let (status, body) = send(app, "POST", uri).await;
            assert_eq!(status, StatusCode::OK, "{}", uri);
            assert_eq!(body, "\"X\"");
            assert_eq!(stub.calls.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn test_omitted_max_length_uses_default() {
        let (app, stub, _) = test_app();
        let (status, _) = send(app, "POST", "/infer?prompt=hello").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(stub.last_max_length.load(Ordering::SeqCst), 16);
    }

    #[tokio::test]
    async fn test_invalid_max_length_never_reaches_generator() {
        for uri in [
            "/infer?prompt=hello&max_length=0",
            "/infer?prompt=hello&max_length=-3",
            "/infer?prompt=hello&max_length=many",
            "/infer/hello?max_length=0",
        ] {
            let (app, stub, _) = test_app();
            let (status, body) = send(app, "POST", uri).await;

            assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
            assert!(body.contains("max_length"), "{}", body);
            assert_eq!(stub.calls.load(Ordering::SeqCst), 0);
        }
    }

    #[tokio::test]
    async fn test_missing_prompt_is_rejected() {
        let (app, stub, _) = test_app();
        let (status, _) = send(app, "POST", "/infer").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(stub.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_generation_failure_is_500() {
        let state = AppState::new(Arc::new(FailingGenerator), ServiceConfig::default());
        let metrics = Arc::clone(&state.metrics);
        let (status, body) = send(create_router(state), "POST", "/infer?prompt=hello").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.contains("out of memory"));
        assert_eq!(metrics.inference_latency().count(), 1);
    }

    #[tokio::test]
    async fn test_each_request_records_one_latency_observation() {
        let (app, _, metrics) = test_app();
        send(app.clone(), "POST", "/infer?prompt=hello").await;
        send(app.clone(), "POST", "/infer/hello").await;
        send(app, "POST", "/infer?prompt=hello&max_length=0").await;

        assert_eq!(metrics.inference_latency().count(), 2);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let (app, _, _) = test_app();
        send(app.clone(), "POST", "/infer?prompt=hello").await;
        let (status, body) = send(app, "GET", "/metrics").await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("model_inference_latency_seconds_count 1"));
        assert!(body.contains("# TYPE training_steps_total counter"));
    }

    #[tokio::test]
    async fn test_metrics_route_disabled() {
        let mut config = ServiceConfig::default();
        config.metrics.enabled = false;
        let state = AppState::new(Arc::new(StubGenerator::default()), config);
        let (status, _) = send(create_router(state), "GET", "/metrics").await;

        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_serve_fails_without_artifact() {
        let config = ServiceConfig::default()
            .with_model_dir("/nonexistent/lmserve-artifact")
            .with_device(crate::model::DevicePreference::Cpu);
        let err = serve(config).await.unwrap_err();
        assert!(err.to_string().contains("failed to load model"));
    }
}
