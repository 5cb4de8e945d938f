pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod validation;
pub mod video;

use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Request, State},
    http::{HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{any, get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};

use tts_core::{Coordinator, ModelRegistry};
use video_core::VideoDelegate;

use crate::config::ServerConfig;
use crate::error::ApiError;
use crate::metrics::AppMetrics;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ModelRegistry>,
    pub coordinator: Coordinator,
    pub video: Option<Arc<VideoDelegate>>,
    pub metrics: AppMetrics,
    pub request_count: Arc<AtomicU64>,
    pub config: ServerConfig,
}

impl AppState {
    pub fn new(config: ServerConfig, registry: Arc<ModelRegistry>, video: Option<VideoDelegate>) -> Self {
        let coordinator = Coordinator::new(registry.clone()).with_inference_timeout(config.inference_timeout());
        Self {
            registry,
            coordinator,
            video: video.map(Arc::new),
            metrics: AppMetrics::new(),
            request_count: Arc::new(AtomicU64::new(0)),
            config,
        }
    }
}

// Request ID middleware for tracing
async fn add_request_id(mut request: Request, next: Next) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    let header = HeaderValue::from_str(&request_id).ok();
    if let Some(value) = header.clone() {
        request.headers_mut().insert("x-request-id", value);
    }
    let mut response = next.run(request).await;
    if let Some(value) = header {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

// TimeoutLayer answers with an empty 408; render it like every other error
async fn structured_timeout(State(limit_secs): State<u64>, response: Response) -> Response {
    if response.status() == StatusCode::REQUEST_TIMEOUT {
        return ApiError::Timeout(format!("Request exceeded {limit_secs}s")).into_response();
    }
    response
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .allow_credentials(false);

    let origins: Vec<HeaderValue> = config
        .cors_allowed_origins
        .iter()
        .flatten()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect();

    match &config.cors_allowed_origins {
        Some(_) if !origins.is_empty() => {
            info!("CORS configured for {} origin(s)", origins.len());
            base.allow_origin(AllowOrigin::list(origins))
        }
        Some(_) => {
            warn!("CORS_ALLOWED_ORIGINS is empty, falling back to permissive CORS");
            base.allow_origin(Any)
        }
        None => {
            warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins (development mode)");
            base.allow_origin(Any)
        }
    }
}

/// Full application: every route at the root and again under `/api`.
pub fn router(state: AppState) -> Router {
    // Bounded by the request timeout
    let bounded = Router::new()
        .route("/", get(handlers::health_check))
        .route("/health", get(handlers::health_check))
        .route("/healthz", get(handlers::health_check))
        .route("/info", get(handlers::info))
        .route("/metrics", get(handlers::metrics_endpoint))
        .route("/load/{variant}", post(handlers::load_variant))
        .route("/tts/speak", get(handlers::speak))
        .route("/tts/{mode}", post(handlers::synthesize))
        .layer(TimeoutLayer::new(state.config.request_timeout()))
        .layer(axum::middleware::map_response_with_state(
            state.config.request_timeout_secs,
            structured_timeout,
        ));

    // Streams and video jobs carry their own bounds
    let unbounded = Router::new().route("/tts/voice_clone/sse", post(handlers::voice_clone_sse));
    let unbounded = if state.video.is_some() {
        unbounded
            .route(
                "/video/generate",
                post(video::generate_video).layer(DefaultBodyLimit::max(video::MAX_UPLOAD_BYTES)),
            )
            .route("/video/queue", post(video::queue_video))
            .route("/video/avatars", get(video::list_avatars))
            .route("/video/engines", get(video::list_engines))
            .route("/video/status", get(video::system_status))
    } else {
        unbounded.route("/video/{*rest}", any(video::video_disabled))
    };

    let api = Router::new().merge(bounded).merge(unbounded);

    let middleware_stack = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state.config))
        .into_inner();

    Router::new()
        .merge(api.clone())
        .nest("/api", api)
        .layer(axum::middleware::from_fn(add_request_id))
        .layer(middleware_stack)
        .with_state(state)
}
