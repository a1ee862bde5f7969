use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{DefaultBodyLimit, Request, State},
    http::{header, HeaderValue, Method},
    middleware::Next,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use chat_stream::{FallbackResponse, StreamRequest};
use llm_core::{build_provider, GenerationAdapter};
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::GlobalKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{info, warn};
use tts_core::WebSocketSynthesizer;

use crate::channel::DeliveryChannel;
use crate::config::ServerConfig;
use crate::error::ApiError;
use crate::metrics::{MetricsResponse, PipelineMetrics, SystemMetrics};
use crate::pipeline::{run_session, PipelineDeps, SessionRequest};
use crate::store::{MemoryStore, Sender};
use crate::validation::{validate_chat_request, validate_conversation_id};

/// Request bodies are small JSON documents
const MAX_BODY_BYTES: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: PipelineDeps,
    pub config: ServerConfig,
    /// Cancelled on shutdown; every session runs under a child token.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(pipeline: PipelineDeps, config: ServerConfig) -> Self {
        Self {
            pipeline,
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// Wire the configured providers with an in-memory conversation store.
    pub fn from_config(config: ServerConfig) -> anyhow::Result<Self> {
        let provider = build_provider(
            config.llm_provider,
            config.llm_model(),
            config.llm_base_url.as_deref(),
            config.llm_timeout(),
        )?;
        info!(provider = provider.name(), model = config.llm_model(), "generation provider ready");

        let synthesis = WebSocketSynthesizer::new(
            config.tts_ws_url.clone(),
            config.tts_api_key.clone(),
            config.voice_settings(),
        );
        if config.tts_api_key.is_none() {
            warn!("TTS_API_KEY not set, voice mode will fail against the hosted provider");
        }

        let pipeline = PipelineDeps {
            generation: GenerationAdapter::new(provider).with_retry(config.retry_policy()),
            synthesis: Arc::new(synthesis),
            store: Arc::new(MemoryStore::default()),
            metrics: Arc::new(PipelineMetrics::new()),
        };
        Ok(Self::new(pipeline, config))
    }
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(tower_http::cors::Any)
        .allow_credentials(false);

    match &config.cors_allowed_origins {
        Some(allowed) => {
            let origins: Vec<HeaderValue> = allowed.iter().filter_map(|o| o.parse().ok()).collect();
            if origins.is_empty() {
                warn!("CORS_ALLOWED_ORIGINS is empty, falling back to permissive CORS");
                base.allow_origin(tower_http::cors::Any)
            } else {
                info!("CORS configured for {} origin(s)", origins.len());
                base.allow_origin(tower_http::cors::AllowOrigin::list(origins))
            }
        }
        None => {
            warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins (development mode)");
            base.allow_origin(tower_http::cors::Any)
        }
    }
}

async fn add_request_id(mut request: Request, next: Next) -> Response {
    let Ok(request_id) = HeaderValue::from_str(&uuid::Uuid::new_v4().to_string()) else {
        return next.run(request).await;
    };
    request.headers_mut().insert("x-request-id", request_id.clone());
    let mut response = next.run(request).await;
    response.headers_mut().insert("x-request-id", request_id);
    response
}

/// Build the application router with the full middleware stack.
pub fn build_router(state: AppState) -> anyhow::Result<Router> {
    let config = &state.config;

    // Global limit: all clients share one bucket.
    let per_minute = config.rate_limit_per_minute.max(1);
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_millisecond((60_000 / per_minute as u64).max(1))
            .burst_size(per_minute)
            .key_extractor(GlobalKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("invalid rate limit configuration"))?,
    );
    info!("Rate limiting: {} requests per minute", per_minute);

    let middleware_stack = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(GovernorLayer::new(governor_conf))
        .layer(TimeoutLayer::new(config.request_timeout()))
        .layer(cors_layer(config))
        .into_inner();

    let public_api = Router::new()
        .route("/health", get(health_check))
        .route("/healthz", get(health_check))
        .route("/chat", post(chat_fallback))
        .route("/chat/stream", post(chat_stream));

    // Metrics endpoint - consider adding authentication in production
    let metrics_api = Router::new().route("/metrics", get(metrics_endpoint));

    let api = Router::new().merge(public_api).merge(metrics_api);

    Ok(Router::new()
        .merge(api.clone())
        .nest("/api", api)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(axum::middleware::from_fn(add_request_id))
        .layer(middleware_stack)
        .with_state(state))
}

pub async fn health_check() -> &'static str {
    "ok"
}

fn validate(req: &StreamRequest) -> Result<String, ApiError> {
    validate_chat_request(&req.message)?;
    match &req.conversation_id {
        Some(id) => {
            validate_conversation_id(id)?;
            Ok(id.clone())
        }
        None => Ok(uuid::Uuid::new_v4().to_string()),
    }
}

/// Streaming chat: one SSE frame per wire event.
pub async fn chat_stream(
    State(state): State<AppState>,
    Json(req): Json<StreamRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let conversation_id = validate(&req)?;

    let (channel, mut rx) = DeliveryChannel::new(state.config.stream_channel_capacity);
    let session = SessionRequest {
        conversation_id,
        user_text: req.message,
        mode: req.mode,
        wants_timing: req.wants_timing,
    };
    let deps = state.pipeline.clone();
    let cancel = state.shutdown.child_token();
    tokio::spawn(async move {
        run_session(&deps, session, channel, cancel).await;
    });

    let stream = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            match Event::default().json_data(&event) {
                Ok(frame) => yield Ok::<_, Infallible>(frame),
                Err(e) => warn!(error = %e, event = event.kind(), "failed to encode wire event"),
            }
        }
    };

    let headers = [
        (header::CACHE_CONTROL, "no-cache"),
        (header::CONNECTION, "keep-alive"),
        (header::HeaderName::from_static("x-accel-buffering"), "no"),
    ];
    Ok((headers, Sse::new(stream).keep_alive(KeepAlive::default())))
}

/// Non-streaming chat used by clients after streaming failed.
pub async fn chat_fallback(
    State(state): State<AppState>,
    Json(req): Json<StreamRequest>,
) -> Result<Json<FallbackResponse>, ApiError> {
    let conversation_id = validate(&req)?;
    let deps = &state.pipeline;
    deps.metrics.record_request();
    info!(
        conversation_id = %conversation_id,
        message_len = req.message.len(),
        "fallback chat request"
    );

    let history = deps.store.history(&conversation_id).await.unwrap_or_else(|e| {
        warn!(error = %e, "failed to load history");
        Vec::new()
    });
    if let Err(e) = deps.store.save_message(&conversation_id, Sender::User, &req.message).await {
        warn!(error = %e, "failed to persist user message");
    }

    let started = Instant::now();
    let reply = match deps.generation.generate_full(&req.message, &history).await {
        Ok(reply) => {
            deps.metrics.fallback_generation.record_success(started.elapsed());
            reply.trim().to_string()
        }
        Err(e) => {
            deps.metrics.fallback_generation.record_failure(started.elapsed());
            return Err(ApiError::Generation(e));
        }
    };

    if let Err(e) = deps.store.save_message(&conversation_id, Sender::Assistant, &reply).await {
        warn!(error = %e, "failed to persist assistant message");
    }
    deps.metrics.record_fallback_served();

    Ok(Json(FallbackResponse { reply, conversation_id }))
}

pub async fn metrics_endpoint(State(state): State<AppState>) -> Json<MetricsResponse> {
    let metrics = &state.pipeline.metrics;

    let mut system = sysinfo::System::new();
    system.refresh_cpu();
    system.refresh_memory();

    let cpu_usage = system.global_cpu_info().cpu_usage();
    let memory_used = system.used_memory();
    let memory_total = system.total_memory();
    let memory_usage_percent = if memory_total > 0 {
        (memory_used as f64 / memory_total as f64 * 100.0) as f32
    } else {
        0.0
    };

    // Unix-like systems only
    let system_load = {
        #[cfg(unix)]
        {
            std::fs::read_to_string("/proc/loadavg")
                .ok()
                .and_then(|l| l.split_whitespace().next().and_then(|s| s.parse::<f64>().ok()))
        }
        #[cfg(not(unix))]
        None
    };

    Json(MetricsResponse {
        timestamp: chrono::Utc::now(),
        system: SystemMetrics {
            cpu_usage_percent: cpu_usage,
            memory_used_mb: memory_used / 1024 / 1024,
            memory_total_mb: memory_total / 1024 / 1024,
            memory_usage_percent,
            request_count: metrics.request_count(),
            uptime_seconds: metrics.uptime().as_secs(),
            system_load,
        },
        pipeline: metrics.snapshot(),
    })
}
