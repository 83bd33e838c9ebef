//! HTTP server setup and configuration.

use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::Instrument;
use uuid::Uuid;

use super::handlers::{self, REQUEST_ID_HEADER};
use crate::config::Config;
use crate::limiter::RateLimiter;
use crate::provider::ProviderClient;
use crate::relay::RelaySettings;

/// Per-request correlation ID, inserted as a request extension.
#[derive(Debug, Clone, Copy)]
pub struct RequestId(pub Uuid);

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub provider: Arc<ProviderClient>,
    pub limiter: Arc<RateLimiter>,
    pub relay: RelaySettings,
}

impl AppState {
    /// Build state from configuration.
    pub fn from_config(config: &Config) -> crate::Result<Self> {
        Ok(Self {
            provider: Arc::new(ProviderClient::new(&config.provider)?),
            limiter: Arc::new(RateLimiter::new(
                config.rate_limit.window(),
                config.rate_limit.max_requests,
            )),
            relay: config.stream.relay_settings(),
        })
    }
}

/// Assign a request ID, run the request inside its span, and echo the ID back.
async fn assign_request_id(mut request: Request, next: Next) -> Response {
    let request_id = RequestId(Uuid::new_v4());
    request.extensions_mut().insert(request_id);

    let span = tracing::info_span!("request", request_id = %request_id.0);
    let mut response = next.run(request).instrument(span).await;

    if let Ok(value) = HeaderValue::from_str(&request_id.0.to_string()) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
    response
}

/// Create the axum router with all endpoints.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/v1/stream",
            post(handlers::stream_generate).get(handlers::rate_limit_status),
        )
        .route("/v1/generate", post(handlers::generate))
        .route("/v1/rate-limit", get(handlers::rate_limit_status))
        .route("/health", get(handlers::health))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn(assign_request_id)),
        )
}

/// Run the HTTP server.
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let listen_addr = config.server.listen.clone();
    let state = AppState::from_config(&config)?;

    tracing::info!(
        provider = %config.provider.name,
        url = %config.provider.url,
        default_model = %config.provider.default_model,
        window_secs = config.rate_limit.window_secs,
        max_requests = config.rate_limit.max_requests,
        heartbeat_secs = config.stream.heartbeat_secs,
        "Relay configured"
    );

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!(address = %listen_addr, "Starting genrelay server");

    axum::serve(listener, app).await?;

    Ok(())
}
