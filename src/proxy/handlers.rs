//! HTTP request handlers.

use axum::{
    extract::{rejection::JsonRejection, Extension, State},
    response::{IntoResponse, Response},
    Json,
};

use super::server::{AppState, RequestId};
use super::types::{GenerateRequest, GenerateResponse, RateLimitStatusBody};
use crate::error::Error;
use crate::relay::{self, UpstreamBody, UpstreamStream};

/// Response header: correlation ID (UUID v4).
pub const REQUEST_ID_HEADER: &str = "x-genrelay-request-id";

/// Turn a JSON extraction failure into our own error body.
fn parse_body(payload: Result<Json<GenerateRequest>, JsonRejection>) -> Result<GenerateRequest, Error> {
    payload
        .map(|Json(request)| request)
        .map_err(|rejection| Error::InvalidInput(rejection.body_text()))
}

/// Gate a request on the shared limiter.
fn admit(state: &AppState) -> Result<(), Error> {
    if state.limiter.admit() {
        return Ok(());
    }
    let status = state.limiter.status();
    tracing::warn!(
        retry_after_secs = status.retry_after_secs(),
        "Rate limit exceeded"
    );
    Err(Error::RateLimited {
        retry_after_secs: status.retry_after_secs(),
    })
}

/// Handle POST /v1/stream
pub async fn stream_generate(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Response, Error> {
    admit(&state)?;
    let request = parse_body(payload)?;
    request.validate()?;

    let model = request.model_or(state.provider.default_model());
    tracing::info!(
        request_id = %request_id.0,
        provider = %state.provider.name(),
        model = %model,
        prompt_len = request.prompt.len(),
        "Received stream request"
    );

    let upstream = state.provider.stream(model, &request.prompt).await?;
    let stream = UpstreamStream::new(UpstreamBody::from_response(upstream))?;
    relay::relay(stream, &state.relay).await
}

/// Handle POST /v1/generate
pub async fn generate(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Json<GenerateResponse>, Error> {
    admit(&state)?;
    let request = parse_body(payload)?;
    request.validate()?;

    let model = request.model_or(state.provider.default_model()).to_string();
    tracing::info!(
        request_id = %request_id.0,
        provider = %state.provider.name(),
        model = %model,
        "Received generate request"
    );

    let body = state.provider.generate(&model, &request.prompt).await?;
    let fragments = relay::fragments_from_value(&body);

    Ok(Json(GenerateResponse {
        model,
        text: fragments.concat(),
        fragments,
    }))
}

/// Handle GET /v1/rate-limit (also GET /v1/stream)
pub async fn rate_limit_status(State(state): State<AppState>) -> Json<RateLimitStatusBody> {
    Json(state.limiter.status().into())
}

/// Handle GET /health
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "genrelay"
    }))
}
