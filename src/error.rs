//! Error types for genrelay.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

/// Result type alias for genrelay operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for genrelay.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("No API key configured for provider '{provider}'")]
    MissingCredential { provider: String },

    #[error("Invalid request: {0}")]
    InvalidInput(String),

    #[error("Rate limit exceeded, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("{message}")]
    UpstreamRejected { status: u16, message: String },

    #[error("Upstream response body has no supported stream shape")]
    UnsupportedStreamShape,

    #[error("Upstream transport interrupted: {0}")]
    TransportInterrupted(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// HTTP status this error maps to when nothing has been sent yet.
    pub fn status(&self) -> StatusCode {
        match self {
            Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::MissingCredential { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Error::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::UpstreamRejected { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Error::UnsupportedStreamShape => StatusCode::BAD_GATEWAY,
            Error::TransportInterrupted(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();

        let body = serde_json::json!({
            "error": {
                "message": message,
                "type": "genrelay_error",
                "code": status.as_u16()
            }
        });

        let mut response = (status, axum::Json(body)).into_response();
        if let Error::RateLimited { retry_after_secs } = self {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_status_propagated_verbatim() {
        let err = Error::UpstreamRejected {
            status: 403,
            message: "API key not valid".to_string(),
        };
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        assert_eq!(err.to_string(), "API key not valid");
    }

    #[test]
    fn test_out_of_range_upstream_status_maps_to_bad_gateway() {
        let err = Error::UpstreamRejected {
            status: 42,
            message: "odd".to_string(),
        };
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_rate_limited_sets_retry_after() {
        let response = Error::RateLimited {
            retry_after_secs: 17,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "17");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            Error::InvalidInput("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::MissingCredential {
                provider: "gemini".into()
            }
            .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            Error::UnsupportedStreamShape.status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            Error::TransportInterrupted("reset".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
