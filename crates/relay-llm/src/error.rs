use http::StatusCode;
use relay_core::HttpError;
use thiserror::Error;

/// Every failure a completion request can end in
///
/// Upstream variants only ever carry redacted detail: the provider's real
/// name and host are replaced before the error is constructed.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// No canonical id or alias matches the requested model
    #[error("model not found: {model}")]
    ModelNotFound { model: String },

    /// Malformed conversation or options
    #[error("invalid request: {0}")]
    Validation(String),

    /// Vetoed by the blocklist, banned content or the caller's tier
    #[error("request blocked: {0}")]
    Blocked(String),

    /// Upstream rejected the gateway's credentials
    #[error("upstream authentication failed")]
    UpstreamAuth { status: u16, detail: String },

    /// Upstream throttled the request
    #[error("upstream rate limit exceeded")]
    UpstreamRateLimited {
        detail: String,
        /// Seconds to wait, when the upstream said so
        retry_after: Option<u64>,
    },

    /// No answer within the allowed time
    #[error("upstream timed out")]
    UpstreamTimeout { detail: String },

    /// Non-success status, unreadable body or an error payload
    #[error("upstream returned an invalid response")]
    UpstreamBadResponse { status: Option<u16>, detail: String },

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl GatewayError {
    /// Machine-checkable kind
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ModelNotFound { .. } => "ModelNotFound",
            Self::Validation(_) => "ValidationError",
            Self::Blocked(_) => "Blocked",
            Self::UpstreamAuth { .. } => "UpstreamAuthError",
            Self::UpstreamRateLimited { .. } => "UpstreamRateLimited",
            Self::UpstreamTimeout { .. } => "UpstreamTimeout",
            Self::UpstreamBadResponse { .. } => "UpstreamBadResponse",
            Self::Internal(_) => "InternalError",
        }
    }

    /// Whether the failure came from the upstream call
    ///
    /// Only these trigger a configured fallback; registry and pipeline
    /// errors are the caller's to fix.
    pub const fn is_upstream(&self) -> bool {
        matches!(
            self,
            Self::UpstreamAuth { .. }
                | Self::UpstreamRateLimited { .. }
                | Self::UpstreamTimeout { .. }
                | Self::UpstreamBadResponse { .. }
        )
    }

    /// Seconds the caller should wait before retrying
    pub const fn retry_after(&self) -> Option<u64> {
        match self {
            Self::UpstreamRateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl HttpError for GatewayError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::ModelNotFound { .. } => StatusCode::NOT_FOUND,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Blocked(_) => StatusCode::FORBIDDEN,
            Self::UpstreamAuth { .. } | Self::UpstreamBadResponse { .. } => StatusCode::BAD_GATEWAY,
            Self::UpstreamRateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_type(&self) -> &str {
        self.kind()
    }

    fn client_message(&self) -> String {
        match self {
            Self::Internal(_) => "an internal error occurred".to_owned(),
            other => other.to_string(),
        }
    }

    fn detail(&self) -> Option<String> {
        match self {
            Self::UpstreamAuth { detail, .. }
            | Self::UpstreamRateLimited { detail, .. }
            | Self::UpstreamTimeout { detail }
            | Self::UpstreamBadResponse { detail, .. }
                if !detail.is_empty() =>
            {
                Some(detail.clone())
            }
            _ => None,
        }
    }
}

/// JSON body for an error response
pub fn error_body(error: &GatewayError) -> serde_json::Value {
    let mut body = serde_json::json!({
        "kind": error.kind(),
        "status": error.status_code().as_u16(),
        "message": error.client_message(),
    });

    if let Some(detail) = error.detail() {
        body["detail"] = serde_json::Value::String(detail);
    }

    serde_json::json!({ "error": body })
}

#[cfg(feature = "http")]
impl axum::response::IntoResponse for GatewayError {
    fn into_response(self) -> axum::response::Response {
        let mut response = (self.status_code(), axum::Json(error_body(&self))).into_response();

        if let Some(seconds) = self.retry_after()
            && let Ok(value) = http::HeaderValue::from_str(&seconds.to_string())
        {
            response.headers_mut().insert(http::header::RETRY_AFTER, value);
        }

        response
    }
}
