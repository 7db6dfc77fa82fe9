use http::StatusCode;
use relay_core::HttpError;
use thiserror::Error;

/// Errors raised by the feed endpoints
#[derive(Debug, Error)]
pub enum FeedError {
    /// Missing or wrong password for the private feed
    #[error("a valid feed password is required")]
    Unauthorized,
}

impl HttpError for FeedError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
        }
    }

    fn error_type(&self) -> &str {
        match self {
            Self::Unauthorized => "Unauthorized",
        }
    }

    fn client_message(&self) -> String {
        self.to_string()
    }
}

#[cfg(feature = "http")]
impl axum::response::IntoResponse for FeedError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = serde_json::json!({
            "error": {
                "kind": self.error_type(),
                "status": status.as_u16(),
                "message": self.client_message(),
            }
        });

        (status, axum::Json(body)).into_response()
    }
}
