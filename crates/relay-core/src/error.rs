use http::StatusCode;

/// Error that knows how it is reported to an HTTP caller
///
/// Each crate keeps its own error enum; this is the only contract the
/// routes rely on when rendering a failure.
pub trait HttpError: std::error::Error {
    fn status_code(&self) -> StatusCode;

    /// Stable kind name, such as `UpstreamRateLimited`
    fn error_type(&self) -> &str;

    /// Text returned to the caller; never includes provider identity
    fn client_message(&self) -> String;

    /// Redacted upstream detail, if any
    fn detail(&self) -> Option<String> {
        None
    }
}
