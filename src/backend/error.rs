use thiserror::Error;

/// Errors returned by every call to the hosted backend.
///
/// `Api` carries the backend's own message so callers can show it verbatim;
/// its `Display` is exactly that message.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Request timed out")]
    Timeout,

    #[error("{message}")]
    Api { status: u16, message: String },

    #[error("Unexpected response from backend: {0}")]
    Decode(String),

    #[error("Response too large (exceeds {0} bytes)")]
    ResponseTooLarge(usize),

    #[error("Invalid backend URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl BackendError {
    /// Map a transport error, separating timeouts from other failures.
    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BackendError::Timeout
        } else {
            BackendError::Network(err)
        }
    }

    /// Build an `Api` error from a non-2xx response body.
    ///
    /// The auth and table services disagree on the field name, so the first of
    /// `message`, `msg`, `error_description`, `error` wins. A body that is not
    /// JSON is used as-is; an empty body falls back to the status code.
    pub(crate) fn from_response_body(status: u16, body: &str) -> Self {
        let from_json = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|value| {
                ["message", "msg", "error_description", "error"]
                    .iter()
                    .find_map(|key| value.get(key).and_then(|v| v.as_str()).map(str::to_owned))
            });

        let message = match from_json {
            Some(message) if !message.trim().is_empty() => message,
            _ if !body.trim().is_empty() && !body.trim_start().starts_with('{') => {
                body.trim().to_string()
            }
            _ => format!("HTTP error: status {}", status),
        };

        BackendError::Api { status, message }
    }

    /// True when the backend rejected the credentials rather than failing.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, BackendError::Api { status, .. } if *status == 401 || *status == 403)
    }

    /// True when the access token itself was refused (expired or revoked JWT).
    ///
    /// Row-level security refusals come back as 403 and are not included.
    pub fn is_token_rejected(&self) -> bool {
        matches!(self, BackendError::Api { status: 401, .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_field_used_verbatim() {
        let err = BackendError::from_response_body(
            409,
            r#"{"code":"23505","message":"duplicate key value violates unique constraint"}"#,
        );
        assert_eq!(
            err.to_string(),
            "duplicate key value violates unique constraint"
        );
    }

    #[test]
    fn test_auth_style_fields() {
        let err = BackendError::from_response_body(400, r#"{"error":"invalid_grant","error_description":"Invalid Refresh Token"}"#);
        assert_eq!(err.to_string(), "Invalid Refresh Token");

        let err = BackendError::from_response_body(401, r#"{"msg":"invalid JWT"}"#);
        assert_eq!(err.to_string(), "invalid JWT");
        assert!(err.is_unauthorized());
    }

    #[test]
    fn test_plain_text_and_empty_bodies() {
        let err = BackendError::from_response_body(502, "Bad Gateway");
        assert_eq!(err.to_string(), "Bad Gateway");

        let err = BackendError::from_response_body(500, "");
        assert_eq!(err.to_string(), "HTTP error: status 500");
        assert!(!err.is_unauthorized());
    }
}
