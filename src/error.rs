use thiserror::Error;

use crate::transport::eventstream::FrameError;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error(
        "Model request timed out after {timeout_secs}s while calling '{url}'. \
         Increase MODEL_TIMEOUT_SECS or check model responsiveness."
    )]
    Timeout {
        url: String,
        timeout_secs: u64,
        #[source]
        source: reqwest::Error,
    },

    #[error(
        "Connection refused by model API at '{url}'. \
         Check BEDROCK_ENDPOINT_URL and AWS_REGION."
    )]
    ConnectionRefused {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error(
        "Failed to connect to model API at '{url}'. \
         Check BEDROCK_ENDPOINT_URL and network connectivity."
    )]
    Connect {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to call model API at '{url}': {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Model API rejected credentials (status {status}): {message}")]
    Unauthorized { status: u16, message: String },

    #[error("Model API throttled the request: {message}")]
    Throttled { message: String },

    #[error("Model request failed with status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Model stream reported {kind}: {message}")]
    Remote { kind: String, message: String },

    #[error("Malformed event stream frame: {0}")]
    Frame(#[from] FrameError),

    #[error("Malformed stream event: {0}")]
    Envelope(String),

    #[error("Failed to read model response body")]
    Body(#[source] reqwest::Error),

    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("response body is not valid JSON of the expected shape")]
    Json(#[from] serde_json::Error),

    #[error("response contained no content blocks")]
    EmptyContent,

    #[error("first content block (type '{kind}') has no text")]
    MissingText { kind: String },
}

#[derive(Debug, Error)]
pub enum InvocationError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("invocation cancelled")]
    Cancelled,
}

impl InvocationError {
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Decode(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[derive(Debug, Error)]
#[error("{error} (after {} bytes of streamed text)", .partial.len())]
pub struct StreamFailure {
    #[source]
    pub error: InvocationError,
    pub partial: String,
}

impl StreamFailure {
    pub fn new(error: impl Into<InvocationError>, partial: String) -> Self {
        Self {
            error: error.into(),
            partial,
        }
    }

    pub fn into_parts(self) -> (InvocationError, String) {
        (self.error, self.partial)
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use super::{DecodeError, InvocationError, StreamFailure, TransportError};

    #[test]
    fn invocation_error_keeps_transport_cause() {
        let err = InvocationError::from(TransportError::Throttled {
            message: "Too many requests".to_string(),
        });
        assert!(err.is_transport());
        let source = err.source().expect("cause should be attached");
        assert!(source.to_string().contains("Too many requests"));
    }

    #[test]
    fn decode_error_wraps_json_failures() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").expect_err("invalid json");
        let err = InvocationError::from(DecodeError::from(json_err));
        assert!(err.is_decode());
        assert!(err.to_string().starts_with("decode error"));
    }

    #[test]
    fn stream_failure_reports_partial_length() {
        let failure = StreamFailure::new(InvocationError::Cancelled, "Once ".to_string());
        assert_eq!(
            failure.to_string(),
            "invocation cancelled (after 5 bytes of streamed text)"
        );
        let (error, partial) = failure.into_parts();
        assert!(error.is_cancelled());
        assert_eq!(partial, "Once ");
    }
}
