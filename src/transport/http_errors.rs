use reqwest::StatusCode;
use serde::Deserialize;
use std::error::Error as StdError;
use std::io::ErrorKind;

use crate::error::TransportError;

fn error_chain_has_connection_refused(err: &(dyn StdError + 'static)) -> bool {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(source) = current {
        if let Some(io_err) = source.downcast_ref::<std::io::Error>()
            && io_err.kind() == ErrorKind::ConnectionRefused
        {
            return true;
        }

        if source
            .to_string()
            .to_ascii_lowercase()
            .contains("connection refused")
        {
            return true;
        }

        current = source.source();
    }

    false
}

fn error_chain_has_timeout(err: &(dyn StdError + 'static)) -> bool {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(source) = current {
        if let Some(io_err) = source.downcast_ref::<std::io::Error>()
            && io_err.kind() == ErrorKind::TimedOut
        {
            return true;
        }

        if source
            .to_string()
            .to_ascii_lowercase()
            .contains("timed out")
        {
            return true;
        }

        current = source.source();
    }

    false
}

pub(crate) fn request_error(err: reqwest::Error, url: &str, timeout_secs: u64) -> TransportError {
    let url = url.to_string();

    if err.is_timeout() || error_chain_has_timeout(&err) {
        return TransportError::Timeout {
            url,
            timeout_secs,
            source: err,
        };
    }

    if err.is_connect() {
        if error_chain_has_connection_refused(&err) {
            return TransportError::ConnectionRefused { url, source: err };
        }
        return TransportError::Connect { url, source: err };
    }

    TransportError::Request { url, source: err }
}

pub(crate) fn body_error(err: reqwest::Error, url: &str, timeout_secs: u64) -> TransportError {
    if err.is_timeout() || error_chain_has_timeout(&err) {
        return TransportError::Timeout {
            url: url.to_string(),
            timeout_secs,
            source: err,
        };
    }

    TransportError::Body(err)
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(alias = "Message")]
    message: String,
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .map(|parsed| parsed.message)
        .unwrap_or_else(|_| body.trim().to_string())
}

pub(crate) fn status_error(status: StatusCode, body: &str) -> TransportError {
    let message = error_message(body);
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => TransportError::Unauthorized {
            status: status.as_u16(),
            message,
        },
        StatusCode::TOO_MANY_REQUESTS => TransportError::Throttled { message },
        _ => TransportError::Status {
            status: status.as_u16(),
            message,
        },
    }
}
