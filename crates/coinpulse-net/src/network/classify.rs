//! Failure classification.
//!
//! Maps raw transport/protocol errors into the closed [`Failure`] taxonomy.
//! Classification is total: every input yields exactly one failure, and the
//! functions here never panic. OS-level socket errors are classified by
//! their symbolic meaning, never the numeric errno.

use crate::error::Failure;

/// Classify an arbitrary error object.
///
/// Recognizes `reqwest::Error`, `std::io::Error`, and `serde_json::Error`;
/// an already-normalized [`Failure`] passes through unchanged. Anything
/// else becomes `Unknown` with the stringified error as its message.
pub fn classify(err: &(dyn std::error::Error + 'static)) -> Failure {
    if let Some(f) = err.downcast_ref::<Failure>() {
        return f.clone();
    }
    if let Some(e) = err.downcast_ref::<reqwest::Error>() {
        return classify_reqwest(e);
    }
    if let Some(e) = err.downcast_ref::<std::io::Error>() {
        return classify_io(e);
    }
    if let Some(e) = err.downcast_ref::<serde_json::Error>() {
        return Failure::data("Malformed response payload").with_details(e.to_string());
    }
    Failure::unknown(err.to_string())
}

/// Classify an HTTP client error.
pub fn classify_reqwest(err: &reqwest::Error) -> Failure {
    if err.is_timeout() {
        let phase = if err.is_connect() { "Connect" } else { "Request" };
        return Failure::timeout(format!("{} timed out", phase)).with_details(err.to_string());
    }
    if let Some(status) = err.status() {
        return classify_status(status.as_u16());
    }
    if err.is_connect() {
        return Failure::connection("Failed to establish connection")
            .with_details(err.to_string());
    }
    if err.is_decode() || err.is_body() {
        return Failure::data("Malformed response payload").with_details(err.to_string());
    }
    Failure::network("Network request failed").with_details(err.to_string())
}

/// Classify a socket-level error by its symbolic kind.
pub fn classify_io(err: &std::io::Error) -> Failure {
    use std::io::ErrorKind;

    match err.kind() {
        ErrorKind::TimedOut => {
            Failure::timeout("Socket operation timed out").with_details(err.to_string())
        }
        ErrorKind::ConnectionRefused
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::NotConnected
        | ErrorKind::AddrNotAvailable => {
            Failure::connection("Connection failed").with_details(err.to_string())
        }
        // Generic DNS and routing failures.
        _ => Failure::network("Network unavailable").with_details(err.to_string()),
    }
}

/// Classify an HTTP status code.
///
/// 408 is reported as a `Timeout`, not an `Api` failure; every other
/// non-success status maps to `Api` with the code carried through.
pub fn classify_status(code: u16) -> Failure {
    match code {
        400 => Failure::api("Bad request", 400),
        401 => Failure::api("Unauthorized: check API credentials", 401),
        403 => Failure::api("Access forbidden", 403),
        404 => Failure::api("Resource not found", 404),
        408 => Failure {
            code: Some(408),
            ..Failure::timeout("Request timeout reported by server")
        },
        429 => Failure::api("Rate limited by exchange API", 429),
        500 => Failure::api("Internal server error", 500),
        502 => Failure::api("Bad gateway", 502),
        503 => Failure::api("Service temporarily unavailable", 503),
        504 => Failure::api("Gateway timeout", 504),
        other => Failure::api(format!("Unexpected HTTP status {}", other), other),
    }
}

impl From<reqwest::Error> for Failure {
    fn from(err: reqwest::Error) -> Self {
        classify_reqwest(&err)
    }
}

impl From<std::io::Error> for Failure {
    fn from(err: std::io::Error) -> Self {
        classify_io(&err)
    }
}

impl From<serde_json::Error> for Failure {
    fn from(err: serde_json::Error) -> Self {
        Failure::data("Malformed response payload").with_details(err.to_string())
    }
}

/// Extract a circuit-breaker key (host) from a request URL.
pub fn host_key(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string())
}
