//! Error types and failure classification for the alertroute control plane

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for control-plane operations
pub type Result<T> = std::result::Result<T, Error>;

/// Closed set of failure kinds attached to classified errors.
///
/// The kind decides retry policy: transient kinds are eligible for backoff,
/// permanent kinds short-circuit the attempt loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    Dns,
    Tls,
    Refused,
    Http,
    Auth,
    Parse,
    Cancelled,
    Network,
    Unknown,
}

impl ErrorKind {
    /// Whether a retry of the failed operation is expected to succeed.
    pub fn is_transient(self) -> bool {
        match self {
            ErrorKind::Timeout
            | ErrorKind::Dns
            | ErrorKind::Refused
            | ErrorKind::Network
            | ErrorKind::Unknown => true,
            ErrorKind::Tls
            | ErrorKind::Auth
            | ErrorKind::Parse
            | ErrorKind::Cancelled
            | ErrorKind::Http => false,
        }
    }

    /// Stable label used in metric series and log fields.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::Dns => "dns",
            ErrorKind::Tls => "tls",
            ErrorKind::Refused => "refused",
            ErrorKind::Http => "http",
            ErrorKind::Auth => "auth",
            ErrorKind::Parse => "parse",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Network => "network",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for control-plane operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("discovery failed: {0}")]
    Discovery(String),

    #[error("invalid descriptor format: {0}")]
    InvalidFormat(String),

    #[error("descriptor validation failed: {0}")]
    Validation(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0} already started")]
    AlreadyStarted(&'static str),

    #[error("{0} not started")]
    NotStarted(&'static str),

    #[error("{component} did not stop within {timeout:?}")]
    ShutdownTimeout {
        component: &'static str,
        timeout: Duration,
    },

    #[error("rate limit exceeded, retry allowed in {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("refresh already in progress")]
    RefreshInProgress,

    #[error("missing dependency: {0}")]
    MissingDependency(&'static str),

    #[error("http status {status}: {message}")]
    Http { status: u16, message: String },

    #[error("probe failed ({kind}): {message}")]
    Probe { kind: ErrorKind, message: String },

    #[error("{op} failed after {attempts} attempt(s) in {elapsed:?}: {message}")]
    RetryExhausted {
        op: &'static str,
        attempts: u32,
        elapsed: Duration,
        kind: ErrorKind,
        message: String,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Error category used in log fields and coarse metrics.
    pub fn category(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::Store(_) => "store",
            Error::Discovery(_) => "discovery",
            Error::InvalidFormat(_) => "invalid_format",
            Error::Validation(_) => "validation",
            Error::Timeout(_) => "timeout",
            Error::Cancelled(_) => "cancelled",
            Error::NotFound(_) => "not_found",
            Error::AlreadyStarted(_) => "already_started",
            Error::NotStarted(_) => "not_started",
            Error::ShutdownTimeout { .. } => "shutdown_timeout",
            Error::RateLimited { .. } => "rate_limit_exceeded",
            Error::RefreshInProgress => "refresh_in_progress",
            Error::MissingDependency(_) => "nil_dependency",
            Error::Http { .. } => "http",
            Error::Probe { .. } => "probe",
            Error::RetryExhausted { .. } => "retry_exhausted",
            Error::Serialization(_) => "parse",
        }
    }
}

/// Outcome of classifying an error against the failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub kind: ErrorKind,
    pub transient: bool,
}

impl Classification {
    fn of(kind: ErrorKind) -> Self {
        Classification {
            kind,
            transient: kind.is_transient(),
        }
    }

    fn permanent(kind: ErrorKind) -> Self {
        Classification {
            kind,
            transient: false,
        }
    }

    fn transient(kind: ErrorKind) -> Self {
        Classification {
            kind,
            transient: true,
        }
    }
}

/// Map an arbitrary control-plane error to the closed failure taxonomy.
///
/// Rules are checked in a fixed order; the first match wins. Anything that
/// fails every rule is `unknown/transient` so the retry loop gets a chance
/// rather than the error being silently dropped.
pub fn classify(err: &Error) -> Classification {
    match err {
        Error::Timeout(_) => Classification::of(ErrorKind::Timeout),
        Error::Cancelled(_) => Classification::permanent(ErrorKind::Cancelled),
        Error::InvalidFormat(_) | Error::Validation(_) | Error::Serialization(_) => {
            Classification::permanent(ErrorKind::Parse)
        }
        Error::Config(_) | Error::MissingDependency(_) => {
            Classification::permanent(ErrorKind::Unknown)
        }
        Error::Http { status, message } => classify_http(*status, message),
        Error::Probe { kind, .. } => Classification::of(*kind),
        Error::RetryExhausted { kind, .. } => Classification::of(*kind),
        Error::Store(message) | Error::Discovery(message) => classify_message(message),
        _ => classify_message(&err.to_string()),
    }
}

/// Classify an HTTP status, consulting the message for auth keywords.
pub fn classify_http(status: u16, message: &str) -> Classification {
    if status == 401 || status == 403 {
        return Classification::permanent(ErrorKind::Auth);
    }
    if status == 503 {
        return Classification::transient(ErrorKind::Http);
    }
    if status >= 500 {
        // Other 5xx responses are treated as the server meaning it: the
        // request reached the service and it answered.
        return Classification::permanent(ErrorKind::Http);
    }
    if status >= 400 {
        let lower = message.to_ascii_lowercase();
        if lower.contains("unauthorized") || lower.contains("forbidden") {
            return Classification::permanent(ErrorKind::Auth);
        }
        return Classification::permanent(ErrorKind::Http);
    }
    Classification::permanent(ErrorKind::Http)
}

/// Keyword-table classification for opaque error strings.
///
/// The order mirrors the taxonomy precedence: deadline, cancellation, DNS,
/// TLS, refused, auth, parse, then service availability.
pub fn classify_message(message: &str) -> Classification {
    let lower = message.to_ascii_lowercase();

    if lower.contains("deadline exceeded")
        || lower.contains("timed out")
        || lower.contains("timeout")
    {
        return Classification::transient(ErrorKind::Timeout);
    }
    if lower.contains("cancelled") || lower.contains("canceled") {
        return Classification::permanent(ErrorKind::Cancelled);
    }
    if lower.contains("no such host")
        || lower.contains("name resolution")
        || lower.contains("dns error")
        || lower.contains("failed to lookup")
    {
        return Classification::transient(ErrorKind::Dns);
    }
    if lower.contains("certificate")
        || lower.contains("tls")
        || lower.contains("x509")
        || lower.contains("ssl")
    {
        return Classification::permanent(ErrorKind::Tls);
    }
    if lower.contains("connection refused") {
        return Classification::transient(ErrorKind::Refused);
    }
    if lower.contains("401")
        || lower.contains("403")
        || lower.contains("unauthorized")
        || lower.contains("forbidden")
    {
        return Classification::permanent(ErrorKind::Auth);
    }
    if lower.contains("invalid json")
        || lower.contains("illegal base64")
        || lower.contains("invalid base64")
        || lower.contains("expected value")
        || lower.contains("unmarshal")
        || lower.contains("decode")
    {
        return Classification::permanent(ErrorKind::Parse);
    }
    if lower.contains("service unavailable") || lower.contains("503") {
        return Classification::transient(ErrorKind::Http);
    }
    if lower.contains("500")
        || lower.contains("502")
        || lower.contains("bad gateway")
        || lower.contains("internal server error")
    {
        return Classification::permanent(ErrorKind::Http);
    }
    if lower.contains("connection reset")
        || lower.contains("broken pipe")
        || lower.contains("network")
        || lower.contains("unreachable")
    {
        return Classification::transient(ErrorKind::Network);
    }

    Classification::transient(ErrorKind::Unknown)
}

/// Classify a raw TCP connect failure observed before any HTTP exchange.
///
/// Handshake-looking failures at this stage cannot be separated from plain
/// network flakiness, so they stay retryable instead of mapping to
/// `tls/permanent` the way client-reported TLS failures do.
pub fn classify_connect(err: &std::io::Error) -> Classification {
    use std::io::ErrorKind as IoKind;

    match err.kind() {
        IoKind::TimedOut => Classification::transient(ErrorKind::Timeout),
        IoKind::ConnectionRefused => Classification::transient(ErrorKind::Refused),
        IoKind::ConnectionReset | IoKind::ConnectionAborted | IoKind::BrokenPipe => {
            Classification::transient(ErrorKind::Network)
        }
        _ => {
            let fallback = classify_message(&err.to_string());
            if fallback.kind == ErrorKind::Tls {
                Classification::transient(ErrorKind::Network)
            } else {
                fallback
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_kinds() {
        assert!(ErrorKind::Timeout.is_transient());
        assert!(ErrorKind::Dns.is_transient());
        assert!(ErrorKind::Refused.is_transient());
        assert!(ErrorKind::Network.is_transient());
        assert!(ErrorKind::Unknown.is_transient());

        assert!(!ErrorKind::Tls.is_transient());
        assert!(!ErrorKind::Auth.is_transient());
        assert!(!ErrorKind::Parse.is_transient());
        assert!(!ErrorKind::Cancelled.is_transient());
        assert!(!ErrorKind::Http.is_transient());
    }

    #[test]
    fn classify_timeout_before_anything_else() {
        let c = classify(&Error::Store("request timed out after 30s".into()));
        assert_eq!(c.kind, ErrorKind::Timeout);
        assert!(c.transient);
    }

    #[test]
    fn classify_cancellation_is_permanent() {
        let c = classify(&Error::Cancelled("refresh cancelled".into()));
        assert_eq!(c.kind, ErrorKind::Cancelled);
        assert!(!c.transient);
    }

    #[test]
    fn classify_dns_failures() {
        let c = classify_message("dial tcp: no such host example.internal");
        assert_eq!(c.kind, ErrorKind::Dns);
        assert!(c.transient);
    }

    #[test]
    fn classify_tls_keywords_permanent() {
        let c = classify_message("x509: certificate signed by unknown authority");
        assert_eq!(c.kind, ErrorKind::Tls);
        assert!(!c.transient);
    }

    #[test]
    fn classify_refused() {
        let c = classify_message("connect: connection refused");
        assert_eq!(c.kind, ErrorKind::Refused);
        assert!(c.transient);
    }

    #[test]
    fn classify_auth_from_status() {
        let c = classify(&Error::Http {
            status: 401,
            message: "unauthorized".into(),
        });
        assert_eq!(c.kind, ErrorKind::Auth);
        assert!(!c.transient);

        let c = classify_message("server said: 403 Forbidden");
        assert_eq!(c.kind, ErrorKind::Auth);
    }

    #[test]
    fn classify_parse_keywords() {
        for msg in [
            "invalid json document",
            "illegal base64 data at input byte 4",
            "failed to decode payload",
        ] {
            let c = classify_message(msg);
            assert_eq!(c.kind, ErrorKind::Parse, "message: {msg}");
            assert!(!c.transient);
        }
    }

    #[test]
    fn classify_http_5xx() {
        let unavailable = classify_http(503, "service unavailable");
        assert_eq!(unavailable.kind, ErrorKind::Http);
        assert!(unavailable.transient);

        let internal = classify_http(500, "internal server error");
        assert_eq!(internal.kind, ErrorKind::Http);
        assert!(!internal.transient);
    }

    #[test]
    fn classify_unknown_defaults_to_transient() {
        let c = classify_message("entirely novel failure mode");
        assert_eq!(c.kind, ErrorKind::Unknown);
        assert!(c.transient);
    }

    #[test]
    fn connect_errors_never_map_to_permanent_tls() {
        let err = std::io::Error::new(
            std::io::ErrorKind::Other,
            "tls handshake eof during connect",
        );
        let c = classify_connect(&err);
        assert_eq!(c.kind, ErrorKind::Network);
        assert!(c.transient);
    }

    #[test]
    fn categories_are_stable() {
        assert_eq!(
            Error::RateLimited {
                retry_after: Duration::from_secs(1)
            }
            .category(),
            "rate_limit_exceeded"
        );
        assert_eq!(Error::RefreshInProgress.category(), "refresh_in_progress");
        assert_eq!(
            Error::MissingDependency("store").category(),
            "nil_dependency"
        );
        assert_eq!(
            Error::ShutdownTimeout {
                component: "refresh",
                timeout: Duration::from_secs(5)
            }
            .category(),
            "shutdown_timeout"
        );
    }
}
