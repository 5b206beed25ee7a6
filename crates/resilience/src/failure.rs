use extract::Validation;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why an attempt did not yield a usable result. Exactly one per failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    EmptyResponse,
    MalformedJson,
    ConnectionError,
    Timeout,
    RateLimit,
    ContextOverflow,
    ServerError,
    ModelOverload,
    InvalidFormat,
}

impl FailureKind {
    pub const ALL: [FailureKind; 9] = [
        FailureKind::EmptyResponse,
        FailureKind::MalformedJson,
        FailureKind::ConnectionError,
        FailureKind::Timeout,
        FailureKind::RateLimit,
        FailureKind::ContextOverflow,
        FailureKind::ServerError,
        FailureKind::ModelOverload,
        FailureKind::InvalidFormat,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::EmptyResponse => "empty_response",
            FailureKind::MalformedJson => "malformed_json",
            FailureKind::ConnectionError => "connection_error",
            FailureKind::Timeout => "timeout",
            FailureKind::RateLimit => "rate_limit",
            FailureKind::ContextOverflow => "context_overflow",
            FailureKind::ServerError => "server_error",
            FailureKind::ModelOverload => "model_overload",
            FailureKind::InvalidFormat => "invalid_format",
        }
    }

    /// Failures a plain retry of the same request can plausibly fix
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FailureKind::ConnectionError
                | FailureKind::Timeout
                | FailureKind::RateLimit
                | FailureKind::ServerError
                | FailureKind::ModelOverload
        )
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Checked in order; the first table with a matching phrase wins.
const CLASSIFICATION: &[(FailureKind, &[&str])] = &[
    (
        FailureKind::ConnectionError,
        &["connection", "connect", "network", "refused", "unreachable", "dns", "broken pipe"],
    ),
    (FailureKind::Timeout, &["timeout", "timed out", "deadline"]),
    (FailureKind::RateLimit, &["rate limit", "ratelimit", "429", "too many requests", "quota"]),
    (
        FailureKind::ContextOverflow,
        &["context", "token", "too long", "overflow", "maximum length"],
    ),
    (
        FailureKind::ServerError,
        &[
            "500",
            "502",
            "503",
            "504",
            "server error",
            "internal error",
            "bad gateway",
            "service unavailable",
        ],
    ),
    (
        FailureKind::ModelOverload,
        &["memory", "oom", "gpu", "cuda", "overloaded", "capacity"],
    ),
    (FailureKind::InvalidFormat, &["invalid format", "unsupported format", "schema"]),
];

/// Classify an error message by substring inspection.
pub fn classify_message(message: &str) -> FailureKind {
    let lower = message.to_lowercase();
    CLASSIFICATION
        .iter()
        .find(|(_, phrases)| phrases.iter().any(|p| lower.contains(p)))
        .map(|(kind, _)| *kind)
        .unwrap_or(FailureKind::ServerError)
}

/// Classify a raised error, looking through its whole cause chain.
pub fn classify_error(error: &anyhow::Error) -> FailureKind {
    classify_message(&format!("{:#}", error))
}

/// Classify a response that came back without an error. `None` means the
/// response is usable.
pub fn classify_response(recovered: bool, validation: &Validation) -> Option<FailureKind> {
    if !recovered || !validation.valid {
        Some(FailureKind::MalformedJson)
    } else if validation.empty {
        Some(FailureKind::EmptyResponse)
    } else {
        None
    }
}
