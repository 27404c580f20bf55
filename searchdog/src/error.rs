//! Crate-wide error taxonomy (spec.md §7 "Error taxonomy"). Every module
//! owns a local `thiserror::Error` enum; this `ErrorKind` classifies any of
//! them for HTTP status mapping (coordination REST surface) and gRPC status
//! mapping (internal services), centralizing them into one place callers
//! can match on instead of threading each module's error type through.

use tonic::Code;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    WrongShard,
    Unavailable,
    Partial,
    ResourceExhausted,
    Internal,
}

impl ErrorKind {
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::Validation => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::WrongShard => 503,
            ErrorKind::Unavailable => 503,
            ErrorKind::Partial => 200,
            ErrorKind::ResourceExhausted => 429,
            ErrorKind::Internal => 500,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::WrongShard => "wrong_shard",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::Partial => "partial",
            ErrorKind::ResourceExhausted => "resource_exhausted",
            ErrorKind::Internal => "internal",
        }
    }

    pub fn grpc_code(&self) -> Code {
        match self {
            ErrorKind::Validation => Code::InvalidArgument,
            ErrorKind::NotFound => Code::NotFound,
            ErrorKind::Conflict => Code::AlreadyExists,
            ErrorKind::WrongShard => Code::FailedPrecondition,
            ErrorKind::Unavailable => Code::Unavailable,
            ErrorKind::Partial => Code::Ok,
            ErrorKind::ResourceExhausted => Code::ResourceExhausted,
            ErrorKind::Internal => Code::Internal,
        }
    }

    /// Whether a caller may retry without changing the request
    /// (spec.md §7: Conflict/WrongShard/Unavailable/ResourceExhausted are
    /// retryable, Validation/NotFound/Internal are not).
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Conflict
                | ErrorKind::WrongShard
                | ErrorKind::Unavailable
                | ErrorKind::ResourceExhausted
        )
    }
}

/// A structured error body (spec.md §7 "User-visible behaviour"): never
/// contains internal identifiers that could leak tenant data.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ErrorBody {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caused_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl ErrorBody {
    pub fn new(kind: ErrorKind, reason: impl Into<String>) -> Self {
        Self {
            kind: kind.reason(),
            reason: reason.into(),
            caused_by: None,
            path: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}
