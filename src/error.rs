//! Tagged error kinds and caller-facing diagnostics.
//!
//! Every fallible operation in this crate returns [`Error`], a closed,
//! matchable type carrying a stable, screaming-snake-case [`Error::code`]
//! (the contract for programmatic handling) and a human-readable message
//! (which may change between releases). Structured details such as line
//! numbers, limits, and paths are attached to the variant that produced
//! them rather than squashed into the message string.

use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

/// The kind of failure, matching the taxonomy in the error model.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A caller-supplied option or hook/plugin registration was malformed.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// A structural parse failure. Currently only raised for unterminated
    /// quoted fields; all other shape differences are tolerated per the
    /// fast-path engine's edge-case policies.
    #[error("parse error at line {line_number}: {message}")]
    Parsing { message: String, line_number: u64 },

    /// A value that would be unsafe to round-trip through a spreadsheet
    /// application, or another content-safety concern.
    #[error("security error: {message}")]
    Security { message: String },

    /// Surfaced by host adapters that layer file I/O on top of this crate;
    /// the core itself never opens files, but streaming sources may wrap
    /// `std::io::Error` using this variant.
    #[error("file system error: {message}")]
    FileSystem {
        message: String,
        #[source]
        source: std::io::Error,
    },

    /// `maxRows` or `maxRecords` was exceeded.
    #[error("limit exceeded: {kind} limit of {limit} rows")]
    Limit { kind: LimitKind, limit: usize },

    /// A misconfigured pipeline: e.g. a plugin id collision, a
    /// `next()` called twice in a middleware, or an invalid delimiter.
    #[error("configuration error: {message}")]
    Configuration { message: String },
}

/// Which limit was exceeded (see `ConversionOptions::max_rows` /
/// `max_records`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitKind {
    MaxRows,
    MaxRecords,
}

impl fmt::Display for LimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitKind::MaxRows => write!(f, "maxRows"),
            LimitKind::MaxRecords => write!(f, "maxRecords"),
        }
    }
}

impl Error {
    /// Stable, screaming-snake-case identifier for programmatic handling.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation { .. } => "VALIDATION_ERROR",
            Error::Parsing { line_number, .. } => {
                let _ = line_number;
                "PARSE_ERROR"
            }
            Error::Security { .. } => "SECURITY_ERROR",
            Error::FileSystem { .. } => "FILE_SYSTEM_ERROR",
            Error::Limit { .. } => "LIMIT_EXCEEDED",
            Error::Configuration { .. } => "CONFIGURATION_ERROR",
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Error::Configuration {
            message: message.into(),
        }
    }

    pub fn unclosed_quotes(line_number: u64) -> Self {
        Error::Parsing {
            message: "unclosed quoted field".to_string(),
            line_number,
        }
    }

    pub fn limit(kind: LimitKind, limit: usize) -> Self {
        Error::Limit { kind, limit }
    }
}
