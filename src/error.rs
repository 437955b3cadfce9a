use std::path::PathBuf;

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum CladeTimeError {
    #[error("invalid date: {0}")]
    #[diagnostic(help("dates are YYYY-MM-DD or RFC 3339 timestamps on or after the minimum sequence date"))]
    InvalidDate(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("no version of {key} found before {as_of}")]
    VersionNotFound { key: String, as_of: DateTime<Utc> },

    #[error("request to {url} failed with status {status}: {message}")]
    TransportFailure {
        url: String,
        status: u16,
        message: String,
    },

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("{tool} failed: {message}")]
    ToolInvocation { tool: String, message: String },

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("data integrity violation: {0}")]
    DataIntegrity(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("failed to parse {what}: {message}")]
    Parse { what: String, message: String },

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl CladeTimeError {
    pub(crate) fn parse(what: &str, err: impl std::fmt::Display) -> Self {
        CladeTimeError::Parse {
            what: what.to_string(),
            message: err.to_string(),
        }
    }
}
