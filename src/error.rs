use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("invalid timestamp `{0}`: expected `<seconds>.<fraction>`")]
    InvalidTimestamp(String),
    #[error("message has no string `ts` field")]
    MissingTimestamp,
    #[error("slack api call `{method}` failed: {reason}")]
    Api { method: String, reason: String },
    #[error("archive {0} is locked by another run")]
    Locked(PathBuf),
    #[error("config file invalid or unreadable: {0}")]
    InvalidConfig(String),
    #[error("token cipher failure: {0}")]
    Token(String),
}
