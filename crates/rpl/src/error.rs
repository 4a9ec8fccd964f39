use thiserror::Error;

/// Misuse of the rpl API. Problems in RPL source are reported as
/// [`Violation`](crate::Violation) records instead.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RplError {
    #[error("unknown trace style '{0}'")]
    UnknownTraceStyle(String),
}

pub type Result<T> = std::result::Result<T, RplError>;
