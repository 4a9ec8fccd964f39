use thiserror::Error;

pub const SUCCESS: i32 = 0;
pub const ERR_OUT_OF_MEMORY: i32 = -2;
pub const ERR_SYSCALL_FAILED: i32 = -3;
pub const ERR_ENGINE_CALL_FAILED: i32 = -4;
pub const ERR_NO_ENCODER: i32 = -5;
pub const ERR_NO_PATTERN: i32 = -6;
pub const ERR_NO_FILE: i32 = -7;

/// Call failures. Reported failures (no match, a pattern that does not
/// compile, a package that does not load) are results, not errors, and so
/// are `ERR_NO_ENCODER` and `ERR_NO_PATTERN`, which travel as status codes
/// inside those results.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RosieError {
    #[error("out of memory")]
    OutOfMemory,
    #[error("internal encoding failed")]
    SyscallFailed,
    /// Carries a short fixed description; runtime detail goes to the log
    #[error("engine call failed: {0}")]
    EngineCallFailed(String),
    #[error("rosie installation not found: {0}")]
    NoInstallation(String),
}

impl RosieError {
    pub(crate) fn call_failed(msg: impl Into<String>) -> Self {
        RosieError::EngineCallFailed(msg.into())
    }

    /// The stable status code for this error.
    pub fn code(&self) -> i32 {
        match self {
            RosieError::OutOfMemory => ERR_OUT_OF_MEMORY,
            RosieError::SyscallFailed => ERR_SYSCALL_FAILED,
            RosieError::EngineCallFailed(_) => ERR_ENGINE_CALL_FAILED,
            RosieError::NoInstallation(_) => ERR_NO_FILE,
        }
    }
}

pub type Result<T> = std::result::Result<T, RosieError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_distinct_and_negative() {
        let all = [
            RosieError::OutOfMemory,
            RosieError::SyscallFailed,
            RosieError::call_failed("x"),
            RosieError::NoInstallation("/nowhere".into()),
        ];
        let mut codes: Vec<i32> = all.iter().map(RosieError::code).collect();
        // the two result-only statuses as well
        codes.extend([ERR_NO_ENCODER, ERR_NO_PATTERN]);
        assert!(codes.iter().all(|c| *c < SUCCESS));
        let total = codes.len();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), total);
    }
}
