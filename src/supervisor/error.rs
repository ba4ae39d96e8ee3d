//! Supervisor error types. Expected conditions (no process, fatal console
//! output, early exit) are reported through these values, never by panicking.

/// Why a `start` (or the start half of a `restart`) did not reach Running.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StartError {
    #[error("failed to spawn '{program}': {reason}")]
    Spawn { program: String, reason: String },

    #[error("server reported a fatal error: {0}")]
    Fatal(String),

    #[error("server exited before it was ready (exit code {0:?})")]
    ExitedEarly(Option<i32>),

    #[error("supervisor is no longer running")]
    SupervisorGone,
}

/// Why a console command could not be queued.
#[derive(thiserror::Error, Debug)]
pub enum CommandError {
    #[error("no server process is attached")]
    NotAttached,

    #[error("server stdin is closed")]
    Closed,

    #[error("failed to encode command payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("supervisor is no longer running")]
    SupervisorGone,
}

impl StartError {
    /// Machine readable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Spawn { .. } => "SPAWN_FAILED",
            Self::Fatal(_) => "FATAL_OUTPUT",
            Self::ExitedEarly(_) => "EXITED_EARLY",
            Self::SupervisorGone => "SUPERVISOR_GONE",
        }
    }
}

impl CommandError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotAttached => "NOT_ATTACHED",
            Self::Closed => "STDIN_CLOSED",
            Self::Encode(_) => "ENCODE_FAILED",
            Self::SupervisorGone => "SUPERVISOR_GONE",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_and_codes() {
        let err = StartError::Spawn {
            program: "java".into(),
            reason: "No such file or directory".into(),
        };
        assert_eq!(err.to_string(), "failed to spawn 'java': No such file or directory");
        assert_eq!(err.error_code(), "SPAWN_FAILED");
        assert_eq!(StartError::ExitedEarly(Some(1)).error_code(), "EXITED_EARLY");
        assert_eq!(CommandError::NotAttached.error_code(), "NOT_ATTACHED");
    }
}
