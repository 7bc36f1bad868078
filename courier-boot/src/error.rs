//! Boot errors

use courier_core::Cause;
use thiserror::Error;

/// Result type for boot operations
pub type Result<T> = std::result::Result<T, BootError>;

/// Why a boot chain stopped
#[derive(Debug, Error)]
pub enum BootError {
    /// A job aborted the chain
    #[error("{message}")]
    Job {
        /// What the job was doing
        message: String,
        /// Underlying failure, if any
        #[source]
        source: Option<Cause>,
    },

    /// A job finished without proceeding or aborting
    #[error("boot job `{job}` ended without signalling")]
    Interrupted {
        /// Name of the silent job
        job: String,
    },
}

impl BootError {
    /// Job failure caused by `source`
    pub fn job(message: impl Into<String>, source: Cause) -> Self {
        BootError::Job {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Job failure with only a message
    pub fn message(message: impl Into<String>) -> Self {
        BootError::Job {
            message: message.into(),
            source: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::Error;
    use std::error::Error as _;
    use std::sync::Arc;

    #[test]
    fn test_job_error_keeps_source() {
        let err = BootError::job("init coordination client failure", Arc::new(Error::Closed));
        assert_eq!(err.to_string(), "init coordination client failure");
        assert_eq!(err.source().unwrap().to_string(), Error::Closed.to_string());
    }

    #[test]
    fn test_interrupted_display() {
        let err = BootError::Interrupted { job: "server".into() };
        assert_eq!(err.to_string(), "boot job `server` ended without signalling");
    }
}
