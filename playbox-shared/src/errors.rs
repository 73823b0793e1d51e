//! Error taxonomy for playbox.
//!
//! Variants map one-to-one onto the places a run can fail:
//! - snapshot build / load (`BuildIo`, `CorruptSnapshot`)
//! - a stage terminating badly (`StageExit`, `AbnormalTermination`)
//! - the execution engine itself (`HostFault`)

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum PlayboxError {
    /// A snapshot source could not be read. Fatal to the build.
    #[error("failed to read snapshot source {}: {source}", path.display())]
    BuildIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The snapshot index points outside the blob or is malformed.
    #[error("corrupt snapshot: {0}")]
    CorruptSnapshot(String),

    /// A stage exited with a nonzero status; later stages were not run.
    #[error("stage {stage_index} exited with code {code}")]
    StageExit { stage_index: usize, code: i32 },

    /// A stage was killed or faulted; there is no exit code.
    #[error("stage {stage_index} terminated abnormally: {kind}")]
    AbnormalTermination { stage_index: usize, kind: String },

    /// The engine failed outside of the module's control (bad module bytes,
    /// unsupported import, resource exhaustion).
    #[error("host fault: {0}")]
    HostFault(String),

    #[error("filesystem error: {0}")]
    Vfs(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type PlayboxResult<T> = Result<T, PlayboxError>;

impl PlayboxError {
    /// Exit status a CLI should report for this error.
    pub fn exit_status(&self) -> i32 {
        match self {
            PlayboxError::StageExit { code, .. } => *code,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_exit_status_is_forwarded() {
        let err = PlayboxError::StageExit {
            stage_index: 0,
            code: 3,
        };
        assert_eq!(err.exit_status(), 3);
        assert_eq!(err.to_string(), "stage 0 exited with code 3");
    }

    #[test]
    fn test_other_errors_exit_with_one() {
        let err = PlayboxError::AbnormalTermination {
            stage_index: 2,
            kind: "killed".into(),
        };
        assert_eq!(err.exit_status(), 1);
        assert_eq!(PlayboxError::HostFault("boom".into()).exit_status(), 1);
    }

    #[test]
    fn test_build_io_mentions_path() {
        let err = PlayboxError::BuildIo {
            path: PathBuf::from("/missing"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        };
        assert!(err.to_string().contains("/missing"));
    }
}
