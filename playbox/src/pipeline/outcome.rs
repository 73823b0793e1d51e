//! Final pipeline result.

use crate::sandbox::TerminationSignal;
use playbox_shared::errors::{PlayboxError, PlayboxResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Success,
    Failure {
        stage_index: usize,
        stage_name: String,
        signal: TerminationSignal,
    },
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success)
    }

    /// Exit code of the failing stage, if it exited normally.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ExecutionOutcome::Success => Some(0),
            ExecutionOutcome::Failure { signal, .. } => signal.exit_code(),
        }
    }

    /// Convert a failure into the matching [`PlayboxError`].
    pub fn into_result(self) -> PlayboxResult<()> {
        match self {
            ExecutionOutcome::Success => Ok(()),
            ExecutionOutcome::Failure {
                stage_index,
                signal: TerminationSignal::Exited(code),
                ..
            } => Err(PlayboxError::StageExit { stage_index, code }),
            ExecutionOutcome::Failure {
                stage_index,
                signal,
                ..
            } => Err(PlayboxError::AbnormalTermination {
                stage_index,
                kind: signal.kind(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_result() {
        assert!(ExecutionOutcome::Success.into_result().is_ok());

        let exit = ExecutionOutcome::Failure {
            stage_index: 0,
            stage_name: "compile".into(),
            signal: TerminationSignal::Exited(1),
        };
        assert_eq!(exit.exit_code(), Some(1));
        assert!(matches!(
            exit.into_result(),
            Err(PlayboxError::StageExit {
                stage_index: 0,
                code: 1
            })
        ));

        let killed = ExecutionOutcome::Failure {
            stage_index: 2,
            stage_name: "run".into(),
            signal: TerminationSignal::Killed(6),
        };
        assert_eq!(killed.exit_code(), None);
        assert!(matches!(
            killed.into_result(),
            Err(PlayboxError::AbnormalTermination { stage_index: 2, .. })
        ));
    }
}
