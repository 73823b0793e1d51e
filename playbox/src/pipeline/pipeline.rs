//! Sequential stage executor.
//!
//! Stages run strictly in order against one filesystem that is moved into
//! each stage's bindings and back out again. The first stage that does not
//! exit with code 0 ends the run; later stages are never started.

use super::metrics::{PipelineMetrics, StageMetrics};
use super::outcome::ExecutionOutcome;
use super::stage::PipelineStage;
use crate::sandbox::{Sandbox, StageExecution, TerminationSignal};
use crate::sink::SharedSink;
use crate::syscall::SyscallBindings;
use crate::vfs::VirtualFs;
use playbox_shared::errors::{PlayboxError, PlayboxResult};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;
use ulid::Ulid;

/// Identifier attached to every log line of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RunId(Ulid);

impl RunId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    name: String,
    stages: Vec<PipelineStage>,
}

impl Pipeline {
    pub fn new(name: impl Into<String>, stages: Vec<PipelineStage>) -> Self {
        Self {
            name: name.into(),
            stages,
        }
    }
}

/// Everything a finished run hands back.
#[derive(Debug)]
pub struct PipelineReport {
    pub run_id: RunId,
    pub outcome: ExecutionOutcome,
    pub metrics: PipelineMetrics,
    /// The run filesystem, for reading artifacts.
    pub fs: VirtualFs,
}

/// Writes the blank separator line when a stage ends, however it ends.
struct TranscriptGuard<'a> {
    sink: &'a SharedSink,
}

impl Drop for TranscriptGuard<'_> {
    fn drop(&mut self) {
        self.sink.writeln("");
    }
}

pub struct PipelineExecutor {
    sandbox: Arc<Sandbox>,
    sink: SharedSink,
}

impl PipelineExecutor {
    pub fn new(sandbox: Arc<Sandbox>, sink: SharedSink) -> Self {
        Self { sandbox, sink }
    }

    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    pub fn sink(&self) -> &SharedSink {
        &self.sink
    }

    /// Execute a pipeline against `fs`.
    ///
    /// Stage failures are reported through [`ExecutionOutcome`]. Only host
    /// faults come back as `Err`; the filesystem is lost in that case.
    pub async fn execute(&self, pipeline: Pipeline, fs: VirtualFs) -> PlayboxResult<PipelineReport> {
        let run_id = RunId::new();
        let span = tracing::info_span!("pipeline", run_id = %run_id, pipeline = %pipeline.name);

        async move {
            let total_start = Instant::now();
            let mut fs = fs;
            let mut stage_metrics = Vec::new();
            let mut outcome = ExecutionOutcome::Success;

            for (index, stage) in pipeline.stages.into_iter().enumerate() {
                let stage_start = Instant::now();
                let (result, returned) = self.run_stage(&stage, fs).await;
                fs = returned;
                let execution = result?;

                let duration_ms = stage_start.elapsed().as_millis();
                tracing::info!(
                    stage = %stage.name,
                    index,
                    duration_ms = duration_ms as u64,
                    signal = %execution.signal,
                    "Stage finished"
                );
                stage_metrics.push(StageMetrics {
                    index,
                    name: stage.name.clone(),
                    duration_ms,
                    signal: execution.signal.clone(),
                });

                if !execution.signal.is_success() {
                    outcome = ExecutionOutcome::Failure {
                        stage_index: index,
                        stage_name: stage.name,
                        signal: execution.signal,
                    };
                    break;
                }
            }

            Ok(PipelineReport {
                run_id,
                outcome,
                metrics: PipelineMetrics {
                    total_duration_ms: total_start.elapsed().as_millis(),
                    stages: stage_metrics,
                },
                fs,
            })
        }
        .instrument(span)
        .await
    }

    async fn run_stage(
        &self,
        stage: &PipelineStage,
        fs: VirtualFs,
    ) -> (PlayboxResult<StageExecution>, VirtualFs) {
        let _separator = TranscriptGuard { sink: &self.sink };
        self.sink.writeln(&stage.command_line());
        tokio::task::yield_now().await;

        let env = stage
            .env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let bindings = SyscallBindings::new(
            fs,
            self.sink.clone(),
            stage.args.clone(),
            env,
            &stage.preopens,
        );

        tracing::debug!(stage = %stage.name, module = ?stage.module, "Starting stage");
        let (result, bindings) = self.sandbox.start(&stage.module, bindings).await;
        let fs = bindings.into_fs();

        match &result {
            Ok(execution) => self.report(stage, execution),
            Err(e) => {
                let detail = match e {
                    PlayboxError::HostFault(msg) => msg.clone(),
                    other => other.to_string(),
                };
                self.sink.writeln(&format!("host error: {}", detail));
                tracing::error!(stage = %stage.name, error = %e, "Stage failed in the host");
            }
        }
        (result, fs)
    }

    fn report(&self, stage: &PipelineStage, execution: &StageExecution) {
        match &execution.signal {
            TerminationSignal::Exited(0) => {}
            TerminationSignal::Exited(code) => {
                let trace = execution.trace.as_deref().unwrap_or_default();
                self.sink.writeln(&format!("\n\n{}", trace));
                self.sink.writeln(&format!("exit code: {}", code));
            }
            signal => {
                self.sink.writeln(&format!(
                    "fatal: {} terminated abnormally ({})",
                    stage.name, signal
                ));
            }
        }
    }
}
