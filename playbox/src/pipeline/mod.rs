//! Multi-stage execution pipeline.
//!
//! ```text
//! Pipeline → PipelineStage* → Sandbox::start → TerminationSignal
//!
//! - Pipeline: named, ordered stages run against one filesystem
//! - PipelineStage: module + argv + env + preopens
//! - PipelineExecutor: runs stages, writes the transcript, stops on failure
//! ```
//!
//! ## Example
//!
//! ```ignore
//! let executor = PipelineExecutor::new(Arc::new(Sandbox::new()?), sink);
//! let pipeline = Pipeline::new("hello", vec![
//!     PipelineStage::new("run", ModuleRef::VfsPath("/program.wasm".into()))
//!         .args(["/program.wasm"])
//!         .preopen(Preopen::root()),
//! ]);
//! let report = executor.execute(pipeline, fs).await?;
//! report.outcome.into_result()?;
//! ```

mod metrics;
mod outcome;
#[allow(clippy::module_inception)]
mod pipeline;
mod stage;

pub use metrics::{PipelineMetrics, StageMetrics};
pub use outcome::ExecutionOutcome;
pub use pipeline::{Pipeline, PipelineExecutor, PipelineReport, RunId};
pub use stage::PipelineStage;
