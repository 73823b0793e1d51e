//! playbox: compile and run user programs inside a WebAssembly sandbox.
//!
//! ```text
//! host dirs ─▶ snapshot (index + blob) ─▶ template VirtualFs
//!                                              │ clone per run
//!                                              ▼
//!                     compile ─▶ link ─▶ run   (PipelineExecutor)
//!                        each stage: module + SyscallBindings
//! ```

pub mod pipeline;
pub mod playground;
pub mod sandbox;
pub mod sink;
pub mod snapshot;
pub mod syscall;
pub mod toolchain;
pub mod util;
pub mod vfs;

pub use pipeline::{
    ExecutionOutcome, Pipeline, PipelineExecutor, PipelineMetrics, PipelineReport, PipelineStage,
    RunId, StageMetrics,
};
pub use playground::{
    ExecutionMode, Playground, PlaygroundOptions, PlaygroundResult, RunOptions, Toolchain,
};
pub use playbox_shared::errors::{PlayboxError, PlayboxResult};
pub use sandbox::{ModuleError, ModuleRef, NativeModule, Sandbox, TerminationSignal};
pub use sink::{BufferSink, OutputSink, SharedSink, StdoutSink};
pub use snapshot::{Mount, Snapshot, SnapshotBuilder, build_snapshot, load_snapshot};
pub use syscall::{Preopen, SyscallBindings, Syscalls, Unwind};
pub use util::{LoggingOptions, init_logging};
pub use vfs::{VfsError, VirtualFs, WriteMode};
