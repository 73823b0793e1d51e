//! The compile → link → run pipeline behind the playground.
//!
//! A [`Playground`] owns a template filesystem (usually loaded from a
//! snapshot) and a toolchain. Each call clones the template, so nothing a
//! run writes is visible to the next one.

mod options;

pub use options::PlaygroundOptions;

use crate::pipeline::{
    ExecutionOutcome, Pipeline, PipelineExecutor, PipelineMetrics, PipelineStage, RunId,
};
use crate::sandbox::{ModuleRef, Sandbox};
use crate::sink::SharedSink;
use crate::snapshot::Snapshot;
use crate::syscall::Preopen;
use crate::toolchain::{Compiler, Linker};
use crate::vfs::path::parent;
use crate::vfs::{VirtualFs, WriteMode};
use bytes::Bytes;
use playbox_shared::errors::PlayboxResult;
use std::sync::Arc;

/// What happens after linking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Execute the linked program.
    #[default]
    Run,
    /// Hand the linked program back instead of running it.
    Export,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Pass `--release` to the compiler.
    pub optimize: bool,
    pub mode: ExecutionMode,
}

/// Compiler and linker modules.
#[derive(Debug, Clone)]
pub struct Toolchain {
    pub compiler: ModuleRef,
    pub linker: ModuleRef,
}

impl Toolchain {
    /// The native toolchain shipped with playbox.
    pub fn builtin() -> Self {
        Self {
            compiler: ModuleRef::native(Compiler),
            linker: ModuleRef::native(Linker),
        }
    }

    /// WebAssembly compiler and linker modules.
    pub fn from_wasm(compiler: Bytes, linker: Bytes) -> Self {
        Self {
            compiler: ModuleRef::Bytes(compiler),
            linker: ModuleRef::Bytes(linker),
        }
    }

    /// Compile byte modules once so every run reuses them.
    pub fn precompile(self, sandbox: &Sandbox) -> PlayboxResult<Self> {
        let prepare = |module: ModuleRef| match module {
            ModuleRef::Bytes(bytes) => sandbox.compile(&bytes).map(ModuleRef::Compiled),
            other => Ok(other),
        };
        Ok(Self {
            compiler: prepare(self.compiler)?,
            linker: prepare(self.linker)?,
        })
    }
}

impl Default for Toolchain {
    fn default() -> Self {
        Self::builtin()
    }
}

#[derive(Debug)]
pub struct PlaygroundResult {
    pub run_id: RunId,
    pub outcome: ExecutionOutcome,
    /// The linked module, in [`ExecutionMode::Export`] after a successful link.
    pub artifact: Option<Bytes>,
    pub metrics: PipelineMetrics,
}

pub struct Playground {
    executor: PipelineExecutor,
    toolchain: Toolchain,
    template: VirtualFs,
    options: PlaygroundOptions,
}

impl Playground {
    /// Builtin toolchain, empty template, default options.
    pub fn new(sink: SharedSink) -> PlayboxResult<Self> {
        let sandbox = Arc::new(Sandbox::new()?);
        Ok(Self {
            executor: PipelineExecutor::new(sandbox, sink),
            toolchain: Toolchain::builtin(),
            template: VirtualFs::new(),
            options: PlaygroundOptions::default(),
        })
    }

    pub fn with_template(mut self, template: VirtualFs) -> Self {
        self.template = template;
        self
    }

    pub fn with_snapshot(self, snapshot: &Snapshot) -> PlayboxResult<Self> {
        snapshot.validate()?;
        Ok(self.with_template(snapshot.load()?))
    }

    pub fn with_toolchain(mut self, toolchain: Toolchain) -> PlayboxResult<Self> {
        self.toolchain = toolchain.precompile(self.executor.sandbox())?;
        Ok(self)
    }

    pub fn with_options(mut self, options: PlaygroundOptions) -> PlayboxResult<Self> {
        self.options = options.sanitize()?;
        Ok(self)
    }

    pub fn options(&self) -> &PlaygroundOptions {
        &self.options
    }

    pub fn template(&self) -> &VirtualFs {
        &self.template
    }

    fn stage<I, S>(&self, name: &str, module: &ModuleRef, args: I) -> PipelineStage
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        PipelineStage::new(name, module.clone())
            .args(args)
            .preopen(Preopen::root())
    }

    fn compile_stage(&self, optimize: bool) -> PipelineStage {
        let opts = &self.options;
        let mut args = vec![
            opts.compiler_program.as_str(),
            "build",
            opts.source_path.as_str(),
            "--cross-compile",
            "--prelude",
            "empty",
        ];
        if optimize {
            args.push("--release");
        }
        self.stage("compile", &self.toolchain.compiler, args)
            .env(&opts.library_env, &opts.library_root)
    }

    fn link_stage(&self) -> PipelineStage {
        let opts = &self.options;
        let mut args = vec![
            opts.linker_program.clone(),
            opts.object_path(),
            "-o".to_string(),
            opts.program_path.clone(),
        ];
        args.extend(opts.runtime_objects.iter().cloned());
        self.stage("link", &self.toolchain.linker, args)
    }

    fn run_stage(&self) -> PipelineStage {
        let program = &self.options.program_path;
        self.stage("run", &ModuleRef::VfsPath(program.clone()), [program.as_str()])
    }

    fn write_seed(fs: &mut VirtualFs, path: &str, data: &[u8]) -> PlayboxResult<()> {
        if let Some(dir) = parent(path) {
            fs.mkdir_recursive(dir)?;
        }
        fs.write_file(path, data, WriteMode::Overwrite)?;
        Ok(())
    }

    /// Compile, link, then run or export `source`.
    pub async fn run(&self, source: &str, run: RunOptions) -> PlayboxResult<PlaygroundResult> {
        tracing::info!(mode = ?run.mode, optimize = run.optimize, "Starting playground run");

        let mut fs = self.template.clone();
        Self::write_seed(&mut fs, &self.options.source_path, source.as_bytes())?;
        for seed in &self.options.seed_files {
            Self::write_seed(&mut fs, seed, &[])?;
        }

        let mut stages = vec![self.compile_stage(run.optimize), self.link_stage()];
        if run.mode == ExecutionMode::Run {
            stages.push(self.run_stage());
        }
        let report = self
            .executor
            .execute(Pipeline::new("playground", stages), fs)
            .await?;

        let artifact = if run.mode == ExecutionMode::Export && report.outcome.is_success() {
            let program = &self.options.program_path;
            self.executor.sink().writeln(&format!("$ download {}", program));
            let bytes = report.fs.read_file(program)?;
            tracing::info!(path = %program, bytes = bytes.len(), "Exported program");
            Some(bytes)
        } else {
            None
        };

        Ok(PlaygroundResult {
            run_id: report.run_id,
            outcome: report.outcome,
            artifact,
            metrics: report.metrics,
        })
    }

    /// Run `<compiler> --version` on an empty filesystem.
    pub async fn version(&self) -> PlayboxResult<ExecutionOutcome> {
        let stage = self.stage(
            "version",
            &self.toolchain.compiler,
            [self.options.compiler_program.as_str(), "--version"],
        );
        let report = self
            .executor
            .execute(Pipeline::new("version", vec![stage]), VirtualFs::new())
            .await?;
        Ok(report.outcome)
    }

    /// Run `<compiler> tool format` over `source` and return the result.
    pub async fn format(&self, source: &str) -> PlayboxResult<String> {
        let path = &self.options.source_path;
        let mut fs = VirtualFs::new();
        Self::write_seed(&mut fs, path, source.as_bytes())?;

        let stage = self.stage(
            "format",
            &self.toolchain.compiler,
            [self.options.compiler_program.as_str(), "tool", "format", path.as_str()],
        );
        let report = self
            .executor
            .execute(Pipeline::new("format", vec![stage]), fs)
            .await?;
        report.outcome.into_result()?;
        Ok(report.fs.read_file_text(path)?)
    }
}
