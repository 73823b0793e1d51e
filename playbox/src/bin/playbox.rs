//! playbox command line.

use bytes::Bytes;
use clap::{Args, Parser, Subcommand};
use playbox::{
    ExecutionMode, ExecutionOutcome, LoggingOptions, Mount, PlayboxError, PlayboxResult,
    Playground, PlaygroundOptions, RunOptions, SharedSink, Snapshot, StdoutSink, Toolchain,
    build_snapshot, init_logging,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

/// Compile and run programs inside a WebAssembly sandbox.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable debug logging on stderr
    #[arg(short, long, global = true, default_value = "false")]
    verbose: bool,

    /// Also write logs to daily files in this directory
    #[arg(long, global = true, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build or inspect filesystem snapshots
    Snapshot {
        #[command(subcommand)]
        command: SnapshotCommand,
    },
    /// Compile, link and run (or export) a source file
    Run(RunArgs),
    /// Format a source file in place
    Format {
        source: PathBuf,
        #[command(flatten)]
        setup: SetupArgs,
    },
    /// Print the compiler version
    Version {
        #[command(flatten)]
        setup: SetupArgs,
    },
}

#[derive(Subcommand, Debug)]
enum SnapshotCommand {
    /// Pack host directories into an index and blob
    Build {
        /// HOST:/virtual/path, repeatable
        #[arg(long = "mount", required = true, value_name = "HOST:VIRTUAL")]
        mounts: Vec<Mount>,
        #[arg(long, value_name = "FILE")]
        index: PathBuf,
        #[arg(long, value_name = "FILE")]
        blob: PathBuf,
    },
    /// Validate a snapshot and print its statistics
    Info {
        #[arg(long, value_name = "FILE")]
        index: PathBuf,
        #[arg(long, value_name = "FILE")]
        blob: PathBuf,
    },
}

#[derive(Args, Debug)]
struct SetupArgs {
    /// Compiler module (.wasm); the builtin compiler is used otherwise
    #[arg(long, value_name = "FILE", requires = "linker")]
    compiler: Option<PathBuf>,
    /// Linker module (.wasm)
    #[arg(long, value_name = "FILE", requires = "compiler")]
    linker: Option<PathBuf>,
    /// Playground options as JSON
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct RunArgs {
    source: PathBuf,
    /// Compile with optimizations
    #[arg(long, default_value = "false")]
    release: bool,
    /// Write the linked module here instead of running it
    #[arg(long, value_name = "FILE")]
    export: Option<PathBuf>,
    #[arg(long, value_name = "FILE", requires = "snapshot_blob")]
    snapshot_index: Option<PathBuf>,
    #[arg(long, value_name = "FILE", requires = "snapshot_index")]
    snapshot_blob: Option<PathBuf>,
    #[command(flatten)]
    setup: SetupArgs,
}

fn read_host(path: &Path) -> PlayboxResult<Vec<u8>> {
    std::fs::read(path).map_err(|e| PlayboxError::Config(format!("{}: {}", path.display(), e)))
}

fn playground(setup: &SetupArgs) -> PlayboxResult<Playground> {
    let sink: SharedSink = Arc::new(StdoutSink);
    let mut playground = Playground::new(sink)?;

    if let (Some(compiler), Some(linker)) = (&setup.compiler, &setup.linker) {
        let toolchain = Toolchain::from_wasm(
            Bytes::from(read_host(compiler)?),
            Bytes::from(read_host(linker)?),
        );
        playground = playground.with_toolchain(toolchain)?;
    }
    if let Some(config) = &setup.config {
        playground = playground.with_options(PlaygroundOptions::from_file(config)?)?;
    }
    Ok(playground)
}

fn snapshot(command: SnapshotCommand) -> PlayboxResult<()> {
    match command {
        SnapshotCommand::Build {
            mounts,
            index,
            blob,
        } => {
            let snapshot = build_snapshot(&mounts)?;
            snapshot.write_to(&index, &blob)?;
            let stats = snapshot.stats();
            println!(
                "wrote {} directories, {} files, {} blob bytes",
                stats.directories, stats.files, stats.blob_bytes
            );
        }
        SnapshotCommand::Info { index, blob } => {
            let snapshot = Snapshot::read_from(&index, &blob)?;
            snapshot.validate()?;
            let stats = snapshot.stats();
            println!(
                "{} directories, {} files, {} blob bytes",
                stats.directories, stats.files, stats.blob_bytes
            );
        }
    }
    Ok(())
}

async fn run(args: RunArgs) -> PlayboxResult<()> {
    let source = std::fs::read_to_string(&args.source)?;
    let mut playground = playground(&args.setup)?;
    if let (Some(index), Some(blob)) = (&args.snapshot_index, &args.snapshot_blob) {
        let snapshot = Snapshot::read_from(index, blob)?;
        playground = playground.with_snapshot(&snapshot)?;
    }

    let options = RunOptions {
        optimize: args.release,
        mode: if args.export.is_some() {
            ExecutionMode::Export
        } else {
            ExecutionMode::Run
        },
    };
    let result = playground.run(&source, options).await?;

    if let (Some(out), Some(artifact)) = (&args.export, &result.artifact) {
        std::fs::write(out, artifact)?;
        tracing::info!(path = %out.display(), bytes = artifact.len(), "Wrote exported module");
    }
    result.outcome.into_result()
}

async fn format(source: PathBuf, setup: SetupArgs) -> PlayboxResult<()> {
    let text = std::fs::read_to_string(&source)?;
    let formatted = playground(&setup)?.format(&text).await?;
    if formatted != text {
        std::fs::write(&source, formatted)?;
    }
    Ok(())
}

async fn version(setup: SetupArgs) -> PlayboxResult<()> {
    playground(&setup)?
        .version()
        .await
        .and_then(ExecutionOutcome::into_result)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let logging = LoggingOptions {
        log_dir: cli.log_dir.clone(),
        filter: Some(if cli.verbose { "debug" } else { "warn" }.to_string()),
    };
    let _guard = match init_logging(&logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("playbox: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Command::Snapshot { command } => snapshot(command),
        Command::Run(args) => run(args).await,
        Command::Format { source, setup } => format(source, setup).await,
        Command::Version { setup } => version(setup).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::debug!(error = %e, "Command failed");
            if !matches!(
                e,
                PlayboxError::StageExit { .. } | PlayboxError::AbnormalTermination { .. }
            ) {
                eprintln!("playbox: {}", e);
            }
            let status = u8::try_from(e.exit_status())
                .ok()
                .filter(|code| *code != 0)
                .unwrap_or(1);
            ExitCode::from(status)
        }
    }
}
