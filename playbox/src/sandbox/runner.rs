//! Module instantiation and start.

use super::{ModuleError, ModuleRef, TerminationSignal};
use crate::syscall::{SyscallBindings, Unwind, wasi};
use playbox_shared::errors::{PlayboxError, PlayboxResult};
use wasmtime::{Config, Engine, Linker, Module, Store, Trap, WasmBacktrace};

/// Result of one stage invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageExecution {
    pub signal: TerminationSignal,
    /// Wasm frame lines captured when the module stopped, if any.
    pub trace: Option<String>,
}

impl StageExecution {
    fn new(signal: TerminationSignal) -> Self {
        Self {
            signal,
            trace: None,
        }
    }
}

/// Shared compilation engine plus the preview 1 linker.
pub struct Sandbox {
    engine: Engine,
    linker: Linker<SyscallBindings>,
}

impl Sandbox {
    pub fn new() -> PlayboxResult<Self> {
        let mut config = Config::new();
        config.wasm_backtrace(true);
        let engine = Engine::new(&config).map_err(host_fault)?;

        let mut linker = Linker::new(&engine);
        wasi::add_to_linker(&mut linker).map_err(host_fault)?;

        Ok(Self { engine, linker })
    }

    /// Compile a binary or text module.
    pub fn compile(&self, bytes: &[u8]) -> PlayboxResult<Module> {
        Module::new(&self.engine, bytes).map_err(host_fault)
    }

    /// Run `module` to completion with `bindings`.
    ///
    /// The bindings always come back so the caller regains the filesystem,
    /// even when the module could not be started.
    pub async fn start(
        &self,
        module: &ModuleRef,
        mut bindings: SyscallBindings,
    ) -> (PlayboxResult<StageExecution>, SyscallBindings) {
        let compiled = match module {
            ModuleRef::Native(native) => {
                tracing::debug!(module = native.name(), "Starting native module");
                let signal = match native.main(&mut bindings).await {
                    Ok(()) => TerminationSignal::Exited(0),
                    Err(ModuleError::Unwind(unwind)) => unwind.into(),
                    Err(ModuleError::Fault(detail)) => TerminationSignal::Faulted(detail),
                };
                return (Ok(StageExecution::new(signal)), bindings);
            }
            ModuleRef::Compiled(module) => Ok(module.clone()),
            ModuleRef::Bytes(bytes) => self.compile(bytes),
            ModuleRef::VfsPath(path) => self.load_from_vfs(&bindings, path),
        };

        match compiled {
            Ok(module) => self.run_wasm(&module, bindings),
            Err(e) => (Err(e), bindings),
        }
    }

    fn load_from_vfs(&self, bindings: &SyscallBindings, path: &str) -> PlayboxResult<Module> {
        let bytes = bindings
            .fs()
            .read_file(path)
            .map_err(|e| PlayboxError::HostFault(format!("cannot load module {}: {}", path, e)))?;
        tracing::debug!(path = %path, bytes = bytes.len(), "Compiling module from filesystem");
        self.compile(&bytes)
    }

    fn run_wasm(
        &self,
        module: &Module,
        bindings: SyscallBindings,
    ) -> (PlayboxResult<StageExecution>, SyscallBindings) {
        let mut store = Store::new(&self.engine, bindings);

        let instance = match self.linker.instantiate(&mut store, module) {
            Ok(instance) => instance,
            Err(e) => {
                tracing::warn!(error = %e, "Module instantiation failed");
                return (Err(host_fault(e)), store.into_data());
            }
        };
        let entry = match instance.get_typed_func::<(), ()>(&mut store, "_start") {
            Ok(entry) => entry,
            Err(e) => return (Err(host_fault(e)), store.into_data()),
        };

        let execution = match entry.call(&mut store, ()) {
            Ok(()) => StageExecution::new(TerminationSignal::Exited(0)),
            Err(e) => classify(e),
        };
        (Ok(execution), store.into_data())
    }
}

/// Map a failed `_start` call to a signal by error type.
fn classify(err: anyhow::Error) -> StageExecution {
    let trace = err
        .downcast_ref::<WasmBacktrace>()
        .map(|bt| bt.to_string())
        .filter(|bt| !bt.trim().is_empty());

    let signal = if let Some(unwind) = err.downcast_ref::<Unwind>() {
        TerminationSignal::from(*unwind)
    } else if let Some(trap) = err.downcast_ref::<Trap>() {
        TerminationSignal::Faulted(trap.to_string())
    } else {
        TerminationSignal::Faulted(format!("{:#}", err))
    };
    StageExecution { signal, trace }
}

fn host_fault(err: anyhow::Error) -> PlayboxError {
    PlayboxError::HostFault(format!("{:#}", err))
}
