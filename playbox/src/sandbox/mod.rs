//! Stage module execution.
//!
//! A stage runs either a native module (Rust code driving [`Syscalls`]
//! directly) or a WebAssembly module instantiated through wasmtime with the
//! preview 1 imports. Both end in exactly one [`TerminationSignal`].

mod runner;

pub use runner::{Sandbox, StageExecution};

use crate::syscall::{Syscalls, Unwind};
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;

/// How a stage ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationSignal {
    Exited(i32),
    Killed(i32),
    Faulted(String),
}

impl TerminationSignal {
    /// Numeric exit code; only an orderly exit has one.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            TerminationSignal::Exited(code) => Some(*code),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TerminationSignal::Exited(0))
    }

    /// Short description for abnormal terminations.
    pub fn kind(&self) -> String {
        match self {
            TerminationSignal::Exited(code) => format!("exited with code {}", code),
            TerminationSignal::Killed(signal) => format!("killed by signal {}", signal),
            TerminationSignal::Faulted(detail) => format!("fault: {}", detail),
        }
    }
}

impl fmt::Display for TerminationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.kind())
    }
}

impl From<Unwind> for TerminationSignal {
    fn from(unwind: Unwind) -> Self {
        match unwind {
            Unwind::Exit(code) => TerminationSignal::Exited(code),
            Unwind::Kill(signal) => TerminationSignal::Killed(signal),
        }
    }
}

/// Early return from a native module.
#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    #[error(transparent)]
    Unwind(#[from] Unwind),

    #[error("fault: {0}")]
    Fault(String),
}

/// A stage module implemented in Rust.
#[async_trait]
pub trait NativeModule: Send + Sync {
    /// Program name, used in logs.
    fn name(&self) -> &str;

    /// Entry point. Returning `Ok` is an exit with code 0.
    async fn main(&self, sys: &mut dyn Syscalls) -> Result<(), ModuleError>;
}

/// Where a stage's module comes from.
#[derive(Clone)]
pub enum ModuleRef {
    Native(Arc<dyn NativeModule>),
    /// Already compiled against the sandbox engine.
    Compiled(wasmtime::Module),
    /// Binary or text module compiled when the stage starts.
    Bytes(Bytes),
    /// Module read from the run filesystem when the stage starts.
    VfsPath(String),
}

impl ModuleRef {
    pub fn native(module: impl NativeModule + 'static) -> Self {
        ModuleRef::Native(Arc::new(module))
    }
}

impl fmt::Debug for ModuleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleRef::Native(m) => f.debug_tuple("Native").field(&m.name()).finish(),
            ModuleRef::Compiled(_) => f.write_str("Compiled"),
            ModuleRef::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            ModuleRef::VfsPath(p) => f.debug_tuple("VfsPath").field(p).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_from_unwind() {
        assert_eq!(TerminationSignal::from(Unwind::Exit(2)), TerminationSignal::Exited(2));
        assert_eq!(TerminationSignal::from(Unwind::Kill(6)), TerminationSignal::Killed(6));
    }

    #[test]
    fn test_only_exit_has_code() {
        assert_eq!(TerminationSignal::Exited(3).exit_code(), Some(3));
        assert_eq!(TerminationSignal::Killed(9).exit_code(), None);
        assert_eq!(TerminationSignal::Faulted("trap".into()).exit_code(), None);
        assert!(TerminationSignal::Exited(0).is_success());
        assert!(!TerminationSignal::Exited(1).is_success());
    }
}
