//! Builtin native toolchain.
//!
//! [`Compiler`] and [`Linker`] are ordinary stage modules: they see only
//! their argv, environment and the [`Syscalls`] surface, exactly like a
//! wasm compiler would. The linker's output is a real WebAssembly text
//! module, so the run stage goes through wasmtime.
//!
//! Object files are line-oriented text:
//!
//! ```text
//! ;; playbox-object v1
//! ;; source /code.cr
//! write 310a
//! exit 3
//! ```

mod compiler;
mod linker;
mod object;

pub use compiler::{COMPILER_VERSION, Compiler};
pub use linker::Linker;

use crate::sandbox::ModuleError;
use crate::syscall::{Errno, Fd, OpenFlags, STDERR, STDOUT, Syscalls};

const READ_CHUNK: usize = 4096;

fn read_file(sys: &mut dyn Syscalls, path: &str) -> Result<Vec<u8>, Errno> {
    let (dir, rel) = sys.resolve(path)?;
    let fd = sys.open(dir, &rel, OpenFlags::read_only())?;

    let mut data = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];
    let result = loop {
        match sys.read(fd, &mut chunk) {
            Ok(0) => break Ok(data),
            Ok(n) => data.extend_from_slice(&chunk[..n]),
            Err(e) => break Err(e),
        }
    };
    sys.close(fd)?;
    result
}

fn write_file(sys: &mut dyn Syscalls, path: &str, data: &[u8]) -> Result<(), Errno> {
    let (dir, rel) = sys.resolve(path)?;
    let fd = sys.open(dir, &rel, OpenFlags::write_new())?;
    let mut written = 0;
    while written < data.len() {
        written += sys.write(fd, &data[written..])?;
    }
    sys.close(fd)
}

fn exists(sys: &dyn Syscalls, path: &str) -> bool {
    sys.resolve(path)
        .and_then(|(dir, rel)| sys.path_stat(dir, &rel))
        .is_ok()
}

fn write_stdio(sys: &mut dyn Syscalls, fd: Fd, data: &[u8]) -> Result<(), ModuleError> {
    sys.write(fd, data)
        .map(|_| ())
        .map_err(|e| ModuleError::Fault(format!("write to fd {} failed: {}", fd, e)))
}

fn print(sys: &mut dyn Syscalls, text: &str) -> Result<(), ModuleError> {
    write_stdio(sys, STDOUT, text.as_bytes())
}

fn eprintln(sys: &mut dyn Syscalls, text: &str) -> Result<(), ModuleError> {
    write_stdio(sys, STDERR, format!("{}\n", text).as_bytes())
}

/// Report `message` on stderr and exit with status 1.
///
/// If stderr itself is unwritable the stage faults instead.
fn fail(sys: &mut dyn Syscalls, message: &str) -> ModuleError {
    match eprintln(sys, message) {
        Ok(()) => sys.exit(1).into(),
        Err(e) => e,
    }
}

fn env_var<'a>(sys: &'a dyn Syscalls, key: &str) -> Option<&'a str> {
    sys.env()
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}
