//! System-call surface offered to stage modules.
//!
//! [`Syscalls`] is the complete capability set a module gets: argument and
//! environment access, descriptor I/O over the virtual filesystem, random
//! bytes, a clock, a terminal query, and exit/kill. [`SyscallBindings`] is
//! the only implementation; it is built fresh for every stage and owns the
//! run's filesystem for the duration of that stage.
//!
//! Native modules call the trait directly. Wasm modules reach it through
//! the preview 1 imports registered by [`wasi::add_to_linker`].
//!
//! Exit and kill do not return normally. They produce an [`Unwind`] value
//! which the module raises; the sandbox turns it back into a
//! `TerminationSignal` by matching on the type.

mod bindings;
mod errno;
pub mod wasi;

pub use bindings::{Preopen, SyscallBindings};
pub use errno::Errno;

use crate::vfs::path::{is_within, normalize};

pub type Fd = u32;

pub const STDIN: Fd = 0;
pub const STDOUT: Fd = 1;
pub const STDERR: Fd = 2;

/// Value returned for every clock query. The sandbox has no wall clock.
pub const FIXED_CLOCK_NANOS: u64 = 0;

/// WASI signal number for `abort()`.
pub const SIGABRT: i32 = 6;

/// Raised by a module to stop running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Unwind {
    #[error("process exited with code {0}")]
    Exit(i32),
    #[error("process killed by signal {0}")]
    Kill(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FileType {
    Unknown = 0,
    CharacterDevice = 2,
    Directory = 3,
    RegularFile = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub filetype: FileType,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub filetype: FileType,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenFlags {
    pub create: bool,
    pub directory: bool,
    pub exclusive: bool,
    pub truncate: bool,
    pub append: bool,
    pub write: bool,
}

impl OpenFlags {
    pub fn read_only() -> Self {
        Self::default()
    }

    /// Create or truncate for writing.
    pub fn write_new() -> Self {
        Self {
            create: true,
            truncate: true,
            write: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Set,
    Cur,
    End,
}

/// The capability interface a running module sees.
pub trait Syscalls: Send {
    fn args(&self) -> &[String];
    fn env(&self) -> &[(String, String)];
    /// Preopened directories as `(fd, guest-visible path)`.
    fn preopens(&self) -> Vec<(Fd, String)>;

    fn open(&mut self, dirfd: Fd, path: &str, flags: OpenFlags) -> Result<Fd, Errno>;
    fn read(&mut self, fd: Fd, buf: &mut [u8]) -> Result<usize, Errno>;
    fn write(&mut self, fd: Fd, data: &[u8]) -> Result<usize, Errno>;
    fn read_at(&mut self, fd: Fd, buf: &mut [u8], offset: u64) -> Result<usize, Errno>;
    fn write_at(&mut self, fd: Fd, data: &[u8], offset: u64) -> Result<usize, Errno>;
    fn seek(&mut self, fd: Fd, offset: i64, whence: Whence) -> Result<u64, Errno>;
    fn close(&mut self, fd: Fd) -> Result<(), Errno>;
    fn truncate(&mut self, fd: Fd, len: u64) -> Result<(), Errno>;

    fn fd_stat(&self, fd: Fd) -> Result<FileStat, Errno>;
    fn path_stat(&self, dirfd: Fd, path: &str) -> Result<FileStat, Errno>;
    fn readdir(&self, fd: Fd) -> Result<Vec<DirEntry>, Errno>;
    fn mkdir(&mut self, dirfd: Fd, path: &str) -> Result<(), Errno>;
    fn unlink(&mut self, dirfd: Fd, path: &str) -> Result<(), Errno>;
    fn rmdir(&mut self, dirfd: Fd, path: &str) -> Result<(), Errno>;
    fn rename(&mut self, from_dir: Fd, from: &str, to_dir: Fd, to: &str) -> Result<(), Errno>;

    fn random_fill(&mut self, buf: &mut [u8]);
    fn clock_now(&self, clock_id: u32) -> u64;
    fn is_tty(&self, fd: Fd) -> bool;

    fn exit(&mut self, code: i32) -> Unwind;
    fn kill(&mut self, signal: i32) -> Unwind;

    /// Map an absolute guest path onto the preopen that covers it, the way
    /// wasi-libc does: longest matching prefix wins.
    fn resolve(&self, path: &str) -> Result<(Fd, String), Errno> {
        let path = normalize(path).map_err(|_| Errno::Inval)?;
        let (fd, guest) = self
            .preopens()
            .into_iter()
            .filter(|(_, guest)| is_within(&path, guest))
            .max_by_key(|(_, guest)| guest.len())
            .ok_or(Errno::Notcapable)?;

        let rel = path[guest.len()..].trim_start_matches('/');
        let rel = if rel.is_empty() { "." } else { rel };
        Ok((fd, rel.to_string()))
    }
}
