//! [`Syscalls`] over an owned [`VirtualFs`].

use super::{
    DirEntry, Errno, FIXED_CLOCK_NANOS, Fd, FileStat, FileType, OpenFlags, STDERR, STDIN, STDOUT,
    Syscalls, Unwind, Whence,
};
use crate::sink::{SharedSink, StreamDecoder};
use crate::vfs::path::{is_within, join, normalize};
use crate::vfs::{VfsError, VirtualFs, WriteMode};
use rand::RngCore;
use std::collections::BTreeMap;

/// A directory made visible to a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preopen {
    /// Path the module sees.
    pub guest: String,
    /// Directory in the run's filesystem.
    pub path: String,
}

impl Preopen {
    pub fn new(guest: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            guest: guest.into(),
            path: path.into(),
        }
    }

    /// Expose the whole filesystem as `/`.
    pub fn root() -> Self {
        Self::new("/", "/")
    }
}

#[derive(Debug, Clone)]
enum FdEntry {
    Stdin,
    Stdout,
    Stderr,
    Preopen { guest: String, path: String },
    Dir { path: String, scope: String },
    File { path: String, offset: u64, append: bool },
}

/// Per-stage capability bundle.
///
/// Owns the run filesystem while the stage executes; [`into_fs`] hands it
/// back afterwards.
///
/// [`into_fs`]: SyscallBindings::into_fs
pub struct SyscallBindings {
    fs: VirtualFs,
    sink: SharedSink,
    args: Vec<String>,
    env: Vec<(String, String)>,
    fds: BTreeMap<Fd, FdEntry>,
    stdout: StreamDecoder,
    stderr: StreamDecoder,
}

impl SyscallBindings {
    pub fn new(
        fs: VirtualFs,
        sink: SharedSink,
        args: Vec<String>,
        env: Vec<(String, String)>,
        preopens: &[Preopen],
    ) -> Self {
        let mut fds = BTreeMap::new();
        fds.insert(STDIN, FdEntry::Stdin);
        fds.insert(STDOUT, FdEntry::Stdout);
        fds.insert(STDERR, FdEntry::Stderr);

        let mut next: Fd = 3;
        for preopen in preopens {
            match (normalize(&preopen.guest), normalize(&preopen.path)) {
                (Ok(guest), Ok(path)) => {
                    fds.insert(next, FdEntry::Preopen { guest, path });
                    next += 1;
                }
                _ => tracing::warn!(
                    guest = %preopen.guest,
                    path = %preopen.path,
                    "Skipping preopen with a non-absolute path"
                ),
            }
        }

        Self {
            fs,
            sink,
            args,
            env,
            fds,
            stdout: StreamDecoder::default(),
            stderr: StreamDecoder::default(),
        }
    }

    pub fn fs(&self) -> &VirtualFs {
        &self.fs
    }

    /// Flush buffered output and give the filesystem back.
    pub fn into_fs(mut self) -> VirtualFs {
        for decoder in [&mut self.stdout, &mut self.stderr] {
            let rest = decoder.finish();
            if !rest.is_empty() {
                self.sink.write(&rest);
            }
        }
        self.fs
    }

    /// Root directory and scope of a directory-like descriptor.
    fn dir_of(&self, fd: Fd) -> Result<(&str, &str), Errno> {
        match self.fds.get(&fd).ok_or(Errno::Badf)? {
            FdEntry::Preopen { path, .. } => Ok((path, path)),
            FdEntry::Dir { path, scope } => Ok((path, scope)),
            _ => Err(Errno::Notdir),
        }
    }

    /// Resolve `rel` under `dirfd`, refusing to leave the preopen it came from.
    fn resolve_at(&self, dirfd: Fd, rel: &str) -> Result<(String, String), Errno> {
        let (base, scope) = self.dir_of(dirfd)?;
        let full = join(base, rel).map_err(|_| Errno::Inval)?;
        if !is_within(&full, scope) {
            tracing::debug!(path = %rel, scope = %scope, "Path escapes its preopen");
            return Err(Errno::Notcapable);
        }
        Ok((full, scope.to_string()))
    }

    fn alloc(&mut self, entry: FdEntry) -> Result<Fd, Errno> {
        let fd = (3..=Fd::MAX)
            .find(|fd| !self.fds.contains_key(fd))
            .ok_or(Errno::Mfile)?;
        self.fds.insert(fd, entry);
        Ok(fd)
    }

    fn stat_path(&self, path: &str) -> Result<FileStat, Errno> {
        let meta = self.fs.stat(path)?;
        Ok(FileStat {
            filetype: if meta.is_directory {
                FileType::Directory
            } else {
                FileType::RegularFile
            },
            size: meta.len,
        })
    }

    fn emit(sink: &SharedSink, decoder: &mut StreamDecoder, data: &[u8]) {
        let text = decoder.decode(data);
        if !text.is_empty() {
            sink.write(&text);
        }
    }
}

impl Syscalls for SyscallBindings {
    fn args(&self) -> &[String] {
        &self.args
    }

    fn env(&self) -> &[(String, String)] {
        &self.env
    }

    fn preopens(&self) -> Vec<(Fd, String)> {
        self.fds
            .iter()
            .filter_map(|(fd, entry)| match entry {
                FdEntry::Preopen { guest, .. } => Some((*fd, guest.clone())),
                _ => None,
            })
            .collect()
    }

    fn open(&mut self, dirfd: Fd, path: &str, flags: OpenFlags) -> Result<Fd, Errno> {
        let (full, scope) = self.resolve_at(dirfd, path)?;

        match self.fs.stat(&full) {
            Ok(_) if flags.create && flags.exclusive => return Err(Errno::Exist),
            Ok(meta) if meta.is_directory => {
                if flags.write || flags.truncate {
                    return Err(Errno::Isdir);
                }
                return self.alloc(FdEntry::Dir { path: full, scope });
            }
            Ok(_) if flags.directory => return Err(Errno::Notdir),
            Ok(_) => {
                if flags.truncate {
                    self.fs.truncate(&full, 0)?;
                }
            }
            Err(VfsError::NotFound(_)) if flags.create && !flags.directory => {
                self.fs.write_file(&full, &[], WriteMode::Overwrite)?;
            }
            Err(e) => return Err(e.into()),
        }

        tracing::trace!(path = %full, "Opened file");
        self.alloc(FdEntry::File {
            path: full,
            offset: 0,
            append: flags.append,
        })
    }

    fn read(&mut self, fd: Fd, buf: &mut [u8]) -> Result<usize, Errno> {
        match self.fds.get_mut(&fd).ok_or(Errno::Badf)? {
            FdEntry::Stdin => Ok(0),
            FdEntry::File { path, offset, .. } => {
                let n = self.fs.read_at(path, *offset, buf)?;
                *offset += n as u64;
                Ok(n)
            }
            FdEntry::Preopen { .. } | FdEntry::Dir { .. } => Err(Errno::Isdir),
            FdEntry::Stdout | FdEntry::Stderr => Err(Errno::Badf),
        }
    }

    fn write(&mut self, fd: Fd, data: &[u8]) -> Result<usize, Errno> {
        match self.fds.get_mut(&fd).ok_or(Errno::Badf)? {
            FdEntry::Stdout => {
                Self::emit(&self.sink, &mut self.stdout, data);
                Ok(data.len())
            }
            FdEntry::Stderr => {
                Self::emit(&self.sink, &mut self.stderr, data);
                Ok(data.len())
            }
            FdEntry::File {
                path,
                offset,
                append,
            } => {
                if *append {
                    *offset = self.fs.stat(path)?.len;
                }
                self.fs.write_at(path, *offset, data)?;
                *offset += data.len() as u64;
                Ok(data.len())
            }
            FdEntry::Preopen { .. } | FdEntry::Dir { .. } => Err(Errno::Isdir),
            FdEntry::Stdin => Err(Errno::Badf),
        }
    }

    fn read_at(&mut self, fd: Fd, buf: &mut [u8], offset: u64) -> Result<usize, Errno> {
        match self.fds.get(&fd).ok_or(Errno::Badf)? {
            FdEntry::File { path, .. } => Ok(self.fs.read_at(path, offset, buf)?),
            FdEntry::Stdin | FdEntry::Stdout | FdEntry::Stderr => Err(Errno::Spipe),
            _ => Err(Errno::Isdir),
        }
    }

    fn write_at(&mut self, fd: Fd, data: &[u8], offset: u64) -> Result<usize, Errno> {
        match self.fds.get(&fd).ok_or(Errno::Badf)? {
            FdEntry::File { path, .. } => {
                self.fs.write_at(path, offset, data)?;
                Ok(data.len())
            }
            FdEntry::Stdin | FdEntry::Stdout | FdEntry::Stderr => Err(Errno::Spipe),
            _ => Err(Errno::Isdir),
        }
    }

    fn seek(&mut self, fd: Fd, delta: i64, whence: Whence) -> Result<u64, Errno> {
        match self.fds.get_mut(&fd).ok_or(Errno::Badf)? {
            FdEntry::File { path, offset, .. } => {
                let base = match whence {
                    Whence::Set => 0,
                    Whence::Cur => *offset as i64,
                    Whence::End => self.fs.stat(path)?.len as i64,
                };
                let target = base
                    .checked_add(delta)
                    .filter(|pos| *pos >= 0)
                    .ok_or(Errno::Inval)?;
                *offset = target as u64;
                Ok(*offset)
            }
            FdEntry::Stdin | FdEntry::Stdout | FdEntry::Stderr => Err(Errno::Spipe),
            _ => Err(Errno::Badf),
        }
    }

    fn close(&mut self, fd: Fd) -> Result<(), Errno> {
        self.fds.remove(&fd).map(|_| ()).ok_or(Errno::Badf)
    }

    fn truncate(&mut self, fd: Fd, len: u64) -> Result<(), Errno> {
        match self.fds.get(&fd).ok_or(Errno::Badf)? {
            FdEntry::File { path, .. } => Ok(self.fs.truncate(path, len)?),
            FdEntry::Preopen { .. } | FdEntry::Dir { .. } => Err(Errno::Isdir),
            _ => Err(Errno::Inval),
        }
    }

    fn fd_stat(&self, fd: Fd) -> Result<FileStat, Errno> {
        match self.fds.get(&fd).ok_or(Errno::Badf)? {
            FdEntry::Stdin | FdEntry::Stdout | FdEntry::Stderr => Ok(FileStat {
                filetype: FileType::Unknown,
                size: 0,
            }),
            FdEntry::Preopen { path, .. } | FdEntry::Dir { path, .. } | FdEntry::File { path, .. } => {
                self.stat_path(path)
            }
        }
    }

    fn path_stat(&self, dirfd: Fd, path: &str) -> Result<FileStat, Errno> {
        let (full, _) = self.resolve_at(dirfd, path)?;
        self.stat_path(&full)
    }

    fn readdir(&self, fd: Fd) -> Result<Vec<DirEntry>, Errno> {
        let (dir, _) = self.dir_of(fd)?;
        self.fs
            .list_children(dir)?
            .into_iter()
            .map(|name| {
                let child = join(dir, &name).map_err(|_| Errno::Inval)?;
                let filetype = self.stat_path(&child)?.filetype;
                Ok(DirEntry { name, filetype })
            })
            .collect()
    }

    fn mkdir(&mut self, dirfd: Fd, path: &str) -> Result<(), Errno> {
        let (full, _) = self.resolve_at(dirfd, path)?;
        Ok(self.fs.create_dir(&full)?)
    }

    fn unlink(&mut self, dirfd: Fd, path: &str) -> Result<(), Errno> {
        let (full, _) = self.resolve_at(dirfd, path)?;
        Ok(self.fs.remove_file(&full)?)
    }

    fn rmdir(&mut self, dirfd: Fd, path: &str) -> Result<(), Errno> {
        let (full, _) = self.resolve_at(dirfd, path)?;
        Ok(self.fs.remove_dir(&full)?)
    }

    fn rename(&mut self, from_dir: Fd, from: &str, to_dir: Fd, to: &str) -> Result<(), Errno> {
        let (src, _) = self.resolve_at(from_dir, from)?;
        let (dst, _) = self.resolve_at(to_dir, to)?;
        Ok(self.fs.rename(&src, &dst)?)
    }

    fn random_fill(&mut self, buf: &mut [u8]) {
        rand::rng().fill_bytes(buf);
    }

    fn clock_now(&self, _clock_id: u32) -> u64 {
        FIXED_CLOCK_NANOS
    }

    fn is_tty(&self, _fd: Fd) -> bool {
        false
    }

    fn exit(&mut self, code: i32) -> Unwind {
        tracing::debug!(code, "Module requested exit");
        Unwind::Exit(code)
    }

    fn kill(&mut self, signal: i32) -> Unwind {
        tracing::debug!(signal, "Module raised a signal");
        Unwind::Kill(signal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::BufferSink;
    use std::sync::Arc;

    fn bindings(fs: VirtualFs, sink: &BufferSink) -> SyscallBindings {
        SyscallBindings::new(
            fs,
            Arc::new(sink.clone()),
            vec!["prog".into()],
            vec![("HOME".into(), "/".into())],
            &[Preopen::root()],
        )
    }

    #[test]
    fn test_stdio_goes_to_sink_not_vfs() {
        let sink = BufferSink::new();
        let mut sys = bindings(VirtualFs::new(), &sink);

        sys.write(STDOUT, b"out ").unwrap();
        sys.write(STDERR, b"err").unwrap();
        let fs = sys.into_fs();

        assert_eq!(sink.contents(), "out err");
        assert!(fs.list_children("/").unwrap().is_empty());
    }

    #[test]
    fn test_stdin_reads_eof() {
        let sink = BufferSink::new();
        let mut sys = bindings(VirtualFs::new(), &sink);
        let mut buf = [0u8; 8];
        assert_eq!(sys.read(STDIN, &mut buf), Ok(0));
    }

    #[test]
    fn test_file_writes_persist_at_path() {
        let sink = BufferSink::new();
        let mut sys = bindings(VirtualFs::new(), &sink);

        let (dirfd, rel) = sys.resolve("/out.txt").unwrap();
        assert_eq!((dirfd, rel.as_str()), (3, "out.txt"));

        let fd = sys.open(dirfd, &rel, OpenFlags::write_new()).unwrap();
        assert_eq!(fd, 4);
        sys.write(fd, b"hello ").unwrap();
        sys.write(fd, b"world").unwrap();
        sys.close(fd).unwrap();

        let fs = sys.into_fs();
        assert_eq!(fs.read_file_text("/out.txt").unwrap(), "hello world");
        assert!(sink.contents().is_empty());
    }

    #[test]
    fn test_append_and_seek() {
        let sink = BufferSink::new();
        let mut fs = VirtualFs::new();
        fs.write_file("/log", b"abc", WriteMode::Overwrite).unwrap();
        let mut sys = bindings(fs, &sink);

        let flags = OpenFlags {
            append: true,
            write: true,
            ..OpenFlags::default()
        };
        let fd = sys.open(3, "log", flags).unwrap();
        sys.write(fd, b"def").unwrap();

        assert_eq!(sys.seek(fd, -2, Whence::End), Ok(4));
        let mut buf = [0u8; 8];
        assert_eq!(sys.read(fd, &mut buf), Ok(2));
        assert_eq!(&buf[..2], b"ef");
        assert_eq!(sys.seek(fd, -10, Whence::Cur), Err(Errno::Inval));
    }

    #[test]
    fn test_oversized_file_writes_fail_with_fbig() {
        let sink = BufferSink::new();
        let mut sys = bindings(VirtualFs::new(), &sink);
        let fd = sys.open(3, "big", OpenFlags::write_new()).unwrap();

        assert_eq!(sys.write_at(fd, b"x", u64::MAX), Err(Errno::Fbig));
        assert_eq!(sys.seek(fd, i64::MAX, Whence::Set), Ok(i64::MAX as u64));
        assert_eq!(sys.write(fd, b"x"), Err(Errno::Fbig));
        assert_eq!(sys.truncate(fd, u64::MAX), Err(Errno::Fbig));

        assert_eq!(sys.seek(fd, 0, Whence::Set), Ok(0));
        sys.write(fd, b"ok").unwrap();
        assert_eq!(sys.into_fs().read_file_text("/big").unwrap(), "ok");
    }

    #[test]
    fn test_open_errors() {
        let sink = BufferSink::new();
        let mut fs = VirtualFs::new();
        fs.mkdir_recursive("/dir").unwrap();
        fs.write_file("/f", b"x", WriteMode::Overwrite).unwrap();
        let mut sys = bindings(fs, &sink);

        assert_eq!(sys.open(3, "missing", OpenFlags::read_only()), Err(Errno::Noent));
        assert_eq!(sys.open(3, "dir", OpenFlags::write_new()), Err(Errno::Isdir));
        let exclusive = OpenFlags {
            exclusive: true,
            ..OpenFlags::write_new()
        };
        assert_eq!(sys.open(3, "f", exclusive), Err(Errno::Exist));
        let directory = OpenFlags {
            directory: true,
            ..OpenFlags::default()
        };
        assert_eq!(sys.open(3, "f", directory), Err(Errno::Notdir));
        assert_eq!(sys.close(42), Err(Errno::Badf));
    }

    #[test]
    fn test_paths_cannot_escape_preopen() {
        let sink = BufferSink::new();
        let mut fs = VirtualFs::new();
        fs.mkdir_recursive("/sandbox").unwrap();
        fs.write_file("/secret", b"x", WriteMode::Overwrite).unwrap();
        let mut sys = SyscallBindings::new(
            fs,
            Arc::new(sink),
            vec![],
            vec![],
            &[Preopen::new("/work", "/sandbox")],
        );

        assert_eq!(sys.resolve("/secret"), Err(Errno::Notcapable));
        assert_eq!(
            sys.open(3, "../secret", OpenFlags::read_only()),
            Err(Errno::Notcapable)
        );
        let fd = sys.open(3, "new.txt", OpenFlags::write_new()).unwrap();
        sys.write(fd, b"ok").unwrap();
        assert_eq!(sys.into_fs().read_file_text("/sandbox/new.txt").unwrap(), "ok");
    }

    #[test]
    fn test_readdir_and_stat() {
        let sink = BufferSink::new();
        let mut fs = VirtualFs::new();
        fs.mkdir_recursive("/lib").unwrap();
        fs.write_file("/a.txt", b"hi", WriteMode::Overwrite).unwrap();
        let sys = bindings(fs, &sink);

        let entries = sys.readdir(3).unwrap();
        assert_eq!(
            entries,
            vec![
                DirEntry {
                    name: "a.txt".into(),
                    filetype: FileType::RegularFile
                },
                DirEntry {
                    name: "lib".into(),
                    filetype: FileType::Directory
                },
            ]
        );
        assert_eq!(sys.path_stat(3, "a.txt").unwrap().size, 2);
        assert_eq!(sys.fd_stat(STDOUT).unwrap().filetype, FileType::Unknown);
    }

    #[test]
    fn test_clock_random_and_unwind() {
        let sink = BufferSink::new();
        let mut sys = bindings(VirtualFs::new(), &sink);

        assert_eq!(sys.clock_now(0), 0);
        assert_eq!(sys.clock_now(1), 0);
        assert!(!sys.is_tty(STDOUT));

        let mut buf = [0u8; 32];
        sys.random_fill(&mut buf);
        assert!(buf.iter().any(|b| *b != 0));

        assert_eq!(sys.exit(3), Unwind::Exit(3));
        assert_eq!(sys.kill(9), Unwind::Kill(9));
    }

    #[test]
    fn test_split_utf8_output_is_reassembled() {
        let sink = BufferSink::new();
        let mut sys = bindings(VirtualFs::new(), &sink);
        let bytes = "é".as_bytes();

        sys.write(STDOUT, &bytes[..1]).unwrap();
        assert_eq!(sink.contents(), "");
        sys.write(STDOUT, &bytes[1..]).unwrap();
        assert_eq!(sink.contents(), "é");
    }
}
