//! `wasi_snapshot_preview1` imports backed by [`SyscallBindings`].
//!
//! Each import decodes its pointer arguments against the caller's exported
//! `memory`, forwards to the [`Syscalls`] implementation, and returns a
//! WASI errno. `proc_exit` and `proc_raise` instead fail the call with an
//! [`Unwind`](super::Unwind) error, which the sandbox downcasts.

use super::{
    Errno, FIXED_CLOCK_NANOS, Fd, FileStat, FileType, OpenFlags, SyscallBindings, Syscalls,
    Whence,
};
use anyhow::anyhow;
use wasmtime::{Caller, Extern, Linker};

pub const WASI_MODULE: &str = "wasi_snapshot_preview1";

const OFLAGS_CREAT: i32 = 1;
const OFLAGS_DIRECTORY: i32 = 2;
const OFLAGS_EXCL: i32 = 4;
const OFLAGS_TRUNC: i32 = 8;
const FDFLAGS_APPEND: i32 = 1;
const RIGHTS_FD_WRITE: i64 = 1 << 6;
const PREOPEN_TYPE_DIR: u8 = 0;

const FDSTAT_SIZE: u32 = 24;
const FILESTAT_SIZE: u32 = 64;

type Ctx<'a> = Caller<'a, SyscallBindings>;

/// Borrow guest memory and the bindings together, then run `op`.
fn with_memory<F>(caller: &mut Ctx<'_>, op: F) -> anyhow::Result<i32>
where
    F: FnOnce(&mut [u8], &mut SyscallBindings) -> Result<(), Errno>,
{
    let memory = caller
        .get_export("memory")
        .and_then(Extern::into_memory)
        .ok_or_else(|| anyhow!("module does not export its linear memory as `memory`"))?;
    let (mem, sys) = memory.data_and_store_mut(&mut *caller);
    Ok(match op(mem, sys) {
        Ok(()) => 0,
        Err(errno) => errno.raw(),
    })
}

fn slice(mem: &[u8], ptr: u32, len: u32) -> Result<&[u8], Errno> {
    let start = ptr as usize;
    let end = start.checked_add(len as usize).ok_or(Errno::Fault)?;
    mem.get(start..end).ok_or(Errno::Fault)
}

fn slice_mut(mem: &mut [u8], ptr: u32, len: u32) -> Result<&mut [u8], Errno> {
    let start = ptr as usize;
    let end = start.checked_add(len as usize).ok_or(Errno::Fault)?;
    mem.get_mut(start..end).ok_or(Errno::Fault)
}

fn offset(ptr: u32, by: usize) -> Result<u32, Errno> {
    u32::try_from(by)
        .ok()
        .and_then(|by| ptr.checked_add(by))
        .ok_or(Errno::Fault)
}

fn read_u32(mem: &[u8], ptr: u32) -> Result<u32, Errno> {
    let bytes = slice(mem, ptr, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn write_u32(mem: &mut [u8], ptr: u32, value: u32) -> Result<(), Errno> {
    slice_mut(mem, ptr, 4)?.copy_from_slice(&value.to_le_bytes());
    Ok(())
}

fn write_u64(mem: &mut [u8], ptr: u32, value: u64) -> Result<(), Errno> {
    slice_mut(mem, ptr, 8)?.copy_from_slice(&value.to_le_bytes());
    Ok(())
}

fn read_str(mem: &[u8], ptr: u32, len: u32) -> Result<String, Errno> {
    std::str::from_utf8(slice(mem, ptr, len)?)
        .map(str::to_owned)
        .map_err(|_| Errno::Ilseq)
}

fn to_len(n: usize) -> Result<u32, Errno> {
    u32::try_from(n).map_err(|_| Errno::Inval)
}

/// `(buf, len)` pairs of an iovec array.
fn iovecs(mem: &[u8], iovs: u32, count: u32) -> Result<Vec<(u32, u32)>, Errno> {
    (0..count as usize)
        .map(|i| {
            let base = offset(iovs, i * 8)?;
            Ok((read_u32(mem, base)?, read_u32(mem, offset(base, 4)?)?))
        })
        .collect()
}

fn gather(mem: &[u8], iovs: u32, count: u32) -> Result<Vec<u8>, Errno> {
    let mut data = Vec::new();
    for (ptr, len) in iovecs(mem, iovs, count)? {
        data.extend_from_slice(slice(mem, ptr, len)?);
    }
    Ok(data)
}

/// Write NUL-terminated strings into `buf` and their addresses into `ptrs`.
fn write_string_table<I>(mem: &mut [u8], items: I, ptrs: u32, buf: u32) -> Result<(), Errno>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    let mut cursor = buf;
    for (i, item) in items.into_iter().enumerate() {
        let bytes = item.as_ref().as_bytes();
        write_u32(mem, offset(ptrs, i * 4)?, cursor)?;
        let len = to_len(bytes.len())?;
        let dst = slice_mut(mem, cursor, len + 1)?;
        dst[..bytes.len()].copy_from_slice(bytes);
        dst[bytes.len()] = 0;
        cursor = offset(cursor, bytes.len() + 1)?;
    }
    Ok(())
}

fn write_sizes<I>(mem: &mut [u8], items: I, count_ptr: u32, size_ptr: u32) -> Result<(), Errno>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    let (count, size) = items
        .into_iter()
        .fold((0usize, 0usize), |(count, size), item| {
            (count + 1, size + item.as_ref().len() + 1)
        });
    write_u32(mem, count_ptr, to_len(count)?)?;
    write_u32(mem, size_ptr, to_len(size)?)
}

fn env_strings(sys: &dyn Syscalls) -> Vec<String> {
    sys.env().iter().map(|(k, v)| format!("{k}={v}")).collect()
}

fn write_filestat(mem: &mut [u8], ptr: u32, stat: FileStat, time: u64) -> Result<(), Errno> {
    let out = slice_mut(mem, ptr, FILESTAT_SIZE)?;
    out.fill(0);
    out[16] = stat.filetype as u8;
    out[24..32].copy_from_slice(&1u64.to_le_bytes());
    out[32..40].copy_from_slice(&stat.size.to_le_bytes());
    for field in [40..48, 48..56, 56..64] {
        out[field].copy_from_slice(&time.to_le_bytes());
    }
    Ok(())
}

fn fd_read(mem: &mut [u8], sys: &mut dyn Syscalls, fd: Fd, iovs: u32, count: u32, nread: u32) -> Result<(), Errno> {
    let mut total = 0usize;
    for (ptr, len) in iovecs(mem, iovs, count)? {
        let dst = slice_mut(mem, ptr, len)?;
        let n = sys.read(fd, dst)?;
        total += n;
        if n < len as usize {
            break;
        }
    }
    write_u32(mem, nread, to_len(total)?)
}

fn fd_pread(
    mem: &mut [u8],
    sys: &mut dyn Syscalls,
    fd: Fd,
    iovs: u32,
    count: u32,
    at: u64,
    nread: u32,
) -> Result<(), Errno> {
    let mut total = 0usize;
    for (ptr, len) in iovecs(mem, iovs, count)? {
        let dst = slice_mut(mem, ptr, len)?;
        let n = sys.read_at(fd, dst, at.saturating_add(total as u64))?;
        total += n;
        if n < len as usize {
            break;
        }
    }
    write_u32(mem, nread, to_len(total)?)
}

fn fd_fdstat_get(mem: &mut [u8], sys: &mut dyn Syscalls, fd: Fd, ptr: u32) -> Result<(), Errno> {
    let stat = sys.fd_stat(fd)?;
    let (filetype, rights) = if sys.is_tty(fd) {
        (FileType::CharacterDevice, RIGHTS_FD_WRITE as u64)
    } else {
        (stat.filetype, u64::MAX)
    };
    let out = slice_mut(mem, ptr, FDSTAT_SIZE)?;
    out.fill(0);
    out[0] = filetype as u8;
    out[8..16].copy_from_slice(&rights.to_le_bytes());
    out[16..24].copy_from_slice(&rights.to_le_bytes());
    Ok(())
}

fn fd_readdir(
    mem: &mut [u8],
    sys: &mut dyn Syscalls,
    fd: Fd,
    buf: u32,
    buf_len: u32,
    cookie: i64,
    used: u32,
) -> Result<(), Errno> {
    let skip = usize::try_from(cookie).map_err(|_| Errno::Inval)?;
    let mut out = Vec::new();
    for (i, entry) in sys.readdir(fd)?.iter().enumerate().skip(skip) {
        let next = (i + 1) as u64;
        out.extend_from_slice(&next.to_le_bytes());
        out.extend_from_slice(&next.to_le_bytes());
        out.extend_from_slice(&to_len(entry.name.len())?.to_le_bytes());
        out.push(entry.filetype as u8);
        out.extend_from_slice(&[0; 3]);
        out.extend_from_slice(entry.name.as_bytes());
        if out.len() >= buf_len as usize {
            break;
        }
    }
    let n = out.len().min(buf_len as usize);
    slice_mut(mem, buf, to_len(n)?)?.copy_from_slice(&out[..n]);
    write_u32(mem, used, to_len(n)?)
}

#[allow(clippy::too_many_arguments)]
fn path_open(
    mem: &mut [u8],
    sys: &mut dyn Syscalls,
    dirfd: Fd,
    path_ptr: u32,
    path_len: u32,
    oflags: i32,
    rights: i64,
    fdflags: i32,
    opened: u32,
) -> Result<(), Errno> {
    let path = read_str(mem, path_ptr, path_len)?;
    let flags = OpenFlags {
        create: oflags & OFLAGS_CREAT != 0,
        directory: oflags & OFLAGS_DIRECTORY != 0,
        exclusive: oflags & OFLAGS_EXCL != 0,
        truncate: oflags & OFLAGS_TRUNC != 0,
        append: fdflags & FDFLAGS_APPEND != 0,
        write: rights & RIGHTS_FD_WRITE != 0,
    };
    let fd = sys.open(dirfd, &path, flags)?;
    write_u32(mem, opened, fd)
}

fn file_offset(at: i64) -> Result<u64, Errno> {
    u64::try_from(at).map_err(|_| Errno::Inval)
}

fn whence(raw: i32) -> Result<Whence, Errno> {
    match raw {
        0 => Ok(Whence::Set),
        1 => Ok(Whence::Cur),
        2 => Ok(Whence::End),
        _ => Err(Errno::Inval),
    }
}

/// Register every supported preview 1 import on `linker`.
///
/// Modules importing anything else fail to instantiate.
pub fn add_to_linker(linker: &mut Linker<SyscallBindings>) -> anyhow::Result<()> {
    linker.func_wrap(WASI_MODULE, "args_get", |mut caller: Ctx<'_>, argv: i32, buf: i32| {
        with_memory(&mut caller, |mem, sys| {
            let args = sys.args().to_vec();
            write_string_table(mem, args, argv as u32, buf as u32)
        })
    })?;
    linker.func_wrap(WASI_MODULE, "args_sizes_get", |mut caller: Ctx<'_>, count: i32, size: i32| {
        with_memory(&mut caller, |mem, sys| {
            write_sizes(mem, sys.args(), count as u32, size as u32)
        })
    })?;
    linker.func_wrap(WASI_MODULE, "environ_get", |mut caller: Ctx<'_>, environ: i32, buf: i32| {
        with_memory(&mut caller, |mem, sys| {
            write_string_table(mem, env_strings(sys), environ as u32, buf as u32)
        })
    })?;
    linker.func_wrap(WASI_MODULE, "environ_sizes_get", |mut caller: Ctx<'_>, count: i32, size: i32| {
        with_memory(&mut caller, |mem, sys| {
            write_sizes(mem, env_strings(sys), count as u32, size as u32)
        })
    })?;

    linker.func_wrap(WASI_MODULE, "clock_res_get", |mut caller: Ctx<'_>, _id: i32, res: i32| {
        with_memory(&mut caller, |mem, _| write_u64(mem, res as u32, FIXED_CLOCK_NANOS))
    })?;
    linker.func_wrap(
        WASI_MODULE,
        "clock_time_get",
        |mut caller: Ctx<'_>, id: i32, _precision: i64, time: i32| {
            with_memory(&mut caller, |mem, sys| {
                write_u64(mem, time as u32, sys.clock_now(id as u32))
            })
        },
    )?;
    linker.func_wrap(WASI_MODULE, "random_get", |mut caller: Ctx<'_>, buf: i32, len: i32| {
        with_memory(&mut caller, |mem, sys| {
            sys.random_fill(slice_mut(mem, buf as u32, len as u32)?);
            Ok(())
        })
    })?;

    linker.func_wrap(
        WASI_MODULE,
        "fd_write",
        |mut caller: Ctx<'_>, fd: i32, iovs: i32, count: i32, written: i32| {
            with_memory(&mut caller, |mem, sys| {
                let data = gather(mem, iovs as u32, count as u32)?;
                let n = sys.write(fd as Fd, &data)?;
                write_u32(mem, written as u32, to_len(n)?)
            })
        },
    )?;
    linker.func_wrap(
        WASI_MODULE,
        "fd_pwrite",
        |mut caller: Ctx<'_>, fd: i32, iovs: i32, count: i32, at: i64, written: i32| {
            with_memory(&mut caller, |mem, sys| {
                let at = file_offset(at)?;
                let data = gather(mem, iovs as u32, count as u32)?;
                let n = sys.write_at(fd as Fd, &data, at)?;
                write_u32(mem, written as u32, to_len(n)?)
            })
        },
    )?;
    linker.func_wrap(
        WASI_MODULE,
        "fd_read",
        |mut caller: Ctx<'_>, fd: i32, iovs: i32, count: i32, nread: i32| {
            with_memory(&mut caller, |mem, sys| {
                fd_read(mem, sys, fd as Fd, iovs as u32, count as u32, nread as u32)
            })
        },
    )?;
    linker.func_wrap(
        WASI_MODULE,
        "fd_pread",
        |mut caller: Ctx<'_>, fd: i32, iovs: i32, count: i32, at: i64, nread: i32| {
            with_memory(&mut caller, |mem, sys| {
                let at = file_offset(at)?;
                fd_pread(mem, sys, fd as Fd, iovs as u32, count as u32, at, nread as u32)
            })
        },
    )?;
    linker.func_wrap(
        WASI_MODULE,
        "fd_seek",
        |mut caller: Ctx<'_>, fd: i32, delta: i64, raw_whence: i32, pos: i32| {
            with_memory(&mut caller, |mem, sys| {
                let new_pos = sys.seek(fd as Fd, delta, whence(raw_whence)?)?;
                write_u64(mem, pos as u32, new_pos)
            })
        },
    )?;
    linker.func_wrap(WASI_MODULE, "fd_tell", |mut caller: Ctx<'_>, fd: i32, pos: i32| {
        with_memory(&mut caller, |mem, sys| {
            let cur = sys.seek(fd as Fd, 0, Whence::Cur)?;
            write_u64(mem, pos as u32, cur)
        })
    })?;
    linker.func_wrap(WASI_MODULE, "fd_close", |mut caller: Ctx<'_>, fd: i32| {
        with_memory(&mut caller, |_, sys| sys.close(fd as Fd))
    })?;
    for name in ["fd_sync", "fd_datasync"] {
        linker.func_wrap(WASI_MODULE, name, |mut caller: Ctx<'_>, fd: i32| {
            with_memory(&mut caller, |_, sys| sys.fd_stat(fd as Fd).map(drop))
        })?;
    }
    linker.func_wrap(WASI_MODULE, "fd_fdstat_get", |mut caller: Ctx<'_>, fd: i32, ptr: i32| {
        with_memory(&mut caller, |mem, sys| fd_fdstat_get(mem, sys, fd as Fd, ptr as u32))
    })?;
    linker.func_wrap(WASI_MODULE, "fd_fdstat_set_flags", |mut caller: Ctx<'_>, fd: i32, _flags: i32| {
        with_memory(&mut caller, |_, sys| sys.fd_stat(fd as Fd).map(drop))
    })?;
    linker.func_wrap(WASI_MODULE, "fd_filestat_get", |mut caller: Ctx<'_>, fd: i32, ptr: i32| {
        with_memory(&mut caller, |mem, sys| {
            let stat = sys.fd_stat(fd as Fd)?;
            write_filestat(mem, ptr as u32, stat, sys.clock_now(0))
        })
    })?;
    linker.func_wrap(WASI_MODULE, "fd_filestat_set_size", |mut caller: Ctx<'_>, fd: i32, size: i64| {
        with_memory(&mut caller, |_, sys| {
            sys.truncate(fd as Fd, file_offset(size)?)
        })
    })?;
    linker.func_wrap(WASI_MODULE, "fd_prestat_get", |mut caller: Ctx<'_>, fd: i32, ptr: i32| {
        with_memory(&mut caller, |mem, sys| {
            let (_, guest) = sys
                .preopens()
                .into_iter()
                .find(|(pfd, _)| *pfd == fd as Fd)
                .ok_or(Errno::Badf)?;
            let out = slice_mut(mem, ptr as u32, 8)?;
            out.fill(0);
            out[0] = PREOPEN_TYPE_DIR;
            out[4..8].copy_from_slice(&to_len(guest.len())?.to_le_bytes());
            Ok(())
        })
    })?;
    linker.func_wrap(
        WASI_MODULE,
        "fd_prestat_dir_name",
        |mut caller: Ctx<'_>, fd: i32, ptr: i32, len: i32| {
            with_memory(&mut caller, |mem, sys| {
                let (_, guest) = sys
                    .preopens()
                    .into_iter()
                    .find(|(pfd, _)| *pfd == fd as Fd)
                    .ok_or(Errno::Badf)?;
                let n = guest.len().min(len as u32 as usize);
                slice_mut(mem, ptr as u32, to_len(n)?)?.copy_from_slice(&guest.as_bytes()[..n]);
                Ok(())
            })
        },
    )?;
    linker.func_wrap(
        WASI_MODULE,
        "fd_readdir",
        |mut caller: Ctx<'_>, fd: i32, buf: i32, len: i32, cookie: i64, used: i32| {
            with_memory(&mut caller, |mem, sys| {
                fd_readdir(mem, sys, fd as Fd, buf as u32, len as u32, cookie, used as u32)
            })
        },
    )?;

    linker.func_wrap(
        WASI_MODULE,
        "path_open",
        |mut caller: Ctx<'_>,
         dirfd: i32,
         _dirflags: i32,
         path: i32,
         path_len: i32,
         oflags: i32,
         rights: i64,
         _inheriting: i64,
         fdflags: i32,
         opened: i32| {
            with_memory(&mut caller, |mem, sys| {
                path_open(
                    mem,
                    sys,
                    dirfd as Fd,
                    path as u32,
                    path_len as u32,
                    oflags,
                    rights,
                    fdflags,
                    opened as u32,
                )
            })
        },
    )?;
    linker.func_wrap(
        WASI_MODULE,
        "path_filestat_get",
        |mut caller: Ctx<'_>, dirfd: i32, _flags: i32, path: i32, path_len: i32, ptr: i32| {
            with_memory(&mut caller, |mem, sys| {
                let path = read_str(mem, path as u32, path_len as u32)?;
                let stat = sys.path_stat(dirfd as Fd, &path)?;
                write_filestat(mem, ptr as u32, stat, sys.clock_now(0))
            })
        },
    )?;
    linker.func_wrap(
        WASI_MODULE,
        "path_create_directory",
        |mut caller: Ctx<'_>, dirfd: i32, path: i32, path_len: i32| {
            with_memory(&mut caller, |mem, sys| {
                let path = read_str(mem, path as u32, path_len as u32)?;
                sys.mkdir(dirfd as Fd, &path)
            })
        },
    )?;
    linker.func_wrap(
        WASI_MODULE,
        "path_unlink_file",
        |mut caller: Ctx<'_>, dirfd: i32, path: i32, path_len: i32| {
            with_memory(&mut caller, |mem, sys| {
                let path = read_str(mem, path as u32, path_len as u32)?;
                sys.unlink(dirfd as Fd, &path)
            })
        },
    )?;
    linker.func_wrap(
        WASI_MODULE,
        "path_remove_directory",
        |mut caller: Ctx<'_>, dirfd: i32, path: i32, path_len: i32| {
            with_memory(&mut caller, |mem, sys| {
                let path = read_str(mem, path as u32, path_len as u32)?;
                sys.rmdir(dirfd as Fd, &path)
            })
        },
    )?;
    linker.func_wrap(
        WASI_MODULE,
        "path_rename",
        |mut caller: Ctx<'_>,
         from_dir: i32,
         from: i32,
         from_len: i32,
         to_dir: i32,
         to: i32,
         to_len: i32| {
            with_memory(&mut caller, |mem, sys| {
                let from = read_str(mem, from as u32, from_len as u32)?;
                let to = read_str(mem, to as u32, to_len as u32)?;
                sys.rename(from_dir as Fd, &from, to_dir as Fd, &to)
            })
        },
    )?;

    linker.func_wrap(WASI_MODULE, "proc_exit", |mut caller: Ctx<'_>, code: i32| -> anyhow::Result<()> {
        Err(anyhow::Error::new(caller.data_mut().exit(code)))
    })?;
    linker.func_wrap(WASI_MODULE, "proc_raise", |mut caller: Ctx<'_>, signal: i32| -> anyhow::Result<i32> {
        Err(anyhow::Error::new(caller.data_mut().kill(signal)))
    })?;
    linker.func_wrap(WASI_MODULE, "sched_yield", |_caller: Ctx<'_>| -> i32 { 0 })?;
    linker.func_wrap(
        WASI_MODULE,
        "poll_oneoff",
        |_caller: Ctx<'_>, _subs: i32, _events: i32, _count: i32, _nevents: i32| -> i32 {
            Errno::Notsup.raw()
        },
    )?;

    Ok(())
}
