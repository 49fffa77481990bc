//! The built-in WASI (`wasi_snapshot_preview1`) host module.
//!
//! Constructed from command-line arguments, environment strings,
//! `GUEST:HOST` directory mappings and preopened paths. File descriptors
//! are rooted at the preopens; paths escaping every preopened root are
//! rejected with `ENOTCAPABLE`. `proc_exit` records the exit code and
//! traps `Terminated`, which the result predicate treats as success.

use crate::import::ImportObject;
use crate::interpreter::HostContext;
use crate::memory::MemoryInstance;
use crate::trap::Trap;
use crate::types::{FuncType, ValType};
use crate::values::Value;
use hashbrown::HashMap;
use log::{debug, error};
use std::cell::RefCell;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};
use std::rc::Rc;
use std::sync::OnceLock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

pub const WASI_MODULE_NAME: &str = "wasi_snapshot_preview1";

// The errno subset this module produces.
const ERRNO_SUCCESS: i32 = 0;
const ERRNO_BADF: i32 = 8;
const ERRNO_INVAL: i32 = 28;
const ERRNO_IO: i32 = 29;
const ERRNO_NOENT: i32 = 44;
const ERRNO_NOTDIR: i32 = 54;
const ERRNO_NOTCAPABLE: i32 = 76;

// oflags
const OFLAGS_CREAT: i32 = 1;
const OFLAGS_DIRECTORY: i32 = 2;
const OFLAGS_EXCL: i32 = 4;
const OFLAGS_TRUNC: i32 = 8;

// rights
const RIGHTS_FD_READ: u64 = 1 << 1;
const RIGHTS_FD_WRITE: u64 = 1 << 6;

// fdflags
const FDFLAGS_APPEND: i32 = 1;

// filetype
const FILETYPE_CHARACTER_DEVICE: u8 = 2;
const FILETYPE_DIRECTORY: u8 = 3;
const FILETYPE_REGULAR_FILE: u8 = 4;

#[derive(Debug)]
enum FdEntry {
    Stdin,
    Stdout,
    Stderr,
    File(File),
    /// A preopened directory root, advertised through `fd_prestat_*`.
    Preopen {
        guest: String,
        host: PathBuf,
    },
    /// A directory opened through `path_open`.
    Dir(PathBuf),
}

#[derive(Debug)]
struct WasiCtx {
    args: Vec<String>,
    envs: Vec<String>,
    fds: HashMap<u32, FdEntry>,
    next_fd: u32,
    exit_code: Option<u32>,
}

impl WasiCtx {
    fn alloc_fd(&mut self, entry: FdEntry) -> u32 {
        let fd = self.next_fd;
        self.next_fd += 1;
        self.fds.insert(fd, entry);
        fd
    }
}

/// The WASI host module. Keeps the context alive across registration so
/// the exit code stays observable after the import object moved into the
/// store.
pub struct WasiModule {
    ctx: Rc<RefCell<WasiCtx>>,
}

impl WasiModule {
    /// Build a WASI context from arguments, `KEY=VALUE` environment
    /// strings, `GUEST:HOST` directory mappings, and preopened paths
    /// (mapped to themselves).
    pub fn create(args: &[&str], envs: &[&str], dirs: &[&str], preopens: &[&str]) -> Self {
        let mut fds = HashMap::new();
        fds.insert(0, FdEntry::Stdin);
        fds.insert(1, FdEntry::Stdout);
        fds.insert(2, FdEntry::Stderr);

        let mut ctx = WasiCtx {
            args: args.iter().map(|s| s.to_string()).collect(),
            envs: envs.iter().map(|s| s.to_string()).collect(),
            fds,
            next_fd: 3,
            exit_code: None,
        };
        for mapping in dirs {
            match mapping.split_once(':') {
                Some((guest, host)) => {
                    ctx.alloc_fd(FdEntry::Preopen {
                        guest: guest.to_string(),
                        host: PathBuf::from(host),
                    });
                }
                None => error!("ignoring malformed dir mapping {mapping:?}"),
            }
        }
        for path in preopens {
            ctx.alloc_fd(FdEntry::Preopen {
                guest: path.to_string(),
                host: PathBuf::from(path),
            });
        }
        debug!(
            "wasi context: {} args, {} envs, {} preopens",
            ctx.args.len(),
            ctx.envs.len(),
            ctx.next_fd - 3
        );

        Self {
            ctx: Rc::new(RefCell::new(ctx)),
        }
    }

    /// Re-initialize the context in place. The registered host functions
    /// share it, so no re-registration is needed.
    pub fn init(&self, args: &[&str], envs: &[&str], dirs: &[&str], preopens: &[&str]) {
        let fresh = Self::create(args, envs, dirs, preopens);
        self.ctx.swap(&fresh.ctx);
    }

    /// The exit code recorded by `proc_exit`; 0 when the guest never
    /// called it.
    pub fn exit_code(&self) -> u32 {
        self.ctx.borrow().exit_code.unwrap_or(0)
    }

    /// Build the import object publishing the host functions. May be
    /// called again after a store reset dropped the previous registration.
    pub fn import_object(&self) -> ImportObject {
        use ValType::{I32, I64};
        let mut import = ImportObject::new(WASI_MODULE_NAME);

        let ctx = self.ctx.clone();
        import.add_func(
            "args_sizes_get",
            FuncType::new([I32, I32], [I32]),
            move |hc: &mut HostContext<'_>, args: &[Value]| {
                let ctx = ctx.borrow();
                let count = ctx.args.len() as u32;
                let size: u32 = ctx.args.iter().map(|a| a.len() as u32 + 1).sum();
                let mem = memory(hc)?;
                write_u32(mem, args[0].unwrap_i32() as u32, count)?;
                write_u32(mem, args[1].unwrap_i32() as u32, size)?;
                Ok(vec![Value::I32(ERRNO_SUCCESS)])
            },
        );

        let ctx = self.ctx.clone();
        import.add_func(
            "args_get",
            FuncType::new([I32, I32], [I32]),
            move |hc: &mut HostContext<'_>, args: &[Value]| {
                let ctx = ctx.borrow();
                write_string_list(
                    memory(hc)?,
                    &ctx.args,
                    args[0].unwrap_i32() as u32,
                    args[1].unwrap_i32() as u32,
                )?;
                Ok(vec![Value::I32(ERRNO_SUCCESS)])
            },
        );

        let ctx = self.ctx.clone();
        import.add_func(
            "environ_sizes_get",
            FuncType::new([I32, I32], [I32]),
            move |hc: &mut HostContext<'_>, args: &[Value]| {
                let ctx = ctx.borrow();
                let count = ctx.envs.len() as u32;
                let size: u32 = ctx.envs.iter().map(|e| e.len() as u32 + 1).sum();
                let mem = memory(hc)?;
                write_u32(mem, args[0].unwrap_i32() as u32, count)?;
                write_u32(mem, args[1].unwrap_i32() as u32, size)?;
                Ok(vec![Value::I32(ERRNO_SUCCESS)])
            },
        );

        let ctx = self.ctx.clone();
        import.add_func(
            "environ_get",
            FuncType::new([I32, I32], [I32]),
            move |hc: &mut HostContext<'_>, args: &[Value]| {
                let ctx = ctx.borrow();
                write_string_list(
                    memory(hc)?,
                    &ctx.envs,
                    args[0].unwrap_i32() as u32,
                    args[1].unwrap_i32() as u32,
                )?;
                Ok(vec![Value::I32(ERRNO_SUCCESS)])
            },
        );

        import.add_func(
            "clock_time_get",
            FuncType::new([I32, I64, I32], [I32]),
            |hc: &mut HostContext<'_>, args: &[Value]| {
                let id = args[0].unwrap_i32();
                let out = args[2].unwrap_i32() as u32;
                let nanos = match id {
                    // realtime
                    0 => SystemTime::now()
                        .duration_since(UNIX_EPOCH)
                        .map(|d| d.as_nanos() as u64)
                        .unwrap_or(0),
                    // monotonic and the cputime clocks
                    _ => monotonic_base().elapsed().as_nanos() as u64,
                };
                write_u64(memory(hc)?, out, nanos)?;
                Ok(vec![Value::I32(ERRNO_SUCCESS)])
            },
        );

        import.add_func(
            "clock_res_get",
            FuncType::new([I32, I32], [I32]),
            |hc: &mut HostContext<'_>, args: &[Value]| {
                let id = args[0].unwrap_i32();
                let resolution: u64 = if id == 0 { 1000 } else { 1 };
                write_u64(memory(hc)?, args[1].unwrap_i32() as u32, resolution)?;
                Ok(vec![Value::I32(ERRNO_SUCCESS)])
            },
        );

        let ctx = self.ctx.clone();
        import.add_func(
            "fd_close",
            FuncType::new([I32], [I32]),
            move |_hc: &mut HostContext<'_>, args: &[Value]| {
                let fd = args[0].unwrap_i32() as u32;
                let mut ctx = ctx.borrow_mut();
                let errno = match ctx.fds.get(&fd) {
                    Some(FdEntry::Stdin | FdEntry::Stdout | FdEntry::Stderr) => ERRNO_SUCCESS,
                    Some(_) => {
                        ctx.fds.remove(&fd);
                        ERRNO_SUCCESS
                    }
                    None => ERRNO_BADF,
                };
                Ok(vec![Value::I32(errno)])
            },
        );

        let ctx = self.ctx.clone();
        import.add_func(
            "fd_fdstat_get",
            FuncType::new([I32, I32], [I32]),
            move |hc: &mut HostContext<'_>, args: &[Value]| {
                let fd = args[0].unwrap_i32() as u32;
                let buf = args[1].unwrap_i32() as u32;
                let ctx = ctx.borrow();
                let Some(entry) = ctx.fds.get(&fd) else {
                    return Ok(vec![Value::I32(ERRNO_BADF)]);
                };
                let (filetype, rights) = match entry {
                    FdEntry::Stdin => (FILETYPE_CHARACTER_DEVICE, RIGHTS_FD_READ),
                    FdEntry::Stdout | FdEntry::Stderr => {
                        (FILETYPE_CHARACTER_DEVICE, RIGHTS_FD_WRITE)
                    }
                    FdEntry::File(_) => (FILETYPE_REGULAR_FILE, RIGHTS_FD_READ | RIGHTS_FD_WRITE),
                    FdEntry::Preopen { .. } | FdEntry::Dir(_) => (FILETYPE_DIRECTORY, !0),
                };
                let mem = memory(hc)?;
                let mut stat = [0u8; 24];
                stat[0] = filetype;
                stat[8..16].copy_from_slice(&rights.to_le_bytes());
                stat[16..24].copy_from_slice(&rights.to_le_bytes());
                mem.store(u64::from(buf), &stat)
                    .map_err(|_| Trap::MemoryOutOfBounds)?;
                Ok(vec![Value::I32(ERRNO_SUCCESS)])
            },
        );

        let ctx = self.ctx.clone();
        import.add_func(
            "fd_prestat_get",
            FuncType::new([I32, I32], [I32]),
            move |hc: &mut HostContext<'_>, args: &[Value]| {
                let fd = args[0].unwrap_i32() as u32;
                let buf = args[1].unwrap_i32() as u32;
                let ctx = ctx.borrow();
                match ctx.fds.get(&fd) {
                    Some(FdEntry::Preopen { guest, .. }) => {
                        let mem = memory(hc)?;
                        // preopen tag 0 (dir) + name length
                        write_u32(mem, buf, 0)?;
                        write_u32(mem, buf + 4, guest.len() as u32)?;
                        Ok(vec![Value::I32(ERRNO_SUCCESS)])
                    }
                    Some(_) | None => Ok(vec![Value::I32(ERRNO_BADF)]),
                }
            },
        );

        let ctx = self.ctx.clone();
        import.add_func(
            "fd_prestat_dir_name",
            FuncType::new([I32, I32, I32], [I32]),
            move |hc: &mut HostContext<'_>, args: &[Value]| {
                let fd = args[0].unwrap_i32() as u32;
                let ptr = args[1].unwrap_i32() as u32;
                let len = args[2].unwrap_i32() as u32;
                let ctx = ctx.borrow();
                match ctx.fds.get(&fd) {
                    Some(FdEntry::Preopen { guest, .. }) => {
                        if (guest.len() as u32) > len {
                            return Ok(vec![Value::I32(ERRNO_INVAL)]);
                        }
                        memory(hc)?
                            .store(u64::from(ptr), guest.as_bytes())
                            .map_err(|_| Trap::MemoryOutOfBounds)?;
                        Ok(vec![Value::I32(ERRNO_SUCCESS)])
                    }
                    Some(_) | None => Ok(vec![Value::I32(ERRNO_BADF)]),
                }
            },
        );

        let ctx = self.ctx.clone();
        import.add_func(
            "fd_read",
            FuncType::new([I32, I32, I32, I32], [I32]),
            move |hc: &mut HostContext<'_>, args: &[Value]| {
                let fd = args[0].unwrap_i32() as u32;
                let iovs = args[1].unwrap_i32() as u32;
                let iovs_len = args[2].unwrap_i32() as u32;
                let nread_ptr = args[3].unwrap_i32() as u32;

                let vecs = read_iovecs(memory(hc)?, iovs, iovs_len)?;
                let mut ctx = ctx.borrow_mut();
                let mut total: u32 = 0;
                let mut errno = ERRNO_SUCCESS;
                for (ptr, len) in vecs {
                    let mut buf = vec![0u8; len as usize];
                    let n = match ctx.fds.get_mut(&fd) {
                        Some(FdEntry::Stdin) => match std::io::stdin().read(&mut buf) {
                            Ok(n) => n,
                            Err(_) => {
                                errno = ERRNO_IO;
                                break;
                            }
                        },
                        Some(FdEntry::File(file)) => match file.read(&mut buf) {
                            Ok(n) => n,
                            Err(_) => {
                                errno = ERRNO_IO;
                                break;
                            }
                        },
                        Some(_) => {
                            errno = ERRNO_BADF;
                            break;
                        }
                        None => {
                            errno = ERRNO_BADF;
                            break;
                        }
                    };
                    memory(hc)?
                        .store(u64::from(ptr), &buf[..n])
                        .map_err(|_| Trap::MemoryOutOfBounds)?;
                    total += n as u32;
                    if n < len as usize {
                        break;
                    }
                }
                write_u32(memory(hc)?, nread_ptr, total)?;
                Ok(vec![Value::I32(errno)])
            },
        );

        let ctx = self.ctx.clone();
        import.add_func(
            "fd_write",
            FuncType::new([I32, I32, I32, I32], [I32]),
            move |hc: &mut HostContext<'_>, args: &[Value]| {
                let fd = args[0].unwrap_i32() as u32;
                let iovs = args[1].unwrap_i32() as u32;
                let iovs_len = args[2].unwrap_i32() as u32;
                let nwritten_ptr = args[3].unwrap_i32() as u32;

                let vecs = read_iovecs(memory(hc)?, iovs, iovs_len)?;
                let mut data = Vec::new();
                for (ptr, len) in &vecs {
                    let mem = memory(hc)?;
                    let chunk = mem
                        .slice(*ptr, *len)
                        .map_err(|_| Trap::MemoryOutOfBounds)?;
                    data.extend_from_slice(chunk);
                }
                let mut ctx = ctx.borrow_mut();
                let errno = match ctx.fds.get_mut(&fd) {
                    Some(FdEntry::Stdout) => std::io::stdout()
                        .write_all(&data)
                        .map_or(ERRNO_IO, |_| ERRNO_SUCCESS),
                    Some(FdEntry::Stderr) => std::io::stderr()
                        .write_all(&data)
                        .map_or(ERRNO_IO, |_| ERRNO_SUCCESS),
                    Some(FdEntry::File(file)) => {
                        file.write_all(&data).map_or(ERRNO_IO, |_| ERRNO_SUCCESS)
                    }
                    Some(_) | None => ERRNO_BADF,
                };
                let written = if errno == ERRNO_SUCCESS {
                    data.len() as u32
                } else {
                    0
                };
                write_u32(memory(hc)?, nwritten_ptr, written)?;
                Ok(vec![Value::I32(errno)])
            },
        );

        let ctx = self.ctx.clone();
        import.add_func(
            "fd_seek",
            FuncType::new([I32, I64, I32, I32], [I32]),
            move |hc: &mut HostContext<'_>, args: &[Value]| {
                let fd = args[0].unwrap_i32() as u32;
                let offset = args[1].unwrap_i64();
                let whence = args[2].unwrap_i32();
                let out = args[3].unwrap_i32() as u32;
                let mut ctx = ctx.borrow_mut();
                let pos = match whence {
                    0 => SeekFrom::Start(offset as u64),
                    1 => SeekFrom::Current(offset),
                    2 => SeekFrom::End(offset),
                    _ => return Ok(vec![Value::I32(ERRNO_INVAL)]),
                };
                let errno = match ctx.fds.get_mut(&fd) {
                    Some(FdEntry::File(file)) => match file.seek(pos) {
                        Ok(new_pos) => {
                            write_u64(memory(hc)?, out, new_pos)?;
                            ERRNO_SUCCESS
                        }
                        Err(_) => ERRNO_IO,
                    },
                    Some(_) | None => ERRNO_BADF,
                };
                Ok(vec![Value::I32(errno)])
            },
        );

        let ctx = self.ctx.clone();
        import.add_func(
            "path_open",
            FuncType::new([I32, I32, I32, I32, I32, I64, I64, I32, I32], [I32]),
            move |hc: &mut HostContext<'_>, args: &[Value]| {
                let dirfd = args[0].unwrap_i32() as u32;
                let path_ptr = args[2].unwrap_i32() as u32;
                let path_len = args[3].unwrap_i32() as u32;
                let oflags = args[4].unwrap_i32();
                let rights_base = args[5].unwrap_i64() as u64;
                let fdflags = args[7].unwrap_i32();
                let out_fd_ptr = args[8].unwrap_i32() as u32;

                let path = {
                    let mem = memory(hc)?;
                    let bytes = mem
                        .slice(path_ptr, path_len)
                        .map_err(|_| Trap::MemoryOutOfBounds)?;
                    match core::str::from_utf8(bytes) {
                        Ok(s) => s.to_owned(),
                        Err(_) => return Ok(vec![Value::I32(ERRNO_INVAL)]),
                    }
                };

                let mut ctx = ctx.borrow_mut();
                let base = match ctx.fds.get(&dirfd) {
                    Some(FdEntry::Preopen { host, .. }) => host.clone(),
                    Some(FdEntry::Dir(host)) => host.clone(),
                    Some(_) => return Ok(vec![Value::I32(ERRNO_NOTDIR)]),
                    None => return Ok(vec![Value::I32(ERRNO_BADF)]),
                };
                let host_path = match resolve_path(&base, &path) {
                    Ok(p) => p,
                    Err(errno) => return Ok(vec![Value::I32(errno)]),
                };

                if oflags & OFLAGS_DIRECTORY != 0 {
                    if !host_path.is_dir() {
                        return Ok(vec![Value::I32(ERRNO_NOTDIR)]);
                    }
                    let fd = ctx.alloc_fd(FdEntry::Dir(host_path));
                    write_u32(memory(hc)?, out_fd_ptr, fd)?;
                    return Ok(vec![Value::I32(ERRNO_SUCCESS)]);
                }

                let mut options = OpenOptions::new();
                options
                    .read(rights_base & RIGHTS_FD_READ != 0 || rights_base == 0)
                    .write(rights_base & RIGHTS_FD_WRITE != 0)
                    .append(fdflags & FDFLAGS_APPEND != 0)
                    .create(oflags & OFLAGS_CREAT != 0)
                    .truncate(oflags & OFLAGS_TRUNC != 0);
                if oflags & OFLAGS_CREAT != 0 && oflags & OFLAGS_EXCL != 0 {
                    options.create_new(true);
                }
                match options.open(&host_path) {
                    Ok(file) => {
                        let fd = ctx.alloc_fd(FdEntry::File(file));
                        write_u32(memory(hc)?, out_fd_ptr, fd)?;
                        Ok(vec![Value::I32(ERRNO_SUCCESS)])
                    }
                    Err(err) => {
                        debug!("path_open {host_path:?} failed: {err}");
                        let errno = match err.kind() {
                            std::io::ErrorKind::NotFound => ERRNO_NOENT,
                            _ => ERRNO_IO,
                        };
                        Ok(vec![Value::I32(errno)])
                    }
                }
            },
        );

        import.add_func(
            "random_get",
            FuncType::new([I32, I32], [I32]),
            |hc: &mut HostContext<'_>, args: &[Value]| {
                let ptr = args[0].unwrap_i32() as u32;
                let len = args[1].unwrap_i32() as u32;
                let mut buf = vec![0u8; len as usize];
                if getrandom::getrandom(&mut buf).is_err() {
                    return Ok(vec![Value::I32(ERRNO_IO)]);
                }
                memory(hc)?
                    .store(u64::from(ptr), &buf)
                    .map_err(|_| Trap::MemoryOutOfBounds)?;
                Ok(vec![Value::I32(ERRNO_SUCCESS)])
            },
        );

        let ctx = self.ctx.clone();
        import.add_func(
            "proc_exit",
            FuncType::new([I32], []),
            move |_hc: &mut HostContext<'_>, args: &[Value]| {
                let code = args[0].unwrap_i32() as u32;
                ctx.borrow_mut().exit_code = Some(code);
                debug!("proc_exit({code})");
                Err(Trap::Terminated)
            },
        );

        import
    }
}

fn monotonic_base() -> &'static Instant {
    static BASE: OnceLock<Instant> = OnceLock::new();
    BASE.get_or_init(Instant::now)
}

fn memory<'a>(hc: &'a mut HostContext<'_>) -> Result<&'a mut MemoryInstance, Trap> {
    hc.memory().ok_or_else(|| {
        error!("wasi host function called without a caller memory");
        Trap::HostFunctionFailed
    })
}

fn write_u32(mem: &mut MemoryInstance, ptr: u32, value: u32) -> Result<(), Trap> {
    mem.store(u64::from(ptr), &value.to_le_bytes())
        .map_err(|_| Trap::MemoryOutOfBounds)
}

fn write_u64(mem: &mut MemoryInstance, ptr: u32, value: u64) -> Result<(), Trap> {
    mem.store(u64::from(ptr), &value.to_le_bytes())
        .map_err(|_| Trap::MemoryOutOfBounds)
}

/// Read an iovec array `{ptr, len}` from guest memory.
fn read_iovecs(
    mem: &MemoryInstance,
    iovs: u32,
    iovs_len: u32,
) -> Result<Vec<(u32, u32)>, Trap> {
    let mut vecs = Vec::with_capacity(iovs_len.min(64) as usize);
    for i in 0..iovs_len {
        let base = u64::from(iovs) + u64::from(i) * 8;
        let ptr = u32::from_le_bytes(mem.load::<4>(base).map_err(|_| Trap::MemoryOutOfBounds)?);
        let len =
            u32::from_le_bytes(mem.load::<4>(base + 4).map_err(|_| Trap::MemoryOutOfBounds)?);
        vecs.push((ptr, len));
    }
    Ok(vecs)
}

/// Write a NUL-terminated string list in the `args_get`/`environ_get`
/// layout: an array of pointers, then the packed bytes.
fn write_string_list(
    mem: &mut MemoryInstance,
    strings: &[String],
    ptrs: u32,
    buf: u32,
) -> Result<(), Trap> {
    let mut cursor = buf;
    for (i, s) in strings.iter().enumerate() {
        write_u32(mem, ptrs + i as u32 * 4, cursor)?;
        mem.store(u64::from(cursor), s.as_bytes())
            .map_err(|_| Trap::MemoryOutOfBounds)?;
        mem.store(u64::from(cursor) + s.len() as u64, &[0])
            .map_err(|_| Trap::MemoryOutOfBounds)?;
        cursor += s.len() as u32 + 1;
    }
    Ok(())
}

/// Resolve a guest path against a preopened root, rejecting absolute
/// paths and any `..` that would escape the root.
fn resolve_path(base: &Path, guest: &str) -> Result<PathBuf, i32> {
    let mut out = base.to_path_buf();
    let mut depth: u32 = 0;
    for component in Path::new(guest).components() {
        match component {
            Component::Normal(part) => {
                out.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return Err(ERRNO_NOTCAPABLE);
                }
                out.pop();
                depth -= 1;
            }
            Component::RootDir | Component::Prefix(_) => return Err(ERRNO_NOTCAPABLE),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_cannot_escape_the_preopen_root() {
        let base = Path::new("/srv/data");
        assert_eq!(
            resolve_path(base, "a/b.txt").unwrap(),
            PathBuf::from("/srv/data/a/b.txt")
        );
        assert_eq!(
            resolve_path(base, "a/../b.txt").unwrap(),
            PathBuf::from("/srv/data/b.txt")
        );
        assert_eq!(resolve_path(base, "../etc/passwd"), Err(ERRNO_NOTCAPABLE));
        assert_eq!(resolve_path(base, "a/../../etc"), Err(ERRNO_NOTCAPABLE));
        assert_eq!(resolve_path(base, "/etc/passwd"), Err(ERRNO_NOTCAPABLE));
    }

    #[test]
    fn exit_code_defaults_to_zero() {
        let wasi = WasiModule::create(&[], &[], &[], &[]);
        assert_eq!(wasi.exit_code(), 0);
        wasi.ctx.borrow_mut().exit_code = Some(7);
        assert_eq!(wasi.exit_code(), 7);
    }
}
