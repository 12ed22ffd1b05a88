//! Loaded into every victim via `LD_PRELOAD`. The constructor resolves the
//! wrapped libc entries through the dynamic linker, opens the coverage (and,
//! behind `shm-stdin`, input) shared-memory segments, and — when both
//! forkserver descriptors are valid — runs the forkserver loop itself
//! instead of returning control to the target's `main`.

use std::ffi::CString;
use std::os::raw::{c_char, c_int, c_void};
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use ctor::ctor;
use libc::{size_t, ssize_t};

const CMD_FD: c_int = 198;
const INFO_FD: c_int = 199;
const MEMFD_FD: c_int = 200;

const CMD_RUN: u8 = b'R';
const CMD_QUIT: u8 = b'Q';
const CMD_TEST: u8 = b'T';

/// Sentinel wait status the forkserver driver recognises as a timeout kill.
const TIMEOUT_STATUS: i32 = 0x7FFF_FFFF;

const DEFAULT_SHM_SIZE: usize = 1 << 20;
const DEFAULT_COV_SIZE: usize = 1 << 16;

/// Per-test-case wall-clock budget; the reviewed source only checks the
/// outer run deadline, not a per-case one, so there is no existing value
/// to inherit. `FUZZER_CASE_TIMEOUT_MS` overrides it.
const DEFAULT_CASE_TIMEOUT_MS: u64 = 2000;

static COV_BASE: AtomicPtr<u8> = AtomicPtr::new(std::ptr::null_mut());
static COV_SIZE: AtomicUsize = AtomicUsize::new(0);

#[cfg(feature = "shm-stdin")]
static INPUT_BASE: AtomicPtr<u8> = AtomicPtr::new(std::ptr::null_mut());
#[cfg(feature = "shm-stdin")]
static INPUT_SIZE: AtomicUsize = AtomicUsize::new(0);
#[cfg(feature = "shm-stdin")]
static INPUT_OFFSET: AtomicUsize = AtomicUsize::new(0);

macro_rules! real_symbol {
    ($name:ident) => {
        static $name: AtomicPtr<c_void> = AtomicPtr::new(std::ptr::null_mut());
    };
}

real_symbol!(REAL_READ);
real_symbol!(REAL_WRITE);
real_symbol!(REAL_OPEN);
real_symbol!(REAL_OPENAT);
real_symbol!(REAL_MMAP);
real_symbol!(REAL_MALLOC);
real_symbol!(REAL_FREE);
real_symbol!(REAL_CALLOC);
real_symbol!(REAL_REALLOC);
real_symbol!(REAL_CLOSE);
real_symbol!(REAL_MEMCPY);
real_symbol!(REAL_MEMSET);
real_symbol!(REAL_STRDUP);
real_symbol!(REAL_GETENV);
real_symbol!(REAL_STRCPY);
real_symbol!(REAL_STRNCPY);
real_symbol!(REAL_SPRINTF);
real_symbol!(REAL_SNPRINTF);

const WRAPPED_SYMBOLS: &[(&str, &AtomicPtr<c_void>)] = &[
    ("read", &REAL_READ),
    ("write", &REAL_WRITE),
    ("open", &REAL_OPEN),
    ("openat", &REAL_OPENAT),
    ("mmap", &REAL_MMAP),
    ("malloc", &REAL_MALLOC),
    ("free", &REAL_FREE),
    ("calloc", &REAL_CALLOC),
    ("realloc", &REAL_REALLOC),
    ("close", &REAL_CLOSE),
    ("memcpy", &REAL_MEMCPY),
    ("memset", &REAL_MEMSET),
    ("strdup", &REAL_STRDUP),
    ("getenv", &REAL_GETENV),
    ("strcpy", &REAL_STRCPY),
    ("strncpy", &REAL_STRNCPY),
    ("sprintf", &REAL_SPRINTF),
    ("snprintf", &REAL_SNPRINTF),
];

/// Resolves every wrapped symbol through `RTLD_NEXT`. Aborts the process
/// with exit code 127 if any is missing — a victim whose libc doesn't
/// export one of these has nothing sane to fall back to.
unsafe fn resolve_all() {
    for (name, slot) in WRAPPED_SYMBOLS {
        let cname = CString::new(*name).expect("symbol name has no interior nul");
        let sym = libc::dlsym(libc::RTLD_NEXT, cname.as_ptr());
        if sym.is_null() {
            libc::_exit(127);
        }
        slot.store(sym, Ordering::Relaxed);
    }
}

fn env_usize(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Opens a POSIX shared-memory object by name and maps it, returning the
/// base pointer. Returns null if the env var naming it is absent or the
/// open/mmap fails — a missing segment just means that feature is inert.
unsafe fn open_shm(name_var: &str, size_var: &str, default_size: usize, writable: bool) -> (*mut u8, usize) {
    let Ok(name) = std::env::var(name_var) else {
        return (std::ptr::null_mut(), 0);
    };
    let size = env_usize(size_var, default_size);

    let oflag = if writable {
        nix::fcntl::OFlag::O_RDWR
    } else {
        nix::fcntl::OFlag::O_RDONLY
    };
    let Ok(fd) = nix::sys::mman::shm_open(name.as_str(), oflag, nix::sys::stat::Mode::empty())
    else {
        return (std::ptr::null_mut(), 0);
    };

    let prot = if writable {
        nix::sys::mman::ProtFlags::PROT_READ | nix::sys::mman::ProtFlags::PROT_WRITE
    } else {
        nix::sys::mman::ProtFlags::PROT_READ
    };
    let Some(len) = std::num::NonZeroUsize::new(size) else {
        return (std::ptr::null_mut(), 0);
    };
    // `fd` (an OwnedFd) is consumed here; the mapping survives the
    // descriptor closing once mmap returns, the usual mmap-then-close idiom.
    let map = nix::sys::mman::mmap(
        None,
        len,
        prot,
        nix::sys::mman::MapFlags::MAP_SHARED,
        fd,
        0,
    );
    match map {
        Ok(ptr) => (ptr.as_ptr() as *mut u8, size),
        Err(_) => (std::ptr::null_mut(), 0),
    }
}

/// `idx = (return_address_of_caller >> 4) mod bitmap_size`, incremented
/// with byte-wraparound. A no-op when no coverage segment was mapped.
fn mark_coverage() {
    let base = COV_BASE.load(Ordering::Relaxed);
    let size = COV_SIZE.load(Ordering::Relaxed);
    if base.is_null() || size == 0 {
        return;
    }

    let mut depth = 0u32;
    let mut call_site = 0usize;
    backtrace::trace(|frame| {
        depth += 1;
        // depth 1: mark_coverage itself. depth 2: the wrapper (read/write/…).
        // depth 3: the call site inside the target that invoked it.
        if depth == 3 {
            call_site = frame.ip() as usize;
            false
        } else {
            true
        }
    });
    if call_site == 0 {
        return;
    }

    let idx = (call_site >> 4) % size;
    unsafe {
        let cell = base.add(idx);
        *cell = (*cell).wrapping_add(1);
    }
}

macro_rules! real_fn {
    ($slot:expr, $ty:ty) => {
        std::mem::transmute::<*mut c_void, $ty>($slot.load(Ordering::Relaxed))
    };
}

#[no_mangle]
pub unsafe extern "C" fn read(fd: c_int, buf: *mut c_void, count: size_t) -> ssize_t {
    mark_coverage();

    #[cfg(feature = "shm-stdin")]
    if fd == libc::STDIN_FILENO {
        if let Some(n) = shm_stdin_read(buf, count) {
            return n;
        }
    }

    let real = real_fn!(REAL_READ, extern "C" fn(c_int, *mut c_void, size_t) -> ssize_t);
    real(fd, buf, count)
}

/// Services a standard-input read directly out of the input shared-memory
/// segment, whose layout is `[4-byte little-endian length][payload bytes]`.
/// Returns `None` when no segment is mapped, leaving the call to fall
/// through to the real `read`.
#[cfg(feature = "shm-stdin")]
unsafe fn shm_stdin_read(buf: *mut c_void, count: size_t) -> Option<ssize_t> {
    let base = INPUT_BASE.load(Ordering::Relaxed);
    if base.is_null() {
        return None;
    }
    let mapped_size = INPUT_SIZE.load(Ordering::Relaxed);
    if mapped_size < 4 {
        return Some(0);
    }

    let len_bytes = std::slice::from_raw_parts(base, 4);
    let payload_len = u32::from_le_bytes(len_bytes.try_into().unwrap()) as usize;
    let payload_len = payload_len.min(mapped_size - 4);

    let offset = INPUT_OFFSET.load(Ordering::Relaxed);
    if offset >= payload_len {
        return Some(0);
    }

    let remaining = payload_len - offset;
    let n = remaining.min(count);
    std::ptr::copy_nonoverlapping(base.add(4 + offset), buf as *mut u8, n);
    INPUT_OFFSET.store(offset + n, Ordering::Relaxed);
    Some(n as ssize_t)
}

#[no_mangle]
pub unsafe extern "C" fn write(fd: c_int, buf: *const c_void, count: size_t) -> ssize_t {
    mark_coverage();
    let real = real_fn!(REAL_WRITE, extern "C" fn(c_int, *const c_void, size_t) -> ssize_t);
    real(fd, buf, count)
}

#[no_mangle]
pub unsafe extern "C" fn open(path: *const c_char, flags: c_int, mode: libc::mode_t) -> c_int {
    mark_coverage();
    // `open` is variadic in libc but stable Rust cannot define a variadic
    // extern "C" fn. The third register-passed argument is forwarded
    // unconditionally; a two-argument caller leaves the same garbage in
    // that register that the real open() would itself have seen.
    let real = real_fn!(REAL_OPEN, extern "C" fn(*const c_char, c_int, libc::mode_t) -> c_int);
    real(path, flags, mode)
}

#[no_mangle]
pub unsafe extern "C" fn openat(
    dirfd: c_int,
    path: *const c_char,
    flags: c_int,
    mode: libc::mode_t,
) -> c_int {
    mark_coverage();
    let real = real_fn!(
        REAL_OPENAT,
        extern "C" fn(c_int, *const c_char, c_int, libc::mode_t) -> c_int
    );
    real(dirfd, path, flags, mode)
}

#[no_mangle]
pub unsafe extern "C" fn mmap(
    addr: *mut c_void,
    len: size_t,
    prot: c_int,
    flags: c_int,
    fd: c_int,
    offset: libc::off_t,
) -> *mut c_void {
    mark_coverage();
    let real = real_fn!(
        REAL_MMAP,
        extern "C" fn(*mut c_void, size_t, c_int, c_int, c_int, libc::off_t) -> *mut c_void
    );
    real(addr, len, prot, flags, fd, offset)
}

#[no_mangle]
pub unsafe extern "C" fn malloc(size: size_t) -> *mut c_void {
    mark_coverage();
    let real = real_fn!(REAL_MALLOC, extern "C" fn(size_t) -> *mut c_void);
    real(size)
}

#[no_mangle]
pub unsafe extern "C" fn free(ptr: *mut c_void) {
    mark_coverage();
    let real = real_fn!(REAL_FREE, extern "C" fn(*mut c_void));
    real(ptr)
}

#[no_mangle]
pub unsafe extern "C" fn calloc(nmemb: size_t, size: size_t) -> *mut c_void {
    mark_coverage();
    let real = real_fn!(REAL_CALLOC, extern "C" fn(size_t, size_t) -> *mut c_void);
    real(nmemb, size)
}

#[no_mangle]
pub unsafe extern "C" fn realloc(ptr: *mut c_void, size: size_t) -> *mut c_void {
    mark_coverage();
    let real = real_fn!(REAL_REALLOC, extern "C" fn(*mut c_void, size_t) -> *mut c_void);
    real(ptr, size)
}

#[no_mangle]
pub unsafe extern "C" fn close(fd: c_int) -> c_int {
    mark_coverage();
    let real = real_fn!(REAL_CLOSE, extern "C" fn(c_int) -> c_int);
    real(fd)
}

#[no_mangle]
pub unsafe extern "C" fn memcpy(dst: *mut c_void, src: *const c_void, n: size_t) -> *mut c_void {
    mark_coverage();
    let real = real_fn!(REAL_MEMCPY, extern "C" fn(*mut c_void, *const c_void, size_t) -> *mut c_void);
    real(dst, src, n)
}

#[no_mangle]
pub unsafe extern "C" fn memset(dst: *mut c_void, val: c_int, n: size_t) -> *mut c_void {
    mark_coverage();
    let real = real_fn!(REAL_MEMSET, extern "C" fn(*mut c_void, c_int, size_t) -> *mut c_void);
    real(dst, val, n)
}

#[no_mangle]
pub unsafe extern "C" fn strdup(s: *const c_char) -> *mut c_char {
    mark_coverage();
    let real = real_fn!(REAL_STRDUP, extern "C" fn(*const c_char) -> *mut c_char);
    real(s)
}

#[no_mangle]
pub unsafe extern "C" fn getenv(name: *const c_char) -> *mut c_char {
    mark_coverage();
    let real = real_fn!(REAL_GETENV, extern "C" fn(*const c_char) -> *mut c_char);
    real(name)
}

#[no_mangle]
pub unsafe extern "C" fn strcpy(dst: *mut c_char, src: *const c_char) -> *mut c_char {
    mark_coverage();
    let real = real_fn!(REAL_STRCPY, extern "C" fn(*mut c_char, *const c_char) -> *mut c_char);
    real(dst, src)
}

#[no_mangle]
pub unsafe extern "C" fn strncpy(dst: *mut c_char, src: *const c_char, n: size_t) -> *mut c_char {
    mark_coverage();
    let real = real_fn!(REAL_STRNCPY, extern "C" fn(*mut c_char, *const c_char, size_t) -> *mut c_char);
    real(dst, src, n)
}

/// Forwards up to four register-width extra arguments. Covers the common
/// `%s`/`%d`-style call shapes; the same register-passthrough reasoning as
/// `open`'s `mode` argument applies to the ones a caller didn't supply.
#[no_mangle]
pub unsafe extern "C" fn sprintf(
    buf: *mut c_char,
    fmt: *const c_char,
    a0: usize,
    a1: usize,
    a2: usize,
    a3: usize,
) -> c_int {
    mark_coverage();
    let real = real_fn!(
        REAL_SPRINTF,
        extern "C" fn(*mut c_char, *const c_char, usize, usize, usize, usize) -> c_int
    );
    real(buf, fmt, a0, a1, a2, a3)
}

#[no_mangle]
pub unsafe extern "C" fn snprintf(
    buf: *mut c_char,
    size: size_t,
    fmt: *const c_char,
    a0: usize,
    a1: usize,
    a2: usize,
) -> c_int {
    mark_coverage();
    let real = real_fn!(
        REAL_SNPRINTF,
        extern "C" fn(*mut c_char, size_t, *const c_char, usize, usize, usize) -> c_int
    );
    real(buf, size, fmt, a0, a1, a2)
}

/// Polls `waitpid(WNOHANG)` until the child exits or the per-case budget
/// elapses; past the budget, kills it with `SIGKILL` and reports the
/// timeout sentinel instead of whatever wait status a delayed reap yields.
unsafe fn wait_with_case_timeout(pid: libc::pid_t) -> c_int {
    let budget_ms = env_usize("FUZZER_CASE_TIMEOUT_MS", DEFAULT_CASE_TIMEOUT_MS as usize) as u64;
    let poll_interval = std::time::Duration::from_millis(5);
    let deadline = std::time::Instant::now() + std::time::Duration::from_millis(budget_ms);

    loop {
        let mut status: c_int = 0;
        let r = libc::waitpid(pid, &mut status, libc::WNOHANG);
        if r == pid {
            return status;
        }
        if std::time::Instant::now() >= deadline {
            libc::kill(pid, libc::SIGKILL);
            let mut status: c_int = 0;
            libc::waitpid(pid, &mut status, 0);
            return TIMEOUT_STATUS;
        }
        std::thread::sleep(poll_interval);
    }
}

unsafe fn fd_is_valid(fd: c_int) -> bool {
    libc::fcntl(fd, libc::F_GETFD) != -1
}

/// Handshake then command loop. `'R'` forks a fresh victim per test case
/// and never returns in the parent; the forked child closes the forkserver
/// descriptors and returns normally so the target's own `main` can run.
unsafe fn forkserver_loop() {
    let zero = [0u8; 4];
    if libc::write(INFO_FD, zero.as_ptr() as *const c_void, 4) != 4 {
        return;
    }

    loop {
        let mut cmd = [0u8; 1];
        let n = libc::read(CMD_FD, cmd.as_mut_ptr() as *mut c_void, 1);
        if n != 1 {
            libc::_exit(0);
        }

        match cmd[0] {
            b if b == CMD_QUIT => libc::_exit(0),
            b if b == CMD_TEST => {
                let mut discard = [0u8; 3];
                let _ = libc::read(CMD_FD, discard.as_mut_ptr() as *mut c_void, 3);
                libc::write(INFO_FD, b"ACK".as_ptr() as *const c_void, 3);
            }
            b if b == CMD_RUN => {
                libc::lseek(MEMFD_FD, 0, libc::SEEK_SET);
                libc::dup2(MEMFD_FD, libc::STDIN_FILENO);

                let pid = libc::fork();
                if pid == 0 {
                    libc::close(CMD_FD);
                    libc::close(INFO_FD);
                    return;
                }

                let pid_bytes = pid.to_le_bytes();
                libc::write(INFO_FD, pid_bytes.as_ptr() as *const c_void, 4);

                let wire_status = wait_with_case_timeout(pid);
                let status_bytes = wire_status.to_le_bytes();
                libc::write(INFO_FD, status_bytes.as_ptr() as *const c_void, 4);

                let devnull = CString::new("/dev/null").unwrap();
                let fd = libc::open(devnull.as_ptr(), libc::O_RDONLY);
                if fd >= 0 {
                    libc::dup2(fd, libc::STDIN_FILENO);
                    libc::close(fd);
                }
            }
            _ => {}
        }
    }
}

#[ctor]
fn init() {
    unsafe {
        resolve_all();

        let (cov_base, cov_size) = open_shm("FUZZER_COV_NAME", "FUZZER_COV_SIZE", DEFAULT_COV_SIZE, true);
        COV_BASE.store(cov_base, Ordering::Relaxed);
        COV_SIZE.store(cov_size, Ordering::Relaxed);

        #[cfg(feature = "shm-stdin")]
        {
            let (input_base, input_size) =
                open_shm("FUZZER_SHM_NAME", "FUZZER_SHM_SIZE", DEFAULT_SHM_SIZE, false);
            INPUT_BASE.store(input_base, Ordering::Relaxed);
            INPUT_SIZE.store(input_size, Ordering::Relaxed);
            INPUT_OFFSET.store(0, Ordering::Relaxed);
        }

        if fd_is_valid(CMD_FD) && fd_is_valid(INFO_FD) {
            forkserver_loop();
        }
    }
}
