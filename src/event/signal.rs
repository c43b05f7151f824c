//! Process-wide signal bridge.
//!
//! POSIX signals are a process resource, so the self-pipe and the
//! `sigaction` bookkeeping live behind process-level locks; the reactor
//! that was created as the main reactor watches the pipe's read end and is
//! the only drainage path. The async handler does nothing but write the
//! signal number as one byte to the pipe, which is the full extent of what
//! is async-signal-safe here.

use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Mutex, OnceLock};

use rustc_hash::FxHashMap;

static PIPE_RD: AtomicI32 = AtomicI32::new(-1);
static PIPE_WR: AtomicI32 = AtomicI32::new(-1);
static PIPE_INIT: Mutex<()> = Mutex::new(());

fn registry() -> &'static Mutex<FxHashMap<i32, usize>> {
    static REGISTRY: OnceLock<Mutex<FxHashMap<i32, usize>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(FxHashMap::default()))
}

extern "C" fn on_signal(signo: libc::c_int) {
    let fd = PIPE_WR.load(Ordering::Relaxed);
    if fd >= 0 {
        let byte = signo as u8;
        unsafe {
            libc::write(fd, &byte as *const u8 as *const libc::c_void, 1);
        }
    }
}

fn set_cloexec_nonblock(fd: RawFd) -> io::Result<()> {
    unsafe {
        if libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) < 0 {
            return Err(io::Error::last_os_error());
        }
        let fl = libc::fcntl(fd, libc::F_GETFL);
        if fl < 0 || libc::fcntl(fd, libc::F_SETFL, fl | libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// The read end of the process self-pipe, creating the pipe on first use.
pub(crate) fn pipe_read_fd() -> io::Result<RawFd> {
    let rd = PIPE_RD.load(Ordering::Acquire);
    if rd >= 0 {
        return Ok(rd);
    }
    let _guard = PIPE_INIT.lock().unwrap_or_else(|e| e.into_inner());
    let rd = PIPE_RD.load(Ordering::Acquire);
    if rd >= 0 {
        return Ok(rd);
    }
    let mut fds = [0 as RawFd; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } < 0 {
        return Err(io::Error::last_os_error());
    }
    set_cloexec_nonblock(fds[0])?;
    set_cloexec_nonblock(fds[1])?;
    PIPE_WR.store(fds[1], Ordering::Release);
    PIPE_RD.store(fds[0], Ordering::Release);
    Ok(fds[0])
}

/// Install the process handler for `signo`, counting registrations.
pub(crate) fn install(signo: i32) -> io::Result<()> {
    let mut reg = registry().lock().unwrap_or_else(|e| e.into_inner());
    let count = reg.entry(signo).or_insert(0);
    if *count == 0 {
        unsafe {
            let mut action: libc::sigaction = std::mem::zeroed();
            let handler: extern "C" fn(libc::c_int) = on_signal;
            action.sa_sigaction = handler as usize;
            action.sa_flags = libc::SA_RESTART;
            libc::sigemptyset(&mut action.sa_mask);
            if libc::sigaction(signo, &action, std::ptr::null_mut()) < 0 {
                return Err(io::Error::last_os_error());
            }
        }
    }
    *count += 1;
    Ok(())
}

/// Drop one registration for `signo`, restoring the default disposition
/// when the last one goes.
pub(crate) fn uninstall(signo: i32) {
    let mut reg = registry().lock().unwrap_or_else(|e| e.into_inner());
    if let Some(count) = reg.get_mut(&signo) {
        *count = count.saturating_sub(1);
        if *count == 0 {
            reg.remove(&signo);
            unsafe {
                let mut action: libc::sigaction = std::mem::zeroed();
                action.sa_sigaction = libc::SIG_DFL;
                libc::sigemptyset(&mut action.sa_mask);
                libc::sigaction(signo, &action, std::ptr::null_mut());
            }
        }
    }
}

/// Read the self-pipe until empty, collecting pending signal numbers in
/// arrival order.
pub(crate) fn drain(fd: RawFd, out: &mut Vec<i32>) {
    let mut buf = [0u8; 64];
    loop {
        let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        if n <= 0 {
            return;
        }
        out.extend(buf[..n as usize].iter().map(|&b| b as i32));
    }
}
