//! Readiness backends.
//!
//! The best available kernel primitive is chosen at build time: epoll on
//! Linux, kqueue on the BSD family, and a portable `poll(2)` readiness scan
//! everywhere else. All three expose the same interface and the same
//! external behavior; `EINTR` is swallowed and surfaces as an empty wait.

#[cfg(any(target_os = "linux", target_os = "android"))]
mod epoll;
#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) use epoll::Poller;

#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
mod kqueue;
#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
pub(crate) use kqueue::Poller;

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
)))]
mod scan;
#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
)))]
pub(crate) use scan::Poller;

use std::os::unix::io::RawFd;

/// One ready descriptor as reported by the backend.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Readiness {
    pub fd: RawFd,
    pub readable: bool,
    pub writable: bool,
    pub error: bool,
}
