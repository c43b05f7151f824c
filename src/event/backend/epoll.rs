use std::io;
use std::os::unix::io::RawFd;
use std::ptr;

use super::Readiness;

pub(crate) struct Poller {
    epfd: RawFd,
    events: Vec<libc::epoll_event>,
}

impl Poller {
    pub fn new() -> io::Result<Poller> {
        let epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epfd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Poller { epfd, events: Vec::with_capacity(64) })
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, read: bool, write: bool) -> io::Result<()> {
        let mut events = 0u32;
        if read {
            events |= libc::EPOLLIN as u32;
        }
        if write {
            events |= libc::EPOLLOUT as u32;
        }
        let mut ev = libc::epoll_event { events, u64: fd as u64 };
        let ptr = if op == libc::EPOLL_CTL_DEL { ptr::null_mut() } else { &mut ev };
        if unsafe { libc::epoll_ctl(self.epfd, op, fd, ptr) } < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub fn add(&mut self, fd: RawFd, read: bool, write: bool) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, read, write)
    }

    pub fn modify(&mut self, fd: RawFd, read: bool, write: bool) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, read, write)
    }

    pub fn remove(&mut self, fd: RawFd) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_DEL, fd, false, false)
    }

    pub fn wait(&mut self, timeout_ms: Option<u64>, out: &mut Vec<Readiness>) -> io::Result<()> {
        out.clear();
        let timeout = match timeout_ms {
            Some(ms) => ms.min(libc::c_int::MAX as u64) as libc::c_int,
            None => -1,
        };
        let n = unsafe {
            libc::epoll_wait(
                self.epfd,
                self.events.as_mut_ptr(),
                self.events.capacity() as libc::c_int,
                timeout,
            )
        };
        if n < 0 {
            let error = io::Error::last_os_error();
            if error.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(error);
        }
        unsafe {
            self.events.set_len(n as usize);
        }
        for ev in &self.events {
            let bits = ev.events;
            out.push(Readiness {
                fd: ev.u64 as RawFd,
                readable: bits & libc::EPOLLIN as u32 != 0,
                writable: bits & libc::EPOLLOUT as u32 != 0,
                error: bits & (libc::EPOLLERR as u32 | libc::EPOLLHUP as u32) != 0,
            });
        }
        Ok(())
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epfd);
        }
    }
}
