use std::io;
use std::os::unix::io::RawFd;
use std::ptr;

use super::Readiness;

pub(crate) struct Poller {
    kq: RawFd,
    events: Vec<libc::kevent>,
}

fn kevent_for(fd: RawFd, filter: i16, flags: u16) -> libc::kevent {
    libc::kevent {
        ident: fd as usize,
        filter,
        flags,
        fflags: 0,
        data: 0,
        udata: ptr::null_mut(),
    }
}

impl Poller {
    pub fn new() -> io::Result<Poller> {
        let kq = unsafe { libc::kqueue() };
        if kq < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Poller { kq, events: Vec::with_capacity(64) })
    }

    fn apply(&self, changes: &[libc::kevent]) -> io::Result<()> {
        let ret = unsafe {
            libc::kevent(
                self.kq,
                changes.as_ptr(),
                changes.len() as libc::c_int,
                ptr::null_mut(),
                0,
                ptr::null(),
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub fn add(&mut self, fd: RawFd, read: bool, write: bool) -> io::Result<()> {
        let mut changes = Vec::with_capacity(2);
        if read {
            changes.push(kevent_for(fd, libc::EVFILT_READ, libc::EV_ADD | libc::EV_ENABLE));
        }
        if write {
            changes.push(kevent_for(fd, libc::EVFILT_WRITE, libc::EV_ADD | libc::EV_ENABLE));
        }
        self.apply(&changes)
    }

    pub fn modify(&mut self, fd: RawFd, read: bool, write: bool) -> io::Result<()> {
        // Deletes of absent filters fail individually; drop the unwanted
        // ones first and ignore, then apply the adds, whose errors matter.
        if !read {
            let _ = self.apply(&[kevent_for(fd, libc::EVFILT_READ, libc::EV_DELETE)]);
        }
        if !write {
            let _ = self.apply(&[kevent_for(fd, libc::EVFILT_WRITE, libc::EV_DELETE)]);
        }
        if !read && !write {
            return Ok(());
        }
        self.add(fd, read, write)
    }

    pub fn remove(&mut self, fd: RawFd) -> io::Result<()> {
        let _ = self.apply(&[kevent_for(fd, libc::EVFILT_READ, libc::EV_DELETE)]);
        let _ = self.apply(&[kevent_for(fd, libc::EVFILT_WRITE, libc::EV_DELETE)]);
        Ok(())
    }

    pub fn wait(&mut self, timeout_ms: Option<u64>, out: &mut Vec<Readiness>) -> io::Result<()> {
        out.clear();
        let ts;
        let ts_ptr = match timeout_ms {
            Some(ms) => {
                ts = libc::timespec {
                    tv_sec: (ms / 1000) as libc::time_t,
                    tv_nsec: ((ms % 1000) * 1_000_000) as libc::c_long,
                };
                &ts as *const libc::timespec
            }
            None => ptr::null(),
        };
        let n = unsafe {
            libc::kevent(
                self.kq,
                ptr::null(),
                0,
                self.events.as_mut_ptr(),
                self.events.capacity() as libc::c_int,
                ts_ptr,
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
        // kqueue reports read and write as separate events; merge per fd.
        for ev in &self.events {
            let fd = ev.ident as RawFd;
            let readable = ev.filter == libc::EVFILT_READ;
            let writable = ev.filter == libc::EVFILT_WRITE;
            let error = ev.flags & libc::EV_ERROR != 0;
            match out.iter_mut().find(|r| r.fd == fd) {
                Some(r) => {
                    r.readable |= readable;
                    r.writable |= writable;
                    r.error |= error;
                }
                None => out.push(Readiness { fd, readable, writable, error }),
            }
        }
        Ok(())
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.kq);
        }
    }
}
