use std::io;
use std::os::unix::io::RawFd;

use rustc_hash::FxHashMap;

use super::Readiness;

/// Portable readiness scan over `poll(2)`. Every wait rebuilds the pollfd
/// array from the interest table; adequate for the small fd counts this
/// fallback is meant for.
pub(crate) struct Poller {
    interest: FxHashMap<RawFd, (bool, bool)>,
}

impl Poller {
    pub fn new() -> io::Result<Poller> {
        Ok(Poller { interest: FxHashMap::default() })
    }

    pub fn add(&mut self, fd: RawFd, read: bool, write: bool) -> io::Result<()> {
        self.interest.insert(fd, (read, write));
        Ok(())
    }

    pub fn modify(&mut self, fd: RawFd, read: bool, write: bool) -> io::Result<()> {
        self.interest.insert(fd, (read, write));
        Ok(())
    }

    pub fn remove(&mut self, fd: RawFd) -> io::Result<()> {
        self.interest.remove(&fd);
        Ok(())
    }

    pub fn wait(&mut self, timeout_ms: Option<u64>, out: &mut Vec<Readiness>) -> io::Result<()> {
        out.clear();
        let mut fds: Vec<libc::pollfd> = self
            .interest
            .iter()
            .map(|(&fd, &(read, write))| {
                let mut events = 0i16;
                if read {
                    events |= libc::POLLIN;
                }
                if write {
                    events |= libc::POLLOUT;
                }
                libc::pollfd { fd, events, revents: 0 }
            })
            .collect();
        let timeout = match timeout_ms {
            Some(ms) => ms.min(libc::c_int::MAX as u64) as libc::c_int,
            None => -1,
        };
        let n = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout) };
        if n < 0 {
            let error = io::Error::last_os_error();
            if error.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(error);
        }
        for pfd in &fds {
            if pfd.revents == 0 {
                continue;
            }
            out.push(Readiness {
                fd: pfd.fd,
                readable: pfd.revents & libc::POLLIN != 0,
                writable: pfd.revents & libc::POLLOUT != 0,
                error: pfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0,
            });
        }
        Ok(())
    }
}
