//! Single-threaded I/O event reactor
//!
//! The reactor multiplexes fd readiness, timers and POSIX signals over the
//! best kernel primitive available on the host (see [`backend`]). Callbacks
//! for a single reactor never execute concurrently; handlers run to
//! completion and must not call [`Reactor::dispatch`] recursively.
//!
//! Dispatch iteration order: loop hook, ready fds (read before write per
//! descriptor), drained signals in arrival order, then expired timers in
//! deadline order, stable by registration for equal deadlines.

pub mod flags;

mod backend;
mod signal;
mod timer;

use std::cell::RefCell;
use std::fmt;
use std::io;
use std::os::unix::io::RawFd;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use backend::{Poller, Readiness};
use flags::Timeout;
use timer::{EntryKind, TimerHeap};

/// Fixed heartbeat period bounding every blocking wait, so long-running
/// scripted jobs are preempted even with an empty timeout heap.
pub const HEARTBEAT_MS: u64 = 500;

/// Monotonic clock in microseconds.
pub(crate) fn now_us() -> u64 {
    let mut ts = libc::timespec { tv_sec: 0, tv_nsec: 0 };
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    ts.tv_sec as u64 * 1_000_000 + ts.tv_nsec as u64 / 1_000
}

/// Errors surfaced by the reactor.
#[derive(Debug)]
pub enum EventError {
    /// The readiness primitive failed during dispatch; the reactor must be
    /// destroyed.
    Backend(io::Error),
    /// The backend rejected an interest change; the fd table is unchanged.
    Registration { fd: RawFd, source: io::Error },
    /// Signal bridge setup failed.
    Signal(io::Error),
    /// Signal registration is only valid on the main reactor.
    NotMainReactor,
    /// No record for this descriptor.
    NoSuchFd(RawFd),
    /// No registration matched for this signal.
    UnknownSignal(i32),
}

impl fmt::Display for EventError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventError::Backend(e) => write!(f, "readiness backend failed: {}", e),
            EventError::Registration { fd, source } => {
                write!(f, "registration rejected for fd {}: {}", fd, source)
            }
            EventError::Signal(e) => write!(f, "signal bridge setup failed: {}", e),
            EventError::NotMainReactor => {
                write!(f, "signal registration requires the main reactor")
            }
            EventError::NoSuchFd(fd) => write!(f, "no record for fd {}", fd),
            EventError::UnknownSignal(signo) => {
                write!(f, "no registration matched for signal {}", signo)
            }
        }
    }
}

impl std::error::Error for EventError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EventError::Backend(e)
            | EventError::Registration { source: e, .. }
            | EventError::Signal(e) => Some(e),
            _ => None,
        }
    }
}

type FdHandler = Rc<RefCell<dyn FnMut(&mut Reactor, RawFd)>>;
type SigHandler = Rc<RefCell<dyn FnMut(&mut Reactor, i32)>>;
type Hook = Rc<RefCell<dyn FnMut(&mut Reactor)>>;

/// Identifies one signal registration for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalToken(u64);

struct FdRecord {
    interest: u32,
    read_handler: Option<FdHandler>,
    write_handler: Option<FdHandler>,
    timeout_handler: Option<FdHandler>,
    deadline: Option<u64>,
    /// Bumped whenever the deadline is replaced or removed; stale heap
    /// entries are dropped on pop.
    timeout_gen: u64,
}

/// The single-threaded dispatch core.
pub struct Reactor {
    poller: Poller,
    fds: FxHashMap<RawFd, FdRecord>,
    timers: TimerHeap,
    signal_handlers: FxHashMap<i32, Vec<(u64, SigHandler)>>,
    signal_fd: Option<RawFd>,
    next_token: u64,
    loop_hook: Option<Hook>,
    break_flag: bool,
    is_main: bool,
}

impl Reactor {
    /// Create a reactor. Only the main reactor of a process watches the
    /// signal self-pipe and may register signal handlers.
    pub fn new(is_main: bool) -> Result<Reactor, EventError> {
        Ok(Reactor {
            poller: Poller::new().map_err(EventError::Backend)?,
            fds: FxHashMap::default(),
            timers: TimerHeap::new(),
            signal_handlers: FxHashMap::default(),
            signal_fd: None,
            next_token: 0,
            loop_hook: None,
            break_flag: false,
            is_main,
        })
    }

    /// Install, extend or clear interest in a descriptor.
    ///
    /// `flags` combines the bits of [`flags`]; `CLEAR` removes the record
    /// outright and `APPEND` ORs new bits into an existing one. The handler
    /// serves whichever of the read/write sides this call flags. Backend
    /// rejection leaves the fd table unchanged.
    pub fn set_fd<F>(
        &mut self,
        fd: RawFd,
        flag_bits: u32,
        timeout: Timeout,
        handler: F,
    ) -> Result<(), EventError>
    where
        F: FnMut(&mut Reactor, RawFd) + 'static,
    {
        if flag_bits & flags::CLEAR != 0 {
            if self.fds.remove(&fd).is_some() {
                let _ = self.poller.remove(fd);
            }
            return Ok(());
        }
        let wanted = flag_bits & (flags::READ | flags::WRITE);
        if wanted == 0 {
            return Err(EventError::Registration {
                fd,
                source: io::Error::from(io::ErrorKind::InvalidInput),
            });
        }
        if flag_bits & (flags::NONBLOCK | flags::BLOCK) != 0 {
            set_blocking_mode(fd, flag_bits & flags::NONBLOCK != 0)
                .map_err(|source| EventError::Registration { fd, source })?;
        }

        let handler: FdHandler = Rc::new(RefCell::new(handler));
        let append = flag_bits & flags::APPEND != 0 && self.fds.contains_key(&fd);
        let existed = self.fds.contains_key(&fd);

        let new_interest = if append {
            let old = self.fds.get(&fd).map(|r| r.interest).unwrap_or(0);
            old | (flag_bits & (flags::READ | flags::WRITE | flags::ONESHOT))
        } else {
            flag_bits & (flags::READ | flags::WRITE | flags::ONESHOT)
        };

        // Backend first; the table changes only after it accepts.
        let read = new_interest & flags::READ != 0;
        let write = new_interest & flags::WRITE != 0;
        let result = if existed {
            self.poller.modify(fd, read, write)
        } else {
            self.poller.add(fd, read, write)
        };
        result.map_err(|source| EventError::Registration { fd, source })?;

        let record = self.fds.entry(fd).or_insert_with(|| FdRecord {
            interest: 0,
            read_handler: None,
            write_handler: None,
            timeout_handler: None,
            deadline: None,
            timeout_gen: 0,
        });
        record.interest = new_interest;
        if flag_bits & flags::READ != 0 {
            record.read_handler = Some(Rc::clone(&handler));
        } else if !append {
            record.read_handler = None;
        }
        if flag_bits & flags::WRITE != 0 {
            record.write_handler = Some(Rc::clone(&handler));
        } else if !append {
            record.write_handler = None;
        }

        match timeout {
            Timeout::Unmodified => {}
            Timeout::Unlimited => {
                record.deadline = None;
                record.timeout_gen += 1;
            }
            Timeout::Ms(ms) => {
                let deadline = now_us() + ms * 1_000;
                record.deadline = Some(deadline);
                record.timeout_gen += 1;
                let gen = record.timeout_gen;
                self.timers.push_fd_timeout(deadline, fd, gen);
            }
        }
        Ok(())
    }

    /// Install the handler invoked when the descriptor's deadline expires.
    /// Expiry does not remove the fd interest; the handler may re-arm the
    /// deadline through [`Reactor::set_fd`].
    pub fn set_fd_timeout_handler<F>(&mut self, fd: RawFd, handler: F) -> Result<(), EventError>
    where
        F: FnMut(&mut Reactor, RawFd) + 'static,
    {
        match self.fds.get_mut(&fd) {
            Some(record) => {
                record.timeout_handler = Some(Rc::new(RefCell::new(handler)));
                Ok(())
            }
            None => Err(EventError::NoSuchFd(fd)),
        }
    }

    /// Schedule a one-shot timer `ms` milliseconds from now. The entry is
    /// removed from the heap before the handler runs.
    pub fn set_timer<F>(&mut self, ms: u64, handler: F)
    where
        F: FnOnce(&mut Reactor) + 'static,
    {
        let deadline = now_us() + ms * 1_000;
        self.timers.push_timer(deadline, Box::new(handler));
    }

    /// Register a signal handler on the main reactor. Handlers for one
    /// signal run in registration order.
    pub fn set_signal<F>(&mut self, signo: i32, handler: F) -> Result<SignalToken, EventError>
    where
        F: FnMut(&mut Reactor, i32) + 'static,
    {
        if !self.is_main {
            return Err(EventError::NotMainReactor);
        }
        if self.signal_fd.is_none() {
            let rd = signal::pipe_read_fd().map_err(EventError::Signal)?;
            self.poller
                .add(rd, true, false)
                .map_err(|source| EventError::Registration { fd: rd, source })?;
            self.signal_fd = Some(rd);
        }
        signal::install(signo).map_err(EventError::Signal)?;
        self.next_token += 1;
        let token = SignalToken(self.next_token);
        self.signal_handlers
            .entry(signo)
            .or_default()
            .push((token.0, Rc::new(RefCell::new(handler))));
        Ok(token)
    }

    /// Remove the registration identified by `token`.
    pub fn remove_signal(&mut self, signo: i32, token: SignalToken) -> Result<(), EventError> {
        let list = self
            .signal_handlers
            .get_mut(&signo)
            .ok_or(EventError::UnknownSignal(signo))?;
        let i = list
            .iter()
            .position(|(t, _)| *t == token.0)
            .ok_or(EventError::UnknownSignal(signo))?;
        list.remove(i);
        if list.is_empty() {
            self.signal_handlers.remove(&signo);
        }
        signal::uninstall(signo);
        if self.signal_handlers.is_empty() {
            if let Some(rd) = self.signal_fd.take() {
                let _ = self.poller.remove(rd);
            }
        }
        Ok(())
    }

    /// Latch the break flag; dispatch returns after the current handler
    /// batch completes.
    pub fn set_break(&mut self) {
        self.break_flag = true;
    }

    /// Install a hook invoked at the top of every dispatch iteration.
    pub fn set_callback<F>(&mut self, hook: F)
    where
        F: FnMut(&mut Reactor) + 'static,
    {
        self.loop_hook = Some(Rc::new(RefCell::new(hook)));
    }

    /// Number of watched descriptors, for invariant checks.
    pub fn fd_count(&self) -> usize {
        self.fds.len()
    }

    /// Current interest bits of a descriptor.
    pub fn fd_interest(&self, fd: RawFd) -> Option<u32> {
        self.fds.get(&fd).map(|r| r.interest)
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    /// Run the dispatch loop until [`Reactor::set_break`] latches or the
    /// readiness primitive fails with something other than a transient
    /// interruption.
    pub fn dispatch(&mut self) -> Result<(), EventError> {
        self.break_flag = false;
        let mut ready: Vec<Readiness> = Vec::with_capacity(64);
        loop {
            if let Some(hook) = self.loop_hook.clone() {
                (hook.borrow_mut())(self);
                if self.break_flag {
                    return Ok(());
                }
            }

            let now = now_us();
            let timeout_ms = match self.timers.next_deadline() {
                Some(d) => (d.saturating_sub(now) / 1_000).min(HEARTBEAT_MS),
                None => HEARTBEAT_MS,
            };
            self.poller
                .wait(Some(timeout_ms), &mut ready)
                .map_err(EventError::Backend)?;

            // Ready descriptors, in the order the backend reported them.
            let mut signals_pending = false;
            for ev in ready.drain(..) {
                if Some(ev.fd) == self.signal_fd {
                    signals_pending = true;
                    continue;
                }
                self.dispatch_fd(ev);
                if self.break_flag {
                    return Ok(());
                }
            }

            if signals_pending {
                self.dispatch_signals();
                if self.break_flag {
                    return Ok(());
                }
            }

            self.dispatch_timers();
            if self.break_flag {
                return Ok(());
            }
        }
    }

    fn dispatch_fd(&mut self, ev: Readiness) {
        // Drop stale readiness: record gone or interest cleared since the
        // wait started.
        let (interest, read_handler, write_handler) = match self.fds.get(&ev.fd) {
            Some(r) => (r.interest, r.read_handler.clone(), r.write_handler.clone()),
            None => return,
        };
        let want_read = interest & flags::READ != 0 && ev.readable;
        let want_write = interest & flags::WRITE != 0 && ev.writable;
        if !want_read && !want_write && !ev.error {
            return;
        }

        if interest & flags::ONESHOT != 0 {
            // The record goes away before the first handler runs.
            self.fds.remove(&ev.fd);
            let _ = self.poller.remove(ev.fd);
        } else if want_read || want_write {
            // Readiness cancels a pending deadline; the handler re-arms
            // through set_fd if it still wants one.
            if let Some(r) = self.fds.get_mut(&ev.fd) {
                if r.deadline.is_some() {
                    r.deadline = None;
                    r.timeout_gen += 1;
                }
            }
        }

        if want_read {
            if let Some(h) = &read_handler {
                (h.borrow_mut())(self, ev.fd);
            }
            if self.break_flag {
                return;
            }
        }
        if want_write {
            if let Some(h) = &write_handler {
                (h.borrow_mut())(self, ev.fd);
            }
            if self.break_flag {
                return;
            }
        }
        if ev.error && !want_read && !want_write {
            // Delivered once, read side preferred.
            if let Some(h) = read_handler.or(write_handler) {
                (h.borrow_mut())(self, ev.fd);
            }
        }
    }

    fn dispatch_signals(&mut self) {
        let fd = match self.signal_fd {
            Some(fd) => fd,
            None => return,
        };
        let mut pending = Vec::new();
        signal::drain(fd, &mut pending);
        for signo in pending {
            let handlers: Vec<SigHandler> = self
                .signal_handlers
                .get(&signo)
                .map(|list| list.iter().map(|(_, h)| Rc::clone(h)).collect())
                .unwrap_or_default();
            for h in handlers {
                (h.borrow_mut())(self, signo);
                if self.break_flag {
                    return;
                }
            }
        }
    }

    fn dispatch_timers(&mut self) {
        let now = now_us();
        while let Some(mut entry) = self.timers.pop_due(now) {
            match &mut entry.kind {
                EntryKind::Timer(handler) => {
                    if let Some(f) = handler.take() {
                        f(self);
                    }
                }
                EntryKind::FdTimeout { fd, gen } => {
                    let handler = match self.fds.get_mut(fd) {
                        Some(r) if r.timeout_gen == *gen => {
                            r.deadline = None;
                            r.timeout_handler.clone()
                        }
                        _ => None,
                    };
                    if let Some(h) = handler {
                        let fd = *fd;
                        (h.borrow_mut())(self, fd);
                    }
                }
            }
            if self.break_flag {
                return;
            }
        }
    }
}

fn set_blocking_mode(fd: RawFd, nonblocking: bool) -> io::Result<()> {
    unsafe {
        let fl = libc::fcntl(fd, libc::F_GETFL);
        if fl < 0 {
            return Err(io::Error::last_os_error());
        }
        let fl = if nonblocking { fl | libc::O_NONBLOCK } else { fl & !libc::O_NONBLOCK };
        if libc::fcntl(fd, libc::F_SETFL, fl) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}
