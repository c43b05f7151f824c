// Integration tests for the event reactor

use std::cell::RefCell;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::time::Instant;

use riptide::event::flags::{self, Timeout};
use riptide::event::Reactor;

fn pipe_pair() -> (RawFd, RawFd) {
    let mut fds = [0 as RawFd; 2];
    assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0, "pipe() failed");
    (fds[0], fds[1])
}

fn write_byte(fd: RawFd) {
    let byte = 1u8;
    let n = unsafe { libc::write(fd, &byte as *const u8 as *const libc::c_void, 1) };
    assert_eq!(n, 1, "write() failed");
}

fn close_fd(fd: RawFd) {
    unsafe {
        libc::close(fd);
    }
}

#[test]
fn timer_fan_out_fires_in_deadline_order() {
    let mut re = Reactor::new(false).expect("reactor");
    let fired: Rc<RefCell<Vec<(u32, u128)>>> = Rc::new(RefCell::new(Vec::new()));
    let start = Instant::now();

    for (id, ms) in [(1u32, 10u64), (2, 20), (3, 30)] {
        let fired = Rc::clone(&fired);
        re.set_timer(ms, move |_| {
            fired.borrow_mut().push((id, start.elapsed().as_millis()));
        });
    }
    re.set_timer(100, |re| re.set_break());
    re.dispatch().expect("dispatch");

    let fired = fired.borrow();
    let order: Vec<u32> = fired.iter().map(|(id, _)| *id).collect();
    assert_eq!(order, vec![1, 2, 3]);
    // Timers never fire before their deadline.
    assert!(fired[0].1 >= 10, "first timer at {}ms", fired[0].1);
    assert!(fired[1].1 >= 20, "second timer at {}ms", fired[1].1);
    assert!(fired[2].1 >= 30, "third timer at {}ms", fired[2].1);
    assert!(fired[1].1 - fired[0].1 >= 9);
    assert!(fired[2].1 - fired[1].1 >= 9);
}

#[test]
fn read_readiness_beats_fd_timeout() {
    let (rd, wr) = pipe_pair();
    let mut re = Reactor::new(false).expect("reactor");

    let reads = Rc::new(RefCell::new(0));
    let timeouts = Rc::new(RefCell::new(0));

    {
        let reads = Rc::clone(&reads);
        re.set_fd(rd, flags::READ | flags::NONBLOCK, Timeout::Ms(50), move |_, fd| {
            let mut buf = [0u8; 8];
            unsafe {
                libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len());
            }
            *reads.borrow_mut() += 1;
        })
        .expect("set_fd");
    }
    {
        let timeouts = Rc::clone(&timeouts);
        re.set_fd_timeout_handler(rd, move |_, _| {
            *timeouts.borrow_mut() += 1;
        })
        .expect("timeout handler");
    }

    re.set_timer(10, move |_| write_byte(wr));
    re.set_timer(120, |re| re.set_break());
    re.dispatch().expect("dispatch");

    assert_eq!(*reads.borrow(), 1, "read handler fires exactly once");
    assert_eq!(*timeouts.borrow(), 0, "timeout handler must not fire");
    close_fd(rd);
    close_fd(wr);
}

#[test]
fn fd_timeout_fires_without_readiness() {
    let (rd, wr) = pipe_pair();
    let mut re = Reactor::new(false).expect("reactor");

    let reads = Rc::new(RefCell::new(0));
    let timeouts = Rc::new(RefCell::new(Vec::new()));
    let start = Instant::now();

    {
        let reads = Rc::clone(&reads);
        re.set_fd(rd, flags::READ | flags::NONBLOCK, Timeout::Ms(50), move |_, _| {
            *reads.borrow_mut() += 1;
        })
        .expect("set_fd");
    }
    {
        let timeouts = Rc::clone(&timeouts);
        re.set_fd_timeout_handler(rd, move |_, _| {
            timeouts.borrow_mut().push(start.elapsed().as_millis());
        })
        .expect("timeout handler");
    }

    re.set_timer(120, |re| re.set_break());
    re.dispatch().expect("dispatch");

    assert_eq!(*reads.borrow(), 0);
    let timeouts = timeouts.borrow();
    assert_eq!(timeouts.len(), 1, "timeout fires exactly once");
    assert!(timeouts[0] >= 50, "timeout at {}ms", timeouts[0]);
    // Expiry does not remove the interest; only CLEAR does.
    assert_eq!(re.fd_interest(rd), Some(flags::READ));
    close_fd(rd);
    close_fd(wr);
}

#[test]
fn signal_handlers_run_in_registration_order() {
    let mut re = Reactor::new(true).expect("reactor");
    let order = Rc::new(RefCell::new(Vec::new()));

    for id in [1u32, 2] {
        let order = Rc::clone(&order);
        re.set_signal(libc::SIGUSR1, move |_, signo| {
            assert_eq!(signo, libc::SIGUSR1);
            order.borrow_mut().push(id);
        })
        .expect("set_signal");
    }

    re.set_timer(10, |_| unsafe {
        libc::raise(libc::SIGUSR1);
    });
    re.set_timer(100, |re| re.set_break());
    re.dispatch().expect("dispatch");

    assert_eq!(*order.borrow(), vec![1, 2]);
}

#[test]
fn clear_then_reregister_is_a_fresh_registration() {
    let (rd, wr) = pipe_pair();
    let mut re = Reactor::new(false).expect("reactor");
    let reads = Rc::new(RefCell::new(0));

    re.set_fd(rd, flags::READ, Timeout::Unlimited, |_, _| {}).expect("first set_fd");
    assert_eq!(re.fd_interest(rd), Some(flags::READ));

    re.set_fd(rd, flags::CLEAR, Timeout::Unlimited, |_, _| {}).expect("clear");
    assert_eq!(re.fd_interest(rd), None);
    assert_eq!(re.fd_count(), 0);

    {
        let reads = Rc::clone(&reads);
        re.set_fd(rd, flags::READ | flags::NONBLOCK, Timeout::Unlimited, move |re, fd| {
            let mut buf = [0u8; 8];
            unsafe {
                libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len());
            }
            *reads.borrow_mut() += 1;
            re.set_break();
        })
        .expect("re-register");
    }
    assert_eq!(re.fd_interest(rd), Some(flags::READ));

    re.set_timer(5, move |_| write_byte(wr));
    re.set_timer(100, |re| re.set_break());
    re.dispatch().expect("dispatch");

    assert_eq!(*reads.borrow(), 1, "registration after CLEAR behaves like the first one");
    close_fd(rd);
    close_fd(wr);
}

#[test]
fn append_extends_interest_without_disturbing_it() {
    let (rd, _wr) = pipe_pair();
    let mut re = Reactor::new(false).expect("reactor");

    re.set_fd(rd, flags::READ, Timeout::Unlimited, |_, _| {}).expect("read side");
    re.set_fd(rd, flags::WRITE | flags::APPEND, Timeout::Unmodified, |_, _| {})
        .expect("append write side");

    let interest = re.fd_interest(rd).expect("record present");
    assert_eq!(interest & flags::READ, flags::READ);
    assert_eq!(interest & flags::WRITE, flags::WRITE);
    assert_eq!(re.fd_count(), 1);
}

#[test]
fn interest_without_read_or_write_is_rejected() {
    let (rd, _wr) = pipe_pair();
    let mut re = Reactor::new(false).expect("reactor");
    assert!(re.set_fd(rd, flags::NONBLOCK, Timeout::Unlimited, |_, _| {}).is_err());
    // The failed registration left the table unchanged.
    assert_eq!(re.fd_count(), 0);
}

#[test]
fn oneshot_removes_record_before_dispatch() {
    let (rd, wr) = pipe_pair();
    let mut re = Reactor::new(false).expect("reactor");
    let seen = Rc::new(RefCell::new(Vec::new()));

    {
        let seen = Rc::clone(&seen);
        re.set_fd(
            rd,
            flags::READ | flags::ONESHOT | flags::NONBLOCK,
            Timeout::Unlimited,
            move |re, fd| {
                // The record was removed before this handler ran.
                seen.borrow_mut().push(re.fd_interest(fd));
                let mut buf = [0u8; 8];
                unsafe {
                    libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len());
                }
            },
        )
        .expect("set_fd");
    }

    re.set_timer(5, move |_| write_byte(wr));
    re.set_timer(80, |re| re.set_break());
    re.dispatch().expect("dispatch");

    assert_eq!(*seen.borrow(), vec![None]);
    assert_eq!(re.fd_count(), 0);
    close_fd(rd);
    close_fd(wr);
}

#[test]
fn loop_hook_runs_every_iteration() {
    let mut re = Reactor::new(false).expect("reactor");
    let hooks = Rc::new(RefCell::new(0));
    {
        let hooks = Rc::clone(&hooks);
        re.set_callback(move |_| {
            *hooks.borrow_mut() += 1;
        });
    }
    re.set_timer(5, |re| re.set_break());
    re.dispatch().expect("dispatch");
    assert!(*hooks.borrow() >= 1);
}

#[test]
fn timer_latency_is_bounded_by_the_heartbeat() {
    let mut re = Reactor::new(false).expect("reactor");
    let start = Instant::now();
    let fired = Rc::new(RefCell::new(None));
    {
        let fired = Rc::clone(&fired);
        re.set_timer(30, move |re| {
            *fired.borrow_mut() = Some(start.elapsed().as_millis());
            re.set_break();
        });
    }
    re.dispatch().expect("dispatch");
    let at = fired.borrow().expect("timer fired");
    assert!(at >= 30);
    assert!(at <= 30 + riptide::event::HEARTBEAT_MS as u128 + 50, "fired at {}ms", at);
}
