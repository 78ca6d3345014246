// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Monotonic timers multiplexed over a single `timerfd`.
//!
//! Every module owning retry or lifetime logic allocates a [`TimerGroup`]
//! and arms timers identified by a module-chosen token (a supplicant
//! index, a neighbor index, a tick kind). The daemon's event loop polls
//! [`TimerCtxt::fd`] and drains expirations one at a time:
//!
//! ```ignore
//! if revents & libc::POLLIN != 0 {
//!     daemon.timers.drain();
//!     while let Some((group, token)) = daemon.timers.pop_expired() {
//!         daemon.dispatch_timer(group, token);
//!     }
//! }
//! ```
//!
//! Expired timers are handed out one by one, and `stop` removes a timer
//! from the wheel immediately: a timer stopped from inside another
//! timer's handler will not fire, even if both deadlines had already
//! passed. Timers with a period re-arm themselves on expiry.

use std::io;
use std::os::unix::io::RawFd;

/// Timer group handle, one per module. Allocated by [`TimerCtxt::group`]
/// (or [`TimerWheel::group`] in tests).
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct TimerGroup(u8);

#[derive(Copy, Clone)]
struct Entry {
    group: u8,
    token: u64,
    expire_at_ms: u64,
    period_ms: u64,
    // Tie-breaker so that same-deadline timers fire in arming order.
    seq: u64,
}

/// The portable part of the timer machinery: deadlines and dispatch
/// order, no file descriptor.
pub struct TimerWheel {
    entries: Vec<Entry>,
    next_group: u8,
    next_seq: u64,
}

impl TimerWheel {
    pub fn new() -> TimerWheel {
        TimerWheel {
            entries: Vec::new(),
            next_group: 0,
            next_seq: 0,
        }
    }

    pub fn group(&mut self) -> TimerGroup {
        let group = TimerGroup(self.next_group);
        self.next_group += 1;
        group
    }

    /// Arms (or re-arms) a one-shot timer `delay_ms` from `now_ms`.
    pub fn start_rel(&mut self, now_ms: u64, group: TimerGroup, token: u64, delay_ms: u64) {
        self.arm(now_ms, group, token, delay_ms, 0);
    }

    /// Arms a periodic timer; first expiry one period from `now_ms`.
    pub fn start_periodic(&mut self, now_ms: u64, group: TimerGroup, token: u64, period_ms: u64) {
        self.arm(now_ms, group, token, period_ms, period_ms);
    }

    fn arm(&mut self, now_ms: u64, group: TimerGroup, token: u64, delay_ms: u64, period_ms: u64) {
        self.stop(group, token);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push(Entry {
            group: group.0,
            token,
            expire_at_ms: now_ms + delay_ms,
            period_ms,
            seq,
        });
    }

    /// Disarms a timer. Once this returns the timer will not be handed
    /// out by `pop_expired`, whether or not its deadline has passed.
    pub fn stop(&mut self, group: TimerGroup, token: u64) {
        self.entries
            .retain(|e| !(e.group == group.0 && e.token == token));
    }

    pub fn is_armed(&self, group: TimerGroup, token: u64) -> bool {
        self.entries
            .iter()
            .any(|e| e.group == group.0 && e.token == token)
    }

    /// Earliest pending deadline, if any timer is armed.
    pub fn next_deadline_ms(&self) -> Option<u64> {
        self.entries.iter().map(|e| e.expire_at_ms).min()
    }

    /// Hands out the next timer whose deadline has passed, re-arming it
    /// if periodic.
    pub fn pop_expired(&mut self, now_ms: u64) -> Option<(TimerGroup, u64)> {
        let idx = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.expire_at_ms <= now_ms)
            .min_by_key(|(_, e)| (e.expire_at_ms, e.seq))
            .map(|(i, _)| i)?;
        let entry = self.entries[idx];
        if entry.period_ms > 0 {
            self.entries[idx].expire_at_ms = now_ms + entry.period_ms;
        } else {
            self.entries.swap_remove(idx);
        }
        Some((TimerGroup(entry.group), entry.token))
    }
}

/// Milliseconds from the monotonic clock shared by all timer groups.
pub fn now_ms() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: ts is a valid out-pointer; CLOCK_MONOTONIC always exists.
    unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    ts.tv_sec as u64 * 1000 + ts.tv_nsec as u64 / 1_000_000
}

/// [`TimerWheel`] bound to a `timerfd` the event loop can poll.
pub struct TimerCtxt {
    fd: RawFd,
    wheel: TimerWheel,
}

impl TimerCtxt {
    pub fn new() -> io::Result<TimerCtxt> {
        // SAFETY: plain syscall, no pointers involved.
        let fd = unsafe {
            libc::timerfd_create(
                libc::CLOCK_MONOTONIC,
                libc::TFD_NONBLOCK | libc::TFD_CLOEXEC,
            )
        };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(TimerCtxt {
            fd,
            wheel: TimerWheel::new(),
        })
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn group(&mut self) -> TimerGroup {
        self.wheel.group()
    }

    pub fn start_rel(&mut self, group: TimerGroup, token: u64, delay_ms: u64) {
        self.wheel.start_rel(now_ms(), group, token, delay_ms);
        self.rearm();
    }

    pub fn start_periodic(&mut self, group: TimerGroup, token: u64, period_ms: u64) {
        self.wheel.start_periodic(now_ms(), group, token, period_ms);
        self.rearm();
    }

    pub fn stop(&mut self, group: TimerGroup, token: u64) {
        self.wheel.stop(group, token);
        self.rearm();
    }

    pub fn is_armed(&self, group: TimerGroup, token: u64) -> bool {
        self.wheel.is_armed(group, token)
    }

    /// Consumes the `timerfd` expiration count after a poll wakeup.
    pub fn drain(&mut self) {
        let mut count = [0u8; 8];
        // SAFETY: reading into a local buffer; short/failed reads on a
        // nonblocking timerfd are expected and ignored.
        unsafe { libc::read(self.fd, count.as_mut_ptr() as *mut libc::c_void, 8) };
    }

    pub fn pop_expired(&mut self) -> Option<(TimerGroup, u64)> {
        let expired = self.wheel.pop_expired(now_ms());
        if expired.is_none() {
            self.rearm();
        }
        expired
    }

    /// Programs the `timerfd` for the earliest pending deadline.
    fn rearm(&self) {
        let mut spec: libc::itimerspec = unsafe { std::mem::zeroed() };
        if let Some(deadline) = self.wheel.next_deadline_ms() {
            // An already-passed deadline still needs a nonzero value,
            // zero would disarm the fd.
            let delay = deadline.saturating_sub(now_ms()).max(1);
            spec.it_value.tv_sec = (delay / 1000) as libc::time_t;
            spec.it_value.tv_nsec = ((delay % 1000) * 1_000_000) as libc::c_long;
        }
        // SAFETY: fd is a valid timerfd for the lifetime of self.
        unsafe { libc::timerfd_settime(self.fd, 0, &spec, std::ptr::null_mut()) };
    }
}

impl Drop for TimerCtxt {
    fn drop(&mut self) {
        // SAFETY: fd is owned by self and closed exactly once.
        unsafe { libc::close(self.fd) };
    }
}
