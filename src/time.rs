// SPDX-License-Identifier: Apache-2.0

use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Duration;

use nix::sys::time::TimeSpec;
use nix::sys::timerfd::{
    ClockId, Expiration, TimerFd, TimerFlags, TimerSetTimeFlags,
};

use crate::DhcpError;

// The boot time is holding CLOCK_BOOTTIME which also includes any time that
// the system is suspended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct BootTime {
    pub sec: i64,
    pub nsec: i64,
}

impl BootTime {
    pub(crate) fn sanitize(&self) -> BootTime {
        if self.nsec > 1_000_000_000 || self.nsec < 0 {
            let mut add = self.nsec / 1_000_000_000;
            if self.nsec < 0 {
                add -= 1;
            }
            BootTime {
                sec: self.sec + add,
                nsec: self.nsec - add * 1_000_000_000,
            }
        } else {
            *self
        }
    }

    pub(crate) fn now() -> Self {
        let mut tp = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        unsafe {
            libc::clock_gettime(
                libc::CLOCK_BOOTTIME,
                &mut tp as *mut libc::timespec,
            );
        }
        Self {
            sec: tp.tv_sec,
            nsec: tp.tv_nsec,
        }
    }

    pub(crate) fn is_set(&self) -> bool {
        *self != Self::default()
    }

    pub(crate) fn add_millis(&self, ms: u64) -> Self {
        BootTime {
            sec: self.sec + (ms / 1000) as i64,
            nsec: self.nsec + ((ms % 1000) * 1_000_000) as i64,
        }
        .sanitize()
    }

    /// Milliseconds passed since this time stamp, zero when in the future.
    pub(crate) fn elapsed_millis(&self) -> u64 {
        let diff = Self::now() - *self;
        if diff.sec < 0 || diff.nsec < 0 {
            0
        } else {
            diff.sec as u64 * 1000 + diff.nsec as u64 / 1_000_000
        }
    }
}

impl std::ops::Sub<BootTime> for BootTime {
    type Output = BootTime;
    fn sub(self, other: BootTime) -> BootTime {
        BootTime {
            sec: self.sec - other.sec,
            nsec: self.nsec - other.nsec,
        }
        .sanitize()
    }
}

impl std::ops::Add<BootTime> for BootTime {
    type Output = BootTime;
    fn add(self, other: BootTime) -> BootTime {
        BootTime {
            sec: self.sec + other.sec,
            nsec: self.nsec + other.nsec,
        }
        .sanitize()
    }
}

impl std::fmt::Display for BootTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:03}", self.sec, self.nsec / 1_000_000)
    }
}

/// One-shot timer backed by a timerfd against CLOCK_BOOTTIME.
/// Dropping the timer closes the file descriptor, hence cancellation is
/// synchronous once the fd is also removed from the event pool.
#[derive(Debug)]
pub(crate) struct DhcpTimerFd {
    pub(crate) fd: TimerFd,
}

impl AsRawFd for DhcpTimerFd {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl DhcpTimerFd {
    pub(crate) fn new(time_ms: u64) -> Result<Self, DhcpError> {
        let fd = TimerFd::new(
            ClockId::CLOCK_BOOTTIME,
            TimerFlags::TFD_CLOEXEC | TimerFlags::TFD_NONBLOCK,
        )?;
        // timerfd treats an all zero timespec as disarm, round up.
        let time_ms = std::cmp::max(time_ms, 1);
        fd.set(
            Expiration::OneShot(TimeSpec::from(Duration::from_millis(
                time_ms,
            ))),
            TimerSetTimeFlags::empty(),
        )?;
        log::debug!("Created timerfd {fd:?} for {time_ms} milliseconds");
        Ok(Self { fd })
    }
}
