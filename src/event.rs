// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::convert::TryFrom;
use std::net::Ipv6Addr;
use std::os::unix::io::{AsRawFd, RawFd};

use nix::sys::epoll::{
    epoll_create, epoll_ctl, epoll_wait, EpollEvent, EpollFlags, EpollOp,
};

use crate::{time::DhcpTimerFd, DhcpError, ErrorKind};

const EVENT_BUFFER_COUNT: usize = 64;

/// Timer and socket events of a single device, dispatched by
/// [crate::DhcpV6Engine::poll].
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
#[non_exhaustive]
pub enum DhcpV6EventKind {
    UdpPackageIn = 1,
    /// Initial transmit delay, first RT in Selecting, wait-ready deadline
    /// or maximum retransmission duration elapsed.
    FsmTimeout,
    /// Retransmission deadline of the current exchange elapsed.
    Retransmit,
    /// Lease T1 elapsed, renewal due.
    Renew,
    /// Lease T2 elapsed, rebind due.
    Rebind,
    /// Lease valid lifetime elapsed.
    LeaseExpired,
}

impl From<DhcpV6EventKind> for u64 {
    fn from(v: DhcpV6EventKind) -> u64 {
        v as u64
    }
}

impl TryFrom<u64> for DhcpV6EventKind {
    type Error = DhcpError;
    fn try_from(v: u64) -> Result<Self, DhcpError> {
        match v {
            x if x == Self::UdpPackageIn as u64 => Ok(Self::UdpPackageIn),
            x if x == Self::FsmTimeout as u64 => Ok(Self::FsmTimeout),
            x if x == Self::Retransmit as u64 => Ok(Self::Retransmit),
            x if x == Self::Renew as u64 => Ok(Self::Renew),
            x if x == Self::Rebind as u64 => Ok(Self::Rebind),
            x if x == Self::LeaseExpired as u64 => Ok(Self::LeaseExpired),
            _ => {
                let e = DhcpError::new(
                    ErrorKind::Bug,
                    format!("Got unexpected event ID {v}"),
                );
                log::error!("{}", e);
                Err(e)
            }
        }
    }
}

impl std::fmt::Display for DhcpV6EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::UdpPackageIn => "UdpPackageIn",
                Self::FsmTimeout => "FsmTimeout",
                Self::Retransmit => "Retransmit",
                Self::Renew => "Renew",
                Self::Rebind => "Rebind",
                Self::LeaseExpired => "LeaseExpired",
            }
        )
    }
}

/// Event of a device returned by [crate::DhcpV6Engine::poll].
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub struct DhcpV6Event {
    pub ifindex: u32,
    pub kind: DhcpV6EventKind,
}

impl std::fmt::Display for DhcpV6Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.ifindex, self.kind)
    }
}

impl DhcpV6Event {
    fn token(&self) -> u64 {
        ((self.ifindex as u64) << 32) | u64::from(self.kind)
    }

    fn from_token(token: u64) -> Result<Self, DhcpError> {
        Ok(Self {
            ifindex: (token >> 32) as u32,
            kind: DhcpV6EventKind::try_from(token & 0xFFFF_FFFF)?,
        })
    }
}

/// Interface state change reported by the host netlink watcher.
#[derive(Debug, PartialEq, Eq, Clone)]
#[non_exhaustive]
pub enum DhcpV6DeviceEvent {
    /// Interface is administratively up, carrying the current interface
    /// name which may differ from the one the device was created with.
    Up(String),
    Down,
}

/// Carrier change reported by the host netlink watcher.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum DhcpV6LinkEvent {
    LinkUp,
    LinkDown,
}

/// Address change reported by the host netlink watcher.
#[derive(Debug, PartialEq, Eq, Clone)]
#[non_exhaustive]
pub enum DhcpV6AddressEvent {
    /// Address added or flags changed. The boolean flags are tentative and
    /// duplicate (failed duplicate address detection).
    Update(Ipv6Addr, bool, bool),
    Delete(Ipv6Addr),
}

#[derive(Debug)]
pub(crate) struct DhcpEventPool {
    timer_fds: HashMap<u64, DhcpTimerFd>,
    socket_fds: HashMap<u64, RawFd>,
    epoll: DhcpEpoll,
}

impl Drop for DhcpEventPool {
    fn drop(&mut self) {
        self.remove_all_event();
        if self.epoll.fd >= 0 {
            unsafe {
                libc::close(self.epoll.fd as libc::c_int);
            }
        }
    }
}

impl DhcpEventPool {
    pub(crate) fn new() -> Result<Self, DhcpError> {
        Ok(Self {
            timer_fds: HashMap::new(),
            socket_fds: HashMap::new(),
            epoll: DhcpEpoll::new()?,
        })
    }

    fn remove_all_event(&mut self) {
        for (token, timer_fd) in self.timer_fds.drain() {
            self.epoll.del_fd(timer_fd.as_raw_fd(), token).ok();
        }
        for (token, fd) in self.socket_fds.drain() {
            self.epoll.del_fd(fd, token).ok();
        }
    }

    pub(crate) fn add_socket(
        &mut self,
        event: DhcpV6Event,
        fd: RawFd,
    ) -> Result<(), DhcpError> {
        log::debug!("Adding socket {fd} with event {event} to event pool");
        self.del_socket(event)?;
        self.socket_fds.insert(event.token(), fd);
        self.epoll.add_fd(fd, event.token())
    }

    pub(crate) fn del_socket(
        &mut self,
        event: DhcpV6Event,
    ) -> Result<(), DhcpError> {
        if let Some(fd) = self.socket_fds.remove(&event.token()) {
            self.epoll.del_fd(fd, event.token())?;
        }
        Ok(())
    }

    /// Arm a one-shot timer for the specified event. An already pending
    /// timer for the same event is canceled first.
    pub(crate) fn add_timer(
        &mut self,
        event: DhcpV6Event,
        timeout_ms: u64,
    ) -> Result<(), DhcpError> {
        log::debug!(
            "Adding timer {timeout_ms} milliseconds with event {event} \
             to event pool"
        );
        self.del_timer(event)?;
        let timer_fd = DhcpTimerFd::new(timeout_ms)?;
        self.epoll.add_fd(timer_fd.as_raw_fd(), event.token())?;
        self.timer_fds.insert(event.token(), timer_fd);
        Ok(())
    }

    pub(crate) fn del_timer(
        &mut self,
        event: DhcpV6Event,
    ) -> Result<(), DhcpError> {
        if let Some(timer_fd) = self.timer_fds.remove(&event.token()) {
            self.epoll.del_fd(timer_fd.as_raw_fd(), event.token())?;
        }
        Ok(())
    }

    pub(crate) fn has_timer(&self, event: DhcpV6Event) -> bool {
        self.timer_fds.contains_key(&event.token())
    }

    /// Drop every timer and socket registration of the given interface.
    pub(crate) fn remove_device(&mut self, ifindex: u32) {
        let tokens: Vec<u64> = self
            .timer_fds
            .keys()
            .chain(self.socket_fds.keys())
            .filter(|token| (**token >> 32) as u32 == ifindex)
            .copied()
            .collect();
        for token in tokens {
            if let Some(timer_fd) = self.timer_fds.remove(&token) {
                self.epoll.del_fd(timer_fd.as_raw_fd(), token).ok();
            }
            if let Some(fd) = self.socket_fds.remove(&token) {
                self.epoll.del_fd(fd, token).ok();
            }
        }
    }

    pub(crate) fn epoll_fd(&self) -> RawFd {
        self.epoll.fd
    }

    pub(crate) fn poll(
        &mut self,
        wait_time_ms: isize,
    ) -> Result<Vec<DhcpV6Event>, DhcpError> {
        let mut events = Vec::new();
        for token in self.epoll.poll(wait_time_ms)? {
            let event = DhcpV6Event::from_token(token)?;
            // One-shot timers are dead once fired, unlink the fd.
            if event.kind != DhcpV6EventKind::UdpPackageIn {
                self.del_timer(event)?;
            }
            events.push(event);
        }
        Ok(events)
    }
}

#[derive(Debug)]
struct DhcpEpoll {
    fd: RawFd,
}

impl DhcpEpoll {
    fn new() -> Result<Self, DhcpError> {
        Ok(Self {
            fd: epoll_create().map_err(|e| {
                let e = DhcpError::new(
                    ErrorKind::Bug,
                    format!("Failed to epoll_create(): {e}"),
                );
                log::error!("{}", e);
                e
            })?,
        })
    }

    fn add_fd(&self, fd: RawFd, token: u64) -> Result<(), DhcpError> {
        log::debug!("Adding fd {fd} to Epoll {}, token {token}", self.fd);
        let event = EpollEvent::new(EpollFlags::EPOLLIN, token);
        epoll_ctl(self.fd, EpollOp::EpollCtlAdd, fd, &mut Some(event))
            .map_err(|e| {
                let e = DhcpError::new(
                    ErrorKind::Bug,
                    format!(
                        "Failed to epoll_ctl({}, add, {fd}): {e}",
                        self.fd,
                    ),
                );
                log::error!("{}", e);
                e
            })
    }

    fn del_fd(&self, fd: RawFd, token: u64) -> Result<(), DhcpError> {
        log::debug!("Removing fd {fd} from Epoll {}, token {token}", self.fd);
        let event = EpollEvent::new(EpollFlags::EPOLLIN, token);
        epoll_ctl(self.fd, EpollOp::EpollCtlDel, fd, &mut Some(event))
            .map_err(|e| {
                let e = DhcpError::new(
                    ErrorKind::Bug,
                    format!(
                        "Failed to epoll_ctl({}, del, {fd}): {e}",
                        self.fd,
                    ),
                );
                log::error!("{}", e);
                e
            })
    }

    fn poll(&self, wait_time_ms: isize) -> Result<Vec<u64>, DhcpError> {
        let mut events: [EpollEvent; EVENT_BUFFER_COUNT] =
            [EpollEvent::empty(); EVENT_BUFFER_COUNT];

        let changed_count = epoll_wait(self.fd, &mut events, wait_time_ms)
            .map_err(|e| {
                let e = DhcpError::new(
                    ErrorKind::Bug,
                    format!("Failed on epoll_wait(): {e}"),
                );
                log::error!("{}", e);
                e
            })?;
        Ok(events[..changed_count].iter().map(|e| e.data()).collect())
    }
}
