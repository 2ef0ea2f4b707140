// SPDX-License-Identifier: Apache-2.0

use std::os::unix::io::{AsRawFd, RawFd};
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use futures::{
    task::{Context, Poll, Waker},
    Stream,
};
use nix::poll::{PollFd, PollFlags};

use crate::{DhcpError, DhcpV6Engine, DhcpV6LeaseEvent, ErrorKind};

const POLL_TIMEOUT: libc::c_int = 1000; // milliseconds

#[derive(Debug)]
struct ShareState {
    waker: Option<Waker>,
}

/// Async adapter around [DhcpV6Engine], a [Stream] of lease events.
/// Configure acquisitions through [DhcpV6EngineAsync::engine_mut] and
/// consume the stream from any executor.
#[derive(Debug)]
pub struct DhcpV6EngineAsync {
    engine: DhcpV6Engine,
    share_state: Arc<Mutex<ShareState>>,
}

impl DhcpV6EngineAsync {
    pub fn new(engine: DhcpV6Engine) -> Self {
        Self {
            engine,
            share_state: Arc::new(Mutex::new(ShareState { waker: None })),
        }
    }

    pub fn engine_mut(&mut self) -> &mut DhcpV6Engine {
        &mut self.engine
    }

    pub fn engine(&self) -> &DhcpV6Engine {
        &self.engine
    }
}

impl Stream for DhcpV6EngineAsync {
    type Item = Result<Vec<DhcpV6LeaseEvent>, DhcpError>;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        // Poll without wait
        match self.engine.poll(0) {
            Ok(events) => {
                let mut emits = Vec::new();
                for event in events {
                    match self.engine.process(event) {
                        Ok(mut new_emits) => emits.append(&mut new_emits),
                        Err(e) => return Poll::Ready(Some(Err(e))),
                    }
                }
                if !emits.is_empty() {
                    return Poll::Ready(Some(Ok(emits)));
                }
            }
            Err(e) => {
                log::error!("DHCPv6 engine poll error: {e}");
                return Poll::Ready(Some(Err(e)));
            }
        }

        let mut share_state = match self.share_state.lock() {
            Ok(s) => s,
            Err(e) => {
                return Poll::Ready(Some(Err(DhcpError::new(
                    ErrorKind::Bug,
                    format!(
                        "BUG: DhcpV6EngineAsync::poll_next() failed to \
                         acquire lock on share_state {e}"
                    ),
                ))));
            }
        };
        share_state.waker = Some(cx.waker().clone());
        drop(share_state);

        let fd = self.engine.as_raw_fd();
        let share_state = self.share_state.clone();
        std::thread::spawn(move || poll_thread(fd, share_state));
        Poll::Pending
    }
}

impl std::ops::Drop for DhcpV6EngineAsync {
    fn drop(&mut self) {
        if let Ok(mut s) = self.share_state.lock() {
            // Signal `poll_thread()` to quit
            s.waker = None;
        }
    }
}

// This function will be invoked in a thread to notify the async executor
// via `Waker::wake()`. Will quit when any of below conditions:
//  * Waker is set None.
//  * Got event and successfully invoked `Waker::wake`
//  * `poll()` failed (except EAGAIN).
fn poll_thread(fd: RawFd, share_state: Arc<Mutex<ShareState>>) {
    let mut poll_fds = [PollFd::new(
        fd,
        PollFlags::POLLIN
            | PollFlags::POLLOUT
            | PollFlags::POLLHUP
            | PollFlags::POLLERR,
    )];
    loop {
        match nix::poll::poll(&mut poll_fds, POLL_TIMEOUT) {
            // Timeout, check whether the waker is gone (engine quit).
            Ok(0) => {
                if let Ok(s) = share_state.lock() {
                    if s.waker.is_none() {
                        log::debug!("Waker is None, stopping poll_thread");
                        return;
                    }
                }
                continue;
            }
            Ok(_) => match share_state.lock() {
                Ok(mut s) => {
                    if let Some(waker) = s.waker.take() {
                        log::debug!(
                            "poll_thread got event, quitting poll_thread"
                        );
                        waker.wake();
                    } else {
                        log::debug!("Waker is None, stopping poll_thread");
                    }
                    return;
                }
                Err(e) => {
                    log::error!(
                        "BUG: poll_thread() failed to acquire lock: {e}"
                    );
                    return;
                }
            },
            Err(e) => {
                if e == nix::errno::Errno::EAGAIN {
                    continue;
                } else {
                    log::error!(
                        "BUG: poll_thread() got error from poll(): {e}"
                    );
                    return;
                }
            }
        }
    }
}

impl AsRawFd for DhcpV6Engine {
    fn as_raw_fd(&self) -> RawFd {
        self.epoll_fd()
    }
}
