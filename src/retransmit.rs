// SPDX-License-Identifier: Apache-2.0

use rand::Rng;

use crate::time::BootTime;

// RFC 3315 section 14: RAND is a uniform random number between -0.1 and
// +0.1. The magnitude is kept in units of 0.1%, applied as
// `value * rand / 1000`.
const RETRANS_JITTER: i64 = 100;

/// Retransmission bounds of one message exchange, RFC 3315 section 14:
///  IRT  Initial retransmission time
///  MRT  Maximum retransmission time, zero means unbounded
///  MRC  Maximum retransmission count, zero means unbounded
///  MRD  Maximum retransmission duration, zero means unbounded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct RetransParams {
    pub(crate) irt_ms: u64,
    pub(crate) mrt_ms: u64,
    pub(crate) mrc: u32,
    pub(crate) mrd_ms: u64,
    /// Initial delay before the first transmission, a MUST for Solicit,
    /// Confirm and Information-request (RFC 3315 17.1.2, 18.1.2, 18.1.5).
    pub(crate) delay_ms: u64,
}

/// Live retransmission state of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct RetransState {
    pub(crate) params: RetransParams,
    /// Time of the first transmission of the exchange.
    pub(crate) start: BootTime,
    /// Transmissions so far.
    pub(crate) count: u32,
    /// Pending initial delay, zero once the exchange is armed.
    pub(crate) delay_ms: u64,
    /// Current RT.
    pub(crate) rt_ms: u64,
    /// Absolute next-send time.
    pub(crate) deadline: BootTime,
}

fn randomize(value_ms: u64, jitter_min: i64, jitter_max: i64) -> u64 {
    let rand: i64 = rand::thread_rng().gen_range(jitter_min..=jitter_max);
    let jitter = (value_ms as i64) * rand / 1000;
    (value_ms as i64 + jitter).max(0) as u64
}

impl RetransState {
    pub(crate) fn set_params(&mut self, params: RetransParams) {
        *self = Self {
            params,
            delay_ms: params.delay_ms,
            ..Default::default()
        };
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.start.is_set() || self.delay_ms > 0
    }

    /// Randomized initial delay, `None` when this exchange starts without
    /// delay.
    pub(crate) fn initial_delay(&self) -> Option<u64> {
        if self.delay_ms > 0 {
            Some(randomize(
                self.delay_ms,
                -RETRANS_JITTER,
                RETRANS_JITTER,
            ))
        } else {
            None
        }
    }

    /// Arm the first RT of the exchange and stamp the transmission start.
    ///
    /// RFC 3315 section 14: RT = IRT + RAND*IRT. For the first Solicit
    /// transmission RAND MUST be strictly greater than 0 so that the first
    /// RT is strictly greater than IRT (section 17.1.2).
    pub(crate) fn arm_first(&mut self, strictly_positive_jitter: bool) -> u64 {
        self.delay_ms = 0;
        self.start = BootTime::now();
        self.count = 0;
        let jitter_min = if strictly_positive_jitter {
            1
        } else {
            -RETRANS_JITTER
        };
        self.rt_ms = randomize(self.params.irt_ms, jitter_min, RETRANS_JITTER);
        if strictly_positive_jitter && self.rt_ms <= self.params.irt_ms {
            // Integer jitter of a tiny IRT can truncate to zero.
            self.rt_ms = self.params.irt_ms + 1;
        }
        self.deadline = self.start.add_millis(self.rt_ms);
        self.rt_ms
    }

    /// Advance to the next RT: RT = 2*RTprev + RAND*RTprev, clamped by MRT
    /// when MRT is non-zero. Returns `None` once MRC is exhausted.
    pub(crate) fn advance(&mut self) -> Option<u64> {
        if self.params.mrc > 0 && self.count >= self.params.mrc {
            return None;
        }
        let mut rt = randomize(
            2 * self.rt_ms,
            -RETRANS_JITTER / 2,
            RETRANS_JITTER / 2,
        );
        if self.params.mrt_ms > 0 && rt > self.params.mrt_ms {
            rt = randomize(
                self.params.mrt_ms,
                -RETRANS_JITTER,
                RETRANS_JITTER,
            );
        }
        self.rt_ms = rt;
        self.deadline = BootTime::now().add_millis(rt);
        Some(rt)
    }

    /// Whether the maximum retransmission duration of the exchange has
    /// elapsed.
    pub(crate) fn mrd_expired(&self) -> bool {
        self.params.mrd_ms > 0
            && self.start.is_set()
            && self.start.elapsed_millis() >= self.params.mrd_ms
    }

    pub(crate) fn record_send(&mut self) {
        self.count += 1;
    }

    /// Zero the whole retransmission state in one step. The device clears
    /// the transaction id along with this.
    pub(crate) fn disarm(&mut self) {
        *self = Self::default();
    }

    /// Time since the first transmission in hundredths of a second, capped
    /// by `clamp`. Used for the elapsed-time option.
    pub(crate) fn uptime_hundredths(&self, clamp: u32) -> u32 {
        if !self.start.is_set() {
            return 0;
        }
        let uptime = self.start.elapsed_millis() / 10;
        std::cmp::min(uptime as u32, clamp)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn solicit_params() -> RetransParams {
        RetransParams {
            irt_ms: 1000,
            mrt_ms: 120_000,
            mrc: 0,
            mrd_ms: 0,
            delay_ms: 1000,
        }
    }

    #[test]
    fn first_selecting_rt_is_strictly_greater_than_irt() {
        for _ in 0..200 {
            let mut retrans = RetransState::default();
            retrans.set_params(solicit_params());
            let rt = retrans.arm_first(true);
            assert!(rt > 1000);
            assert!(rt <= 1100);
        }
    }

    #[test]
    fn first_rt_jitter_is_within_ten_percent() {
        for _ in 0..200 {
            let mut retrans = RetransState::default();
            retrans.set_params(RetransParams {
                irt_ms: 1000,
                ..Default::default()
            });
            let rt = retrans.arm_first(false);
            assert!((900..=1100).contains(&rt));
        }
    }

    #[test]
    fn advance_doubles_and_clamps_to_mrt() {
        let mut retrans = RetransState::default();
        retrans.set_params(RetransParams {
            irt_ms: 1000,
            mrt_ms: 30_000,
            mrc: 0,
            mrd_ms: 0,
            delay_ms: 0,
        });
        retrans.arm_first(false);
        let mut prev = retrans.rt_ms;
        for _ in 0..10 {
            let rt = retrans.advance().unwrap();
            // Doubling with at most 5% down jitter never shrinks.
            assert!(rt >= prev || rt >= 27_000);
            assert!(rt <= 33_000);
            prev = rt;
        }
        // Tail is pinned at MRT with ten percent jitter.
        assert!((27_000..=33_000).contains(&retrans.rt_ms));
    }

    #[test]
    fn advance_respects_mrc() {
        let mut retrans = RetransState::default();
        retrans.set_params(RetransParams {
            irt_ms: 1000,
            mrt_ms: 30_000,
            mrc: 3,
            mrd_ms: 0,
            delay_ms: 0,
        });
        retrans.arm_first(false);
        for _ in 0..3 {
            retrans.record_send();
        }
        assert!(retrans.count <= 3);
        assert_eq!(retrans.advance(), None);
    }

    #[test]
    fn initial_delay_only_when_configured() {
        let mut retrans = RetransState::default();
        retrans.set_params(solicit_params());
        let delay = retrans.initial_delay().unwrap();
        assert!((900..=1100).contains(&delay));

        retrans.set_params(RetransParams {
            delay_ms: 0,
            ..solicit_params()
        });
        assert_eq!(retrans.initial_delay(), None);
    }

    #[test]
    fn disarm_zeroes_state() {
        let mut retrans = RetransState::default();
        retrans.set_params(solicit_params());
        retrans.arm_first(true);
        retrans.record_send();
        retrans.disarm();
        assert_eq!(retrans, RetransState::default());
        assert!(!retrans.is_armed());
    }

    #[test]
    fn uptime_is_clamped() {
        let mut retrans = RetransState::default();
        assert_eq!(retrans.uptime_hundredths(0xffff), 0);
        retrans.start = BootTime::now() - BootTime { sec: 3600, nsec: 0 };
        assert_eq!(retrans.uptime_hundredths(0xffff), 0xffff);
        assert!(retrans.uptime_hundredths(100) == 100);
    }
}
