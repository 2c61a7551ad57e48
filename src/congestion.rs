//! TCP-Reno congestion control.
//!
//! [`RenoController`] owns the congestion window and the duplicate-ACK
//! counter; the sender consults [`window_limit`](RenoController::window_limit)
//! before filling its sliding window and reports three kinds of events:
//!
//! | Event                        | Reaction                                       |
//! |------------------------------|------------------------------------------------|
//! | New cumulative ACK           | slow start: `cwnd += 1`; avoidance: `+= 1/cwnd`; recovery: deflate to `ssthresh` |
//! | Third duplicate ACK          | `ssthresh = max(cwnd/2, 2)`, `cwnd = ssthresh + 3`, enter fast recovery |
//! | Further dups in recovery     | `cwnd += 1` (window inflation)                 |
//! | Retransmission timeout       | `ssthresh = max(cwnd/2, 2)`, `cwnd = 1`, back to slow start |
//!
//! The window is real-valued so congestion avoidance can grow by roughly one
//! packet per RTT; the sender uses its floor.  This module only manages
//! state; retransmission itself is the caller's responsibility.

use crate::packet::WINDOW_SIZE;

/// Duplicate-ACK count that triggers fast retransmit.
const DUP_ACK_THRESHOLD: u32 = 3;

/// Phases of the Reno algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CongestionState {
    SlowStart,
    CongestionAvoidance,
    FastRecovery,
}

impl std::fmt::Display for CongestionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Reno congestion controller for one transfer.
#[derive(Debug)]
pub struct RenoController {
    state: CongestionState,
    /// Congestion window in packets; never below 1.0.
    cwnd: f64,
    /// Slow-start threshold in packets; never below 2.
    ssthresh: u32,
    dup_acks: u32,
}

impl Default for RenoController {
    fn default() -> Self {
        Self::new()
    }
}

impl RenoController {
    pub fn new() -> Self {
        Self {
            state: CongestionState::SlowStart,
            cwnd: 1.0,
            ssthresh: u32::from(WINDOW_SIZE),
            dup_acks: 0,
        }
    }

    /// How many packets may be in flight right now:
    /// `min(floor(cwnd), WINDOW_SIZE)`.
    pub fn window_limit(&self) -> u32 {
        (self.cwnd as u32).min(u32::from(WINDOW_SIZE))
    }

    pub fn state(&self) -> CongestionState {
        self.state
    }

    pub fn cwnd(&self) -> f64 {
        self.cwnd
    }

    pub fn ssthresh(&self) -> u32 {
        self.ssthresh
    }

    pub fn dup_acks(&self) -> u32 {
        self.dup_acks
    }

    /// A cumulative ACK advanced the window.
    pub fn on_new_ack(&mut self) {
        self.dup_acks = 0;
        match self.state {
            CongestionState::SlowStart => {
                self.cwnd += 1.0;
                if self.cwnd >= f64::from(self.ssthresh) {
                    self.state = CongestionState::CongestionAvoidance;
                    log::debug!("[reno] slow start ends, cwnd={:.2}", self.cwnd);
                }
            }
            CongestionState::CongestionAvoidance => {
                self.cwnd += 1.0 / self.cwnd;
            }
            CongestionState::FastRecovery => {
                // Deflate the inflated window once the loss is repaired.
                self.cwnd = f64::from(self.ssthresh);
                self.state = CongestionState::CongestionAvoidance;
                log::debug!("[reno] fast recovery ends, cwnd={:.2}", self.cwnd);
            }
        }
    }

    /// A duplicate cumulative ACK arrived.  Returns `true` exactly on the
    /// third duplicate: the caller should fast-retransmit the missing packet
    /// and, if it did, report it via [`on_fast_retransmit`](Self::on_fast_retransmit).
    pub fn on_duplicate_ack(&mut self) -> bool {
        self.dup_acks += 1;
        if self.dup_acks == DUP_ACK_THRESHOLD {
            return true;
        }
        if self.dup_acks > DUP_ACK_THRESHOLD && self.state == CongestionState::FastRecovery {
            // Each further duplicate means one more packet left the network.
            self.cwnd += 1.0;
        }
        false
    }

    /// The missing packet was fast-retransmitted; halve and enter recovery.
    pub fn on_fast_retransmit(&mut self) {
        self.ssthresh = ((self.cwnd / 2.0) as u32).max(2);
        self.cwnd = f64::from(self.ssthresh) + 3.0;
        self.state = CongestionState::FastRecovery;
        log::debug!(
            "[reno] fast retransmit: ssthresh={} cwnd={:.2}",
            self.ssthresh,
            self.cwnd
        );
    }

    /// A retransmission timeout fired: collapse back to slow start.
    pub fn on_timeout(&mut self) {
        self.ssthresh = ((self.cwnd / 2.0) as u32).max(2);
        self.cwnd = 1.0;
        self.state = CongestionState::SlowStart;
        self.dup_acks = 0;
        log::debug!("[reno] timeout: ssthresh={} cwnd=1", self.ssthresh);
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_in_slow_start_with_unit_window() {
        let c = RenoController::new();
        assert_eq!(c.state(), CongestionState::SlowStart);
        assert_eq!(c.window_limit(), 1);
        assert_eq!(c.ssthresh(), u32::from(WINDOW_SIZE));
    }

    #[test]
    fn slow_start_grows_by_one_per_ack() {
        let mut c = RenoController::new();
        c.on_new_ack();
        c.on_new_ack();
        assert_eq!(c.window_limit(), 3);
        assert_eq!(c.state(), CongestionState::SlowStart);
    }

    #[test]
    fn slow_start_transitions_at_ssthresh() {
        let mut c = RenoController::new();
        for _ in 0..WINDOW_SIZE {
            c.on_new_ack();
        }
        assert_eq!(c.state(), CongestionState::CongestionAvoidance);
    }

    #[test]
    fn congestion_avoidance_is_additive() {
        let mut c = RenoController::new();
        for _ in 0..WINDOW_SIZE {
            c.on_new_ack();
        }
        let before = c.cwnd();
        c.on_new_ack();
        let grown = c.cwnd() - before;
        assert!(grown > 0.0 && grown < 1.0, "expected sub-packet growth, got {grown}");
    }

    #[test]
    fn window_limit_is_capped_at_window_size() {
        let mut c = RenoController::new();
        for _ in 0..100 {
            c.on_new_ack();
        }
        assert_eq!(c.window_limit(), u32::from(WINDOW_SIZE));
    }

    #[test]
    fn third_duplicate_ack_requests_fast_retransmit() {
        let mut c = RenoController::new();
        assert!(!c.on_duplicate_ack());
        assert!(!c.on_duplicate_ack());
        assert!(c.on_duplicate_ack());
        // Still the caller's move; state unchanged until on_fast_retransmit.
        assert_eq!(c.state(), CongestionState::SlowStart);
    }

    #[test]
    fn fast_retransmit_halves_and_inflates() {
        let mut c = RenoController::new();
        for _ in 0..9 {
            c.on_new_ack(); // cwnd = 10
        }
        for _ in 0..2 {
            c.on_duplicate_ack();
        }
        assert!(c.on_duplicate_ack());
        c.on_fast_retransmit();
        assert_eq!(c.state(), CongestionState::FastRecovery);
        assert_eq!(c.ssthresh(), 5);
        assert_eq!(c.window_limit(), 8); // ssthresh + 3

        // Further duplicates inflate by one each.
        c.on_duplicate_ack();
        assert_eq!(c.window_limit(), 9);
    }

    #[test]
    fn new_ack_deflates_out_of_fast_recovery() {
        let mut c = RenoController::new();
        for _ in 0..9 {
            c.on_new_ack();
        }
        for _ in 0..3 {
            c.on_duplicate_ack();
        }
        c.on_fast_retransmit();
        c.on_new_ack();
        assert_eq!(c.state(), CongestionState::CongestionAvoidance);
        assert_eq!(c.window_limit(), c.ssthresh());
        assert_eq!(c.dup_acks(), 0);
    }

    #[test]
    fn timeout_collapses_to_slow_start() {
        let mut c = RenoController::new();
        for _ in 0..9 {
            c.on_new_ack();
        }
        c.on_timeout();
        assert_eq!(c.state(), CongestionState::SlowStart);
        assert_eq!(c.window_limit(), 1);
        assert_eq!(c.ssthresh(), 5);
        assert_eq!(c.dup_acks(), 0);
    }

    #[test]
    fn ssthresh_floor_is_two() {
        let mut c = RenoController::new();
        c.on_timeout(); // cwnd was 1.0
        assert_eq!(c.ssthresh(), 2);
        c.on_timeout();
        assert_eq!(c.ssthresh(), 2);
    }
}
