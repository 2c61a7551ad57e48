//! Connection finite-state machine (FSM) types.
//!
//! The transfer is strictly one-shot and unidirectional, so the two sides
//! have different, much smaller state diagrams than full TCP.  Transitions
//! are *not* implemented here - they live in [`crate::sender`] and
//! [`crate::receiver`]; events (received packets, timer expiry) drive them,
//! and the reactors never consult anything but their own state.
//!
//! ```text
//!  sender:    CLOSED ──SYN sent──▶ SYN_SENT ──SYN_ACK──▶ ESTABLISHED
//!                ▲                                            │
//!                └────────FIN_ACK / retries exhausted──── FIN_WAIT
//!
//!  receiver:  CLOSED ──SYN──▶ SYN_RECEIVED ──ACK(1)──▶ ESTABLISHED ──FIN──▶ CLOSED
//! ```

/// States of the sending side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SenderState {
    /// No connection exists; initial and final state.
    #[default]
    Closed,
    /// SYN has been sent; waiting for SYN_ACK.
    SynSent,
    /// Handshake complete; file-name announcement and data transfer happen here.
    Established,
    /// FIN has been sent; waiting for FIN_ACK.
    FinWait,
}

/// States of the receiving side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReceiverState {
    /// No connection exists; initial and final state.
    #[default]
    Closed,
    /// SYN received and SYN_ACK sent; waiting for the third-handshake ACK.
    SynReceived,
    /// Handshake complete; consuming FILE_NAME / DATA until FIN.
    Established,
}

impl std::fmt::Display for SenderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl std::fmt::Display for ReceiverState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}
