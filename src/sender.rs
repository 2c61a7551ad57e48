//! Send side: connection setup, sliding-window transfer, teardown.
//!
//! [`FileSender`] drives one complete transfer:
//!
//! 1. [`connect`](FileSender::connect) - three-way handshake (SYN / SYN_ACK /
//!    ACK) with peer locking.
//! 2. [`announce`](FileSender::announce) - FILE_NAME / FILE_NAME_ACK
//!    sub-handshake carrying the base name of the file.
//! 3. [`transfer`](FileSender::transfer) - sliding-window data transfer with
//!    Reno congestion control, SACK-driven pruning, fast retransmit on three
//!    duplicate ACKs and timeout retransmission.
//! 4. [`disconnect`](FileSender::disconnect) - FIN / FIN_ACK, best effort.
//!
//! The sender is a single-task cooperative reactor: each loop iteration
//! opportunistically fills the window, drains one inbound datagram, runs the
//! timeout scan, and yields for about a millisecond.  There are no worker
//! tasks and no shared state.
//!
//! # Sequence-number layout
//!
//! Sequence numbers count packets, not bytes.  One DATA packet consumes one
//! sequence number.
//!
//! ```text
//!       base              next_seq
//!        │                    │
//!  ──────┼────────────────────┼──────────────────▶ seq space
//!        │ ◀── in flight ───▶ │ ◀── sendable ──▶
//!                min(⌊cwnd⌋, WINDOW_SIZE)
//! ```

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::congestion::RenoController;
use crate::packet::{Packet, PacketType, MAX_DATA_SIZE};
use crate::socket::Socket;
use crate::state::SenderState;
use crate::timer::{RetryTimer, MAX_RETRIES, RETRANSMIT_TIMEOUT};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Initial sequence number.  Fixed: the sequence space is per-packet small
/// integers and must stay far from wrap-around within one transfer.
const INITIAL_SEQ: u32 = 0;

/// Poll cadence while waiting on a control-packet reply.
const CONTROL_POLL: Duration = Duration::from_millis(10);

/// Poll cadence of the transfer loop; only there to avoid spinning.
const TRANSFER_POLL: Duration = Duration::from_millis(1);

// ---------------------------------------------------------------------------
// Configuration, statistics, errors
// ---------------------------------------------------------------------------

/// Tunables for one [`FileSender`].
#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Local address to bind; port 0 for an ephemeral port.
    pub local_addr: SocketAddr,
    /// Receiver address all packets are sent to.
    pub peer_addr: SocketAddr,
    /// Retransmission timeout for control and data packets.
    pub timeout: Duration,
    /// Retry budget for SYN, FILE_NAME and FIN.
    pub max_retries: u32,
}

impl SenderConfig {
    pub fn new(local_addr: SocketAddr, peer_addr: SocketAddr) -> Self {
        Self {
            local_addr,
            peer_addr,
            timeout: RETRANSMIT_TIMEOUT,
            max_retries: MAX_RETRIES,
        }
    }
}

/// Transfer counters, kept for the end-of-run summary.
#[derive(Debug, Default, Clone, Copy)]
pub struct SenderStats {
    /// Every datagram handed to the socket, control packets included.
    pub packets_sent: u64,
    /// Serialized bytes handed to the socket.
    pub bytes_sent: u64,
    /// DATA packets sent more than once (timeout or fast retransmit).
    pub retransmissions: u64,
}

/// Errors surfaced by the send side.
///
/// Protocol-level anomalies (bad checksums, unexpected packets, foreign
/// endpoints) are recovered locally and never appear here.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// No valid SYN_ACK after the full retry budget.
    #[error("handshake failed after {attempts} retransmissions")]
    HandshakeFailed { attempts: u32 },
    /// No FILE_NAME_ACK after the full retry budget.
    #[error("file name announcement not acknowledged after {attempts} retransmissions")]
    AnnounceFailed { attempts: u32 },
    /// Operation called in the wrong state (e.g. `transfer` before `connect`).
    #[error("operation not valid in state {0}")]
    BadState(SenderState),
}

// ---------------------------------------------------------------------------
// FileSender
// ---------------------------------------------------------------------------

/// A sent-but-unacknowledged DATA packet.
#[derive(Debug)]
struct InFlight {
    packet: Packet,
    /// Most recent transmission time; the timeout scan compares against it.
    sent_at: Instant,
}

/// Send side of one file transfer.  Single-shot: connect, announce, transfer,
/// disconnect, drop.
#[derive(Debug)]
pub struct FileSender {
    socket: Socket,
    /// Configured receiver address; all packets go here.
    peer: SocketAddr,
    /// First endpoint that answered the SYN; inbound datagrams from anyone
    /// else are dropped before parsing.
    locked_peer: Option<SocketAddr>,
    state: SenderState,
    /// Our current sequence number (ISN, then ISN+1 once established).
    seq_num: u32,
    /// Oldest unacknowledged DATA sequence.
    base: u32,
    /// Next DATA sequence to transmit.
    next_seq: u32,
    in_flight: BTreeMap<u32, InFlight>,
    reno: RenoController,
    /// Highest cumulative ACK seen; equal ACKs below `base` count as
    /// duplicates.
    last_acked: u32,
    timeout: Duration,
    max_retries: u32,
    stats: SenderStats,
}

impl FileSender {
    /// Bind the local endpoint.  No packets are sent until
    /// [`connect`](Self::connect).
    pub async fn bind(config: SenderConfig) -> Result<Self, SendError> {
        let socket = Socket::bind(config.local_addr).await?;
        Ok(Self {
            socket,
            peer: config.peer_addr,
            locked_peer: None,
            state: SenderState::Closed,
            seq_num: INITIAL_SEQ,
            base: INITIAL_SEQ,
            next_seq: INITIAL_SEQ,
            in_flight: BTreeMap::new(),
            reno: RenoController::new(),
            last_acked: 0,
            timeout: config.timeout,
            max_retries: config.max_retries,
            stats: SenderStats::default(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr
    }

    pub fn state(&self) -> SenderState {
        self.state
    }

    pub fn stats(&self) -> SenderStats {
        self.stats
    }

    // -----------------------------------------------------------------------
    // Connection establishment
    // -----------------------------------------------------------------------

    /// Three-way handshake: send SYN, await SYN_ACK, answer with ACK.
    ///
    /// Locks the peer to the first endpoint that answers with a valid
    /// SYN_ACK.  Gives up after the configured retry budget.
    pub async fn connect(&mut self) -> Result<(), SendError> {
        if self.state != SenderState::Closed {
            return Err(SendError::BadState(self.state));
        }

        let syn = Packet::syn(self.seq_num);
        log::info!("[sender] connecting to {}", self.peer);
        self.send_packet(&syn).await?;
        self.state = SenderState::SynSent;

        let mut timer = RetryTimer::start(self.timeout, self.max_retries);
        loop {
            if timer.expired() {
                if timer.exhausted() {
                    self.state = SenderState::Closed;
                    return Err(SendError::HandshakeFailed {
                        attempts: timer.retries(),
                    });
                }
                log::debug!("[sender] SYN timeout, retry {}", timer.retries() + 1);
                self.send_packet(&syn).await?;
                timer.rearm();
            }

            if let Some((pkt, from)) = self.recv_packet()? {
                if pkt.kind == PacketType::SynAck
                    && pkt.ack_num == self.seq_num.wrapping_add(1)
                {
                    self.locked_peer = Some(from);
                    self.seq_num = self.seq_num.wrapping_add(1);
                    self.base = self.seq_num;
                    self.next_seq = self.seq_num;
                    self.state = SenderState::Established;

                    // Third handshake step: acknowledge the responder's ISN.
                    let ack =
                        Packet::ack(self.seq_num, pkt.seq_num.wrapping_add(1), 0, Vec::new());
                    self.send_packet(&ack).await?;
                    log::info!("[sender] connection established with {from}");
                    return Ok(());
                }
                log::debug!("[sender] ignoring {} while connecting", pkt.kind);
            }

            tokio::time::sleep(CONTROL_POLL).await;
        }
    }

    // -----------------------------------------------------------------------
    // File-name announcement
    // -----------------------------------------------------------------------

    /// Announce the (path-stripped) file name and wait for FILE_NAME_ACK.
    ///
    /// The announcement does not consume sequence space; data transfer must
    /// not start until it is acknowledged.
    pub async fn announce(&mut self, file_name: &str) -> Result<(), SendError> {
        if self.state != SenderState::Established {
            return Err(SendError::BadState(self.state));
        }

        let pkt = Packet::file_name(self.seq_num, file_name);
        log::info!("[sender] announcing file name {file_name:?}");
        match self.request_reply(&pkt, PacketType::FileNameAck).await? {
            Some(_) => Ok(()),
            None => Err(SendError::AnnounceFailed {
                attempts: self.max_retries,
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Data transfer
    // -----------------------------------------------------------------------

    /// Send `data` as consecutive DATA packets through the sliding window.
    ///
    /// Returns once every packet has been cumulatively acknowledged.  A
    /// zero-length transfer returns immediately.
    pub async fn transfer(&mut self, data: &[u8]) -> Result<(), SendError> {
        if self.state != SenderState::Established {
            return Err(SendError::BadState(self.state));
        }

        let first_seq = self.base;
        let total_chunks = data.len().div_ceil(MAX_DATA_SIZE) as u32;
        let end_seq = first_seq + total_chunks;
        log::info!(
            "[sender] transferring {} bytes in {} packet(s)",
            data.len(),
            total_chunks
        );
        let started = Instant::now();

        while self.base < end_seq {
            // Fill the window with new DATA packets.
            let limit = self.reno.window_limit();
            while self.next_seq < self.base + limit && self.next_seq < end_seq {
                let offset = (self.next_seq - first_seq) as usize * MAX_DATA_SIZE;
                let end = (offset + MAX_DATA_SIZE).min(data.len());
                let pkt = Packet::data(self.next_seq, data[offset..end].to_vec());
                self.send_packet(&pkt).await?;
                log::debug!(
                    "[sender] → DATA seq={} len={} in_flight={}",
                    self.next_seq,
                    end - offset,
                    self.in_flight.len() + 1
                );
                self.in_flight.insert(
                    self.next_seq,
                    InFlight {
                        packet: pkt,
                        sent_at: Instant::now(),
                    },
                );
                self.next_seq += 1;
            }

            // Drain one inbound packet, if any.
            if let Some((pkt, _)) = self.recv_packet()? {
                if pkt.kind == PacketType::Ack {
                    self.handle_ack(&pkt).await?;
                } else {
                    log::debug!("[sender] ignoring {} during transfer", pkt.kind);
                }
            }

            self.scan_timeouts().await?;
            tokio::time::sleep(TRANSFER_POLL).await;
        }

        log::info!(
            "[sender] transfer complete in {:.0?} ({} retransmissions)",
            started.elapsed(),
            self.stats.retransmissions
        );
        Ok(())
    }

    /// Read `path`, announce its base name, and transfer its contents.
    pub async fn send_file(&mut self, path: impl AsRef<Path>) -> Result<(), SendError> {
        let path = path.as_ref();
        let data = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.announce(&name).await?;
        self.transfer(&data).await
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    /// Graceful close: send FIN and wait for FIN_ACK.
    ///
    /// Best effort: once the retry budget is spent the connection is
    /// considered closed regardless.
    pub async fn disconnect(&mut self) -> Result<(), SendError> {
        if self.state == SenderState::Closed {
            return Ok(());
        }

        let fin = Packet::fin(self.next_seq);
        log::info!("[sender] closing connection");
        self.state = SenderState::FinWait;
        match self.request_reply(&fin, PacketType::FinAck).await? {
            Some(_) => log::info!("[sender] connection closed cleanly"),
            None => log::warn!("[sender] FIN not acknowledged, closing anyway"),
        }
        self.state = SenderState::Closed;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // ACK handling
    // -----------------------------------------------------------------------

    /// Process one inbound ACK: cumulative advance, duplicate counting with
    /// fast retransmit, and SACK pruning.
    async fn handle_ack(&mut self, ack: &Packet) -> Result<(), SendError> {
        let ack_num = ack.ack_num;

        if ack_num > self.base {
            // New cumulative ACK: everything below ack_num is delivered.
            self.base = ack_num;
            self.reno.on_new_ack();
            self.in_flight = self.in_flight.split_off(&ack_num);
            self.last_acked = ack_num;
            log::debug!(
                "[sender] ← ACK {} (in_flight={} cwnd={:.2})",
                ack_num,
                self.in_flight.len(),
                self.reno.cwnd()
            );
        } else if ack_num == self.last_acked {
            if self.reno.on_duplicate_ack() {
                // Third duplicate: the packet at ack_num is presumed lost.
                let lost = self.in_flight.get_mut(&ack_num).map(|entry| {
                    entry.sent_at = Instant::now();
                    entry.packet.clone()
                });
                if let Some(pkt) = lost {
                    log::debug!("[sender] fast retransmit seq={ack_num}");
                    self.send_packet(&pkt).await?;
                    self.stats.retransmissions += 1;
                    self.reno.on_fast_retransmit();
                }
            }
        }

        // SACK blocks confirm out-of-order deliveries; they never advance
        // base, but the covered packets must not be retransmitted again.
        for sack in &ack.sack_blocks {
            if sack.left >= sack.right {
                continue;
            }
            let covered: Vec<u32> = self
                .in_flight
                .range(sack.left..sack.right)
                .map(|(seq, _)| *seq)
                .collect();
            for seq in covered {
                self.in_flight.remove(&seq);
                log::debug!("[sender] SACK covers seq={seq}");
            }
        }

        Ok(())
    }

    /// Retransmit every in-flight packet whose last transmission is older
    /// than the timeout; each one collapses the congestion window.
    async fn scan_timeouts(&mut self) -> Result<(), SendError> {
        let now = Instant::now();
        let expired: Vec<u32> = self
            .in_flight
            .iter()
            .filter(|(_, e)| now.duration_since(e.sent_at) > self.timeout)
            .map(|(seq, _)| *seq)
            .collect();

        for seq in expired {
            let pkt = self.in_flight.get_mut(&seq).map(|entry| {
                entry.sent_at = now;
                entry.packet.clone()
            });
            if let Some(pkt) = pkt {
                log::debug!("[sender] timeout, retransmitting seq={seq}");
                self.send_packet(&pkt).await?;
                self.stats.retransmissions += 1;
                self.reno.on_timeout();
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Plumbing
    // -----------------------------------------------------------------------

    /// Send a control packet and wait for a reply of the given type under
    /// the retry policy.  `None` means the budget was spent without an
    /// answer.
    async fn request_reply(
        &mut self,
        packet: &Packet,
        expect: PacketType,
    ) -> Result<Option<Packet>, SendError> {
        self.send_packet(packet).await?;
        let mut timer = RetryTimer::start(self.timeout, self.max_retries);
        loop {
            if timer.expired() {
                if timer.exhausted() {
                    return Ok(None);
                }
                log::debug!(
                    "[sender] {} timeout, retry {}",
                    packet.kind,
                    timer.retries() + 1
                );
                self.send_packet(packet).await?;
                timer.rearm();
            }

            if let Some((pkt, _)) = self.recv_packet()? {
                if pkt.kind == expect {
                    return Ok(Some(pkt));
                }
                log::debug!("[sender] ignoring {} while waiting for {expect}", pkt.kind);
            }

            tokio::time::sleep(CONTROL_POLL).await;
        }
    }

    async fn send_packet(&mut self, packet: &Packet) -> Result<(), SendError> {
        let n = self.socket.send_to(packet, self.peer).await?;
        self.stats.packets_sent += 1;
        self.stats.bytes_sent += n as u64;
        Ok(())
    }

    /// Non-blocking receive with peer-lock filtering and decoding.
    ///
    /// Datagrams from foreign endpoints are dropped before parsing;
    /// undecodable or corrupted datagrams are dropped silently (the peer
    /// will retransmit).
    fn recv_packet(&mut self) -> Result<Option<(Packet, SocketAddr)>, SendError> {
        let Some((buf, from)) = self.socket.try_recv_from()? else {
            return Ok(None);
        };
        if let Some(locked) = self.locked_peer {
            if from != locked {
                log::debug!("[sender] dropping datagram from foreign endpoint {from}");
                return Ok(None);
            }
        }
        match Packet::decode(&buf) {
            Ok(pkt) => Ok(Some((pkt, from))),
            Err(e) => {
                log::debug!("[sender] dropping bad datagram from {from}: {e}");
                Ok(None)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::congestion::CongestionState;
    use crate::packet::{SackBlock, WINDOW_SIZE};

    /// A sender in the Established state with `n` fake in-flight packets
    /// (seq 1..=n), as if the handshake had completed.
    async fn established_with_in_flight(n: u32) -> FileSender {
        let config = SenderConfig::new(
            "127.0.0.1:0".parse().unwrap(),
            // Nothing listens here; test packets vanish, which is fine.
            "127.0.0.1:9".parse().unwrap(),
        );
        let mut s = FileSender::bind(config).await.expect("bind");
        s.state = SenderState::Established;
        s.seq_num = 1;
        s.base = 1;
        s.last_acked = 1;
        s.next_seq = n + 1;
        for seq in 1..=n {
            s.in_flight.insert(
                seq,
                InFlight {
                    packet: Packet::data(seq, vec![0u8; 16]),
                    sent_at: Instant::now(),
                },
            );
        }
        s
    }

    #[tokio::test]
    async fn cumulative_ack_prunes_prefix_and_advances_base() {
        let mut s = established_with_in_flight(4).await;
        let ack = Packet::ack(0, 3, WINDOW_SIZE, Vec::new());
        s.handle_ack(&ack).await.expect("handle_ack");

        assert_eq!(s.base, 3);
        assert_eq!(s.last_acked, 3);
        let remaining: Vec<u32> = s.in_flight.keys().copied().collect();
        assert_eq!(remaining, vec![3, 4]);
    }

    #[tokio::test]
    async fn third_duplicate_ack_fast_retransmits() {
        let mut s = established_with_in_flight(4).await;
        let dup = Packet::ack(0, 1, WINDOW_SIZE, Vec::new());
        for _ in 0..2 {
            s.handle_ack(&dup).await.expect("handle_ack");
        }
        assert_eq!(s.stats.retransmissions, 0);

        s.handle_ack(&dup).await.expect("handle_ack");
        assert_eq!(s.stats.retransmissions, 1);
        assert_eq!(s.reno.state(), CongestionState::FastRecovery);
        // The retransmitted packet stays in flight until acknowledged.
        assert!(s.in_flight.contains_key(&1));
    }

    #[tokio::test]
    async fn sack_blocks_prune_without_advancing_base() {
        let mut s = established_with_in_flight(6).await;
        let ack = Packet::ack(
            0,
            1,
            WINDOW_SIZE,
            vec![SackBlock { left: 3, right: 5 }],
        );
        s.handle_ack(&ack).await.expect("handle_ack");

        assert_eq!(s.base, 1);
        let remaining: Vec<u32> = s.in_flight.keys().copied().collect();
        assert_eq!(remaining, vec![1, 2, 5, 6]);
    }

    #[tokio::test]
    async fn sacked_packets_are_never_retransmitted() {
        let mut s = established_with_in_flight(3).await;
        let ack = Packet::ack(0, 1, WINDOW_SIZE, vec![SackBlock { left: 2, right: 3 }]);
        s.handle_ack(&ack).await.expect("handle_ack");

        // Make every remaining entry stale and run the scan.
        let stale = Instant::now() - Duration::from_secs(10);
        for entry in s.in_flight.values_mut() {
            entry.sent_at = stale;
        }
        s.scan_timeouts().await.expect("scan");

        // seq 2 was SACKed away, so only 1 and 3 could have been resent.
        assert_eq!(s.stats.retransmissions, 2);
        assert!(!s.in_flight.contains_key(&2));
    }

    #[tokio::test]
    async fn timeout_scan_collapses_congestion_window() {
        let mut s = established_with_in_flight(2).await;
        for _ in 0..5 {
            s.reno.on_new_ack(); // grow the window first
        }
        let stale = Instant::now() - Duration::from_secs(10);
        for entry in s.in_flight.values_mut() {
            entry.sent_at = stale;
        }
        s.scan_timeouts().await.expect("scan");

        assert_eq!(s.reno.state(), CongestionState::SlowStart);
        assert_eq!(s.reno.window_limit(), 1);
        assert_eq!(s.stats.retransmissions, 2);
    }

    #[tokio::test]
    async fn stale_ack_is_ignored() {
        let mut s = established_with_in_flight(4).await;
        s.handle_ack(&Packet::ack(0, 4, WINDOW_SIZE, Vec::new()))
            .await
            .expect("handle_ack");
        assert_eq!(s.base, 4);

        // An old ACK must neither regress base nor count as duplicate.
        s.handle_ack(&Packet::ack(0, 2, WINDOW_SIZE, Vec::new()))
            .await
            .expect("handle_ack");
        assert_eq!(s.base, 4);
        assert_eq!(s.reno.dup_acks(), 0);
    }

    #[tokio::test]
    async fn operations_require_matching_state() {
        let config = SenderConfig::new(
            "127.0.0.1:0".parse().unwrap(),
            "127.0.0.1:9".parse().unwrap(),
        );
        let mut s = FileSender::bind(config).await.expect("bind");
        assert!(matches!(
            s.transfer(b"data").await,
            Err(SendError::BadState(SenderState::Closed))
        ));
        assert!(matches!(
            s.announce("f.txt").await,
            Err(SendError::BadState(SenderState::Closed))
        ));
    }
}
