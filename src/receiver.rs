//! Receive side: connection acceptance, reassembly, acknowledgment.
//!
//! [`FileReceiver`] is a single-task cooperative reactor whose
//! [`run`](FileReceiver::run) loop consumes datagrams until a FIN arrives:
//!
//! 1. Datagrams from a foreign endpoint are dropped before parsing once a
//!    peer is locked; undecodable or corrupted datagrams are dropped.
//! 2. SYN locks the peer, answers SYN_ACK, and waits in `SynReceived` for
//!    the third-handshake ACK.
//! 3. FILE_NAME opens the sink (base name + `_output` + extension) and is
//!    acknowledged.
//! 4. DATA is de-duplicated via the received set, buffered out of order,
//!    drained in order into the sink, and acknowledged cumulatively with up
//!    to three SACK blocks describing buffered islands.
//! 5. FIN closes the sink, answers FIN_ACK, and ends the loop.
//!
//! Bytes reach the sink strictly in sequence order; a write failure is
//! reported and the receiver keeps consuming (and acknowledging) datagrams
//! until FIN so the sender can finish cleanly.

use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::packet::{Packet, PacketType, SackBlock, MAX_SACK_BLOCKS, WINDOW_SIZE};
use crate::socket::Socket;
use crate::state::ReceiverState;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// The receiver's ISN, carried in SYN_ACK.  The third-handshake ACK must
/// acknowledge `LOCAL_ISN + 1`.
const LOCAL_ISN: u32 = 0;

/// Poll cadence of the reactor loop; only there to avoid spinning.
const POLL_INTERVAL: Duration = Duration::from_millis(1);

// ---------------------------------------------------------------------------
// Configuration, statistics, errors
// ---------------------------------------------------------------------------

/// Tunables for one [`FileReceiver`].
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// Local address to listen on; port 0 for an ephemeral port.
    pub bind_addr: SocketAddr,
    /// Directory the output file is created in.
    pub output_dir: PathBuf,
}

impl ReceiverConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            output_dir: PathBuf::from("."),
        }
    }
}

/// Transfer counters, kept for the end-of-run summary.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReceiverStats {
    /// Every datagram that survived peer-lock filtering and decoding.
    pub packets_received: u64,
    /// Payload bytes of distinct DATA packets.
    pub bytes_received: u64,
}

/// Errors surfaced by the receive side.
///
/// Sink failures are deliberately absent: they are logged and the receiver
/// keeps consuming until FIN (the sender must be able to finish).
#[derive(Debug, Error)]
pub enum RecvError {
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// FileReceiver
// ---------------------------------------------------------------------------

/// Receive side of one file transfer.  Single-shot: bind, run to FIN, drop.
#[derive(Debug)]
pub struct FileReceiver {
    socket: Socket,
    output_dir: PathBuf,
    state: ReceiverState,
    /// Next in-order sequence awaited; strictly increasing.
    expected_seq: u32,
    /// Out-of-order payloads keyed by sequence; every key is ≥ `expected_seq`.
    reorder_buffer: BTreeMap<u32, Vec<u8>>,
    /// Every DATA sequence ever accepted; suppresses duplicates and feeds
    /// SACK construction.
    received_seqs: BTreeSet<u32>,
    /// The accepted client; set by the first SYN, filters everything after.
    locked_peer: Option<SocketAddr>,
    /// Opened lazily when FILE_NAME arrives, closed on FIN.
    sink: Option<File>,
    output_path: Option<PathBuf>,
    /// Set after a failed create/write; data is consumed but discarded.
    sink_failed: bool,
    done: bool,
    stats: ReceiverStats,
}

impl FileReceiver {
    /// Bind the local endpoint and get ready to accept one connection.
    pub async fn bind(config: ReceiverConfig) -> Result<Self, RecvError> {
        let socket = Socket::bind(config.bind_addr).await?;
        Ok(Self {
            socket,
            output_dir: config.output_dir,
            state: ReceiverState::Closed,
            expected_seq: 0,
            reorder_buffer: BTreeMap::new(),
            received_seqs: BTreeSet::new(),
            locked_peer: None,
            sink: None,
            output_path: None,
            sink_failed: false,
            done: false,
            stats: ReceiverStats::default(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr
    }

    pub fn state(&self) -> ReceiverState {
        self.state
    }

    pub fn stats(&self) -> ReceiverStats {
        self.stats
    }

    /// Where the received file was written, once FILE_NAME has been handled.
    pub fn output_path(&self) -> Option<&Path> {
        self.output_path.as_deref()
    }

    // -----------------------------------------------------------------------
    // Reactor
    // -----------------------------------------------------------------------

    /// Consume datagrams until the peer sends FIN.
    pub async fn run(&mut self) -> Result<(), RecvError> {
        log::info!("[receiver] listening on {}", self.socket.local_addr);

        while !self.done {
            if let Some((buf, from)) = self.socket.try_recv_from()? {
                self.handle_datagram(&buf, from).await?;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        log::info!(
            "[receiver] done: {} packets, {} payload bytes",
            self.stats.packets_received,
            self.stats.bytes_received
        );
        Ok(())
    }

    async fn handle_datagram(&mut self, buf: &[u8], from: SocketAddr) -> Result<(), RecvError> {
        if let Some(locked) = self.locked_peer {
            if from != locked {
                log::debug!("[receiver] dropping datagram from foreign endpoint {from}");
                return Ok(());
            }
        }

        let pkt = match Packet::decode(buf) {
            Ok(pkt) => pkt,
            Err(e) => {
                log::debug!("[receiver] dropping bad datagram from {from}: {e}");
                return Ok(());
            }
        };
        self.stats.packets_received += 1;

        match pkt.kind {
            PacketType::Syn => self.handle_syn(&pkt, from).await?,
            PacketType::Ack => self.handle_handshake_ack(&pkt),
            PacketType::FileName => self.handle_file_name(&pkt).await?,
            PacketType::Data => self.handle_data(pkt).await?,
            PacketType::Fin => self.handle_fin(&pkt).await?,
            other => log::debug!("[receiver] ignoring unexpected {other}"),
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Packet handlers
    // -----------------------------------------------------------------------

    async fn handle_syn(&mut self, pkt: &Packet, from: SocketAddr) -> Result<(), RecvError> {
        if self.state == ReceiverState::Established {
            log::debug!("[receiver] ignoring SYN in {}", self.state);
            return Ok(());
        }

        if self.locked_peer.is_none() {
            self.locked_peer = Some(from);
            log::info!("[receiver] locked peer {from}");
        }

        self.expected_seq = pkt.seq_num.wrapping_add(1);
        let reply = Packet::syn_ack(LOCAL_ISN, pkt.seq_num.wrapping_add(1));
        self.send_packet(&reply).await?;
        self.state = ReceiverState::SynReceived;
        Ok(())
    }

    /// Third-handshake ACK: completes establishment when it acknowledges our
    /// ISN.  ACKs in any other state belong to the sender and are ignored.
    fn handle_handshake_ack(&mut self, pkt: &Packet) {
        if self.state != ReceiverState::SynReceived {
            log::debug!("[receiver] ignoring ACK in {}", self.state);
            return;
        }
        if pkt.ack_num == LOCAL_ISN.wrapping_add(1) {
            self.state = ReceiverState::Established;
            log::info!("[receiver] connection established");
        } else {
            log::warn!(
                "[receiver] handshake ACK with unexpected ack_num {}",
                pkt.ack_num
            );
        }
    }

    async fn handle_file_name(&mut self, pkt: &Packet) -> Result<(), RecvError> {
        match self.state {
            ReceiverState::Established => {}
            ReceiverState::SynReceived => {
                // The sender only announces once established, so this proves
                // our SYN_ACK arrived and the third-handshake ACK was lost.
                self.state = ReceiverState::Established;
                log::info!("[receiver] connection established (implied by FILE_NAME)");
            }
            ReceiverState::Closed => {
                log::debug!("[receiver] ignoring FILE_NAME in {}", self.state);
                return Ok(());
            }
        }

        // A retransmitted FILE_NAME (lost ack) must not truncate the sink.
        if self.sink.is_none() && !self.sink_failed {
            let name = output_name(&pkt.payload);
            let path = self.output_dir.join(&name);
            match File::create(&path).await {
                Ok(file) => {
                    log::info!("[receiver] writing to {}", path.display());
                    self.sink = Some(file);
                    self.output_path = Some(path);
                }
                Err(e) => {
                    log::error!(
                        "[receiver] cannot create {}: {e}; transfer will be discarded",
                        path.display()
                    );
                    self.sink_failed = true;
                }
            }
        }

        let reply = Packet::file_name_ack(pkt.seq_num.wrapping_add(1));
        self.send_packet(&reply).await?;
        Ok(())
    }

    async fn handle_data(&mut self, pkt: Packet) -> Result<(), RecvError> {
        if self.state != ReceiverState::Established {
            log::debug!("[receiver] ignoring DATA in {}", self.state);
            return Ok(());
        }

        let seq = pkt.seq_num;
        if self.received_seqs.insert(seq) {
            self.stats.bytes_received += pkt.payload.len() as u64;
            self.reorder_buffer.insert(seq, pkt.payload);
            log::debug!(
                "[receiver] ← DATA seq={seq} (expecting {}, {} buffered)",
                self.expected_seq,
                self.reorder_buffer.len()
            );
        } else {
            log::debug!("[receiver] ← duplicate DATA seq={seq}");
        }

        // Drain the in-order prefix into the sink.
        while let Some(payload) = self.reorder_buffer.remove(&self.expected_seq) {
            self.write_sink(&payload).await;
            self.expected_seq = self.expected_seq.wrapping_add(1);
        }

        self.send_ack().await
    }

    async fn handle_fin(&mut self, pkt: &Packet) -> Result<(), RecvError> {
        if self.state == ReceiverState::Closed {
            log::debug!("[receiver] ignoring FIN in {}", self.state);
            return Ok(());
        }

        let reply = Packet::fin_ack(pkt.seq_num.wrapping_add(1));
        self.send_packet(&reply).await?;

        if let Some(mut file) = self.sink.take() {
            if let Err(e) = file.flush().await {
                log::error!("[receiver] flushing output file failed: {e}");
            }
        }
        self.state = ReceiverState::Closed;
        self.done = true;
        log::info!("[receiver] connection closed");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Plumbing
    // -----------------------------------------------------------------------

    /// Cumulative ACK for `expected_seq`, plus up to three SACK blocks
    /// describing the out-of-order islands above it.
    async fn send_ack(&mut self) -> Result<(), RecvError> {
        let sacks = sack_blocks(&self.received_seqs, self.expected_seq);
        let ack = Packet::ack(LOCAL_ISN, self.expected_seq, WINDOW_SIZE, sacks);
        self.send_packet(&ack).await
    }

    async fn send_packet(&mut self, packet: &Packet) -> Result<(), RecvError> {
        let Some(peer) = self.locked_peer else {
            return Ok(());
        };
        self.socket.send_to(packet, peer).await?;
        Ok(())
    }

    async fn write_sink(&mut self, payload: &[u8]) {
        let Some(file) = self.sink.as_mut() else {
            return;
        };
        if let Err(e) = file.write_all(payload).await {
            log::error!("[receiver] write to output file failed: {e}; discarding the rest");
            self.sink = None;
            self.sink_failed = true;
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Derive the output file name from a FILE_NAME payload.
///
/// The path prefix is stripped (both `/` and `\` count as separators) and
/// `_output` is inserted before the last-dot extension.  An empty payload
/// falls back to `"output"`.
fn output_name(payload: &[u8]) -> String {
    if payload.is_empty() {
        return "output".to_owned();
    }
    let raw = String::from_utf8_lossy(payload);
    let base = raw
        .rfind(['/', '\\'])
        .map(|i| &raw[i + 1..])
        .unwrap_or(&raw);
    match base.rfind('.') {
        Some(dot) => format!("{}_output{}", &base[..dot], &base[dot..]),
        None => format!("{base}_output"),
    }
}

/// Coalesce the received sequences strictly above `expected` into up to
/// [`MAX_SACK_BLOCKS`] half-open runs.
fn sack_blocks(received: &BTreeSet<u32>, expected: u32) -> Vec<SackBlock> {
    let mut blocks: Vec<SackBlock> = Vec::new();
    for &seq in received.range((Bound::Excluded(expected), Bound::Unbounded)) {
        match blocks.last_mut() {
            Some(block) if block.right == seq => block.right += 1,
            _ => {
                if blocks.len() == MAX_SACK_BLOCKS {
                    break;
                }
                blocks.push(SackBlock {
                    left: seq,
                    right: seq + 1,
                });
            }
        }
    }
    blocks
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_name_strips_mixed_path_prefixes() {
        assert_eq!(output_name(br"C:\dir\sub/pic.jpg"), "pic_output.jpg");
        assert_eq!(output_name(b"/home/user/notes.txt"), "notes_output.txt");
        assert_eq!(output_name(b"plain.bin"), "plain_output.bin");
    }

    #[test]
    fn output_name_without_extension() {
        assert_eq!(output_name(b"Makefile"), "Makefile_output");
        assert_eq!(output_name(b"dir/Makefile"), "Makefile_output");
    }

    #[test]
    fn output_name_empty_payload_falls_back() {
        assert_eq!(output_name(b""), "output");
    }

    #[test]
    fn output_name_keeps_only_last_extension() {
        assert_eq!(output_name(b"archive.tar.gz"), "archive.tar_output.gz");
        assert_eq!(output_name(b".bashrc"), "_output.bashrc");
    }

    #[test]
    fn sack_blocks_empty_when_nothing_buffered() {
        let received = BTreeSet::new();
        assert!(sack_blocks(&received, 4).is_empty());
    }

    #[test]
    fn sack_blocks_ignore_delivered_prefix() {
        // 1..=3 were delivered already; only islands above `expected` count.
        let received: BTreeSet<u32> = [1, 2, 3, 5, 6].into_iter().collect();
        assert_eq!(
            sack_blocks(&received, 4),
            vec![SackBlock { left: 5, right: 7 }]
        );
    }

    #[test]
    fn sack_blocks_coalesce_runs() {
        let received: BTreeSet<u32> = [5, 6, 8, 10, 11, 12].into_iter().collect();
        assert_eq!(
            sack_blocks(&received, 4),
            vec![
                SackBlock { left: 5, right: 7 },
                SackBlock { left: 8, right: 9 },
                SackBlock { left: 10, right: 13 },
            ]
        );
    }

    #[test]
    fn sack_blocks_cap_at_three_but_extend_the_last_run() {
        let received: BTreeSet<u32> = [2, 4, 6, 7, 8, 10].into_iter().collect();
        // Runs above 1 are [2,3) [4,5) [6,9); the cap cuts off [10,11), not
        // the tail of the third run.
        assert_eq!(
            sack_blocks(&received, 1),
            vec![
                SackBlock { left: 2, right: 3 },
                SackBlock { left: 4, right: 5 },
                SackBlock { left: 6, right: 9 },
            ]
        );
    }

    #[test]
    fn sack_blocks_exclude_expected_itself() {
        let received: BTreeSet<u32> = [4, 5].into_iter().collect();
        assert_eq!(
            sack_blocks(&received, 4),
            vec![SackBlock { left: 5, right: 6 }]
        );
    }
}
