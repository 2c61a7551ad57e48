//! Network fault simulator for deterministic testing.
//!
//! Real networks drop, reorder, and duplicate packets.  To exercise the
//! reliability machinery without depending on actual network conditions,
//! this module provides a [`Simulator`]: a UDP relay that sits between the
//! sender and the receiver and applies a configurable fault model to every
//! datagram crossing it, in either direction:
//!
//! | Fault          | Description                                          |
//! |----------------|------------------------------------------------------|
//! | Scripted drop  | Drop the Nth occurrence of a given packet type.      |
//! | Random loss    | Drop any packet with probability `loss_rate`.        |
//!
//! Randomness comes from a seeded RNG so failing tests are reproducible.
//! The sender is pointed at [`Simulator::local_addr`] instead of the real
//! receiver; replies are relayed back to whichever endpoint spoke first.
//!
//! The simulator is only used by tests; production deployments talk to the
//! real network.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use crate::packet::{Packet, PacketType};

const MAX_DATAGRAM: usize = 2048;
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Drop the `occurrence`-th (1-based) packet of `kind` crossing the relay,
/// counted over both directions.
#[derive(Debug, Clone, Copy)]
pub struct DropRule {
    pub kind: PacketType,
    pub occurrence: u32,
}

/// Configuration for the fault model.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Probability in `[0.0, 1.0]` that any given packet is silently dropped.
    pub loss_rate: f64,
    /// Seed for the loss RNG; same seed, same faults.
    pub seed: u64,
    /// Scripted one-shot drops, applied before random loss.
    pub drops: Vec<DropRule>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        // No faults by default: the simulator is a transparent pass-through.
        Self {
            loss_rate: 0.0,
            seed: 0,
            drops: Vec::new(),
        }
    }
}

/// A fault-injecting UDP relay between one client and one upstream endpoint.
pub struct Simulator {
    /// Socket the client (sender) talks to.
    client_side: UdpSocket,
    /// Socket used to talk to the upstream (receiver).
    upstream_side: UdpSocket,
    upstream: SocketAddr,
    local_addr: SocketAddr,
    config: SimulatorConfig,
    rng: StdRng,
    /// Per-type occurrence counters for the scripted drops.
    seen: HashMap<u8, u32>,
    /// First endpoint that sent us anything; replies go back to it.
    client: Option<SocketAddr>,
}

impl Simulator {
    /// Bind a relay in front of `upstream` on ephemeral loopback ports.
    pub async fn bind(upstream: SocketAddr, config: SimulatorConfig) -> io::Result<Self> {
        let client_side = UdpSocket::bind("127.0.0.1:0").await?;
        let upstream_side = UdpSocket::bind("127.0.0.1:0").await?;
        let local_addr = client_side.local_addr()?;
        let seed = config.seed;
        Ok(Self {
            client_side,
            upstream_side,
            upstream,
            local_addr,
            config,
            rng: StdRng::seed_from_u64(seed),
            seen: HashMap::new(),
            client: None,
        })
    }

    /// Address the client should use as its peer.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Run the relay as a background task.  It lives until the task is
    /// aborted or the runtime shuts down.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        let mut buf = [0u8; MAX_DATAGRAM];
        loop {
            let mut idle = true;

            match self.client_side.try_recv_from(&mut buf) {
                Ok((n, from)) => {
                    idle = false;
                    if self.client.is_none() {
                        self.client = Some(from);
                    }
                    if self.should_forward(&buf[..n]) {
                        let _ = self.upstream_side.send_to(&buf[..n], self.upstream).await;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => {
                    log::warn!("[sim] client-side receive failed: {e}");
                    break;
                }
            }

            match self.upstream_side.try_recv_from(&mut buf) {
                Ok((n, _)) => {
                    idle = false;
                    if self.should_forward(&buf[..n]) {
                        if let Some(client) = self.client {
                            let _ = self.client_side.send_to(&buf[..n], client).await;
                        }
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => {
                    log::warn!("[sim] upstream-side receive failed: {e}");
                    break;
                }
            }

            if idle {
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        }
    }

    /// Apply the fault model to one datagram; `false` means drop it.
    fn should_forward(&mut self, datagram: &[u8]) -> bool {
        if let Ok(pkt) = Packet::decode(datagram) {
            let count = self.seen.entry(pkt.kind as u8).or_insert(0);
            *count += 1;
            let nth = *count;
            if self
                .config
                .drops
                .iter()
                .any(|rule| rule.kind == pkt.kind && rule.occurrence == nth)
            {
                log::debug!("[sim] dropping {} #{nth} (scripted)", pkt.kind);
                return false;
            }
        }
        if self.config.loss_rate > 0.0 && self.rng.gen_bool(self.config.loss_rate) {
            log::debug!("[sim] dropping datagram (random loss)");
            return false;
        }
        true
    }
}
