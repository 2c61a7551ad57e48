//! `rftp` — reliable, in-order file transfer over UDP.
//!
//! A connection-oriented bytestream transport on top of an unreliable
//! datagram service, used to ship a single file from a sender to a receiver.
//! It supplies connection setup and teardown, per-packet integrity,
//! sliding-window flow control, cumulative + selective acknowledgment,
//! retransmission on timeout and on duplicate ACKs, and a TCP-Reno-style
//! congestion controller.
//!
//! # Architecture
//!
//! ```text
//!  ┌────────────┐     DATA / FILE_NAME / FIN      ┌──────────────┐
//!  │ FileSender │────────────────────────────────▶│ FileReceiver │
//!  └─────┬──────┘                                 └──────┬───────┘
//!        │◀──────── ACK (+SACK) / *_ACK ─────────────────┘
//!        │                                               │
//!  ┌─────▼──────────┐                           ┌────────▼───────┐
//!  │ RenoController │                           │ reorder buffer │
//!  │ in-flight map  │                           │ received set   │
//!  └─────┬──────────┘                           └────────┬───────┘
//!        │            raw UDP datagrams                  │
//!  ┌─────▼──────────────────────────────────────────────▼────────┐
//!  │        Socket  (non-blocking tokio UdpSocket wrapper)       │
//!  └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`packet`]     — wire format (encode / decode, checksum)
//! - [`socket`]     — non-blocking UDP endpoint abstraction
//! - [`state`]      — finite-state-machine types for both sides
//! - [`timer`]      — fixed retransmission timeout and retry budget
//! - [`congestion`] — Reno congestion controller
//! - [`sender`]     — handshake, sliding-window transmission, teardown
//! - [`receiver`]   — acceptance, reassembly, cumulative + selective ACKs
//! - [`simulator`]  — lossy relay for deterministic tests
//!
//! Both endpoints are single-task cooperative reactors: a non-blocking
//! socket polled in a short-sleep loop, no worker tasks, no shared state.

pub mod congestion;
pub mod packet;
pub mod receiver;
pub mod sender;
pub mod simulator;
pub mod socket;
pub mod state;
pub mod timer;
