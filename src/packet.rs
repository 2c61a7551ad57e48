//! Wire-format definitions for protocol packets.
//!
//! Every datagram exchanged between peers is exactly one [`Packet`].  This
//! module is responsible for:
//! - Defining the on-wire binary layout (header fields, payload, SACK blocks).
//! - Serialising a [`Packet`] into a byte buffer ready for transmission.
//! - Deserialising a raw byte slice back into a [`Packet`], returning errors
//!   for malformed, truncated, or corrupted input.
//!
//! No I/O happens here - this is pure data transformation.
//!
//! # Layout
//!
//! All multi-byte fields are big-endian.
//!
//! ```text
//!  0      1      2             4                    8
//!  ┌──────┬──────┬─────────────┬────────────────────┬────────────────────┐
//!  │ type │flags │  checksum   │      seq_num       │      ack_num       │
//!  ├──────┴──────┼─────────────┼────────────────────┴────────────────────┤
//!  │ window_size │ data_length │              sack_count                 │
//!  ├─────────────┴─────────────┴─────────────────────────────────────────┤
//!  │                  payload (data_length bytes)                        │
//!  ├─────────────────────────────────────────────────────────────────────┤
//!  │          SACK blocks (sack_count × 8 bytes, left then right)        │
//!  └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The checksum is the 16-bit one's complement of the one's-complement sum of
//! the header (checksum field as zero), the payload, and the SACK blocks,
//! each region taken as big-endian 16-bit words and padded independently
//! with a zero low byte when its length is odd.

use thiserror::Error;

/// Maximum payload bytes a single DATA packet may carry.
pub const MAX_DATA_SIZE: usize = 1024;
/// Fixed header size in bytes.
pub const HEADER_SIZE: usize = 20;
/// Header plus a full payload, excluding SACK blocks.
pub const MAX_PACKET_SIZE: usize = HEADER_SIZE + MAX_DATA_SIZE;
/// Serialized size of one SACK block.
pub const SACK_BLOCK_SIZE: usize = 8;
/// An ACK carries at most this many SACK blocks.
pub const MAX_SACK_BLOCKS: usize = 3;
/// Advertised receive window, in packets.
pub const WINDOW_SIZE: u16 = 16;

// ---------------------------------------------------------------------------
// Packet type
// ---------------------------------------------------------------------------

/// Discriminant carried in the first header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    /// Handshake initiation.
    Syn = 0x01,
    /// Handshake response.
    SynAck = 0x02,
    /// File payload chunk; consumes one sequence number.
    Data = 0x03,
    /// Cumulative acknowledgement, optionally with SACK blocks.
    Ack = 0x04,
    /// Teardown initiation.
    Fin = 0x05,
    /// Teardown acknowledgement.
    FinAck = 0x06,
    /// Announces the name of the file about to be transferred.
    FileName = 0x07,
    /// Acknowledges a FILE_NAME packet.
    FileNameAck = 0x08,
}

impl PacketType {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(Self::Syn),
            0x02 => Some(Self::SynAck),
            0x03 => Some(Self::Data),
            0x04 => Some(Self::Ack),
            0x05 => Some(Self::Fin),
            0x06 => Some(Self::FinAck),
            0x07 => Some(Self::FileName),
            0x08 => Some(Self::FileNameAck),
            _ => None,
        }
    }
}

impl std::fmt::Display for PacketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Syn => "SYN",
            Self::SynAck => "SYN_ACK",
            Self::Data => "DATA",
            Self::Ack => "ACK",
            Self::Fin => "FIN",
            Self::FinAck => "FIN_ACK",
            Self::FileName => "FILE_NAME",
            Self::FileNameAck => "FILE_NAME_ACK",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// SACK block
// ---------------------------------------------------------------------------

/// A half-open range `[left, right)` of sequence numbers the receiver has
/// buffered out of order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SackBlock {
    pub left: u32,
    pub right: u32,
}

// ---------------------------------------------------------------------------
// Packet
// ---------------------------------------------------------------------------

/// A complete protocol datagram.
///
/// `data_length` and `sack_count` exist only on the wire; in memory they are
/// the lengths of `payload` and `sack_blocks`.  The checksum is likewise a
/// wire artifact: [`Packet::encode`] computes it and [`Packet::decode`]
/// verifies it, so a successfully decoded packet is always integrity-checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub kind: PacketType,
    /// Reserved, zero.
    pub flags: u8,
    pub seq_num: u32,
    pub ack_num: u32,
    /// Advertised receive window, in packets.
    pub window_size: u16,
    /// Up to [`MAX_DATA_SIZE`] bytes.
    pub payload: Vec<u8>,
    pub sack_blocks: Vec<SackBlock>,
}

impl Packet {
    fn control(kind: PacketType, seq_num: u32, ack_num: u32) -> Self {
        Self {
            kind,
            flags: 0,
            seq_num,
            ack_num,
            window_size: 0,
            payload: Vec::new(),
            sack_blocks: Vec::new(),
        }
    }

    /// Handshake initiation carrying the sender's ISN.
    pub fn syn(seq_num: u32) -> Self {
        Self::control(PacketType::Syn, seq_num, 0)
    }

    /// Handshake response: `seq_num` is the responder's ISN, `ack_num` the
    /// initiator's ISN plus one.
    pub fn syn_ack(seq_num: u32, ack_num: u32) -> Self {
        Self::control(PacketType::SynAck, seq_num, ack_num)
    }

    /// File payload chunk.
    pub fn data(seq_num: u32, payload: Vec<u8>) -> Self {
        debug_assert!(payload.len() <= MAX_DATA_SIZE);
        Self {
            payload,
            ..Self::control(PacketType::Data, seq_num, 0)
        }
    }

    /// Cumulative acknowledgement with optional SACK blocks.
    pub fn ack(seq_num: u32, ack_num: u32, window_size: u16, sack_blocks: Vec<SackBlock>) -> Self {
        debug_assert!(sack_blocks.len() <= MAX_SACK_BLOCKS);
        Self {
            window_size,
            sack_blocks,
            ..Self::control(PacketType::Ack, seq_num, ack_num)
        }
    }

    /// Teardown initiation.
    pub fn fin(seq_num: u32) -> Self {
        Self::control(PacketType::Fin, seq_num, 0)
    }

    /// Teardown acknowledgement.
    pub fn fin_ack(ack_num: u32) -> Self {
        Self::control(PacketType::FinAck, 0, ack_num)
    }

    /// File-name announcement; the payload is the UTF-8 base name, truncated
    /// to [`MAX_DATA_SIZE`] bytes.
    pub fn file_name(seq_num: u32, name: &str) -> Self {
        let mut payload = name.as_bytes().to_vec();
        payload.truncate(MAX_DATA_SIZE);
        Self {
            payload,
            ..Self::control(PacketType::FileName, seq_num, 0)
        }
    }

    /// Acknowledges a FILE_NAME packet.
    pub fn file_name_ack(ack_num: u32) -> Self {
        Self::control(PacketType::FileNameAck, 0, ack_num)
    }

    /// Serialise this packet into a newly allocated byte vector, computing
    /// and embedding the checksum.
    pub fn encode(&self) -> Vec<u8> {
        debug_assert!(self.payload.len() <= MAX_DATA_SIZE, "payload exceeds MAX_DATA_SIZE");

        let mut buf = Vec::with_capacity(
            HEADER_SIZE + self.payload.len() + self.sack_blocks.len() * SACK_BLOCK_SIZE,
        );
        buf.push(self.kind as u8);
        buf.push(self.flags);
        buf.extend_from_slice(&[0, 0]); // checksum, patched below
        buf.extend_from_slice(&self.seq_num.to_be_bytes());
        buf.extend_from_slice(&self.ack_num.to_be_bytes());
        buf.extend_from_slice(&self.window_size.to_be_bytes());
        buf.extend_from_slice(&(self.payload.len() as u16).to_be_bytes());
        buf.extend_from_slice(&(self.sack_blocks.len() as u32).to_be_bytes());
        buf.extend_from_slice(&self.payload);
        for sack in &self.sack_blocks {
            buf.extend_from_slice(&sack.left.to_be_bytes());
            buf.extend_from_slice(&sack.right.to_be_bytes());
        }

        let checksum = checksum_of(&buf[..HEADER_SIZE], &buf[HEADER_SIZE..]);
        buf[2..4].copy_from_slice(&checksum.to_be_bytes());
        buf
    }

    /// Parse a [`Packet`] from a raw byte slice, verifying the checksum.
    ///
    /// The buffer is length-checked against the declared `data_length` and
    /// `sack_count` before anything is copied; truncated or corrupted
    /// datagrams yield an error and are dropped by the caller.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < HEADER_SIZE {
            return Err(PacketError::BufferTooShort);
        }

        let kind = PacketType::from_byte(buf[0]).ok_or(PacketError::UnknownType(buf[0]))?;
        let flags = buf[1];
        let stored_checksum = u16::from_be_bytes([buf[2], buf[3]]);
        let seq_num = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let ack_num = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);
        let window_size = u16::from_be_bytes([buf[12], buf[13]]);
        let data_length = u16::from_be_bytes([buf[14], buf[15]]) as usize;
        let sack_count = u32::from_be_bytes([buf[16], buf[17], buf[18], buf[19]]) as usize;

        if data_length > MAX_DATA_SIZE {
            return Err(PacketError::LengthMismatch);
        }
        let data_end = HEADER_SIZE + data_length;
        let sack_end = data_end + sack_count.saturating_mul(SACK_BLOCK_SIZE);
        if buf.len() < sack_end {
            return Err(PacketError::LengthMismatch);
        }

        // Recompute with the checksum field zeroed; anything beyond the
        // declared regions is not covered (a datagram is exactly one packet).
        let mut header = [0u8; HEADER_SIZE];
        header.copy_from_slice(&buf[..HEADER_SIZE]);
        header[2] = 0;
        header[3] = 0;
        let computed = checksum_of(&header, &buf[HEADER_SIZE..sack_end]);
        if computed != stored_checksum {
            return Err(PacketError::ChecksumFailed);
        }

        let payload = buf[HEADER_SIZE..data_end].to_vec();
        let mut sack_blocks = Vec::with_capacity(sack_count);
        for chunk in buf[data_end..sack_end].chunks_exact(SACK_BLOCK_SIZE) {
            sack_blocks.push(SackBlock {
                left: u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]),
                right: u32::from_be_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]),
            });
        }

        Ok(Self {
            kind,
            flags,
            seq_num,
            ack_num,
            window_size,
            payload,
            sack_blocks,
        })
    }
}

// ---------------------------------------------------------------------------
// Checksum
// ---------------------------------------------------------------------------

/// One's-complement checksum over the header region (checksum field already
/// zeroed) and the trailing payload+SACK region.
///
/// Regions are summed as big-endian 16-bit words.  The payload is the only
/// region that can have odd length; its unpaired final byte is padded with a
/// zero low byte so the SACK words that follow stay word-aligned.
fn checksum_of(header: &[u8], tail: &[u8]) -> u16 {
    let data_length = u16::from_be_bytes([header[14], header[15]]) as usize;
    let mut sum: u32 = 0;
    add_words(&mut sum, header);
    add_words(&mut sum, &tail[..data_length]);
    add_words(&mut sum, &tail[data_length..]);
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

fn add_words(sum: &mut u32, region: &[u8]) {
    let mut chunks = region.chunks_exact(2);
    for pair in &mut chunks {
        *sum += u32::from(u16::from_be_bytes([pair[0], pair[1]]));
    }
    if let [last] = chunks.remainder() {
        *sum += u32::from(*last) << 8;
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can arise when parsing a raw datagram.
///
/// All of these mean the same thing to the caller: drop the datagram and
/// rely on retransmission.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    /// Buffer shorter than the fixed header size.
    #[error("buffer shorter than the {HEADER_SIZE}-byte header")]
    BufferTooShort,
    /// Declared `data_length`/`sack_count` exceed the buffer.
    #[error("declared lengths do not fit the received buffer")]
    LengthMismatch,
    /// Checksum did not match the recomputed value.
    #[error("checksum verification failed")]
    ChecksumFailed,
    /// Unrecognised packet type byte.
    #[error("unknown packet type {0:#04x}")]
    UnknownType(u8),
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
