//! Defines the structure of frames on the wire.
//!
//! This module only contains the type definitions themselves, to make it easy
//! to understand the whole protocol at a glance; decoding lives in
//! [`decode`](self::decode) and encoding in [`encode`](self::encode) (both
//! re-exported here).
//!
//! A frame is a single radio packet of at most [`LINK_MTU`] bytes:
//!
//! ```text
//! offset 0..5   sender SID prefix (6 bytes)
//! offset 6..7   message number: bits 0..14 little-endian,
//!               bit 15 = retransmission flag
//! offset 8..    one or more records, concatenated
//! ```
//!
//! A record starts with a tag byte. Tag `'B'` is a [`Bar`]:
//!
//! ```text
//! 'B'  bid prefix (8)  version (8, LE)  recipient prefix (4)
//! ```
//!
//! Tags `'P' 'p' 'Q' 'q'` are [`Piece`]s. Bit 0 of the tag clear means this
//! is the *end piece* (the final chunk of its stream); bit 5 clear means the
//! piece sits above the 1 MB mark and the offset-compound is followed by two
//! extra high-offset bytes:
//!
//! ```text
//! tag  bid prefix (8)  version (8, LE)  offset-compound (4, LE)
//!      [high offset (2, LE)]  payload
//! ```
//!
//! The offset-compound packs three fields into 32 bits (44 with the
//! extension): bits 0..19 are the low offset bits, bits 20..30 the payload
//! length, bit 31 the manifest flag, and extension bits 32..43 map to offset
//! bits 20..31.
//!
//! [`LINK_MTU`]: crate::LINK_MTU

pub mod decode;
pub mod encode;

pub use {
    decode::{read_header, read_record},
    encode::piece_room,
};

use bytes::Bytes;

use crate::id::{BidPrefix, RecipientPrefix, SidPrefix};

/// Length of the fixed frame header. Frames shorter than this are rejected
/// outright.
pub const FRAME_HEADER_LEN: usize = 8;

/// Length of a BAR record body, after the tag byte.
pub const BAR_BODY_LEN: usize = 20;

/// Length of a piece record's fixed fields, after the tag byte and before
/// the optional high-offset extension and the payload.
pub const PIECE_FIXED_LEN: usize = 20;

/// Length of the high-offset extension present when a piece's tag has the
/// above-1MB bit clear.
pub const PIECE_EXT_LEN: usize = 2;

/// Largest payload a single piece record can carry; the length field is
/// 11 bits wide. In practice the MTU caps payloads well below this.
pub const MAX_PIECE_PAYLOAD: usize = 0x7FF;

/// 15-bit frame message number.
///
/// Increments once per freshly composed frame and wraps at `0x7FFF`.
/// Retransmitted frames reuse the number of the original and set the
/// retransmission flag instead.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct MessageSeq(u16);

impl MessageSeq {
    /// Mask of the bits actually carried on the wire.
    pub const MASK: u16 = 0x7FFF;

    /// Creates a message number, truncating to 15 bits.
    #[must_use]
    pub const fn new(value: u16) -> Self {
        Self(value & Self::MASK)
    }

    /// The raw 15-bit value.
    #[must_use]
    pub const fn get(self) -> u16 {
        self.0
    }

    /// The following message number, wrapping at 15 bits.
    #[must_use]
    pub const fn next(self) -> Self {
        Self((self.0 + 1) & Self::MASK)
    }
}

/// Fixed header present at the start of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// SID prefix of the sending node.
    pub sender: SidPrefix,
    /// Sender's frame counter.
    pub seq: MessageSeq,
    /// Whether the sender marked this frame as a re-emission of an earlier
    /// one. A hint only: records are idempotent, so receivers process them
    /// either way.
    pub retransmission: bool,
}

/// One record inside a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    /// Bundle advertisement.
    Bar(Bar),
    /// Fragment of a bundle's manifest or body.
    Piece(Piece),
}

/// Bundle Advertisement Record: "I have this bundle".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bar {
    /// Prefix of the advertised bundle's BID.
    pub bid: BidPrefix,
    /// Version the sender holds.
    pub version: u64,
    /// Recipient the bundle is addressed to, if any.
    pub recipient: RecipientPrefix,
}

/// A chunk of a bundle's manifest or body at a specific offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Piece {
    /// Prefix of the bundle's BID.
    pub bid: BidPrefix,
    /// Version of the bundle being transferred.
    pub version: u64,
    /// Byte offset of this chunk within its stream.
    pub offset: u64,
    /// Whether this chunk ends its stream, fixing the stream's total length
    /// at `offset + payload.len()`.
    pub is_end: bool,
    /// Whether the chunk belongs to the manifest stream (`true`) or the body
    /// stream (`false`).
    pub is_manifest: bool,
    /// The chunk bytes.
    pub payload: Bytes,
}

/// A received frame failed to parse.
///
/// Records already read out of the frame before the failure remain applied;
/// records are independent, so partial acceptance is sound.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// The frame is shorter than its fixed header.
    #[error("frame of {len} bytes is shorter than the {FRAME_HEADER_LEN} byte header")]
    ShortFrame {
        /// Length of the rejected frame.
        len: usize,
    },
    /// A record claimed more bytes than the frame has left.
    #[error("record needs {need} more bytes, frame has {have}")]
    Truncated {
        /// Bytes the record still required.
        need: usize,
        /// Bytes remaining in the frame.
        have: usize,
    },
    /// A record started with a tag byte we do not know.
    #[error("unknown record tag {tag:#04x}")]
    BadTag {
        /// The offending tag byte.
        tag: u8,
    },
}
