//! Frame and record decoding.

use bytes::{Buf, Bytes};

use crate::id::{BidPrefix, RecipientPrefix, SidPrefix};

use super::{
    Bar, FrameError, FrameHeader, MessageSeq, Piece, Record, BAR_BODY_LEN, FRAME_HEADER_LEN,
    PIECE_EXT_LEN, PIECE_FIXED_LEN,
};

pub(super) const TAG_BAR: u8 = b'B';

/// Tag bit which is *clear* when the piece is the final chunk of its stream.
pub(super) const TAG_BIT_NOT_END: u8 = 0x01;
/// Tag bit which is *clear* when the piece offset may exceed 1 MB and the
/// offset-compound carries the two-byte extension.
pub(super) const TAG_BIT_LOW_OFFSET: u8 = 0x20;

/// Offset-compound field layout. Bits 0..19 are the low offset bits,
/// 20..30 the payload length, 31 the manifest flag; extension bits 32..43
/// shift down by 12 to become offset bits 20..31.
pub(super) const OFFSET_LOW_MASK: u64 = 0x000F_FFFF;
pub(super) const OFFSET_HIGH_MASK: u64 = 0xFFF0_0000;
pub(super) const PAYLOAD_LEN_SHIFT: u64 = 20;
pub(super) const PAYLOAD_LEN_MASK: u64 = 0x7FF;
pub(super) const MANIFEST_BIT: u64 = 0x8000_0000;

/// Reads the fixed header off the front of a frame.
///
/// # Errors
///
/// Errors if the frame is shorter than the fixed header.
pub fn read_header(buf: &mut Bytes) -> Result<FrameHeader, FrameError> {
    if buf.len() < FRAME_HEADER_LEN {
        return Err(FrameError::ShortFrame { len: buf.len() });
    }
    let mut sender = [0; SidPrefix::LEN];
    buf.copy_to_slice(&mut sender);
    let lo = buf.get_u8();
    let hi = buf.get_u8();
    Ok(FrameHeader {
        sender: SidPrefix(sender),
        seq: MessageSeq::new(u16::from(lo) | (u16::from(hi & 0x7F) << 8)),
        retransmission: hi & 0x80 != 0,
    })
}

/// Reads the next record off a frame whose header has already been consumed.
///
/// Callers drive this in a loop until the buffer is empty, dropping the rest
/// of the frame on the first error.
///
/// # Errors
///
/// Errors if the tag byte is unknown, or if the record claims more bytes
/// than remain in the frame.
pub fn read_record(buf: &mut Bytes) -> Result<Record, FrameError> {
    let tag = buf.get_u8();
    match tag {
        TAG_BAR => read_bar(buf).map(Record::Bar),
        b'P' | b'p' | b'Q' | b'q' => read_piece(buf, tag).map(Record::Piece),
        tag => Err(FrameError::BadTag { tag }),
    }
}

fn read_bar(buf: &mut Bytes) -> Result<Bar, FrameError> {
    if buf.len() < BAR_BODY_LEN {
        return Err(FrameError::Truncated {
            need: BAR_BODY_LEN,
            have: buf.len(),
        });
    }
    let mut bid = [0; BidPrefix::LEN];
    buf.copy_to_slice(&mut bid);
    let version = buf.get_u64_le();
    let mut recipient = [0; RecipientPrefix::LEN];
    buf.copy_to_slice(&mut recipient);
    Ok(Bar {
        bid: BidPrefix(bid),
        version,
        recipient: RecipientPrefix(recipient),
    })
}

fn read_piece(buf: &mut Bytes, tag: u8) -> Result<Piece, FrameError> {
    let is_end = tag & TAG_BIT_NOT_END == 0;
    let above_1mb = tag & TAG_BIT_LOW_OFFSET == 0;

    let fixed = PIECE_FIXED_LEN + if above_1mb { PIECE_EXT_LEN } else { 0 };
    if buf.len() < fixed {
        return Err(FrameError::Truncated {
            need: fixed,
            have: buf.len(),
        });
    }
    let mut bid = [0; BidPrefix::LEN];
    buf.copy_to_slice(&mut bid);
    let version = buf.get_u64_le();
    let mut compound = u64::from(buf.get_u32_le());
    if above_1mb {
        compound |= u64::from(buf.get_u16_le()) << 32;
    }

    let offset = (compound & OFFSET_LOW_MASK) | ((compound >> 12) & OFFSET_HIGH_MASK);
    let payload_len = ((compound >> PAYLOAD_LEN_SHIFT) & PAYLOAD_LEN_MASK) as usize;
    let is_manifest = compound & MANIFEST_BIT != 0;

    if buf.len() < payload_len {
        return Err(FrameError::Truncated {
            need: payload_len,
            have: buf.len(),
        });
    }
    Ok(Piece {
        bid: BidPrefix(bid),
        version,
        offset,
        is_end,
        is_manifest,
        payload: buf.split_to(payload_len),
    })
}
