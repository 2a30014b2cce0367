//! Frame and record encoding.
//!
//! The scheduler only ever packs one record per frame (the MTU is tight and
//! the protocol tolerates one-record frames), but the encoders append to a
//! caller-owned buffer so that is a policy of the caller, not of this module.

use bytes::BufMut;

use super::{
    decode::{
        MANIFEST_BIT, OFFSET_HIGH_MASK, OFFSET_LOW_MASK, PAYLOAD_LEN_SHIFT, TAG_BAR,
        TAG_BIT_LOW_OFFSET, TAG_BIT_NOT_END,
    },
    Bar, FrameHeader, Piece, Record, FRAME_HEADER_LEN, MAX_PIECE_PAYLOAD, PIECE_EXT_LEN,
    PIECE_FIXED_LEN,
};

/// Payload room left for a piece at `offset` in a frame of `mtu` bytes
/// carrying the header and a single piece record.
#[must_use]
pub fn piece_room(mtu: usize, offset: u64) -> usize {
    let overhead = FRAME_HEADER_LEN
        + 1
        + PIECE_FIXED_LEN
        + if offset > OFFSET_LOW_MASK {
            PIECE_EXT_LEN
        } else {
            0
        };
    mtu.saturating_sub(overhead).min(MAX_PIECE_PAYLOAD)
}

impl FrameHeader {
    /// Appends the 8-byte frame header.
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.put_slice(self.sender.as_bytes());
        let seq = self.seq.get();
        out.put_u8((seq & 0xFF) as u8);
        out.put_u8(((seq >> 8) as u8) | if self.retransmission { 0x80 } else { 0 });
    }
}

impl Record {
    /// Appends this record, tag byte included.
    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Self::Bar(bar) => bar.encode(out),
            Self::Piece(piece) => piece.encode(out),
        }
    }
}

impl Bar {
    /// Appends this advertisement, tag byte included.
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.put_u8(TAG_BAR);
        out.put_slice(self.bid.as_bytes());
        out.put_u64_le(self.version);
        out.put_slice(self.recipient.as_bytes());
    }
}

impl Piece {
    /// Appends this piece, tag byte included.
    ///
    /// # Panics
    ///
    /// Panics if the payload exceeds [`MAX_PIECE_PAYLOAD`] or the offset
    /// exceeds the 32 bits the offset-compound can carry; the scheduler
    /// sizes pieces well inside both bounds.
    pub fn encode(&self, out: &mut Vec<u8>) {
        assert!(self.payload.len() <= MAX_PIECE_PAYLOAD);
        assert!(self.offset <= OFFSET_LOW_MASK | OFFSET_HIGH_MASK);

        let above_1mb = self.offset > OFFSET_LOW_MASK;
        // bit 5 clear marks the wide-offset form
        let mut tag = if above_1mb { b'P' } else { b'p' };
        debug_assert_eq!(above_1mb, tag & TAG_BIT_LOW_OFFSET == 0);
        if !self.is_end {
            tag |= TAG_BIT_NOT_END;
        }
        out.put_u8(tag);
        out.put_slice(self.bid.as_bytes());
        out.put_u64_le(self.version);

        let mut compound = (self.offset & OFFSET_LOW_MASK)
            | ((self.payload.len() as u64) << PAYLOAD_LEN_SHIFT)
            | ((self.offset & OFFSET_HIGH_MASK) << 12);
        if self.is_manifest {
            compound |= MANIFEST_BIT;
        }
        out.put_u32_le(compound as u32);
        if above_1mb {
            out.put_u16_le((compound >> 32) as u16);
        }
        out.put_slice(&self.payload);
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use crate::{
        id::{BidPrefix, RecipientPrefix, SidPrefix},
        wire::{read_header, read_record, MessageSeq},
    };

    use super::*;

    #[test]
    fn header_wire_layout() {
        let mut out = Vec::new();
        FrameHeader {
            sender: SidPrefix([0xAA, 0x11, 0xBB, 0x22, 0xCC, 0x33]),
            seq: MessageSeq::new(0x7234),
            retransmission: true,
        }
        .encode(&mut out);
        assert_eq!(
            vec![0xAA, 0x11, 0xBB, 0x22, 0xCC, 0x33, 0x34, 0xF2],
            out
        );
    }

    #[test]
    fn bar_wire_layout() {
        let mut out = Vec::new();
        Bar {
            bid: BidPrefix([1, 2, 3, 4, 5, 6, 7, 8]),
            version: 1,
            recipient: RecipientPrefix::default(),
        }
        .encode(&mut out);
        let mut expected = vec![b'B', 1, 2, 3, 4, 5, 6, 7, 8];
        expected.extend_from_slice(&1u64.to_le_bytes());
        expected.extend_from_slice(&[0; 4]);
        assert_eq!(expected, out);
    }

    #[test]
    fn end_manifest_piece_wire_layout() {
        let mut out = Vec::new();
        Piece {
            bid: BidPrefix([1, 2, 3, 4, 5, 6, 7, 8]),
            version: 1,
            offset: 0,
            is_end: true,
            is_manifest: true,
            payload: Bytes::from_static(&[0xAB; 32]),
        }
        .encode(&mut out);
        // tag 'p' = end piece below 1 MB; compound = len 32 | manifest bit
        assert_eq!(b'p', out[0]);
        let compound: u32 = (32 << 20) | 0x8000_0000;
        assert_eq!(&compound.to_le_bytes(), &out[17..21]);
        assert_eq!(&[0xAB; 32], &out[21..]);
    }

    #[test]
    fn piece_round_trip() {
        for (offset, is_end, is_manifest) in [
            (0, true, true),
            (64, false, false),
            (0xF_FFFF, false, true),
            (5 * 1024 * 1024 + 16, true, false),
            ((1 << 32) - 1 - 7, false, false),
        ] {
            let piece = Piece {
                bid: BidPrefix([9, 8, 7, 6, 5, 4, 3, 2]),
                version: 0xDEAD_BEEF,
                offset,
                is_end,
                is_manifest,
                payload: Bytes::from_static(b"payload!"),
            };
            let mut out = Vec::new();
            piece.encode(&mut out);
            let mut buf = Bytes::from(out);
            assert_eq!(Record::Piece(piece), read_record(&mut buf).unwrap());
            assert!(buf.is_empty());
        }
    }

    #[test]
    fn header_round_trip() {
        let header = FrameHeader {
            sender: SidPrefix([1, 2, 3, 4, 5, 6]),
            seq: MessageSeq::new(0x7FFF),
            retransmission: false,
        };
        let mut out = Vec::new();
        header.encode(&mut out);
        let mut buf = Bytes::from(out);
        assert_eq!(header, read_header(&mut buf).unwrap());
    }

    #[test]
    fn message_seq_wraps() {
        assert_eq!(MessageSeq::new(0), MessageSeq::new(0x7FFF).next());
        assert_eq!(MessageSeq::new(6), MessageSeq::new(5).next());
    }
}
