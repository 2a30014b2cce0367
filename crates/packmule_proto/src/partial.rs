//! One in-flight bundle reconstruction from one peer.

use crate::{id::BidPrefix, seg::SegmentList, wire::Piece};

/// In-progress reconstruction of one bundle version offered by one peer.
///
/// A partial tracks a specific `(bid prefix, version)` pair: a piece with a
/// different version of the same BID belongs to a different partial. The
/// total length of each stream is unknown until its end piece arrives.
#[derive(Debug, Clone, Default)]
pub struct Partial {
    bid: BidPrefix,
    version: u64,
    manifest_len: Option<u64>,
    body_len: Option<u64>,
    manifest: SegmentList,
    body: SegmentList,
}

impl Partial {
    /// Starts tracking a bundle offered by a peer.
    #[must_use]
    pub fn new(bid: BidPrefix, version: u64) -> Self {
        Self {
            bid,
            version,
            ..Self::default()
        }
    }

    /// BID prefix this partial tracks.
    #[must_use]
    pub const fn bid(&self) -> BidPrefix {
        self.bid
    }

    /// Bundle version this partial tracks.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Whether this partial tracks the given bundle version.
    #[must_use]
    pub fn matches(&self, bid: &BidPrefix, version: u64) -> bool {
        self.bid == *bid && self.version == version
    }

    /// Whether no body bytes have been received (or seeded) yet.
    #[must_use]
    pub fn body_is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// Seeds the body stream with locally held bytes of an older journal
    /// version, which the sender will assume present and skip.
    pub fn seed_body(&mut self, data: &[u8]) {
        self.body.insert(0, data);
    }

    /// Merges a received piece into the matching stream, fixing the stream
    /// length if this is the end piece.
    pub fn apply(&mut self, piece: &Piece) {
        debug_assert!(self.matches(&piece.bid, piece.version));
        let (list, len) = if piece.is_manifest {
            (&mut self.manifest, &mut self.manifest_len)
        } else {
            (&mut self.body, &mut self.body_len)
        };
        if piece.is_end {
            *len = Some(piece.offset + piece.payload.len() as u64);
        }
        list.insert(piece.offset, &piece.payload);
    }

    /// Both assembled streams, once both lengths are known and every byte of
    /// both has arrived.
    #[must_use]
    pub fn assembled(&self) -> Option<(&[u8], &[u8])> {
        let manifest = self.manifest.complete(self.manifest_len?)?;
        let body = self.body.complete(self.body_len?)?;
        Some((manifest, body))
    }

    /// The manifest stream's received ranges.
    #[must_use]
    pub const fn manifest_segments(&self) -> &SegmentList {
        &self.manifest
    }

    /// The body stream's received ranges.
    #[must_use]
    pub const fn body_segments(&self) -> &SegmentList {
        &self.body
    }

    /// Received and total byte counts for both streams, for progress
    /// reporting: `((manifest_received, manifest_len), (body_received,
    /// body_len))`.
    #[must_use]
    pub fn progress(&self) -> ((u64, Option<u64>), (u64, Option<u64>)) {
        (
            (self.manifest.received(), self.manifest_len),
            (self.body.received(), self.body_len),
        )
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn piece(offset: u64, payload: &'static [u8], is_end: bool, is_manifest: bool) -> Piece {
        Piece {
            bid: BidPrefix::default(),
            version: 0,
            offset,
            is_end,
            is_manifest,
            payload: Bytes::from_static(payload),
        }
    }

    #[test]
    fn complete_after_both_end_pieces() {
        let mut partial = Partial::new(BidPrefix::default(), 0);
        partial.apply(&piece(0, b"manifest", true, true));
        assert_eq!(None, partial.assembled());
        partial.apply(&piece(0, b"body", true, false));
        assert_eq!(Some((&b"manifest"[..], &b"body"[..])), partial.assembled());
    }

    #[test]
    fn incomplete_without_length() {
        let mut partial = Partial::new(BidPrefix::default(), 0);
        partial.apply(&piece(0, b"manifest", true, true));
        partial.apply(&piece(0, b"bo", false, false));
        // all bytes present, but no end piece has fixed the body length
        assert_eq!(None, partial.assembled());
        partial.apply(&piece(2, b"dy", true, false));
        assert_eq!(Some((&b"manifest"[..], &b"body"[..])), partial.assembled());
    }

    #[test]
    fn seeded_body_counts_towards_completion() {
        let mut partial = Partial::new(BidPrefix::default(), 0);
        partial.seed_body(&[7; 1024]);
        assert!(!partial.body_is_empty());
        partial.apply(&piece(0, b"m", true, true));
        partial.apply(&piece(1024, b"tail", true, false));
        let (_, body) = partial.assembled().unwrap();
        assert_eq!(1028, body.len());
        assert_eq!(7, body[0]);
        assert_eq!(b't', body[1024]);
    }

    #[test]
    fn empty_body_stream() {
        let mut partial = Partial::new(BidPrefix::default(), 0);
        partial.apply(&piece(0, b"m", true, true));
        partial.apply(&piece(0, b"", true, false));
        assert_eq!(Some((&b"m"[..], &b""[..])), partial.assembled());
    }
}
