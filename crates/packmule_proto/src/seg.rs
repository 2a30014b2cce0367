//! Ordered byte intervals of a partially received stream.
//!
//! Pieces of a stream arrive at arbitrary offsets, duplicated and out of
//! order. A [`SegmentList`] keeps what has arrived as a sorted run of
//! disjoint, non-adjacent segments, coalescing neighbours as gaps fill in.
//! When the list collapses to a single segment spanning the whole known
//! length, the stream is complete.
//!
//! Insertion never rewrites bytes that are already present: a new piece only
//! contributes the sub-ranges not yet covered (first-seen bytes win; peers
//! are assumed honest, corruption detection belongs to the store). This
//! makes insertion idempotent and insensitive to arrival order.

/// A contiguous received byte range of one stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    offset: u64,
    data: Vec<u8>,
}

impl Segment {
    /// Offset of the first byte of this segment within its stream.
    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// Offset one past the last byte of this segment.
    #[must_use]
    pub fn end(&self) -> u64 {
        self.offset + self.data.len() as u64
    }

    /// The received bytes.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// Sorted, disjoint, non-adjacent segments of one stream.
///
/// Invariant: for any two neighbouring segments `a, b`,
/// `a.end() < b.offset()`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentList {
    segs: Vec<Segment>,
}

impl SegmentList {
    /// Creates an empty list.
    #[must_use]
    pub const fn new() -> Self {
        Self { segs: Vec::new() }
    }

    /// The segments, in ascending offset order.
    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segs
    }

    /// Whether nothing has been received yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segs.is_empty()
    }

    /// Total number of bytes received so far.
    #[must_use]
    pub fn received(&self) -> u64 {
        self.segs.iter().map(|s| s.data.len() as u64).sum()
    }

    /// Merges a received piece into the list.
    ///
    /// Ranges already covered keep their bytes; the piece fills whatever
    /// gaps it overlaps, and touching neighbours are coalesced afterwards.
    pub fn insert(&mut self, offset: u64, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let end = offset + data.len() as u64;

        // segments before this cannot touch the piece
        let mut i = self.segs.partition_point(|s| s.end() < offset);
        let mut cur = offset;
        while cur < end {
            match self.segs.get(i).map(|s| (s.offset, s.end())) {
                // covered already, skip forward
                Some((s_offset, s_end)) if s_offset <= cur => {
                    cur = cur.max(s_end);
                    i += 1;
                }
                // gap up to the next segment
                Some((s_offset, _)) if s_offset < end => {
                    let chunk = &data[(cur - offset) as usize..(s_offset - offset) as usize];
                    self.segs.insert(
                        i,
                        Segment {
                            offset: cur,
                            data: chunk.to_vec(),
                        },
                    );
                    i += 1;
                    cur = s_offset;
                }
                // gap to the end of the piece
                _ => {
                    let chunk = &data[(cur - offset) as usize..];
                    self.segs.insert(
                        i,
                        Segment {
                            offset: cur,
                            data: chunk.to_vec(),
                        },
                    );
                    break;
                }
            }
        }

        self.coalesce();
    }

    /// If the list is exactly one segment covering `[0, total)`, the
    /// assembled stream.
    ///
    /// A zero-length stream is complete while the list is still empty; a
    /// segment cannot represent an empty range.
    #[must_use]
    pub fn complete(&self, total: u64) -> Option<&[u8]> {
        if total == 0 {
            return self.segs.is_empty().then_some(&[][..]);
        }
        match self.segs.as_slice() {
            [s] if s.offset == 0 && s.data.len() as u64 == total => Some(&s.data),
            _ => None,
        }
    }

    /// Single pass merging neighbours whose ranges now touch.
    fn coalesce(&mut self) {
        let mut i = 0;
        while i + 1 < self.segs.len() {
            if self.segs[i].end() >= self.segs[i + 1].offset {
                let next = self.segs.remove(i + 1);
                // insert never double-covers, but stay tolerant of overlap:
                // the lower segment's bytes win
                let skip = (self.segs[i].end() - next.offset) as usize;
                if skip < next.data.len() {
                    self.segs[i].data.extend_from_slice(&next.data[skip..]);
                }
            } else {
                i += 1;
            }
        }
    }
}
