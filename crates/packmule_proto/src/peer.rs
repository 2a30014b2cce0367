//! Known peers: last-seen tracking, in-flight partials, advertisement
//! ledger.
//!
//! Both the peer table and the per-peer partial slots are fixed-capacity
//! with *uniform random* replacement. Random replacement needs no LRU
//! metadata and cannot starve any single transfer indefinitely; the RNG is
//! owned by the engine and threaded in, so tests can seed it.

use std::time::Instant;

use rand::{rngs::SmallRng, Rng};

use crate::{
    id::{BidPrefix, SidPrefix},
    partial::Partial,
    wire::{Bar, MessageSeq},
    MAX_BUNDLES_IN_FLIGHT,
};

/// Most advertisements remembered per peer. The ledger must not grow
/// unboundedly; on overflow the least recently refreshed entry is dropped.
pub const BAR_LEDGER_CAP: usize = 64;

/// One advertisement observed from a peer.
#[derive(Debug, Clone)]
struct BarEntry {
    bar: Bar,
    refreshed: Instant,
}

/// State for one node we have heard from.
#[derive(Debug, Clone)]
pub struct Peer {
    sid: SidPrefix,
    last_seen: Instant,
    last_msg_seq: Option<MessageSeq>,
    partials: [Option<Partial>; MAX_BUNDLES_IN_FLIGHT],
    bars: Vec<BarEntry>,
}

impl Peer {
    fn new(sid: SidPrefix, now: Instant) -> Self {
        Self {
            sid,
            last_seen: now,
            last_msg_seq: None,
            partials: std::array::from_fn(|_| None),
            bars: Vec::new(),
        }
    }

    /// SID prefix this peer is keyed by.
    #[must_use]
    pub const fn sid(&self) -> SidPrefix {
        self.sid
    }

    /// When we last accepted a frame from this peer.
    #[must_use]
    pub const fn last_seen(&self) -> Instant {
        self.last_seen
    }

    /// Message number of the last non-retransmitted frame.
    #[must_use]
    pub const fn last_msg_seq(&self) -> Option<MessageSeq> {
        self.last_msg_seq
    }

    /// Records an accepted frame from this peer.
    ///
    /// Retransmission detection is a hint only; it does not suppress record
    /// processing, because records are idempotent.
    pub fn note_frame(&mut self, now: Instant, seq: MessageSeq, retransmission: bool) {
        self.last_seen = now;
        if !retransmission {
            self.last_msg_seq = Some(seq);
        }
    }

    /// Records an advertisement from this peer, deduplicating identical
    /// triples and evicting the least recently refreshed entry when full.
    pub fn note_bar(&mut self, now: Instant, bar: &Bar) {
        if let Some(entry) = self.bars.iter_mut().find(|e| e.bar == *bar) {
            entry.refreshed = now;
            return;
        }
        if self.bars.len() >= BAR_LEDGER_CAP {
            if let Some(oldest) = self
                .bars
                .iter()
                .enumerate()
                .min_by_key(|(_, e)| e.refreshed)
                .map(|(i, _)| i)
            {
                self.bars.swap_remove(oldest);
            }
        }
        self.bars.push(BarEntry {
            bar: *bar,
            refreshed: now,
        });
    }

    /// Whether this peer has advertised the given bundle at `version` or
    /// newer, meaning they do not need it from us.
    #[must_use]
    pub fn has_bundle(&self, bid: &BidPrefix, version: u64) -> bool {
        self.bars
            .iter()
            .any(|e| e.bar.bid == *bid && e.bar.version >= version)
    }

    /// Number of advertisements currently remembered.
    #[must_use]
    pub fn bar_count(&self) -> usize {
        self.bars.len()
    }

    /// Slot index of the partial tracking this bundle version, if any.
    #[must_use]
    pub fn find_partial(&self, bid: &BidPrefix, version: u64) -> Option<usize> {
        self.partials
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|p| p.matches(bid, version)))
    }

    /// Claims a slot for a new partial, preferring an empty slot and
    /// otherwise replacing a uniformly random one (freeing its segments).
    pub fn alloc_partial(&mut self, bid: BidPrefix, version: u64, rng: &mut SmallRng) -> usize {
        let slot = self
            .partials
            .iter()
            .position(Option::is_none)
            .unwrap_or_else(|| rng.gen_range(0..MAX_BUNDLES_IN_FLIGHT));
        self.partials[slot] = Some(Partial::new(bid, version));
        slot
    }

    /// The partial in the given slot.
    pub fn partial_mut(&mut self, slot: usize) -> Option<&mut Partial> {
        self.partials.get_mut(slot)?.as_mut()
    }

    /// Frees a slot, dropping all its segments.
    pub fn release_partial(&mut self, slot: usize) {
        if let Some(p) = self.partials.get_mut(slot) {
            *p = None;
        }
    }

    /// In-flight partials from this peer.
    pub fn partials(&self) -> impl Iterator<Item = &Partial> {
        self.partials.iter().flatten()
    }
}

/// Bounded table of known peers, keyed by SID prefix.
///
/// A peer is created on first receipt of any frame from a new prefix and
/// lives until evicted by random replacement once the table is full;
/// eviction drops all of its partials and advertisements with it.
#[derive(Debug)]
pub struct PeerTable {
    peers: Vec<Peer>,
    capacity: usize,
}

impl PeerTable {
    /// Creates an empty table holding at most `capacity` peers.
    #[must_use]
    pub const fn new(capacity: usize) -> Self {
        Self {
            peers: Vec::new(),
            capacity,
        }
    }

    /// Number of peers currently known.
    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Whether no peer has been heard yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// All known peers, in table order.
    pub fn iter(&self) -> impl Iterator<Item = &Peer> {
        self.peers.iter()
    }

    /// The peer at a table index.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Peer> {
        self.peers.get(index)
    }

    /// The peer at a table index.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut Peer> {
        self.peers.get_mut(index)
    }

    /// Index of the peer with this prefix, if known.
    #[must_use]
    pub fn find(&self, sid: &SidPrefix) -> Option<usize> {
        self.peers.iter().position(|p| p.sid == *sid)
    }

    /// Finds the peer with this prefix, registering it first if unknown.
    ///
    /// Once the table is full, registration evicts a uniformly random
    /// existing peer; the evicted prefix is returned so the caller can tear
    /// down any state (such as an outbound transfer) tied to it.
    pub fn find_or_create(
        &mut self,
        sid: SidPrefix,
        now: Instant,
        rng: &mut SmallRng,
    ) -> (usize, Option<SidPrefix>) {
        if let Some(index) = self.find(&sid) {
            return (index, None);
        }
        if self.peers.len() < self.capacity {
            self.peers.push(Peer::new(sid, now));
            return (self.peers.len() - 1, None);
        }
        let index = rng.gen_range(0..self.peers.len());
        let evicted = self.peers[index].sid;
        self.peers[index] = Peer::new(sid, now);
        (index, Some(evicted))
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use crate::id::RecipientPrefix;

    use super::*;

    fn rng() -> SmallRng {
        SmallRng::seed_from_u64(7)
    }

    fn sid(n: u8) -> SidPrefix {
        SidPrefix([n, 0, 0, 0, 0, 0])
    }

    fn bar(n: u8, version: u64) -> Bar {
        Bar {
            bid: BidPrefix([n, 0, 0, 0, 0, 0, 0, 0]),
            version,
            recipient: RecipientPrefix::default(),
        }
    }

    #[test]
    fn bars_deduplicate() {
        let now = Instant::now();
        let mut peer = Peer::new(sid(1), now);
        peer.note_bar(now, &bar(1, 5));
        peer.note_bar(now, &bar(1, 5));
        assert_eq!(1, peer.bar_count());
        // a different version of the same bundle is a new entry
        peer.note_bar(now, &bar(1, 6));
        assert_eq!(2, peer.bar_count());
    }

    #[test]
    fn ledger_caps_at_lru() {
        let base = Instant::now();
        let mut peer = Peer::new(sid(1), base);
        for n in 0..=BAR_LEDGER_CAP as u64 {
            peer.note_bar(
                base + std::time::Duration::from_millis(n),
                &bar(0, n + 1),
            );
        }
        assert_eq!(BAR_LEDGER_CAP, peer.bar_count());
        // the newest entry survived the overflow
        assert!(peer.has_bundle(&BidPrefix([0; 8]), BAR_LEDGER_CAP as u64 + 1));
    }

    #[test]
    fn has_bundle_respects_version() {
        let now = Instant::now();
        let mut peer = Peer::new(sid(1), now);
        peer.note_bar(now, &bar(1, 5));
        assert!(peer.has_bundle(&bar(1, 5).bid, 5));
        assert!(peer.has_bundle(&bar(1, 5).bid, 3));
        assert!(!peer.has_bundle(&bar(1, 5).bid, 6));
        assert!(!peer.has_bundle(&bar(2, 5).bid, 1));
    }

    #[test]
    fn partial_slots_prefer_empty_then_replace() {
        let now = Instant::now();
        let mut rng = rng();
        let mut peer = Peer::new(sid(1), now);
        for n in 0..MAX_BUNDLES_IN_FLIGHT as u8 {
            let slot = peer.alloc_partial(BidPrefix([n; 8]), 1, &mut rng);
            assert_eq!(usize::from(n), slot);
        }
        // full: the fifth allocation replaces some slot, capacity holds
        let slot = peer.alloc_partial(BidPrefix([9; 8]), 1, &mut rng);
        assert!(slot < MAX_BUNDLES_IN_FLIGHT);
        assert_eq!(MAX_BUNDLES_IN_FLIGHT, peer.partials().count());
        assert!(peer.find_partial(&BidPrefix([9; 8]), 1).is_some());
    }

    #[test]
    fn table_overflow_evicts_exactly_one() {
        let now = Instant::now();
        let mut rng = rng();
        let mut table = PeerTable::new(4);
        for n in 0..4 {
            table.find_or_create(sid(n), now, &mut rng);
        }
        let (index, evicted) = table.find_or_create(sid(9), now, &mut rng);
        assert_eq!(4, table.len());
        let evicted = evicted.unwrap();
        assert!(evicted.0[0] < 4);
        assert_eq!(sid(9), table.get(index).unwrap().sid());
        assert!(table.find(&evicted).is_none());
    }

    #[test]
    fn known_peer_is_not_recreated() {
        let now = Instant::now();
        let mut rng = rng();
        let mut table = PeerTable::new(4);
        let (a, _) = table.find_or_create(sid(1), now, &mut rng);
        table.get_mut(a).unwrap().note_bar(now, &bar(1, 1));
        let (b, evicted) = table.find_or_create(sid(1), now, &mut rng);
        assert_eq!(a, b);
        assert!(evicted.is_none());
        assert_eq!(1, table.get(b).unwrap().bar_count());
    }
}
