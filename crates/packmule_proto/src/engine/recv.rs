//! Applying received frames to engine state.

use bytes::Bytes;
use tracing::{debug, info, trace, warn};

use crate::{
    store::BundleStore,
    wire::{self, Bar, FrameError, Piece, Record},
    JOURNAL_VERSION_BOUND,
};

use super::Engine;

impl Engine {
    /// Applies one received frame.
    ///
    /// Frames from ourselves (radio echo, our own inbox files) are ignored
    /// whole. Records are applied in order until the frame ends or a record
    /// fails to parse; records applied before a failure stay applied, since
    /// each record stands alone.
    ///
    /// Store failures inside the frame (journal prefetch, commit) are not
    /// errors of the *frame*: the affected piece is dropped or the partial
    /// retained, a warning is logged, and processing continues.
    ///
    /// # Errors
    ///
    /// Errors if the frame is shorter than its header, a record is
    /// truncated, or a record tag is unknown. The peer is not penalized;
    /// the caller just drops the frame.
    pub fn handle_frame<S: BundleStore>(
        &mut self,
        now: std::time::Instant,
        store: &mut S,
        raw: &[u8],
    ) -> Result<(), FrameError> {
        let mut buf = Bytes::copy_from_slice(raw);
        let header = wire::read_header(&mut buf)?;
        if header.sender == self.sid.prefix() {
            return Ok(());
        }

        if self.peers.find(&header.sender).is_none() {
            info!(peer = %header.sender, "registering peer");
        }
        let (peer_index, evicted) = self.peers.find_or_create(header.sender, now, &mut self.rng);
        if let Some(evicted) = evicted {
            debug!(peer = %evicted, "evicted peer to make room");
            self.on_peer_evicted(&evicted);
        }
        if let Some(peer) = self.peers.get_mut(peer_index) {
            peer.note_frame(now, header.seq, header.retransmission);
        }

        while !buf.is_empty() {
            match wire::read_record(&mut buf)? {
                Record::Bar(bar) => self.saw_bar(now, peer_index, &bar),
                Record::Piece(piece) => self.saw_piece(store, peer_index, &piece),
            }
        }
        Ok(())
    }

    /// A peer told us it holds a bundle.
    fn saw_bar(&mut self, now: std::time::Instant, peer_index: usize, bar: &Bar) {
        trace!(bid = %bar.bid, version = bar.version, "saw BAR");

        // if we already hold this version, answer with our own BAR so the
        // sender can move on to something else
        for entry in &mut self.inventory {
            if entry.bundle.id.prefix() == bar.bid && entry.bundle.version >= bar.version {
                entry.announce_now = true;
            }
        }

        // a peer advertising the bundle we are mid-way through sending them
        // has it already; stop
        let peer_sid = self.peers.get(peer_index).map(crate::peer::Peer::sid);
        if let (Some(sid), Some(t)) = (peer_sid, &self.transfer) {
            if t.peer == sid && t.bid == bar.bid && bar.version >= t.version {
                debug!(bid = %bar.bid, "peer advertised the bundle we were sending, stopping");
                self.transfer = None;
            }
        }

        if let Some(peer) = self.peers.get_mut(peer_index) {
            peer.note_bar(now, bar);
        }
    }

    /// A peer sent us a fragment of a bundle stream.
    fn saw_piece<S: BundleStore>(&mut self, store: &mut S, peer_index: usize, piece: &Piece) {
        trace!(
            bid = %piece.bid,
            version = piece.version,
            offset = piece.offset,
            len = piece.payload.len(),
            end = piece.is_end,
            manifest = piece.is_manifest,
            "saw piece"
        );

        // inventory pass: do we hold this bundle already, and if only at an
        // older journal version, which entry can seed the body?
        let mut journal_source = None;
        let mut have_this_version = false;
        for (i, entry) in self.inventory.iter().enumerate() {
            if entry.bundle.id.prefix() == piece.bid {
                if piece.version <= entry.bundle.version {
                    have_this_version = true;
                } else if piece.version < JOURNAL_VERSION_BOUND {
                    journal_source = Some(i);
                }
            }
        }
        if have_this_version {
            // positive ACK: announce immediately so the sender stops
            // spending frames on this bundle
            for entry in &mut self.inventory {
                if entry.bundle.id.prefix() == piece.bid && entry.bundle.version >= piece.version {
                    entry.announce_now = true;
                }
            }
            return;
        }

        let Some(peer) = self.peers.get_mut(peer_index) else {
            return;
        };
        let existing = peer.find_partial(&piece.bid, piece.version);

        // the sender assumes we hold the old journal body and will skip
        // those bytes, so seed them from the store - and do it before any
        // slot is claimed, so a failed prefetch leaves no tracker state
        let body_empty = match existing {
            Some(slot) => peer.partial_mut(slot).is_none_or(|p| p.body_is_empty()),
            None => true,
        };
        let seed = match journal_source {
            Some(src) if body_empty => {
                match store.prime_body_cache(&self.inventory[src].bundle) {
                    Ok(bytes) => Some(bytes),
                    Err(err) => {
                        warn!(
                            %err,
                            bid = %piece.bid,
                            "cannot seed journal body, dropping piece"
                        );
                        return;
                    }
                }
            }
            _ => None,
        };

        let slot = existing
            .unwrap_or_else(|| peer.alloc_partial(piece.bid, piece.version, &mut self.rng));
        let Some(partial) = peer.partial_mut(slot) else {
            return;
        };
        if let Some(bytes) = seed {
            debug!(len = bytes.len(), "seeded body from older journal version");
            partial.seed_body(&bytes);
        }
        partial.apply(piece);

        if let Some((manifest, body)) = partial.assembled() {
            debug!(bid = %piece.bid, version = piece.version, "bundle complete, committing");
            match store.commit_bundle(manifest, body) {
                Ok(()) => peer.release_partial(slot),
                // keep the partial: the next duplicate piece completes it
                // again and retries the commit
                Err(err) => warn!(%err, bid = %piece.bid, "commit failed, keeping partial"),
            }
        }
    }
}
