//! The broadcast scheduler: what single record goes out next.
//!
//! Fired once per (jittered) pacing interval. Priorities:
//!
//! 1. forced advertisements (`announce_now`) - the positive-ACK path;
//! 2. the next piece of the bundle being transferred to the most recently
//!    heard peer that lacks one, manifest stream before body stream;
//! 3. a rotating advertisement of something we hold, biased toward bundles
//!    not announced recently.
//!
//! Exactly one record goes into each frame - the MTU is tight, and the
//! protocol tolerates one-record frames.

use std::{cmp::Reverse, time::Instant};

use tracing::{debug, trace};

use crate::{
    store::Bundle,
    wire::{self, Bar, FrameHeader, Piece, Record},
};

use super::{Engine, Phase, SentRecord, Transfer};

impl Engine {
    /// Builds the next outgoing frame, if there is anything worth saying.
    ///
    /// Returns a complete frame of at most the configured MTU. An identical
    /// record re-emitted within the retransmission window reuses its
    /// original message number with the retransmission flag set.
    pub fn next_frame(&mut self, now: Instant) -> Option<Vec<u8>> {
        let record = self.next_record(now)?;

        let (seq, retransmission) = match &self.last_sent {
            Some(prev)
                if prev.record == record
                    && now.duration_since(prev.at) < self.config.retransmit_window =>
            {
                (prev.seq, true)
            }
            _ => {
                let seq = self.next_seq;
                self.next_seq = seq.next();
                (seq, false)
            }
        };

        let header = FrameHeader {
            sender: self.sid.prefix(),
            seq,
            retransmission,
        };
        let mut frame = Vec::with_capacity(wire::FRAME_HEADER_LEN + record.len());
        header.encode(&mut frame);
        frame.extend_from_slice(&record);
        debug_assert!(frame.len() <= self.config.link_mtu);

        self.last_sent = Some(SentRecord { record, seq, at: now });
        Some(frame)
    }

    fn next_record(&mut self, now: Instant) -> Option<Vec<u8>> {
        if let Some(entry) = self.inventory.iter_mut().find(|e| e.announce_now) {
            entry.announce_now = false;
            entry.last_announced = Some(now);
            trace!(bid = %entry.bundle.id.prefix(), "forced announcement");
            return Some(encode(&Record::Bar(bar_for(&entry.bundle))));
        }
        if let Some(record) = self.piece_record() {
            return Some(record);
        }
        self.rotating_bar(now)
    }

    /// Emits the next piece of the active transfer, starting a new transfer
    /// first if none is active.
    fn piece_record(&mut self) -> Option<Vec<u8>> {
        if self.transfer.is_none() {
            self.transfer = self.pick_transfer();
        }
        let (bid, version, phase, offset) = {
            let t = self.transfer.as_ref()?;
            (t.bid, t.version, t.phase, t.offset)
        };

        let Some(entry) = self
            .inventory
            .iter()
            .find(|e| e.bundle.id.prefix() == bid && e.bundle.version == version)
        else {
            // the bundle was superseded in our own inventory mid-send
            self.transfer = None;
            return None;
        };
        let (stream, is_manifest) = match phase {
            Phase::Manifest => (&entry.bundle.manifest, true),
            Phase::Body => (&entry.bundle.body, false),
        };
        let total = stream.len() as u64;
        let room = wire::piece_room(self.config.link_mtu, offset) as u64;
        let take = total.saturating_sub(offset).min(room) as usize;
        let is_end = offset + take as u64 == total;

        let piece = Piece {
            bid,
            version,
            offset,
            is_end,
            is_manifest,
            payload: stream.slice(offset as usize..offset as usize + take),
        };
        trace!(
            bid = %bid,
            offset,
            len = take,
            end = is_end,
            manifest = is_manifest,
            "offering piece"
        );
        let record = encode(&Record::Piece(piece));

        if is_end && phase == Phase::Body {
            debug!(bid = %bid, version, "transfer complete");
            self.transfer = None;
        } else if let Some(t) = self.transfer.as_mut() {
            t.offset += take as u64;
            if is_end {
                t.phase = Phase::Body;
                t.offset = 0;
            }
        }
        Some(record)
    }

    /// Picks what to start sending: walks peers most recently heard first,
    /// and for each, looks for a bundle its BAR ledger says it lacks.
    /// Direct-addressed bundles for that peer come first, then small
    /// bundles (short messages converge fastest), with a rotating cursor
    /// breaking ties so equal candidates take turns.
    fn pick_transfer(&mut self) -> Option<Transfer> {
        if self.inventory.is_empty() {
            return None;
        }
        let mut order: Vec<usize> = (0..self.peers.len()).collect();
        order.sort_by_key(|&i| Reverse(self.peers.get(i).map(crate::peer::Peer::last_seen)));

        let n = self.inventory.len();
        for peer_index in order {
            let peer = self.peers.get(peer_index)?;
            let mut best: Option<(bool, usize, usize, usize)> = None;
            for turn in 0..n {
                let index = (self.transfer_cursor + turn) % n;
                let entry = &self.inventory[index];
                if peer.has_bundle(&entry.bundle.id.prefix(), entry.bundle.version) {
                    continue;
                }
                let rank = (
                    !entry.bundle.recipient.addresses(&peer.sid()),
                    entry.bundle.total_len(),
                    turn,
                    index,
                );
                if best.is_none_or(|b| rank < b) {
                    best = Some(rank);
                }
            }
            if let Some((_, _, _, index)) = best {
                self.transfer_cursor = (index + 1) % n;
                let entry = &self.inventory[index];
                debug!(
                    peer = %peer.sid(),
                    bid = %entry.bundle.id.prefix(),
                    version = entry.bundle.version,
                    "starting transfer"
                );
                return Some(Transfer {
                    peer: peer.sid(),
                    bid: entry.bundle.id.prefix(),
                    version: entry.bundle.version,
                    phase: Phase::Manifest,
                    offset: 0,
                });
            }
        }
        None
    }

    /// Advertises the bundle that has gone unannounced the longest.
    fn rotating_bar(&mut self, now: Instant) -> Option<Vec<u8>> {
        let entry = self.inventory.iter_mut().min_by_key(|e| e.last_announced)?;
        entry.last_announced = Some(now);
        trace!(bid = %entry.bundle.id.prefix(), "rotating announcement");
        Some(encode(&Record::Bar(bar_for(&entry.bundle))))
    }
}

fn bar_for(bundle: &Bundle) -> Bar {
    Bar {
        bid: bundle.id.prefix(),
        version: bundle.version,
        recipient: bundle.recipient,
    }
}

fn encode(record: &Record) -> Vec<u8> {
    let mut out = Vec::new();
    record.encode(&mut out);
    out
}
