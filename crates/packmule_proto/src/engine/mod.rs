//! See [`Engine`].

mod recv;
mod send;

use std::{
    fmt,
    time::{Duration, Instant},
};

use rand::{rngs::SmallRng, SeedableRng};

use crate::{
    id::{BidPrefix, Sid, SidPrefix},
    peer::PeerTable,
    store::{Bundle, BundleStore, StoreError},
    wire::MessageSeq,
    LINK_MTU, MAX_PEERS,
};

/// Tunables for an [`Engine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Largest frame to emit or accept.
    pub link_mtu: usize,
    /// Capacity of the peer table.
    pub max_peers: usize,
    /// Base pacing interval between outgoing frames.
    pub update_interval: Duration,
    /// Upper bound of the random delay added to each pacing interval, to
    /// break lock-step between radios that came up at the same moment.
    pub update_jitter: Duration,
    /// Re-emitting an identical record within this window marks the frame
    /// as a retransmission and reuses its message number.
    pub retransmit_window: Duration,
    /// How often the loop refreshes the local inventory from the store.
    pub refresh_interval: Duration,
    /// Lower clamp on the store refresh deadline.
    pub refresh_deadline_min: Duration,
    /// Upper clamp on the store refresh deadline. The loop cannot receive
    /// while a refresh is in flight, so refreshes must never block long.
    pub refresh_deadline_max: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            link_mtu: LINK_MTU,
            max_peers: MAX_PEERS,
            // one frame per second on the radio; the base interval deducts
            // half the jitter so the average stays at one per second
            update_interval: Duration::from_millis(875),
            update_jitter: Duration::from_millis(250),
            retransmit_window: Duration::from_secs(2),
            refresh_interval: Duration::from_secs(3),
            refresh_deadline_min: Duration::from_millis(100),
            refresh_deadline_max: Duration::from_millis(500),
        }
    }
}

/// A bundle we hold, plus the engine's announcement bookkeeping for it.
#[derive(Debug, Clone)]
pub struct InventoryEntry {
    /// The bundle itself.
    pub bundle: Bundle,
    /// Raised to force an advertisement at the next scheduler firing - the
    /// positive-ACK path for peers offering us something we already have.
    pub announce_now: bool,
    pub(crate) last_announced: Option<Instant>,
}

/// Which stream of the bundle an outbound transfer is currently walking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Manifest,
    Body,
}

/// Outbound transfer state: the bundle currently being offered, to whom,
/// and how far along each stream we are. `None` on the engine means idle;
/// the transfer is dropped when its end piece goes out, when the peer
/// advertises the bundle back at us, or when the peer is evicted.
#[derive(Debug, Clone)]
pub(crate) struct Transfer {
    pub peer: SidPrefix,
    pub bid: BidPrefix,
    pub version: u64,
    pub phase: Phase,
    pub offset: u64,
}

#[derive(Debug)]
pub(crate) struct SentRecord {
    pub record: Vec<u8>,
    pub seq: MessageSeq,
    pub at: Instant,
}

/// The whole synchronizer: peer table, inventory, outbound transfer state,
/// frame counter and RNG, behind one owning value.
///
/// The engine performs no I/O and keeps no clock; the caller drives it:
///
/// - feed every received frame to [`Engine::handle_frame`]
/// - once per (jittered) pacing interval, emit what
///   [`Engine::next_frame`] returns
/// - every few seconds, call [`Engine::refresh_inventory`]
///
/// All mutation is serial through `&mut self`, so the caller's loop is the
/// only scheduling discipline required.
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    sid: Sid,
    peers: PeerTable,
    inventory: Vec<InventoryEntry>,
    token: Option<String>,
    transfer: Option<Transfer>,
    transfer_cursor: usize,
    next_seq: MessageSeq,
    last_sent: Option<SentRecord>,
    rng: SmallRng,
}

impl Engine {
    /// Creates an engine identified by `sid`, with an entropy-seeded RNG.
    #[must_use]
    pub fn new(config: EngineConfig, sid: Sid) -> Self {
        Self::with_rng(config, sid, SmallRng::from_entropy())
    }

    /// Creates an engine with a caller-provided RNG, so eviction choices are
    /// reproducible under test.
    #[must_use]
    pub fn with_rng(config: EngineConfig, sid: Sid, rng: SmallRng) -> Self {
        let peers = PeerTable::new(config.max_peers);
        Self {
            config,
            sid,
            peers,
            inventory: Vec::new(),
            token: None,
            transfer: None,
            transfer_cursor: 0,
            next_seq: MessageSeq::default(),
            last_sent: None,
            rng,
        }
    }

    /// The engine's configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Our own node identifier.
    #[must_use]
    pub const fn sid(&self) -> &Sid {
        &self.sid
    }

    /// The peers we currently know.
    #[must_use]
    pub const fn peers(&self) -> &PeerTable {
        &self.peers
    }

    /// The bundles we currently hold.
    #[must_use]
    pub fn inventory(&self) -> &[InventoryEntry] {
        &self.inventory
    }

    /// Whether a bundle is currently being offered to a peer.
    #[must_use]
    pub const fn transfer_in_progress(&self) -> bool {
        self.transfer.is_some()
    }

    /// Pulls an incremental inventory listing from the store and merges it,
    /// returning how many previously unknown bundles appeared.
    ///
    /// A listed bundle replaces a held one only if its version is newer; a
    /// fresh version resets the announcement rotation so neighbours hear
    /// about it soon.
    pub fn refresh_inventory<S: BundleStore>(
        &mut self,
        store: &mut S,
        deadline: Duration,
    ) -> Result<usize, StoreError> {
        let page = store.refresh_inventory(self.token.as_deref(), deadline)?;
        let mut new = 0;
        for bundle in page.bundles {
            match self.inventory.iter().position(|e| e.bundle.id == bundle.id) {
                Some(index) => {
                    let entry = &mut self.inventory[index];
                    if bundle.version > entry.bundle.version {
                        entry.bundle = bundle;
                        entry.last_announced = None;
                    }
                }
                None => {
                    new += 1;
                    self.inventory.push(InventoryEntry {
                        bundle,
                        announce_now: false,
                        last_announced: None,
                    });
                }
            }
        }
        if page.token.is_some() {
            self.token = page.token;
        }
        Ok(new)
    }

    /// A snapshot of engine state for progress reporting.
    #[must_use]
    pub fn summary(&self) -> Summary {
        let mut partials = 0;
        let mut buffered_bytes = 0;
        for peer in self.peers.iter() {
            for partial in peer.partials() {
                partials += 1;
                let ((m, _), (b, _)) = partial.progress();
                buffered_bytes += m + b;
            }
        }
        Summary {
            peers: self.peers.len(),
            partials,
            buffered_bytes,
            bundles: self.inventory.len(),
        }
    }

    pub(crate) fn on_peer_evicted(&mut self, sid: &SidPrefix) {
        if self
            .transfer
            .as_ref()
            .is_some_and(|t| t.peer == *sid)
        {
            self.transfer = None;
        }
    }
}

/// Point-in-time counters for the once-per-second progress line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    /// Peers currently in the table.
    pub peers: usize,
    /// Partials in flight across all peers.
    pub partials: usize,
    /// Piece bytes buffered across all partials.
    pub buffered_bytes: u64,
    /// Bundles in the local inventory.
    pub bundles: usize,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} peers, {} partials in flight ({} bytes buffered), {} bundles held",
            self.peers, self.partials, self.buffered_bytes, self.bundles
        )
    }
}
