#![doc = include_str!("../README.md")]

pub mod engine;
pub mod id;
pub mod partial;
pub mod peer;
pub mod seg;
pub mod store;
pub mod testing;
pub mod wire;

pub use {
    engine::{Engine, EngineConfig},
    store::BundleStore,
};

/// Largest frame we will emit or accept in one radio packet.
///
/// The radios we target have 255-byte frames, but link overhead and forward
/// error correction eat into that; ~200 usable bytes is what reliably
/// survives. Every outgoing frame is a single contiguous write of at most
/// this many bytes.
pub const LINK_MTU: usize = 200;

/// Capacity of the peer table.
///
/// Once full, a uniformly random existing peer is evicted to make room - see
/// [`peer::PeerTable`].
pub const MAX_PEERS: usize = 16;

/// How many bundles we will track in flight from a single peer at once.
///
/// Each in-flight bundle costs two segment lists of buffered bytes, so this
/// bounds per-peer memory. Slots are recycled by uniform random replacement.
pub const MAX_BUNDLES_IN_FLIGHT: usize = 4;

/// Bundle versions below this bound belong to journal bundles.
///
/// Journal versions are body lengths, which stay comfortably under 2^32;
/// non-journal bundles use millisecond timestamps, which do not. The
/// receive path uses this to decide whether an older local version can seed
/// an incoming transfer's body.
pub const JOURNAL_VERSION_BOUND: u64 = 1 << 32;
