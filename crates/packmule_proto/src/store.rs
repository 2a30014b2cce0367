//! Contract between the engine and the local bundle store.
//!
//! The store itself (a servald-style REST service, a database, a test
//! double) is an external collaborator; the engine only ever talks to it
//! through [`BundleStore`]. The engine does not inspect manifest structure -
//! it trusts the store to validate what it commits.

use std::time::Duration;

use bytes::Bytes;

use crate::id::{BundleId, RecipientPrefix};

/// A bundle held in the local inventory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bundle {
    /// Full bundle identifier.
    pub id: BundleId,
    /// Monotonically increasing version; newer versions supersede older.
    pub version: u64,
    /// Recipient the bundle is addressed to, if any.
    pub recipient: RecipientPrefix,
    /// Whether the bundle's body is append-only (older prefixes of the body
    /// may be assumed present by senders).
    pub is_journal: bool,
    /// The manifest bytes.
    pub manifest: Bytes,
    /// The body bytes.
    pub body: Bytes,
}

impl Bundle {
    /// Combined size of both streams, the cost of transferring this bundle.
    #[must_use]
    pub fn total_len(&self) -> usize {
        self.manifest.len() + self.body.len()
    }
}

/// One incremental inventory refresh result.
#[derive(Debug, Clone, Default)]
pub struct InventoryPage {
    /// Bundles added or updated since the token the listing was taken with.
    pub bundles: Vec<Bundle>,
    /// Opaque token to resume the next refresh from, if the store issued
    /// one.
    pub token: Option<String>,
}

/// A store operation failed.
///
/// None of these are fatal to the engine: a failed listing is retried on the
/// next refresh, a failed prefetch drops the piece that needed it, and a
/// failed commit leaves the completed partial in place so the next identical
/// completion retries.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// The inventory listing could not be fetched.
    #[error("inventory listing failed: {0}")]
    List(String),
    /// The body of a journal bundle could not be loaded into the cache.
    #[error("body cache priming failed: {0}")]
    Prefetch(String),
    /// The assembled bundle could not be committed.
    #[error("bundle commit failed: {0}")]
    Commit(String),
}

/// Operations the engine needs from the local bundle store.
pub trait BundleStore {
    /// Lists bundles held locally since `since`, within `deadline`.
    ///
    /// Callers clamp the deadline; implementations must give up rather than
    /// overrun it, since the engine's loop cannot receive while blocked
    /// here.
    fn refresh_inventory(
        &mut self,
        since: Option<&str>,
        deadline: Duration,
    ) -> Result<InventoryPage, StoreError>;

    /// Loads the current body of a journal bundle.
    ///
    /// Implementations may serve this from a single-slot cache that the next
    /// call overwrites; callers take ownership of the returned bytes
    /// immediately.
    fn prime_body_cache(&mut self, bundle: &Bundle) -> Result<Bytes, StoreError>;

    /// Atomically inserts or updates an assembled bundle.
    fn commit_bundle(&mut self, manifest: &[u8], body: &[u8]) -> Result<(), StoreError>;
}
