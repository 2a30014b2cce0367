//! Test doubles shared by unit and integration tests.

use std::time::Duration;

use bytes::Bytes;

use crate::store::{Bundle, BundleStore, InventoryPage, StoreError};

/// In-memory [`BundleStore`] with failure injection.
///
/// `listing` is what the next [`refresh_inventory`] returns; committed
/// bundles are recorded in `commits` rather than fed back, so tests control
/// exactly what the engine believes it holds.
///
/// [`refresh_inventory`]: BundleStore::refresh_inventory
#[derive(Debug, Default)]
pub struct MemoryStore {
    /// Bundles the next refresh hands out.
    pub listing: Vec<Bundle>,
    /// Token the next refresh hands out.
    pub token: Option<String>,
    /// Every `(manifest, body)` pair committed so far.
    pub commits: Vec<(Vec<u8>, Vec<u8>)>,
    /// Number of times the body cache was primed.
    pub primes: usize,
    /// Make [`BundleStore::prime_body_cache`] fail.
    pub fail_prefetch: bool,
    /// Make [`BundleStore::commit_bundle`] fail.
    pub fail_commit: bool,
}

impl BundleStore for MemoryStore {
    fn refresh_inventory(
        &mut self,
        _since: Option<&str>,
        _deadline: Duration,
    ) -> Result<InventoryPage, StoreError> {
        Ok(InventoryPage {
            bundles: self.listing.clone(),
            token: self.token.clone(),
        })
    }

    fn prime_body_cache(&mut self, bundle: &Bundle) -> Result<Bytes, StoreError> {
        if self.fail_prefetch {
            return Err(StoreError::Prefetch("injected failure".into()));
        }
        self.primes += 1;
        Ok(bundle.body.clone())
    }

    fn commit_bundle(&mut self, manifest: &[u8], body: &[u8]) -> Result<(), StoreError> {
        if self.fail_commit {
            return Err(StoreError::Commit("injected failure".into()));
        }
        self.commits.push((manifest.to_vec(), body.to_vec()));
        Ok(())
    }
}
