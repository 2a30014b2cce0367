//! Blocking HTTP client for a servald-style bundle store.
//!
//! The endpoint exposes an incremental bundle listing, per-bundle manifest
//! and raw body fetches, and a multipart insert, all authorized with a
//! bearer credential. The engine only sees the [`BundleStore`] trait; the
//! exact REST shape is our business alone.

use std::time::{Duration, Instant};

use anyhow::Context as _;
use bytes::Bytes;
use packmule_proto::{
    id::{BundleId, RecipientPrefix},
    store::{Bundle, BundleStore, InventoryPage, StoreError},
};
use reqwest::blocking::{multipart, Client};
use serde::Deserialize;
use tracing::debug;

/// How long a commit may take; commits happen on the receive path, but an
/// assembled bundle is worth a short stall.
const COMMIT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct Listing {
    #[serde(default)]
    token: Option<String>,
    bundles: Vec<ListedBundle>,
}

#[derive(Debug, Deserialize)]
struct ListedBundle {
    id: String,
    version: u64,
    #[serde(default)]
    recipient: Option<String>,
    #[serde(default)]
    journal: bool,
}

/// A remote bundle store spoken to over HTTP.
#[derive(Debug)]
pub struct HttpStore {
    client: Client,
    base: String,
    credential: String,
    /// Single-slot body cache: the last journal body primed. Overwritten on
    /// every prime, so callers copy out immediately.
    cache: Option<(BundleId, u64, Bytes)>,
}

impl HttpStore {
    /// Builds a client for the store at `base`.
    pub fn new(base: &str, credential: &str) -> anyhow::Result<Self> {
        let client = Client::builder()
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            client,
            base: base.trim_end_matches('/').to_owned(),
            credential: credential.to_owned(),
            cache: None,
        })
    }

    fn get_bytes(&self, url: &str, timeout: Duration) -> Result<Bytes, reqwest::Error> {
        self.client
            .get(url)
            .bearer_auth(&self.credential)
            .timeout(timeout)
            .send()?
            .error_for_status()?
            .bytes()
    }
}

impl BundleStore for HttpStore {
    /// Lists bundles changed since `since` and pulls their contents, staying
    /// inside `deadline` overall. If the budget runs out mid-listing we
    /// return what we have and *no* new token, so the next refresh resumes
    /// from the same point.
    fn refresh_inventory(
        &mut self,
        since: Option<&str>,
        deadline: Duration,
    ) -> Result<InventoryPage, StoreError> {
        let started = Instant::now();
        let url = match since {
            Some(token) => format!("{}/restful/rhizome/newsince/{token}/bundlelist.json", self.base),
            None => format!("{}/restful/rhizome/bundlelist.json", self.base),
        };
        let listing: Listing = self
            .client
            .get(&url)
            .bearer_auth(&self.credential)
            .timeout(deadline)
            .send()
            .and_then(reqwest::blocking::Response::error_for_status)
            .and_then(|r| r.json())
            .map_err(|err| StoreError::List(err.to_string()))?;

        let mut bundles = Vec::new();
        let mut exhausted = false;
        for listed in listing.bundles {
            let remaining = deadline.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                exhausted = true;
                break;
            }
            let id: BundleId = listed
                .id
                .parse()
                .map_err(|err| StoreError::List(format!("bad bundle id: {err}")))?;
            let recipient = match &listed.recipient {
                Some(hex) => hex
                    .parse::<RecipientPrefix>()
                    .map_err(|err| StoreError::List(format!("bad recipient: {err}")))?,
                None => RecipientPrefix::default(),
            };
            let manifest = self
                .get_bytes(
                    &format!("{}/restful/rhizome/{id}/manifest", self.base),
                    remaining,
                )
                .map_err(|err| StoreError::List(err.to_string()))?;
            let body = self
                .get_bytes(&format!("{}/restful/rhizome/{id}/raw", self.base), remaining)
                .map_err(|err| StoreError::List(err.to_string()))?;
            bundles.push(Bundle {
                id,
                version: listed.version,
                recipient,
                is_journal: listed.journal,
                manifest,
                body,
            });
        }
        debug!(bundles = bundles.len(), exhausted, "inventory page fetched");
        Ok(InventoryPage {
            bundles,
            token: if exhausted { None } else { listing.token },
        })
    }

    fn prime_body_cache(&mut self, bundle: &Bundle) -> Result<Bytes, StoreError> {
        if let Some((id, version, body)) = &self.cache {
            if *id == bundle.id && *version == bundle.version {
                return Ok(body.clone());
            }
        }
        let body = self
            .get_bytes(
                &format!("{}/restful/rhizome/{}/raw", self.base, bundle.id),
                Duration::from_millis(500),
            )
            .map_err(|err| StoreError::Prefetch(err.to_string()))?;
        self.cache = Some((bundle.id, bundle.version, body.clone()));
        Ok(body)
    }

    fn commit_bundle(&mut self, manifest: &[u8], body: &[u8]) -> Result<(), StoreError> {
        let form = multipart::Form::new()
            .part("manifest", multipart::Part::bytes(manifest.to_vec()))
            .part("payload", multipart::Part::bytes(body.to_vec()));
        self.client
            .post(format!("{}/restful/rhizome/insert", self.base))
            .bearer_auth(&self.credential)
            .timeout(COMMIT_TIMEOUT)
            .multipart(form)
            .send()
            .and_then(reqwest::blocking::Response::error_for_status)
            .map(drop)
            .map_err(|err| StoreError::Commit(err.to_string()))
    }
}
