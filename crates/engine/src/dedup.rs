//! Two-tier "have we already acted on this item?" check.
//!
//! Tier one is the persisted fingerprint ledger and needs no browser work.
//! Tier two asks a [`HistoryVerifier`] to inspect the open item page. Any doubt
//! resolves to "already acted": a skipped item is cheap, a duplicate comment
//! is not.

use async_trait::async_trait;
use socialpilot_core::{ActionKind, Paths, Platform, Result};
use socialpilot_storage::ActionLedger;
use tracing::{debug, info, warn};

use crate::platform::profile;

/// Ledger key for an item: its platform id when one can be extracted,
/// otherwise the URL stripped of scheme, `www.`, query, fragment and
/// trailing slash, lower-cased.
pub fn fingerprint(platform: Platform, url: &str) -> String {
    if let Some(id) = profile(platform).item_id(url) {
        return id;
    }
    let trimmed = url.trim();
    let no_scheme = trimmed
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(trimmed);
    let no_www = no_scheme.strip_prefix("www.").unwrap_or(no_scheme);
    let end = no_www.find(|c| c == '?' || c == '#').unwrap_or(no_www.len());
    no_www[..end].trim_end_matches('/').to_lowercase()
}

/// DOM-level evidence about past actions on the currently open item.
#[async_trait]
pub trait HistoryVerifier: Send + Sync {
    /// The logged-in account's handle as shown by the page, if visible.
    async fn infer_handle(&self) -> Option<String>;
    /// Whether the item page shows that `kind` was already performed.
    async fn shows_action(&self, kind: ActionKind, handle: Option<&str>) -> Result<bool>;
}

pub struct DuplicateActionCache {
    ledger: ActionLedger,
}

impl DuplicateActionCache {
    pub fn open(paths: Paths) -> Self {
        Self {
            ledger: ActionLedger::open(paths),
        }
    }

    pub fn from_ledger(ledger: ActionLedger) -> Self {
        Self { ledger }
    }

    /// Tier one only.
    pub fn is_recorded(&self, platform: Platform, kind: ActionKind, url: &str) -> bool {
        self.ledger
            .contains(platform, kind, &fingerprint(platform, url))
    }

    /// Full check against the item page the verifier has open.
    pub async fn has_acted(
        &mut self,
        platform: Platform,
        kind: ActionKind,
        url: &str,
        handle: Option<&str>,
        verifier: &dyn HistoryVerifier,
    ) -> bool {
        if self.is_recorded(platform, kind, url) {
            return true;
        }

        let inferred;
        let handle = match handle {
            Some(h) => h,
            None => {
                inferred = verifier.infer_handle().await;
                match inferred.as_deref() {
                    Some(h) => h,
                    None => {
                        warn!(platform = %platform, kind = %kind, url = %url, "Account handle unknown, treating item as already acted on");
                        return true;
                    }
                }
            }
        };

        match verifier.shows_action(kind, Some(handle)).await {
            Ok(true) => {
                info!(platform = %platform, kind = %kind, url = %url, "Page shows earlier action, recording it");
                if let Err(e) = self.record_acted(platform, kind, url) {
                    warn!(error = %e, "Failed to persist verified action");
                }
                true
            }
            Ok(false) => false,
            Err(e) => {
                warn!(url = %url, error = %e, "History verification failed, skipping item");
                true
            }
        }
    }

    /// Remember an action. Returns `false` when it was already recorded.
    pub fn record_acted(&mut self, platform: Platform, kind: ActionKind, url: &str) -> Result<bool> {
        let fp = fingerprint(platform, url);
        debug!(platform = %platform, kind = %kind, fingerprint = %fp, "Recording action");
        self.ledger.record(platform, kind, &fp)
    }

    pub fn ledger(&self) -> &ActionLedger {
        &self.ledger
    }
}
