//! Persisted fingerprint sets backing the duplicate-action cache.
//!
//! Each `(platform, action kind)` pair owns one JSON array of fingerprints on
//! disk. The set semantics are what give the at-most-one-action guarantee: a
//! fingerprint is either present or not, never present twice.

use chrono::{DateTime, Utc};
use socialpilot_core::{ActionKind, Paths, Platform, Result};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

use crate::write_json_atomic;

#[derive(Debug, Clone, PartialEq)]
pub struct ActionRecord {
    pub fingerprint: String,
    pub platform: Platform,
    pub kind: ActionKind,
    /// `None` for records loaded from disk; the file keeps fingerprints only.
    pub recorded_at: Option<DateTime<Utc>>,
}

pub struct ActionLedger {
    paths: Paths,
    sets: HashMap<(Platform, ActionKind), BTreeMap<String, ActionRecord>>,
}

impl ActionLedger {
    /// Read every ledger file under the actions directory.
    pub fn open(paths: Paths) -> Self {
        let mut ledger = Self {
            paths,
            sets: HashMap::new(),
        };
        for platform in Platform::ALL {
            for kind in [ActionKind::Comment, ActionKind::Like, ActionKind::Follow] {
                let set = ledger.read_file(platform, kind);
                if !set.is_empty() {
                    debug!(platform = %platform, kind = %kind, count = set.len(), "Loaded action ledger");
                }
                ledger.sets.insert((platform, kind), set);
            }
        }
        ledger
    }

    fn read_file(&self, platform: Platform, kind: ActionKind) -> BTreeMap<String, ActionRecord> {
        let path = self.paths.action_ledger_file(platform, kind);
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(_) => return BTreeMap::new(),
        };
        let fingerprints: Vec<String> = match serde_json::from_str(&content) {
            Ok(f) => f,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Unreadable action ledger, starting empty");
                return BTreeMap::new();
            }
        };
        fingerprints
            .into_iter()
            .map(|fp| normalize_key(&fp))
            .filter(|fp| !fp.is_empty())
            .map(|fp| {
                let record = ActionRecord {
                    fingerprint: fp.clone(),
                    platform,
                    kind,
                    recorded_at: None,
                };
                (fp, record)
            })
            .collect()
    }

    pub fn contains(&self, platform: Platform, kind: ActionKind, fingerprint: &str) -> bool {
        self.sets
            .get(&(platform, kind))
            .map(|set| set.contains_key(&normalize_key(fingerprint)))
            .unwrap_or(false)
    }

    /// Insert a fingerprint and persist the set. Returns `false` when the
    /// fingerprint was already present, in which case nothing is written.
    pub fn record(&mut self, platform: Platform, kind: ActionKind, fingerprint: &str) -> Result<bool> {
        let key = normalize_key(fingerprint);
        if key.is_empty() {
            return Ok(false);
        }
        let set = self.sets.entry((platform, kind)).or_default();
        if set.contains_key(&key) {
            return Ok(false);
        }
        set.insert(
            key.clone(),
            ActionRecord {
                fingerprint: key.clone(),
                platform,
                kind,
                recorded_at: Some(Utc::now()),
            },
        );
        let fingerprints: Vec<&String> = set.keys().collect();
        write_json_atomic(&self.paths.action_ledger_file(platform, kind), &fingerprints)?;
        debug!(platform = %platform, kind = %kind, fingerprint = %key, "Action recorded");
        Ok(true)
    }

    pub fn records(&self, platform: Platform, kind: ActionKind) -> Vec<&ActionRecord> {
        self.sets
            .get(&(platform, kind))
            .map(|set| set.values().collect())
            .unwrap_or_default()
    }

    pub fn len(&self, platform: Platform, kind: ActionKind) -> usize {
        self.sets.get(&(platform, kind)).map(|s| s.len()).unwrap_or(0)
    }
}

fn normalize_key(fingerprint: &str) -> String {
    fingerprint.trim().to_lowercase()
}
