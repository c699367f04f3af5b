//! Persisted per-account authentication state.
//!
//! One JSON document per `(platform, session name)` holding the cookie jar and
//! the page-scoped storage maps captured after login. Loading never fails: a
//! missing or unreadable document simply means "no session".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use socialpilot_core::{Cookie, Paths, Platform, Result, StorageSnapshot};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::write_json_atomic;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistant_id: Option<String>,
    /// Account handle the session belongs to, used for authorship checks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
    pub saved_at: DateTime<Utc>,
}

impl SessionMetadata {
    pub fn new(handle: Option<String>, assistant_id: Option<String>) -> Self {
        Self {
            assistant_id,
            handle,
            saved_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSession {
    pub platform: Platform,
    pub session_name: String,
    #[serde(default)]
    pub cookies: Vec<Cookie>,
    /// Origin the storage maps were captured from.
    #[serde(default)]
    pub storage_origin: String,
    #[serde(default)]
    pub local_storage: HashMap<String, String>,
    #[serde(default)]
    pub session_storage: HashMap<String, String>,
    pub metadata: SessionMetadata,
}

impl AccountSession {
    pub fn storage(&self) -> StorageSnapshot {
        StorageSnapshot {
            origin: self.storage_origin.clone(),
            local_storage: self.local_storage.clone(),
            session_storage: self.session_storage.clone(),
        }
    }
}

#[derive(Clone)]
pub struct SessionStore {
    paths: Paths,
}

impl SessionStore {
    pub fn new(paths: Paths) -> Self {
        Self { paths }
    }

    pub fn save(
        &self,
        platform: Platform,
        session_name: &str,
        cookies: Vec<Cookie>,
        storage: StorageSnapshot,
        mut metadata: SessionMetadata,
    ) -> Result<AccountSession> {
        metadata.saved_at = Utc::now();
        let session = AccountSession {
            platform,
            session_name: session_name.to_string(),
            cookies,
            storage_origin: storage.origin,
            local_storage: storage.local_storage,
            session_storage: storage.session_storage,
            metadata,
        };
        let path = self.paths.session_file(platform, session_name);
        write_json_atomic(&path, &session)?;
        info!(
            platform = %platform,
            session = session_name,
            cookies = session.cookies.len(),
            local_keys = session.local_storage.len(),
            "Session saved"
        );
        Ok(session)
    }

    pub fn load(&self, platform: Platform, session_name: &str) -> Option<AccountSession> {
        let path = self.paths.session_file(platform, session_name);
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "No persisted session");
                return None;
            }
        };
        match serde_json::from_str::<AccountSession>(&content) {
            Ok(session) => Some(session),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Corrupt session file, ignoring");
                None
            }
        }
    }

    pub fn exists(&self, platform: Platform, session_name: &str) -> bool {
        self.load(platform, session_name).is_some()
    }

    /// Returns whether a file was actually removed.
    pub fn delete(&self, platform: Platform, session_name: &str) -> Result<bool> {
        let path = self.paths.session_file(platform, session_name);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                info!(platform = %platform, session = session_name, "Session deleted");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Session names persisted for a platform.
    pub fn list(&self, platform: Platform) -> Vec<String> {
        let prefix = format!("{}-", platform.as_str());
        let entries = match std::fs::read_dir(self.paths.sessions_dir()) {
            Ok(e) => e,
            Err(_) => return Vec::new(),
        };
        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().into_string().ok())
            .filter_map(|name| {
                name.strip_prefix(&prefix)
                    .and_then(|rest| rest.strip_suffix(".json"))
                    .map(str::to_string)
            })
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, SessionStore) {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(Paths::with_base(dir.path().to_path_buf()));
        (dir, store)
    }

    fn cookie(name: &str, value: &str) -> Cookie {
        Cookie {
            name: name.to_string(),
            value: value.to_string(),
            domain: ".instagram.com".to_string(),
            path: "/".to_string(),
            expires: Some(1_900_000_000.0),
            http_only: true,
            secure: true,
            same_site: Some("Lax".to_string()),
        }
    }

    #[test]
    fn test_round_trip_preserves_cookies_and_storage() {
        let (_dir, store) = store();
        let mut snapshot = StorageSnapshot {
            origin: "https://www.instagram.com".to_string(),
            ..Default::default()
        };
        snapshot.local_storage.insert("ig_theme".into(), "dark".into());
        snapshot.session_storage.insert("tab".into(), "feed".into());
        let cookies = vec![cookie("sessionid", "abc"), cookie("csrftoken", "xyz")];

        let saved = store
            .save(
                Platform::Instagram,
                "main",
                cookies.clone(),
                snapshot.clone(),
                SessionMetadata::new(Some("rustacean".into()), Some("asst_9".into())),
            )
            .unwrap();

        let loaded = store.load(Platform::Instagram, "main").unwrap();
        assert_eq!(loaded, saved);
        assert_eq!(loaded.cookies, cookies);
        assert_eq!(loaded.storage(), snapshot);
        assert_eq!(loaded.metadata.assistant_id.as_deref(), Some("asst_9"));
    }

    #[test]
    fn test_load_is_repeatable() {
        let (_dir, store) = store();
        store
            .save(
                Platform::X,
                "default",
                vec![cookie("auth_token", "t")],
                StorageSnapshot::default(),
                SessionMetadata::new(None, None),
            )
            .unwrap();
        let first = store.load(Platform::X, "default").unwrap();
        let second = store.load(Platform::X, "default").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_missing_and_corrupt_yield_none() {
        let (dir, store) = store();
        assert!(store.load(Platform::Tiktok, "nobody").is_none());

        let path = Paths::with_base(dir.path().to_path_buf()).session_file(Platform::Tiktok, "broken");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{\"platform\": \"tiktok\", \"cookies\": [").unwrap();
        assert!(store.load(Platform::Tiktok, "broken").is_none());
    }

    #[test]
    fn test_delete_purges_file() {
        let (_dir, store) = store();
        store
            .save(
                Platform::Tiktok,
                "a",
                vec![],
                StorageSnapshot::default(),
                SessionMetadata::new(None, None),
            )
            .unwrap();
        assert!(store.exists(Platform::Tiktok, "a"));
        assert!(store.delete(Platform::Tiktok, "a").unwrap());
        assert!(!store.exists(Platform::Tiktok, "a"));
        assert!(!store.delete(Platform::Tiktok, "a").unwrap());
    }

    #[test]
    fn test_list_filters_by_platform() {
        let (_dir, store) = store();
        for (platform, name) in [
            (Platform::Instagram, "b"),
            (Platform::Instagram, "a"),
            (Platform::X, "c"),
        ] {
            store
                .save(platform, name, vec![], StorageSnapshot::default(), SessionMetadata::new(None, None))
                .unwrap();
        }
        assert_eq!(store.list(Platform::Instagram), vec!["a", "b"]);
        assert_eq!(store.list(Platform::X), vec!["c"]);
    }

    #[test]
    fn test_save_leaves_no_temp_file() {
        let (dir, store) = store();
        store
            .save(Platform::X, "t", vec![], StorageSnapshot::default(), SessionMetadata::new(None, None))
            .unwrap();
        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("sessions"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
