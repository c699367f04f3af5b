pub mod ledger;
pub mod session;

pub use ledger::{ActionLedger, ActionRecord};
pub use session::{AccountSession, SessionMetadata, SessionStore};

use serde::Serialize;
use socialpilot_core::Result;
use std::path::Path;

/// Serialize to `<path>.tmp` and rename over `path`, so readers never observe
/// a half-written document.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(value)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp);
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
