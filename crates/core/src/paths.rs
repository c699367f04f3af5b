use std::path::PathBuf;

use crate::types::{ActionKind, Platform};

#[derive(Debug, Clone)]
pub struct Paths {
    pub base: PathBuf,
}

impl Paths {
    pub fn new() -> Self {
        if let Ok(home) = std::env::var("SOCIALPILOT_HOME") {
            if !home.trim().is_empty() {
                return Self { base: PathBuf::from(home) };
            }
        }
        let base = dirs::home_dir()
            .map(|h| h.join(".socialpilot"))
            .unwrap_or_else(|| PathBuf::from(".socialpilot"));
        Self { base }
    }

    pub fn with_base(base: PathBuf) -> Self {
        Self { base }
    }

    pub fn config_file(&self) -> PathBuf {
        self.base.join("config.json")
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.base.join("sessions")
    }

    /// `{platform}-{session}.json`; path separators and whitespace in the
    /// session name are flattened so the key always names a single file.
    pub fn session_file(&self, platform: Platform, session_name: &str) -> PathBuf {
        let safe_name: String = session_name
            .chars()
            .map(|c| match c {
                ':' | '/' | '\\' => '_',
                c if c.is_whitespace() => '_',
                c => c,
            })
            .collect();
        self.sessions_dir()
            .join(format!("{}-{}.json", platform.as_str(), safe_name))
    }

    pub fn actions_dir(&self) -> PathBuf {
        self.base.join("actions")
    }

    pub fn action_ledger_file(&self, platform: Platform, kind: ActionKind) -> PathBuf {
        let name = match kind {
            ActionKind::Comment => format!("{}.json", platform.as_str()),
            other => format!("{}-{}.json", platform.as_str(), other.as_str()),
        };
        self.actions_dir().join(name)
    }

    /// Scratch profile directory handed to the browser process.
    pub fn browser_profile_dir(&self) -> PathBuf {
        self.base.join("browser").join("profile")
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_file_sanitizes_name() {
        let paths = Paths::with_base(PathBuf::from("/tmp/sp"));
        let file = paths.session_file(Platform::Instagram, "team a/main");
        assert_eq!(
            file,
            PathBuf::from("/tmp/sp/sessions/instagram-team_a_main.json")
        );
    }

    #[test]
    fn test_ledger_file_names() {
        let paths = Paths::with_base(PathBuf::from("/tmp/sp"));
        assert_eq!(
            paths.action_ledger_file(Platform::Tiktok, ActionKind::Comment),
            PathBuf::from("/tmp/sp/actions/tiktok.json")
        );
        assert_eq!(
            paths.action_ledger_file(Platform::X, ActionKind::Like),
            PathBuf::from("/tmp/sp/actions/x-like.json")
        );
    }
}
