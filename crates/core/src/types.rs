use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::{Error, Result};

/// Social platforms the engine knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Instagram,
    Tiktok,
    X,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::Instagram, Platform::Tiktok, Platform::X];

    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "instagram" | "ig" => Ok(Self::Instagram),
            "tiktok" | "tt" => Ok(Self::Tiktok),
            "x" | "twitter" => Ok(Self::X),
            other => Err(Error::Validation(format!("unknown platform '{}'", other))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Instagram => "instagram",
            Self::Tiktok => "tiktok",
            Self::X => "x",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Write actions the engine may perform on an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Comment,
    Like,
    Follow,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Comment => "comment",
            Self::Like => "like",
            Self::Follow => "follow",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A browser cookie in the shape CDP's `Network.getCookies` returns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default = "default_cookie_path")]
    pub path: String,
    /// Seconds since the epoch; negative or absent means a session cookie.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<f64>,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
}

fn default_cookie_path() -> String {
    "/".to_string()
}

/// Page-scoped key/value stores captured from one origin.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageSnapshot {
    #[serde(default)]
    pub origin: String,
    #[serde(default)]
    pub local_storage: HashMap<String, String>,
    #[serde(default)]
    pub session_storage: HashMap<String, String>,
}

impl StorageSnapshot {
    pub fn is_empty(&self) -> bool {
        self.local_storage.is_empty() && self.session_storage.is_empty()
    }
}

/// A discovered post eligible for filtering and action.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CandidateItem {
    pub url: String,
    pub platform: Platform,
}

impl CandidateItem {
    pub fn new(platform: Platform, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            platform,
        }
    }
}

/// Why a candidate was passed over without a write action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    AlreadyActed,
    TooShort,
    ContainsVideo,
    NoContent,
    GenerationUnavailable,
}

impl SkipReason {
    pub fn describe(&self) -> &'static str {
        match self {
            Self::AlreadyActed => "already acted on this item",
            Self::TooShort => "post text below minimum word count",
            Self::ContainsVideo => "post contains video",
            Self::NoContent => "no post text could be extracted",
            Self::GenerationUnavailable => "comment generator returned nothing",
        }
    }
}

/// Per-candidate result record returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutcome {
    pub item_url: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liked: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub followed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped_reason: Option<SkipReason>,
}

impl RunOutcome {
    pub fn succeeded(item_url: impl Into<String>) -> Self {
        Self {
            item_url: item_url.into(),
            success: true,
            comment: None,
            liked: None,
            followed: None,
            error: None,
            skipped_reason: None,
        }
    }

    pub fn failed(item_url: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::succeeded(item_url)
        }
    }

    pub fn skipped(item_url: impl Into<String>, reason: SkipReason) -> Self {
        Self {
            success: false,
            skipped_reason: Some(reason),
            ..Self::succeeded(item_url)
        }
    }

    pub fn is_skip(&self) -> bool {
        self.skipped_reason.is_some()
    }
}

/// Hashtag or keyword query that seeds discovery.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchCriteria {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hashtag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keywords: Option<String>,
}

impl SearchCriteria {
    pub fn hashtag(tag: impl Into<String>) -> Self {
        Self {
            hashtag: Some(tag.into()),
            keywords: None,
        }
    }

    pub fn keywords(words: impl Into<String>) -> Self {
        Self {
            hashtag: None,
            keywords: Some(words.into()),
        }
    }

    /// The hashtag without a leading `#`, if one was given and is non-empty.
    pub fn tag(&self) -> Option<&str> {
        self.hashtag
            .as_deref()
            .map(|t| t.trim().trim_start_matches('#'))
            .filter(|t| !t.is_empty())
    }

    pub fn query(&self) -> Option<&str> {
        self.keywords
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.tag().is_none() && self.query().is_none()
    }
}

/// Actions accepted by the single engine entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Command {
    Login,
    AutoComment,
    CheckSession,
    Logout,
    Discover,
    Like,
    Comment,
    Follow,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::AutoComment => "auto-comment",
            Self::CheckSession => "check-session",
            Self::Logout => "logout",
            Self::Discover => "discover",
            Self::Like => "like",
            Self::Comment => "comment",
            Self::Follow => "follow",
        }
    }
}

fn default_session_name() -> String {
    "default".to_string()
}

fn default_max_posts() -> usize {
    5
}

/// One invocation of the engine, as forwarded by a front end.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationRequest {
    pub platform: Platform,
    pub action: Command,
    #[serde(default)]
    pub search_criteria: SearchCriteria,
    #[serde(default = "default_max_posts")]
    pub max_posts: usize,
    #[serde(default, rename = "useAI", alias = "useAi")]
    pub use_ai: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default = "default_session_name")]
    pub session_name: String,
    #[serde(default)]
    pub headful: bool,
    /// Act on this one item instead of discovering candidates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_url: Option<String>,
}

impl InvocationRequest {
    pub fn new(platform: Platform, action: Command) -> Self {
        Self {
            platform,
            action,
            search_criteria: SearchCriteria::default(),
            max_posts: default_max_posts(),
            use_ai: false,
            comment: None,
            username: None,
            password: None,
            session_name: default_session_name(),
            headful: false,
            target_url: None,
        }
    }
}

/// `{ ok, message, results }` as returned to the front end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationResult {
    pub ok: bool,
    pub message: String,
    #[serde(default)]
    pub results: Vec<RunOutcome>,
}

impl InvocationResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
            results: Vec::new(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
            results: Vec::new(),
        }
    }

    /// Builds the `"N/M succeeded"` summary from an outcome list.
    pub fn from_outcomes(target: usize, results: Vec<RunOutcome>, note: Option<&str>) -> Self {
        let succeeded = results.iter().filter(|o| o.success).count();
        let skipped = results.iter().filter(|o| o.is_skip()).count();
        let mut message = format!("{}/{} succeeded", succeeded, target);
        if skipped > 0 {
            message.push_str(&format!(", {} skipped", skipped));
        }
        if let Some(note) = note {
            message.push_str(&format!(" ({})", note));
        }
        Self {
            ok: succeeded > 0 || target == 0,
            message,
            results,
        }
    }
}
