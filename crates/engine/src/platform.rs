//! Per-platform URLs, item URL patterns and selector tables.
//!
//! Every table is an ordered fallback list: the interaction layer tries the
//! entries in order, so the most specific selector goes first.

use once_cell::sync::Lazy;
use regex::Regex;
use socialpilot_browser::Locator;
use socialpilot_core::{Platform, SearchCriteria};

/// A static selector entry, turned into a [`Locator`] on use.
#[derive(Debug, Clone, Copy)]
pub enum Sel {
    Css(&'static str),
    XPath(&'static str),
    Text(&'static str),
}

impl Sel {
    pub fn locator(&self) -> Locator {
        match *self {
            Sel::Css(q) => Locator::css(q),
            Sel::XPath(q) => Locator::xpath(q),
            Sel::Text(q) => Locator::text(q),
        }
    }
}

pub fn locators(table: &[Sel]) -> Vec<Locator> {
    table.iter().map(Sel::locator).collect()
}

pub struct PlatformProfile {
    pub platform: Platform,
    pub home_url: &'static str,
    pub login_url: &'static str,
    item_re: &'static Lazy<Regex>,

    pub caption: &'static [Sel],
    /// Empty for video-native platforms, where every item is a video.
    pub video: &'static [Sel],
    pub like_button: &'static [Sel],
    /// Present only once the item is liked by the current account.
    pub liked_marker: &'static [Sel],
    pub comment_field: &'static [Sel],
    pub comment_submit: &'static [Sel],
    pub follow_button: &'static [Sel],
    pub following_marker: &'static [Sel],
    pub reply_authors: &'static [Sel],
    /// Shows the logged-in account's handle, for handle inference.
    pub own_handle: &'static [Sel],

    pub logged_in: &'static [Sel],
    pub login_username: &'static [Sel],
    pub login_password: &'static [Sel],
    /// Intermediate step between username and password, for split flows.
    pub login_next: &'static [Sel],
    pub login_submit: &'static [Sel],
    pub login_error_texts: &'static [&'static str],
    pub banner_texts: &'static [&'static str],
}

static INSTAGRAM_ITEM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^https?://(?:www\.)?instagram\.com/(?:[A-Za-z0-9._]+/)?(p|reel)/([A-Za-z0-9_-]+)")
        .expect("valid regex")
});

static TIKTOK_ITEM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^https?://(?:www\.|m\.)?tiktok\.com/@([A-Za-z0-9._-]+)/(video|photo)/(\d+)")
        .expect("valid regex")
});

static X_ITEM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^https?://(?:www\.|mobile\.)?(?:x|twitter)\.com/([A-Za-z0-9_]+)/status/(\d+)")
        .expect("valid regex")
});

static INSTAGRAM: PlatformProfile = PlatformProfile {
    platform: Platform::Instagram,
    home_url: "https://www.instagram.com/",
    login_url: "https://www.instagram.com/accounts/login/",
    item_re: &INSTAGRAM_ITEM,
    caption: &[
        Sel::Css("article h1"),
        Sel::Css("article div._a9zs span"),
        Sel::XPath("//article//ul//li[1]//h1"),
        Sel::Css("article span[dir='auto']"),
    ],
    video: &[Sel::Css("article video"), Sel::Css("main video")],
    like_button: &[
        Sel::XPath("//section//*[local-name()='svg' and @aria-label='Like']/ancestor::*[@role='button' or self::button][1]"),
        Sel::Css("section span svg[aria-label='Like']"),
    ],
    liked_marker: &[Sel::Css("section svg[aria-label='Unlike']")],
    comment_field: &[
        Sel::Css("form textarea[aria-label='Add a comment…']"),
        Sel::Css("form textarea"),
        Sel::Text("Add a comment…"),
    ],
    comment_submit: &[Sel::Css("form div[role='button'][tabindex='0']"), Sel::Text("Post")],
    follow_button: &[Sel::XPath("//header//button[.//div[text()='Follow']]"), Sel::Text("Follow")],
    following_marker: &[Sel::XPath("//header//button[.//div[text()='Following']]"), Sel::Text("Following")],
    reply_authors: &[
        Sel::Css("article ul li h3 a"),
        Sel::Css("article ul a[role='link'] span[dir='auto']"),
    ],
    own_handle: &[],
    logged_in: &[
        Sel::Css("svg[aria-label='Home']"),
        Sel::Css("a[href='/direct/inbox/']"),
        Sel::Css("svg[aria-label='New post']"),
    ],
    login_username: &[Sel::Css("input[name='username']")],
    login_password: &[Sel::Css("input[name='password']")],
    login_next: &[],
    login_submit: &[Sel::Css("form button[type='submit']"), Sel::Text("Log in")],
    login_error_texts: &[
        "your password was incorrect",
        "please wait a few minutes",
        "the username you entered doesn't belong to an account",
    ],
    banner_texts: &["Allow all cookies", "Only allow essential cookies", "Not now"],
};

static TIKTOK: PlatformProfile = PlatformProfile {
    platform: Platform::Tiktok,
    home_url: "https://www.tiktok.com/",
    login_url: "https://www.tiktok.com/login/phone-or-email/email",
    item_re: &TIKTOK_ITEM,
    caption: &[
        Sel::Css("[data-e2e='browse-video-desc']"),
        Sel::Css("[data-e2e='video-desc']"),
        Sel::Css("h1[data-e2e='browse-video-desc']"),
    ],
    video: &[],
    like_button: &[
        Sel::Css("button [data-e2e='browse-like-icon']"),
        Sel::Css("[data-e2e='like-icon']"),
    ],
    liked_marker: &[
        Sel::Css("button[aria-pressed='true'] [data-e2e='browse-like-icon']"),
        Sel::Css("button[aria-pressed='true'] [data-e2e='like-icon']"),
    ],
    comment_field: &[
        Sel::Css("[data-e2e='comment-input'] div[contenteditable='true']"),
        Sel::Css("div[contenteditable='true']"),
        Sel::Text("Add comment..."),
    ],
    comment_submit: &[Sel::Css("[data-e2e='comment-post']"), Sel::Text("Post")],
    follow_button: &[Sel::Css("[data-e2e='browse-follow']"), Sel::Css("[data-e2e='follow-button']"), Sel::Text("Follow")],
    following_marker: &[Sel::Text("Following"), Sel::Text("Friends")],
    reply_authors: &[
        Sel::Css("[data-e2e='comment-username-1']"),
        Sel::Css("[data-e2e='comment-username-1'] p"),
    ],
    own_handle: &[],
    logged_in: &[
        Sel::Css("[data-e2e='profile-icon']"),
        Sel::Css("[data-e2e='upload-icon']"),
        Sel::Css("a[href*='/upload']"),
    ],
    login_username: &[
        Sel::Css("input[name='username']"),
        Sel::Css("input[placeholder*='Email']"),
    ],
    login_password: &[Sel::Css("input[type='password']")],
    login_next: &[],
    login_submit: &[
        Sel::Css("button[data-e2e='login-button']"),
        Sel::Css("button[type='submit']"),
        Sel::Text("Log in"),
    ],
    login_error_texts: &[
        "incorrect account or password",
        "maximum number of attempts reached",
        "too many attempts",
    ],
    banner_texts: &["Accept all", "Decline optional cookies"],
};

static X: PlatformProfile = PlatformProfile {
    platform: Platform::X,
    home_url: "https://x.com/home",
    login_url: "https://x.com/i/flow/login",
    item_re: &X_ITEM,
    caption: &[
        Sel::Css("article [data-testid='tweetText']"),
        Sel::Css("[data-testid='tweetText']"),
    ],
    video: &[
        Sel::Css("article [data-testid='videoPlayer']"),
        Sel::Css("article video"),
    ],
    like_button: &[Sel::Css("article [data-testid='like']")],
    liked_marker: &[Sel::Css("article [data-testid='unlike']")],
    comment_field: &[
        Sel::Css("[data-testid='tweetTextarea_0']"),
        Sel::Css("div[role='textbox'][contenteditable='true']"),
    ],
    comment_submit: &[
        Sel::Css("[data-testid='tweetButtonInline']"),
        Sel::Css("[data-testid='tweetButton']"),
        Sel::Text("Reply"),
    ],
    follow_button: &[Sel::Css("[data-testid$='-follow']"), Sel::Text("Follow")],
    following_marker: &[Sel::Css("[data-testid$='-unfollow']"), Sel::Text("Following")],
    reply_authors: &[
        Sel::Css("article [data-testid='User-Name'] a[href^='/'] div[dir='ltr'] span"),
        Sel::Css("[data-testid='User-Name'] div[dir='ltr'] span"),
    ],
    own_handle: &[Sel::Css("[data-testid='SideNav_AccountSwitcher_Button'] div[dir='ltr'] span")],
    logged_in: &[
        Sel::Css("[data-testid='SideNav_AccountSwitcher_Button']"),
        Sel::Css("[data-testid='AppTabBar_Home_Link']"),
        Sel::Css("a[data-testid='SideNav_NewTweet_Button']"),
    ],
    login_username: &[
        Sel::Css("input[autocomplete='username']"),
        Sel::Css("input[name='text']"),
    ],
    login_password: &[
        Sel::Css("input[name='password']"),
        Sel::Css("input[type='password']"),
    ],
    login_next: &[Sel::Text("Next")],
    login_submit: &[Sel::Css("[data-testid='LoginForm_Login_Button']"), Sel::Text("Log in")],
    login_error_texts: &[
        "wrong password",
        "could not find your account",
        "something went wrong",
    ],
    banner_texts: &["Accept all cookies", "Refuse non-essential cookies"],
};

pub fn profile(platform: Platform) -> &'static PlatformProfile {
    match platform {
        Platform::Instagram => &INSTAGRAM,
        Platform::Tiktok => &TIKTOK,
        Platform::X => &X,
    }
}

impl PlatformProfile {
    /// Search view for a hashtag or keyword query.
    pub fn search_url(&self, criteria: &SearchCriteria) -> Option<String> {
        if let Some(tag) = criteria.tag() {
            let tag = urlencoding::encode(tag);
            return Some(match self.platform {
                Platform::Instagram => format!("https://www.instagram.com/explore/tags/{}/", tag),
                Platform::Tiktok => format!("https://www.tiktok.com/tag/{}", tag),
                Platform::X => format!("https://x.com/search?q=%23{}&src=typed_query&f=live", tag),
            });
        }
        let query = criteria.query()?;
        let query = urlencoding::encode(query);
        Some(match self.platform {
            Platform::Instagram => format!(
                "https://www.instagram.com/explore/search/keyword/?q={}",
                query
            ),
            Platform::Tiktok => format!("https://www.tiktok.com/search/video?q={}", query),
            Platform::X => format!("https://x.com/search?q={}&src=typed_query&f=live", query),
        })
    }

    /// Canonical item URL for an href, or `None` when it is not an item link.
    /// Relative hrefs are resolved against the platform's home URL.
    pub fn canonical_item_url(&self, href: &str) -> Option<String> {
        let absolute = url::Url::parse(self.home_url).ok()?.join(href.trim()).ok()?;
        let caps = self.item_re.captures(absolute.as_str())?;
        Some(match self.platform {
            Platform::Instagram => format!("https://www.instagram.com/{}/{}/", &caps[1], &caps[2]),
            Platform::Tiktok => format!("https://www.tiktok.com/@{}/{}/{}", &caps[1], &caps[2], &caps[3]),
            Platform::X => format!("https://x.com/{}/status/{}", &caps[1], &caps[2]),
        })
    }

    /// Stable item identifier: Instagram shortcode, TikTok or X numeric id.
    pub fn item_id(&self, url: &str) -> Option<String> {
        let canonical = self.canonical_item_url(url)?;
        let caps = self.item_re.captures(&canonical)?;
        let id = match self.platform {
            Platform::Instagram => &caps[2],
            Platform::Tiktok => &caps[3],
            Platform::X => &caps[2],
        };
        Some(id.to_lowercase())
    }

    pub fn is_login_url(&self, url: &str) -> bool {
        let path = url::Url::parse(url).map(|u| u.path().to_string()).unwrap_or_default();
        path.contains("/login") || path.contains("/flow/login") || path.contains("/accounts/login")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instagram_item_urls() {
        let p = profile(Platform::Instagram);
        assert_eq!(
            p.canonical_item_url("/p/AbC123/?utm_source=ig").as_deref(),
            Some("https://www.instagram.com/p/AbC123/")
        );
        assert_eq!(
            p.canonical_item_url("https://instagram.com/someone/reel/Xy_9-z#c").as_deref(),
            Some("https://www.instagram.com/reel/Xy_9-z/")
        );
        assert!(p.canonical_item_url("/explore/tags/rust/").is_none());
        assert_eq!(p.item_id("https://www.instagram.com/p/ABC123/").as_deref(), Some("abc123"));
    }

    #[test]
    fn test_tiktok_item_urls() {
        let p = profile(Platform::Tiktok);
        assert_eq!(
            p.canonical_item_url("https://www.tiktok.com/@dev.user/video/7301234567890?is_from_webapp=1").as_deref(),
            Some("https://www.tiktok.com/@dev.user/video/7301234567890")
        );
        assert_eq!(p.item_id("https://m.tiktok.com/@a/video/42").as_deref(), Some("42"));
        assert!(p.canonical_item_url("https://www.tiktok.com/@dev.user").is_none());
    }

    #[test]
    fn test_x_item_urls() {
        let p = profile(Platform::X);
        assert_eq!(
            p.canonical_item_url("https://twitter.com/rustlang/status/1234567890/photo/1").as_deref(),
            Some("https://x.com/rustlang/status/1234567890")
        );
        assert_eq!(p.item_id("/someone/status/99?s=20").as_deref(), Some("99"));
        assert!(p.canonical_item_url("/search?q=rust").is_none());
    }

    #[test]
    fn test_search_urls() {
        let ig = profile(Platform::Instagram);
        assert_eq!(
            ig.search_url(&SearchCriteria::hashtag("#rustlang")).as_deref(),
            Some("https://www.instagram.com/explore/tags/rustlang/")
        );
        let x = profile(Platform::X);
        assert_eq!(
            x.search_url(&SearchCriteria::keywords("async rust")).as_deref(),
            Some("https://x.com/search?q=async%20rust&src=typed_query&f=live")
        );
        assert!(x.search_url(&SearchCriteria::default()).is_none());
    }

    #[test]
    fn test_login_url_detection() {
        let x = profile(Platform::X);
        assert!(x.is_login_url("https://x.com/i/flow/login"));
        assert!(!x.is_login_url("https://x.com/home"));
    }
}
