//! Login, session restore and logged-in checks.
//!
//! A login is judged by two indicator sets polled until a deadline: positive
//! (logged-in navigation chrome, or having left the login path once the form
//! is gone) and negative (the form still showing together with a known error
//! text after the grace period).

use socialpilot_browser::{hydrate_page, Interaction, Locator, PageControl};
use socialpilot_core::config::AuthConfig;
use socialpilot_core::{Error, Platform, Result};
use socialpilot_storage::AccountSession;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::platform::{locators, profile, PlatformProfile};

pub struct Authenticator {
    page: Arc<dyn PageControl>,
    profile: &'static PlatformProfile,
    config: AuthConfig,
    interaction: Interaction,
}

impl Authenticator {
    pub fn new(page: Arc<dyn PageControl>, platform: Platform, config: AuthConfig) -> Self {
        Self {
            page,
            profile: profile(platform),
            config,
            interaction: Interaction::new(),
        }
    }

    pub fn with_interaction(mut self, interaction: Interaction) -> Self {
        self.interaction = interaction;
        self
    }

    fn poll(&self) -> Duration {
        Duration::from_millis(self.config.poll_interval_ms)
    }

    async fn dismiss_banners(&self) {
        self.interaction
            .click_by_visible_text(self.page.as_ref(), self.profile.banner_texts)
            .await;
    }

    /// Whether the page currently shows logged-in UI.
    pub async fn is_logged_in(&self) -> bool {
        self.interaction
            .exists_any(self.page.as_ref(), &locators(self.profile.logged_in))
            .await
    }

    async fn visible_error(&self) -> Option<&'static str> {
        for &text in self.profile.login_error_texts {
            if self
                .interaction
                .exists_any(self.page.as_ref(), &[Locator::text(text)])
                .await
            {
                return Some(text);
            }
        }
        None
    }

    /// Drive the platform's login form. The caller captures the session.
    pub async fn login(&self, username: &str, password: &str) -> Result<()> {
        if username.trim().is_empty() || password.is_empty() {
            return Err(Error::Credentials("username and password are required".into()));
        }
        let platform = self.profile.platform;
        let page = self.page.as_ref();
        let timeout = Duration::from_secs(self.config.login_timeout_secs);

        info!(platform = %platform, user = %username, "Logging in");
        page.navigate(self.profile.login_url).await?;
        self.dismiss_banners().await;

        let mut form = locators(self.profile.login_username);
        form.extend(locators(self.profile.logged_in));
        match self.interaction.wait_for_any(page, &form, timeout, self.poll()).await {
            None => return Err(Error::Auth(format!("{} login form not found", platform))),
            Some(found) if !locators(self.profile.login_username).contains(&found) => {
                info!(platform = %platform, "Already logged in");
                return Ok(());
            }
            Some(_) => {}
        }

        if !self
            .interaction
            .fill(page, &locators(self.profile.login_username), username)
            .await
        {
            return Err(Error::Auth(format!("{} username field not usable", platform)));
        }

        let password_fields = locators(self.profile.login_password);
        if !self.interaction.exists_any(page, &password_fields).await && !self.profile.login_next.is_empty() {
            debug!("Split login flow, advancing to password step");
            if !self
                .interaction
                .click_matching(page, &locators(self.profile.login_next))
                .await
            {
                page.press_key("Enter").await?;
            }
            if self
                .interaction
                .wait_for_any(page, &password_fields, timeout, self.poll())
                .await
                .is_none()
            {
                return Err(Error::Auth(format!("{} password step did not appear", platform)));
            }
        }
        if !self.interaction.fill(page, &password_fields, password).await {
            return Err(Error::Auth(format!("{} password field not found", platform)));
        }

        if !self
            .interaction
            .click_matching(page, &locators(self.profile.login_submit))
            .await
        {
            page.press_key("Enter").await?;
        }

        self.await_login_result(timeout).await
    }

    async fn await_login_result(&self, timeout: Duration) -> Result<()> {
        let page = self.page.as_ref();
        let grace = Duration::from_secs(self.config.login_grace_secs);
        let form = locators(self.profile.login_username)
            .into_iter()
            .chain(locators(self.profile.login_password))
            .collect::<Vec<_>>();
        let started = Instant::now();

        loop {
            if self.is_logged_in().await {
                info!(platform = %self.profile.platform, "Login confirmed");
                return Ok(());
            }
            let form_present = self.interaction.exists_any(page, &form).await;
            if started.elapsed() >= grace {
                if form_present {
                    if let Some(error) = self.visible_error().await {
                        warn!(platform = %self.profile.platform, error = error, "Login rejected");
                        return Err(Error::Auth(format!("login rejected: {}", error)));
                    }
                } else {
                    let url = page.current_url().await.unwrap_or_default();
                    if !url.is_empty() && !self.profile.is_login_url(&url) {
                        info!(platform = %self.profile.platform, url = %url, "Left login page");
                        return Ok(());
                    }
                }
            }
            if started.elapsed() >= timeout {
                return Err(Error::Auth(format!(
                    "login not confirmed within {}s",
                    timeout.as_secs()
                )));
            }
            tokio::time::sleep(self.poll()).await;
        }
    }

    /// Load a persisted session into the page and check it still works.
    /// Storage is applied a second time once the home page primed the origin.
    pub async fn restore(&self, session: &AccountSession) -> Result<bool> {
        let page = self.page.as_ref();
        let first = hydrate_page(page, session).await?;
        page.navigate(self.profile.home_url).await?;
        let second = hydrate_page(page, session).await?;
        if !first.storage_applied && second.storage_applied {
            page.reload().await?;
        }
        self.dismiss_banners().await;

        let wait = Duration::from_secs(self.config.login_grace_secs);
        let ok = self
            .interaction
            .wait_for_any(page, &locators(self.profile.logged_in), wait, self.poll())
            .await
            .is_some();
        info!(
            platform = %session.platform,
            session = %session.session_name,
            logged_in = ok,
            "Session restored"
        );
        Ok(ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use socialpilot_browser::testing::{Effect, FakeElement, FakePage};
    use socialpilot_storage::SessionMetadata;
    use std::collections::HashMap;

    fn config() -> AuthConfig {
        AuthConfig {
            login_timeout_secs: 0,
            login_grace_secs: 0,
            poll_interval_ms: 1,
        }
    }

    fn auth(page: Arc<FakePage>, platform: Platform) -> Authenticator {
        Authenticator::new(page, platform, config())
            .with_interaction(Interaction::new().with_settle(Duration::ZERO))
    }

    fn ig_home_nav() -> FakeElement {
        FakeElement::new(Locator::css("svg[aria-label='Home']"))
    }

    fn ig_login_form(submit_effect: Effect) -> Vec<FakeElement> {
        vec![
            FakeElement::new(Locator::css("input[name='username']")).as_field(),
            FakeElement::new(Locator::css("input[name='password']")).as_field(),
            FakeElement::new(Locator::css("form button[type='submit']"))
                .with_text("Log in")
                .on_click(submit_effect),
        ]
    }

    #[tokio::test]
    async fn test_login_success() {
        let page = Arc::new(FakePage::new());
        page.set_layout(
            "https://www.instagram.com/accounts/login/",
            ig_login_form(Effect::Reveal(ig_home_nav())),
        );
        auth(page.clone(), Platform::Instagram)
            .login("rustacean", "hunter2")
            .await
            .unwrap();
        assert_eq!(
            page.field_value(&Locator::css("input[name='username']")).as_deref(),
            Some("rustacean")
        );
        assert!(page.clicked(&Locator::css("form button[type='submit']")));
    }

    #[tokio::test]
    async fn test_login_requires_credentials() {
        let page = Arc::new(FakePage::new());
        let err = auth(page.clone(), Platform::Instagram)
            .login("", "pw")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Credentials(_)));
        assert!(page.navigations().is_empty());
    }

    #[tokio::test]
    async fn test_missing_login_form_is_error() {
        let page = Arc::new(FakePage::new());
        let err = auth(page, Platform::Instagram)
            .login("user", "pw")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Auth(msg) if msg.contains("login form not found")));
    }

    #[tokio::test]
    async fn test_login_rejected_with_error_text() {
        let page = Arc::new(FakePage::new());
        page.set_layout(
            "https://www.instagram.com/accounts/login/",
            ig_login_form(Effect::Reveal(
                FakeElement::new(Locator::css("#slfErrorAlert"))
                    .with_text("Sorry, your password was incorrect."),
            )),
        );
        let err = auth(page, Platform::Instagram)
            .login("user", "wrong")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Auth(msg) if msg.contains("rejected")));
    }

    #[tokio::test]
    async fn test_split_login_flow() {
        let page = Arc::new(FakePage::new());
        let password = FakeElement::new(Locator::css("input[name='password']")).as_field();
        page.set_layout(
            "https://x.com/i/flow/login",
            vec![
                FakeElement::new(Locator::css("input[autocomplete='username']")).as_field(),
                FakeElement::new(Locator::css("#next"))
                    .with_text("Next")
                    .on_click(Effect::Reveal(password))
                    .on_click(Effect::Reveal(
                        FakeElement::new(Locator::css("[data-testid='LoginForm_Login_Button']"))
                            .on_click(Effect::Navigate("https://x.com/home".into())),
                    )),
            ],
        );
        page.set_layout(
            "https://x.com/home",
            vec![FakeElement::new(Locator::css("[data-testid='AppTabBar_Home_Link']"))],
        );

        auth(page.clone(), Platform::X).login("dev", "pw").await.unwrap();
        assert_eq!(page.url(), "https://x.com/home");
        assert_eq!(
            page.field_value(&Locator::css("input[name='password']")),
            None,
            "login page layout replaced after navigation"
        );
    }

    fn saved_session(platform: Platform, origin: &str) -> AccountSession {
        AccountSession {
            platform,
            session_name: "default".into(),
            cookies: vec![socialpilot_core::Cookie {
                name: "sessionid".into(),
                value: "s".into(),
                domain: ".instagram.com".into(),
                path: "/".into(),
                expires: None,
                http_only: true,
                secure: true,
                same_site: None,
            }],
            storage_origin: origin.into(),
            local_storage: HashMap::from([("k".to_string(), "v".to_string())]),
            session_storage: HashMap::new(),
            metadata: SessionMetadata::new(Some("me".into()), None),
        }
    }

    #[tokio::test]
    async fn test_restore_valid_session() {
        let page = Arc::new(FakePage::new());
        page.set_layout("https://www.instagram.com/", vec![ig_home_nav()]);
        let ok = auth(page.clone(), Platform::Instagram)
            .restore(&saved_session(Platform::Instagram, "https://www.instagram.com"))
            .await
            .unwrap();
        assert!(ok);
        assert_eq!(page.cookie_names(), vec!["sessionid"]);
        assert_eq!(page.local_storage().get("k").map(String::as_str), Some("v"));
        assert_eq!(page.reloads(), 1);
    }

    #[tokio::test]
    async fn test_restore_expired_session() {
        let page = Arc::new(FakePage::new());
        let ok = auth(page, Platform::Instagram)
            .restore(&saved_session(Platform::Instagram, "https://www.instagram.com"))
            .await
            .unwrap();
        assert!(!ok);
    }
}
