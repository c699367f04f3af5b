//! Acting on a single item page: open it, like, comment, follow, and check
//! whether the write landed.

use async_trait::async_trait;
use socialpilot_browser::{capture_session, Interaction, PageControl};
use socialpilot_core::{ActionKind, CandidateItem, Platform, Result};
use socialpilot_storage::{SessionMetadata, SessionStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::dedup::HistoryVerifier;
use crate::platform::{locators, profile, PlatformProfile};

/// What the orchestrator needs to know about an opened item.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemSnapshot {
    pub text: String,
    pub has_video: bool,
}

impl ItemSnapshot {
    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}

/// Post-write evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    Confirmed,
    /// The write went through but the page shows no proof either way.
    Inconclusive,
    Absent,
}

#[async_trait]
pub trait ItemActor: Send + Sync {
    async fn open(&self, item: &CandidateItem) -> Result<ItemSnapshot>;
    /// Perform `kind` on the open item. `text` is the comment body for
    /// comments. `false` means the control could not be operated.
    async fn act(&self, kind: ActionKind, text: Option<&str>) -> Result<bool>;
    async fn verify(&self, kind: ActionKind, text: Option<&str>) -> Result<Verification>;
    /// Re-capture and persist the account session.
    async fn persist_session(&self) -> Result<()>;
    fn verifier(&self) -> &dyn HistoryVerifier;
}

/// Where a successful write re-saves the session.
#[derive(Clone)]
pub struct SessionBinding {
    pub store: SessionStore,
    pub session_name: String,
    pub metadata: SessionMetadata,
}

pub struct BrowserActor {
    page: Arc<dyn PageControl>,
    profile: &'static PlatformProfile,
    interaction: Interaction,
    handle: Option<String>,
    session: Option<SessionBinding>,
    /// How long to wait for an item page to render its content.
    render_wait: Duration,
    poll: Duration,
}

impl BrowserActor {
    pub fn new(page: Arc<dyn PageControl>, platform: Platform) -> Self {
        Self {
            page,
            profile: profile(platform),
            interaction: Interaction::new(),
            handle: None,
            session: None,
            render_wait: Duration::from_secs(10),
            poll: Duration::from_millis(500),
        }
    }

    pub fn with_handle(mut self, handle: Option<String>) -> Self {
        self.handle = handle.map(|h| normalize_handle(&h)).filter(|h| !h.is_empty());
        self
    }

    pub fn with_session(mut self, session: SessionBinding) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_timing(mut self, interaction: Interaction, render_wait: Duration, poll: Duration) -> Self {
        self.interaction = interaction;
        self.render_wait = render_wait;
        self.poll = poll;
        self
    }

    pub fn handle(&self) -> Option<&str> {
        self.handle.as_deref()
    }

    async fn authors_include(&self, handle: &str) -> bool {
        let want = normalize_handle(handle);
        for locator in locators(self.profile.reply_authors) {
            if let Ok(texts) = self.page.all_texts(&locator).await {
                if texts.iter().any(|t| normalize_handle(t) == want) {
                    return true;
                }
            }
        }
        false
    }

    async fn like(&self) -> bool {
        if self.interaction.exists_any(self.page.as_ref(), &locators(self.profile.liked_marker)).await {
            debug!("Item already liked");
            return true;
        }
        self.interaction
            .click_matching(self.page.as_ref(), &locators(self.profile.like_button))
            .await
    }

    async fn follow(&self) -> bool {
        if self
            .interaction
            .exists_any(self.page.as_ref(), &locators(self.profile.following_marker))
            .await
        {
            debug!("Author already followed");
            return true;
        }
        self.interaction
            .click_matching(self.page.as_ref(), &locators(self.profile.follow_button))
            .await
    }
}

/// Lower-case, trimmed, without a leading `@`.
pub fn normalize_handle(handle: &str) -> String {
    handle.trim().trim_start_matches('@').trim().to_lowercase()
}

#[async_trait]
impl ItemActor for BrowserActor {
    async fn open(&self, item: &CandidateItem) -> Result<ItemSnapshot> {
        info!(url = %item.url, "Opening item");
        self.page.navigate(&item.url).await?;
        self.interaction
            .click_by_visible_text(self.page.as_ref(), self.profile.banner_texts)
            .await;

        let mut ready = locators(self.profile.caption);
        ready.extend(locators(self.profile.like_button));
        ready.extend(locators(self.profile.liked_marker));
        if self
            .interaction
            .wait_for_any(self.page.as_ref(), &ready, self.render_wait, self.poll)
            .await
            .is_none()
        {
            warn!(url = %item.url, "Item content did not render");
        }

        let text = self
            .interaction
            .read_text(self.page.as_ref(), &locators(self.profile.caption))
            .await
            .unwrap_or_default();
        let has_video = !self.profile.video.is_empty()
            && self
                .interaction
                .exists_any(self.page.as_ref(), &locators(self.profile.video))
                .await;
        debug!(url = %item.url, words = text.split_whitespace().count(), has_video = has_video, "Item snapshot");
        Ok(ItemSnapshot { text, has_video })
    }

    async fn act(&self, kind: ActionKind, text: Option<&str>) -> Result<bool> {
        let done = match kind {
            ActionKind::Like => self.like().await,
            ActionKind::Follow => self.follow().await,
            ActionKind::Comment => {
                let Some(text) = text.filter(|t| !t.trim().is_empty()) else {
                    return Ok(false);
                };
                self.interaction
                    .submit_text(
                        self.page.as_ref(),
                        &locators(self.profile.comment_field),
                        &locators(self.profile.comment_submit),
                        text,
                    )
                    .await
            }
        };
        debug!(kind = %kind, done = done, "Write action");
        Ok(done)
    }

    async fn verify(&self, kind: ActionKind, _text: Option<&str>) -> Result<Verification> {
        let page = self.page.as_ref();
        match kind {
            ActionKind::Comment => {
                let Some(handle) = self.infer_handle().await else {
                    debug!("Account handle unknown, comment cannot be verified");
                    return Ok(Verification::Inconclusive);
                };
                // Replies render asynchronously after submission.
                for attempt in 0..3 {
                    if self.authors_include(&handle).await {
                        return Ok(Verification::Confirmed);
                    }
                    if attempt < 2 && !self.poll.is_zero() {
                        tokio::time::sleep(self.poll).await;
                    }
                }
                Ok(Verification::Inconclusive)
            }
            ActionKind::Like => {
                if self.interaction.exists_any(page, &locators(self.profile.liked_marker)).await {
                    Ok(Verification::Confirmed)
                } else if self.interaction.exists_any(page, &locators(self.profile.like_button)).await {
                    Ok(Verification::Absent)
                } else {
                    Ok(Verification::Inconclusive)
                }
            }
            ActionKind::Follow => {
                if self
                    .interaction
                    .exists_any(page, &locators(self.profile.following_marker))
                    .await
                {
                    Ok(Verification::Confirmed)
                } else if self.interaction.exists_any(page, &locators(self.profile.follow_button)).await {
                    Ok(Verification::Absent)
                } else {
                    Ok(Verification::Inconclusive)
                }
            }
        }
    }

    async fn persist_session(&self) -> Result<()> {
        let Some(binding) = &self.session else {
            return Ok(());
        };
        let (cookies, storage) = capture_session(self.page.as_ref()).await?;
        binding.store.save(
            self.profile.platform,
            &binding.session_name,
            cookies,
            storage,
            binding.metadata.clone(),
        )?;
        Ok(())
    }

    fn verifier(&self) -> &dyn HistoryVerifier {
        self
    }
}

#[async_trait]
impl HistoryVerifier for BrowserActor {
    async fn infer_handle(&self) -> Option<String> {
        if self.handle.is_some() {
            return self.handle.clone();
        }
        self.interaction
            .read_text(self.page.as_ref(), &locators(self.profile.own_handle))
            .await
            .map(|h| normalize_handle(&h))
            .filter(|h| !h.is_empty())
    }

    async fn shows_action(&self, kind: ActionKind, handle: Option<&str>) -> Result<bool> {
        let page = self.page.as_ref();
        Ok(match kind {
            ActionKind::Comment => match handle {
                Some(h) => self.authors_include(h).await,
                None => true,
            },
            ActionKind::Like => self.interaction.exists_any(page, &locators(self.profile.liked_marker)).await,
            ActionKind::Follow => {
                self.interaction
                    .exists_any(page, &locators(self.profile.following_marker))
                    .await
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use socialpilot_browser::testing::{Effect, FakeElement, FakePage};
    use socialpilot_browser::Locator;
    use socialpilot_core::Paths;
    use tempfile::TempDir;

    const ITEM: &str = "https://x.com/rustlang/status/42";

    fn actor(page: Arc<FakePage>) -> BrowserActor {
        BrowserActor::new(page, Platform::X)
            .with_handle(Some("@Me".into()))
            .with_timing(
                Interaction::new().with_settle(Duration::ZERO),
                Duration::ZERO,
                Duration::ZERO,
            )
    }

    fn tweet_page(text: &str) -> Vec<FakeElement> {
        vec![
            FakeElement::new(Locator::css("article [data-testid='tweetText']")).with_text(text),
            FakeElement::new(Locator::css("article [data-testid='like']"))
                .on_click(Effect::Remove(Locator::css("article [data-testid='like']")))
                .on_click(Effect::Reveal(FakeElement::new(Locator::css(
                    "article [data-testid='unlike']",
                )))),
        ]
    }

    #[tokio::test]
    async fn test_open_reads_caption_and_video() {
        let page = Arc::new(FakePage::new());
        let mut elements = tweet_page("Rust 2024 edition is out, go read the notes");
        elements.push(FakeElement::new(Locator::css("article video")));
        page.set_layout(ITEM, elements);

        let snapshot = actor(page.clone())
            .open(&CandidateItem::new(Platform::X, ITEM))
            .await
            .unwrap();
        assert_eq!(snapshot.word_count(), 9);
        assert!(snapshot.has_video);
        assert_eq!(page.navigations(), vec![ITEM]);
    }

    #[tokio::test]
    async fn test_like_then_verify() {
        let page = Arc::new(FakePage::new());
        page.set_layout(ITEM, tweet_page("hello"));
        let actor = actor(page.clone());
        actor.open(&CandidateItem::new(Platform::X, ITEM)).await.unwrap();

        assert_eq!(actor.verify(ActionKind::Like, None).await.unwrap(), Verification::Absent);
        assert!(actor.act(ActionKind::Like, None).await.unwrap());
        assert_eq!(actor.verify(ActionKind::Like, None).await.unwrap(), Verification::Confirmed);
        assert!(actor.shows_action(ActionKind::Like, None).await.unwrap());
    }

    #[tokio::test]
    async fn test_comment_confirmed_by_reply_author() {
        let page = Arc::new(FakePage::new());
        let field = Locator::css("[data-testid='tweetTextarea_0']");
        let mut elements = tweet_page("hello");
        elements.push(
            FakeElement::new(field.clone())
                .as_field()
                .clears_on_key("Control+Enter")
                .on_key(
                    "Control+Enter",
                    Effect::Reveal(
                        FakeElement::new(Locator::css("[data-testid='User-Name'] div[dir='ltr'] span"))
                            .with_text("@me"),
                    ),
                ),
        );
        page.set_layout(ITEM, elements);
        let actor = actor(page.clone());
        actor.open(&CandidateItem::new(Platform::X, ITEM)).await.unwrap();

        assert!(!actor.shows_action(ActionKind::Comment, Some("me")).await.unwrap());
        assert!(actor.act(ActionKind::Comment, Some("Nice release")).await.unwrap());
        assert_eq!(
            actor.verify(ActionKind::Comment, Some("Nice release")).await.unwrap(),
            Verification::Confirmed
        );
    }

    #[tokio::test]
    async fn test_comment_without_field_is_not_submitted() {
        let page = Arc::new(FakePage::new());
        page.set_layout(ITEM, tweet_page("hello"));
        let actor = actor(page.clone());
        actor.open(&CandidateItem::new(Platform::X, ITEM)).await.unwrap();
        assert!(!actor.act(ActionKind::Comment, Some("hi")).await.unwrap());
        assert!(!actor.act(ActionKind::Comment, Some("  ")).await.unwrap());
    }

    #[tokio::test]
    async fn test_infer_handle_from_page() {
        let page = Arc::new(FakePage::new());
        page.add_element(
            FakeElement::new(Locator::css(
                "[data-testid='SideNav_AccountSwitcher_Button'] div[dir='ltr'] span",
            ))
            .with_text("@RustDev"),
        );
        let actor = BrowserActor::new(page, Platform::X);
        assert_eq!(actor.infer_handle().await.as_deref(), Some("rustdev"));
    }

    #[tokio::test]
    async fn test_comment_verified_with_handle_read_from_page() {
        let page = Arc::new(FakePage::new());
        let mut elements = tweet_page("hello");
        elements.push(
            FakeElement::new(Locator::css(
                "[data-testid='SideNav_AccountSwitcher_Button'] div[dir='ltr'] span",
            ))
            .with_text("@RustDev"),
        );
        elements.push(
            FakeElement::new(Locator::css("[data-testid='User-Name'] div[dir='ltr'] span")).with_text("@rustdev"),
        );
        page.set_layout(ITEM, elements);
        let actor = BrowserActor::new(page, Platform::X).with_timing(
            Interaction::new().with_settle(Duration::ZERO),
            Duration::ZERO,
            Duration::ZERO,
        );
        actor.open(&CandidateItem::new(Platform::X, ITEM)).await.unwrap();

        assert!(actor.handle().is_none());
        assert_eq!(
            actor.verify(ActionKind::Comment, Some("Nice release")).await.unwrap(),
            Verification::Confirmed
        );
    }

    #[tokio::test]
    async fn test_comment_without_any_handle_is_inconclusive() {
        let page = Arc::new(FakePage::new());
        let mut elements = tweet_page("hello");
        elements.push(
            FakeElement::new(Locator::css("[data-testid='User-Name'] div[dir='ltr'] span")).with_text("@rustdev"),
        );
        page.set_layout(ITEM, elements);
        let actor = BrowserActor::new(page, Platform::X).with_timing(
            Interaction::new().with_settle(Duration::ZERO),
            Duration::ZERO,
            Duration::ZERO,
        );
        actor.open(&CandidateItem::new(Platform::X, ITEM)).await.unwrap();
        assert_eq!(
            actor.verify(ActionKind::Comment, None).await.unwrap(),
            Verification::Inconclusive
        );
    }

    #[tokio::test]
    async fn test_persist_session_writes_store() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(Paths::with_base(dir.path().to_path_buf()));
        let page = Arc::new(FakePage::at("https://x.com/home"));
        page.set_local_storage("k", "v");
        let actor = actor(page).with_session(SessionBinding {
            store: store.clone(),
            session_name: "main".into(),
            metadata: SessionMetadata::new(Some("me".into()), None),
        });
        actor.persist_session().await.unwrap();

        let saved = store.load(Platform::X, "main").unwrap();
        assert_eq!(saved.storage_origin, "https://x.com");
        assert_eq!(saved.local_storage.get("k").map(String::as_str), Some("v"));
    }
}
