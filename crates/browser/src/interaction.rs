//! Resilient element interaction.
//!
//! Every operation walks an ordered list of [`Locator`] strategies and reports
//! plain success flags: a control that cannot be found is an expected outcome,
//! not an error. Clicks escalate through three tiers (pointer at the element's
//! centre, native `click()`, script-dispatched mouse events) because UI
//! frameworks intercept pointer events inconsistently.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::page::{Locator, PageControl, TextCandidate};

/// Texts longer than this are page content, not control labels.
pub const MAX_TEXT_CANDIDATE_LEN: usize = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickTier {
    Pointer,
    Native,
    Scripted,
}

impl ClickTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pointer => "pointer",
            Self::Native => "native",
            Self::Scripted => "scripted",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventOutcome {
    Succeeded,
    NotFound,
    NotInteractable,
    Failed(String),
}

/// One strategy attempt, as seen by observability.
#[derive(Debug, Clone)]
pub struct InteractionEvent {
    pub operation: &'static str,
    pub strategy: String,
    pub tier: Option<ClickTier>,
    pub outcome: EventOutcome,
    pub elapsed: Duration,
}

pub trait DiagnosticSink: Send + Sync {
    fn record(&self, event: &InteractionEvent);
}

/// Default sink: structured `tracing` events at debug level.
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn record(&self, event: &InteractionEvent) {
        debug!(
            operation = event.operation,
            strategy = %event.strategy,
            tier = event.tier.map(|t| t.as_str()).unwrap_or("-"),
            outcome = ?event.outcome,
            elapsed_ms = event.elapsed.as_millis() as u64,
            "interaction"
        );
    }
}

/// Normalize for matching: trim, collapse whitespace, lowercase.
pub fn normalize_text(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Candidates whose text contains `target`, best first: exact matches, then
/// shorter texts, so "Post" beats "Post your reply to everyone".
pub fn rank_text_matches<'a>(candidates: &'a [TextCandidate], target: &str) -> Vec<&'a TextCandidate> {
    let want = normalize_text(target);
    if want.is_empty() {
        return Vec::new();
    }
    let mut matches: Vec<(bool, usize, &TextCandidate)> = candidates
        .iter()
        .filter_map(|c| {
            let text = normalize_text(&c.text);
            if text.len() > MAX_TEXT_CANDIDATE_LEN || !text.contains(&want) {
                return None;
            }
            Some((text != want, text.len(), c))
        })
        .collect();
    matches.sort_by_key(|(inexact, len, _)| (*inexact, *len));
    matches.into_iter().map(|(_, _, c)| c).collect()
}

#[derive(Clone)]
pub struct Interaction {
    sink: Arc<dyn DiagnosticSink>,
    /// Pause after a click or keystroke before checking its effect.
    settle: Duration,
}

impl Default for Interaction {
    fn default() -> Self {
        Self::new()
    }
}

impl Interaction {
    pub fn new() -> Self {
        Self {
            sink: Arc::new(TracingSink),
            settle: Duration::from_millis(400),
        }
    }

    pub fn with_sink(sink: Arc<dyn DiagnosticSink>) -> Self {
        Self {
            sink,
            ..Self::new()
        }
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    fn emit(
        &self,
        operation: &'static str,
        strategy: &Locator,
        tier: Option<ClickTier>,
        outcome: EventOutcome,
        started: Instant,
    ) {
        self.sink.record(&InteractionEvent {
            operation,
            strategy: strategy.to_string(),
            tier,
            outcome,
            elapsed: started.elapsed(),
        });
    }

    async fn settle(&self) {
        if !self.settle.is_zero() {
            tokio::time::sleep(self.settle).await;
        }
    }

    /// Click the first candidate that exists, is interactable, and accepts one
    /// of the three activation tiers.
    pub async fn click_matching(&self, page: &dyn PageControl, candidates: &[Locator]) -> bool {
        for locator in candidates {
            let clicked = match locator {
                Locator::Text(text) => self.click_text(page, text).await,
                _ => self.click_located(page, locator).await,
            };
            if clicked {
                self.settle().await;
                return true;
            }
        }
        false
    }

    /// Click the control whose visible text best matches one of `texts`.
    pub async fn click_by_visible_text(&self, page: &dyn PageControl, texts: &[&str]) -> bool {
        for text in texts {
            if self.click_text(page, text).await {
                self.settle().await;
                return true;
            }
        }
        false
    }

    async fn click_text(&self, page: &dyn PageControl, text: &str) -> bool {
        let started = Instant::now();
        let strategy = Locator::text(text);
        let candidates = match page.text_candidates().await {
            Ok(c) => c,
            Err(e) => {
                self.emit("click", &strategy, None, EventOutcome::Failed(e.to_string()), started);
                return false;
            }
        };
        let ranked = rank_text_matches(&candidates, text);
        if ranked.is_empty() {
            self.emit("click", &strategy, None, EventOutcome::NotFound, started);
            return false;
        }
        for candidate in ranked {
            if self.click_located(page, &candidate.locator).await {
                return true;
            }
        }
        false
    }

    async fn click_located(&self, page: &dyn PageControl, locator: &Locator) -> bool {
        let started = Instant::now();
        let element = match page.locate(locator).await {
            Ok(Some(b)) => b,
            Ok(None) => {
                self.emit("click", locator, None, EventOutcome::NotFound, started);
                return false;
            }
            Err(e) => {
                self.emit("click", locator, None, EventOutcome::Failed(e.to_string()), started);
                return false;
            }
        };
        if !element.is_interactable() {
            self.emit("click", locator, None, EventOutcome::NotInteractable, started);
            return false;
        }

        let (x, y) = element.center();
        let pointer = match page.hit_test(locator, x, y).await {
            Ok(true) => page.click_at(x, y).await.map(|_| true),
            Ok(false) => Ok(false),
            Err(e) => Err(e),
        };
        if self.tier_result(locator, ClickTier::Pointer, pointer, started) {
            return true;
        }
        let native = page.click_native(locator).await;
        if self.tier_result(locator, ClickTier::Native, native, started) {
            return true;
        }
        let scripted = page.click_scripted(locator).await;
        self.tier_result(locator, ClickTier::Scripted, scripted, started)
    }

    fn tier_result(
        &self,
        locator: &Locator,
        tier: ClickTier,
        result: socialpilot_core::Result<bool>,
        started: Instant,
    ) -> bool {
        let (ok, outcome) = match result {
            Ok(true) => (true, EventOutcome::Succeeded),
            Ok(false) => (false, EventOutcome::NotInteractable),
            Err(e) => (false, EventOutcome::Failed(e.to_string())),
        };
        self.emit("click", locator, Some(tier), outcome, started);
        ok
    }

    /// Whether any candidate is currently present.
    pub async fn exists_any(&self, page: &dyn PageControl, candidates: &[Locator]) -> bool {
        self.first_present(page, candidates).await.is_some()
    }

    async fn first_present(&self, page: &dyn PageControl, candidates: &[Locator]) -> Option<Locator> {
        for locator in candidates {
            let present = match locator {
                Locator::Text(text) => page
                    .text_candidates()
                    .await
                    .map(|c| !rank_text_matches(&c, text).is_empty())
                    .unwrap_or(false),
                _ => matches!(page.locate(locator).await, Ok(Some(_))),
            };
            if present {
                return Some(locator.clone());
            }
        }
        None
    }

    /// Poll until one of the candidates appears.
    pub async fn wait_for_any(
        &self,
        page: &dyn PageControl,
        candidates: &[Locator],
        timeout: Duration,
        poll: Duration,
    ) -> Option<Locator> {
        let started = Instant::now();
        loop {
            if let Some(found) = self.first_present(page, candidates).await {
                return Some(found);
            }
            if started.elapsed() >= timeout {
                return None;
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Text of the first candidate that yields non-empty text.
    pub async fn read_text(&self, page: &dyn PageControl, candidates: &[Locator]) -> Option<String> {
        for locator in candidates {
            let started = Instant::now();
            match page.element_text(locator).await {
                Ok(Some(text)) if !text.trim().is_empty() => {
                    self.emit("read", locator, None, EventOutcome::Succeeded, started);
                    return Some(text.trim().to_string());
                }
                Ok(_) => self.emit("read", locator, None, EventOutcome::NotFound, started),
                Err(e) => self.emit("read", locator, None, EventOutcome::Failed(e.to_string()), started),
            }
        }
        None
    }

    async fn focus_first(&self, page: &dyn PageControl, candidates: &[Locator]) -> Option<Locator> {
        for locator in candidates {
            let started = Instant::now();
            match page.focus(locator).await {
                Ok(true) => {
                    self.emit("focus", locator, None, EventOutcome::Succeeded, started);
                    return Some(locator.clone());
                }
                Ok(false) => self.emit("focus", locator, None, EventOutcome::NotFound, started),
                Err(e) => self.emit("focus", locator, None, EventOutcome::Failed(e.to_string()), started),
            }
        }
        None
    }

    /// Focus the first available field, clear it and type `text`.
    pub async fn fill(&self, page: &dyn PageControl, candidates: &[Locator], text: &str) -> bool {
        let Some(_) = self.focus_first(page, candidates).await else {
            return false;
        };
        let cleared = page.press_key("Control+A").await.is_ok() && page.press_key("Backspace").await.is_ok();
        if !cleared {
            return false;
        }
        page.insert_text(text).await.is_ok()
    }

    /// Type `text` into the compose field and submit it, escalating from a
    /// keyboard shortcut to the submit button to a bare Enter. Success means
    /// the field stopped echoing the text.
    pub async fn submit_text(
        &self,
        page: &dyn PageControl,
        field: &[Locator],
        submit: &[Locator],
        text: &str,
    ) -> bool {
        // Some compose boxes only mount after a click on their placeholder.
        if self.focus_first(page, field).await.is_none() {
            if !self.click_matching(page, field).await {
                return false;
            }
            if self.focus_first(page, field).await.is_none() {
                return false;
            }
        }
        if page.insert_text(text).await.is_err() {
            return false;
        }
        self.settle().await;

        for shortcut in ["Control+Enter", "Meta+Enter"] {
            if page.press_key(shortcut).await.is_ok() {
                self.settle().await;
                if !self.field_echoes(page, field, text).await {
                    return true;
                }
            }
        }
        if self.click_matching(page, submit).await && !self.field_echoes(page, field, text).await {
            return true;
        }
        if page.press_key("Enter").await.is_ok() {
            self.settle().await;
            if !self.field_echoes(page, field, text).await {
                return true;
            }
        }
        false
    }

    /// Whether any compose field still shows `text`. A field that vanished
    /// counts as submitted.
    async fn field_echoes(&self, page: &dyn PageControl, field: &[Locator], text: &str) -> bool {
        let want = normalize_text(text);
        for locator in field {
            if let Ok(Some(current)) = page.element_text(locator).await {
                if !want.is_empty() && normalize_text(&current).contains(&want) {
                    return true;
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::ElementBox;
    use crate::testing::{CollectingSink, FakeElement, FakePage};

    fn candidate(text: &str, idx: usize) -> TextCandidate {
        TextCandidate {
            text: text.to_string(),
            locator: Locator::css(format!("[data-sp-ref=\"{}\"]", idx)),
        }
    }

    fn quick() -> Interaction {
        Interaction::new().with_settle(Duration::ZERO)
    }

    #[test]
    fn test_rank_prefers_exact_then_short() {
        let candidates = vec![
            candidate("Post your reply", 0),
            candidate("  POST ", 1),
            candidate("Posts", 2),
            candidate("Log in", 3),
        ];
        let ranked = rank_text_matches(&candidates, "post");
        let texts: Vec<&str> = ranked.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["  POST ", "Posts", "Post your reply"]);
    }

    #[test]
    fn test_rank_ignores_long_text_and_empty_target() {
        let long = "like ".repeat(30);
        let candidates = vec![candidate(&long, 0)];
        assert!(rank_text_matches(&candidates, "like").is_empty());
        assert!(rank_text_matches(&candidates, "   ").is_empty());
    }

    #[test]
    fn test_normalize_text() {
        assert_eq!(normalize_text("  Not\n now  "), "not now");
    }

    #[tokio::test]
    async fn test_pointer_tier_used_when_hit_test_passes() {
        let page = FakePage::new();
        page.add_element(FakeElement::new(Locator::css("button.like")));
        let sink = Arc::new(CollectingSink::default());
        let interaction = Interaction::with_sink(sink.clone()).with_settle(Duration::ZERO);

        assert!(interaction.click_matching(&page, &[Locator::css("button.like")]).await);
        assert_eq!(page.clicks(), vec![(Locator::css("button.like"), ClickTier::Pointer)]);
        let events = sink.events();
        assert_eq!(events.last().unwrap().tier, Some(ClickTier::Pointer));
        assert_eq!(events.last().unwrap().outcome, EventOutcome::Succeeded);
    }

    #[tokio::test]
    async fn test_falls_through_to_scripted_click() {
        let page = FakePage::new();
        page.add_element(
            FakeElement::new(Locator::css("div[role=button]"))
                .covered()
                .native_fails(),
        );
        assert!(quick().click_matching(&page, &[Locator::css("div[role=button]")]).await);
        assert_eq!(
            page.clicks(),
            vec![(Locator::css("div[role=button]"), ClickTier::Scripted)]
        );
    }

    #[tokio::test]
    async fn test_skips_hidden_candidates_in_priority_order() {
        let page = FakePage::new();
        page.add_element(FakeElement::new(Locator::css("#primary")).with_box(ElementBox {
            x: 0.0,
            y: 0.0,
            width: 20.0,
            height: 20.0,
            visible: true,
            opacity: 0.0,
        }));
        page.add_element(FakeElement::new(Locator::css("#fallback")));

        let clicked = quick()
            .click_matching(
                &page,
                &[Locator::css("#missing"), Locator::css("#primary"), Locator::css("#fallback")],
            )
            .await;
        assert!(clicked);
        assert_eq!(page.clicks(), vec![(Locator::css("#fallback"), ClickTier::Pointer)]);
    }

    #[tokio::test]
    async fn test_not_found_is_false_not_error() {
        let page = FakePage::new();
        assert!(!quick().click_matching(&page, &[Locator::css("#nope")]).await);
        assert!(!quick().click_by_visible_text(&page, &["Not now"]).await);
        assert!(page.clicks().is_empty());
    }

    #[tokio::test]
    async fn test_visible_text_click_picks_exact_match() {
        let page = FakePage::new();
        page.add_element(FakeElement::new(Locator::css("#long")).with_text("Post to your story"));
        page.add_element(FakeElement::new(Locator::css("#exact")).with_text("Post"));

        assert!(quick().click_by_visible_text(&page, &["post"]).await);
        assert_eq!(page.clicks(), vec![(Locator::css("#exact"), ClickTier::Pointer)]);
    }

    #[tokio::test]
    async fn test_submit_text_shortcut_clears_field() {
        let page = FakePage::new();
        let field = Locator::css("textarea");
        page.add_element(FakeElement::new(field.clone()).as_field().clears_on_key("Control+Enter"));

        let ok = quick()
            .submit_text(&page, &[field.clone()], &[Locator::css("button[type=submit]")], "Nice shot")
            .await;
        assert!(ok);
        assert_eq!(page.typed(), vec!["Nice shot".to_string()]);
        assert!(page.clicks().is_empty());
    }

    #[tokio::test]
    async fn test_submit_text_falls_back_to_button() {
        let page = FakePage::new();
        let field = Locator::css("textarea");
        let button = Locator::css("button[type=submit]");
        page.add_element(FakeElement::new(field.clone()).as_field());
        page.add_element(FakeElement::new(button.clone()).clears_field_on_click(field.clone()));

        let ok = quick()
            .submit_text(&page, &[field.clone()], &[button.clone()], "Great read")
            .await;
        assert!(ok);
        assert_eq!(page.clicks(), vec![(button, ClickTier::Pointer)]);
    }

    #[tokio::test]
    async fn test_submit_text_reports_failure_when_text_stays() {
        let page = FakePage::new();
        let field = Locator::css("textarea");
        page.add_element(FakeElement::new(field.clone()).as_field());

        let ok = quick()
            .submit_text(&page, &[field.clone()], &[Locator::css("#none")], "stuck")
            .await;
        assert!(!ok);
        assert!(page.keys().contains(&"Enter".to_string()));
    }

    #[tokio::test]
    async fn test_fill_clears_then_types() {
        let page = FakePage::new();
        let field = Locator::css("input[name=username]");
        page.add_element(FakeElement::new(field.clone()).as_field().with_text("old"));

        assert!(quick().fill(&page, &[field.clone()], "rustacean").await);
        assert_eq!(page.field_value(&field).as_deref(), Some("rustacean"));
    }

    #[tokio::test]
    async fn test_read_text_skips_empty_matches() {
        let page = FakePage::new();
        page.add_element(FakeElement::new(Locator::css("h1")).with_text("   "));
        page.add_element(FakeElement::new(Locator::css("article")).with_text(" caption text "));

        let text = quick()
            .read_text(&page, &[Locator::css("h1"), Locator::css("article")])
            .await;
        assert_eq!(text.as_deref(), Some("caption text"));
    }

    #[tokio::test]
    async fn test_wait_for_any_times_out() {
        let page = FakePage::new();
        let found = quick()
            .wait_for_any(
                &page,
                &[Locator::css("#never")],
                Duration::from_millis(30),
                Duration::from_millis(10),
            )
            .await;
        assert!(found.is_none());

        page.add_element(FakeElement::new(Locator::css("nav")));
        let found = quick()
            .wait_for_any(&page, &[Locator::css("#never"), Locator::css("nav")], Duration::ZERO, Duration::ZERO)
            .await;
        assert_eq!(found, Some(Locator::css("nav")));
    }
}
