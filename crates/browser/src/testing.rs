//! In-memory [`PageControl`] for unit tests in this crate and downstream.
//!
//! A `FakePage` holds a flat list of scripted elements. Clicks and key presses
//! can mutate that list through [`Effect`]s, which is enough to model a like
//! button flipping to "Unlike", a compose box clearing after submit, or a
//! logged-in navigation bar appearing after the login form is sent.

use async_trait::async_trait;
use serde_json::Value;
use socialpilot_core::{Cookie, Error, Result, StorageSnapshot};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::interaction::{ClickTier, DiagnosticSink, InteractionEvent};
use crate::page::{ElementBox, Locator, PageControl, TextCandidate};

/// State change triggered by a click or key press.
#[derive(Debug, Clone)]
pub enum Effect {
    ClearField(Locator),
    Reveal(FakeElement),
    Remove(Locator),
    Navigate(String),
}

#[derive(Debug, Clone)]
pub struct FakeElement {
    pub locator: Locator,
    pub text: String,
    pub bounds: ElementBox,
    /// Another element sits on top, so pointer hit tests fail.
    pub covered: bool,
    pub native_fails: bool,
    pub scripted_fails: bool,
    pub editable: bool,
    pub on_click: Vec<Effect>,
    pub on_key: Vec<(String, Effect)>,
}

impl FakeElement {
    pub fn new(locator: Locator) -> Self {
        Self {
            locator,
            text: String::new(),
            bounds: ElementBox {
                x: 10.0,
                y: 10.0,
                width: 100.0,
                height: 30.0,
                visible: true,
                opacity: 1.0,
            },
            covered: false,
            native_fails: false,
            scripted_fails: false,
            editable: false,
            on_click: Vec::new(),
            on_key: Vec::new(),
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn with_box(mut self, bounds: ElementBox) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn covered(mut self) -> Self {
        self.covered = true;
        self
    }

    pub fn native_fails(mut self) -> Self {
        self.native_fails = true;
        self
    }

    pub fn unclickable(mut self) -> Self {
        self.covered = true;
        self.native_fails = true;
        self.scripted_fails = true;
        self
    }

    pub fn as_field(mut self) -> Self {
        self.editable = true;
        self
    }

    pub fn on_click(mut self, effect: Effect) -> Self {
        self.on_click.push(effect);
        self
    }

    pub fn on_key(mut self, key: impl Into<String>, effect: Effect) -> Self {
        self.on_key.push((key.into(), effect));
        self
    }

    pub fn clears_on_key(self, key: &str) -> Self {
        let me = self.locator.clone();
        self.on_key(key, Effect::ClearField(me))
    }

    pub fn clears_field_on_click(self, field: Locator) -> Self {
        self.on_click(Effect::ClearField(field))
    }
}

#[derive(Default)]
struct FakeState {
    url: String,
    elements: Vec<FakeElement>,
    layouts: HashMap<String, Vec<FakeElement>>,
    focused: Option<Locator>,
    armed: Option<Locator>,
    clicks: Vec<(Locator, ClickTier)>,
    typed: Vec<String>,
    keys: Vec<String>,
    navigations: Vec<String>,
    reloads: usize,
    href_stages: Vec<Vec<String>>,
    scrolls: usize,
    cookies: Vec<Cookie>,
    local_storage: HashMap<String, String>,
    session_storage: HashMap<String, String>,
    fail_navigation: bool,
    fail_set_cookies: bool,
    fail_apply_storage: bool,
}

impl FakeState {
    fn find(&self, locator: &Locator) -> Option<usize> {
        match locator {
            Locator::Text(text) => {
                let want = crate::interaction::normalize_text(text);
                self.elements
                    .iter()
                    .position(|e| crate::interaction::normalize_text(&e.text) == want)
            }
            _ => self.elements.iter().position(|e| &e.locator == locator),
        }
    }

    fn apply(&mut self, effect: Effect) {
        match effect {
            Effect::ClearField(locator) => {
                if let Some(i) = self.find(&locator) {
                    self.elements[i].text.clear();
                }
            }
            Effect::Reveal(element) => self.elements.push(element),
            Effect::Remove(locator) => self.elements.retain(|e| e.locator != locator),
            Effect::Navigate(url) => self.load(&url),
        }
    }

    fn click(&mut self, idx: usize, tier: ClickTier) {
        let element = self.elements[idx].clone();
        self.clicks.push((element.locator.clone(), tier));
        if element.editable {
            self.focused = Some(element.locator.clone());
        }
        for effect in element.on_click {
            self.apply(effect);
        }
    }

    fn load(&mut self, url: &str) {
        self.url = url.to_string();
        self.scrolls = 0;
        self.focused = None;
        if let Some(layout) = self.layouts.get(url) {
            self.elements = layout.clone();
        }
    }

    fn origin(&self) -> String {
        url::Url::parse(&self.url)
            .map(|u| u.origin().ascii_serialization())
            .unwrap_or_default()
    }
}

/// Scriptable stand-in for a browser page.
#[derive(Default)]
pub struct FakePage {
    state: Mutex<FakeState>,
}

impl FakePage {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn at(url: &str) -> Self {
        let page = Self::new();
        page.state().url = url.to_string();
        page
    }

    pub fn add_element(&self, element: FakeElement) {
        self.state().elements.push(element);
    }

    pub fn remove_element(&self, locator: &Locator) {
        self.state().elements.retain(|e| &e.locator != locator);
    }

    pub fn clear_elements(&self) {
        self.state().elements.clear();
    }

    /// Elements shown whenever `url` is navigated to.
    pub fn set_layout(&self, url: &str, elements: Vec<FakeElement>) {
        self.state().layouts.insert(url.to_string(), elements);
    }

    /// Anchor hrefs visible after 0, 1, 2... scrolls. Past the last stage the
    /// feed stops growing.
    pub fn set_href_stages(&self, stages: Vec<Vec<String>>) {
        self.state().href_stages = stages;
    }

    pub fn set_cookies_state(&self, cookies: Vec<Cookie>) {
        self.state().cookies = cookies;
    }

    pub fn set_local_storage(&self, key: &str, value: &str) {
        self.state()
            .local_storage
            .insert(key.to_string(), value.to_string());
    }

    pub fn fail_navigation(&self, fail: bool) {
        self.state().fail_navigation = fail;
    }

    pub fn fail_set_cookies(&self, fail: bool) {
        self.state().fail_set_cookies = fail;
    }

    pub fn fail_apply_storage(&self, fail: bool) {
        self.state().fail_apply_storage = fail;
    }

    pub fn clicks(&self) -> Vec<(Locator, ClickTier)> {
        self.state().clicks.clone()
    }

    pub fn clicked(&self, locator: &Locator) -> bool {
        self.state().clicks.iter().any(|(l, _)| l == locator)
    }

    pub fn typed(&self) -> Vec<String> {
        self.state().typed.clone()
    }

    pub fn keys(&self) -> Vec<String> {
        self.state().keys.clone()
    }

    pub fn navigations(&self) -> Vec<String> {
        self.state().navigations.clone()
    }

    pub fn reloads(&self) -> usize {
        self.state().reloads
    }

    pub fn scrolls(&self) -> usize {
        self.state().scrolls
    }

    pub fn url(&self) -> String {
        self.state().url.clone()
    }

    pub fn has_element(&self, locator: &Locator) -> bool {
        self.state().find(locator).is_some()
    }

    pub fn field_value(&self, locator: &Locator) -> Option<String> {
        let state = self.state();
        state.find(locator).map(|i| state.elements[i].text.clone())
    }

    pub fn cookie_names(&self) -> Vec<String> {
        self.state().cookies.iter().map(|c| c.name.clone()).collect()
    }

    pub fn local_storage(&self) -> HashMap<String, String> {
        self.state().local_storage.clone()
    }
}

#[async_trait]
impl PageControl for FakePage {
    async fn navigate(&self, url: &str) -> Result<()> {
        let mut state = self.state();
        state.navigations.push(url.to_string());
        if state.fail_navigation {
            return Err(Error::Navigation(format!("{}: net::ERR_FAILED", url)));
        }
        state.load(url);
        Ok(())
    }

    async fn reload(&self) -> Result<()> {
        let mut state = self.state();
        state.reloads += 1;
        let url = state.url.clone();
        state.load(&url);
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.state().url.clone())
    }

    async fn evaluate(&self, _expression: &str) -> Result<Value> {
        Ok(Value::Null)
    }

    async fn locate(&self, locator: &Locator) -> Result<Option<ElementBox>> {
        let state = self.state();
        Ok(state.find(locator).map(|i| state.elements[i].bounds))
    }

    async fn hit_test(&self, locator: &Locator, _x: f64, _y: f64) -> Result<bool> {
        let mut state = self.state();
        let Some(i) = state.find(locator) else {
            return Ok(false);
        };
        if state.elements[i].covered {
            return Ok(false);
        }
        state.armed = Some(locator.clone());
        Ok(true)
    }

    async fn click_at(&self, _x: f64, _y: f64) -> Result<()> {
        let mut state = self.state();
        if let Some(locator) = state.armed.take() {
            if let Some(i) = state.find(&locator) {
                state.click(i, ClickTier::Pointer);
            }
        }
        Ok(())
    }

    async fn click_native(&self, locator: &Locator) -> Result<bool> {
        let mut state = self.state();
        match state.find(locator) {
            Some(i) if !state.elements[i].native_fails => {
                state.click(i, ClickTier::Native);
                Ok(true)
            }
            Some(_) => Err(Error::Cdp("evaluate: click intercepted".into())),
            None => Ok(false),
        }
    }

    async fn click_scripted(&self, locator: &Locator) -> Result<bool> {
        let mut state = self.state();
        match state.find(locator) {
            Some(i) if !state.elements[i].scripted_fails => {
                state.click(i, ClickTier::Scripted);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn focus(&self, locator: &Locator) -> Result<bool> {
        let mut state = self.state();
        match state.find(locator) {
            Some(i) if state.elements[i].editable => {
                state.focused = Some(state.elements[i].locator.clone());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn text_candidates(&self) -> Result<Vec<TextCandidate>> {
        Ok(self
            .state()
            .elements
            .iter()
            .filter(|e| !e.text.trim().is_empty() && e.bounds.is_interactable())
            .map(|e| TextCandidate {
                text: e.text.clone(),
                locator: e.locator.clone(),
            })
            .collect())
    }

    async fn element_text(&self, locator: &Locator) -> Result<Option<String>> {
        let state = self.state();
        Ok(state.find(locator).map(|i| state.elements[i].text.clone()))
    }

    async fn all_texts(&self, locator: &Locator) -> Result<Vec<String>> {
        Ok(self
            .state()
            .elements
            .iter()
            .filter(|e| &e.locator == locator && !e.text.trim().is_empty())
            .map(|e| e.text.trim().to_string())
            .collect())
    }

    async fn hrefs(&self) -> Result<Vec<String>> {
        let state = self.state();
        if state.href_stages.is_empty() {
            return Ok(Vec::new());
        }
        let idx = state.scrolls.min(state.href_stages.len() - 1);
        Ok(state.href_stages[idx].clone())
    }

    async fn insert_text(&self, text: &str) -> Result<()> {
        let mut state = self.state();
        state.typed.push(text.to_string());
        if let Some(focused) = state.focused.clone() {
            if let Some(i) = state.find(&focused) {
                state.elements[i].text.push_str(text);
            }
        }
        Ok(())
    }

    async fn press_key(&self, key: &str) -> Result<()> {
        let mut state = self.state();
        state.keys.push(key.to_string());
        let Some(focused) = state.focused.clone() else {
            return Ok(());
        };
        let Some(i) = state.find(&focused) else {
            return Ok(());
        };
        if key == "Backspace" && state.elements[i].editable {
            state.elements[i].text.clear();
        }
        let effects: Vec<Effect> = state.elements[i]
            .on_key
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, e)| e.clone())
            .collect();
        for effect in effects {
            state.apply(effect);
        }
        Ok(())
    }

    async fn scroll_by(&self, _dy: i64) -> Result<()> {
        self.state().scrolls += 1;
        Ok(())
    }

    async fn cookies(&self) -> Result<Vec<Cookie>> {
        Ok(self.state().cookies.clone())
    }

    async fn set_cookies(&self, cookies: &[Cookie]) -> Result<()> {
        let mut state = self.state();
        if state.fail_set_cookies {
            return Err(Error::Cdp("Storage.setCookies: invalid cookie".into()));
        }
        for cookie in cookies {
            state
                .cookies
                .retain(|c| !(c.name == cookie.name && c.domain == cookie.domain));
            state.cookies.push(cookie.clone());
        }
        Ok(())
    }

    async fn clear_cookies(&self) -> Result<()> {
        self.state().cookies.clear();
        Ok(())
    }

    async fn storage(&self) -> Result<StorageSnapshot> {
        let state = self.state();
        Ok(StorageSnapshot {
            origin: state.origin(),
            local_storage: state.local_storage.clone(),
            session_storage: state.session_storage.clone(),
        })
    }

    async fn apply_storage(&self, snapshot: &StorageSnapshot) -> Result<()> {
        let mut state = self.state();
        if state.fail_apply_storage {
            return Err(Error::Cdp("evaluate: SecurityError".into()));
        }
        if state.origin() != snapshot.origin {
            return Err(Error::Session(format!(
                "storage origin {} does not match page origin {}",
                snapshot.origin,
                state.origin()
            )));
        }
        state.local_storage.extend(snapshot.local_storage.clone());
        state.session_storage.extend(snapshot.session_storage.clone());
        Ok(())
    }
}

/// Sink that keeps every interaction event for assertions.
#[derive(Default)]
pub struct CollectingSink {
    events: Mutex<Vec<InteractionEvent>>,
}

impl CollectingSink {
    pub fn events(&self) -> Vec<InteractionEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl DiagnosticSink for CollectingSink {
    fn record(&self, event: &InteractionEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
    }
}
