//! The page-control handle: the primitive operations the interaction layer,
//! discovery and session hydration are written against, plus the CDP-backed
//! implementation.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use socialpilot_core::{Cookie, Error, Result, StorageSnapshot};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::cdp::{runtime_value, CdpClient};

/// One way of finding an element. Platform selector tables are ordered lists
/// of these; the interaction layer walks them in priority order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Locator {
    Css(String),
    XPath(String),
    /// Visible-text match, resolved by the interaction layer's ranking.
    Text(String),
}

impl Locator {
    pub fn css(selector: impl Into<String>) -> Self {
        Self::Css(selector.into())
    }

    pub fn xpath(expr: impl Into<String>) -> Self {
        Self::XPath(expr.into())
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Css(_) => "css",
            Self::XPath(_) => "xpath",
            Self::Text(_) => "text",
        }
    }

    pub fn query(&self) -> &str {
        match self {
            Self::Css(q) | Self::XPath(q) | Self::Text(q) => q,
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.query())
    }
}

/// Geometry and visibility of a located element, measured after it was
/// scrolled into view.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ElementBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub visible: bool,
    pub opacity: f64,
}

impl ElementBox {
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Non-zero size, not hidden, not fully transparent.
    pub fn is_interactable(&self) -> bool {
        self.width > 0.0 && self.height > 0.0 && self.visible && self.opacity > 0.0
    }
}

/// A short visible text on the page and a locator that addresses exactly
/// the element carrying it.
#[derive(Debug, Clone, PartialEq)]
pub struct TextCandidate {
    pub text: String,
    pub locator: Locator,
}

#[async_trait]
pub trait PageControl: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<()>;
    async fn reload(&self) -> Result<()>;
    async fn current_url(&self) -> Result<String>;
    /// Evaluate an expression and return its JSON value.
    async fn evaluate(&self, expression: &str) -> Result<Value>;

    /// Scroll the element into view and measure it. `None` when absent.
    async fn locate(&self, locator: &Locator) -> Result<Option<ElementBox>>;
    /// Whether a pointer event at `(x, y)` would land on the element rather
    /// than on an overlay.
    async fn hit_test(&self, locator: &Locator, x: f64, y: f64) -> Result<bool>;
    async fn click_at(&self, x: f64, y: f64) -> Result<()>;
    async fn click_native(&self, locator: &Locator) -> Result<bool>;
    async fn click_scripted(&self, locator: &Locator) -> Result<bool>;
    async fn focus(&self, locator: &Locator) -> Result<bool>;

    async fn text_candidates(&self) -> Result<Vec<TextCandidate>>;
    /// Text (or input value) of the first match.
    async fn element_text(&self, locator: &Locator) -> Result<Option<String>>;
    /// Texts of every match.
    async fn all_texts(&self, locator: &Locator) -> Result<Vec<String>>;
    /// Absolute `href` of every anchor on the page.
    async fn hrefs(&self) -> Result<Vec<String>>;

    async fn insert_text(&self, text: &str) -> Result<()>;
    /// Press a key spec such as `Enter`, `Control+Enter` or `Ctrl+A`.
    async fn press_key(&self, key: &str) -> Result<()>;
    async fn scroll_by(&self, dy: i64) -> Result<()>;

    async fn cookies(&self) -> Result<Vec<Cookie>>;
    async fn set_cookies(&self, cookies: &[Cookie]) -> Result<()>;
    async fn clear_cookies(&self) -> Result<()>;
    async fn storage(&self) -> Result<StorageSnapshot>;
    async fn apply_storage(&self, snapshot: &StorageSnapshot) -> Result<()>;
}

const RESOLVE_JS: &str = r#"function __spResolve(kind, query) {
  if (kind === 'css') { return document.querySelector(query); }
  if (kind === 'xpath') {
    return document.evaluate(query, document, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue;
  }
  const want = query.replace(/\s+/g, ' ').trim().toLowerCase();
  const nodes = document.querySelectorAll('button, a, [role="button"], [role="link"], span, div');
  for (const el of nodes) {
    const text = (el.innerText || '').replace(/\s+/g, ' ').trim().toLowerCase();
    if (text === want) { return el; }
  }
  return null;
}"#;

/// Wrap `body` so it runs with `el` bound to the locator's element; the
/// expression yields `null` when nothing matches.
fn with_element(locator: &Locator, body: &str) -> String {
    let kind = json!(locator.kind()).to_string();
    let query = json!(locator.query()).to_string();
    format!(
        "(function() {{ {} const el = __spResolve({}, {}); if (!el) return null; {} }})()",
        RESOLVE_JS, kind, query, body
    )
}

const TEXT_CANDIDATES_JS: &str = r#"(function() {
  document.querySelectorAll('[data-sp-ref]').forEach(e => e.removeAttribute('data-sp-ref'));
  const out = [];
  let idx = 0;
  const nodes = document.querySelectorAll('button, a, [role="button"], [role="link"], [role="menuitem"], span, div[tabindex]');
  for (const el of nodes) {
    const r = el.getBoundingClientRect();
    if (r.width === 0 || r.height === 0) continue;
    const text = (el.innerText || '').replace(/\s+/g, ' ').trim();
    if (!text || text.length > 80) continue;
    const reference = String(idx++);
    el.setAttribute('data-sp-ref', reference);
    out.push({ text: text, reference: reference });
  }
  return out;
})()"#;

const STORAGE_DUMP_JS: &str = r#"(function() {
  const dump = (s) => { const o = {}; for (let i = 0; i < s.length; i++) { const k = s.key(i); o[k] = s.getItem(k); } return o; };
  return { origin: location.origin, localStorage: dump(window.localStorage), sessionStorage: dump(window.sessionStorage) };
})()"#;

const HIDE_WEBDRIVER_JS: &str =
    "Object.defineProperty(navigator, 'webdriver', { get: () => undefined });";

/// A page target attached over a flattened CDP session.
pub struct CdpPage {
    cdp: Arc<CdpClient>,
    pub target_id: String,
    pub session_id: String,
    pub browser_context_id: Option<String>,
    navigation_timeout: Duration,
}

impl CdpPage {
    /// Open a fresh page target (inside `browser_context_id` when given) and
    /// prepare it for automation.
    pub async fn open(
        cdp: Arc<CdpClient>,
        browser_context_id: Option<String>,
        viewport: (u32, u32),
        navigation_timeout: Duration,
    ) -> Result<Self> {
        let target_id = cdp
            .create_target("about:blank", browser_context_id.as_deref())
            .await?;
        let session_id = cdp.attach_to_target(&target_id).await?;
        let page = Self {
            cdp,
            target_id,
            session_id,
            browser_context_id,
            navigation_timeout,
        };
        page.command("Page.enable", json!({})).await?;
        page.command("Runtime.enable", json!({})).await?;
        page.command("Network.enable", json!({})).await?;
        page.command(
            "Emulation.setDeviceMetricsOverride",
            json!({
                "width": viewport.0,
                "height": viewport.1,
                "deviceScaleFactor": 1,
                "mobile": false,
            }),
        )
        .await?;
        page.command(
            "Page.addScriptToEvaluateOnNewDocument",
            json!({"source": HIDE_WEBDRIVER_JS}),
        )
        .await?;
        debug!(target = %page.target_id, context = ?page.browser_context_id, "Page target ready");
        Ok(page)
    }

    async fn command(&self, method: &str, params: Value) -> Result<Value> {
        self.cdp
            .send_session_command(&self.session_id, method, params)
            .await
    }

    async fn eval_value(&self, expression: &str) -> Result<Value> {
        let response = self
            .command(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;
        runtime_value(&response)
    }

    async fn eval_bool(&self, expression: &str) -> Result<bool> {
        Ok(self.eval_value(expression).await?.as_bool().unwrap_or(false))
    }

    /// Cheap liveness probe used before reusing a cached page.
    pub async fn ping(&self) -> bool {
        if !self.cdp.is_connected() {
            return false;
        }
        matches!(
            tokio::time::timeout(Duration::from_secs(5), self.eval_value("1")).await,
            Ok(Ok(_))
        )
    }

    pub async fn close(&self) -> Result<()> {
        self.cdp.close_target(&self.target_id).await
    }

    async fn mouse(&self, kind: &str, x: f64, y: f64, click_count: i32) -> Result<()> {
        self.command(
            "Input.dispatchMouseEvent",
            json!({
                "type": kind,
                "x": x,
                "y": y,
                "button": "left",
                "clickCount": click_count,
            }),
        )
        .await?;
        Ok(())
    }

    async fn key_event(&self, kind: &str, spec: &KeySpec) -> Result<()> {
        let mut params = json!({
            "type": kind,
            "key": spec.key,
            "code": spec.code,
        });
        if spec.modifiers != 0 {
            params["modifiers"] = json!(spec.modifiers);
        }
        if let Some(vk) = spec.virtual_key_code {
            params["windowsVirtualKeyCode"] = json!(vk);
        }
        if kind == "keyDown" {
            if let Some(text) = &spec.text {
                params["text"] = json!(text);
            }
        }
        self.command("Input.dispatchKeyEvent", params).await?;
        Ok(())
    }
}

#[async_trait]
impl PageControl for CdpPage {
    async fn navigate(&self, url: &str) -> Result<()> {
        let mut load = self
            .cdp
            .subscribe_event(Some(&self.session_id), "Page.loadEventFired")
            .await;
        let result = self.command("Page.navigate", json!({"url": url})).await?;
        if let Some(err) = result.get("errorText").and_then(|v| v.as_str()) {
            if !err.is_empty() {
                return Err(Error::Navigation(format!("{}: {}", url, err)));
            }
        }
        match tokio::time::timeout(self.navigation_timeout, load.recv()).await {
            Ok(Some(_)) => Ok(()),
            Ok(None) => Err(Error::Navigation(format!("{}: connection closed", url))),
            Err(_) => Err(Error::Timeout(format!(
                "navigation to {} exceeded {}s",
                url,
                self.navigation_timeout.as_secs()
            ))),
        }
    }

    async fn reload(&self) -> Result<()> {
        let mut load = self
            .cdp
            .subscribe_event(Some(&self.session_id), "Page.loadEventFired")
            .await;
        self.command("Page.reload", json!({})).await?;
        match tokio::time::timeout(self.navigation_timeout, load.recv()).await {
            Ok(Some(_)) => Ok(()),
            Ok(None) => Err(Error::Navigation("reload: connection closed".into())),
            Err(_) => Err(Error::Timeout("reload exceeded navigation timeout".into())),
        }
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self
            .eval_value("location.href")
            .await?
            .as_str()
            .unwrap_or_default()
            .to_string())
    }

    async fn evaluate(&self, expression: &str) -> Result<Value> {
        self.eval_value(expression).await
    }

    async fn locate(&self, locator: &Locator) -> Result<Option<ElementBox>> {
        let js = with_element(
            locator,
            concat!(
                "el.scrollIntoView({block: 'center', inline: 'center'});",
                " const r = el.getBoundingClientRect(); const s = window.getComputedStyle(el);",
                " return {x: r.left, y: r.top, width: r.width, height: r.height,",
                " visible: s.display !== 'none' && s.visibility !== 'hidden',",
                " opacity: parseFloat(s.opacity || '1')};"
            ),
        );
        let value = self.eval_value(&js).await?;
        if value.is_null() {
            return Ok(None);
        }
        Ok(serde_json::from_value(value).ok())
    }

    async fn hit_test(&self, locator: &Locator, x: f64, y: f64) -> Result<bool> {
        let body = format!(
            "const hit = document.elementFromPoint({}, {}); return !!hit && (hit === el || el.contains(hit));",
            x, y
        );
        self.eval_bool(&with_element(locator, &body)).await
    }

    async fn click_at(&self, x: f64, y: f64) -> Result<()> {
        self.mouse("mouseMoved", x, y, 0).await?;
        self.mouse("mousePressed", x, y, 1).await?;
        self.mouse("mouseReleased", x, y, 1).await?;
        Ok(())
    }

    async fn click_native(&self, locator: &Locator) -> Result<bool> {
        self.eval_bool(&with_element(locator, "el.click(); return true;"))
            .await
    }

    async fn click_scripted(&self, locator: &Locator) -> Result<bool> {
        let body = concat!(
            "for (const t of ['pointerdown', 'mousedown', 'pointerup', 'mouseup', 'click']) {",
            " el.dispatchEvent(new MouseEvent(t, {bubbles: true, cancelable: true, view: window})); }",
            " return true;"
        );
        self.eval_bool(&with_element(locator, body)).await
    }

    async fn focus(&self, locator: &Locator) -> Result<bool> {
        self.eval_bool(&with_element(
            locator,
            "el.scrollIntoView({block: 'center'}); el.focus(); return true;",
        ))
        .await
    }

    async fn text_candidates(&self) -> Result<Vec<TextCandidate>> {
        #[derive(Deserialize)]
        struct Raw {
            text: String,
            reference: String,
        }
        let value = self.eval_value(TEXT_CANDIDATES_JS).await?;
        let raw: Vec<Raw> = serde_json::from_value(value).unwrap_or_default();
        Ok(raw
            .into_iter()
            .map(|r| TextCandidate {
                text: r.text,
                locator: Locator::Css(format!("[data-sp-ref=\"{}\"]", r.reference)),
            })
            .collect())
    }

    async fn element_text(&self, locator: &Locator) -> Result<Option<String>> {
        let body = concat!(
            "if (el.tagName === 'INPUT' || el.tagName === 'TEXTAREA') return el.value;",
            " return el.innerText || el.textContent || '';"
        );
        let value = self.eval_value(&with_element(locator, body)).await?;
        Ok(value.as_str().map(str::to_string))
    }

    async fn all_texts(&self, locator: &Locator) -> Result<Vec<String>> {
        let kind = json!(locator.kind()).to_string();
        let query = json!(locator.query()).to_string();
        let js = format!(
            r#"(function() {{
  {}
  const kind = {}, query = {};
  let nodes = [];
  if (kind === 'css') {{ nodes = Array.from(document.querySelectorAll(query)); }}
  else if (kind === 'xpath') {{
    const snap = document.evaluate(query, document, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null);
    for (let i = 0; i < snap.snapshotLength; i++) nodes.push(snap.snapshotItem(i));
  }} else {{ const el = __spResolve(kind, query); if (el) nodes.push(el); }}
  return nodes.map(n => (n.innerText || n.textContent || '').trim()).filter(t => t.length > 0);
}})()"#,
            RESOLVE_JS, kind, query
        );
        let value = self.eval_value(&js).await?;
        Ok(serde_json::from_value(value).unwrap_or_default())
    }

    async fn hrefs(&self) -> Result<Vec<String>> {
        let value = self
            .eval_value("Array.from(document.querySelectorAll('a[href]')).map(a => a.href)")
            .await?;
        Ok(serde_json::from_value(value).unwrap_or_default())
    }

    async fn insert_text(&self, text: &str) -> Result<()> {
        self.command("Input.insertText", json!({"text": text})).await?;
        Ok(())
    }

    async fn press_key(&self, key: &str) -> Result<()> {
        let spec = parse_key_spec(key);
        self.key_event("keyDown", &spec).await?;
        self.key_event("keyUp", &spec).await?;
        Ok(())
    }

    async fn scroll_by(&self, dy: i64) -> Result<()> {
        self.eval_value(&format!("window.scrollBy(0, {}); true", dy))
            .await?;
        Ok(())
    }

    async fn cookies(&self) -> Result<Vec<Cookie>> {
        let result = match &self.browser_context_id {
            Some(ctx) => {
                self.cdp
                    .send_command("Storage.getCookies", json!({"browserContextId": ctx}))
                    .await?
            }
            None => self.command("Network.getAllCookies", json!({})).await?,
        };
        let raw = result.get("cookies").cloned().unwrap_or(json!([]));
        serde_json::from_value(raw).map_err(|e| Error::Cdp(format!("cookie decode: {}", e)))
    }

    async fn set_cookies(&self, cookies: &[Cookie]) -> Result<()> {
        if cookies.is_empty() {
            return Ok(());
        }
        let params: Vec<Value> = cookies.iter().map(cookie_param).collect();
        match &self.browser_context_id {
            Some(ctx) => {
                self.cdp
                    .send_command(
                        "Storage.setCookies",
                        json!({"cookies": params, "browserContextId": ctx}),
                    )
                    .await?;
            }
            None => {
                self.command("Network.setCookies", json!({"cookies": params}))
                    .await?;
            }
        }
        Ok(())
    }

    async fn clear_cookies(&self) -> Result<()> {
        match &self.browser_context_id {
            Some(ctx) => {
                self.cdp
                    .send_command("Storage.clearCookies", json!({"browserContextId": ctx}))
                    .await?;
            }
            None => {
                self.command("Network.clearBrowserCookies", json!({}))
                    .await?;
            }
        }
        Ok(())
    }

    async fn storage(&self) -> Result<StorageSnapshot> {
        let value = self.eval_value(STORAGE_DUMP_JS).await?;
        serde_json::from_value(value).map_err(|e| Error::Cdp(format!("storage decode: {}", e)))
    }

    async fn apply_storage(&self, snapshot: &StorageSnapshot) -> Result<()> {
        let snap = serde_json::to_string(snapshot)?;
        let js = format!(
            r#"(function(snap) {{
  if (snap.origin && snap.origin !== location.origin) return 'origin mismatch: ' + location.origin;
  for (const [k, v] of Object.entries(snap.localStorage || {{}})) localStorage.setItem(k, v);
  for (const [k, v] of Object.entries(snap.sessionStorage || {{}})) sessionStorage.setItem(k, v);
  return 'ok';
}})({})"#,
            snap
        );
        match self.eval_value(&js).await?.as_str() {
            Some("ok") => Ok(()),
            Some(other) => Err(Error::Session(other.to_string())),
            None => Err(Error::Session("storage write returned nothing".into())),
        }
    }
}

/// CDP `CookieParam` for a stored cookie. Session cookies carry no expiry.
fn cookie_param(cookie: &Cookie) -> Value {
    let mut param = json!({
        "name": cookie.name,
        "value": cookie.value,
        "domain": cookie.domain,
        "path": cookie.path,
        "httpOnly": cookie.http_only,
        "secure": cookie.secure,
    });
    if let Some(expires) = cookie.expires.filter(|e| *e > 0.0) {
        param["expires"] = json!(expires);
    }
    if let Some(same_site) = &cookie.same_site {
        param["sameSite"] = json!(same_site);
    }
    param
}

#[derive(Debug, Clone, PartialEq)]
struct KeySpec {
    key: String,
    code: String,
    modifiers: i32,
    text: Option<String>,
    virtual_key_code: Option<i32>,
}

/// Parse a key specification like "Enter", "Tab", "Ctrl+A", "Meta+Enter".
fn parse_key_spec(spec: &str) -> KeySpec {
    let parts: Vec<&str> = spec.split('+').collect();
    let mut modifiers = 0i32;
    let main_key = if parts.len() > 1 {
        for part in &parts[..parts.len() - 1] {
            match part.to_lowercase().as_str() {
                "ctrl" | "control" => modifiers |= 2,
                "alt" | "option" => modifiers |= 1,
                "shift" => modifiers |= 8,
                "meta" | "cmd" | "command" => modifiers |= 4,
                _ => {}
            }
        }
        parts.last().copied().unwrap_or(spec).to_string()
    } else {
        spec.to_string()
    };

    let (code, text, vk) = match main_key.as_str() {
        "Enter" | "Return" => ("Enter".to_string(), Some("\r".to_string()), Some(13)),
        "Tab" => ("Tab".to_string(), None, Some(9)),
        "Escape" | "Esc" => ("Escape".to_string(), None, Some(27)),
        "Backspace" => ("Backspace".to_string(), None, Some(8)),
        "Delete" => ("Delete".to_string(), None, Some(46)),
        "ArrowDown" | "Down" => ("ArrowDown".to_string(), None, Some(40)),
        "ArrowUp" | "Up" => ("ArrowUp".to_string(), None, Some(38)),
        "End" => ("End".to_string(), None, Some(35)),
        "PageDown" => ("PageDown".to_string(), None, Some(34)),
        "Space" | " " => ("Space".to_string(), Some(" ".to_string()), Some(32)),
        other if other.chars().count() == 1 => {
            let upper = other.to_uppercase();
            let vk = upper.chars().next().map(|c| c as i32);
            // Chords like Ctrl+A must not also type the character.
            let text = if modifiers & (2 | 4) == 0 {
                Some(other.to_string())
            } else {
                None
            };
            (format!("Key{}", upper), text, vk)
        }
        other => (other.to_string(), None, None),
    };

    let key = match main_key.as_str() {
        "Return" => "Enter".to_string(),
        "Esc" => "Escape".to_string(),
        "Down" => "ArrowDown".to_string(),
        "Up" => "ArrowUp".to_string(),
        "Space" => " ".to_string(),
        other => other.to_string(),
    };

    KeySpec {
        key,
        code,
        modifiers,
        text,
        virtual_key_code: vk,
    }
}
