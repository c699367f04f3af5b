//! One shared browser process, one isolated browser context per platform.

use socialpilot_core::config::BrowserConfig;
use socialpilot_core::{Cookie, Error, Platform, Result, StorageSnapshot};
use socialpilot_storage::AccountSession;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::launch::BrowserProcess;
use crate::page::{CdpPage, PageControl};

/// What `acquire` has to do to hand out a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquirePlan {
    /// The cached context is alive and the process runs in the right mode.
    Reuse,
    /// The process is fine; open a fresh context (dropping a stale one).
    NewContext,
    /// The process runs in the other headful mode.
    Relaunch,
    /// No live process.
    Launch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Missing,
    Alive,
    Stale,
}

/// Decide how to satisfy an acquisition. `process` is `(connected, headful)`
/// of the running process, if any.
pub fn plan_acquire(process: Option<(bool, bool)>, headful: bool, context: ContextState) -> AcquirePlan {
    match process {
        None | Some((false, _)) => AcquirePlan::Launch,
        Some((true, running_headful)) if running_headful != headful => AcquirePlan::Relaunch,
        Some(_) => match context {
            ContextState::Alive => AcquirePlan::Reuse,
            ContextState::Missing | ContextState::Stale => AcquirePlan::NewContext,
        },
    }
}

struct PlatformContext {
    browser_context_id: Option<String>,
    page: Arc<CdpPage>,
}

pub struct ContextManager {
    config: BrowserConfig,
    profile_dir: PathBuf,
    process: Option<BrowserProcess>,
    /// `None` is the shared default page in the default browser context.
    contexts: HashMap<Option<Platform>, PlatformContext>,
    disconnected: Arc<AtomicBool>,
    watcher: Option<JoinHandle<()>>,
}

impl ContextManager {
    pub fn new(config: BrowserConfig, profile_dir: PathBuf) -> Self {
        Self {
            config,
            profile_dir,
            process: None,
            contexts: HashMap::new(),
            disconnected: Arc::new(AtomicBool::new(false)),
            watcher: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.process.as_ref().map(|p| p.is_connected()).unwrap_or(false)
    }

    /// Hand out the page for `platform`, creating whatever is missing.
    pub async fn acquire(&mut self, platform: Option<Platform>, headful: bool) -> Result<Arc<dyn PageControl>> {
        if self.disconnected.swap(false, Ordering::SeqCst) {
            warn!("Browser connection lost, discarding cached contexts");
            self.contexts.clear();
            self.process = None;
        }

        let process = self.process.as_ref().map(|p| (p.is_connected(), p.headful));
        let context = match self.contexts.get(&platform) {
            None => ContextState::Missing,
            Some(ctx) if ctx.page.ping().await => ContextState::Alive,
            Some(_) => ContextState::Stale,
        };
        let plan = plan_acquire(process, headful, context);
        debug!(platform = ?platform, headful = headful, plan = ?plan, "Acquiring page");

        match plan {
            AcquirePlan::Reuse => {
                if let Some(ctx) = self.contexts.get(&platform) {
                    let page: Arc<dyn PageControl> = ctx.page.clone();
                    return Ok(page);
                }
            }
            AcquirePlan::NewContext => {
                if let Some(stale) = self.contexts.remove(&platform) {
                    info!(platform = ?platform, "Recreating stale context");
                    self.dispose(stale).await;
                }
            }
            AcquirePlan::Relaunch => {
                info!(headful = headful, "Browser mode changed, relaunching");
                self.shutdown().await;
                self.launch(headful).await?;
            }
            AcquirePlan::Launch => {
                self.shutdown().await;
                self.launch(headful).await?;
            }
        }
        self.open_context(platform).await
    }

    async fn launch(&mut self, headful: bool) -> Result<()> {
        let process = BrowserProcess::launch(&self.config, &self.profile_dir, headful).await?;
        let mut closed = process.cdp.closed();
        let flag = self.disconnected.clone();
        self.watcher = Some(tokio::spawn(async move {
            while closed.changed().await.is_ok() {
                if *closed.borrow() {
                    warn!("Browser connection closed");
                    flag.store(true, Ordering::SeqCst);
                    break;
                }
            }
        }));
        self.process = Some(process);
        Ok(())
    }

    async fn open_context(&mut self, platform: Option<Platform>) -> Result<Arc<dyn PageControl>> {
        let process = self
            .process
            .as_ref()
            .ok_or_else(|| Error::Browser("no browser process".into()))?;
        let cdp = process.cdp.clone();
        let browser_context_id = match platform {
            Some(_) => Some(cdp.create_browser_context().await?),
            None => None,
        };
        let page = CdpPage::open(
            cdp,
            browser_context_id.clone(),
            (self.config.viewport_width, self.config.viewport_height),
            Duration::from_secs(self.config.navigation_timeout_secs),
        )
        .await?;
        let page = Arc::new(page);
        info!(platform = ?platform, context = ?browser_context_id, "Opened browser context");
        self.contexts.insert(
            platform,
            PlatformContext {
                browser_context_id,
                page: page.clone(),
            },
        );
        Ok(page)
    }

    async fn dispose(&self, ctx: PlatformContext) {
        if let Err(e) = ctx.page.close().await {
            debug!("closing page target failed: {}", e);
        }
        if let (Some(id), Some(process)) = (&ctx.browser_context_id, &self.process) {
            if let Err(e) = process.cdp.dispose_browser_context(id).await {
                debug!("disposing browser context failed: {}", e);
            }
        }
    }

    /// Dispose the platform's context; its cookies and storage go with it.
    pub async fn release(&mut self, platform: Option<Platform>) {
        if let Some(ctx) = self.contexts.remove(&platform) {
            info!(platform = ?platform, "Releasing browser context");
            self.dispose(ctx).await;
        }
    }

    /// Close every context and the browser process.
    pub async fn shutdown(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
        let contexts: Vec<PlatformContext> = self.contexts.drain().map(|(_, c)| c).collect();
        if let Some(process) = &self.process {
            if process.is_connected() {
                for ctx in contexts {
                    self.dispose(ctx).await;
                }
            }
        }
        if let Some(mut process) = self.process.take() {
            process.close().await;
            info!("Browser process closed");
        }
        self.disconnected.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HydrateReport {
    pub cookies: usize,
    /// Storage maps are in place (trivially true when the session has none).
    pub storage_applied: bool,
}

/// Load a persisted session into a page. Cookie failures are fatal; storage
/// can only be applied once the page sits on the captured origin, so callers
/// hydrate again after the first navigation.
pub async fn hydrate_page(page: &dyn PageControl, session: &AccountSession) -> Result<HydrateReport> {
    page.set_cookies(&session.cookies)
        .await
        .map_err(|e| Error::Session(format!("failed to restore cookies: {}", e)))?;

    let snapshot = session.storage();
    let storage_applied = if snapshot.is_empty() {
        true
    } else {
        match page.apply_storage(&snapshot).await {
            Ok(()) => true,
            Err(e) => {
                debug!(origin = %snapshot.origin, error = %e, "Storage not applied");
                false
            }
        }
    };

    debug!(
        platform = %session.platform,
        cookies = session.cookies.len(),
        storage_applied = storage_applied,
        "Session hydrated"
    );
    Ok(HydrateReport {
        cookies: session.cookies.len(),
        storage_applied,
    })
}

/// Read the cookie jar and the current origin's storage maps.
pub async fn capture_session(page: &dyn PageControl) -> Result<(Vec<Cookie>, StorageSnapshot)> {
    let cookies = page.cookies().await?;
    let storage = match page.storage().await {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "Could not read page storage, saving cookies only");
            StorageSnapshot::default()
        }
    };
    Ok((cookies, storage))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakePage;
    use socialpilot_storage::SessionMetadata;

    fn cookie(name: &str) -> Cookie {
        Cookie {
            name: name.into(),
            value: "v".into(),
            domain: ".instagram.com".into(),
            path: "/".into(),
            expires: None,
            http_only: true,
            secure: true,
            same_site: None,
        }
    }

    fn session(origin: &str) -> AccountSession {
        let mut local = HashMap::new();
        local.insert("token".to_string(), "abc".to_string());
        AccountSession {
            platform: Platform::Instagram,
            session_name: "default".into(),
            cookies: vec![cookie("sessionid"), cookie("csrftoken")],
            storage_origin: origin.into(),
            local_storage: local,
            session_storage: HashMap::new(),
            metadata: SessionMetadata::new(Some("me".into()), None),
        }
    }

    #[test]
    fn test_plan_launch_without_live_process() {
        assert_eq!(plan_acquire(None, false, ContextState::Missing), AcquirePlan::Launch);
        assert_eq!(
            plan_acquire(Some((false, false)), false, ContextState::Alive),
            AcquirePlan::Launch
        );
    }

    #[test]
    fn test_plan_relaunch_on_mode_change() {
        assert_eq!(
            plan_acquire(Some((true, false)), true, ContextState::Alive),
            AcquirePlan::Relaunch
        );
        assert_eq!(
            plan_acquire(Some((true, true)), false, ContextState::Missing),
            AcquirePlan::Relaunch
        );
    }

    #[test]
    fn test_plan_reuse_or_new_context() {
        assert_eq!(
            plan_acquire(Some((true, false)), false, ContextState::Alive),
            AcquirePlan::Reuse
        );
        assert_eq!(
            plan_acquire(Some((true, false)), false, ContextState::Missing),
            AcquirePlan::NewContext
        );
        assert_eq!(
            plan_acquire(Some((true, true)), true, ContextState::Stale),
            AcquirePlan::NewContext
        );
    }

    #[tokio::test]
    async fn test_hydrate_before_navigation_defers_storage() {
        let page = FakePage::new();
        let report = hydrate_page(&page, &session("https://www.instagram.com")).await.unwrap();
        assert_eq!(report.cookies, 2);
        assert!(!report.storage_applied);
        assert_eq!(page.cookie_names(), vec!["sessionid", "csrftoken"]);
    }

    #[tokio::test]
    async fn test_hydrate_is_idempotent_once_on_origin() {
        let page = FakePage::at("https://www.instagram.com/");
        let s = session("https://www.instagram.com");
        hydrate_page(&page, &s).await.unwrap();
        let report = hydrate_page(&page, &s).await.unwrap();
        assert!(report.storage_applied);
        assert_eq!(page.cookie_names().len(), 2);
        assert_eq!(page.local_storage().get("token").map(String::as_str), Some("abc"));
    }

    #[tokio::test]
    async fn test_cookie_failure_is_fatal() {
        let page = FakePage::at("https://www.instagram.com/");
        page.fail_set_cookies(true);
        let err = hydrate_page(&page, &session("https://www.instagram.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Session(_)));
    }

    #[tokio::test]
    async fn test_storage_failure_is_tolerated() {
        let page = FakePage::at("https://www.instagram.com/");
        page.fail_apply_storage(true);
        let report = hydrate_page(&page, &session("https://www.instagram.com"))
            .await
            .unwrap();
        assert!(!report.storage_applied);
    }

    #[tokio::test]
    async fn test_capture_reads_cookies_and_storage() {
        let page = FakePage::at("https://x.com/home");
        page.set_cookies_state(vec![cookie("auth_token")]);
        page.set_local_storage("theme", "dark");
        let (cookies, storage) = capture_session(&page).await.unwrap();
        assert_eq!(cookies.len(), 1);
        assert_eq!(storage.origin, "https://x.com");
        assert_eq!(storage.local_storage.get("theme").map(String::as_str), Some("dark"));
    }

    #[tokio::test]
    async fn test_release_without_context_is_noop() {
        let mut manager = ContextManager::new(BrowserConfig::default(), PathBuf::from("/tmp/unused"));
        manager.release(Some(Platform::X)).await;
        manager.shutdown().await;
        assert!(!manager.is_running());
    }
}
