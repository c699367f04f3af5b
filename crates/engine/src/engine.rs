//! Single entry point: one [`InvocationRequest`] in, one [`InvocationResult`] out.

use socialpilot_browser::{capture_session, ContextManager, PageControl};
use socialpilot_core::{
    ActionKind, CandidateItem, Command, Config, Error, InvocationRequest, InvocationResult, Paths,
    Platform, Result, RunOutcome,
};
use socialpilot_storage::{AccountSession, SessionMetadata, SessionStore};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::actor::{normalize_handle, BrowserActor, SessionBinding};
use crate::auth::Authenticator;
use crate::dedup::DuplicateActionCache;
use crate::discovery::{CandidateSource, Discovery, RunContext};
use crate::generator::{CommentGenerator, FixedComment, OpenAiCommentGenerator};
use crate::orchestrator::{Orchestrator, RunPlan, SingleItem};
use crate::platform::profile;

pub struct Engine {
    config: Config,
    paths: Paths,
    sessions: SessionStore,
    browser: Mutex<ContextManager>,
    generator: Option<Arc<dyn CommentGenerator>>,
    cancel: CancellationToken,
}

impl Engine {
    pub fn new(config: Config, paths: Paths) -> Self {
        let browser = ContextManager::new(config.browser.clone(), paths.browser_profile_dir());
        Self {
            sessions: SessionStore::new(paths.clone()),
            browser: Mutex::new(browser),
            config,
            paths,
            generator: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Use `generator` for AI comments instead of the configured HTTP backend.
    pub fn with_generator(mut self, generator: Arc<dyn CommentGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Cancelling this token stops running action loops between candidates.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub async fn execute(&self, request: InvocationRequest) -> InvocationResult {
        info!(
            platform = %request.platform,
            action = request.action.as_str(),
            session = %request.session_name,
            "Executing request"
        );
        match self.dispatch(&request).await {
            Ok(result) => result,
            Err(e) => {
                warn!(action = request.action.as_str(), error = %e, "Request failed");
                InvocationResult::failed(e.to_string())
            }
        }
    }

    async fn dispatch(&self, request: &InvocationRequest) -> Result<InvocationResult> {
        match request.action {
            Command::Login => self.login(request).await,
            Command::CheckSession => self.check_session(request).await,
            Command::Logout => self.logout(request).await,
            Command::Discover => self.discover(request).await,
            Command::AutoComment | Command::Comment => self.run_actions(request, ActionKind::Comment).await,
            Command::Like => self.run_actions(request, ActionKind::Like).await,
            Command::Follow => self.run_actions(request, ActionKind::Follow).await,
        }
    }

    /// The manager lock is held only while acquiring.
    async fn page(&self, platform: Platform, headful: bool) -> Result<Arc<dyn PageControl>> {
        let mut browser = self.browser.lock().await;
        browser.acquire(Some(platform), headful).await
    }

    fn authenticator(&self, page: Arc<dyn PageControl>, platform: Platform) -> Authenticator {
        Authenticator::new(page, platform, self.config.auth.clone())
    }

    async fn login(&self, request: &InvocationRequest) -> Result<InvocationResult> {
        let platform = request.platform;
        let username = request.username.as_deref().unwrap_or("").trim();
        let password = request.password.as_deref().unwrap_or("");
        if username.is_empty() || password.is_empty() {
            return Err(Error::Credentials("username and password are required".into()));
        }

        let page = self.page(platform, request.headful).await?;
        let auth = self.authenticator(page.clone(), platform);

        let restored = match self.sessions.load(platform, &request.session_name) {
            Some(session) => auth.restore(&session).await?,
            None => false,
        };
        if !restored {
            auth.login(username, password).await?;
        }

        let account = self.config.account(platform, &request.session_name);
        let handle = account
            .and_then(|a| a.handle.clone())
            .or_else(|| handle_from_username(username));
        if handle.is_none() {
            warn!(platform = %platform, "Login name is not a handle; duplicate checks will rely on the page");
        }
        let assistant_id = account.and_then(|a| a.assistant_id.clone());
        let (cookies, storage) = capture_session(page.as_ref()).await?;
        let shown = handle.clone().unwrap_or_else(|| username.to_string());
        self.sessions.save(
            platform,
            &request.session_name,
            cookies,
            storage,
            SessionMetadata::new(handle, assistant_id),
        )?;

        Ok(InvocationResult::ok(if restored {
            format!("Already logged in to {} as {}", platform, shown)
        } else {
            format!("Logged in to {} as {}", platform, shown)
        }))
    }

    async fn check_session(&self, request: &InvocationRequest) -> Result<InvocationResult> {
        let platform = request.platform;
        let Some(session) = self.sessions.load(platform, &request.session_name) else {
            return Ok(InvocationResult::failed(format!(
                "No saved {} session '{}'",
                platform, request.session_name
            )));
        };
        let page = self.page(platform, request.headful).await?;
        if self.authenticator(page, platform).restore(&session).await? {
            Ok(InvocationResult::ok(format!("{} session '{}' is valid", platform, request.session_name)))
        } else {
            Ok(InvocationResult::failed(format!(
                "{} session '{}' has expired, log in again",
                platform, request.session_name
            )))
        }
    }

    async fn logout(&self, request: &InvocationRequest) -> Result<InvocationResult> {
        let removed = self.sessions.delete(request.platform, &request.session_name)?;
        self.browser.lock().await.release(Some(request.platform)).await;
        Ok(InvocationResult::ok(if removed {
            format!("Logged out of {} session '{}'", request.platform, request.session_name)
        } else {
            format!("No saved {} session '{}'", request.platform, request.session_name)
        }))
    }

    /// Load the saved session into the platform page and require that it
    /// still logs in.
    async fn logged_in_page(&self, request: &InvocationRequest) -> Result<(Arc<dyn PageControl>, AccountSession)> {
        let platform = request.platform;
        let session = self.sessions.load(platform, &request.session_name).ok_or_else(|| {
            Error::Auth(format!(
                "no saved {} session '{}', run login first",
                platform, request.session_name
            ))
        })?;
        let page = self.page(platform, request.headful).await?;
        if !self.authenticator(page.clone(), platform).restore(&session).await? {
            return Err(Error::Auth(format!(
                "{} session '{}' has expired",
                platform, request.session_name
            )));
        }
        Ok((page, session))
    }

    async fn discover(&self, request: &InvocationRequest) -> Result<InvocationResult> {
        if request.search_criteria.is_empty() {
            return Err(Error::Validation("a hashtag or keywords are required".into()));
        }
        let (page, _) = self.logged_in_page(request).await?;
        let items = Discovery::new(page, request.platform, self.config.discovery.clone())
            .discover(&request.search_criteria, request.max_posts, &mut RunContext::new())
            .await?;
        let mut result = InvocationResult::ok(format!("Discovered {} candidates", items.len()));
        result.results = items.into_iter().map(|c| RunOutcome::succeeded(c.url)).collect();
        Ok(result)
    }

    fn resolve_handle(&self, request: &InvocationRequest, session: &AccountSession) -> Option<String> {
        self.config
            .account(request.platform, &request.session_name)
            .and_then(|a| a.handle.clone())
            .or_else(|| session.metadata.handle.clone())
    }

    fn resolve_assistant(&self, request: &InvocationRequest, session: &AccountSession) -> Option<String> {
        self.config
            .account(request.platform, &request.session_name)
            .and_then(|a| a.assistant_id.clone())
            .or_else(|| session.metadata.assistant_id.clone())
    }

    fn comment_generator(&self, request: &InvocationRequest, kind: ActionKind) -> Result<Arc<dyn CommentGenerator>> {
        if kind != ActionKind::Comment {
            return Ok(Arc::new(FixedComment(String::new())));
        }
        if request.use_ai {
            if let Some(generator) = &self.generator {
                return Ok(generator.clone());
            }
            return Ok(Arc::new(OpenAiCommentGenerator::new(self.config.generator.clone())?));
        }
        match request.comment.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => Ok(Arc::new(FixedComment(text.to_string()))),
            _ => Err(Error::Validation("comment text is required when useAI is off".into())),
        }
    }

    async fn run_actions(&self, request: &InvocationRequest, kind: ActionKind) -> Result<InvocationResult> {
        let platform = request.platform;
        let single = match request.target_url.as_deref() {
            Some(url) => Some(
                profile(platform)
                    .canonical_item_url(url)
                    .ok_or_else(|| Error::Validation(format!("'{}' is not a {} item URL", url, platform)))?,
            ),
            None => None,
        };
        if single.is_none() && request.search_criteria.is_empty() {
            return Err(Error::Validation(
                "a hashtag, keywords or targetUrl is required".into(),
            ));
        }
        let target = if single.is_some() { 1 } else { request.max_posts };
        if target == 0 {
            return Err(Error::Validation("maxPosts must be at least 1".into()));
        }
        let generator = self.comment_generator(request, kind)?;

        let (page, session) = self.logged_in_page(request).await?;
        let handle = self.resolve_handle(request, &session);
        let assistant_id = self.resolve_assistant(request, &session);

        let source: Box<dyn CandidateSource> = match single {
            Some(url) => Box::new(SingleItem::new(CandidateItem::new(platform, url))),
            None => Box::new(Discovery::new(page.clone(), platform, self.config.discovery.clone())),
        };
        let binding = SessionBinding {
            store: self.sessions.clone(),
            session_name: request.session_name.clone(),
            metadata: SessionMetadata::new(handle.clone(), assistant_id.clone()),
        };
        let actor = BrowserActor::new(page, platform)
            .with_handle(handle.clone())
            .with_session(binding);
        let actor = Arc::new(actor);

        let plan = RunPlan {
            platform,
            kind,
            target,
            criteria: request.search_criteria.clone(),
            handle: actor.handle().map(str::to_string),
            assistant_id,
        };
        let mut orchestrator = Orchestrator::new(
            self.config.orchestrator.clone(),
            source,
            actor,
            generator,
            DuplicateActionCache::open(self.paths.clone()),
        )
        .with_cancellation(self.cancel.child_token());

        let report = orchestrator.run(&plan, &mut RunContext::new()).await?;
        Ok(InvocationResult::from_outcomes(
            target,
            report.outcomes,
            report.termination.note(),
        ))
    }

    /// Close every browser context and the browser process.
    pub async fn shutdown(&self) {
        self.browser.lock().await.shutdown().await;
    }
}

/// The account handle implied by a login name. Emails and phone numbers
/// never appear as reply authors, so they give `None`.
fn handle_from_username(username: &str) -> Option<String> {
    let name = username.trim().trim_start_matches('@');
    if name.is_empty() || name.contains('@') {
        return None;
    }
    let digits = name.trim_start_matches('+');
    if digits
        .chars()
        .all(|c| c.is_ascii_digit() || c == ' ' || c == '-')
        && digits.chars().any(|c| c.is_ascii_digit())
    {
        return None;
    }
    Some(normalize_handle(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use socialpilot_core::SearchCriteria;
    use tempfile::TempDir;

    #[test]
    fn test_handle_from_username() {
        assert_eq!(handle_from_username("@RustDev").as_deref(), Some("rustdev"));
        assert_eq!(handle_from_username(" rust_dev ").as_deref(), Some("rust_dev"));
        assert_eq!(handle_from_username("user2024").as_deref(), Some("user2024"));
        assert_eq!(handle_from_username("me@example.com"), None);
        assert_eq!(handle_from_username("@me@example.com"), None);
        assert_eq!(handle_from_username("15551234567"), None);
        assert_eq!(handle_from_username("+1 555-123-4567"), None);
        assert_eq!(handle_from_username("@"), None);
    }

    fn engine(dir: &TempDir) -> Engine {
        Engine::new(Config::default(), Paths::with_base(dir.path().to_path_buf()))
    }

    #[tokio::test]
    async fn test_login_requires_credentials() {
        let dir = TempDir::new().unwrap();
        let mut request = InvocationRequest::new(Platform::Instagram, Command::Login);
        request.username = Some("rustacean".into());
        let result = engine(&dir).execute(request).await;
        assert!(!result.ok);
        assert!(result.message.contains("username and password"));
    }

    #[tokio::test]
    async fn test_check_session_without_saved_session() {
        let dir = TempDir::new().unwrap();
        let result = engine(&dir)
            .execute(InvocationRequest::new(Platform::X, Command::CheckSession))
            .await;
        assert!(!result.ok);
        assert!(result.message.contains("No saved x session"));
    }

    #[tokio::test]
    async fn test_logout_deletes_session() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        engine
            .sessions()
            .save(
                Platform::Tiktok,
                "default",
                Vec::new(),
                Default::default(),
                SessionMetadata::new(Some("me".into()), None),
            )
            .unwrap();

        let result = engine
            .execute(InvocationRequest::new(Platform::Tiktok, Command::Logout))
            .await;
        assert!(result.ok, "{}", result.message);
        assert!(!engine.sessions().exists(Platform::Tiktok, "default"));

        let again = engine
            .execute(InvocationRequest::new(Platform::Tiktok, Command::Logout))
            .await;
        assert!(again.ok);
        assert!(again.message.starts_with("No saved"));
    }

    #[tokio::test]
    async fn test_action_requests_are_validated_before_browser_work() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);

        let result = engine
            .execute(InvocationRequest::new(Platform::Instagram, Command::AutoComment))
            .await;
        assert!(!result.ok);
        assert!(result.message.contains("hashtag"));

        let mut request = InvocationRequest::new(Platform::Instagram, Command::Comment);
        request.search_criteria = SearchCriteria::hashtag("rust");
        let result = engine.execute(request).await;
        assert!(result.message.contains("comment text is required"));

        let mut request = InvocationRequest::new(Platform::X, Command::Like);
        request.target_url = Some("https://example.com/not-a-post".into());
        let result = engine.execute(request).await;
        assert!(result.message.contains("not a x item URL"));
    }

    #[tokio::test]
    async fn test_actions_need_a_saved_session() {
        let dir = TempDir::new().unwrap();
        let mut request = InvocationRequest::new(Platform::Instagram, Command::Like);
        request.search_criteria = SearchCriteria::hashtag("rust");
        let result = engine(&dir).execute(request).await;
        assert!(!result.ok);
        assert!(result.message.contains("run login first"));
    }
}
