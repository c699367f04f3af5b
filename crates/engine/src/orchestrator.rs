//! The per-invocation action loop.
//!
//! Each candidate moves through discovery, filtering, generation, acting,
//! verifying and recording, and always ends as exactly one [`RunOutcome`].
//! The loop runs until the success target is met, discovery stops producing
//! new candidates, the attempt ceiling is hit, or the run is cancelled.

use async_trait::async_trait;
use socialpilot_core::config::OrchestratorConfig;
use socialpilot_core::{
    ActionKind, CandidateItem, Platform, Result, RunOutcome, SearchCriteria, SkipReason,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::actor::{ItemActor, Verification};
use crate::dedup::DuplicateActionCache;
use crate::discovery::{CandidateSource, RunContext};
use crate::generator::{normalize_dashes, CommentGenerator};

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    TargetReached,
    /// Too many consecutive discovery rounds without a new candidate.
    Exhausted,
    AttemptCeiling,
    Cancelled,
}

impl Termination {
    /// Short note for the summary message; `None` when the run completed.
    pub fn note(&self) -> Option<&'static str> {
        match self {
            Self::TargetReached => None,
            Self::Exhausted => Some("no more candidates"),
            Self::AttemptCeiling => Some("attempt limit reached"),
            Self::Cancelled => Some("cancelled"),
        }
    }
}

/// What one invocation should do.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub platform: Platform,
    pub kind: ActionKind,
    pub target: usize,
    pub criteria: SearchCriteria,
    /// Account handle for authorship checks; inferred from the page if unset.
    pub handle: Option<String>,
    pub assistant_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub outcomes: Vec<RunOutcome>,
    pub successes: usize,
    pub termination: Termination,
}

/// Yields one known item once, for runs aimed at a specific URL.
pub struct SingleItem {
    item: Option<CandidateItem>,
}

impl SingleItem {
    pub fn new(item: CandidateItem) -> Self {
        Self { item: Some(item) }
    }
}

#[async_trait]
impl CandidateSource for SingleItem {
    async fn next_batch(
        &mut self,
        _criteria: &SearchCriteria,
        _want: usize,
        ctx: &mut RunContext,
    ) -> Result<Vec<CandidateItem>> {
        Ok(self
            .item
            .take()
            .filter(|item| ctx.discovered.insert(item.url.clone()))
            .into_iter()
            .collect())
    }
}

pub struct Orchestrator {
    config: OrchestratorConfig,
    source: Box<dyn CandidateSource>,
    actor: Arc<dyn ItemActor>,
    generator: Arc<dyn CommentGenerator>,
    cache: DuplicateActionCache,
    cancel: Option<CancellationToken>,
}

/// Result of pushing one candidate through the pipeline. `touched` is false
/// when the item page was never opened, so no cooldown is owed.
struct Processed {
    outcome: RunOutcome,
    touched: bool,
}

impl Processed {
    fn skip(url: &str, reason: SkipReason, touched: bool) -> Self {
        Self {
            outcome: RunOutcome::skipped(url, reason),
            touched,
        }
    }

    fn fail(url: &str, error: impl Into<String>) -> Self {
        Self {
            outcome: RunOutcome::failed(url, error),
            touched: true,
        }
    }
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        source: Box<dyn CandidateSource>,
        actor: Arc<dyn ItemActor>,
        generator: Arc<dyn CommentGenerator>,
        cache: DuplicateActionCache,
    ) -> Self {
        Self {
            config,
            source,
            actor,
            generator,
            cache,
            cancel: None,
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().map(|t| t.is_cancelled()).unwrap_or(false)
    }

    async fn cooldown(&self) {
        if self.config.cooldown_ms == 0 {
            return;
        }
        let pause = tokio::time::sleep(Duration::from_millis(self.config.cooldown_ms));
        match &self.cancel {
            Some(token) => {
                tokio::select! {
                    _ = pause => {}
                    _ = token.cancelled() => {}
                }
            }
            None => pause.await,
        }
    }

    /// Drive the loop. Only fatal errors (authentication, browser launch)
    /// escape; everything else becomes a failed outcome.
    pub async fn run(&mut self, plan: &RunPlan, ctx: &mut RunContext) -> Result<RunReport> {
        info!(
            run = %ctx.run_id,
            platform = %plan.platform,
            kind = %plan.kind,
            target = plan.target,
            "Starting run"
        );
        let mut outcomes = Vec::new();
        let mut successes = 0usize;
        let mut attempts = 0u32;
        let mut empty_rounds = 0u32;

        let termination = 'run: loop {
            if successes >= plan.target {
                break Termination::TargetReached;
            }
            if self.is_cancelled() {
                break Termination::Cancelled;
            }

            let want = plan.target - successes;
            let batch = match self.source.next_batch(&plan.criteria, want, ctx).await {
                Ok(batch) => batch,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(error = %e, "Discovery round failed");
                    Vec::new()
                }
            };
            let mut fresh: Vec<CandidateItem> = batch
                .into_iter()
                .filter(|c| !ctx.processed.contains(&c.url))
                .collect();
            // Leftovers beyond what is still needed stay eligible for later rounds.
            for leftover in fresh.iter().skip(want) {
                ctx.discovered.remove(&leftover.url);
            }
            fresh.truncate(want);

            if fresh.is_empty() {
                empty_rounds += 1;
                debug!(empty_rounds = empty_rounds, "Discovery round yielded nothing new");
                if empty_rounds >= self.config.max_empty_discoveries {
                    break Termination::Exhausted;
                }
                continue;
            }
            empty_rounds = 0;

            for item in fresh {
                if successes >= plan.target {
                    break;
                }
                if self.is_cancelled() {
                    break 'run Termination::Cancelled;
                }
                if attempts >= self.config.max_attempts {
                    warn!(attempts = attempts, "Attempt ceiling reached");
                    break 'run Termination::AttemptCeiling;
                }

                ctx.processed.insert(item.url.clone());
                let processed = self.process(plan, &item, ctx).await?;
                let outcome = processed.outcome;
                if !outcome.is_skip() {
                    attempts += 1;
                }
                if outcome.success {
                    successes += 1;
                }
                info!(
                    url = %outcome.item_url,
                    success = outcome.success,
                    skipped = ?outcome.skipped_reason,
                    error = ?outcome.error,
                    successes = successes,
                    "Candidate finished"
                );
                outcomes.push(outcome);

                if processed.touched && successes < plan.target {
                    self.cooldown().await;
                }
            }
        };

        info!(
            run = %ctx.run_id,
            successes = successes,
            outcomes = outcomes.len(),
            termination = ?termination,
            "Run finished"
        );
        Ok(RunReport {
            outcomes,
            successes,
            termination,
        })
    }

    async fn process(&mut self, plan: &RunPlan, item: &CandidateItem, ctx: &mut RunContext) -> Result<Processed> {
        let url = item.url.as_str();
        let kind = plan.kind;

        if self.cache.is_recorded(plan.platform, kind, url) {
            debug!(url = %url, "Already acted according to ledger");
            return Ok(Processed::skip(url, SkipReason::AlreadyActed, false));
        }

        let snapshot = match self.actor.open(item).await {
            Ok(s) => s,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => return Ok(Processed::fail(url, e.to_string())),
        };

        if self
            .cache
            .has_acted(plan.platform, kind, url, plan.handle.as_deref(), self.actor.verifier())
            .await
        {
            return Ok(Processed::skip(url, SkipReason::AlreadyActed, true));
        }

        let comment = if kind == ActionKind::Comment {
            if snapshot.text.trim().is_empty() {
                return Ok(Processed::skip(url, SkipReason::NoContent, true));
            }
            if snapshot.word_count() < self.config.min_word_count {
                return Ok(Processed::skip(url, SkipReason::TooShort, true));
            }
            if self.config.skip_videos && snapshot.has_video {
                return Ok(Processed::skip(url, SkipReason::ContainsVideo, true));
            }
            match self
                .generator
                .generate(&snapshot.text, plan.assistant_id.as_deref())
                .await
            {
                Ok(text) => match normalize_dashes(&text) {
                    text if !text.trim().is_empty() => Some(text),
                    _ => return Ok(Processed::skip(url, SkipReason::GenerationUnavailable, true)),
                },
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(url = %url, error = %e, "Comment generation failed");
                    return Ok(Processed::skip(url, SkipReason::GenerationUnavailable, true));
                }
            }
        } else {
            None
        };

        let mut outcome = RunOutcome::succeeded(url);
        outcome.comment = comment.clone();

        if kind == ActionKind::Comment && self.config.like_before_comment {
            outcome.liked = Some(self.like_first(plan.platform, url, ctx).await?);
        }

        match self.actor.act(kind, comment.as_deref()).await {
            Ok(true) => {}
            Ok(false) => return Ok(self.finish_failed(outcome, format!("could not {}", kind))),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => return Ok(self.finish_failed(outcome, e.to_string())),
        }
        if kind == ActionKind::Like {
            ctx.liked.insert(url.to_string());
        }

        let verification = match self.actor.verify(kind, comment.as_deref()).await {
            Ok(v) => v,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(url = %url, error = %e, "Verification failed");
                Verification::Inconclusive
            }
        };

        match verification {
            Verification::Confirmed => {
                self.record(plan.platform, kind, url);
                if let Err(e) = self.actor.persist_session().await {
                    warn!(error = %e, "Failed to persist session after action");
                }
                match kind {
                    ActionKind::Like => outcome.liked = Some(true),
                    ActionKind::Follow => outcome.followed = Some(true),
                    ActionKind::Comment => {}
                }
                Ok(Processed {
                    outcome,
                    touched: true,
                })
            }
            Verification::Inconclusive => {
                // The write may have landed; never risk repeating it.
                self.record(plan.platform, kind, url);
                Ok(self.finish_failed(outcome, format!("{} could not be verified", kind)))
            }
            Verification::Absent => Ok(self.finish_failed(outcome, format!("{} did not take effect", kind))),
        }
    }

    /// Like the open item ahead of commenting. A like already in the ledger
    /// or this run is never clicked again; a new one counts only once
    /// verified.
    async fn like_first(&mut self, platform: Platform, url: &str, ctx: &mut RunContext) -> Result<bool> {
        if ctx.liked.contains(url) || self.cache.is_recorded(platform, ActionKind::Like, url) {
            debug!(url = %url, "Item already liked");
            return Ok(true);
        }
        match self.actor.act(ActionKind::Like, None).await {
            Ok(true) => {}
            Ok(false) => return Ok(false),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(url = %url, error = %e, "Like before comment failed");
                return Ok(false);
            }
        }
        match self.actor.verify(ActionKind::Like, None).await {
            Ok(Verification::Confirmed) => {
                ctx.liked.insert(url.to_string());
                self.record(platform, ActionKind::Like, url);
                Ok(true)
            }
            Ok(v) => {
                warn!(url = %url, verification = ?v, "Like before comment not confirmed");
                Ok(false)
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(url = %url, error = %e, "Like verification failed");
                Ok(false)
            }
        }
    }

    fn record(&mut self, platform: Platform, kind: ActionKind, url: &str) {
        if let Err(e) = self.cache.record_acted(platform, kind, url) {
            warn!(url = %url, error = %e, "Failed to record action");
        }
    }

    fn finish_failed(&self, mut outcome: RunOutcome, error: String) -> Processed {
        outcome.success = false;
        outcome.error = Some(error);
        Processed {
            outcome,
            touched: true,
        }
    }

    pub fn into_cache(self) -> DuplicateActionCache {
        self.cache
    }
}
