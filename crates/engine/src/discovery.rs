//! Candidate discovery: open a search view, harvest item links, scroll.

use async_trait::async_trait;
use socialpilot_browser::{Interaction, PageControl};
use socialpilot_core::config::DiscoveryConfig;
use socialpilot_core::{CandidateItem, Error, Platform, Result, SearchCriteria};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::platform::{profile, PlatformProfile};

/// Dedup state for one invocation, passed explicitly to every stage.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    /// Every URL discovery has returned in this run.
    pub discovered: HashSet<String>,
    /// URLs the orchestrator produced an outcome for.
    pub processed: HashSet<String>,
    pub liked: HashSet<String>,
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            discovered: HashSet::new(),
            processed: HashSet::new(),
            liked: HashSet::new(),
        }
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Anything that can produce fresh candidates on demand. Each call returns at
/// most `want` items not yet in `ctx.discovered`, and may return none.
#[async_trait]
pub trait CandidateSource: Send {
    async fn next_batch(
        &mut self,
        criteria: &SearchCriteria,
        want: usize,
        ctx: &mut RunContext,
    ) -> Result<Vec<CandidateItem>>;
}

pub struct Discovery {
    page: Arc<dyn PageControl>,
    profile: &'static PlatformProfile,
    config: DiscoveryConfig,
    interaction: Interaction,
}

impl Discovery {
    pub fn new(page: Arc<dyn PageControl>, platform: Platform, config: DiscoveryConfig) -> Self {
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

    /// Collect up to `target` unseen item URLs for `criteria`.
    pub async fn discover(
        &self,
        criteria: &SearchCriteria,
        target: usize,
        ctx: &mut RunContext,
    ) -> Result<Vec<CandidateItem>> {
        let url = self
            .profile
            .search_url(criteria)
            .ok_or_else(|| Error::Validation("search criteria needs a hashtag or keywords".into()))?;
        if target == 0 {
            return Ok(Vec::new());
        }

        info!(platform = %self.profile.platform, url = %url, target = target, "Discovering candidates");
        self.page.navigate(&url).await?;
        self.interaction
            .click_by_visible_text(self.page.as_ref(), self.profile.banner_texts)
            .await;

        let settle = Duration::from_millis(self.config.settle_ms);
        let mut found: Vec<CandidateItem> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut scrolls = 0u32;
        let mut empty_scrolls = 0u32;

        loop {
            let mut fresh = 0usize;
            for href in self.page.hrefs().await? {
                let Some(item_url) = self.profile.canonical_item_url(&href) else {
                    continue;
                };
                if ctx.discovered.contains(&item_url) || !seen.insert(item_url.clone()) {
                    continue;
                }
                fresh += 1;
                found.push(CandidateItem::new(self.profile.platform, item_url));
                if found.len() >= target {
                    break;
                }
            }
            debug!(scrolls = scrolls, fresh = fresh, total = found.len(), "Harvested links");

            if found.len() >= target {
                break;
            }
            if scrolls > 0 {
                if fresh == 0 {
                    empty_scrolls += 1;
                    if empty_scrolls >= self.config.empty_scroll_limit {
                        debug!(empty_scrolls = empty_scrolls, "Feed stopped yielding new items");
                        break;
                    }
                } else {
                    empty_scrolls = 0;
                }
            }
            if scrolls >= self.config.max_scrolls {
                break;
            }
            self.page.scroll_by(self.config.scroll_pixels).await?;
            scrolls += 1;
            if !settle.is_zero() {
                tokio::time::sleep(settle).await;
            }
        }

        for item in &found {
            ctx.discovered.insert(item.url.clone());
        }
        info!(found = found.len(), scrolls = scrolls, "Discovery round finished");
        Ok(found)
    }
}

#[async_trait]
impl CandidateSource for Discovery {
    async fn next_batch(
        &mut self,
        criteria: &SearchCriteria,
        want: usize,
        ctx: &mut RunContext,
    ) -> Result<Vec<CandidateItem>> {
        self.discover(criteria, want, ctx).await
    }
}
