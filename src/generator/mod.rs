//! Classification / generation engine
//!
//! Scans stored raw posts in ascending sequence order, classifies each one
//! against a feed's ruleset and upserts the accepted ones into the feed's
//! own collection. Resumable from the feed's highest sequence.

pub mod az;
mod ruleset;

use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::db::schemas::{FeedEntry, RawPost};
use crate::db::Collection;
use crate::types::{GeneratorCursor, Result};

pub use ruleset::{
    ClassificationRuleset, Decision, Rule, RulesetSpec, UserRegistry, Verdict,
    DEFAULT_MAX_LANGUAGES,
};

/// Accepted posts written per upsert unless configured otherwise
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Counters for one generation run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GenerationStats {
    pub scanned: u64,
    pub accepted: u64,
    pub batches: u64,
}

/// Fills one feed collection from the raw post collection
pub struct Generator {
    posts: Arc<dyn Collection<RawPost>>,
    feed: Arc<dyn Collection<FeedEntry>>,
    ruleset: Arc<ClassificationRuleset>,
}

impl Generator {
    pub fn new(
        posts: Arc<dyn Collection<RawPost>>,
        feed: Arc<dyn Collection<FeedEntry>>,
        ruleset: Arc<ClassificationRuleset>,
    ) -> Self {
        Self {
            posts,
            feed,
            ruleset,
        }
    }

    pub fn ruleset(&self) -> &ClassificationRuleset {
        &self.ruleset
    }

    /// Run one generation pass.
    ///
    /// Cancellation stops the scan; accepted posts seen so far are still written.
    pub async fn run(
        &self,
        cancel: &CancellationToken,
        cursor: GeneratorCursor,
        batch_size: usize,
    ) -> Result<GenerationStats> {
        let batch_size = batch_size.max(1);
        let after = match cursor {
            GeneratorCursor::LastGenerated => self.feed.max_sequence().await?,
            GeneratorCursor::FirstPost => None,
        };
        debug!(feed = %self.ruleset.name, cursor = %cursor, after = ?after, "Starting generation");

        let mut posts = self.posts.scan(after).await?;
        let mut stats = GenerationStats::default();
        let mut batch: Vec<FeedEntry> = Vec::with_capacity(batch_size);

        while let Some(post) = posts.next().await {
            if cancel.is_cancelled() {
                info!(feed = %self.ruleset.name, "Generation cancelled");
                break;
            }
            let post = post?;
            stats.scanned += 1;

            if !self.ruleset.classify(&post).accepted() {
                continue;
            }
            batch.push(FeedEntry::from(&post));
            stats.accepted += 1;

            if batch.len() >= batch_size {
                self.write(&mut batch, &mut stats).await?;
            }
        }

        self.write(&mut batch, &mut stats).await?;
        Ok(stats)
    }

    async fn write(&self, batch: &mut Vec<FeedEntry>, stats: &mut GenerationStats) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        self.feed.insert(true, std::mem::take(batch)).await?;
        stats.batches += 1;
        Ok(())
    }
}
