//! Mention processing pipeline.
//!
//! One run: read the cursor, fetch newer mentions, then for each mention in
//! ascending id order resolve the target, check the ledger, generate, publish
//! and record. Per-mention failures are counted and the run moves on; only an
//! unreachable source, ledger or cursor store ends a run early.

use crate::error::{RunError, StoreError};
use crate::generator::ResponseGenerator;
use crate::models::{DedupKey, LedgerRecord, Mention, PostId, RunStats};
use crate::publisher::ReplyPublisher;
use crate::resolver::ConversationResolver;
use crate::store::{CursorStore, DedupLedger};
use crate::text;
use crate::twitter::{self, BotIdentity, SocialClient};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;


/// When the cursor moves past a mention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorPolicy {
    /// Past every mention up to the first failure of the run. A failed
    /// mention and everything after it is fetched again next run, until the
    /// same mention has failed `max_publish_attempts` runs in a row.
    OnRecord,
    /// Past every examined mention, failed or not.
    Always,
}

impl CursorPolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "on_record" | "on-record" | "onrecord" => Some(CursorPolicy::OnRecord),
            "always" => Some(CursorPolicy::Always),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    /// Most mentions handled per run
    pub batch_limit: usize,
    /// Window fetched when there is no cursor yet
    pub lookback_minutes: i64,
    /// Pagination ceiling per fetch
    pub max_pages: usize,
    /// Deadline for each external call
    pub call_timeout: Duration,
    pub tweet_max_chars: usize,
    pub dedup_key: DedupKey,
    pub cursor_policy: CursorPolicy,
    pub cursor_key: String,
    /// Runs a failing mention may hold the cursor before it is given up
    pub max_publish_attempts: u32,
}

/// What happened to one mention.
#[derive(Debug, Clone, PartialEq)]
enum Outcome {
    Replied,
    Skipped(String),
    Failed,
}

/// Everything a run needs, built once per process.
pub struct BotContext {
    bot: BotIdentity,
    source: Arc<dyn SocialClient>,
    resolver: ConversationResolver,
    generator: ResponseGenerator,
    publisher: ReplyPublisher,
    ledger: Arc<dyn DedupLedger>,
    cursor: Arc<dyn CursorStore>,
    settings: PipelineSettings,
    run_lock: Mutex<()>,
}

impl BotContext {
    pub fn new(
        bot: BotIdentity,
        source: Arc<dyn SocialClient>,
        generator: ResponseGenerator,
        ledger: Arc<dyn DedupLedger>,
        cursor: Arc<dyn CursorStore>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            resolver: ConversationResolver::new(source.clone(), &bot.user_id),
            publisher: ReplyPublisher::new(source.clone(), settings.tweet_max_chars),
            bot,
            source,
            generator,
            ledger,
            cursor,
            settings,
            run_lock: Mutex::new(()),
        }
    }

    pub fn bot(&self) -> &BotIdentity {
        &self.bot
    }

    /// Run the pipeline once. Fails fast with `AlreadyRunning` while another
    /// run holds the lock.
    pub async fn run_once(&self) -> Result<RunStats, RunError> {
        let _guard = self.run_lock.try_lock().map_err(|_| RunError::AlreadyRunning)?;

        let mut stats = RunStats::default();
        let mut cursor = self.load_cursor().await?;

        log::info!(
            "[pipeline] Run started for @{} (cursor: {})",
            self.bot.username,
            cursor.as_ref().map(|c| c.as_str()).unwrap_or("none")
        );

        let mut mentions = twitter::fetch_since(
            self.source.as_ref(),
            cursor.as_ref(),
            self.settings.lookback_minutes,
            self.settings.max_pages,
        )
        .await
        .map_err(|e| {
            log::error!("[pipeline] Fetching mentions failed, aborting run: {}", e);
            RunError::SourceUnavailable(e)
        })?;

        stats.found = mentions.len();
        if mentions.is_empty() {
            log::info!("[pipeline] No new mentions");
            return Ok(stats);
        }

        mentions.sort_by(|a, b| a.id.cmp(&b.id));
        if mentions.len() > self.settings.batch_limit {
            log::info!(
                "[pipeline] {} mentions found, handling the oldest {} this run",
                mentions.len(),
                self.settings.batch_limit
            );
            mentions.truncate(self.settings.batch_limit);
        }

        let mut holding = false;
        for mention in &mentions {
            stats.processed += 1;
            let outcome = self.process(mention).await?;

            match &outcome {
                Outcome::Replied => stats.replied += 1,
                Outcome::Skipped(reason) => {
                    log::info!("[pipeline] Skipped mention {}: {}", mention.id, reason);
                    stats.skipped += 1;
                }
                Outcome::Failed => stats.errors += 1,
            }

            let advance = match self.settings.cursor_policy {
                CursorPolicy::Always => true,
                CursorPolicy::OnRecord if holding => false,
                CursorPolicy::OnRecord if outcome == Outcome::Failed => {
                    let attempts = self.record_failed_attempt(&mention.id).await?;
                    if attempts >= self.settings.max_publish_attempts {
                        log::warn!(
                            "[pipeline] Mention {} failed {} runs in a row, giving up on it",
                            mention.id,
                            attempts
                        );
                        true
                    } else {
                        log::warn!(
                            "[pipeline] Holding cursor before mention {} (attempt {} of {}); it will be retried next run",
                            mention.id,
                            attempts,
                            self.settings.max_publish_attempts
                        );
                        holding = true;
                        false
                    }
                }
                CursorPolicy::OnRecord => true,
            };
            if advance {
                self.advance_cursor(&mut cursor, &mention.id).await?;
            }
        }

        log::info!("[pipeline] Run finished. {}", stats);
        Ok(stats)
    }

    async fn load_cursor(&self) -> Result<Option<PostId>, RunError> {
        let stored = self
            .cursor
            .get(&self.settings.cursor_key)
            .await
            .map_err(RunError::CursorUnavailable)?;

        match stored.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
            None => Ok(None),
            Some(value) if value.chars().all(|c| c.is_ascii_digit()) => Ok(Some(PostId::from(value))),
            Some(value) => Err(RunError::CursorUnavailable(StoreError::Corrupt(format!(
                "cursor '{}' is not a post id",
                value
            )))),
        }
    }

    /// Move the cursor forward to `id`. Never moves it backwards.
    async fn advance_cursor(&self, current: &mut Option<PostId>, id: &PostId) -> Result<(), RunError> {
        if current.as_ref().is_some_and(|c| c >= id) {
            return Ok(());
        }
        self.cursor
            .set(&self.settings.cursor_key, id.as_str())
            .await
            .map_err(|e| {
                log::error!("[pipeline] Failed to advance cursor to {}: {}", id, e);
                RunError::CursorUnavailable(e)
            })?;
        *current = Some(id.clone());
        Ok(())
    }

    fn attempts_key(&self) -> String {
        format!("{}:held", self.settings.cursor_key)
    }

    /// Count another failed run for `id`, stored next to the cursor as
    /// `<id>:<attempts>`. A different id starts over at one.
    async fn record_failed_attempt(&self, id: &PostId) -> Result<u32, RunError> {
        let key = self.attempts_key();
        let stored = self
            .cursor
            .get(&key)
            .await
            .map_err(RunError::CursorUnavailable)?;

        let previous = stored
            .as_deref()
            .and_then(|v| v.split_once(':'))
            .filter(|(held, _)| *held == id.as_str())
            .and_then(|(_, n)| n.parse::<u32>().ok())
            .unwrap_or(0);
        let attempts = previous + 1;

        self.cursor
            .set(&key, &format!("{}:{}", id, attempts))
            .await
            .map_err(RunError::CursorUnavailable)?;
        Ok(attempts)
    }

    /// Handle one mention. Only ledger failures escape as errors.
    async fn process(&self, mention: &Mention) -> Result<Outcome, RunError> {
        if let Some(reason) = self.skip_reason(mention) {
            return Ok(Outcome::Skipped(reason.to_string()));
        }

        let target = match tokio::time::timeout(self.settings.call_timeout, self.resolver.resolve(mention)).await {
            Ok(Ok(target)) => target,
            Ok(Err(e)) => return Ok(Outcome::Skipped(format!("conversation unavailable ({})", e))),
            Err(_) => {
                return Ok(Outcome::Skipped(format!(
                    "conversation lookup timed out after {}s",
                    self.settings.call_timeout.as_secs()
                )))
            }
        };

        let key = self.settings.dedup_key.key_for(mention, &target);
        let already = self
            .ledger
            .contains(key.as_str())
            .await
            .map_err(RunError::LedgerUnavailable)?;
        if already {
            return Ok(Outcome::Skipped(format!("already replied (key {})", key)));
        }

        log::info!(
            "[pipeline] Replying to mention {} about post {}: {}",
            mention.id,
            target.id(),
            text::shorten_for_log(&target.post.text, 80)
        );

        let reply = self
            .generator
            .generate(&target.post.text, target.comment.as_deref())
            .await;

        let publish_timeout = self.settings.call_timeout * 2;
        let published = match tokio::time::timeout(
            publish_timeout,
            self.publisher.publish(&reply, &mention.id, target.id()),
        )
        .await
        {
            Ok(Ok(published)) => published,
            Ok(Err(e)) => {
                log::error!("[pipeline] Failed to reply to mention {}: {}", mention.id, e);
                return Ok(Outcome::Failed);
            }
            Err(_) => {
                log::error!(
                    "[pipeline] Publishing reply to mention {} timed out after {}s",
                    mention.id,
                    publish_timeout.as_secs()
                );
                return Ok(Outcome::Failed);
            }
        };

        let record = LedgerRecord::new(self.settings.dedup_key, mention, &target, &published);
        self.ledger.insert(&record).await.map_err(|e| {
            log::error!(
                "[pipeline] Reply {} was posted but could not be recorded: {}",
                published.tweet_id,
                e
            );
            RunError::LedgerUnavailable(e)
        })?;

        log::info!(
            "[pipeline] Replied to mention {} with {}",
            mention.id,
            published.tweet_id
        );
        Ok(Outcome::Replied)
    }

    fn skip_reason(&self, mention: &Mention) -> Option<&'static str> {
        if mention.is_repost() {
            return Some("retweet or quote");
        }
        if mention.author_id == self.bot.user_id {
            return Some("written by the bot");
        }
        if mention.is_conversation_root() && text::normalize(&mention.text).is_empty() {
            return Some("nothing to answer");
        }
        None
    }
}
