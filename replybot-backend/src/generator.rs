//! Reply generation: draft, render and summarize.
//!
//! Every step degrades instead of failing. A failed draft becomes a fixed
//! apology, a failed render drops the image and a failed summary leaves only
//! the promotional suffix as the visible text.

use crate::ai::CompletionService;
use crate::error::ServiceError;
use crate::models::{GeneratedReply, RenderedImage};
use crate::render::{self, ImageRenderer};
use crate::text;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Body used when the chat service cannot produce a draft.
pub const APOLOGY_TEXT: &str = "I'm sorry, I couldn't process your request at this time.";

/// Run `fut` with a deadline, turning an elapsed deadline into `ServiceError::Timeout`.
pub async fn with_timeout<T, F>(timeout: Duration, fut: F) -> Result<T, ServiceError>
where
    F: Future<Output = Result<T, ServiceError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(ServiceError::Timeout {
            secs: timeout.as_secs(),
        }),
    }
}

/// Prompt for the draft step.
pub fn draft_prompt(target_text: &str, comment: Option<&str>) -> String {
    match comment {
        Some(comment) => format!(
            "Someone replied to the post below and asked for your take. Give useful insights \
             on the post and fact-check its claims, taking their comment into account.\n\n\
             Post:\n{}\n\nTheir comment:\n{}",
            target_text, comment
        ),
        None => format!(
            "Give useful insights on the post below and fact-check its claims.\n\nPost:\n{}",
            target_text
        ),
    }
}

fn summary_prompt(body: &str, max_chars: usize) -> String {
    format!(
        "Condense the following answer into a single reply of at most {} characters. \
         Keep the verdict, drop the detail, no hashtags.\n\n{}",
        max_chars, body
    )
}

pub struct ResponseGenerator {
    chat: Arc<dyn CompletionService>,
    summarizer: Option<Arc<dyn CompletionService>>,
    renderer: Option<Arc<dyn ImageRenderer>>,
    promo_suffix: String,
    tweet_max_chars: usize,
    call_timeout: Duration,
}

impl ResponseGenerator {
    pub fn new(
        chat: Arc<dyn CompletionService>,
        summarizer: Option<Arc<dyn CompletionService>>,
        renderer: Option<Arc<dyn ImageRenderer>>,
        promo_suffix: &str,
        tweet_max_chars: usize,
        call_timeout: Duration,
    ) -> Self {
        Self {
            chat,
            summarizer,
            renderer,
            promo_suffix: promo_suffix.to_string(),
            tweet_max_chars,
            call_timeout,
        }
    }

    /// Produce a reply for `target_text`, optionally addressing the
    /// mentioning user's own `comment`. Never fails.
    pub async fn generate(&self, target_text: &str, comment: Option<&str>) -> GeneratedReply {
        let target = text::normalize(target_text);
        let comment = comment.map(text::normalize).filter(|c| !c.is_empty());

        let body_text = match self.draft(&target, comment.as_deref()).await {
            Ok(body) => body,
            Err(e) => {
                log::warn!("[generator] Draft failed, replying with apology: {}", e);
                // Nothing worth rendering or condensing
                return GeneratedReply {
                    body_text: APOLOGY_TEXT.to_string(),
                    summary_text: None,
                    image: None,
                };
            }
        };

        let image = self.render(&body_text).await;
        let summary_text = self.summarize(&body_text).await;

        GeneratedReply {
            body_text,
            summary_text,
            image,
        }
    }

    async fn draft(&self, target: &str, comment: Option<&str>) -> Result<String, ServiceError> {
        if target.is_empty() && comment.is_none() {
            return Err(ServiceError::Empty);
        }
        let prompt = draft_prompt(target, comment);
        with_timeout(self.call_timeout, self.chat.complete(&prompt)).await
    }

    async fn render(&self, body: &str) -> Option<RenderedImage> {
        let renderer = self.renderer.as_ref()?;
        let html = render::card_html(body);
        match with_timeout(self.call_timeout, renderer.render(&html)).await {
            Ok(image) => Some(image),
            Err(e) => {
                log::warn!("[generator] Render failed, posting text only: {}", e);
                None
            }
        }
    }

    /// Short visible text: summary plus suffix, or the suffix alone when the
    /// summarizer fails. `None` when summarization is disabled.
    async fn summarize(&self, body: &str) -> Option<String> {
        let summarizer = self.summarizer.as_ref()?;
        let budget = self
            .tweet_max_chars
            .saturating_sub(self.promo_suffix.chars().count())
            .max(1);

        let visible = match with_timeout(self.call_timeout, summarizer.complete(&summary_prompt(body, budget))).await {
            Ok(summary) => format!("{}{}", summary.trim(), self.promo_suffix),
            Err(e) => {
                log::warn!("[generator] Summary failed, using suffix only: {}", e);
                self.promo_suffix.trim().to_string()
            }
        };

        if visible.trim().is_empty() {
            return None;
        }
        Some(text::truncate_for_tweet(&visible, self.tweet_max_chars))
    }
}
