//! Social-media side of the pipeline: the `SocialClient` seam, the Twitter
//! API v2 implementation, and the incremental mention fetch built on top.

mod client;
mod oauth;

pub use client::{BotIdentity, TwitterClient};
pub use oauth::{generate_oauth_header, percent_encode, TwitterCredentials};

use crate::error::SourceError;
use crate::models::{Mention, Post, PostId, RenderedImage};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

/// Lower bound for a mentions query.
#[derive(Debug, Clone, PartialEq)]
pub enum MentionWindow {
    /// Everything newer than the cursor
    SinceId(PostId),
    /// No cursor yet: a bounded recent window
    SinceTime(DateTime<Utc>),
}

/// One page of mentions.
#[derive(Debug, Clone, Default)]
pub struct MentionPage {
    pub items: Vec<Mention>,
    pub next_token: Option<String>,
}

/// Operations the pipeline needs from the social-media platform.
#[async_trait]
pub trait SocialClient: Send + Sync {
    async fn get_mentions(
        &self,
        window: &MentionWindow,
        pagination_token: Option<&str>,
    ) -> Result<MentionPage, SourceError>;

    async fn get_post(&self, id: &PostId) -> Result<Post, SourceError>;

    /// Upload an image, returning the media handle to attach to a post.
    async fn upload_media(&self, image: &RenderedImage) -> Result<String, SourceError>;

    /// Create a reply, returning the new post's id.
    async fn create_post(
        &self,
        text: &str,
        media_id: Option<&str>,
        in_reply_to: &PostId,
    ) -> Result<String, SourceError>;
}

/// Fetch every mention newer than `cursor`, following pagination.
///
/// Without a cursor the query falls back to the last `lookback_minutes`.
/// Stops after `max_pages` pages even if the source keeps returning tokens.
/// Pages run newest first, so a stop drops the oldest mentions after the
/// cursor and the run moves past them. Result is ascending by id with
/// duplicates removed.
pub async fn fetch_since(
    source: &dyn SocialClient,
    cursor: Option<&PostId>,
    lookback_minutes: i64,
    max_pages: usize,
) -> Result<Vec<Mention>, SourceError> {
    let window = match cursor {
        Some(id) => MentionWindow::SinceId(id.clone()),
        None => MentionWindow::SinceTime(Utc::now() - Duration::minutes(lookback_minutes)),
    };

    let mut mentions: Vec<Mention> = Vec::new();
    let mut token: Option<String> = None;
    let mut pages = 0;

    loop {
        let page = source.get_mentions(&window, token.as_deref()).await?;
        pages += 1;
        mentions.extend(page.items);

        match page.next_token {
            None => break,
            Some(next) if pages >= max_pages => {
                log::warn!(
                    "Twitter: Stopping pagination after {} pages, older mentions behind token {} are dropped",
                    pages,
                    next
                );
                break;
            }
            Some(next) => token = Some(next),
        }
    }

    mentions.sort_by(|a, b| a.id.cmp(&b.id));
    mentions.dedup_by(|a, b| a.id == b.id);

    if let Some(cursor) = cursor {
        // Some sources treat since_id as inclusive
        mentions.retain(|m| &m.id > cursor);
    }

    Ok(mentions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn mention(id: &str) -> Mention {
        Post {
            id: PostId::from(id),
            author_id: "200".to_string(),
            text: format!("@bot question {}", id),
            created_at: None,
            conversation_id: Some(PostId::from(id)),
            references: Vec::new(),
        }
    }

    /// Serves pre-baked pages in order and records the requests it saw.
    struct PagedSource {
        pages: Vec<MentionPage>,
        endless: bool,
        calls: Mutex<Vec<(MentionWindow, Option<String>)>>,
    }

    impl PagedSource {
        fn new(pages: Vec<MentionPage>) -> Self {
            Self {
                pages,
                endless: false,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SocialClient for PagedSource {
        async fn get_mentions(
            &self,
            window: &MentionWindow,
            pagination_token: Option<&str>,
        ) -> Result<MentionPage, SourceError> {
            let mut calls = self.calls.lock().unwrap();
            let index = calls.len();
            calls.push((window.clone(), pagination_token.map(|t| t.to_string())));
            if self.endless {
                return Ok(MentionPage {
                    items: vec![mention(&(1000 + index).to_string())],
                    next_token: Some(format!("page-{}", index + 1)),
                });
            }
            self.pages
                .get(index)
                .cloned()
                .ok_or_else(|| SourceError::Transport("no more pages".to_string()))
        }

        async fn get_post(&self, id: &PostId) -> Result<Post, SourceError> {
            Err(SourceError::NotFound(id.to_string()))
        }

        async fn upload_media(&self, _image: &RenderedImage) -> Result<String, SourceError> {
            unreachable!("fetch never uploads")
        }

        async fn create_post(
            &self,
            _text: &str,
            _media_id: Option<&str>,
            _in_reply_to: &PostId,
        ) -> Result<String, SourceError> {
            unreachable!("fetch never posts")
        }
    }

    #[tokio::test]
    async fn test_fetch_follows_pagination_and_sorts() {
        let source = PagedSource::new(vec![
            MentionPage {
                items: vec![mention("9"), mention("7")],
                next_token: Some("t1".to_string()),
            },
            MentionPage {
                items: vec![mention("5"), mention("12")],
                next_token: None,
            },
        ]);

        let cursor = PostId::from("4");
        let mentions = fetch_since(&source, Some(&cursor), 20, 10).await.unwrap();
        let ids: Vec<&str> = mentions.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["5", "7", "9", "12"]);

        let calls = source.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], (MentionWindow::SinceId(cursor.clone()), None));
        assert_eq!(calls[1].1.as_deref(), Some("t1"));
    }

    #[tokio::test]
    async fn test_fetch_without_cursor_uses_time_window() {
        let source = PagedSource::new(vec![MentionPage::default()]);
        let before = Utc::now();
        let mentions = fetch_since(&source, None, 20, 10).await.unwrap();
        assert!(mentions.is_empty());

        let calls = source.calls.lock().unwrap();
        match &calls[0].0 {
            MentionWindow::SinceTime(start) => {
                let age = before - *start;
                assert!(age >= Duration::minutes(19) && age <= Duration::minutes(21));
            }
            other => panic!("expected a time window, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_stops_at_page_ceiling() {
        let mut source = PagedSource::new(Vec::new());
        source.endless = true;
        let mentions = fetch_since(&source, None, 20, 3).await.unwrap();
        assert_eq!(mentions.len(), 3);
        assert_eq!(source.calls.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_fetch_drops_cursor_and_duplicate_ids() {
        let source = PagedSource::new(vec![
            MentionPage {
                items: vec![mention("10"), mention("11")],
                next_token: Some("t1".to_string()),
            },
            MentionPage {
                items: vec![mention("11"), mention("12")],
                next_token: None,
            },
        ]);
        let cursor = PostId::from("10");
        let mentions = fetch_since(&source, Some(&cursor), 20, 10).await.unwrap();
        let ids: Vec<&str> = mentions.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["11", "12"]);
    }

    #[tokio::test]
    async fn test_fetch_error_propagates() {
        let source = PagedSource::new(Vec::new());
        let err = fetch_since(&source, None, 20, 10).await.unwrap_err();
        assert!(matches!(err, SourceError::Transport(_)));
    }
}
