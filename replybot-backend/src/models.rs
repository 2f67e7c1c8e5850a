//! Domain types for mentions, replies and ledger records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Provider-assigned post identifier.
///
/// Twitter ids are decimal strings that grow monotonically. Ordering compares
/// them numerically (shorter is smaller, equal lengths compare lexically) so
/// ids wider than `u64` still sort correctly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PostId(String);

impl PostId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Ord for PostId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .len()
            .cmp(&other.0.len())
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for PostId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PostId {
    fn from(s: &str) -> Self {
        PostId(s.to_string())
    }
}

impl From<String> for PostId {
    fn from(s: String) -> Self {
        PostId(s)
    }
}

/// How a post references another post.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    RepliedTo,
    Quoted,
    Retweeted,
}

/// A post as returned by the social-media API. Mentions are posts.
#[derive(Debug, Clone, PartialEq)]
pub struct Post {
    pub id: PostId,
    pub author_id: String,
    pub text: String,
    pub created_at: Option<DateTime<Utc>>,
    pub conversation_id: Option<PostId>,
    pub references: Vec<ReferenceKind>,
}

impl Post {
    /// True for retweets and quote tweets.
    pub fn is_repost(&self) -> bool {
        self.references
            .iter()
            .any(|r| matches!(r, ReferenceKind::Retweeted | ReferenceKind::Quoted))
    }

    /// True when this post starts its own conversation.
    pub fn is_conversation_root(&self) -> bool {
        match &self.conversation_id {
            Some(conv) => conv == &self.id,
            None => true,
        }
    }
}

pub type Mention = Post;

/// The post a reply is about, plus the mentioning user's own words when the
/// mention was a comment on somebody else's post.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetPost {
    pub post: Post,
    pub comment: Option<String>,
}

impl TargetPost {
    pub fn id(&self) -> &PostId {
        &self.post.id
    }
}

/// A rendered image ready for upload.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedImage {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Output of the response generator. Optional parts are dropped on failure.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedReply {
    /// Full-length model output (or the fixed apology)
    pub body_text: String,
    /// Condensed text including the promotional suffix, already sized for a tweet
    pub summary_text: Option<String>,
    pub image: Option<RenderedImage>,
}

impl GeneratedReply {
    /// Text shown in the tweet itself.
    pub fn visible_text(&self) -> &str {
        self.summary_text.as_deref().unwrap_or(&self.body_text)
    }
}

/// A reply that now exists on the platform.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedReply {
    pub tweet_id: String,
    pub target_post_id: PostId,
    pub body_text: String,
    pub created_at: DateTime<Utc>,
}

/// Which identifier the ledger uses to decide "already replied".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupKey {
    /// One reply per conversation root, however many mentions point at it
    Target,
    /// One reply per mention, even when several share a root
    Mention,
}

impl DedupKey {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "target" => Some(DedupKey::Target),
            "mention" => Some(DedupKey::Mention),
            _ => None,
        }
    }

    /// Select the key for a mention/target pair.
    pub fn key_for<'a>(&self, mention: &'a Mention, target: &'a TargetPost) -> &'a PostId {
        match self {
            DedupKey::Target => target.id(),
            DedupKey::Mention => &mention.id,
        }
    }
}

/// Persisted form of a published reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub dedup_key: String,
    pub mention_id: String,
    pub target_post_id: String,
    pub target_text: String,
    pub reply_post_id: String,
    pub reply_text: String,
    pub mentioned_at: Option<String>,
    pub replied_at: String,
}

impl LedgerRecord {
    pub fn new(
        key: DedupKey,
        mention: &Mention,
        target: &TargetPost,
        published: &PublishedReply,
    ) -> Self {
        LedgerRecord {
            dedup_key: key.key_for(mention, target).to_string(),
            mention_id: mention.id.to_string(),
            target_post_id: target.id().to_string(),
            target_text: target.post.text.clone(),
            reply_post_id: published.tweet_id.clone(),
            reply_text: published.body_text.clone(),
            mentioned_at: mention.created_at.map(|t| t.to_rfc3339()),
            replied_at: published.created_at.to_rfc3339(),
        }
    }
}

/// Per-run counters, logged at the end of a run and never persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub found: usize,
    pub processed: usize,
    pub replied: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl fmt::Display for RunStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Found: {}, Processed: {}, Replied: {}, Skipped: {}, Errors: {}",
            self.found, self.processed, self.replied, self.skipped, self.errors
        )
    }
}
