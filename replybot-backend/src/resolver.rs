//! Picks the post a mention should be answered about.

use crate::error::SourceError;
use crate::models::{Mention, TargetPost};
use crate::twitter::SocialClient;
use std::sync::Arc;

pub struct ConversationResolver {
    source: Arc<dyn SocialClient>,
    bot_user_id: String,
}

impl ConversationResolver {
    pub fn new(source: Arc<dyn SocialClient>, bot_user_id: &str) -> Self {
        Self {
            source,
            bot_user_id: bot_user_id.to_string(),
        }
    }

    /// Resolve the target for `mention`.
    ///
    /// A mention that starts its own conversation is its own target. Otherwise
    /// the conversation root is the target and the mention's text becomes the
    /// comment, unless the bot wrote the root, in which case the mention stands
    /// alone. An unreadable root is an error; callers skip the mention.
    pub async fn resolve(&self, mention: &Mention) -> Result<TargetPost, SourceError> {
        let root_id = match &mention.conversation_id {
            Some(root) if !mention.is_conversation_root() => root,
            _ => {
                return Ok(TargetPost {
                    post: mention.clone(),
                    comment: None,
                })
            }
        };

        let root = self.source.get_post(root_id).await?;

        if root.author_id == self.bot_user_id {
            log::debug!(
                "[resolver] Root {} of mention {} is our own post, answering the mention",
                root.id,
                mention.id
            );
            return Ok(TargetPost {
                post: mention.clone(),
                comment: None,
            });
        }

        Ok(TargetPost {
            post: root,
            comment: Some(mention.text.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Post, PostId, RenderedImage};
    use crate::twitter::{MentionPage, MentionWindow};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct Posts {
        posts: HashMap<String, Post>,
        lookups: Mutex<usize>,
    }

    #[async_trait]
    impl SocialClient for Posts {
        async fn get_mentions(
            &self,
            _window: &MentionWindow,
            _pagination_token: Option<&str>,
        ) -> Result<MentionPage, SourceError> {
            Ok(MentionPage::default())
        }

        async fn get_post(&self, id: &PostId) -> Result<Post, SourceError> {
            *self.lookups.lock().unwrap() += 1;
            self.posts
                .get(id.as_str())
                .cloned()
                .ok_or_else(|| SourceError::NotFound(id.to_string()))
        }

        async fn upload_media(&self, _image: &RenderedImage) -> Result<String, SourceError> {
            unreachable!()
        }

        async fn create_post(
            &self,
            _text: &str,
            _media_id: Option<&str>,
            _in_reply_to: &PostId,
        ) -> Result<String, SourceError> {
            unreachable!()
        }
    }

    const BOT_ID: &str = "999";

    fn post(id: &str, author: &str, conversation: &str, text: &str) -> Post {
        Post {
            id: PostId::from(id),
            author_id: author.to_string(),
            text: text.to_string(),
            created_at: None,
            conversation_id: Some(PostId::from(conversation)),
            references: Vec::new(),
        }
    }

    fn resolver(posts: Vec<Post>) -> (ConversationResolver, Arc<Posts>) {
        let source = Arc::new(Posts {
            posts: posts.into_iter().map(|p| (p.id.to_string(), p)).collect(),
            lookups: Mutex::new(0),
        });
        (ConversationResolver::new(source.clone(), BOT_ID), source)
    }

    #[tokio::test]
    async fn test_root_mention_is_its_own_target() {
        let (resolver, source) = resolver(Vec::new());
        let mention = post("100", "1", "100", "@bot is this true?");
        let target = resolver.resolve(&mention).await.unwrap();
        assert_eq!(target.post, mention);
        assert_eq!(target.comment, None);
        assert_eq!(*source.lookups.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reply_mention_targets_root_with_comment() {
        let root = post("100", "2", "100", "The moon is cheese");
        let (resolver, _) = resolver(vec![root.clone()]);
        let mention = post("105", "1", "100", "@bot thoughts?");
        let target = resolver.resolve(&mention).await.unwrap();
        assert_eq!(target.post, root);
        assert_eq!(target.comment.as_deref(), Some("@bot thoughts?"));
    }

    #[tokio::test]
    async fn test_bot_authored_root_falls_back_to_mention() {
        let (resolver, _) = resolver(vec![post("100", BOT_ID, "100", "our earlier answer")]);
        let mention = post("105", "1", "100", "@bot are you sure?");
        let target = resolver.resolve(&mention).await.unwrap();
        assert_eq!(target.post, mention);
        assert_eq!(target.comment, None);
    }

    #[tokio::test]
    async fn test_missing_root_is_an_error() {
        let (resolver, _) = resolver(Vec::new());
        let mention = post("105", "1", "100", "@bot thoughts?");
        assert_eq!(
            resolver.resolve(&mention).await.unwrap_err(),
            SourceError::NotFound("100".to_string())
        );
    }
}
