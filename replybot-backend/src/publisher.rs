//! Posts generated replies.

use crate::error::{PublishError, PublishStep};
use crate::models::{GeneratedReply, PostId, PublishedReply};
use crate::text;
use crate::twitter::SocialClient;
use chrono::Utc;
use std::sync::Arc;

pub struct ReplyPublisher {
    client: Arc<dyn SocialClient>,
    tweet_max_chars: usize,
}

impl ReplyPublisher {
    pub fn new(client: Arc<dyn SocialClient>, tweet_max_chars: usize) -> Self {
        Self {
            client,
            tweet_max_chars,
        }
    }

    /// Post `reply` as an answer to `in_reply_to`.
    ///
    /// With an image the media is uploaded first and its handle attached to
    /// the post. A failed post after a successful upload fails the whole
    /// publish; there is no text-only retry.
    pub async fn publish(
        &self,
        reply: &GeneratedReply,
        in_reply_to: &PostId,
        target_post_id: &PostId,
    ) -> Result<PublishedReply, PublishError> {
        let media_id = match &reply.image {
            Some(image) => Some(self.client.upload_media(image).await.map_err(|source| PublishError {
                step: PublishStep::UploadMedia,
                source,
            })?),
            None => None,
        };

        let visible = text::truncate_for_tweet(reply.visible_text(), self.tweet_max_chars);
        let tweet_id = self
            .client
            .create_post(&visible, media_id.as_deref(), in_reply_to)
            .await
            .map_err(|source| PublishError {
                step: PublishStep::CreatePost,
                source,
            })?;

        Ok(PublishedReply {
            tweet_id,
            target_post_id: target_post_id.clone(),
            body_text: visible,
            created_at: Utc::now(),
        })
    }
}
