//! Twitter API v2 client used by the reply pipeline.
//!
//! Reads use the app bearer token when one is configured and OAuth 1.0a user
//! context otherwise. Writes always use OAuth 1.0a. Rate limits are absorbed
//! by sleeping until the advertised reset and retrying.

use super::oauth::{encode_query, generate_oauth_header};
use super::{MentionPage, MentionWindow, SocialClient};
use crate::config::TwitterSettings;
use crate::error::SourceError;
use crate::models::{Post, PostId, ReferenceKind, RenderedImage};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use std::time::Duration;

/// Fields requested for every tweet we read
const TWEET_FIELDS: &str = "author_id,conversation_id,created_at,referenced_tweets";

/// Largest page the mentions endpoint serves
const MENTIONS_PAGE_SIZE: &str = "100";

/// Attempts per request when the API answers 429
const MAX_RATE_LIMIT_ATTEMPTS: u32 = 3;

/// Wait used when a 429 carries no reset header
const DEFAULT_RATE_LIMIT_WAIT_SECS: u64 = 300;

/// Bounds for a single rate-limit sleep
const MIN_RATE_LIMIT_WAIT_SECS: u64 = 60;
const MAX_RATE_LIMIT_WAIT_SECS: u64 = 900;

/// The authenticated bot account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotIdentity {
    pub user_id: String,
    pub username: String,
}

/// Twitter API v2 mentions response
#[derive(Debug, Deserialize)]
struct MentionsResponse {
    data: Option<Vec<Tweet>>,
    meta: Option<MentionsMeta>,
    errors: Option<Vec<TwitterApiError>>,
}

#[derive(Debug, Deserialize)]
struct MentionsMeta {
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SingleTweetResponse {
    data: Option<Tweet>,
    errors: Option<Vec<TwitterApiError>>,
}

#[derive(Debug, Deserialize)]
struct Tweet {
    id: String,
    text: String,
    author_id: Option<String>,
    created_at: Option<String>,
    conversation_id: Option<String>,
    referenced_tweets: Option<Vec<ReferencedTweet>>,
}

#[derive(Debug, Deserialize)]
struct ReferencedTweet {
    #[serde(rename = "type")]
    ref_type: String,
}

#[derive(Debug, Deserialize)]
struct TwitterApiError {
    message: Option<String>,
    detail: Option<String>,
}

impl TwitterApiError {
    fn text(&self) -> String {
        self.detail
            .clone()
            .or_else(|| self.message.clone())
            .unwrap_or_else(|| "unknown error".to_string())
    }
}

/// Twitter API v2 users response (single user)
#[derive(Debug, Deserialize)]
struct SingleUserResponse {
    data: Option<TwitterUser>,
}

#[derive(Debug, Deserialize)]
struct TwitterUser {
    id: String,
    username: String,
}

/// Twitter API v2 tweet post response
#[derive(Debug, Deserialize)]
struct PostTweetResponse {
    data: Option<PostedTweet>,
    errors: Option<Vec<TwitterApiError>>,
}

#[derive(Debug, Deserialize)]
struct PostedTweet {
    id: String,
}

/// v1.1 media upload response
#[derive(Debug, Deserialize)]
struct MediaUploadResponse {
    media_id_string: String,
}

impl From<Tweet> for Post {
    fn from(tweet: Tweet) -> Self {
        let references = tweet
            .referenced_tweets
            .unwrap_or_default()
            .iter()
            .filter_map(|r| match r.ref_type.as_str() {
                "replied_to" => Some(ReferenceKind::RepliedTo),
                "quoted" => Some(ReferenceKind::Quoted),
                "retweeted" => Some(ReferenceKind::Retweeted),
                _ => None,
            })
            .collect();

        Post {
            id: PostId::from(tweet.id),
            author_id: tweet.author_id.unwrap_or_default(),
            text: tweet.text,
            created_at: tweet
                .created_at
                .as_deref()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|t| t.with_timezone(&Utc)),
            conversation_id: tweet.conversation_id.map(PostId::from),
            references,
        }
    }
}

fn join_errors(errors: &[TwitterApiError]) -> String {
    errors
        .iter()
        .map(|e| e.text())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Rate limit information from Twitter API response headers
#[derive(Debug, Clone, Default)]
struct RateLimitInfo {
    /// Remaining requests in current window
    remaining: Option<u32>,
    /// Unix timestamp when the rate limit resets
    reset_at: Option<u64>,
}

impl RateLimitInfo {
    /// Parse rate limit headers from a response
    fn from_response(response: &reqwest::Response) -> Self {
        let remaining = response
            .headers()
            .get("x-rate-limit-remaining")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());

        let reset_at = response
            .headers()
            .get("x-rate-limit-reset")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());

        Self { remaining, reset_at }
    }

    /// Calculate how long to wait until rate limit resets (in seconds)
    fn seconds_until_reset(&self) -> Option<u64> {
        self.reset_at.map(|reset| {
            let now = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            reset.saturating_sub(now)
        })
    }

    fn backoff_secs(&self) -> u64 {
        self.seconds_until_reset()
            .unwrap_or(DEFAULT_RATE_LIMIT_WAIT_SECS)
            .clamp(MIN_RATE_LIMIT_WAIT_SECS, MAX_RATE_LIMIT_WAIT_SECS)
    }
}

/// Twitter API v2 client bound to the bot account.
pub struct TwitterClient {
    client: reqwest::Client,
    settings: TwitterSettings,
    bot: BotIdentity,
}

impl TwitterClient {
    /// Validate the credentials and resolve the bot account they belong to.
    pub async fn connect(
        client: reqwest::Client,
        settings: TwitterSettings,
    ) -> Result<Self, SourceError> {
        let url = format!("{}/users/me", settings.api_base);
        let auth_header = generate_oauth_header("GET", &url, &settings.credentials, None);

        let response = client
            .get(&url)
            .header("Authorization", auth_header)
            .send()
            .await
            .map_err(|e| SourceError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(SourceError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let data: SingleUserResponse =
            serde_json::from_str(&body).map_err(|e| SourceError::Decode(e.to_string()))?;
        let user = data
            .data
            .ok_or_else(|| SourceError::Decode("No user data returned".to_string()))?;

        log::info!("Twitter: Credentials validated for @{} ({})", user.username, user.id);

        Ok(Self {
            client,
            settings,
            bot: BotIdentity {
                user_id: user.id,
                username: user.username,
            },
        })
    }

    pub fn bot(&self) -> &BotIdentity {
        &self.bot
    }

    fn read_auth_header(&self, url: &str, params: &[(&str, &str)]) -> String {
        match &self.settings.bearer_token {
            Some(token) => format!("Bearer {}", token),
            None => generate_oauth_header("GET", url, &self.settings.credentials, Some(params)),
        }
    }

    /// Send a request, sleeping through 429s. `build` is called once per
    /// attempt so every attempt gets a fresh OAuth nonce and timestamp.
    async fn send_with_backoff<F>(&self, what: &str, build: F) -> Result<(u16, String), SourceError>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut attempt = 1;
        loop {
            let response = build()
                .send()
                .await
                .map_err(|e| SourceError::Transport(e.to_string()))?;

            let rate_limit = RateLimitInfo::from_response(&response);
            let status = response.status().as_u16();

            if let Some(remaining) = rate_limit.remaining {
                if remaining <= 3 {
                    log::warn!(
                        "Twitter: Rate limit low for {} ({} remaining), reset in {:?}s",
                        what,
                        remaining,
                        rate_limit.seconds_until_reset()
                    );
                }
            }

            if status == 429 {
                let wait_secs = rate_limit.backoff_secs();
                if attempt >= MAX_RATE_LIMIT_ATTEMPTS {
                    return Err(SourceError::RateLimited {
                        retry_after_secs: wait_secs,
                    });
                }
                log::warn!(
                    "Twitter: Rate limited on {}, backing off for {} seconds (attempt {}/{})",
                    what,
                    wait_secs,
                    attempt,
                    MAX_RATE_LIMIT_ATTEMPTS
                );
                tokio::time::sleep(Duration::from_secs(wait_secs)).await;
                attempt += 1;
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            log::debug!("Twitter {} response ({}): {}", what, status, body);
            return Ok((status, body));
        }
    }
}

fn format_start_time(start: &DateTime<Utc>) -> String {
    start.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[async_trait]
impl SocialClient for TwitterClient {
    async fn get_mentions(
        &self,
        window: &MentionWindow,
        pagination_token: Option<&str>,
    ) -> Result<MentionPage, SourceError> {
        let url = format!("{}/users/{}/mentions", self.settings.api_base, self.bot.user_id);

        let bound = match window {
            MentionWindow::SinceId(id) => ("since_id", id.to_string()),
            MentionWindow::SinceTime(start) => ("start_time", format_start_time(start)),
        };

        let mut params: Vec<(&str, &str)> = vec![
            ("max_results", MENTIONS_PAGE_SIZE),
            ("tweet.fields", TWEET_FIELDS),
            (bound.0, bound.1.as_str()),
        ];
        if let Some(token) = pagination_token {
            params.push(("pagination_token", token));
        }

        let full_url = format!("{}?{}", url, encode_query(&params));
        let (status, body) = self
            .send_with_backoff("mentions", || {
                self.client
                    .get(&full_url)
                    .header("Authorization", self.read_auth_header(&url, &params))
            })
            .await?;

        if !(200..300).contains(&status) {
            return Err(SourceError::Api { status, body });
        }

        let data: MentionsResponse =
            serde_json::from_str(&body).map_err(|e| SourceError::Decode(e.to_string()))?;

        // Partial errors come back alongside data; only fail when nothing usable arrived
        if let (None, Some(errors)) = (&data.data, &data.errors) {
            return Err(SourceError::Api {
                status,
                body: join_errors(errors),
            });
        }

        Ok(MentionPage {
            items: data
                .data
                .unwrap_or_default()
                .into_iter()
                .map(Post::from)
                .collect(),
            next_token: data.meta.and_then(|m| m.next_token),
        })
    }

    async fn get_post(&self, id: &PostId) -> Result<Post, SourceError> {
        let url = format!("{}/tweets/{}", self.settings.api_base, id);
        let params: Vec<(&str, &str)> = vec![("tweet.fields", TWEET_FIELDS)];
        let full_url = format!("{}?{}", url, encode_query(&params));

        let (status, body) = self
            .send_with_backoff("tweet lookup", || {
                self.client
                    .get(&full_url)
                    .header("Authorization", self.read_auth_header(&url, &params))
            })
            .await?;

        if status == 404 {
            return Err(SourceError::NotFound(id.to_string()));
        }
        if !(200..300).contains(&status) {
            return Err(SourceError::Api { status, body });
        }

        let data: SingleTweetResponse =
            serde_json::from_str(&body).map_err(|e| SourceError::Decode(e.to_string()))?;

        match (data.data, data.errors) {
            (Some(tweet), _) => Ok(Post::from(tweet)),
            (None, Some(errors)) => {
                log::warn!("Twitter: Tweet {} unavailable: {}", id, join_errors(&errors));
                Err(SourceError::NotFound(id.to_string()))
            }
            (None, None) => Err(SourceError::NotFound(id.to_string())),
        }
    }

    async fn upload_media(&self, image: &RenderedImage) -> Result<String, SourceError> {
        let url = format!("{}/media/upload.json", self.settings.upload_base);
        let file_name = match image.content_type.as_str() {
            "image/jpeg" => "reply.jpg",
            "image/webp" => "reply.webp",
            _ => "reply.png",
        };

        let (status, body) = self
            .send_with_backoff("media upload", || {
                let part = reqwest::multipart::Part::bytes(image.bytes.clone()).file_name(file_name);
                let part = match part.mime_str(&image.content_type) {
                    Ok(typed) => typed,
                    Err(_) => reqwest::multipart::Part::bytes(image.bytes.clone()).file_name(file_name),
                };
                let form = reqwest::multipart::Form::new().part("media", part);
                self.client
                    .post(&url)
                    .header(
                        "Authorization",
                        generate_oauth_header("POST", &url, &self.settings.credentials, None),
                    )
                    .multipart(form)
            })
            .await?;

        if !(200..300).contains(&status) {
            return Err(SourceError::Api { status, body });
        }

        let data: MediaUploadResponse =
            serde_json::from_str(&body).map_err(|e| SourceError::Decode(e.to_string()))?;
        log::info!(
            "Twitter: Uploaded media {} ({} bytes)",
            data.media_id_string,
            image.bytes.len()
        );
        Ok(data.media_id_string)
    }

    async fn create_post(
        &self,
        text: &str,
        media_id: Option<&str>,
        in_reply_to: &PostId,
    ) -> Result<String, SourceError> {
        let url = format!("{}/tweets", self.settings.api_base);

        let mut body = serde_json::json!({
            "text": text,
            "reply": { "in_reply_to_tweet_id": in_reply_to.as_str() }
        });
        if let Some(media_id) = media_id {
            body["media"] = serde_json::json!({ "media_ids": [media_id] });
        }

        let (status, response_body) = self
            .send_with_backoff("create tweet", || {
                self.client
                    .post(&url)
                    .header(
                        "Authorization",
                        generate_oauth_header("POST", &url, &self.settings.credentials, None),
                    )
                    .json(&body)
            })
            .await?;

        if !(200..300).contains(&status) {
            return Err(SourceError::Api {
                status,
                body: response_body,
            });
        }

        let data: PostTweetResponse = serde_json::from_str(&response_body)
            .map_err(|e| SourceError::Decode(e.to_string()))?;

        match (data.data, data.errors) {
            (Some(tweet), _) => {
                log::info!("Twitter: Posted reply {} to {}", tweet.id, in_reply_to);
                Ok(tweet.id)
            }
            (None, Some(errors)) => Err(SourceError::Api {
                status,
                body: join_errors(&errors),
            }),
            (None, None) => Err(SourceError::Decode("No tweet data returned".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::twitter::TwitterCredentials;
    use httpmock::prelude::*;
    use serde_json::json;

    fn settings(base: &str) -> TwitterSettings {
        TwitterSettings {
            credentials: TwitterCredentials::new(
                "k".to_string(),
                "s".to_string(),
                "t".to_string(),
                "ts".to_string(),
            ),
            bearer_token: None,
            api_base: base.to_string(),
            upload_base: base.to_string(),
        }
    }

    async fn connected(server: &MockServer) -> TwitterClient {
        server
            .mock_async(|when, then| {
                when.method(GET).path("/users/me");
                then.status(200)
                    .json_body(json!({ "data": { "id": "999", "username": "replybot", "name": "Reply Bot" } }));
            })
            .await;
        TwitterClient::connect(reqwest::Client::new(), settings(&server.base_url()))
            .await
            .unwrap()
    }

    #[test]
    fn test_tweet_conversion() {
        let tweet: Tweet = serde_json::from_value(json!({
            "id": "105",
            "text": "@replybot thoughts?",
            "author_id": "200",
            "created_at": "2024-03-01T12:00:00.000Z",
            "conversation_id": "100",
            "referenced_tweets": [{ "type": "replied_to", "id": "104" }, { "type": "quoted", "id": "50" }]
        }))
        .unwrap();
        let post = Post::from(tweet);
        assert_eq!(post.id.as_str(), "105");
        assert_eq!(post.conversation_id, Some(PostId::from("100")));
        assert_eq!(post.references, vec![ReferenceKind::RepliedTo, ReferenceKind::Quoted]);
        assert_eq!(
            post.created_at.map(|t| t.to_rfc3339()),
            Some("2024-03-01T12:00:00+00:00".to_string())
        );
    }

    #[test]
    fn test_start_time_format() {
        let start = DateTime::parse_from_rfc3339("2024-03-01T12:00:00.250Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(format_start_time(&start), "2024-03-01T12:00:00Z");
    }

    fn unix_now() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs()
    }

    #[test]
    fn test_backoff_defaults_without_reset_header() {
        assert_eq!(RateLimitInfo::default().backoff_secs(), DEFAULT_RATE_LIMIT_WAIT_SECS);
    }

    #[test]
    fn test_backoff_is_clamped() {
        let past = RateLimitInfo {
            remaining: Some(0),
            reset_at: Some(unix_now().saturating_sub(30)),
        };
        assert_eq!(past.backoff_secs(), MIN_RATE_LIMIT_WAIT_SECS);

        let far = RateLimitInfo {
            remaining: Some(0),
            reset_at: Some(unix_now() + 3600),
        };
        assert_eq!(far.backoff_secs(), MAX_RATE_LIMIT_WAIT_SECS);

        let mid = RateLimitInfo {
            remaining: Some(0),
            reset_at: Some(unix_now() + 400),
        };
        let wait = mid.backoff_secs();
        assert!((390..=400).contains(&wait), "wait was {}", wait);
    }

    #[tokio::test]
    async fn test_connect_resolves_bot_identity() {
        let server = MockServer::start_async().await;
        let client = connected(&server).await;
        assert_eq!(client.bot().user_id, "999");
        assert_eq!(client.bot().username, "replybot");
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_credentials() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/users/me");
                then.status(401).body("Unauthorized");
            })
            .await;
        let err = TwitterClient::connect(reqwest::Client::new(), settings(&server.base_url()))
            .await
            .err()
            .unwrap();
        assert_eq!(
            err,
            SourceError::Api {
                status: 401,
                body: "Unauthorized".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_get_mentions_parses_page() {
        let server = MockServer::start_async().await;
        let client = connected(&server).await;
        let mentions = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/users/999/mentions")
                    .query_param("since_id", "100")
                    .query_param("pagination_token", "abc");
                then.status(200).json_body(json!({
                    "data": [
                        { "id": "102", "text": "@replybot hi", "author_id": "1", "conversation_id": "102" },
                        { "id": "101", "text": "@replybot yo", "author_id": "2", "conversation_id": "50" }
                    ],
                    "meta": { "result_count": 2, "next_token": "def" }
                }));
            })
            .await;

        let page = client
            .get_mentions(&MentionWindow::SinceId(PostId::from("100")), Some("abc"))
            .await
            .unwrap();
        mentions.assert_async().await;
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[1].conversation_id, Some(PostId::from("50")));
        assert_eq!(page.next_token.as_deref(), Some("def"));
    }

    #[tokio::test]
    async fn test_get_post_missing_is_not_found() {
        let server = MockServer::start_async().await;
        let client = connected(&server).await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/tweets/100");
                then.status(200).json_body(json!({
                    "errors": [{ "detail": "Could not find tweet with id: [100].", "title": "Not Found Error" }]
                }));
            })
            .await;

        let err = client.get_post(&PostId::from("100")).await.unwrap_err();
        assert_eq!(err, SourceError::NotFound("100".to_string()));
    }

    #[tokio::test]
    async fn test_create_post_sends_reply_and_media() {
        let server = MockServer::start_async().await;
        let client = connected(&server).await;
        let create = server
            .mock_async(|when, then| {
                when.method(POST).path("/tweets").json_body(json!({
                    "text": "short answer",
                    "reply": { "in_reply_to_tweet_id": "105" },
                    "media": { "media_ids": ["777"] }
                }));
                then.status(201)
                    .json_body(json!({ "data": { "id": "2000", "text": "short answer" } }));
            })
            .await;

        let id = client
            .create_post("short answer", Some("777"), &PostId::from("105"))
            .await
            .unwrap();
        create.assert_async().await;
        assert_eq!(id, "2000");
    }

    #[tokio::test]
    async fn test_upload_media_returns_handle() {
        let server = MockServer::start_async().await;
        let client = connected(&server).await;
        let upload = server
            .mock_async(|when, then| {
                when.method(POST).path("/media/upload.json");
                then.status(200)
                    .json_body(json!({ "media_id": 777, "media_id_string": "777" }));
            })
            .await;

        let image = RenderedImage {
            bytes: vec![0x89, b'P', b'N', b'G'],
            content_type: "image/png".to_string(),
        };
        let media_id = client.upload_media(&image).await.unwrap();
        upload.assert_async().await;
        assert_eq!(media_id, "777");
    }
}
