use crate::error::ConfigError;
use crate::models::DedupKey;
use crate::pipeline::{CursorPolicy, PipelineSettings};
use crate::twitter::TwitterCredentials;
use std::env;
use std::time::Duration;

/// Environment variable names - single source of truth
pub mod env_vars {
    pub const TWITTER_API_KEY: &str = "TWITTER_API_KEY";
    pub const TWITTER_API_SECRET: &str = "TWITTER_API_SECRET";
    pub const TWITTER_ACCESS_TOKEN: &str = "TWITTER_ACCESS_TOKEN";
    pub const TWITTER_ACCESS_TOKEN_SECRET: &str = "TWITTER_ACCESS_TOKEN_SECRET";
    pub const TWITTER_BEARER_TOKEN: &str = "TWITTER_BEARER_TOKEN";
    pub const TWITTER_API_BASE: &str = "TWITTER_API_BASE";
    pub const TWITTER_UPLOAD_BASE: &str = "TWITTER_UPLOAD_BASE";
    // Chat service
    pub const CHAT_PROVIDER: &str = "CHAT_PROVIDER";
    pub const CHAT_API_URL: &str = "CHAT_API_URL";
    pub const CHAT_API_KEY: &str = "CHAT_API_KEY";
    pub const CHAT_MODEL: &str = "CHAT_MODEL";
    pub const CHATBOT_ID: &str = "CHATBOT_ID";
    // Summarizer (falls back to the chat settings)
    pub const SUMMARY_ENABLED: &str = "SUMMARY_ENABLED";
    pub const SUMMARY_API_URL: &str = "SUMMARY_API_URL";
    pub const SUMMARY_API_KEY: &str = "SUMMARY_API_KEY";
    pub const SUMMARY_MODEL: &str = "SUMMARY_MODEL";
    pub const REPLY_PROMO_SUFFIX: &str = "REPLY_PROMO_SUFFIX";
    // HTML-to-image renderer
    pub const RENDER_ENABLED: &str = "RENDER_ENABLED";
    pub const HCTI_API_URL: &str = "HCTI_API_URL";
    pub const HCTI_USER_ID: &str = "HCTI_USER_ID";
    pub const HCTI_API_KEY: &str = "HCTI_API_KEY";
    pub const RENDER_GOOGLE_FONTS: &str = "RENDER_GOOGLE_FONTS";
    // Stores
    pub const DATABASE_URL: &str = "DATABASE_URL";
    pub const CURSOR_BACKEND: &str = "CURSOR_BACKEND";
    pub const CURSOR_KEY: &str = "CURSOR_KEY";
    pub const REDIS_URL: &str = "REDIS_URL";
    pub const LEDGER_BACKEND: &str = "LEDGER_BACKEND";
    pub const AIRTABLE_API_KEY: &str = "AIRTABLE_API_KEY";
    pub const AIRTABLE_BASE_KEY: &str = "AIRTABLE_BASE_KEY";
    pub const AIRTABLE_TABLE_NAME: &str = "AIRTABLE_TABLE_NAME";
    // Pipeline
    pub const BATCH_LIMIT: &str = "REPLYBOT_BATCH_LIMIT";
    pub const POLL_INTERVAL_SECS: &str = "REPLYBOT_POLL_INTERVAL_SECS";
    pub const LOOKBACK_MINUTES: &str = "REPLYBOT_LOOKBACK_MINUTES";
    pub const MAX_PAGES: &str = "REPLYBOT_MAX_PAGES";
    pub const CALL_TIMEOUT_SECS: &str = "REPLYBOT_CALL_TIMEOUT_SECS";
    pub const TWEET_MAX_CHARS: &str = "REPLYBOT_TWEET_MAX_CHARS";
    pub const DEDUP_KEY: &str = "REPLYBOT_DEDUP_KEY";
    pub const CURSOR_POLICY: &str = "REPLYBOT_CURSOR_POLICY";
    pub const MAX_PUBLISH_ATTEMPTS: &str = "REPLYBOT_MAX_PUBLISH_ATTEMPTS";
    pub const RUN_ONCE: &str = "REPLYBOT_RUN_ONCE";
}

/// Default values
pub mod defaults {
    pub const TWITTER_API_BASE: &str = "https://api.twitter.com/2";
    pub const TWITTER_UPLOAD_BASE: &str = "https://upload.twitter.com/1.1";
    pub const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";
    pub const CHATBASE_CHAT_URL: &str = "https://www.chatbase.co/api/v1/chat";
    pub const HCTI_API_URL: &str = "https://hcti.io/v1/image";
    pub const AIRTABLE_API_BASE: &str = "https://api.airtable.com/v0";
    pub const GOOGLE_FONTS: &str = "Roboto";
    pub const PROMO_SUFFIX: &str = " Full answer in the image below.";
    pub const DATABASE_URL: &str = "./.db/replybot.db";
    pub const REDIS_URL: &str = "redis://127.0.0.1:6379";
    pub const CURSOR_KEY: &str = "replybot:last_mention_id";
    pub const BATCH_LIMIT: usize = 35;
    pub const POLL_INTERVAL_SECS: u64 = 180;
    pub const MIN_POLL_INTERVAL_SECS: u64 = 60;
    pub const LOOKBACK_MINUTES: i64 = 20;
    pub const MAX_PAGES: usize = 10;
    pub const CALL_TIMEOUT_SECS: u64 = 60;
    pub const TWEET_MAX_CHARS: usize = 280;
    pub const MAX_PUBLISH_ATTEMPTS: u32 = 3;
}

/// Which chat API dialect the completion endpoint speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatProvider {
    OpenAi,
    Chatbase,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatSettings {
    pub provider: ChatProvider,
    pub endpoint: String,
    pub api_key: String,
    pub model: Option<String>,
    pub chatbot_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SummarySettings {
    /// None when summarization is disabled
    pub chat: Option<ChatSettings>,
    pub promo_suffix: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderSettings {
    pub endpoint: String,
    pub user_id: String,
    pub api_key: String,
    pub google_fonts: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TwitterSettings {
    pub credentials: TwitterCredentials,
    pub bearer_token: Option<String>,
    pub api_base: String,
    pub upload_base: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorBackend {
    Sqlite,
    Redis,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LedgerBackend {
    Sqlite,
    Airtable {
        api_key: String,
        base_key: String,
        table_name: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct StorageSettings {
    pub database_url: String,
    pub cursor_backend: CursorBackend,
    pub cursor_key: String,
    pub redis_url: String,
    pub ledger_backend: LedgerBackend,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub twitter: TwitterSettings,
    pub chat: ChatSettings,
    pub summary: SummarySettings,
    pub render: Option<RenderSettings>,
    pub storage: StorageSettings,
    pub pipeline: PipelineSettings,
    pub poll_interval_secs: u64,
    pub run_once: bool,
}

impl Config {
    /// Load from the process environment (after `dotenv`).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load from an arbitrary variable lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let require = |name: &'static str| get(name).ok_or(ConfigError::Missing(name));

        let twitter = TwitterSettings {
            credentials: TwitterCredentials::new(
                require(env_vars::TWITTER_API_KEY)?,
                require(env_vars::TWITTER_API_SECRET)?,
                require(env_vars::TWITTER_ACCESS_TOKEN)?,
                require(env_vars::TWITTER_ACCESS_TOKEN_SECRET)?,
            ),
            bearer_token: get(env_vars::TWITTER_BEARER_TOKEN),
            api_base: get(env_vars::TWITTER_API_BASE)
                .unwrap_or_else(|| defaults::TWITTER_API_BASE.to_string()),
            upload_base: get(env_vars::TWITTER_UPLOAD_BASE)
                .unwrap_or_else(|| defaults::TWITTER_UPLOAD_BASE.to_string()),
        };

        let provider = match get(env_vars::CHAT_PROVIDER) {
            None => ChatProvider::OpenAi,
            Some(v) => match v.to_ascii_lowercase().as_str() {
                "openai" => ChatProvider::OpenAi,
                "chatbase" => ChatProvider::Chatbase,
                _ => {
                    return Err(ConfigError::Invalid {
                        var: env_vars::CHAT_PROVIDER,
                        value: v,
                    })
                }
            },
        };
        let default_chat_url = match provider {
            ChatProvider::OpenAi => defaults::OPENAI_CHAT_URL,
            ChatProvider::Chatbase => defaults::CHATBASE_CHAT_URL,
        };
        let chat = ChatSettings {
            provider,
            endpoint: get(env_vars::CHAT_API_URL).unwrap_or_else(|| default_chat_url.to_string()),
            api_key: get(env_vars::CHAT_API_KEY).unwrap_or_default(),
            model: get(env_vars::CHAT_MODEL),
            chatbot_id: get(env_vars::CHATBOT_ID),
        };
        if provider == ChatProvider::Chatbase && chat.chatbot_id.is_none() {
            return Err(ConfigError::Missing(env_vars::CHATBOT_ID));
        }

        let summary_enabled = parse_bool(get(env_vars::SUMMARY_ENABLED), !chat.api_key.is_empty());
        let summary = SummarySettings {
            chat: summary_enabled.then(|| ChatSettings {
                // Summaries are plain completions; a chatbot persona would answer instead
                provider: ChatProvider::OpenAi,
                endpoint: get(env_vars::SUMMARY_API_URL).unwrap_or_else(|| {
                    if provider == ChatProvider::OpenAi {
                        chat.endpoint.clone()
                    } else {
                        defaults::OPENAI_CHAT_URL.to_string()
                    }
                }),
                api_key: get(env_vars::SUMMARY_API_KEY).unwrap_or_else(|| chat.api_key.clone()),
                model: get(env_vars::SUMMARY_MODEL).or_else(|| chat.model.clone()),
                chatbot_id: None,
            }),
            promo_suffix: lookup(env_vars::REPLY_PROMO_SUFFIX)
                .unwrap_or_else(|| defaults::PROMO_SUFFIX.to_string()),
        };

        let render_credentials = (get(env_vars::HCTI_USER_ID), get(env_vars::HCTI_API_KEY));
        let render_enabled = parse_bool(
            get(env_vars::RENDER_ENABLED),
            render_credentials.0.is_some() && render_credentials.1.is_some(),
        );
        let render = if render_enabled {
            match render_credentials {
                (Some(user_id), Some(api_key)) => Some(RenderSettings {
                    endpoint: get(env_vars::HCTI_API_URL)
                        .unwrap_or_else(|| defaults::HCTI_API_URL.to_string()),
                    user_id,
                    api_key,
                    google_fonts: get(env_vars::RENDER_GOOGLE_FONTS)
                        .unwrap_or_else(|| defaults::GOOGLE_FONTS.to_string()),
                }),
                (None, _) => return Err(ConfigError::Missing(env_vars::HCTI_USER_ID)),
                (_, None) => return Err(ConfigError::Missing(env_vars::HCTI_API_KEY)),
            }
        } else {
            None
        };

        let cursor_backend = match get(env_vars::CURSOR_BACKEND).as_deref() {
            None | Some("sqlite") => CursorBackend::Sqlite,
            Some("redis") => CursorBackend::Redis,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: env_vars::CURSOR_BACKEND,
                    value: other.to_string(),
                })
            }
        };
        let ledger_backend = match get(env_vars::LEDGER_BACKEND).as_deref() {
            None | Some("sqlite") => LedgerBackend::Sqlite,
            Some("airtable") => LedgerBackend::Airtable {
                api_key: require(env_vars::AIRTABLE_API_KEY)?,
                base_key: require(env_vars::AIRTABLE_BASE_KEY)?,
                table_name: require(env_vars::AIRTABLE_TABLE_NAME)?,
            },
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: env_vars::LEDGER_BACKEND,
                    value: other.to_string(),
                })
            }
        };
        let storage = StorageSettings {
            database_url: get(env_vars::DATABASE_URL)
                .unwrap_or_else(|| defaults::DATABASE_URL.to_string()),
            cursor_backend,
            cursor_key: get(env_vars::CURSOR_KEY).unwrap_or_else(|| defaults::CURSOR_KEY.to_string()),
            redis_url: get(env_vars::REDIS_URL).unwrap_or_else(|| defaults::REDIS_URL.to_string()),
            ledger_backend,
        };

        let dedup_key = match get(env_vars::DEDUP_KEY) {
            None => DedupKey::Target,
            Some(v) => DedupKey::parse(&v).ok_or(ConfigError::Invalid {
                var: env_vars::DEDUP_KEY,
                value: v,
            })?,
        };
        let cursor_policy = match get(env_vars::CURSOR_POLICY) {
            None => CursorPolicy::OnRecord,
            Some(v) => CursorPolicy::parse(&v).ok_or(ConfigError::Invalid {
                var: env_vars::CURSOR_POLICY,
                value: v,
            })?,
        };

        let pipeline = PipelineSettings {
            batch_limit: parse_number(&get, env_vars::BATCH_LIMIT, defaults::BATCH_LIMIT).max(1),
            lookback_minutes: parse_number(&get, env_vars::LOOKBACK_MINUTES, defaults::LOOKBACK_MINUTES)
                .max(1),
            max_pages: parse_number(&get, env_vars::MAX_PAGES, defaults::MAX_PAGES).max(1),
            call_timeout: Duration::from_secs(
                parse_number(&get, env_vars::CALL_TIMEOUT_SECS, defaults::CALL_TIMEOUT_SECS).max(1),
            ),
            tweet_max_chars: parse_number(&get, env_vars::TWEET_MAX_CHARS, defaults::TWEET_MAX_CHARS)
                .max(10),
            dedup_key,
            cursor_policy,
            cursor_key: storage.cursor_key.clone(),
            max_publish_attempts: parse_number(&get, env_vars::MAX_PUBLISH_ATTEMPTS, defaults::MAX_PUBLISH_ATTEMPTS)
                .max(1),
        };

        Ok(Self {
            twitter,
            chat,
            summary,
            render,
            storage,
            pipeline,
            poll_interval_secs: parse_number(&get, env_vars::POLL_INTERVAL_SECS, defaults::POLL_INTERVAL_SECS)
                .max(defaults::MIN_POLL_INTERVAL_SECS),
            run_once: parse_bool(get(env_vars::RUN_ONCE), false),
        })
    }
}

fn parse_bool(value: Option<String>, default: bool) -> bool {
    value
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(default)
}

fn parse_number<T, G>(get: &G, name: &str, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Display + Copy,
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            log::warn!("{}='{}' is not a valid number, using {}", name, raw, default);
            default
        }),
    }
}
