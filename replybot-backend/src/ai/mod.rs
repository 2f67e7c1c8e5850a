//! Chat-completion collaborators used to draft and summarize replies.

mod chatbase;
mod openai;

pub use chatbase::ChatbaseCompletion;
pub use openai::OpenAiCompletion;

use crate::config::{ChatProvider, ChatSettings};
use crate::error::ServiceError;
use async_trait::async_trait;
use std::sync::Arc;

/// Longest error body kept in a `ServiceError::Api`
const MAX_ERROR_BODY_CHARS: usize = 200;

/// A single-turn prompt in, text out.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, ServiceError>;
}

/// Build the completion client for the configured provider.
pub fn build_completion(client: reqwest::Client, settings: &ChatSettings) -> Arc<dyn CompletionService> {
    match settings.provider {
        ChatProvider::OpenAi => Arc::new(OpenAiCompletion::new(
            client,
            &settings.endpoint,
            &settings.api_key,
            settings.model.as_deref(),
        )),
        ChatProvider::Chatbase => Arc::new(ChatbaseCompletion::new(
            client,
            &settings.endpoint,
            &settings.api_key,
            settings.chatbot_id.as_deref().unwrap_or_default(),
        )),
    }
}

/// Map a non-2xx response into a `ServiceError`, keeping the body short.
pub(crate) fn api_error(status: u16, body: &str) -> ServiceError {
    let trimmed = body.trim_start();
    let body = if trimmed.starts_with("<!DOCTYPE") || trimmed.starts_with("<html") {
        "HTML error page".to_string()
    } else {
        crate::text::shorten_for_log(trimmed, MAX_ERROR_BODY_CHARS)
    };
    ServiceError::Api { status, body }
}

pub(crate) fn transport_error(e: reqwest::Error) -> ServiceError {
    ServiceError::Transport(e.to_string())
}

/// Reject blank completions so callers can fall back.
pub(crate) fn non_empty(text: Option<String>) -> Result<String, ServiceError> {
    match text {
        Some(t) if !t.trim().is_empty() => Ok(t.trim().to_string()),
        _ => Err(ServiceError::Empty),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_hides_html_pages() {
        assert_eq!(
            api_error(502, "<html><body>Bad gateway</body></html>"),
            ServiceError::Api {
                status: 502,
                body: "HTML error page".to_string()
            }
        );
        let long = "x".repeat(500);
        match api_error(500, &long) {
            ServiceError::Api { body, .. } => assert_eq!(body.chars().count(), MAX_ERROR_BODY_CHARS + 3),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_non_empty() {
        assert_eq!(non_empty(Some("  hi ".to_string())), Ok("hi".to_string()));
        assert_eq!(non_empty(Some("   ".to_string())), Err(ServiceError::Empty));
        assert_eq!(non_empty(None), Err(ServiceError::Empty));
    }
}
