use super::{api_error, non_empty, transport_error, CompletionService};
use crate::error::ServiceError;
use async_trait::async_trait;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};

/// Chat-completions endpoint (OpenAI or any compatible gateway).
#[derive(Clone)]
pub struct OpenAiCompletion {
    client: Client,
    endpoint: String,
    api_key: String,
    model: Option<String>,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

impl OpenAiCompletion {
    pub fn new(client: Client, endpoint: &str, api_key: &str, model: Option<&str>) -> Self {
        Self {
            client,
            endpoint: endpoint.to_string(),
            api_key: api_key.to_string(),
            model: model.map(|m| m.to_string()),
            max_tokens: 1024,
        }
    }
}

#[async_trait]
impl CompletionService for OpenAiCompletion {
    async fn complete(&self, prompt: &str) -> Result<String, ServiceError> {
        let request = CompletionRequest {
            model: self.model.as_deref(),
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens: self.max_tokens,
        };

        log::debug!("[AI] Sending completion request to {}", self.endpoint);

        let mut builder = self
            .client
            .post(&self.endpoint)
            .header(header::CONTENT_TYPE, "application/json")
            .json(&request);
        // Only add auth header if API key is provided and not empty
        if !self.api_key.is_empty() {
            builder = builder.bearer_auth(&self.api_key);
        }

        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<ErrorResponse>(&body) {
                return Err(ServiceError::Api {
                    status: status.as_u16(),
                    body: error.error.message,
                });
            }
            return Err(api_error(status.as_u16(), &body));
        }

        let parsed: CompletionResponse =
            serde_json::from_str(&body).map_err(|e| ServiceError::Decode(e.to_string()))?;
        non_empty(parsed.choices.into_iter().next().and_then(|c| c.message.content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_complete_returns_first_choice() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/chat/completions")
                    .header("authorization", "Bearer sk-test")
                    .json_body(json!({
                        "model": "gpt-4o-mini",
                        "messages": [{ "role": "user", "content": "Is the sky green?" }],
                        "max_tokens": 1024
                    }));
                then.status(200).json_body(json!({
                    "choices": [{ "index": 0, "message": { "role": "assistant", "content": " No, it is blue. " }, "finish_reason": "stop" }]
                }));
            })
            .await;

        let service = OpenAiCompletion::new(
            Client::new(),
            &server.url("/v1/chat/completions"),
            "sk-test",
            Some("gpt-4o-mini"),
        );
        let text = service.complete("Is the sky green?").await.unwrap();
        mock.assert_async().await;
        assert_eq!(text, "No, it is blue.");
    }

    #[tokio::test]
    async fn test_complete_surfaces_api_error_message() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(401)
                    .json_body(json!({ "error": { "message": "Incorrect API key provided", "type": "invalid_request_error" } }));
            })
            .await;

        let service = OpenAiCompletion::new(Client::new(), &server.url("/v1/chat/completions"), "bad", None);
        assert_eq!(
            service.complete("hi").await.unwrap_err(),
            ServiceError::Api {
                status: 401,
                body: "Incorrect API key provided".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_complete_rejects_empty_content() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(200)
                    .json_body(json!({ "choices": [{ "message": { "role": "assistant", "content": null } }] }));
            })
            .await;

        let service = OpenAiCompletion::new(Client::new(), &server.url("/v1/chat/completions"), "", None);
        assert_eq!(service.complete("hi").await.unwrap_err(), ServiceError::Empty);
    }
}
