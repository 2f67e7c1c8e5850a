use super::{api_error, non_empty, transport_error, CompletionService};
use crate::error::ServiceError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Hosted chatbot API: a trained bot answers a single user message.
#[derive(Clone)]
pub struct ChatbaseCompletion {
    client: Client,
    endpoint: String,
    api_key: String,
    chatbot_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatRequest<'a> {
    messages: Vec<ChatMessage<'a>>,
    chatbot_id: &'a str,
    stream: bool,
    temperature: u8,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    content: &'a str,
    role: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    text: Option<String>,
}

impl ChatbaseCompletion {
    pub fn new(client: Client, endpoint: &str, api_key: &str, chatbot_id: &str) -> Self {
        Self {
            client,
            endpoint: endpoint.to_string(),
            api_key: api_key.to_string(),
            chatbot_id: chatbot_id.to_string(),
        }
    }
}

#[async_trait]
impl CompletionService for ChatbaseCompletion {
    async fn complete(&self, prompt: &str) -> Result<String, ServiceError> {
        let request = ChatRequest {
            messages: vec![ChatMessage {
                content: prompt,
                role: "user",
            }],
            chatbot_id: &self.chatbot_id,
            stream: false,
            temperature: 0,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;
        if !status.is_success() {
            return Err(api_error(status.as_u16(), &body));
        }

        let parsed: ChatResponse =
            serde_json::from_str(&body).map_err(|e| ServiceError::Decode(e.to_string()))?;
        non_empty(parsed.text)
    }
}
