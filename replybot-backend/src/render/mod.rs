//! Reply card rendering: model output to HTML to an image.

use crate::error::ServiceError;
use crate::models::RenderedImage;
use crate::text;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Card markup with a `{response_text}` placeholder
const CARD_TEMPLATE: &str = include_str!("../../templates/reply_card.html");

const PLACEHOLDER: &str = "{response_text}";

/// Longest body rendered into a card
pub const MAX_CARD_CHARS: usize = 3000;

const VIEWPORT_WIDTH: u32 = 375;
const VIEWPORT_HEIGHT: u32 = 812;

/// Turns an HTML document into an image.
#[async_trait]
pub trait ImageRenderer: Send + Sync {
    async fn render(&self, html: &str) -> Result<RenderedImage, ServiceError>;
}

/// Fill the card template with `body`, capped and converted to HTML.
pub fn card_html(body: &str) -> String {
    let html = text::markup_to_html(&text::take_chars(body, MAX_CARD_CHARS));
    CARD_TEMPLATE.replace(PLACEHOLDER, &html)
}

#[derive(Debug, Serialize)]
struct RenderRequest<'a> {
    html: &'a str,
    google_fonts: &'a str,
    viewport_width: u32,
    viewport_height: u32,
}

#[derive(Debug, Deserialize)]
struct RenderResponse {
    url: String,
}

/// HTML/CSS-to-image API client. The API returns a URL; the image is then downloaded.
pub struct HctiRenderer {
    client: reqwest::Client,
    endpoint: String,
    user_id: String,
    api_key: String,
    google_fonts: String,
}

impl HctiRenderer {
    pub fn new(
        client: reqwest::Client,
        endpoint: &str,
        user_id: &str,
        api_key: &str,
        google_fonts: &str,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.to_string(),
            user_id: user_id.to_string(),
            api_key: api_key.to_string(),
            google_fonts: google_fonts.to_string(),
        }
    }
}

#[async_trait]
impl ImageRenderer for HctiRenderer {
    async fn render(&self, html: &str) -> Result<RenderedImage, ServiceError> {
        let request = RenderRequest {
            html,
            google_fonts: &self.google_fonts,
            viewport_width: VIEWPORT_WIDTH,
            viewport_height: VIEWPORT_HEIGHT,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .basic_auth(&self.user_id, Some(&self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(crate::ai::transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(crate::ai::transport_error)?;
        if !status.is_success() {
            return Err(crate::ai::api_error(status.as_u16(), &body));
        }
        let created: RenderResponse =
            serde_json::from_str(&body).map_err(|e| ServiceError::Decode(e.to_string()))?;

        log::debug!("[render] Image created at {}", created.url);

        let image = self
            .client
            .get(&created.url)
            .send()
            .await
            .map_err(crate::ai::transport_error)?;
        let status = image.status();
        if !status.is_success() {
            return Err(ServiceError::Api {
                status: status.as_u16(),
                body: format!("image download from {} failed", created.url),
            });
        }
        let content_type = image
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string())
            .unwrap_or_else(|| "image/png".to_string());
        let bytes = image.bytes().await.map_err(crate::ai::transport_error)?;
        if bytes.is_empty() {
            return Err(ServiceError::Empty);
        }

        Ok(RenderedImage {
            bytes: bytes.to_vec(),
            content_type,
        })
    }
}
