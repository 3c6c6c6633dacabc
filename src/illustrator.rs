//! Optional illustration for a post via an image-generation API.
//!
//! Failures are logged and yield `None`; a missing image never blocks publishing.

use crate::config::IllustratorConfig;
use crate::utils::truncate_for_log;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Produces image bytes for a headline, or nothing.
pub trait Illustrate {
    async fn illustrate(&self, title: &str) -> Option<Vec<u8>>;
}

pub fn image_prompt(title: &str) -> String {
    format!("News illustration: {title}, digital art, modern news style, professional")
}

#[derive(Serialize)]
struct ImageRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    n: u8,
    size: &'a str,
    response_format: &'a str,
}

#[derive(Deserialize)]
struct ImageResponse {
    #[serde(default)]
    data: Vec<ImageData>,
}

#[derive(Deserialize)]
struct ImageData {
    url: Option<String>,
}

/// OpenAI-compatible `/v1/images/generations` client.
pub struct ImageClient {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    size: String,
}

impl ImageClient {
    pub fn new(
        config: &IllustratorConfig,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, Box<dyn Error>> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            endpoint: config.endpoint.clone(),
            api_key,
            model: config.model.clone(),
            size: config.size.clone(),
        })
    }

    async fn generate(&self, prompt: &str) -> Result<Vec<u8>, Box<dyn Error>> {
        let body = ImageRequest {
            model: &self.model,
            prompt,
            n: 1,
            size: &self.size,
            response_format: "url",
        };
        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(format!(
                "image generation returned {status}: {}",
                truncate_for_log(&detail, 200)
            )
            .into());
        }

        let reply: ImageResponse = response.json().await?;
        let url = reply
            .data
            .into_iter()
            .find_map(|d| d.url)
            .ok_or("image generation returned no url")?;
        debug!(%url, "Downloading generated image");

        let bytes = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        if bytes.is_empty() {
            return Err("generated image is empty".into());
        }
        Ok(bytes.to_vec())
    }
}

impl Illustrate for ImageClient {
    #[instrument(level = "info", skip(self))]
    async fn illustrate(&self, title: &str) -> Option<Vec<u8>> {
        match self.generate(&image_prompt(title)).await {
            Ok(bytes) => {
                info!(bytes = bytes.len(), "Generated illustration");
                Some(bytes)
            }
            Err(e) => {
                warn!(error = %e, "Illustration failed; publishing without image");
                None
            }
        }
    }
}

/// Used when illustrations are disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoIllustration;

impl Illustrate for NoIllustration {
    async fn illustrate(&self, _title: &str) -> Option<Vec<u8>> {
        None
    }
}

/// Either a configured image client or nothing, chosen at start-up.
pub enum Illustrator {
    Image(ImageClient),
    Disabled(NoIllustration),
}

impl Illustrator {
    pub fn from_config(
        config: &IllustratorConfig,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, Box<dyn Error>> {
        if config.enabled {
            Ok(Self::Image(ImageClient::new(config, api_key, timeout)?))
        } else {
            Ok(Self::Disabled(NoIllustration))
        }
    }
}

impl Illustrate for Illustrator {
    async fn illustrate(&self, title: &str) -> Option<Vec<u8>> {
        match self {
            Self::Image(client) => client.illustrate(title).await,
            Self::Disabled(none) => none.illustrate(title).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer) -> IllustratorConfig {
        IllustratorConfig {
            enabled: true,
            endpoint: format!("{}/v1/images/generations", server.uri()),
            ..Default::default()
        }
    }

    #[test]
    fn test_image_prompt() {
        assert_eq!(
            image_prompt("Chips get faster"),
            "News illustration: Chips get faster, digital art, modern news style, professional"
        );
    }

    #[tokio::test]
    async fn test_illustrate_downloads_image() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/images/generations"))
            .and(body_partial_json(json!({"response_format": "url", "n": 1})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"url": format!("{}/files/img.png", server.uri())}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/files/img.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0x89, 0x50, 0x4e, 0x47]))
            .mount(&server)
            .await;

        let client =
            ImageClient::new(&config(&server), Some("k".to_string()), Duration::from_secs(5))
                .unwrap();
        let bytes = client.illustrate("Chips get faster").await;
        assert_eq!(bytes, Some(vec![0x89, 0x50, 0x4e, 0x47]));
    }

    #[tokio::test]
    async fn test_illustrate_failure_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("content policy"))
            .mount(&server)
            .await;

        let client = ImageClient::new(&config(&server), None, Duration::from_secs(5)).unwrap();
        assert!(client.illustrate("Anything").await.is_none());
    }

    #[tokio::test]
    async fn test_disabled_illustrator() {
        let illustrator =
            Illustrator::from_config(&IllustratorConfig::default(), None, Duration::from_secs(5))
                .unwrap();
        assert!(matches!(illustrator, Illustrator::Disabled(_)));
        assert!(illustrator.illustrate("Anything").await.is_none());
    }
}
