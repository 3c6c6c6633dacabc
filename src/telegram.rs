//! Telegram Bot API delivery.
//!
//! Posts go out as `sendPhoto` with the summary as an HTML caption when an
//! image is available and the caption fits, otherwise as `sendMessage`.
//! Every call reports plain success or failure; nothing is retried.

use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::error::Error;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, instrument, warn};

/// Telegram's limit on photo captions, in characters.
pub const CAPTION_LIMIT: usize = 1024;

/// Delivers one finished post.
pub trait Publish {
    async fn publish(&self, text: &str, image: Option<&[u8]>) -> bool;
}

/// Why a Bot API call did not succeed. Messages never include the request
/// URL, since it embeds the bot token.
#[derive(Debug, Error)]
pub enum SendError {
    /// Telegram answered and refused the request; nothing was posted.
    #[error("telegram rejected the request ({status}): {description}")]
    Rejected {
        status: StatusCode,
        description: String,
    },

    /// No answer arrived (connect failure, timeout). The post may have gone out.
    #[error("telegram request failed: {0}")]
    Transport(reqwest::Error),

    /// A success status with a body that is not a Bot API reply.
    #[error("telegram returned {0} with an unreadable reply")]
    Unconfirmed(StatusCode),
}

impl SendError {
    /// `true` when Telegram definitely did not post anything.
    pub fn is_rejection(&self) -> bool {
        matches!(self, SendError::Rejected { .. })
    }
}

impl From<reqwest::Error> for SendError {
    fn from(e: reqwest::Error) -> Self {
        SendError::Transport(e.without_url())
    }
}

#[derive(Deserialize)]
struct ApiReply {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Escape the characters Telegram's HTML parse mode treats as markup.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Minimal Bot API client bound to one bot token.
pub struct TelegramClient {
    client: Client,
    api_base: String,
    token: String,
}

impl TelegramClient {
    pub fn new(api_base: &str, token: &str, timeout: Duration) -> Result<Self, Box<dyn Error>> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    async fn check(response: reqwest::Response) -> Result<(), SendError> {
        let status = response.status();
        let body = response.bytes().await?;
        match serde_json::from_slice::<ApiReply>(&body) {
            Ok(reply) if reply.ok && status.is_success() => Ok(()),
            Ok(reply) => Err(SendError::Rejected {
                status,
                description: reply.description.unwrap_or_default(),
            }),
            Err(_) if status.is_success() => Err(SendError::Unconfirmed(status)),
            Err(_) => Err(SendError::Rejected {
                status,
                description: String::from_utf8_lossy(&body).chars().take(200).collect(),
            }),
        }
    }

    async fn try_send_message(
        &self,
        chat_id: &str,
        text: &str,
        html: bool,
    ) -> Result<(), SendError> {
        let mut body = json!({
            "chat_id": chat_id,
            "text": text,
            "disable_web_page_preview": true,
        });
        if html {
            body["parse_mode"] = json!("HTML");
        }
        let response = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&body)
            .send()
            .await?;
        Self::check(response).await
    }

    async fn try_send_photo(
        &self,
        chat_id: &str,
        image: &[u8],
        caption: &str,
    ) -> Result<(), SendError> {
        let photo = Part::bytes(image.to_vec())
            .file_name("image.jpg")
            .mime_str("image/jpeg")?;
        let form = Form::new()
            .text("chat_id", chat_id.to_string())
            .text("caption", caption.to_string())
            .text("parse_mode", "HTML")
            .part("photo", photo);
        let response = self
            .client
            .post(self.method_url("sendPhoto"))
            .multipart(form)
            .send()
            .await?;
        Self::check(response).await
    }

    /// Send a text message; `html` enables HTML parse mode.
    #[instrument(level = "info", skip(self, text), fields(chars = text.chars().count()))]
    pub async fn send_message(&self, chat_id: &str, text: &str, html: bool) -> bool {
        match self.try_send_message(chat_id, text, html).await {
            Ok(()) => {
                info!("Message sent");
                true
            }
            Err(e) => {
                warn!(error = %e, "sendMessage failed");
                false
            }
        }
    }

    /// Send a photo with an HTML caption.
    #[instrument(level = "info", skip(self, image, caption), fields(bytes = image.len()))]
    pub async fn send_photo(
        &self,
        chat_id: &str,
        image: &[u8],
        caption: &str,
    ) -> Result<(), SendError> {
        match self.try_send_photo(chat_id, image, caption).await {
            Ok(()) => {
                info!("Photo sent");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "sendPhoto failed");
                Err(e)
            }
        }
    }
}

/// Publishes posts into one channel.
pub struct ChannelPublisher {
    bot: TelegramClient,
    chat_id: String,
}

impl ChannelPublisher {
    pub fn new(bot: TelegramClient, chat_id: &str) -> Self {
        Self {
            bot,
            chat_id: chat_id.to_string(),
        }
    }
}

impl Publish for ChannelPublisher {
    async fn publish(&self, text: &str, image: Option<&[u8]>) -> bool {
        let escaped = escape_html(text);
        if let Some(image) = image {
            let chars = escaped.chars().count();
            if chars <= CAPTION_LIMIT {
                match self.bot.send_photo(&self.chat_id, image, &escaped).await {
                    Ok(()) => return true,
                    Err(e) if e.is_rejection() => warn!("Falling back to text message"),
                    // The photo may already be in the channel; a text copy would double-post.
                    Err(_) => return false,
                }
            } else {
                info!(chars, "Caption too long for photo; sending text");
            }
        }
        self.bot.send_message(&self.chat_id, &escaped, true).await
    }
}
