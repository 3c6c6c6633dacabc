//! Article summarization through an OpenAI-compatible chat API.
//!
//! - [`AskAsync`]: core trait for sending one prompt and receiving text
//! - [`ChatClient`]: `reqwest` implementation against `/v1/chat/completions`
//! - [`Summarizer`]: builds the post prompt and trims the model's framing
//!
//! A failed or empty completion is reported as an error; the caller leaves the
//! article unsent so the next run retries it.

use crate::config::SummarizerConfig;
use crate::utils::{estimate_tokens, truncate_for_log};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::time::{Duration, Instant};
use tracing::{info, instrument, warn};

/// Trait for async LLM interaction.
///
/// Implementors send text to a model and return its reply. Pipelines are
/// generic over this so tests can substitute a canned responder.
pub trait AskAsync {
    type Response;

    async fn ask(&self, text: &str) -> Result<Self::Response, Box<dyn Error>>;
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Chat-completions client for any OpenAI-compatible endpoint.
pub struct ChatClient {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    system_prompt: String,
    max_tokens: u32,
    temperature: f32,
}

impl std::fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClient")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .finish()
    }
}

impl ChatClient {
    pub fn new(
        config: &SummarizerConfig,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, Box<dyn Error>> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            endpoint: config.endpoint.clone(),
            api_key,
            model: config.model.clone(),
            system_prompt: config.system_prompt.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }
}

impl AskAsync for ChatClient {
    type Response = String;

    #[instrument(level = "info", skip_all, fields(model = %self.model))]
    async fn ask(&self, text: &str) -> Result<Self::Response, Box<dyn Error>> {
        let t0 = Instant::now();
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &self.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: text,
                },
            ],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            warn!(%status, body = %truncate_for_log(&detail, 200), "Chat completion failed");
            return Err(format!("chat completion returned {status}").into());
        }

        let reply: ChatResponse = response.json().await?;
        let content = reply
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .unwrap_or_default();
        if content.is_empty() {
            return Err("chat completion returned no content".into());
        }

        info!(
            elapsed_ms = t0.elapsed().as_millis() as u64,
            chars = content.chars().count(),
            tokens_est = estimate_tokens(text) + estimate_tokens(&content),
            "Chat completion succeeded"
        );
        Ok(content)
    }
}

/// Prompt asking for a ready-to-post summary framed by the 🚀 … 🔖 markers.
pub fn build_prompt(title: &str, link: &str, language: &str) -> String {
    format!(
        "TASK: Write a short {language} summary of this news article: {link}
Original headline: {title}

REQUIREMENTS:
1. Headline: short and attention-grabbing
2. Body: 5-7 sentences, key facts only
3. Takeaway: the practical value in one sentence
4. Link: the original URL
5. Hashtags: 3 relevant tags in {language}

FORMAT:
🚀 <Headline>

📝 <5-7 sentences>

💡 <Takeaway>

🔗 {link}

🔖 #tag1 #tag2 #tag3
"
    )
}

/// Cut a model reply down to the post itself.
///
/// Keeps everything from the first leading marker through the end of the line
/// holding the last trailing marker. A missing marker leaves that side as is.
pub fn trim_boilerplate(text: &str, leading: &[String], trailing: &[String]) -> String {
    let start = leading
        .iter()
        .filter(|m| !m.is_empty())
        .filter_map(|m| text.find(m.as_str()))
        .min()
        .unwrap_or(0);

    let end = trailing
        .iter()
        .filter(|m| !m.is_empty())
        .filter_map(|m| text.rfind(m.as_str()))
        .max()
        .filter(|&pos| pos >= start)
        .map(|pos| text[pos..].find('\n').map_or(text.len(), |nl| pos + nl))
        .unwrap_or(text.len());

    text[start..end].trim().to_string()
}

/// Turns an article's title and link into a publishable post.
#[derive(Debug)]
pub struct Summarizer<A> {
    asker: A,
    language: String,
    leading_markers: Vec<String>,
    trailing_markers: Vec<String>,
}

impl<A> Summarizer<A>
where
    A: AskAsync<Response = String>,
{
    pub fn new(asker: A, config: &SummarizerConfig) -> Self {
        Self {
            asker,
            language: config.language.clone(),
            leading_markers: config.leading_markers.clone(),
            trailing_markers: config.trailing_markers.clone(),
        }
    }

    #[instrument(level = "info", skip(self))]
    pub async fn summarize(&self, title: &str, link: &str) -> Result<String, Box<dyn Error>> {
        let prompt = build_prompt(title, link, &self.language);
        let reply = self.asker.ask(&prompt).await?;
        let post = trim_boilerplate(&reply, &self.leading_markers, &self.trailing_markers);
        if post.is_empty() {
            return Err("summary is empty after trimming".into());
        }
        Ok(post)
    }
}
