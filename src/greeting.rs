use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::PipelineError;

const GROQ_CHAT_URL: &str = "https://api.groq.com/openai/v1/chat/completions";

const WELCOME_TEMPLATE: &str = "Based on the LinkedIn profile information, create a personalized welcome message.\n\nProfile Data:\n{profile_data}\n\nWelcome Message:";

/// Single-turn text generation. No history is kept between calls.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, PipelineError>;
}

pub struct GroqClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl GroqClient {
    pub fn new(api_key: String, model: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            model: model.to_string(),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Deserialize)]
struct ReplyMessage {
    content: Option<String>,
}

#[async_trait]
impl TextGenerator for GroqClient {
    async fn generate(&self, prompt: &str) -> Result<String, PipelineError> {
        let body = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        let resp = self
            .http
            .post(GROQ_CHAT_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| PipelineError::Generation(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(PipelineError::Generation(format!("{}: {}", status, detail)));
        }

        let reply: ChatResponse = resp
            .json()
            .await
            .map_err(|e| PipelineError::Generation(e.to_string()))?;

        reply
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| PipelineError::Generation("no choices in reply".into()))
    }
}

/// Fill the welcome template with a pretty-printed profile.
pub fn welcome_prompt(profile: &Value) -> Result<String, serde_json::Error> {
    let profile_data = serde_json::to_string_pretty(profile)?;
    Ok(WELCOME_TEMPLATE.replace("{profile_data}", &profile_data))
}

/// Ask the backend for a greeting; its reply is used verbatim.
pub async fn generate_welcome_message<G: TextGenerator + ?Sized>(
    generator: &G,
    profile: &Value,
) -> Result<String, PipelineError> {
    let prompt = welcome_prompt(profile).map_err(|e| PipelineError::Generation(e.to_string()))?;
    debug!("Prompt is {} chars", prompt.len());
    generator.generate(&prompt).await
}
