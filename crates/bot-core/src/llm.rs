use std::future::Future;
use std::pin::Pin;

use anyhow::Context;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Boundary to the language model. The engine only needs raw text back;
/// whatever decision JSON it contains is the parser's problem.
pub trait LlmClient: Send + Sync {
    fn complete<'a>(
        &'a self,
        system_prompt: String,
        user_message: String,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>>;
}

/// Config for an OpenAI-compatible `POST /chat/completions` endpoint.
#[derive(Debug, Clone)]
pub struct ChatApiConfig {
    /// Full endpoint URL, e.g. `https://api.example.com/v1/chat/completions`.
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessageWire<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessageWire<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

/// Sends one system+user exchange to a chat-completions endpoint and returns
/// the assistant text verbatim.
pub async fn query_chat_completions(
    system_prompt: &str,
    user_message: &str,
    cfg: &ChatApiConfig,
) -> anyhow::Result<String> {
    let client = Client::new();
    let request = ChatRequest {
        model: &cfg.model,
        messages: vec![
            ChatMessageWire {
                role: "system",
                content: system_prompt,
            },
            ChatMessageWire {
                role: "user",
                content: user_message,
            },
        ],
        temperature: cfg.temperature,
        max_tokens: cfg.max_tokens,
    };

    let res = client
        .post(&cfg.endpoint)
        .bearer_auth(&cfg.api_key)
        .json(&request)
        .send()
        .await
        .context("llm request failed")?
        .error_for_status()
        .context("llm non-2xx response")?
        .json::<ChatResponse>()
        .await
        .context("llm response decode failed")?;

    let choice = res
        .choices
        .into_iter()
        .next()
        .context("llm response had no choices")?;
    Ok(choice.message.content)
}

/// [`LlmClient`] over [`query_chat_completions`].
pub struct ChatApiClient {
    cfg: ChatApiConfig,
}

impl ChatApiClient {
    pub fn new(cfg: ChatApiConfig) -> Self {
        Self { cfg }
    }
}

impl LlmClient for ChatApiClient {
    fn complete<'a>(
        &'a self,
        system_prompt: String,
        user_message: String,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>> {
        Box::pin(async move {
            query_chat_completions(&system_prompt, &user_message, &self.cfg).await
        })
    }
}
