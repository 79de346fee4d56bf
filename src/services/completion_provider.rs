use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Remote chat model: one user prompt in, the assistant's text out.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatReq<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
}

#[derive(Deserialize, Debug)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ChatChoice {
    message: Option<ChatChoiceMessage>,
}

#[derive(Deserialize, Debug)]
struct ChatResp {
    choices: Vec<ChatChoice>,
}

pub struct HttpCompletionProvider {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl HttpCompletionProvider {
    pub fn new(base_url: &str, model: &str, api_key: Option<String>) -> Result<Self> {
        let endpoint = if base_url.contains("/v1/") {
            base_url.to_string()
        } else {
            format!("{}/v1/chat/completions", base_url.trim_end_matches('/'))
        };
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build completion HTTP client")?;
        Ok(Self {
            client,
            endpoint,
            model: model.to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl CompletionProvider for HttpCompletionProvider {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = ChatReq {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens: 200,
        };

        let mut req = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req
            .send()
            .await
            .with_context(|| format!("completion request to '{}' failed", self.endpoint))?;
        if !resp.status().is_success() {
            return Err(anyhow!(
                "completion request to '{}' failed with status: {}",
                self.endpoint,
                resp.status()
            ));
        }

        let parsed: ChatResp = resp.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .ok_or_else(|| anyhow!("completion response had no content"))
    }
}
