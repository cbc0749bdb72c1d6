use anyhow::{Context, Result};
use reqwest::Client;
use serde_json::json;

use super::AdvisorBackend;

/// Default endpoint root of the OpenAI API.
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI-compatible `/chat/completions` backend.
///
/// `base_url` may point at any server that speaks the same protocol.
pub struct OpenAiAdvisor {
    api_key: String,
    model: String,
    base_url: String,
    client: Client,
}

impl OpenAiAdvisor {
    pub fn new(api_key: String, model: String, base_url: String, client: Client) -> Self {
        Self {
            api_key,
            model,
            base_url,
            client,
        }
    }
}

#[async_trait::async_trait]
impl AdvisorBackend for OpenAiAdvisor {
    fn name(&self) -> &str {
        "OpenAI"
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user }
            ],
            "max_tokens": 300,
            "temperature": 0.2,
            "response_format": { "type": "json_object" }
        });

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .context("OpenAI request failed")?;

        let status = resp.status();
        let text = resp.text().await.context("Failed to read OpenAI response")?;

        if !status.is_success() {
            anyhow::bail!("OpenAI API error ({}): {}", status, text);
        }

        let json: serde_json::Value =
            serde_json::from_str(&text).context("Failed to parse OpenAI response JSON")?;

        let content = json["choices"][0]["message"]["content"]
            .as_str()
            .context("No content in OpenAI response")?;

        Ok(content.to_string())
    }
}
