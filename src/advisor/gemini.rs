use anyhow::{Context, Result};
use reqwest::Client;
use serde_json::json;

use super::AdvisorBackend;

pub struct GeminiAdvisor {
    api_key: String,
    model: String,
    client: Client,
}

impl GeminiAdvisor {
    pub fn new(api_key: String, model: String, client: Client) -> Self {
        Self {
            api_key,
            model,
            client,
        }
    }
}

#[async_trait::async_trait]
impl AdvisorBackend for GeminiAdvisor {
    fn name(&self) -> &str {
        "Gemini"
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent",
            self.model
        );

        let body = json!({
            "systemInstruction": {
                "parts": [{ "text": system }]
            },
            "contents": [
                {
                    "role": "user",
                    "parts": [{ "text": user }]
                }
            ],
            "generationConfig": {
                "maxOutputTokens": 300,
                "temperature": 0.2,
                "responseMimeType": "application/json"
            }
        });

        let resp = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .context("Gemini request failed")?;

        let status = resp.status();
        let text = resp.text().await.context("Failed to read Gemini response")?;

        if !status.is_success() {
            anyhow::bail!("Gemini API error ({}): {}", status, text);
        }

        let json: serde_json::Value =
            serde_json::from_str(&text).context("Failed to parse Gemini response JSON")?;

        let content = json["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .context("No content in Gemini response")?;

        Ok(content.to_string())
    }
}
