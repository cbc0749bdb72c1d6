use anyhow::{Context, Result};
use reqwest::Client;
use serde_json::json;

use super::AdvisorBackend;

/// Cloudflare Workers AI text-generation backend.
pub struct CloudflareAdvisor {
    account_id: String,
    api_token: String,
    model: String,
    client: Client,
}

impl CloudflareAdvisor {
    pub fn new(account_id: String, api_token: String, model: String, client: Client) -> Self {
        Self {
            account_id,
            api_token,
            model,
            client,
        }
    }
}

#[async_trait::async_trait]
impl AdvisorBackend for CloudflareAdvisor {
    fn name(&self) -> &str {
        "Cloudflare"
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let url = format!(
            "https://api.cloudflare.com/client/v4/accounts/{}/ai/run/{}",
            self.account_id, self.model
        );

        let body = json!({
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user }
            ],
            "max_tokens": 300
        });

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_token))
            .json(&body)
            .send()
            .await
            .context("Cloudflare request failed")?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .context("Failed to read Cloudflare response")?;

        if !status.is_success() {
            anyhow::bail!("Cloudflare API error ({}): {}", status, text);
        }

        let json: serde_json::Value =
            serde_json::from_str(&text).context("Failed to parse Cloudflare response JSON")?;

        let content = json["result"]["response"]
            .as_str()
            .context("No content in Cloudflare response")?;

        Ok(content.to_string())
    }
}
