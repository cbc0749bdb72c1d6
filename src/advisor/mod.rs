//! Natural-language scenario → settings suggestions.
//!
//! A prompt is first sent through the configured LLM backends (failover
//! chain, one overall timeout). The first response that passes validation
//! wins. Anything else (no backends, timeout, HTTP error, malformed or
//! partial answer) falls through to the scenario [`RuleTable`], so a
//! suggestion is always produced for a non-empty prompt.

mod cloudflare;
mod gemini;
mod openai;
mod response;
mod rules;

pub use cloudflare::CloudflareAdvisor;
pub use gemini::GeminiAdvisor;
pub use openai::{OPENAI_BASE_URL, OpenAiAdvisor};
pub use response::{LlmSettings, parse_llm_settings};
pub use rules::{DEFAULT_RULE_NAME, RuleMatch, RuleOutcome, RuleTable, ScenarioRule};

use std::time::Duration;

use anyhow::Result;
use reqwest::Client;

use crate::config::AdvisorConfig;
use crate::error::EngineError;
use crate::settings::{SettingsRecord, SuggestionResult, SuggestionSource};

/// A text-completion LLM service.
///
/// Implement this trait to add a custom backend. The library ships with
/// [`OpenAiAdvisor`], [`GeminiAdvisor`] and [`CloudflareAdvisor`].
#[async_trait::async_trait]
pub trait AdvisorBackend: Send + Sync {
    /// The display name of this backend (e.g., "OpenAI", "Gemini").
    fn name(&self) -> &str;

    /// Send one system + user message pair and return the raw reply text.
    async fn complete(&self, system: &str, user: &str) -> Result<String>;
}

/// Instructions sent as the system message.
pub const SYSTEM_PROMPT: &str = r#"You are a professional photography assistant. Recommend camera exposure settings for the shooting scenario the user describes.

Return a JSON object with exactly these fields:

{
  "iso": 400,
  "aperture": "f/2.8",
  "shutter_speed": "1/125s",
  "explanation": "One or two sentences explaining the choice"
}

Rules:
- "iso": a positive integer.
- "aperture": an f-number written as "f/<number>".
- "shutter_speed": a fraction like "1/250s" or whole seconds like "2s".
- "explanation": why these settings suit the scenario.

Return ONLY the JSON object, no markdown formatting, no code blocks, no extra text."#;

/// Build the user message: the scenario plus the current settings, if any.
pub fn build_user_prompt(prompt: &str, current: Option<&SettingsRecord>) -> String {
    let mut text = format!("Scenario: {}", prompt.trim());
    if let Some(summary) = current.and_then(SettingsRecord::summary) {
        text.push_str(&format!("\nCurrent camera settings: {summary}"));
    }
    text
}

/// Build the backend failover chain from config.
///
/// Backends that are disabled, unknown or missing credentials are skipped
/// with a warning. An empty chain means rule-based suggestions only.
pub fn build_backend_chain(config: &AdvisorConfig) -> Vec<Box<dyn AdvisorBackend>> {
    let client = Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs.max(1)))
        .build()
        .unwrap_or_default();
    let backends = &config.backends;
    let mut chain: Vec<Box<dyn AdvisorBackend>> = Vec::new();

    for name in &config.service_order {
        match name.as_str() {
            "openai" if backends.openai.enabled => {
                if backends.openai.api_key.is_empty() {
                    log::warn!("OpenAI enabled but no API key configured");
                    continue;
                }
                chain.push(Box::new(OpenAiAdvisor::new(
                    backends.openai.api_key.clone(),
                    backends.openai.model.clone(),
                    backends.openai.base_url.clone(),
                    client.clone(),
                )));
            }
            "gemini" if backends.gemini.enabled => {
                if backends.gemini.api_key.is_empty() {
                    log::warn!("Gemini enabled but no API key configured");
                    continue;
                }
                chain.push(Box::new(GeminiAdvisor::new(
                    backends.gemini.api_key.clone(),
                    backends.gemini.model.clone(),
                    client.clone(),
                )));
            }
            "cloudflare" if backends.cloudflare.enabled => {
                if backends.cloudflare.account_id.is_empty()
                    || backends.cloudflare.api_token.is_empty()
                {
                    log::warn!("Cloudflare enabled but account ID or API token not configured");
                    continue;
                }
                chain.push(Box::new(CloudflareAdvisor::new(
                    backends.cloudflare.account_id.clone(),
                    backends.cloudflare.api_token.clone(),
                    backends.cloudflare.model.clone(),
                    client.clone(),
                )));
            }
            "openai" | "gemini" | "cloudflare" => {
                log::debug!("Backend {name} disabled");
            }
            other => {
                log::warn!("Unknown advisor backend: {other}");
            }
        }
    }

    chain
}

/// Suggests settings for a free-text scenario.
pub struct SuggestionAdvisor {
    backends: Vec<Box<dyn AdvisorBackend>>,
    rules: RuleTable,
    timeout: Duration,
}

impl SuggestionAdvisor {
    pub fn new(backends: Vec<Box<dyn AdvisorBackend>>, rules: RuleTable, timeout: Duration) -> Self {
        Self {
            backends,
            rules,
            timeout,
        }
    }

    /// Build the backend chain from config.
    pub fn from_config(config: &AdvisorConfig, rules: RuleTable) -> Self {
        Self::new(
            build_backend_chain(config),
            rules,
            Duration::from_secs(config.timeout_secs),
        )
    }

    /// An advisor that never calls out to an LLM.
    pub fn rules_only(rules: RuleTable) -> Self {
        Self::new(Vec::new(), rules, Duration::ZERO)
    }

    pub fn rules(&self) -> &RuleTable {
        &self.rules
    }

    /// Names of the configured backends, in failover order.
    pub fn backend_names(&self) -> Vec<&str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    /// Suggest settings for `prompt`.
    ///
    /// Fails only with [`EngineError::EmptyPrompt`]; every LLM problem is
    /// absorbed by the rule table.
    pub async fn suggest(
        &self,
        prompt: &str,
        current: Option<&SettingsRecord>,
    ) -> Result<SuggestionResult, EngineError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(EngineError::EmptyPrompt);
        }

        if !self.backends.is_empty() {
            let user = build_user_prompt(prompt, current);
            match tokio::time::timeout(self.timeout, self.ask_backends(&user)).await {
                Ok(Ok((backend, settings))) => {
                    return Ok(SuggestionResult {
                        iso: Some(settings.iso),
                        aperture: Some(settings.aperture),
                        shutter_speed: Some(settings.shutter_speed),
                        explanation: Some(settings.explanation),
                        source: SuggestionSource::Llm,
                        matched_rule: None,
                        backend: Some(backend),
                    });
                }
                Ok(Err(e)) => log::warn!("{e:#}. Using scenario rules."),
                Err(_) => log::warn!(
                    "LLM advice timed out after {:?}. Using scenario rules.",
                    self.timeout
                ),
            }
        }

        Ok(self.rules.suggest(prompt, current))
    }

    /// Try each backend in order until one returns a valid answer.
    async fn ask_backends(&self, user: &str) -> Result<(String, LlmSettings)> {
        let mut errors = Vec::new();
        for backend in &self.backends {
            log::info!("Asking {}...", backend.name());
            let reply = match backend.complete(SYSTEM_PROMPT, user).await {
                Ok(reply) => reply,
                Err(e) => {
                    log::warn!("{} failed: {e:#}", backend.name());
                    errors.push(format!("{}: {e:#}", backend.name()));
                    continue;
                }
            };
            match parse_llm_settings(&reply) {
                Ok(settings) => {
                    log::info!("{} succeeded", backend.name());
                    return Ok((backend.name().to_string(), settings));
                }
                Err(e) => {
                    log::warn!("{} returned an unusable answer: {e:#}", backend.name());
                    errors.push(format!("{}: {e:#}", backend.name()));
                }
            }
        }
        anyhow::bail!("All LLM backends failed: {}", errors.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AdvisorConfig;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Backend returning a canned reply, optionally after a delay.
    struct Scripted {
        name: &'static str,
        reply: Result<&'static str, &'static str>,
        delay: Duration,
        calls: Arc<AtomicUsize>,
    }

    impl Scripted {
        fn ok(name: &'static str, reply: &'static str) -> Self {
            Self {
                name,
                reply: Ok(reply),
                delay: Duration::ZERO,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn err(name: &'static str, msg: &'static str) -> Self {
            Self {
                reply: Err(msg),
                ..Self::ok(name, "")
            }
        }

        fn slow(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    #[async_trait::async_trait]
    impl AdvisorBackend for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match self.reply {
                Ok(text) => Ok(text.to_string()),
                Err(msg) => anyhow::bail!("{msg}"),
            }
        }
    }

    const GOOD: &str = r#"{"iso": 200, "aperture": "f/4", "shutter_speed": "1/500", "explanation": "Bright beach."}"#;
    const PARTIAL: &str = r#"{"iso": 200, "aperture": "f/4", "explanation": "Forgot the shutter."}"#;

    fn advisor(backends: Vec<Box<dyn AdvisorBackend>>, timeout: Duration) -> SuggestionAdvisor {
        SuggestionAdvisor::new(backends, RuleTable::builtin().unwrap(), timeout)
    }

    // ── Prompt checks ────────────────────────────────────────────────

    #[tokio::test]
    async fn empty_prompts_are_rejected() {
        let a = SuggestionAdvisor::rules_only(RuleTable::builtin().unwrap());
        assert!(matches!(a.suggest("", None).await, Err(EngineError::EmptyPrompt)));
        assert!(matches!(a.suggest("   \n\t", None).await, Err(EngineError::EmptyPrompt)));
    }

    #[tokio::test]
    async fn empty_prompt_never_reaches_backends() {
        let backend = Scripted::ok("mock", GOOD);
        let calls = backend.calls.clone();
        let a = advisor(vec![Box::new(backend)], Duration::from_secs(1));
        assert!(a.suggest("  ", None).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn user_prompt_includes_current_settings() {
        let current = SettingsRecord {
            iso: Some(800),
            aperture: Some("f/4.0".into()),
            ..Default::default()
        };
        let text = build_user_prompt("  sunset  ", Some(&current));
        assert_eq!(text, "Scenario: sunset\nCurrent camera settings: ISO 800, f/4.0");
        assert_eq!(build_user_prompt("sunset", None), "Scenario: sunset");
    }

    // ── LLM path ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn valid_llm_answer_wins() {
        let a = advisor(vec![Box::new(Scripted::ok("mock", GOOD))], Duration::from_secs(1));
        let r = a.suggest("beach at noon", None).await.unwrap();
        assert_eq!(r.source, SuggestionSource::Llm);
        assert_eq!(r.backend.as_deref(), Some("mock"));
        assert_eq!(r.iso, Some(200));
        assert_eq!(r.aperture.as_deref(), Some("f/4.0"));
        assert_eq!(r.shutter_speed.as_deref(), Some("1/500s"));
        assert!(r.matched_rule.is_none());
    }

    #[tokio::test]
    async fn failover_to_next_backend() {
        let a = advisor(
            vec![
                Box::new(Scripted::err("first", "HTTP 503")),
                Box::new(Scripted::ok("second", PARTIAL)),
                Box::new(Scripted::ok("third", GOOD)),
            ],
            Duration::from_secs(1),
        );
        let r = a.suggest("beach", None).await.unwrap();
        assert_eq!(r.backend.as_deref(), Some("third"));
    }

    // ── Fallback to rules ────────────────────────────────────────────

    #[tokio::test]
    async fn partial_answer_falls_back_to_rules() {
        let a = advisor(vec![Box::new(Scripted::ok("mock", PARTIAL))], Duration::from_secs(1));
        let r = a.suggest("portrait in low light", None).await.unwrap();
        assert_eq!(r.source, SuggestionSource::RuleBased);
        assert_eq!(r.iso, Some(1600));
        assert_eq!(r.aperture.as_deref(), Some("f/1.8"));
        assert!(r.backend.is_none());
    }

    #[tokio::test]
    async fn malformed_answer_falls_back_to_rules() {
        let a = advisor(
            vec![Box::new(Scripted::ok("mock", "Use a fast shutter, friend!"))],
            Duration::from_secs(1),
        );
        let r = a.suggest("kids running", None).await.unwrap();
        assert_eq!(r.source, SuggestionSource::RuleBased);
        assert_eq!(r.matched_rule.as_deref(), Some("action"));
    }

    #[tokio::test]
    async fn transport_error_falls_back_to_rules() {
        let a = advisor(vec![Box::new(Scripted::err("mock", "connection refused"))], Duration::from_secs(1));
        let r = a.suggest("landscape", None).await.unwrap();
        assert_eq!(r.source, SuggestionSource::RuleBased);
        assert_eq!(r.iso, Some(100));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_covers_the_whole_chain() {
        let first = Scripted::ok("slow-a", PARTIAL).slow(Duration::from_secs(6));
        let second = Scripted::ok("slow-b", GOOD).slow(Duration::from_secs(6));
        let second_calls = second.calls.clone();
        let a = advisor(vec![Box::new(first), Box::new(second)], Duration::from_secs(10));

        let r = a.suggest("night street", None).await.unwrap();
        assert_eq!(r.source, SuggestionSource::RuleBased);
        assert_eq!(r.matched_rule.as_deref(), Some("low_light"));
        // The second backend was started but cut off by the shared budget.
        assert_eq!(second_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn no_backends_means_rules() {
        let a = SuggestionAdvisor::rules_only(RuleTable::builtin().unwrap());
        let r = a.suggest("Portrait, low light", None).await.unwrap();
        assert_eq!(r.source, SuggestionSource::RuleBased);
        assert_eq!(r.matched_rule.as_deref(), Some("portrait_low_light"));
        assert!(r.explanation.is_some());
    }

    // ── Chain construction ───────────────────────────────────────────

    #[test]
    fn chain_skips_backends_without_credentials() {
        let mut config = AdvisorConfig::default();
        assert!(build_backend_chain(&config).is_empty());

        config.backends.openai.api_key = "sk-test".into();
        config.backends.gemini.enabled = true;
        config.backends.gemini.api_key = "g-test".into();
        config.backends.cloudflare.enabled = true;
        config.service_order = vec!["gemini".into(), "cloudflare".into(), "openai".into()];

        let names: Vec<String> = build_backend_chain(&config)
            .iter()
            .map(|b| b.name().to_string())
            .collect();
        assert_eq!(names, ["Gemini", "OpenAI"]);
    }

    // ── OpenAI wire format against a local server ────────────────────

    /// Serve a single HTTP response and hand back the base URL.
    async fn serve_once(status: &'static str, body: String) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                if let Some(head_end) = text.find("\r\n\r\n") {
                    let length = text[..head_end]
                        .lines()
                        .find_map(|l| {
                            let (k, v) = l.split_once(':')?;
                            k.eq_ignore_ascii_case("content-length")
                                .then(|| v.trim().parse::<usize>().ok())?
                        })
                        .unwrap_or(0);
                    if request.len() >= head_end + 4 + length {
                        break;
                    }
                }
            }
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        });
        format!("http://{addr}/v1")
    }

    #[tokio::test]
    async fn openai_backend_reads_message_content() {
        let body = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": GOOD } }]
        })
        .to_string();
        let base_url = serve_once("200 OK", body).await;
        let backend = OpenAiAdvisor::new("sk-test".into(), "gpt-test".into(), base_url, Client::new());

        let reply = backend.complete(SYSTEM_PROMPT, "Scenario: beach").await.unwrap();
        assert_eq!(reply, GOOD);
    }

    #[tokio::test]
    async fn openai_backend_surfaces_http_errors() {
        let base_url = serve_once("401 Unauthorized", r#"{"error": "bad key"}"#.to_string()).await;
        let backend = OpenAiAdvisor::new("sk-bad".into(), "gpt-test".into(), base_url, Client::new());

        let err = backend.complete(SYSTEM_PROMPT, "Scenario: beach").await.unwrap_err();
        assert!(err.to_string().contains("401"));
    }
}
