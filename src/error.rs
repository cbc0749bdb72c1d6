use thiserror::Error;

/// Errors surfaced to callers of the engine.
///
/// Only malformed input and misconfiguration are reported here. Transient
/// capability loss (no model, model load failure, LLM timeout or garbage
/// response) is recovered inside the predictor and advisor and shows up as
/// `source` on the returned record instead.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The byte stream is not a decodable image container.
    #[error("unreadable image: {0}")]
    UnreadableImage(String),

    /// The configured normalization bounds do not match the ones the model
    /// artifact declares (or the artifact declares none).
    #[error("normalization mismatch: {0}")]
    NormalizationMismatch(String),

    /// The suggestion prompt was empty or whitespace only.
    #[error("prompt is empty")]
    EmptyPrompt,

    /// Bounds, heuristic tiers, rule table or advisor settings are invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl EngineError {
    pub(crate) fn unreadable(err: impl std::fmt::Display) -> Self {
        Self::UnreadableImage(err.to_string())
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}
