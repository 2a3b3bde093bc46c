pub mod scripted;
pub mod upstream;

use futures::Stream;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::pin::Pin;

pub use scripted::ScriptedGenerator;
pub use upstream::UpstreamGenerator;

static CONTENT_TYPES: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "blog_post",
        "email",
        "social_post",
        "video_script",
        "product_review",
        "comparison",
    ]
    .into_iter()
    .collect()
});

pub fn is_supported_content_type(content_type: &str) -> bool {
    CONTENT_TYPES.contains(content_type)
}

/// Client-supplied generation parameters, shaped after the product's
/// generate message (content type + prompt + optional metadata).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationParams {
    pub content_type: String,
    pub prompt: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub campaign_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub job_id: String,
    pub account_id: String,
    pub params: GenerationParams,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenEvent {
    /// A piece of generated text, in production order.
    Delta(String),
    /// The producer finished a self-contained artifact. Content up to
    /// the most recent boundary survives a later stream failure.
    ArtifactEnd,
}

#[derive(Debug, Clone)]
pub struct GenFailure {
    pub message: String,
    /// Transient failures (upstream timeouts, connection drops) are
    /// eligible for the orchestrator's single retry.
    pub transient: bool,
}

impl std::fmt::Display for GenFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

pub type GenStream = Pin<Box<dyn Stream<Item = Result<GenEvent, GenFailure>> + Send>>;

/// Opaque chunk producer. The pipeline only ever sees an ordered
/// event stream, so providers are swappable without touching the
/// orchestrator.
pub trait Generator: Send + Sync {
    fn generate(&self, request: &GenerationRequest) -> GenStream;
}
