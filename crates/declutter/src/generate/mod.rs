//! Generation backends for plans, after images, and narration audio.
//!
//! The pipeline talks to three narrow traits so tests can script each
//! capability independently. Two implementations ship: a deterministic
//! in-process stub (the default) and an OpenAI-compatible HTTP client.

pub mod openai;
pub mod retry;
pub mod stub;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::error::ConfigError;
use crate::job::{ImagePayload, TransformOptions};
use crate::settings::{GenerationBackend, Settings};

pub use openai::OpenAiClient;
pub use retry::RetryPolicy;
pub use stub::StubGenerator;

/// Errors surfaced by generation backends.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Rate limited by upstream")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Upstream request failed ({status}): {message}")]
    Upstream { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Unexpected response shape: {0}")]
    InvalidResponse(String),
}

impl GenerationError {
    /// Whether another attempt with backoff could reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::Upstream { status, .. } => *status >= 500,
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::InvalidResponse(_) => false,
        }
    }

    /// Server-requested delay before the next attempt, when one was given.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Finished image from an editing backend.
#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    pub mime: String,
}

/// Produces a numbered decluttering plan from a room photo.
#[async_trait]
pub trait PlanGenerator: Send + Sync {
    async fn analyze(
        &self,
        image: &ImagePayload,
        options: &TransformOptions,
    ) -> Result<String, GenerationError>;
}

/// Renders the "after" image for a room photo and its plan.
#[async_trait]
pub trait ImageEditor: Send + Sync {
    async fn edit(
        &self,
        image: &ImagePayload,
        plan: &str,
        options: &TransformOptions,
    ) -> Result<GeneratedImage, GenerationError>;
}

/// Turns a narration script into spoken audio (MP3 bytes).
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, script: &str, voice: &str) -> Result<Vec<u8>, GenerationError>;
}

/// The three generation capabilities the pipeline needs, bundled.
#[derive(Clone)]
pub struct GenerationServices {
    pub plan: Arc<dyn PlanGenerator>,
    pub image: Arc<dyn ImageEditor>,
    pub speech: Arc<dyn SpeechSynthesizer>,
}

impl GenerationServices {
    /// Builds the backend selected by `settings.backend`.
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        match settings.backend {
            GenerationBackend::Stub => {
                let stub = Arc::new(StubGenerator::new());
                Ok(Self {
                    plan: stub.clone(),
                    image: stub.clone(),
                    speech: stub,
                })
            }
            GenerationBackend::OpenAi => {
                let client = Arc::new(OpenAiClient::from_settings(settings)?);
                Ok(Self {
                    plan: client.clone(),
                    image: client.clone(),
                    speech: client,
                })
            }
        }
    }
}

/// Builds the instruction text sent alongside the room photo when
/// requesting a plan.
///
/// `base` replaces only the opening instruction; creativity guidance
/// and the keep-items clause are request-specific and always appended.
pub fn compose_plan_prompt(base: Option<&str>, options: &TransformOptions) -> String {
    let mut prompt = match base {
        Some(text) => format!("{} ", text.trim()),
        None => String::from(
            "Study this photo of a room and write a numbered, step-by-step plan for \
             decluttering it. Each step names the items to move and where they go. ",
        ),
    };
    prompt.push_str(options.creativity_level.guidance());

    if let Some(keep) = options.keep_items.as_deref() {
        let keep = keep.trim();
        if !keep.is_empty() {
            prompt.push_str(&format!(
                " The following must stay exactly where they are: {keep}."
            ));
        }
    }

    prompt
}
