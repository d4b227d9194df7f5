//! OpenAI-backed generation over HTTPS.
//!
//! Three endpoints cover the three capabilities: `chat/completions`
//! with a vision-capable model for plans, `images/edits` for the after
//! image, and `audio/speech` for narration. All calls ride the shared
//! [`RetryPolicy`], and error bodies are truncated before they reach
//! logs.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::header::HeaderMap;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::job::{ImagePayload, TransformOptions};
use crate::sanitize;
use crate::settings::Settings;

use super::{
    compose_plan_prompt, GeneratedImage, GenerationError, ImageEditor, PlanGenerator,
    RetryPolicy, SpeechSynthesizer,
};

/// Default connect timeout for HTTP requests (10 seconds).
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default request timeout (120 seconds; image editing is slow).
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Maximum length for upstream error bodies kept in error messages.
const MAX_ERROR_BODY_LENGTH: usize = 200;

/// Client for an OpenAI-compatible API.
pub struct OpenAiClient {
    client: Client,
    api_base: String,
    api_key: SecretString,
    plan_model: String,
    image_model: String,
    speech_model: String,
    plan_prompt: Option<String>,
    retry: RetryPolicy,
}

impl OpenAiClient {
    /// Builds a client from settings. Requires a credential even though
    /// settings-level validation usually catches its absence first.
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        let api_key = settings
            .api_key
            .clone()
            .ok_or(ConfigError::MissingCredential)?;

        let client = Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(Self {
            client,
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            api_key,
            plan_model: settings.plan_model.clone(),
            image_model: settings.image_model.clone(),
            speech_model: settings.speech_model.clone(),
            plan_prompt: settings.plan_prompt.clone(),
            retry: RetryPolicy::new(
                settings.retry_max_attempts,
                settings.retry_base_delay,
                settings.retry_max_delay,
            ),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<Response, GenerationError> {
        let response = self
            .client
            .post(self.endpoint(path))
            .bearer_auth(self.api_key.expose_secret())
            .json(body)
            .send()
            .await?;
        guard_status(response).await
    }
}

/// Turns non-success responses into typed errors; 429 keeps the
/// server's `Retry-After` if one was sent.
async fn guard_status(response: Response) -> Result<Response, GenerationError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = parse_retry_after(response.headers());
        return Err(GenerationError::RateLimited { retry_after });
    }

    let body = response.text().await.unwrap_or_default();
    Err(GenerationError::Upstream {
        status: status.as_u16(),
        message: sanitize::preview(&body, MAX_ERROR_BODY_LENGTH),
    })
}

/// Reads `Retry-After` in its delay-seconds form. The HTTP-date form is
/// rare on these APIs and falls back to computed backoff.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: Vec<ChatPart>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ChatPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatTurn,
}

#[derive(Deserialize)]
struct ChatTurn {
    content: String,
}

#[derive(Deserialize)]
struct ImagesResponse {
    data: Vec<ImageDatum>,
}

#[derive(Deserialize)]
struct ImageDatum {
    #[serde(default)]
    b64_json: Option<String>,
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
}

fn extract_plan(response: ChatResponse) -> Result<String, GenerationError> {
    let content = response
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message.content)
        .unwrap_or_default();
    let plan = content.trim();
    if plan.is_empty() {
        return Err(GenerationError::InvalidResponse(
            "completion contained no plan text".to_string(),
        ));
    }
    Ok(plan.to_string())
}

fn extract_image(response: ImagesResponse) -> Result<Vec<u8>, GenerationError> {
    let encoded = response
        .data
        .into_iter()
        .next()
        .and_then(|datum| datum.b64_json)
        .ok_or_else(|| {
            GenerationError::InvalidResponse("image response carried no base64 payload".to_string())
        })?;
    BASE64
        .decode(encoded.as_bytes())
        .map_err(|e| GenerationError::InvalidResponse(format!("invalid base64 image: {e}")))
}

/// Instruction text for the image edit. Keeps the room recognizable and
/// folds the plan in so the render matches what the user will read.
fn compose_edit_prompt(plan: &str, options: &TransformOptions) -> String {
    format!(
        "Produce a photorealistic image of this exact room after the following \
         decluttering plan has been carried out. Preserve the camera angle, the \
         lighting, the walls, and the flooring. {}\n\nPlan:\n{}",
        options.creativity_level.guidance(),
        plan
    )
}

#[async_trait]
impl PlanGenerator for OpenAiClient {
    async fn analyze(
        &self,
        image: &ImagePayload,
        options: &TransformOptions,
    ) -> Result<String, GenerationError> {
        let prompt = compose_plan_prompt(self.plan_prompt.as_deref(), options);
        let data_url = image.data_url();
        let this = self;

        this.retry
            .run("Plan generation", move || {
                let prompt = prompt.clone();
                let data_url = data_url.clone();
                async move {
                    let request = ChatRequest {
                        model: &this.plan_model,
                        messages: vec![ChatMessage {
                            role: "user",
                            content: vec![
                                ChatPart::Text { text: prompt },
                                ChatPart::ImageUrl {
                                    image_url: ImageUrl { url: data_url },
                                },
                            ],
                        }],
                    };
                    let response = this.post_json("/chat/completions", &request).await?;
                    let parsed: ChatResponse = response
                        .json()
                        .await
                        .map_err(|e| GenerationError::InvalidResponse(e.to_string()))?;
                    extract_plan(parsed)
                }
            })
            .await
    }
}

#[async_trait]
impl ImageEditor for OpenAiClient {
    async fn edit(
        &self,
        image: &ImagePayload,
        plan: &str,
        options: &TransformOptions,
    ) -> Result<GeneratedImage, GenerationError> {
        let prompt = compose_edit_prompt(plan, options);
        let file_name = format!("room.{}", crate::storage::extension_for_mime(&image.mime));
        let bytes = image.bytes.clone();
        let mime = image.mime.clone();
        let this = self;

        this.retry
            .run("Image edit", move || {
                let prompt = prompt.clone();
                let file_name = file_name.clone();
                let bytes = bytes.clone();
                let mime = mime.clone();
                async move {
                    let part = Part::bytes(bytes).file_name(file_name).mime_str(&mime)?;
                    let form = Form::new()
                        .text("model", this.image_model.clone())
                        .text("prompt", prompt)
                        .part("image", part);

                    let response = this
                        .client
                        .post(this.endpoint("/images/edits"))
                        .bearer_auth(this.api_key.expose_secret())
                        .multipart(form)
                        .send()
                        .await?;
                    let response = guard_status(response).await?;
                    let parsed: ImagesResponse = response
                        .json()
                        .await
                        .map_err(|e| GenerationError::InvalidResponse(e.to_string()))?;
                    let bytes = extract_image(parsed)?;
                    Ok(GeneratedImage {
                        bytes,
                        // The edits endpoint renders PNG regardless of input format.
                        mime: "image/png".to_string(),
                    })
                }
            })
            .await
    }
}

#[async_trait]
impl SpeechSynthesizer for OpenAiClient {
    async fn synthesize(&self, script: &str, voice: &str) -> Result<Vec<u8>, GenerationError> {
        let script = script.to_string();
        let voice = voice.to_string();
        let this = self;

        this.retry
            .run("Speech synthesis", move || {
                let script = script.clone();
                let voice = voice.clone();
                async move {
                    let request = SpeechRequest {
                        model: &this.speech_model,
                        input: &script,
                        voice: &voice,
                    };
                    let response = this.post_json("/audio/speech", &request).await?;
                    let bytes = response.bytes().await?;
                    Ok(bytes.to_vec())
                }
            })
            .await
    }
}
