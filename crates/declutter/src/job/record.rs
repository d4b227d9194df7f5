//! The persisted state of one transformation job.

use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::options::TransformOptions;

/// Lifecycle state of a job.
///
/// Records are created directly in `Processing` (work starts eagerly at
/// submission); `Pending` exists for completeness and is treated as
/// claimable exactly like `Processing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether the pipeline may claim a job in this state.
    pub fn is_claimable(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Processing)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded working image handed to the generation services.
#[derive(Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub bytes: Vec<u8>,
    pub mime: String,
}

impl ImagePayload {
    pub fn new(bytes: Vec<u8>, mime: impl Into<String>) -> Self {
        Self {
            bytes,
            mime: mime.into(),
        }
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.bytes)
    }

    /// `data:` URL form used by vision-model requests.
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, self.to_base64())
    }
}

impl fmt::Debug for ImagePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImagePayload")
            .field("mime", &self.mime)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// One transformation job: the record the pipeline claims, mutates, and
/// finalizes. Persisted in the `jobs` table.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: String,
    pub status: JobStatus,
    pub options: TransformOptions,
    /// Artifact reference to the uploaded source image. Immutable once set.
    pub before_image: Option<String>,
    /// Artifact reference to the generated image. Set only on success.
    pub after_image: Option<String>,
    /// Artifact reference to the narration audio. Best-effort.
    pub audio: Option<String>,
    pub plan: Option<String>,
    pub error: Option<String>,
    /// Base64 working payload; present only while the job is live,
    /// cleared on terminal transition.
    pub original_payload: Option<String>,
    pub payload_mime: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_accessed_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Creates a fresh record in `processing` with the working payload
    /// attached.
    pub fn new(
        id: impl Into<String>,
        options: TransformOptions,
        before_image: impl Into<String>,
        payload: &ImagePayload,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            status: JobStatus::Processing,
            options,
            before_image: Some(before_image.into()),
            after_image: None,
            audio: None,
            plan: None,
            error: None,
            original_payload: Some(payload.to_base64()),
            payload_mime: Some(payload.mime.clone()),
            claimed_at: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
            last_accessed_at: None,
        }
    }

    /// Restores the working payload (used by retry, which re-derives it
    /// from the stored before-image).
    pub fn attach_payload(&mut self, payload: &ImagePayload) {
        self.original_payload = Some(payload.to_base64());
        self.payload_mime = Some(payload.mime.clone());
    }

    /// Decodes the working payload, if any.
    pub fn decode_payload(&self) -> Result<Option<ImagePayload>, base64::DecodeError> {
        let Some(encoded) = &self.original_payload else {
            return Ok(None);
        };
        let bytes = BASE64.decode(encoded)?;
        let mime = self
            .payload_mime
            .clone()
            .unwrap_or_else(|| "image/png".to_string());
        Ok(Some(ImagePayload::new(bytes, mime)))
    }

    pub fn clear_payload(&mut self) {
        self.original_payload = None;
        self.payload_mime = None;
    }
}
