//! Client-facing projection of a job record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::options::TransformOptions;
use super::record::{JobRecord, JobStatus};

/// `Cache-Control` guidance for a status response.
///
/// Live jobs must never be cached; terminal results are stable and may be
/// served slightly stale while revalidating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    NoStore,
    ShortLived,
}

impl CachePolicy {
    pub fn header_value(&self) -> &'static str {
        match self {
            CachePolicy::NoStore => "no-store, must-revalidate",
            CachePolicy::ShortLived => "public, max-age=60, stale-while-revalidate=300",
        }
    }
}

/// What polling clients see. Never carries the working payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    pub id: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub options: TransformOptions,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&JobRecord> for JobView {
    fn from(record: &JobRecord) -> Self {
        // After-image is only meaningful on a completed job.
        let after_image = if record.status == JobStatus::Completed {
            record.after_image.clone()
        } else {
            None
        };
        Self {
            id: record.id.clone(),
            status: record.status,
            before_image: record.before_image.clone(),
            after_image,
            audio: record.audio.clone(),
            plan: record.plan.clone(),
            error: record.error.clone(),
            options: record.options.clone(),
            created_at: record.created_at,
            completed_at: record.completed_at,
        }
    }
}

impl JobView {
    /// Cache policy for this view. `expedite` forces a fresh read.
    pub fn cache_policy(&self, expedite: bool) -> CachePolicy {
        if expedite || !self.status.is_terminal() {
            CachePolicy::NoStore
        } else {
            CachePolicy::ShortLived
        }
    }
}
