//! The service facade hosts embed: submission, status polling with lazy
//! staleness reaping, retry, listings, and artifact reads.
//!
//! Everything stateful lives behind this type. HTTP layers stay thin:
//! decode the request, call one method here, encode the view.

use std::io::Cursor;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use image::{ImageFormat, ImageReader};
use moka::sync::Cache;
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::{self, job_repo, Database, JobFilter};
use crate::error::{ConfigError, DeclutterError, Result, StoreError};
use crate::generate::GenerationServices;
use crate::job::{CachePolicy, ImagePayload, JobRecord, JobStatus, JobView, TransformOptions};
use crate::notify::{LogNotifier, Notifier};
use crate::pipeline::{Pipeline, PipelineError, ProcessOutcome};
use crate::sanitize;
use crate::settings::SettingsProvider;
use crate::storage::{extension_for_mime, ArtifactStore};

/// Uploads above this size are rejected before any decode attempt.
const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Longest side an upload may have. Checked from the header, before
/// the full decode.
const MAX_IMAGE_DIMENSION: u32 = 8192;

/// Bound on the in-process dampener for access-time writes.
const TOUCH_CACHE_CAPACITY: u64 = 10_000;

pub struct TransformationService {
    db: Database,
    artifacts: Arc<ArtifactStore>,
    pipeline: Pipeline,
    settings: Arc<dyn SettingsProvider>,
    /// Jobs whose `last_accessed_at` was written recently. Entries expire
    /// after the touch interval, so polling a finished job costs one
    /// write per interval instead of one per poll.
    recent_touches: Cache<String, ()>,
}

impl TransformationService {
    pub fn new(
        db: Database,
        artifacts: Arc<ArtifactStore>,
        services: GenerationServices,
        notifier: Arc<dyn Notifier>,
        settings: Arc<dyn SettingsProvider>,
    ) -> Self {
        let touch_interval = settings.current().touch_interval;
        let pipeline = Pipeline::new(
            db.clone(),
            artifacts.clone(),
            services,
            notifier,
            settings.clone(),
        );
        Self {
            db,
            artifacts,
            pipeline,
            settings,
            recent_touches: Cache::builder()
                .max_capacity(TOUCH_CACHE_CAPACITY)
                .time_to_live(touch_interval)
                .build(),
        }
    }

    /// Wires the default stack from the given settings: SQLite under the
    /// configured (or home) path, filesystem artifacts, the configured
    /// generation backend, and the log notifier.
    pub fn from_settings(settings: Arc<dyn SettingsProvider>) -> Result<Self> {
        let current = settings.current();

        let db_path = match current.database_path.clone() {
            Some(path) => path,
            None => db::default_database_path().ok_or(ConfigError::NoHomeDirectory)?,
        };
        let db = Database::open(&db_path)?;

        let artifact_root = match current.artifact_root.clone() {
            Some(root) => root,
            None => ArtifactStore::default_root().ok_or(ConfigError::NoHomeDirectory)?,
        };
        let artifacts = Arc::new(ArtifactStore::new(artifact_root));

        let services = GenerationServices::from_settings(&current)?;
        let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier::new());

        Ok(Self::new(db, artifacts, services, notifier, settings))
    }

    /// Accepts a room photo and creates its job, eagerly in `processing`
    /// so the first `process` call can start work immediately.
    ///
    /// The photo is stored twice on purpose: once as the immutable
    /// before-image artifact, once as the record's working payload that
    /// the pipeline consumes and later clears.
    pub fn submit(&self, image: Vec<u8>, options: TransformOptions) -> Result<JobView> {
        let mime = validate_image(&image)?;

        let id = Uuid::new_v4().to_string();
        let before_key = format!("{}/before.{}", id, extension_for_mime(mime));
        self.artifacts.put(&before_key, &image)?;

        let payload = ImagePayload::new(image, mime);
        let record = JobRecord::new(&id, options, before_key, &payload);
        job_repo::insert(&self.db, &record)?;

        info!(job_id = %id, size = record.original_payload.as_deref().map(str::len).unwrap_or(0), "Accepted transformation");
        Ok(JobView::from(&record))
    }

    /// Drives the job to a terminal state. Safe to call redundantly;
    /// see [`Pipeline::process`] for the claim semantics.
    pub async fn process(&self, id: &str) -> Result<ProcessOutcome> {
        match self.pipeline.process(id).await {
            Ok(outcome) => Ok(outcome),
            Err(PipelineError::NotFound(id)) => Err(DeclutterError::NotFound(id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Returns the current view of a job plus the cache policy the
    /// transport should apply.
    ///
    /// Two side effects ride along: a job stuck in `processing` past the
    /// processing timeout is reaped to `failed` before being returned,
    /// and completed jobs get their access time refreshed at most once
    /// per touch interval (`expedite` forces the refresh).
    pub fn status(&self, id: &str, expedite: bool) -> Result<(JobView, CachePolicy)> {
        let mut record = job_repo::find_by_id(&self.db, id)?
            .ok_or_else(|| DeclutterError::NotFound(id.to_string()))?;

        let now = Utc::now();
        if record.status == JobStatus::Processing && self.is_stale(&record, now) {
            info!(job_id = %id, "Reaping stale job");
            record.status = JobStatus::Failed;
            record.error = Some("timed out waiting for processing to finish".to_string());
            record.completed_at = Some(now);
            record.updated_at = now;
            record.claimed_at = None;
            record.clear_payload();
            job_repo::update(&self.db, &record)?;
        }

        if record.status == JobStatus::Completed
            && (expedite || self.recent_touches.get(id).is_none())
        {
            job_repo::touch_last_accessed(&self.db, id, now)?;
            self.recent_touches.insert(id.to_string(), ());
            debug!(job_id = %id, "Recorded access time");
        }

        let view = JobView::from(&record);
        let policy = view.cache_policy(expedite);
        Ok((view, policy))
    }

    /// Resets a finished job so it can run again from the original photo.
    ///
    /// The working payload was cleared on the terminal transition, so it
    /// is rebuilt from the stored before-image. If that artifact is gone
    /// the record is left untouched and the caller gets a clear error.
    pub fn retry(&self, id: &str) -> Result<JobView> {
        let mut record = job_repo::find_by_id(&self.db, id)?
            .ok_or_else(|| DeclutterError::NotFound(id.to_string()))?;

        if !record.status.is_terminal() {
            return Err(DeclutterError::StillProcessing(id.to_string()));
        }

        let reference = record
            .before_image
            .clone()
            .ok_or_else(|| DeclutterError::SourceUnavailable {
                id: id.to_string(),
                reference: "unset".to_string(),
            })?;
        let image = match self.artifacts.get(&reference) {
            Ok(bytes) => bytes,
            Err(StoreError::Missing(_)) => {
                return Err(DeclutterError::SourceUnavailable {
                    id: id.to_string(),
                    reference,
                });
            }
            Err(e) => return Err(e.into()),
        };
        let mime = image::guess_format(&image)
            .map(|format| format.to_mime_type())
            .unwrap_or("image/png");
        let payload = ImagePayload::new(image, mime);

        let now = Utc::now();
        record.status = JobStatus::Processing;
        record.plan = None;
        record.after_image = None;
        record.audio = None;
        record.error = None;
        record.claimed_at = None;
        record.completed_at = None;
        // A fresh creation stamp gives the rerun its own staleness window.
        record.created_at = now;
        record.updated_at = now;
        record.attach_payload(&payload);
        job_repo::update(&self.db, &record)?;

        info!(job_id = %id, "Reset for retry");
        Ok(JobView::from(&record))
    }

    /// All jobs, newest first.
    pub fn list(&self, limit: Option<u64>) -> Result<Vec<JobView>> {
        let records = job_repo::query(
            &self.db,
            &JobFilter {
                limit,
                ..JobFilter::default()
            },
        )?;
        Ok(records.iter().map(JobView::from).collect())
    }

    /// Jobs submitted with the given email, bounded to the recent
    /// ownership window, newest first.
    pub fn list_for_owner(&self, owner: &str) -> Result<Vec<JobView>> {
        debug!(owner = %sanitize::hash_id(owner), "Listing jobs for owner");
        let window = chrono::Duration::from_std(self.settings.current().owner_window)
            .unwrap_or_else(|_| chrono::Duration::days(1));
        let records = job_repo::query(
            &self.db,
            &JobFilter {
                owner: Some(owner.to_string()),
                since: Some(Utc::now() - window),
                ..JobFilter::default()
            },
        )?;
        Ok(records.iter().map(JobView::from).collect())
    }

    /// Reads an artifact by the reference a view carries, with the
    /// content type the transport should serve it under.
    pub fn artifact(&self, key: &str) -> Result<(Vec<u8>, String)> {
        let bytes = self.artifacts.get(key)?;
        let mime = mime_guess::from_path(key)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        Ok((bytes, mime))
    }

    fn is_stale(&self, record: &JobRecord, now: DateTime<Utc>) -> bool {
        let timeout = chrono::Duration::from_std(self.settings.current().processing_timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(600));
        now.signed_duration_since(record.created_at) > timeout
    }
}

/// Checks that the upload is a decodable PNG, JPEG, or WebP and returns
/// its media type.
fn validate_image(bytes: &[u8]) -> Result<&'static str> {
    if bytes.is_empty() {
        return Err(DeclutterError::InvalidImage("empty upload".to_string()));
    }
    if bytes.len() > MAX_UPLOAD_BYTES {
        return Err(DeclutterError::InvalidImage(format!(
            "upload exceeds the {} MiB limit",
            MAX_UPLOAD_BYTES / (1024 * 1024)
        )));
    }

    let format = image::guess_format(bytes)
        .map_err(|_| DeclutterError::InvalidImage("unrecognized image format".to_string()))?;
    let mime = match format {
        ImageFormat::Png => "image/png",
        ImageFormat::Jpeg => "image/jpeg",
        ImageFormat::WebP => "image/webp",
        other => {
            return Err(DeclutterError::InvalidImage(format!(
                "unsupported image format {other:?}"
            )));
        }
    };

    let (width, height) = ImageReader::with_format(Cursor::new(bytes), format)
        .into_dimensions()
        .map_err(|e| DeclutterError::InvalidImage(e.to_string()))?;
    if width > MAX_IMAGE_DIMENSION || height > MAX_IMAGE_DIMENSION {
        return Err(DeclutterError::InvalidImage(format!(
            "image is {width}x{height}; each side may be at most {MAX_IMAGE_DIMENSION} pixels"
        )));
    }

    // Decode fully; a correct magic number on a truncated file would
    // otherwise surface later as a confusing generation failure.
    image::load_from_memory_with_format(bytes, format)
        .map_err(|e| DeclutterError::InvalidImage(e.to_string()))?;

    Ok(mime)
}
