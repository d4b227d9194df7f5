//! The transformation coordinator.
//!
//! `process` drives one job from claimed to terminal: guard checks, an
//! atomic claim, plan generation (persisted as soon as it exists), the
//! after-image and narration fan-out, artifact persistence, and the
//! single finalizing write. Exactly one caller wins the claim for a
//! given job at a time; everyone else gets an honest report of what
//! the record is doing instead.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info_span, warn, Instrument};

use crate::db::{job_repo, Database};
use crate::generate::GenerationServices;
use crate::job::{ImagePayload, JobRecord, JobStatus, TransformOptions};
use crate::notify::{CompletionNote, Notifier};
use crate::settings::{Settings, SettingsProvider};
use crate::storage::{extension_for_mime, ArtifactStore};

use super::error::PipelineError;

/// How one `process` call for a job concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// This call claimed the job and produced its outputs.
    Generated,
    /// This call claimed the job but generation failed; the record now
    /// carries the error.
    GenerationFailed,
    /// The record was already completed; nothing was redone.
    AlreadyCompleted,
    /// The record was already failed; the stored error stands.
    AlreadyFailed,
    /// Another processor holds a live claim; nothing was done.
    ClaimHeld,
    /// No usable working payload; the job was failed in place.
    PayloadMissing,
}

/// What a `process` call reports back.
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub id: String,
    pub status: JobStatus,
    pub disposition: Disposition,
    pub plan: Option<String>,
    pub after_image: Option<String>,
    pub error: Option<String>,
}

impl ProcessOutcome {
    fn from_record(disposition: Disposition, record: &JobRecord) -> Self {
        Self {
            id: record.id.clone(),
            status: record.status,
            disposition,
            plan: record.plan.clone(),
            after_image: record.after_image.clone(),
            error: record.error.clone(),
        }
    }
}

pub struct Pipeline {
    db: Database,
    artifacts: Arc<ArtifactStore>,
    services: GenerationServices,
    notifier: Arc<dyn Notifier>,
    settings: Arc<dyn SettingsProvider>,
}

impl Pipeline {
    pub fn new(
        db: Database,
        artifacts: Arc<ArtifactStore>,
        services: GenerationServices,
        notifier: Arc<dyn Notifier>,
        settings: Arc<dyn SettingsProvider>,
    ) -> Self {
        Self {
            db,
            artifacts,
            services,
            notifier,
            settings,
        }
    }

    /// Runs the job with the given id to a terminal state, or reports
    /// why it could not.
    pub async fn process(&self, id: &str) -> Result<ProcessOutcome, PipelineError> {
        let span = info_span!("transform", job_id = %id);
        self.process_inner(id).instrument(span).await
    }

    async fn process_inner(&self, id: &str) -> Result<ProcessOutcome, PipelineError> {
        let settings = self.settings.current();

        let record = job_repo::find_by_id(&self.db, id)?
            .ok_or_else(|| PipelineError::NotFound(id.to_string()))?;

        // Terminal records answer without touching the claim.
        match record.status {
            JobStatus::Completed => {
                debug!("Job already completed");
                return Ok(ProcessOutcome::from_record(
                    Disposition::AlreadyCompleted,
                    &record,
                ));
            }
            JobStatus::Failed => {
                debug!("Job already failed");
                return Ok(ProcessOutcome::from_record(
                    Disposition::AlreadyFailed,
                    &record,
                ));
            }
            _ => {}
        }

        // Claim or step aside. The conditional update is the only
        // arbiter; losing it means someone else got here first.
        let now = Utc::now();
        let cutoff = now
            - chrono::Duration::from_std(settings.claim_timeout)
                .unwrap_or_else(|_| chrono::Duration::seconds(300));
        if !job_repo::try_claim(&self.db, id, now, cutoff)? {
            let current = job_repo::find_by_id(&self.db, id)?
                .ok_or_else(|| PipelineError::NotFound(id.to_string()))?;
            let disposition = match current.status {
                JobStatus::Completed => Disposition::AlreadyCompleted,
                JobStatus::Failed => Disposition::AlreadyFailed,
                _ => {
                    debug!("Claim held elsewhere");
                    Disposition::ClaimHeld
                }
            };
            return Ok(ProcessOutcome::from_record(disposition, &current));
        }

        // Re-read after the claim so this holder works from the row it
        // actually owns.
        let mut record = job_repo::find_by_id(&self.db, id)?
            .ok_or_else(|| PipelineError::NotFound(id.to_string()))?;

        let payload = match record.decode_payload() {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                self.fail(
                    &mut record,
                    "working payload is missing; retry to restore it from the stored photo"
                        .to_string(),
                )?;
                self.notify_finished(&record).await;
                return Ok(ProcessOutcome::from_record(
                    Disposition::PayloadMissing,
                    &record,
                ));
            }
            Err(e) => {
                self.fail(&mut record, format!("stored payload is corrupt: {e}"))?;
                self.notify_finished(&record).await;
                return Ok(ProcessOutcome::from_record(
                    Disposition::PayloadMissing,
                    &record,
                ));
            }
        };

        let budget = settings.generation_budget;
        let generation = self.run_generation(&mut record, &payload, &settings);
        match tokio::time::timeout(budget, generation).await {
            Ok(Ok(())) => {
                self.notify_finished(&record).await;
                Ok(ProcessOutcome::from_record(Disposition::Generated, &record))
            }
            Ok(Err(PipelineError::Generation(e))) => {
                self.fail(&mut record, e.to_string())?;
                self.notify_finished(&record).await;
                Ok(ProcessOutcome::from_record(
                    Disposition::GenerationFailed,
                    &record,
                ))
            }
            Ok(Err(other)) => {
                // Infrastructure fault; leave the record claimed so the
                // staleness reaper or a later claim picks it back up.
                Err(other)
            }
            Err(_) => {
                self.fail(
                    &mut record,
                    format!("generation exceeded its {}s budget", budget.as_secs()),
                )?;
                self.notify_finished(&record).await;
                Ok(ProcessOutcome::from_record(
                    Disposition::GenerationFailed,
                    &record,
                ))
            }
        }
    }

    /// Plan, fan-out, artifact persistence, finalize. Mutates `record`
    /// in step with what it writes.
    async fn run_generation(
        &self,
        record: &mut JobRecord,
        payload: &ImagePayload,
        settings: &Settings,
    ) -> Result<(), PipelineError> {
        // A re-run that already has a plan keeps it; the user may have
        // read it already.
        let plan = match record.plan.clone() {
            Some(existing) => existing,
            None => {
                let plan = self
                    .services
                    .plan
                    .analyze(payload, &record.options)
                    .instrument(info_span!("generate_plan"))
                    .await?;
                record.plan = Some(plan.clone());
                record.updated_at = Utc::now();
                // Persisted on its own so pollers can read the plan
                // while the slower image render is still running.
                job_repo::update(&self.db, record)?;
                plan
            }
        };

        let script = narration_script(&record.options, &plan);
        let image_fut = self
            .services
            .image
            .edit(payload, &plan, &record.options)
            .instrument(info_span!("edit_image"));
        let speech_fut = async {
            if !settings.narration_enabled {
                return None;
            }
            Some(
                self.services
                    .speech
                    .synthesize(&script, &settings.speech_voice)
                    .instrument(info_span!("synthesize_narration"))
                    .await,
            )
        };
        let (image_result, speech_result) = tokio::join!(image_fut, speech_fut);

        // The after image is the product; narration is a nice-to-have.
        let image = image_result?;

        let after_key = format!("{}/after.{}", record.id, extension_for_mime(&image.mime));
        self.artifacts.put(&after_key, &image.bytes)?;

        match speech_result {
            Some(Ok(audio)) => {
                let audio_key = format!("{}/narration.mp3", record.id);
                match self.artifacts.put(&audio_key, &audio) {
                    Ok(_) => record.audio = Some(audio_key),
                    Err(e) => warn!("Failed to store narration audio: {e}"),
                }
            }
            Some(Err(e)) => warn!("Narration synthesis failed: {e}"),
            None => debug!("Narration disabled for this run"),
        }

        let now = Utc::now();
        record.after_image = Some(after_key);
        record.status = JobStatus::Completed;
        record.error = None;
        record.completed_at = Some(now);
        record.updated_at = now;
        record.claimed_at = None;
        record.clear_payload();
        job_repo::update(&self.db, record)?;

        debug!("Job completed");
        Ok(())
    }

    /// Moves the record to `failed` in one write: error set, payload
    /// dropped, claim released.
    fn fail(&self, record: &mut JobRecord, reason: String) -> Result<(), PipelineError> {
        warn!("Job failed: {reason}");
        let now = Utc::now();
        record.status = JobStatus::Failed;
        record.error = Some(reason);
        record.completed_at = Some(now);
        record.updated_at = now;
        record.claimed_at = None;
        record.clear_payload();
        job_repo::update(&self.db, record)?;
        Ok(())
    }

    async fn notify_finished(&self, record: &JobRecord) {
        let note = CompletionNote::for_record(record);
        if let Err(e) = self.notifier.notify(&note).await {
            warn!("Completion notification failed: {e}");
        }
    }
}

/// Builds the text the narration voice reads: a personal greeting, then
/// the plan flattened into spoken sentences with list markers removed.
pub fn narration_script(options: &TransformOptions, plan: &str) -> String {
    let greeting = match options
        .user_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
    {
        Some(name) => format!("Hi {name}! Here is your decluttering plan."),
        None => "Here is your decluttering plan.".to_string(),
    };

    let sentences: Vec<&str> = plan
        .lines()
        .map(strip_list_marker)
        .filter(|line| !line.is_empty())
        .collect();

    if sentences.is_empty() {
        greeting
    } else {
        format!("{} {}", greeting, sentences.join(" "))
    }
}

/// Removes a leading `1.`, `12)`, `-`, `*`, or `•` marker from one line.
fn strip_list_marker(line: &str) -> &str {
    let trimmed = line.trim();

    for bullet in ["- ", "* ", "• "] {
        if let Some(rest) = trimmed.strip_prefix(bullet) {
            return rest.trim_start();
        }
    }

    let digits = trimmed.chars().take_while(char::is_ascii_digit).count();
    if digits > 0 {
        let after = &trimmed[digits..];
        if let Some(rest) = after.strip_prefix('.').or_else(|| after.strip_prefix(')')) {
            return rest.trim_start();
        }
    }

    trimmed
}
