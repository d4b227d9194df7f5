//! Completion notifications.
//!
//! When a job reaches a terminal state the pipeline hands a note to the
//! notifier. Delivery is best-effort: a failure here is logged and never
//! changes the job's outcome.

use async_trait::async_trait;
use thiserror::Error;

use crate::job::{JobRecord, JobStatus};
use crate::sanitize;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Notification channel unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to deliver notification: {0}")]
    Delivery(String),
}

/// What a completion note says, independent of how it is delivered.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionNote {
    pub job_id: String,
    /// Where the note should go, when the submission carried an address.
    pub recipient: Option<String>,
    pub subject: String,
    pub body: String,
    /// Plan text on its own, for channels that render structure instead
    /// of the flat body.
    pub plan: Option<String>,
    /// Artifact keys for channels that attach or link the outputs.
    pub before_image: Option<String>,
    pub after_image: Option<String>,
    pub audio: Option<String>,
}

impl CompletionNote {
    /// Composes the user-facing note for a job that just finished.
    pub fn for_record(record: &JobRecord) -> Self {
        let name = record.options.user_name.as_deref().unwrap_or("there");
        let greeting = format!("Hi {name},");

        let (subject, body) = match record.status {
            JobStatus::Completed => {
                let mut body = format!(
                    "{greeting}\n\nYour decluttered room is ready. Open the app to \
                     see the new view of your room and the step-by-step plan to get there."
                );
                if let Some(plan) = record.plan.as_deref() {
                    body.push_str("\n\nYour plan:\n");
                    body.push_str(plan);
                }
                ("Your decluttered room is ready".to_string(), body)
            }
            _ => {
                let reason = record
                    .error
                    .as_deref()
                    .unwrap_or("an unexpected error occurred");
                let body = format!(
                    "{greeting}\n\nWe couldn't transform your room photo: {reason}. \
                     You can retry from the app."
                );
                ("Your room transformation didn't finish".to_string(), body)
            }
        };

        Self {
            job_id: record.id.clone(),
            recipient: record.options.user_email.clone(),
            subject,
            body,
            plan: record.plan.clone(),
            before_image: record.before_image.clone(),
            after_image: record.after_image.clone(),
            audio: record.audio.clone(),
        }
    }
}

/// Delivery channel for completion notes.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, note: &CompletionNote) -> Result<(), NotifyError>;
}

/// Default channel: a structured log line. Deployments wire a real
/// channel (email, push) by implementing [`Notifier`] themselves.
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LogNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, note: &CompletionNote) -> Result<(), NotifyError> {
        let recipient = note
            .recipient
            .as_deref()
            .map(sanitize::redact_email)
            .unwrap_or_else(|| "nobody".to_string());
        log::info!(
            "Notification for job {} to {}: {}",
            note.job_id,
            recipient,
            note.subject
        );
        Ok(())
    }
}
