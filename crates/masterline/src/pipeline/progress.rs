//! Job progress reporting.
//!
//! The pipeline emits [`ProgressEvent`]s through a [`ProgressReporter`].
//! [`BroadcastProgress`] turns them into serializable [`JobProgressEvent`]s
//! on a tokio broadcast channel for any number of subscribers.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Phase of job processing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Queued,
    Validating,
    Preparing,
    Mastering,
    Enhancing,
    Finalizing,
    Completed,
    Failed,
}

impl std::fmt::Display for JobPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobPhase::Queued => write!(f, "Queued"),
            JobPhase::Validating => write!(f, "Validating input"),
            JobPhase::Preparing => write!(f, "Preparing directories"),
            JobPhase::Mastering => write!(f, "AI mastering"),
            JobPhase::Enhancing => write!(f, "EQ enhancement"),
            JobPhase::Finalizing => write!(f, "Finalizing"),
            JobPhase::Completed => write!(f, "Completed"),
            JobPhase::Failed => write!(f, "Failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Processing,
    Completed,
    Failed,
}

/// Events emitted by the pipeline during processing.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// A fresh attempt began; carries the per-attempt job id.
    Started { job_id: String },
    Phase { phase: JobPhase, message: String },
    Completed {
        mastered_path: String,
        ai_only_path: Option<String>,
    },
    Failed { error: String },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// No-op reporter.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Progress event for a job, as broadcast to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgressEvent {
    /// Per-attempt job id. Empty until the attempt has started.
    pub job_id: String,
    pub audio_file_id: String,
    pub phase: JobPhase,
    pub status: JobStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mastered_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_only_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobProgressEvent {
    pub fn new(job_id: &str, audio_file_id: &str, phase: JobPhase, message: &str) -> Self {
        let status = match phase {
            JobPhase::Completed => JobStatus::Completed,
            JobPhase::Failed => JobStatus::Failed,
            _ => JobStatus::Processing,
        };

        Self {
            job_id: job_id.to_string(),
            audio_file_id: audio_file_id.to_string(),
            phase,
            status,
            message: message.to_string(),
            timestamp: Utc::now(),
            mastered_path: None,
            ai_only_path: None,
            error: None,
        }
    }
}

/// Bridges pipeline events for one audio file onto a broadcast channel.
pub struct BroadcastProgress {
    audio_file_id: String,
    job_id: Mutex<String>,
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl BroadcastProgress {
    pub fn new(audio_file_id: &str, sender: Arc<broadcast::Sender<JobProgressEvent>>) -> Self {
        Self {
            audio_file_id: audio_file_id.to_string(),
            job_id: Mutex::new(String::new()),
            sender,
        }
    }

    fn job_id(&self) -> String {
        self.job_id.lock().map(|g| g.clone()).unwrap_or_default()
    }

    fn send(&self, event: JobProgressEvent) {
        // No active receivers is fine
        let _ = self.sender.send(event);
    }
}

impl ProgressReporter for BroadcastProgress {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Started { job_id } => {
                if let Ok(mut guard) = self.job_id.lock() {
                    *guard = job_id.clone();
                }
                self.send(JobProgressEvent::new(
                    &job_id,
                    &self.audio_file_id,
                    JobPhase::Queued,
                    "Job started",
                ));
            }
            ProgressEvent::Phase { phase, message } => {
                self.send(JobProgressEvent::new(
                    &self.job_id(),
                    &self.audio_file_id,
                    phase,
                    &message,
                ));
            }
            ProgressEvent::Completed {
                mastered_path,
                ai_only_path,
            } => {
                let mut event = JobProgressEvent::new(
                    &self.job_id(),
                    &self.audio_file_id,
                    JobPhase::Completed,
                    "Processing completed successfully",
                );
                event.mastered_path = Some(mastered_path);
                event.ai_only_path = ai_only_path;
                self.send(event);
            }
            ProgressEvent::Failed { error } => {
                let mut event = JobProgressEvent::new(
                    &self.job_id(),
                    &self.audio_file_id,
                    JobPhase::Failed,
                    "Processing failed",
                );
                event.error = Some(error);
                self.send(event);
            }
        }
    }
}
