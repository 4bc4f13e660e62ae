// src/jobs.rs
//! Single-job lifecycle tracker. The client follows at most one generation
//! job at a time; the record is persisted on every mutation so a restart
//! picks the in-flight job back up instead of losing it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::storage::{ClientStorage, KEY_CURRENT_JOB};

/// Which flow submitted the job. Latest-mode completions write the video
/// description back; manual-mode completions only display locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingMode {
    Latest,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Maps a wire status string. Unknown statuses yield `None` so a newer
    /// backend vocabulary cannot corrupt the tracked record.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "queued" => Some(JobStatus::Queued),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub video_id: Option<String>,
    pub mode: ProcessingMode,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
}

pub struct JobTracker {
    storage: ClientStorage,
    tx: watch::Sender<Option<Job>>,
}

impl JobTracker {
    /// Restores the persisted job record, if any.
    pub fn load(storage: ClientStorage) -> Self {
        let job: Option<Job> = storage.read(KEY_CURRENT_JOB);
        if let Some(job) = &job {
            tracing::info!(
                "Restored in-flight job {} ({:?}) from storage",
                job.job_id,
                job.status
            );
        }
        let (tx, _) = watch::channel(job);
        Self { storage, tx }
    }

    pub fn current(&self) -> Option<Job> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Job>> {
        self.tx.subscribe()
    }

    /// Starts tracking a freshly accepted job. Any prior job is replaced
    /// unconditionally; its late messages die on the id-match guard in
    /// `update_status` and the router's correlation check.
    pub fn start_job(&self, job_id: String, video_id: Option<String>, mode: ProcessingMode) -> Job {
        let job = Job {
            job_id,
            video_id,
            mode,
            status: JobStatus::Queued,
            created_at: Utc::now(),
        };
        tracing::info!("🎬 Tracking job {} ({:?})", job.job_id, job.mode);
        self.persist(Some(&job));
        self.tx.send_replace(Some(job.clone()));
        job
    }

    /// Applies a status to the tracked job only when the id matches.
    /// A mismatch is a silent no-op — delayed messages from a superseded
    /// job must not touch the current one. Returns whether it applied.
    pub fn update_status(&self, job_id: &str, status: JobStatus) -> bool {
        let mut applied = false;
        self.tx.send_if_modified(|current| {
            let Some(job) = current else {
                return false;
            };
            if job.job_id != job_id || job.status == status {
                return false;
            }
            job.status = status;
            applied = true;
            true
        });
        if applied {
            let current = self.tx.borrow().clone();
            self.persist(current.as_ref());
            tracing::debug!("📊 Job {} is now {:?}", job_id, status);
        }
        applied
    }

    /// Drops the tracked job and its persisted record.
    pub fn clear_job(&self) {
        self.persist(None);
        let had_job = self.tx.send_replace(None).is_some();
        if had_job {
            tracing::info!("Cleared tracked job");
        }
    }

    fn persist(&self, job: Option<&Job>) {
        match job {
            Some(job) => {
                if let Err(e) = self.storage.write(KEY_CURRENT_JOB, job) {
                    tracing::warn!("Failed to persist job record: {}", e);
                }
            }
            None => self.storage.remove(KEY_CURRENT_JOB),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_tracker() -> (tempfile::TempDir, JobTracker) {
        let dir = tempfile::tempdir().unwrap();
        let storage = ClientStorage::open(Some(dir.path().to_path_buf())).unwrap();
        (dir, JobTracker::load(storage))
    }

    #[test]
    fn test_start_job_is_last_write_wins() {
        let (_dir, tracker) = open_tracker();
        tracker.start_job("J1".into(), Some("V1".into()), ProcessingMode::Latest);
        tracker.update_status("J1", JobStatus::Processing);
        tracker.start_job("J2".into(), None, ProcessingMode::Manual);

        let job = tracker.current().unwrap();
        assert_eq!(job.job_id, "J2");
        assert_eq!(job.video_id, None);
        assert_eq!(job.mode, ProcessingMode::Manual);
        // no merge artifacts from J1: a fresh job starts queued
        assert_eq!(job.status, JobStatus::Queued);
    }

    #[test]
    fn test_update_status_mismatched_id_is_noop() {
        let (_dir, tracker) = open_tracker();
        tracker.start_job("J1".into(), Some("V1".into()), ProcessingMode::Latest);

        assert!(!tracker.update_status("STALE", JobStatus::Failed));
        assert_eq!(tracker.current().unwrap().status, JobStatus::Queued);

        assert!(tracker.update_status("J1", JobStatus::Processing));
        assert_eq!(tracker.current().unwrap().status, JobStatus::Processing);
    }

    #[test]
    fn test_update_status_without_job_is_noop() {
        let (_dir, tracker) = open_tracker();
        assert!(!tracker.update_status("J1", JobStatus::Completed));
        assert!(tracker.current().is_none());
    }

    #[test]
    fn test_job_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let storage = ClientStorage::open(Some(dir.path().to_path_buf())).unwrap();

        let tracker = JobTracker::load(storage.clone());
        tracker.start_job("J1".into(), Some("V1".into()), ProcessingMode::Latest);
        tracker.update_status("J1", JobStatus::Processing);
        drop(tracker);

        let restored = JobTracker::load(storage.clone());
        let job = restored.current().unwrap();
        assert_eq!(job.job_id, "J1");
        assert_eq!(job.status, JobStatus::Processing);

        restored.clear_job();
        drop(restored);
        assert!(JobTracker::load(storage).current().is_none());
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(JobStatus::parse("queued"), Some(JobStatus::Queued));
        assert_eq!(JobStatus::parse("completed"), Some(JobStatus::Completed));
        assert_eq!(JobStatus::parse("transcoding"), None);
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
    }
}
