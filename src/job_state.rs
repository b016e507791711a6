//! C8: derives a job's stage, status, and progress purely from the artifacts
//! present on disk (§4.8). Grounded in
//! `original_source/routers/jobs.py::_detect_stage`/`_determine_status`/
//! `_load_job_summary`/`_load_job_detail`.

use std::path::Path;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::artifacts;
use crate::domain::MediaAssetKind;
use crate::error::ArtifactError;

const STAGE_KEYS: [&str; 4] = ["upload", "chunking", "transcription", "summary"];
const STAGE_COUNT: i64 = STAGE_KEYS.len() as i64;

fn stage_index_for_key(key: &str) -> Option<i64> {
    STAGE_KEYS.iter().position(|s| *s == key).map(|i| i as i64 + 1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobFailureInfo {
    pub stage: String,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub job_id: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub progress: f64,
    pub stage_index: i64,
    pub stage_count: i64,
    pub stage_key: String,
    pub duration_ms: Option<i64>,
    pub languages: Vec<String>,
    pub summary_count: usize,
    pub action_item_count: usize,
    pub can_delete: bool,
    pub failure: Option<JobFailureInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobDetail {
    #[serde(flatten)]
    pub summary: JobSummary,
    pub quality_metrics: Option<crate::domain::SummaryQualityMetrics>,
}

fn has_file(job_dir: &Path, name: &str) -> bool {
    job_dir.join(name).exists()
}

fn has_source_video(job_dir: &Path) -> bool {
    let Ok(entries) = std::fs::read_dir(job_dir) else {
        return false;
    };
    entries.flatten().any(|entry| {
        matches!(
            entry
                .path()
                .extension()
                .and_then(|e| e.to_str())
                .map(str::to_ascii_lowercase)
                .as_deref(),
            Some("mov") | Some("mp4") | Some("mkv") | Some("webm")
        )
    })
}

fn has_audio_chunks(job_dir: &Path) -> bool {
    let chunks_dir = job_dir.join("audio_chunks");
    let Ok(entries) = std::fs::read_dir(&chunks_dir) else {
        return false;
    };
    entries.flatten().any(|entry| {
        entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("wav"))
    })
}

/// Detects the currently in-progress stage from artifact presence. Each
/// artifact marks the *previous* stage complete, so this returns the stage
/// that is now active.
fn detect_stage(job_dir: &Path) -> (i64, &'static str) {
    if has_file(job_dir, "summary_items.json") {
        return (STAGE_COUNT, "summary");
    }
    if has_file(job_dir, "transcript_segments.json") {
        return (3, "summary");
    }
    if has_audio_chunks(job_dir) {
        return (2, "transcription");
    }
    if has_source_video(job_dir) {
        return (1, "chunking");
    }
    (1, "upload")
}

fn determine_status(stage_index: i64) -> JobStatus {
    if stage_index >= STAGE_COUNT {
        JobStatus::Completed
    } else if stage_index >= 2 {
        JobStatus::Processing
    } else {
        JobStatus::Pending
    }
}

fn system_time_to_utc(time: std::io::Result<SystemTime>) -> DateTime<Utc> {
    time.map(DateTime::<Utc>::from).unwrap_or_else(|_| Utc::now())
}

fn timestamps(job_dir: &Path) -> (DateTime<Utc>, DateTime<Utc>) {
    match std::fs::metadata(job_dir) {
        Ok(meta) => (
            system_time_to_utc(meta.created().or_else(|_| meta.modified())),
            system_time_to_utc(meta.modified()),
        ),
        Err(_) => (Utc::now(), Utc::now()),
    }
}

/// Builds the short-form job summary purely from on-disk artifacts.
/// An unrecognized failure stage name never panics: it is logged and
/// treated as `stage_index = 1`, matching the original's defensive
/// fallback for forward-compatibility with unknown stage keys.
pub fn load_job_summary(job_id: &str, job_dir: &Path) -> Result<JobSummary, ArtifactError> {
    let segments = artifacts::load_transcript_segments(job_dir)?;
    let summary_items = artifacts::load_summary_items(job_dir)?;
    let action_items = artifacts::load_action_items(job_dir)?;

    let mut languages: Vec<String> = segments.iter().filter_map(|s| s.language.clone()).collect();
    languages.sort();
    languages.dedup();

    let duration_ms = match artifacts::load_media_assets(job_dir) {
        Ok(assets) => assets
            .iter()
            .find(|a| a.kind == MediaAssetKind::AudioMaster)
            .map(|a| a.duration_ms),
        Err(ArtifactError::Io { .. }) => None,
        Err(other) => return Err(other),
    };

    let (created_at, updated_at) = timestamps(job_dir);

    let (stage_index, stage_key, status, can_delete, failure) =
        match artifacts::load_job_failure(job_dir)? {
            Some(record) => {
                let stage_index = stage_index_for_key(&record.stage).unwrap_or_else(|| {
                    tracing::warn!(
                        job_id,
                        stage = %record.stage,
                        "job has unknown failure stage; defaulting to stage_index=1"
                    );
                    1
                });
                let failure = JobFailureInfo {
                    stage: record.stage,
                    message: record.message,
                    occurred_at: record.occurred_at,
                };
                (stage_index, STAGE_KEYS[(stage_index - 1) as usize].to_string(), JobStatus::Failed, false, Some(failure))
            }
            None => {
                let (stage_index, stage_key) = detect_stage(job_dir);
                let status = determine_status(stage_index);
                let can_delete = stage_index >= STAGE_COUNT;
                (stage_index, stage_key.to_string(), status, can_delete, None)
            }
        };

    let progress = (stage_index as f64 / STAGE_COUNT as f64 * 1000.0).round() / 1000.0;

    Ok(JobSummary {
        job_id: job_id.to_string(),
        status,
        created_at,
        updated_at,
        progress,
        stage_index,
        stage_count: STAGE_COUNT,
        stage_key,
        duration_ms,
        languages,
        summary_count: summary_items.len(),
        action_item_count: action_items.len(),
        can_delete,
        failure,
    })
}

pub fn load_job_detail(job_id: &str, job_dir: &Path) -> Result<JobDetail, ArtifactError> {
    let summary = load_job_summary(job_id, job_dir)?;
    let quality_metrics = artifacts::load_summary_quality(job_dir)?;
    Ok(JobDetail {
        summary,
        quality_metrics,
    })
}

/// Lists every job directory under `upload_root`, sorted by name.
pub fn list_job_directories(upload_root: &Path) -> std::io::Result<Vec<std::path::PathBuf>> {
    if !upload_root.exists() {
        return Ok(Vec::new());
    }
    let mut dirs: Vec<std::path::PathBuf> = std::fs::read_dir(upload_root)?
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();
    Ok(dirs)
}
