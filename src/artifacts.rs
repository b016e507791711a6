//! C1: typed, atomic-enough JSON persistence of each entity kind under a
//! job directory. Grounded in `ffui_core/engine/state_persist.rs`'s
//! write-temp-then-rename pattern and in
//! `original_source/job_state.py`/`media/assets.py`/`transcription/segments.py`
//! for exact filenames and failure-tolerance rules.

use std::collections::HashMap;
use std::path::Path;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::domain::{ActionItem, JobFailureRecord, MediaAsset, SummaryItem, SummaryQualityMetrics, TranscriptSegment};
use crate::error::ArtifactError;
use crate::error::Stage;

const MEDIA_ASSETS_FILE: &str = "media_assets.json";
const TRANSCRIPT_SEGMENTS_FILE: &str = "transcript_segments.json";
const SUMMARY_ITEMS_FILE: &str = "summary_items.json";
const ACTION_ITEMS_FILE: &str = "action_items.json";
const SUMMARY_QUALITY_FILE: &str = "summary_quality.json";
const FAILURE_FILE: &str = "job_failed.json";

fn io_err(path: &Path, source: std::io::Error) -> ArtifactError {
    ArtifactError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Writes `value` as pretty, non-ASCII-preserving JSON to `path`, creating
/// the job directory if it does not exist. Uses a temp-file-then-rename to
/// avoid partial writes, matching `state_persist.rs`'s durability pattern.
fn write_json<T: Serialize>(job_dir: &Path, filename: &str, value: &T) -> Result<(), ArtifactError> {
    std::fs::create_dir_all(job_dir).map_err(|e| io_err(job_dir, e))?;
    let path = job_dir.join(filename);
    let body = serde_json::to_string_pretty(value)
        .map_err(|e| ArtifactError::MalformedArtifact {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
    let tmp_path = job_dir.join(format!("{filename}.tmp"));
    std::fs::write(&tmp_path, body).map_err(|e| io_err(&tmp_path, e))?;
    std::fs::rename(&tmp_path, &path).map_err(|e| io_err(&path, e))?;
    Ok(())
}

/// Reads a JSON array artifact, returning an empty vector when the file is
/// absent (per §4.1, "empty ordered sequence when the file is absent").
fn read_json_list<T: DeserializeOwned>(job_dir: &Path, filename: &str) -> Result<Vec<T>, ArtifactError> {
    let path = job_dir.join(filename);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    let value: Value = serde_json::from_str(&raw).map_err(|e| ArtifactError::MalformedArtifact {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    if !value.is_array() {
        return Err(ArtifactError::MalformedArtifact {
            path: path.display().to_string(),
            reason: "expected a JSON array".to_string(),
        });
    }
    serde_json::from_value(value).map_err(|e| ArtifactError::MalformedArtifact {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

pub fn dump_media_assets(job_dir: &Path, assets: &[MediaAsset]) -> Result<(), ArtifactError> {
    write_json(job_dir, MEDIA_ASSETS_FILE, assets)
}

pub fn load_media_assets(job_dir: &Path) -> Result<Vec<MediaAsset>, ArtifactError> {
    read_json_list(job_dir, MEDIA_ASSETS_FILE)
}

pub fn dump_transcript_segments(
    job_dir: &Path,
    segments: &[TranscriptSegment],
) -> Result<(), ArtifactError> {
    write_json(job_dir, TRANSCRIPT_SEGMENTS_FILE, segments)
}

pub fn load_transcript_segments(job_dir: &Path) -> Result<Vec<TranscriptSegment>, ArtifactError> {
    read_json_list(job_dir, TRANSCRIPT_SEGMENTS_FILE)
}

pub fn dump_summary_items(job_dir: &Path, items: &[SummaryItem]) -> Result<(), ArtifactError> {
    write_json(job_dir, SUMMARY_ITEMS_FILE, items)
}

pub fn load_summary_items(job_dir: &Path) -> Result<Vec<SummaryItem>, ArtifactError> {
    read_json_list(job_dir, SUMMARY_ITEMS_FILE)
}

pub fn dump_action_items(job_dir: &Path, items: &[ActionItem]) -> Result<(), ArtifactError> {
    write_json(job_dir, ACTION_ITEMS_FILE, items)
}

pub fn load_action_items(job_dir: &Path) -> Result<Vec<ActionItem>, ArtifactError> {
    read_json_list(job_dir, ACTION_ITEMS_FILE)
}

pub fn dump_summary_quality(
    job_dir: &Path,
    metrics: &SummaryQualityMetrics,
) -> Result<(), ArtifactError> {
    write_json(job_dir, SUMMARY_QUALITY_FILE, metrics)
}

pub fn load_summary_quality(
    job_dir: &Path,
) -> Result<Option<SummaryQualityMetrics>, ArtifactError> {
    let path = job_dir.join(SUMMARY_QUALITY_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|e| ArtifactError::MalformedArtifact {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
}

/// Overwrites `job_failed.json` for `job_dir`.
pub fn mark_job_failed(
    job_dir: &Path,
    stage: Stage,
    message: impl Into<String>,
    details: HashMap<String, Value>,
) -> Result<(), ArtifactError> {
    let record = JobFailureRecord {
        stage: stage.as_str().to_string(),
        message: message.into(),
        occurred_at: Utc::now(),
        details,
    };
    tracing::error!(stage = %stage, message = %record.message, job_dir = %job_dir.display(), "job failed");
    write_json(job_dir, FAILURE_FILE, &record)
}

pub fn clear_job_failure(job_dir: &Path) -> Result<(), ArtifactError> {
    let path = job_dir.join(FAILURE_FILE);
    if path.exists() {
        std::fs::remove_file(&path).map_err(|e| io_err(&path, e))?;
    }
    Ok(())
}

/// Tolerates the legacy shape where `details` is absent (defaults to `{}`)
/// but fails if `stage`/`message`/`occurred_at` are missing.
pub fn load_job_failure(job_dir: &Path) -> Result<Option<JobFailureRecord>, ArtifactError> {
    let path = job_dir.join(FAILURE_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    let value: Value = serde_json::from_str(&raw).map_err(|e| ArtifactError::MalformedArtifact {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    if !value.is_object() {
        return Err(ArtifactError::MalformedArtifact {
            path: path.display().to_string(),
            reason: "expected a JSON object".to_string(),
        });
    }
    serde_json::from_value(value)
        .map(Some)
        .map_err(|e| ArtifactError::MalformedArtifact {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
}

pub fn job_failed_path(job_dir: &Path) -> std::path::PathBuf {
    job_dir.join(FAILURE_FILE)
}
