//! Persisted entity types (§3), one struct per artifact kind, following the
//! teacher's `TranscodeJob`/`MediaInfo` convention of explicit `Option<T>`
//! for fields that may legitimately be absent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaAssetKind {
    AudioMaster,
    AudioChunk,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaAsset {
    pub asset_id: String,
    pub job_id: String,
    pub kind: MediaAssetKind,
    pub path: PathBuf,
    /// -1 for the master, 0-based for chunks.
    pub order: i64,
    pub duration_ms: i64,
    pub start_ms: i64,
    pub end_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bit_depth: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_asset_id: Option<String>,
    #[serde(default)]
    pub extra: HashMap<String, Value>,
}

impl MediaAsset {
    pub fn new_id() -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }
}

/// Transient: one chunk's raw transcription result, never persisted as-is.
#[derive(Debug, Clone)]
pub struct ChunkTranscriptionResult {
    pub asset_id: String,
    pub text: String,
    pub start_ms: i64,
    pub end_ms: i64,
    pub duration_ms: i64,
    pub language: Option<String>,
    pub response: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub segment_id: String,
    pub job_id: String,
    pub order: i64,
    pub start_ms: i64,
    pub end_ms: i64,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_asset_id: Option<String>,
    #[serde(default)]
    pub extra: HashMap<String, Value>,
}

impl TranscriptSegment {
    pub fn new_id() -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryItem {
    pub summary_id: String,
    pub job_id: String,
    pub order: i64,
    pub segment_start_ms: i64,
    pub segment_end_ms: i64,
    pub summary_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(default)]
    pub highlights: Vec<String>,
}

impl SummaryItem {
    pub fn new_id() -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionItem {
    pub action_id: String,
    pub job_id: String,
    pub order: i64,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_start_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_end_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
}

impl ActionItem {
    pub fn new_id() -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryQualityMetrics {
    pub coverage_ratio: f64,
    pub referenced_segments_ratio: f64,
    pub average_summary_word_count: f64,
    pub action_item_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_confidence: Option<f64>,
}

/// The bundle returned by a single summarization call (C6), before the
/// orchestrator splits it across the three persisted artifact files.
#[derive(Debug, Clone)]
pub struct SummaryBundle {
    pub summary_items: Vec<SummaryItem>,
    pub action_items: Vec<ActionItem>,
    pub quality: SummaryQualityMetrics,
    pub model_metadata: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobFailureRecord {
    pub stage: String,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
    /// Tolerates the legacy shape where this field was absent entirely.
    #[serde(default)]
    pub details: HashMap<String, Value>,
}
