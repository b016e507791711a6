//! C5: merges chunk-level transcription responses into a globally ordered
//! transcript. Grounded in
//! `original_source/transcription/segments.py::merge_chunk_transcriptions`,
//! with one deliberate divergence (§9 OQ1, spec §4.5 step 7): a chunk with
//! zero valid candidate segments fails the whole merge with
//! `MalformedTranscription` rather than falling back to whole-chunk text.

use serde_json::Value;

use crate::domain::{ChunkTranscriptionResult, TranscriptSegment};
use crate::error::MalformedTranscription;

struct Candidate {
    text: String,
    start_ms: i64,
    end_ms: i64,
    language: Option<String>,
    speaker_label: Option<String>,
    extra: std::collections::HashMap<String, Value>,
}

const KNOWN_SEGMENT_KEYS: &[&str] = &[
    "id",
    "text",
    "start",
    "end",
    "temperature",
    "avg_logprob",
    "compression_ratio",
    "no_speech_prob",
    "speaker",
    "speaker_label",
    "language",
];

fn parse_seconds(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}

fn seconds_to_ms_scaled(value: f64) -> i64 {
    if value.is_nan() || value.is_infinite() {
        0
    } else {
        (value * 1000.0).round() as i64
    }
}

/// Extracts candidate segments from a chunk's raw response payload. Returns
/// an empty vector (rather than the original's whole-chunk fallback) when
/// `segments` is absent, not an array, or yields no usable entries — the
/// caller turns "no candidates" into `MalformedTranscription`.
fn iter_candidate_segments(chunk: &ChunkTranscriptionResult) -> Vec<Candidate> {
    let segments = match chunk.response.get("segments").and_then(|v| v.as_array()) {
        Some(s) => s,
        None => return Vec::new(),
    };

    let mut out = Vec::new();
    for raw in segments {
        let Some(obj) = raw.as_object() else { continue };
        let Some(text) = obj.get("text").and_then(|v| v.as_str()) else {
            continue;
        };

        let start_seconds = obj.get("start").and_then(parse_seconds);
        let Some(end_seconds) = obj.get("end").and_then(parse_seconds) else {
            continue;
        };

        let start_ms = chunk.start_ms + seconds_to_ms_scaled(start_seconds.unwrap_or(0.0));
        let end_ms = chunk.start_ms + seconds_to_ms_scaled(end_seconds);

        let speaker_label = obj
            .get("speaker_label")
            .and_then(|v| v.as_str())
            .or_else(|| obj.get("speaker").and_then(|v| v.as_str()))
            .map(str::to_string);

        let language = obj.get("language").and_then(|v| v.as_str()).map(str::to_string);

        let extra: std::collections::HashMap<String, Value> = obj
            .iter()
            .filter(|(k, _)| !KNOWN_SEGMENT_KEYS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        out.push(Candidate {
            text: text.to_string(),
            start_ms,
            end_ms,
            language,
            speaker_label,
            extra,
        });
    }
    out
}

/// Merges chunk responses into a globally ordered transcript (§4.5).
pub fn merge_chunk_transcriptions(
    job_id: &str,
    chunk_results: &[ChunkTranscriptionResult],
) -> Result<Vec<TranscriptSegment>, MalformedTranscription> {
    if chunk_results.is_empty() {
        return Ok(Vec::new());
    }

    let mut ordered: Vec<&ChunkTranscriptionResult> = chunk_results.iter().collect();
    ordered.sort_by(|a, b| (a.start_ms, &a.asset_id).cmp(&(b.start_ms, &b.asset_id)));

    let mut merged = Vec::new();
    let mut global_language: Option<String> = None;
    let mut order = 0i64;

    for chunk in &ordered {
        if let Some(lang) = &chunk.language {
            if !lang.is_empty() && global_language.is_none() {
                global_language = Some(lang.clone());
            }
        }

        let candidates = iter_candidate_segments(chunk);
        let mut emitted_any = false;

        for candidate in candidates {
            let text = candidate.text.trim().to_string();
            if text.is_empty() {
                continue;
            }

            let start_ms = chunk.start_ms.max(candidate.start_ms);
            let end_ms = chunk.end_ms.min(candidate.end_ms);
            if end_ms <= start_ms {
                continue;
            }

            let language = candidate
                .language
                .filter(|s| !s.is_empty())
                .or_else(|| chunk.language.clone())
                .or_else(|| global_language.clone());

            merged.push(TranscriptSegment {
                segment_id: TranscriptSegment::new_id(),
                job_id: job_id.to_string(),
                order,
                start_ms,
                end_ms,
                text,
                language,
                speaker_label: candidate.speaker_label,
                source_asset_id: Some(chunk.asset_id.clone()),
                extra: candidate.extra,
            });
            order += 1;
            emitted_any = true;
        }

        if !emitted_any {
            return Err(MalformedTranscription {
                asset_id: chunk.asset_id.clone(),
                start_ms: chunk.start_ms,
                end_ms: chunk.end_ms,
                reason: "chunk response contained no valid segments".to_string(),
            });
        }
    }

    if global_language.is_none() {
        global_language = merged.iter().find_map(|s| s.language.clone());
    }

    if let Some(lang) = &global_language {
        for segment in &mut merged {
            if segment.language.is_none() {
                segment.language = Some(lang.clone());
            }
        }
    }

    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chunk(asset_id: &str, start_ms: i64, end_ms: i64, response: Value) -> ChunkTranscriptionResult {
        ChunkTranscriptionResult {
            asset_id: asset_id.to_string(),
            text: String::new(),
            start_ms,
            end_ms,
            duration_ms: end_ms - start_ms,
            language: response
                .get("language")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            response,
        }
    }

    #[test]
    fn two_chunk_happy_path() {
        let a = chunk(
            "a",
            0,
            1000,
            json!({"text":"hello world","language":"en","segments":[{"start":0.0,"end":1.0,"text":"hello world"}]}),
        );
        let b = chunk(
            "b",
            1000,
            2000,
            json!({"text":"hello world","language":"en","segments":[{"start":0.0,"end":1.0,"text":"hello world"}]}),
        );

        let segments = merge_chunk_transcriptions("job-1", &[a, b]).unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].order, 0);
        assert_eq!(segments[1].order, 1);
        assert_eq!(segments[0].start_ms, 0);
        assert_eq!(segments[0].end_ms, 1000);
        assert_eq!(segments[1].start_ms, 1000);
        assert_eq!(segments[1].end_ms, 2000);
        assert_eq!(segments[0].language.as_deref(), Some("en"));
        assert_eq!(segments[1].language.as_deref(), Some("en"));
    }

    #[test]
    fn language_backfill_from_first_detected() {
        let a = chunk(
            "a",
            0,
            1000,
            json!({"language":"ja","segments":[{"start":0.0,"end":1.0,"text":"konnichiwa"}]}),
        );
        let b = chunk(
            "b",
            1000,
            2000,
            json!({"language":Value::Null,"segments":[{"start":0.0,"end":1.0,"text":"hi"}]}),
        );

        let segments = merge_chunk_transcriptions("job-1", &[a, b]).unwrap();
        assert_eq!(segments[0].language.as_deref(), Some("ja"));
        assert_eq!(segments[1].language.as_deref(), Some("ja"));
    }

    #[test]
    fn chunk_with_zero_valid_segments_fails_fast() {
        let a = chunk("a", 0, 1000, json!({"segments": []}));
        let err = merge_chunk_transcriptions("job-1", &[a]).unwrap_err();
        assert_eq!(err.asset_id, "a");
    }

    #[test]
    fn chunk_missing_segments_key_fails_fast_rather_than_falling_back() {
        let a = chunk("a", 0, 1000, json!({"text": "whole chunk text"}));
        let err = merge_chunk_transcriptions("job-1", &[a]).unwrap_err();
        assert_eq!(err.asset_id, "a");
    }

    #[test]
    fn candidates_clamped_into_chunk_window() {
        let a = chunk(
            "a",
            1000,
            2000,
            json!({"segments":[{"start": -5.0, "end": 20.0, "text": "overflowing"}]}),
        );
        let segments = merge_chunk_transcriptions("job-1", &[a]).unwrap();
        assert_eq!(segments[0].start_ms, 1000);
        assert_eq!(segments[0].end_ms, 2000);
    }
}
