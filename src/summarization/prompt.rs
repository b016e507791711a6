//! Prompt construction for the summarization driver (§4.6), grounded in
//! `original_source/summarization/prompt.py::build_summary_prompt`.

use crate::config::SummarizationSettings;
use crate::domain::TranscriptSegment;

fn format_segment(segment: &TranscriptSegment, snippet_length: usize) -> String {
    let mut text = segment.text.trim().replace('\n', " ");
    if text.chars().count() > snippet_length {
        let truncated: String = text.chars().take(snippet_length).collect();
        text = format!("{}...", truncated.trim_end());
    }
    format!("[{}-{}] {}", segment.start_ms, segment.end_ms, text)
}

/// Builds the user-message prompt. Fails only when no segment carries
/// non-empty text — the orchestrator guarantees a non-empty transcript
/// before calling this, so that condition should never arise in practice.
pub fn build_summary_prompt(
    job_id: &str,
    segments: &[TranscriptSegment],
    language_hint: Option<&str>,
    settings: &SummarizationSettings,
) -> Result<String, String> {
    let mut valid_segments: Vec<&TranscriptSegment> = Vec::new();
    let mut lines: Vec<String> = Vec::new();
    let mut total = 0usize;

    for segment in segments {
        if segment.text.trim().is_empty() {
            continue;
        }
        valid_segments.push(segment);

        let formatted = format_segment(segment, settings.segment_snippet_length);
        let projected_total = total + formatted.len() + 1;
        if projected_total > settings.max_total_prompt_characters && !lines.is_empty() {
            break;
        }
        lines.push(formatted);
        total = projected_total;
    }

    if valid_segments.is_empty() {
        return Err("segments must contain at least one non-empty transcript segment".to_string());
    }

    let transcript_block = lines.join("\n");

    let first_start = valid_segments.iter().map(|s| s.start_ms).min().unwrap();
    let last_end = valid_segments.iter().map(|s| s.end_ms).max().unwrap();
    let meeting_duration_ms = (last_end - first_start).max(1);
    let meeting_duration_minutes = meeting_duration_ms as f64 / 60_000.0;

    let raw_target = (meeting_duration_minutes / settings.minutes_per_section).round() as i64;
    let target_sections = raw_target
        .max(settings.min_summary_sections as i64)
        .min(settings.max_summary_sections as i64);

    let pacing_instruction = format!(
        " This meeting lasts approximately {meeting_duration_minutes:.1} minutes.\
 Produce around {target_sections} summary sections, allowing a deviation of up to two sections if needed.\
 Each summary section must focus on a coherent discussion topic or theme and the span between start_ms and end_ms\
 must not exceed 600000 milliseconds.\
 Prefer fewer, more comprehensive sections over many short ones.\
 Include concrete facts, decisions, blockers, and owners."
    );

    let language_instruction = match language_hint {
        Some(lang) if !lang.is_empty() => format!(
            " The source language is predominantly {lang}.\
 You MUST write ALL textual fields (summaries, titles, highlights, action items,\
 descriptions, owners, due dates) in {lang}.\
 Do NOT translate any content into English.\
 Every single string value in the JSON output must be in {lang}."
        ),
        _ => " You MUST write all textual fields in the same language as the transcript snippets.\
 Do NOT translate content into English or any other language."
            .to_string(),
    };

    Ok(format!(
        "You are an expert meeting summarization assistant. \
Given transcript snippets with millisecond timestamps, provide a structured JSON\
 response that contains two arrays: `summary_sections` and `action_items`.\
 Each summary section must include `summary`, `start_ms`, `end_ms`, and may include\
 optional fields `title`, `highlights` (1-3 short bullet strings), and `priority`. Each action item must include\
 `description`, and may include `owner`, `due_date`, `start_ms`, `end_ms`, and `priority`.\
 Start times and end times should align with the transcript context you are summarising.\
{pacing_instruction}\n\n\
CRITICAL — Summary detail level:\n\
Each `summary` field MUST be a detailed paragraph of 3-5 sentences, NOT a single vague sentence.\n\
Rules:\n\
- Attribute statements to specific speakers by name (or speaker label) whenever identifiable.\n\
- Include concrete numbers, project names, technical terms, and proper nouns from the transcript.\n\
- Describe what was discussed, what was decided, and what opinions were expressed.\n\
- Do NOT write generic one-liners summarizing the topic without substance.\n\n\
Respond strictly with valid JSON. Do not include any additional commentary.\
{language_instruction}\n\n\
Job identifier: {job_id}\n\
Transcript snippets (timestamps in milliseconds):\n\
{transcript_block}"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    fn settings() -> SummarizationSettings {
        SummarizationSettings {
            api_key: "key".into(),
            model: "gpt-4o-mini".into(),
            base_url: "https://api.openai.com/v1".into(),
            user_agent: None,
            temperature: 0.2,
            max_output_tokens: 1200,
            retry: crate::config::RetrySettings {
                max_attempts: 3,
                retry_backoff_seconds: 2.0,
                max_retry_backoff_seconds: Some(60.0),
                requests_per_minute: None,
                request_timeout: Duration::from_secs(240),
            },
            min_summary_sections: 3,
            max_summary_sections: 16,
            minutes_per_section: 7.0,
            max_total_prompt_characters: 80_000,
            segment_snippet_length: 1_600,
        }
    }

    fn segment(order: i64, start_ms: i64, end_ms: i64, text: &str) -> TranscriptSegment {
        TranscriptSegment {
            segment_id: format!("seg-{order}"),
            job_id: "job-1".into(),
            order,
            start_ms,
            end_ms,
            text: text.into(),
            language: None,
            speaker_label: None,
            source_asset_id: None,
            extra: HashMap::new(),
        }
    }

    #[test]
    fn includes_job_id_and_transcript_lines() {
        let segments = vec![segment(0, 0, 1000, "hello"), segment(1, 1000, 2000, "world")];
        let prompt = build_summary_prompt("job-1", &segments, None, &settings()).unwrap();
        assert!(prompt.contains("Job identifier: job-1"));
        assert!(prompt.contains("[0-1000] hello"));
        assert!(prompt.contains("[1000-2000] world"));
    }

    #[test]
    fn target_sections_clamped_to_min() {
        let segments = vec![segment(0, 0, 60_000, "short meeting")];
        let prompt = build_summary_prompt("job-1", &segments, None, &settings()).unwrap();
        assert!(prompt.contains("Produce around 3 summary sections"));
    }

    #[test]
    fn fails_when_no_segment_has_text() {
        let segments = vec![segment(0, 0, 1000, "   ")];
        assert!(build_summary_prompt("job-1", &segments, None, &settings()).is_err());
    }
}
