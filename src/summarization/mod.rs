//! C6: builds the summarization prompt, calls the chat-completion API via
//! the resilient caller (C3), and parses the JSON response into persisted
//! artifacts plus quality metrics. Grounded in
//! `original_source/summarization/openai.py`
//! (`generate_meeting_summary`/`_call_openai_summary_api`/
//! `_parse_summary_sections`/`_parse_action_items`/`_evaluate_quality_metrics`).

pub mod prompt;

use std::collections::HashMap;

use reqwest::Client;
use serde_json::Value;

use crate::config::SummarizationSettings;
use crate::domain::{ActionItem, SummaryBundle, SummaryItem, SummaryQualityMetrics, TranscriptSegment};
use crate::error::SummarizationError;
use crate::net::{call_with_retry, AttemptOutcome, RateLimiter, RetryExhausted};

async fn call_summary_api(
    client: &Client,
    system_prompt: &str,
    user_prompt: &str,
    settings: &SummarizationSettings,
) -> Result<Value, AttemptOutcome<Value>> {
    let body = serde_json::json!({
        "model": settings.model,
        "temperature": settings.temperature,
        "max_tokens": settings.max_output_tokens,
        "response_format": {"type": "json_object"},
        "messages": [
            {"role": "system", "content": system_prompt},
            {"role": "user", "content": user_prompt},
        ],
    });

    let url = format!("{}/chat/completions", settings.base_url.trim_end_matches('/'));
    let mut request = client
        .post(&url)
        .bearer_auth(&settings.api_key)
        .timeout(settings.retry.request_timeout)
        .json(&body);
    if let Some(ua) = &settings.user_agent {
        request = request.header("User-Agent", ua);
    }

    let response = request
        .send()
        .await
        .map_err(|e| AttemptOutcome::TransportError(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let text = response.text().await.unwrap_or_default();
        return Err(AttemptOutcome::HttpError {
            status: status.as_u16(),
            message: text,
            retry_after,
        });
    }

    response
        .json::<Value>()
        .await
        .map_err(|e| AttemptOutcome::TransportError(format!("unparseable response body: {e}")))
}

fn first_text_of<'a>(keys: &[&str], obj: &'a serde_json::Map<String, Value>) -> Option<&'a str> {
    keys.iter().find_map(|k| obj.get(*k)).and_then(|v| v.as_str())
}

/// Accepts an int, a float, or a string with an optional `ms`/`s` suffix
/// (e.g. `"4500ms"`, `"4.5s"`).
fn coerce_milliseconds(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_f64().map(|v| v.floor() as i64),
        Value::String(s) => {
            let trimmed = s.trim();
            if let Some(stripped) = trimmed.strip_suffix("ms") {
                stripped.trim().parse::<f64>().ok().map(|v| v.floor() as i64)
            } else if let Some(stripped) = trimmed.strip_suffix('s') {
                stripped
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .map(|v| (v * 1000.0).floor() as i64)
            } else {
                trimmed.parse::<f64>().ok().map(|v| v.floor() as i64)
            }
        }
        _ => None,
    }
}

fn coerce_ms_from(keys: &[&str], obj: &serde_json::Map<String, Value>) -> Option<i64> {
    keys.iter().find_map(|k| obj.get(*k)).and_then(coerce_milliseconds)
}

struct ParsedSection {
    heading: Option<String>,
    summary_text: String,
    start_ms: i64,
    end_ms: i64,
    priority: Option<String>,
    highlights: Vec<String>,
}

fn parse_summary_sections(
    raw: &Value,
    transcript_start_ms: i64,
    transcript_end_ms: i64,
) -> Vec<ParsedSection> {
    let Some(entries) = raw.get("summary_sections").and_then(|v| v.as_array()) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for entry in entries {
        let Some(obj) = entry.as_object() else { continue };
        let Some(summary_text) = first_text_of(&["summary", "text"], obj) else {
            continue;
        };
        if summary_text.trim().is_empty() {
            continue;
        }

        let start_ms = coerce_ms_from(&["start_ms", "start", "segment_start_ms", "segment_start"], obj)
            .unwrap_or(transcript_start_ms)
            .clamp(transcript_start_ms, transcript_end_ms);
        let end_ms = coerce_ms_from(&["end_ms", "end", "segment_end_ms", "segment_end"], obj)
            .unwrap_or(transcript_end_ms)
            .clamp(transcript_start_ms, transcript_end_ms);
        if end_ms <= start_ms {
            tracing::warn!(start_ms, end_ms, "dropping summary section with degenerate span");
            continue;
        }

        let highlights = obj
            .get("highlights")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        out.push(ParsedSection {
            heading: first_text_of(&["title", "heading"], obj).map(str::to_string),
            summary_text: summary_text.to_string(),
            start_ms,
            end_ms,
            priority: first_text_of(&["priority"], obj).map(str::to_string),
            highlights,
        });
    }
    out
}

struct ParsedActionItem {
    description: String,
    owner: Option<String>,
    due_date: Option<String>,
    start_ms: Option<i64>,
    end_ms: Option<i64>,
    priority: Option<String>,
}

fn parse_action_items(
    raw: &Value,
    transcript_start_ms: i64,
    transcript_end_ms: i64,
) -> Vec<ParsedActionItem> {
    let Some(entries) = raw.get("action_items").and_then(|v| v.as_array()) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for entry in entries {
        let Some(obj) = entry.as_object() else { continue };
        let Some(description) = first_text_of(&["description", "task", "item"], obj) else {
            continue;
        };
        if description.trim().is_empty() {
            continue;
        }

        let start_ms = coerce_ms_from(&["start_ms", "segment_start_ms", "start"], obj)
            .map(|v| v.clamp(transcript_start_ms, transcript_end_ms));
        let end_ms = coerce_ms_from(&["end_ms", "segment_end_ms", "end"], obj)
            .map(|v| v.clamp(transcript_start_ms, transcript_end_ms));

        if let (Some(start), Some(end)) = (start_ms, end_ms) {
            if end <= start {
                tracing::warn!(start_ms = start, end_ms = end, "dropping action item with degenerate span");
                continue;
            }
        }

        out.push(ParsedActionItem {
            description: description.to_string(),
            owner: first_text_of(&["owner", "assignee"], obj).map(str::to_string),
            due_date: first_text_of(&["due_date", "due"], obj).map(str::to_string),
            start_ms,
            end_ms,
            priority: first_text_of(&["priority"], obj).map(str::to_string),
        });
    }
    out
}

fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Merges a list of `[start, end)` spans and returns the total covered
/// duration, used by `coverage_ratio`.
fn merged_span_duration(mut spans: Vec<(i64, i64)>) -> i64 {
    if spans.is_empty() {
        return 0;
    }
    spans.sort_by_key(|s| s.0);
    let mut total = 0i64;
    let mut current = spans[0];
    for &(start, end) in &spans[1..] {
        if start <= current.1 {
            current.1 = current.1.max(end);
        } else {
            total += current.1 - current.0;
            current = (start, end);
        }
    }
    total += current.1 - current.0;
    total
}

fn spans_overlap(a: (i64, i64), b: (i64, i64)) -> bool {
    a.0 < b.1 && b.0 < a.1
}

fn extract_llm_confidence(raw: &Value) -> Option<f64> {
    raw.get("quality")
        .and_then(|q| q.get("confidence"))
        .and_then(|v| v.as_f64())
        .or_else(|| raw.get("confidence").and_then(|v| v.as_f64()))
}

fn evaluate_quality_metrics(
    segments: &[TranscriptSegment],
    sections: &[ParsedSection],
    action_items: &[ParsedActionItem],
    raw: &Value,
) -> SummaryQualityMetrics {
    let transcript_start = segments.iter().map(|s| s.start_ms).min().unwrap_or(0);
    let transcript_end = segments.iter().map(|s| s.end_ms).max().unwrap_or(0);
    let total_duration = (transcript_end - transcript_start).max(1);

    let summary_spans: Vec<(i64, i64)> = sections.iter().map(|s| (s.start_ms, s.end_ms)).collect();
    let coverage_ratio =
        (merged_span_duration(summary_spans.clone()) as f64 / total_duration as f64).min(1.0);

    let mut action_spans: Vec<(i64, i64)> = Vec::new();
    for item in action_items {
        if let (Some(start), Some(end)) = (item.start_ms, item.end_ms) {
            if end > start {
                action_spans.push((start, end));
            }
        }
    }
    let mut all_spans = summary_spans;
    all_spans.extend(action_spans);

    let referenced_segments = segments
        .iter()
        .filter(|seg| all_spans.iter().any(|span| spans_overlap((seg.start_ms, seg.end_ms), *span)))
        .count();
    let referenced_segments_ratio = if segments.is_empty() {
        0.0
    } else {
        referenced_segments as f64 / segments.len() as f64
    };

    let average_summary_word_count = if sections.is_empty() {
        0.0
    } else {
        sections.iter().map(|s| word_count(&s.summary_text)).sum::<usize>() as f64
            / sections.len() as f64
    };

    SummaryQualityMetrics {
        coverage_ratio,
        referenced_segments_ratio,
        average_summary_word_count,
        action_item_count: action_items.len() as u64,
        llm_confidence: extract_llm_confidence(raw),
    }
}

fn extract_model_metadata(raw: &Value) -> HashMap<String, Value> {
    let mut metadata = HashMap::new();
    for key in ["id", "model", "usage"] {
        if let Some(value) = raw.get(key) {
            metadata.insert(key.to_string(), value.clone());
        }
    }
    metadata
}

/// Generates a meeting summary for `segments`, calling the chat-completion
/// API and parsing its response into persisted artifacts and quality
/// metrics (§4.6).
pub async fn generate_meeting_summary(
    client: &Client,
    job_id: &str,
    segments: &[TranscriptSegment],
    language_hint: Option<&str>,
    settings: &SummarizationSettings,
) -> Result<SummaryBundle, SummarizationError> {
    if segments.is_empty() {
        return Err(SummarizationError::EmptyTranscript);
    }

    let user_prompt = prompt::build_summary_prompt(job_id, segments, language_hint, settings)
        .map_err(SummarizationError::MalformedSummary)?;
    let system_prompt =
        "You produce structured meeting summaries as strict JSON matching the requested schema.";

    let limiter = RateLimiter::new(settings.retry.requests_per_minute);
    let result = call_with_retry(&settings.retry, &limiter, || {
        call_summary_api(client, system_prompt, &user_prompt, settings)
    })
    .await;

    let response = match result {
        Ok(value) => value,
        Err(RetryExhausted::Transport(message)) => {
            return Err(SummarizationError::CallFailed {
                message,
                status_code: None,
            });
        }
        Err(RetryExhausted::Http { status, message }) => {
            return Err(SummarizationError::CallFailed {
                message,
                status_code: Some(status),
            });
        }
    };

    let content = response
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|arr| arr.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|v| v.as_str())
        .ok_or_else(|| {
            SummarizationError::MalformedSummary("response carried no message content".to_string())
        })?;

    let parsed: Value = serde_json::from_str(content)
        .map_err(|e| SummarizationError::MalformedSummary(format!("content was not valid JSON: {e}")))?;

    let transcript_start_ms = segments.iter().map(|s| s.start_ms).min().unwrap();
    let transcript_end_ms = segments.iter().map(|s| s.end_ms).max().unwrap();

    let sections = parse_summary_sections(&parsed, transcript_start_ms, transcript_end_ms);
    if sections.is_empty() {
        return Err(SummarizationError::MalformedSummary(
            "response contained no usable summary sections".to_string(),
        ));
    }
    let parsed_action_items = parse_action_items(&parsed, transcript_start_ms, transcript_end_ms);

    let quality = evaluate_quality_metrics(segments, &sections, &parsed_action_items, &parsed);

    let summary_items = sections
        .into_iter()
        .enumerate()
        .map(|(order, section)| SummaryItem {
            summary_id: SummaryItem::new_id(),
            job_id: job_id.to_string(),
            order: order as i64,
            segment_start_ms: section.start_ms,
            segment_end_ms: section.end_ms,
            summary_text: section.summary_text,
            heading: section.heading,
            priority: section.priority,
            highlights: section.highlights,
        })
        .collect();

    let action_items = parsed_action_items
        .into_iter()
        .enumerate()
        .map(|(order, item)| ActionItem {
            action_id: ActionItem::new_id(),
            job_id: job_id.to_string(),
            order: order as i64,
            description: item.description,
            owner: item.owner,
            due_date: item.due_date,
            segment_start_ms: item.start_ms,
            segment_end_ms: item.end_ms,
            priority: item.priority,
        })
        .collect();

    Ok(SummaryBundle {
        summary_items,
        action_items,
        quality,
        model_metadata: extract_model_metadata(&response),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;
    use std::time::Duration;

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
            extra: StdHashMap::new(),
        }
    }

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
                retry_backoff_seconds: 1.0,
                max_retry_backoff_seconds: Some(30.0),
                requests_per_minute: None,
                request_timeout: Duration::from_secs(120),
            },
            min_summary_sections: 3,
            max_summary_sections: 16,
            minutes_per_section: 7.0,
            max_total_prompt_characters: 80_000,
            segment_snippet_length: 1_600,
        }
    }

    #[test]
    fn coerces_numeric_and_suffixed_milliseconds() {
        assert_eq!(coerce_milliseconds(&serde_json::json!(4500)), Some(4500));
        assert_eq!(coerce_milliseconds(&serde_json::json!("4500ms")), Some(4500));
        assert_eq!(coerce_milliseconds(&serde_json::json!("4.5s")), Some(4500));
        assert_eq!(coerce_milliseconds(&serde_json::json!("2.5")), Some(2));
    }

    #[test]
    fn parses_sections_with_variant_keys_and_clamps_span() {
        let raw = serde_json::json!({
            "summary_sections": [
                {"text": "discussed budget", "start": 0, "segment_end_ms": 999_999},
                {"summary": "  ", "start_ms": 0, "end_ms": 1000},
            ]
        });
        let sections = parse_summary_sections(&raw, 0, 10_000);
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].end_ms, 10_000);
    }

    #[test]
    fn drops_degenerate_section_span() {
        let raw = serde_json::json!({
            "summary_sections": [
                {"summary": "backwards", "start_ms": 5000, "end_ms": 1000},
            ]
        });
        assert!(parse_summary_sections(&raw, 0, 10_000).is_empty());
    }

    #[test]
    fn parses_action_items_with_variant_keys() {
        let raw = serde_json::json!({
            "action_items": [
                {"task": "follow up with finance", "assignee": "Alex", "due": "2026-08-01"},
            ]
        });
        let items = parse_action_items(&raw, 0, 10_000);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].owner.as_deref(), Some("Alex"));
        assert_eq!(items[0].due_date.as_deref(), Some("2026-08-01"));
    }

    #[test]
    fn drops_degenerate_action_item_span() {
        let raw = serde_json::json!({
            "action_items": [
                {"task": "backwards", "start_ms": 5000, "end_ms": 1000},
            ]
        });
        assert!(parse_action_items(&raw, 0, 10_000).is_empty());
    }

    #[test]
    fn keeps_action_item_with_only_one_bound() {
        let raw = serde_json::json!({
            "action_items": [
                {"task": "open-ended follow-up", "start_ms": 1000},
            ]
        });
        let items = parse_action_items(&raw, 0, 10_000);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].start_ms, Some(1000));
        assert_eq!(items[0].end_ms, None);
    }

    #[test]
    fn coverage_ratio_reflects_merged_section_spans() {
        let segments = vec![segment(0, 0, 5000, "a"), segment(1, 5000, 10_000, "b")];
        let sections = parse_summary_sections(
            &serde_json::json!({
                "summary_sections": [{"summary": "x", "start_ms": 0, "end_ms": 5000}]
            }),
            0,
            10_000,
        );
        let quality = evaluate_quality_metrics(&segments, &sections, &[], &serde_json::json!({}));
        assert!((quality.coverage_ratio - 0.5).abs() < 1e-9);
        assert!((quality.referenced_segments_ratio - 0.5).abs() < 1e-9);
    }

    #[test]
    fn extracts_confidence_from_nested_or_top_level() {
        assert_eq!(
            extract_llm_confidence(&serde_json::json!({"quality": {"confidence": 0.9}})),
            Some(0.9)
        );
        assert_eq!(
            extract_llm_confidence(&serde_json::json!({"confidence": 0.7})),
            Some(0.7)
        );
        assert_eq!(extract_llm_confidence(&serde_json::json!({})), None);
    }

    #[tokio::test]
    async fn empty_transcript_fails_fast_without_a_call() {
        let client = Client::new();
        let err = generate_meeting_summary(&client, "job-1", &[], None, &settings())
            .await
            .unwrap_err();
        assert!(matches!(err, SummarizationError::EmptyTranscript));
    }

    /// Same single-response loopback harness as C4's transcription tests,
    /// grounded in the teacher's `ffui_core/tools/download/net.rs` test
    /// module; here it stands in for the chat-completions endpoint.
    fn spawn_chat_completions_server(content: Value) -> (String, std::thread::JoinHandle<()>) {
        use std::io::{Read, Write};
        use std::net::TcpListener;
        use std::time::Instant;

        let payload = serde_json::json!({
            "choices": [{"message": {"content": content.to_string()}}]
        });
        let body = serde_json::to_vec(&payload).unwrap();

        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind test server");
        let addr = listener.local_addr().expect("server addr");
        let url = format!("http://127.0.0.1:{}/v1", addr.port());
        listener.set_nonblocking(true).expect("set nonblocking");

        let handle = std::thread::spawn(move || {
            let deadline = Instant::now() + Duration::from_secs(3);
            while Instant::now() < deadline {
                match listener.accept() {
                    Ok((mut stream, _)) => {
                        let _ = stream.set_nonblocking(false);
                        let _ = stream.set_read_timeout(Some(Duration::from_millis(500)));
                        let mut buf = [0u8; 64 * 1024];
                        let mut total = 0usize;
                        let read_deadline = Instant::now() + Duration::from_millis(500);
                        while total < buf.len() && Instant::now() < read_deadline {
                            match stream.read(&mut buf[total..]) {
                                Ok(0) => break,
                                Ok(n) => {
                                    total += n;
                                    if total >= 4 && buf[..total].windows(4).any(|w| w == b"\r\n\r\n") {
                                        break;
                                    }
                                }
                                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
                                Err(_) => break,
                            }
                        }
                        let headers = format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                            body.len()
                        );
                        let _ = stream.write_all(headers.as_bytes());
                        let _ = stream.write_all(&body);
                        break;
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        std::thread::sleep(Duration::from_millis(10));
                    }
                    Err(_) => break,
                }
            }
        });

        (url, handle)
    }

    #[tokio::test]
    async fn generates_a_summary_against_a_loopback_server() {
        let content = serde_json::json!({
            "summary_sections": [
                {"heading": "Budget", "summary": "discussed Q3 budget", "start_ms": 0, "end_ms": 5000},
            ],
            "action_items": [
                {"task": "send updated numbers", "assignee": "Alex", "start_ms": 0, "end_ms": 5000},
            ],
            "confidence": 0.8,
        });
        let (url, _handle) = spawn_chat_completions_server(content);

        let segments = vec![segment(0, 0, 5000, "let's review the Q3 budget")];
        let mut cfg = settings();
        cfg.base_url = url;

        let client = Client::new();
        let bundle = generate_meeting_summary(&client, "job-1", &segments, None, &cfg)
            .await
            .unwrap();

        assert_eq!(bundle.summary_items.len(), 1);
        assert_eq!(bundle.summary_items[0].heading.as_deref(), Some("Budget"));
        assert_eq!(bundle.action_items.len(), 1);
        assert_eq!(bundle.action_items[0].owner.as_deref(), Some("Alex"));
        assert_eq!(bundle.quality.llm_confidence, Some(0.8));
    }
}
