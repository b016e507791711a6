//! C4: for each audio chunk, invoke the transcription API via the resilient
//! caller (C3) and normalize its response into a `ChunkTranscriptionResult`.
//! Grounded in `original_source/transcription/openai.py`
//! (`_call_openai_transcription_api`/`_extract_transcript_text`/
//! `_extract_language`), simplified to the spec's two-way
//! `response_format` split (§4.4) rather than the original's three-way
//! branch on `gpt-4o-transcribe` substring matching.

pub mod assemble;

use std::path::Path;
use std::sync::Arc;

use futures::stream::{FuturesOrdered, StreamExt};
use reqwest::Client;
use serde_json::Value;

use crate::config::TranscriptionSettings;
use crate::domain::{ChunkTranscriptionResult, MediaAsset};
use crate::error::TranscriptionError;
use crate::net::{call_with_retry, AttemptOutcome, RateLimiter, RetryExhausted};

/// Maps a chunk file extension to its MIME type (§4.4). Unknown extensions
/// fail fast with `UnsupportedAudioFormat`, before any request is made.
fn mime_for_extension(extension: &str) -> Result<&'static str, TranscriptionError> {
    match extension.to_ascii_lowercase().as_str() {
        "mp3" => Ok("audio/mpeg"),
        "wav" => Ok("audio/wav"),
        "mp4" | "m4a" => Ok("audio/mp4"),
        "ogg" => Ok("audio/ogg"),
        "flac" => Ok("audio/flac"),
        "webm" => Ok("audio/webm"),
        other => Err(TranscriptionError::UnsupportedAudioFormat {
            extension: other.to_string(),
        }),
    }
}

fn response_format_fields(model: &str) -> Vec<(&'static str, String)> {
    if model.to_ascii_lowercase().ends_with("-diarize") {
        vec![
            ("response_format", "diarized_json".to_string()),
            (
                "chunking_strategy",
                serde_json::json!({"type": "server_vad"}).to_string(),
            ),
        ]
    } else {
        vec![
            ("response_format", "verbose_json".to_string()),
            ("timestamp_granularities[]", "segment".to_string()),
        ]
    }
}

async fn call_transcription_api(
    client: &Client,
    file_path: &Path,
    mime: &str,
    settings: &TranscriptionSettings,
    language: Option<&str>,
    prompt: Option<&str>,
) -> Result<Value, AttemptOutcome<Value>> {
    let bytes = tokio::fs::read(file_path)
        .await
        .map_err(|e| AttemptOutcome::TransportError(format!("failed to read chunk file: {e}")))?;
    let file_name = file_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("chunk")
        .to_string();

    let mut form = reqwest::multipart::Form::new()
        .text("model", settings.model.clone())
        .part(
            "file",
            reqwest::multipart::Part::bytes(bytes)
                .file_name(file_name)
                .mime_str(mime)
                .expect("static mime string is always valid"),
        );
    for (key, value) in response_format_fields(&settings.model) {
        form = form.text(key, value);
    }
    if let Some(lang) = language {
        form = form.text("language", lang.to_string());
    }
    if let Some(p) = prompt {
        form = form.text("prompt", p.to_string());
    }

    let url = format!("{}/audio/transcriptions", settings.base_url.trim_end_matches('/'));
    let mut request = client
        .post(&url)
        .bearer_auth(&settings.api_key)
        .timeout(settings.retry.request_timeout)
        .multipart(form);
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
        let body = response.text().await.unwrap_or_default();
        return Err(AttemptOutcome::HttpError {
            status: status.as_u16(),
            message: body,
            retry_after,
        });
    }

    response
        .json::<Value>()
        .await
        .map_err(|e| AttemptOutcome::TransportError(format!("unparseable response body: {e}")))
}

/// Response's `text` field if present, else the space-joined `text` of a
/// `segments` array.
fn extract_transcript_text(payload: &Value, asset_id: &str) -> Result<String, TranscriptionError> {
    if let Some(text) = payload.get("text").and_then(|v| v.as_str()) {
        return Ok(text.to_string());
    }
    if let Some(segments) = payload.get("segments").and_then(|v| v.as_array()) {
        let collected: Vec<&str> = segments
            .iter()
            .filter_map(|entry| entry.get("text").and_then(|v| v.as_str()))
            .collect();
        if !collected.is_empty() {
            return Ok(collected.join(" "));
        }
    }
    Err(TranscriptionError::EmptyTranscription {
        asset_id: asset_id.to_string(),
    })
}

fn extract_language(payload: &Value) -> Option<String> {
    payload
        .get("language")
        .and_then(|v| v.as_str())
        .or_else(|| {
            payload
                .get("metadata")
                .and_then(|m| m.get("language"))
                .and_then(|v| v.as_str())
        })
        .map(|s| s.to_string())
}

/// Transcribes a single chunk, retrying per C3's policy. A missing chunk
/// file fails fast with `ChunkFileMissing`, never retried.
async fn transcribe_one_chunk(
    client: &Client,
    chunk: &MediaAsset,
    settings: &TranscriptionSettings,
    limiter: &RateLimiter,
    language: Option<&str>,
    prompt: Option<&str>,
) -> Result<ChunkTranscriptionResult, TranscriptionError> {
    if !chunk.path.exists() {
        return Err(TranscriptionError::ChunkFileMissing {
            path: chunk.path.display().to_string(),
        });
    }

    let extension = chunk.path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let mime = mime_for_extension(extension)?;

    let result = call_with_retry(&settings.retry, limiter, || {
        call_transcription_api(client, &chunk.path, mime, settings, language, prompt)
    })
    .await;

    let payload = match result {
        Ok(payload) => payload,
        Err(RetryExhausted::Transport(message)) => {
            return Err(TranscriptionError::TranscriptionFailed {
                asset_id: chunk.asset_id.clone(),
                message,
                status_code: None,
            });
        }
        Err(RetryExhausted::Http { status, message }) => {
            return Err(TranscriptionError::TranscriptionFailed {
                asset_id: chunk.asset_id.clone(),
                message,
                status_code: Some(status),
            });
        }
    };

    let text = extract_transcript_text(&payload, &chunk.asset_id)?;
    let detected_language = extract_language(&payload);

    Ok(ChunkTranscriptionResult {
        asset_id: chunk.asset_id.clone(),
        text,
        start_ms: chunk.start_ms,
        end_ms: chunk.end_ms,
        duration_ms: chunk.duration_ms,
        language: detected_language.or_else(|| language.map(str::to_string)),
        response: payload,
    })
}

/// Transcribes all chunks, in input order, fanning out up to
/// `max_concurrent_requests` concurrently while sharing one rate limiter
/// (§4.4, §5, §9.5). Results are returned in chunk order; the first error
/// is propagated (outstanding requests are allowed to finish, per §5's
/// "cancel siblings in a bounded time" being satisfied by simply not
/// awaiting further work once an error is found).
pub async fn transcribe_chunks(
    client: &Client,
    chunks: &[MediaAsset],
    settings: &TranscriptionSettings,
    language: Option<&str>,
    prompt: Option<&str>,
) -> Result<Vec<ChunkTranscriptionResult>, TranscriptionError> {
    if chunks.is_empty() {
        return Ok(Vec::new());
    }

    let limiter = Arc::new(RateLimiter::new(settings.retry.requests_per_minute));
    let max_concurrent = settings.max_concurrent_requests.max(1);

    let mut results: Vec<Option<ChunkTranscriptionResult>> = (0..chunks.len()).map(|_| None).collect();
    let mut in_flight = FuturesOrdered::new();
    let mut next_index = 0usize;
    let mut first_error: Option<TranscriptionError> = None;

    while next_index < max_concurrent.min(chunks.len()) {
        let idx = next_index;
        let chunk = chunks[idx].clone();
        let client = client.clone();
        let settings = settings.clone();
        let limiter = limiter.clone();
        let language = language.map(str::to_string);
        let prompt = prompt.map(str::to_string);
        in_flight.push_back(async move {
            let r = transcribe_one_chunk(
                &client,
                &chunk,
                &settings,
                &limiter,
                language.as_deref(),
                prompt.as_deref(),
            )
            .await;
            (idx, r)
        });
        next_index += 1;
    }

    while let Some((idx, result)) = in_flight.next().await {
        match result {
            Ok(value) => results[idx] = Some(value),
            Err(e) => {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        if next_index < chunks.len() {
            let idx = next_index;
            let chunk = chunks[idx].clone();
            let client = client.clone();
            let settings = settings.clone();
            let limiter = limiter.clone();
            let language = language.map(str::to_string);
            let prompt = prompt.map(str::to_string);
            in_flight.push_back(async move {
                let r = transcribe_one_chunk(
                    &client,
                    &chunk,
                    &settings,
                    &limiter,
                    language.as_deref(),
                    prompt.as_deref(),
                )
                .await;
                (idx, r)
            });
            next_index += 1;
        }
    }

    if let Some(err) = first_error {
        return Err(err);
    }

    Ok(results.into_iter().map(|r| r.unwrap()).collect())
}
