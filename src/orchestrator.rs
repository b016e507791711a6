//! C7: the three stage entry points (ingest, transcribe, summarize), each
//! owning the clear-failure / do-work / mark-failure-on-error / enqueue-next
//! sequencing described in §4.7. Grounded in `original_source/tasks/ingest.py`,
//! `tasks/transcribe.py` and `tasks/summarize.py`, with the job queue itself
//! modeled as an out-of-scope `QueueClient` collaborator (§1, §6) rather than
//! a concrete implementation.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reqwest::Client;

use crate::artifacts;
use crate::config::{MediaSettings, SummarizationSettings, TranscriptionSettings};
use crate::domain::MediaAssetKind;
use crate::error::{CoreError, Stage};
use crate::media;
use crate::summarization;
use crate::transcription;

/// The next-stage enqueue collaborator. Concrete implementations (a real
/// message queue, an in-process channel, …) live outside this crate; only
/// the handoff contract is specified here.
#[async_trait]
pub trait QueueClient: Send + Sync {
    async fn enqueue_transcription_job(&self, job_id: &str, job_dir: &Path) -> Result<(), String>;
    async fn enqueue_summary_job(&self, job_id: &str, job_dir: &Path) -> Result<(), String>;
}

fn job_dir_missing(job_dir: &Path) -> CoreError {
    CoreError::InvalidInput(format!("job directory does not exist: {}", job_dir.display()))
}

/// Runs the ingest stage (§4.2): transcode the uploaded source into chunked
/// audio assets, persist the manifest, and enqueue transcription.
///
/// Any prior failure marker is cleared unconditionally first, matching the
/// original's `clear_job_failure(...)` call preceding its existence check.
/// A missing source file then fails under [`Stage::Upload`]. Failures during
/// transcode/chunk/persist are also recorded under [`Stage::Upload`]; a
/// failure to enqueue the next stage is recorded separately under
/// [`Stage::Chunking`], since by that point the manifest itself was written
/// successfully.
pub async fn ingest(
    queue: &dyn QueueClient,
    job_id: &str,
    job_dir: &Path,
    source_path: &Path,
    settings: &MediaSettings,
) -> Result<Vec<String>, CoreError> {
    artifacts::clear_job_failure(job_dir)?;
    tracing::info!(job_id, stage = %Stage::Upload, "starting ingest");

    if !source_path.exists() {
        let err = CoreError::InvalidInput(format!(
            "source path does not exist: {}",
            source_path.display()
        ));
        artifacts::mark_job_failed(job_dir, Stage::Upload, err.to_string(), Default::default())?;
        return Err(err);
    }

    let assets = match media::build_media_manifest(source_path, job_id, job_dir, settings).await {
        Ok(assets) => assets,
        Err(e) => {
            let err = CoreError::from(e);
            artifacts::mark_job_failed(job_dir, Stage::Upload, err.to_string(), Default::default())?;
            return Err(err);
        }
    };

    if let Err(e) = artifacts::dump_media_assets(job_dir, &assets) {
        let err = CoreError::from(e);
        artifacts::mark_job_failed(job_dir, Stage::Upload, err.to_string(), Default::default())?;
        return Err(err);
    }

    if let Err(message) = queue.enqueue_transcription_job(job_id, job_dir).await {
        let err = CoreError::OrchestrationFailure(message);
        artifacts::mark_job_failed(job_dir, Stage::Chunking, err.to_string(), Default::default())?;
        return Err(err);
    }

    tracing::info!(job_id, asset_count = assets.len(), "ingest complete, enqueued transcription");
    Ok(assets.into_iter().map(|a| a.asset_id).collect())
}

fn audio_chunks_in_order(assets: Vec<crate::domain::MediaAsset>) -> Vec<crate::domain::MediaAsset> {
    let mut chunks: Vec<_> = assets
        .into_iter()
        .filter(|a| a.kind == MediaAssetKind::AudioChunk)
        .collect();
    chunks.sort_by_key(|a| a.order);
    chunks
}

/// Runs the transcription stage (§4.4-§4.5): transcribe each audio chunk,
/// merge the responses into an ordered transcript, persist it, and enqueue
/// summarization. All failures, including enqueue failure, are recorded
/// under [`Stage::Transcription`].
pub async fn transcribe(
    client: &Client,
    queue: &dyn QueueClient,
    job_id: &str,
    job_dir: &Path,
    settings: &TranscriptionSettings,
    language: Option<&str>,
    prompt: Option<&str>,
) -> Result<usize, CoreError> {
    if !job_dir.exists() {
        let err = job_dir_missing(job_dir);
        artifacts::mark_job_failed(job_dir, Stage::Transcription, err.to_string(), Default::default())?;
        return Err(err);
    }

    artifacts::clear_job_failure(job_dir)?;
    tracing::info!(job_id, stage = %Stage::Transcription, "starting transcription");

    let run = async {
        let assets = artifacts::load_media_assets(job_dir)?;
        let chunk_assets = audio_chunks_in_order(assets);
        if chunk_assets.is_empty() {
            return Err(CoreError::InvalidInput(
                "no audio chunk assets found; cannot run transcription".to_string(),
            ));
        }

        let chunk_results =
            transcription::transcribe_chunks(client, &chunk_assets, settings, language, prompt).await?;
        let segments = transcription::assemble::merge_chunk_transcriptions(job_id, &chunk_results)?;
        artifacts::dump_transcript_segments(job_dir, &segments)?;
        Ok(segments.len())
    }
    .await;

    let segment_count = match run {
        Ok(count) => count,
        Err(err) => {
            artifacts::mark_job_failed(job_dir, Stage::Transcription, err.to_string(), Default::default())?;
            return Err(err);
        }
    };

    if let Err(message) = queue.enqueue_summary_job(job_id, job_dir).await {
        let err = CoreError::OrchestrationFailure(message);
        artifacts::mark_job_failed(job_dir, Stage::Transcription, err.to_string(), Default::default())?;
        return Err(err);
    }

    tracing::info!(job_id, segment_count, "transcription complete, enqueued summarization");
    Ok(segment_count)
}

/// Runs the summarization stage (§4.6), the terminal stage: no further
/// enqueue happens on success. All failures recorded under [`Stage::Summary`].
pub async fn summarize(
    client: &Client,
    job_id: &str,
    job_dir: &Path,
    settings: &SummarizationSettings,
) -> Result<(usize, usize), CoreError> {
    if !job_dir.exists() {
        let err = job_dir_missing(job_dir);
        artifacts::mark_job_failed(job_dir, Stage::Summary, err.to_string(), Default::default())?;
        return Err(err);
    }

    artifacts::clear_job_failure(job_dir)?;
    tracing::info!(job_id, stage = %Stage::Summary, "starting summarization");

    let run = async {
        let segments = artifacts::load_transcript_segments(job_dir)?;
        if segments.is_empty() {
            return Err(CoreError::InvalidInput(
                "transcription segments are not available; run transcription first".to_string(),
            ));
        }

        let language_hint = segments.iter().find_map(|s| s.language.clone());
        let bundle = summarization::generate_meeting_summary(
            client,
            job_id,
            &segments,
            language_hint.as_deref(),
            settings,
        )
        .await?;

        artifacts::dump_summary_items(job_dir, &bundle.summary_items)?;
        artifacts::dump_action_items(job_dir, &bundle.action_items)?;
        artifacts::dump_summary_quality(job_dir, &bundle.quality)?;

        Ok((bundle.summary_items.len(), bundle.action_items.len()))
    }
    .await;

    match run {
        Ok(counts) => {
            tracing::info!(job_id, summary_count = counts.0, action_item_count = counts.1, "summarization complete");
            Ok(counts)
        }
        Err(err) => {
            artifacts::mark_job_failed(job_dir, Stage::Summary, err.to_string(), Default::default())?;
            Err(err)
        }
    }
}

/// Resolves a job's on-disk directory given the configured upload root.
pub fn job_directory(upload_root: &Path, job_id: &str) -> PathBuf {
    upload_root.join(job_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FailingQueue {
        fail_transcription: bool,
    }

    #[async_trait]
    impl QueueClient for FailingQueue {
        async fn enqueue_transcription_job(&self, _job_id: &str, _job_dir: &Path) -> Result<(), String> {
            if self.fail_transcription {
                Err("queue unavailable".to_string())
            } else {
                Ok(())
            }
        }

        async fn enqueue_summary_job(&self, _job_id: &str, _job_dir: &Path) -> Result<(), String> {
            Ok(())
        }
    }

    struct RecordingQueue {
        transcription_calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl QueueClient for RecordingQueue {
        async fn enqueue_transcription_job(&self, job_id: &str, _job_dir: &Path) -> Result<(), String> {
            self.transcription_calls.lock().unwrap().push(job_id.to_string());
            Ok(())
        }

        async fn enqueue_summary_job(&self, _job_id: &str, _job_dir: &Path) -> Result<(), String> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn ingest_fails_fast_for_missing_source_path() {
        let dir = tempfile::tempdir().unwrap();
        let job_dir = dir.path().join("missing-job");
        let queue = RecordingQueue {
            transcription_calls: Mutex::new(Vec::new()),
        };

        let err = ingest(
            &queue,
            "job-1",
            &job_dir,
            Path::new("/does/not/matter.mp4"),
            &MediaSettings::default(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, CoreError::InvalidInput(_)));
        let failure = artifacts::load_job_failure(&job_dir).unwrap().unwrap();
        assert_eq!(failure.stage, "upload");
    }

    #[tokio::test]
    async fn ingest_clears_prior_failure_marker_before_checking_source() {
        let dir = tempfile::tempdir().unwrap();
        let job_dir = dir.path();
        artifacts::mark_job_failed(job_dir, Stage::Summary, "stale", Default::default()).unwrap();
        let queue = RecordingQueue {
            transcription_calls: Mutex::new(Vec::new()),
        };

        let err = ingest(
            &queue,
            "job-1",
            job_dir,
            Path::new("/does/not/matter.mp4"),
            &MediaSettings::default(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, CoreError::InvalidInput(_)));
        let failure = artifacts::load_job_failure(job_dir).unwrap().unwrap();
        assert_eq!(failure.stage, "upload", "marker should reflect the new upload failure, not the stale one");
    }

    #[tokio::test]
    async fn summarize_fails_when_no_transcript_segments_exist() {
        let dir = tempfile::tempdir().unwrap();
        let job_dir = dir.path();
        std::fs::create_dir_all(job_dir).unwrap();
        let client = Client::new();

        let settings = SummarizationSettings {
            api_key: "key".into(),
            model: "gpt-4o-mini".into(),
            base_url: "https://api.openai.com/v1".into(),
            user_agent: None,
            temperature: 0.2,
            max_output_tokens: 1200,
            retry: crate::config::RetrySettings {
                max_attempts: 1,
                retry_backoff_seconds: 1.0,
                max_retry_backoff_seconds: None,
                requests_per_minute: None,
                request_timeout: std::time::Duration::from_secs(5),
            },
            min_summary_sections: 3,
            max_summary_sections: 16,
            minutes_per_section: 7.0,
            max_total_prompt_characters: 80_000,
            segment_snippet_length: 1_600,
        };

        let err = summarize(&client, "job-1", job_dir, &settings).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput(_)));

        let failure = artifacts::load_job_failure(job_dir).unwrap().unwrap();
        assert_eq!(failure.stage, "summary");
    }

    fn write_executable(path: &Path, body: &str) {
        std::fs::write(path, body).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(path).unwrap().permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(path, perms).unwrap();
        }
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn ingest_enqueue_failure_is_marked_under_chunking_stage() {
        let dir = tempfile::tempdir().unwrap();
        let job_dir = dir.path();
        let src = job_dir.join("src.mp4");
        std::fs::write(&src, b"fake").unwrap();

        write_executable(
            &job_dir.join("ffmpeg_mock.sh"),
            "#!/bin/sh\nfor a in \"$@\"; do\n  last=\"$a\"\ndone\ntouch \"$last\"\nexit 0\n",
        );
        write_executable(
            &job_dir.join("ffprobe_mock.sh"),
            "#!/bin/sh\necho '{\"format\":{\"duration\":\"1.0\"}}'\n",
        );

        let settings = MediaSettings {
            transcoder_path: job_dir.join("ffmpeg_mock.sh").display().to_string(),
            prober_path: job_dir.join("ffprobe_mock.sh").display().to_string(),
            chunk_duration_seconds: 1,
            sample_rate: 16_000,
            channels: 1,
        };
        let queue = FailingQueue {
            fail_transcription: true,
        };

        let err = ingest(&queue, "job-1", job_dir, &src, &settings).await.unwrap_err();
        assert!(matches!(err, CoreError::OrchestrationFailure(_)));

        let failure = artifacts::load_job_failure(job_dir).unwrap().unwrap();
        assert_eq!(failure.stage, "chunking");

        let assets = artifacts::load_media_assets(job_dir).unwrap();
        assert!(!assets.is_empty(), "manifest should persist before enqueue runs");
    }
}
