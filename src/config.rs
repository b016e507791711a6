//! Process-wide configuration (§6 Configuration, §9 "global mutable state →
//! explicit components"). Grounded in `original_source/settings.py`'s
//! `Settings.from_env`, adapted to the teacher's typed-struct settings
//! convention (`ffui_core/settings/mod.rs`) rather than a mutable module-level
//! cache: callers build one `ProcessConfig` and pass it down explicitly, or
//! wrap it in an `Arc`/`OnceLock`-backed `ProcessContext` (§9 OQ2) themselves.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::MediaError;

/// Shared resilient-HTTP-caller knobs (§4.3), reused by transcription and
/// summarization settings.
#[derive(Debug, Clone)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub retry_backoff_seconds: f64,
    pub max_retry_backoff_seconds: Option<f64>,
    pub requests_per_minute: Option<u32>,
    pub request_timeout: Duration,
}

impl RetrySettings {
    pub fn validate(&self) -> Result<(), MediaError> {
        if self.max_attempts < 1 {
            return Err(MediaError::InvalidConfig(
                "max_attempts must be at least 1".into(),
            ));
        }
        if self.retry_backoff_seconds <= 0.0 {
            return Err(MediaError::InvalidConfig(
                "retry_backoff_seconds must be positive".into(),
            ));
        }
        if matches!(self.max_retry_backoff_seconds, Some(v) if v <= 0.0) {
            return Err(MediaError::InvalidConfig(
                "max_retry_backoff_seconds must be positive when provided".into(),
            ));
        }
        if matches!(self.requests_per_minute, Some(v) if v == 0) {
            return Err(MediaError::InvalidConfig(
                "requests_per_minute must be positive when provided".into(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(MediaError::InvalidConfig(
                "request_timeout_seconds must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct TranscriptionSettings {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub user_agent: Option<String>,
    pub retry: RetrySettings,
    /// Bounds the fan-out of concurrent chunk transcription requests (§5,
    /// §9.5 supplemented feature).
    pub max_concurrent_requests: usize,
}

#[derive(Debug, Clone)]
pub struct SummarizationSettings {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub user_agent: Option<String>,
    pub temperature: f64,
    pub max_output_tokens: u32,
    pub retry: RetrySettings,
    /// OQ3: (min, max, minutes-per-section divisor) made configurable
    /// rather than constants.
    pub min_summary_sections: u32,
    pub max_summary_sections: u32,
    pub minutes_per_section: f64,
    pub max_total_prompt_characters: usize,
    pub segment_snippet_length: usize,
}

impl SummarizationSettings {
    pub fn validate(&self) -> Result<(), MediaError> {
        self.retry.validate()?;
        if self.max_output_tokens == 0 {
            return Err(MediaError::InvalidConfig(
                "max_output_tokens must be positive".into(),
            ));
        }
        if self.min_summary_sections == 0 || self.min_summary_sections > self.max_summary_sections
        {
            return Err(MediaError::InvalidConfig(
                "min_summary_sections must be positive and <= max_summary_sections".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct MediaSettings {
    pub transcoder_path: String,
    pub prober_path: String,
    pub chunk_duration_seconds: u32,
    pub sample_rate: u32,
    pub channels: u32,
}

impl Default for MediaSettings {
    fn default() -> Self {
        Self {
            transcoder_path: "ffmpeg".to_string(),
            prober_path: "ffprobe".to_string(),
            chunk_duration_seconds: 900,
            sample_rate: 16_000,
            channels: 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessConfig {
    pub upload_root: PathBuf,
    pub job_timeout: Duration,
    pub media: MediaSettings,
    pub transcription: TranscriptionSettings,
    pub summarization: SummarizationSettings,
}

fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> Result<T, MediaError> {
    match env::var(name) {
        Err(_) => Ok(default),
        Ok(raw) if raw.is_empty() => Ok(default),
        Ok(raw) => raw
            .parse()
            .map_err(|_| MediaError::InvalidConfig(format!("{name} must be numeric"))),
    }
}

fn parse_optional_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>, MediaError> {
    match env::var(name) {
        Err(_) => Ok(None),
        Ok(raw) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("none") {
                Ok(None)
            } else {
                trimmed
                    .parse()
                    .map(Some)
                    .map_err(|_| MediaError::InvalidConfig(format!("{name} must be numeric")))
            }
        }
    }
}

impl ProcessConfig {
    /// Builds configuration from the process environment. Fails with
    /// `InvalidConfig` if any numeric value does not parse, and additionally
    /// if `OPENAI_API_KEY` is missing (worker startup requirement, §6).
    pub fn from_env() -> Result<Self, MediaError> {
        let upload_root = env::var("MEETINGAI_UPLOAD_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./storage/uploads"));

        let job_timeout_seconds: u64 = parse_env("MEETINGAI_JOB_TIMEOUT", 900)?;

        let api_key = env::var("OPENAI_API_KEY")
            .map_err(|_| MediaError::InvalidConfig("OPENAI_API_KEY must be set".into()))?;

        let transcription = TranscriptionSettings {
            api_key: api_key.clone(),
            model: env_or("MEETINGAI_TRANSCRIBE_MODEL", "gpt-4o-transcribe-diarize"),
            base_url: env_or("MEETINGAI_OPENAI_BASE_URL", "https://api.openai.com/v1"),
            user_agent: Some(env_or("MEETINGAI_TRANSCRIBE_USER_AGENT", "MeetingAI/0.1")),
            retry: RetrySettings {
                max_attempts: parse_env("MEETINGAI_TRANSCRIBE_MAX_ATTEMPTS", 3)?,
                retry_backoff_seconds: parse_env("MEETINGAI_TRANSCRIBE_BACKOFF_SECONDS", 1.0)?,
                max_retry_backoff_seconds: parse_optional_env(
                    "MEETINGAI_TRANSCRIBE_MAX_BACKOFF_SECONDS",
                )?
                .or(Some(30.0)),
                requests_per_minute: parse_optional_env(
                    "MEETINGAI_TRANSCRIBE_REQUESTS_PER_MINUTE",
                )?,
                request_timeout: Duration::from_secs_f64(parse_env(
                    "MEETINGAI_TRANSCRIBE_TIMEOUT",
                    300.0,
                )?),
            },
            max_concurrent_requests: parse_env("MEETINGAI_TRANSCRIBE_MAX_CONCURRENT", 5)?,
        };

        let summarization = SummarizationSettings {
            api_key,
            model: env_or("MEETINGAI_SUMMARY_MODEL", "gpt-4o-mini"),
            base_url: env_or("MEETINGAI_OPENAI_BASE_URL", "https://api.openai.com/v1"),
            user_agent: Some(env_or("MEETINGAI_TRANSCRIBE_USER_AGENT", "MeetingAI/0.1")),
            temperature: parse_env("MEETINGAI_SUMMARY_TEMPERATURE", 0.2)?,
            max_output_tokens: parse_env("MEETINGAI_SUMMARY_MAX_OUTPUT_TOKENS", 1200)?,
            retry: RetrySettings {
                max_attempts: parse_env("MEETINGAI_SUMMARY_MAX_ATTEMPTS", 3)?,
                retry_backoff_seconds: parse_env("MEETINGAI_SUMMARY_BACKOFF_SECONDS", 2.0)?,
                max_retry_backoff_seconds: parse_optional_env(
                    "MEETINGAI_SUMMARY_MAX_BACKOFF_SECONDS",
                )?
                .or(Some(60.0)),
                requests_per_minute: parse_optional_env("MEETINGAI_SUMMARY_REQUESTS_PER_MINUTE")?,
                request_timeout: Duration::from_secs_f64(parse_env(
                    "MEETINGAI_SUMMARY_TIMEOUT",
                    240.0,
                )?),
            },
            min_summary_sections: 3,
            max_summary_sections: 16,
            minutes_per_section: 7.0,
            max_total_prompt_characters: 80_000,
            segment_snippet_length: 1_600,
        };

        let media = MediaSettings {
            transcoder_path: env_or("MEETINGAI_FFMPEG_PATH", "ffmpeg"),
            prober_path: env_or("MEETINGAI_FFPROBE_PATH", "ffprobe"),
            chunk_duration_seconds: parse_env("MEETINGAI_CHUNK_DURATION_SECONDS", 900)?,
            sample_rate: 16_000,
            channels: 1,
        };

        transcription.retry.validate()?;
        summarization.validate()?;

        Ok(Self {
            upload_root,
            job_timeout: Duration::from_secs(job_timeout_seconds),
            media,
            transcription,
            summarization,
        })
    }
}
