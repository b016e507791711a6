//! C2: transcode a source recording to a mono audio master, probe its
//! duration, and cut it into fixed-duration chunks. Grounded in
//! `ffui_core/ffprobe.rs`'s subprocess-invocation style and in
//! `original_source/media/audio.py` + `media/chunking.py` for the exact
//! ffmpeg argument list and chunk math (chunking here uses ffmpeg `-ss`/`-t`
//! per spec §4.2/§6 rather than the original's raw WAV-frame slicing).

use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::Context;
use tokio::process::Command;

use crate::config::MediaSettings;
use crate::domain::{MediaAsset, MediaAssetKind};
use crate::error::MediaError;

/// Runs the transcoder to produce a mono PCM WAV audio master from `source`.
///
/// ffmpeg args mirror `extract_audio_to_wav`: hide-banner, error-only log
/// level, overwrite, disable video, fixed codec/sample-rate/channel count.
pub async fn transcode_to_master(
    source: &Path,
    job_dir: &Path,
    settings: &MediaSettings,
) -> Result<PathBuf, MediaError> {
    if !source.exists() {
        return Err(MediaError::InvalidConfig(format!(
            "source file does not exist: {}",
            source.display()
        )));
    }

    let metadata = tokio::fs::metadata(source).await?;
    if metadata.len() == 0 {
        return Err(MediaError::EmptyAudio);
    }

    let stem = source
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("master");
    let destination = job_dir.join(format!("{stem}_audio.wav"));

    let mut cmd = Command::new(&settings.transcoder_path);
    cmd.args([
        "-hide_banner",
        "-loglevel",
        "error",
        "-y",
        "-i",
    ])
    .arg(source)
    .args(["-vn", "-acodec", "pcm_s16le", "-ar"])
    .arg(settings.sample_rate.to_string())
    .arg("-ac")
    .arg(settings.channels.to_string())
    .arg(&destination)
    .stdin(Stdio::null())
    .stdout(Stdio::null())
    .stderr(Stdio::piped());

    tracing::info!(source = %source.display(), transcoder = %settings.transcoder_path, "transcoding to audio master");

    let output = match cmd
        .output()
        .await
        .with_context(|| format!("spawning transcoder at {}", settings.transcoder_path))
    {
        Ok(output) => output,
        Err(report) => {
            if let Some(io_err) = report.downcast_ref::<std::io::Error>() {
                if io_err.kind() == std::io::ErrorKind::NotFound {
                    return Err(MediaError::TranscoderMissing(settings.transcoder_path.clone()));
                }
            }
            return Err(MediaError::TranscodeFailed(format!("{report:#}")));
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        tracing::warn!(status = %output.status, "transcoder exited non-zero");
        return Err(MediaError::TranscodeFailed(format!(
            "ffmpeg exited with {}: {}",
            output.status, stderr
        )));
    }

    if !destination.exists() {
        return Err(MediaError::TranscodeFailed(
            "ffmpeg reported success but produced no output file".to_string(),
        ));
    }

    tracing::info!(destination = %destination.display(), "audio master ready");
    Ok(destination)
}

/// Queries the prober for the master's duration in seconds. Fails with
/// `ProbeFailed` on a non-positive duration.
pub async fn probe_duration_seconds(
    path: &Path,
    settings: &MediaSettings,
) -> Result<f64, MediaError> {
    let output = Command::new(&settings.prober_path)
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "json",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .with_context(|| format!("running prober at {}", settings.prober_path))
        .map_err(|report| MediaError::ProbeFailed(format!("{report:#}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(MediaError::ProbeFailed(format!(
            "prober exited with {}: {}",
            output.status, stderr
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let parsed: serde_json::Value = serde_json::from_str(&stdout)
        .map_err(|e| MediaError::ProbeFailed(format!("unparseable probe output: {e}")))?;
    let duration_str = parsed
        .get("format")
        .and_then(|f| f.get("duration"))
        .and_then(|d| d.as_str())
        .ok_or_else(|| MediaError::ProbeFailed("probe output missing format.duration".into()))?;
    let duration: f64 = duration_str
        .parse()
        .map_err(|_| MediaError::ProbeFailed(format!("unparseable duration: {duration_str}")))?;

    if duration <= 0.0 {
        return Err(MediaError::ProbeFailed(format!(
            "non-positive duration: {duration}"
        )));
    }

    Ok(duration)
}

/// One chunk produced by `split_into_chunks`.
pub struct ChunkSpec {
    pub asset: MediaAsset,
    pub path: PathBuf,
}

/// Cuts `master` into contiguous `chunk_duration_seconds`-long chunks via
/// ffmpeg `-ss`/`-t`, stream-copying since the master is already in the
/// target codec. The last chunk carries the remainder.
pub async fn split_into_chunks(
    master: &Path,
    master_duration_seconds: f64,
    job_id: &str,
    job_dir: &Path,
    settings: &MediaSettings,
) -> Result<Vec<ChunkSpec>, MediaError> {
    if settings.chunk_duration_seconds == 0 {
        return Err(MediaError::InvalidConfig(
            "chunk_duration_seconds must be greater than zero".to_string(),
        ));
    }
    if master_duration_seconds <= 0.0 {
        return Err(MediaError::EmptyAudio);
    }

    let chunks_dir = job_dir.join("audio_chunks");
    tokio::fs::create_dir_all(&chunks_dir).await?;

    let stem = master
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("master");
    let ext = master
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("wav");

    let chunk_duration = settings.chunk_duration_seconds as f64;
    let chunk_count = (master_duration_seconds / chunk_duration).ceil().max(1.0) as usize;

    let mut specs = Vec::with_capacity(chunk_count);
    let mut position_seconds = 0.0_f64;

    for index in 0..chunk_count {
        let remaining = master_duration_seconds - position_seconds;
        let this_duration = remaining.min(chunk_duration).max(0.0);
        if this_duration <= 0.0 {
            break;
        }

        let chunk_path = chunks_dir.join(format!("{stem}_chunk_{index:04}.{ext}"));

        let output = Command::new(&settings.transcoder_path)
            .args(["-hide_banner", "-loglevel", "error", "-y", "-ss"])
            .arg(format!("{position_seconds}"))
            .arg("-t")
            .arg(format!("{this_duration}"))
            .arg("-i")
            .arg(master)
            .args(["-c", "copy"])
            .arg(&chunk_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    MediaError::TranscoderMissing(settings.transcoder_path.clone())
                } else {
                    MediaError::Io(e)
                }
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MediaError::TranscodeFailed(format!(
                "ffmpeg chunk {index} exited with {}: {}",
                output.status, stderr
            )));
        }

        let start_ms = (position_seconds * 1000.0).round() as i64;
        let duration_ms = (this_duration * 1000.0).round() as i64;
        let end_ms = start_ms + duration_ms;

        let asset = MediaAsset {
            asset_id: MediaAsset::new_id(),
            job_id: job_id.to_string(),
            kind: MediaAssetKind::AudioChunk,
            path: chunk_path.clone(),
            order: index as i64,
            duration_ms,
            start_ms,
            end_ms,
            sample_rate: Some(settings.sample_rate),
            channels: Some(settings.channels),
            bit_depth: Some(16),
            parent_asset_id: None,
            extra: Default::default(),
        };

        specs.push(ChunkSpec {
            asset,
            path: chunk_path,
        });

        position_seconds += this_duration;
    }

    if specs.is_empty() {
        return Err(MediaError::EmptyAudio);
    }

    Ok(specs)
}

/// Builds the master `MediaAsset` entry from its already-split chunks
/// (`order=-1`, `duration_ms` summed, `end_ms` taken from the last chunk),
/// grounded in `tasks/ingest.py::_build_master_asset`.
pub fn build_master_asset(
    job_id: &str,
    master_path: &Path,
    chunks: &[MediaAsset],
    settings: &MediaSettings,
) -> MediaAsset {
    let total_duration: i64 = chunks.iter().map(|c| c.duration_ms).sum();
    let end_ms = chunks.last().map(|c| c.end_ms).unwrap_or(0);
    MediaAsset {
        asset_id: MediaAsset::new_id(),
        job_id: job_id.to_string(),
        kind: MediaAssetKind::AudioMaster,
        path: master_path.to_path_buf(),
        order: -1,
        duration_ms: total_duration,
        start_ms: 0,
        end_ms,
        sample_rate: Some(settings.sample_rate),
        channels: Some(settings.channels),
        bit_depth: Some(16),
        parent_asset_id: None,
        extra: Default::default(),
    }
}

/// Full ingest algorithm (§4.2): transcode, probe, chunk, and assemble the
/// manifest with parent/master linkage wired up.
pub async fn build_media_manifest(
    source: &Path,
    job_id: &str,
    job_dir: &Path,
    settings: &MediaSettings,
) -> Result<Vec<MediaAsset>, MediaError> {
    let master_path = transcode_to_master(source, job_dir, settings).await?;
    let duration = probe_duration_seconds(&master_path, settings).await?;
    let chunk_specs = split_into_chunks(&master_path, duration, job_id, job_dir, settings).await?;

    let mut master = build_master_asset(
        job_id,
        &master_path,
        &chunk_specs.iter().map(|c| c.asset.clone()).collect::<Vec<_>>(),
        settings,
    );

    let mut chunks: Vec<MediaAsset> = chunk_specs.into_iter().map(|c| c.asset).collect();
    for chunk in &mut chunks {
        chunk.parent_asset_id = Some(master.asset_id.clone());
    }
    master.parent_asset_id = None;

    let mut assets = Vec::with_capacity(chunks.len() + 1);
    assets.push(master);
    assets.extend(chunks);
    Ok(assets)
}
