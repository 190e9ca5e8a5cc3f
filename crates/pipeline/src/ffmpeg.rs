//! FFmpeg/FFprobe helpers for pulling the final frame out of a clip.

use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;

/// Seconds before the end of the clip where last-frame decoding starts.
pub const DEFAULT_TAIL_SECS: f64 = 0.5;

/// Error type for FFmpeg/FFprobe operations.
#[derive(Debug, thiserror::Error)]
pub enum FfmpegError {
    #[error("ffprobe/ffmpeg binary not found: {0}")]
    NotFound(std::io::Error),

    #[error("ffprobe/ffmpeg execution failed (exit code {exit_code:?}): {stderr}")]
    ExecutionFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("failed to parse ffprobe output: {0}")]
    ParseError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("video file not found: {0}")]
    VideoNotFound(String),

    /// The file decoded but holds nothing to extract.
    #[error("clip has no decodable video: {0}")]
    EmptyVideo(String),
}

// ---------------------------------------------------------------------------
// ffprobe JSON output structures
// ---------------------------------------------------------------------------

/// Top-level ffprobe JSON output (`-print_format json -show_format -show_streams`).
#[derive(Debug, Deserialize)]
pub struct FfprobeOutput {
    #[serde(default)]
    pub streams: Vec<FfprobeStream>,
    pub format: FfprobeFormat,
}

/// A single stream from ffprobe output.
#[derive(Debug, Deserialize)]
pub struct FfprobeStream {
    pub codec_type: Option<String>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub duration: Option<String>,
}

/// Format-level metadata from ffprobe.
#[derive(Debug, Deserialize)]
pub struct FfprobeFormat {
    pub duration: Option<String>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Run `ffprobe` on a video file and return the parsed JSON output.
pub async fn probe_video(path: &Path) -> Result<FfprobeOutput, FfmpegError> {
    if !path.exists() {
        return Err(FfmpegError::VideoNotFound(
            path.to_string_lossy().to_string(),
        ));
    }

    let output = tokio::process::Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .output()
        .await
        .map_err(FfmpegError::NotFound)?;

    if !output.status.success() {
        return Err(FfmpegError::ExecutionFailed {
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_probe(&stdout)
}

/// Parse raw ffprobe JSON.
pub fn parse_probe(json: &str) -> Result<FfprobeOutput, FfmpegError> {
    serde_json::from_str::<FfprobeOutput>(json)
        .map_err(|e| FfmpegError::ParseError(format!("{e}: {json}")))
}

/// Decode the tail of `video_path` and write its final frame to
/// `output_path` (format chosen by extension, e.g. `.png`).
pub async fn extract_last_frame(
    video_path: &Path,
    output_path: &Path,
    tail_secs: f64,
) -> Result<(), FfmpegError> {
    if !video_path.exists() {
        return Err(FfmpegError::VideoNotFound(
            video_path.to_string_lossy().to_string(),
        ));
    }

    // `-update 1` keeps overwriting the single output image, so the file
    // left behind is the last decoded frame.
    let output = tokio::process::Command::new("ffmpeg")
        .args(["-y", "-v", "error", "-sseof", &format!("-{tail_secs:.3}"), "-i"])
        .arg(video_path)
        .args(["-update", "1", "-q:v", "2"])
        .arg(output_path)
        .output()
        .await
        .map_err(FfmpegError::NotFound)?;

    if !output.status.success() {
        return Err(FfmpegError::ExecutionFailed {
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }

    if !output_path.exists() {
        return Err(FfmpegError::EmptyVideo(
            video_path.to_string_lossy().to_string(),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// FrameExtractor
// ---------------------------------------------------------------------------

/// Pulls the final frame out of a downloaded clip.
#[async_trait]
pub trait FrameExtractor: Send + Sync {
    async fn extract_last_frame(&self, clip_path: &Path, output_path: &Path)
        -> Result<(), FfmpegError>;
}

/// [`FrameExtractor`] backed by the `ffprobe` and `ffmpeg` binaries.
#[derive(Debug, Clone)]
pub struct FfmpegFrameExtractor {
    pub tail_secs: f64,
}

impl Default for FfmpegFrameExtractor {
    fn default() -> Self {
        Self {
            tail_secs: DEFAULT_TAIL_SECS,
        }
    }
}

#[async_trait]
impl FrameExtractor for FfmpegFrameExtractor {
    async fn extract_last_frame(
        &self,
        clip_path: &Path,
        output_path: &Path,
    ) -> Result<(), FfmpegError> {
        let probe = probe_video(clip_path).await?;
        let duration = parse_duration(&probe);
        if first_video_stream(&probe).is_none() || duration <= 0.0 {
            return Err(FfmpegError::EmptyVideo(
                clip_path.to_string_lossy().to_string(),
            ));
        }
        extract_last_frame(clip_path, output_path, self.tail_secs.min(duration)).await
    }
}

// ---------------------------------------------------------------------------
// Parsing helpers
// ---------------------------------------------------------------------------

/// Find the first video stream in the ffprobe output.
fn first_video_stream(probe: &FfprobeOutput) -> Option<&FfprobeStream> {
    probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
}

/// Parse the video duration in seconds from ffprobe output.
pub fn parse_duration(probe: &FfprobeOutput) -> f64 {
    // Try format-level duration first.
    if let Some(secs) = probe
        .format
        .duration
        .as_deref()
        .and_then(|d| d.parse::<f64>().ok())
    {
        return secs;
    }

    first_video_stream(probe)
        .and_then(|s| s.duration.as_deref())
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
