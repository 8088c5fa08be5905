//! Media Probe Module
//!
//! Runs ffprobe against an input file and parses the JSON output into a
//! typed [`MediaInfo`]. Probing is advisory for the engine: a failed probe
//! never blocks a transcode, it only degrades progress reporting.

use std::path::Path;
use std::time::Duration;

use super::{EncoderPaths, FfmpegError, FfmpegResult};

/// Media information extracted by ffprobe
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaInfo {
    /// Duration in seconds
    pub duration_sec: f64,
    /// File size in bytes
    pub size_bytes: u64,
    /// Container format
    pub format: String,
    /// Overall bitrate in kbits/s (if available)
    pub bitrate_kbps: Option<u64>,
    /// Video stream info (if present)
    pub video: Option<VideoStreamInfo>,
    /// Audio stream info (if present)
    pub audio: Option<AudioStreamInfo>,
}

/// Video stream information
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoStreamInfo {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Frame rate (frames per second)
    pub fps: f64,
    /// Codec name (e.g., "h264", "vp9")
    pub codec: String,
    /// Bitrate in bits/s (if available)
    pub bitrate: Option<u64>,
}

/// Audio stream information
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioStreamInfo {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u8,
    /// Codec name (e.g., "aac", "mp3")
    pub codec: String,
    /// Bitrate in bits/s (if available)
    pub bitrate: Option<u64>,
}

/// Probe a media file for duration, container and stream information.
pub async fn probe_media(
    paths: &EncoderPaths,
    input: &Path,
    timeout: Duration,
) -> FfmpegResult<MediaInfo> {
    if !input.exists() {
        return Err(FfmpegError::ProbeError(format!(
            "Input file does not exist: {}",
            input.display()
        )));
    }

    let run = tokio::process::Command::new(&paths.ffprobe_path)
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
            &input.to_string_lossy(),
        ])
        .output();

    let output = tokio::time::timeout(timeout, run)
        .await
        .map_err(|_| FfmpegError::Timeout)?
        .map_err(FfmpegError::ProcessError)?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(FfmpegError::ProbeError(format!(
            "FFprobe failed: {}",
            stderr
        )));
    }

    let json_str = String::from_utf8_lossy(&output.stdout);
    parse_probe_output(&json_str)
}

/// Parse ffprobe JSON output
fn parse_probe_output(json_str: &str) -> FfmpegResult<MediaInfo> {
    let json: serde_json::Value = serde_json::from_str(json_str)
        .map_err(|e| FfmpegError::ParseError(format!("Failed to parse FFprobe output: {}", e)))?;

    let format = json
        .get("format")
        .ok_or_else(|| FfmpegError::ParseError("Missing format info".to_string()))?;

    let duration_sec = format
        .get("duration")
        .and_then(|d| d.as_str())
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.0);

    let size_bytes = format
        .get("size")
        .and_then(|s| s.as_str())
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0);

    let format_name = format
        .get("format_name")
        .and_then(|f| f.as_str())
        .unwrap_or("unknown")
        .to_string();

    let bitrate_kbps = format
        .get("bit_rate")
        .and_then(|b| b.as_str())
        .and_then(|s| s.parse::<u64>().ok())
        .map(|bits| bits / 1000);

    let streams = json
        .get("streams")
        .and_then(|s| s.as_array())
        .cloned()
        .unwrap_or_default();

    let mut video_info: Option<VideoStreamInfo> = None;
    let mut audio_info: Option<AudioStreamInfo> = None;

    for stream in streams {
        let codec_type = stream.get("codec_type").and_then(|c| c.as_str());

        match codec_type {
            Some("video") if video_info.is_none() => {
                video_info = Some(parse_video_stream(&stream));
            }
            Some("audio") if audio_info.is_none() => {
                audio_info = Some(parse_audio_stream(&stream));
            }
            _ => {}
        }
    }

    Ok(MediaInfo {
        duration_sec,
        size_bytes,
        format: format_name,
        bitrate_kbps,
        video: video_info,
        audio: audio_info,
    })
}

fn parse_video_stream(stream: &serde_json::Value) -> VideoStreamInfo {
    let width = stream.get("width").and_then(|w| w.as_u64()).unwrap_or(0) as u32;

    let height = stream.get("height").and_then(|h| h.as_u64()).unwrap_or(0) as u32;

    // Parse frame rate from r_frame_rate (e.g., "30/1" or "30000/1001")
    let fps = stream
        .get("r_frame_rate")
        .and_then(|f| f.as_str())
        .and_then(|s| {
            let parts: Vec<&str> = s.split('/').collect();
            if parts.len() == 2 {
                let num: f64 = parts[0].parse().ok()?;
                let den: f64 = parts[1].parse().ok()?;
                if den > 0.0 {
                    Some(num / den)
                } else {
                    None
                }
            } else {
                s.parse().ok()
            }
        })
        .unwrap_or(30.0);

    let codec = stream
        .get("codec_name")
        .and_then(|c| c.as_str())
        .unwrap_or("unknown")
        .to_string();

    let bitrate = stream
        .get("bit_rate")
        .and_then(|b| b.as_str())
        .and_then(|s| s.parse::<u64>().ok());

    VideoStreamInfo {
        width,
        height,
        fps,
        codec,
        bitrate,
    }
}

fn parse_audio_stream(stream: &serde_json::Value) -> AudioStreamInfo {
    let sample_rate = stream
        .get("sample_rate")
        .and_then(|s| s.as_str())
        .and_then(|s| s.parse::<u32>().ok())
        .unwrap_or(44100);

    let channels = stream.get("channels").and_then(|c| c.as_u64()).unwrap_or(2) as u8;

    let codec = stream
        .get("codec_name")
        .and_then(|c| c.as_str())
        .unwrap_or("unknown")
        .to_string();

    let bitrate = stream
        .get("bit_rate")
        .and_then(|b| b.as_str())
        .and_then(|s| s.parse::<u64>().ok());

    AudioStreamInfo {
        sample_rate,
        channels,
        codec,
        bitrate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_probe_output_video() {
        let json = r#"{
            "format": {
                "duration": "10.5",
                "size": "1048576",
                "format_name": "mov,mp4,m4a,3gp,3g2,mj2",
                "bit_rate": "5000000"
            },
            "streams": [
                {
                    "codec_type": "video",
                    "codec_name": "h264",
                    "width": 1920,
                    "height": 1080,
                    "r_frame_rate": "30/1",
                    "bit_rate": "4500000"
                },
                {
                    "codec_type": "audio",
                    "codec_name": "aac",
                    "sample_rate": "48000",
                    "channels": 2
                }
            ]
        }"#;

        let info = parse_probe_output(json).unwrap();
        assert_eq!(info.duration_sec, 10.5);
        assert_eq!(info.size_bytes, 1_048_576);
        assert_eq!(info.bitrate_kbps, Some(5000));

        let video = info.video.unwrap();
        assert_eq!(video.width, 1920);
        assert_eq!(video.codec, "h264");
        assert_eq!(video.fps, 30.0);

        let audio = info.audio.unwrap();
        assert_eq!(audio.sample_rate, 48000);
        assert_eq!(audio.channels, 2);
    }

    #[test]
    fn test_parse_probe_output_fractional_fps() {
        let json = r#"{
            "format": { "duration": "1.0", "size": "1000", "format_name": "matroska" },
            "streams": [
                {
                    "codec_type": "video",
                    "codec_name": "vp9",
                    "width": 1280,
                    "height": 720,
                    "r_frame_rate": "30000/1001"
                }
            ]
        }"#;

        let info = parse_probe_output(json).unwrap();
        let video = info.video.unwrap();
        assert!((video.fps - 29.97).abs() < 0.01);
        assert!(info.audio.is_none());
    }

    #[test]
    fn test_parse_probe_output_missing_format() {
        let result = parse_probe_output(r#"{"streams": []}"#);
        assert!(matches!(result, Err(FfmpegError::ParseError(_))));
    }

    #[tokio::test]
    async fn test_probe_missing_input_is_probe_error() {
        let paths = EncoderPaths {
            ffmpeg_path: "/nope/ffmpeg".into(),
            ffprobe_path: "/nope/ffprobe".into(),
            version: "test".to_string(),
        };
        let result =
            probe_media(&paths, Path::new("/nope/missing.mov"), Duration::from_secs(1)).await;
        assert!(matches!(result, Err(FfmpegError::ProbeError(_))));
    }
}
