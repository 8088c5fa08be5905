//! Invocation Plan Module
//!
//! Turns validated options into a concrete ffmpeg argument list. The plan is
//! pure data so it can be inspected and tested without spawning anything.

use std::path::Path;

use crate::core::ffmpeg::MediaInfo;
use crate::core::hwaccel::HardwareAccel;
use crate::core::options::{auto_video_bitrate_kbps, parse_resolution, ValidatedOptions};
use crate::core::{CoreError, CoreResult};

/// A fully composed encoder invocation
#[derive(Debug, Clone)]
pub struct InvocationPlan {
    /// Arguments for the encoder binary, output path last
    pub args: Vec<String>,
    /// The concrete video encoder in use, when encoding video
    pub video_encoder: Option<String>,
    /// Whether this run remuxes with `-c copy`
    pub stream_copy: bool,
}

/// The muxer name ffmpeg expects for a container extension, where the two
/// differ.
pub fn muxer_for_format(format: &str) -> &str {
    match format {
        "mkv" => "matroska",
        "m4a" => "ipod",
        "ogg" | "opus" => "ogg",
        other => other,
    }
}

/// Compose the encoder arguments for one run.
///
/// `media` informs auto bitrate selection; it is optional because a failed
/// probe must not block the transcode. `accel` has already been validated
/// by the hardware check (or forced to software on fallback).
///
/// Note: no `-nostdin` here. Graceful stop depends on the encoder reading
/// `q` from stdin.
pub fn build_plan(
    input_path: &Path,
    output_path: &Path,
    validated: &ValidatedOptions,
    accel: HardwareAccel,
    media: Option<&MediaInfo>,
) -> CoreResult<InvocationPlan> {
    let options = &validated.options;
    let mut args: Vec<String> = vec![
        "-hide_banner".to_string(),
        "-y".to_string(),
        "-i".to_string(),
        input_path.to_string_lossy().to_string(),
    ];

    let mut video_encoder = None;

    if validated.stream_copy {
        args.push("-c".to_string());
        args.push("copy".to_string());
    } else if validated.audio_only {
        args.push("-vn".to_string());
        push_audio_args(&mut args, options.audio_codec.as_deref(), options.audio_bitrate_kbps);
    } else {
        // Video encoder
        let codec = options
            .video_codec
            .as_deref()
            .ok_or_else(|| CoreError::Internal("validated options missing video codec".into()))?;

        if codec == "copy" {
            args.push("-c:v".to_string());
            args.push("copy".to_string());
        } else {
            let encoder = accel.encoder_for(codec).ok_or_else(|| {
                CoreError::HardwareUnavailable {
                    accel: accel.to_string(),
                    reason: format!("no {codec} encoder for this acceleration"),
                }
            })?;
            args.push("-c:v".to_string());
            args.push(encoder.to_string());
            video_encoder = Some(encoder.to_string());

            let bitrate = options
                .video_bitrate_kbps
                .unwrap_or_else(|| auto_video_bitrate_kbps(output_height(options, media)));
            args.push("-b:v".to_string());
            args.push(format!("{bitrate}k"));

            if let Some(preset) = &options.preset {
                args.push("-preset".to_string());
                args.push(preset.clone());
            }
        }

        if let Some(resolution) = &options.resolution {
            let (width, height) = parse_resolution(resolution)?;
            args.push("-vf".to_string());
            args.push(format!("scale={width}:{height}"));
        }
        if let Some(fps) = options.fps {
            args.push("-r".to_string());
            args.push(format!("{fps}"));
        }

        push_audio_args(&mut args, options.audio_codec.as_deref(), options.audio_bitrate_kbps);
    }

    args.push("-f".to_string());
    args.push(muxer_for_format(&options.output_format).to_string());

    // Structured progress on stdout; stderr stays human readable.
    args.push("-progress".to_string());
    args.push("pipe:1".to_string());

    args.push(output_path.to_string_lossy().to_string());

    Ok(InvocationPlan {
        args,
        video_encoder,
        stream_copy: validated.stream_copy,
    })
}

fn push_audio_args(args: &mut Vec<String>, codec: Option<&str>, bitrate_kbps: Option<u32>) {
    if let Some(codec) = codec {
        args.push("-c:a".to_string());
        let encoder = match codec {
            "vorbis" => "libvorbis",
            "opus" => "libopus",
            "mp3" => "libmp3lame",
            other => other,
        };
        args.push(encoder.to_string());

        if codec != "copy" {
            if let Some(kbps) = bitrate_kbps {
                args.push("-b:a".to_string());
                args.push(format!("{kbps}k"));
            }
        }
    }
}

/// Output height for bitrate tiering: explicit resolution wins, then the
/// probed source height, then 1080 as a neutral default.
fn output_height(
    options: &crate::core::options::TranscodeOptions,
    media: Option<&MediaInfo>,
) -> u32 {
    if let Some(resolution) = &options.resolution {
        if let Ok((_, height)) = parse_resolution(resolution) {
            return height;
        }
    }
    media
        .and_then(|m| m.video.as_ref())
        .map(|v| v.height)
        .filter(|h| *h > 0)
        .unwrap_or(1080)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::options::{validate, TranscodeOptions};
    use std::path::PathBuf;

    fn plan_for(options: TranscodeOptions, accel: HardwareAccel) -> InvocationPlan {
        let validated = validate(&options).unwrap();
        build_plan(
            &PathBuf::from("/in/src.mov"),
            &PathBuf::from("/out/dst.mp4"),
            &validated,
            accel,
            None,
        )
        .unwrap()
    }

    fn has_pair(args: &[String], flag: &str, value: &str) -> bool {
        args.windows(2)
            .any(|pair| pair[0] == flag && pair[1] == value)
    }

    #[test]
    fn test_default_plan_uses_libx264_and_auto_bitrate() {
        let options = TranscodeOptions {
            video_codec: Some("h264".to_string()),
            ..Default::default()
        };
        let plan = plan_for(options, HardwareAccel::None);
        assert!(has_pair(&plan.args, "-c:v", "libx264"));
        assert!(has_pair(&plan.args, "-b:v", "5000k"));
        assert!(has_pair(&plan.args, "-c:a", "aac"));
        assert!(has_pair(&plan.args, "-progress", "pipe:1"));
        assert_eq!(plan.args.last().map(String::as_str), Some("/out/dst.mp4"));
        assert_eq!(plan.video_encoder.as_deref(), Some("libx264"));
    }

    #[test]
    fn test_explicit_bitrate_wins_over_auto() {
        let options = TranscodeOptions {
            video_bitrate_kbps: Some(750),
            resolution: Some("3840x2160".to_string()),
            ..Default::default()
        };
        let plan = plan_for(options, HardwareAccel::None);
        assert!(has_pair(&plan.args, "-b:v", "750k"));
    }

    #[test]
    fn test_resolution_drives_auto_bitrate_tier() {
        let options = TranscodeOptions {
            resolution: Some("1280x720".to_string()),
            ..Default::default()
        };
        let plan = plan_for(options, HardwareAccel::None);
        assert!(has_pair(&plan.args, "-b:v", "2500k"));
        assert!(has_pair(&plan.args, "-vf", "scale=1280:720"));
    }

    #[test]
    fn test_hardware_plan_uses_accelerated_encoder() {
        let options = TranscodeOptions {
            hardware_accel: HardwareAccel::Nvenc,
            ..Default::default()
        };
        let plan = plan_for(options, HardwareAccel::Nvenc);
        assert!(has_pair(&plan.args, "-c:v", "h264_nvenc"));
        assert_eq!(plan.video_encoder.as_deref(), Some("h264_nvenc"));
    }

    #[test]
    fn test_stream_copy_plan() {
        let options = TranscodeOptions {
            output_format: "mkv".to_string(),
            video_codec: Some("copy".to_string()),
            audio_codec: Some("copy".to_string()),
            ..Default::default()
        };
        let plan = plan_for(options, HardwareAccel::None);
        assert!(plan.stream_copy);
        assert!(has_pair(&plan.args, "-c", "copy"));
        assert!(has_pair(&plan.args, "-f", "matroska"));
        assert!(plan.video_encoder.is_none());
        assert!(!plan.args.contains(&"-b:v".to_string()));
    }

    #[test]
    fn test_audio_only_plan_drops_video() {
        let options = TranscodeOptions {
            output_format: "mp3".to_string(),
            audio_bitrate_kbps: Some(192),
            ..Default::default()
        };
        let plan = plan_for(options, HardwareAccel::None);
        assert!(plan.args.contains(&"-vn".to_string()));
        assert!(has_pair(&plan.args, "-c:a", "libmp3lame"));
        assert!(has_pair(&plan.args, "-b:a", "192k"));
        assert!(!plan.args.contains(&"-c:v".to_string()));
    }

    #[test]
    fn test_no_nostdin_flag() {
        let plan = plan_for(TranscodeOptions::default(), HardwareAccel::None);
        assert!(!plan.args.contains(&"-nostdin".to_string()));
    }

    #[test]
    fn test_muxer_names() {
        assert_eq!(muxer_for_format("mkv"), "matroska");
        assert_eq!(muxer_for_format("m4a"), "ipod");
        assert_eq!(muxer_for_format("mp4"), "mp4");
        assert_eq!(muxer_for_format("opus"), "ogg");
    }

    #[test]
    fn test_fps_arg() {
        let options = TranscodeOptions {
            fps: Some(24.0),
            ..Default::default()
        };
        let plan = plan_for(options, HardwareAccel::None);
        assert!(has_pair(&plan.args, "-r", "24"));
    }
}
