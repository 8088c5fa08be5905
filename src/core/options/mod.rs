//! Transcode Options Module
//!
//! User-facing transcode settings and the validation pass that normalizes
//! them into a concrete, encoder-ready form. Validation is table driven:
//! each container carries its allowed codecs and defaults, so an invalid
//! codec/container pairing is corrected (and reported) rather than rejected.

use serde::{Deserialize, Serialize};

use crate::core::hwaccel::HardwareAccel;
use crate::core::{CoreError, CoreResult};

/// User-supplied transcode settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TranscodeOptions {
    /// Target container format (e.g. "mp4", "mkv", "mp3"). Empty means
    /// keep the input container where possible, else "mp4".
    pub output_format: String,
    /// Video codec family (e.g. "h264", "h265", "vp9", "av1", "copy")
    pub video_codec: Option<String>,
    /// Audio codec (e.g. "aac", "mp3", "opus", "copy")
    pub audio_codec: Option<String>,
    /// Explicit video bitrate in kbits/s. Overrides auto selection.
    pub video_bitrate_kbps: Option<u32>,
    /// Explicit audio bitrate in kbits/s
    pub audio_bitrate_kbps: Option<u32>,
    /// Target resolution as "WIDTHxHEIGHT" (e.g. "1920x1080")
    pub resolution: Option<String>,
    /// Target frame rate
    pub fps: Option<f64>,
    /// Encoder preset (e.g. "ultrafast", "medium", "slow")
    pub preset: Option<String>,
    /// Requested hardware acceleration family
    pub hardware_accel: HardwareAccel,
}

/// Options after validation: normalized, with derived flags.
#[derive(Debug, Clone)]
pub struct ValidatedOptions {
    pub options: TranscodeOptions,
    /// The job is a container remux: either both codecs were requested as
    /// "copy", or nothing forces a re-encode and the container allows it
    pub stream_copy: bool,
    /// Target container is audio-only; video streams are dropped
    pub audio_only: bool,
    /// Human-readable descriptions of every correction made
    pub adjustments: Vec<String>,
}

/// Per-container codec rules
struct FormatRule {
    format: &'static str,
    video_codecs: &'static [&'static str],
    audio_codecs: &'static [&'static str],
    default_video: &'static str,
    default_audio: &'static str,
}

const FORMAT_RULES: &[FormatRule] = &[
    FormatRule {
        format: "mp4",
        video_codecs: &["h264", "h265", "av1", "copy"],
        audio_codecs: &["aac", "mp3", "copy"],
        default_video: "h264",
        default_audio: "aac",
    },
    FormatRule {
        format: "mkv",
        video_codecs: &["h264", "h265", "vp9", "av1", "copy"],
        audio_codecs: &["aac", "mp3", "opus", "flac", "vorbis", "copy"],
        default_video: "h264",
        default_audio: "aac",
    },
    FormatRule {
        format: "mov",
        video_codecs: &["h264", "h265", "copy"],
        audio_codecs: &["aac", "copy"],
        default_video: "h264",
        default_audio: "aac",
    },
    FormatRule {
        format: "webm",
        video_codecs: &["vp8", "vp9", "av1", "copy"],
        audio_codecs: &["opus", "vorbis", "copy"],
        default_video: "vp9",
        default_audio: "opus",
    },
    FormatRule {
        format: "avi",
        video_codecs: &["h264", "mpeg4", "copy"],
        audio_codecs: &["mp3", "aac", "copy"],
        default_video: "h264",
        default_audio: "mp3",
    },
];

/// Audio-only target containers and their codec
const AUDIO_FORMAT_RULES: &[(&str, &str)] = &[
    ("mp3", "mp3"),
    ("m4a", "aac"),
    ("aac", "aac"),
    ("flac", "flac"),
    ("wav", "pcm_s16le"),
    ("ogg", "vorbis"),
    ("opus", "opus"),
];

/// Containers that support pass-through remuxing with `-c copy`
pub const STREAM_COPY_FORMATS: &[&str] = &["mp4", "mkv", "mov", "webm", "avi"];

/// Auto bitrate tiers by vertical resolution: (max_height, video kbits/s)
const BITRATE_TIERS: &[(u32, u32)] = &[
    (480, 1200),
    (720, 2500),
    (1080, 5000),
    (1440, 10_000),
    (u32::MAX, 16_000),
];

/// Auto video bitrate for a given output height.
pub fn auto_video_bitrate_kbps(height: u32) -> u32 {
    BITRATE_TIERS
        .iter()
        .find(|(max_height, _)| height <= *max_height)
        .map(|(_, kbps)| *kbps)
        .unwrap_or(16_000)
}

/// Parse a "WIDTHxHEIGHT" resolution string.
pub fn parse_resolution(resolution: &str) -> CoreResult<(u32, u32)> {
    // Compiled per call; validation is not on a hot path.
    let re = regex::Regex::new(r"^(\d{2,5})x(\d{2,5})$")
        .map_err(|e| CoreError::Internal(e.to_string()))?;

    let captures = re.captures(resolution.trim()).ok_or_else(|| {
        CoreError::Validation(format!(
            "Invalid resolution '{resolution}'; expected WIDTHxHEIGHT, e.g. 1920x1080"
        ))
    })?;

    let width: u32 = captures[1]
        .parse()
        .map_err(|_| CoreError::Validation(format!("Invalid width in '{resolution}'")))?;
    let height: u32 = captures[2]
        .parse()
        .map_err(|_| CoreError::Validation(format!("Invalid height in '{resolution}'")))?;

    if width == 0 || height == 0 {
        return Err(CoreError::Validation(format!(
            "Resolution dimensions must be non-zero: '{resolution}'"
        )));
    }

    Ok((width, height))
}

/// Validate and normalize transcode options.
///
/// Unknown containers fall back to mp4 and disallowed codecs are replaced
/// with the container's default; every such correction is recorded in
/// [`ValidatedOptions::adjustments`]. Only structurally invalid input
/// (malformed resolution, non-positive fps) is a hard error.
pub fn validate(options: &TranscodeOptions) -> CoreResult<ValidatedOptions> {
    let mut options = options.clone();
    let mut adjustments = Vec::new();

    let format = options.output_format.trim().to_lowercase();

    // Audio-only targets short-circuit the video rules entirely.
    if let Some((_, audio_codec)) = AUDIO_FORMAT_RULES
        .iter()
        .find(|(fmt, _)| *fmt == format.as_str())
    {
        if let Some(requested) = &options.video_codec {
            adjustments.push(format!(
                "video codec '{requested}' dropped for audio-only format '{format}'"
            ));
        }
        options.output_format = format;
        options.video_codec = None;
        options.resolution = None;
        options.fps = None;
        options.video_bitrate_kbps = None;

        match &options.audio_codec {
            Some(requested) if requested != audio_codec && requested != "copy" => {
                adjustments.push(format!(
                    "audio codec '{requested}' not supported by '{}'; using '{audio_codec}'",
                    options.output_format
                ));
                options.audio_codec = Some(audio_codec.to_string());
            }
            None => options.audio_codec = Some(audio_codec.to_string()),
            _ => {}
        }

        return Ok(ValidatedOptions {
            options,
            stream_copy: false,
            audio_only: true,
            adjustments,
        });
    }

    // Container normalization
    let rule = match FORMAT_RULES.iter().find(|r| r.format == format.as_str()) {
        Some(rule) => {
            options.output_format = format;
            rule
        }
        None => {
            if !format.is_empty() {
                adjustments.push(format!("unknown format '{format}'; using 'mp4'"));
            }
            options.output_format = "mp4".to_string();
            FORMAT_RULES
                .iter()
                .find(|r| r.format == "mp4")
                .ok_or_else(|| CoreError::Internal("mp4 rule missing".to_string()))?
        }
    };

    // No codec/bitrate/resolution/fps override on a remuxable container is
    // a pure container change; pass the streams through instead of burning
    // cycles re-encoding them. A hardware accel request implies re-encode.
    let no_overrides = options.video_codec.is_none()
        && options.audio_codec.is_none()
        && options.video_bitrate_kbps.is_none()
        && options.audio_bitrate_kbps.is_none()
        && options.resolution.is_none()
        && options.fps.is_none()
        && options.hardware_accel == HardwareAccel::None;

    if no_overrides && STREAM_COPY_FORMATS.contains(&options.output_format.as_str()) {
        options.video_codec = Some("copy".to_string());
        options.audio_codec = Some("copy".to_string());
        return Ok(ValidatedOptions {
            options,
            stream_copy: true,
            audio_only: false,
            adjustments,
        });
    }

    // Video codec normalization
    match &options.video_codec {
        Some(codec) => {
            let codec = codec.trim().to_lowercase();
            if rule.video_codecs.contains(&codec.as_str()) {
                options.video_codec = Some(codec);
            } else {
                adjustments.push(format!(
                    "video codec '{codec}' not supported by '{}'; using '{}'",
                    rule.format, rule.default_video
                ));
                options.video_codec = Some(rule.default_video.to_string());
            }
        }
        None => options.video_codec = Some(rule.default_video.to_string()),
    }

    // Audio codec normalization
    match &options.audio_codec {
        Some(codec) => {
            let codec = codec.trim().to_lowercase();
            if rule.audio_codecs.contains(&codec.as_str()) {
                options.audio_codec = Some(codec);
            } else {
                adjustments.push(format!(
                    "audio codec '{codec}' not supported by '{}'; using '{}'",
                    rule.format, rule.default_audio
                ));
                options.audio_codec = Some(rule.default_audio.to_string());
            }
        }
        None => options.audio_codec = Some(rule.default_audio.to_string()),
    }

    // Structural checks
    if let Some(resolution) = &options.resolution {
        parse_resolution(resolution)?;
    }
    if let Some(fps) = options.fps {
        if !fps.is_finite() || fps <= 0.0 {
            return Err(CoreError::Validation(format!(
                "Frame rate must be positive: {fps}"
            )));
        }
    }

    let stream_copy = options.video_codec.as_deref() == Some("copy")
        && options.audio_codec.as_deref() == Some("copy")
        && STREAM_COPY_FORMATS.contains(&options.output_format.as_str());

    if stream_copy {
        // Filters are incompatible with -c copy.
        if options.resolution.take().is_some() {
            adjustments.push("resolution ignored for stream copy".to_string());
        }
        if options.fps.take().is_some() {
            adjustments.push("fps ignored for stream copy".to_string());
        }
        if options.video_bitrate_kbps.take().is_some() {
            adjustments.push("video bitrate ignored for stream copy".to_string());
        }
    }

    Ok(ValidatedOptions {
        options,
        stream_copy,
        audio_only: false,
        adjustments,
    })
}
