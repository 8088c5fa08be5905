//! Hardware Acceleration Module
//!
//! Maps acceleration families to concrete ffmpeg encoder names and verifies,
//! before a job starts, that the requested family is actually usable on this
//! machine. Verification asks the encoder binary for its compiled-in encoder
//! list rather than trusting the name of the GPU; a driverless card or a
//! build without the encoder both fail the same way.
//!
//! A separate signature table classifies runtime failures: when a running
//! encode dies with a message that matches a known hardware failure pattern,
//! the orchestrator retries the job once in software.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::ffmpeg::EncoderPaths;

/// Hardware acceleration family
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HardwareAccel {
    /// Software encoding (libx264 and friends)
    #[default]
    None,
    /// NVIDIA NVENC
    Nvenc,
    /// Intel Quick Sync Video
    Qsv,
    /// AMD AMF
    Amf,
    /// Apple VideoToolbox
    #[serde(rename = "videotoolbox")]
    VideoToolbox,
    /// VA-API (Linux)
    Vaapi,
}

impl std::fmt::Display for HardwareAccel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            HardwareAccel::None => "none",
            HardwareAccel::Nvenc => "nvenc",
            HardwareAccel::Qsv => "qsv",
            HardwareAccel::Amf => "amf",
            HardwareAccel::VideoToolbox => "videotoolbox",
            HardwareAccel::Vaapi => "vaapi",
        };
        write!(f, "{name}")
    }
}

impl HardwareAccel {
    /// Whether this family uses a hardware device
    pub fn is_hardware(&self) -> bool {
        !matches!(self, HardwareAccel::None)
    }

    /// The ffmpeg encoder name for a codec family, or `None` when this
    /// acceleration family cannot encode that codec.
    pub fn encoder_for(&self, codec: &str) -> Option<&'static str> {
        match (self, codec) {
            (HardwareAccel::None, "h264") => Some("libx264"),
            (HardwareAccel::None, "h265") => Some("libx265"),
            (HardwareAccel::None, "av1") => Some("libaom-av1"),
            (HardwareAccel::None, "vp8") => Some("libvpx"),
            (HardwareAccel::None, "vp9") => Some("libvpx-vp9"),
            (HardwareAccel::None, "mpeg4") => Some("mpeg4"),

            (HardwareAccel::Nvenc, "h264") => Some("h264_nvenc"),
            (HardwareAccel::Nvenc, "h265") => Some("hevc_nvenc"),
            (HardwareAccel::Nvenc, "av1") => Some("av1_nvenc"),

            (HardwareAccel::Qsv, "h264") => Some("h264_qsv"),
            (HardwareAccel::Qsv, "h265") => Some("hevc_qsv"),
            (HardwareAccel::Qsv, "av1") => Some("av1_qsv"),
            (HardwareAccel::Qsv, "vp9") => Some("vp9_qsv"),

            (HardwareAccel::Amf, "h264") => Some("h264_amf"),
            (HardwareAccel::Amf, "h265") => Some("hevc_amf"),
            (HardwareAccel::Amf, "av1") => Some("av1_amf"),

            (HardwareAccel::VideoToolbox, "h264") => Some("h264_videotoolbox"),
            (HardwareAccel::VideoToolbox, "h265") => Some("hevc_videotoolbox"),

            (HardwareAccel::Vaapi, "h264") => Some("h264_vaapi"),
            (HardwareAccel::Vaapi, "h265") => Some("hevc_vaapi"),
            (HardwareAccel::Vaapi, "vp9") => Some("vp9_vaapi"),
            (HardwareAccel::Vaapi, "av1") => Some("av1_vaapi"),

            _ => None,
        }
    }
}

/// One selectable acceleration option, for enumeration in UIs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HardwareOption {
    pub id: HardwareAccel,
    pub vendor_family: String,
    pub description: String,
}

/// The acceleration catalog, software first.
pub fn list_hardware_options() -> Vec<HardwareOption> {
    let option = |id, vendor: &str, description: &str| HardwareOption {
        id,
        vendor_family: vendor.to_string(),
        description: description.to_string(),
    };
    vec![
        option(HardwareAccel::None, "Software", "CPU encoding, always available"),
        option(HardwareAccel::Nvenc, "NVIDIA", "NVENC GPU encoding"),
        option(HardwareAccel::Qsv, "Intel", "Quick Sync Video"),
        option(HardwareAccel::Amf, "AMD", "Advanced Media Framework"),
        option(
            HardwareAccel::VideoToolbox,
            "Apple",
            "VideoToolbox hardware encoding",
        ),
        option(HardwareAccel::Vaapi, "Linux", "Video Acceleration API (VA-API)"),
    ]
}

/// Result of a pre-flight hardware check
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HwValidation {
    /// Whether the requested family can be used for this codec
    pub is_valid: bool,
    /// The concrete encoder name that would be used
    pub encoder_name: Option<String>,
    /// Reason when invalid
    pub error: Option<String>,
    /// How long the check took
    pub elapsed_ms: u64,
}

/// Source of the encoder capability listing. The production implementation
/// shells out to `ffmpeg -encoders`; tests substitute canned output.
#[async_trait]
pub trait EncoderCapabilityProbe: Send + Sync {
    async fn list_encoders(&self) -> Result<String, String>;
}

/// Probes capabilities by running the real encoder binary.
pub struct FfmpegCapabilityProbe {
    ffmpeg_path: std::path::PathBuf,
}

impl FfmpegCapabilityProbe {
    pub fn new(paths: &EncoderPaths) -> Self {
        Self {
            ffmpeg_path: paths.ffmpeg_path.clone(),
        }
    }
}

#[async_trait]
impl EncoderCapabilityProbe for FfmpegCapabilityProbe {
    async fn list_encoders(&self) -> Result<String, String> {
        let output = tokio::process::Command::new(&self.ffmpeg_path)
            .args(["-hide_banner", "-encoders"])
            .output()
            .await
            .map_err(|e| format!("Failed to run encoder listing: {e}"))?;

        if !output.status.success() {
            return Err("Encoder listing exited with an error".to_string());
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

/// Validates hardware acceleration requests against actual encoder
/// capabilities.
pub struct HardwareEncoderValidator {
    probe: Arc<dyn EncoderCapabilityProbe>,
    timeout: Duration,
}

impl HardwareEncoderValidator {
    pub fn new(probe: Arc<dyn EncoderCapabilityProbe>, timeout: Duration) -> Self {
        Self { probe, timeout }
    }

    /// Check whether `accel` can encode `codec` on this machine.
    ///
    /// Software requests always validate (the check is for hardware
    /// availability, not codec support, which option validation covers).
    pub async fn validate(&self, accel: HardwareAccel, codec: &str) -> HwValidation {
        let started = std::time::Instant::now();

        let encoder_name = match accel.encoder_for(codec) {
            Some(name) => name.to_string(),
            None => {
                return HwValidation {
                    is_valid: false,
                    encoder_name: None,
                    error: Some(format!("{accel} cannot encode {codec}")),
                    elapsed_ms: started.elapsed().as_millis() as u64,
                }
            }
        };

        if !accel.is_hardware() {
            return HwValidation {
                is_valid: true,
                encoder_name: Some(encoder_name),
                error: None,
                elapsed_ms: started.elapsed().as_millis() as u64,
            };
        }

        let listing = tokio::time::timeout(self.timeout, self.probe.list_encoders()).await;

        let result = match listing {
            Ok(Ok(listing)) if listing.contains(&encoder_name) => HwValidation {
                is_valid: true,
                encoder_name: Some(encoder_name.clone()),
                error: None,
                elapsed_ms: started.elapsed().as_millis() as u64,
            },
            Ok(Ok(_)) => HwValidation {
                is_valid: false,
                encoder_name: Some(encoder_name.clone()),
                error: Some(format!(
                    "Encoder '{encoder_name}' is not available in this FFmpeg build"
                )),
                elapsed_ms: started.elapsed().as_millis() as u64,
            },
            Ok(Err(e)) => HwValidation {
                is_valid: false,
                encoder_name: Some(encoder_name.clone()),
                error: Some(e),
                elapsed_ms: started.elapsed().as_millis() as u64,
            },
            Err(_) => HwValidation {
                is_valid: false,
                encoder_name: Some(encoder_name.clone()),
                error: Some("Hardware capability check timed out".to_string()),
                elapsed_ms: started.elapsed().as_millis() as u64,
            },
        };

        if result.is_valid {
            debug!(accel = %accel, encoder = %encoder_name, "hardware encoder validated");
        } else {
            warn!(
                accel = %accel,
                encoder = %encoder_name,
                error = result.error.as_deref().unwrap_or("unknown"),
                "hardware encoder unavailable"
            );
        }

        result
    }
}

/// Runtime stderr signatures that indicate a hardware encoder failure.
/// Matched case-insensitively as substrings.
const HARDWARE_FAILURE_SIGNATURES: &[&str] = &[
    "cannot load nvcuda",
    "cannot load libcuda",
    "no capable devices found",
    "no nvenc capable devices",
    "failed to create nvenc",
    "openencodesessionex failed",
    "device creation failed",
    "failed to initialise vaapi",
    "failed to create a vaapi device",
    "error creating a qsv device",
    "mfx session",
    "amf failed to initialise",
    "failed to create amf context",
    "videotoolbox session",
    "hardware does not support",
    "driver does not support",
    "unknown encoder 'h264_nvenc'",
    "unknown encoder 'hevc_nvenc'",
    "unknown encoder 'h264_qsv'",
    "unknown encoder 'h264_amf'",
    "unknown encoder 'h264_vaapi'",
    "unknown encoder 'h264_videotoolbox'",
];

/// Whether an encoder error message indicates a hardware failure that
/// software fallback could recover from.
pub fn is_hardware_failure(message: &str) -> bool {
    let lower = message.to_lowercase();
    HARDWARE_FAILURE_SIGNATURES
        .iter()
        .any(|sig| lower.contains(sig))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticProbe(Result<String, String>);

    #[async_trait]
    impl EncoderCapabilityProbe for StaticProbe {
        async fn list_encoders(&self) -> Result<String, String> {
            self.0.clone()
        }
    }

    fn validator(probe: StaticProbe) -> HardwareEncoderValidator {
        HardwareEncoderValidator::new(Arc::new(probe), Duration::from_secs(1))
    }

    #[test]
    fn test_encoder_names() {
        assert_eq!(HardwareAccel::Nvenc.encoder_for("h264"), Some("h264_nvenc"));
        assert_eq!(HardwareAccel::None.encoder_for("h265"), Some("libx265"));
        assert_eq!(HardwareAccel::VideoToolbox.encoder_for("av1"), None);
        assert_eq!(HardwareAccel::Nvenc.encoder_for("vp9"), None);
    }

    #[test]
    fn test_hardware_catalog_shape() {
        let catalog = list_hardware_options();
        assert_eq!(catalog[0].id, HardwareAccel::None);
        assert!(catalog
            .iter()
            .any(|o| o.id == HardwareAccel::Nvenc && o.vendor_family == "NVIDIA"));

        let json = serde_json::to_value(&catalog).unwrap();
        assert_eq!(json[0]["id"], "none");
        assert!(json[0]["vendorFamily"].is_string());
        assert!(json[0]["description"].is_string());
    }

    #[test]
    fn test_serde_names_are_lowercase() {
        let json = serde_json::to_string(&HardwareAccel::VideoToolbox).unwrap();
        assert_eq!(json, "\"videotoolbox\"");
        let accel: HardwareAccel = serde_json::from_str("\"nvenc\"").unwrap();
        assert_eq!(accel, HardwareAccel::Nvenc);
    }

    #[tokio::test]
    async fn test_software_always_validates() {
        let validator = validator(StaticProbe(Err("probe should not run".to_string())));
        let result = validator.validate(HardwareAccel::None, "h264").await;
        assert!(result.is_valid);
        assert_eq!(result.encoder_name.as_deref(), Some("libx264"));
    }

    #[tokio::test]
    async fn test_hardware_validates_when_listed() {
        let validator = validator(StaticProbe(Ok(
            " V....D h264_nvenc  NVIDIA NVENC H.264 encoder".to_string(),
        )));
        let result = validator.validate(HardwareAccel::Nvenc, "h264").await;
        assert!(result.is_valid);
    }

    #[tokio::test]
    async fn test_hardware_invalid_when_missing_from_listing() {
        let validator = validator(StaticProbe(Ok(
            " V..... libx264  H.264 / AVC encoder".to_string()
        )));
        let result = validator.validate(HardwareAccel::Nvenc, "h264").await;
        assert!(!result.is_valid);
        assert!(result.error.as_deref().unwrap_or("").contains("h264_nvenc"));
    }

    #[tokio::test]
    async fn test_unsupported_codec_is_invalid() {
        let validator = validator(StaticProbe(Ok(String::new())));
        let result = validator.validate(HardwareAccel::Nvenc, "vp9").await;
        assert!(!result.is_valid);
        assert!(result.encoder_name.is_none());
    }

    #[test]
    fn test_hardware_failure_signatures() {
        assert!(is_hardware_failure(
            "Cannot load nvcuda.dll, NVENC unavailable"
        ));
        assert!(is_hardware_failure(
            "OpenEncodeSessionEx failed: out of memory"
        ));
        assert!(is_hardware_failure("Failed to initialise VAAPI connection"));
        assert!(!is_hardware_failure("No such file or directory"));
        assert!(!is_hardware_failure("Invalid data found when processing input"));
    }
}
