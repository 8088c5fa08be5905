//! Encoder Detection Module
//!
//! Handles detection and validation of the ffmpeg/ffprobe binaries.
//! Resolution order: configured paths, common install locations, then `PATH`.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::core::config::OrchestratorConfig;

use super::{FfmpegError, FfmpegResult};

/// Resolved encoder binary locations
#[derive(Debug, Clone)]
pub struct EncoderPaths {
    /// Path to ffmpeg binary
    pub ffmpeg_path: PathBuf,
    /// Path to ffprobe binary
    pub ffprobe_path: PathBuf,
    /// FFmpeg version string
    pub version: String,
}

/// Resolve encoder binaries for this configuration.
///
/// Configured paths win when they exist; otherwise common install locations
/// are checked, then the `PATH` environment variable. The version is read
/// once so callers can report it without re-running the binary.
pub fn detect_encoder(config: &OrchestratorConfig) -> FfmpegResult<EncoderPaths> {
    let ffmpeg_path = match &config.ffmpeg_path {
        Some(path) if path.exists() => path.clone(),
        Some(path) => {
            return Err(FfmpegError::InvalidInput(format!(
                "Configured ffmpeg path does not exist: {}",
                path.display()
            )))
        }
        None => which_binary("ffmpeg")?,
    };

    let ffprobe_path = match &config.ffprobe_path {
        Some(path) if path.exists() => path.clone(),
        Some(path) => {
            return Err(FfmpegError::InvalidInput(format!(
                "Configured ffprobe path does not exist: {}",
                path.display()
            )))
        }
        // ffprobe usually lives next to ffmpeg
        None => sibling_ffprobe(&ffmpeg_path).map_or_else(|| which_binary("ffprobe"), Ok)?,
    };

    let version = get_encoder_version(&ffmpeg_path)?;

    Ok(EncoderPaths {
        ffmpeg_path,
        ffprobe_path,
        version,
    })
}

fn sibling_ffprobe(ffmpeg_path: &Path) -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    let name = "ffprobe.exe";
    #[cfg(not(target_os = "windows"))]
    let name = "ffprobe";

    let candidate = ffmpeg_path.parent()?.join(name);
    candidate.exists().then_some(candidate)
}

/// Find a binary in common locations or the system PATH
fn which_binary(base_name: &str) -> FfmpegResult<PathBuf> {
    #[cfg(target_os = "windows")]
    let binary_name = format!("{base_name}.exe");

    #[cfg(not(target_os = "windows"))]
    let binary_name = base_name.to_string();

    // Try common locations first
    for path in get_common_install_paths() {
        let candidate = path.join(&binary_name);
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    // Fall back to PATH search using `where` (Windows) or `which` (Unix)
    #[cfg(target_os = "windows")]
    let lookup = "where";
    #[cfg(not(target_os = "windows"))]
    let lookup = "which";

    let output = Command::new(lookup)
        .arg(base_name)
        .output()
        .map_err(|_| FfmpegError::NotFound)?;

    if output.status.success() {
        let path_str = String::from_utf8_lossy(&output.stdout);
        if let Some(first_line) = path_str.lines().next() {
            return Ok(PathBuf::from(first_line.trim()));
        }
    }

    Err(FfmpegError::NotFound)
}

/// Get common FFmpeg installation paths for the current platform
fn get_common_install_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    #[cfg(target_os = "windows")]
    {
        paths.push(PathBuf::from(r"C:\ffmpeg\bin"));
        paths.push(PathBuf::from(r"C:\Program Files\ffmpeg\bin"));
        paths.push(PathBuf::from(r"C:\Program Files (x86)\ffmpeg\bin"));

        // Chocolatey installation
        if let Ok(programdata) = std::env::var("ProgramData") {
            paths.push(PathBuf::from(programdata).join("chocolatey").join("bin"));
        }

        // Scoop installation
        if let Ok(userprofile) = std::env::var("USERPROFILE") {
            paths.push(PathBuf::from(userprofile).join("scoop").join("shims"));
        }
    }

    #[cfg(target_os = "macos")]
    {
        // Homebrew paths
        paths.push(PathBuf::from("/opt/homebrew/bin"));
        paths.push(PathBuf::from("/usr/local/bin"));
        paths.push(PathBuf::from("/opt/local/bin")); // MacPorts
    }

    #[cfg(target_os = "linux")]
    {
        paths.push(PathBuf::from("/usr/bin"));
        paths.push(PathBuf::from("/usr/local/bin"));
        paths.push(PathBuf::from("/snap/bin"));
    }

    paths
}

/// Get FFmpeg version string
fn get_encoder_version(ffmpeg_path: &Path) -> FfmpegResult<String> {
    let output = Command::new(ffmpeg_path)
        .arg("-version")
        .output()
        .map_err(FfmpegError::ProcessError)?;

    if !output.status.success() {
        return Err(FfmpegError::ExecutionFailed(
            "Failed to get FFmpeg version".to_string(),
        ));
    }

    let output_str = String::from_utf8_lossy(&output.stdout);

    // Parse version from first line: "ffmpeg version X.X.X ..."
    if let Some(first_line) = output_str.lines().next() {
        if let Some(version_part) = first_line.strip_prefix("ffmpeg version ") {
            if let Some(version) = version_part.split_whitespace().next() {
                return Ok(version.to_string());
            }
        }
        // Return the whole first line if parsing fails
        return Ok(first_line.to_string());
    }

    Err(FfmpegError::ParseError(
        "Could not parse FFmpeg version".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_paths_not_empty() {
        let paths = get_common_install_paths();
        assert!(!paths.is_empty());
    }

    #[test]
    fn test_configured_missing_path_is_rejected() {
        let config = OrchestratorConfig {
            ffmpeg_path: Some(PathBuf::from("/definitely/not/here/ffmpeg")),
            ..Default::default()
        };
        match detect_encoder(&config) {
            Err(FfmpegError::InvalidInput(msg)) => assert!(msg.contains("not/here")),
            other => panic!("expected InvalidInput, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_detect_with_fake_binaries() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().unwrap();
        let ffmpeg = dir.path().join("ffmpeg");
        let ffprobe = dir.path().join("ffprobe");
        std::fs::write(
            &ffmpeg,
            "#!/bin/sh\necho 'ffmpeg version 7.1 Copyright (c) tests'\n",
        )
        .unwrap();
        std::fs::write(&ffprobe, "#!/bin/sh\nexit 0\n").unwrap();
        for path in [&ffmpeg, &ffprobe] {
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let config = OrchestratorConfig {
            ffmpeg_path: Some(ffmpeg),
            ..Default::default()
        };
        let paths = detect_encoder(&config).unwrap();
        assert_eq!(paths.version, "7.1");
        // ffprobe picked up as a sibling of the configured ffmpeg
        assert_eq!(paths.ffprobe_path, ffprobe);
    }
}
