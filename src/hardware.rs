//! Vendor detection and encoder capability probing. Grounded on
//! `hardware.rs`/`system/hardware.rs` device-node sniffing and an
//! `ffmpeg.rs` `-hwaccels`/`-encoders` parsing pattern (§11 "Hardware
//! accelerator and encoder detection").

use std::collections::HashSet;
use std::path::Path;

use tracing::{info, warn};

use crate::error::{OrchestratorError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vendor {
    Nvidia,
    Amd,
    Intel,
    Apple,
    Cpu,
}

impl std::fmt::Display for Vendor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Vendor::Nvidia => write!(f, "NVIDIA (NVENC)"),
            Vendor::Amd => write!(f, "AMD (VAAPI/AMF)"),
            Vendor::Intel => write!(f, "Intel (QSV)"),
            Vendor::Apple => write!(f, "Apple (VideoToolbox)"),
            Vendor::Cpu => write!(f, "CPU (software encoding)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HardwareInfo {
    pub vendor: Vendor,
    pub device_path: Option<String>,
}

/// Walks device nodes in priority order: macOS short-circuits to
/// Apple, then `/dev/nvidiactl`, then the DRI render nodes, disambiguating
/// Intel vs AMD via the sysfs vendor id. Falls back to CPU only when the
/// caller allows it.
pub fn detect_hardware(allow_cpu_fallback: bool) -> Result<HardwareInfo> {
    info!(os = std::env::consts::OS, arch = std::env::consts::ARCH, "hardware detection starting");

    if cfg!(target_os = "macos") {
        info!("detected macOS platform, using VideoToolbox");
        return Ok(HardwareInfo { vendor: Vendor::Apple, device_path: None });
    }

    if Path::new("/dev/nvidiactl").exists() || std::process::Command::new("nvidia-smi").output().is_ok() {
        info!("detected NVIDIA GPU, using NVENC");
        return Ok(HardwareInfo { vendor: Vendor::Nvidia, device_path: None });
    }

    if Path::new("/dev/dri/renderD129").exists() {
        info!("detected Intel dGPU at renderD129, using QSV");
        return Ok(HardwareInfo {
            vendor: Vendor::Intel,
            device_path: Some("/dev/dri/renderD129".to_string()),
        });
    }

    if Path::new("/dev/dri/renderD128").exists() {
        let vendor_id = std::fs::read_to_string("/sys/class/drm/renderD128/device/vendor")
            .unwrap_or_default()
            .trim()
            .to_lowercase();

        if vendor_id.contains("0x8086") {
            info!("detected Intel iGPU at renderD128, using QSV");
            return Ok(HardwareInfo {
                vendor: Vendor::Intel,
                device_path: Some("/dev/dri/renderD128".to_string()),
            });
        } else if vendor_id.contains("0x1002") {
            info!("detected AMD GPU at renderD128, using VAAPI/AMF");
            return Ok(HardwareInfo {
                vendor: Vendor::Amd,
                device_path: Some("/dev/dri/renderD128".to_string()),
            });
        }

        // Neither id matched; the node still exists, so fall back to the
        // vendor whose encoder module actually drives generic VAAPI
        // (`Vendor::Intel` would route to Intel-specific QSV args instead).
        warn!(vendor_id = %vendor_id, "render node present but vendor unverified, assuming VAAPI");
        return Ok(HardwareInfo {
            vendor: Vendor::Amd,
            device_path: Some("/dev/dri/renderD128".to_string()),
        });
    }

    if !allow_cpu_fallback {
        return Err(OrchestratorError::Hardware(
            "no supported hardware accelerator found and CPU fallback is disabled".into(),
        ));
    }

    warn!("no GPU detected, falling back to CPU encoding (libsvtav1/libx264)");
    Ok(HardwareInfo { vendor: Vendor::Cpu, device_path: None })
}

#[derive(Debug, Clone, Default)]
pub struct HardwareAccelerators {
    pub available: HashSet<String>,
}

impl HardwareAccelerators {
    pub fn detect() -> Result<Self> {
        let output = std::process::Command::new("ffmpeg")
            .args(["-hide_banner", "-hwaccels"])
            .output()
            .map_err(|e| OrchestratorError::Hardware(format!("failed to run ffmpeg -hwaccels: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let available = stdout
            .lines()
            .skip(1)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();

        info!("detected hardware accelerators: {:?}", available);
        Ok(Self { available })
    }

    pub fn has(&self, accel: &str) -> bool {
        self.available.contains(accel)
    }
}

#[derive(Debug, Clone, Default)]
pub struct EncoderCapabilities {
    pub video_encoders: HashSet<String>,
    pub audio_encoders: HashSet<String>,
}

impl EncoderCapabilities {
    pub fn detect() -> Result<Self> {
        let output = std::process::Command::new("ffmpeg")
            .args(["-hide_banner", "-encoders"])
            .output()
            .map_err(|e| OrchestratorError::Hardware(format!("failed to run ffmpeg -encoders: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut video_encoders = HashSet::new();
        let mut audio_encoders = HashSet::new();

        for line in stdout.lines() {
            let line = line.trim();
            if line.len() < 8 {
                continue;
            }
            let flags = &line[..6];
            let rest = line[6..].trim();
            let name = rest.split_whitespace().next().unwrap_or("");
            if flags.starts_with(" V") {
                video_encoders.insert(name.to_string());
            } else if flags.starts_with(" A") {
                audio_encoders.insert(name.to_string());
            }
        }

        Ok(Self { video_encoders, audio_encoders })
    }

    pub fn has_video_encoder(&self, name: &str) -> bool {
        self.video_encoders.contains(name)
    }

    pub fn has_audio_encoder(&self, name: &str) -> bool {
        self.audio_encoders.contains(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoder_capabilities_reports_detected_names() {
        let mut caps = EncoderCapabilities::default();
        caps.video_encoders.insert("libsvtav1".to_string());
        caps.audio_encoders.insert("aac".to_string());
        assert!(caps.has_video_encoder("libsvtav1"));
        assert!(!caps.has_video_encoder("hevc_nvenc"));
        assert!(caps.has_audio_encoder("aac"));
    }
}
