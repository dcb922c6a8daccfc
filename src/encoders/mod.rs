//! Encoder selection and per-vendor argument construction (§11 "Hardware
//! accelerator / encoder capability detection"). Grounded on an
//! `media/ffmpeg/mod.rs` `FFmpegCommandBuilder::select_encoder`/
//! `push_av1_candidates`/`push_hevc_candidates`/`push_h264_candidates`
//! cascade and its per-vendor `qsv`/`nvenc`/`vaapi`/`amf`/`videotoolbox`/
//! `cpu` submodules, generalized from a two-codec
//! `OutputCodec::{Av1,Hevc}` shape to this orchestrator's three-codec
//! `TargetCodec` (the "already at target codec" skip check, §4.9.1 step 7,
//! needs H.264 as a concrete third option).

mod amf;
mod cpu;
mod nvenc;
mod qsv;
mod vaapi;
mod videotoolbox;

use crate::config::TargetCodec;
use crate::hardware::{EncoderCapabilities, HardwareInfo, Vendor};
use crate::model::{Metadata, QualityDecision};

const TONEMAP_PEAK: f32 = 100.0;
const TONEMAP_DESAT: f32 = 0.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoder {
    Av1Qsv,
    Av1Nvenc,
    Av1Vaapi,
    Av1Videotoolbox,
    Av1Amf,
    Av1Svt,
    Av1Aom,
    HevcQsv,
    HevcNvenc,
    HevcVaapi,
    HevcVideotoolbox,
    HevcAmf,
    HevcX265,
    H264Qsv,
    H264Nvenc,
    H264Vaapi,
    H264Videotoolbox,
    H264Amf,
    H264X264,
}

impl Encoder {
    pub fn name(&self) -> &'static str {
        match self {
            Encoder::Av1Qsv => "av1_qsv",
            Encoder::Av1Nvenc => "av1_nvenc",
            Encoder::Av1Vaapi => "av1_vaapi",
            Encoder::Av1Videotoolbox => "av1_videotoolbox",
            Encoder::Av1Amf => "av1_amf",
            Encoder::Av1Svt => "libsvtav1",
            Encoder::Av1Aom => "libaom-av1",
            Encoder::HevcQsv => "hevc_qsv",
            Encoder::HevcNvenc => "hevc_nvenc",
            Encoder::HevcVaapi => "hevc_vaapi",
            Encoder::HevcVideotoolbox => "hevc_videotoolbox",
            Encoder::HevcAmf => "hevc_amf",
            Encoder::HevcX265 => "libx265",
            Encoder::H264Qsv => "h264_qsv",
            Encoder::H264Nvenc => "h264_nvenc",
            Encoder::H264Vaapi => "h264_vaapi",
            Encoder::H264Videotoolbox => "h264_videotoolbox",
            Encoder::H264Amf => "h264_amf",
            Encoder::H264X264 => "libx264",
        }
    }
}

struct Candidate {
    encoder: Encoder,
    effective_codec: TargetCodec,
    available: bool,
    reason: &'static str,
}

pub struct EncoderSelection {
    pub encoder: Encoder,
    pub requested_codec: TargetCodec,
    pub effective_codec: TargetCodec,
    pub reason: &'static str,
}

/// Walks the candidate cascade for `target`, falling through to the next
/// codec down when `allow_fallback` is set and nothing in the preferred
/// tier is available (§4.5, §4.9 step 10 "CPU fallback").
pub fn select_encoder(
    target: TargetCodec,
    vendor: Option<Vendor>,
    caps: &EncoderCapabilities,
    allow_fallback: bool,
) -> Option<EncoderSelection> {
    let mut candidates: Vec<Candidate> = Vec::new();
    match target {
        TargetCodec::Av1 => {
            push_av1_candidates(&mut candidates, vendor, caps);
            if allow_fallback {
                push_hevc_candidates(&mut candidates, vendor, caps, "AV1 encoders unavailable");
                push_h264_candidates(&mut candidates, vendor, caps, "HEVC encoders unavailable");
            }
        }
        TargetCodec::Hevc => {
            push_hevc_candidates(&mut candidates, vendor, caps, "preferred HEVC");
            if allow_fallback {
                push_h264_candidates(&mut candidates, vendor, caps, "HEVC encoders unavailable");
            }
        }
        TargetCodec::H264 => {
            push_h264_candidates(&mut candidates, vendor, caps, "preferred H.264");
            if allow_fallback {
                push_hevc_candidates(&mut candidates, vendor, caps, "H.264 encoders unavailable");
            }
        }
    }

    candidates.into_iter().find(|c| c.available).map(|c| EncoderSelection {
        encoder: c.encoder,
        requested_codec: target,
        effective_codec: c.effective_codec,
        reason: c.reason,
    })
}

fn push_av1_candidates(out: &mut Vec<Candidate>, vendor: Option<Vendor>, caps: &EncoderCapabilities) {
    match vendor {
        Some(Vendor::Apple) => out.push(Candidate {
            encoder: Encoder::Av1Videotoolbox,
            effective_codec: TargetCodec::Av1,
            available: caps.has_video_encoder("av1_videotoolbox"),
            reason: "hardware AV1 (VideoToolbox)",
        }),
        Some(Vendor::Intel) => out.push(Candidate {
            encoder: Encoder::Av1Qsv,
            effective_codec: TargetCodec::Av1,
            available: caps.has_video_encoder("av1_qsv"),
            reason: "hardware AV1 (QSV)",
        }),
        Some(Vendor::Nvidia) => out.push(Candidate {
            encoder: Encoder::Av1Nvenc,
            effective_codec: TargetCodec::Av1,
            available: caps.has_video_encoder("av1_nvenc"),
            reason: "hardware AV1 (NVENC)",
        }),
        Some(Vendor::Amd) => {
            let (encoder, name) =
                if cfg!(target_os = "windows") { (Encoder::Av1Amf, "av1_amf") } else { (Encoder::Av1Vaapi, "av1_vaapi") };
            out.push(Candidate {
                encoder,
                effective_codec: TargetCodec::Av1,
                available: caps.has_video_encoder(name),
                reason: "hardware AV1 (AMF/VAAPI)",
            });
        }
        _ => {}
    }
    out.push(Candidate {
        encoder: Encoder::Av1Svt,
        effective_codec: TargetCodec::Av1,
        available: caps.has_video_encoder("libsvtav1"),
        reason: "CPU AV1 (SVT-AV1)",
    });
    out.push(Candidate {
        encoder: Encoder::Av1Aom,
        effective_codec: TargetCodec::Av1,
        available: caps.has_video_encoder("libaom-av1"),
        reason: "CPU AV1 (libaom)",
    });
}

fn push_hevc_candidates(out: &mut Vec<Candidate>, vendor: Option<Vendor>, caps: &EncoderCapabilities, reason: &'static str) {
    match vendor {
        Some(Vendor::Apple) => out.push(Candidate {
            encoder: Encoder::HevcVideotoolbox,
            effective_codec: TargetCodec::Hevc,
            available: caps.has_video_encoder("hevc_videotoolbox"),
            reason,
        }),
        Some(Vendor::Intel) => out.push(Candidate {
            encoder: Encoder::HevcQsv,
            effective_codec: TargetCodec::Hevc,
            available: caps.has_video_encoder("hevc_qsv"),
            reason,
        }),
        Some(Vendor::Nvidia) => out.push(Candidate {
            encoder: Encoder::HevcNvenc,
            effective_codec: TargetCodec::Hevc,
            available: caps.has_video_encoder("hevc_nvenc"),
            reason,
        }),
        Some(Vendor::Amd) => {
            let (encoder, name) = if cfg!(target_os = "windows") {
                (Encoder::HevcAmf, "hevc_amf")
            } else {
                (Encoder::HevcVaapi, "hevc_vaapi")
            };
            out.push(Candidate { encoder, effective_codec: TargetCodec::Hevc, available: caps.has_video_encoder(name), reason });
        }
        _ => {}
    }
    out.push(Candidate {
        encoder: Encoder::HevcX265,
        effective_codec: TargetCodec::Hevc,
        available: caps.has_video_encoder("libx265"),
        reason,
    });
}

fn push_h264_candidates(out: &mut Vec<Candidate>, vendor: Option<Vendor>, caps: &EncoderCapabilities, reason: &'static str) {
    match vendor {
        Some(Vendor::Apple) => out.push(Candidate {
            encoder: Encoder::H264Videotoolbox,
            effective_codec: TargetCodec::H264,
            available: caps.has_video_encoder("h264_videotoolbox"),
            reason,
        }),
        Some(Vendor::Intel) => out.push(Candidate {
            encoder: Encoder::H264Qsv,
            effective_codec: TargetCodec::H264,
            available: caps.has_video_encoder("h264_qsv"),
            reason,
        }),
        Some(Vendor::Nvidia) => out.push(Candidate {
            encoder: Encoder::H264Nvenc,
            effective_codec: TargetCodec::H264,
            available: caps.has_video_encoder("h264_nvenc"),
            reason,
        }),
        Some(Vendor::Amd) => {
            let (encoder, name) = if cfg!(target_os = "windows") {
                (Encoder::H264Amf, "h264_amf")
            } else {
                (Encoder::H264Vaapi, "h264_vaapi")
            };
            out.push(Candidate { encoder, effective_codec: TargetCodec::H264, available: caps.has_video_encoder(name), reason });
        }
        _ => {}
    }
    out.push(Candidate {
        encoder: Encoder::H264X264,
        effective_codec: TargetCodec::H264,
        available: caps.has_video_encoder("libx264"),
        reason,
    });
}

/// Builds the `-c:v ...` argument block for `encoder` onto `cmd`, dispatching
/// to the matching vendor submodule (§4.5 "the mode drives concrete args").
pub fn apply_encoder(cmd: &mut tokio::process::Command, encoder: Encoder, hw_info: Option<&HardwareInfo>, quality: &QualityDecision) {
    match encoder {
        Encoder::Av1Qsv | Encoder::HevcQsv | Encoder::H264Qsv => qsv::apply(cmd, encoder, hw_info, quality),
        Encoder::Av1Nvenc | Encoder::HevcNvenc | Encoder::H264Nvenc => nvenc::apply(cmd, encoder, quality),
        Encoder::Av1Vaapi | Encoder::HevcVaapi | Encoder::H264Vaapi => vaapi::apply(cmd, encoder, hw_info),
        Encoder::Av1Amf | Encoder::HevcAmf | Encoder::H264Amf => amf::apply(cmd, encoder),
        Encoder::Av1Videotoolbox | Encoder::HevcVideotoolbox | Encoder::H264Videotoolbox => {
            videotoolbox::apply(cmd, encoder, quality)
        }
        Encoder::Av1Svt | Encoder::Av1Aom | Encoder::HevcX265 | Encoder::H264X264 => cpu::apply(cmd, encoder, quality),
    }
}

/// Applies the rotation transpose chain and, when `metadata` is PQ/HLG, the
/// HDR tonemap filter chain, grounded on an `apply_hdr_settings` pattern.
/// ffmpeg only honors the last `-vf` on a command line, so both filters —
/// when both are present — are folded into a single chain rather than two
/// competing `-vf` flags. Composes with, rather than replaces, the
/// color-space remux pre-step (§4.9.2) — that pre-step fixes a
/// reserved-sentinel color tag before probing even runs; this fires
/// afterward, once rotation is decided and real HDR transfer
/// characteristics are known.
pub fn apply_hdr_settings(cmd: &mut tokio::process::Command, metadata: &Metadata, rotation_filter: Option<&str>) {
    let hdr_filter = metadata.is_hdr().then(|| {
        format!("zscale=t=linear:npl={TONEMAP_PEAK},tonemap=tonemap=hable:desat={TONEMAP_DESAT},zscale=t=bt709:m=bt709:r=tv,format=yuv420p")
    });

    let chain: Vec<&str> = rotation_filter.into_iter().chain(hdr_filter.as_deref()).collect();
    if !chain.is_empty() {
        cmd.arg("-vf").arg(chain.join(","));
    }

    if hdr_filter.is_some() {
        cmd.arg("-color_primaries").arg("bt709");
        cmd.arg("-color_trc").arg("bt709");
        cmd.arg("-colorspace").arg("bt709");
        cmd.arg("-color_range").arg("tv");
    }
}

/// The CPU-only fallback chain when no hardware encoder was selected at all,
/// mirroring an `apply_cpu_params` pattern.
pub fn cpu_baseline_encoder(target: TargetCodec, caps: &EncoderCapabilities) -> Encoder {
    match target {
        TargetCodec::Av1 => {
            if caps.has_video_encoder("libsvtav1") {
                Encoder::Av1Svt
            } else if caps.has_video_encoder("libx265") {
                Encoder::HevcX265
            } else {
                Encoder::H264X264
            }
        }
        TargetCodec::Hevc => Encoder::HevcX265,
        TargetCodec::H264 => Encoder::H264X264,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps_with(video_encoders: &[&str]) -> EncoderCapabilities {
        let mut caps = EncoderCapabilities::default();
        for name in video_encoders {
            caps.video_encoders.insert((*name).to_string());
        }
        caps
    }

    #[test]
    fn prefers_vendor_hardware_encoder_when_available() {
        let caps = caps_with(&["hevc_nvenc", "libx265"]);
        let selection = select_encoder(TargetCodec::Hevc, Some(Vendor::Nvidia), &caps, true).unwrap();
        assert_eq!(selection.encoder, Encoder::HevcNvenc);
        assert_eq!(selection.effective_codec, TargetCodec::Hevc);
    }

    #[test]
    fn falls_back_to_cpu_encoder_when_vendor_encoder_missing() {
        let caps = caps_with(&["libx265"]);
        let selection = select_encoder(TargetCodec::Hevc, Some(Vendor::Nvidia), &caps, true).unwrap();
        assert_eq!(selection.encoder, Encoder::HevcX265);
    }

    #[test]
    fn falls_through_av1_to_hevc_to_h264_when_allowed() {
        let caps = caps_with(&["libx264"]);
        let selection = select_encoder(TargetCodec::Av1, None, &caps, true).unwrap();
        assert_eq!(selection.encoder, Encoder::H264X264);
        assert_eq!(selection.effective_codec, TargetCodec::H264);
        assert_ne!(selection.requested_codec, selection.effective_codec);
    }

    #[test]
    fn fallback_disabled_returns_none_when_preferred_tier_unavailable() {
        let caps = caps_with(&["libx264"]);
        assert!(select_encoder(TargetCodec::Av1, None, &caps, false).is_none());
    }

    fn metadata_with_transfer(transfer: Option<&str>) -> Metadata {
        Metadata {
            width: 3840,
            height: 2160,
            fps: 24.0,
            codec: "hevc".into(),
            color_space: None,
            duration_secs: 5.0,
            source_bitrate_kbps: Some(20_000),
            camera_model: None,
            previously_encoded: false,
            quality_override: None,
            color_transfer: transfer.map(String::from),
            audio_codec: None,
        }
    }

    #[test]
    fn hdr_tonemap_filter_applied_only_for_pq_or_hlg() {
        let mut cmd = tokio::process::Command::new("ffmpeg");
        apply_hdr_settings(&mut cmd, &metadata_with_transfer(Some("smpte2084")), None);
        let args: Vec<String> = cmd.as_std().get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert!(args.iter().any(|a| a.contains("tonemap=hable")));
    }

    #[test]
    fn sdr_metadata_gets_no_tonemap_filter() {
        let mut cmd = tokio::process::Command::new("ffmpeg");
        apply_hdr_settings(&mut cmd, &metadata_with_transfer(Some("bt709")), None);
        assert_eq!(cmd.as_std().get_args().count(), 0);
    }

    /// Regression test: ffmpeg only honors the last `-vf` on a command
    /// line, so a rotated HDR source must fold both filters into one chain
    /// rather than emitting two competing `-vf` flags.
    #[test]
    fn rotation_and_hdr_filters_combine_into_a_single_vf() {
        let mut cmd = tokio::process::Command::new("ffmpeg");
        apply_hdr_settings(&mut cmd, &metadata_with_transfer(Some("smpte2084")), Some("transpose=1"));
        let args: Vec<String> = cmd.as_std().get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        let vf_count = args.iter().filter(|a| a.as_str() == "-vf").count();
        assert_eq!(vf_count, 1, "expected exactly one -vf flag");
        let pos = args.iter().position(|a| a == "-vf").unwrap();
        assert!(args[pos + 1].starts_with("transpose=1,zscale="));
    }

    #[test]
    fn rotation_only_still_produces_a_vf_without_hdr() {
        let mut cmd = tokio::process::Command::new("ffmpeg");
        apply_hdr_settings(&mut cmd, &metadata_with_transfer(Some("bt709")), Some("transpose=2"));
        let args: Vec<String> = cmd.as_std().get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(args, vec!["-vf".to_string(), "transpose=2".to_string()]);
    }
}
