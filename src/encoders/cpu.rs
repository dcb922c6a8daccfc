//! CPU software encoder args (libsvtav1/libaom-av1/libx265/libx264).
//! Grounded on a `media/ffmpeg/cpu.rs` pattern, which exposes a
//! `CpuPreset` knob on top of this that this orchestrator does not (§9
//! keeps the CPU path to a single fixed "medium" preset since nothing in
//! the config surface calls for more).

use super::Encoder;
use crate::model::QualityDecision;

const PRESET: &str = "medium";

pub fn apply(cmd: &mut tokio::process::Command, encoder: Encoder, quality: &QualityDecision) {
    cmd.arg("-c:v").arg(encoder.name());

    match encoder {
        Encoder::Av1Svt => {
            cmd.arg("-preset").arg("8");
            apply_rate_control(cmd, quality);
        }
        Encoder::Av1Aom => {
            apply_rate_control(cmd, quality);
            cmd.arg("-cpu-used").arg("6");
        }
        Encoder::HevcX265 => {
            cmd.arg("-preset").arg(PRESET);
            apply_rate_control(cmd, quality);
            cmd.arg("-tag:v").arg("hvc1");
        }
        Encoder::H264X264 => {
            cmd.arg("-preset").arg(PRESET);
            apply_rate_control(cmd, quality);
        }
        _ => unreachable!("cpu::apply called with a non-CPU encoder"),
    }
}

/// `-crf` for CQ mode, `-b:v`/`-minrate`/`-maxrate` for rate mode; the two
/// are mutually exclusive rate-control strategies, so never both at once.
fn apply_rate_control(cmd: &mut tokio::process::Command, quality: &QualityDecision) {
    match quality {
        QualityDecision::Cq(cq) => {
            cmd.arg("-crf").arg(cq.to_string());
        }
        QualityDecision::Rate { bps, minrate, maxrate } => {
            cmd.arg("-b:v").arg(bps.to_string());
            if let Some(min) = minrate {
                cmd.arg("-minrate").arg(min.to_string());
            }
            if let Some(max) = maxrate {
                cmd.arg("-maxrate").arg(max.to_string());
            }
        }
    }
}
