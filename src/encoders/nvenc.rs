//! NVIDIA NVENC args. Grounded on a `media/ffmpeg/nvenc.rs` pattern.

use super::Encoder;
use crate::model::QualityDecision;

pub fn apply(cmd: &mut tokio::process::Command, encoder: Encoder, quality: &QualityDecision) {
    cmd.arg("-c:v").arg(encoder.name());
    cmd.arg("-preset").arg("p4");

    match quality {
        QualityDecision::Cq(cq) => {
            cmd.arg("-cq").arg(cq.to_string());
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
