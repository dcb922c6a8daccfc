//! Apple VideoToolbox args. Grounded on a
//! `media/ffmpeg/videotoolbox.rs` pattern.

use super::Encoder;
use crate::model::QualityDecision;

pub fn apply(cmd: &mut tokio::process::Command, encoder: Encoder, quality: &QualityDecision) {
    cmd.arg("-c:v").arg(encoder.name());

    match quality {
        QualityDecision::Cq(cq) => {
            cmd.arg("-b:v").arg("0");
            cmd.arg("-q:v").arg(cq.to_string());
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

    if matches!(encoder, Encoder::HevcVideotoolbox) {
        cmd.arg("-tag:v").arg("hvc1");
    }
}
