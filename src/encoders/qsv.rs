//! Intel Quick Sync Video args. Grounded on a
//! `media/ffmpeg/qsv.rs` pattern.

use super::Encoder;
use crate::hardware::HardwareInfo;
use crate::model::QualityDecision;

pub fn apply(cmd: &mut tokio::process::Command, encoder: Encoder, hw_info: Option<&HardwareInfo>, quality: &QualityDecision) {
    if let Some(hw) = hw_info {
        if let Some(device_path) = &hw.device_path {
            cmd.arg("-init_hw_device").arg(format!("qsv=qsv:{device_path}"));
            cmd.arg("-filter_hw_device").arg("qsv");
        }
    }

    cmd.arg("-c:v").arg(encoder.name());

    match quality {
        QualityDecision::Cq(cq) => {
            cmd.arg("-global_quality").arg(cq.to_string());
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
    cmd.arg("-look_ahead").arg("1");
}
