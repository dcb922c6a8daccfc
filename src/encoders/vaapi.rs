//! VAAPI args (Intel/AMD on Linux). Grounded on a
//! `media/ffmpeg/vaapi.rs` pattern. VAAPI's rate control is driven almost
//! entirely by the device and the default quality level; this orchestrator
//! does not expose `-qp`/`-b:v` tuning for it either.

use super::Encoder;
use crate::hardware::HardwareInfo;

pub fn apply(cmd: &mut tokio::process::Command, encoder: Encoder, hw_info: Option<&HardwareInfo>) {
    if let Some(hw) = hw_info {
        if let Some(device_path) = &hw.device_path {
            cmd.arg("-vaapi_device").arg(device_path);
        }
    }
    cmd.arg("-c:v").arg(encoder.name());
}
