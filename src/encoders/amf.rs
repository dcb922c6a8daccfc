//! AMD AMF args (Windows only). Grounded on an
//! `media/ffmpeg/amf.rs` pattern.

use super::Encoder;

pub fn apply(cmd: &mut tokio::process::Command, encoder: Encoder) {
    cmd.arg("-c:v").arg(encoder.name());
}
