//! Color-space remux pre-step (§4.9.2): a zero-re-encode pass that rewrites
//! container-level color metadata before the main transcode, fired when the
//! probed color-space is the "reserved" sentinel on a known-problematic
//! codec. Grounded on a `-color_primaries`/`-colorspace` stream-copy remux
//! pattern in `media/ffmpeg/mod.rs`, generalized here from a post-encode
//! tag-set into a standalone pre-transcode pass.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{OrchestratorError, Result};
use crate::model::{Metadata, COLOR_SPACE_RESERVED};
use crate::transcoder::container_format_for;

/// Codecs known to mishandle the "reserved" color-space sentinel (§4.9.2).
const PROBLEMATIC_CODECS: &[&str] = &["hevc", "h265", "h264", "avc"];

pub fn needs_color_fix(metadata: &Metadata) -> bool {
    metadata.color_space.as_deref() == Some(COLOR_SPACE_RESERVED)
        && PROBLEMATIC_CODECS.iter().any(|c| metadata.codec.eq_ignore_ascii_case(c))
}

/// A scoped handle to the remuxed intermediate file; removed on drop so the
/// sibling is released on every exit path regardless of how the job ends.
pub struct ColorFixIntermediate {
    path: PathBuf,
}

impl ColorFixIntermediate {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ColorFixIntermediate {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn intermediate_path(input: &Path) -> PathBuf {
    let mut name = input.as_os_str().to_os_string();
    name.push(".colorfix.tmp");
    PathBuf::from(name)
}

/// Stream-copies `input` into a sibling intermediate with primaries,
/// transfer and matrix forced to `bt709` (coefficients = 1), per §4.9.2
/// "standard primaries/transfer/matrix = 1". No re-encode: `-c copy` plus
/// the bitstream-level color tags.
pub async fn apply_color_fix(input: &Path, job_id: u64) -> Result<ColorFixIntermediate> {
    let output = intermediate_path(input);
    info!(job_id, input = %input.display(), output = %output.display(), "applying color-space remux pre-step");

    // The ".colorfix.tmp" suffix defeats ffmpeg's extension-based muxer
    // inference, so the container is named explicitly from the real input
    // extension (the intermediate is remuxed into the same container).
    let status = tokio::process::Command::new("ffmpeg")
        .arg("-hide_banner")
        .arg("-y")
        .arg("-i")
        .arg(input)
        .arg("-c")
        .arg("copy")
        .arg("-color_primaries")
        .arg("bt709")
        .arg("-color_trc")
        .arg("bt709")
        .arg("-colorspace")
        .arg("bt709")
        .arg("-f")
        .arg(container_format_for(input))
        .arg(&output)
        .status()
        .await
        .map_err(|e| OrchestratorError::Transcode(format!("failed to spawn color-fix remux: {e}")))?;

    if !status.success() {
        let _ = tokio::fs::remove_file(&output).await;
        return Err(OrchestratorError::Transcode(format!("color-fix remux exited with {status}")));
    }

    Ok(ColorFixIntermediate { path: output })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata_with(codec: &str, color_space: Option<&str>) -> Metadata {
        Metadata {
            width: 1920,
            height: 1080,
            fps: 30.0,
            codec: codec.into(),
            color_space: color_space.map(String::from),
            duration_secs: 10.0,
            source_bitrate_kbps: Some(8000),
            camera_model: None,
            previously_encoded: false,
            quality_override: None,
            color_transfer: None,
            audio_codec: None,
        }
    }

    #[test]
    fn reserved_sentinel_on_problematic_codec_needs_fix() {
        assert!(needs_color_fix(&metadata_with("hevc", Some(COLOR_SPACE_RESERVED))));
        assert!(needs_color_fix(&metadata_with("h264", Some(COLOR_SPACE_RESERVED))));
    }

    #[test]
    fn reserved_sentinel_on_unlisted_codec_does_not_need_fix() {
        assert!(!needs_color_fix(&metadata_with("vp9", Some(COLOR_SPACE_RESERVED))));
    }

    #[test]
    fn non_reserved_color_space_never_needs_fix() {
        assert!(!needs_color_fix(&metadata_with("hevc", Some("bt709"))));
        assert!(!needs_color_fix(&metadata_with("hevc", None)));
    }

    #[test]
    fn intermediate_path_appends_sibling_suffix() {
        let input = Path::new("/in/clip.mp4");
        assert_eq!(intermediate_path(input), PathBuf::from("/in/clip.mp4.colorfix.tmp"));
    }

    #[test]
    fn remux_container_is_inferred_from_input_not_the_tmp_suffix() {
        assert_eq!(container_format_for(Path::new("/in/clip.mkv")), "matroska");
        assert_eq!(container_format_for(&intermediate_path(Path::new("/in/clip.mkv"))), "mp4");
    }
}
