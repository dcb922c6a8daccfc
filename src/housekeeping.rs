//! Housekeeping (§4.7): pre-run error-marker sweep/count and `.tmp` cleanup,
//! post-run relocation of failed sources under the error root. Grounded on
//! the `media/scanner.rs` `WalkDir` traversal pattern, reused here to walk
//! output/error roots instead of input roots.

use std::path::{Path, PathBuf};

use tracing::warn;
use walkdir::WalkDir;

use crate::config::EffectiveConfig;
use crate::error::Result;
use crate::event_bus::{Event, EventBus};

/// Sibling-file suffix marking a job that ended in a failure state whose
/// policy writes one (I6). `output/clip.mp4` fails as `output/clip.mp4.err`.
pub const ERROR_MARKER_EXTENSION: &str = "err";

/// Above this many stray error-markers, a post-run relocation pass asks for
/// operator confirmation; non-interactive runs warn and skip instead (§4.7).
const CONFIRMATION_THRESHOLD: usize = 100;

pub fn error_marker_path_for(output_path: &Path) -> PathBuf {
    let mut marker = output_path.as_os_str().to_os_string();
    marker.push(".");
    marker.push(ERROR_MARKER_EXTENSION);
    PathBuf::from(marker)
}

#[derive(Debug, Default)]
pub struct PreRunReport {
    pub markers_removed: usize,
    pub markers_found: usize,
    pub tmp_files_removed: usize,
}

/// If `clean_errors_on_start`, deletes every error-marker under each output
/// and error root; otherwise just counts them. Always deletes `.tmp` files
/// under the same roots (§4.7 "pre-run").
pub fn run_pre_checks(config: &EffectiveConfig) -> Result<PreRunReport> {
    let mut report = PreRunReport::default();
    for root in &config.input_roots {
        for scan_root in [config.output_mapping.resolve(root), config.error_mapping.resolve(root)] {
            if !scan_root.exists() {
                continue;
            }
            sweep_root(&scan_root, config.clean_errors_on_start, &mut report);
        }
    }
    Ok(report)
}

fn sweep_root(root: &Path, clean_errors: bool, report: &mut PreRunReport) {
    for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if is_tmp_file(path) {
            if std::fs::remove_file(path).is_ok() {
                report.tmp_files_removed += 1;
            }
            continue;
        }
        if is_error_marker(path) {
            report.markers_found += 1;
            if clean_errors {
                if std::fs::remove_file(path).is_ok() {
                    report.markers_removed += 1;
                }
            }
        }
    }
}

fn is_tmp_file(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("tmp")
}

fn is_error_marker(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(ERROR_MARKER_EXTENSION)
}

#[derive(Debug, Default)]
pub struct PostRunReport {
    pub relocated: usize,
    pub skipped_over_threshold: bool,
}

/// For every error-marker under `error_root`, moves the corresponding
/// original source AND its marker under `error_root`, preserving relative
/// path. `error_root` doubles as both the scan root and the relocation
/// target: a marker directly under it (alongside its output) is moved into
/// a mirrored subtree so failed originals don't sit next to fresh output.
///
/// Above `CONFIRMATION_THRESHOLD` markers, publishes a warning on the bus
/// and does nothing further rather than blocking a non-interactive run.
pub fn run_post_relocation(config: &EffectiveConfig, bus: &EventBus) -> Result<PostRunReport> {
    let mut report = PostRunReport::default();
    for root in &config.input_roots {
        let output_root = config.output_mapping.resolve(root);
        let error_root = config.error_mapping.resolve(root);
        if !output_root.exists() {
            continue;
        }

        let markers: Vec<PathBuf> = WalkDir::new(&output_root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && is_error_marker(e.path()))
            .map(|e| e.path().to_path_buf())
            .collect();

        if markers.len() > CONFIRMATION_THRESHOLD {
            let message = format!(
                "{} error-markers under {} exceed the relocation confirmation threshold; skipping, run with --clean-errors or relocate manually",
                markers.len(),
                output_root.display()
            );
            warn!("{message}");
            bus.publish(Event::ActionMessage(message));
            report.skipped_over_threshold = true;
            continue;
        }

        for marker in markers {
            let relative = match marker.strip_prefix(&output_root) {
                Ok(rel) => rel.to_path_buf(),
                Err(_) => continue,
            };
            // "sub/clip.mp4.err" -> "sub/clip.mp4": the source's relative path.
            let source_relative = relative.with_extension("");
            let source = root.join(&source_relative);
            let marker_target = error_root.join(&relative);
            let source_target = error_root.join(&source_relative);

            if let Some(parent) = marker_target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            if source.exists() {
                if let Some(parent) = source_target.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::rename(&source, &source_target)?;
            }
            std::fs::rename(&marker, &marker_target)?;
            report.relocated += 1;
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{QualityMode, QueueSortMode, RootMapping, VerifyFailAction};
    use std::fs;
    use tempfile::tempdir;

    fn base_config(input_root: PathBuf, clean_errors_on_start: bool) -> EffectiveConfig {
        EffectiveConfig {
            input_roots: vec![input_root],
            output_mapping: RootMapping::Suffix("_out".into()),
            error_mapping: RootMapping::Suffix("_err".into()),
            extensions: vec!["mp4".into()],
            min_size_bytes: 0,
            min_compression_ratio: 0.1,
            quality_mode: QualityMode::Cq,
            baseline_cq: 28,
            baseline_rate: None,
            target_codec: crate::config::TargetCodec::Hevc,
            output_container: crate::config::OutputContainer::default(),
            camera_patterns: vec![],
            camera_include: vec![],
            skip_target_codec: false,
            rotation_rules: vec![],
            manual_rotation: None,
            cpu_fallback: true,
            gpu_mode: false,
            max_threads_start: 2,
            runtime_min_threads: 1,
            runtime_max_threads: 4,
            prefetch_factor: 1,
            queue_sort: QueueSortMode::Name,
            queue_seed: None,
            clean_errors_on_start,
            verify_fail_action: VerifyFailAction::Off,
            log_path: None,
            root_overrides: vec![],
            demo: false,
            cli_forced_gpu: None,
            cli_forced_cq: None,
            cli_forced_rotation: None,
            min_vmaf_score: None,
        }
    }

    #[test]
    fn error_marker_path_appends_err_suffix() {
        let output = Path::new("/out/clip.mp4");
        assert_eq!(error_marker_path_for(output), PathBuf::from("/out/clip.mp4.err"));
    }

    #[test]
    fn pre_run_counts_markers_without_removing_when_clean_errors_is_false() {
        let dir = tempdir().unwrap();
        let out_dir = PathBuf::from(format!("{}_out", dir.path().display()));
        fs::create_dir_all(&out_dir).unwrap();
        fs::write(out_dir.join("clip.mp4.err"), b"corrupted").unwrap();
        fs::write(out_dir.join("partial.mp4.tmp"), b"partial").unwrap();

        let config = base_config(dir.path().to_path_buf(), false);
        let report = run_pre_checks(&config).unwrap();

        assert_eq!(report.markers_found, 1);
        assert_eq!(report.markers_removed, 0);
        assert_eq!(report.tmp_files_removed, 1);
        assert!(out_dir.join("clip.mp4.err").exists());
        assert!(!out_dir.join("partial.mp4.tmp").exists());
    }

    #[test]
    fn pre_run_removes_markers_when_clean_errors_is_true() {
        let dir = tempdir().unwrap();
        let out_dir = PathBuf::from(format!("{}_out", dir.path().display()));
        fs::create_dir_all(&out_dir).unwrap();
        fs::write(out_dir.join("clip.mp4.err"), b"corrupted").unwrap();

        let config = base_config(dir.path().to_path_buf(), true);
        let report = run_pre_checks(&config).unwrap();

        assert_eq!(report.markers_removed, 1);
        assert!(!out_dir.join("clip.mp4.err").exists());
    }

    #[test]
    fn post_run_relocates_source_and_marker_preserving_relative_path() {
        let dir = tempdir().unwrap();
        let input_root = dir.path().join("in");
        let out_dir = PathBuf::from(format!("{}_out", input_root.display()));
        let err_dir = PathBuf::from(format!("{}_err", input_root.display()));
        fs::create_dir_all(out_dir.join("sub")).unwrap();
        fs::create_dir_all(&input_root.join("sub")).unwrap();

        fs::write(input_root.join("sub").join("clip.mp4"), b"source bytes").unwrap();
        fs::write(out_dir.join("sub").join("clip.mp4.err"), b"corrupted").unwrap();

        let config = base_config(input_root, false);
        let bus = EventBus::new();
        let report = run_post_relocation(&config, &bus).unwrap();

        assert_eq!(report.relocated, 1);
        assert!(!report.skipped_over_threshold);
        assert!(err_dir.join("sub").join("clip.mp4.err").exists());
    }

    #[test]
    fn post_run_skips_relocation_above_confirmation_threshold() {
        let dir = tempdir().unwrap();
        let input_root = dir.path().join("in");
        let out_dir = PathBuf::from(format!("{}_out", input_root.display()));
        fs::create_dir_all(&out_dir).unwrap();

        for i in 0..(CONFIRMATION_THRESHOLD + 1) {
            fs::write(out_dir.join(format!("clip{i}.mp4.err")), b"corrupted").unwrap();
        }

        let config = base_config(input_root, false);
        let bus = EventBus::new();
        let report = run_post_relocation(&config, &bus).unwrap();

        assert_eq!(report.relocated, 0);
        assert!(report.skipped_over_threshold);
    }
}
