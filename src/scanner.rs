//! Recursive input discovery (§4.2). Grounded on a `media/scanner.rs`
//! pattern: `walkdir` traversal, extension filtering, and a final sort for
//! deterministic ordering. The per-root parallel scan there used `rayon`;
//! this orchestrator's scanner runs one root at a time off the async
//! runtime and does not need it.

use std::path::{Path, PathBuf};

use tracing::{debug, info};
use walkdir::WalkDir;

use crate::config::{EffectiveConfig, RootMapping};
use crate::model::VideoFile;

#[derive(Debug, Default)]
pub struct ScanReport {
    pub found: Vec<VideoFile>,
    pub ignored_count: u64,
}

pub struct Scanner<'a> {
    config: &'a EffectiveConfig,
}

impl<'a> Scanner<'a> {
    pub fn new(config: &'a EffectiveConfig) -> Self {
        Self { config }
    }

    /// Walks every configured input root depth-first, skipping the leaf
    /// directories the output/error mappings write into so a prior run's
    /// products are never rediscovered as new input.
    pub fn scan(&self) -> ScanReport {
        let mut report = ScanReport::default();
        for root in &self.config.input_roots {
            self.scan_root(root, &mut report);
        }
        report.found.sort_by(|a, b| a.path.cmp(&b.path));
        info!(found = report.found.len(), ignored = report.ignored_count, "scan complete");
        report
    }

    fn scan_root(&self, root: &Path, report: &mut ScanReport) {
        info!(root = %root.display(), "scanning input root");
        let skip_dirs = self.skip_leaf_dirs(root);

        let walker = WalkDir::new(root)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                if entry.file_type().is_dir() {
                    !skip_dirs.iter().any(|skip| entry.path() == skip)
                } else {
                    true
                }
            });

        for entry in walker.filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let accepted_ext = path
                .extension()
                .and_then(|s| s.to_str())
                .map(|ext| {
                    self.config
                        .extensions
                        .iter()
                        .any(|accepted| accepted.eq_ignore_ascii_case(ext))
                })
                .unwrap_or(false);

            if !accepted_ext {
                report.ignored_count += 1;
                continue;
            }

            let size_bytes = entry.metadata().map(|m| m.len()).unwrap_or(0);
            if size_bytes < self.config.min_size_bytes {
                debug!(path = %path.display(), size_bytes, "below minimum size, ignoring");
                report.ignored_count += 1;
                continue;
            }

            report.found.push(VideoFile::new(path.to_path_buf(), size_bytes));
        }
    }

    fn skip_leaf_dirs(&self, root: &Path) -> Vec<PathBuf> {
        vec![self.config.output_mapping.resolve(root), self.config.error_mapping.resolve(root)]
    }
}
