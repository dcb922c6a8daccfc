//! Effective Configuration (§3, §6): YAML load, per-root override merge,
//! CLI precedence, and the tagged variants §9 asks for in place of ad-hoc
//! dictionaries.

use std::path::{Path, PathBuf};

use clap::Parser;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, Result};
use crate::model::Rotation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityMode {
    Cq,
    Rate,
}

/// The codec an encode should land on (§4.9.1 step 7 "target-codec
/// skip"); candidate encoders are chosen per-vendor by `crate::encoders`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetCodec {
    Av1,
    Hevc,
    H264,
}

impl TargetCodec {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetCodec::Av1 => "av1",
            TargetCodec::Hevc => "hevc",
            TargetCodec::H264 => "h264",
        }
    }
}

impl Default for TargetCodec {
    fn default() -> Self {
        TargetCodec::Hevc
    }
}

impl clap::ValueEnum for TargetCodec {
    fn value_variants<'a>() -> &'a [Self] {
        &[TargetCodec::Av1, TargetCodec::Hevc, TargetCodec::H264]
    }
    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(clap::builder::PossibleValue::new(self.as_str()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueSortMode {
    Name,
    Dir,
    SizeAsc,
    Size,
    SizeDesc,
    Ext,
    Rand,
}

/// Output container (§6: "chosen from a `-f` flag if present in baseline
/// args, otherwise MP4"). Since this config has no raw encoder-args list,
/// it is set directly rather than sniffed from a `-f` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputContainer {
    #[default]
    Mp4,
    Mkv,
    Mov,
}

impl OutputContainer {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputContainer::Mp4 => "mp4",
            OutputContainer::Mkv => "mkv",
            OutputContainer::Mov => "mov",
        }
    }

    fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mp4" => Some(OutputContainer::Mp4),
            "mkv" | "matroska" => Some(OutputContainer::Mkv),
            "mov" | "quicktime" => Some(OutputContainer::Mov),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VerifyFailAction {
    #[default]
    Off,
    Log,
    Pause,
    Exit,
}

impl std::str::FromStr for VerifyFailAction {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "false" | "off" => Ok(Self::Off),
            "log" => Ok(Self::Log),
            "pause" => Ok(Self::Pause),
            "exit" => Ok(Self::Exit),
            other => Err(format!("invalid verify-fail-action: {other}")),
        }
    }
}

/// Absolute bytes/sec or a relative multiplier of source bitrate. A run
/// must not mix classes across `bps`/`minrate`/`maxrate` (§4.8).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateValue {
    Absolute(u64),
    Relative(f64),
}

impl RateValue {
    /// Parses `N`, `Nk`, `NM`, `NMbps` as absolute bytes/sec, or a bare
    /// decimal in `[0, 10]` as a relative multiplier of source bitrate.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if let Ok(value) = trimmed.parse::<f64>() {
            if (0.0..=10.0).contains(&value) && !trimmed.chars().any(|c| c.is_ascii_alphabetic()) {
                return Ok(RateValue::Relative(value));
            }
        }
        let lower = trimmed.to_lowercase();
        let (digits, multiplier) = if let Some(stripped) = lower.strip_suffix("mbps") {
            (stripped, 1_000_000.0 / 8.0)
        } else if let Some(stripped) = lower.strip_suffix('m') {
            (stripped, 1_000_000.0)
        } else if let Some(stripped) = lower.strip_suffix("kbps") {
            (stripped, 1_000.0 / 8.0)
        } else if let Some(stripped) = lower.strip_suffix('k') {
            (stripped, 1_000.0)
        } else {
            (lower.as_str(), 1.0)
        };
        let base: f64 = digits
            .parse()
            .map_err(|_| OrchestratorError::Config(format!("invalid rate value: {raw}")))?;
        Ok(RateValue::Absolute((base * multiplier) as u64))
    }

    pub fn is_relative(&self) -> bool {
        matches!(self, RateValue::Relative(_))
    }

    pub fn resolve(&self, source_bitrate_kbps: Option<u64>) -> u64 {
        match self {
            RateValue::Absolute(bytes_per_sec) => *bytes_per_sec,
            RateValue::Relative(multiplier) => {
                let source_bps = source_bitrate_kbps.unwrap_or(0) as f64 * 1000.0 / 8.0;
                (source_bps * multiplier) as u64
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateSpec {
    pub bps: RateValue,
    pub minrate: Option<RateValue>,
    pub maxrate: Option<RateValue>,
    pub cap: Option<RateValue>,
}

impl RateSpec {
    /// Validates the "all three values of a run must be the same class"
    /// rule (§4.8, §8 "Boundary behaviors").
    pub fn validate_same_class(&self) -> Result<()> {
        let classes: Vec<bool> = [Some(self.bps), self.minrate, self.maxrate]
            .into_iter()
            .flatten()
            .map(|v| v.is_relative())
            .collect();
        if classes.iter().any(|&c| c != classes[0]) {
            return Err(OrchestratorError::Config(
                "rate-mode bps/minrate/maxrate must all be absolute or all relative".into(),
            ));
        }
        Ok(())
    }
}

/// A per-camera override, carried through from the Metadata Adapter when a
/// configured pattern matches (§4.4, §4.8). The legacy scalar form (a bare
/// `cq` number instead of `{cq: N}`) is rejected by construction: this type
/// only ever comes from a struct-shaped YAML node.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QualityOverride {
    pub cq: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate: Option<RawRateSpec>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawRateSpec {
    pub bps: Option<String>,
    pub minrate: Option<String>,
    pub maxrate: Option<String>,
    pub cap: Option<String>,
}

impl RawRateSpec {
    pub fn resolve(&self) -> Result<RateSpec> {
        let bps = self
            .bps
            .as_deref()
            .map(RateValue::parse)
            .transpose()?
            .ok_or_else(|| OrchestratorError::Config("rate spec missing bps".into()))?;
        let minrate = self.minrate.as_deref().map(RateValue::parse).transpose()?;
        let maxrate = self.maxrate.as_deref().map(RateValue::parse).transpose()?;
        let cap = self.cap.as_deref().map(RateValue::parse).transpose()?;
        let spec = RateSpec { bps, minrate, maxrate, cap };
        spec.validate_same_class()?;
        Ok(spec)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CameraPattern {
    pub pattern: String,
    #[serde(flatten)]
    pub overrides: QualityOverride,
}

/// Either an explicit N-to-N root mapping, or a suffix appended to each
/// input leaf (§3, §6).
#[derive(Debug, Clone)]
pub enum RootMapping {
    Suffix(String),
    Explicit(Vec<(PathBuf, PathBuf)>),
}

impl RootMapping {
    pub fn resolve(&self, input_root: &Path) -> PathBuf {
        match self {
            RootMapping::Suffix(suffix) => {
                let mut s = input_root.as_os_str().to_os_string();
                s.push(suffix);
                PathBuf::from(s)
            }
            RootMapping::Explicit(pairs) => pairs
                .iter()
                .find(|(from, _)| from == input_root)
                .map(|(_, to)| to.clone())
                .unwrap_or_else(|| {
                    let mut s = input_root.as_os_str().to_os_string();
                    s.push("_out");
                    PathBuf::from(s)
                }),
        }
    }
}

/// An allow-listed per-input-root override document (§6): general flags,
/// encoder args, autorotate, and a single-key `cq` override.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RootOverrideDoc {
    pub gpu: Option<bool>,
    pub cpu_fallback: Option<bool>,
    pub autorotate: Option<bool>,
    pub cq: Option<u8>,
}

#[derive(Debug, Clone)]
pub struct RootOverrideEntry {
    pub root: PathBuf,
    pub doc: RootOverrideDoc,
}

/// The immutable snapshot used for a run (§3 "Effective Configuration").
#[derive(Debug, Clone)]
pub struct EffectiveConfig {
    pub input_roots: Vec<PathBuf>,
    pub output_mapping: RootMapping,
    pub error_mapping: RootMapping,
    pub extensions: Vec<String>,
    pub min_size_bytes: u64,
    pub min_compression_ratio: f64,
    pub quality_mode: QualityMode,
    pub baseline_cq: u8,
    pub baseline_rate: Option<RateSpec>,
    pub target_codec: TargetCodec,
    pub output_container: OutputContainer,
    pub camera_patterns: Vec<CameraPattern>,
    pub camera_include: Vec<String>,
    pub skip_target_codec: bool,
    pub rotation_rules: Vec<(Regex, Rotation)>,
    pub manual_rotation: Option<Rotation>,
    pub cpu_fallback: bool,
    pub gpu_mode: bool,
    pub max_threads_start: usize,
    pub runtime_min_threads: usize,
    pub runtime_max_threads: usize,
    pub prefetch_factor: usize,
    pub queue_sort: QueueSortMode,
    pub queue_seed: Option<u64>,
    pub clean_errors_on_start: bool,
    pub verify_fail_action: VerifyFailAction,
    pub log_path: Option<PathBuf>,
    pub root_overrides: Vec<RootOverrideEntry>,
    pub demo: bool,
    pub cli_forced_gpu: Option<bool>,
    pub cli_forced_cq: Option<u8>,
    pub cli_forced_rotation: Option<Rotation>,
    /// Minimum acceptable VMAF score for the §4.9.1 step 14 verify-on-complete
    /// gate; `None` skips the objective quality check entirely (§11).
    pub min_vmaf_score: Option<f64>,
}

impl EffectiveConfig {
    /// Resolves an allow-listed override for `path` by nearest-ancestor-wins
    /// among the configured per-root override documents, then applies CLI
    /// overrides on top (CLI > per-root > global > defaults, §6).
    pub fn root_override_for(&self, path: &Path) -> RootOverrideDoc {
        let mut best: Option<&RootOverrideEntry> = None;
        for entry in &self.root_overrides {
            if path.starts_with(&entry.root) {
                let better = match best {
                    None => true,
                    Some(current) => entry.root.as_os_str().len() > current.root.as_os_str().len(),
                };
                if better {
                    best = Some(entry);
                }
            }
        }
        let mut doc = best.map(|e| e.doc.clone()).unwrap_or_default();
        if self.cli_forced_gpu.is_some() {
            doc.gpu = self.cli_forced_gpu;
        }
        if self.cli_forced_cq.is_some() {
            doc.cq = self.cli_forced_cq;
        }
        doc
    }

    pub fn gpu_for(&self, path: &Path) -> bool {
        self.root_override_for(path).gpu.unwrap_or(self.gpu_mode)
    }

    pub fn manual_rotation_for(&self, path: &Path) -> Option<Rotation> {
        if let Some(cli) = self.cli_forced_rotation {
            return Some(cli);
        }
        if self.root_override_for(path).autorotate == Some(false) {
            return Some(Rotation::None);
        }
        self.manual_rotation
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_threads_start == 0 {
            return Err(OrchestratorError::Config("--threads must be > 0".into()));
        }
        if self.quality_mode == QualityMode::Cq && self.baseline_cq > 63 {
            return Err(OrchestratorError::Config("quality index must be 0..=63".into()));
        }
        if self.quality_mode == QualityMode::Rate {
            let rate = self
                .baseline_rate
                .as_ref()
                .ok_or_else(|| OrchestratorError::Config("rate mode requires --bps".into()))?;
            rate.validate_same_class()?;
        }
        if !(0.0..=1.0).contains(&self.min_compression_ratio) {
            return Err(OrchestratorError::Config("--min-ratio must be within [0, 1]".into()));
        }
        Ok(())
    }
}

/// On-disk schema (global config or per-root override subset), loaded from
/// YAML via `serde_yaml` rather than TOML.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct RawConfig {
    #[serde(default)]
    pub input_roots: Vec<PathBuf>,
    #[serde(default)]
    pub output_suffix: Option<String>,
    #[serde(default)]
    pub error_suffix: Option<String>,
    /// Explicit N-to-N output-root pairs (§3); takes precedence over
    /// `output_suffix` when present.
    #[serde(default)]
    pub output_roots: Vec<(PathBuf, PathBuf)>,
    /// Explicit N-to-N error-root pairs (§3); takes precedence over
    /// `error_suffix` when present.
    #[serde(default)]
    pub error_roots: Vec<(PathBuf, PathBuf)>,
    #[serde(default)]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub min_size_mb: Option<u64>,
    #[serde(default)]
    pub min_ratio: Option<f64>,
    #[serde(default)]
    pub quality_mode: Option<QualityMode>,
    #[serde(default)]
    pub quality: Option<u8>,
    #[serde(default)]
    pub target_codec: Option<TargetCodec>,
    #[serde(default)]
    pub container: Option<String>,
    #[serde(default)]
    pub bps: Option<String>,
    #[serde(default)]
    pub minrate: Option<String>,
    #[serde(default)]
    pub maxrate: Option<String>,
    #[serde(default)]
    pub rate_cap: Option<String>,
    #[serde(default)]
    pub camera_patterns: Vec<CameraPattern>,
    #[serde(default)]
    pub camera_include: Vec<String>,
    #[serde(default)]
    pub skip_target_codec: bool,
    #[serde(default)]
    pub rotation_patterns: Vec<(String, String)>,
    #[serde(default)]
    pub manual_rotation: Option<u16>,
    #[serde(default)]
    pub gpu: bool,
    #[serde(default)]
    pub cpu_fallback: bool,
    #[serde(default)]
    pub threads: Option<usize>,
    #[serde(default)]
    pub runtime_min_threads: Option<usize>,
    #[serde(default)]
    pub runtime_max_threads: Option<usize>,
    #[serde(default)]
    pub prefetch_factor: Option<usize>,
    #[serde(default)]
    pub queue_sort: Option<QueueSortMode>,
    #[serde(default)]
    pub queue_seed: Option<u64>,
    #[serde(default)]
    pub clean_errors_on_start: bool,
    #[serde(default)]
    pub verify_fail_action: Option<VerifyFailAction>,
    #[serde(default)]
    pub log_path: Option<PathBuf>,
    #[serde(default)]
    pub root_overrides: std::collections::BTreeMap<PathBuf, RootOverrideDoc>,
    #[serde(default)]
    pub min_vmaf_score: Option<f64>,
}

impl RawConfig {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&content)
            .map_err(|e| OrchestratorError::Config(format!("failed to parse {path:?}: {e}")))
    }
}

fn parse_rotation(degrees: u16) -> Option<Rotation> {
    match degrees {
        0 => Some(Rotation::None),
        90 => Some(Rotation::R90),
        180 => Some(Rotation::R180),
        270 => Some(Rotation::R270),
        _ => None,
    }
}

/// CLI surface (§6), precedence CLI > per-root > global > defaults.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Batch video-transcoding orchestrator")]
pub struct CliArgs {
    /// Comma-separated input roots; overrides the config's list wholesale.
    #[arg(index = 1)]
    pub roots: Option<String>,

    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    #[arg(long, short = 't')]
    pub threads: Option<usize>,

    #[arg(long)]
    pub quality: Option<u8>,

    #[arg(long)]
    pub quality_mode: Option<QualityMode>,

    #[arg(long)]
    pub target_codec: Option<TargetCodec>,

    #[arg(long)]
    pub bps: Option<String>,
    #[arg(long)]
    pub minrate: Option<String>,
    #[arg(long)]
    pub maxrate: Option<String>,

    #[arg(long)]
    pub gpu: bool,
    #[arg(long)]
    pub cpu: bool,

    #[arg(long)]
    pub queue_sort: Option<QueueSortMode>,
    #[arg(long)]
    pub queue_seed: Option<u64>,

    #[arg(long)]
    pub skip_av1: bool,

    #[arg(long)]
    pub camera: Option<String>,

    #[arg(long)]
    pub min_size: Option<u64>,
    #[arg(long)]
    pub min_ratio: Option<f64>,

    #[arg(long)]
    pub rotate_180: bool,

    #[arg(long)]
    pub clean_errors: bool,

    #[arg(long)]
    pub log_path: Option<PathBuf>,

    #[arg(long)]
    pub debug: bool,
    #[arg(long)]
    pub no_debug: bool,

    #[arg(long)]
    pub demo: bool,
    #[arg(long)]
    pub demo_config: Option<PathBuf>,

    #[arg(long)]
    pub verify_fail_action: Option<VerifyFailAction>,

    #[arg(long)]
    pub min_vmaf: Option<f64>,

    #[arg(long)]
    pub wait: bool,
    #[arg(long)]
    pub no_wait: bool,
    #[arg(long)]
    pub bell: bool,
    #[arg(long)]
    pub no_bell: bool,
}

impl clap::ValueEnum for QualityMode {
    fn value_variants<'a>() -> &'a [Self] {
        &[QualityMode::Cq, QualityMode::Rate]
    }
    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(match self {
            QualityMode::Cq => clap::builder::PossibleValue::new("cq"),
            QualityMode::Rate => clap::builder::PossibleValue::new("rate"),
        })
    }
}

impl clap::ValueEnum for QueueSortMode {
    fn value_variants<'a>() -> &'a [Self] {
        &[
            QueueSortMode::Name,
            QueueSortMode::Dir,
            QueueSortMode::SizeAsc,
            QueueSortMode::Size,
            QueueSortMode::SizeDesc,
            QueueSortMode::Ext,
            QueueSortMode::Rand,
        ]
    }
    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(clap::builder::PossibleValue::new(match self {
            QueueSortMode::Name => "name",
            QueueSortMode::Dir => "dir",
            QueueSortMode::SizeAsc => "size-asc",
            QueueSortMode::Size => "size",
            QueueSortMode::SizeDesc => "size-desc",
            QueueSortMode::Ext => "ext",
            QueueSortMode::Rand => "rand",
        }))
    }
}

impl clap::ValueEnum for VerifyFailAction {
    fn value_variants<'a>() -> &'a [Self] {
        &[
            VerifyFailAction::Off,
            VerifyFailAction::Log,
            VerifyFailAction::Pause,
            VerifyFailAction::Exit,
        ]
    }
    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(clap::builder::PossibleValue::new(match self {
            VerifyFailAction::Off => "false",
            VerifyFailAction::Log => "log",
            VerifyFailAction::Pause => "pause",
            VerifyFailAction::Exit => "exit",
        }))
    }
}

pub fn build_effective_config(global: RawConfig, cli: CliArgs) -> Result<EffectiveConfig> {
    let input_roots = if let Some(roots) = &cli.roots {
        roots.split(',').map(PathBuf::from).collect()
    } else {
        global.input_roots.clone()
    };

    let rotation_rules = global
        .rotation_patterns
        .iter()
        .map(|(pattern, rotation)| {
            let regex = Regex::new(pattern)
                .map_err(|e| OrchestratorError::Config(format!("invalid rotation pattern {pattern}: {e}")))?;
            let degrees: u16 = rotation
                .parse()
                .map_err(|_| OrchestratorError::Config(format!("invalid rotation degrees: {rotation}")))?;
            let rotation = parse_rotation(degrees)
                .ok_or_else(|| OrchestratorError::Config(format!("unsupported rotation: {degrees}")))?;
            Ok((regex, rotation))
        })
        .collect::<Result<Vec<_>>>()?;

    let baseline_rate = match cli.bps.as_ref().or(global.bps.as_ref()) {
        Some(bps) => {
            let spec = RawRateSpec {
                bps: Some(bps.clone()),
                minrate: cli.minrate.clone().or_else(|| global.minrate.clone()),
                maxrate: cli.maxrate.clone().or_else(|| global.maxrate.clone()),
                cap: global.rate_cap.clone(),
            };
            Some(spec.resolve()?)
        }
        None => None,
    };

    let cli_forced_gpu = if cli.gpu {
        Some(true)
    } else if cli.cpu {
        Some(false)
    } else {
        None
    };

    let quality_mode = cli.quality_mode.or(global.quality_mode).unwrap_or(QualityMode::Cq);
    let baseline_cq = cli.quality.or(global.quality).unwrap_or(28);

    let camera_include: Vec<String> = if let Some(camera) = &cli.camera {
        camera.split(',').map(|s| s.trim().to_string()).collect()
    } else {
        global.camera_include.clone()
    };

    let root_overrides = global
        .root_overrides
        .into_iter()
        .map(|(root, doc)| RootOverrideEntry { root, doc })
        .collect();

    let config = EffectiveConfig {
        input_roots,
        output_mapping: if global.output_roots.is_empty() {
            RootMapping::Suffix(global.output_suffix.clone().unwrap_or_else(|| "_out".into()))
        } else {
            RootMapping::Explicit(global.output_roots.clone())
        },
        error_mapping: if global.error_roots.is_empty() {
            RootMapping::Suffix(global.error_suffix.clone().unwrap_or_else(|| "_err".into()))
        } else {
            RootMapping::Explicit(global.error_roots.clone())
        },
        extensions: if global.extensions.is_empty() {
            vec!["mp4", "mkv", "mov", "avi", "m4v"].into_iter().map(String::from).collect()
        } else {
            global.extensions.clone()
        },
        min_size_bytes: cli.min_size.unwrap_or_else(|| global.min_size_mb.unwrap_or(50) * 1024 * 1024),
        min_compression_ratio: cli.min_ratio.or(global.min_ratio).unwrap_or(0.1),
        quality_mode,
        baseline_cq,
        baseline_rate,
        target_codec: cli.target_codec.or(global.target_codec).unwrap_or_default(),
        output_container: global
            .container
            .as_deref()
            .and_then(OutputContainer::from_str_loose)
            .unwrap_or_default(),
        camera_patterns: global.camera_patterns,
        camera_include,
        skip_target_codec: cli.skip_av1 || global.skip_target_codec,
        rotation_rules,
        manual_rotation: if cli.rotate_180 {
            Some(Rotation::R180)
        } else {
            global.manual_rotation.and_then(parse_rotation)
        },
        cpu_fallback: cli.cpu || global.cpu_fallback,
        gpu_mode: cli_forced_gpu.unwrap_or(true),
        max_threads_start: cli.threads.or(global.threads).unwrap_or_else(num_cpus::get),
        runtime_min_threads: global.runtime_min_threads.unwrap_or(1),
        runtime_max_threads: global.runtime_max_threads.unwrap_or(8),
        prefetch_factor: global.prefetch_factor.unwrap_or(1).max(1),
        queue_sort: cli.queue_sort.or(global.queue_sort).unwrap_or(QueueSortMode::Name),
        queue_seed: cli.queue_seed.or(global.queue_seed),
        clean_errors_on_start: cli.clean_errors || global.clean_errors_on_start,
        verify_fail_action: cli.verify_fail_action.or(global.verify_fail_action).unwrap_or_default(),
        log_path: cli.log_path.or(global.log_path),
        root_overrides,
        demo: cli.demo,
        cli_forced_gpu,
        cli_forced_cq: cli.quality,
        cli_forced_rotation: if cli.rotate_180 { Some(Rotation::R180) } else { None },
        min_vmaf_score: cli.min_vmaf.or(global.min_vmaf_score),
    };

    config.validate()?;
    Ok(config)
}
