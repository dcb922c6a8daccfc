//! Core data model: VideoFile, Metadata, Job and the tagged-variant
//! decisions that replace the ad-hoc dictionaries a dynamic implementation
//! would reach for (§9 "Duck-typed config objects").

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// The process-wide cancellation token the Transcoder Adapter consumes
/// (§4.5, §4.9.3 "immediate interrupt"). Cloning shares the same flag;
/// there is exactly one of these per run, held by the Concurrency
/// Controller and handed to every in-flight transcode.
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A file discovered by the Scanner. Created once, mutated only to attach
/// `Metadata` (I5: the cache is monotonic, so this only ever happens once).
#[derive(Debug, Clone)]
pub struct VideoFile {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub metadata: Option<Metadata>,
}

impl VideoFile {
    pub fn new(path: PathBuf, size_bytes: u64) -> Self {
        Self {
            path,
            size_bytes,
            metadata: None,
        }
    }
}

/// Color-space sentinel used by some cameras/containers to mean "unset,
/// reserved for future use". The color-space pre-step (§4.9.2) fires on
/// this exact value for a known-problematic codec.
pub const COLOR_SPACE_RESERVED: &str = "reserved";

#[derive(Debug, Clone)]
pub struct Metadata {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub codec: String,
    /// `None` when the probe couldn't determine one; `Some("reserved")` is
    /// the sentinel tested by the color-space pre-step.
    pub color_space: Option<String>,
    pub duration_secs: f64,
    pub source_bitrate_kbps: Option<u64>,
    pub camera_model: Option<String>,
    /// Set when the custom tag this system writes on its own outputs is
    /// present, i.e. the source was "previously encoded" by a prior run.
    pub previously_encoded: bool,
    /// Per-camera quality override resolved during metadata extraction
    /// (carried through from whichever camera pattern matched).
    pub quality_override: Option<crate::config::QualityOverride>,
    /// ffprobe's `color_transfer` tag, used only to decide whether the HDR
    /// tonemap filter applies (§11 "HDR-aware color tagging").
    pub color_transfer: Option<String>,
    /// Source audio stream's codec name, `None` when there is no audio
    /// stream. Drives the fixed audio policy (§6), which is independent of
    /// `codec` (the video codec).
    pub audio_codec: Option<String>,
}

impl Metadata {
    /// PQ (`smpte2084`) or HLG (`arib-std-b67`) transfer characteristics.
    pub fn is_hdr(&self) -> bool {
        matches!(self.color_transfer.as_deref(), Some("smpte2084") | Some("arib-std-b67"))
    }
}

/// Rotation decided for a job. A legacy bare-integer form is rejected at
/// config load (§9); this is the only representation past that boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    #[default]
    None,
    R90,
    R180,
    R270,
}

impl Rotation {
    pub fn degrees(&self) -> u16 {
        match self {
            Rotation::None => 0,
            Rotation::R90 => 90,
            Rotation::R180 => 180,
            Rotation::R270 => 270,
        }
    }
}

/// Resolved quality target for a job (§4.8, §9).
#[derive(Debug, Clone)]
pub enum QualityDecision {
    Cq(u8),
    Rate {
        bps: u64,
        minrate: Option<u64>,
        maxrate: Option<u64>,
    },
}

/// Terminal and in-flight states of a Job (§4.9.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    KeptOriginal,
    Failed,
    HwCapExceeded,
    Skipped,
    Interrupted,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Pending | JobStatus::Processing)
    }
}

/// A unit of work bound to exactly one `VideoFile` (§3).
#[derive(Debug, Clone)]
pub struct Job {
    pub id: u64,
    pub source: VideoFile,
    pub output_path: PathBuf,
    pub error_marker_path: PathBuf,
    pub quality: Option<QualityDecision>,
    pub rotation: Rotation,
    pub status: JobStatus,
    pub gpu_mode: bool,
}

impl Job {
    pub fn new(id: u64, source: VideoFile, output_path: PathBuf, error_marker_path: PathBuf, gpu_mode: bool) -> Self {
        Self {
            id,
            source,
            output_path,
            error_marker_path,
            quality: None,
            rotation: Rotation::None,
            status: JobStatus::Pending,
            gpu_mode,
        }
    }
}

/// Per-job encode statistics, attached to `JobCompleted` events (§11
/// "Encode statistics struct").
#[derive(Debug, Clone)]
pub struct EncodeStats {
    pub input_size_bytes: u64,
    pub output_size_bytes: u64,
    pub compression_ratio: f64,
    pub encode_time_seconds: f64,
    pub encode_speed: f64,
}

impl EncodeStats {
    pub fn new(input_size_bytes: u64, output_size_bytes: u64, started: Instant, duration_seconds: f64) -> Self {
        let compression_ratio = if input_size_bytes > 0 {
            1.0 - (output_size_bytes as f64 / input_size_bytes as f64)
        } else {
            0.0
        };
        let encode_time_seconds = started.elapsed().as_secs_f64();
        let encode_speed = if encode_time_seconds > 0.0 {
            duration_seconds / encode_time_seconds
        } else {
            0.0
        };
        Self {
            input_size_bytes,
            output_size_bytes,
            compression_ratio,
            encode_time_seconds,
            encode_speed,
        }
    }
}
