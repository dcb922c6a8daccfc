//! Scheduler/Orchestrator (§4.9): the submit-on-demand job queue and the
//! per-job finite-state-machine driver. Grounded on a
//! `processor.rs::Agent::run_loop()` pattern — a semaphore-gated spawn loop
//! with inline per-job-phase logging — adapted here from a DB-backed queue
//! to an in-memory `VecDeque` fed by the Scanner, and from a plain
//! semaphore to the `ConcurrencyController` (§4.9.3).
//!
//! Every in-flight job is a `tokio::spawn`ed task whose first action is
//! `ConcurrencyController::acquire()`. Admitting more tasks than
//! `max_threads` (bounded instead by `prefetch_factor * max_threads`, §4.9.4
//! I4) lets probing/metadata work proceed for jobs still waiting on a
//! transcode slot, while `acquire()` itself caps the number actually
//! transcoding at `max_threads` (I3).

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::colorfix::{apply_color_fix, needs_color_fix};
use crate::concurrency::{ConcurrencyController, Slot};
use crate::config::{EffectiveConfig, OutputContainer, QueueSortMode, TargetCodec, VerifyFailAction};
use crate::decision::{decide_quality, decide_rotation};
use crate::error::Result;
use crate::event_bus::{Event, EventBus};
use crate::housekeeping::error_marker_path_for;
use crate::metadata::{excluded_by_camera_filter, MetadataCache, MetadataTool};
use crate::model::{EncodeStats, JobStatus, VideoFile};
use crate::probe::{Prober, ENCODED_TAG_KEY};
use crate::quality::QualityScore;
use crate::scanner::Scanner;
use crate::transcoder::{TranscodeOutcome, TranscodeRequest, TranscoderProcess};

/// A discovered file waiting for a worker, plus a forced-CPU flag set when
/// this item is a hardware-capability-exceeded requeue (§4.9.1 step 10).
#[derive(Debug, Clone)]
pub struct PendingItem {
    pub file: VideoFile,
    pub forced_cpu: bool,
}

impl PendingItem {
    fn fresh(file: VideoFile) -> Self {
        Self { file, forced_cpu: false }
    }
}

/// Run-wide terminal counts, surfaced to the UI State Manager and to the
/// exit-code decision in `main` (§6).
#[derive(Debug, Clone, Default)]
pub struct RunCounters {
    pub completed: u64,
    pub kept_original: u64,
    pub failed: u64,
    pub hw_cap_exceeded: u64,
    pub skipped: u64,
    pub interrupted: u64,
    pub dropped: u64,
}

impl RunCounters {
    pub fn total(&self) -> u64 {
        self.completed + self.kept_original + self.failed + self.hw_cap_exceeded + self.skipped + self.interrupted
    }
}

/// Sorts `files` in place per the configured queue order (§4.9.6).
pub fn sort_pending(files: &mut [VideoFile], config: &EffectiveConfig) {
    match config.queue_sort {
        QueueSortMode::Name => files.sort_by(|a, b| a.path.cmp(&b.path)),
        QueueSortMode::Dir => files.sort_by(|a, b| {
            let ra = root_index(&a.path, &config.input_roots);
            let rb = root_index(&b.path, &config.input_roots);
            ra.cmp(&rb).then_with(|| a.path.cmp(&b.path))
        }),
        QueueSortMode::SizeAsc => files.sort_by_key(|f| f.size_bytes),
        QueueSortMode::Size | QueueSortMode::SizeDesc => {
            files.sort_by_key(|f| std::cmp::Reverse(f.size_bytes))
        }
        QueueSortMode::Ext => files.sort_by(|a, b| {
            let ea = extension_index(a, config);
            let eb = extension_index(b, config);
            ea.cmp(&eb).then_with(|| a.path.cmp(&b.path))
        }),
        QueueSortMode::Rand => match config.queue_seed {
            Some(seed) => files.shuffle(&mut StdRng::seed_from_u64(seed)),
            None => files.shuffle(&mut rand::thread_rng()),
        },
    }
}

fn root_index(path: &Path, roots: &[PathBuf]) -> usize {
    roots.iter().position(|root| path.starts_with(root)).unwrap_or(roots.len())
}

fn extension_index(file: &VideoFile, config: &EffectiveConfig) -> usize {
    let ext = file.path.extension().and_then(|e| e.to_str()).unwrap_or("");
    config.extensions.iter().position(|e| e.eq_ignore_ascii_case(ext)).unwrap_or(config.extensions.len())
}

/// Nearest-ancestor-wins match of `path` against the configured input roots,
/// mirroring `EffectiveConfig::root_override_for`'s longest-prefix rule.
fn matching_root<'a>(path: &Path, roots: &'a [PathBuf]) -> Option<&'a PathBuf> {
    roots.iter().filter(|root| path.starts_with(root)).max_by_key(|root| root.as_os_str().len())
}

fn output_path_for(path: &Path, root: &Path, config: &EffectiveConfig) -> PathBuf {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let mut output = config.output_mapping.resolve(root).join(relative);
    output.set_extension(config.output_container.extension());
    output
}

fn codec_matches_target(codec: &str, target: TargetCodec) -> bool {
    let aliases: &[&str] = match target {
        TargetCodec::Av1 => &["av1"],
        TargetCodec::Hevc => &["hevc", "h265"],
        TargetCodec::H264 => &["h264", "avc"],
    };
    aliases.iter().any(|a| codec.eq_ignore_ascii_case(a))
}

fn write_marker(path: &Path, reason: &str) {
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            warn!(path = %path.display(), error = %e, "failed to create error-marker directory");
            return;
        }
    }
    if let Err(e) = std::fs::write(path, reason) {
        warn!(path = %path.display(), error = %e, "failed to write error marker");
    }
}

/// Everything a single job's task needs, bundled so `spawn_job` can clone
/// cheaply (every field is an `Arc`).
#[derive(Clone)]
struct JobContext {
    config: Arc<EffectiveConfig>,
    bus: Arc<EventBus>,
    concurrency: Arc<ConcurrencyController>,
    cache: Arc<MetadataCache>,
    prober: Arc<dyn Prober>,
    metadata_tool: Arc<dyn MetadataTool>,
    transcoder: Arc<dyn TranscoderProcess>,
    paused: Arc<AtomicBool>,
    fatal: Arc<AtomicBool>,
}

struct JobRunResult {
    job_id: u64,
    status: JobStatus,
    requeue: Option<PendingItem>,
}

/// Handle the keyboard controller (or any other caller) uses to ask the
/// driver loop to rescan and fold new/removed files into the pending queue
/// (§4.9.5). A plain channel rather than direct queue access, since
/// `pending`/`in_flight`/`submitted_paths` are mutated only by the driver
/// thread (§5).
#[derive(Clone)]
pub struct RefreshHandle {
    tx: mpsc::UnboundedSender<()>,
}

impl RefreshHandle {
    pub fn request_refresh(&self) {
        let _ = self.tx.send(());
    }
}

pub struct Orchestrator {
    config: Arc<EffectiveConfig>,
    bus: Arc<EventBus>,
    concurrency: Arc<ConcurrencyController>,
    cache: Arc<MetadataCache>,
    prober: Arc<dyn Prober>,
    metadata_tool: Arc<dyn MetadataTool>,
    transcoder: Arc<dyn TranscoderProcess>,
    pending: VecDeque<PendingItem>,
    in_flight: HashSet<u64>,
    submitted_paths: HashSet<PathBuf>,
    next_job_id: u64,
    counters: RunCounters,
    paused: Arc<AtomicBool>,
    fatal: Arc<AtomicBool>,
    result_tx: mpsc::UnboundedSender<JobRunResult>,
    result_rx: mpsc::UnboundedReceiver<JobRunResult>,
    refresh_rx: mpsc::UnboundedReceiver<()>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<EffectiveConfig>,
        bus: Arc<EventBus>,
        concurrency: Arc<ConcurrencyController>,
        cache: Arc<MetadataCache>,
        prober: Arc<dyn Prober>,
        metadata_tool: Arc<dyn MetadataTool>,
        transcoder: Arc<dyn TranscoderProcess>,
    ) -> (Self, RefreshHandle) {
        let (result_tx, result_rx) = mpsc::unbounded_channel();
        let (refresh_tx, refresh_rx) = mpsc::unbounded_channel();
        let orchestrator = Self {
            config,
            bus,
            concurrency,
            cache,
            prober,
            metadata_tool,
            transcoder,
            pending: VecDeque::new(),
            in_flight: HashSet::new(),
            submitted_paths: HashSet::new(),
            next_job_id: 1,
            counters: RunCounters::default(),
            paused: Arc::new(AtomicBool::new(false)),
            fatal: Arc::new(AtomicBool::new(false)),
            result_tx,
            result_rx,
            refresh_rx,
        };
        (orchestrator, RefreshHandle { tx: refresh_tx })
    }

    fn context(&self) -> JobContext {
        JobContext {
            config: self.config.clone(),
            bus: self.bus.clone(),
            concurrency: self.concurrency.clone(),
            cache: self.cache.clone(),
            prober: self.prober.clone(),
            metadata_tool: self.metadata_tool.clone(),
            transcoder: self.transcoder.clone(),
            paused: self.paused.clone(),
            fatal: self.fatal.clone(),
        }
    }

    fn initial_scan(&mut self) {
        let report = Scanner::new(&self.config).scan();
        let mut files = report.found;
        sort_pending(&mut files, &self.config);
        for file in files {
            self.submitted_paths.insert(file.path.clone());
            self.pending.push_back(PendingItem::fresh(file));
        }
        self.bus.publish(Event::QueueUpdated { pending: self.pending.len(), in_flight: 0 });
    }

    /// Rescans every input root and folds in files not already known to this
    /// run. `removed` counts still-pending items whose source vanished from
    /// disk since the last scan (§4.9.5).
    fn refresh(&mut self) {
        let report = Scanner::new(&self.config).scan();
        let discovered: HashSet<PathBuf> = report.found.iter().map(|f| f.path.clone()).collect();

        let before = self.pending.len();
        self.pending.retain(|item| discovered.contains(&item.file.path) || item.forced_cpu);
        let removed = before - self.pending.len();

        let mut fresh: Vec<VideoFile> = report
            .found
            .into_iter()
            .filter(|f| !self.submitted_paths.contains(&f.path))
            .collect();
        sort_pending(&mut fresh, &self.config);
        let added = fresh.len();

        for file in fresh {
            self.submitted_paths.insert(file.path.clone());
            self.pending.push_back(PendingItem::fresh(file));
        }

        self.paused.store(false, Ordering::SeqCst);
        self.bus.publish(Event::RefreshFinished { added, removed });
        self.bus.publish(Event::QueueUpdated { pending: self.pending.len(), in_flight: self.in_flight.len() });
        info!(added, removed, "queue refreshed");
    }

    fn replenish(&mut self) {
        if self.concurrency.shutdown_requested() || self.paused.load(Ordering::SeqCst) {
            return;
        }
        let cap = self.config.prefetch_factor.max(1) * self.concurrency.max_threads();
        let mut admitted = false;
        while self.in_flight.len() < cap {
            let Some(item) = self.pending.pop_front() else { break };
            admitted = true;
            self.spawn_job(item);
        }
        if admitted {
            self.bus.publish(Event::QueueUpdated { pending: self.pending.len(), in_flight: self.in_flight.len() });
        }
    }

    fn spawn_job(&mut self, item: PendingItem) {
        let job_id = self.next_job_id;
        self.next_job_id += 1;
        self.in_flight.insert(job_id);

        let ctx = self.context();
        let tx = self.result_tx.clone();
        tokio::spawn(async move {
            let result = run_job(job_id, item, ctx).await;
            let _ = tx.send(result);
        });
    }

    fn handle_result(&mut self, result: JobRunResult) {
        self.in_flight.remove(&result.job_id);
        match result.status {
            JobStatus::Completed => self.counters.completed += 1,
            JobStatus::KeptOriginal => self.counters.kept_original += 1,
            JobStatus::Failed => self.counters.failed += 1,
            JobStatus::HwCapExceeded => self.counters.hw_cap_exceeded += 1,
            JobStatus::Skipped => self.counters.skipped += 1,
            JobStatus::Interrupted => self.counters.interrupted += 1,
            JobStatus::Pending => self.counters.dropped += 1,
            JobStatus::Processing => {}
        }
        if let Some(requeue) = result.requeue {
            self.pending.push_front(requeue);
        }
        self.bus.publish(Event::QueueUpdated { pending: self.pending.len(), in_flight: self.in_flight.len() });
    }

    /// Drives the queue to completion: replenishes in-flight work up to the
    /// prefetch cap, waits (bounded) for the next terminal result, and loops
    /// until both `pending` and `in_flight` are empty (I7), a fatal
    /// verify-on-complete action tears the run down early, or an immediate
    /// interrupt drains every in-flight job.
    pub async fn run(mut self) -> Result<RunCounters> {
        self.initial_scan();

        loop {
            while self.refresh_rx.try_recv().is_ok() {
                self.refresh();
            }

            if self.fatal.load(Ordering::SeqCst) && self.in_flight.is_empty() {
                break;
            }

            if !self.fatal.load(Ordering::SeqCst) {
                self.replenish();
            }

            if self.in_flight.is_empty() {
                // A graceful shutdown that is never toggled back off must
                // still let the run terminate with the deque frozen at its
                // current contents (§8 "graceful-shutdown... causes the run
                // to terminate") rather than spin forever waiting for a
                // `pending` that `replenish()` will never drain again.
                if self.pending.is_empty() || self.concurrency.shutdown_requested() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(200)).await;
                continue;
            }

            match tokio::time::timeout(Duration::from_secs(1), self.result_rx.recv()).await {
                Ok(Some(result)) => self.handle_result(result),
                Ok(None) => break,
                Err(_) => continue,
            }
        }

        Ok(self.counters.clone())
    }
}

/// The full per-job pipeline (§4.9.1): acquire a slot, probe, fix color
/// metadata if needed, decide quality/rotation, transcode, then finalize.
async fn run_job(job_id: u64, item: PendingItem, ctx: JobContext) -> JobRunResult {
    let path = item.file.path.clone();

    let root = matching_root(&path, &ctx.config.input_roots).cloned().unwrap_or_else(|| path.clone());
    let output_path = output_path_for(&path, &root, &ctx.config);
    let error_marker_path = error_marker_path_for(&output_path);

    macro_rules! fail {
        ($reason:expr) => {{
            let reason = $reason;
            write_marker(&error_marker_path, &reason);
            ctx.bus.publish(Event::JobFailed { job_id, reason: reason.clone() });
            ctx.bus.publish(Event::JobCompleted {
                job_id,
                status: JobStatus::Failed,
                stats: None,
                reason: Some(reason),
            });
            return JobRunResult { job_id, status: JobStatus::Failed, requeue: None };
        }};
    }

    if error_marker_path.exists() && !ctx.config.clean_errors_on_start {
        fail!("existing error marker from a prior run".to_string());
    }

    let metadata = match ctx.cache.get_or_extract(&path, ctx.prober.as_ref(), ctx.metadata_tool.as_ref(), &ctx.config).await {
        Ok(m) => m,
        Err(e) => fail!(format!("probe failed: {e}")),
    };

    let mut transcode_input = path.clone();
    let _color_fix_guard;
    if needs_color_fix(&metadata) {
        match apply_color_fix(&path, job_id).await {
            Ok(intermediate) => {
                transcode_input = intermediate.path().to_path_buf();
                _color_fix_guard = Some(intermediate);
            }
            Err(e) => fail!(format!("color-space remux failed: {e}")),
        }
    } else {
        _color_fix_guard = None;
    }

    if metadata.previously_encoded {
        if let Some(parent) = output_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if std::fs::rename(&path, &output_path).is_err() {
            if let Err(e) = std::fs::copy(&path, &output_path) {
                warn!(job_id, error = %e, "failed to relocate previously-encoded source");
            }
        }
        ctx.bus.publish(Event::JobCompleted {
            job_id,
            status: JobStatus::Completed,
            stats: None,
            reason: Some("already encoded".into()),
        });
        return JobRunResult { job_id, status: JobStatus::Completed, requeue: None };
    }

    if ctx.config.skip_target_codec && codec_matches_target(&metadata.codec, ctx.config.target_codec) {
        ctx.bus.publish(Event::JobCompleted {
            job_id,
            status: JobStatus::Skipped,
            stats: None,
            reason: Some("already at target codec".into()),
        });
        return JobRunResult { job_id, status: JobStatus::Skipped, requeue: None };
    }
    if excluded_by_camera_filter(&metadata, &ctx.config.camera_include) {
        ctx.bus.publish(Event::JobCompleted {
            job_id,
            status: JobStatus::Skipped,
            stats: None,
            reason: Some("excluded by camera filter".into()),
        });
        return JobRunResult { job_id, status: JobStatus::Skipped, requeue: None };
    }

    let quality = match decide_quality(&metadata, &ctx.config) {
        Ok(q) => q,
        Err(e) => fail!(format!("decision error: {e}")),
    };
    let rotation = decide_rotation(&path, &ctx.config);
    let gpu_mode = !item.forced_cpu && ctx.config.gpu_for(&path);

    // Only the transcode phase itself is gated by the concurrency bound
    // (I3); probing, the color-space pre-step, metadata fetch, and
    // filter/decision all run as soon as this job is admitted by
    // `replenish()`'s prefetch-factor cap (I4), so a `prefetch_factor > 1`
    // run lets that work proceed in parallel for jobs still waiting on a
    // transcode slot.
    let slot = match ctx.concurrency.acquire().await {
        Slot::Granted(guard) => guard,
        Slot::Dropped => {
            // Shutdown dropped us before a transcode slot was granted; put
            // the file back at the front of `pending` rather than losing it,
            // since toggling shutdown back off (§4.9.3) must be able to
            // resume it and `refresh()` won't re-add a `submitted_paths`
            // member on its own.
            return JobRunResult { job_id, status: JobStatus::Pending, requeue: Some(item) };
        }
    };
    ctx.bus.publish(Event::JobStateChanged { job_id, status: JobStatus::Processing });
    ctx.bus.publish(Event::JobStarted { job_id, path: path.clone() });

    let cancellation = ctx.concurrency.cancellation_token();
    let started = Instant::now();
    let bus_for_progress = ctx.bus.clone();
    let on_progress = move |pct: f64| {
        bus_for_progress.publish(Event::JobProgress { job_id, percentage: pct, time: format!("{pct:.1}%") });
    };

    let request = TranscodeRequest {
        job_id,
        input: &transcode_input,
        output: &output_path,
        rotation,
        quality: &quality,
        metadata: &metadata,
        gpu_mode,
        target_codec: ctx.config.target_codec,
        cpu_fallback_allowed: ctx.config.cpu_fallback,
        encoded_tag_value: "1",
    };

    let outcome = ctx.transcoder.transcode(request, cancellation, &on_progress).await;
    drop(slot);

    match outcome {
        Ok(TranscodeOutcome::Completed) => {
            if let Err(e) = ctx
                .metadata_tool
                .copy_preserved(&path, &output_path, &[(ENCODED_TAG_KEY.to_string(), "1".to_string())])
                .await
            {
                warn!(job_id, error = %e, "metadata copy failed, continuing");
                ctx.bus.publish(Event::ActionMessage(format!("job {job_id}: metadata copy failed: {e}")));
            }

            let output_size = std::fs::metadata(&output_path).map(|m| m.len()).unwrap_or(0);
            let input_size = item.file.size_bytes;
            let ratio = if input_size > 0 { output_size as f64 / input_size as f64 } else { 1.0 };
            let kept_original = (1.0 - ratio) < ctx.config.min_compression_ratio;

            let mut stats = EncodeStats::new(input_size, output_size, started, metadata.duration_secs);

            let mut status = if kept_original {
                let _ = std::fs::remove_file(&output_path);
                if let Err(e) = std::fs::copy(&path, &output_path) {
                    warn!(job_id, error = %e, "failed to restore original after min-ratio check");
                }
                stats.output_size_bytes = input_size;
                stats.compression_ratio = 0.0;
                JobStatus::KeptOriginal
            } else {
                JobStatus::Completed
            };

            // Only a genuinely re-encoded output carries the tag verify-on-complete
            // checks for; a min-ratio reversion already restored the untagged
            // source verbatim and is not itself a verify failure (§8).
            if matches!(status, JobStatus::Completed) {
                status = verify_on_complete(job_id, &ctx, &path, &output_path, status).await;
            }

            ctx.bus.publish(Event::JobCompleted { job_id, status, stats: Some(stats), reason: None });
            JobRunResult { job_id, status, requeue: None }
        }
        Ok(TranscodeOutcome::HwCapExceeded) => {
            if ctx.config.cpu_fallback && !item.forced_cpu {
                info!(job_id, "hardware capability exceeded, requeuing with CPU fallback");
                JobRunResult {
                    job_id,
                    status: JobStatus::Pending,
                    requeue: Some(PendingItem { file: item.file, forced_cpu: true }),
                }
            } else {
                let reason = "hardware capability exceeded".to_string();
                write_marker(&error_marker_path, &reason);
                ctx.bus.publish(Event::HardwareCapabilityExceeded { job_id, message: reason.clone() });
                ctx.bus.publish(Event::JobCompleted {
                    job_id,
                    status: JobStatus::HwCapExceeded,
                    stats: None,
                    reason: Some(reason),
                });
                JobRunResult { job_id, status: JobStatus::HwCapExceeded, requeue: None }
            }
        }
        Ok(TranscodeOutcome::Interrupted) => {
            ctx.bus.publish(Event::JobFailed { job_id, reason: "interrupted".into() });
            ctx.bus.publish(Event::JobCompleted {
                job_id,
                status: JobStatus::Interrupted,
                stats: None,
                reason: Some("interrupted".into()),
            });
            JobRunResult { job_id, status: JobStatus::Interrupted, requeue: None }
        }
        Err(e) => {
            let reason = e.to_string();
            write_marker(&error_marker_path, &reason);
            ctx.bus.publish(Event::JobFailed { job_id, reason: reason.clone() });
            ctx.bus.publish(Event::JobCompleted {
                job_id,
                status: JobStatus::Failed,
                stats: None,
                reason: Some(reason),
            });
            JobRunResult { job_id, status: JobStatus::Failed, requeue: None }
        }
    }
}

/// Step 14: asserts the preserved custom tag survived the encode and,
/// if `min_vmaf_score` is configured, that the objective quality gate
/// passes too. `verify_fail_action` decides what a failed check does to
/// the job and to the run as a whole (§9 Open Question: non-interactive
/// `pause` freezes admission until a refresh or shutdown event, rather
/// than failing the job outright).
async fn verify_on_complete(job_id: u64, ctx: &JobContext, source: &Path, output: &Path, current: JobStatus) -> JobStatus {
    if ctx.config.verify_fail_action == VerifyFailAction::Off {
        return current;
    }

    let passed = match ctx.prober.probe(output).await {
        Ok(meta) if meta.previously_encoded => match ctx.config.min_vmaf_score {
            Some(min_vmaf) => match QualityScore::compute(source, output).await {
                Ok(score) => score.vmaf.map(|v| v >= min_vmaf).unwrap_or(true),
                Err(e) => {
                    warn!(job_id, error = %e, "quality-score check failed");
                    false
                }
            },
            None => true,
        },
        Ok(_) => false,
        Err(_) => false,
    };

    if passed {
        return current;
    }

    match ctx.config.verify_fail_action {
        VerifyFailAction::Off => current,
        VerifyFailAction::Log => {
            warn!(job_id, "verify-on-complete failed, marking job failed");
            JobStatus::Failed
        }
        VerifyFailAction::Pause => {
            ctx.paused.store(true, Ordering::SeqCst);
            ctx.bus.publish(Event::PauseRequested { job_id });
            current
        }
        VerifyFailAction::Exit => {
            ctx.fatal.store(true, Ordering::SeqCst);
            ctx.bus.publish(Event::FatalRequested { reason: format!("verify-on-complete failed for job {job_id}") });
            current
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{QualityMode, RootMapping};

    fn base_config(roots: Vec<PathBuf>) -> EffectiveConfig {
        EffectiveConfig {
            input_roots: roots,
            output_mapping: RootMapping::Suffix("_out".into()),
            error_mapping: RootMapping::Suffix("_err".into()),
            extensions: vec!["mp4".into(), "mov".into()],
            min_size_bytes: 0,
            min_compression_ratio: 0.1,
            quality_mode: QualityMode::Cq,
            baseline_cq: 28,
            baseline_rate: None,
            target_codec: TargetCodec::Hevc,
            output_container: OutputContainer::default(),
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
            clean_errors_on_start: false,
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

    fn file(path: &str, size: u64) -> VideoFile {
        VideoFile::new(PathBuf::from(path), size)
    }

    #[test]
    fn name_sort_is_lexicographic() {
        let config = base_config(vec![]);
        let mut files = vec![file("/in/b.mp4", 1), file("/in/a.mp4", 1)];
        sort_pending(&mut files, &config);
        assert_eq!(files[0].path, PathBuf::from("/in/a.mp4"));
    }

    #[test]
    fn size_desc_sorts_largest_first() {
        let mut config = base_config(vec![]);
        config.queue_sort = QueueSortMode::Size;
        let mut files = vec![file("/in/small.mp4", 10), file("/in/big.mp4", 100)];
        sort_pending(&mut files, &config);
        assert_eq!(files[0].path, PathBuf::from("/in/big.mp4"));
    }

    #[test]
    fn size_asc_sorts_smallest_first() {
        let mut config = base_config(vec![]);
        config.queue_sort = QueueSortMode::SizeAsc;
        let mut files = vec![file("/in/big.mp4", 100), file("/in/small.mp4", 10)];
        sort_pending(&mut files, &config);
        assert_eq!(files[0].path, PathBuf::from("/in/small.mp4"));
    }

    #[test]
    fn dir_sort_groups_by_input_root_order() {
        let mut config = base_config(vec![PathBuf::from("/root_b"), PathBuf::from("/root_a")]);
        config.queue_sort = QueueSortMode::Dir;
        let mut files = vec![file("/root_a/z.mp4", 1), file("/root_b/a.mp4", 1)];
        sort_pending(&mut files, &config);
        assert_eq!(files[0].path, PathBuf::from("/root_b/a.mp4"));
    }

    #[test]
    fn ext_sort_groups_by_configured_extension_order() {
        let mut config = base_config(vec![]);
        config.queue_sort = QueueSortMode::Ext;
        let mut files = vec![file("/in/clip.mov", 1), file("/in/clip.mp4", 1)];
        sort_pending(&mut files, &config);
        assert_eq!(files[0].path, PathBuf::from("/in/clip.mp4"));
    }

    #[test]
    fn rand_sort_with_seed_is_deterministic() {
        let mut config = base_config(vec![]);
        config.queue_sort = QueueSortMode::Rand;
        config.queue_seed = Some(42);
        let original = vec![file("/in/a.mp4", 1), file("/in/b.mp4", 1), file("/in/c.mp4", 1), file("/in/d.mp4", 1)];

        let mut first = original.clone();
        sort_pending(&mut first, &config);
        let mut second = original;
        sort_pending(&mut second, &config);

        let first_paths: Vec<_> = first.iter().map(|f| f.path.clone()).collect();
        let second_paths: Vec<_> = second.iter().map(|f| f.path.clone()).collect();
        assert_eq!(first_paths, second_paths);
    }

    #[test]
    fn matching_root_picks_longest_prefix() {
        let roots = vec![PathBuf::from("/in"), PathBuf::from("/in/sub")];
        let found = matching_root(Path::new("/in/sub/clip.mp4"), &roots).unwrap();
        assert_eq!(found, &PathBuf::from("/in/sub"));
    }

    #[test]
    fn output_path_mirrors_relative_structure_under_suffix_root() {
        let config = base_config(vec![PathBuf::from("/in")]);
        let output = output_path_for(Path::new("/in/sub/clip.mov"), Path::new("/in"), &config);
        assert_eq!(output, PathBuf::from("/in_out/sub/clip.mp4"));
    }

    #[test]
    fn output_path_uses_configured_container_extension() {
        let mut config = base_config(vec![PathBuf::from("/in")]);
        config.output_container = OutputContainer::Mkv;
        let output = output_path_for(Path::new("/in/sub/clip.mov"), Path::new("/in"), &config);
        assert_eq!(output, PathBuf::from("/in_out/sub/clip.mkv"));
    }

    #[test]
    fn codec_matches_target_recognizes_aliases() {
        assert!(codec_matches_target("h265", TargetCodec::Hevc));
        assert!(codec_matches_target("avc", TargetCodec::H264));
        assert!(!codec_matches_target("vp9", TargetCodec::Av1));
    }
}
