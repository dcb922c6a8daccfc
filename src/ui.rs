//! UI State & Manager (§4.10): a view-model behind a single lock, fed by
//! Event Bus subscriptions, read by a `ratatui` renderer tick (or, with
//! `--no-ui`, a periodic plain-log summary). Shape follows a dashboard
//! view-model (stat cards, an activity table with live progress, a log
//! viewer) with a `ferrexctl`-style `render()` layout for the `ratatui`
//! widget tree; the event-to-state wiring collapses a server-push match
//! into a `Mutex`-guarded struct instead of a browser signal store.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Gauge, List, ListItem, Paragraph, Wrap};
use ratatui::Frame;
use tracing::field::Visit;
use tracing::info;
use tracing_subscriber::Layer;

use crate::concurrency::ConcurrencyController;
use crate::event_bus::{Event, EventBus, EventKind, OverlayTab};
use crate::model::JobStatus;

const RECENT_JOBS_CAPACITY: usize = 5;
const LAST_ACTION_TTL: Duration = Duration::from_secs(60);
const LOGS_PAGE_SIZE: usize = 20;
const LOG_RING_CAPACITY: usize = 500;

struct ActiveJob {
    path: PathBuf,
    percentage: f64,
}

struct RecentJob {
    path: PathBuf,
    status: JobStatus,
    reason: Option<String>,
    compression_ratio: Option<f64>,
    encode_speed: Option<f64>,
}

struct Inner {
    completed: u64,
    kept_original: u64,
    failed: u64,
    hw_cap_exceeded: u64,
    skipped: u64,
    interrupted: u64,
    pending: usize,
    in_flight: usize,
    active_jobs: HashMap<u64, ActiveJob>,
    recent_jobs: VecDeque<RecentJob>,
    last_action: Option<(String, Instant)>,
    overlay: Option<OverlayTab>,
    logs_page: usize,
    throughput_started: Instant,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            completed: 0,
            kept_original: 0,
            failed: 0,
            hw_cap_exceeded: 0,
            skipped: 0,
            interrupted: 0,
            pending: 0,
            in_flight: 0,
            active_jobs: HashMap::new(),
            recent_jobs: VecDeque::with_capacity(RECENT_JOBS_CAPACITY),
            last_action: None,
            overlay: None,
            logs_page: 0,
            throughput_started: Instant::now(),
        }
    }
}

/// A point-in-time copy of `UiState`, cheap to hand to the renderer each
/// tick without holding the lock across a draw call (§5 "UI State mutated
/// only inside its own lock").
pub struct UiSnapshot {
    pub completed: u64,
    pub kept_original: u64,
    pub failed: u64,
    pub hw_cap_exceeded: u64,
    pub skipped: u64,
    pub interrupted: u64,
    pub pending: usize,
    pub in_flight: usize,
    pub current_threads: usize,
    pub active_jobs: Vec<(u64, PathBuf, f64)>,
    pub recent_jobs: Vec<String>,
    pub last_action: Option<String>,
    pub overlay: Option<OverlayTab>,
    pub logs_page: usize,
    pub jobs_per_minute: f64,
    pub logs: Vec<String>,
}

/// Shared view-model. Owns no event-bus subscriptions itself; `install`
/// registers the closures that mutate it as events arrive.
pub struct UiState {
    inner: Mutex<Inner>,
    concurrency: Arc<ConcurrencyController>,
    logs: Arc<LogRing>,
    finished: AtomicBool,
}

impl UiState {
    pub fn new(concurrency: Arc<ConcurrencyController>, logs: Arc<LogRing>) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner::default()),
            concurrency,
            logs,
            finished: AtomicBool::new(false),
        })
    }

    /// Subscribes to every event kind the view-model cares about. Handlers
    /// run synchronously on the publisher's thread (§4.1), so each one
    /// takes the lock, mutates, and releases it immediately.
    pub fn install(self: &Arc<Self>, bus: &EventBus) {
        let state = self.clone();
        bus.subscribe(
            EventKind::JobStarted,
            Arc::new(move |event| {
                if let Event::JobStarted { job_id, path } = event {
                    let mut inner = state.inner.lock().unwrap();
                    inner.active_jobs.insert(*job_id, ActiveJob { path: path.clone(), percentage: 0.0 });
                }
            }),
        );

        let state = self.clone();
        bus.subscribe(
            EventKind::JobProgress,
            Arc::new(move |event| {
                if let Event::JobProgress { job_id, percentage, .. } = event {
                    let mut inner = state.inner.lock().unwrap();
                    if let Some(job) = inner.active_jobs.get_mut(job_id) {
                        job.percentage = *percentage;
                    }
                }
            }),
        );

        let state = self.clone();
        bus.subscribe(
            EventKind::JobCompleted,
            Arc::new(move |event| {
                if let Event::JobCompleted { job_id, status, stats, reason } = event {
                    let mut inner = state.inner.lock().unwrap();
                    let path = inner.active_jobs.remove(job_id).map(|j| j.path).unwrap_or_default();

                    match status {
                        JobStatus::Completed => inner.completed += 1,
                        JobStatus::KeptOriginal => inner.kept_original += 1,
                        JobStatus::Failed => inner.failed += 1,
                        JobStatus::HwCapExceeded => inner.hw_cap_exceeded += 1,
                        JobStatus::Skipped => inner.skipped += 1,
                        JobStatus::Interrupted => inner.interrupted += 1,
                        JobStatus::Pending | JobStatus::Processing => {}
                    }

                    if inner.recent_jobs.len() == RECENT_JOBS_CAPACITY {
                        inner.recent_jobs.pop_front();
                    }
                    inner.recent_jobs.push_back(RecentJob {
                        path,
                        status: *status,
                        reason: reason.clone(),
                        compression_ratio: stats.as_ref().map(|s| s.compression_ratio),
                        encode_speed: stats.as_ref().map(|s| s.encode_speed),
                    });
                }
            }),
        );

        let state = self.clone();
        bus.subscribe(
            EventKind::QueueUpdated,
            Arc::new(move |event| {
                if let Event::QueueUpdated { pending, in_flight } = event {
                    let mut inner = state.inner.lock().unwrap();
                    inner.pending = *pending;
                    inner.in_flight = *in_flight;
                }
            }),
        );

        let state = self.clone();
        bus.subscribe(
            EventKind::ActionMessage,
            Arc::new(move |event| {
                if let Event::ActionMessage(message) = event {
                    let mut inner = state.inner.lock().unwrap();
                    inner.last_action = Some((message.clone(), Instant::now()));
                }
            }),
        );

        let state = self.clone();
        bus.subscribe(
            EventKind::OverlayTab,
            Arc::new(move |event| {
                if let Event::OverlayTab(tab) = event {
                    state.inner.lock().unwrap().overlay = Some(*tab);
                }
            }),
        );

        let state = self.clone();
        bus.subscribe(
            EventKind::OverlayCycle,
            Arc::new(move |_| {
                let mut inner = state.inner.lock().unwrap();
                let next_index = match inner.overlay {
                    Some(current) => {
                        let pos = OverlayTab::ORDER.iter().position(|t| *t == current).unwrap_or(0);
                        (pos + 1) % OverlayTab::ORDER.len()
                    }
                    None => 0,
                };
                inner.overlay = Some(OverlayTab::ORDER[next_index]);
            }),
        );

        let state = self.clone();
        bus.subscribe(
            EventKind::OverlayClosed,
            Arc::new(move |_| {
                let mut inner = state.inner.lock().unwrap();
                inner.overlay = None;
                inner.logs_page = 0;
            }),
        );

        let state = self.clone();
        bus.subscribe(
            EventKind::LogsPaginate,
            Arc::new(move |event| {
                if let Event::LogsPaginate(delta) = event {
                    let mut inner = state.inner.lock().unwrap();
                    let current = inner.logs_page as i64;
                    inner.logs_page = (current + *delta as i64).max(0) as usize;
                }
            }),
        );
    }

    pub fn mark_finished(&self) {
        self.finished.store(true, Ordering::SeqCst);
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> UiSnapshot {
        let inner = self.inner.lock().unwrap();

        let last_action = inner.last_action.as_ref().and_then(|(message, when)| {
            if when.elapsed() < LAST_ACTION_TTL {
                Some(message.clone())
            } else {
                None
            }
        });

        let elapsed_minutes = inner.throughput_started.elapsed().as_secs_f64() / 60.0;
        let completed_so_far = (inner.completed + inner.kept_original) as f64;
        let jobs_per_minute = if elapsed_minutes > 0.0 { completed_so_far / elapsed_minutes } else { 0.0 };

        let all_logs = self.logs.snapshot();
        let total_pages = ((all_logs.len() + LOGS_PAGE_SIZE - 1) / LOGS_PAGE_SIZE).max(1);
        let page = inner.logs_page.min(total_pages - 1);
        let start = all_logs.len().saturating_sub((page + 1) * LOGS_PAGE_SIZE);
        let end = all_logs.len().saturating_sub(page * LOGS_PAGE_SIZE);
        let logs = all_logs[start..end].to_vec();

        UiSnapshot {
            completed: inner.completed,
            kept_original: inner.kept_original,
            failed: inner.failed,
            hw_cap_exceeded: inner.hw_cap_exceeded,
            skipped: inner.skipped,
            interrupted: inner.interrupted,
            pending: inner.pending,
            in_flight: inner.in_flight,
            current_threads: self.concurrency.max_threads(),
            active_jobs: inner.active_jobs.iter().map(|(id, job)| (*id, job.path.clone(), job.percentage)).collect(),
            recent_jobs: inner.recent_jobs.iter().map(describe_recent_job).collect(),
            last_action,
            overlay: inner.overlay,
            logs_page: page,
            jobs_per_minute,
            logs,
        }
    }
}

fn describe_recent_job(job: &RecentJob) -> String {
    let name = job.path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_else(|| job.path.display().to_string());
    let status = format!("{:?}", job.status);
    match (job.compression_ratio, job.encode_speed) {
        (Some(ratio), Some(speed)) => format!("{name} — {status} ({:.0}% smaller, {:.2}x realtime)", ratio * 100.0, speed),
        _ => match &job.reason {
            Some(reason) => format!("{name} — {status} ({reason})"),
            None => format!("{name} — {status}"),
        },
    }
}

/// Bounded ring buffer of formatted log lines, fed by `LogRingLayer`
/// (§10.1 "mirrored into the in-memory logs tab").
#[derive(Default)]
pub struct LogRing {
    lines: Mutex<VecDeque<String>>,
}

impl LogRing {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push(&self, line: String) {
        let mut lines = self.lines.lock().unwrap();
        if lines.len() == LOG_RING_CAPACITY {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    fn snapshot(&self) -> Vec<String> {
        self.lines.lock().unwrap().iter().cloned().collect()
    }
}

/// A `tracing_subscriber` layer that formats each event's `message` field
/// and appends it to a shared `LogRing`, so the TUI's logs overlay shows
/// the same stream a `--no-ui` run writes to stdout/`--log-path`.
pub struct LogRingLayer {
    ring: Arc<LogRing>,
}

impl LogRingLayer {
    pub fn new(ring: Arc<LogRing>) -> Self {
        Self { ring }
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: Option<String>,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{value:?}"));
        }
    }
}

impl<S> Layer<S> for LogRingLayer
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let message = visitor.message.unwrap_or_default();
        self.ring.push(format!("{:>5} {}", event.metadata().level(), message));
    }
}

/// Periodic plain-text summary used in place of the `ratatui` dashboard
/// when `--no-ui` is set. Ticks until `UiState::mark_finished` is called.
pub async fn run_plain_summary_loop(state: Arc<UiState>) {
    loop {
        if state.is_finished() {
            return;
        }
        let snap = state.snapshot();
        info!(
            completed = snap.completed,
            kept_original = snap.kept_original,
            failed = snap.failed,
            hw_cap_exceeded = snap.hw_cap_exceeded,
            skipped = snap.skipped,
            pending = snap.pending,
            in_flight = snap.in_flight,
            threads = snap.current_threads,
            rate = format!("{:.2}/min", snap.jobs_per_minute),
            "run summary"
        );
        tokio::time::sleep(Duration::from_secs(5)).await;
    }
}

/// Draws one frame of the dashboard from a snapshot. Grounded on
/// `ferrexctl`'s `render()`: a vertical split for body/footer, a nested
/// horizontal split for the main panels, with an overlay drawn last so it
/// paints over everything beneath it.
pub fn render(frame: &mut Frame, snapshot: &UiSnapshot) {
    let root = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(6), Constraint::Length(1)])
        .split(frame.size());

    render_stats(frame, root[0], snapshot);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
        .split(root[1]);
    render_active_jobs(frame, body[0], snapshot);
    render_recent_jobs(frame, body[1], snapshot);

    render_footer(frame, root[2], snapshot);

    if let Some(tab) = snapshot.overlay {
        render_overlay(frame, tab, snapshot);
    }
}

fn render_stats(frame: &mut Frame, area: Rect, snapshot: &UiSnapshot) {
    let text = Line::from(vec![
        Span::styled(format!(" {} ", snapshot.completed), Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)),
        Span::raw("completed  "),
        Span::styled(format!(" {} ", snapshot.kept_original), Style::default().fg(Color::Cyan)),
        Span::raw("kept  "),
        Span::styled(format!(" {} ", snapshot.failed), Style::default().fg(Color::Red).add_modifier(Modifier::BOLD)),
        Span::raw("failed  "),
        Span::styled(format!(" {} ", snapshot.hw_cap_exceeded), Style::default().fg(Color::Magenta)),
        Span::raw("hw-cap  "),
        Span::styled(format!(" {} ", snapshot.skipped), Style::default().fg(Color::DarkGray)),
        Span::raw("skipped  |  "),
        Span::styled(format!("{} threads", snapshot.current_threads), Style::default().fg(Color::Yellow)),
        Span::raw(format!("  pending {} in-flight {}", snapshot.pending, snapshot.in_flight)),
    ]);
    let paragraph = Paragraph::new(text).block(Block::default().borders(Borders::ALL).title("reelforge"));
    frame.render_widget(paragraph, area);
}

fn render_active_jobs(frame: &mut Frame, area: Rect, snapshot: &UiSnapshot) {
    let block = Block::default().borders(Borders::ALL).title("active");
    let inner = block.inner(area);
    frame.render_widget(block, area);

    if snapshot.active_jobs.is_empty() {
        frame.render_widget(Paragraph::new("no jobs in flight"), inner);
        return;
    }

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints(vec![Constraint::Length(1); snapshot.active_jobs.len().min(inner.height as usize).max(1)])
        .split(inner);

    for (row, (_, path, percentage)) in rows.iter().zip(snapshot.active_jobs.iter()) {
        let label = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_else(|| path.display().to_string());
        let gauge = Gauge::default()
            .label(label)
            .ratio((percentage / 100.0).clamp(0.0, 1.0))
            .gauge_style(Style::default().fg(Color::Cyan));
        frame.render_widget(gauge, *row);
    }
}

fn render_recent_jobs(frame: &mut Frame, area: Rect, snapshot: &UiSnapshot) {
    let items: Vec<ListItem> = snapshot.recent_jobs.iter().map(|line| ListItem::new(line.as_str())).collect();
    let list = List::new(items).block(Block::default().borders(Borders::ALL).title("recent"));
    frame.render_widget(list, area);
}

fn render_footer(frame: &mut Frame, area: Rect, snapshot: &UiSnapshot) {
    let text = snapshot.last_action.clone().unwrap_or_else(|| {
        "`,`/`.` threads  `s` shutdown  `r` refresh  `c f m e l t` tabs  ^C interrupt".to_string()
    });
    frame.render_widget(Paragraph::new(text), area);
}

fn render_overlay(frame: &mut Frame, tab: OverlayTab, snapshot: &UiSnapshot) {
    let area = centered_rect(70, 70, frame.size());
    let title = match tab {
        OverlayTab::Config => "config",
        OverlayTab::FfmpegArgs => "ffmpeg args",
        OverlayTab::Metadata => "metadata",
        OverlayTab::Errors => "errors",
        OverlayTab::Logs => "logs",
        OverlayTab::Threads => "threads",
    };
    let block = Block::default().borders(Borders::ALL).title(format!("{title} (Esc to close)"));

    let body = match tab {
        OverlayTab::Logs => {
            let mut text = snapshot.logs.join("\n");
            if text.is_empty() {
                text = "(no log lines yet)".to_string();
            }
            format!("page {}\n{text}", snapshot.logs_page + 1)
        }
        OverlayTab::Threads => format!(
            "current: {}\npending: {}\nin-flight: {}\nthroughput: {:.2}/min",
            snapshot.current_threads, snapshot.pending, snapshot.in_flight, snapshot.jobs_per_minute
        ),
        OverlayTab::Errors => snapshot
            .recent_jobs
            .iter()
            .filter(|line| line.contains("Failed") || line.contains("HwCapExceeded"))
            .cloned()
            .collect::<Vec<_>>()
            .join("\n"),
        _ => "(nothing to show outside a live run)".to_string(),
    };

    let paragraph = Paragraph::new(body).wrap(Wrap { trim: false }).block(block);
    frame.render_widget(ratatui::widgets::Clear, area);
    frame.render_widget(paragraph, area);
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);
    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vertical[1])[1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EncodeStats;
    use std::time::Instant as StdInstant;

    fn state() -> Arc<UiState> {
        UiState::new(Arc::new(ConcurrencyController::new(2, 8)), LogRing::new())
    }

    #[test]
    fn job_started_then_progress_tracks_active_job() {
        let state = state();
        let bus = EventBus::new();
        state.install(&bus);

        bus.publish(Event::JobStarted { job_id: 1, path: PathBuf::from("/in/a.mp4") });
        bus.publish(Event::JobProgress { job_id: 1, percentage: 42.0, time: "42%".into() });

        let snap = state.snapshot();
        assert_eq!(snap.active_jobs.len(), 1);
        assert_eq!(snap.active_jobs[0].2, 42.0);
    }

    #[test]
    fn job_completed_moves_from_active_to_recent_and_bumps_counters() {
        let state = state();
        let bus = EventBus::new();
        state.install(&bus);

        bus.publish(Event::JobStarted { job_id: 1, path: PathBuf::from("/in/a.mp4") });
        bus.publish(Event::JobCompleted {
            job_id: 1,
            status: JobStatus::Completed,
            stats: Some(EncodeStats::new(1000, 400, StdInstant::now(), 10.0)),
            reason: None,
        });

        let snap = state.snapshot();
        assert!(snap.active_jobs.is_empty());
        assert_eq!(snap.completed, 1);
        assert_eq!(snap.recent_jobs.len(), 1);
    }

    #[test]
    fn recent_jobs_deque_is_bounded() {
        let state = state();
        let bus = EventBus::new();
        state.install(&bus);

        for i in 0..10u64 {
            bus.publish(Event::JobCompleted {
                job_id: i,
                status: JobStatus::Completed,
                stats: None,
                reason: None,
            });
        }

        assert_eq!(state.snapshot().recent_jobs.len(), RECENT_JOBS_CAPACITY);
    }

    #[test]
    fn overlay_cycle_advances_through_fixed_order_and_closes_on_escape() {
        let state = state();
        let bus = EventBus::new();
        state.install(&bus);

        bus.publish(Event::OverlayCycle);
        assert_eq!(state.snapshot().overlay, Some(OverlayTab::Config));
        bus.publish(Event::OverlayCycle);
        assert_eq!(state.snapshot().overlay, Some(OverlayTab::FfmpegArgs));

        bus.publish(Event::OverlayClosed);
        assert_eq!(state.snapshot().overlay, None);
    }

    #[test]
    fn logs_paginate_does_not_go_negative() {
        let state = state();
        let bus = EventBus::new();
        state.install(&bus);

        bus.publish(Event::LogsPaginate(-1));
        assert_eq!(state.snapshot().logs_page, 0);
    }

    #[test]
    fn log_ring_is_bounded_and_formats_level() {
        let ring = LogRing::new();
        for i in 0..(LOG_RING_CAPACITY + 5) {
            ring.push(format!("line {i}"));
        }
        let snap = ring.snapshot();
        assert_eq!(snap.len(), LOG_RING_CAPACITY);
        assert_eq!(snap.last().unwrap(), &format!("line {}", LOG_RING_CAPACITY + 4));
    }
}
