//! Keyboard Controller (§4.11): a dedicated input thread that translates
//! raw key presses into direct `ConcurrencyController`/`RefreshHandle` calls
//! and Event Bus publications, per the §6 mapping. Grounded on an
//! `EventSource` trait pattern in `cli/tui.rs`, which separates a live
//! `crossterm`-backed source from a scripted one so the mapping can be
//! driven in tests without a real tty.

use std::sync::Arc;
use std::time::Duration;

use crossterm::event::{self, Event as TermEvent, KeyCode, KeyEvent, KeyModifiers};
use tracing::info;

use crate::concurrency::ConcurrencyController;
use crate::config::EffectiveConfig;
use crate::event_bus::{Event, EventBus, OverlayTab};
use crate::orchestrator::RefreshHandle;

/// Source of raw terminal events, abstracted so the key mapping can be
/// exercised without a real tty.
pub trait EventSource: Send {
    fn next(&mut self, timeout: Duration) -> Option<TermEvent>;
}

pub struct CrosstermEventSource;

impl EventSource for CrosstermEventSource {
    fn next(&mut self, timeout: Duration) -> Option<TermEvent> {
        match event::poll(timeout) {
            Ok(true) => event::read().ok(),
            _ => None,
        }
    }
}

/// Replays a fixed script of key events, one per call, ignoring `timeout`.
/// Used by tests to drive `handle_key` deterministically.
pub struct ScriptedEventSource {
    events: std::vec::IntoIter<TermEvent>,
}

impl ScriptedEventSource {
    pub fn new(events: Vec<TermEvent>) -> Self {
        Self { events: events.into_iter() }
    }
}

impl EventSource for ScriptedEventSource {
    fn next(&mut self, _timeout: Duration) -> Option<TermEvent> {
        self.events.next()
    }
}

pub struct KeyboardController {
    config: Arc<EffectiveConfig>,
    bus: Arc<EventBus>,
    concurrency: Arc<ConcurrencyController>,
    refresh: RefreshHandle,
}

impl KeyboardController {
    pub fn new(
        config: Arc<EffectiveConfig>,
        bus: Arc<EventBus>,
        concurrency: Arc<ConcurrencyController>,
        refresh: RefreshHandle,
    ) -> Self {
        Self { config, bus, concurrency, refresh }
    }

    /// Spawns the dedicated OS thread (§5 "input thread ≠ worker threads").
    /// Runs until an immediate interrupt is observed, either because this
    /// controller issued one itself or because the Orchestrator's run loop
    /// finished and something else cancelled the token.
    pub fn spawn(self) -> std::thread::JoinHandle<()> {
        std::thread::spawn(move || self.run_with_source(&mut CrosstermEventSource))
    }

    pub fn run_with_source(&self, source: &mut dyn EventSource) {
        loop {
            if self.concurrency.is_interrupted() {
                return;
            }
            match source.next(Duration::from_millis(150)) {
                Some(TermEvent::Key(key)) => {
                    if self.handle_key(key) {
                        return;
                    }
                }
                Some(_) | None => {}
            }
        }
    }

    /// Applies one key press. Returns `true` only for the immediate
    /// interrupt, which ends the controller's own loop along with
    /// everything else (§5 "not toggleable").
    fn handle_key(&self, key: KeyEvent) -> bool {
        if key.modifiers.contains(KeyModifiers::CONTROL) && matches!(key.code, KeyCode::Char('c') | KeyCode::Char('C')) {
            self.concurrency.interrupt();
            self.announce("immediate interrupt requested".to_string());
            return true;
        }

        match key.code {
            KeyCode::Char(',') | KeyCode::Char('<') => self.adjust_threads(-1),
            KeyCode::Char('.') | KeyCode::Char('>') => self.adjust_threads(1),
            KeyCode::Char('s') | KeyCode::Char('S') => {
                let now_shutting_down = self.concurrency.toggle_shutdown();
                let message = if now_shutting_down {
                    "graceful shutdown requested"
                } else {
                    "graceful shutdown cancelled"
                };
                self.announce(message.to_string());
            }
            KeyCode::Char('r') | KeyCode::Char('R') => {
                self.refresh.request_refresh();
                self.announce("queue refresh requested".to_string());
            }
            KeyCode::Char('c') | KeyCode::Char('C') => self.open_tab(OverlayTab::Config),
            KeyCode::Char('f') | KeyCode::Char('F') => self.open_tab(OverlayTab::FfmpegArgs),
            KeyCode::Char('m') | KeyCode::Char('M') => self.open_tab(OverlayTab::Metadata),
            KeyCode::Char('e') | KeyCode::Char('E') => self.open_tab(OverlayTab::Errors),
            KeyCode::Char('l') | KeyCode::Char('L') => self.open_tab(OverlayTab::Logs),
            KeyCode::Char('t') | KeyCode::Char('T') => self.open_tab(OverlayTab::Threads),
            KeyCode::Tab => self.bus.publish(Event::OverlayCycle),
            KeyCode::Char('[') => self.bus.publish(Event::LogsPaginate(-1)),
            KeyCode::Char(']') => self.bus.publish(Event::LogsPaginate(1)),
            KeyCode::Esc => self.bus.publish(Event::OverlayClosed),
            _ => {}
        }
        false
    }

    fn adjust_threads(&self, delta: i64) {
        let current = self.concurrency.max_threads() as i64;
        let floor = self.config.runtime_min_threads.max(1) as i64;
        let target = (current + delta).max(floor) as usize;
        let applied = self.concurrency.set_max_threads(target);
        self.announce(format!("thread cap set to {applied}"));
    }

    fn open_tab(&self, tab: OverlayTab) {
        self.bus.publish(Event::OverlayTab(tab));
    }

    fn announce(&self, message: String) {
        info!("{message}");
        self.bus.publish(Event::ActionMessage(message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{QualityMode, QueueSortMode, RootMapping, TargetCodec, VerifyFailAction};
    use crate::orchestrator::Orchestrator;
    use std::path::PathBuf;
    use std::sync::Mutex;

    fn config(runtime_min: usize, runtime_max: usize, start: usize) -> Arc<EffectiveConfig> {
        Arc::new(EffectiveConfig {
            input_roots: vec![],
            output_mapping: RootMapping::Suffix("_out".into()),
            error_mapping: RootMapping::Suffix("_err".into()),
            extensions: vec!["mp4".into()],
            min_size_bytes: 0,
            min_compression_ratio: 0.1,
            quality_mode: QualityMode::Cq,
            baseline_cq: 28,
            baseline_rate: None,
            target_codec: TargetCodec::Hevc,
            output_container: crate::config::OutputContainer::default(),
            camera_patterns: vec![],
            camera_include: vec![],
            skip_target_codec: false,
            rotation_rules: vec![],
            manual_rotation: None,
            cpu_fallback: true,
            gpu_mode: false,
            max_threads_start: start,
            runtime_min_threads: runtime_min,
            runtime_max_threads: runtime_max,
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
        })
    }

    fn key(code: KeyCode) -> TermEvent {
        TermEvent::Key(KeyEvent::new(code, KeyModifiers::NONE))
    }

    fn key_ctrl(code: KeyCode) -> TermEvent {
        TermEvent::Key(KeyEvent::new(code, KeyModifiers::CONTROL))
    }

    fn refresh_handle() -> RefreshHandle {
        // Orchestrator::new hands back a RefreshHandle wired to a channel
        // it also owns the receiving end of; we only need the sender side
        // here, so the orchestrator itself is discarded immediately.
        use crate::event_bus::EventBus as Bus;
        use crate::metadata::MetadataCache;
        use std::sync::Arc as StdArc;

        struct NoopProber;
        #[async_trait::async_trait]
        impl crate::probe::Prober for NoopProber {
            async fn probe(&self, _path: &std::path::Path) -> crate::error::Result<crate::model::Metadata> {
                unreachable!("not invoked by keyboard tests")
            }
        }
        struct NoopMetadataTool;
        #[async_trait::async_trait]
        impl crate::metadata::MetadataTool for NoopMetadataTool {
            async fn extract(
                &self,
                _path: &std::path::Path,
                _camera_patterns: &[crate::config::CameraPattern],
            ) -> crate::error::Result<crate::metadata::ExifFields> {
                unreachable!()
            }
            async fn copy_preserved(
                &self,
                _source: &std::path::Path,
                _target: &std::path::Path,
                _extra_tags: &[(String, String)],
            ) -> crate::error::Result<()> {
                unreachable!()
            }
        }
        struct NoopTranscoder;
        #[async_trait::async_trait]
        impl crate::transcoder::TranscoderProcess for NoopTranscoder {
            async fn transcode(
                &self,
                _request: crate::transcoder::TranscodeRequest<'_>,
                _cancellation: crate::model::CancellationToken,
                _on_progress: &crate::transcoder::ProgressSink<'_>,
            ) -> crate::error::Result<crate::transcoder::TranscodeOutcome> {
                unreachable!()
            }
        }

        let (_orchestrator, handle) = Orchestrator::new(
            config(1, 8, 2),
            StdArc::new(Bus::new()),
            StdArc::new(ConcurrencyController::new(2, 8)),
            StdArc::new(MetadataCache::new()),
            StdArc::new(NoopProber),
            StdArc::new(NoopMetadataTool),
            StdArc::new(NoopTranscoder),
        );
        handle
    }

    #[test]
    fn decrement_and_increment_adjust_thread_cap_within_bounds() {
        let cfg = config(1, 8, 2);
        let concurrency = Arc::new(ConcurrencyController::new(2, 8));
        let bus = Arc::new(EventBus::new());
        let controller = KeyboardController::new(cfg, bus, concurrency.clone(), refresh_handle());

        controller.handle_key(KeyEvent::new(KeyCode::Char(','), KeyModifiers::NONE));
        assert_eq!(concurrency.max_threads(), 1);

        controller.handle_key(KeyEvent::new(KeyCode::Char(','), KeyModifiers::NONE));
        assert_eq!(concurrency.max_threads(), 1, "floor is runtime_min_threads");

        controller.handle_key(KeyEvent::new(KeyCode::Char('.'), KeyModifiers::NONE));
        assert_eq!(concurrency.max_threads(), 2);
    }

    #[test]
    fn s_toggles_graceful_shutdown() {
        let cfg = config(1, 8, 2);
        let concurrency = Arc::new(ConcurrencyController::new(2, 8));
        let bus = Arc::new(EventBus::new());
        let controller = KeyboardController::new(cfg, bus, concurrency.clone(), refresh_handle());

        controller.handle_key(KeyEvent::new(KeyCode::Char('s'), KeyModifiers::NONE));
        assert!(concurrency.shutdown_requested());
        controller.handle_key(KeyEvent::new(KeyCode::Char('S'), KeyModifiers::NONE));
        assert!(!concurrency.shutdown_requested());
    }

    #[test]
    fn ctrl_c_triggers_immediate_interrupt_and_stops_the_loop() {
        let cfg = config(1, 8, 2);
        let concurrency = Arc::new(ConcurrencyController::new(2, 8));
        let bus = Arc::new(EventBus::new());
        let controller = KeyboardController::new(cfg, bus, concurrency.clone(), refresh_handle());

        let stop = controller.handle_key(KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL));
        assert!(stop);
        assert!(concurrency.is_interrupted());
        assert!(concurrency.shutdown_requested());
    }

    #[test]
    fn overlay_and_pagination_keys_publish_expected_events() {
        let cfg = config(1, 8, 2);
        let concurrency = Arc::new(ConcurrencyController::new(2, 8));
        let bus = Arc::new(EventBus::new());
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

        let s = seen.clone();
        bus.subscribe(
            crate::event_bus::EventKind::OverlayTab,
            std::sync::Arc::new(move |e: &Event| {
                if let Event::OverlayTab(tab) = e {
                    s.lock().unwrap().push(format!("{tab:?}"));
                }
            }),
        );
        let s2 = seen.clone();
        bus.subscribe(
            crate::event_bus::EventKind::LogsPaginate,
            std::sync::Arc::new(move |e: &Event| {
                if let Event::LogsPaginate(delta) = e {
                    s2.lock().unwrap().push(format!("page:{delta}"));
                }
            }),
        );

        let controller = KeyboardController::new(cfg, bus, concurrency, refresh_handle());
        controller.handle_key(KeyEvent::new(KeyCode::Char('m'), KeyModifiers::NONE));
        controller.handle_key(KeyEvent::new(KeyCode::Char(']'), KeyModifiers::NONE));

        let log = seen.lock().unwrap();
        assert_eq!(log.as_slice(), ["Metadata".to_string(), "page:1".to_string()]);
    }

    #[test]
    fn scripted_source_drains_in_order_then_yields_none() {
        let mut source = ScriptedEventSource::new(vec![key(KeyCode::Char('r')), key_ctrl(KeyCode::Char('c'))]);
        assert!(matches!(source.next(Duration::from_millis(0)), Some(TermEvent::Key(_))));
        assert!(matches!(source.next(Duration::from_millis(0)), Some(TermEvent::Key(_))));
        assert!(source.next(Duration::from_millis(0)).is_none());
    }
}
