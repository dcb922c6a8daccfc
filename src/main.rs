//! Binary entry point: assembles the Effective Configuration (§6), wires
//! the real or `--demo` adapters, runs pre-run Housekeeping, drives the
//! Orchestrator alongside the `ratatui` dashboard and Keyboard Controller,
//! then runs post-run Housekeeping and maps the result to an exit code.
//! A thin `run()` wrapped by `main()` for the startup banner / error path,
//! with tracing initialized first thing.

use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;
use tracing::{error, info};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use reelforge::concurrency::ConcurrencyController;
use reelforge::config::{build_effective_config, CliArgs, EffectiveConfig, RawConfig};
use reelforge::demo::{DemoMetadataTool, DemoProber, DemoScenario, DemoTranscoder};
use reelforge::error::Result;
use reelforge::event_bus::EventBus;
use reelforge::hardware::{detect_hardware, EncoderCapabilities};
use reelforge::housekeeping::{run_post_relocation, run_pre_checks};
use reelforge::keyboard::KeyboardController;
use reelforge::metadata::{ExifToolAdapter, MetadataCache, MetadataTool};
use reelforge::orchestrator::{Orchestrator, RunCounters};
use reelforge::probe::{FfprobeProber, Prober};
use reelforge::transcoder::{FfmpegTranscoder, TranscoderProcess};
use reelforge::ui::{render, run_plain_summary_loop, LogRing, LogRingLayer, UiState};

const EXIT_SUCCESS: i32 = 0;
const EXIT_CONFIG_ERROR: i32 = 1;
const EXIT_INTERRUPTED: i32 = 130;

fn main() {
    let code = match run() {
        Ok(code) => code,
        Err(e) => {
            error!("fatal: {e}");
            EXIT_CONFIG_ERROR
        }
    };
    std::process::exit(code);
}

fn run() -> std::result::Result<i32, anyhow::Error> {
    let cli = CliArgs::parse();
    let logs = LogRing::new();
    let _guard = init_tracing(&cli, logs.clone())?;

    info!(os = std::env::consts::OS, arch = std::env::consts::ARCH, cpus = num_cpus::get(), "reelforge starting");

    let global_path = cli.config.clone().unwrap_or_else(|| PathBuf::from("reelforge.yaml"));
    let global = RawConfig::load(&global_path)?;
    let config = Arc::new(build_effective_config(global, cli.clone())?);

    let pre_report = if config.demo {
        Default::default()
    } else {
        run_pre_checks(&config)?
    };
    info!(
        markers_found = pre_report.markers_found,
        markers_removed = pre_report.markers_removed,
        tmp_removed = pre_report.tmp_files_removed,
        "pre-run housekeeping complete"
    );

    let bus = Arc::new(EventBus::new());
    let concurrency = Arc::new(ConcurrencyController::new(config.max_threads_start, config.runtime_max_threads));
    let cache = Arc::new(MetadataCache::new());

    let (prober, metadata_tool, transcoder): (Arc<dyn Prober>, Arc<dyn MetadataTool>, Arc<dyn TranscoderProcess>) =
        build_adapters(&cli, &config)?;

    let ui_state = UiState::new(concurrency.clone(), logs.clone());
    ui_state.install(&bus);

    let (orchestrator, refresh_handle) =
        Orchestrator::new(config.clone(), bus.clone(), concurrency.clone(), cache, prober, metadata_tool, transcoder);

    let interactive = io::stdout().is_terminal() && !config.demo;
    let keyboard_handle = if interactive {
        let controller = KeyboardController::new(config.clone(), bus.clone(), concurrency.clone(), refresh_handle);
        Some(controller.spawn())
    } else {
        drop(refresh_handle);
        None
    };

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    let counters = runtime.block_on(async {
        if interactive {
            run_with_dashboard(orchestrator, ui_state.clone()).await
        } else {
            run_headless(orchestrator, ui_state.clone()).await
        }
    })?;

    if let Some(handle) = keyboard_handle {
        // The input thread only returns on its own ctrl-c or when the
        // process is about to exit anyway; don't block shutdown on it.
        drop(handle);
    }

    if !config.demo {
        let post_report = run_post_relocation(&config, &bus)?;
        info!(relocated = post_report.relocated, over_threshold = post_report.skipped_over_threshold, "post-run housekeeping complete");
    }

    info!(
        completed = counters.completed,
        kept_original = counters.kept_original,
        failed = counters.failed,
        hw_cap_exceeded = counters.hw_cap_exceeded,
        skipped = counters.skipped,
        interrupted = counters.interrupted,
        "run finished"
    );

    Ok(exit_code(&concurrency, &counters))
}

fn exit_code(concurrency: &ConcurrencyController, counters: &RunCounters) -> i32 {
    if concurrency.is_interrupted() || counters.interrupted > 0 {
        EXIT_INTERRUPTED
    } else {
        EXIT_SUCCESS
    }
}

fn build_adapters(
    cli: &CliArgs,
    config: &EffectiveConfig,
) -> Result<(Arc<dyn Prober>, Arc<dyn MetadataTool>, Arc<dyn TranscoderProcess>)> {
    if config.demo {
        let scenario = match &cli.demo_config {
            Some(path) => DemoScenario::load(path)?,
            None => DemoScenario::default(),
        };
        return Ok((
            Arc::new(DemoProber::new(scenario.clone())),
            Arc::new(DemoMetadataTool),
            Arc::new(DemoTranscoder::new(scenario)),
        ));
    }

    let hardware = detect_hardware(config.cpu_fallback)?;
    info!(vendor = %hardware.vendor, device = ?hardware.device_path, "selected hardware");
    let capabilities = EncoderCapabilities::detect().unwrap_or_else(|e| {
        tracing::warn!("failed to detect encoder capabilities, assuming none: {e}");
        EncoderCapabilities::default()
    });

    Ok((
        Arc::new(FfprobeProber),
        Arc::new(ExifToolAdapter::new()),
        Arc::new(FfmpegTranscoder::new(Some(hardware), capabilities)),
    ))
}

/// Alternate-screen `ratatui` loop: draws a frame, yields briefly so the
/// Orchestrator and Keyboard Controller make progress, repeats until the
/// Orchestrator's future resolves.
async fn run_with_dashboard(orchestrator: Orchestrator, ui_state: Arc<UiState>) -> std::result::Result<RunCounters, anyhow::Error> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = dashboard_loop(&mut terminal, orchestrator, &ui_state).await;

    ui_state.mark_finished();
    let _ = terminal.draw(|f| render(f, &ui_state.snapshot()));

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;

    result
}

async fn dashboard_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    orchestrator: Orchestrator,
    ui_state: &Arc<UiState>,
) -> std::result::Result<RunCounters, anyhow::Error> {
    let mut run_fut = tokio::spawn(orchestrator.run());
    loop {
        terminal.draw(|f| render(f, &ui_state.snapshot()))?;

        match tokio::time::timeout(Duration::from_millis(100), &mut run_fut).await {
            Ok(joined) => return joined?.map_err(anyhow::Error::from),
            Err(_elapsed) => continue,
        }
    }
}

/// Non-interactive fallback (`--no-ui`-equivalent when stdout isn't a tty,
/// or `--demo`): periodic plain-log summaries instead of the dashboard.
async fn run_headless(orchestrator: Orchestrator, ui_state: Arc<UiState>) -> std::result::Result<RunCounters, anyhow::Error> {
    let summary = tokio::spawn(run_plain_summary_loop(ui_state.clone()));
    let counters = orchestrator.run().await?;
    ui_state.mark_finished();
    summary.await.ok();
    Ok(counters)
}

fn init_tracing(cli: &CliArgs, logs: Arc<LogRing>) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else if cli.no_debug {
        EnvFilter::new("warn")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let ring_layer = LogRingLayer::new(logs);

    if let Some(path) = &cli.log_path {
        let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| std::path::Path::new("."));
        let file_name = path.file_name().map(|n| n.to_owned()).unwrap_or_else(|| "reelforge.log".into());
        let appender = tracing_appender::rolling::never(dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        let file_layer = tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false);
        tracing_subscriber::registry().with(filter).with(file_layer).with(ring_layer).init();
        Ok(Some(guard))
    } else {
        let stderr_layer = tracing_subscriber::fmt::layer().with_writer(io::stderr);
        tracing_subscriber::registry().with(filter).with(stderr_layer).with(ring_layer).init();
        Ok(None)
    }
}
