//! Typed synchronous publish/subscribe registry (§4.1).
//!
//! `publish` invokes every handler registered for that event's kind, in
//! subscription order, on the publisher's own thread/task. It is not a
//! queue: there is no buffering past the call stack, and a handler that
//! panics is caught and logged so the remaining handlers still run.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tracing::error;

use crate::model::{EncodeStats, JobStatus};

/// The overlay panes the Keyboard Controller's §6 tab-open bindings switch
/// between (`c/C`, `f/F`, `m/M`, `e/E`, `l/L`, `t/T`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OverlayTab {
    Config,
    FfmpegArgs,
    Metadata,
    Errors,
    Logs,
    Threads,
}

impl OverlayTab {
    /// Fixed cycle order `Tab` advances through.
    pub const ORDER: [OverlayTab; 6] = [
        OverlayTab::Config,
        OverlayTab::FfmpegArgs,
        OverlayTab::Metadata,
        OverlayTab::Errors,
        OverlayTab::Logs,
        OverlayTab::Threads,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    JobStarted,
    JobProgress,
    JobStateChanged,
    JobCompleted,
    JobFailed,
    HardwareCapabilityExceeded,
    QueueUpdated,
    RefreshFinished,
    ActionMessage,
    PauseRequested,
    FatalRequested,
    OverlayTab,
    OverlayCycle,
    OverlayClosed,
    LogsPaginate,
}

#[derive(Debug, Clone)]
pub enum Event {
    JobStarted {
        job_id: u64,
        path: PathBuf,
    },
    JobProgress {
        job_id: u64,
        percentage: f64,
        time: String,
    },
    JobStateChanged {
        job_id: u64,
        status: JobStatus,
    },
    JobCompleted {
        job_id: u64,
        status: JobStatus,
        stats: Option<EncodeStats>,
        reason: Option<String>,
    },
    JobFailed {
        job_id: u64,
        reason: String,
    },
    HardwareCapabilityExceeded {
        job_id: u64,
        message: String,
    },
    QueueUpdated {
        pending: usize,
        in_flight: usize,
    },
    RefreshFinished {
        added: usize,
        removed: usize,
    },
    ActionMessage(String),
    PauseRequested {
        job_id: u64,
    },
    FatalRequested {
        reason: String,
    },
    /// `None` opens/keeps the panel passed; the renderer treats this as
    /// "switch to (or open) this tab".
    OverlayTab(OverlayTab),
    /// `Tab` key: advance to the next panel in `OverlayTab::ORDER`, opening
    /// the overlay if it was closed.
    OverlayCycle,
    OverlayClosed,
    /// `[`/`]`: page delta for the logs panel, negative pages back.
    LogsPaginate(i32),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::JobStarted { .. } => EventKind::JobStarted,
            Event::JobProgress { .. } => EventKind::JobProgress,
            Event::JobStateChanged { .. } => EventKind::JobStateChanged,
            Event::JobCompleted { .. } => EventKind::JobCompleted,
            Event::JobFailed { .. } => EventKind::JobFailed,
            Event::HardwareCapabilityExceeded { .. } => EventKind::HardwareCapabilityExceeded,
            Event::QueueUpdated { .. } => EventKind::QueueUpdated,
            Event::RefreshFinished { .. } => EventKind::RefreshFinished,
            Event::ActionMessage(_) => EventKind::ActionMessage,
            Event::PauseRequested { .. } => EventKind::PauseRequested,
            Event::FatalRequested { .. } => EventKind::FatalRequested,
            Event::OverlayTab(_) => EventKind::OverlayTab,
            Event::OverlayCycle => EventKind::OverlayCycle,
            Event::OverlayClosed => EventKind::OverlayClosed,
            Event::LogsPaginate(_) => EventKind::LogsPaginate,
        }
    }
}

pub type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

#[derive(Default)]
pub struct EventBus {
    handlers: Mutex<HashMap<EventKind, Vec<Handler>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a handler to the insertion-ordered list for `kind`.
    pub fn subscribe(&self, kind: EventKind, handler: Handler) {
        self.handlers.lock().unwrap().entry(kind).or_default().push(handler);
    }

    /// Invokes every handler registered for `event.kind()`, in subscription
    /// order, on the calling thread. A panicking handler is caught and
    /// logged; it does not prevent later handlers from running.
    pub fn publish(&self, event: Event) {
        let kind = event.kind();
        let handlers = {
            let guard = self.handlers.lock().unwrap();
            guard.get(&kind).cloned().unwrap_or_default()
        };
        for handler in handlers {
            let event_ref = &event;
            let result = catch_unwind(AssertUnwindSafe(|| handler(event_ref)));
            if let Err(panic) = result {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!("event handler for {:?} panicked: {}", kind, message);
            }
        }
    }
}
