//! Request lifecycle notifiers.
//!
//! Notifiers observe every forward regardless of outcome, so logging
//! and metrics see failures too. They must be cheap and must not fail:
//! the fan-out runs inline on the request path.

use std::time::Duration;

use tracing::info;

use faasgate_core::FunctionTarget;

/// Where in the request lifecycle an event was emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifierPhase {
    /// Before the upstream call; `status` is 0 and `duration` is zero.
    Started,
    /// After the upstream call resolved (success or failure).
    Completed,
}

/// A request lifecycle event.
#[derive(Debug, Clone)]
pub struct RequestEvent {
    pub phase: NotifierPhase,
    pub method: http::Method,
    pub path: String,
    pub function: Option<FunctionTarget>,
    pub status: u16,
    pub call_id: String,
    pub duration: Duration,
}

/// A side-channel consumer of request lifecycle events.
pub trait HttpNotifier: Send + Sync {
    fn notify(&self, event: &RequestEvent);
}

/// Structured access log of completed forwards.
pub struct LoggingNotifier;

impl HttpNotifier for LoggingNotifier {
    fn notify(&self, event: &RequestEvent) {
        if event.phase != NotifierPhase::Completed {
            return;
        }
        info!(
            method = %event.method,
            path = %event.path,
            status = event.status,
            call_id = %event.call_id,
            duration = ?event.duration,
            "forwarded request"
        );
    }
}

/// Fan an event out to every notifier in order.
pub fn fan_out(notifiers: &[std::sync::Arc<dyn HttpNotifier>], event: &RequestEvent) {
    for notifier in notifiers {
        notifier.notify(event);
    }
}
