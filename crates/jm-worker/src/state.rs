//! Lifecycle of a worker server

use std::fmt;

/// Where a worker server is in its lifecycle
///
/// Transitions only move forward:
/// `Starting -> Listening -> Serving -> Stopping -> Closed`.
/// `Serving` is skipped when the server stops before the registration delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum WorkerState {
    /// Looking for a free port
    Starting,
    /// Bound and answering calls, not yet announced
    Listening,
    /// Announced and registered (or tried to)
    Serving,
    /// Deregistering and draining calls
    Stopping,
    /// Socket closed
    Closed,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Starting => "starting",
            WorkerState::Listening => "listening",
            WorkerState::Serving => "serving",
            WorkerState::Stopping => "stopping",
            WorkerState::Closed => "closed",
        };
        f.write_str(name)
    }
}
