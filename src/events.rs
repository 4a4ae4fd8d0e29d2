use std::fmt;

/// Monotonic id of one preparation job within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// The render loop took the tile list.
    Adopted,
    /// A newer job replaced this one before it was adopted.
    Superseded,
    /// The job produced no tiles; the previous list stays on screen.
    Failed(String),
}

/// Notifications for the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    PreparationStarted { job: JobId },
    PreparationFinished { job: JobId, outcome: JobOutcome },
    FlipCycleCompleted,
}

/// Requests from the session to the render thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderCommand {
    FlipAll,
}
