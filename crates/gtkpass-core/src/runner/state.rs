//! Task status as seen through a handle.

/// Status of one submitted unit of work.
///
/// State transitions:
/// - Pending -> Running -> Completed
/// - Pending -> Running -> Failed (error returned, panic, or never ran)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    /// Queued, waiting for a free worker.
    Pending,

    /// Picked up by a worker.
    Running,

    /// Produced a value.
    Completed,

    /// Produced an error instead of a value.
    Failed,
}

impl TaskStatus {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}
