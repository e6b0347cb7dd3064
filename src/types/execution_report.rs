use std::fmt;
use std::time::Duration;

use super::error::ExecutionError;

/// Snapshot of an execution's memo table, returned by
/// [`Execution::report()`](crate::Execution::report).
///
/// Contains the slots resolved so far, the slots that failed and why, and
/// the wall-clock time elapsed since the execution started.
#[derive(Debug, Clone)]
#[must_use]
pub struct ExecutionReport {
    resolved: Vec<String>,
    failed: Vec<(String, ExecutionError)>,
    elapsed: Duration,
    timed_out: bool,
}

impl ExecutionReport {
    pub(crate) fn new(
        resolved: Vec<String>,
        failed: Vec<(String, ExecutionError)>,
        elapsed: Duration,
        timed_out: bool,
    ) -> Self {
        Self {
            resolved,
            failed,
            elapsed,
            timed_out,
        }
    }

    /// Names of slots memoized with a value, in graph order.
    #[must_use]
    pub fn resolved(&self) -> &[String] {
        &self.resolved
    }

    /// Slots memoized with an error, in graph order.
    #[must_use]
    pub fn failed(&self) -> &[(String, ExecutionError)] {
        &self.failed
    }

    /// Wall-clock time since the execution started.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Whether the feature deadline was hit.
    #[must_use]
    pub fn timed_out(&self) -> bool {
        self.timed_out
    }
}

impl fmt::Display for ExecutionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "resolved: [{}]", self.resolved.join(", "))?;
        let failed: Vec<&str> = self.failed.iter().map(|(name, _)| name.as_str()).collect();
        write!(f, ", failed: [{}]", failed.join(", "))?;
        if self.timed_out {
            write!(f, ", timed out")?;
        }
        write!(f, ", elapsed: {:?}", self.elapsed)?;
        Ok(())
    }
}
