//! Shared progress cell for the running export or import.
//!
//! One handle lives in the application state and is cloned into whichever
//! operation is running; pollers read copies through [`ProgressTracker::get`].
//! Writes are last-write-wins. Single-flight is enforced one level up by the
//! maintenance guard, not here.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum Operation {
    #[default]
    Idle,
    Export,
    Import,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ProgressState {
    pub operation: Operation,
    pub phase: String,
    pub progress: u8,
    pub current_table: Option<String>,
    pub tables_completed: u32,
    pub tables_total: u32,
    pub error: Option<String>,
}

impl Default for ProgressState {
    fn default() -> Self {
        Self {
            operation: Operation::Idle,
            phase: "idle".to_string(),
            progress: 0,
            current_table: None,
            tables_completed: 0,
            tables_total: 0,
            error: None,
        }
    }
}

/// Partial update merged field-by-field into the current state.
#[derive(Debug, Clone, Default)]
pub struct ProgressUpdate {
    operation: Option<Operation>,
    phase: Option<String>,
    progress: Option<u8>,
    current_table: Option<Option<String>>,
    tables_completed: Option<u32>,
    tables_total: Option<u32>,
    error: Option<Option<String>>,
}

impl ProgressUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn operation(mut self, operation: Operation) -> Self {
        self.operation = Some(operation);
        self
    }

    pub fn phase(mut self, phase: impl Into<String>) -> Self {
        self.phase = Some(phase.into());
        self
    }

    pub fn progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress.min(100));
        self
    }

    pub fn current_table(mut self, table: Option<&str>) -> Self {
        self.current_table = Some(table.map(str::to_string));
        self
    }

    pub fn tables_completed(mut self, completed: u32) -> Self {
        self.tables_completed = Some(completed);
        self
    }

    pub fn tables_total(mut self, total: u32) -> Self {
        self.tables_total = Some(total);
        self
    }

    pub fn error(mut self, error: Option<String>) -> Self {
        self.error = Some(error);
        self
    }
}

#[derive(Debug, Default)]
struct Cell {
    state: ProgressState,
    generation: u64,
}

#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    cell: Arc<Mutex<Cell>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Cell> {
        self.cell.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self) -> ProgressState {
        self.lock().state.clone()
    }

    pub fn set(&self, update: ProgressUpdate) {
        let mut cell = self.lock();
        let state = &mut cell.state;
        if let Some(operation) = update.operation {
            state.operation = operation;
        }
        if let Some(phase) = update.phase {
            state.phase = phase;
        }
        if let Some(progress) = update.progress {
            state.progress = progress;
        }
        if let Some(table) = update.current_table {
            state.current_table = table;
        }
        if let Some(completed) = update.tables_completed {
            state.tables_completed = completed;
        }
        if let Some(total) = update.tables_total {
            state.tables_total = total;
        }
        if let Some(error) = update.error {
            state.error = error;
        }
    }

    pub fn reset(&self) {
        let mut cell = self.lock();
        cell.state = ProgressState::default();
        cell.generation = cell.generation.wrapping_add(1);
    }

    /// Reset to idle and mark `operation` as running.
    pub fn begin(&self, operation: Operation, phase: &str) {
        self.reset();
        self.set(ProgressUpdate::new().operation(operation).phase(phase));
    }

    /// Record a terminal failure so pollers do not keep showing a stale run.
    pub fn fail(&self, message: impl Into<String>) {
        self.set(
            ProgressUpdate::new()
                .phase("error")
                .current_table(None)
                .error(Some(message.into())),
        );
    }

    /// Reset after `delay` unless another run has started in the meantime.
    pub fn schedule_reset(&self, delay: Duration) {
        let generation = self.lock().generation;
        let tracker = self.clone();
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        handle.spawn(async move {
            tokio::time::sleep(delay).await;
            let mut cell = tracker.lock();
            if cell.generation == generation {
                cell.state = ProgressState::default();
                cell.generation = cell.generation.wrapping_add(1);
            }
        });
    }
}

/// Integer percentage of `done` over `total`, clamped to 0..=100.
pub fn percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done.min(total) * 100) / total) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_merges_only_given_fields() {
        let tracker = ProgressTracker::new();
        tracker.set(
            ProgressUpdate::new()
                .operation(Operation::Export)
                .tables_total(10),
        );
        tracker.set(ProgressUpdate::new().current_table(Some("customers")).progress(40));
        let state = tracker.get();
        assert_eq!(state.operation, Operation::Export);
        assert_eq!(state.tables_total, 10);
        assert_eq!(state.current_table.as_deref(), Some("customers"));
        assert_eq!(state.progress, 40);
        assert_eq!(state.phase, "idle");
    }

    #[test]
    fn progress_is_clamped() {
        let tracker = ProgressTracker::new();
        tracker.set(ProgressUpdate::new().progress(250));
        assert_eq!(tracker.get().progress, 100);
    }

    #[test]
    fn fail_records_error_and_reset_clears_it() {
        let tracker = ProgressTracker::new();
        tracker.begin(Operation::Import, "deleting");
        tracker.fail("boom");
        let state = tracker.get();
        assert_eq!(state.phase, "error");
        assert_eq!(state.error.as_deref(), Some("boom"));
        tracker.reset();
        assert_eq!(tracker.get(), ProgressState::default());
    }

    #[test]
    fn percent_handles_edges() {
        assert_eq!(percent(0, 0), 100);
        assert_eq!(percent(1, 4), 25);
        assert_eq!(percent(9, 4), 100);
    }

    #[tokio::test]
    async fn scheduled_reset_returns_to_idle() {
        let tracker = ProgressTracker::new();
        tracker.begin(Operation::Export, "fetching");
        tracker.set(ProgressUpdate::new().progress(100).phase("done"));
        tracker.schedule_reset(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(tracker.get(), ProgressState::default());
    }

    #[tokio::test]
    async fn stale_reset_does_not_clobber_a_newer_run() {
        let tracker = ProgressTracker::new();
        tracker.begin(Operation::Export, "done");
        tracker.schedule_reset(Duration::from_millis(20));
        tracker.begin(Operation::Import, "deleting");
        tokio::time::sleep(Duration::from_millis(80)).await;
        let state = tracker.get();
        assert_eq!(state.operation, Operation::Import);
        assert_eq!(state.phase, "deleting");
    }
}
