//! Durable record of finished Actions.
//!
//! The Runner writes one [`LogEntry`] per finished Action through
//! [`ActionLog`]. Storage is pluggable behind [`LogStore`]: an in-process
//! map for tests and transient sessions, or a redb file for history that
//! survives restarts.
//!
//! Write failures are reported to the error monitor and returned to the
//! caller, who is expected to carry on. The log never retries.

mod memory;
mod redb_store;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::action::{Action, ActionId, ActionInfo, ActionState};
use crate::error::{ActionError, ActionResult};
use crate::health::{ErrorReporter, ErrorSeverity, SystemHealthMonitor};

pub use memory::MemoryLogStore;
pub use redb_store::RedbLogStore;

/// Immutable record of one finished Action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Identity of this entry.
    pub id: Uuid,
    /// Identity of the Action in the process that ran it.
    pub action_id: ActionId,
    /// The composite this Action ran inside, when children are logged
    /// individually.
    pub parent_id: Option<ActionId>,
    /// Deep copy of the Action's info, including composite children.
    pub info: ActionInfo,
    /// `Succeeded`, `Failed` or `Cancelled`.
    pub final_state: ActionState,
    /// Why it failed, if it did.
    pub failure_message: Option<String>,
    /// When the Action entered `Running`; equals `end_time` for Actions
    /// that never ran.
    pub start_time: DateTime<Utc>,
    /// When the Action reached its final state.
    pub end_time: DateTime<Utc>,
}

impl LogEntry {
    /// Snapshot a finished Action.
    pub fn from_action(action: &Action, parent_id: Option<ActionId>) -> ActionResult<Self> {
        let state = action.state();
        if !state.is_final() {
            return Err(ActionError::NotFinal(state));
        }
        let end_time = action.ended_at().unwrap_or_else(Utc::now);
        Ok(Self {
            id: Uuid::new_v4(),
            action_id: action.id(),
            parent_id,
            info: action.info_snapshot(),
            final_state: state,
            failure_message: action.failure_message(),
            start_time: action.started_at().unwrap_or(end_time),
            end_time,
        })
    }

    /// Seconds between start and end.
    pub fn duration_secs(&self) -> f64 {
        (self.end_time - self.start_time).num_milliseconds() as f64 / 1000.0
    }
}

/// Persistence collaborator for log entries.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Persist one entry.
    async fn store(&self, entry: &LogEntry) -> ActionResult<()>;

    /// Entry by id, if stored.
    async fn get(&self, id: Uuid) -> ActionResult<Option<LogEntry>>;

    /// Entries whose end time lies in `[from, to]`, most recent first,
    /// at most `limit` of them.
    async fn query_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: Option<usize>,
    ) -> ActionResult<Vec<LogEntry>>;

    /// Number of entries whose end time lies in `[from, to]`.
    async fn count_range(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> ActionResult<usize>;
}

/// Handle to the Action log. Cheap to clone.
#[derive(Clone)]
pub struct ActionLog {
    store: Arc<dyn LogStore>,
    monitor: Arc<dyn ErrorReporter>,
}

impl std::fmt::Debug for ActionLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionLog").finish_non_exhaustive()
    }
}

impl ActionLog {
    /// A log over `store`, reporting write failures to `monitor`.
    pub fn new(store: Arc<dyn LogStore>, monitor: Arc<dyn ErrorReporter>) -> Self {
        Self { store, monitor }
    }

    /// In-memory log with its own health monitor.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryLogStore::default()),
            Arc::new(SystemHealthMonitor::default()),
        )
    }

    /// Record a finished top-level Action.
    pub async fn log_completed(&self, action: &Action) -> ActionResult<LogEntry> {
        self.write(action, None).await
    }

    /// Record a finished child of a composite that logs its children
    /// individually.
    pub async fn log_completed_child(
        &self,
        action: &Action,
        parent: ActionId,
    ) -> ActionResult<LogEntry> {
        self.write(action, Some(parent)).await
    }

    async fn write(&self, action: &Action, parent: Option<ActionId>) -> ActionResult<LogEntry> {
        let entry = LogEntry::from_action(action, parent)?;
        match self.store.store(&entry).await {
            Ok(()) => {
                info!(
                    entry = %entry.id,
                    action = %entry.action_id,
                    state = %entry.final_state,
                    "Logged completed action"
                );
                Ok(entry)
            }
            Err(err) => {
                self.monitor.report(
                    "action_log",
                    ErrorSeverity::Error,
                    format!("could not log action {}: {err}", action.id()),
                );
                Err(err)
            }
        }
    }

    /// Entry by id. Unknown ids are `EntryNotFound`.
    pub async fn get(&self, id: Uuid) -> ActionResult<LogEntry> {
        self.store
            .get(id)
            .await?
            .ok_or(ActionError::EntryNotFound(id))
    }

    /// Most recent first.
    pub async fn entries_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: Option<usize>,
    ) -> ActionResult<Vec<LogEntry>> {
        let entries = self.store.query_range(from, to, limit).await?;
        debug!(count = entries.len(), %from, %to, "Queried action log");
        Ok(entries)
    }

    /// Number of entries that ended in `[from, to]`, regardless of page size.
    pub async fn count_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> ActionResult<usize> {
        self.store.count_range(from, to).await
    }
}
