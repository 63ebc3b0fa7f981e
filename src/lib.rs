//! Action execution engine for laboratory and beamline control.
//!
//! Long-running, possibly nested operations are modelled as [`Action`]s: each
//! one is an explicit state machine with pause, resume and cancel, optional
//! prerequisite gating and a configurable failure response. Composite
//! Actions ([`ListAction`]) run children in order, optionally looping.
//!
//! An [`ActionRunner`] runs one queued Action at a time, plus any number of
//! "immediate" Actions outside the queue, and records every finished Action
//! in an [`ActionLog`]. Logged Actions can be rebuilt and run again through
//! the [`ActionRegistry`].
//!
//! ```no_run
//! use daq_actions::{ActionLog, ActionRunner, WaitAction};
//!
//! # async fn demo() -> daq_actions::ActionResult<()> {
//! let runner = ActionRunner::spawn(ActionLog::in_memory(), false);
//! runner.add_to_queue(WaitAction::action(1.5)).await?;
//! runner.add_to_queue(WaitAction::action(0.5)).await?;
//! # Ok(())
//! # }
//! ```

pub mod action;
pub mod config;
pub mod error;
pub mod health;
pub mod log;
pub mod model;
pub mod observable;
pub mod registry;
pub mod runner;

pub use action::{
    Action, ActionBehavior, ActionContext, ActionEvent, ActionId, ActionInfo, ActionState,
    ActionTiming, ChildList, ChildListEvent, FailureResponse, ListAction, Prerequisite,
    PrerequisiteWaitPolicy, Progress, WaitAction,
};
pub use config::{ConfigError, EngineConfig};
pub use error::{ActionError, ActionResult};
pub use health::{ErrorReporter, ErrorSeverity, SystemHealthMonitor};
pub use log::{ActionLog, LogEntry, LogStore, MemoryLogStore, RedbLogStore};
pub use model::{spawn_queue_model, NodePath, QueueModel, TreeObserver, TreeRoot};
pub use registry::ActionRegistry;
pub use runner::{ActionRunner, AutoOperator, OperatorPrompt, RunnerEvent, RunnerSnapshot};
