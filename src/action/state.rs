//! Action lifecycle states and the policies that steer them.
//!
//! # State Machine
//!
//! ```text
//! Constructed ──start()──▶ WaitingForPrereqs ──satisfied──▶ Starting ──started──▶ Running
//!                                                                                │   ▲
//!                                                                        pause() │   │ resumed
//!                                                                                ▼   │
//!                                                             Pausing ──▶ Paused ──▶ Resuming
//!
//! Running ──▶ Succeeded | Failed
//! (any non-final state) ──cancel()──▶ Cancelling ──▶ Cancelled
//! ```

use serde::{Deserialize, Serialize};

/// Lifecycle state of an Action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionState {
    /// Created, never started. Accepts only `start()` and `cancel()`.
    Constructed,
    /// Started, blocked on unsatisfied prerequisites.
    WaitingForPrereqs,
    /// Start hook invoked, waiting for it to report "started".
    Starting,
    /// Executing.
    Running,
    /// Pause hook invoked, waiting for it to report "paused".
    Pausing,
    /// Paused; may resume or be cancelled.
    Paused,
    /// Resume hook invoked, waiting for it to report "resumed".
    Resuming,
    /// Cancel hook invoked, waiting for it to report "cancelled".
    Cancelling,
    /// Finished successfully.
    Succeeded,
    /// Finished with a failure.
    Failed,
    /// Finished by cancellation.
    Cancelled,
}

impl ActionState {
    /// `Succeeded`, `Failed` or `Cancelled`.
    pub fn is_final(self) -> bool {
        matches!(
            self,
            ActionState::Succeeded | ActionState::Failed | ActionState::Cancelled
        )
    }

    /// Started and not yet final.
    pub fn is_live(self) -> bool {
        !self.is_final() && self != ActionState::Constructed
    }

    /// Whether the edge `self -> to` exists in the state machine.
    pub fn can_transition_to(self, to: ActionState) -> bool {
        use ActionState::*;
        match (self, to) {
            (Constructed, WaitingForPrereqs | Starting | Cancelling) => true,
            (WaitingForPrereqs, Starting | Paused | Cancelling | Failed) => true,
            (Starting, Running | Cancelling | Failed) => true,
            (Running, Pausing | Cancelling | Succeeded | Failed) => true,
            (Pausing, Paused | Running | Cancelling | Succeeded | Failed) => true,
            (Paused, Resuming | Cancelling | Failed) => true,
            (Resuming, Running | WaitingForPrereqs | Cancelling | Failed) => true,
            (Cancelling, Cancelled) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for ActionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// A state-change notification: the new state and the one before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    /// State after the transition.
    pub state: ActionState,
    /// State before it.
    pub previous: ActionState,
}

/// Progress as a (done, total) pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    /// Units done; negative when not started.
    pub done: f64,
    /// Units in total; zero when unknown.
    pub total: f64,
}

impl Progress {
    /// Reported before the Action has started.
    pub const NOT_STARTED: Progress = Progress {
        done: -1.0,
        total: -1.0,
    };

    /// Running, but the Action cannot say how far along it is.
    pub const INDETERMINATE: Progress = Progress {
        done: 0.0,
        total: 0.0,
    };

    /// Progress of `done` out of `total`.
    pub fn new(done: f64, total: f64) -> Self {
        Self { done, total }
    }

    /// Completed fraction in `[0, 1]`, or `None` when indeterminate or not
    /// started.
    pub fn fraction(&self) -> Option<f64> {
        if self.total > 0.0 && self.done >= 0.0 {
            Some((self.done / self.total).clamp(0.0, 1.0))
        } else {
            None
        }
    }
}

/// What to do when an Action fails.
///
/// The same policy type is configured twice per Action: once for when the
/// Runner executes it from the queue (or immediately), once for when a
/// composite executes it as a child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FailureResponse {
    /// Accept the failure. In the Runner the queue advances; inside a
    /// composite the failure is handed to the parent, which fails.
    #[default]
    MoveOn,
    /// Run a fresh copy: at the head of the queue, immediately, or right
    /// after the failed child.
    AttemptAnotherCopy,
    /// Ask the operator to choose between the other two.
    PromptUser,
}

/// The operator's answer to a failure prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureChoice {
    /// Accept the failure and carry on.
    MoveOn,
    /// Run a fresh copy of the failed Action.
    AttemptAnotherCopy,
}

/// What an Action does while its prerequisites are unsatisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PrerequisiteWaitPolicy {
    /// Wait until every prerequisite is satisfied.
    #[default]
    Wait,
    /// Cancel the Action.
    Cancel,
    /// Fail the Action.
    Fail,
    /// Ask the operator each time a prerequisite changes while unmet.
    AskOperator,
}

/// The operator's answer to an unmet-prerequisite prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrerequisiteChoice {
    /// Keep waiting.
    Wait,
    /// Cancel the Action.
    Cancel,
    /// Fail the Action.
    Fail,
}
