//! Message types for the Runner actor.
//!
//! Every queue mutation is a [`RunnerCommand`] processed in order by the
//! single actor task; the `response` channel carries the result back to the
//! [`ActionRunner`](super::ActionRunner) handle. The internal variants are
//! posted by the actor to itself so that the work runs on a later turn.

use tokio::sync::{broadcast, oneshot};

use super::{RunnerEvent, RunnerSnapshot};
use crate::action::{Action, ActionId, FailureChoice};

/// Where a finished Action was running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Slot {
    Current,
    Immediate,
}

/// Commands processed by the Runner actor.
#[derive(Debug)]
pub(crate) enum RunnerCommand {
    /// Append to the end of the queue.
    AddToQueue {
        action: Action,
        response: oneshot::Sender<bool>,
    },

    /// Insert at `index` (clamped to the end of the queue).
    InsertInQueue {
        index: usize,
        action: Action,
        response: oneshot::Sender<bool>,
    },

    DeleteInQueue {
        index: usize,
        response: oneshot::Sender<bool>,
    },

    /// Insert a fresh copy right after `index`.
    DuplicateInQueue {
        index: usize,
        response: oneshot::Sender<Option<Action>>,
    },

    /// Insert fresh copies of all `indices` after the highest of them.
    DuplicateManyInQueue {
        indices: Vec<usize>,
        response: oneshot::Sender<Vec<Action>>,
    },

    MoveInQueue {
        from: usize,
        to: usize,
        response: oneshot::Sender<bool>,
    },

    SetPaused {
        paused: bool,
        response: oneshot::Sender<()>,
    },

    IsPaused {
        response: oneshot::Sender<bool>,
    },

    /// Start outside the queue, alongside the current Action.
    RunImmediately {
        action: Action,
        response: oneshot::Sender<bool>,
    },

    /// Put at the head of the queue and force one advance if idle.
    RunImmediatelyInQueue {
        action: Action,
        response: oneshot::Sender<bool>,
    },

    CancelCurrent {
        response: oneshot::Sender<bool>,
    },

    PauseCurrent {
        response: oneshot::Sender<bool>,
    },

    ResumeCurrent {
        response: oneshot::Sender<bool>,
    },

    GetCurrent {
        response: oneshot::Sender<Option<Action>>,
    },

    GetQueue {
        response: oneshot::Sender<Vec<Action>>,
    },

    GetImmediate {
        response: oneshot::Sender<Vec<Action>>,
    },

    /// Current contents plus an event subscription taken on the same turn.
    Subscribe {
        response: oneshot::Sender<(broadcast::Receiver<RunnerEvent>, RunnerSnapshot)>,
    },

    /// Drop the queue and stop the actor. Running Actions finish on their
    /// own.
    Shutdown {
        response: oneshot::Sender<()>,
    },

    // Internal, posted by the actor to itself.
    /// Start the newly promoted current Action.
    StartAction { id: ActionId },

    /// An Action the Runner is tracking reached a final state.
    ActionFinished { action: Action, slot: Slot },

    /// The operator answered a failure prompt.
    FailureResolved {
        action: Action,
        slot: Slot,
        choice: FailureChoice,
    },

    /// Release retired Actions.
    DrainRetired,
}
