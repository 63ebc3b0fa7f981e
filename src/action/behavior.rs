//! Implementation hooks and the context they report through.

use std::sync::Weak;

use super::list::ChildList;
use super::machine::{Action, ActionInner};
use super::state::{ActionState, Progress};

/// The work an Action wraps.
///
/// The shared state machine in [`Action`] calls these hooks at the points
/// where a concrete Action must do something. Hooks run synchronously on
/// the caller's task and must return promptly: anything long-running is
/// spawned and reports back through the [`ActionContext`].
///
/// Every hook must *eventually* report its outcome:
/// - `start` → `set_started`, then later `set_succeeded` / `set_failed`
/// - `pause` → `set_paused` or `pause_refused`
/// - `resume` → `set_resumed`
/// - `cancel` → `set_cancelled` (or `set_failed`, which completes the
///   cancellation)
pub trait ActionBehavior: Send + 'static {
    /// Begin the work.
    fn start(&mut self, ctx: ActionContext);

    /// Stop the work. Called from `Cancelling`.
    fn cancel(&mut self, ctx: ActionContext);

    /// Whether `pause()` is currently supported.
    fn can_pause(&self) -> bool {
        false
    }

    /// Suspend the work. Only called when `can_pause()` returned true.
    fn pause(&mut self, ctx: ActionContext) {
        ctx.pause_refused();
    }

    /// Continue after a pause.
    fn resume(&mut self, ctx: ActionContext) {
        ctx.set_resumed();
    }

    /// A fresh behavior for a copy of this Action, as if never run.
    fn duplicate(&self) -> Box<dyn ActionBehavior>;

    /// The children of a composite behavior.
    fn child_list(&self) -> Option<ChildList> {
        None
    }
}

/// Handle through which a behavior reports progress and state changes.
///
/// Holds only a weak reference, so a behavior's background task never
/// keeps a discarded Action alive. Every method returns `false` when the
/// Action is gone or the transition is not legal from its current state.
#[derive(Clone)]
pub struct ActionContext {
    action: Weak<ActionInner>,
}

impl std::fmt::Debug for ActionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionContext")
            .field("action", &self.action().map(|a| a.id()))
            .finish()
    }
}

impl ActionContext {
    pub(crate) fn new(action: Weak<ActionInner>) -> Self {
        Self { action }
    }

    /// The Action this context reports for, if it still exists.
    pub fn action(&self) -> Option<Action> {
        self.action.upgrade().map(Action::from_inner)
    }

    /// Current state of the Action, if it still exists.
    pub fn state(&self) -> Option<ActionState> {
        self.action().map(|a| a.state())
    }

    /// The start hook finished: `Starting → Running`.
    pub fn set_started(&self) -> bool {
        self.action().is_some_and(|a| a.report_started())
    }

    /// The work completed successfully.
    pub fn set_succeeded(&self) -> bool {
        self.action().is_some_and(|a| a.report_succeeded())
    }

    /// The work failed. During `Cancelling` this completes the
    /// cancellation instead.
    pub fn set_failed(&self, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        self.action().is_some_and(|a| a.report_failed(reason))
    }

    /// The work stopped because of cancellation.
    pub fn set_cancelled(&self) -> bool {
        self.action().is_some_and(|a| a.report_cancelled())
    }

    /// The pause hook finished: `Pausing → Paused`.
    pub fn set_paused(&self) -> bool {
        self.action().is_some_and(|a| a.report_paused())
    }

    /// The pause hook could not pause: `Pausing → Running`.
    pub fn pause_refused(&self) -> bool {
        self.action().is_some_and(|a| a.report_pause_refused())
    }

    /// The resume hook finished: `Resuming → Running`.
    pub fn set_resumed(&self) -> bool {
        self.action().is_some_and(|a| a.report_resumed())
    }

    /// Report `done` out of `total` units of work.
    pub fn set_progress(&self, done: f64, total: f64) -> bool {
        self.action()
            .is_some_and(|a| a.update_progress(Progress::new(done, total)))
    }

    /// Replace the one-line status shown next to the Action.
    pub fn set_status_text(&self, text: impl Into<String>) -> bool {
        let text = text.into();
        self.action().is_some_and(|a| a.update_status_text(text))
    }

    /// Expected duration in seconds.
    pub fn set_expected_duration(&self, seconds: Option<f64>) -> bool {
        self.action()
            .is_some_and(|a| a.update_expected_duration(seconds))
    }
}
