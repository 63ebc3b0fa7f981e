//! The Action Runner: a FIFO queue of Actions executed one at a time, plus
//! Actions run immediately alongside it.
//!
//! [`ActionRunner`] is a clonable handle to an actor task that owns all
//! queue state. Construct one per application and pass the handle around;
//! dropping every handle (or calling [`ActionRunner::shutdown`]) stops it.
//!
//! # Example
//!
//! ```rust,ignore
//! let runner = ActionRunner::spawn(ActionLog::in_memory(), false);
//! runner.add_to_queue(WaitAction::action(2.0)).await?;
//! runner.add_to_queue(WaitAction::action(1.0)).await?;
//!
//! let mut events = runner.subscribe();
//! while let Ok(event) = events.recv().await {
//!     if let RunnerEvent::ActionLogged(entry) = event {
//!         println!("{} -> {}", entry.info.short_description, entry.final_state);
//!     }
//! }
//! ```

mod actor;
mod messages;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::info;

use crate::action::{
    Action, ActionId, FailureChoice, PrerequisiteChoice, Progress, RunnerLink, StateChange,
};
use crate::error::{ActionError, ActionResult};
use crate::log::{ActionLog, LogEntry};

use actor::RunnerActor;
use messages::RunnerCommand;

/// Default capacity of the Runner event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Everything the Runner announces.
///
/// Queue inserts and removals arrive as about-to/done pairs. The
/// `Current*` events mirror the current Action's own notifications so a
/// status bar can follow "whatever is running" without resubscribing.
#[derive(Debug, Clone)]
pub enum RunnerEvent {
    /// An Action is about to enter the queue at `index`.
    QueueAboutToInsert { index: usize },
    /// `action` now sits in the queue at `index`.
    QueueInserted { index: usize, action: Action },
    /// The queue entry at `index` is about to leave.
    QueueAboutToRemove { index: usize },
    /// Action `id` left the queue from `index`.
    QueueRemoved { index: usize, id: ActionId },
    /// A new current Action, or `None` when the slot empties.
    CurrentActionChanged(Option<Action>),
    /// The current Action changed state.
    CurrentStateChanged(StateChange),
    /// The current Action reported progress.
    CurrentProgress(Progress),
    /// The current Action's status line changed.
    CurrentStatusText(String),
    /// The current Action's expected duration changed.
    CurrentExpectedDuration(Option<f64>),
    /// An Action started outside the queue.
    ImmediateAdded(Action),
    /// An immediate Action finished and was released.
    ImmediateRemoved(ActionId),
    /// The Runner was paused or unpaused.
    PausedChanged(bool),
    /// A finished Action was written to the log.
    ActionLogged(LogEntry),
}

/// Contents of the Runner at one instant.
#[derive(Debug, Clone, Default)]
pub struct RunnerSnapshot {
    /// Queued Actions, head first.
    pub queue: Vec<Action>,
    /// The current Action.
    pub current: Option<Action>,
    /// Actions run immediately and still held.
    pub immediate: Vec<Action>,
    /// Whether the queue auto-advances.
    pub paused: bool,
}

/// Decisions the engine delegates to a human operator.
#[async_trait]
pub trait OperatorPrompt: Send + Sync {
    /// An Action with the `PromptUser` failure response failed.
    async fn on_action_failed(&self, action: &Action) -> FailureChoice;

    /// An Action with the `AskOperator` wait policy has unmet
    /// prerequisites.
    async fn on_prerequisites_unmet(&self, action: &Action) -> PrerequisiteChoice;
}

/// Answers every prompt without asking: move on after failures, keep
/// waiting for prerequisites.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoOperator;

#[async_trait]
impl OperatorPrompt for AutoOperator {
    async fn on_action_failed(&self, action: &Action) -> FailureChoice {
        info!(action = %action.id(), "No operator attached; moving on after failure");
        FailureChoice::MoveOn
    }

    async fn on_prerequisites_unmet(&self, _action: &Action) -> PrerequisiteChoice {
        PrerequisiteChoice::Wait
    }
}

/// Handle to the Runner actor.
#[derive(Clone)]
pub struct ActionRunner {
    command_tx: mpsc::UnboundedSender<RunnerCommand>,
    events: broadcast::Sender<RunnerEvent>,
    log: ActionLog,
}

impl std::fmt::Debug for ActionRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRunner")
            .field("stopped", &self.command_tx.is_closed())
            .finish()
    }
}

impl ActionRunner {
    /// Spawn a Runner that answers prompts with [`AutoOperator`].
    pub fn spawn(log: ActionLog, start_paused: bool) -> Self {
        Self::spawn_with_prompt(log, Arc::new(AutoOperator), start_paused, DEFAULT_EVENT_CAPACITY)
    }

    /// Spawn a Runner with an operator prompt and event capacity.
    pub fn spawn_with_prompt(
        log: ActionLog,
        operator: Arc<dyn OperatorPrompt>,
        start_paused: bool,
        event_capacity: usize,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(event_capacity.max(1));
        let link = RunnerLink {
            log: log.clone(),
            operator,
        };
        let actor = RunnerActor::new(link, start_paused, events.clone(), command_tx.downgrade());
        tokio::spawn(actor.run(command_rx));
        Self {
            command_tx,
            events,
            log,
        }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> RunnerCommand,
    ) -> ActionResult<T> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(make(tx))
            .map_err(|_| ActionError::RunnerStopped)?;
        rx.await.map_err(|_| ActionError::RunnerStopped)
    }

    /// The log finished Actions are written to.
    pub fn log(&self) -> &ActionLog {
        &self.log
    }

    /// Runner events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<RunnerEvent> {
        self.events.subscribe()
    }

    /// Snapshot of the Runner plus a subscription to every event after it.
    pub async fn subscribe_with_snapshot(
        &self,
    ) -> ActionResult<(broadcast::Receiver<RunnerEvent>, RunnerSnapshot)> {
        self.request(|response| RunnerCommand::Subscribe { response })
            .await
    }

    /// Resolves once the actor has stopped.
    pub async fn stopped(&self) {
        self.command_tx.closed().await;
    }

    /// Append to the queue. Starts it on the next turn if the Runner is
    /// idle and not paused.
    ///
    /// Returns false, leaving the queue unchanged, for an Action that has
    /// already been started, belongs to a composite, or is already held by
    /// this Runner.
    pub async fn add_to_queue(&self, action: impl Into<Action>) -> ActionResult<bool> {
        let action = action.into();
        self.request(|response| RunnerCommand::AddToQueue { action, response })
            .await
    }

    /// Insert at `index` (clamped to the end). Refused on the same terms as
    /// [`add_to_queue`](Self::add_to_queue).
    pub async fn insert_in_queue(
        &self,
        index: usize,
        action: impl Into<Action>,
    ) -> ActionResult<bool> {
        let action = action.into();
        self.request(|response| RunnerCommand::InsertInQueue {
            index,
            action,
            response,
        })
        .await
    }

    /// Remove the queue entry at `index`.
    pub async fn delete_in_queue(&self, index: usize) -> ActionResult<bool> {
        self.request(|response| RunnerCommand::DeleteInQueue { index, response })
            .await
    }

    /// Queue a fresh copy right after `index`.
    pub async fn duplicate_in_queue(&self, index: usize) -> ActionResult<Option<Action>> {
        self.request(|response| RunnerCommand::DuplicateInQueue { index, response })
            .await
    }

    /// Queue fresh copies of several entries, in order, after the last of
    /// them.
    pub async fn duplicate_many_in_queue(&self, indices: Vec<usize>) -> ActionResult<Vec<Action>> {
        self.request(|response| RunnerCommand::DuplicateManyInQueue { indices, response })
            .await
    }

    /// Move the queue entry at `from` to `to`.
    pub async fn move_in_queue(&self, from: usize, to: usize) -> ActionResult<bool> {
        self.request(|response| RunnerCommand::MoveInQueue { from, to, response })
            .await
    }

    /// While paused, a finishing Action does not advance the queue.
    pub async fn set_paused(&self, paused: bool) -> ActionResult<()> {
        self.request(|response| RunnerCommand::SetPaused { paused, response })
            .await
    }

    /// Whether the queue auto-advance is paused.
    pub async fn is_paused(&self) -> ActionResult<bool> {
        self.request(|response| RunnerCommand::IsPaused { response })
            .await
    }

    /// Start an Action outside the queue. Only `Constructed` Actions are
    /// accepted.
    pub async fn run_immediately(&self, action: impl Into<Action>) -> ActionResult<bool> {
        let action = action.into();
        self.request(|response| RunnerCommand::RunImmediately { action, response })
            .await
    }

    /// Put an Action at the head of the queue and start it now, regardless
    /// of the paused flag. Returns false without touching the queue if
    /// another Action is current or the Action is refused.
    pub async fn run_immediately_in_queue(&self, action: impl Into<Action>) -> ActionResult<bool> {
        let action = action.into();
        self.request(|response| RunnerCommand::RunImmediatelyInQueue { action, response })
            .await
    }

    /// Cancel the current Action. False if there is none or it refused.
    pub async fn cancel_current(&self) -> ActionResult<bool> {
        self.request(|response| RunnerCommand::CancelCurrent { response })
            .await
    }

    /// Pause the current Action. The queue's own paused flag is not touched.
    pub async fn pause_current(&self) -> ActionResult<bool> {
        self.request(|response| RunnerCommand::PauseCurrent { response })
            .await
    }

    /// Resume the current Action.
    pub async fn resume_current(&self) -> ActionResult<bool> {
        self.request(|response| RunnerCommand::ResumeCurrent { response })
            .await
    }

    /// The Action in the current slot.
    pub async fn current_action(&self) -> ActionResult<Option<Action>> {
        self.request(|response| RunnerCommand::GetCurrent { response })
            .await
    }

    /// Queued Actions, head first.
    pub async fn queued_actions(&self) -> ActionResult<Vec<Action>> {
        self.request(|response| RunnerCommand::GetQueue { response })
            .await
    }

    /// Actions started with `run_immediately` and not yet finished.
    pub async fn immediate_actions(&self) -> ActionResult<Vec<Action>> {
        self.request(|response| RunnerCommand::GetImmediate { response })
            .await
    }

    /// Number of queued Actions.
    pub async fn queue_len(&self) -> ActionResult<usize> {
        Ok(self.queued_actions().await?.len())
    }

    /// Drop the queue and stop the actor. Running Actions finish on their
    /// own.
    pub async fn shutdown(&self) -> ActionResult<()> {
        self.request(|response| RunnerCommand::Shutdown { response })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionState, WaitAction};
    use std::time::Duration;

    async fn next_current(events: &mut broadcast::Receiver<RunnerEvent>) -> Option<Action> {
        loop {
            match tokio::time::timeout(Duration::from_secs(5), events.recv()).await {
                Ok(Ok(RunnerEvent::CurrentActionChanged(current))) => return current,
                Ok(Ok(_)) => continue,
                other => panic!("no current-action change: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn insert_into_idle_runner_starts_it() {
        let runner = ActionRunner::spawn(ActionLog::in_memory(), false);
        let mut events = runner.subscribe();
        let wait = WaitAction::action(0.02);
        runner.add_to_queue(wait.clone()).await.unwrap();

        assert_eq!(next_current(&mut events).await, Some(wait.clone()));
        assert_eq!(wait.wait_until_final().await, ActionState::Succeeded);
        assert_eq!(next_current(&mut events).await, None);
        assert_eq!(runner.queue_len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn paused_runner_holds_queue() {
        let runner = ActionRunner::spawn(ActionLog::in_memory(), true);
        let wait = WaitAction::action(0.01);
        runner.add_to_queue(wait.clone()).await.unwrap();
        assert!(runner.current_action().await.unwrap().is_none());
        assert_eq!(runner.queued_actions().await.unwrap(), vec![wait.clone()]);
        assert_eq!(wait.state(), ActionState::Constructed);
    }

    #[tokio::test]
    async fn queue_editing() {
        let runner = ActionRunner::spawn(ActionLog::in_memory(), true);
        let a = WaitAction::action(1.0);
        let b = WaitAction::action(2.0);
        runner.add_to_queue(a.clone()).await.unwrap();
        runner.add_to_queue(b.clone()).await.unwrap();

        assert!(runner.move_in_queue(1, 0).await.unwrap());
        assert_eq!(runner.queued_actions().await.unwrap(), vec![b.clone(), a.clone()]);
        assert!(!runner.move_in_queue(0, 5).await.unwrap());

        let copy = runner.duplicate_in_queue(0).await.unwrap().unwrap();
        assert_eq!(copy.info(), b.info());
        assert_eq!(runner.queue_len().await.unwrap(), 3);

        let copies = runner.duplicate_many_in_queue(vec![2, 0, 9]).await.unwrap();
        assert_eq!(copies.len(), 2);
        let queue = runner.queued_actions().await.unwrap();
        assert_eq!(queue.len(), 5);
        assert_eq!(queue[3], copies[0]);
        assert_eq!(queue[4], copies[1]);

        assert!(runner.delete_in_queue(4).await.unwrap());
        assert!(!runner.delete_in_queue(10).await.unwrap());
        assert_eq!(runner.queue_len().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn control_of_current_without_one_is_refused() {
        let runner = ActionRunner::spawn(ActionLog::in_memory(), false);
        assert!(!runner.cancel_current().await.unwrap());
        assert!(!runner.pause_current().await.unwrap());
        assert!(!runner.resume_current().await.unwrap());
    }

    #[tokio::test]
    async fn stopped_runner_reports_error() {
        let runner = ActionRunner::spawn(ActionLog::in_memory(), true);
        runner.shutdown().await.unwrap();
        assert!(matches!(
            runner.is_paused().await,
            Err(ActionError::RunnerStopped)
        ));
    }
}
