//! The Runner actor: sole owner of the queue, the current Action and the
//! immediate Actions.
//!
//! All state lives in one task and changes only in response to
//! [`RunnerCommand`]s. Work that must not run inside the finishing
//! Action's call stack (starting the next Action, releasing the old one)
//! is posted back to the mailbox and handled on a later turn.

use std::collections::VecDeque;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::messages::{RunnerCommand, Slot};
use super::{RunnerEvent, RunnerSnapshot};
use crate::action::{
    Action, ActionEvent, ActionId, ActionState, FailureChoice, FailureResponse, RunnerLink,
};
use crate::log::ActionLog;

pub(crate) struct RunnerActor {
    queue: VecDeque<Action>,
    current: Option<Action>,
    immediate: Vec<Action>,
    paused: bool,
    link: RunnerLink,
    events: broadcast::Sender<RunnerEvent>,
    self_tx: mpsc::WeakUnboundedSender<RunnerCommand>,
    retired: Vec<Action>,
    forwarder: Option<JoinHandle<()>>,
}

impl RunnerActor {
    pub(crate) fn new(
        link: RunnerLink,
        paused: bool,
        events: broadcast::Sender<RunnerEvent>,
        self_tx: mpsc::WeakUnboundedSender<RunnerCommand>,
    ) -> Self {
        Self {
            queue: VecDeque::new(),
            current: None,
            immediate: Vec::new(),
            paused,
            link,
            events,
            self_tx,
            retired: Vec::new(),
            forwarder: None,
        }
    }

    /// Process commands until shutdown or until every handle is dropped.
    pub(crate) async fn run(mut self, mut command_rx: mpsc::UnboundedReceiver<RunnerCommand>) {
        info!(paused = self.paused, "Action runner started");

        while let Some(command) = command_rx.recv().await {
            match command {
                RunnerCommand::AddToQueue { action, response } => {
                    let index = self.queue.len();
                    let _ = response.send(self.insert(index, action));
                }

                RunnerCommand::InsertInQueue {
                    index,
                    action,
                    response,
                } => {
                    let _ = response.send(self.insert(index, action));
                }

                RunnerCommand::DeleteInQueue { index, response } => {
                    let _ = response.send(self.take_from_queue(index).is_some());
                }

                RunnerCommand::DuplicateInQueue { index, response } => {
                    let _ = response.send(self.duplicate(index));
                }

                RunnerCommand::DuplicateManyInQueue { indices, response } => {
                    let _ = response.send(self.duplicate_many(indices));
                }

                RunnerCommand::MoveInQueue { from, to, response } => {
                    let _ = response.send(self.move_in_queue(from, to));
                }

                RunnerCommand::SetPaused { paused, response } => {
                    self.set_paused(paused);
                    let _ = response.send(());
                }

                RunnerCommand::IsPaused { response } => {
                    let _ = response.send(self.paused);
                }

                RunnerCommand::RunImmediately { action, response } => {
                    let _ = response.send(self.run_immediately(action));
                }

                RunnerCommand::RunImmediatelyInQueue { action, response } => {
                    let _ = response.send(self.run_immediately_in_queue(action));
                }

                RunnerCommand::CancelCurrent { response } => {
                    let done = self.current.as_ref().is_some_and(Action::cancel);
                    let _ = response.send(done);
                }

                RunnerCommand::PauseCurrent { response } => {
                    let done = self.current.as_ref().is_some_and(Action::pause);
                    let _ = response.send(done);
                }

                RunnerCommand::ResumeCurrent { response } => {
                    let done = self.current.as_ref().is_some_and(Action::resume);
                    let _ = response.send(done);
                }

                RunnerCommand::GetCurrent { response } => {
                    let _ = response.send(self.current.clone());
                }

                RunnerCommand::GetQueue { response } => {
                    let _ = response.send(self.queue.iter().cloned().collect());
                }

                RunnerCommand::GetImmediate { response } => {
                    let _ = response.send(self.immediate.clone());
                }

                RunnerCommand::Subscribe { response } => {
                    let _ = response.send((self.events.subscribe(), self.snapshot()));
                }

                RunnerCommand::Shutdown { response } => {
                    self.shutdown();
                    let _ = response.send(());
                    break;
                }

                RunnerCommand::StartAction { id } => self.start_current(id),

                RunnerCommand::ActionFinished { action, slot } => {
                    self.handle_finished(action, slot);
                }

                RunnerCommand::FailureResolved {
                    action,
                    slot,
                    choice,
                } => {
                    self.complete(action, slot, choice == FailureChoice::AttemptAnotherCopy);
                }

                RunnerCommand::DrainRetired => {
                    if !self.retired.is_empty() {
                        debug!(count = self.retired.len(), "Releasing finished actions");
                        self.retired.clear();
                    }
                }
            }
        }

        info!("Action runner stopped");
    }

    fn post(&self, command: RunnerCommand) {
        match self.self_tx.upgrade() {
            Some(tx) => {
                let _ = tx.send(command);
            }
            None => debug!("Runner mailbox closed; dropping deferred command"),
        }
    }

    fn emit(&self, event: RunnerEvent) {
        let _ = self.events.send(event);
    }

    fn snapshot(&self) -> RunnerSnapshot {
        RunnerSnapshot {
            queue: self.queue.iter().cloned().collect(),
            current: self.current.clone(),
            immediate: self.immediate.clone(),
            paused: self.paused,
        }
    }

    fn is_idle(&self) -> bool {
        self.current.is_none()
    }

    // ------------------------------------------------------------------
    // Queue editing
    // ------------------------------------------------------------------

    /// Whether `action` may enter the queue or the immediate set: never
    /// started, not a child of a composite and not already held here.
    fn accepts(&self, action: &Action) -> bool {
        action.state() == ActionState::Constructed
            && action.parent().is_none()
            && self.current.as_ref() != Some(action)
            && !self.queue.contains(action)
            && !self.immediate.contains(action)
    }

    fn insert(&mut self, index: usize, action: Action) -> bool {
        if !self.accepts(&action) {
            warn!(action = %action.id(), state = %action.state(), "Refusing to queue action");
            return false;
        }
        let index = index.min(self.queue.len());
        action.attach_runner(self.link.clone());
        self.emit(RunnerEvent::QueueAboutToInsert { index });
        self.queue.insert(index, action.clone());
        self.emit(RunnerEvent::QueueInserted { index, action });
        if !self.paused && self.is_idle() {
            self.internal_advance();
        }
        true
    }

    fn take_from_queue(&mut self, index: usize) -> Option<Action> {
        if index >= self.queue.len() {
            return None;
        }
        self.emit(RunnerEvent::QueueAboutToRemove { index });
        let action = self.queue.remove(index)?;
        self.emit(RunnerEvent::QueueRemoved {
            index,
            id: action.id(),
        });
        Some(action)
    }

    fn duplicate(&mut self, index: usize) -> Option<Action> {
        let copy = self.queue.get(index)?.duplicate();
        self.insert(index + 1, copy.clone()).then_some(copy)
    }

    fn duplicate_many(&mut self, mut indices: Vec<usize>) -> Vec<Action> {
        indices.sort_unstable();
        indices.dedup();
        indices.retain(|&i| i < self.queue.len());
        let Some(&last) = indices.last() else {
            return Vec::new();
        };
        let copies: Vec<Action> = indices.iter().map(|&i| self.queue[i].duplicate()).collect();
        for (offset, copy) in copies.iter().enumerate() {
            let _ = self.insert(last + 1 + offset, copy.clone());
        }
        copies
    }

    fn move_in_queue(&mut self, from: usize, to: usize) -> bool {
        if from >= self.queue.len() || to >= self.queue.len() {
            return false;
        }
        if from == to {
            return true;
        }
        let Some(action) = self.take_from_queue(from) else {
            return false;
        };
        self.emit(RunnerEvent::QueueAboutToInsert { index: to });
        self.queue.insert(to, action.clone());
        self.emit(RunnerEvent::QueueInserted { index: to, action });
        true
    }

    fn set_paused(&mut self, paused: bool) {
        if self.paused == paused {
            return;
        }
        self.paused = paused;
        info!(paused, "Runner pause state changed");
        self.emit(RunnerEvent::PausedChanged(paused));
        if !paused && self.is_idle() {
            self.internal_advance();
        }
    }

    // ------------------------------------------------------------------
    // Running
    // ------------------------------------------------------------------

    fn run_immediately(&mut self, action: Action) -> bool {
        if !self.accepts(&action) {
            return false;
        }
        action.attach_runner(self.link.clone());
        self.immediate.push(action.clone());
        self.emit(RunnerEvent::ImmediateAdded(action.clone()));
        self.watch_until_final(&action, Slot::Immediate);
        info!(action = %action.id(), "Running action immediately");
        action.start()
    }

    /// Refused, leaving the queue untouched, while another Action is
    /// current.
    fn run_immediately_in_queue(&mut self, action: Action) -> bool {
        if !self.is_idle() {
            return false;
        }
        // Unpaused just for this insert, which then advances on its own.
        let was_paused = self.paused;
        self.paused = false;
        let inserted = self.insert(0, action);
        self.paused = was_paused;
        inserted
    }

    fn start_current(&mut self, id: ActionId) {
        match &self.current {
            Some(action) if action.id() == id => {
                if !action.start() {
                    warn!(action = %id, state = %action.state(), "Current action could not start");
                }
            }
            _ => debug!(action = %id, "Start request for an action no longer current"),
        }
    }

    /// Promote the head of the queue to current, or clear the current slot
    /// when paused or empty. The next Action starts on a later turn.
    fn internal_advance(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }

        if self.paused || self.queue.is_empty() {
            if let Some(old) = self.current.take() {
                self.emit(RunnerEvent::CurrentActionChanged(None));
                self.retire(old);
            }
            return;
        }

        let Some(next) = self.take_from_queue(0) else {
            return;
        };
        if let Some(old) = self.current.replace(next.clone()) {
            self.retire(old);
        }
        info!(action = %next.id(), kind = %next.type_name(), "Advancing to next action");
        self.emit(RunnerEvent::CurrentActionChanged(Some(next.clone())));
        self.forwarder = Some(spawn_forwarder(&next, self.events.clone()));
        self.watch_until_final(&next, Slot::Current);
        self.post(RunnerCommand::StartAction { id: next.id() });
    }

    fn watch_until_final(&self, action: &Action, slot: Slot) {
        let action = action.clone();
        let tx = self.self_tx.clone();
        tokio::spawn(async move {
            action.wait_until_final().await;
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(RunnerCommand::ActionFinished { action, slot });
            }
        });
    }

    // ------------------------------------------------------------------
    // Completion
    // ------------------------------------------------------------------

    fn handle_finished(&mut self, action: Action, slot: Slot) {
        let state = action.state();
        info!(action = %action.id(), %state, ?slot, "Action finished");

        match state {
            ActionState::Failed => match action.failure_response_in_runner() {
                FailureResponse::MoveOn => self.complete(action, slot, false),
                FailureResponse::AttemptAnotherCopy => self.complete(action, slot, true),
                FailureResponse::PromptUser => self.prompt_for_failure(action, slot),
            },
            ActionState::Cancelled => {
                if slot == Slot::Current && !self.paused {
                    info!(action = %action.id(), "Cancelled action pauses the runner");
                    self.set_paused(true);
                }
                self.complete(action, slot, false);
            }
            _ => self.complete(action, slot, false),
        }
    }

    fn prompt_for_failure(&self, action: Action, slot: Slot) {
        let operator = self.link.operator.clone();
        let tx = self.self_tx.clone();
        tokio::spawn(async move {
            let choice = operator.on_action_failed(&action).await;
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(RunnerCommand::FailureResolved {
                    action,
                    slot,
                    choice,
                });
            }
        });
    }

    /// Log, optionally retry, then advance (current) or release
    /// (immediate).
    fn complete(&mut self, action: Action, slot: Slot, retry: bool) {
        if !action.logs_children_individually() {
            self.spawn_log(&action);
        }

        if retry {
            let copy = action.duplicate();
            info!(failed = %action.id(), copy = %copy.id(), "Retrying with a fresh copy");
            match slot {
                // The failed Action still occupies the current slot, so this
                // insert does not advance on its own.
                Slot::Current => {
                    let _ = self.insert(0, copy);
                }
                Slot::Immediate => {
                    self.run_immediately(copy);
                }
            }
        }

        match slot {
            Slot::Current => {
                if self.current.as_ref() == Some(&action) {
                    self.internal_advance();
                }
            }
            Slot::Immediate => {
                if let Some(pos) = self.immediate.iter().position(|a| a == &action) {
                    let finished = self.immediate.remove(pos);
                    self.emit(RunnerEvent::ImmediateRemoved(finished.id()));
                    self.retire(finished);
                }
            }
        }
    }

    fn spawn_log(&self, action: &Action) {
        let log = self.link.log.clone();
        let events = self.events.clone();
        let action = action.clone();
        tokio::spawn(async move { log_finished(&log, &events, &action).await });
    }

    fn retire(&mut self, action: Action) {
        self.retired.push(action);
        self.post(RunnerCommand::DrainRetired);
    }

    fn shutdown(&mut self) {
        info!(
            queued = self.queue.len(),
            immediate = self.immediate.len(),
            "Shutting down action runner"
        );
        self.queue.clear();
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
        // Anything still held has not been through `complete`, so it is
        // logged here once it ends.
        let held = self.current.take().into_iter().chain(self.immediate.drain(..));
        for action in held {
            let log = self.link.log.clone();
            let events = self.events.clone();
            tokio::spawn(async move {
                action.wait_until_final().await;
                if !action.logs_children_individually() {
                    log_finished(&log, &events, &action).await;
                }
            });
        }
        self.retired.clear();
    }
}

async fn log_finished(log: &ActionLog, events: &broadcast::Sender<RunnerEvent>, action: &Action) {
    match log.log_completed(action).await {
        Ok(entry) => {
            let _ = events.send(RunnerEvent::ActionLogged(entry));
        }
        // Already reported to the monitor; the queue carries on.
        Err(err) => warn!(action = %action.id(), error = %err, "Action was not logged"),
    }
}

/// Re-broadcast the current Action's changes as Runner events.
fn spawn_forwarder(action: &Action, events: broadcast::Sender<RunnerEvent>) -> JoinHandle<()> {
    let mut rx = action.subscribe();
    let id = action.id();
    tokio::spawn(async move {
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(action = %id, skipped, "Runner event forwarder lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            let forwarded = match event {
                ActionEvent::StateChanged(change) => RunnerEvent::CurrentStateChanged(change),
                ActionEvent::ProgressChanged(progress) => RunnerEvent::CurrentProgress(progress),
                ActionEvent::StatusTextChanged(text) => RunnerEvent::CurrentStatusText(text),
                ActionEvent::ExpectedDurationChanged(seconds) => {
                    RunnerEvent::CurrentExpectedDuration(seconds)
                }
                _ => continue,
            };
            let _ = events.send(forwarded);
        }
    })
}
