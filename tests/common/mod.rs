//! Common test utilities for daq-actions integration tests
//!
//! This module provides reusable test helpers for:
//! - Scripted Action behaviors with a fixed duration and outcome
//! - Operators and log stores with controllable answers
//! - Waiting on Runner events with a timeout

#![allow(dead_code)] // Utilities may not all be used by every test file

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use daq_actions::action::{FailureChoice, PrerequisiteChoice};
use daq_actions::{
    Action, ActionBehavior, ActionContext, ActionError, ActionInfo, ActionLog, ActionResult,
    LogEntry, LogStore, OperatorPrompt, RunnerEvent,
};

/// Upper bound for any single wait in these tests.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// How a [`Scripted`] Action ends once its time is up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Succeed,
    Fail,
    /// Fail this many runs (counted across copies), then succeed.
    FailTimes(usize),
}

/// Runs for a fixed time, then succeeds or fails. Copies share the run
/// counter, so retries can be counted from the original.
pub struct Scripted {
    delay: Duration,
    outcome: Outcome,
    runs: Arc<AtomicUsize>,
    timer: Option<JoinHandle<()>>,
}

impl Scripted {
    pub fn new(delay: Duration, outcome: Outcome) -> Self {
        Self {
            delay,
            outcome,
            runs: Arc::new(AtomicUsize::new(0)),
            timer: None,
        }
    }

    pub fn runs(&self) -> Arc<AtomicUsize> {
        self.runs.clone()
    }
}

impl ActionBehavior for Scripted {
    fn start(&mut self, ctx: ActionContext) {
        let run = self.runs.fetch_add(1, Ordering::SeqCst);
        let succeed = match self.outcome {
            Outcome::Succeed => true,
            Outcome::Fail => false,
            Outcome::FailTimes(n) => run >= n,
        };
        ctx.set_started();
        let delay = self.delay;
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if succeed {
                ctx.set_succeeded();
            } else {
                ctx.set_failed(format!("scripted failure on run {}", run + 1));
            }
        }));
    }

    fn cancel(&mut self, ctx: ActionContext) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        ctx.set_cancelled();
    }

    fn duplicate(&self) -> Box<dyn ActionBehavior> {
        Box::new(Scripted {
            delay: self.delay,
            outcome: self.outcome,
            runs: self.runs.clone(),
            timer: None,
        })
    }
}

/// A scripted Action plus its shared run counter.
pub fn scripted(name: &str, millis: u64, outcome: Outcome) -> (Action, Arc<AtomicUsize>) {
    let behavior = Scripted::new(Duration::from_millis(millis), outcome);
    let runs = behavior.runs();
    let info = ActionInfo::new("scripted", name).with_expected_duration(millis as f64 / 1000.0);
    (Action::new(info, behavior), runs)
}

/// Operator with canned answers that counts the questions.
///
/// Failures always get `failure_choice`. Prerequisite prompts take the
/// next queued answer, then `Wait` once the queue runs dry.
#[derive(Default)]
pub struct ScriptedOperator {
    pub failure_choice: Option<FailureChoice>,
    pub failures_asked: AtomicUsize,
    pub prerequisite_answers: Mutex<VecDeque<PrerequisiteChoice>>,
    pub prerequisites_asked: AtomicUsize,
}

impl ScriptedOperator {
    pub fn answering(choice: FailureChoice) -> Arc<Self> {
        Arc::new(Self {
            failure_choice: Some(choice),
            ..Self::default()
        })
    }

    pub fn answering_prerequisites(
        answers: impl IntoIterator<Item = PrerequisiteChoice>,
    ) -> Arc<Self> {
        Arc::new(Self {
            prerequisite_answers: Mutex::new(answers.into_iter().collect()),
            ..Self::default()
        })
    }
}

#[async_trait]
impl OperatorPrompt for ScriptedOperator {
    async fn on_action_failed(&self, _action: &Action) -> FailureChoice {
        self.failures_asked.fetch_add(1, Ordering::SeqCst);
        self.failure_choice.unwrap_or(FailureChoice::MoveOn)
    }

    async fn on_prerequisites_unmet(&self, _action: &Action) -> PrerequisiteChoice {
        self.prerequisites_asked.fetch_add(1, Ordering::SeqCst);
        self.prerequisite_answers
            .lock()
            .pop_front()
            .unwrap_or(PrerequisiteChoice::Wait)
    }
}

/// A log store whose every write fails.
#[derive(Default)]
pub struct BrokenStore {
    pub attempts: AtomicUsize,
    pub stored: Mutex<Vec<LogEntry>>,
}

#[async_trait]
impl LogStore for BrokenStore {
    async fn store(&self, _entry: &LogEntry) -> ActionResult<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(ActionError::store("disk full"))
    }

    async fn get(&self, _id: Uuid) -> ActionResult<Option<LogEntry>> {
        Ok(None)
    }

    async fn query_range(
        &self,
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
        _limit: Option<usize>,
    ) -> ActionResult<Vec<LogEntry>> {
        Ok(self.stored.lock().clone())
    }

    async fn count_range(&self, _from: DateTime<Utc>, _to: DateTime<Utc>) -> ActionResult<usize> {
        Ok(0)
    }
}

/// Wait for the next event matching `pick`, failing the test after
/// [`EVENT_TIMEOUT`].
pub async fn next_event<T>(
    events: &mut broadcast::Receiver<RunnerEvent>,
    mut pick: impl FnMut(RunnerEvent) -> Option<T>,
) -> T {
    let found = tokio::time::timeout(EVENT_TIMEOUT, async {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Some(found) = pick(event) {
                        return found;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("runner event channel closed"),
            }
        }
    })
    .await;
    found.expect("timed out waiting for runner event")
}

/// Next change of the Runner's current Action.
pub async fn next_current(events: &mut broadcast::Receiver<RunnerEvent>) -> Option<Action> {
    next_event(events, |event| match event {
        RunnerEvent::CurrentActionChanged(current) => Some(current),
        _ => None,
    })
    .await
}

/// Next log entry written by the Runner.
pub async fn next_logged(events: &mut broadcast::Receiver<RunnerEvent>) -> LogEntry {
    next_event(events, |event| match event {
        RunnerEvent::ActionLogged(entry) => Some(entry),
        _ => None,
    })
    .await
}

/// Poll `condition` until it holds, failing the test after [`EVENT_TIMEOUT`].
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + EVENT_TIMEOUT;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached within {EVENT_TIMEOUT:?}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Poll `log` until it holds at least `count` entries from the last hour,
/// then return them, most recent first.
pub async fn wait_for_log(log: &ActionLog, count: usize) -> Vec<LogEntry> {
    let since = Utc::now() - chrono::Duration::hours(1);
    let deadline = tokio::time::Instant::now() + EVENT_TIMEOUT;
    loop {
        let entries = log
            .entries_between(since, Utc::now(), None)
            .await
            .expect("log query failed");
        if entries.len() >= count {
            return entries;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "only {} of {count} log entries appeared",
            entries.len()
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
