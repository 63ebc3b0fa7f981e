//! The Action state machine.
//!
//! [`Action`] is a cheap, clonable handle. Identity is the handle: two
//! handles are equal when they refer to the same Action. All lifecycle
//! bookkeeping lives here; concrete work is delegated to an
//! [`ActionBehavior`] at the hook points.
//!
//! Notifications never call back into user code. The current state,
//! progress and status text are [`Observable`]s, and every transition is
//! also broadcast as an [`ActionEvent`], so a consumer that needs each
//! edge sees them in order.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::behavior::{ActionBehavior, ActionContext};
use super::info::ActionInfo;
use super::list::ChildList;
use super::prerequisite::{all_satisfied, Prerequisite};
use super::state::{
    ActionState, FailureResponse, PrerequisiteChoice, PrerequisiteWaitPolicy, Progress,
    StateChange,
};
use crate::log::ActionLog;
use crate::observable::Observable;
use crate::runner::OperatorPrompt;

/// Process-lifetime identity of an Action.
pub type ActionId = Uuid;

const EVENT_CAPACITY: usize = 128;

/// Everything an Action announces, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionEvent {
    /// Moved to a new state.
    StateChanged(StateChange),
    /// Entered `Running` for the first time.
    Started,
    /// Finished successfully.
    Succeeded,
    /// Finished with a failure; see [`Action::failure_message`].
    Failed,
    /// Finished by cancellation.
    Cancelled,
    /// New progress report.
    ProgressChanged(Progress),
    /// New status line.
    StatusTextChanged(String),
    /// Expected duration in seconds changed; `None` when unknown.
    ExpectedDurationChanged(Option<f64>),
}

/// Durations derived from the Action's timestamps and accumulators.
///
/// `running == elapsed - paused - waiting_for_prereqs` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ActionTiming {
    /// From the accepted `start()` to the final state (or now).
    pub elapsed: Duration,
    /// `elapsed` minus the paused and prerequisite-wait time.
    pub running: Duration,
    /// Time spent paused (including pausing and resuming).
    pub paused: Duration,
    /// Time spent waiting for prerequisites.
    pub waiting_for_prereqs: Duration,
}

/// The Runner services an Action can reach through its ancestors.
#[derive(Clone)]
pub(crate) struct RunnerLink {
    /// Where finished Actions are written.
    pub log: ActionLog,
    /// Who answers failure and prerequisite prompts.
    pub operator: Arc<dyn OperatorPrompt>,
}

#[derive(Debug)]
struct Lifecycle {
    state: ActionState,
    previous: ActionState,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    start_requested: Option<Instant>,
    finished: Option<Instant>,
    paused_total: Duration,
    paused_since: Option<Instant>,
    waiting_total: Duration,
    waiting_since: Option<Instant>,
    paused_while_waiting: bool,
    failure_message: Option<String>,
}

impl Lifecycle {
    fn new() -> Self {
        Self {
            state: ActionState::Constructed,
            previous: ActionState::Constructed,
            started_at: None,
            ended_at: None,
            start_requested: None,
            finished: None,
            paused_total: Duration::ZERO,
            paused_since: None,
            waiting_total: Duration::ZERO,
            waiting_since: None,
            paused_while_waiting: false,
            failure_message: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Settings {
    prerequisites: Vec<Prerequisite>,
    wait_policy: PrerequisiteWaitPolicy,
    failure_in_runner: FailureResponse,
    failure_as_sub_action: FailureResponse,
}

pub(crate) struct ActionInner {
    id: ActionId,
    info: Mutex<ActionInfo>,
    lifecycle: Mutex<Lifecycle>,
    settings: Mutex<Settings>,
    state: Observable<StateChange>,
    progress: Observable<Progress>,
    status_text: Observable<String>,
    events: broadcast::Sender<ActionEvent>,
    behavior: Mutex<Box<dyn ActionBehavior>>,
    children: Option<ChildList>,
    parent: Mutex<Weak<ActionInner>>,
    link: Mutex<Option<RunnerLink>>,
}

/// Handle to one Action.
#[derive(Clone)]
pub struct Action {
    inner: Arc<ActionInner>,
}

impl PartialEq for Action {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Action {}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Action")
            .field("id", &self.inner.id)
            .field("type", &self.inner.info.lock().type_name)
            .field("state", &self.state())
            .finish()
    }
}

impl Action {
    /// Create an Action in `Constructed`.
    pub fn new(info: ActionInfo, behavior: impl ActionBehavior) -> Self {
        Self::build(info, Box::new(behavior), Settings::default())
    }

    /// Create an Action from an already boxed behavior.
    pub fn from_boxed(info: ActionInfo, behavior: Box<dyn ActionBehavior>) -> Self {
        Self::build(info, behavior, Settings::default())
    }

    fn build(info: ActionInfo, behavior: Box<dyn ActionBehavior>, settings: Settings) -> Self {
        let children = behavior.child_list();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let initial = StateChange {
            state: ActionState::Constructed,
            previous: ActionState::Constructed,
        };
        let inner = Arc::new(ActionInner {
            id: Uuid::new_v4(),
            info: Mutex::new(info),
            lifecycle: Mutex::new(Lifecycle::new()),
            settings: Mutex::new(settings),
            state: Observable::new("state", initial),
            progress: Observable::new("progress", Progress::NOT_STARTED),
            status_text: Observable::new("status_text", String::new()),
            events,
            behavior: Mutex::new(behavior),
            children,
            parent: Mutex::new(Weak::new()),
            link: Mutex::new(None),
        });
        let action = Self { inner };
        if let Some(children) = &action.inner.children {
            children.adopt_owner(&action);
        }
        action
    }

    pub(crate) fn from_inner(inner: Arc<ActionInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<ActionInner> {
        Arc::downgrade(&self.inner)
    }

    fn context(&self) -> ActionContext {
        ActionContext::new(self.downgrade())
    }

    // ------------------------------------------------------------------
    // Identity and description
    // ------------------------------------------------------------------

    /// Identity, stable for the life of the Action. Copies get a new one.
    pub fn id(&self) -> ActionId {
        self.inner.id
    }

    /// A copy of the descriptive record.
    pub fn info(&self) -> ActionInfo {
        self.inner.info.lock().clone()
    }

    /// Shorthand for `info().type_name`.
    pub fn type_name(&self) -> String {
        self.inner.info.lock().type_name.clone()
    }

    /// The descriptive record with composites' children folded into
    /// `parameters.children`, so the record alone can rebuild the tree.
    pub fn info_snapshot(&self) -> ActionInfo {
        let mut info = self.info();
        if let Some(children) = &self.inner.children {
            let snapshots: Vec<serde_json::Value> = children
                .template_actions()
                .iter()
                .filter_map(|child| serde_json::to_value(child.info_snapshot()).ok())
                .collect();
            if !info.parameters.is_object() {
                info.parameters = serde_json::Value::Object(serde_json::Map::new());
            }
            if let Some(params) = info.parameters.as_object_mut() {
                params.insert("children".into(), serde_json::Value::Array(snapshots));
            }
        }
        info
    }

    // ------------------------------------------------------------------
    // Tree structure
    // ------------------------------------------------------------------

    /// The composite containing this Action, if any.
    pub fn parent(&self) -> Option<Action> {
        self.inner.parent.lock().upgrade().map(Action::from_inner)
    }

    pub(crate) fn set_parent(&self, parent: Option<&Action>) {
        *self.inner.parent.lock() = parent.map(Action::downgrade).unwrap_or_default();
    }

    /// Children of a composite Action.
    pub fn children(&self) -> Option<&ChildList> {
        self.inner.children.as_ref()
    }

    /// Whether the Action owns a child list.
    pub fn is_composite(&self) -> bool {
        self.inner.children.is_some()
    }

    /// A composite that logs each child as it finishes instead of logging
    /// itself as one unit.
    pub fn logs_children_individually(&self) -> bool {
        self.inner
            .children
            .as_ref()
            .is_some_and(ChildList::logs_individually)
    }

    pub(crate) fn attach_runner(&self, link: RunnerLink) {
        *self.inner.link.lock() = Some(link);
    }

    /// The Runner services attached to this Action or its nearest ancestor.
    pub(crate) fn runner_link(&self) -> Option<RunnerLink> {
        let mut cursor = Some(self.clone());
        while let Some(action) = cursor {
            if let Some(link) = action.inner.link.lock().clone() {
                return Some(link);
            }
            cursor = action.parent();
        }
        None
    }

    // ------------------------------------------------------------------
    // Configuration (only while Constructed)
    // ------------------------------------------------------------------

    fn configure(&self, f: impl FnOnce(&mut Settings)) -> bool {
        if self.state() != ActionState::Constructed {
            return false;
        }
        f(&mut self.inner.settings.lock());
        true
    }

    /// Gate the next start on `prerequisite`. Refused once the Action has left `Constructed`.
    pub fn add_prerequisite(&self, prerequisite: Prerequisite) -> bool {
        self.configure(|s| s.prerequisites.push(prerequisite))
    }

    /// How to react while prerequisites are unmet. Refused once the Action has left `Constructed`.
    pub fn set_prerequisite_policy(&self, policy: PrerequisiteWaitPolicy) -> bool {
        self.configure(|s| s.wait_policy = policy)
    }

    /// What the Runner does when this Action fails at top level.
    pub fn set_failure_response_in_runner(&self, response: FailureResponse) -> bool {
        self.configure(|s| s.failure_in_runner = response)
    }

    /// What a parent composite does when this Action fails as its child.
    pub fn set_failure_response_as_sub_action(&self, response: FailureResponse) -> bool {
        self.configure(|s| s.failure_as_sub_action = response)
    }

    /// Builder form of [`Action::add_prerequisite`].
    pub fn with_prerequisite(self, prerequisite: Prerequisite) -> Self {
        self.add_prerequisite(prerequisite);
        self
    }

    /// Builder form of [`Action::set_prerequisite_policy`].
    pub fn with_prerequisite_policy(self, policy: PrerequisiteWaitPolicy) -> Self {
        self.set_prerequisite_policy(policy);
        self
    }

    /// Builder form of [`Action::set_failure_response_in_runner`].
    pub fn with_failure_response_in_runner(self, response: FailureResponse) -> Self {
        self.set_failure_response_in_runner(response);
        self
    }

    /// Builder form of [`Action::set_failure_response_as_sub_action`].
    pub fn with_failure_response_as_sub_action(self, response: FailureResponse) -> Self {
        self.set_failure_response_as_sub_action(response);
        self
    }

    /// Gates checked before start.
    pub fn prerequisites(&self) -> Vec<Prerequisite> {
        self.inner.settings.lock().prerequisites.clone()
    }

    /// Wait policy for unmet prerequisites.
    pub fn prerequisite_policy(&self) -> PrerequisiteWaitPolicy {
        self.inner.settings.lock().wait_policy
    }

    /// Response to a top-level failure.
    pub fn failure_response_in_runner(&self) -> FailureResponse {
        self.inner.settings.lock().failure_in_runner
    }

    /// Response to a failure as a child.
    pub fn failure_response_as_sub_action(&self) -> FailureResponse {
        self.inner.settings.lock().failure_as_sub_action
    }

    /// A fresh copy in `Constructed`: same info, settings and (deep-copied)
    /// children, none of the run history.
    pub fn duplicate(&self) -> Action {
        let behavior = self.inner.behavior.lock().duplicate();
        let settings = self.inner.settings.lock().clone();
        Self::build(self.info(), behavior, settings)
    }

    // ------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------

    /// Current state.
    pub fn state(&self) -> ActionState {
        self.inner.lifecycle.lock().state
    }

    /// State before the last transition.
    pub fn previous_state(&self) -> ActionState {
        self.inner.lifecycle.lock().previous
    }

    /// Whether the Action has finished.
    pub fn is_final(&self) -> bool {
        self.state().is_final()
    }

    /// Reason given by the behavior when it reported failure.
    pub fn failure_message(&self) -> Option<String> {
        self.inner.lifecycle.lock().failure_message.clone()
    }

    /// When the Action entered `Running`.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.inner.lifecycle.lock().started_at
    }

    /// When the Action entered a final state.
    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.inner.lifecycle.lock().ended_at
    }

    /// Latest progress report.
    pub fn progress(&self) -> Progress {
        self.inner.progress.get()
    }

    /// Latest status line; empty if none was set.
    pub fn status_text(&self) -> String {
        self.inner.status_text.get()
    }

    /// Expected duration in seconds.
    pub fn expected_duration(&self) -> Option<f64> {
        self.inner.info.lock().expected_duration
    }

    /// All durations computed against a single clock reading.
    pub fn timing(&self) -> ActionTiming {
        let lc = self.inner.lifecycle.lock();
        let Some(begin) = lc.start_requested else {
            return ActionTiming::default();
        };
        let now = lc.finished.unwrap_or_else(Instant::now);
        let open = |since: Option<Instant>| {
            since
                .map(|s| now.saturating_duration_since(s))
                .unwrap_or_default()
        };
        let elapsed = now.saturating_duration_since(begin);
        let paused = lc.paused_total + open(lc.paused_since);
        let waiting = lc.waiting_total + open(lc.waiting_since);
        ActionTiming {
            elapsed,
            running: elapsed.saturating_sub(paused).saturating_sub(waiting),
            paused,
            waiting_for_prereqs: waiting,
        }
    }

    /// Time since start; frozen once final. Zero before the first start.
    pub fn elapsed_time(&self) -> Duration {
        self.timing().elapsed
    }

    /// Elapsed time minus paused and prerequisite-wait time.
    pub fn running_time(&self) -> Duration {
        self.timing().running
    }

    /// Time spent paused so far.
    pub fn paused_time(&self) -> Duration {
        self.timing().paused
    }

    /// Time spent waiting for prerequisites so far.
    pub fn waiting_for_prereqs_time(&self) -> Duration {
        self.timing().waiting_for_prereqs
    }

    /// Every event from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ActionEvent> {
        self.inner.events.subscribe()
    }

    /// Latest state change.
    pub fn subscribe_state(&self) -> watch::Receiver<StateChange> {
        self.inner.state.subscribe()
    }

    /// Progress updates; the receiver starts at the latest value.
    pub fn subscribe_progress(&self) -> watch::Receiver<Progress> {
        self.inner.progress.subscribe()
    }

    /// Resolves once the Action is `Succeeded`, `Failed` or `Cancelled`.
    pub async fn wait_until_final(&self) -> ActionState {
        let mut rx = self.inner.state.subscribe();
        let reached = rx.wait_for(|c| c.state.is_final()).await.map(|c| c.state);
        reached.unwrap_or_else(|_| self.state())
    }

    /// Whether the behavior supports pausing.
    pub fn can_pause(&self) -> bool {
        self.inner.behavior.lock().can_pause()
    }

    // ------------------------------------------------------------------
    // Control
    // ------------------------------------------------------------------

    /// Start the Action. Only legal from `Constructed`.
    pub fn start(&self) -> bool {
        let (policy, satisfied) = {
            let settings = self.inner.settings.lock();
            (settings.wait_policy, all_satisfied(&settings.prerequisites))
        };

        if satisfied {
            if !self.transition_from(ActionState::Constructed, ActionState::Starting) {
                return false;
            }
            self.invoke_start();
            return true;
        }

        if !self.transition_from(ActionState::Constructed, ActionState::WaitingForPrereqs) {
            return false;
        }
        info!(action = %self.id(), ?policy, "Waiting for prerequisites");
        match policy {
            PrerequisiteWaitPolicy::Wait | PrerequisiteWaitPolicy::AskOperator => {
                let action = self.clone();
                tokio::spawn(async move { action.watch_prerequisites().await });
            }
            PrerequisiteWaitPolicy::Cancel => {
                self.transition(ActionState::Cancelling);
                self.transition(ActionState::Cancelled);
            }
            PrerequisiteWaitPolicy::Fail => {
                self.fail_with("prerequisites not satisfied".into());
            }
        }
        true
    }

    /// Request cancellation. Legal from any state except `Cancelling` and
    /// the final states. Cancellation completes when the cancel hook
    /// reports back; an Action whose start hook never ran is cancelled at
    /// once without calling any hook.
    pub fn cancel(&self) -> bool {
        let hooks_ran = {
            let mut lc = self.inner.lifecycle.lock();
            let from = lc.state;
            if !from.can_transition_to(ActionState::Cancelling) {
                return false;
            }
            let never_started = matches!(
                from,
                ActionState::Constructed | ActionState::WaitingForPrereqs
            ) || (from == ActionState::Paused && lc.paused_while_waiting);
            self.apply(&mut lc, ActionState::Cancelling);
            !never_started
        };
        debug!(action = %self.id(), "Cancel requested");
        if hooks_ran {
            let ctx = self.context();
            self.inner.behavior.lock().cancel(ctx);
        } else {
            self.transition(ActionState::Cancelled);
        }
        true
    }

    /// Request a pause. Legal from `Running` (hook-driven) or
    /// `WaitingForPrereqs` (immediate), and only for pausable Actions.
    pub fn pause(&self) -> bool {
        if !self.can_pause() {
            return false;
        }
        let from = {
            let mut lc = self.inner.lifecycle.lock();
            match lc.state {
                ActionState::Running => self.apply(&mut lc, ActionState::Pausing),
                ActionState::WaitingForPrereqs => self.apply(&mut lc, ActionState::Paused),
                _ => return false,
            }
            lc.previous
        };
        if from == ActionState::Running {
            let ctx = self.context();
            self.inner.behavior.lock().pause(ctx);
        }
        true
    }

    /// Resume from `Paused`.
    pub fn resume(&self) -> bool {
        let back_to_waiting = {
            let mut lc = self.inner.lifecycle.lock();
            if lc.state != ActionState::Paused {
                return false;
            }
            let waiting = lc.paused_while_waiting;
            self.apply(&mut lc, ActionState::Resuming);
            waiting
        };
        if back_to_waiting {
            self.transition(ActionState::WaitingForPrereqs);
        } else {
            let ctx = self.context();
            self.inner.behavior.lock().resume(ctx);
        }
        true
    }

    // ------------------------------------------------------------------
    // Hook reports (via ActionContext)
    // ------------------------------------------------------------------

    pub(crate) fn report_started(&self) -> bool {
        self.transition_from(ActionState::Starting, ActionState::Running)
    }

    pub(crate) fn report_paused(&self) -> bool {
        self.transition_from(ActionState::Pausing, ActionState::Paused)
    }

    pub(crate) fn report_pause_refused(&self) -> bool {
        self.transition_from(ActionState::Pausing, ActionState::Running)
    }

    pub(crate) fn report_resumed(&self) -> bool {
        self.transition_from(ActionState::Resuming, ActionState::Running)
    }

    pub(crate) fn report_succeeded(&self) -> bool {
        let mut lc = self.inner.lifecycle.lock();
        if matches!(lc.state, ActionState::Starting | ActionState::Resuming) {
            self.apply(&mut lc, ActionState::Running);
        }
        if !lc.state.can_transition_to(ActionState::Succeeded) {
            return false;
        }
        self.apply(&mut lc, ActionState::Succeeded);
        true
    }

    pub(crate) fn report_failed(&self, reason: String) -> bool {
        self.fail_with(reason)
    }

    pub(crate) fn report_cancelled(&self) -> bool {
        let mut lc = self.inner.lifecycle.lock();
        if lc.state.can_transition_to(ActionState::Cancelling) {
            self.apply(&mut lc, ActionState::Cancelling);
        }
        if lc.state != ActionState::Cancelling {
            return false;
        }
        self.apply(&mut lc, ActionState::Cancelled);
        true
    }

    fn fail_with(&self, reason: String) -> bool {
        let mut lc = self.inner.lifecycle.lock();
        let target = if lc.state == ActionState::Cancelling {
            ActionState::Cancelled
        } else {
            ActionState::Failed
        };
        if !lc.state.can_transition_to(target) {
            return false;
        }
        warn!(action = %self.id(), %reason, "Action failed");
        lc.failure_message = Some(reason);
        self.apply(&mut lc, target);
        true
    }

    pub(crate) fn update_progress(&self, progress: Progress) -> bool {
        let changed = self.inner.progress.set(progress);
        if changed {
            let _ = self.inner.events.send(ActionEvent::ProgressChanged(progress));
        }
        changed
    }

    pub(crate) fn update_status_text(&self, text: String) -> bool {
        let changed = self.inner.status_text.set(text.clone());
        if changed {
            let _ = self.inner.events.send(ActionEvent::StatusTextChanged(text));
        }
        changed
    }

    pub(crate) fn update_expected_duration(&self, seconds: Option<f64>) -> bool {
        {
            let mut info = self.inner.info.lock();
            if info.expected_duration == seconds {
                return false;
            }
            info.expected_duration = seconds;
        }
        let _ = self
            .inner
            .events
            .send(ActionEvent::ExpectedDurationChanged(seconds));
        true
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn invoke_start(&self) {
        let ctx = self.context();
        self.inner.behavior.lock().start(ctx);
    }

    /// Move to `to` if the edge exists from the current state.
    fn transition(&self, to: ActionState) -> bool {
        let mut lc = self.inner.lifecycle.lock();
        if !lc.state.can_transition_to(to) {
            return false;
        }
        self.apply(&mut lc, to);
        true
    }

    /// Move to `to` only if currently in `from`.
    fn transition_from(&self, from: ActionState, to: ActionState) -> bool {
        let mut lc = self.inner.lifecycle.lock();
        if lc.state != from || !from.can_transition_to(to) {
            return false;
        }
        self.apply(&mut lc, to);
        true
    }

    /// Perform a checked transition: bookkeeping plus notifications, all
    /// under the lifecycle lock so observers see edges in order.
    fn apply(&self, lc: &mut Lifecycle, to: ActionState) {
        let from = lc.state;
        debug_assert!(from.can_transition_to(to), "{from} -> {to}");
        let now = Instant::now();

        if from == ActionState::Constructed && to != ActionState::Cancelling {
            lc.start_requested = Some(now);
        }
        if from == ActionState::WaitingForPrereqs {
            if let Some(since) = lc.waiting_since.take() {
                lc.waiting_total += now.saturating_duration_since(since);
            }
        }
        if from == ActionState::Paused {
            if let Some(since) = lc.paused_since.take() {
                lc.paused_total += now.saturating_duration_since(since);
            }
        }
        match to {
            ActionState::WaitingForPrereqs => lc.waiting_since = Some(now),
            ActionState::Paused => {
                lc.paused_since = Some(now);
                lc.paused_while_waiting = from == ActionState::WaitingForPrereqs;
            }
            ActionState::Running if from == ActionState::Starting => {
                lc.started_at = Some(Utc::now());
            }
            _ => {}
        }
        if to.is_final() {
            lc.ended_at = Some(Utc::now());
            lc.finished = Some(now);
        }

        lc.previous = from;
        lc.state = to;

        let change = StateChange {
            state: to,
            previous: from,
        };
        debug!(action = %self.inner.id, %from, %to, "State changed");
        self.inner.state.replace(change);
        let _ = self.inner.events.send(ActionEvent::StateChanged(change));

        if to == ActionState::Running && from == ActionState::Starting {
            if self.inner.progress.get() == Progress::NOT_STARTED {
                self.inner.progress.replace(Progress::INDETERMINATE);
                let _ = self
                    .inner
                    .events
                    .send(ActionEvent::ProgressChanged(Progress::INDETERMINATE));
            }
            let _ = self.inner.events.send(ActionEvent::Started);
        }
        let terminal = match to {
            ActionState::Succeeded => Some(ActionEvent::Succeeded),
            ActionState::Failed => Some(ActionEvent::Failed),
            ActionState::Cancelled => Some(ActionEvent::Cancelled),
            _ => None,
        };
        if let Some(event) = terminal {
            let _ = self.inner.events.send(event);
        }
    }

    /// Background wait for prerequisites; started from `start()`.
    async fn watch_prerequisites(self) {
        let prerequisites = self.prerequisites();
        let ask_operator = self.prerequisite_policy() == PrerequisiteWaitPolicy::AskOperator;
        let mut gates: Vec<watch::Receiver<bool>> =
            prerequisites.iter().map(Prerequisite::subscribe).collect();
        let mut state_rx = self.subscribe_state();
        let mut prompt_pending = ask_operator;

        loop {
            match self.state() {
                ActionState::WaitingForPrereqs => {
                    if all_satisfied(&prerequisites) {
                        if self.transition_from(
                            ActionState::WaitingForPrereqs,
                            ActionState::Starting,
                        ) {
                            info!(action = %self.id(), "Prerequisites satisfied");
                            self.invoke_start();
                        }
                        return;
                    }
                    if prompt_pending {
                        prompt_pending = false;
                        match self.ask_about_prerequisites().await {
                            PrerequisiteChoice::Wait => {}
                            PrerequisiteChoice::Cancel => {
                                self.cancel();
                                return;
                            }
                            PrerequisiteChoice::Fail => {
                                self.fail_with("prerequisites not satisfied".into());
                                return;
                            }
                        }
                        continue;
                    }
                }
                ActionState::Paused | ActionState::Resuming => {}
                _ => return,
            }

            let gate_fired = {
                let any_gate = async {
                    let changes = gates.iter_mut().map(|g| Box::pin(g.changed()));
                    let _ = futures::future::select_all(changes).await;
                };
                tokio::select! {
                    _ = any_gate => true,
                    changed = state_rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        false
                    }
                }
            };
            if gate_fired && ask_operator && !all_satisfied(&prerequisites) {
                prompt_pending = true;
            }
        }
    }

    async fn ask_about_prerequisites(&self) -> PrerequisiteChoice {
        match self.runner_link() {
            Some(link) => link.operator.on_prerequisites_unmet(self).await,
            None => PrerequisiteChoice::Wait,
        }
    }
}
