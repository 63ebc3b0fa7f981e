//! Composite Actions: an ordered list of children run one after another.
//!
//! A [`ChildList`] is the shared container; [`ListAction`] is the typed
//! handle that pairs an [`Action`] with its children. Sequencing runs on
//! a spawned task that follows each child's state stream and mirrors
//! pause/resume/cancel between the list and the running child.

use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::behavior::{ActionBehavior, ActionContext};
use super::info::ActionInfo;
use super::machine::{Action, ActionId, ActionInner};
use super::state::{ActionState, FailureChoice, FailureResponse};

const EVENT_CAPACITY: usize = 128;

/// Structural change to a [`ChildList`].
///
/// Inserts and removals arrive as about-to/done pairs so a tree view can
/// bracket its own update. A move is a removal followed by an insert.
#[derive(Debug, Clone)]
pub enum ChildListEvent {
    /// A child is about to be inserted at `index`.
    AboutToAdd { index: usize },
    /// `action` now sits at `index`.
    Added { index: usize, action: Action },
    /// The child at `index` is about to be removed.
    AboutToRemove { index: usize },
    /// The child `id` was removed from `index`.
    Removed { index: usize, id: ActionId },
    /// The running child changed; `None` between children and after the run.
    CurrentChildChanged { index: Option<usize> },
}

struct ChildListInner {
    children: Mutex<Vec<Action>>,
    owner: Mutex<Weak<ActionInner>>,
    templates: Mutex<Option<Vec<Action>>>,
    current: Mutex<Option<usize>>,
    log_individually: AtomicBool,
    events: broadcast::Sender<ChildListEvent>,
}

/// Ordered children of a composite Action.
///
/// Clones share the same list. The list owns its children; each child
/// holds only a weak back-reference to the owning Action.
#[derive(Clone)]
pub struct ChildList {
    inner: Arc<ChildListInner>,
}

impl std::fmt::Debug for ChildList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.inner.children.lock().iter()).finish()
    }
}

impl Default for ChildList {
    fn default() -> Self {
        Self::new()
    }
}

impl ChildList {
    /// An empty list with no owner yet.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(ChildListInner {
                children: Mutex::new(Vec::new()),
                owner: Mutex::new(Weak::new()),
                templates: Mutex::new(None),
                current: Mutex::new(None),
                log_individually: AtomicBool::new(false),
                events,
            }),
        }
    }

    /// The composite Action this list belongs to.
    pub fn owner(&self) -> Option<Action> {
        self.inner.owner.lock().upgrade().map(Action::from_inner)
    }

    pub(crate) fn adopt_owner(&self, owner: &Action) {
        *self.inner.owner.lock() = owner.downgrade();
        for child in self.inner.children.lock().iter() {
            child.set_parent(Some(owner));
        }
    }

    /// Number of children.
    pub fn len(&self) -> usize {
        self.inner.children.lock().len()
    }

    /// Whether there are no children.
    pub fn is_empty(&self) -> bool {
        self.inner.children.lock().is_empty()
    }

    /// Child at `index`.
    pub fn get(&self, index: usize) -> Option<Action> {
        self.inner.children.lock().get(index).cloned()
    }

    /// Snapshot of the children in order.
    pub fn actions(&self) -> Vec<Action> {
        self.inner.children.lock().clone()
    }

    /// Position of `action` among the children.
    pub fn index_of(&self, action: &Action) -> Option<usize> {
        self.inner.children.lock().iter().position(|c| c == action)
    }

    /// Index of the child being run, if any.
    pub fn current_index(&self) -> Option<usize> {
        *self.inner.current.lock()
    }

    /// Structural changes from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ChildListEvent> {
        self.inner.events.subscribe()
    }

    /// The children and a subscription taken under one lock: every event
    /// received afterwards applies on top of the returned snapshot.
    pub fn snapshot_and_subscribe(&self) -> (Vec<Action>, broadcast::Receiver<ChildListEvent>) {
        let children = self.inner.children.lock();
        (children.clone(), self.inner.events.subscribe())
    }

    /// Log each child as it finishes instead of the composite as one unit.
    pub fn set_logs_individually(&self, enabled: bool) {
        self.inner.log_individually.store(enabled, Ordering::SeqCst);
    }

    /// Whether finished children are logged one by one.
    pub fn logs_individually(&self) -> bool {
        self.inner.log_individually.load(Ordering::SeqCst)
    }

    /// Insert at the end. Refused on the same terms as [`insert`](Self::insert).
    pub fn append(&self, action: Action) -> bool {
        let index = self.len();
        self.insert(index, action)
    }

    /// Insert at `index` (clamped to the end). The child must not already
    /// belong to another composite, nor be this list's owner or one of its
    /// ancestors.
    pub fn insert(&self, index: usize, action: Action) -> bool {
        if action.parent().is_some() || action.downgrade().ptr_eq(&self.inner.owner.lock()) {
            return false;
        }
        let owner = self.owner();
        let mut ancestor = owner.clone();
        while let Some(a) = ancestor {
            if a == action {
                return false;
            }
            ancestor = a.parent();
        }
        let mut children = self.inner.children.lock();
        if children.contains(&action) {
            return false;
        }
        let index = index.min(children.len());
        action.set_parent(owner.as_ref());
        let _ = self.inner.events.send(ChildListEvent::AboutToAdd { index });
        children.insert(index, action.clone());
        let _ = self.inner.events.send(ChildListEvent::Added { index, action });
        true
    }

    /// Delete the child at `index`. Refused while the child is live.
    pub fn remove(&self, index: usize) -> bool {
        self.take(index).is_some()
    }

    /// Detach the child at `index` without destroying it. Refused while the
    /// child is live.
    pub fn take(&self, index: usize) -> Option<Action> {
        let mut children = self.inner.children.lock();
        let child = children.get(index)?;
        if child.state().is_live() {
            return None;
        }
        let _ = self.inner.events.send(ChildListEvent::AboutToRemove { index });
        let child = children.remove(index);
        child.set_parent(None);
        let _ = self.inner.events.send(ChildListEvent::Removed {
            index,
            id: child.id(),
        });
        Some(child)
    }

    /// Move a child that is not live from `from` to `to`.
    pub fn move_child(&self, from: usize, to: usize) -> bool {
        let mut children = self.inner.children.lock();
        let Some(child) = children.get(from) else {
            return false;
        };
        if child.state().is_live() || to >= children.len() {
            return false;
        }
        if from == to {
            return true;
        }
        let _ = self
            .inner
            .events
            .send(ChildListEvent::AboutToRemove { index: from });
        let child = children.remove(from);
        let _ = self.inner.events.send(ChildListEvent::Removed {
            index: from,
            id: child.id(),
        });
        let _ = self.inner.events.send(ChildListEvent::AboutToAdd { index: to });
        children.insert(to, child.clone());
        let _ = self.inner.events.send(ChildListEvent::Added {
            index: to,
            action: child,
        });
        true
    }

    /// Insert a fresh copy of the child at `index` right after it.
    pub fn duplicate(&self, index: usize) -> Option<Action> {
        let copy = self.get(index)?.duplicate();
        self.insert(index + 1, copy.clone()).then_some(copy)
    }

    pub(crate) fn set_current(&self, index: Option<usize>) {
        let mut current = self.inner.current.lock();
        if *current != index {
            *current = index;
            let _ = self
                .inner
                .events
                .send(ChildListEvent::CurrentChildChanged { index });
        }
    }

    /// Children that describe one pass: the loop templates once a run has
    /// started, otherwise the children themselves.
    pub(crate) fn template_actions(&self) -> Vec<Action> {
        match &*self.inner.templates.lock() {
            Some(templates) => templates.clone(),
            None => self.actions(),
        }
    }

    fn freeze_templates(&self) -> Vec<Action> {
        let templates: Vec<Action> = self.actions().iter().map(Action::duplicate).collect();
        *self.inner.templates.lock() = Some(templates.clone());
        templates
    }

    fn deep_copy(&self) -> ChildList {
        let copy = ChildList::new();
        copy.set_logs_individually(self.logs_individually());
        for child in self.template_actions() {
            copy.append(child.duplicate());
        }
        copy
    }
}

/// A composite Action running its children in order, optionally repeating
/// them.
#[derive(Debug, Clone)]
pub struct ListAction {
    action: Action,
    children: ChildList,
}

impl ListAction {
    /// Run the children once, in order.
    pub fn sequential(info: ActionInfo) -> Self {
        Self::with_iterations(info, 1)
    }

    /// Run the children `iterations` times.
    pub fn looped(mut info: ActionInfo, iterations: u32) -> Self {
        if !info.parameters.is_object() {
            info.parameters = serde_json::Value::Object(serde_json::Map::new());
        }
        if let Some(params) = info.parameters.as_object_mut() {
            params.insert("iterations".into(), iterations.into());
        }
        Self::with_iterations(info, iterations)
    }

    fn with_iterations(info: ActionInfo, iterations: u32) -> Self {
        let children = ChildList::new();
        let behavior = ListBehavior::new(children.clone(), iterations.max(1));
        let action = Action::new(info, behavior);
        Self { action, children }
    }

    /// Builder: append a child.
    pub fn with_child(self, child: Action) -> Self {
        self.children.append(child);
        self
    }

    /// Builder: log each child individually.
    pub fn logging_individually(self) -> Self {
        self.children.set_logs_individually(true);
        self
    }

    /// The composite as a plain Action handle.
    pub fn action(&self) -> &Action {
        &self.action
    }

    /// The composite's children.
    pub fn children(&self) -> &ChildList {
        &self.children
    }

    /// Give up the composite wrapper.
    pub fn into_action(self) -> Action {
        self.action
    }
}

impl Deref for ListAction {
    type Target = Action;

    fn deref(&self) -> &Action {
        &self.action
    }
}

impl From<ListAction> for Action {
    fn from(list: ListAction) -> Self {
        list.action
    }
}

/// Run state shared between the hooks and the sequencer task.
#[derive(Default)]
struct SequenceRun {
    current: Mutex<Option<Action>>,
    cancel_requested: AtomicBool,
}

impl SequenceRun {
    fn live_child(&self) -> Option<Action> {
        self.current
            .lock()
            .clone()
            .filter(|child| child.state().is_live())
    }
}

struct ListBehavior {
    children: ChildList,
    iterations: u32,
    run: Arc<SequenceRun>,
}

impl ListBehavior {
    fn new(children: ChildList, iterations: u32) -> Self {
        Self {
            children,
            iterations,
            run: Arc::default(),
        }
    }
}

impl ActionBehavior for ListBehavior {
    fn start(&mut self, ctx: ActionContext) {
        ctx.set_started();
        let children = self.children.clone();
        let run = Arc::clone(&self.run);
        let iterations = self.iterations;
        tokio::spawn(run_sequence(ctx, children, iterations, run));
    }

    fn cancel(&mut self, ctx: ActionContext) {
        self.run.cancel_requested.store(true, Ordering::SeqCst);
        let current = self.run.current.lock();
        match current.as_ref().filter(|c| c.state().is_live()) {
            Some(child) => {
                if !child.cancel() {
                    debug!(child = %child.id(), "Child already cancelling");
                }
            }
            None => {
                ctx.set_cancelled();
            }
        }
    }

    fn can_pause(&self) -> bool {
        self.run
            .live_child()
            .map_or(true, |child| child.can_pause())
    }

    fn pause(&mut self, ctx: ActionContext) {
        // Between children the sequencer parks at the next boundary.
        if let Some(child) = self.run.live_child() {
            if !child.pause() {
                ctx.pause_refused();
            }
        }
    }

    fn resume(&mut self, ctx: ActionContext) {
        match self.run.live_child() {
            Some(child) if child.state() == ActionState::Paused => {
                child.resume();
            }
            _ => {
                ctx.set_resumed();
            }
        }
    }

    fn duplicate(&self) -> Box<dyn ActionBehavior> {
        Box::new(ListBehavior::new(self.children.deep_copy(), self.iterations))
    }

    fn child_list(&self) -> Option<ChildList> {
        Some(self.children.clone())
    }
}

async fn run_sequence(
    ctx: ActionContext,
    children: ChildList,
    iterations: u32,
    run: Arc<SequenceRun>,
) {
    let Some(list) = ctx.action() else {
        return;
    };
    let templates = children.freeze_templates();
    let mut pass = 1;
    let mut index = 0;
    info!(list = %list.id(), children = children.len(), iterations, "Sequence started");

    loop {
        if !hold_at_boundary(&list, &ctx).await {
            children.set_current(None);
            return;
        }

        let Some(child) = children.get(index) else {
            if pass < iterations {
                pass += 1;
                debug!(list = %list.id(), pass, "Starting next loop pass");
                for template in &templates {
                    children.append(template.duplicate());
                }
                continue;
            }
            break;
        };
        if child.state() != ActionState::Constructed {
            index += 1;
            continue;
        }

        children.set_current(Some(index));
        {
            let mut current = run.current.lock();
            if run.cancel_requested.load(Ordering::SeqCst) {
                drop(current);
                children.set_current(None);
                ctx.set_cancelled();
                return;
            }
            *current = Some(child.clone());
            child.start();
        }

        let outcome = follow_child(&list, &ctx, &child).await;
        *run.current.lock() = None;

        if children.logs_individually() && !child.logs_children_individually() {
            if let Some(link) = list.runner_link() {
                if let Err(err) = link.log.log_completed_child(&child, list.id()).await {
                    warn!(child = %child.id(), error = %err, "Failed to log child action");
                }
            }
        }

        match outcome {
            ActionState::Succeeded => {}
            ActionState::Cancelled => {
                children.set_current(None);
                ctx.set_cancelled();
                return;
            }
            _ => {
                if run.cancel_requested.load(Ordering::SeqCst) {
                    children.set_current(None);
                    ctx.set_cancelled();
                    return;
                }
                if !recover_child_failure(&list, &children, &child).await {
                    children.set_current(None);
                    let reason = child
                        .failure_message()
                        .unwrap_or_else(|| "no reason given".into());
                    ctx.set_failed(format!(
                        "child '{}' failed: {reason}",
                        child.info().short_description
                    ));
                    return;
                }
            }
        }

        index = children.index_of(&child).map_or(index + 1, |i| i + 1);
    }

    children.set_current(None);
    info!(list = %list.id(), "Sequence finished");
    ctx.set_succeeded();
}

/// Apply the child's sub-action failure policy. Returns true when the
/// sequence should continue with a fresh copy.
async fn recover_child_failure(list: &Action, children: &ChildList, child: &Action) -> bool {
    let choice = match child.failure_response_as_sub_action() {
        FailureResponse::MoveOn => FailureChoice::MoveOn,
        FailureResponse::AttemptAnotherCopy => FailureChoice::AttemptAnotherCopy,
        FailureResponse::PromptUser => match list.runner_link() {
            Some(link) => link.operator.on_action_failed(child).await,
            None => FailureChoice::MoveOn,
        },
    };
    match choice {
        FailureChoice::MoveOn => false,
        FailureChoice::AttemptAnotherCopy => match children.index_of(child) {
            Some(i) => {
                info!(list = %list.id(), child = %child.id(), "Retrying failed child");
                children.duplicate(i).is_some()
            }
            None => false,
        },
    }
}

/// Park between children while the list is pausing or paused. Returns
/// false when the sequence must stop.
async fn hold_at_boundary(list: &Action, ctx: &ActionContext) -> bool {
    let mut rx = list.subscribe_state();
    loop {
        match list.state() {
            ActionState::Running => return true,
            ActionState::Pausing => {
                ctx.set_paused();
            }
            ActionState::Resuming => {
                ctx.set_resumed();
            }
            ActionState::Paused => {
                if rx.changed().await.is_err() {
                    return false;
                }
            }
            ActionState::Cancelling => {
                ctx.set_cancelled();
                return false;
            }
            _ => return false,
        }
    }
}

/// Wait for `child` to finish, mirroring its pause/resume onto the list.
async fn follow_child(list: &Action, ctx: &ActionContext, child: &Action) -> ActionState {
    let mut child_rx = child.subscribe_state();
    let mut list_rx = list.subscribe_state();
    loop {
        let child_state = child.state();
        if child_state.is_final() {
            return child_state;
        }
        match (list.state(), child_state) {
            (ActionState::Pausing, ActionState::Paused) => {
                ctx.set_paused();
            }
            (ActionState::Pausing, ActionState::Running) => {
                // Either the child refused, or it started after the list
                // began pausing and has not been asked yet.
                if child.previous_state() == ActionState::Pausing || !child.pause() {
                    ctx.pause_refused();
                }
            }
            (ActionState::Resuming, s) if !matches!(s, ActionState::Paused | ActionState::Resuming) => {
                ctx.set_resumed();
            }
            _ => {}
        }
        tokio::select! {
            changed = child_rx.changed() => {
                if changed.is_err() {
                    return child.state();
                }
            }
            changed = list_rx.changed() => {
                if changed.is_err() {
                    return child.state();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::WaitAction;
    use std::time::Duration;

    /// Succeeds or fails as soon as it starts.
    struct Immediate(Result<(), &'static str>);

    impl ActionBehavior for Immediate {
        fn start(&mut self, ctx: ActionContext) {
            ctx.set_started();
            match self.0 {
                Ok(()) => ctx.set_succeeded(),
                Err(reason) => ctx.set_failed(reason),
            };
        }
        fn cancel(&mut self, ctx: ActionContext) {
            ctx.set_cancelled();
        }
        fn duplicate(&self) -> Box<dyn ActionBehavior> {
            Box::new(Immediate(self.0))
        }
    }

    fn ok(name: &str) -> Action {
        Action::new(ActionInfo::new("instant", name), Immediate(Ok(())))
    }

    fn failing(name: &str) -> Action {
        Action::new(ActionInfo::new("instant", name), Immediate(Err("boom")))
    }

    async fn finish(action: &Action) -> ActionState {
        tokio::time::timeout(Duration::from_secs(5), action.wait_until_final())
            .await
            .expect("action did not finish")
    }

    #[tokio::test]
    async fn runs_children_in_order() {
        let list = ListAction::sequential(ActionInfo::new("sequence", "two"))
            .with_child(ok("a"))
            .with_child(ok("b"));
        let a = list.children().get(0).unwrap();
        let b = list.children().get(1).unwrap();
        assert_eq!(a.parent().as_ref(), Some(list.action()));

        assert!(list.start());
        assert_eq!(finish(&list).await, ActionState::Succeeded);
        assert_eq!(a.state(), ActionState::Succeeded);
        assert_eq!(b.state(), ActionState::Succeeded);
        assert!(a.ended_at().unwrap() <= b.started_at().unwrap());
    }

    #[test]
    fn refuses_to_nest_an_ancestor_inside_its_descendant() {
        let outer = ListAction::sequential(ActionInfo::new("sequence", "outer"));
        let middle = ListAction::sequential(ActionInfo::new("sequence", "middle"));
        let inner = ListAction::sequential(ActionInfo::new("sequence", "inner"));
        assert!(outer.children().append(middle.action().clone()));
        assert!(middle.children().append(inner.action().clone()));

        assert!(!inner.children().append(inner.action().clone()));
        assert!(!inner.children().append(outer.action().clone()));
        assert!(inner.children().is_empty());
        assert!(outer.action().parent().is_none());

        // Unrelated actions are still welcome.
        assert!(inner.children().append(ok("leaf")));
        assert_eq!(inner.children().len(), 1);
    }

    #[tokio::test]
    async fn empty_list_succeeds() {
        let list = ListAction::sequential(ActionInfo::new("sequence", "empty"));
        list.start();
        assert_eq!(finish(&list).await, ActionState::Succeeded);
    }

    #[tokio::test]
    async fn loop_appends_fresh_copies_per_pass() {
        let list = ListAction::looped(ActionInfo::new("loop", "thrice"), 3).with_child(ok("x"));
        list.start();
        assert_eq!(finish(&list).await, ActionState::Succeeded);
        let children = list.children().actions();
        assert_eq!(children.len(), 3);
        assert!(children.iter().all(|c| c.state() == ActionState::Succeeded));
        assert_eq!(list.info().param_u64("iterations"), Some(3));

        let snapshot = list.info_snapshot();
        let recorded = snapshot.parameters["children"].as_array().unwrap();
        assert_eq!(recorded.len(), 1);
    }

    #[tokio::test]
    async fn child_failure_with_move_on_fails_list() {
        let list = ListAction::sequential(ActionInfo::new("sequence", "s"))
            .with_child(failing("bad"))
            .with_child(ok("never"));
        list.start();
        assert_eq!(finish(&list).await, ActionState::Failed);
        assert!(list.failure_message().unwrap().contains("boom"));
        assert_eq!(
            list.children().get(1).unwrap().state(),
            ActionState::Constructed
        );
    }

    #[tokio::test]
    async fn child_retry_inserts_copy_after_failed_child() {
        struct FailOnce(Arc<AtomicBool>);
        impl ActionBehavior for FailOnce {
            fn start(&mut self, ctx: ActionContext) {
                ctx.set_started();
                if self.0.swap(true, Ordering::SeqCst) {
                    ctx.set_succeeded();
                } else {
                    ctx.set_failed("first attempt");
                }
            }
            fn cancel(&mut self, ctx: ActionContext) {
                ctx.set_cancelled();
            }
            fn duplicate(&self) -> Box<dyn ActionBehavior> {
                Box::new(FailOnce(Arc::clone(&self.0)))
            }
        }

        let flaky = Action::new(
            ActionInfo::new("flaky", "flaky"),
            FailOnce(Arc::new(AtomicBool::new(false))),
        )
        .with_failure_response_as_sub_action(FailureResponse::AttemptAnotherCopy);
        let list = ListAction::sequential(ActionInfo::new("sequence", "s"))
            .with_child(flaky)
            .with_child(ok("after"));
        list.start();
        assert_eq!(finish(&list).await, ActionState::Succeeded);

        let states: Vec<_> = list.children().actions().iter().map(Action::state).collect();
        assert_eq!(
            states,
            vec![
                ActionState::Failed,
                ActionState::Succeeded,
                ActionState::Succeeded
            ]
        );
    }

    #[tokio::test]
    async fn cancelling_list_cancels_running_child() {
        let list = ListAction::sequential(ActionInfo::new("sequence", "s"))
            .with_child(WaitAction::action(30.0))
            .with_child(ok("y"));
        let x = list.children().get(0).unwrap();
        list.start();
        let mut rx = x.subscribe_state();
        rx.wait_for(|c| c.state == ActionState::Running).await.unwrap();

        assert!(list.cancel());
        assert_eq!(finish(&list).await, ActionState::Cancelled);
        assert_eq!(x.state(), ActionState::Cancelled);
        assert_eq!(
            list.children().get(1).unwrap().state(),
            ActionState::Constructed
        );
    }

    #[tokio::test]
    async fn pause_follows_running_child() {
        let list = ListAction::sequential(ActionInfo::new("sequence", "s"))
            .with_child(WaitAction::action(0.3));
        let x = list.children().get(0).unwrap();
        list.start();
        let mut rx = x.subscribe_state();
        rx.wait_for(|c| c.state == ActionState::Running).await.unwrap();

        assert!(list.can_pause());
        assert!(list.pause());
        let mut list_rx = list.subscribe_state();
        list_rx
            .wait_for(|c| c.state == ActionState::Paused)
            .await
            .unwrap();
        assert_eq!(x.state(), ActionState::Paused);

        assert!(list.resume());
        assert_eq!(finish(&list).await, ActionState::Succeeded);
        assert!(list.paused_time() > Duration::ZERO);
    }

    #[tokio::test]
    async fn structural_edits_are_bracketed() {
        let list = ListAction::sequential(ActionInfo::new("sequence", "s"));
        let mut events = list.children().subscribe();
        let a = ok("a");
        assert!(list.children().append(a.clone()));
        assert!(!list.children().append(a.clone()));
        let copy = list.children().duplicate(0).unwrap();
        assert_eq!(list.children().index_of(&copy), Some(1));
        assert!(list.children().move_child(1, 0));
        assert_eq!(list.children().index_of(&a), Some(1));
        let taken = list.children().take(1).unwrap();
        assert_eq!(taken, a);
        assert!(taken.parent().is_none());

        let mut kinds = Vec::new();
        while let Ok(event) = events.try_recv() {
            kinds.push(match event {
                ChildListEvent::AboutToAdd { .. } => "about_to_add",
                ChildListEvent::Added { .. } => "added",
                ChildListEvent::AboutToRemove { .. } => "about_to_remove",
                ChildListEvent::Removed { .. } => "removed",
                ChildListEvent::CurrentChildChanged { .. } => "current",
            });
        }
        assert_eq!(
            kinds,
            vec![
                "about_to_add",
                "added",
                "about_to_add",
                "added",
                "about_to_remove",
                "removed",
                "about_to_add",
                "added",
                "about_to_remove",
                "removed"
            ]
        );
    }

    #[tokio::test]
    async fn live_child_cannot_be_removed() {
        let list = ListAction::sequential(ActionInfo::new("sequence", "s"))
            .with_child(WaitAction::action(30.0));
        let x = list.children().get(0).unwrap();
        list.start();
        let mut rx = x.subscribe_state();
        rx.wait_for(|c| c.state == ActionState::Running).await.unwrap();
        assert!(!list.children().remove(0));
        assert!(list.children().take(0).is_none());
        list.cancel();
        finish(&list).await;
    }

    #[tokio::test]
    async fn duplicate_copies_children_deeply() {
        let list = ListAction::sequential(ActionInfo::new("sequence", "s"))
            .with_child(ok("a"))
            .with_child(ok("b"));
        list.children().set_logs_individually(true);
        let copy = list.duplicate();
        let copied = copy.children().unwrap();
        assert_eq!(copied.len(), 2);
        assert!(copied.logs_individually());
        assert_ne!(copied.get(0), list.children().get(0));
        assert_eq!(copied.get(0).unwrap().parent(), Some(copy.clone()));
    }
}
