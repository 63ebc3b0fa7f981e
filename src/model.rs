//! Read-only tree projection of the Runner for presentation layers.
//!
//! Two roots: the queue (one row per queued Action) and the current slot
//! (zero or one row). Composite Actions contribute their children as
//! nested rows. [`QueueModel`] keeps a mirror of that tree up to date from
//! Runner and child-list events and reports every change to a
//! [`TreeObserver`], so any tree-capable view can follow without polling.

use futures::stream::{BoxStream, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamMap;
use tracing::{debug, warn};

use crate::action::{Action, ActionEvent, ActionId, ChildListEvent};
use crate::error::ActionResult;
use crate::runner::{ActionRunner, RunnerEvent, RunnerSnapshot};

/// Top-level rows of the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TreeRoot {
    /// Actions waiting in the queue.
    Queue,
    /// The running Action, if any.
    Current,
}

/// Position of a node: a root plus the row index at each level.
///
/// The root itself has no indices; `[2]` under `Queue` is the third queued
/// Action, `[2, 0]` its first child.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodePath {
    /// Which top-level row.
    pub root: TreeRoot,
    /// Child indices below it; empty for the row itself.
    pub indices: Vec<usize>,
}

impl NodePath {
    /// The top-level row itself.
    pub fn root(root: TreeRoot) -> Self {
        Self {
            root,
            indices: Vec::new(),
        }
    }

    /// The queue row.
    pub fn queue() -> Self {
        Self::root(TreeRoot::Queue)
    }

    /// The current-Action row.
    pub fn current() -> Self {
        Self::root(TreeRoot::Current)
    }

    /// Path of this node's child at `index`.
    pub fn child(&self, index: usize) -> Self {
        let mut indices = self.indices.clone();
        indices.push(index);
        Self {
            root: self.root,
            indices,
        }
    }
}

/// Receives structural and data changes for the projected tree.
///
/// Row ranges are inclusive. Every insert and removal is bracketed by its
/// `about_to_*` call.
pub trait TreeObserver: Send + 'static {
    /// Rows `first..=last` under `parent` are about to appear.
    fn about_to_insert(&mut self, parent: &NodePath, first: usize, last: usize);
    /// Rows `first..=last` under `parent` appeared.
    fn inserted(&mut self, parent: &NodePath, first: usize, last: usize);
    /// Rows `first..=last` under `parent` are about to go.
    fn about_to_remove(&mut self, parent: &NodePath, first: usize, last: usize);
    /// Rows `first..=last` under `parent` are gone.
    fn removed(&mut self, parent: &NodePath, first: usize, last: usize);
    /// State, progress, status text or expected duration of `node` changed.
    fn data_changed(&mut self, node: &NodePath);
}

struct Node {
    action: Action,
    children: Vec<Node>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Feed {
    Action,
    Children,
}

enum Input {
    Action(ActionEvent),
    Children(ChildListEvent),
    Lagged,
}

type Feeds = StreamMap<(ActionId, Feed), BoxStream<'static, Input>>;

/// Subscribe to `action` (and its descendants) and build its subtree.
fn watch(action: &Action, feeds: &mut Feeds) -> Node {
    let events = BroadcastStream::new(action.subscribe())
        .map(|event| event.map_or(Input::Lagged, Input::Action))
        .boxed();
    feeds.insert((action.id(), Feed::Action), events);

    let children = match action.children() {
        Some(list) => {
            let (snapshot, rx) = list.snapshot_and_subscribe();
            let events = BroadcastStream::new(rx)
                .map(|event| event.map_or(Input::Lagged, Input::Children))
                .boxed();
            feeds.insert((action.id(), Feed::Children), events);
            snapshot.iter().map(|child| watch(child, feeds)).collect()
        }
        None => Vec::new(),
    };
    Node {
        action: action.clone(),
        children,
    }
}

fn unwatch(node: &Node, feeds: &mut Feeds) {
    feeds.remove(&(node.action.id(), Feed::Action));
    feeds.remove(&(node.action.id(), Feed::Children));
    for child in &node.children {
        unwatch(child, feeds);
    }
}

fn find(nodes: &[Node], id: ActionId, path: &mut Vec<usize>) -> bool {
    for (i, node) in nodes.iter().enumerate() {
        path.push(i);
        if node.action.id() == id || find(&node.children, id, path) {
            return true;
        }
        path.pop();
    }
    false
}

/// Mirror of the Runner's queue and current slot.
pub struct QueueModel<O> {
    observer: O,
    queue: Vec<Node>,
    current: Vec<Node>,
    feeds: Feeds,
    needs_resync: bool,
}

impl<O: TreeObserver> QueueModel<O> {
    /// A model with no rows, reporting to `observer`.
    pub fn new(observer: O) -> Self {
        Self {
            observer,
            queue: Vec::new(),
            current: Vec::new(),
            feeds: StreamMap::new(),
            needs_resync: false,
        }
    }

    /// The observer being notified.
    pub fn observer(&self) -> &O {
        &self.observer
    }

    /// Stop modelling and hand the observer back.
    pub fn into_observer(self) -> O {
        self.observer
    }

    fn roots(&self, root: TreeRoot) -> &Vec<Node> {
        match root {
            TreeRoot::Queue => &self.queue,
            TreeRoot::Current => &self.current,
        }
    }

    fn roots_mut(&mut self, root: TreeRoot) -> &mut Vec<Node> {
        match root {
            TreeRoot::Queue => &mut self.queue,
            TreeRoot::Current => &mut self.current,
        }
    }

    fn children_of(&self, parent: &NodePath) -> Option<&Vec<Node>> {
        let mut nodes = self.roots(parent.root);
        for &i in &parent.indices {
            nodes = &nodes.get(i)?.children;
        }
        Some(nodes)
    }

    fn children_of_mut(&mut self, parent: &NodePath) -> Option<&mut Vec<Node>> {
        let mut nodes = self.roots_mut(parent.root);
        for &i in &parent.indices {
            nodes = &mut nodes.get_mut(i)?.children;
        }
        Some(nodes)
    }

    /// Number of rows under `parent`.
    pub fn row_count(&self, parent: &NodePath) -> usize {
        self.children_of(parent).map_or(0, Vec::len)
    }

    /// The Action at `path`.
    pub fn action_at(&self, path: &NodePath) -> Option<Action> {
        let (last, parent) = path.indices.split_last()?;
        let parent = NodePath {
            root: path.root,
            indices: parent.to_vec(),
        };
        self.children_of(&parent)?
            .get(*last)
            .map(|node| node.action.clone())
    }

    /// Where the Action with `id` currently sits in the tree.
    pub fn path_of(&self, id: ActionId) -> Option<NodePath> {
        [TreeRoot::Current, TreeRoot::Queue]
            .into_iter()
            .find_map(|root| {
                let mut indices = Vec::new();
                find(self.roots(root), id, &mut indices).then_some(NodePath { root, indices })
            })
    }

    fn insert_node(&mut self, parent: &NodePath, index: usize, action: &Action) {
        let Some(len) = self.children_of(parent).map(Vec::len) else {
            return;
        };
        let index = index.min(len);
        let node = watch(action, &mut self.feeds);
        self.observer.about_to_insert(parent, index, index);
        if let Some(rows) = self.children_of_mut(parent) {
            rows.insert(index, node);
        }
        self.observer.inserted(parent, index, index);
    }

    fn remove_node(&mut self, parent: &NodePath, index: usize) {
        if index >= self.row_count(parent) {
            return;
        }
        self.observer.about_to_remove(parent, index, index);
        let node = self
            .children_of_mut(parent)
            .map(|rows| rows.remove(index));
        if let Some(node) = node {
            unwatch(&node, &mut self.feeds);
        }
        self.observer.removed(parent, index, index);
    }

    fn clear_root(&mut self, root: TreeRoot) {
        let parent = NodePath::root(root);
        let len = self.row_count(&parent);
        if len == 0 {
            return;
        }
        self.observer.about_to_remove(&parent, 0, len - 1);
        let nodes = std::mem::take(self.roots_mut(root));
        for node in &nodes {
            unwatch(node, &mut self.feeds);
        }
        self.observer.removed(&parent, 0, len - 1);
    }

    /// Replace the mirror with `snapshot`.
    pub fn load(&mut self, snapshot: &RunnerSnapshot) {
        self.clear_root(TreeRoot::Current);
        self.clear_root(TreeRoot::Queue);
        let queue = NodePath::queue();
        for (i, action) in snapshot.queue.iter().enumerate() {
            self.insert_node(&queue, i, action);
        }
        if let Some(current) = &snapshot.current {
            self.insert_node(&NodePath::current(), 0, current);
        }
    }

    /// Apply one Runner event.
    pub fn apply_runner_event(&mut self, event: RunnerEvent) {
        match event {
            RunnerEvent::QueueInserted { index, action } => {
                self.insert_node(&NodePath::queue(), index, &action);
            }
            RunnerEvent::QueueRemoved { index, .. } => {
                self.remove_node(&NodePath::queue(), index);
            }
            RunnerEvent::CurrentActionChanged(next) => {
                let root = NodePath::current();
                self.remove_node(&root, 0);
                if let Some(action) = next {
                    self.insert_node(&root, 0, &action);
                }
            }
            // The per-node feeds already report these.
            _ => {}
        }
    }

    fn apply_feed(&mut self, id: ActionId, input: Input) {
        match input {
            Input::Action(event) => {
                let relevant = matches!(
                    event,
                    ActionEvent::StateChanged(_)
                        | ActionEvent::ProgressChanged(_)
                        | ActionEvent::StatusTextChanged(_)
                        | ActionEvent::ExpectedDurationChanged(_)
                );
                if let Some(path) = self.path_of(id).filter(|_| relevant) {
                    self.observer.data_changed(&path);
                }
            }
            Input::Children(event) => {
                let Some(list) = self.path_of(id) else {
                    return;
                };
                match event {
                    ChildListEvent::Added { index, action } => {
                        self.insert_node(&list, index, &action);
                    }
                    ChildListEvent::Removed { index, .. } => self.remove_node(&list, index),
                    ChildListEvent::CurrentChildChanged { .. } => {
                        self.observer.data_changed(&list);
                    }
                    ChildListEvent::AboutToAdd { .. } | ChildListEvent::AboutToRemove { .. } => {}
                }
            }
            Input::Lagged => {
                warn!(action = %id, "Queue model fell behind; resynchronising");
                self.needs_resync = true;
            }
        }
    }

    /// Follow `runner` until it stops, then hand back the observer.
    pub async fn run(mut self, runner: ActionRunner) -> ActionResult<O> {
        let (mut events, snapshot) = runner.subscribe_with_snapshot().await?;
        self.load(&snapshot);

        loop {
            if self.needs_resync {
                self.needs_resync = false;
                let Ok((fresh, snapshot)) = runner.subscribe_with_snapshot().await else {
                    break;
                };
                events = fresh;
                self.load(&snapshot);
            }

            tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => self.apply_runner_event(event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Queue model missed runner events; resynchronising");
                        self.needs_resync = true;
                    }
                    Err(RecvError::Closed) => break,
                },
                Some(((id, _), input)) = self.feeds.next(), if !self.feeds.is_empty() => {
                    self.apply_feed(id, input);
                }
                _ = runner.stopped() => break,
            }
        }

        debug!("Queue model stopped");
        Ok(self.observer)
    }
}

/// Spawn a [`QueueModel`] following `runner`. The task ends when the
/// Runner shuts down and returns the observer.
pub fn spawn_queue_model<O: TreeObserver>(
    runner: ActionRunner,
    observer: O,
) -> JoinHandle<ActionResult<O>> {
    tokio::spawn(QueueModel::new(observer).run(runner))
}
