//! End-to-end Runner behavior: ordering, pausing, failure recovery,
//! cancellation and logging.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use common::{
    eventually, next_current, next_event, scripted, wait_for_log, BrokenStore, Outcome,
    ScriptedOperator,
};
use daq_actions::action::FailureChoice;
use daq_actions::{
    ActionInfo, ActionLog, ActionRunner, ActionState, FailureResponse, ListAction, RunnerEvent,
    SystemHealthMonitor, WaitAction,
};

#[tokio::test]
async fn queued_actions_run_in_fifo_order() {
    let runner = ActionRunner::spawn(ActionLog::in_memory(), false);
    let mut events = runner.subscribe();
    let (a, _) = scripted("a", 20, Outcome::Succeed);
    let (b, _) = scripted("b", 20, Outcome::Succeed);
    let (c, _) = scripted("c", 20, Outcome::Succeed);
    for action in [&a, &b, &c] {
        runner.add_to_queue(action.clone()).await.unwrap();
    }

    let mut order = Vec::new();
    while order.len() < 3 {
        if let Some(action) = next_current(&mut events).await {
            order.push(action);
        }
    }
    assert_eq!(order, vec![a.clone(), b.clone(), c.clone()]);
    assert_eq!(c.wait_until_final().await, ActionState::Succeeded);
    assert_eq!(next_current(&mut events).await, None);

    let mut logged: Vec<_> = wait_for_log(runner.log(), 3)
        .await
        .into_iter()
        .map(|entry| entry.action_id)
        .collect();
    logged.sort();
    let mut expected = vec![a.id(), b.id(), c.id()];
    expected.sort();
    assert_eq!(logged, expected);
}

#[tokio::test]
async fn paused_runner_starts_nothing_until_resumed() {
    let runner = ActionRunner::spawn(ActionLog::in_memory(), true);
    let mut events = runner.subscribe();
    let (a, runs) = scripted("a", 10, Outcome::Succeed);
    runner.add_to_queue(a.clone()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(a.state(), ActionState::Constructed);
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert_eq!(runner.queue_len().await.unwrap(), 1);

    runner.set_paused(false).await.unwrap();
    assert_eq!(next_current(&mut events).await, Some(a.clone()));
    assert_eq!(a.wait_until_final().await, ActionState::Succeeded);
}

#[tokio::test]
async fn failed_action_with_move_on_advances_and_is_logged_once() {
    let runner = ActionRunner::spawn(ActionLog::in_memory(), true);
    let mut events = runner.subscribe();
    let (a, _) = scripted("a", 10, Outcome::Fail);
    let (b, _) = scripted("b", 5_000, Outcome::Succeed);
    runner.add_to_queue(a.clone()).await.unwrap();
    runner.add_to_queue(b.clone()).await.unwrap();
    runner.set_paused(false).await.unwrap();

    assert_eq!(next_current(&mut events).await, Some(a.clone()));
    assert_eq!(next_current(&mut events).await, Some(b.clone()));
    assert_eq!(runner.queue_len().await.unwrap(), 0);

    let entries = wait_for_log(runner.log(), 1).await;
    let entry = &entries[0];
    assert_eq!(entry.action_id, a.id());
    assert_eq!(entry.final_state, ActionState::Failed);
    assert!(entry
        .failure_message
        .as_deref()
        .is_some_and(|msg| msg.contains("scripted failure")));

    // B is still running, so nothing else can have been logged.
    let now = Utc::now();
    let count = runner
        .log()
        .count_between(now - chrono::Duration::minutes(1), now)
        .await
        .unwrap();
    assert_eq!(count, 1);
    runner.cancel_current().await.unwrap();
}

#[tokio::test]
async fn retry_in_queue_runs_exactly_one_fresh_copy() {
    let runner = ActionRunner::spawn(ActionLog::in_memory(), true);
    let mut events = runner.subscribe();
    let (a, runs) = scripted("flaky", 10, Outcome::FailTimes(1));
    a.set_failure_response_in_runner(FailureResponse::AttemptAnotherCopy);
    runner.add_to_queue(a.clone()).await.unwrap();
    runner.set_paused(false).await.unwrap();

    assert_eq!(next_current(&mut events).await, Some(a.clone()));
    let copy = next_current(&mut events).await.unwrap();
    assert_ne!(copy, a);
    assert_eq!(copy.info(), a.info());
    assert_eq!(copy.wait_until_final().await, ActionState::Succeeded);
    assert_eq!(next_current(&mut events).await, None);

    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert_eq!(a.state(), ActionState::Failed);
    assert_eq!(runner.queue_len().await.unwrap(), 0);
}

#[tokio::test]
async fn retry_of_immediate_action_runs_copy_immediately() {
    let runner = ActionRunner::spawn(ActionLog::in_memory(), true);
    let mut events = runner.subscribe();
    let (a, runs) = scripted("flaky", 10, Outcome::FailTimes(1));
    a.set_failure_response_in_runner(FailureResponse::AttemptAnotherCopy);
    assert!(runner.run_immediately(a.clone()).await.unwrap());

    let added = |event: RunnerEvent| match event {
        RunnerEvent::ImmediateAdded(action) => Some(action),
        _ => None,
    };
    assert_eq!(next_event(&mut events, added).await, a);
    let copy = next_event(&mut events, added).await;
    assert_ne!(copy, a);
    assert_eq!(copy.wait_until_final().await, ActionState::Succeeded);

    eventually(|| runs.load(Ordering::SeqCst) == 2).await;
    let removed = next_event(&mut events, |event| match event {
        RunnerEvent::ImmediateRemoved(id) if id == copy.id() => Some(id),
        _ => None,
    })
    .await;
    assert_eq!(removed, copy.id());
    assert!(runner.immediate_actions().await.unwrap().is_empty());
    // The queue was never involved.
    assert!(runner.current_action().await.unwrap().is_none());
}

#[tokio::test]
async fn prompt_user_asks_operator_once() {
    let operator = ScriptedOperator::answering(FailureChoice::AttemptAnotherCopy);
    let runner = ActionRunner::spawn_with_prompt(ActionLog::in_memory(), operator.clone(), true, 64);
    let mut events = runner.subscribe();
    let (a, runs) = scripted("flaky", 10, Outcome::FailTimes(1));
    a.set_failure_response_in_runner(FailureResponse::PromptUser);
    runner.add_to_queue(a.clone()).await.unwrap();
    runner.set_paused(false).await.unwrap();

    assert_eq!(next_current(&mut events).await, Some(a.clone()));
    let copy = next_current(&mut events).await.unwrap();
    assert_eq!(copy.wait_until_final().await, ActionState::Succeeded);
    assert_eq!(next_current(&mut events).await, None);

    assert_eq!(operator.failures_asked.load(Ordering::SeqCst), 1);
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn cancelling_current_pauses_runner_once() {
    let runner = ActionRunner::spawn(ActionLog::in_memory(), false);
    let mut events = runner.subscribe();
    let (a, _) = scripted("long", 10_000, Outcome::Succeed);
    let (b, runs_b) = scripted("next", 10, Outcome::Succeed);
    runner.add_to_queue(a.clone()).await.unwrap();
    runner.add_to_queue(b.clone()).await.unwrap();

    assert_eq!(next_current(&mut events).await, Some(a.clone()));
    eventually(|| a.state() == ActionState::Running).await;
    assert!(runner.cancel_current().await.unwrap());

    let mut pauses = 0;
    loop {
        match next_event(&mut events, Some).await {
            RunnerEvent::PausedChanged(true) => pauses += 1,
            RunnerEvent::CurrentActionChanged(None) => break,
            RunnerEvent::CurrentActionChanged(Some(other)) => panic!("{other:?} started"),
            _ => {}
        }
    }
    assert_eq!(pauses, 1);
    assert_eq!(a.state(), ActionState::Cancelled);
    assert!(runner.is_paused().await.unwrap());
    assert_eq!(runner.queued_actions().await.unwrap(), vec![b.clone()]);
    assert_eq!(runs_b.load(Ordering::SeqCst), 0);

    let entries = wait_for_log(runner.log(), 1).await;
    assert_eq!(entries[0].final_state, ActionState::Cancelled);
}

#[tokio::test]
async fn cancelling_list_cascades_to_running_child() {
    let runner = ActionRunner::spawn(ActionLog::in_memory(), false);
    let mut events = runner.subscribe();
    let (x, _) = scripted("x", 10_000, Outcome::Succeed);
    let (y, runs_y) = scripted("y", 10, Outcome::Succeed);
    let list = ListAction::sequential(ActionInfo::new("sequence", "xy"))
        .with_child(x.clone())
        .with_child(y.clone());
    runner.add_to_queue(list.clone()).await.unwrap();

    assert_eq!(next_current(&mut events).await.as_ref(), Some(list.action()));
    eventually(|| x.state() == ActionState::Running).await;
    assert!(runner.cancel_current().await.unwrap());

    assert_eq!(list.wait_until_final().await, ActionState::Cancelled);
    assert_eq!(x.state(), ActionState::Cancelled);
    assert_eq!(y.state(), ActionState::Constructed);
    assert_eq!(runs_y.load(Ordering::SeqCst), 0);
    let paused = next_event(&mut events, |event| match event {
        RunnerEvent::PausedChanged(paused) => Some(paused),
        _ => None,
    })
    .await;
    assert!(paused);
}

#[tokio::test]
async fn log_failures_do_not_stop_the_queue() {
    let store = Arc::new(BrokenStore::default());
    let monitor = Arc::new(SystemHealthMonitor::default());
    let log = ActionLog::new(store.clone(), monitor.clone());
    let runner = ActionRunner::spawn(log, false);
    let (a, _) = scripted("a", 10, Outcome::Succeed);
    let (b, _) = scripted("b", 10, Outcome::Succeed);
    runner.add_to_queue(a.clone()).await.unwrap();
    runner.add_to_queue(b.clone()).await.unwrap();

    assert_eq!(b.wait_until_final().await, ActionState::Succeeded);
    eventually(|| monitor.error_count() == 2).await;
    assert_eq!(store.attempts.load(Ordering::SeqCst), 2);
    assert!(monitor
        .recent_errors()
        .iter()
        .all(|error| error.source == "action_log"));
}

#[tokio::test]
async fn individually_logged_children_carry_parent_id() {
    let runner = ActionRunner::spawn(ActionLog::in_memory(), false);
    let started = Utc::now() - chrono::Duration::seconds(1);
    let list = ListAction::sequential(ActionInfo::new("sequence", "pair"))
        .with_child(WaitAction::action(0.01))
        .with_child(WaitAction::action(0.01))
        .logging_individually();
    runner.add_to_queue(list.clone()).await.unwrap();
    assert_eq!(list.wait_until_final().await, ActionState::Succeeded);

    let log = runner.log();
    wait_for_log(log, 2).await;
    // Give a stray parent entry the chance to show up.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let entries = log.entries_between(started, Utc::now(), None).await.unwrap();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e.parent_id == Some(list.id())));
    assert!(entries.iter().all(|e| e.info.type_name == "wait"));
}

#[tokio::test]
async fn run_immediately_in_queue_starts_only_when_idle() {
    let runner = ActionRunner::spawn(ActionLog::in_memory(), true);
    let mut events = runner.subscribe();
    let (a, _) = scripted("a", 10_000, Outcome::Succeed);
    assert!(runner.run_immediately_in_queue(a.clone()).await.unwrap());
    assert_eq!(next_current(&mut events).await, Some(a.clone()));
    assert!(runner.is_paused().await.unwrap());

    let (b, _) = scripted("b", 10, Outcome::Succeed);
    assert!(!runner.run_immediately_in_queue(b.clone()).await.unwrap());
    assert!(runner.queued_actions().await.unwrap().is_empty());
    assert_eq!(b.state(), ActionState::Constructed);
    a.cancel();
}

#[tokio::test]
async fn queue_refuses_actions_it_already_holds() {
    let runner = ActionRunner::spawn(ActionLog::in_memory(), true);
    let (a, runs) = scripted("a", 10_000, Outcome::Succeed);
    assert!(runner.add_to_queue(a.clone()).await.unwrap());
    assert!(!runner.add_to_queue(a.clone()).await.unwrap());
    assert!(!runner.insert_in_queue(0, a.clone()).await.unwrap());
    assert!(!runner.run_immediately(a.clone()).await.unwrap());
    assert_eq!(runner.queue_len().await.unwrap(), 1);

    // Once current, it cannot be queued behind itself either.
    let mut events = runner.subscribe();
    runner.set_paused(false).await.unwrap();
    assert_eq!(next_current(&mut events).await, Some(a.clone()));
    eventually(|| a.state() == ActionState::Running).await;
    assert!(!runner.add_to_queue(a.clone()).await.unwrap());
    assert!(runner.queued_actions().await.unwrap().is_empty());

    a.cancel();
    assert_eq!(next_current(&mut events).await, None);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    wait_for_log(runner.log(), 1).await;
    // Give a second entry for the same Action the chance to show up.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let entries = wait_for_log(runner.log(), 1).await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].action_id, a.id());
}

#[tokio::test]
async fn queue_refuses_finished_and_child_actions() {
    let runner = ActionRunner::spawn(ActionLog::in_memory(), true);
    let (done, _) = scripted("done", 5, Outcome::Succeed);
    assert!(done.start());
    assert_eq!(done.wait_until_final().await, ActionState::Succeeded);
    assert!(!runner.add_to_queue(done.clone()).await.unwrap());

    let (cancelled, _) = scripted("cancelled", 10_000, Outcome::Succeed);
    assert!(cancelled.start());
    assert!(cancelled.cancel());
    assert_eq!(cancelled.wait_until_final().await, ActionState::Cancelled);
    assert!(!runner.add_to_queue(cancelled.clone()).await.unwrap());

    let (child, _) = scripted("child", 5, Outcome::Succeed);
    let _list =
        ListAction::sequential(ActionInfo::new("sequence", "owner")).with_child(child.clone());
    assert!(!runner.add_to_queue(child.clone()).await.unwrap());

    assert_eq!(runner.queue_len().await.unwrap(), 0);
    runner.set_paused(false).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    // Nothing was promoted: no cancelled Action paused the runner and
    // nothing was logged.
    assert!(!runner.is_paused().await.unwrap());
    assert!(runner.current_action().await.unwrap().is_none());
    let now = Utc::now();
    assert_eq!(
        runner
            .log()
            .count_between(now - chrono::Duration::hours(1), now)
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn actions_running_at_shutdown_are_still_logged() {
    let runner = ActionRunner::spawn(ActionLog::in_memory(), false);
    let (a, _) = scripted("queued run", 100, Outcome::Succeed);
    let (b, _) = scripted("side run", 100, Outcome::Fail);
    let (c, _) = scripted("never started", 10, Outcome::Succeed);
    runner.add_to_queue(a.clone()).await.unwrap();
    runner.add_to_queue(c.clone()).await.unwrap();
    assert!(runner.run_immediately(b.clone()).await.unwrap());
    eventually(|| a.state() == ActionState::Running).await;

    runner.shutdown().await.unwrap();
    assert_eq!(a.wait_until_final().await, ActionState::Succeeded);
    assert_eq!(b.wait_until_final().await, ActionState::Failed);

    let mut logged: Vec<_> = wait_for_log(runner.log(), 2)
        .await
        .into_iter()
        .map(|entry| entry.action_id)
        .collect();
    logged.sort();
    let mut expected = vec![a.id(), b.id()];
    expected.sort();
    assert_eq!(logged, expected);
    assert_eq!(c.state(), ActionState::Constructed);
}
