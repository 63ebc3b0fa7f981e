//! A timed leaf Action: waits for a fixed number of seconds.

use std::time::Duration;

use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::behavior::{ActionBehavior, ActionContext};
use super::info::ActionInfo;
use super::machine::Action;
use crate::error::{ActionError, ActionResult};

const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// Waits `seconds`, reporting progress as it goes. Pausable: the remaining
/// time is kept across a pause.
pub struct WaitAction {
    total: Duration,
    remaining: Duration,
    segment_started: Option<Instant>,
    timer: Option<JoinHandle<()>>,
}

impl WaitAction {
    /// Info type name the registry builds this from.
    pub const TYPE_NAME: &'static str = "wait";

    /// Longest wait accepted: one year.
    pub const MAX_WAIT: Duration = Duration::from_secs(365 * 24 * 3600);

    /// A wait of `seconds`, clamped to `0..=MAX_WAIT`. Use
    /// [`from_info`](Self::from_info) to reject out-of-range input instead.
    pub fn new(seconds: f64) -> Self {
        let total = Duration::try_from_secs_f64(seconds.max(0.0))
            .map_or(Self::MAX_WAIT, |total| total.min(Self::MAX_WAIT));
        Self {
            total,
            remaining: total,
            segment_started: None,
            timer: None,
        }
    }

    /// Info record describing a wait of `seconds`.
    pub fn info(seconds: f64) -> ActionInfo {
        ActionInfo::new(Self::TYPE_NAME, format!("Wait {seconds} s"))
            .with_expected_duration(seconds)
            .with_parameters(json!({ "seconds": seconds }))
    }

    /// A ready-to-queue wait Action.
    pub fn action(seconds: f64) -> Action {
        Action::new(Self::info(seconds), Self::new(seconds))
    }

    /// Rebuild from a stored info record.
    pub fn from_info(info: &ActionInfo) -> ActionResult<Action> {
        let seconds = info
            .param_f64("seconds")
            .ok_or_else(|| ActionError::InvalidParameters {
                type_name: info.type_name.clone(),
                reason: "missing numeric 'seconds'".into(),
            })?;
        let out_of_range = || ActionError::InvalidParameters {
            type_name: info.type_name.clone(),
            reason: format!(
                "'seconds' must be between 0 and {}, got {seconds}",
                Self::MAX_WAIT.as_secs()
            ),
        };
        let total = Duration::try_from_secs_f64(seconds).map_err(|_| out_of_range())?;
        if total > Self::MAX_WAIT {
            return Err(out_of_range());
        }
        Ok(Action::new(info.clone(), Self::new(seconds)))
    }

    fn spawn_timer(&mut self, ctx: ActionContext) {
        self.segment_started = Some(Instant::now());
        self.timer = Some(tokio::spawn(count_down(ctx, self.total, self.remaining)));
    }

    fn stop_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        if let Some(started) = self.segment_started.take() {
            self.remaining = self.remaining.saturating_sub(started.elapsed());
        }
    }
}

impl Drop for WaitAction {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

impl ActionBehavior for WaitAction {
    fn start(&mut self, ctx: ActionContext) {
        ctx.set_started();
        self.spawn_timer(ctx);
    }

    fn cancel(&mut self, ctx: ActionContext) {
        self.stop_timer();
        ctx.set_cancelled();
    }

    fn can_pause(&self) -> bool {
        true
    }

    fn pause(&mut self, ctx: ActionContext) {
        self.stop_timer();
        ctx.set_status_text(format!("Paused, {:.1} s left", self.remaining.as_secs_f64()));
        ctx.set_paused();
    }

    fn resume(&mut self, ctx: ActionContext) {
        ctx.set_resumed();
        self.spawn_timer(ctx);
    }

    fn duplicate(&self) -> Box<dyn ActionBehavior> {
        Box::new(WaitAction::new(self.total.as_secs_f64()))
    }
}

async fn count_down(ctx: ActionContext, total: Duration, remaining: Duration) {
    let now = Instant::now();
    let deadline = now.checked_add(remaining).unwrap_or(now + WaitAction::MAX_WAIT);
    let sleep = tokio::time::sleep_until(deadline);
    tokio::pin!(sleep);
    let mut ticks = tokio::time::interval(PROGRESS_INTERVAL);
    let total_secs = total.as_secs_f64();

    loop {
        tokio::select! {
            _ = &mut sleep => {
                ctx.set_progress(total_secs, total_secs);
                ctx.set_status_text("Done");
                ctx.set_succeeded();
                return;
            }
            _ = ticks.tick() => {
                let left = deadline.saturating_duration_since(Instant::now());
                ctx.set_progress((total - left.min(total)).as_secs_f64(), total_secs);
                ctx.set_status_text(format!("{:.1} s left", left.as_secs_f64()));
            }
        }
    }
}
