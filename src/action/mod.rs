//! Actions: long-running operations modelled as an explicit state machine.
//!
//! - [`Action`]: the shared state machine handle
//! - [`ActionBehavior`]: hooks a concrete Action implements
//! - [`ListAction`]: composite that sequences child Actions
//! - [`WaitAction`]: timed leaf
//! - [`Prerequisite`]: boolean gate checked before starting

mod behavior;
mod info;
mod list;
mod machine;
mod prerequisite;
mod state;
mod wait;

pub use behavior::{ActionBehavior, ActionContext};
pub use info::ActionInfo;
pub use list::{ChildList, ChildListEvent, ListAction};
pub use machine::{Action, ActionEvent, ActionId, ActionTiming};
pub use prerequisite::Prerequisite;
pub use state::{
    ActionState, FailureChoice, FailureResponse, PrerequisiteChoice, PrerequisiteWaitPolicy,
    Progress, StateChange,
};
pub use wait::WaitAction;

pub(crate) use machine::RunnerLink;
