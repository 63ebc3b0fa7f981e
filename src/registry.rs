//! Registry mapping an info `type` to a constructor.
//!
//! Used to build Actions from queue files and to re-run Actions from the
//! log: a [`LogEntry`] carries a full [`ActionInfo`] snapshot, and the
//! registry turns it back into a fresh Action.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::action::{Action, ActionInfo, ListAction, WaitAction};
use crate::error::{ActionError, ActionResult};
use crate::log::LogEntry;

/// Builds an Action from its info record.
pub type ActionConstructor =
    Arc<dyn Fn(&ActionRegistry, &ActionInfo) -> ActionResult<Action> + Send + Sync>;

/// Constructors keyed by info type.
#[derive(Clone, Default)]
pub struct ActionRegistry {
    constructors: HashMap<String, ActionConstructor>,
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<_> = self.constructors.keys().collect();
        types.sort();
        f.debug_struct("ActionRegistry").field("types", &types).finish()
    }
}

impl ActionRegistry {
    /// A registry with no constructors.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `wait`, `sequence` and `loop` types.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(WaitAction::TYPE_NAME, |_, info| WaitAction::from_info(info));
        registry.register("sequence", |registry, info| {
            build_list(registry, info, ListAction::sequential(info.clone()))
        });
        registry.register("loop", |registry, info| {
            let iterations = info.param_u64("iterations").unwrap_or(1);
            let iterations = u32::try_from(iterations).map_err(|_| ActionError::InvalidParameters {
                type_name: info.type_name.clone(),
                reason: format!("'iterations' out of range: {iterations}"),
            })?;
            build_list(registry, info, ListAction::looped(info.clone(), iterations))
        });
        registry
    }

    /// Register (or replace) the constructor for `type_name`.
    pub fn register<F>(&mut self, type_name: impl Into<String>, constructor: F)
    where
        F: Fn(&ActionRegistry, &ActionInfo) -> ActionResult<Action> + Send + Sync + 'static,
    {
        let type_name = type_name.into();
        debug!(%type_name, "Registered action type");
        self.constructors.insert(type_name, Arc::new(constructor));
    }

    /// Whether `type_name` has a constructor.
    pub fn is_registered(&self, type_name: &str) -> bool {
        self.constructors.contains_key(type_name)
    }

    /// Registered type names, sorted.
    pub fn types(&self) -> Vec<String> {
        let mut types: Vec<_> = self.constructors.keys().cloned().collect();
        types.sort();
        types
    }

    /// Build a fresh Action from an info record.
    pub fn create(&self, info: &ActionInfo) -> ActionResult<Action> {
        let constructor = self
            .constructors
            .get(&info.type_name)
            .ok_or_else(|| ActionError::NoRegisteredAction(info.type_name.clone()))?;
        constructor(self, info)
    }

    /// Build a fresh Action from a logged one.
    pub fn rerun(&self, entry: &LogEntry) -> ActionResult<Action> {
        self.create(&entry.info).inspect_err(|err| {
            warn!(entry = %entry.id, error = %err, "Cannot re-run logged action");
        })
    }
}

/// Fill a list from `parameters.children` and apply `log_individually`.
fn build_list(registry: &ActionRegistry, info: &ActionInfo, list: ListAction) -> ActionResult<Action> {
    if let Some(children) = info.parameters.get("children") {
        let infos: Vec<ActionInfo> = serde_json::from_value(children.clone()).map_err(|err| {
            ActionError::InvalidParameters {
                type_name: info.type_name.clone(),
                reason: format!("bad 'children': {err}"),
            }
        })?;
        for child_info in &infos {
            list.children().append(registry.create(child_info)?);
        }
    }
    if info
        .parameters
        .get("log_individually")
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
    {
        list.children().set_logs_individually(true);
    }
    Ok(list.into_action())
}
