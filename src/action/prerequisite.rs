//! Prerequisites: named boolean gates an Action waits on before starting.

use tokio::sync::watch;

use crate::observable::Observable;

/// A named, observable boolean condition.
///
/// Clones share the same gate, so the code that drives the condition (a
/// shutter interlock, a beam-available flag) keeps one clone and hands
/// others to the Actions that depend on it.
#[derive(Debug, Clone)]
pub struct Prerequisite {
    gate: Observable<bool>,
}

impl Prerequisite {
    /// A named gate, initially `satisfied` or not.
    pub fn new(name: impl Into<String>, satisfied: bool) -> Self {
        Self {
            gate: Observable::new(name, satisfied),
        }
    }

    /// Label shown to the operator.
    pub fn name(&self) -> &str {
        self.gate.name()
    }

    /// Whether the gate is open.
    pub fn is_satisfied(&self) -> bool {
        self.gate.get()
    }

    /// Returns whether the satisfaction changed.
    pub fn set_satisfied(&self, satisfied: bool) -> bool {
        self.gate.set(satisfied)
    }

    /// Satisfaction changes; the receiver starts at the latest value.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.gate.subscribe()
    }
}

/// True if every prerequisite is satisfied (vacuously true for none).
pub(crate) fn all_satisfied(prerequisites: &[Prerequisite]) -> bool {
    prerequisites.iter().all(Prerequisite::is_satisfied)
}
