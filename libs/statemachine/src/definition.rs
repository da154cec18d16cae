//! State machine definitions (spec §3): states, transitions, and the guard
//! contract evaluated before a transition is allowed to fire.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use modkit_errors::EngineError;

/// One state a definition can be in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateDef {
    pub id: String,
    pub is_final: bool,
    pub is_error: bool,
}

impl StateDef {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), is_final: false, is_error: false }
    }

    #[must_use]
    pub fn terminal(mut self) -> Self {
        self.is_final = true;
        self
    }

    #[must_use]
    pub fn error(mut self) -> Self {
        self.is_error = true;
        self
    }
}

/// Evaluated against the instance's context and the transition payload
/// before a transition is allowed to mutate state.
pub trait Guard: Send + Sync {
    fn evaluate(&self, context: &serde_json::Value, payload: &serde_json::Value) -> bool;
}

impl<F> Guard for F
where
    F: Fn(&serde_json::Value, &serde_json::Value) -> bool + Send + Sync,
{
    fn evaluate(&self, context: &serde_json::Value, payload: &serde_json::Value) -> bool {
        self(context, payload)
    }
}

#[derive(Clone)]
pub struct TransitionDef {
    pub event: String,
    pub from: String,
    pub to: String,
    pub guard: Option<Arc<dyn Guard>>,
    pub auto_transform: bool,
}

impl fmt::Debug for TransitionDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransitionDef")
            .field("event", &self.event)
            .field("from", &self.from)
            .field("to", &self.to)
            .field("has_guard", &self.guard.is_some())
            .field("auto_transform", &self.auto_transform)
            .finish()
    }
}

impl TransitionDef {
    #[must_use]
    pub fn new(event: impl Into<String>, from: impl Into<String>, to: impl Into<String>) -> Self {
        Self { event: event.into(), from: from.into(), to: to.into(), guard: None, auto_transform: false }
    }

    #[must_use]
    pub fn with_guard(mut self, guard: impl Guard + 'static) -> Self {
        self.guard = Some(Arc::new(guard));
        self
    }

    #[must_use]
    pub fn auto(mut self) -> Self {
        self.auto_transform = true;
        self
    }
}

/// A state machine definition: the set of states and the transitions
/// between them, named so it can be referenced from a workflow's
/// configuration.
#[derive(Debug, Clone)]
pub struct Definition {
    pub name: String,
    pub initial_state: String,
    pub states: Vec<StateDef>,
    pub transitions: Vec<TransitionDef>,
}

/// Chained auto-transitions are capped at this many hops before the
/// definition is considered to contain a loop.
pub const AUTO_TRANSFORM_LIMIT: usize = 64;

impl Definition {
    /// Check the invariants from §3: `initialState` is a declared state,
    /// every transition's `from`/`to` are declared states, each
    /// `(from, event)` pair is unique, and each state has at most one
    /// outgoing auto-transition.
    ///
    /// # Errors
    /// `EngineError::SpecInvalid` describing the first invariant violated.
    pub fn validate(&self) -> Result<(), EngineError> {
        let state_ids: HashSet<&str> = self.states.iter().map(|s| s.id.as_str()).collect();

        if !state_ids.contains(self.initial_state.as_str()) {
            return Err(EngineError::SpecInvalid {
                message: format!(
                    "definition '{}': initial state '{}' is not a declared state",
                    self.name, self.initial_state
                ),
            });
        }

        let mut seen_from_event: HashSet<(&str, &str)> = HashSet::new();
        let mut seen_auto_from: HashSet<&str> = HashSet::new();
        for transition in &self.transitions {
            if !state_ids.contains(transition.from.as_str()) {
                return Err(EngineError::SpecInvalid {
                    message: format!(
                        "definition '{}': transition '{}' has undeclared from-state '{}'",
                        self.name, transition.event, transition.from
                    ),
                });
            }
            if !state_ids.contains(transition.to.as_str()) {
                return Err(EngineError::SpecInvalid {
                    message: format!(
                        "definition '{}': transition '{}' has undeclared to-state '{}'",
                        self.name, transition.event, transition.to
                    ),
                });
            }
            if !seen_from_event.insert((transition.from.as_str(), transition.event.as_str())) {
                return Err(EngineError::SpecInvalid {
                    message: format!(
                        "definition '{}': duplicate transition for (from='{}', event='{}')",
                        self.name, transition.from, transition.event
                    ),
                });
            }
            if transition.auto_transform && !seen_auto_from.insert(transition.from.as_str()) {
                return Err(EngineError::SpecInvalid {
                    message: format!(
                        "definition '{}': state '{}' has more than one outgoing auto-transition",
                        self.name, transition.from
                    ),
                });
            }
        }

        Ok(())
    }

    #[must_use]
    pub fn find_transition(&self, from: &str, event: &str) -> Option<&TransitionDef> {
        self.transitions.iter().find(|t| t.from == from && t.event == event)
    }

    /// The single outgoing auto-transition from `state`, if any.
    #[must_use]
    pub fn find_auto_transition(&self, state: &str) -> Option<&TransitionDef> {
        self.transitions.iter().find(|t| t.from == state && t.auto_transform)
    }
}
