//! Pre- and post-transition hooks (spec §4.G): pre-hooks gate a
//! transition, post-hooks observe a committed one. A hook declared
//! asynchronous is dispatched after the instance's critical section
//! closes instead of being awaited inline.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

/// Context passed to a hook when it fires.
#[derive(Debug, Clone)]
pub struct HookContext {
    pub definition_name: String,
    pub instance_id: String,
    pub event: String,
    pub from_state: String,
    pub to_state: String,
    pub payload: serde_json::Value,
}

#[async_trait]
pub trait TransitionHook: Send + Sync {
    /// If true, this hook is dispatched after the instance's lock is
    /// released instead of being awaited within the critical section.
    fn is_async(&self) -> bool {
        false
    }

    /// # Errors
    /// A pre-hook error aborts the transition; a post-hook error is
    /// logged and otherwise ignored.
    async fn call(&self, ctx: &HookContext) -> anyhow::Result<()>;
}

/// Hooks bound either to `(definition, event)` or `(definition, state)`.
#[derive(Default)]
pub struct HookBucket {
    by_event: RwLock<HashMap<(String, String), Vec<Arc<dyn TransitionHook>>>>,
    by_state: RwLock<HashMap<(String, String), Vec<Arc<dyn TransitionHook>>>>,
}

impl HookBucket {
    pub fn register_for_event(&self, definition_name: impl Into<String>, event: impl Into<String>, hook: Arc<dyn TransitionHook>) {
        self.by_event.write().entry((definition_name.into(), event.into())).or_default().push(hook);
    }

    pub fn register_for_state(&self, definition_name: impl Into<String>, state: impl Into<String>, hook: Arc<dyn TransitionHook>) {
        self.by_state.write().entry((definition_name.into(), state.into())).or_default().push(hook);
    }

    /// Hooks bound to this transition's event or its target state,
    /// de-duplicated by pointer identity so a hook bound to both fires
    /// once.
    #[must_use]
    pub fn matching(&self, definition_name: &str, event: &str, to_state: &str) -> Vec<Arc<dyn TransitionHook>> {
        let mut seen = Vec::new();
        let mut hooks = Vec::new();

        let by_event = self.by_event.read();
        if let Some(bound) = by_event.get(&(definition_name.to_owned(), event.to_owned())) {
            for hook in bound {
                let ptr = Arc::as_ptr(hook).cast::<()>();
                if seen.contains(&ptr) {
                    continue;
                }
                seen.push(ptr);
                hooks.push(hook.clone());
            }
        }

        let by_state = self.by_state.read();
        if let Some(bound) = by_state.get(&(definition_name.to_owned(), to_state.to_owned())) {
            for hook in bound {
                let ptr = Arc::as_ptr(hook).cast::<()>();
                if seen.contains(&ptr) {
                    continue;
                }
                seen.push(ptr);
                hooks.push(hook.clone());
            }
        }

        hooks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHook {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl TransitionHook for CountingHook {
        async fn call(&self, _ctx: &HookContext) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn hook_bound_to_both_event_and_state_fires_once() {
        let bucket = HookBucket::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let hook: Arc<dyn TransitionHook> = Arc::new(CountingHook { calls: calls.clone() });
        bucket.register_for_event("order", "place", hook.clone());
        bucket.register_for_state("order", "placed", hook);

        let matched = bucket.matching("order", "place", "placed");
        assert_eq!(matched.len(), 1);
    }
}
