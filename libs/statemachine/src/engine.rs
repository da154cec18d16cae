//! The state machine engine (spec §4.G): instance lifecycle, guards,
//! hooks, and an LRU cache fronting the persistence port.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use modkit_errors::EngineError;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::{broadcast, Mutex as AsyncMutex};

use crate::definition::{Definition, AUTO_TRANSFORM_LIMIT};
use crate::hooks::{HookBucket, HookContext, TransitionHook};
use crate::instance::{HistoryEntry, Instance, InstanceFilter, InstanceId, InstanceStore};

/// Failure surfaced by [`StateMachineEngine::trigger_transition`]. Kept
/// distinct from `EngineError` because "instance does not exist" is a
/// lookup failure the wire layer maps to 404, not one of the taxonomy's
/// workflow-level error kinds.
#[derive(Debug, thiserror::Error)]
pub enum TransitionError {
    #[error("instance '{0}' not found")]
    NotFound(String),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Emitted to subscribers on every committed transition, in commit order
/// per instance.
#[derive(Debug, Clone)]
pub struct TransitionEvent {
    pub instance_id: InstanceId,
    pub from_state: String,
    pub event: String,
    pub to_state: String,
}

struct CachedInstance {
    lock: Arc<AsyncMutex<Instance>>,
}

/// Concurrent, instance-keyed state machine engine. One instance is
/// transitioned by at most one caller at a time; distinct instances
/// progress fully in parallel.
pub struct StateMachineEngine {
    definitions: DashMap<String, Arc<Definition>>,
    cache: DashMap<InstanceId, CachedInstance>,
    recency: SyncMutex<VecDeque<InstanceId>>,
    max_cached: usize,
    store: Arc<dyn InstanceStore>,
    pre_hooks: HookBucket,
    post_hooks: HookBucket,
    subscribers: DashMap<String, broadcast::Sender<TransitionEvent>>,
}

impl StateMachineEngine {
    #[must_use]
    pub fn new(store: Arc<dyn InstanceStore>, max_cached: usize) -> Self {
        Self {
            definitions: DashMap::new(),
            cache: DashMap::new(),
            recency: SyncMutex::new(VecDeque::new()),
            max_cached,
            store,
            pre_hooks: HookBucket::default(),
            post_hooks: HookBucket::default(),
            subscribers: DashMap::new(),
        }
    }

    /// # Errors
    /// `EngineError::SpecInvalid` if the definition fails its own
    /// invariants or a definition with the same name is already
    /// registered.
    pub fn register_definition(&self, definition: Definition) -> Result<(), EngineError> {
        definition.validate()?;
        if self.definitions.contains_key(&definition.name) {
            return Err(EngineError::SpecInvalid {
                message: format!("state machine definition '{}' is already registered", definition.name),
            });
        }
        self.definitions.insert(definition.name.clone(), Arc::new(definition));
        Ok(())
    }

    pub fn register_pre_hook_for_event(&self, definition_name: impl Into<String>, event: impl Into<String>, hook: Arc<dyn TransitionHook>) {
        self.pre_hooks.register_for_event(definition_name, event, hook);
    }

    pub fn register_pre_hook_for_state(&self, definition_name: impl Into<String>, state: impl Into<String>, hook: Arc<dyn TransitionHook>) {
        self.pre_hooks.register_for_state(definition_name, state, hook);
    }

    pub fn register_post_hook_for_event(&self, definition_name: impl Into<String>, event: impl Into<String>, hook: Arc<dyn TransitionHook>) {
        self.post_hooks.register_for_event(definition_name, event, hook);
    }

    pub fn register_post_hook_for_state(&self, definition_name: impl Into<String>, state: impl Into<String>, hook: Arc<dyn TransitionHook>) {
        self.post_hooks.register_for_state(definition_name, state, hook);
    }

    /// # Errors
    /// `EngineError::SpecInvalid` if `definition_name` is unknown,
    /// `EngineError::DuplicateInstance` if `id` already exists.
    pub async fn create_instance(
        &self,
        definition_name: &str,
        id: impl Into<String>,
        initial_context: serde_json::Value,
    ) -> Result<Instance, EngineError> {
        let id = id.into();
        let definition = self
            .definitions
            .get(definition_name)
            .ok_or_else(|| EngineError::SpecInvalid { message: format!("unknown state machine definition '{definition_name}'") })?;

        if self.cache.contains_key(&id) {
            return Err(EngineError::DuplicateInstance { workflow: definition_name.to_owned(), instance_id: id });
        }
        if self.store.load_instance(&id).await.map_err(|source| EngineError::LifecycleFailure {
            module: "statemachine".to_owned(),
            phase: "create_instance".to_owned(),
            source,
        })?.is_some() {
            return Err(EngineError::DuplicateInstance { workflow: definition_name.to_owned(), instance_id: id });
        }

        let instance = Instance::new(id.clone(), definition_name, definition.initial_state.clone(), initial_context);
        self.store.save_instance(&instance).await.map_err(|source| EngineError::LifecycleFailure {
            module: "statemachine".to_owned(),
            phase: "create_instance".to_owned(),
            source,
        })?;
        self.insert_into_cache(id, instance.clone());
        Ok(instance)
    }

    /// Fetch an instance, consulting the cache before falling back to the
    /// store.
    ///
    /// # Errors
    /// Propagates a store failure. Returns `Ok(None)` if no such instance
    /// exists.
    pub async fn get_instance(&self, id: &str) -> Result<Option<Instance>, EngineError> {
        if let Some(entry) = self.cache.get(id) {
            self.touch(id);
            return Ok(Some(entry.lock.lock().await.clone()));
        }
        let loaded = self.store.load_instance(id).await.map_err(|source| EngineError::LifecycleFailure {
            module: "statemachine".to_owned(),
            phase: "get_instance".to_owned(),
            source,
        })?;
        if let Some(instance) = &loaded {
            self.insert_into_cache(id.to_owned(), instance.clone());
        }
        Ok(loaded)
    }

    /// # Errors
    /// Propagates a store failure.
    pub async fn list_instances(&self, filter: &InstanceFilter) -> Result<Vec<Instance>, EngineError> {
        self.store.list_instances(filter).await.map_err(|source| EngineError::LifecycleFailure {
            module: "statemachine".to_owned(),
            phase: "list_instances".to_owned(),
            source,
        })
    }

    #[must_use]
    pub fn subscribe(&self, definition_name: &str) -> broadcast::Receiver<TransitionEvent> {
        self.subscribers
            .entry(definition_name.to_owned())
            .or_insert_with(|| broadcast::channel(256).0)
            .subscribe()
    }

    /// Fire `event` against `instance_id`'s current state, chaining
    /// through any auto-transitions reached along the way.
    ///
    /// # Errors
    /// `TransitionError::NotFound` if `instance_id` does not exist;
    /// otherwise `EngineError::NoTransition`, `::GuardRejected`,
    /// `::HookFailure`, `::AutoTransformLoop`, or a lifecycle failure.
    pub async fn trigger_transition(
        &self,
        instance_id: &str,
        event: &str,
        payload: serde_json::Value,
    ) -> Result<Instance, TransitionError> {
        let lock = self.instance_lock(instance_id).await?;
        let mut guard = lock.lock().await;

        let definition = self
            .definitions
            .get(&guard.definition_name)
            .ok_or_else(|| TransitionError::Engine(EngineError::SpecInvalid { message: format!("unknown state machine definition '{}'", guard.definition_name) }))?
            .clone();

        // The whole auto-transform chain is one logical transition from the
        // caller's perspective: every hop mutates `working`, a clone of the
        // committed instance, and `guard` only sees the result once every
        // hop (including its pre-hooks) has succeeded. A mid-chain failure
        // must leave the previously committed state untouched.
        let mut working = guard.clone();
        let mut async_post_hooks = Vec::new();
        let mut committed_events = Vec::new();
        let mut current_event = event.to_owned();
        let mut current_payload = payload;
        let mut hops = 0usize;

        loop {
            let transition = definition
                .find_transition(&working.current_state, &current_event)
                .cloned()
                .ok_or_else(|| EngineError::NoTransition { from: working.current_state.clone(), event: current_event.clone() })?;

            if let Some(guard_fn) = &transition.guard {
                if !guard_fn.evaluate(&working.context, &current_payload) {
                    return Err(EngineError::GuardRejected {
                        from: transition.from.clone(),
                        event: transition.event.clone(),
                        guard: "config".to_owned(),
                    }
                    .into());
                }
            }

            let ctx = HookContext {
                definition_name: definition.name.clone(),
                instance_id: instance_id.to_owned(),
                event: current_event.clone(),
                from_state: transition.from.clone(),
                to_state: transition.to.clone(),
                payload: current_payload.clone(),
            };

            for hook in self.pre_hooks.matching(&definition.name, &current_event, &transition.to) {
                hook.call(&ctx).await.map_err(|source| EngineError::HookFailure {
                    hook: "pre-transition".to_owned(),
                    phase: "pre".to_owned(),
                    source,
                })?;
            }

            let now = Utc::now();
            working.history.push(HistoryEntry {
                timestamp: now,
                from_state: transition.from.clone(),
                event: current_event.clone(),
                to_state: transition.to.clone(),
            });
            working.current_state.clone_from(&transition.to);
            working.updated_at = now;

            committed_events.push(TransitionEvent {
                instance_id: instance_id.to_owned(),
                from_state: transition.from.clone(),
                event: current_event.clone(),
                to_state: transition.to.clone(),
            });

            for hook in self.post_hooks.matching(&definition.name, &current_event, &transition.to) {
                if hook.is_async() {
                    async_post_hooks.push((hook, ctx.clone()));
                } else if let Err(source) = hook.call(&ctx).await {
                    tracing::warn!(error = %source, definition = %definition.name, "post-transition hook failed");
                }
            }

            if !transition.auto_transform {
                break;
            }
            let Some(next) = definition.find_auto_transition(&transition.to) else { break };
            hops += 1;
            if hops > AUTO_TRANSFORM_LIMIT {
                return Err(EngineError::AutoTransformLoop { state: transition.to.clone(), limit: AUTO_TRANSFORM_LIMIT }.into());
            }
            current_event = next.event.clone();
            current_payload = serde_json::Value::Null;
        }

        self.store.save_instance(&working).await.map_err(|source| EngineError::LifecycleFailure {
            module: "statemachine".to_owned(),
            phase: "trigger_transition".to_owned(),
            source,
        })?;
        *guard = working;
        let result = guard.clone();
        drop(guard);
        self.touch(instance_id);

        if let Some(sender) = self.subscribers.get(&definition.name) {
            for event in committed_events {
                let _ignored = sender.send(event);
            }
        }

        for (hook, ctx) in async_post_hooks {
            tokio::spawn(async move {
                if let Err(source) = hook.call(&ctx).await {
                    tracing::warn!(error = %source, "async post-transition hook failed");
                }
            });
        }

        Ok(result)
    }

    async fn instance_lock(&self, id: &str) -> Result<Arc<AsyncMutex<Instance>>, TransitionError> {
        if let Some(entry) = self.cache.get(id) {
            self.touch(id);
            return Ok(entry.lock.clone());
        }
        let loaded = self
            .store
            .load_instance(id)
            .await
            .map_err(|source| TransitionError::Engine(EngineError::LifecycleFailure {
                module: "statemachine".to_owned(),
                phase: "load_instance".to_owned(),
                source,
            }))?
            .ok_or_else(|| TransitionError::NotFound(id.to_owned()))?;
        self.insert_into_cache(id.to_owned(), loaded);
        let entry = self.cache.get(id).ok_or_else(|| TransitionError::NotFound(id.to_owned()))?;
        Ok(entry.lock.clone())
    }

    fn insert_into_cache(&self, id: InstanceId, instance: Instance) {
        self.cache.insert(id.clone(), CachedInstance { lock: Arc::new(AsyncMutex::new(instance)) });
        self.touch(&id);
        self.evict_if_needed();
    }

    fn touch(&self, id: &str) {
        let mut recency = self.recency.lock();
        recency.retain(|existing| existing != id);
        recency.push_back(id.to_owned());
    }

    fn evict_if_needed(&self) {
        if self.max_cached == 0 {
            return;
        }
        let mut recency = self.recency.lock();
        while recency.len() > self.max_cached {
            if let Some(victim) = recency.pop_front() {
                self.cache.remove(&victim);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{StateDef, TransitionDef};
    use crate::instance::InMemoryInstanceStore;

    fn order_definition() -> Definition {
        Definition {
            name: "order".to_owned(),
            initial_state: "draft".to_owned(),
            states: vec![StateDef::new("draft"), StateDef::new("placed"), StateDef::new("shipped").terminal()],
            transitions: vec![
                TransitionDef::new("place", "draft", "placed"),
                TransitionDef::new("ship", "placed", "shipped"),
            ],
        }
    }

    fn engine() -> StateMachineEngine {
        let engine = StateMachineEngine::new(Arc::new(InMemoryInstanceStore::default()), 16);
        engine.register_definition(order_definition()).unwrap();
        engine
    }

    #[tokio::test]
    async fn creating_a_duplicate_instance_id_fails() {
        let engine = engine();
        engine.create_instance("order", "o-1", serde_json::json!({})).await.unwrap();
        let err = engine.create_instance("order", "o-1", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, EngineError::DuplicateInstance { .. }));
    }

    #[tokio::test]
    async fn transition_updates_state_and_history() {
        let engine = engine();
        engine.create_instance("order", "o-1", serde_json::json!({})).await.unwrap();

        let instance = engine.trigger_transition("o-1", "place", serde_json::json!({})).await.unwrap();
        assert_eq!(instance.current_state, "placed");
        assert_eq!(instance.history.len(), 1);
        assert_eq!(instance.history[0].from_state, "draft");
    }

    #[tokio::test]
    async fn undefined_transition_fails_with_no_transition() {
        let engine = engine();
        engine.create_instance("order", "o-1", serde_json::json!({})).await.unwrap();
        let err = engine.trigger_transition("o-1", "ship", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, EngineError::NoTransition { .. }));
    }

    #[tokio::test]
    async fn guard_rejection_leaves_state_unchanged() {
        let engine = StateMachineEngine::new(Arc::new(InMemoryInstanceStore::default()), 16);
        let mut definition = order_definition();
        definition.transitions[0] = TransitionDef::new("place", "draft", "placed").with_guard(|_ctx: &serde_json::Value, _payload: &serde_json::Value| false);
        engine.register_definition(definition).unwrap();
        engine.create_instance("order", "o-1", serde_json::json!({})).await.unwrap();

        let err = engine.trigger_transition("o-1", "place", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, EngineError::GuardRejected { .. }));

        let instance = engine.get_instance("o-1").await.unwrap().unwrap();
        assert_eq!(instance.current_state, "draft");
    }

    #[tokio::test]
    async fn auto_transform_chains_through_intermediate_states() {
        let mut definition = order_definition();
        definition.states.push(StateDef::new("archived").terminal());
        definition.transitions[1] = TransitionDef::new("ship", "placed", "shipped").auto();
        definition.transitions.push(TransitionDef::new("archive", "shipped", "archived"));

        let engine = StateMachineEngine::new(Arc::new(InMemoryInstanceStore::default()), 16);
        engine.register_definition(definition).unwrap();
        engine.create_instance("order", "o-1", serde_json::json!({})).await.unwrap();
        engine.trigger_transition("o-1", "place", serde_json::json!({})).await.unwrap();

        let instance = engine.trigger_transition("o-1", "ship", serde_json::json!({})).await.unwrap();
        assert_eq!(instance.current_state, "shipped");
        assert_eq!(instance.history.len(), 2);
    }

    #[tokio::test]
    async fn failing_pre_hook_mid_chain_reverts_to_pre_chain_state() {
        struct RefuseArchive;
        #[async_trait::async_trait]
        impl TransitionHook for RefuseArchive {
            async fn call(&self, _ctx: &HookContext) -> anyhow::Result<()> {
                anyhow::bail!("archival not permitted yet")
            }
        }

        let mut definition = order_definition();
        definition.states.push(StateDef::new("archived").terminal());
        definition.transitions[1] = TransitionDef::new("ship", "placed", "shipped").auto();
        definition.transitions.push(TransitionDef::new("archive", "shipped", "archived"));

        let engine = StateMachineEngine::new(Arc::new(InMemoryInstanceStore::default()), 16);
        engine.register_definition(definition).unwrap();
        engine.register_pre_hook_for_event("order", "archive", Arc::new(RefuseArchive));
        engine.create_instance("order", "o-1", serde_json::json!({})).await.unwrap();
        engine.trigger_transition("o-1", "place", serde_json::json!({})).await.unwrap();

        let err = engine.trigger_transition("o-1", "ship", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, TransitionError::Engine(EngineError::HookFailure { .. })));

        // The chain's first hop (ship: placed -> shipped) must not be
        // visible even though it committed to `working` before the second
        // hop's pre-hook failed.
        let instance = engine.get_instance("o-1").await.unwrap().unwrap();
        assert_eq!(instance.current_state, "placed");
        assert_eq!(instance.history.len(), 1);
    }

    #[tokio::test]
    async fn lru_eviction_still_round_trips_through_the_store() {
        let engine = StateMachineEngine::new(Arc::new(InMemoryInstanceStore::default()), 1);
        engine.register_definition(order_definition()).unwrap();
        engine.create_instance("order", "o-1", serde_json::json!({})).await.unwrap();
        engine.create_instance("order", "o-2", serde_json::json!({})).await.unwrap();

        let instance = engine.get_instance("o-1").await.unwrap().unwrap();
        assert_eq!(instance.current_state, "draft");
    }
}
