//! Pipeline step execution (spec §4.H): an ordered sequence of steps
//! sharing a key/value context, each with its own timeout, retry policy,
//! and declared inputs/outputs.
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use artifact_store::ArtifactStore;
use async_trait::async_trait;
use modkit_errors::EngineError;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

/// Backoff strategy between retry attempts.
#[derive(Debug, Clone)]
pub enum Backoff {
    Fixed { delay: Duration },
    Exponential { initial_delay: Duration, multiplier: f64, cap: Duration },
}

impl Backoff {
    /// Delay before the given 1-indexed retry attempt.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self {
            Self::Fixed { delay } => *delay,
            Self::Exponential { initial_delay, multiplier, cap } => {
                let scaled = initial_delay.as_secs_f64() * multiplier.powi(i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX));
                Duration::from_secs_f64(scaled.min(cap.as_secs_f64()))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    #[must_use]
    pub fn once() -> Self {
        Self { max_attempts: 1, backoff: Backoff::Fixed { delay: Duration::ZERO } }
    }
}

/// One key this step reads from the shared context.
#[derive(Debug, Clone)]
pub struct InputSpec {
    pub key: String,
    pub required: bool,
}

#[derive(Debug, Clone)]
pub struct StepDef {
    pub name: String,
    pub kind: String,
    pub config: Value,
    pub retry: RetryPolicy,
    pub inputs: Vec<InputSpec>,
    pub outputs: Vec<String>,
    /// Subset of `outputs` written to the artifact store (keyed by this
    /// step's name) rather than back into the shared context.
    pub artifact_outputs: Vec<String>,
    pub timeout: Duration,
    pub continue_on_failure: bool,
}

/// Implements one step `kind`. Given the step's config and its resolved
/// inputs, produces the values to write back to the shared context under
/// the step's declared output keys.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(&self, config: &Value, inputs: &Map<String, Value>) -> anyhow::Result<Map<String, Value>>;
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("step '{step}' is missing required input '{key}'")]
    MissingInput { step: String, key: String },
    #[error(transparent)]
    Engine(#[from] EngineError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub context: Map<String, Value>,
    pub status: PipelineStatus,
}

/// Drives an ordered sequence of [`StepDef`]s against a registry of
/// [`StepExecutor`]s, sharing one key/value context across steps.
pub struct PipelineRunner {
    artifacts: Arc<dyn ArtifactStore>,
}

impl PipelineRunner {
    #[must_use]
    pub fn new(artifacts: Arc<dyn ArtifactStore>) -> Self {
        Self { artifacts }
    }

    /// Run `steps` in order against `context`, stopping at the first step
    /// that exhausts its retries without `continue_on_failure` set.
    /// `execution_id` scopes any artifact outputs written along the way.
    ///
    /// # Errors
    /// `PipelineError::MissingInput` if a required input key is absent
    /// from the context; `PipelineError::Engine(EngineError::SpecInvalid)`
    /// if a step's `kind` has no registered executor;
    /// `PipelineError::Engine(EngineError::RetryExhausted)` if a
    /// non-continuing step exhausts its retry policy;
    /// `PipelineError::Engine(EngineError::Cancelled)` if the token fires
    /// mid-step.
    pub async fn run(
        &self,
        execution_id: &str,
        steps: &[StepDef],
        executors: &HashMap<String, Arc<dyn StepExecutor>>,
        mut context: Map<String, Value>,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutcome, PipelineError> {
        for step in steps {
            if cancel.is_cancelled() {
                return Err(PipelineError::Engine(EngineError::Cancelled));
            }

            let inputs = Self::resolve_inputs(step, &context)?;
            let executor = executors.get(&step.kind).ok_or_else(|| {
                PipelineError::Engine(EngineError::SpecInvalid {
                    message: format!("no executor registered for step kind '{}'", step.kind),
                })
            })?;

            match self.run_step_with_retry(step, executor.as_ref(), &inputs, cancel).await {
                Ok(outputs) => {
                    for key in &step.outputs {
                        let Some(value) = outputs.get(key) else { continue };
                        if step.artifact_outputs.contains(key) {
                            let payload = serde_json::to_vec(value).unwrap_or_default();
                            self.artifacts
                                .put(execution_id, key, bytes::Bytes::from(payload))
                                .await
                                .map_err(PipelineError::Engine)?;
                        } else {
                            context.insert(key.clone(), value.clone());
                        }
                    }
                }
                Err(source) => {
                    if step.continue_on_failure {
                        tracing::warn!(step = %step.name, error = %source, "pipeline step failed, continuing");
                        continue;
                    }
                    if cancel.is_cancelled() {
                        return Err(PipelineError::Engine(EngineError::Cancelled));
                    }
                    return Err(PipelineError::Engine(EngineError::RetryExhausted {
                        step: step.name.clone(),
                        attempts: step.retry.max_attempts,
                    }));
                }
            }
        }

        Ok(PipelineOutcome { context, status: PipelineStatus::Completed })
    }

    fn resolve_inputs(step: &StepDef, context: &Map<String, Value>) -> Result<Map<String, Value>, PipelineError> {
        let mut inputs = Map::new();
        for input in &step.inputs {
            match context.get(&input.key) {
                Some(value) => {
                    inputs.insert(input.key.clone(), value.clone());
                }
                None if input.required => {
                    return Err(PipelineError::MissingInput { step: step.name.clone(), key: input.key.clone() });
                }
                None => {}
            }
        }
        Ok(inputs)
    }

    async fn run_step_with_retry(
        &self,
        step: &StepDef,
        executor: &dyn StepExecutor,
        inputs: &Map<String, Value>,
        cancel: &CancellationToken,
    ) -> anyhow::Result<Map<String, Value>> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let exec_fut = executor.execute(&step.config, inputs);
            let result: anyhow::Result<Map<String, Value>> = tokio::select! {
                () = cancel.cancelled() => Err(anyhow::anyhow!("cancelled")),
                () = tokio::time::sleep(step.timeout) => Err(anyhow::anyhow!("step '{}' timed out after {:?}", step.name, step.timeout)),
                res = exec_fut => res,
            };

            match result {
                Ok(outputs) => return Ok(outputs),
                Err(source) if attempt >= step.retry.max_attempts || cancel.is_cancelled() => return Err(source),
                Err(source) => {
                    tracing::debug!(step = %step.name, attempt, error = %source, "step attempt failed, retrying");
                    tokio::time::sleep(step.retry.backoff.delay_for(attempt)).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyStep {
        failures_remaining: AtomicU32,
    }

    #[async_trait]
    impl StepExecutor for FlakyStep {
        async fn execute(&self, _config: &Value, inputs: &Map<String, Value>) -> anyhow::Result<Map<String, Value>> {
            if self.failures_remaining.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok() {
                anyhow::bail!("transient failure");
            }
            let mut outputs = Map::new();
            outputs.insert("echoed".to_owned(), inputs.get("value").cloned().unwrap_or(Value::Null));
            Ok(outputs)
        }
    }

    fn step(name: &str, kind: &str, max_attempts: u32) -> StepDef {
        StepDef {
            name: name.to_owned(),
            kind: kind.to_owned(),
            config: Value::Null,
            retry: RetryPolicy { max_attempts, backoff: Backoff::Fixed { delay: Duration::from_millis(1) } },
            inputs: vec![InputSpec { key: "value".to_owned(), required: true }],
            outputs: vec!["echoed".to_owned()],
            artifact_outputs: Vec::new(),
            timeout: Duration::from_secs(5),
            continue_on_failure: false,
        }
    }

    #[tokio::test]
    async fn missing_required_input_fails_fast() {
        let runner = PipelineRunner::new(Arc::new(artifact_store::InMemoryArtifactStore::default()));
        let executors: HashMap<String, Arc<dyn StepExecutor>> = HashMap::new();
        let err = runner
            .run("exec-1", &[step("s1", "echo", 1)], &executors, Map::new(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::MissingInput { .. }));
    }

    #[tokio::test]
    async fn step_retries_until_success() {
        let runner = PipelineRunner::new(Arc::new(artifact_store::InMemoryArtifactStore::default()));
        let mut executors: HashMap<String, Arc<dyn StepExecutor>> = HashMap::new();
        executors.insert("echo".to_owned(), Arc::new(FlakyStep { failures_remaining: AtomicU32::new(2) }));

        let mut context = Map::new();
        context.insert("value".to_owned(), Value::from(42));

        let outcome = runner.run("exec-1", &[step("s1", "echo", 3)], &executors, context, &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.status, PipelineStatus::Completed);
        assert_eq!(outcome.context.get("echoed"), Some(&Value::from(42)));
    }

    #[tokio::test]
    async fn retry_exhaustion_fails_the_pipeline_unless_continue_on_failure() {
        let runner = PipelineRunner::new(Arc::new(artifact_store::InMemoryArtifactStore::default()));
        let mut executors: HashMap<String, Arc<dyn StepExecutor>> = HashMap::new();
        executors.insert("echo".to_owned(), Arc::new(FlakyStep { failures_remaining: AtomicU32::new(10) }));

        let mut context = Map::new();
        context.insert("value".to_owned(), Value::from(1));

        let err = runner
            .run("exec-1", &[step("s1", "echo", 2)], &executors, context.clone(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Engine(EngineError::RetryExhausted { .. })));

        let mut continuing = step("s1", "echo", 2);
        continuing.continue_on_failure = true;
        let outcome = runner.run("exec-1", &[continuing], &executors, context, &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.status, PipelineStatus::Completed);
        assert!(!outcome.context.contains_key("echoed"));
    }

    #[tokio::test]
    async fn unknown_step_kind_is_spec_invalid() {
        let runner = PipelineRunner::new(Arc::new(artifact_store::InMemoryArtifactStore::default()));
        let executors: HashMap<String, Arc<dyn StepExecutor>> = HashMap::new();
        let mut step_def = step("s1", "unregistered", 1);
        step_def.inputs.clear();

        let err = runner.run("exec-1", &[step_def], &executors, Map::new(), &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Engine(EngineError::SpecInvalid { .. })));
    }
}
