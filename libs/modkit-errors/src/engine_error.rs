//! Engine error taxonomy (build-phase, lifecycle, state-machine, pipeline,
//! migration, and artifact-store failures) mapped to RFC 9457 Problem
//! Details for HTTP callers.
//!
//! Status mapping follows the propagation policy: 400 for spec/graph
//! validation errors caught before anything runs, 404 for missing handlers
//! or artifacts, 409 for state conflicts (duplicate instances, held locks),
//! 422 for guard/transition rejections and content mismatches, and 500 for
//! everything that represents an internal failure during a running engine.

use http::StatusCode;

use crate::problem::Problem;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("specification is invalid: {message}")]
    SpecInvalid { message: String },

    #[error("module '{module}' factory refused to build: {reason}")]
    FactoryRefused { module: String, reason: String },

    #[error("dependency cycle detected among modules: {modules:?}")]
    DependencyCycle { modules: Vec<String> },

    #[error("module '{module}' depends on unregistered module '{dependency}'")]
    UnknownDependency { module: String, dependency: String },

    #[error("module '{module}' failed during {phase}")]
    LifecycleFailure {
        module: String,
        phase: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("no handler registered for workflow '{workflow}'")]
    NoHandler { workflow: String },

    #[error("no transition for event '{event}' from state '{from}'")]
    NoTransition { from: String, event: String },

    #[error("guard '{guard}' rejected event '{event}' from state '{from}'")]
    GuardRejected {
        from: String,
        event: String,
        guard: String,
    },

    #[error("instance '{instance_id}' already exists for workflow '{workflow}'")]
    DuplicateInstance { workflow: String, instance_id: String },

    #[error("auto-transform loop detected at state '{state}' (exceeded {limit} hops)")]
    AutoTransformLoop { state: String, limit: usize },

    #[error("hook '{hook}' failed during {phase}")]
    HookFailure {
        hook: String,
        phase: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("pipeline step '{step}' exhausted retries after {attempts} attempts")]
    RetryExhausted { step: String, attempts: u32 },

    #[error("distributed lock '{key}' is held by another owner")]
    LockUnavailable { key: String },

    #[error("migration '{version}' failed")]
    MigrationFailed {
        version: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("artifact '{key}' is missing from the store")]
    ArtifactMissing { key: String },

    #[error("artifact '{key}' checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        key: String,
        expected: String,
        actual: String,
    },

    #[error("operation cancelled")]
    Cancelled,
}

impl EngineError {
    #[must_use]
    pub fn as_problem(&self) -> Problem {
        let (status, title, code, type_url) = self.problem_meta();
        Problem::new(status, title, self.to_string())
            .with_code(code)
            .with_type(type_url)
    }

    const fn problem_meta(&self) -> (StatusCode, &'static str, &'static str, &'static str) {
        match self {
            Self::SpecInvalid { .. } => (
                StatusCode::BAD_REQUEST,
                "Specification Invalid",
                "SPEC_INVALID",
                "https://loomwork.dev/errors/spec-invalid",
            ),
            Self::FactoryRefused { .. } => (
                StatusCode::BAD_REQUEST,
                "Factory Refused",
                "FACTORY_REFUSED",
                "https://loomwork.dev/errors/factory-refused",
            ),
            Self::DependencyCycle { .. } => (
                StatusCode::BAD_REQUEST,
                "Dependency Cycle",
                "DEPENDENCY_CYCLE",
                "https://loomwork.dev/errors/dependency-cycle",
            ),
            Self::UnknownDependency { .. } => (
                StatusCode::BAD_REQUEST,
                "Unknown Dependency",
                "UNKNOWN_DEPENDENCY",
                "https://loomwork.dev/errors/unknown-dependency",
            ),
            Self::LifecycleFailure { .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Lifecycle Failure",
                "LIFECYCLE_FAILURE",
                "https://loomwork.dev/errors/lifecycle-failure",
            ),
            Self::NoHandler { .. } => (
                StatusCode::NOT_FOUND,
                "No Handler",
                "NO_HANDLER",
                "https://loomwork.dev/errors/no-handler",
            ),
            Self::NoTransition { .. } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "No Transition",
                "NO_TRANSITION",
                "https://loomwork.dev/errors/no-transition",
            ),
            Self::GuardRejected { .. } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "Guard Rejected",
                "GUARD_REJECTED",
                "https://loomwork.dev/errors/guard-rejected",
            ),
            Self::DuplicateInstance { .. } => (
                StatusCode::CONFLICT,
                "Duplicate Instance",
                "DUPLICATE_INSTANCE",
                "https://loomwork.dev/errors/duplicate-instance",
            ),
            Self::AutoTransformLoop { .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Auto-Transform Loop",
                "AUTO_TRANSFORM_LOOP",
                "https://loomwork.dev/errors/auto-transform-loop",
            ),
            Self::HookFailure { .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Hook Failure",
                "HOOK_FAILURE",
                "https://loomwork.dev/errors/hook-failure",
            ),
            Self::RetryExhausted { .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Retry Exhausted",
                "RETRY_EXHAUSTED",
                "https://loomwork.dev/errors/retry-exhausted",
            ),
            Self::LockUnavailable { .. } => (
                StatusCode::CONFLICT,
                "Lock Unavailable",
                "LOCK_UNAVAILABLE",
                "https://loomwork.dev/errors/lock-unavailable",
            ),
            Self::MigrationFailed { .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Migration Failed",
                "MIGRATION_FAILED",
                "https://loomwork.dev/errors/migration-failed",
            ),
            Self::ArtifactMissing { .. } => (
                StatusCode::NOT_FOUND,
                "Artifact Missing",
                "ARTIFACT_MISSING",
                "https://loomwork.dev/errors/artifact-missing",
            ),
            Self::ChecksumMismatch { .. } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "Checksum Mismatch",
                "CHECKSUM_MISMATCH",
                "https://loomwork.dev/errors/checksum-mismatch",
            ),
            Self::Cancelled => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Cancelled",
                "CANCELLED",
                "https://loomwork.dev/errors/cancelled",
            ),
        }
    }
}
