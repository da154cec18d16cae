//! Centralized error mapping for Axum
//!
//! Converts framework and engine errors into consistent RFC 9457 Problem+JSON
//! responses, eliminating per-route boilerplate.

use axum::{extract::Request, http::HeaderMap, middleware::Next, response::Response};
use http::StatusCode;
use std::any::Any;

use crate::api::problem::Problem;
use crate::config::ConfigError;
use modkit_errors::EngineError;

/// Middleware that passes through successful and already-mapped responses;
/// route handlers perform the actual error-to-problem conversion via
/// `IntoProblem`/`map_error_to_problem`.
pub async fn error_mapping_middleware(request: Request, next: Next) -> Response {
    let response = next.run(request).await;

    if response.status().is_success() || is_problem_response(&response) {
        return response;
    }

    response
}

fn is_problem_response(response: &Response) -> bool {
    response
        .headers()
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("application/problem+json"))
}

/// Extract trace ID from common headers, falling back to the current span.
pub fn extract_trace_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-trace-id")
        .or_else(|| headers.get("x-request-id"))
        .or_else(|| headers.get("traceparent"))
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string)
        .or_else(|| {
            tracing::Span::current()
                .id()
                .map(|id| id.into_u64().to_string())
        })
}

/// Centralized error mapping function.
pub fn map_error_to_problem(error: &dyn Any, instance: &str, trace_id: Option<String>) -> Problem {
    if let Some(engine_err) = error.downcast_ref::<EngineError>() {
        let mut problem = engine_err.as_problem();
        problem = problem.with_instance(instance);
        if let Some(tid) = trace_id {
            problem = problem.with_trace_id(tid);
        }
        return problem;
    }

    if let Some(config_err) = error.downcast_ref::<ConfigError>() {
        let mut problem = match config_err {
            ConfigError::ModuleNotFound { module } => Problem::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Configuration Error",
                format!("Module '{module}' configuration not found"),
            )
            .with_code("CONFIG_MODULE_NOT_FOUND"),

            ConfigError::InvalidModuleStructure { module } => Problem::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Configuration Error",
                format!("Module '{module}' has invalid configuration structure"),
            )
            .with_code("CONFIG_INVALID_STRUCTURE"),

            ConfigError::MissingConfigSection { module } => Problem::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Configuration Error",
                format!("Module '{module}' is missing required config section"),
            )
            .with_code("CONFIG_MISSING_SECTION"),

            ConfigError::InvalidConfig { module, .. } => Problem::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Configuration Error",
                format!("Module '{module}' has invalid configuration"),
            )
            .with_code("CONFIG_INVALID"),
        };

        problem = problem.with_instance(instance);
        if let Some(tid) = trace_id {
            problem = problem.with_trace_id(tid);
        }
        return problem;
    }

    if let Some(anyhow_err) = error.downcast_ref::<anyhow::Error>() {
        let mut problem = Problem::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal Server Error",
            "An internal error occurred",
        )
        .with_code("INTERNAL_ERROR");

        problem = problem.with_instance(instance);
        if let Some(tid) = trace_id {
            problem = problem.with_trace_id(tid);
        }

        tracing::error!(error = %anyhow_err, "internal server error");
        return problem;
    }

    let mut problem = Problem::new(
        StatusCode::INTERNAL_SERVER_ERROR,
        "Unknown Error",
        "An unknown error occurred",
    )
    .with_code("UNKNOWN_ERROR");

    problem = problem.with_instance(instance);
    if let Some(tid) = trace_id {
        problem = problem.with_trace_id(tid);
    }

    tracing::error!("unknown error type in error mapping layer");
    problem
}

/// Helper trait for converting errors to Problem responses with context.
pub trait IntoProblem {
    fn into_problem(self, instance: &str, trace_id: Option<String>) -> Problem;
}

impl IntoProblem for EngineError {
    fn into_problem(self, instance: &str, trace_id: Option<String>) -> Problem {
        map_error_to_problem(&self as &dyn Any, instance, trace_id)
    }
}

impl IntoProblem for ConfigError {
    fn into_problem(self, instance: &str, trace_id: Option<String>) -> Problem {
        map_error_to_problem(&self as &dyn Any, instance, trace_id)
    }
}

impl IntoProblem for anyhow::Error {
    fn into_problem(self, instance: &str, trace_id: Option<String>) -> Problem {
        map_error_to_problem(&self as &dyn Any, instance, trace_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_error_mapping_sets_status_and_code() {
        let error = EngineError::NoTransition {
            from: "start".into(),
            event: "finish".into(),
        };
        let problem = error.into_problem("/test", Some("trace123".to_owned()));

        assert_eq!(problem.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(problem.instance, "/test");
        assert_eq!(problem.trace_id, Some("trace123".to_owned()));
    }

    #[test]
    fn config_error_mapping() {
        let error = ConfigError::ModuleNotFound {
            module: "test_module".to_owned(),
        };
        let problem = error.into_problem("/api/test", None);

        assert_eq!(problem.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(problem.code, "CONFIG_MODULE_NOT_FOUND");
        assert_eq!(problem.instance, "/api/test");
        assert!(problem.detail.contains("test_module"));
    }

    #[test]
    fn anyhow_error_mapping() {
        let error = anyhow::anyhow!("Something went wrong");
        let problem = error.into_problem("/api/test", Some("trace456".to_owned()));

        assert_eq!(problem.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(problem.code, "INTERNAL_ERROR");
        assert_eq!(problem.instance, "/api/test");
        assert_eq!(problem.trace_id, Some("trace456".to_owned()));
    }

    #[test]
    fn extract_trace_id_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-trace-id", "test-trace-123".parse().unwrap());

        let trace_id = extract_trace_id(&headers);
        assert_eq!(trace_id, Some("test-trace-123".to_owned()));
    }
}
