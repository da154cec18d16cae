//! HTTP-facing helpers shared by modules that expose REST endpoints.

pub mod error_layer;
pub mod problem;
pub mod response;
pub mod trace_layer;

pub use error_layer::{
    IntoProblem, error_mapping_middleware, extract_trace_id, map_error_to_problem,
};
pub use problem::{
    APPLICATION_PROBLEM_JSON, Problem, ValidationError, bad_request, conflict, internal_error,
    not_found, unprocessable,
};
pub use trace_layer::{WithRequestContext, WithTraceContext};

/// Prelude module that re-exports common API types and utilities for module authors
pub mod prelude {
    // Result type (Problem-only)
    pub use crate::result::ApiResult;

    // Problem type for error construction
    pub use super::problem::Problem;

    // Response sugar
    pub use super::response::{JsonBody, created_json, no_content, ok_json};

    // Useful axum bits (common in handlers)
    pub use axum::{Json, http::StatusCode, response::IntoResponse};
}
