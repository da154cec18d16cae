//! The four wire endpoints over the shared `StateMachineEngine` (spec §6):
//! create an instance, fire a transition, fetch one, list/filter.

use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use modkit::api::not_found;
use modkit::api::prelude::*;
use serde::Deserialize;
use statemachine::{InstanceFilter, StateMachineEngine, TransitionError};

fn transition_error_to_problem(err: TransitionError) -> Problem {
    match err {
        TransitionError::NotFound(id) => not_found(format!("instance '{id}' not found")),
        TransitionError::Engine(engine_err) => engine_err.as_problem(),
    }
}

pub fn router(engine: Arc<StateMachineEngine>) -> Router {
    Router::new()
        .route("/api/workflows/{name}/instances", post(create_instance))
        .route("/api/workflows/instances/{id}/transitions", post(fire_transition))
        .route("/api/workflows/instances/{id}", get(get_instance))
        .route("/api/workflows/instances", get(list_instances))
        .with_state(engine)
}

#[derive(Debug, Deserialize)]
struct CreateInstanceBody {
    id: String,
    #[serde(default)]
    context: serde_json::Value,
}

async fn create_instance(
    State(engine): State<Arc<StateMachineEngine>>,
    Path(name): Path<String>,
    Json(body): Json<CreateInstanceBody>,
) -> ApiResult<Json<statemachine::Instance>> {
    let instance = engine
        .create_instance(&name, body.id, body.context)
        .await
        .map_err(|err| err.as_problem())?;
    Ok(Json(instance))
}

#[derive(Debug, Deserialize)]
struct TransitionBody {
    event: String,
    #[serde(default)]
    payload: serde_json::Value,
}

async fn fire_transition(
    State(engine): State<Arc<StateMachineEngine>>,
    Path(id): Path<String>,
    Json(body): Json<TransitionBody>,
) -> ApiResult<Json<statemachine::Instance>> {
    let instance = engine
        .trigger_transition(&id, &body.event, body.payload)
        .await
        .map_err(transition_error_to_problem)?;
    Ok(Json(instance))
}

async fn get_instance(
    State(engine): State<Arc<StateMachineEngine>>,
    Path(id): Path<String>,
) -> ApiResult<Json<statemachine::Instance>> {
    let instance = engine.get_instance(&id).await.map_err(|err| err.as_problem())?;
    instance.map(Json).ok_or_else(|| not_found(format!("instance '{id}' not found")))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    workflow: Option<String>,
    state: Option<String>,
}

async fn list_instances(
    State(engine): State<Arc<StateMachineEngine>>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<statemachine::Instance>>> {
    let filter = InstanceFilter { definition_name: query.workflow, state: query.state };
    let instances = engine.list_instances(&filter).await.map_err(|err| err.as_problem())?;
    Ok(Json(instances))
}

#[cfg(test)]
mod tests {
    use super::*;
    use statemachine::{Definition, InMemoryInstanceStore, StateDef, TransitionDef};
    use tower::ServiceExt;

    fn sample_definition() -> Definition {
        Definition {
            name: "order".to_owned(),
            initial_state: "draft".to_owned(),
            states: vec![StateDef::new("draft"), StateDef::new("placed")],
            transitions: vec![TransitionDef::new("place", "draft", "placed")],
        }
    }

    fn test_engine() -> Arc<StateMachineEngine> {
        let store = Arc::new(InMemoryInstanceStore::default());
        let engine = Arc::new(StateMachineEngine::new(store, 16));
        engine.register_definition(sample_definition()).unwrap();
        engine
    }

    #[tokio::test]
    async fn create_then_fetch_round_trips() {
        let app = router(test_engine());

        let create_req = axum::http::Request::post("/api/workflows/order/instances")
            .header("content-type", "application/json")
            .body(axum::body::Body::from(r#"{"id":"inst-1","context":{}}"#))
            .unwrap();
        let response = app.clone().oneshot(create_req).await.unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);

        let get_req = axum::http::Request::get("/api/workflows/instances/inst-1").body(axum::body::Body::empty()).unwrap();
        let response = app.oneshot(get_req).await.unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }

    #[tokio::test]
    async fn transition_on_unknown_instance_is_404() {
        let app = router(test_engine());
        let req = axum::http::Request::post("/api/workflows/instances/missing/transitions")
            .header("content-type", "application/json")
            .body(axum::body::Body::from(r#"{"event":"place"}"#))
            .unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::NOT_FOUND);
    }
}
