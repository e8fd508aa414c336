pub mod auth;
pub mod conversations;
pub mod error;
pub mod messages;
pub mod middleware;

use axum::{
    Json, Router, middleware as axum_middleware,
    routing::{delete, get, post},
};
use serde_json::{Value, json};

use crate::auth::AppState;

/// REST routes. Everything except `/health` sits behind `require_auth`.
pub fn routes(state: AppState) -> Router {
    let protected = Router::new()
        .route(
            "/conversations",
            get(conversations::list_conversations).post(conversations::create_conversation),
        )
        .route(
            "/conversations/{conversation_id}/messages",
            get(messages::get_messages),
        )
        .route(
            "/conversations/{conversation_id}/participants",
            post(conversations::add_participant),
        )
        .route(
            "/conversations/{conversation_id}/participants/{user_id}",
            delete(conversations::remove_participant),
        )
        .route("/search", get(messages::search))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ))
        .with_state(state);

    Router::new()
        .route("/health", get(health))
        .merge(protected)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
