mod config;

use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use murmur_api::auth::{AppState, AppStateInner, verify_token};
use murmur_api::error::ApiError;
use murmur_gateway::{BroadcastRouter, connection};
use murmur_types::error::ChatError;

use crate::config::Config;

#[derive(Debug, Deserialize)]
struct GatewayQuery {
    token: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "murmur=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Init database
    let db = Arc::new(murmur_db::Database::open(&config.db_path)?);

    // One router for the whole process; every connection and handler shares it
    let router = BroadcastRouter::new(db.clone(), config.router_config());
    let _sweeper = router.spawn_typing_sweeper();

    let state: AppState = Arc::new(AppStateInner {
        db,
        router,
        jwt_secret: config.jwt_secret.clone(),
    });

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state.clone());

    let app = Router::new()
        .merge(murmur_api::routes(state))
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    info!("Murmur server listening on {}", config.addr);

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Verify the token before upgrading; a connection that cannot be tied to
/// a user never becomes a WebSocket.
async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<GatewayQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let identity = match query.token.as_deref() {
        Some(token) => verify_token(&state.jwt_secret, token),
        None => Err(ChatError::unauthorized("missing token")),
    };

    match identity {
        Ok(identity) => {
            info!("{} ({}) upgrading to gateway", identity.display_name, identity.user_id);
            let router = state.router.clone();
            ws.on_upgrade(move |socket| {
                connection::handle_connection_authenticated(socket, router, identity)
            })
        }
        Err(err) => {
            warn!("Gateway upgrade refused: {}", err);
            ApiError(err).into_response()
        }
    }
}
