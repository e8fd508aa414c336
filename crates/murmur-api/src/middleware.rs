use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use murmur_types::error::ChatError;

use crate::auth::{AppState, verify_token};
use crate::error::ApiError;

/// Extract and validate the bearer token, then hand the handler an `Identity`.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| ChatError::unauthorized("missing bearer token"))?;

    let identity = verify_token(&state.jwt_secret, token)?;

    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}
