use std::sync::Arc;

use jsonwebtoken::{DecodingKey, Validation, decode};
use tracing::{debug, error};

use murmur_db::Database;
use murmur_gateway::BroadcastRouter;
use murmur_types::api::{Claims, Identity};
use murmur_types::error::ChatError;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub router: BroadcastRouter,
    pub jwt_secret: String,
}

impl AppStateInner {
    /// Run a blocking store call off the async runtime. Failures are logged
    /// here and surface as `Internal`.
    pub async fn db<F, T>(&self, f: F) -> Result<T, ChatError>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                ChatError::internal("persistence task failed")
            })?
            .map_err(|e| {
                error!("Persistence failure: {:#}", e);
                ChatError::internal("persistence failure")
            })
    }
}

/// Verify a token issued by the auth service and resolve who it names.
/// Tokens are HS256 with an `exp` claim; expired or tampered tokens and
/// tokens naming the nil user are all `Unauthorized`.
pub fn verify_token(secret: &str, token: &str) -> Result<Identity, ChatError> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| {
        debug!("Rejected token: {}", e);
        ChatError::unauthorized("invalid or expired token")
    })?;

    if token_data.claims.sub.is_nil() {
        return Err(ChatError::unauthorized("token does not name a user"));
    }
    Ok(Identity::from(token_data.claims))
}
