use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

use murmur_db::queries::{NewConversation, now};
use murmur_types::api::{AddParticipantRequest, CreateConversationRequest, Identity};
use murmur_types::error::ChatError;
use murmur_types::models::{Conversation, ConversationKind, normalize_participants};

use crate::auth::AppState;
use crate::error::ApiError;

const MAX_NAME_LEN: usize = 100;

/// The caller's conversations, most recently active first.
pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<Vec<Conversation>>, ApiError> {
    let uid = identity.user_id.to_string();
    let conversations = state
        .db(move |db| db.list_conversations_for_user(&uid))
        .await?;
    Ok(Json(conversations))
}

/// Create a conversation. Direct conversations are idempotent: asking again
/// for the same pair returns the existing one with 200 instead of 201.
pub async fn create_conversation(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<CreateConversationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let participants = normalize_participants(req.kind, identity.user_id, &req.participant_ids)?;
    let name = clean_text(req.name, "name")?;
    let description = clean_text(req.description, "description")?;

    let kind = req.kind;
    let creator = identity.user_id;
    let (conversation, created) = state
        .db(move |db| {
            db.create_conversation(&NewConversation {
                id: Uuid::new_v4(),
                kind,
                creator,
                participants: &participants,
                name: name.as_deref(),
                description: description.as_deref(),
                created_at: now(),
            })
        })
        .await?;

    if !created {
        return Ok((StatusCode::OK, Json(conversation)));
    }

    info!(
        "{} created {} conversation {} with {} participants",
        identity.user_id,
        conversation.kind,
        conversation.id,
        conversation.participants.len()
    );
    state.router.conversation_created(&conversation).await;
    Ok((StatusCode::CREATED, Json(conversation)))
}

pub async fn add_participant(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<AddParticipantRequest>,
) -> Result<Json<Conversation>, ApiError> {
    let conversation = load_managed(&state, conversation_id, identity.user_id).await?;
    if !conversation.is_admin(identity.user_id) {
        return Err(ChatError::forbidden("only admins can add participants").into());
    }
    if req.user_id.is_nil() {
        return Err(ChatError::validation("user_id must not be nil").into());
    }

    let (cid, uid, admin) = (conversation_id.to_string(), req.user_id.to_string(), req.admin);
    let (added, conversation) = state
        .db(move |db| {
            let added = db.add_participant(&cid, &uid, admin, now())?;
            let conversation = db
                .get_conversation(&cid)?
                .ok_or_else(|| anyhow::anyhow!("Conversation {} vanished", cid))?;
            Ok((added, conversation))
        })
        .await?;

    if added {
        info!(
            "{} added {} to conversation {}",
            identity.user_id, req.user_id, conversation_id
        );
        state.router.participant_added(&conversation, req.user_id).await;
    }
    Ok(Json(conversation))
}

/// Admins may remove anyone; everyone may remove themselves. Removing a
/// non-participant is a no-op.
pub async fn remove_participant(
    State(state): State<AppState>,
    Path((conversation_id, user_id)): Path<(Uuid, Uuid)>,
    Extension(identity): Extension<Identity>,
) -> Result<StatusCode, ApiError> {
    let conversation = load_managed(&state, conversation_id, identity.user_id).await?;
    if user_id != identity.user_id && !conversation.is_admin(identity.user_id) {
        return Err(ChatError::forbidden("only admins can remove other participants").into());
    }

    let (cid, uid) = (conversation_id.to_string(), user_id.to_string());
    let removed = state
        .db(move |db| db.remove_participant(&cid, &uid))
        .await?;

    if removed {
        info!(
            "{} removed {} from conversation {}",
            identity.user_id, user_id, conversation_id
        );
        state.router.participant_removed(conversation_id, user_id).await;
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Load a conversation whose membership the caller wants to change.
/// Direct conversations have a fixed pair and are never managed.
async fn load_managed(
    state: &AppState,
    conversation_id: Uuid,
    caller: Uuid,
) -> Result<Conversation, ChatError> {
    let cid = conversation_id.to_string();
    let conversation = state
        .db(move |db| db.get_conversation(&cid))
        .await?
        .ok_or_else(|| ChatError::not_found(format!("conversation {}", conversation_id)))?;

    if !conversation.is_participant(caller) {
        return Err(ChatError::unauthorized("not a participant of this conversation"));
    }
    if conversation.kind == ConversationKind::Direct {
        return Err(ChatError::conflict("direct conversations have a fixed participant pair"));
    }
    Ok(conversation)
}

fn clean_text(value: Option<String>, field: &str) -> Result<Option<String>, ChatError> {
    let Some(value) = value else {
        return Ok(None);
    };
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if trimmed.chars().count() > MAX_NAME_LEN {
        return Err(ChatError::validation(format!(
            "{} exceeds {} characters",
            field, MAX_NAME_LEN
        )));
    }
    Ok(Some(trimmed.to_string()))
}
