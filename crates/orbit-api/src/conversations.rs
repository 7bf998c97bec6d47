use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use orbit_db::{Database, StoreError};
use orbit_db::conversations::NewMessage;
use orbit_db::models::NewConversation;
use orbit_gateway::Identity;
use orbit_types::api::{AddMembersRequest, CreateConversationRequest, PageQuery, SendMessageRequest, UnreadConversationsResponse};
use orbit_types::models::{Conversation, ConversationType, LastMessage, Message, MessageView, Participant, RecentConversation};

use crate::{ApiError, ApiResult, AppState};

pub async fn recent_conversations(
    State(state): State<AppState>,
    Extension(me): Extension<Identity>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Vec<RecentConversation>>> {
    let rows = state
        .store(move |db| db.get_recent_conversations(me.user_id, query.page))
        .await?;
    Ok(Json(rows))
}

pub async fn unread_conversations(
    State(state): State<AppState>,
    Extension(me): Extension<Identity>,
) -> ApiResult<Json<UnreadConversationsResponse>> {
    let conversation_ids = state.store(move |db| db.get_unread_conversations(me.user_id)).await?;
    Ok(Json(UnreadConversationsResponse { conversation_ids }))
}

pub async fn group_conversations(
    State(state): State<AppState>,
    Extension(me): Extension<Identity>,
) -> ApiResult<Json<Vec<Conversation>>> {
    Ok(Json(state.store(move |db| db.get_group_conversations(me.user_id)).await?))
}

/// The caller is always a participant: with no role in a private
/// conversation, as admin of a group.
pub async fn create_conversation(
    State(state): State<AppState>,
    Extension(me): Extension<Identity>,
    Json(req): Json<CreateConversationRequest>,
) -> ApiResult<impl IntoResponse> {
    let new = match req.kind {
        ConversationType::Private => {
            let [other] = req.participants.as_slice() else {
                return Err(ApiError::BadRequest("a private conversation has exactly one other participant".into()));
            };
            if req.name.is_some() || req.avatar.is_some() {
                return Err(ApiError::BadRequest("a private conversation has no name or avatar".into()));
            }
            NewConversation::private(me.user_id, *other)
        }
        ConversationType::Group => NewConversation::group(req.name, req.avatar, me.user_id, &req.participants),
    };

    let (conversation, creator) = state
        .store(move |db| {
            let conversation = db.create_conversation(new)?;
            Ok((conversation, db.user_summary(me.user_id)?))
        })
        .await?;
    info!("{} created {:?} conversation {}", me.user_id, conversation.kind, conversation.id);

    if conversation.kind == ConversationType::Group {
        state.events.group_created(conversation.clone(), creator);
    }
    Ok((StatusCode::CREATED, Json(conversation)))
}

pub async fn get_conversation(
    State(state): State<AppState>,
    Extension(me): Extension<Identity>,
    Path(conversation_id): Path<Uuid>,
) -> ApiResult<Json<Conversation>> {
    let conversation = state
        .store(move |db| {
            ensure_participant(db, conversation_id, me.user_id)?;
            db.get_conversation(conversation_id)
        })
        .await?
        .ok_or_else(|| not_found(conversation_id))?;
    Ok(Json(conversation))
}

pub async fn private_conversation_with(
    State(state): State<AppState>,
    Extension(me): Extension<Identity>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<Conversation>> {
    let conversation = state
        .store(move |db| db.get_conversation_private(me.user_id, user_id))
        .await?
        .ok_or_else(|| ApiError::Store(StoreError::NotFound(format!("private conversation with {}", user_id))))?;
    Ok(Json(conversation))
}

pub async fn get_messages(
    State(state): State<AppState>,
    Extension(me): Extension<Identity>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Vec<MessageView>>> {
    let messages = state
        .store(move |db| {
            ensure_participant(db, conversation_id, me.user_id)?;
            db.get_messages(conversation_id, me.user_id, query.page)
        })
        .await?;
    Ok(Json(messages))
}

/// Stores the message, then fans it out to the participants. The event is
/// only published once the insert has committed.
pub async fn send_message(
    State(state): State<AppState>,
    Extension(me): Extension<Identity>,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<(StatusCode, Json<Message>)> {
    let new = NewMessage {
        content: req.content,
        message_type: req.message_type,
        file_name: req.file_name,
    };

    let (message, sender) = state
        .store(move |db| {
            let message = db.create_message(me.user_id, conversation_id, new)?;
            Ok((message, db.user_summary(me.user_id)?))
        })
        .await?;

    state.events.message_created(message.clone(), sender);
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Extension(me): Extension<Identity>,
    Path(conversation_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let marked = state.store(move |db| db.mark_read(me.user_id, conversation_id)).await?;
    Ok(Json(json!({ "marked": marked })))
}

pub async fn participants(
    State(state): State<AppState>,
    Extension(me): Extension<Identity>,
    Path(conversation_id): Path<Uuid>,
) -> ApiResult<Json<Vec<Participant>>> {
    let participants = state
        .store(move |db| {
            ensure_participant(db, conversation_id, me.user_id)?;
            db.get_participants(conversation_id)
        })
        .await?;
    Ok(Json(participants))
}

pub async fn last_message(
    State(state): State<AppState>,
    Extension(me): Extension<Identity>,
    Path(conversation_id): Path<Uuid>,
) -> ApiResult<Json<Option<LastMessage>>> {
    let last = state
        .store(move |db| {
            ensure_participant(db, conversation_id, me.user_id)?;
            db.get_last_message(conversation_id)
        })
        .await?;
    Ok(Json(last))
}

pub async fn group_members(
    State(state): State<AppState>,
    Extension(me): Extension<Identity>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Vec<Participant>>> {
    let members = state
        .store(move |db| {
            ensure_participant(db, conversation_id, me.user_id)?;
            db.get_group_members(conversation_id, query.page)
        })
        .await?;
    Ok(Json(members))
}

pub async fn add_members(
    State(state): State<AppState>,
    Extension(me): Extension<Identity>,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<AddMembersRequest>,
) -> ApiResult<Json<Vec<Uuid>>> {
    let (added, conversation, added_by, summaries) = state
        .store(move |db| {
            let added = db.add_group_members(conversation_id, me.user_id, &req.user_ids)?;
            let conversation = db
                .get_conversation(conversation_id)?
                .ok_or_else(|| StoreError::NotFound(format!("conversation {}", conversation_id)))?;
            let summaries = added
                .iter()
                .map(|id| db.user_summary(*id))
                .collect::<orbit_db::Result<Vec<_>>>()?;
            Ok((added, conversation, db.user_summary(me.user_id)?, summaries))
        })
        .await?;

    state.events.members_added(conversation, added_by, summaries).await;
    Ok(Json(added))
}

pub async fn remove_member(
    State(state): State<AppState>,
    Extension(me): Extension<Identity>,
    Path((conversation_id, user_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<StatusCode> {
    state
        .store(move |db| db.remove_group_member(conversation_id, me.user_id, user_id))
        .await?;
    info!("{} removed {} from {}", me.user_id, user_id, conversation_id);

    state.events.member_removed(conversation_id, user_id, me.user_id);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn leave_group(
    State(state): State<AppState>,
    Extension(me): Extension<Identity>,
    Path(conversation_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.store(move |db| db.leave_group(conversation_id, me.user_id)).await?;
    state.events.member_left(conversation_id, me.user_id);
    Ok(StatusCode::NO_CONTENT)
}

fn ensure_participant(db: &Database, conversation_id: Uuid, user_id: Uuid) -> orbit_db::Result<()> {
    match db.get_participant(conversation_id, user_id)? {
        Some(_) => Ok(()),
        None if db.get_conversation(conversation_id)?.is_none() => {
            Err(StoreError::NotFound(format!("conversation {}", conversation_id)))
        }
        None => Err(StoreError::Forbidden("not a participant".into())),
    }
}

fn not_found(conversation_id: Uuid) -> ApiError {
    ApiError::Store(StoreError::NotFound(format!("conversation {}", conversation_id)))
}
