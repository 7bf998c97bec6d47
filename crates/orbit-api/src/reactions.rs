use axum::{
    Extension, Json,
    extract::{Path, State},
};
use uuid::Uuid;

use orbit_db::{Database, StoreError};
use orbit_db::reactions::ReactionTarget;
use orbit_gateway::Identity;
use orbit_types::api::{ReactionResponse, ReactionSummary, SetReactionRequest};

use crate::{ApiResult, AppState};

/// Sets, changes or clears the caller's reaction to a message. Only
/// participants of the message's conversation may react.
pub async fn react_to_message(
    State(state): State<AppState>,
    Extension(me): Extension<Identity>,
    Path(message_id): Path<Uuid>,
    Json(req): Json<SetReactionRequest>,
) -> ApiResult<Json<ReactionResponse>> {
    let (conversation_id, change, user) = state
        .store(move |db| {
            let message = db
                .get_message(message_id)?
                .ok_or_else(|| StoreError::NotFound(format!("message {}", message_id)))?;
            if db.get_participant(message.conversation_id, me.user_id)?.is_none() {
                return Err(StoreError::Forbidden("not a participant".into()));
            }
            let change = db.set_reaction(ReactionTarget::Message, message_id, me.user_id, req.reaction)?;
            Ok((message.conversation_id, change, db.user_summary(me.user_id)?))
        })
        .await?;

    state.events.message_reaction(conversation_id, message_id, user, change);
    Ok(Json(ReactionResponse { change }))
}

pub async fn react_to_post(
    State(state): State<AppState>,
    Extension(me): Extension<Identity>,
    Path(post_id): Path<Uuid>,
    Json(req): Json<SetReactionRequest>,
) -> ApiResult<Json<ReactionResponse>> {
    let (poster_id, change, user) = state
        .store(move |db| {
            let post = db
                .get_post(post_id)?
                .ok_or_else(|| StoreError::NotFound(format!("post {}", post_id)))?;
            let change = db.set_reaction(ReactionTarget::Post, post_id, me.user_id, req.reaction)?;
            Ok((post.poster_id, change, db.user_summary(me.user_id)?))
        })
        .await?;

    state.events.post_reaction(post_id, poster_id, user, change);
    Ok(Json(ReactionResponse { change }))
}

pub async fn react_to_comment(
    State(state): State<AppState>,
    Extension(me): Extension<Identity>,
    Path(comment_id): Path<Uuid>,
    Json(req): Json<SetReactionRequest>,
) -> ApiResult<Json<ReactionResponse>> {
    let (post_id, change, user) = state
        .store(move |db| {
            let comment = db
                .get_comment(comment_id)?
                .ok_or_else(|| StoreError::NotFound(format!("comment {}", comment_id)))?;
            let change = db.set_reaction(ReactionTarget::Comment, comment_id, me.user_id, req.reaction)?;
            Ok((comment.post_id, change, db.user_summary(me.user_id)?))
        })
        .await?;

    state.events.comment_reaction(post_id, comment_id, user, change);
    Ok(Json(ReactionResponse { change }))
}

pub async fn post_reactions(
    State(state): State<AppState>,
    Extension(me): Extension<Identity>,
    Path(post_id): Path<Uuid>,
) -> ApiResult<Json<ReactionSummary>> {
    Ok(Json(state.store(move |db| summary(db, ReactionTarget::Post, post_id, me.user_id)).await?))
}

pub async fn comment_reactions(
    State(state): State<AppState>,
    Extension(me): Extension<Identity>,
    Path(comment_id): Path<Uuid>,
) -> ApiResult<Json<ReactionSummary>> {
    Ok(Json(
        state
            .store(move |db| summary(db, ReactionTarget::Comment, comment_id, me.user_id))
            .await?,
    ))
}

fn summary(db: &Database, target: ReactionTarget, id: Uuid, viewer: Uuid) -> orbit_db::Result<ReactionSummary> {
    Ok(ReactionSummary {
        count: db.reaction_count(target, id)?,
        current: db.get_reaction(target, id, viewer)?,
    })
}
