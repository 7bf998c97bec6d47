use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use orbit_db::StoreError;
use orbit_gateway::Identity;
use orbit_types::api::{FriendRequestResponse, FriendsQuery, FriendshipStatus, PageQuery, RelationshipResponse, SendFriendRequest};
use orbit_types::models::{FriendRequest, FriendRequestView, UserSummary};

use crate::{ApiResult, AppState};

/// Friends of `user_id`, or of the caller when omitted.
pub async fn friends(
    State(state): State<AppState>,
    Extension(me): Extension<Identity>,
    Query(query): Query<FriendsQuery>,
) -> ApiResult<Json<Vec<UserSummary>>> {
    let user_id = query.user_id.unwrap_or(me.user_id);
    Ok(Json(state.store(move |db| db.friend_summaries(user_id)).await?))
}

pub async fn send_friend_request(
    State(state): State<AppState>,
    Extension(me): Extension<Identity>,
    Json(req): Json<SendFriendRequest>,
) -> ApiResult<(StatusCode, Json<FriendRequestResponse>)> {
    let (request, notification, sender) = state
        .store(move |db| {
            let (request, notification) = db.create_friend_request(me.user_id, req.receiver_id)?;
            Ok((request, notification, db.user_summary(me.user_id)?))
        })
        .await?;
    info!("{} sent friend request {} to {}", me.user_id, request.id, request.receiver_id);

    state.events.friend_request_sent(&request, sender, &notification);
    Ok((
        StatusCode::CREATED,
        Json(FriendRequestResponse {
            friend_request_id: request.id,
        }),
    ))
}

pub async fn received_requests(
    State(state): State<AppState>,
    Extension(me): Extension<Identity>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Vec<FriendRequestView>>> {
    Ok(Json(
        state
            .store(move |db| db.get_friend_requests(me.user_id, query.page))
            .await?,
    ))
}

pub async fn sent_requests(
    State(state): State<AppState>,
    Extension(me): Extension<Identity>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Vec<FriendRequestView>>> {
    Ok(Json(
        state
            .store(move |db| db.get_sent_friend_requests(me.user_id, query.page))
            .await?,
    ))
}

pub async fn request_count(
    State(state): State<AppState>,
    Extension(me): Extension<Identity>,
) -> ApiResult<Json<serde_json::Value>> {
    let count = state.store(move |db| db.friend_request_count(me.user_id)).await?;
    Ok(Json(json!({ "count": count })))
}

/// The pending request between the caller and `user_id`, in either direction.
pub async fn request_with(
    State(state): State<AppState>,
    Extension(me): Extension<Identity>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<Option<FriendRequest>>> {
    Ok(Json(
        state
            .store(move |db| db.get_friend_request_by_user_id(me.user_id, user_id))
            .await?,
    ))
}

pub async fn status_with(
    State(state): State<AppState>,
    Extension(me): Extension<Identity>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<FriendshipStatus>> {
    let status = state
        .store(move |db| {
            Ok(FriendshipStatus {
                are_friends: db.are_friends(me.user_id, user_id)?,
                request: db.get_friend_request_by_user_id(me.user_id, user_id)?,
            })
        })
        .await?;
    Ok(Json(status))
}

/// Cancels (sender) or declines (receiver) a request.
pub async fn delete_request(
    State(state): State<AppState>,
    Extension(me): Extension<Identity>,
    Path(request_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state
        .store(move |db| {
            let request = db
                .get_friend_request(request_id)?
                .ok_or_else(|| StoreError::NotFound(format!("friend request {}", request_id)))?;
            if request.sender_id != me.user_id && request.receiver_id != me.user_id {
                return Err(StoreError::Forbidden("not your friend request".into()));
            }
            db.delete_friend_request(request_id)
        })
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn accept_request(
    State(state): State<AppState>,
    Extension(me): Extension<Identity>,
    Path(request_id): Path<Uuid>,
) -> ApiResult<Json<RelationshipResponse>> {
    let relationship = state
        .store(move |db| db.accept_friend_request(request_id, me.user_id))
        .await?;
    info!("{} and {} are now friends", relationship.user1_id, relationship.user2_id);

    let presence = state.presence();
    presence.invalidate_friends(relationship.user1_id).await;
    presence.invalidate_friends(relationship.user2_id).await;

    Ok(Json(RelationshipResponse {
        relationship_id: relationship.id,
    }))
}

pub async fn unfriend(
    State(state): State<AppState>,
    Extension(me): Extension<Identity>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.store(move |db| db.unfriend(me.user_id, user_id)).await?;

    let presence = state.presence();
    presence.invalidate_friends(me.user_id).await;
    presence.invalidate_friends(user_id).await;
    Ok(StatusCode::NO_CONTENT)
}
