use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use tracing::info;
use uuid::Uuid;

use orbit_db::StoreError;
use orbit_db::notifications::NewNotification;
use orbit_db::posts::NewComment;
use orbit_gateway::Identity;
use orbit_types::api::{CreateCommentRequest, CreatePostRequest};
use orbit_types::models::{Comment, NotificationType, Post};

use crate::{ApiResult, AppState};

pub async fn create_post(
    State(state): State<AppState>,
    Extension(me): Extension<Identity>,
    Json(req): Json<CreatePostRequest>,
) -> ApiResult<(StatusCode, Json<Post>)> {
    let (post, poster) = state
        .store(move |db| {
            let post = db.create_post(me.user_id, req.content, req.visibility)?;
            Ok((post, db.user_summary(me.user_id)?))
        })
        .await?;
    info!("{} created post {}", me.user_id, post.id);

    state.events.post_created(post.clone(), poster);
    Ok((StatusCode::CREATED, Json(post)))
}

pub async fn get_post(State(state): State<AppState>, Path(post_id): Path<Uuid>) -> ApiResult<Json<Post>> {
    let post = state
        .store(move |db| db.get_post(post_id)?.ok_or_else(|| StoreError::NotFound(format!("post {}", post_id))))
        .await?;
    Ok(Json(post))
}

pub async fn get_comments(State(state): State<AppState>, Path(post_id): Path<Uuid>) -> ApiResult<Json<Vec<Comment>>> {
    Ok(Json(state.store(move |db| db.get_comments(post_id)).await?))
}

/// A comment with `parent_comment_id` is a reply and reaches the room as
/// `newReply`. The post's author gets a COMMENT notification.
pub async fn create_comment(
    State(state): State<AppState>,
    Extension(me): Extension<Identity>,
    Path(post_id): Path<Uuid>,
    Json(req): Json<CreateCommentRequest>,
) -> ApiResult<(StatusCode, Json<Comment>)> {
    let new = NewComment {
        content: req.content,
        image: req.image,
        parent_comment_id: req.parent_comment_id,
    };

    let (comment, commentator) = state
        .store(move |db| {
            let comment = db.create_comment(post_id, me.user_id, new)?;
            let commentator = db.user_summary(me.user_id)?;
            if let Some(post) = db.get_post(post_id)? {
                if post.poster_id != me.user_id {
                    db.create_notification(NewNotification {
                        user_id: post.poster_id,
                        actor_id: me.user_id,
                        kind: NotificationType::Comment,
                        reference_id: post_id,
                        content: format!(
                            "<b>{} {}</b> commented on your post",
                            commentator.last_name, commentator.first_name
                        ),
                    })?;
                }
            }
            Ok((comment, commentator))
        })
        .await?;

    state.events.comment_created(comment.clone(), commentator);
    Ok((StatusCode::CREATED, Json(comment)))
}

pub async fn delete_post(
    State(state): State<AppState>,
    Extension(me): Extension<Identity>,
    Path(post_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.store(move |db| db.soft_delete_post(post_id, me.user_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn recover_post(
    State(state): State<AppState>,
    Extension(me): Extension<Identity>,
    Path(post_id): Path<Uuid>,
) -> ApiResult<Json<Post>> {
    Ok(Json(state.store(move |db| db.recover_post(post_id, me.user_id)).await?))
}
