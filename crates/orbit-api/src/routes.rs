use axum::{
    Router, middleware,
    routing::{delete, get, post, put},
};

use crate::middleware::require_auth;
use crate::{AppState, admin, auth, conversations, notifications, posts, reactions, relationships, users};

/// Every HTTP route. Everything outside `/auth` requires a credential.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/users", post(auth::register))
        .route("/auth/token", post(auth::login))
        .route("/auth/refresh", post(auth::refresh))
        .route("/auth/recover-account", post(auth::recover_account));

    let protected_routes = Router::new()
        // Conversations
        .route(
            "/conversations",
            get(conversations::recent_conversations).post(conversations::create_conversation),
        )
        .route("/conversations/unread", get(conversations::unread_conversations))
        .route("/conversations/groups", get(conversations::group_conversations))
        .route("/conversations/private/{user_id}", get(conversations::private_conversation_with))
        .route("/conversations/{conversation_id}", get(conversations::get_conversation))
        .route(
            "/conversations/{conversation_id}/messages",
            get(conversations::get_messages).post(conversations::send_message),
        )
        .route("/conversations/{conversation_id}/read", post(conversations::mark_read))
        .route("/conversations/{conversation_id}/participants", get(conversations::participants))
        .route("/conversations/{conversation_id}/last-message", get(conversations::last_message))
        .route(
            "/conversations/{conversation_id}/members",
            get(conversations::group_members).post(conversations::add_members),
        )
        .route(
            "/conversations/{conversation_id}/members/{user_id}",
            delete(conversations::remove_member),
        )
        .route("/conversations/{conversation_id}/leave", post(conversations::leave_group))
        // Reactions
        .route("/messages/{message_id}/reactions", put(reactions::react_to_message))
        .route(
            "/posts/{post_id}/reactions",
            get(reactions::post_reactions).put(reactions::react_to_post),
        )
        .route(
            "/comments/{comment_id}/reactions",
            get(reactions::comment_reactions).put(reactions::react_to_comment),
        )
        // Posts
        .route("/posts", post(posts::create_post))
        .route("/posts/{post_id}", get(posts::get_post).delete(posts::delete_post))
        .route("/posts/{post_id}/recover", post(posts::recover_post))
        .route(
            "/posts/{post_id}/comments",
            get(posts::get_comments).post(posts::create_comment),
        )
        // Relationships
        .route("/relationships/friends", get(relationships::friends))
        .route("/relationships/friends/{user_id}", delete(relationships::unfriend))
        .route("/relationships/status/{user_id}", get(relationships::status_with))
        .route(
            "/relationships/requests",
            get(relationships::received_requests).post(relationships::send_friend_request),
        )
        .route("/relationships/requests/sent", get(relationships::sent_requests))
        .route("/relationships/requests/count", get(relationships::request_count))
        .route("/relationships/requests/with/{user_id}", get(relationships::request_with))
        .route("/relationships/requests/{request_id}", delete(relationships::delete_request))
        .route("/relationships/requests/{request_id}/accept", post(relationships::accept_request))
        // Notifications
        .route("/notifications", get(notifications::list))
        .route("/notifications/{id}/read", post(notifications::mark_read))
        .route("/notifications/{id}/menu-opened", post(notifications::mark_menu_opened))
        // Users
        .route("/users/me", get(users::me).delete(users::delete_me))
        .route("/users/{user_id}", get(users::profile))
        .route("/admin/users/{user_id}/active", put(admin::set_active))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}
