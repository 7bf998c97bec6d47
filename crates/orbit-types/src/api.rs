use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ConversationType, FriendRequest, MessageType, PostVisibility, ReactionChange, ReactionKind, UserRole};

// -- JWT Claims --

/// JWT claims shared by the HTTP middleware and the WebSocket gateway.
/// Access and refresh tokens carry the same claims under different secrets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub role: UserRole,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub user_id: Uuid,
    pub token: String,
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
}

// -- Paging --

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default = "first_page")]
    pub page: u32,
}

fn first_page() -> u32 {
    1
}

// -- Conversations --

/// The caller is added automatically: with no role for PRIVATE, as ADMIN for GROUP.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateConversationRequest {
    pub kind: ConversationType,
    pub name: Option<String>,
    pub avatar: Option<String>,
    pub participants: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub content: Option<String>,
    #[serde(default = "text_message")]
    pub message_type: MessageType,
    pub file_name: Option<String>,
}

fn text_message() -> MessageType {
    MessageType::Text
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddMembersRequest {
    pub user_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct UnreadConversationsResponse {
    pub conversation_ids: Vec<Uuid>,
}

// -- Reactions --

/// `reaction: null` (or omitted) removes the caller's reaction.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetReactionRequest {
    #[serde(default)]
    pub reaction: Option<ReactionKind>,
}

#[derive(Debug, Serialize)]
pub struct ReactionResponse {
    pub change: ReactionChange,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReactionSummary {
    pub count: u32,
    /// The caller's own reaction, if any.
    pub current: Option<ReactionKind>,
}

// -- Posts --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreatePostRequest {
    pub content: Option<String>,
    #[serde(default = "friend_visibility")]
    pub visibility: PostVisibility,
}

fn friend_visibility() -> PostVisibility {
    PostVisibility::Friend
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateCommentRequest {
    pub content: Option<String>,
    pub image: Option<String>,
    pub parent_comment_id: Option<Uuid>,
}

// -- Relationships --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendFriendRequest {
    pub receiver_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct FriendRequestResponse {
    pub friend_request_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct RelationshipResponse {
    pub relationship_id: Uuid,
}

/// Where the caller stands with another user.
#[derive(Debug, Serialize)]
pub struct FriendshipStatus {
    pub are_friends: bool,
    pub request: Option<FriendRequest>,
}

#[derive(Debug, Deserialize)]
pub struct FriendsQuery {
    pub user_id: Option<Uuid>,
}

// -- Admin --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetActiveRequest {
    pub is_active: bool,
}
