use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{
    Comment, Conversation, ConversationType, Message, Post, ReactionKind, UserSummary,
};

/// Events pushed FROM server TO client over the WebSocket gateway.
/// Each variant has a fixed payload; the tag is the client-facing event name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerEvent {
    /// Server confirms successful authentication
    #[serde(rename = "ready")]
    Ready { user_id: Uuid, first_name: String, last_name: String },

    /// A friend published a post
    #[serde(rename = "newPost")]
    NewPost { post: Post, poster: UserSummary },

    /// Echo of the user's own new post
    #[serde(rename = "myNewPost")]
    MyNewPost { post: Post, poster: UserSummary },

    #[serde(rename = "reactToPost")]
    ReactToPost { post_id: Uuid, user: UserSummary, reaction: ReactionKind },

    #[serde(rename = "updateReactToPost")]
    UpdateReactToPost { post_id: Uuid, user: UserSummary, reaction: ReactionKind },

    #[serde(rename = "deleteReactToPost")]
    DeleteReactToPost { post_id: Uuid, user_id: Uuid },

    /// Top-level comment on a post
    #[serde(rename = "newComment")]
    NewComment { comment: Comment, commentator: UserSummary },

    /// Reply to an existing comment
    #[serde(rename = "newReply")]
    NewReply { comment: Comment, commentator: UserSummary },

    #[serde(rename = "reactToComment")]
    ReactToComment { post_id: Uuid, comment_id: Uuid, user: UserSummary, reaction: ReactionKind },

    #[serde(rename = "updateReactToComment")]
    UpdateReactToComment { post_id: Uuid, comment_id: Uuid, user: UserSummary, reaction: ReactionKind },

    #[serde(rename = "deleteReactToComment")]
    DeleteReactToComment { post_id: Uuid, comment_id: Uuid, user_id: Uuid },

    #[serde(rename = "newMessage")]
    NewMessage { message: Message, sender: UserSummary },

    #[serde(rename = "reactToMessage")]
    ReactToMessage { conversation_id: Uuid, message_id: Uuid, user: UserSummary, reaction: ReactionKind },

    #[serde(rename = "updateReactToMessage")]
    UpdateReactToMessage { conversation_id: Uuid, message_id: Uuid, user: UserSummary, reaction: ReactionKind },

    #[serde(rename = "deleteReactToMessage")]
    DeleteReactToMessage { conversation_id: Uuid, message_id: Uuid, user_id: Uuid },

    /// A group conversation the user belongs to was created
    #[serde(rename = "newConversationGroup")]
    NewConversationGroup { conversation: Conversation, creator: UserSummary },

    /// The user was added to an existing group
    #[serde(rename = "addedToGroup")]
    AddedToGroup { conversation: Conversation, added_by: UserSummary },

    /// Other members joined a group the user is already in
    #[serde(rename = "moreMemberToGroup")]
    MoreMemberToGroup { conversation_id: Uuid, members: Vec<UserSummary> },

    /// A member was removed from, or left, a group the user is in
    #[serde(rename = "reduceMemberToGroup")]
    ReduceMemberToGroup { conversation_id: Uuid, user_id: Uuid },

    /// The user was removed from a group
    #[serde(rename = "outGroupChat")]
    OutGroupChat { conversation_id: Uuid, removed_by: Uuid },

    #[serde(rename = "call:incoming")]
    CallIncoming {
        room_id: String,
        conversation_type: ConversationType,
        caller: UserSummary,
        conversation_name: Option<String>,
    },

    #[serde(rename = "call:join")]
    CallJoin { room_id: String },

    #[serde(rename = "call:end")]
    CallEnd,

    #[serde(rename = "accountLocked")]
    AccountLocked { message: String },

    #[serde(rename = "newFriendRequestNotification")]
    NewFriendRequestNotification {
        friend_request_id: Uuid,
        sender: UserSummary,
        notification_id: Uuid,
        content: String,
        created_at: DateTime<Utc>,
    },
}

impl ServerEvent {
    /// Client-facing event name, used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ready { .. } => "ready",
            Self::NewPost { .. } => "newPost",
            Self::MyNewPost { .. } => "myNewPost",
            Self::ReactToPost { .. } => "reactToPost",
            Self::UpdateReactToPost { .. } => "updateReactToPost",
            Self::DeleteReactToPost { .. } => "deleteReactToPost",
            Self::NewComment { .. } => "newComment",
            Self::NewReply { .. } => "newReply",
            Self::ReactToComment { .. } => "reactToComment",
            Self::UpdateReactToComment { .. } => "updateReactToComment",
            Self::DeleteReactToComment { .. } => "deleteReactToComment",
            Self::NewMessage { .. } => "newMessage",
            Self::ReactToMessage { .. } => "reactToMessage",
            Self::UpdateReactToMessage { .. } => "updateReactToMessage",
            Self::DeleteReactToMessage { .. } => "deleteReactToMessage",
            Self::NewConversationGroup { .. } => "newConversationGroup",
            Self::AddedToGroup { .. } => "addedToGroup",
            Self::MoreMemberToGroup { .. } => "moreMemberToGroup",
            Self::ReduceMemberToGroup { .. } => "reduceMemberToGroup",
            Self::OutGroupChat { .. } => "outGroupChat",
            Self::CallIncoming { .. } => "call:incoming",
            Self::CallJoin { .. } => "call:join",
            Self::CallEnd => "call:end",
            Self::AccountLocked { .. } => "accountLocked",
            Self::NewFriendRequestNotification { .. } => "newFriendRequestNotification",
        }
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientCommand {
    /// Start receiving comment traffic for a post
    #[serde(rename = "joinPost")]
    JoinPost { post_id: Uuid },

    #[serde(rename = "leavePost")]
    LeavePost { post_id: Uuid },

    /// Start receiving room traffic for an open conversation view
    #[serde(rename = "joinConversation")]
    JoinConversation { conversation_id: Uuid },

    #[serde(rename = "leaveConversation")]
    LeaveConversation { conversation_id: Uuid },

    /// Ring either every member of a conversation or a single friend
    #[serde(rename = "call:start")]
    CallStart {
        conversation_id: Option<Uuid>,
        friend_id: Option<Uuid>,
        conversation_type: ConversationType,
        conversation_name: Option<String>,
    },

    #[serde(rename = "call:answer")]
    CallAnswer { room_id: String },

    #[serde(rename = "call:refuse")]
    CallRefuse { caller_id: Uuid },

    #[serde(rename = "call:end")]
    CallEnd { user_id: Uuid },

    /// Callee is already in a call; the caller is released after a delay
    #[serde(rename = "call:busy")]
    CallBusy { caller_id: Uuid },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_tagged_with_client_names() {
        let event = ServerEvent::DeleteReactToPost {
            post_id: Uuid::nil(),
            user_id: Uuid::nil(),
        };
        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "deleteReactToPost");
        assert_eq!(json["data"]["post_id"], Uuid::nil().to_string());
        assert_eq!(event.name(), "deleteReactToPost");
    }

    #[test]
    fn call_end_has_no_payload() {
        let json = serde_json::to_string(&ServerEvent::CallEnd).unwrap();
        assert_eq!(json, r#"{"type":"call:end"}"#);
    }

    #[test]
    fn parses_room_commands() {
        let id = Uuid::new_v4();
        let raw = format!(r#"{{"type":"joinPost","data":{{"post_id":"{}"}}}}"#, id);
        let cmd: ClientCommand = serde_json::from_str(&raw).unwrap();
        assert_eq!(cmd, ClientCommand::JoinPost { post_id: id });
    }

    #[test]
    fn parses_call_start_for_a_friend() {
        let friend = Uuid::new_v4();
        let raw = format!(
            r#"{{"type":"call:start","data":{{"conversation_id":null,"friend_id":"{}","conversation_type":"PRIVATE","conversation_name":null}}}}"#,
            friend
        );
        let cmd: ClientCommand = serde_json::from_str(&raw).unwrap();
        match cmd {
            ClientCommand::CallStart { friend_id, conversation_type, .. } => {
                assert_eq!(friend_id, Some(friend));
                assert_eq!(conversation_type, ConversationType::Private);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
