use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Returned when a stored or received string does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {} '{}'", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

/// Enums stored as TEXT columns. The DB spelling matches the serde spelling.
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident, $kind:literal { $($variant:ident => $text:tt),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(UnknownVariant { kind: $kind, value: other.to_string() }),
                }
            }
        }
    };
}

text_enum!(ConversationType, "conversation type" {
    Private => "PRIVATE",
    Group => "GROUP",
});

text_enum!(
    /// Roles that exist inside a group conversation.
    GroupRole, "participant role" {
    Member => "MEMBER",
    Admin => "ADMIN",
});

text_enum!(MessageType, "message type" {
    Text => "TEXT",
    Image => "IMAGE",
    File => "FILE",
    Video => "VIDEO",
    Notification => "NOTIFICATION",
});

text_enum!(
    /// One reaction vocabulary shared by posts, comments and messages.
    ReactionKind, "reaction" {
    Like => "LIKE",
    Love => "LOVE",
    LoveLove => "LOVE_LOVE",
    Haha => "HAHA",
    Wow => "WOW",
    Sad => "SAD",
    Angry => "ANGRY",
});

text_enum!(NotificationType, "notification type" {
    Like => "LIKE",
    Comment => "COMMENT",
    Conversation => "CONVERSATION",
    FriendRequest => "FRIEND_REQUEST",
});

text_enum!(UserRole, "user role" {
    User => "USER",
    Admin => "ADMIN",
});

text_enum!(PostVisibility, "post visibility" {
    Friend => "FRIEND",
    Public => "PUBLIC",
    Private => "PRIVATE",
});

/// A participant's role. Private conversations carry no role at all, which
/// keeps the PRIVATE/GROUP distinction visible in the type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParticipantRole {
    None,
    Member,
    Admin,
}

impl ParticipantRole {
    pub fn to_db(self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Member => Some(GroupRole::Member.as_str()),
            Self::Admin => Some(GroupRole::Admin.as_str()),
        }
    }

    pub fn from_db(value: Option<&str>) -> Result<Self, UnknownVariant> {
        match value {
            None => Ok(Self::None),
            Some(text) => Ok(match text.parse::<GroupRole>()? {
                GroupRole::Member => Self::Member,
                GroupRole::Admin => Self::Admin,
            }),
        }
    }

    pub fn is_admin(self) -> bool {
        self == Self::Admin
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub avatar: Option<String>,
    pub role: UserRole,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.id,
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            avatar: self.avatar.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub kind: ConversationType,
    pub name: Option<String>,
    pub avatar: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub conversation_id: Uuid,
    pub user: UserSummary,
    pub nickname: Option<String>,
    pub role: ParticipantRole,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: Option<String>,
    pub file_name: Option<String>,
    pub message_type: MessageType,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reaction {
    pub user: UserSummary,
    pub kind: ReactionKind,
}

/// A message page entry with its reactions and the viewer's own reaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageView {
    pub message: Message,
    pub sender: UserSummary,
    pub reactions: Vec<Reaction>,
    pub current_reaction: Option<ReactionKind>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastMessage {
    pub id: Uuid,
    pub content: Option<String>,
    pub message_type: MessageType,
    pub sender: UserSummary,
}

/// One row of the "recent conversations" list. For private conversations the
/// name and avatar come from the other participant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentConversation {
    pub conversation_id: Uuid,
    pub kind: ConversationType,
    pub name: Option<String>,
    pub avatar: Option<String>,
    pub friend: Option<UserSummary>,
    pub last_message: Option<LastMessage>,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FriendRequest {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Incoming/outgoing friend request with the counterpart's profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FriendRequestView {
    pub id: Uuid,
    pub user: UserSummary,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub id: Uuid,
    pub user1_id: Uuid,
    pub user2_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub actor: UserSummary,
    pub kind: NotificationType,
    pub reference_id: Uuid,
    pub content: String,
    pub is_read: bool,
    pub is_open_menu: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: Uuid,
    pub poster_id: Uuid,
    pub visibility: PostVisibility,
    pub content: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: Uuid,
    pub post_id: Uuid,
    pub commentator_id: Uuid,
    pub parent_comment_id: Option<Uuid>,
    pub content: Option<String>,
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// What a reaction upsert did to the (target, user) row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReactionChange {
    Created(ReactionKind),
    Updated(ReactionKind),
    Removed,
    Unchanged,
}
