use std::collections::HashSet;

use rusqlite::{Connection, Row};
use tracing::debug;
use uuid::Uuid;

use orbit_types::models::{
    Conversation, ConversationType, LastMessage, Message, MessageType, MessageView, Participant,
    ParticipantRole, Reaction, RecentConversation,
};

use crate::models::{
    NewConversation, OptionalExt, enum_at, now, role_at, summary_at, time_at, timestamp, uuid_at,
};
use crate::users::{ensure_user, query_summary};
use crate::{Database, Result, StoreError};

const RECENT_CONVERSATIONS_PAGE: u32 = 20;
const MESSAGES_PAGE: u32 = 30;
const GROUP_MEMBERS_PAGE: u32 = 20;

/// Input for `Database::create_message`.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub content: Option<String>,
    pub message_type: MessageType,
    pub file_name: Option<String>,
}

impl NewMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            message_type: MessageType::Text,
            file_name: None,
        }
    }
}

fn offset(page: u32, size: u32) -> u32 {
    page.saturating_sub(1) * size
}

impl Database {
    // -- Conversations --

    pub fn create_conversation(&self, new: NewConversation) -> Result<Conversation> {
        validate_conversation(&new)?;

        self.with_tx(|conn| {
            for p in &new.participants {
                ensure_user(conn, p.user_id)?;
            }

            if new.kind == ConversationType::Private {
                let (a, b) = (new.participants[0].user_id, new.participants[1].user_id);
                if query_private(conn, a, b)?.is_some() {
                    return Err(StoreError::Conflict("a private conversation already exists".into()));
                }
            }

            let id = Uuid::new_v4();
            let (created_at, created_text) = timestamp();
            conn.execute(
                "INSERT INTO conversations (id, type, name, avatar, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![id.to_string(), new.kind.as_str(), new.name, new.avatar, created_text],
            )?;

            for p in &new.participants {
                insert_participant(conn, id, p.user_id, p.role)?;
            }

            debug!(
                "Created {} conversation {} with {} participants",
                new.kind,
                id,
                new.participants.len()
            );

            Ok(Conversation {
                id,
                kind: new.kind,
                name: new.name.clone(),
                avatar: new.avatar.clone(),
                created_at,
            })
        })
    }

    pub fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>> {
        self.with_conn(|conn| query_conversation(conn, id))
    }

    /// The private conversation between `a` and `b`, whichever order they are given in.
    pub fn get_conversation_private(&self, a: Uuid, b: Uuid) -> Result<Option<Conversation>> {
        self.with_conn(|conn| query_private(conn, a, b))
    }

    pub fn get_group_conversations(&self, user_id: Uuid) -> Result<Vec<Conversation>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.type, c.name, c.avatar, c.created_at
                 FROM conversations c
                 JOIN conversation_participants p ON p.conversation_id = c.id
                 WHERE p.user_id = ?1 AND p.deleted_at IS NULL AND c.type = 'GROUP'
                 ORDER BY c.created_at DESC, c.rowid DESC",
            )?;

            let rows = stmt
                .query_map([user_id.to_string()], conversation_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Participants --

    pub fn get_participants(&self, conversation_id: Uuid) -> Result<Vec<Participant>> {
        self.with_conn(|conn| query_participants(conn, conversation_id, None))
    }

    /// Current participant IDs. Read at fan-out time, never cached.
    pub fn participant_ids(&self, conversation_id: Uuid) -> Result<Vec<Uuid>> {
        self.with_conn(|conn| query_participant_ids(conn, conversation_id))
    }

    pub fn get_participant(&self, conversation_id: Uuid, user_id: Uuid) -> Result<Option<Participant>> {
        self.with_conn(|conn| query_participant(conn, conversation_id, user_id))
    }

    /// Admins first, then members by join order.
    pub fn get_group_members(&self, conversation_id: Uuid, page: u32) -> Result<Vec<Participant>> {
        self.with_conn(|conn| query_participants(conn, conversation_id, Some(page)))
    }

    /// Adds plain members to a group. Returns only the users that were not
    /// already participants.
    pub fn add_group_members(&self, conversation_id: Uuid, actor_id: Uuid, user_ids: &[Uuid]) -> Result<Vec<Uuid>> {
        self.with_tx(|conn| {
            let conversation = require_group(conn, conversation_id)?;
            require_participant(conn, conversation.id, actor_id)?;

            let mut added = Vec::new();
            let mut seen = HashSet::new();
            for &user_id in user_ids {
                if !seen.insert(user_id) {
                    continue;
                }
                ensure_user(conn, user_id)?;
                if insert_participant(conn, conversation_id, user_id, ParticipantRole::Member)? {
                    added.push(user_id);
                }
            }

            debug!("Added {} members to group {}", added.len(), conversation_id);
            Ok(added)
        })
    }

    /// Removes `target_id` from a group. Only an admin may do this.
    pub fn remove_group_member(&self, conversation_id: Uuid, admin_id: Uuid, target_id: Uuid) -> Result<()> {
        if admin_id == target_id {
            return Err(StoreError::Invalid("use leave to remove yourself".into()));
        }

        self.with_tx(|conn| {
            require_group(conn, conversation_id)?;
            let actor = require_participant(conn, conversation_id, admin_id)?;
            if !actor.role.is_admin() {
                return Err(StoreError::Forbidden("only a group admin can remove members".into()));
            }
            require_participant(conn, conversation_id, target_id)?;
            delete_participant(conn, conversation_id, target_id)
        })
    }

    /// Leaves a group. When the last admin leaves, the longest-standing
    /// remaining member is promoted so the group keeps an admin.
    pub fn leave_group(&self, conversation_id: Uuid, user_id: Uuid) -> Result<()> {
        self.with_tx(|conn| {
            require_group(conn, conversation_id)?;
            require_participant(conn, conversation_id, user_id)?;
            delete_participant(conn, conversation_id, user_id)?;

            let admins: i64 = conn.query_row(
                "SELECT COUNT(*) FROM conversation_participants
                 WHERE conversation_id = ?1 AND role = 'ADMIN' AND deleted_at IS NULL",
                [conversation_id.to_string()],
                |row| row.get(0),
            )?;
            if admins == 0 {
                let promoted = conn.execute(
                    "UPDATE conversation_participants SET role = 'ADMIN'
                     WHERE rowid = (
                        SELECT rowid FROM conversation_participants
                        WHERE conversation_id = ?1 AND deleted_at IS NULL
                        ORDER BY created_at, rowid LIMIT 1
                     )",
                    [conversation_id.to_string()],
                )?;
                if promoted > 0 {
                    debug!("Promoted a new admin in group {}", conversation_id);
                }
            }
            Ok(())
        })
    }

    // -- Messages --

    /// Inserts the message and moves the conversation's last pointer in one
    /// transaction. The sender must be a current participant.
    pub fn create_message(&self, sender_id: Uuid, conversation_id: Uuid, new: NewMessage) -> Result<Message> {
        if new.content.as_deref().is_none_or(str::is_empty) && new.file_name.is_none() {
            return Err(StoreError::Invalid("a message needs content or a file".into()));
        }

        self.with_tx(|conn| {
            require_participant(conn, conversation_id, sender_id)?;

            let id = Uuid::new_v4();
            let (created_at, created_text) = timestamp();
            conn.execute(
                "INSERT INTO messages (id, conversation_id, sender_id, content, file_name, message_type, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    id.to_string(),
                    conversation_id.to_string(),
                    sender_id.to_string(),
                    new.content,
                    new.file_name,
                    new.message_type.as_str(),
                    created_text
                ],
            )?;

            conn.execute(
                "INSERT INTO conversation_histories (conversation_id, last_message_id, sender_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)
                 ON CONFLICT(conversation_id) DO UPDATE SET
                    last_message_id = excluded.last_message_id,
                    sender_id = excluded.sender_id,
                    updated_at = excluded.updated_at",
                [conversation_id.to_string(), id.to_string(), sender_id.to_string(), created_text],
            )?;

            Ok(Message {
                id,
                conversation_id,
                sender_id,
                content: new.content.clone(),
                file_name: new.file_name.clone(),
                message_type: new.message_type,
                created_at,
            })
        })
    }

    pub fn get_message(&self, id: Uuid) -> Result<Option<Message>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT id, conversation_id, sender_id, content, file_name, message_type, created_at
                     FROM messages WHERE id = ?1 AND deleted_at IS NULL",
                    [id.to_string()],
                    message_from_row,
                )
                .optional()?)
        })
    }

    pub fn get_last_message(&self, conversation_id: Uuid) -> Result<Option<LastMessage>> {
        self.with_conn(|conn| query_last_message(conn, conversation_id))
    }

    /// One page of messages. Page 1 holds the newest messages; each page is
    /// returned oldest first.
    pub fn get_messages(&self, conversation_id: Uuid, viewer_id: Uuid, page: u32) -> Result<Vec<MessageView>> {
        self.with_conn(|conn| {
            require_participant(conn, conversation_id, viewer_id)?;

            let mut stmt = conn.prepare(
                "SELECT m.id, m.conversation_id, m.sender_id, m.content, m.file_name, m.message_type,
                        m.created_at, u.id, u.first_name, u.last_name, u.avatar
                 FROM messages m
                 JOIN users u ON u.id = m.sender_id
                 WHERE m.conversation_id = ?1 AND m.deleted_at IS NULL
                 ORDER BY m.created_at DESC, m.rowid DESC
                 LIMIT ?2 OFFSET ?3",
            )?;

            let mut rows = stmt
                .query_map(
                    rusqlite::params![conversation_id.to_string(), MESSAGES_PAGE, offset(page, MESSAGES_PAGE)],
                    |row| Ok((message_from_row(row)?, summary_at(row, 7)?)),
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.reverse();

            let mut reactions_stmt = conn.prepare(
                "SELECT r.reaction, u.id, u.first_name, u.last_name, u.avatar
                 FROM message_reactions r
                 JOIN users u ON u.id = r.user_id
                 WHERE r.message_id = ?1 AND r.deleted_at IS NULL
                 ORDER BY r.created_at, r.rowid",
            )?;

            let mut views = Vec::with_capacity(rows.len());
            for (message, sender) in rows {
                let reactions = reactions_stmt
                    .query_map([message.id.to_string()], |row| {
                        Ok(Reaction {
                            kind: enum_at(row, 0)?,
                            user: summary_at(row, 1)?,
                        })
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                let current_reaction = reactions.iter().find(|r| r.user.id == viewer_id).map(|r| r.kind);

                views.push(MessageView {
                    message,
                    sender,
                    reactions,
                    current_reaction,
                });
            }

            Ok(views)
        })
    }

    // -- Recent / unread --

    /// Conversations ordered by last activity, falling back to creation time.
    pub fn get_recent_conversations(&self, user_id: Uuid, page: u32) -> Result<Vec<RecentConversation>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.type, c.name, c.avatar, c.created_at, h.updated_at
                 FROM conversation_participants p
                 JOIN conversations c ON c.id = p.conversation_id
                 LEFT JOIN conversation_histories h ON h.conversation_id = c.id
                 WHERE p.user_id = ?1 AND p.deleted_at IS NULL
                 ORDER BY COALESCE(h.updated_at, c.created_at) DESC, c.rowid DESC
                 LIMIT ?2 OFFSET ?3",
            )?;

            let rows = stmt
                .query_map(
                    rusqlite::params![
                        user_id.to_string(),
                        RECENT_CONVERSATIONS_PAGE,
                        offset(page, RECENT_CONVERSATIONS_PAGE)
                    ],
                    |row| {
                        let conversation = conversation_from_row(row)?;
                        let updated: Option<String> = row.get(5)?;
                        let last_updated = match updated {
                            Some(_) => time_at(row, 5)?,
                            None => conversation.created_at,
                        };
                        Ok((conversation, last_updated))
                    },
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let mut recent = Vec::with_capacity(rows.len());
            for (conversation, last_updated) in rows {
                let friend = match conversation.kind {
                    ConversationType::Private => query_other_participant(conn, conversation.id, user_id)?,
                    ConversationType::Group => None,
                };
                let (name, avatar) = match &friend {
                    Some(f) => (Some(format!("{} {}", f.last_name, f.first_name)), f.avatar.clone()),
                    None => (conversation.name, conversation.avatar),
                };

                recent.push(RecentConversation {
                    conversation_id: conversation.id,
                    kind: conversation.kind,
                    name,
                    avatar,
                    friend,
                    last_message: query_last_message(conn, conversation.id)?,
                    last_updated,
                });
            }

            Ok(recent)
        })
    }

    /// Conversations whose last message was sent by someone else and has no
    /// read receipt from `user_id`.
    pub fn get_unread_conversations(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT h.conversation_id
                 FROM conversation_histories h
                 JOIN conversation_participants p
                   ON p.conversation_id = h.conversation_id AND p.user_id = ?1 AND p.deleted_at IS NULL
                 WHERE h.sender_id != ?1
                   AND NOT EXISTS (
                       SELECT 1 FROM message_reads r
                       WHERE r.message_id = h.last_message_id AND r.user_id = ?1
                   )
                 ORDER BY h.updated_at DESC",
            )?;

            let ids = stmt
                .query_map([user_id.to_string()], |row| uuid_at(row, 0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(ids)
        })
    }

    /// Records a read receipt for the current last message. Returns true when
    /// a new receipt was written; repeats and own messages are a no-op.
    pub fn mark_read(&self, user_id: Uuid, conversation_id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            require_participant(conn, conversation_id, user_id)?;

            let pointer: Option<(String, String)> = conn
                .query_row(
                    "SELECT last_message_id, sender_id FROM conversation_histories WHERE conversation_id = ?1",
                    [conversation_id.to_string()],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            let Some((message_id, sender_id)) = pointer else {
                return Ok(false);
            };
            if sender_id == user_id.to_string() {
                return Ok(false);
            }

            let inserted = conn.execute(
                "INSERT OR IGNORE INTO message_reads (message_id, user_id, created_at) VALUES (?1, ?2, ?3)",
                [message_id, user_id.to_string(), now()],
            )?;
            Ok(inserted > 0)
        })
    }
}

fn validate_conversation(new: &NewConversation) -> Result<()> {
    let distinct: HashSet<Uuid> = new.participants.iter().map(|p| p.user_id).collect();
    if distinct.len() != new.participants.len() {
        return Err(StoreError::Invalid("participants must be distinct".into()));
    }

    match new.kind {
        ConversationType::Private => {
            if new.participants.len() != 2 {
                return Err(StoreError::Invalid("a private conversation has exactly two participants".into()));
            }
            if new.participants.iter().any(|p| p.role != ParticipantRole::None) {
                return Err(StoreError::Invalid("private participants carry no role".into()));
            }
            if new.name.is_some() || new.avatar.is_some() {
                return Err(StoreError::Invalid("a private conversation has no name or avatar".into()));
            }
        }
        ConversationType::Group => {
            if new.participants.iter().any(|p| p.role == ParticipantRole::None) {
                return Err(StoreError::Invalid("group participants need a role".into()));
            }
            if !new.participants.iter().any(|p| p.role.is_admin()) {
                return Err(StoreError::Invalid("a group needs at least one admin".into()));
            }
        }
    }
    Ok(())
}

/// Returns false when the user was already a participant.
fn insert_participant(conn: &Connection, conversation_id: Uuid, user_id: Uuid, role: ParticipantRole) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT INTO conversation_participants (id, conversation_id, user_id, role, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(conversation_id, user_id) DO NOTHING",
        rusqlite::params![
            Uuid::new_v4().to_string(),
            conversation_id.to_string(),
            user_id.to_string(),
            role.to_db(),
            now()
        ],
    )?;
    Ok(inserted > 0)
}

fn delete_participant(conn: &Connection, conversation_id: Uuid, user_id: Uuid) -> Result<()> {
    conn.execute(
        "DELETE FROM conversation_participants WHERE conversation_id = ?1 AND user_id = ?2",
        [conversation_id.to_string(), user_id.to_string()],
    )?;
    Ok(())
}

fn query_conversation(conn: &Connection, id: Uuid) -> Result<Option<Conversation>> {
    Ok(conn
        .query_row(
            "SELECT id, type, name, avatar, created_at FROM conversations WHERE id = ?1",
            [id.to_string()],
            conversation_from_row,
        )
        .optional()?)
}

fn query_private(conn: &Connection, a: Uuid, b: Uuid) -> Result<Option<Conversation>> {
    Ok(conn
        .query_row(
            "SELECT c.id, c.type, c.name, c.avatar, c.created_at
             FROM conversations c
             JOIN conversation_participants pa ON pa.conversation_id = c.id AND pa.user_id = ?1
             JOIN conversation_participants pb ON pb.conversation_id = c.id AND pb.user_id = ?2
             WHERE c.type = 'PRIVATE' AND pa.deleted_at IS NULL AND pb.deleted_at IS NULL
             LIMIT 1",
            [a.to_string(), b.to_string()],
            conversation_from_row,
        )
        .optional()?)
}

fn require_group(conn: &Connection, id: Uuid) -> Result<Conversation> {
    let conversation =
        query_conversation(conn, id)?.ok_or_else(|| StoreError::NotFound(format!("conversation {}", id)))?;
    if conversation.kind != ConversationType::Group {
        return Err(StoreError::Invalid("not a group conversation".into()));
    }
    Ok(conversation)
}

fn require_participant(conn: &Connection, conversation_id: Uuid, user_id: Uuid) -> Result<Participant> {
    query_participant(conn, conversation_id, user_id)?
        .ok_or_else(|| StoreError::Forbidden("not a participant of this conversation".into()))
}

fn query_participant(conn: &Connection, conversation_id: Uuid, user_id: Uuid) -> Result<Option<Participant>> {
    Ok(conn
        .query_row(
            "SELECT p.conversation_id, p.nickname, p.role, u.id, u.first_name, u.last_name, u.avatar
             FROM conversation_participants p
             JOIN users u ON u.id = p.user_id
             WHERE p.conversation_id = ?1 AND p.user_id = ?2 AND p.deleted_at IS NULL",
            [conversation_id.to_string(), user_id.to_string()],
            participant_from_row,
        )
        .optional()?)
}

fn query_participants(conn: &Connection, conversation_id: Uuid, page: Option<u32>) -> Result<Vec<Participant>> {
    let (limit, skip) = match page {
        Some(page) => (i64::from(GROUP_MEMBERS_PAGE), i64::from(offset(page, GROUP_MEMBERS_PAGE))),
        None => (-1, 0),
    };

    let mut stmt = conn.prepare(
        "SELECT p.conversation_id, p.nickname, p.role, u.id, u.first_name, u.last_name, u.avatar
         FROM conversation_participants p
         JOIN users u ON u.id = p.user_id
         WHERE p.conversation_id = ?1 AND p.deleted_at IS NULL
         ORDER BY CASE p.role WHEN 'ADMIN' THEN 0 ELSE 1 END, p.created_at, p.rowid
         LIMIT ?2 OFFSET ?3",
    )?;

    let rows = stmt
        .query_map(rusqlite::params![conversation_id.to_string(), limit, skip], participant_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

pub(crate) fn query_participant_ids(conn: &Connection, conversation_id: Uuid) -> Result<Vec<Uuid>> {
    let mut stmt = conn.prepare(
        "SELECT user_id FROM conversation_participants
         WHERE conversation_id = ?1 AND deleted_at IS NULL
         ORDER BY created_at, rowid",
    )?;

    let ids = stmt
        .query_map([conversation_id.to_string()], |row| uuid_at(row, 0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(ids)
}

fn query_other_participant(
    conn: &Connection,
    conversation_id: Uuid,
    user_id: Uuid,
) -> Result<Option<orbit_types::models::UserSummary>> {
    let other: Option<Uuid> = conn
        .query_row(
            "SELECT user_id FROM conversation_participants
             WHERE conversation_id = ?1 AND user_id != ?2 AND deleted_at IS NULL
             LIMIT 1",
            [conversation_id.to_string(), user_id.to_string()],
            |row| uuid_at(row, 0),
        )
        .optional()?;

    other.map(|id| query_summary(conn, id)).transpose()
}

fn query_last_message(conn: &Connection, conversation_id: Uuid) -> Result<Option<LastMessage>> {
    Ok(conn
        .query_row(
            "SELECT m.id, m.content, m.message_type, u.id, u.first_name, u.last_name, u.avatar
             FROM conversation_histories h
             JOIN messages m ON m.id = h.last_message_id
             JOIN users u ON u.id = h.sender_id
             WHERE h.conversation_id = ?1",
            [conversation_id.to_string()],
            |row| {
                Ok(LastMessage {
                    id: uuid_at(row, 0)?,
                    content: row.get(1)?,
                    message_type: enum_at(row, 2)?,
                    sender: summary_at(row, 3)?,
                })
            },
        )
        .optional()?)
}

fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: uuid_at(row, 0)?,
        kind: enum_at(row, 1)?,
        name: row.get(2)?,
        avatar: row.get(3)?,
        created_at: time_at(row, 4)?,
    })
}

fn participant_from_row(row: &Row<'_>) -> rusqlite::Result<Participant> {
    Ok(Participant {
        conversation_id: uuid_at(row, 0)?,
        nickname: row.get(1)?,
        role: role_at(row, 2)?,
        user: summary_at(row, 3)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: uuid_at(row, 0)?,
        conversation_id: uuid_at(row, 1)?,
        sender_id: uuid_at(row, 2)?,
        content: row.get(3)?,
        file_name: row.get(4)?,
        message_type: enum_at(row, 5)?,
        created_at: time_at(row, 6)?,
    })
}
