use rusqlite::Connection;
use tracing::info;

use crate::Result;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            username    TEXT NOT NULL UNIQUE,
            password    TEXT NOT NULL,
            first_name  TEXT NOT NULL,
            last_name   TEXT NOT NULL,
            avatar      TEXT,
            role        TEXT NOT NULL DEFAULT 'USER',
            is_active   INTEGER NOT NULL DEFAULT 1,
            created_at  TEXT NOT NULL,
            deleted_at  TEXT
        );

        -- Undirected friendship, canonicalised so each pair has one row
        CREATE TABLE IF NOT EXISTS relationships (
            id          TEXT PRIMARY KEY,
            user1_id    TEXT NOT NULL REFERENCES users(id),
            user2_id    TEXT NOT NULL REFERENCES users(id),
            created_at  TEXT NOT NULL,
            deleted_at  TEXT,
            UNIQUE(user1_id, user2_id),
            CHECK(user1_id < user2_id)
        );

        CREATE TABLE IF NOT EXISTS friend_requests (
            id          TEXT PRIMARY KEY,
            sender_id   TEXT NOT NULL REFERENCES users(id),
            receiver_id TEXT NOT NULL REFERENCES users(id),
            created_at  TEXT NOT NULL,
            deleted_at  TEXT,
            UNIQUE(sender_id, receiver_id)
        );

        CREATE TABLE IF NOT EXISTS notifications (
            id           TEXT PRIMARY KEY,
            user_id      TEXT NOT NULL REFERENCES users(id),
            actor_id     TEXT NOT NULL REFERENCES users(id),
            type         TEXT NOT NULL,
            reference_id TEXT NOT NULL,
            content      TEXT NOT NULL,
            is_read      INTEGER NOT NULL DEFAULT 0,
            is_open_menu INTEGER NOT NULL DEFAULT 0,
            created_at   TEXT NOT NULL,
            deleted_at   TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_notifications_user
            ON notifications(user_id, created_at);

        CREATE TABLE IF NOT EXISTS posts (
            id          TEXT PRIMARY KEY,
            poster_id   TEXT NOT NULL REFERENCES users(id),
            visibility  TEXT NOT NULL DEFAULT 'FRIEND',
            content     TEXT,
            created_at  TEXT NOT NULL,
            deleted_at  TEXT
        );

        CREATE TABLE IF NOT EXISTS comments (
            id                TEXT PRIMARY KEY,
            post_id           TEXT NOT NULL REFERENCES posts(id),
            commentator_id    TEXT NOT NULL REFERENCES users(id),
            parent_comment_id TEXT REFERENCES comments(id),
            content           TEXT,
            image             TEXT,
            created_at        TEXT NOT NULL,
            deleted_at        TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_comments_post
            ON comments(post_id, created_at);

        CREATE TABLE IF NOT EXISTS conversations (
            id          TEXT PRIMARY KEY,
            type        TEXT NOT NULL,
            name        TEXT,
            avatar      TEXT,
            created_at  TEXT NOT NULL
        );

        -- role is NULL for private conversations
        CREATE TABLE IF NOT EXISTS conversation_participants (
            id              TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL REFERENCES conversations(id),
            user_id         TEXT NOT NULL REFERENCES users(id),
            nickname        TEXT,
            role            TEXT,
            created_at      TEXT NOT NULL,
            deleted_at      TEXT,
            UNIQUE(conversation_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_participants_user
            ON conversation_participants(user_id);

        CREATE TABLE IF NOT EXISTS messages (
            id              TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL REFERENCES conversations(id),
            sender_id       TEXT NOT NULL REFERENCES users(id),
            content         TEXT,
            file_name       TEXT,
            message_type    TEXT NOT NULL DEFAULT 'TEXT',
            created_at      TEXT NOT NULL,
            deleted_at      TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, created_at);

        -- Last-message pointer: exactly one row per conversation, overwritten
        CREATE TABLE IF NOT EXISTS conversation_histories (
            conversation_id TEXT PRIMARY KEY REFERENCES conversations(id),
            last_message_id TEXT NOT NULL REFERENCES messages(id),
            sender_id       TEXT NOT NULL REFERENCES users(id),
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS message_reads (
            message_id  TEXT NOT NULL REFERENCES messages(id),
            user_id     TEXT NOT NULL REFERENCES users(id),
            created_at  TEXT NOT NULL,
            UNIQUE(message_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS post_reactions (
            id          TEXT PRIMARY KEY,
            post_id     TEXT NOT NULL REFERENCES posts(id),
            user_id     TEXT NOT NULL REFERENCES users(id),
            reaction    TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL,
            deleted_at  TEXT,
            UNIQUE(post_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS comment_reactions (
            id          TEXT PRIMARY KEY,
            comment_id  TEXT NOT NULL REFERENCES comments(id),
            user_id     TEXT NOT NULL REFERENCES users(id),
            reaction    TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL,
            deleted_at  TEXT,
            UNIQUE(comment_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS message_reactions (
            id          TEXT PRIMARY KEY,
            message_id  TEXT NOT NULL REFERENCES messages(id),
            user_id     TEXT NOT NULL REFERENCES users(id),
            reaction    TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL,
            deleted_at  TEXT,
            UNIQUE(message_id, user_id)
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
