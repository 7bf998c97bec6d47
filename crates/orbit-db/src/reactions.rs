use rusqlite::Connection;
use uuid::Uuid;

use orbit_types::models::{ReactionChange, ReactionKind};

use crate::models::{OptionalExt, enum_at, now};
use crate::{Database, Result, StoreError};

/// The three kinds of thing a user can react to. They share one reaction
/// vocabulary and one state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactionTarget {
    Post,
    Comment,
    Message,
}

impl ReactionTarget {
    fn table(self) -> &'static str {
        match self {
            Self::Post => "post_reactions",
            Self::Comment => "comment_reactions",
            Self::Message => "message_reactions",
        }
    }

    fn column(self) -> &'static str {
        match self {
            Self::Post => "post_id",
            Self::Comment => "comment_id",
            Self::Message => "message_id",
        }
    }

    fn parent_table(self) -> &'static str {
        match self {
            Self::Post => "posts",
            Self::Comment => "comments",
            Self::Message => "messages",
        }
    }
}

impl Database {
    /// Applies the reaction state machine for (target, user):
    ///
    /// | current | requested | result    |
    /// |---------|-----------|-----------|
    /// | none    | kind      | Created   |
    /// | some    | kind      | Updated   |
    /// | some    | none      | Removed   |
    /// | none    | none      | Unchanged |
    ///
    /// Setting the same kind again reports `Unchanged`. The read and the write
    /// run in one transaction against the (target, user) unique key, so
    /// concurrent requests cannot leave two rows behind.
    pub fn set_reaction(
        &self,
        target: ReactionTarget,
        target_id: Uuid,
        user_id: Uuid,
        reaction: Option<ReactionKind>,
    ) -> Result<ReactionChange> {
        self.with_tx(|conn| {
            ensure_target(conn, target, target_id)?;
            let current = query_reaction(conn, target, target_id, user_id)?;

            let change = match (current, reaction) {
                (None, None) => ReactionChange::Unchanged,
                (Some(old), Some(new)) if old == new => ReactionChange::Unchanged,
                (_, Some(new)) => {
                    let sql = format!(
                        "INSERT INTO {table} (id, {column}, user_id, reaction, created_at, updated_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                         ON CONFLICT({column}, user_id) DO UPDATE SET
                            reaction = excluded.reaction,
                            updated_at = excluded.updated_at,
                            deleted_at = NULL",
                        table = target.table(),
                        column = target.column(),
                    );
                    conn.execute(
                        &sql,
                        [
                            Uuid::new_v4().to_string(),
                            target_id.to_string(),
                            user_id.to_string(),
                            new.as_str().to_string(),
                            now(),
                        ],
                    )?;
                    if current.is_some() {
                        ReactionChange::Updated(new)
                    } else {
                        ReactionChange::Created(new)
                    }
                }
                (Some(_), None) => {
                    let sql = format!(
                        "DELETE FROM {} WHERE {} = ?1 AND user_id = ?2",
                        target.table(),
                        target.column()
                    );
                    conn.execute(&sql, [target_id.to_string(), user_id.to_string()])?;
                    ReactionChange::Removed
                }
            };

            Ok(change)
        })
    }

    pub fn get_reaction(&self, target: ReactionTarget, target_id: Uuid, user_id: Uuid) -> Result<Option<ReactionKind>> {
        self.with_conn(|conn| query_reaction(conn, target, target_id, user_id))
    }

    pub fn reaction_count(&self, target: ReactionTarget, target_id: Uuid) -> Result<u32> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT COUNT(*) FROM {} WHERE {} = ?1 AND deleted_at IS NULL",
                target.table(),
                target.column()
            );
            Ok(conn.query_row(&sql, [target_id.to_string()], |row| row.get(0))?)
        })
    }
}

fn ensure_target(conn: &Connection, target: ReactionTarget, id: Uuid) -> Result<()> {
    let sql = format!(
        "SELECT 1 FROM {} WHERE id = ?1 AND deleted_at IS NULL",
        target.parent_table()
    );
    let found: Option<i64> = conn.query_row(&sql, [id.to_string()], |row| row.get(0)).optional()?;
    found
        .map(|_| ())
        .ok_or_else(|| StoreError::NotFound(format!("{} {}", target.parent_table().trim_end_matches('s'), id)))
}

fn query_reaction(
    conn: &Connection,
    target: ReactionTarget,
    target_id: Uuid,
    user_id: Uuid,
) -> Result<Option<ReactionKind>> {
    let sql = format!(
        "SELECT reaction FROM {} WHERE {} = ?1 AND user_id = ?2 AND deleted_at IS NULL",
        target.table(),
        target.column()
    );
    Ok(conn
        .query_row(&sql, [target_id.to_string(), user_id.to_string()], |row| enum_at(row, 0))
        .optional()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversations::NewMessage;
    use crate::models::NewConversation;
    use crate::test_support::{db, user};
    use orbit_types::models::PostVisibility;

    #[test]
    fn reaction_state_machine() {
        let db = db();
        let ana = user(&db, "ana");
        let ben = user(&db, "ben");
        let conv = db.create_conversation(NewConversation::private(ana, ben)).unwrap();
        let msg = db.create_message(ana, conv.id, NewMessage::text("hi")).unwrap();
        let t = ReactionTarget::Message;

        assert_eq!(db.set_reaction(t, msg.id, ben, None).unwrap(), ReactionChange::Unchanged);
        assert_eq!(
            db.set_reaction(t, msg.id, ben, Some(ReactionKind::Like)).unwrap(),
            ReactionChange::Created(ReactionKind::Like)
        );
        assert_eq!(
            db.set_reaction(t, msg.id, ben, Some(ReactionKind::Like)).unwrap(),
            ReactionChange::Unchanged
        );
        assert_eq!(
            db.set_reaction(t, msg.id, ben, Some(ReactionKind::Wow)).unwrap(),
            ReactionChange::Updated(ReactionKind::Wow)
        );
        assert_eq!(db.get_reaction(t, msg.id, ben).unwrap(), Some(ReactionKind::Wow));
        assert_eq!(db.reaction_count(t, msg.id).unwrap(), 1);

        assert_eq!(db.set_reaction(t, msg.id, ben, None).unwrap(), ReactionChange::Removed);
        assert_eq!(db.get_reaction(t, msg.id, ben).unwrap(), None);
        assert_eq!(db.reaction_count(t, msg.id).unwrap(), 0);
    }

    #[test]
    fn reactions_are_per_user() {
        let db = db();
        let ana = user(&db, "ana");
        let ben = user(&db, "ben");
        let post = db.create_post(ana, Some("hello".into()), PostVisibility::Friend).unwrap();

        db.set_reaction(ReactionTarget::Post, post.id, ana, Some(ReactionKind::Love)).unwrap();
        db.set_reaction(ReactionTarget::Post, post.id, ben, Some(ReactionKind::Sad)).unwrap();

        assert_eq!(db.reaction_count(ReactionTarget::Post, post.id).unwrap(), 2);
        assert_eq!(
            db.get_reaction(ReactionTarget::Post, post.id, ana).unwrap(),
            Some(ReactionKind::Love)
        );
    }

    #[test]
    fn reacting_to_a_missing_target_is_not_found() {
        let db = db();
        let ana = user(&db, "ana");
        let err = db
            .set_reaction(ReactionTarget::Comment, Uuid::new_v4(), ana, Some(ReactionKind::Like))
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
