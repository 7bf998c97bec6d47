use rusqlite::{Connection, Row};
use uuid::Uuid;

use orbit_types::models::{Notification, NotificationType};

use crate::models::{enum_at, summary_at, time_at, timestamp, uuid_at};
use crate::users::query_summary;
use crate::{Database, Result, StoreError};

/// Input for a new notification row.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub user_id: Uuid,
    pub actor_id: Uuid,
    pub kind: NotificationType,
    pub reference_id: Uuid,
    pub content: String,
}

impl Database {
    pub fn create_notification(&self, new: NewNotification) -> Result<Notification> {
        self.with_tx(|conn| insert_notification(conn, &new))
    }

    /// Newest first.
    pub fn get_notifications(&self, user_id: Uuid) -> Result<Vec<Notification>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT n.id, n.user_id, n.type, n.reference_id, n.content, n.is_read, n.is_open_menu,
                        n.created_at, a.id, a.first_name, a.last_name, a.avatar
                 FROM notifications n
                 JOIN users a ON a.id = n.actor_id
                 WHERE n.user_id = ?1 AND n.deleted_at IS NULL
                 ORDER BY n.created_at DESC, n.rowid DESC",
            )?;

            let rows = stmt
                .query_map([user_id.to_string()], notification_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    pub fn mark_notification_read(&self, id: Uuid, user_id: Uuid) -> Result<()> {
        self.update_flag(id, user_id, "is_read")
    }

    pub fn mark_notification_menu_opened(&self, id: Uuid, user_id: Uuid) -> Result<()> {
        self.update_flag(id, user_id, "is_open_menu")
    }

    fn update_flag(&self, id: Uuid, user_id: Uuid, column: &'static str) -> Result<()> {
        self.with_conn(|conn| {
            let sql = format!(
                "UPDATE notifications SET {} = 1 WHERE id = ?1 AND user_id = ?2 AND deleted_at IS NULL",
                column
            );
            let changed = conn.execute(&sql, [id.to_string(), user_id.to_string()])?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("notification {}", id)));
            }
            Ok(())
        })
    }
}

pub(crate) fn insert_notification(conn: &Connection, new: &NewNotification) -> Result<Notification> {
    let id = Uuid::new_v4();
    let (created_at, created_text) = timestamp();
    conn.execute(
        "INSERT INTO notifications (id, user_id, actor_id, type, reference_id, content, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![
            id.to_string(),
            new.user_id.to_string(),
            new.actor_id.to_string(),
            new.kind.as_str(),
            new.reference_id.to_string(),
            new.content,
            created_text
        ],
    )?;

    let actor = query_summary(conn, new.actor_id)?;
    Ok(Notification {
        id,
        user_id: new.user_id,
        actor,
        kind: new.kind,
        reference_id: new.reference_id,
        content: new.content.clone(),
        is_read: false,
        is_open_menu: false,
        created_at,
    })
}

/// Hard-deletes notifications that point at `reference_id`.
pub(crate) fn delete_notifications_for(
    conn: &Connection,
    kind: NotificationType,
    reference_id: Uuid,
) -> Result<usize> {
    Ok(conn.execute(
        "DELETE FROM notifications WHERE type = ?1 AND reference_id = ?2",
        [kind.as_str().to_string(), reference_id.to_string()],
    )?)
}

fn notification_from_row(row: &Row<'_>) -> rusqlite::Result<Notification> {
    Ok(Notification {
        id: uuid_at(row, 0)?,
        user_id: uuid_at(row, 1)?,
        kind: enum_at(row, 2)?,
        reference_id: uuid_at(row, 3)?,
        content: row.get(4)?,
        is_read: row.get(5)?,
        is_open_menu: row.get(6)?,
        created_at: time_at(row, 7)?,
        actor: summary_at(row, 8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{db, user};

    #[test]
    fn notifications_are_listed_newest_first_and_can_be_marked() {
        let db = db();
        let ana = user(&db, "ana");
        let ben = user(&db, "ben");

        for content in ["first", "second"] {
            db.create_notification(NewNotification {
                user_id: ana,
                actor_id: ben,
                kind: NotificationType::Like,
                reference_id: Uuid::new_v4(),
                content: content.to_string(),
            })
            .unwrap();
        }

        let list = db.get_notifications(ana).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].content, "second");
        assert_eq!(list[0].actor.id, ben);

        db.mark_notification_read(list[0].id, ana).unwrap();
        let list = db.get_notifications(ana).unwrap();
        assert!(list[0].is_read);
        assert!(!list[1].is_read);
    }

    #[test]
    fn cannot_mark_someone_elses_notification() {
        let db = db();
        let ana = user(&db, "ana");
        let ben = user(&db, "ben");
        let n = db
            .create_notification(NewNotification {
                user_id: ana,
                actor_id: ben,
                kind: NotificationType::Comment,
                reference_id: Uuid::new_v4(),
                content: "hi".into(),
            })
            .unwrap();

        let err = db.mark_notification_read(n.id, ben).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
