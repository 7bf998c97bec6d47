use rusqlite::{Connection, Row};
use uuid::Uuid;

use orbit_types::models::{
    FriendRequest, FriendRequestView, Notification, NotificationType, Relationship, UserSummary,
};

use crate::models::{OptionalExt, now, summary_at, time_at, timestamp, uuid_at};
use crate::notifications::{NewNotification, delete_notifications_for, insert_notification};
use crate::users::{ensure_user, query_summary};
use crate::{Database, Result, StoreError};

const FRIEND_REQUEST_PAGE: u32 = 10;

/// Orders a pair so that `user1_id < user2_id`.
pub fn canonical_pair(a: Uuid, b: Uuid) -> (Uuid, Uuid) {
    if a < b { (a, b) } else { (b, a) }
}

impl Database {
    // -- Friend graph --

    /// IDs of every current friend of `user_id`.
    pub fn friends_of(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT CASE WHEN r.user1_id = ?1 THEN r.user2_id ELSE r.user1_id END
                 FROM relationships r
                 WHERE (r.user1_id = ?1 OR r.user2_id = ?1) AND r.deleted_at IS NULL",
            )?;

            let ids = stmt
                .query_map([user_id.to_string()], |row| uuid_at(row, 0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(ids)
        })
    }

    /// Friends with their profile, for the friends list.
    pub fn friend_summaries(&self, user_id: Uuid) -> Result<Vec<UserSummary>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.id, u.first_name, u.last_name, u.avatar
                 FROM relationships r
                 JOIN users u
                   ON u.id = CASE WHEN r.user1_id = ?1 THEN r.user2_id ELSE r.user1_id END
                 WHERE (r.user1_id = ?1 OR r.user2_id = ?1)
                   AND r.deleted_at IS NULL AND u.deleted_at IS NULL
                 ORDER BY u.first_name, u.last_name",
            )?;

            let rows = stmt
                .query_map([user_id.to_string()], |row| summary_at(row, 0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    pub fn are_friends(&self, a: Uuid, b: Uuid) -> Result<bool> {
        self.with_conn(|conn| Ok(query_relationship(conn, a, b)?.is_some()))
    }

    /// Removes the friendship between `a` and `b`.
    pub fn unfriend(&self, a: Uuid, b: Uuid) -> Result<()> {
        let (user1, user2) = canonical_pair(a, b);
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM relationships WHERE user1_id = ?1 AND user2_id = ?2",
                [user1.to_string(), user2.to_string()],
            )?;
            if removed == 0 {
                return Err(StoreError::NotFound(format!("friendship between {} and {}", a, b)));
            }
            Ok(())
        })
    }

    // -- Friend requests --

    /// Creates a pending request plus the receiver's notification, atomically.
    pub fn create_friend_request(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
    ) -> Result<(FriendRequest, Notification)> {
        if sender_id == receiver_id {
            return Err(StoreError::Invalid("cannot send a friend request to yourself".into()));
        }

        self.with_tx(|conn| {
            ensure_user(conn, receiver_id)?;
            if query_request_between(conn, sender_id, receiver_id)?.is_some() {
                return Err(StoreError::Conflict("there is already a friend request between these users".into()));
            }
            if query_relationship(conn, sender_id, receiver_id)?.is_some() {
                return Err(StoreError::Conflict("you are already friends".into()));
            }

            let id = Uuid::new_v4();
            let (created_at, created_text) = timestamp();
            conn.execute(
                "INSERT INTO friend_requests (id, sender_id, receiver_id, created_at) VALUES (?1, ?2, ?3, ?4)",
                [id.to_string(), sender_id.to_string(), receiver_id.to_string(), created_text],
            )?;

            let sender = query_summary(conn, sender_id)?;
            let notification = insert_notification(
                conn,
                &NewNotification {
                    user_id: receiver_id,
                    actor_id: sender_id,
                    kind: NotificationType::FriendRequest,
                    reference_id: id,
                    content: format!("<b>{} {}</b> sent you a friend request", sender.last_name, sender.first_name),
                },
            )?;

            let request = FriendRequest { id, sender_id, receiver_id, created_at };
            Ok((request, notification))
        })
    }

    pub fn get_friend_request(&self, id: Uuid) -> Result<Option<FriendRequest>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT id, sender_id, receiver_id, created_at FROM friend_requests
                     WHERE id = ?1 AND deleted_at IS NULL",
                    [id.to_string()],
                    request_from_row,
                )
                .optional()?)
        })
    }

    /// The pending request between two users, in either direction.
    pub fn get_friend_request_by_user_id(&self, user_id: Uuid, other_id: Uuid) -> Result<Option<FriendRequest>> {
        self.with_conn(|conn| query_request_between(conn, user_id, other_id))
    }

    /// Withdraws or rejects a request; its notification goes with it.
    pub fn delete_friend_request(&self, id: Uuid) -> Result<()> {
        self.with_tx(|conn| {
            let removed = conn.execute("DELETE FROM friend_requests WHERE id = ?1", [id.to_string()])?;
            if removed == 0 {
                return Err(StoreError::NotFound(format!("friend request {}", id)));
            }
            delete_notifications_for(conn, NotificationType::FriendRequest, id)?;
            Ok(())
        })
    }

    /// Resolves a request into a friendship. Only the receiver may accept.
    pub fn accept_friend_request(&self, id: Uuid, receiver_id: Uuid) -> Result<Relationship> {
        self.with_tx(|conn| {
            let request = conn
                .query_row(
                    "SELECT id, sender_id, receiver_id, created_at FROM friend_requests
                     WHERE id = ?1 AND deleted_at IS NULL",
                    [id.to_string()],
                    request_from_row,
                )
                .optional()?
                .ok_or_else(|| StoreError::NotFound(format!("friend request {}", id)))?;

            if request.receiver_id != receiver_id {
                return Err(StoreError::Forbidden("only the receiver can accept a friend request".into()));
            }

            conn.execute("DELETE FROM friend_requests WHERE id = ?1", [id.to_string()])?;
            delete_notifications_for(conn, NotificationType::FriendRequest, id)?;

            let (user1, user2) = canonical_pair(request.sender_id, request.receiver_id);
            conn.execute(
                "INSERT INTO relationships (id, user1_id, user2_id, created_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(user1_id, user2_id) DO NOTHING",
                [Uuid::new_v4().to_string(), user1.to_string(), user2.to_string(), now()],
            )?;

            query_relationship(conn, user1, user2)?
                .ok_or_else(|| StoreError::NotFound("relationship".into()))
        })
    }

    /// Requests received by `receiver_id`, newest first.
    pub fn get_friend_requests(&self, receiver_id: Uuid, page: u32) -> Result<Vec<FriendRequestView>> {
        self.query_request_views("fr.receiver_id", "fr.sender_id", receiver_id, page)
    }

    /// Requests sent by `sender_id`, newest first.
    pub fn get_sent_friend_requests(&self, sender_id: Uuid, page: u32) -> Result<Vec<FriendRequestView>> {
        self.query_request_views("fr.sender_id", "fr.receiver_id", sender_id, page)
    }

    pub fn friend_request_count(&self, receiver_id: Uuid) -> Result<u32> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM friend_requests WHERE receiver_id = ?1 AND deleted_at IS NULL",
                [receiver_id.to_string()],
                |row| row.get(0),
            )?)
        })
    }

    fn query_request_views(
        &self,
        owner_column: &'static str,
        other_column: &'static str,
        owner: Uuid,
        page: u32,
    ) -> Result<Vec<FriendRequestView>> {
        let offset = page.saturating_sub(1) * FRIEND_REQUEST_PAGE;
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT fr.id, fr.created_at, u.id, u.first_name, u.last_name, u.avatar
                 FROM friend_requests fr
                 JOIN users u ON u.id = {other}
                 WHERE {owner} = ?1 AND fr.deleted_at IS NULL AND u.deleted_at IS NULL
                 ORDER BY fr.created_at DESC
                 LIMIT ?2 OFFSET ?3",
                other = other_column,
                owner = owner_column,
            );
            let mut stmt = conn.prepare(&sql)?;

            let rows = stmt
                .query_map(rusqlite::params![owner.to_string(), FRIEND_REQUEST_PAGE, offset], |row| {
                    Ok(FriendRequestView {
                        id: uuid_at(row, 0)?,
                        created_at: time_at(row, 1)?,
                        user: summary_at(row, 2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }
}

fn query_request_between(conn: &Connection, a: Uuid, b: Uuid) -> Result<Option<FriendRequest>> {
    Ok(conn
        .query_row(
            "SELECT id, sender_id, receiver_id, created_at FROM friend_requests
             WHERE ((sender_id = ?1 AND receiver_id = ?2) OR (sender_id = ?2 AND receiver_id = ?1))
               AND deleted_at IS NULL",
            [a.to_string(), b.to_string()],
            request_from_row,
        )
        .optional()?)
}

fn query_relationship(conn: &Connection, a: Uuid, b: Uuid) -> Result<Option<Relationship>> {
    let (user1, user2) = canonical_pair(a, b);
    Ok(conn
        .query_row(
            "SELECT id, user1_id, user2_id, created_at FROM relationships
             WHERE user1_id = ?1 AND user2_id = ?2 AND deleted_at IS NULL",
            [user1.to_string(), user2.to_string()],
            |row| {
                Ok(Relationship {
                    id: uuid_at(row, 0)?,
                    user1_id: uuid_at(row, 1)?,
                    user2_id: uuid_at(row, 2)?,
                    created_at: time_at(row, 3)?,
                })
            },
        )
        .optional()?)
}

fn request_from_row(row: &Row<'_>) -> rusqlite::Result<FriendRequest> {
    Ok(FriendRequest {
        id: uuid_at(row, 0)?,
        sender_id: uuid_at(row, 1)?,
        receiver_id: uuid_at(row, 2)?,
        created_at: time_at(row, 3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{befriend, db, user};

    #[test]
    fn request_creates_a_notification_for_the_receiver() {
        let db = db();
        let ana = user(&db, "ana");
        let ben = user(&db, "ben");

        let (request, notification) = db.create_friend_request(ana, ben).unwrap();
        assert_eq!(notification.user_id, ben);
        assert_eq!(notification.reference_id, request.id);
        assert_eq!(notification.kind, NotificationType::FriendRequest);
        assert_eq!(db.friend_request_count(ben).unwrap(), 1);
    }

    #[test]
    fn lookup_by_user_works_in_both_directions() {
        let db = db();
        let ana = user(&db, "ana");
        let ben = user(&db, "ben");
        let (request, _) = db.create_friend_request(ana, ben).unwrap();

        assert_eq!(db.get_friend_request_by_user_id(ana, ben).unwrap().unwrap().id, request.id);
        assert_eq!(db.get_friend_request_by_user_id(ben, ana).unwrap().unwrap().id, request.id);
    }

    #[test]
    fn reverse_duplicate_request_is_a_conflict() {
        let db = db();
        let ana = user(&db, "ana");
        let ben = user(&db, "ben");
        db.create_friend_request(ana, ben).unwrap();

        let err = db.create_friend_request(ben, ana).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn deleting_a_request_removes_its_notification() {
        let db = db();
        let ana = user(&db, "ana");
        let ben = user(&db, "ben");
        let (request, _) = db.create_friend_request(ana, ben).unwrap();

        db.delete_friend_request(request.id).unwrap();

        assert!(db.get_friend_request_by_user_id(ana, ben).unwrap().is_none());
        assert!(db.get_notifications(ben).unwrap().is_empty());
    }

    #[test]
    fn accepting_creates_one_canonical_relationship() {
        let db = db();
        let ana = user(&db, "ana");
        let ben = user(&db, "ben");
        let (request, _) = db.create_friend_request(ana, ben).unwrap();

        let rel = db.accept_friend_request(request.id, ben).unwrap();
        assert!(rel.user1_id < rel.user2_id);
        assert!(db.are_friends(ana, ben).unwrap());
        assert!(db.are_friends(ben, ana).unwrap());
        assert_eq!(db.friends_of(ana).unwrap(), vec![ben]);
        assert_eq!(db.friends_of(ben).unwrap(), vec![ana]);
        assert!(db.get_friend_request(request.id).unwrap().is_none());
        assert!(db.get_notifications(ben).unwrap().is_empty());
    }

    #[test]
    fn only_the_receiver_can_accept() {
        let db = db();
        let ana = user(&db, "ana");
        let ben = user(&db, "ben");
        let (request, _) = db.create_friend_request(ana, ben).unwrap();

        let err = db.accept_friend_request(request.id, ana).unwrap_err();
        assert!(matches!(err, StoreError::Forbidden(_)));
    }

    #[test]
    fn unfriend_removes_the_edge_for_both_sides() {
        let db = db();
        let ana = user(&db, "ana");
        let ben = user(&db, "ben");
        befriend(&db, ana, ben);

        db.unfriend(ben, ana).unwrap();
        assert!(db.friends_of(ana).unwrap().is_empty());
        assert!(matches!(db.unfriend(ana, ben).unwrap_err(), StoreError::NotFound(_)));
    }

    #[test]
    fn request_views_show_the_counterpart() {
        let db = db();
        let ana = user(&db, "ana");
        let ben = user(&db, "ben");
        db.create_friend_request(ana, ben).unwrap();

        let incoming = db.get_friend_requests(ben, 1).unwrap();
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming[0].user.id, ana);

        let sent = db.get_sent_friend_requests(ana, 1).unwrap();
        assert_eq!(sent[0].user.id, ben);
    }
}
