use rusqlite::{Connection, Row};
use uuid::Uuid;

use orbit_types::models::{Comment, Post, PostVisibility};

use crate::models::{OptionalExt, enum_at, now, opt_uuid_at, time_at, timestamp, uuid_at};
use crate::users::ensure_user;
use crate::{Database, Result, StoreError};

/// Input for `Database::create_comment`.
#[derive(Debug, Clone, Default)]
pub struct NewComment {
    pub content: Option<String>,
    pub image: Option<String>,
    pub parent_comment_id: Option<Uuid>,
}

impl Database {
    pub fn create_post(&self, poster_id: Uuid, content: Option<String>, visibility: PostVisibility) -> Result<Post> {
        self.with_tx(|conn| {
            ensure_user(conn, poster_id)?;

            let id = Uuid::new_v4();
            let (created_at, created_text) = timestamp();
            conn.execute(
                "INSERT INTO posts (id, poster_id, visibility, content, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![id.to_string(), poster_id.to_string(), visibility.as_str(), content, created_text],
            )?;

            Ok(Post {
                id,
                poster_id,
                visibility,
                content,
                created_at,
            })
        })
    }

    pub fn get_post(&self, id: Uuid) -> Result<Option<Post>> {
        self.with_conn(|conn| query_post(conn, id))
    }

    /// Comments on a post in creation order, replies included.
    pub fn get_comments(&self, post_id: Uuid) -> Result<Vec<Comment>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, post_id, commentator_id, parent_comment_id, content, image, created_at
                 FROM comments WHERE post_id = ?1 AND deleted_at IS NULL
                 ORDER BY created_at, rowid",
            )?;

            let rows = stmt
                .query_map([post_id.to_string()], comment_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Adds a comment, or a reply when `parent_comment_id` is set. A reply's
    /// parent must belong to the same post.
    pub fn create_comment(&self, post_id: Uuid, commentator_id: Uuid, new: NewComment) -> Result<Comment> {
        if new.content.as_deref().is_none_or(str::is_empty) && new.image.is_none() {
            return Err(StoreError::Invalid("a comment needs content or an image".into()));
        }

        self.with_tx(|conn| {
            ensure_user(conn, commentator_id)?;
            query_post(conn, post_id)?.ok_or_else(|| StoreError::NotFound(format!("post {}", post_id)))?;

            if let Some(parent_id) = new.parent_comment_id {
                let parent = query_comment(conn, parent_id)?
                    .ok_or_else(|| StoreError::NotFound(format!("comment {}", parent_id)))?;
                if parent.post_id != post_id {
                    return Err(StoreError::Invalid("reply must belong to the same post".into()));
                }
            }

            let id = Uuid::new_v4();
            let (created_at, created_text) = timestamp();
            conn.execute(
                "INSERT INTO comments (id, post_id, commentator_id, parent_comment_id, content, image, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    id.to_string(),
                    post_id.to_string(),
                    commentator_id.to_string(),
                    new.parent_comment_id.map(|p| p.to_string()),
                    new.content,
                    new.image,
                    created_text
                ],
            )?;

            Ok(Comment {
                id,
                post_id,
                commentator_id,
                parent_comment_id: new.parent_comment_id,
                content: new.content.clone(),
                image: new.image.clone(),
                created_at,
            })
        })
    }

    pub fn get_comment(&self, id: Uuid) -> Result<Option<Comment>> {
        self.with_conn(|conn| query_comment(conn, id))
    }

    pub fn soft_delete_post(&self, id: Uuid, owner_id: Uuid) -> Result<()> {
        self.with_conn(|conn| {
            require_owner(conn, id, owner_id, "deleted_at IS NULL")?;
            conn.execute(
                "UPDATE posts SET deleted_at = ?2 WHERE id = ?1",
                [id.to_string(), now()],
            )?;
            Ok(())
        })
    }

    pub fn recover_post(&self, id: Uuid, owner_id: Uuid) -> Result<Post> {
        self.with_conn(|conn| {
            require_owner(conn, id, owner_id, "deleted_at IS NOT NULL")?;
            conn.execute("UPDATE posts SET deleted_at = NULL WHERE id = ?1", [id.to_string()])?;
            query_post(conn, id)?.ok_or_else(|| StoreError::NotFound(format!("post {}", id)))
        })
    }
}

fn require_owner(conn: &Connection, id: Uuid, owner_id: Uuid, state: &str) -> Result<()> {
    let sql = format!("SELECT poster_id FROM posts WHERE id = ?1 AND {}", state);
    let poster: Uuid = conn
        .query_row(&sql, [id.to_string()], |row| uuid_at(row, 0))
        .optional()?
        .ok_or_else(|| StoreError::NotFound(format!("post {}", id)))?;

    if poster != owner_id {
        return Err(StoreError::Forbidden("only the author can change this post".into()));
    }
    Ok(())
}

fn query_post(conn: &Connection, id: Uuid) -> Result<Option<Post>> {
    Ok(conn
        .query_row(
            "SELECT id, poster_id, visibility, content, created_at FROM posts WHERE id = ?1 AND deleted_at IS NULL",
            [id.to_string()],
            |row: &Row<'_>| {
                Ok(Post {
                    id: uuid_at(row, 0)?,
                    poster_id: uuid_at(row, 1)?,
                    visibility: enum_at(row, 2)?,
                    content: row.get(3)?,
                    created_at: time_at(row, 4)?,
                })
            },
        )
        .optional()?)
}

fn query_comment(conn: &Connection, id: Uuid) -> Result<Option<Comment>> {
    Ok(conn
        .query_row(
            "SELECT id, post_id, commentator_id, parent_comment_id, content, image, created_at
             FROM comments WHERE id = ?1 AND deleted_at IS NULL",
            [id.to_string()],
            comment_from_row,
        )
        .optional()?)
}

fn comment_from_row(row: &Row<'_>) -> rusqlite::Result<Comment> {
    Ok(Comment {
        id: uuid_at(row, 0)?,
        post_id: uuid_at(row, 1)?,
        commentator_id: uuid_at(row, 2)?,
        parent_comment_id: opt_uuid_at(row, 3)?,
        content: row.get(4)?,
        image: row.get(5)?,
        created_at: time_at(row, 6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{db, user};

    #[test]
    fn reply_must_belong_to_the_same_post() {
        let db = db();
        let ana = user(&db, "ana");
        let first = db.create_post(ana, Some("one".into()), PostVisibility::Friend).unwrap();
        let second = db.create_post(ana, Some("two".into()), PostVisibility::Public).unwrap();

        let comment = db
            .create_comment(first.id, ana, NewComment { content: Some("nice".into()), ..Default::default() })
            .unwrap();

        let reply = db
            .create_comment(
                first.id,
                ana,
                NewComment {
                    content: Some("thanks".into()),
                    parent_comment_id: Some(comment.id),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(reply.parent_comment_id, Some(comment.id));
        assert_eq!(db.get_comments(first.id).unwrap().len(), 2);

        let err = db
            .create_comment(
                second.id,
                ana,
                NewComment {
                    content: Some("wrong post".into()),
                    parent_comment_id: Some(comment.id),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));
    }

    #[test]
    fn empty_comment_is_rejected() {
        let db = db();
        let ana = user(&db, "ana");
        let post = db.create_post(ana, None, PostVisibility::Friend).unwrap();
        let err = db.create_comment(post.id, ana, NewComment::default()).unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));
    }

    #[test]
    fn only_the_owner_can_delete_and_recover() {
        let db = db();
        let ana = user(&db, "ana");
        let ben = user(&db, "ben");
        let post = db.create_post(ana, Some("mine".into()), PostVisibility::Friend).unwrap();

        assert!(matches!(db.soft_delete_post(post.id, ben).unwrap_err(), StoreError::Forbidden(_)));

        db.soft_delete_post(post.id, ana).unwrap();
        assert!(db.get_post(post.id).unwrap().is_none());

        let recovered = db.recover_post(post.id, ana).unwrap();
        assert_eq!(recovered.id, post.id);
        assert!(db.get_post(post.id).unwrap().is_some());
    }
}
