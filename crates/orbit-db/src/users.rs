use rusqlite::{Connection, Row};
use uuid::Uuid;

use orbit_types::models::{User, UserRole, UserSummary};

use crate::models::{OptionalExt, enum_at, now, opt_time_at, summary_at, time_at, uuid_at};
use crate::{Database, Result, StoreError};

const USER_COLUMNS: &str =
    "id, username, first_name, last_name, avatar, role, is_active, created_at, deleted_at, password";

/// A user row together with its password hash, for credential checks.
pub struct UserWithPassword {
    pub user: User,
    pub password_hash: String,
}

impl Database {
    pub fn create_user(
        &self,
        username: &str,
        password_hash: &str,
        first_name: &str,
        last_name: &str,
    ) -> Result<User> {
        self.with_tx(|conn| {
            let taken: Option<String> = conn
                .query_row("SELECT id FROM users WHERE username = ?1", [username], |row| row.get(0))
                .optional()?;
            if taken.is_some() {
                return Err(StoreError::Conflict(format!("username '{}' is taken", username)));
            }

            let id = Uuid::new_v4();
            conn.execute(
                "INSERT INTO users (id, username, password, first_name, last_name, role, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    id.to_string(),
                    username,
                    password_hash,
                    first_name,
                    last_name,
                    UserRole::User.as_str(),
                    now()
                ],
            )?;

            query_user(conn, id)?.ok_or_else(|| StoreError::NotFound(format!("user {}", id)))
        })
    }

    pub fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        self.with_conn(|conn| query_user(conn, id))
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserWithPassword>> {
        self.with_conn(|conn| query_user_with_password(conn, username, false))
    }

    /// Finds a soft-deleted account, for the recovery flow.
    pub fn get_deleted_user_by_username(&self, username: &str) -> Result<Option<UserWithPassword>> {
        self.with_conn(|conn| query_user_with_password(conn, username, true))
    }

    pub fn user_summary(&self, id: Uuid) -> Result<UserSummary> {
        self.with_conn(|conn| query_summary(conn, id))
    }

    /// Lock or unlock an account.
    pub fn set_user_active(&self, id: Uuid, is_active: bool) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET is_active = ?2 WHERE id = ?1 AND deleted_at IS NULL",
                rusqlite::params![id.to_string(), is_active],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("user {}", id)));
            }
            Ok(())
        })
    }

    pub fn set_user_role(&self, id: Uuid, role: UserRole) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET role = ?2 WHERE id = ?1 AND deleted_at IS NULL",
                [id.to_string(), role.as_str().to_string()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("user {}", id)));
            }
            Ok(())
        })
    }

    /// True only for an existing, active, non-deleted account.
    pub fn is_user_active(&self, id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let active: Option<bool> = conn
                .query_row(
                    "SELECT is_active FROM users WHERE id = ?1 AND deleted_at IS NULL",
                    [id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(active.unwrap_or(false))
        })
    }
}

pub(crate) fn query_summary(conn: &Connection, id: Uuid) -> Result<UserSummary> {
    conn.query_row(
        "SELECT id, first_name, last_name, avatar FROM users WHERE id = ?1",
        [id.to_string()],
        |row| summary_at(row, 0),
    )
    .optional()?
    .ok_or_else(|| StoreError::NotFound(format!("user {}", id)))
}

/// Fails with NotFound unless the user exists and is not deleted.
pub(crate) fn ensure_user(conn: &Connection, id: Uuid) -> Result<()> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM users WHERE id = ?1 AND deleted_at IS NULL",
            [id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    found
        .map(|_| ())
        .ok_or_else(|| StoreError::NotFound(format!("user {}", id)))
}

fn query_user(conn: &Connection, id: Uuid) -> Result<Option<User>> {
    let sql = format!("SELECT {} FROM users WHERE id = ?1 AND deleted_at IS NULL", USER_COLUMNS);
    Ok(conn.query_row(&sql, [id.to_string()], user_from_row).optional()?)
}

fn query_user_with_password(
    conn: &Connection,
    username: &str,
    deleted: bool,
) -> Result<Option<UserWithPassword>> {
    let filter = if deleted { "deleted_at IS NOT NULL" } else { "deleted_at IS NULL" };
    let sql = format!("SELECT {} FROM users WHERE username = ?1 AND {}", USER_COLUMNS, filter);

    let row = conn
        .query_row(&sql, [username], |row| {
            Ok(UserWithPassword {
                user: user_from_row(row)?,
                password_hash: row.get(9)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: uuid_at(row, 0)?,
        username: row.get(1)?,
        first_name: row.get(2)?,
        last_name: row.get(3)?,
        avatar: row.get(4)?,
        role: enum_at(row, 5)?,
        is_active: row.get(6)?,
        created_at: time_at(row, 7)?,
        deleted_at: opt_time_at(row, 8)?,
    })
}

#[cfg(test)]
mod tests {
    use crate::StoreError;
    use crate::test_support::db;

    #[test]
    fn duplicate_username_is_a_conflict() {
        let db = db();
        db.create_user("ana", "h", "Ana", "Lee").unwrap();
        let err = db.create_user("ana", "h", "Ana", "Other").unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn locking_an_account_makes_it_inactive() {
        let db = db();
        let user = db.create_user("ana", "h", "Ana", "Lee").unwrap();
        assert!(db.is_user_active(user.id).unwrap());

        db.set_user_active(user.id, false).unwrap();
        assert!(!db.is_user_active(user.id).unwrap());
        assert!(!db.get_user(user.id).unwrap().unwrap().is_active);
    }

    #[test]
    fn lookup_by_username_returns_the_hash() {
        let db = db();
        db.create_user("ana", "argon-hash", "Ana", "Lee").unwrap();
        let found = db.get_user_by_username("ana").unwrap().unwrap();
        assert_eq!(found.password_hash, "argon-hash");
        assert!(db.get_deleted_user_by_username("ana").unwrap().is_none());
    }

    #[test]
    fn promoting_to_admin() {
        let db = db();
        let user = db.create_user("ana", "h", "Ana", "Lee").unwrap();
        db.set_user_role(user.id, orbit_types::models::UserRole::Admin).unwrap();
        assert_eq!(db.get_user(user.id).unwrap().unwrap().role, orbit_types::models::UserRole::Admin);
    }
}
