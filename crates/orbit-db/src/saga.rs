//! Account deletion and recovery as an explicit saga.
//!
//! Deleting an account stamps `deleted_at` on the user row first, then on
//! every dependent row, one `(table, column)` step at a time. The stamp is
//! what ties the steps together: recovery clears `deleted_at` only where it
//! equals the user's stamp, so rows that were deleted independently stay
//! deleted. Every step is idempotent, so a failed run can simply be repeated.

use std::thread;
use std::time::Duration;

use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{OptionalExt, now};
use crate::{Database, Result, StoreError};

const MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupStep {
    pub table: &'static str,
    pub column: &'static str,
}

const fn step(table: &'static str, column: &'static str) -> CleanupStep {
    CleanupStep { table, column }
}

/// Dependent rows, in deletion order. Recovery walks this list backwards.
pub const CLEANUP_STEPS: &[CleanupStep] = &[
    step("posts", "poster_id"),
    step("comments", "commentator_id"),
    step("post_reactions", "user_id"),
    step("comment_reactions", "user_id"),
    step("message_reactions", "user_id"),
    step("messages", "sender_id"),
    step("conversation_participants", "user_id"),
    step("friend_requests", "sender_id"),
    step("friend_requests", "receiver_id"),
    step("relationships", "user1_id"),
    step("relationships", "user2_id"),
    step("notifications", "user_id"),
    step("notifications", "actor_id"),
];

/// Outcome of a saga run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SagaReport {
    pub user_id: Uuid,
    pub stamp: String,
    /// Dependent rows changed by this run, not counting the user row.
    pub rows: usize,
}

impl Database {
    /// Soft-deletes the account and everything it owns. Re-running after a
    /// partial failure reuses the original stamp.
    pub fn soft_delete_account(&self, user_id: Uuid) -> Result<SagaReport> {
        let stamp = match self.account_stamp(user_id)? {
            Some(existing) => existing,
            None => {
                let stamp = now();
                self.run_step("users", || {
                    self.with_conn(|conn| {
                        Ok(conn.execute(
                            "UPDATE users SET deleted_at = ?2 WHERE id = ?1 AND deleted_at IS NULL",
                            [user_id.to_string(), stamp.clone()],
                        )?)
                    })
                })?;
                stamp
            }
        };

        let mut rows = 0;
        for s in CLEANUP_STEPS {
            let sql = format!(
                "UPDATE {} SET deleted_at = ?2 WHERE {} = ?1 AND deleted_at IS NULL",
                s.table, s.column
            );
            rows += self.run_step(s.table, || {
                self.with_conn(|conn| Ok(conn.execute(&sql, [user_id.to_string(), stamp.clone()])?))
            })?;
        }

        info!("Soft-deleted account {} ({} dependent rows)", user_id, rows);
        Ok(SagaReport { user_id, stamp, rows })
    }

    /// Restores exactly the rows stamped by `soft_delete_account`. The user
    /// row is restored last, so an interrupted recovery can be re-run.
    pub fn recover_account(&self, user_id: Uuid) -> Result<SagaReport> {
        let stamp = self
            .account_stamp(user_id)?
            .ok_or_else(|| StoreError::Invalid(format!("account {} is not deleted", user_id)))?;

        let mut rows = 0;
        for s in CLEANUP_STEPS.iter().rev() {
            let sql = format!(
                "UPDATE {} SET deleted_at = NULL WHERE {} = ?1 AND deleted_at = ?2",
                s.table, s.column
            );
            rows += self.run_step(s.table, || {
                self.with_conn(|conn| Ok(conn.execute(&sql, [user_id.to_string(), stamp.clone()])?))
            })?;
        }

        self.run_step("users", || {
            self.with_conn(|conn| {
                Ok(conn.execute(
                    "UPDATE users SET deleted_at = NULL WHERE id = ?1 AND deleted_at = ?2",
                    [user_id.to_string(), stamp.clone()],
                )?)
            })
        })?;

        info!("Recovered account {} ({} dependent rows)", user_id, rows);
        Ok(SagaReport { user_id, stamp, rows })
    }

    /// The saga stamp, or None for a live account.
    fn account_stamp(&self, user_id: Uuid) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let row: Option<Option<String>> = conn
                .query_row(
                    "SELECT deleted_at FROM users WHERE id = ?1",
                    [user_id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            row.ok_or_else(|| StoreError::NotFound(format!("user {}", user_id)))
        })
    }

    fn run_step<F>(&self, table: &str, mut f: F) -> Result<usize>
    where
        F: FnMut() -> Result<usize>,
    {
        let mut attempt = 1;
        loop {
            match f() {
                Ok(n) => return Ok(n),
                Err(e) if attempt < MAX_ATTEMPTS && is_retryable(&e) => {
                    warn!("Saga step on {} failed (attempt {}): {}", table, attempt, e);
                    thread::sleep(Duration::from_millis(50 * u64::from(attempt)));
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn is_retryable(err: &StoreError) -> bool {
    matches!(err, StoreError::Sqlite(_))
}
