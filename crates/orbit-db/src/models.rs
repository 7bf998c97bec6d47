//! Row decoding helpers and write-side inputs.
//!
//! IDs are stored as hyphenated TEXT and timestamps as RFC 3339 TEXT with
//! microsecond precision, so lexical order equals chronological order.

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::Row;
use rusqlite::types::Type;
use uuid::Uuid;

use orbit_types::models::{ConversationType, ParticipantRole, UnknownVariant, UserSummary};

pub(crate) fn now() -> String {
    timestamp().1
}

/// Current time truncated to what the store keeps, with its TEXT form.
pub(crate) fn timestamp() -> (DateTime<Utc>, String) {
    let at = Utc::now().trunc_subsecs(6);
    (at, at.to_rfc3339_opts(SecondsFormat::Micros, true))
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

pub(crate) fn uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let text: String = row.get(idx)?;
    text.parse().map_err(|e| conversion_error(idx, e))
}

pub(crate) fn opt_uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| t.parse().map_err(|e| conversion_error(idx, e)))
        .transpose()
}

pub(crate) fn time_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

pub(crate) fn opt_time_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| {
        DateTime::parse_from_rfc3339(&t)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| conversion_error(idx, e))
    })
    .transpose()
}

pub(crate) fn enum_at<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = UnknownVariant>,
{
    let text: String = row.get(idx)?;
    text.parse().map_err(|e| conversion_error(idx, e))
}

pub(crate) fn role_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<ParticipantRole> {
    let text: Option<String> = row.get(idx)?;
    ParticipantRole::from_db(text.as_deref()).map_err(|e| conversion_error(idx, e))
}

/// Reads `id, first_name, last_name, avatar` starting at `start`.
pub(crate) fn summary_at(row: &Row<'_>, start: usize) -> rusqlite::Result<UserSummary> {
    Ok(UserSummary {
        id: uuid_at(row, start)?,
        first_name: row.get(start + 1)?,
        last_name: row.get(start + 2)?,
        avatar: row.get(start + 3)?,
    })
}

/// Input for `Database::create_conversation`.
#[derive(Debug, Clone)]
pub struct NewConversation {
    pub kind: ConversationType,
    pub name: Option<String>,
    pub avatar: Option<String>,
    pub participants: Vec<NewParticipant>,
}

#[derive(Debug, Clone, Copy)]
pub struct NewParticipant {
    pub user_id: Uuid,
    pub role: ParticipantRole,
}

impl NewConversation {
    /// Private conversation between two users; neither carries a role.
    pub fn private(a: Uuid, b: Uuid) -> Self {
        Self {
            kind: ConversationType::Private,
            name: None,
            avatar: None,
            participants: vec![
                NewParticipant { user_id: a, role: ParticipantRole::None },
                NewParticipant { user_id: b, role: ParticipantRole::None },
            ],
        }
    }

    /// Group conversation created by `admin` with `members` as plain members.
    pub fn group(name: Option<String>, avatar: Option<String>, admin: Uuid, members: &[Uuid]) -> Self {
        let mut participants = vec![NewParticipant { user_id: admin, role: ParticipantRole::Admin }];
        participants.extend(
            members
                .iter()
                .filter(|id| **id != admin)
                .map(|&user_id| NewParticipant { user_id, role: ParticipantRole::Member }),
        );
        Self {
            kind: ConversationType::Group,
            name,
            avatar,
            participants,
        }
    }
}

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> rusqlite::Result<Option<T>>;
}

impl<T> OptionalExt<T> for rusqlite::Result<T> {
    fn optional(self) -> rusqlite::Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
