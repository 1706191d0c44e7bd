use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use feedmail_types::Feed;
use rusqlite::types::{Type, Value};
use rusqlite::{Connection, Row, params, params_from_iter};
use uuid::Uuid;

use crate::Database;
use crate::models::{FeedOrder, FeedWithOwner, SeenItemRow, UserRow, UserUpdate};

const USER_COLUMNS: &str = "id, address, email, email_verified, verification_token, \
                            email_verification_last, created_at, updated_at";

const FEED_COLUMNS: &str =
    "id, owner_id, name, url, frequency_secs, last_fetched, created_at, updated_at";

impl Database {
    // -- Users --

    pub fn create_user(&self, user: &UserRow) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                &format!("INSERT INTO users ({USER_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
                params![
                    user.id.to_string(),
                    &user.address[..],
                    user.email,
                    user.email_verified,
                    &user.verification_token[..],
                    user.email_verification_last.map(format_ts),
                    format_ts(user.created_at),
                    format_ts(user.updated_at),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_address(&self, address: &[u8; 20]) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE address = ?1"),
                [&address[..]],
                |row| user_at(row, 0),
            )
            .optional()
        })
    }

    pub fn get_user_by_id(&self, id: Uuid) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                [id.to_string()],
                |row| user_at(row, 0),
            )
            .optional()
        })
    }

    pub fn count_users_with_email(&self, email: &str) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM users WHERE email = ?1", [email], |r| r.get(0))?;
            Ok(count as u64)
        })
    }

    /// Apply the set fields of `update` and bump `updated_at`.
    /// Returns the number of rows touched (0 when the user does not exist).
    pub fn update_user(&self, id: Uuid, update: &UserUpdate, now: DateTime<Utc>) -> Result<usize> {
        let mut sets = vec!["updated_at = ?1".to_string()];
        let mut values = vec![Value::Text(format_ts(now))];

        if let Some(verified) = update.email_verified {
            values.push(Value::Integer(verified as i64));
            sets.push(format!("email_verified = ?{}", values.len()));
        }
        if let Some(last) = update.email_verification_last {
            values.push(Value::Text(format_ts(last)));
            sets.push(format!("email_verification_last = ?{}", values.len()));
        }
        values.push(Value::Text(id.to_string()));
        let sql = format!("UPDATE users SET {} WHERE id = ?{}", sets.join(", "), values.len());

        self.with_conn(|conn| Ok(conn.execute(&sql, params_from_iter(values.iter()))?))
    }

    // -- Feeds --

    pub fn insert_feed(&self, feed: &Feed) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                &format!("INSERT INTO feeds ({FEED_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
                params![
                    feed.id.to_string(),
                    feed.owner.to_string(),
                    feed.name,
                    feed.url,
                    feed.frequency as i64,
                    format_ts(feed.last_fetched),
                    format_ts(feed.created_at),
                    format_ts(feed.updated_at),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_feed(&self, id: Uuid) -> Result<Option<Feed>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {FEED_COLUMNS} FROM feeds WHERE id = ?1"),
                [id.to_string()],
                |row| feed_at(row, 0),
            )
            .optional()
        })
    }

    /// Owner-scoped edit of the user-editable fields. Returns rows modified.
    pub fn update_feed(
        &self,
        id: Uuid,
        owner: Uuid,
        name: &str,
        url: &str,
        frequency_secs: u64,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE feeds SET name = ?1, url = ?2, frequency_secs = ?3, updated_at = ?4
                 WHERE id = ?5 AND owner_id = ?6",
                params![
                    name,
                    url,
                    frequency_secs as i64,
                    format_ts(now),
                    id.to_string(),
                    owner.to_string()
                ],
            )?;
            Ok(changed)
        })
    }

    /// Owner-scoped delete. Returns rows deleted.
    pub fn delete_feed(&self, id: Uuid, owner: Uuid) -> Result<usize> {
        self.with_conn(|conn| {
            let deleted = conn.execute(
                "DELETE FROM feeds WHERE id = ?1 AND owner_id = ?2",
                [id.to_string(), owner.to_string()],
            )?;
            Ok(deleted)
        })
    }

    pub fn feeds_by_owner(&self, owner: Uuid, order: FeedOrder) -> Result<Vec<Feed>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {FEED_COLUMNS} FROM feeds WHERE owner_id = ?1 ORDER BY {}",
                order.sql()
            ))?;
            let feeds = stmt
                .query_map([owner.to_string()], |row| feed_at(row, 0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(feeds)
        })
    }

    pub fn count_feeds(&self) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM feeds", [], |r| r.get(0))?;
            Ok(count as u64)
        })
    }

    /// One page of feeds in insertion order, each joined to its owner.
    pub fn feeds_with_owners(&self, offset: u64, limit: u64) -> Result<Vec<FeedWithOwner>> {
        self.with_conn(|conn| query_feeds_with_owners(conn, offset, limit))
    }

    pub fn set_last_fetched(&self, id: Uuid, at: DateTime<Utc>) -> Result<usize> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE feeds SET last_fetched = ?1 WHERE id = ?2",
                [format_ts(at), id.to_string()],
            )?;
            Ok(changed)
        })
    }

    // -- Seen items --

    pub fn count_seen_items(&self, feed_id: Uuid, guid: &str) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM seen_items WHERE feed_id = ?1 AND guid = ?2",
                params![feed_id.to_string(), guid],
                |r| r.get(0),
            )?;
            Ok(count as u64)
        })
    }

    pub fn insert_seen_item(&self, item: &SeenItemRow) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO seen_items (id, feed_id, guid, timestamp) VALUES (?1, ?2, ?3, ?4)",
                params![
                    item.id.to_string(),
                    item.feed_id.to_string(),
                    item.guid,
                    format_ts(item.timestamp)
                ],
            )?;
            Ok(())
        })
    }
}

fn query_feeds_with_owners(conn: &Connection, offset: u64, limit: u64) -> Result<Vec<FeedWithOwner>> {
    let mut stmt = conn.prepare(
        "SELECT f.id, f.owner_id, f.name, f.url, f.frequency_secs, f.last_fetched, f.created_at, f.updated_at,
                u.id, u.address, u.email, u.email_verified, u.verification_token,
                u.email_verification_last, u.created_at, u.updated_at
         FROM feeds f
         LEFT JOIN users u ON u.id = f.owner_id
         ORDER BY f.rowid
         LIMIT ?1 OFFSET ?2",
    )?;

    let rows = stmt
        .query_map(params![limit as i64, offset as i64], |row| {
            let owner_id: Option<String> = row.get(8)?;
            let owner = match owner_id {
                Some(_) => Some(user_at(row, 8)?),
                None => None,
            };
            Ok(FeedWithOwner {
                feed: feed_at(row, 0)?,
                owner,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn user_at(row: &Row<'_>, base: usize) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: uuid_col(row, base)?,
        address: bytes_col(row, base + 1)?,
        email: row.get(base + 2)?,
        email_verified: row.get(base + 3)?,
        verification_token: bytes_col(row, base + 4)?,
        email_verification_last: match row.get::<_, Option<String>>(base + 5)? {
            Some(raw) => Some(parse_ts(base + 5, &raw)?),
            None => None,
        },
        created_at: ts_col(row, base + 6)?,
        updated_at: ts_col(row, base + 7)?,
    })
}

fn feed_at(row: &Row<'_>, base: usize) -> rusqlite::Result<Feed> {
    Ok(Feed {
        id: uuid_col(row, base)?,
        owner: uuid_col(row, base + 1)?,
        name: row.get(base + 2)?,
        url: row.get(base + 3)?,
        frequency: row.get::<_, i64>(base + 4)? as u64,
        last_fetched: ts_col(row, base + 5)?,
        created_at: ts_col(row, base + 6)?,
        updated_at: ts_col(row, base + 7)?,
    })
}

/// Fixed-width RFC 3339 so lexical order in SQL matches time order.
fn format_ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_ts(idx, &raw)
}

fn uuid_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn bytes_col<const N: usize>(row: &Row<'_>, idx: usize) -> rusqlite::Result<[u8; N]> {
    let raw: Vec<u8> = row.get(idx)?;
    raw.try_into().map_err(|raw: Vec<u8>| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Blob,
            format!("expected {} bytes, got {}", N, raw.len()).into(),
        )
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
