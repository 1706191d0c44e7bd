/// Database row types. `UserRow` is distinct from the wire `User` because
/// it carries the verification token, which never leaves the server.
use chrono::{DateTime, Utc};
use feedmail_types::{Feed, User};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct UserRow {
    pub id: Uuid,
    pub address: [u8; 20],
    pub email: String,
    pub email_verified: bool,
    pub verification_token: [u8; 32],
    pub email_verification_last: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserRow {
    pub fn public(&self) -> User {
        User {
            created_at: self.created_at,
            updated_at: self.updated_at,
            id: self.id,
            address: self.address,
            email: self.email.clone(),
            email_verified: self.email_verified,
        }
    }
}

/// Partial update applied by `Database::update_user`. `None` leaves the
/// column untouched.
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub email_verified: Option<bool>,
    pub email_verification_last: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeenItemRow {
    pub id: Uuid,
    pub feed_id: Uuid,
    pub guid: String,
    pub timestamp: DateTime<Utc>,
}

/// One row of the paged feeds ⋈ users scan. `owner` is `None` for an
/// orphaned feed.
#[derive(Debug, Clone)]
pub struct FeedWithOwner {
    pub feed: Feed,
    pub owner: Option<UserRow>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeedOrder {
    #[default]
    Oldest,
    Newest,
    Name,
}

impl FeedOrder {
    /// Unknown sort codes fall back to oldest-first.
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => Self::Newest,
            2 => Self::Name,
            _ => Self::Oldest,
        }
    }

    pub(crate) fn sql(self) -> &'static str {
        match self {
            Self::Oldest => "created_at ASC",
            Self::Newest => "created_at DESC",
            Self::Name => "name COLLATE NOCASE ASC, created_at ASC",
        }
    }
}
