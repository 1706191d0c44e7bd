use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Smallest poll frequency a feed may be stored with (10 minutes).
pub const MINIMUM_FREQUENCY_SECS: u64 = 10 * 60;

/// Raise a requested poll frequency to the floor.
pub fn clamp_frequency(secs: u64) -> u64 {
    secs.max(MINIMUM_FREQUENCY_SECS)
}

/// Public view of an account. The verification token never leaves the
/// server, so it has no field here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub id: Uuid,
    #[serde(rename = "addr", with = "serde_bytes")]
    pub address: [u8; 20],
    pub email: String,
    pub email_verified: bool,
}

/// A feed subscription as it travels over the wire.
///
/// Add/edit requests only need to carry the user-editable fields, so
/// everything else falls back to its default when absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Feed {
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub id: Uuid,
    #[serde(rename = "owner_id", default)]
    pub owner: Uuid,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "feed_url")]
    pub url: String,
    /// Poll frequency in seconds.
    #[serde(default)]
    pub frequency: u64,
    #[serde(default)]
    pub last_fetched: DateTime<Utc>,
}
