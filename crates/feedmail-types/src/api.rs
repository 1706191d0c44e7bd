use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Feed, User};
use crate::protocol::ErrorCode;

// -- Handshake --

/// First message of every session: the address the client claims to control.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializationRequest {
    #[serde(with = "serde_bytes")]
    pub address: [u8; 20],
    #[serde(default)]
    pub locale: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializationResponse {
    pub user_found: bool,
    #[serde(with = "serde_bytes")]
    pub challenge: Vec<u8>,
}

/// Sent by a client whose address is unknown: proves the address and
/// registers an email for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUserInitialization {
    pub email: String,
    #[serde(with = "serde_bytes")]
    pub signature: [u8; 65],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrdinaryInitialization {
    #[serde(with = "serde_bytes")]
    pub signature: [u8; 65],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Welcome {
    pub logged_in: bool,
    pub message: String,
    pub user: User,
}

// -- Email verification --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyEmailRequest {
    #[serde(with = "serde_bytes")]
    pub token: [u8; 32],
}

// -- Feeds --

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListFeedsRequest {
    #[serde(default)]
    pub sort: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListFeedsResponse {
    pub count: u64,
    pub feeds: Vec<Feed>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteFeedRequest {
    pub id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteFeedResponse {
    pub deleted_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdatedFeedResponse {
    pub modified_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenericIdResponse {
    pub ok: bool,
    pub id: Uuid,
}

// -- Errors --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub code: ErrorCode,
    #[serde(default)]
    pub message: String,
}
