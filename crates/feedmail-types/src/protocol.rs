use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Request-type ids carried in the second word of every request header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    ListFeeds,
    AddFeed,
    EditFeed,
    RemoveFeed,
    DeleteFeed,
    EmailVerification,
    EmailAgain,
}

impl RequestKind {
    pub fn from_id(id: u32) -> Option<Self> {
        match id {
            0x0010 => Some(Self::ListFeeds),
            0x0011 => Some(Self::AddFeed),
            0x0012 => Some(Self::EditFeed),
            0x0013 => Some(Self::RemoveFeed),
            0x0014 => Some(Self::DeleteFeed),
            0x0020 => Some(Self::EmailVerification),
            0x0021 => Some(Self::EmailAgain),
            _ => None,
        }
    }
}

/// Error codes sent in the `code` field of an error payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Unspecified,
    WhileDecoding,
    InvalidInputs,
    InvalidSignature,
    Internal,
}

impl ErrorCode {
    pub fn as_u32(self) -> u32 {
        match self {
            Self::Unspecified => 0x0000,
            Self::WhileDecoding => 0x0010,
            Self::InvalidInputs => 0x0011,
            Self::InvalidSignature => 0x0012,
            Self::Internal => 0x0101,
        }
    }

    /// Unknown codes collapse to `Unspecified`.
    pub fn from_u32(code: u32) -> Self {
        match code {
            0x0010 => Self::WhileDecoding,
            0x0011 => Self::InvalidInputs,
            0x0012 => Self::InvalidSignature,
            0x0101 => Self::Internal,
            _ => Self::Unspecified,
        }
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.as_u32())
    }
}

impl<'de> Deserialize<'de> for ErrorCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        u32::deserialize(deserializer).map(Self::from_u32)
    }
}
