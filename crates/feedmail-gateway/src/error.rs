use feedmail_types::ErrorCode;
use feedmail_types::api::ErrorMessage;
use tracing::error;

use crate::locale::{Localizer, MessageKey};

/// A request that failed with a client-visible code and message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code:?}: {message}")]
pub struct RequestError {
    pub code: ErrorCode,
    pub message: String,
}

impl RequestError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn localized(code: ErrorCode, localizer: &Localizer, key: MessageKey) -> Self {
        Self::new(code, localizer.text(key))
    }

    /// Log `err` and hide it behind the generic internal-error text.
    pub fn internal(localizer: &Localizer, err: &anyhow::Error) -> Self {
        error!("Internal error while serving request: {:#}", err);
        Self::localized(ErrorCode::Internal, localizer, MessageKey::Internal)
    }

    pub fn to_payload(&self) -> ErrorMessage {
        ErrorMessage {
            code: self.code,
            message: self.message.clone(),
        }
    }
}
