//! Authenticated request handlers. Each takes the decoded payload and
//! returns the response payload or a client-visible error.

pub mod email;
pub mod feeds;

use feedmail_db::UserRow;

use crate::error::RequestError;
use crate::state::{GatewayState, SessionContext};

/// The session's own user row, freshly read.
pub(crate) async fn current_user(
    state: &GatewayState,
    ctx: &SessionContext,
) -> Result<UserRow, RequestError> {
    let id = ctx.user_id;
    state
        .db
        .call(move |db| db.get_user_by_id(id))
        .await
        .map_err(|e| RequestError::internal(&ctx.localizer, &e))?
        .ok_or_else(|| {
            RequestError::internal(
                &ctx.localizer,
                &anyhow::anyhow!("user {} vanished during session", id),
            )
        })
}
