use chrono::{TimeDelta, Utc};
use tracing::{info, warn};

use feedmail_crypto::tokens_match;
use feedmail_db::{UserRow, UserUpdate};
use feedmail_mail::OutgoingEmail;
use feedmail_types::ErrorCode;
use feedmail_types::api::{GenericIdResponse, VerifyEmailRequest};

use crate::error::RequestError;
use crate::handlers::current_user;
use crate::locale::{Localizer, MessageKey};
use crate::state::{GatewayState, SessionContext};

/// Minimum gap in seconds between two verification emails to the same user.
pub const RESEND_INTERVAL_SECS: i64 = 6 * 60 * 60;

/// Mail the verification code to `user` unless one went out within
/// [`RESEND_INTERVAL_SECS`]. Returns whether an email was sent.
pub async fn send_verification_email(
    state: &GatewayState,
    user: &UserRow,
    localizer: &Localizer,
) -> anyhow::Result<bool> {
    let now = Utc::now();
    if let Some(last) = user.email_verification_last {
        if now - last < TimeDelta::seconds(RESEND_INTERVAL_SECS) {
            info!("Verification email for {} sent at {}, not resending", user.id, last);
            return Ok(false);
        }
    }

    let code = hex::encode(user.verification_token);
    let (subject, body) = localizer.verification_email(&state.base_url, &code);
    state
        .mailer
        .send(OutgoingEmail {
            to: user.email.clone(),
            subject,
            body,
        })
        .await?;

    let id = user.id;
    let update = UserUpdate {
        email_verification_last: Some(now),
        ..Default::default()
    };
    state.db.call(move |db| db.update_user(id, &update, now)).await?;

    info!("Verification email sent to user {}", id);
    Ok(true)
}

/// Mark the session user verified if `req.token` matches the stored one.
pub async fn confirm_email(
    state: &GatewayState,
    ctx: &SessionContext,
    req: VerifyEmailRequest,
) -> Result<GenericIdResponse, RequestError> {
    let user = current_user(state, ctx).await?;
    if user.email_verified {
        return Err(RequestError::localized(
            ErrorCode::InvalidInputs,
            &ctx.localizer,
            MessageKey::AlreadyVerified,
        ));
    }

    if !tokens_match(&user.verification_token, &req.token) {
        warn!("Wrong verification code for user {}", user.id);
        return Err(RequestError::localized(
            ErrorCode::InvalidInputs,
            &ctx.localizer,
            MessageKey::InvalidVerificationToken,
        ));
    }

    let id = user.id;
    let now = Utc::now();
    let update = UserUpdate {
        email_verified: Some(true),
        email_verification_last: Some(now),
    };
    state
        .db
        .call(move |db| db.update_user(id, &update, now))
        .await
        .map_err(|e| RequestError::internal(&ctx.localizer, &e))?;

    info!("User {} verified their email", id);
    Ok(GenericIdResponse { ok: true, id })
}

/// Resend the verification email. Throttled sends still answer `true`.
pub async fn resend_verification(
    state: &GatewayState,
    ctx: &SessionContext,
) -> Result<bool, RequestError> {
    let user = current_user(state, ctx).await?;
    if user.email_verified {
        return Err(RequestError::localized(
            ErrorCode::InvalidInputs,
            &ctx.localizer,
            MessageKey::AlreadyVerified,
        ));
    }

    send_verification_email(state, &user, &ctx.localizer)
        .await
        .map_err(|e| RequestError::internal(&ctx.localizer, &e))?;
    Ok(true)
}
