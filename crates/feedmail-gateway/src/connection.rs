use std::fmt::Display;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use chrono::Utc;
use futures_util::{Sink, Stream, StreamExt};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};
use uuid::Uuid;

use feedmail_crypto::{generate_nonce, generate_token, nonce_to_base64};
use feedmail_db::{UserRow, unique_violation_target};
use feedmail_mail::normalize_recipient;
use feedmail_types::api::{
    InitializationRequest, InitializationResponse, NewUserInitialization, OrdinaryInitialization,
    Welcome,
};
use feedmail_types::{ErrorCode, RequestKind};

use crate::codec::{self, FrameError, MessageInfo, REQUEST_HEADER_LEN};
use crate::dispatcher::{self, Outbox};
use crate::error::RequestError;
use crate::handlers::email::send_verification_email;
use crate::locale::{Localizer, MessageKey};
use crate::state::{GatewayState, SessionContext};

/// Serve one upgraded WebSocket until the peer leaves or breaks protocol.
pub async fn handle_connection(socket: WebSocket, state: GatewayState) {
    let (sender, receiver) = socket.split();
    run_session(receiver, sender, state).await;
}

/// The session state machine over any message stream/sink pair:
/// handshake, then the request loop. Returns after the writer has flushed.
pub async fn run_session<R, W, E>(mut receiver: R, sender: W, state: GatewayState)
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
    W: Sink<Message> + Unpin + Send + 'static,
    W::Error: Display,
{
    let (outbox, writer) = Outbox::spawn(sender);

    if let Some(ctx) = handshake(&mut receiver, &outbox, &state).await {
        info!("User {} authenticated", ctx.user_id);
        let user_id = ctx.user_id;
        serve_requests(&mut receiver, &outbox, &state, Arc::new(ctx)).await;
        info!("User {} disconnected", user_id);
    }

    drop(outbox);
    if let Err(e) = writer.await {
        warn!("Session writer task failed: {}", e);
    }
}

/// Next binary message, skipping control frames.
async fn next_frame<R, E>(receiver: &mut R) -> Result<Bytes, FrameError>
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    loop {
        match receiver.next().await {
            None | Some(Ok(Message::Close(_))) => return Err(FrameError::Closed),
            Some(Err(e)) => return Err(FrameError::Transport(e.to_string())),
            Some(Ok(Message::Binary(data))) => return Ok(data),
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(Message::Text(_))) => return Err(FrameError::NotBinary),
        }
    }
}

/// Read one request header. Framing failures are answered with a
/// correlation-less `WhileDecoding` error; any failure ends the session.
async fn read_request<R, E>(
    receiver: &mut R,
    outbox: &Outbox,
    localizer: &Localizer,
) -> Option<(MessageInfo, Bytes)>
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let frame = next_frame(receiver).await.and_then(|data| {
        let (info, _) = codec::decode_request(&data)?;
        Ok((info, data.slice(REQUEST_HEADER_LEN..)))
    });

    match frame {
        Ok(request) => Some(request),
        Err(FrameError::Closed) => None,
        Err(FrameError::Transport(e)) => {
            debug!("Socket read failed: {}", e);
            None
        }
        Err(e) => {
            warn!("Unreadable frame, closing session: {}", e);
            outbox.fail(
                None,
                &RequestError::localized(ErrorCode::WhileDecoding, localizer, MessageKey::WhileDecoding),
            );
            None
        }
    }
}

/// Read one request and decode its payload as `T`. A payload that does
/// not decode is answered and ends the session.
async fn read_message<T, R, E>(
    receiver: &mut R,
    outbox: &Outbox,
    localizer: &Localizer,
) -> Option<(MessageInfo, T)>
where
    T: DeserializeOwned,
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let (info, payload) = read_request(receiver, outbox, localizer).await?;
    match codec::decode_payload::<T>(&payload) {
        Ok(message) => Some((info, message)),
        Err(e) => {
            warn!("Undecodable handshake payload: {}", e);
            outbox.fail(
                Some(info),
                &RequestError::localized(ErrorCode::WhileDecoding, localizer, MessageKey::WhileDecoding),
            );
            None
        }
    }
}

fn check_signature(
    address: &[u8; 20],
    challenge: &str,
    signature: &[u8],
    localizer: &Localizer,
) -> Result<(), RequestError> {
    match feedmail_crypto::verify(address, challenge.as_bytes(), signature) {
        Ok(true) => Ok(()),
        Ok(false) => Err(RequestError::localized(
            ErrorCode::InvalidSignature,
            localizer,
            MessageKey::InvalidSignature,
        )),
        Err(e) => {
            debug!("Malformed signature for {}: {}", hex::encode(address), e);
            Err(RequestError::localized(
                ErrorCode::InvalidSignature,
                localizer,
                MessageKey::MalformedSignature,
            ))
        }
    }
}

/// AwaitingInit -> ChallengeIssued -> (new | existing user) -> Authenticated.
/// Every failure has been answered by the time this returns `None`.
async fn handshake<R, E>(
    receiver: &mut R,
    outbox: &Outbox,
    state: &GatewayState,
) -> Option<SessionContext>
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let (info, init) =
        read_message::<InitializationRequest, _, _>(receiver, outbox, &Localizer::default()).await?;
    let address = init.address;
    let localizer = Localizer::new(&init.locale);

    let nonce = match generate_nonce() {
        Ok(nonce) => nonce,
        Err(e) => {
            outbox.fail(Some(info), &RequestError::internal(&localizer, &anyhow::Error::new(e)));
            return None;
        }
    };
    let challenge = localizer.challenge(&nonce_to_base64(&nonce));

    let existing = match state.db.call(move |db| db.get_user_by_address(&address)).await {
        Ok(user) => user,
        Err(e) => {
            outbox.fail(Some(info), &RequestError::internal(&localizer, &e));
            return None;
        }
    };

    let (info, user) = match existing {
        None => register(receiver, outbox, state, info, address, &challenge, &localizer).await?,
        Some(user) => log_in(receiver, outbox, info, user, &challenge, &localizer).await?,
    };

    outbox.reply(
        Some(info),
        &Welcome {
            logged_in: true,
            message: localizer.text(MessageKey::Welcome).to_string(),
            user: user.public(),
        },
    );

    Some(SessionContext {
        user_id: user.id,
        localizer,
    })
}

/// Unknown address: prove it, then create the account.
async fn register<R, E>(
    receiver: &mut R,
    outbox: &Outbox,
    state: &GatewayState,
    info: MessageInfo,
    address: [u8; 20],
    challenge: &str,
    localizer: &Localizer,
) -> Option<(MessageInfo, UserRow)>
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    outbox.reply(
        Some(info),
        &InitializationResponse {
            user_found: false,
            challenge: challenge.as_bytes().to_vec(),
        },
    );

    let (info, req) = read_message::<NewUserInitialization, _, _>(receiver, outbox, localizer).await?;
    if let Err(e) = check_signature(&address, challenge, &req.signature, localizer) {
        warn!("Signup for {} rejected: {}", hex::encode(address), e.message);
        outbox.fail(Some(info), &e);
        return None;
    }

    match create_account(state, address, &req.email, localizer).await {
        Ok(user) => {
            info!("Created user {} for {}", user.id, hex::encode(address));
            let (state, pending, localizer) = (state.clone(), user.clone(), *localizer);
            tokio::spawn(async move {
                if let Err(e) = send_verification_email(&state, &pending, &localizer).await {
                    warn!("Verification email for {} failed: {:#}", pending.id, e);
                }
            });
            Some((info, user))
        }
        Err(e) => {
            outbox.fail(Some(info), &e);
            None
        }
    }
}

async fn create_account(
    state: &GatewayState,
    address: [u8; 20],
    email: &str,
    localizer: &Localizer,
) -> Result<UserRow, RequestError> {
    let email = email.trim().to_string();
    if normalize_recipient(&email).is_err() {
        return Err(RequestError::localized(
            ErrorCode::InvalidInputs,
            localizer,
            MessageKey::InvalidEmail,
        ));
    }

    let duplicate = || {
        RequestError::localized(ErrorCode::InvalidInputs, localizer, MessageKey::AccountWithSameEmail)
    };

    let lookup = email.clone();
    let taken = state
        .db
        .call(move |db| db.count_users_with_email(&lookup))
        .await
        .map_err(|e| RequestError::internal(localizer, &e))?;
    if taken > 0 {
        return Err(duplicate());
    }

    let token = generate_token().map_err(|e| RequestError::internal(localizer, &anyhow::Error::new(e)))?;
    let now = Utc::now();
    let user = UserRow {
        id: Uuid::new_v4(),
        address,
        email,
        email_verified: false,
        verification_token: token,
        email_verification_last: None,
        created_at: now,
        updated_at: now,
    };

    let row = user.clone();
    match state.db.call(move |db| db.create_user(&row)).await {
        Ok(()) => Ok(user),
        // Lost a race with a concurrent signup.
        Err(e) => match unique_violation_target(&e) {
            Some("users.email") => Err(duplicate()),
            Some("users.address") => Err(RequestError::localized(
                ErrorCode::InvalidInputs,
                localizer,
                MessageKey::AccountWithSameAddress,
            )),
            _ => Err(RequestError::internal(localizer, &e)),
        },
    }
}

/// Known address: prove it again.
async fn log_in<R, E>(
    receiver: &mut R,
    outbox: &Outbox,
    info: MessageInfo,
    user: UserRow,
    challenge: &str,
    localizer: &Localizer,
) -> Option<(MessageInfo, UserRow)>
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    outbox.reply(
        Some(info),
        &InitializationResponse {
            user_found: true,
            challenge: challenge.as_bytes().to_vec(),
        },
    );

    let (info, req) = read_message::<OrdinaryInitialization, _, _>(receiver, outbox, localizer).await?;
    if let Err(e) = check_signature(&user.address, challenge, &req.signature, localizer) {
        warn!("Login for {} rejected: {}", user.id, e.message);
        outbox.fail(Some(info), &e);
        return None;
    }
    Some((info, user))
}

/// Dispatching: one task per request, so a slow handler never blocks
/// the reader. Ends when the peer closes or a frame cannot be read.
async fn serve_requests<R, E>(
    receiver: &mut R,
    outbox: &Outbox,
    state: &GatewayState,
    ctx: Arc<SessionContext>,
) where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    while let Some((info, payload)) = read_request(receiver, outbox, &ctx.localizer).await {
        let Some(kind) = RequestKind::from_id(info.request_id) else {
            debug!("Unknown request type {:#06x} from {}", info.request_id, ctx.user_id);
            outbox.fail(
                Some(info),
                &RequestError::localized(ErrorCode::InvalidInputs, &ctx.localizer, MessageKey::UnknownRequest),
            );
            continue;
        };

        let (state, ctx, outbox) = (state.clone(), ctx.clone(), outbox.clone());
        tokio::spawn(async move {
            dispatcher::dispatch(kind, info, &payload, &state, &ctx, &outbox).await;
        });
    }
}
