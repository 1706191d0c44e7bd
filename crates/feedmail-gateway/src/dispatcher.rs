use std::fmt::Display;
use std::future::Future;

use axum::extract::ws::Message;
use futures_util::{Sink, SinkExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use feedmail_types::{ErrorCode, RequestKind};

use crate::codec::{self, MessageInfo};
use crate::error::RequestError;
use crate::handlers::{email, feeds};
use crate::locale::MessageKey;
use crate::state::{GatewayState, SessionContext};

/// Write half of a session. Every response goes through here, so frames
/// from concurrent handlers never interleave on the socket.
#[derive(Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl Outbox {
    /// Start the writer task for `sink`. It ends once every `Outbox` clone
    /// is dropped, after flushing and closing the sink.
    pub fn spawn<S>(mut sink: S) -> (Self, JoinHandle<()>)
    where
        S: Sink<Message> + Unpin + Send + 'static,
        S::Error: Display,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let writer = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if let Err(e) = sink.send(Message::Binary(frame.into())).await {
                    debug!("Socket write failed, dropping writer: {}", e);
                    return;
                }
            }
            if let Err(e) = sink.close().await {
                debug!("Socket close failed: {}", e);
            }
        });
        (Self { tx }, writer)
    }

    pub fn reply<T: Serialize>(&self, info: Option<MessageInfo>, payload: &T) {
        self.push(info, true, payload);
    }

    pub fn fail(&self, info: Option<MessageInfo>, err: &RequestError) {
        self.push(info, false, &err.to_payload());
    }

    fn push<T: Serialize>(&self, info: Option<MessageInfo>, ok: bool, payload: &T) {
        match codec::encode_response(info, ok, payload) {
            Ok(frame) => {
                if self.tx.send(frame).is_err() {
                    debug!("Writer gone, response dropped");
                }
            }
            Err(e) => error!("Failed to encode response: {}", e),
        }
    }
}

/// Decode the payload, run `handler` and write its outcome.
async fn respond<Req, Resp, F, Fut>(
    outbox: &Outbox,
    info: MessageInfo,
    ctx: &SessionContext,
    payload: &[u8],
    handler: F,
) where
    Req: DeserializeOwned,
    Resp: Serialize,
    F: FnOnce(Req) -> Fut,
    Fut: Future<Output = Result<Resp, RequestError>>,
{
    let req = match codec::decode_payload::<Req>(payload) {
        Ok(req) => req,
        Err(e) => {
            warn!("Undecodable {:#06x} payload from {}: {}", info.request_id, ctx.user_id, e);
            outbox.fail(
                Some(info),
                &RequestError::localized(ErrorCode::WhileDecoding, &ctx.localizer, MessageKey::WhileDecoding),
            );
            return;
        }
    };

    match handler(req).await {
        Ok(resp) => outbox.reply(Some(info), &resp),
        Err(err) => outbox.fail(Some(info), &err),
    }
}

/// Route one authenticated request to its handler.
pub async fn dispatch(
    kind: RequestKind,
    info: MessageInfo,
    payload: &[u8],
    state: &GatewayState,
    ctx: &SessionContext,
    outbox: &Outbox,
) {
    debug!("{} -> {:?} (#{})", ctx.user_id, kind, info.id);
    match kind {
        RequestKind::ListFeeds => {
            respond(outbox, info, ctx, payload, |req| feeds::list_feeds(state, ctx, req)).await
        }
        RequestKind::AddFeed => {
            respond(outbox, info, ctx, payload, |req| feeds::add_feed(state, ctx, req)).await
        }
        RequestKind::EditFeed => {
            respond(outbox, info, ctx, payload, |req| feeds::edit_feed(state, ctx, req)).await
        }
        RequestKind::DeleteFeed | RequestKind::RemoveFeed => {
            respond(outbox, info, ctx, payload, |req| feeds::delete_feed(state, ctx, req)).await
        }
        RequestKind::EmailVerification => {
            respond(outbox, info, ctx, payload, |req| email::confirm_email(state, ctx, req)).await
        }
        // No payload to decode.
        RequestKind::EmailAgain => match email::resend_verification(state, ctx).await {
            Ok(resp) => outbox.reply(Some(info), &resp),
            Err(err) => outbox.fail(Some(info), &err),
        },
    }
}
