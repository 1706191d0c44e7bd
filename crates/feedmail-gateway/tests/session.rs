/// Full sessions over in-memory channels: handshake, dispatch and the
/// email-verification flow against an in-memory store.
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use axum::extract::ws::Message;
use chrono::Utc;
use futures::StreamExt;
use futures::channel::mpsc;
use k256::ecdsa::SigningKey;
use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use feedmail_crypto::{address_of, personal_message_digest};
use feedmail_db::{Database, UserRow};
use feedmail_gateway::codec::{self, MessageInfo};
use feedmail_gateway::{GatewayState, Localizer, MessageKey, run_session};
use feedmail_mail::{Mailer, OutgoingEmail};
use feedmail_types::api::{
    DeleteFeedRequest, DeleteFeedResponse, ErrorMessage, GenericIdResponse, InitializationRequest,
    InitializationResponse, ListFeedsRequest, ListFeedsResponse, NewUserInitialization,
    OrdinaryInitialization, UpdatedFeedResponse, VerifyEmailRequest, Welcome,
};
use feedmail_types::{ErrorCode, Feed};

const LIST_FEEDS: u32 = 0x10;
const ADD_FEED: u32 = 0x11;
const EDIT_FEED: u32 = 0x12;
const REMOVE_FEED: u32 = 0x13;
const EMAIL_VERIFICATION: u32 = 0x20;
const EMAIL_AGAIN: u32 = 0x21;

const WAIT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct RecordingMailer {
    sent: Mutex<Vec<OutgoingEmail>>,
}

impl RecordingMailer {
    fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: OutgoingEmail) -> Result<()> {
        self.sent.lock().unwrap().push(email);
        Ok(())
    }
}

struct Response {
    id: u32,
    ok: bool,
    payload: Vec<u8>,
}

impl Response {
    fn body<T: DeserializeOwned>(&self) -> T {
        assert!(self.ok, "expected success, got {:?}", self.error_unchecked());
        codec::decode_payload(&self.payload).unwrap()
    }

    fn error(&self) -> ErrorMessage {
        assert!(!self.ok, "expected an error response");
        self.error_unchecked()
    }

    fn error_unchecked(&self) -> ErrorMessage {
        codec::decode_payload(&self.payload).unwrap()
    }
}

struct Client {
    tx: mpsc::UnboundedSender<Result<Message, axum::Error>>,
    rx: mpsc::UnboundedReceiver<Message>,
    next_id: u32,
}

impl Client {
    fn send<T: Serialize>(&mut self, request_id: u32, payload: &T) -> u32 {
        self.next_id += 1;
        let info = MessageInfo {
            id: self.next_id,
            request_id,
        };
        let frame = codec::encode_request(info, payload).unwrap();
        self.send_raw(Message::Binary(frame.into()));
        info.id
    }

    fn send_raw(&mut self, message: Message) {
        self.tx.unbounded_send(Ok(message)).unwrap();
    }

    async fn recv(&mut self) -> Response {
        let message = tokio::time::timeout(WAIT, self.rx.next())
            .await
            .expect("timed out waiting for a response")
            .expect("session closed");
        let Message::Binary(data) = message else {
            panic!("expected a binary message, got {:?}", message);
        };
        let (id, ok, payload) = codec::decode_response(&data).unwrap();
        Response {
            id,
            ok,
            payload: payload.to_vec(),
        }
    }

    async fn assert_closed(&mut self) {
        let next = tokio::time::timeout(WAIT, self.rx.next())
            .await
            .expect("timed out waiting for close");
        assert!(next.is_none(), "session still open");
    }
}

struct Harness {
    db: Arc<Database>,
    mailer: Arc<RecordingMailer>,
    state: GatewayState,
}

fn harness() -> Harness {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let mailer = Arc::new(RecordingMailer::default());
    let state = GatewayState {
        db: db.clone(),
        mailer: mailer.clone(),
        base_url: "https://feedmail.example".into(),
    };
    Harness { db, mailer, state }
}

impl Harness {
    fn connect(&self) -> Client {
        let (tx, server_rx) = mpsc::unbounded();
        let (server_tx, rx) = mpsc::unbounded();
        tokio::spawn(run_session(server_rx, server_tx, self.state.clone()));
        Client { tx, rx, next_id: 0 }
    }

    fn user(&self, key: &SigningKey) -> Option<UserRow> {
        self.db.get_user_by_address(&address(key)).unwrap()
    }

    fn existing_user(&self, key: &SigningKey, email: &str) -> UserRow {
        let now = Utc::now();
        let user = UserRow {
            id: Uuid::new_v4(),
            address: address(key),
            email: email.into(),
            email_verified: true,
            verification_token: [9; 32],
            email_verification_last: Some(now),
            created_at: now,
            updated_at: now,
        };
        self.db.create_user(&user).unwrap();
        user
    }
}

fn key(seed: u8) -> SigningKey {
    SigningKey::from_slice(&[seed; 32]).unwrap()
}

fn address(key: &SigningKey) -> [u8; 20] {
    address_of(key.verifying_key())
}

fn sign(key: &SigningKey, message: &str) -> [u8; 65] {
    let digest = personal_message_digest(message.as_bytes());
    let (sig, recovery_id) = key.sign_prehash_recoverable(&digest).unwrap();
    let mut out = [0u8; 65];
    out[..64].copy_from_slice(&sig.to_bytes());
    out[64] = recovery_id.to_byte() + 27;
    out
}

async fn begin(client: &mut Client, key: &SigningKey, locale: &str) -> InitializationResponse {
    client.send(
        0,
        &InitializationRequest {
            address: address(key),
            locale: locale.into(),
        },
    );
    client.recv().await.body()
}

async fn sign_up(client: &mut Client, key: &SigningKey, email: &str, locale: &str) -> Response {
    let init = begin(client, key, locale).await;
    assert!(!init.user_found);
    let challenge = String::from_utf8(init.challenge).unwrap();
    client.send(
        0,
        &NewUserInitialization {
            email: email.into(),
            signature: sign(key, &challenge),
        },
    );
    client.recv().await
}

async fn wait_until(mut done: impl FnMut() -> bool) {
    for _ in 0..500 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn sign_up_creates_unverified_user_and_mails_the_code() {
    let h = harness();
    let mut client = h.connect();
    let alice = key(1);

    let welcome: Welcome = sign_up(&mut client, &alice, "alice@example.com", "en").await.body();
    assert!(welcome.logged_in);
    assert_eq!(welcome.user.email, "alice@example.com");
    assert_eq!(welcome.user.address, address(&alice));
    assert!(!welcome.user.email_verified);

    let stored = h.user(&alice).unwrap();
    assert_eq!(stored.id, welcome.user.id);

    wait_until(|| !h.mailer.sent().is_empty()).await;
    let mail = &h.mailer.sent()[0];
    assert_eq!(mail.to, "alice@example.com");
    let code = hex::encode(stored.verification_token);
    assert!(mail.body.contains(&format!("https://feedmail.example/verify?code={code}")));
}

#[tokio::test]
async fn challenge_is_fresh_per_session() {
    let h = harness();
    let alice = key(1);
    let first = begin(&mut h.connect(), &alice, "en").await;
    let second = begin(&mut h.connect(), &alice, "en").await;
    assert_ne!(first.challenge, second.challenge);
}

#[tokio::test]
async fn duplicate_email_is_rejected() {
    let h = harness();
    h.existing_user(&key(1), "taken@example.com");
    let mut client = h.connect();
    let bob = key(2);

    let err = sign_up(&mut client, &bob, "taken@example.com", "en").await.error();
    assert_eq!(err.code, ErrorCode::InvalidInputs);
    assert_eq!(err.message, Localizer::default().text(MessageKey::AccountWithSameEmail));
    assert!(h.user(&bob).is_none());
    client.assert_closed().await;
}

#[tokio::test]
async fn concurrent_signup_for_the_same_address_is_rejected() {
    let h = harness();
    let mut client = h.connect();
    let alice = key(1);

    let init = begin(&mut client, &alice, "en").await;
    assert!(!init.user_found);
    // Another session registers this address while the challenge is pending.
    let winner = h.existing_user(&alice, "first@example.com");

    let challenge = String::from_utf8(init.challenge).unwrap();
    client.send(
        0,
        &NewUserInitialization {
            email: "second@example.com".into(),
            signature: sign(&alice, &challenge),
        },
    );

    let err = client.recv().await.error();
    assert_eq!(err.code, ErrorCode::InvalidInputs);
    assert_eq!(err.message, Localizer::default().text(MessageKey::AccountWithSameAddress));
    assert_eq!(h.user(&alice).unwrap().id, winner.id);
    assert_eq!(h.db.count_users_with_email("second@example.com").unwrap(), 0);
    client.assert_closed().await;
}

#[tokio::test]
async fn signature_from_another_key_is_rejected() {
    let h = harness();
    let mut client = h.connect();
    let alice = key(1);

    let init = begin(&mut client, &alice, "en").await;
    let challenge = String::from_utf8(init.challenge).unwrap();
    client.send(
        0,
        &NewUserInitialization {
            email: "alice@example.com".into(),
            signature: sign(&key(2), &challenge),
        },
    );

    let err = client.recv().await.error();
    assert_eq!(err.code, ErrorCode::InvalidSignature);
    assert!(h.user(&alice).is_none());
    client.assert_closed().await;
}

#[tokio::test]
async fn malformed_signature_is_rejected_with_its_own_message() {
    let h = harness();
    let mut client = h.connect();
    let alice = key(1);

    begin(&mut client, &alice, "en").await;
    let mut signature = [0u8; 65];
    signature[64] = 99;
    client.send(
        0,
        &NewUserInitialization {
            email: "alice@example.com".into(),
            signature,
        },
    );

    let err = client.recv().await.error();
    assert_eq!(err.code, ErrorCode::InvalidSignature);
    assert_eq!(err.message, Localizer::default().text(MessageKey::MalformedSignature));
    client.assert_closed().await;
}

#[tokio::test]
async fn returning_user_logs_in() {
    let h = harness();
    let alice = key(1);
    let existing = h.existing_user(&alice, "alice@example.com");
    let mut client = h.connect();

    let init = begin(&mut client, &alice, "en").await;
    assert!(init.user_found);
    let challenge = String::from_utf8(init.challenge).unwrap();
    let id = client.send(
        0,
        &OrdinaryInitialization {
            signature: sign(&alice, &challenge),
        },
    );

    let response = client.recv().await;
    assert_eq!(response.id, id);
    let welcome: Welcome = response.body();
    assert_eq!(welcome.user.id, existing.id);
    assert!(welcome.user.email_verified);
    assert_eq!(h.db.count_users_with_email("alice@example.com").unwrap(), 1);
}

#[tokio::test]
async fn returning_user_with_foreign_signature_is_rejected() {
    let h = harness();
    let alice = key(1);
    h.existing_user(&alice, "alice@example.com");
    let mut client = h.connect();

    let init = begin(&mut client, &alice, "en").await;
    let challenge = String::from_utf8(init.challenge).unwrap();
    client.send(
        0,
        &OrdinaryInitialization {
            signature: sign(&key(3), &challenge),
        },
    );

    assert_eq!(client.recv().await.error().code, ErrorCode::InvalidSignature);
    client.assert_closed().await;
}

#[tokio::test]
async fn feeds_are_managed_over_the_session() {
    let h = harness();
    let mut client = h.connect();
    sign_up(&mut client, &key(1), "alice@example.com", "en").await.body::<Welcome>();

    let id = client.send(
        ADD_FEED,
        &Feed {
            name: "Example".into(),
            url: "https://example.com/rss".into(),
            frequency: 60,
            ..Default::default()
        },
    );
    let response = client.recv().await;
    assert_eq!(response.id, id);
    let added: GenericIdResponse = response.body();
    assert!(added.ok);

    client.send(LIST_FEEDS, &ListFeedsRequest::default());
    let listed: ListFeedsResponse = client.recv().await.body();
    assert_eq!(listed.count, 1);
    assert_eq!(listed.feeds[0].id, added.id);
    assert_eq!(listed.feeds[0].frequency, 600);

    client.send(
        EDIT_FEED,
        &Feed {
            id: added.id,
            name: "Renamed".into(),
            url: "https://example.com/atom".into(),
            frequency: 7200,
            ..Default::default()
        },
    );
    let edited: UpdatedFeedResponse = client.recv().await.body();
    assert_eq!(edited.modified_count, 1);
    let stored = h.db.get_feed(added.id).unwrap().unwrap();
    assert_eq!(stored.name, "Renamed");
    assert_eq!(stored.url, "https://example.com/atom");
    assert_eq!(stored.frequency, 7200);

    client.send(REMOVE_FEED, &DeleteFeedRequest { id: added.id });
    let deleted: DeleteFeedResponse = client.recv().await.body();
    assert_eq!(deleted.deleted_count, 1);

    client.send(LIST_FEEDS, &ListFeedsRequest::default());
    let listed: ListFeedsResponse = client.recv().await.body();
    assert_eq!(listed.count, 0);
}

#[tokio::test]
async fn non_http_feed_url_is_rejected() {
    let h = harness();
    let mut client = h.connect();
    sign_up(&mut client, &key(1), "alice@example.com", "en").await.body::<Welcome>();

    client.send(
        ADD_FEED,
        &Feed {
            url: "ftp://example.com/rss".into(),
            ..Default::default()
        },
    );
    let err = client.recv().await.error();
    assert_eq!(err.code, ErrorCode::InvalidInputs);
}

#[tokio::test]
async fn other_users_feeds_are_untouchable() {
    let h = harness();
    let mut alice = h.connect();
    sign_up(&mut alice, &key(1), "alice@example.com", "en").await.body::<Welcome>();
    alice.send(
        ADD_FEED,
        &Feed {
            url: "https://example.com/rss".into(),
            ..Default::default()
        },
    );
    let added: GenericIdResponse = alice.recv().await.body();

    let mut mallory = h.connect();
    sign_up(&mut mallory, &key(2), "mallory@example.com", "en").await.body::<Welcome>();
    mallory.send(REMOVE_FEED, &DeleteFeedRequest { id: added.id });
    let deleted: DeleteFeedResponse = mallory.recv().await.body();
    assert_eq!(deleted.deleted_count, 0);

    mallory.send(LIST_FEEDS, &ListFeedsRequest::default());
    let listed: ListFeedsResponse = mallory.recv().await.body();
    assert_eq!(listed.count, 0);
    assert!(h.db.get_feed(added.id).unwrap().is_some());
}

#[tokio::test]
async fn unknown_request_is_answered_and_session_continues() {
    let h = harness();
    let mut client = h.connect();
    sign_up(&mut client, &key(1), "alice@example.com", "bn").await.body::<Welcome>();

    let id = client.send(0x99, &ListFeedsRequest::default());
    let response = client.recv().await;
    assert_eq!(response.id, id);
    let err = response.error();
    assert_eq!(err.code, ErrorCode::InvalidInputs);
    assert_eq!(err.message, Localizer::new("bn").text(MessageKey::UnknownRequest));

    client.send(LIST_FEEDS, &ListFeedsRequest::default());
    let listed: ListFeedsResponse = client.recv().await.body();
    assert_eq!(listed.count, 0);
}

#[tokio::test]
async fn undecodable_payload_is_answered_and_session_continues() {
    let h = harness();
    let mut client = h.connect();
    sign_up(&mut client, &key(1), "alice@example.com", "en").await.body::<Welcome>();

    let id = client.send(ADD_FEED, &"not a feed");
    let response = client.recv().await;
    assert_eq!(response.id, id);
    assert_eq!(response.error().code, ErrorCode::WhileDecoding);

    client.send(LIST_FEEDS, &ListFeedsRequest::default());
    assert!(client.recv().await.ok);
}

#[tokio::test]
async fn short_frame_ends_the_session() {
    let h = harness();
    let mut client = h.connect();
    sign_up(&mut client, &key(1), "alice@example.com", "en").await.body::<Welcome>();

    client.send_raw(Message::Binary(vec![1, 2, 3].into()));
    let response = client.recv().await;
    assert_eq!(response.id, 0);
    assert_eq!(response.error().code, ErrorCode::WhileDecoding);
    client.assert_closed().await;
}

#[tokio::test]
async fn text_frame_before_handshake_ends_the_session() {
    let h = harness();
    let mut client = h.connect();

    client.send_raw(Message::Text("hello".into()));
    assert_eq!(client.recv().await.error().code, ErrorCode::WhileDecoding);
    client.assert_closed().await;
}

#[tokio::test]
async fn email_is_verified_with_the_mailed_token() {
    let h = harness();
    let mut client = h.connect();
    let alice = key(1);
    sign_up(&mut client, &alice, "alice@example.com", "en").await.body::<Welcome>();
    let token = h.user(&alice).unwrap().verification_token;

    let mut wrong = token;
    wrong[31] ^= 1;
    client.send(EMAIL_VERIFICATION, &VerifyEmailRequest { token: wrong });
    let err = client.recv().await.error();
    assert_eq!(err.code, ErrorCode::InvalidInputs);
    assert_eq!(err.message, Localizer::default().text(MessageKey::InvalidVerificationToken));
    assert!(!h.user(&alice).unwrap().email_verified);

    client.send(EMAIL_VERIFICATION, &VerifyEmailRequest { token });
    let confirmed: GenericIdResponse = client.recv().await.body();
    assert!(confirmed.ok);
    assert!(h.user(&alice).unwrap().email_verified);

    client.send(EMAIL_VERIFICATION, &VerifyEmailRequest { token });
    let err = client.recv().await.error();
    assert_eq!(err.message, Localizer::default().text(MessageKey::AlreadyVerified));
}

#[tokio::test]
async fn verification_resend_is_throttled() {
    let h = harness();
    let mut client = h.connect();
    let alice = key(1);
    sign_up(&mut client, &alice, "alice@example.com", "en").await.body::<Welcome>();
    wait_until(|| h.user(&alice).unwrap().email_verification_last.is_some()).await;

    client.send(EMAIL_AGAIN, &());
    let resent: bool = client.recv().await.body();
    assert!(resent);
    assert_eq!(h.mailer.sent().len(), 1);
}
