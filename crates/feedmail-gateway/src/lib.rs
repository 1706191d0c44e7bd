/// Feedmail gateway: the per-socket session protocol.
///
/// Every binary message carries a small little-endian header followed by a
/// MessagePack payload. A session authenticates with a signed challenge,
/// then serves feed and email-verification requests until the peer leaves.

pub mod codec;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod locale;
pub mod state;

pub use connection::{handle_connection, run_session};
pub use error::RequestError;
pub use locale::{Locale, Localizer, MessageKey};
pub use state::{GatewayState, SessionContext};
