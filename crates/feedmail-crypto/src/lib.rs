/// Feedmail crypto primitives.
///
/// - Wallet-style identity proofs: secp256k1 recoverable signatures over a
///   personal-message digest, checked against a claimed 20-byte address
/// - Random challenge nonces and email verification tokens
/// - Constant-time token comparison

pub mod identity;
pub mod tokens;

pub use identity::{ADDRESS_LEN, SIGNATURE_LEN, SignatureError, address_of, personal_message_digest, verify};
pub use tokens::{NONCE_LEN, TOKEN_LEN, generate_nonce, generate_token, nonce_to_base64, tokens_match};
