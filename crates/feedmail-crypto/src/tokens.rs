use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use rand_core::{OsRng, RngCore};
use subtle::ConstantTimeEq;

/// Size of the random value embedded in a login challenge.
pub const NONCE_LEN: usize = 32;

/// Size of an email verification token.
pub const TOKEN_LEN: usize = 32;

/// Fresh random nonce for a login challenge.
pub fn generate_nonce() -> Result<[u8; NONCE_LEN], rand_core::Error> {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.try_fill_bytes(&mut nonce)?;
    Ok(nonce)
}

/// Fresh random email verification token.
pub fn generate_token() -> Result<[u8; TOKEN_LEN], rand_core::Error> {
    let mut token = [0u8; TOKEN_LEN];
    OsRng.try_fill_bytes(&mut token)?;
    Ok(token)
}

pub fn nonce_to_base64(nonce: &[u8; NONCE_LEN]) -> String {
    BASE64.encode(nonce)
}

/// Compare two tokens without leaking the position of the first mismatch.
/// Slices of different length never match.
pub fn tokens_match(stored: &[u8], supplied: &[u8]) -> bool {
    stored.ct_eq(supplied).into()
}
