use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use sha3::{Digest, Keccak256};

/// Length of an account address: the tail of the public key's Keccak hash.
pub const ADDRESS_LEN: usize = 20;

/// `r || s || v`
pub const SIGNATURE_LEN: usize = 65;

const PERSONAL_MESSAGE_PREFIX: &[u8] = b"\x19Ethereum Signed Message:\n";

/// Structural problems with a signature. A well-formed signature made by
/// a different key is not an error: `verify` returns `Ok(false)` for it.
#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("signature must be {SIGNATURE_LEN} bytes, got {0}")]
    Length(usize),
    #[error("invalid recovery byte {0}")]
    RecoveryByte(u8),
    #[error("signature scalars out of range")]
    Malformed,
    #[error("no public key recoverable from signature")]
    Unrecoverable,
}

/// Digest a wallet signs for a "personal message":
/// `keccak256("\x19Ethereum Signed Message:\n" || len(message) || message)`
/// with the length written in decimal.
pub fn personal_message_digest(message: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(PERSONAL_MESSAGE_PREFIX);
    hasher.update(message.len().to_string().as_bytes());
    hasher.update(message);
    hasher.finalize().into()
}

/// Address controlled by a public key.
pub fn address_of(key: &VerifyingKey) -> [u8; ADDRESS_LEN] {
    let point = key.to_encoded_point(false);
    // Skip the 0x04 uncompressed-point tag.
    let hash = Keccak256::digest(&point.as_bytes()[1..]);
    let mut address = [0u8; ADDRESS_LEN];
    address.copy_from_slice(&hash[12..]);
    address
}

/// Check that `signature` over `message` was produced by the key behind
/// `address`.
///
/// The recovery byte may be 0/1 or the legacy 27/28. High-s signatures are
/// normalized first (flipping the recovery parity) so both encodings of
/// the same signature verify.
pub fn verify(
    address: &[u8; ADDRESS_LEN],
    message: &[u8],
    signature: &[u8],
) -> Result<bool, SignatureError> {
    if signature.len() != SIGNATURE_LEN {
        return Err(SignatureError::Length(signature.len()));
    }

    let v = signature[64];
    let mut parity = match v {
        0 | 27 => 0u8,
        1 | 28 => 1u8,
        other => return Err(SignatureError::RecoveryByte(other)),
    };

    let mut sig =
        Signature::from_slice(&signature[..64]).map_err(|_| SignatureError::Malformed)?;
    if let Some(normalized) = sig.normalize_s() {
        sig = normalized;
        parity ^= 1;
    }
    let recovery_id = RecoveryId::from_byte(parity).ok_or(SignatureError::RecoveryByte(v))?;

    let digest = personal_message_digest(message);
    let key = VerifyingKey::recover_from_prehash(&digest, &sig, recovery_id)
        .map_err(|_| SignatureError::Unrecoverable)?;

    Ok(&address_of(&key) == address)
}
