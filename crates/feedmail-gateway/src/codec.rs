/// Message envelopes.
///
/// ```text
/// request:  [0..4] correlation id (u32 LE)  [4..8] request type (u32 LE)  [8..] payload
/// response: [0..4] correlation id (u32 LE)  [4]    status (0xFF ok)       [5..] payload
/// ```
///
/// Payloads are MessagePack maps keyed by field name.
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Request header size in bytes.
pub const REQUEST_HEADER_LEN: usize = 8;

/// Response header size in bytes.
pub const RESPONSE_HEADER_LEN: usize = 5;

pub const STATUS_OK: u8 = 0xFF;
pub const STATUS_FAIL: u8 = 0x00;

/// Framing metadata of one request, echoed back in its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageInfo {
    /// Correlation id chosen by the client.
    pub id: u32,
    /// Request-type id selecting the handler.
    pub request_id: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("expected a binary message")]
    NotBinary,
    #[error("header needs {needed} bytes, got {got}")]
    ShortHeader { needed: usize, got: usize },
    #[error("payload decode failed: {0}")]
    Payload(#[from] rmp_serde::decode::Error),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("peer closed the connection")]
    Closed,
}

/// Split a request message into its header and payload.
pub fn decode_request(frame: &[u8]) -> Result<(MessageInfo, &[u8]), FrameError> {
    if frame.len() < REQUEST_HEADER_LEN {
        return Err(FrameError::ShortHeader {
            needed: REQUEST_HEADER_LEN,
            got: frame.len(),
        });
    }
    let id = u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]);
    let request_id = u32::from_le_bytes([frame[4], frame[5], frame[6], frame[7]]);
    Ok((MessageInfo { id, request_id }, &frame[REQUEST_HEADER_LEN..]))
}

/// Build a request message. Used by clients.
pub fn encode_request<T: Serialize>(
    info: MessageInfo,
    payload: &T,
) -> Result<Vec<u8>, rmp_serde::encode::Error> {
    let mut frame = Vec::with_capacity(64);
    frame.extend_from_slice(&info.id.to_le_bytes());
    frame.extend_from_slice(&info.request_id.to_le_bytes());
    rmp_serde::encode::write_named(&mut frame, payload)?;
    Ok(frame)
}

/// Build a response message. Without a request to answer, the correlation
/// id is 0.
pub fn encode_response<T: Serialize>(
    info: Option<MessageInfo>,
    ok: bool,
    payload: &T,
) -> Result<Vec<u8>, rmp_serde::encode::Error> {
    let mut frame = Vec::with_capacity(64);
    frame.extend_from_slice(&info.map_or(0, |i| i.id).to_le_bytes());
    frame.push(if ok { STATUS_OK } else { STATUS_FAIL });
    rmp_serde::encode::write_named(&mut frame, payload)?;
    Ok(frame)
}

/// Split a response message into (correlation id, ok, payload). Used by
/// clients.
pub fn decode_response(frame: &[u8]) -> Result<(u32, bool, &[u8]), FrameError> {
    if frame.len() < RESPONSE_HEADER_LEN {
        return Err(FrameError::ShortHeader {
            needed: RESPONSE_HEADER_LEN,
            got: frame.len(),
        });
    }
    let id = u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]);
    Ok((id, frame[4] == STATUS_OK, &frame[RESPONSE_HEADER_LEN..]))
}

pub fn decode_payload<T: DeserializeOwned>(payload: &[u8]) -> Result<T, FrameError> {
    Ok(rmp_serde::from_slice(payload)?)
}
