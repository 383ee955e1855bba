//! Length-prefixed wire codec.
//!
//! Every frame is a fixed 16-byte header followed by `length` bytes of
//! UTF-8 JSON payload:
//!
//! ```text
//! msg_id   : u32 BE  client-chosen correlation id
//! msg_type : u32 BE  0 = request, 1 = response, 2 = notification
//! length   : u32 BE  payload byte count, 0 <= length <= MAX
//! timestamp: u32 BE  wall-clock seconds, informational
//! ```

use std::io::{self, Read, Write};

pub const HEADER_LEN: usize = 16;

/// Default maximum payload size: 1 MiB.
pub const DEFAULT_MAX_PAYLOAD: u32 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Request,
    Response,
    Notification,
    Reserved(u32),
}

impl MessageType {
    pub fn to_u32(self) -> u32 {
        match self {
            MessageType::Request => 0,
            MessageType::Response => 1,
            MessageType::Notification => 2,
            MessageType::Reserved(v) => v,
        }
    }

    pub fn from_u32(v: u32) -> Self {
        match v {
            0 => MessageType::Request,
            1 => MessageType::Response,
            2 => MessageType::Notification,
            other => MessageType::Reserved(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub msg_id: u32,
    pub msg_type: MessageType,
    pub length: u32,
    pub timestamp: u32,
}

#[derive(Debug, Clone)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum WireError {
    #[error("frame exceeds maximum size ({length} > {max})")]
    OversizePayload { length: u32, max: u32 },
    #[error("io error: {message}")]
    Io {
        kind: io::ErrorKind,
        message: String,
    },
    #[error("payload is not valid UTF-8")]
    NotUtf8,
    #[error("unknown msg_type {0}")]
    UnknownMessageType(u32),
}

impl From<io::Error> for WireError {
    fn from(e: io::Error) -> Self {
        WireError::Io {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

/// Encode a frame (header + payload) to bytes.
pub fn encode(msg_id: u32, msg_type: MessageType, payload: &[u8], timestamp: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&msg_id.to_be_bytes());
    out.extend_from_slice(&msg_type.to_u32().to_be_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(&timestamp.to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Write a frame directly to a stream (header then payload, two writes —
/// mirrors `send_json_frame`'s two `write_all` calls plus a flush).
pub fn write_frame<W: Write>(
    mut w: W,
    msg_id: u32,
    msg_type: MessageType,
    payload: &[u8],
    timestamp: u32,
) -> io::Result<()> {
    let mut header = [0u8; HEADER_LEN];
    header[0..4].copy_from_slice(&msg_id.to_be_bytes());
    header[4..8].copy_from_slice(&msg_type.to_u32().to_be_bytes());
    header[8..12].copy_from_slice(&(payload.len() as u32).to_be_bytes());
    header[12..16].copy_from_slice(&timestamp.to_be_bytes());
    w.write_all(&header)?;
    w.write_all(payload)?;
    w.flush()
}

/// Read and validate just the header (handles short reads via `read_exact`).
pub fn read_header<R: Read>(mut r: R, max_payload: u32) -> Result<FrameHeader, WireError> {
    let mut buf = [0u8; HEADER_LEN];
    r.read_exact(&mut buf)?;
    let msg_id = u32::from_be_bytes(buf[0..4].try_into().unwrap());
    let msg_type = MessageType::from_u32(u32::from_be_bytes(buf[4..8].try_into().unwrap()));
    let length = u32::from_be_bytes(buf[8..12].try_into().unwrap());
    let timestamp = u32::from_be_bytes(buf[12..16].try_into().unwrap());

    if let MessageType::Reserved(v) = msg_type {
        return Err(WireError::UnknownMessageType(v));
    }

    if length > max_payload {
        return Err(WireError::OversizePayload {
            length,
            max: max_payload,
        });
    }

    Ok(FrameHeader {
        msg_id,
        msg_type,
        length,
        timestamp,
    })
}

/// Read a full frame: header, then exactly `header.length` payload bytes.
pub fn read_frame<R: Read>(mut r: R, max_payload: u32) -> Result<Frame, WireError> {
    let header = read_header(&mut r, max_payload)?;
    let mut payload = vec![0u8; header.length as usize];
    r.read_exact(&mut payload)?;
    Ok(Frame { header, payload })
}

/// Decode the payload as a UTF-8 JSON string slice. This codec never
/// parses the JSON itself; that's the caller's job once framing is done.
pub fn payload_str(frame: &Frame) -> Result<&str, WireError> {
    std::str::from_utf8(&frame.payload).map_err(|_| WireError::NotUtf8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn round_trip_request_frame() {
        let payload = br#"{"jsonrpc":"2.0","method":"ping","id":1}"#;
        let bytes = encode(7, MessageType::Request, payload, 1_700_000_000);
        assert_eq!(bytes.len(), HEADER_LEN + payload.len());

        let frame = read_frame(Cursor::new(bytes), DEFAULT_MAX_PAYLOAD).unwrap();
        assert_eq!(frame.header.msg_id, 7);
        assert_eq!(frame.header.msg_type, MessageType::Request);
        assert_eq!(frame.header.length, payload.len() as u32);
        assert_eq!(frame.header.timestamp, 1_700_000_000);
        assert_eq!(payload_str(&frame).unwrap().as_bytes(), payload);
    }

    #[test]
    fn rejects_oversize_frame() {
        let mut header = [0u8; HEADER_LEN];
        header[8..12].copy_from_slice(&(DEFAULT_MAX_PAYLOAD + 1).to_be_bytes());
        let err = read_header(Cursor::new(header), DEFAULT_MAX_PAYLOAD).unwrap_err();
        assert!(matches!(err, WireError::OversizePayload { .. }));
    }

    #[test]
    fn short_read_is_an_io_error_not_a_panic() {
        let bytes = [0u8; 4]; // too short for a header
        let err = read_header(Cursor::new(bytes), DEFAULT_MAX_PAYLOAD).unwrap_err();
        assert!(matches!(err, WireError::Io { .. }));
    }

    #[test]
    fn rejects_reserved_message_type() {
        let mut header = [0u8; HEADER_LEN];
        header[4..8].copy_from_slice(&99u32.to_be_bytes());
        let err = read_header(Cursor::new(header), DEFAULT_MAX_PAYLOAD).unwrap_err();
        assert!(matches!(err, WireError::UnknownMessageType(99)));
    }

    #[test]
    fn message_type_round_trips_reserved_values() {
        assert_eq!(MessageType::from_u32(2), MessageType::Notification);
        assert_eq!(MessageType::from_u32(99), MessageType::Reserved(99));
        assert_eq!(MessageType::Reserved(99).to_u32(), 99);
    }
}
