//! Wire format: one JSON object per session write.

use cooperate_types::ControlFrame;

use crate::error::TransportError;

/// Maximum frame size (64 KiB). Control frames are small; anything larger
/// is garbage.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Encode a control frame as a JSON byte buffer.
pub fn encode_frame(frame: &ControlFrame) -> Result<Vec<u8>, TransportError> {
    let buf =
        serde_json::to_vec(frame).map_err(|e| TransportError::Serialization(e.to_string()))?;
    if buf.len() > MAX_MESSAGE_SIZE {
        return Err(TransportError::Serialization(format!(
            "frame size {} exceeds maximum {MAX_MESSAGE_SIZE}",
            buf.len()
        )));
    }
    Ok(buf)
}

/// Decode a control frame from a received buffer.
pub fn decode_frame(buf: &[u8]) -> Result<ControlFrame, TransportError> {
    if buf.len() > MAX_MESSAGE_SIZE {
        return Err(TransportError::Deserialization(format!(
            "frame size {} exceeds maximum {MAX_MESSAGE_SIZE}",
            buf.len()
        )));
    }
    serde_json::from_slice(buf).map_err(|e| TransportError::Deserialization(e.to_string()))
}
