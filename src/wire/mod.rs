// Length-prefixed BSON framing.
//
// A frame is a single BSON document; its first four bytes, little-endian,
// give the total frame length including the prefix itself.  Receive loops
// never reassemble past MAX_FRAME_SIZE.

use std::io::Cursor;

use bson::Document;

use crate::error::{Result, ServiceError};

/// Hard ceiling for a single frame.
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Smallest legal frame: length prefix plus the trailing NUL of an empty
/// document.
pub const MIN_FRAME_SIZE: usize = 5;

/// Expected size of the frame whose first bytes are `prefix`.
///
/// With fewer than five bytes available the prefix is not yet decodable and
/// the current length is returned, signalling that more data is needed.
pub fn frame_size(prefix: &[u8]) -> usize {
    if prefix.len() < MIN_FRAME_SIZE {
        return prefix.len();
    }
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&prefix[..4]);
    u32::from_le_bytes(bytes) as usize
}

/// Encode a document into its wire form.
pub fn encode(document: &Document) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    document
        .to_writer(&mut buffer)
        .map_err(|e| ServiceError::Codec(e.to_string()))?;
    Ok(buffer)
}

/// Validate and decode one frame.  The slice must hold exactly one frame.
pub fn decode(bytes: &[u8]) -> Result<Document> {
    if bytes.len() < MIN_FRAME_SIZE {
        return Err(ServiceError::InvalidFrame(format!(
            "frame too short: {} bytes",
            bytes.len()
        )));
    }

    let declared = frame_size(bytes);
    if declared < MIN_FRAME_SIZE {
        return Err(ServiceError::InvalidFrame(format!(
            "declared length {} below minimum",
            declared
        )));
    }
    if declared != bytes.len() {
        return Err(ServiceError::InvalidFrame(format!(
            "declared length {} does not match {} received",
            declared,
            bytes.len()
        )));
    }
    if bytes[bytes.len() - 1] != 0 {
        return Err(ServiceError::InvalidFrame(
            "frame does not end with NUL".to_string(),
        ));
    }

    Document::from_reader(&mut Cursor::new(bytes))
        .map_err(|e| ServiceError::Codec(e.to_string()))
}
