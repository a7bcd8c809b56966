//! Opaque resume cursors.
//!
//! ## Token Format
//!
//! Cursors are composed of:
//! - 1 byte: format version
//! - 1 byte: flags
//! - 8 bytes: log id (big-endian)
//! - 8 bytes: next log position to read (big-endian)
//! - 8 bytes: truncation epoch at issue time (big-endian)
//! - 4 bytes: CRC-32 of the preceding 26 bytes (big-endian)
//!
//! Total: 30 bytes, hex-encoded for transport.

use thiserror::Error;

/// Current cursor format version.
pub const CURSOR_VERSION: u8 = 1;

/// Set when the issuing scan stopped before the log head.
pub const FLAG_PARTIAL: u8 = 0x01;

const KNOWN_FLAGS: u8 = FLAG_PARTIAL;
const BODY_LEN: usize = 26;
const ENCODED_LEN: usize = BODY_LEN + 4;

/// Errors produced while decoding a cursor.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CursorError {
    /// Not hex or wrong length.
    #[error("malformed cursor: {0}")]
    Malformed(String),

    /// Checksum did not match the content.
    #[error("cursor checksum mismatch")]
    ChecksumMismatch,

    /// Produced by an incompatible server version.
    #[error("unsupported cursor version: {0}")]
    UnsupportedVersion(u8),

    /// Flags this version does not understand.
    #[error("unknown cursor flags: {0:#04x}")]
    UnknownFlags(u8),
}

/// Decoded content of a cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorPosition {
    /// Identity of the log that issued the cursor.
    pub log_id: u64,
    /// Next log position to read.
    pub position: u64,
    /// Truncation epoch of the log when the cursor was issued.
    pub epoch: u64,
    /// Flag bits.
    pub flags: u8,
}

impl CursorPosition {
    /// Creates a cursor position with no flags set.
    pub fn new(log_id: u64, position: u64, epoch: u64) -> Self {
        Self {
            log_id,
            position,
            epoch,
            flags: 0,
        }
    }

    /// Marks the cursor as issued by a partial scan.
    pub fn partial(mut self, partial: bool) -> Self {
        if partial {
            self.flags |= FLAG_PARTIAL;
        } else {
            self.flags &= !FLAG_PARTIAL;
        }
        self
    }

    /// Returns true if the issuing scan stopped before the log head.
    pub fn is_partial(&self) -> bool {
        self.flags & FLAG_PARTIAL != 0
    }
}

/// Encodes and decodes cursor tokens.
#[derive(Debug, Clone, Copy, Default)]
pub struct CursorCodec;

impl CursorCodec {
    /// Encodes a cursor position to its token form.
    pub fn encode(cursor: &CursorPosition) -> String {
        let mut bytes = Vec::with_capacity(ENCODED_LEN);
        bytes.push(CURSOR_VERSION);
        bytes.push(cursor.flags);
        bytes.extend_from_slice(&cursor.log_id.to_be_bytes());
        bytes.extend_from_slice(&cursor.position.to_be_bytes());
        bytes.extend_from_slice(&cursor.epoch.to_be_bytes());
        let checksum = crc32fast::hash(&bytes);
        bytes.extend_from_slice(&checksum.to_be_bytes());
        hex::encode(bytes)
    }

    /// Decodes a cursor token.
    pub fn decode(token: &str) -> Result<CursorPosition, CursorError> {
        let bytes =
            hex::decode(token.trim()).map_err(|e| CursorError::Malformed(e.to_string()))?;
        if bytes.len() != ENCODED_LEN {
            return Err(CursorError::Malformed(format!(
                "expected {} bytes, got {}",
                ENCODED_LEN,
                bytes.len()
            )));
        }

        let (body, checksum) = bytes.split_at(BODY_LEN);
        if crc32fast::hash(body).to_be_bytes() != checksum {
            return Err(CursorError::ChecksumMismatch);
        }

        let version = body[0];
        if version != CURSOR_VERSION {
            return Err(CursorError::UnsupportedVersion(version));
        }
        let flags = body[1];
        if flags & !KNOWN_FLAGS != 0 {
            return Err(CursorError::UnknownFlags(flags));
        }

        Ok(CursorPosition {
            log_id: read_u64(&body[2..10]),
            position: read_u64(&body[10..18]),
            epoch: read_u64(&body[18..26]),
            flags,
        })
    }
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    u64::from_be_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Re-encodes a tampered body with a valid checksum.
    fn reseal(mut body: Vec<u8>) -> String {
        body.truncate(BODY_LEN);
        let checksum = crc32fast::hash(&body);
        body.extend_from_slice(&checksum.to_be_bytes());
        hex::encode(body)
    }

    #[test]
    fn token_is_hex_of_fixed_length() {
        let token = CursorCodec::encode(&CursorPosition::new(9, 42, 0));
        assert_eq!(token.len(), ENCODED_LEN * 2);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn decode_recovers_fields() {
        let cursor = CursorPosition::new(0xDEAD_BEEF, 1234, 3).partial(true);
        let decoded = CursorCodec::decode(&CursorCodec::encode(&cursor)).unwrap();
        assert_eq!(decoded, cursor);
        assert!(decoded.is_partial());
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            CursorCodec::decode("not-a-cursor"),
            Err(CursorError::Malformed(_))
        ));
        assert!(matches!(
            CursorCodec::decode("abcd"),
            Err(CursorError::Malformed(_))
        ));
        assert!(matches!(CursorCodec::decode(""), Err(CursorError::Malformed(_))));
    }

    #[test]
    fn rejects_tampered_position() {
        let token = CursorCodec::encode(&CursorPosition::new(1, 100, 0));
        let mut bytes = hex::decode(&token).unwrap();
        bytes[17] ^= 0x01;
        assert_eq!(
            CursorCodec::decode(&hex::encode(bytes)),
            Err(CursorError::ChecksumMismatch)
        );
    }

    #[test]
    fn rejects_other_version() {
        let token = CursorCodec::encode(&CursorPosition::new(1, 100, 0));
        let mut bytes = hex::decode(&token).unwrap();
        bytes[0] = 2;
        assert_eq!(
            CursorCodec::decode(&reseal(bytes)),
            Err(CursorError::UnsupportedVersion(2))
        );
    }

    #[test]
    fn rejects_unknown_flags() {
        let token = CursorCodec::encode(&CursorPosition::new(1, 100, 0));
        let mut bytes = hex::decode(&token).unwrap();
        bytes[1] = 0x80;
        assert_eq!(
            CursorCodec::decode(&reseal(bytes)),
            Err(CursorError::UnknownFlags(0x80))
        );
    }

    proptest! {
        #[test]
        fn any_single_byte_flip_is_detected(
            log_id in any::<u64>(),
            position in any::<u64>(),
            index in 0usize..ENCODED_LEN,
            bit in 0u8..8,
        ) {
            let token = CursorCodec::encode(&CursorPosition::new(log_id, position, 0));
            let mut bytes = hex::decode(&token).unwrap();
            bytes[index] ^= 1 << bit;
            prop_assert!(CursorCodec::decode(&hex::encode(bytes)).is_err());
        }
    }
}
