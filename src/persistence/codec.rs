//! Reversible encodings applied to the serialized record set.

use crate::error::PersistenceError;

/// A lossless, deterministic string transform.
///
/// `decode(encode(x)) == x` for any input, and `encode` always produces the
/// same output for the same input.
pub trait Codec: Send + Sync {
    /// Name written into the persisted envelope.
    fn name(&self) -> &'static str;

    fn encode(&self, plain: &str) -> Result<String, PersistenceError>;

    fn decode(&self, encoded: &str) -> Result<String, PersistenceError>;
}

/// Identity transform: the envelope carries the JSON text unchanged.
#[derive(Clone, Copy, Debug, Default)]
pub struct PassthroughCodec;

impl Codec for PassthroughCodec {
    fn name(&self) -> &'static str {
        "passthrough"
    }

    fn encode(&self, plain: &str) -> Result<String, PersistenceError> {
        Ok(plain.to_string())
    }

    fn decode(&self, encoded: &str) -> Result<String, PersistenceError> {
        Ok(encoded.to_string())
    }
}

/// LZ4 block compression, hex-encoded so it fits a string area.
///
/// Layout: 8 hex chars of the CRC32 of the plain text, then the hex of the
/// size-prefixed LZ4 block.
#[derive(Clone, Copy, Debug, Default)]
pub struct Lz4Codec;

/// Hex chars taken by the checksum prefix.
const CHECKSUM_HEX_LEN: usize = 8;

impl Codec for Lz4Codec {
    fn name(&self) -> &'static str {
        "lz4"
    }

    fn encode(&self, plain: &str) -> Result<String, PersistenceError> {
        let checksum = crc32fast::hash(plain.as_bytes());
        let compressed = lz4_flex::compress_prepend_size(plain.as_bytes());

        let mut out = String::with_capacity(CHECKSUM_HEX_LEN + compressed.len() * 2);
        out.push_str(&hex::encode(checksum.to_be_bytes()));
        out.push_str(&hex::encode(compressed));
        Ok(out)
    }

    fn decode(&self, encoded: &str) -> Result<String, PersistenceError> {
        if encoded.len() < CHECKSUM_HEX_LEN || !encoded.is_char_boundary(CHECKSUM_HEX_LEN) {
            return Err(PersistenceError::Corruption(
                "lz4 payload shorter than its checksum".into(),
            ));
        }
        let (checksum_hex, body_hex) = encoded.split_at(CHECKSUM_HEX_LEN);

        let checksum_bytes: [u8; 4] = hex::decode(checksum_hex)
            .map_err(|e| PersistenceError::Corruption(format!("bad checksum hex: {}", e)))?
            .try_into()
            .map_err(|_| PersistenceError::Corruption("bad checksum length".into()))?;
        let expected = u32::from_be_bytes(checksum_bytes);

        let compressed = hex::decode(body_hex)
            .map_err(|e| PersistenceError::Corruption(format!("bad payload hex: {}", e)))?;
        let plain = lz4_flex::decompress_size_prepended(&compressed)
            .map_err(|e| PersistenceError::Corruption(format!("lz4: {}", e)))?;

        let got = crc32fast::hash(&plain);
        if got != expected {
            return Err(PersistenceError::ChecksumMismatch { expected, got });
        }

        String::from_utf8(plain)
            .map_err(|e| PersistenceError::Corruption(format!("payload is not UTF-8: {}", e)))
    }
}

/// Resolve a codec by the name stored in an envelope.
pub fn codec_by_name(name: &str) -> Result<Box<dyn Codec>, PersistenceError> {
    match name {
        "passthrough" => Ok(Box::new(PassthroughCodec)),
        "lz4" => Ok(Box::new(Lz4Codec)),
        other => Err(PersistenceError::UnknownCodec(other.to_string())),
    }
}
