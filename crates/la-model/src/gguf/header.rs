use std::io::Read;

use super::bytes::{read_array, read_u32, read_u64};
use crate::error::{ModelError, Result};

/// The four-byte magic number identifying a GGUF file: ASCII "GGUF".
pub const GGUF_MAGIC: [u8; 4] = [0x47, 0x47, 0x55, 0x46];

/// Default alignment (in bytes) for tensor data within a GGUF file.
pub const GGUF_DEFAULT_ALIGNMENT: usize = 32;

/// The only container version this loader reads.
pub const GGUF_VERSION: u32 = 3;

/// Parsed GGUF file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GgufHeader {
    pub version: u32,
    /// Number of tensors stored in the file.
    pub n_tensors: u64,
    /// Number of key-value metadata entries.
    pub n_kv: u64,
}

impl GgufHeader {
    /// Parse a GGUF header from the beginning of a reader.
    ///
    /// Validates the magic and the version, then reads the tensor and KV
    /// counts.
    pub fn parse(reader: &mut impl Read) -> Result<GgufHeader> {
        let magic: [u8; 4] = read_array(reader)?;
        if magic != GGUF_MAGIC {
            return Err(ModelError::InvalidMagic(magic));
        }
        let version = read_u32(reader)?;
        if version != GGUF_VERSION {
            return Err(ModelError::UnsupportedVersion(version));
        }
        Ok(GgufHeader {
            version,
            n_tensors: read_u64(reader)?,
            n_kv: read_u64(reader)?,
        })
    }

    pub(crate) fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&GGUF_MAGIC);
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&self.n_tensors.to_le_bytes());
        out.extend_from_slice(&self.n_kv.to_le_bytes());
    }
}
