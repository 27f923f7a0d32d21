//! Little-endian primitives shared by the GGUF header, metadata and tensor
//! info parsers.

use std::io::Read;

use crate::error::{ModelError, Result};

pub(crate) fn read_array<const N: usize>(reader: &mut impl Read) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

pub(crate) fn read_u32(reader: &mut impl Read) -> Result<u32> {
    Ok(u32::from_le_bytes(read_array(reader)?))
}

pub(crate) fn read_u64(reader: &mut impl Read) -> Result<u64> {
    Ok(u64::from_le_bytes(read_array(reader)?))
}

/// Read a GGUF string: u64 length followed by that many UTF-8 bytes.
pub(crate) fn read_string(reader: &mut impl Read) -> Result<String> {
    let len = read_u64(reader)? as usize;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    String::from_utf8(buf)
        .map_err(|e| ModelError::Other(format!("invalid UTF-8 in GGUF string: {}", e)))
}

pub(crate) fn write_string(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u64).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}
