use std::io::{BufReader, Seek};
use std::path::Path;

use memmap2::Mmap;
use tracing::debug;

use la_tensor::{DType, Shape, Tensor};

use super::header::{GgufHeader, GGUF_DEFAULT_ALIGNMENT};
use super::metadata::GgufMetadata;
use super::tensor_info::{self, GgufTensorInfo};
use crate::error::{ModelError, Result};

/// A parsed GGUF file backed by a memory-mapped region.
///
/// After parsing the header, metadata, and tensor info table from the file,
/// the entire file is memory-mapped so that tensor data can be accessed
/// without additional reads.
pub struct GgufFile {
    pub header: GgufHeader,
    pub metadata: GgufMetadata,
    pub tensor_infos: Vec<GgufTensorInfo>,
    mmap: Mmap,
    /// Byte offset within the file where tensor data begins (aligned).
    data_offset: usize,
}

/// Round `pos` up to the next multiple of `alignment`.
pub(crate) fn align_to(pos: usize, alignment: usize) -> usize {
    pos.div_ceil(alignment) * alignment
}

impl GgufFile {
    /// Open and parse a GGUF file from disk.
    ///
    /// The header, metadata and tensor info table are read with buffered
    /// I/O; the file is then memory-mapped so tensor data can be sliced.
    pub fn open(path: &Path) -> Result<GgufFile> {
        let file = std::fs::File::open(path)?;
        let mut reader = BufReader::new(&file);

        let header = GgufHeader::parse(&mut reader)?;
        let metadata = GgufMetadata::parse_kv(&mut reader, header.n_kv)?;
        let tensor_infos = tensor_info::parse_tensor_infos(&mut reader, header.n_tensors)?;

        let alignment = match metadata.get_u32("general.alignment") {
            Ok(a) if a > 0 => a as usize,
            _ => GGUF_DEFAULT_ALIGNMENT,
        };
        let data_offset = align_to(reader.stream_position()? as usize, alignment);

        // SAFETY: the mapping is read-only and the file handle outlives
        // parsing; concurrent truncation by another process is not guarded.
        let mmap = unsafe { Mmap::map(&file)? };

        debug!(
            path = %path.display(),
            n_tensors = header.n_tensors,
            n_kv = header.n_kv,
            data_offset,
            "opened gguf file"
        );

        Ok(GgufFile {
            header,
            metadata,
            tensor_infos,
            mmap,
            data_offset,
        })
    }

    pub fn tensor_info(&self, name: &str) -> Option<&GgufTensorInfo> {
        self.tensor_infos.iter().find(|t| t.name == name)
    }

    /// Raw bytes of a tensor within the memory-mapped file.
    pub fn tensor_data(&self, info: &GgufTensorInfo) -> Result<&[u8]> {
        let start = self.data_offset + info.offset as usize;
        let end = start + info.data_size();
        self.mmap.get(start..end).ok_or_else(|| {
            ModelError::Other(format!(
                "tensor '{}' data [{}, {}) lies past the end of the file ({} bytes)",
                info.name,
                start,
                end,
                self.mmap.len()
            ))
        })
    }

    /// Load a tensor by name, dequantizing to f32 if needed.
    ///
    /// Supports F32, F16, BF16, Q4_0, and Q8_0 formats.
    pub fn get_tensor_f32(&self, name: &str) -> Result<Tensor> {
        let info = self
            .tensor_info(name)
            .ok_or_else(|| ModelError::TensorNotFound(name.to_string()))?;

        let raw = self.tensor_data(info)?;
        let numel = info.numel();
        // GGUF lists dims innermost first; tensors are row-major.
        let shape_dims: Vec<usize> = info.dims.iter().rev().map(|&d| d as usize).collect();

        let data = match info.dtype {
            DType::F32 => dequantize_f32(raw, numel),
            DType::F16 => dequantize_f16(raw, numel),
            DType::BF16 => dequantize_bf16(raw, numel),
            DType::Q4_0 => dequantize_q4_0(raw, numel),
            DType::Q8_0 => dequantize_q8_0(raw, numel),
        };

        Ok(Tensor::from_vec(data, Shape::new(shape_dims))?)
    }
}

fn dequantize_f32(data: &[u8], numel: usize) -> Vec<f32> {
    data.chunks_exact(4)
        .take(numel)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

fn dequantize_f16(data: &[u8], numel: usize) -> Vec<f32> {
    data.chunks_exact(2)
        .take(numel)
        .map(|b| half::f16::from_le_bytes([b[0], b[1]]).to_f32())
        .collect()
}

fn dequantize_bf16(data: &[u8], numel: usize) -> Vec<f32> {
    data.chunks_exact(2)
        .take(numel)
        .map(|b| half::bf16::from_le_bytes([b[0], b[1]]).to_f32())
        .collect()
}

/// Dequantize Q4_0 blocks to f32.
///
/// Q4_0 block layout (18 bytes total, 32 elements per block):
///   - 2 bytes: f16 scale factor
///   - 16 bytes: 32 packed 4-bit values
///
/// Element `j < 16` is the low nibble of byte `j`, element `j + 16` the high
/// nibble. Each nibble is unsigned (0..15); dequantized as (nibble - 8) * scale.
fn dequantize_q4_0(data: &[u8], numel: usize) -> Vec<f32> {
    const BLOCK_BYTES: usize = 18;

    let mut out = Vec::with_capacity(numel);
    for block in data.chunks_exact(BLOCK_BYTES) {
        let scale = half::f16::from_le_bytes([block[0], block[1]]).to_f32();
        let quants = &block[2..];
        out.extend(quants.iter().map(|&b| ((b & 0x0F) as i32 - 8) as f32 * scale));
        out.extend(quants.iter().map(|&b| ((b >> 4) as i32 - 8) as f32 * scale));
    }
    // Trim to exact element count (last block may have padding).
    out.truncate(numel);
    out
}

/// Dequantize Q8_0 blocks to f32.
///
/// Q8_0 block layout (34 bytes total, 32 elements per block):
///   - 2 bytes: f16 scale factor
///   - 32 bytes: 32 signed 8-bit values
fn dequantize_q8_0(data: &[u8], numel: usize) -> Vec<f32> {
    const BLOCK_BYTES: usize = 34;

    let mut out = Vec::with_capacity(numel);
    for block in data.chunks_exact(BLOCK_BYTES) {
        let scale = half::f16::from_le_bytes([block[0], block[1]]).to_f32();
        out.extend(block[2..].iter().map(|&q| q as i8 as f32 * scale));
    }
    out.truncate(numel);
    out
}
