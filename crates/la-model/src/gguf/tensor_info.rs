use std::io::Read;

use la_tensor::DType;

use super::bytes::{read_string, read_u32, read_u64, write_string};
use crate::error::{ModelError, Result};

/// Describes a single tensor stored within a GGUF file.
#[derive(Debug, Clone, PartialEq)]
pub struct GgufTensorInfo {
    /// Tensor name (e.g. "blk.0.attn_q.weight").
    pub name: String,
    /// Size of each dimension, innermost first.
    pub dims: Vec<u64>,
    pub dtype: DType,
    /// Byte offset of this tensor's data from the start of the tensor data section.
    pub offset: u64,
}

impl GgufTensorInfo {
    /// Total number of elements in this tensor.
    pub fn numel(&self) -> usize {
        self.dims.iter().map(|&d| d as usize).product()
    }

    /// Byte size of this tensor's raw data in the file.
    pub fn data_size(&self) -> usize {
        self.dtype.storage_bytes(self.numel())
    }

    pub(crate) fn write(&self, out: &mut Vec<u8>) {
        write_string(out, &self.name);
        out.extend_from_slice(&(self.dims.len() as u32).to_le_bytes());
        for d in &self.dims {
            out.extend_from_slice(&d.to_le_bytes());
        }
        out.extend_from_slice(&self.dtype.to_gguf_type().to_le_bytes());
        out.extend_from_slice(&self.offset.to_le_bytes());
    }
}

/// Parse `n_tensors` tensor info entries from a reader.
///
/// Each entry:
/// 1. GGUF string name
/// 2. u32 number of dimensions
/// 3. n_dims x u64 dimension sizes
/// 4. u32 GGUF type ID (mapped via `DType::from_gguf_type`)
/// 5. u64 byte offset within the tensor data section
pub fn parse_tensor_infos(reader: &mut impl Read, n_tensors: u64) -> Result<Vec<GgufTensorInfo>> {
    let mut infos = Vec::with_capacity((n_tensors as usize).min(1 << 16));
    for _ in 0..n_tensors {
        let name = read_string(reader)?;
        let n_dims = read_u32(reader)?;
        let dims = (0..n_dims)
            .map(|_| read_u64(reader))
            .collect::<Result<Vec<u64>>>()?;
        let type_id = read_u32(reader)?;
        let dtype = DType::from_gguf_type(type_id).ok_or(ModelError::UnsupportedGgufType(type_id))?;
        let offset = read_u64(reader)?;

        infos.push(GgufTensorInfo {
            name,
            dims,
            dtype,
            offset,
        });
    }
    Ok(infos)
}
