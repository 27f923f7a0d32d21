use std::path::Path;

use la_tensor::DType;

use super::header::{GgufHeader, GGUF_DEFAULT_ALIGNMENT, GGUF_VERSION};
use super::metadata::{write_kv, GgufMetadataValue};
use super::reader::align_to;
use super::tensor_info::GgufTensorInfo;
use crate::error::{ModelError, Result};

/// Assembles a GGUF v3 file with f32 tensors.
///
/// Used to package small synthetic models; the output is readable by
/// [`GgufFile::open`](super::GgufFile::open).
#[derive(Debug, Default)]
pub struct GgufBuilder {
    metadata: Vec<(String, GgufMetadataValue)>,
    tensors: Vec<(String, Vec<usize>, Vec<f32>)>,
}

impl GgufBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn metadata(&mut self, key: &str, value: GgufMetadataValue) -> &mut Self {
        self.metadata.push((key.to_string(), value));
        self
    }

    /// Add an f32 tensor with row-major `dims`.
    pub fn tensor_f32(&mut self, name: &str, dims: &[usize], data: Vec<f32>) -> &mut Self {
        self.tensors.push((name.to_string(), dims.to_vec(), data));
        self
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        GgufHeader {
            version: GGUF_VERSION,
            n_tensors: self.tensors.len() as u64,
            n_kv: self.metadata.len() as u64,
        }
        .write(&mut out);

        for (key, value) in &self.metadata {
            write_kv(&mut out, key, value)?;
        }

        let mut offset = 0usize;
        for (name, dims, data) in &self.tensors {
            let numel: usize = dims.iter().product();
            if numel != data.len() {
                return Err(ModelError::TensorSize {
                    name: name.clone(),
                    expected: numel,
                    got: data.len(),
                });
            }
            GgufTensorInfo {
                name: name.clone(),
                dims: dims.iter().rev().map(|&d| d as u64).collect(),
                dtype: DType::F32,
                offset: offset as u64,
            }
            .write(&mut out);
            offset = align_to(offset + DType::F32.storage_bytes(numel), GGUF_DEFAULT_ALIGNMENT);
        }

        for (_, _, data) in &self.tensors {
            out.resize(align_to(out.len(), GGUF_DEFAULT_ALIGNMENT), 0);
            for v in data {
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
        Ok(out)
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_bytes()?)?;
        Ok(())
    }
}
