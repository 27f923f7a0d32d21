use std::sync::Arc;

use crate::dtype::DType;

/// CPU-side tensor storage.
///
/// Buffers are reference counted so reshapes and clones of large logits
/// tensors do not copy.
#[derive(Debug, Clone)]
pub enum CpuStorage {
    F32(Arc<Vec<f32>>),
}

impl CpuStorage {
    /// Create storage from an f32 vector.
    pub fn from_f32_vec(data: Vec<f32>) -> Self {
        CpuStorage::F32(Arc::new(data))
    }

    /// Number of elements in this storage.
    pub fn len(&self) -> usize {
        match self {
            CpuStorage::F32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_f32_slice(&self) -> &[f32] {
        match self {
            CpuStorage::F32(v) => v.as_slice(),
        }
    }

    /// True if this storage and `other` point at the same buffer.
    pub fn shares_buffer_with(&self, other: &CpuStorage) -> bool {
        match (self, other) {
            (CpuStorage::F32(a), CpuStorage::F32(b)) => Arc::ptr_eq(a, b),
        }
    }

    pub fn dtype(&self) -> DType {
        match self {
            CpuStorage::F32(_) => DType::F32,
        }
    }
}
