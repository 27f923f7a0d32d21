use crate::dtype::DType;
use crate::error::{Result, TensorError};
use crate::shape::Shape;
use crate::storage::CpuStorage;

/// A tensor backed by CPU storage.
///
/// Holds contiguous, row-major f32 data with an associated shape.
#[derive(Debug, Clone)]
pub struct Tensor {
    storage: CpuStorage,
    shape: Shape,
}

impl Tensor {
    /// Create a new tensor from f32 data and a shape.
    ///
    /// # Errors
    /// Returns `ShapeMismatch` if `data.len() != shape.numel()`.
    pub fn from_vec(data: Vec<f32>, shape: Shape) -> Result<Self> {
        if data.len() != shape.numel() {
            return Err(TensorError::ShapeMismatch {
                expected: shape.dims().to_vec(),
                got: vec![data.len()],
            });
        }
        Ok(Tensor {
            storage: CpuStorage::from_f32_vec(data),
            shape,
        })
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.storage.dtype()
    }

    pub fn data_f32(&self) -> &[f32] {
        self.storage.as_f32_slice()
    }

    pub fn storage(&self) -> &CpuStorage {
        &self.storage
    }

    /// Reshape without copying. The element count must stay the same.
    pub fn reshape(&self, new_shape: Shape) -> Result<Tensor> {
        if self.shape.numel() != new_shape.numel() {
            return Err(TensorError::ShapeMismatch {
                expected: self.shape.dims().to_vec(),
                got: new_shape.dims().to_vec(),
            });
        }
        Ok(Tensor {
            storage: self.storage.clone(),
            shape: new_shape,
        })
    }

    /// The innermost vector at `leading`, e.g. `logits.vector_at(&[b, t])`
    /// is the vocabulary row for batch entry `b` at sequence position `t`.
    pub fn vector_at(&self, leading: &[usize]) -> Result<&[f32]> {
        let offset = self.shape.offset_of_vector(leading)?;
        let width = self.shape.dims()[self.shape.ndim() - 1];
        Ok(&self.data_f32()[offset..offset + width])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_vec() {
        let t = Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], Shape::new(vec![2, 3])).unwrap();
        assert_eq!(t.shape().dims(), &[2, 3]);
        assert_eq!(t.dtype(), DType::F32);
        assert_eq!(t.data_f32(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_from_vec_length_mismatch() {
        assert!(Tensor::from_vec(vec![1.0, 2.0], Shape::new(vec![3])).is_err());
    }

    #[test]
    fn test_reshape_shares_storage() {
        let t = Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], Shape::new(vec![2, 3])).unwrap();
        let r = t.reshape(Shape::new(vec![3, 2])).unwrap();
        assert_eq!(r.shape().dims(), &[3, 2]);
        assert!(r.storage().shares_buffer_with(t.storage()));
        assert!(t.reshape(Shape::new(vec![4, 2])).is_err());
    }

    #[test]
    fn test_vector_at() {
        // [batch=2, seq=2, vocab=3]
        let data: Vec<f32> = (0..12).map(|v| v as f32).collect();
        let t = Tensor::from_vec(data, Shape::new(vec![2, 2, 3])).unwrap();
        assert_eq!(t.vector_at(&[0, 1]).unwrap(), &[3.0, 4.0, 5.0]);
        assert_eq!(t.vector_at(&[1, 0]).unwrap(), &[6.0, 7.0, 8.0]);
        assert!(t.vector_at(&[2, 0]).is_err());
    }
}
