use crate::error::{Result, TensorError};
use std::fmt;

/// A tensor shape, wrapping a vector of dimension sizes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Shape {
    dims: Vec<usize>,
}

impl Shape {
    /// Create a new shape from a vector of dimensions.
    pub fn new(dims: Vec<usize>) -> Self {
        Shape { dims }
    }

    /// Number of dimensions (rank).
    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    /// Total number of elements (product of all dimension sizes).
    pub fn numel(&self) -> usize {
        self.dims.iter().product()
    }

    /// Returns the size of dimension `i`.
    ///
    /// # Panics
    /// Panics if `i >= ndim()`.
    pub fn dim(&self, i: usize) -> usize {
        self.dims[i]
    }

    /// Returns a reference to the underlying dimension sizes.
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Computes row-major contiguous strides for this shape.
    ///
    /// For a shape [d0, d1, d2], the strides are [d1*d2, d2, 1].
    pub fn strides(&self) -> Vec<usize> {
        if self.dims.is_empty() {
            return vec![];
        }
        let mut strides = vec![0usize; self.dims.len()];
        strides[self.dims.len() - 1] = 1;
        for i in (0..self.dims.len() - 1).rev() {
            strides[i] = strides[i + 1] * self.dims[i + 1];
        }
        strides
    }

    /// Flat offset of the contiguous innermost vector addressed by `leading`.
    ///
    /// `leading` must index every dimension except the last one. For logits
    /// of shape `[batch, seq, vocab]`, `offset_of_vector(&[b, t])` is where
    /// the vocabulary row for batch `b`, position `t` starts.
    pub fn offset_of_vector(&self, leading: &[usize]) -> Result<usize> {
        if self.dims.is_empty() || leading.len() != self.dims.len() - 1 {
            return Err(TensorError::IndexOutOfBounds {
                index: leading.to_vec(),
                dims: self.dims.clone(),
            });
        }
        let strides = self.strides();
        let mut offset = 0;
        for (axis, &idx) in leading.iter().enumerate() {
            if idx >= self.dims[axis] {
                return Err(TensorError::IndexOutOfBounds {
                    index: leading.to_vec(),
                    dims: self.dims.clone(),
                });
            }
            offset += idx * strides[axis];
        }
        Ok(offset)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", d)?;
        }
        write!(f, "]")
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Shape::new(dims)
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Shape::new(dims.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_shape() {
        let s = Shape::new(vec![2, 3, 4]);
        assert_eq!(s.ndim(), 3);
        assert_eq!(s.numel(), 24);
        assert_eq!(s.dim(1), 3);
        assert_eq!(s.strides(), vec![12, 4, 1]);
    }

    #[test]
    fn test_scalar_shape() {
        let s = Shape::new(vec![]);
        assert_eq!(s.numel(), 1);
        assert!(s.strides().is_empty());
    }

    #[test]
    fn test_offset_of_vector() {
        let s = Shape::new(vec![2, 3, 4]);
        assert_eq!(s.offset_of_vector(&[0, 0]).unwrap(), 0);
        assert_eq!(s.offset_of_vector(&[0, 2]).unwrap(), 8);
        assert_eq!(s.offset_of_vector(&[1, 1]).unwrap(), 16);
    }

    #[test]
    fn test_offset_of_vector_out_of_bounds() {
        let s = Shape::new(vec![2, 3, 4]);
        assert!(s.offset_of_vector(&[2, 0]).is_err());
        assert!(s.offset_of_vector(&[0, 3]).is_err());
        assert!(s.offset_of_vector(&[0]).is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(Shape::new(vec![1, 8, 32]).to_string(), "[1, 8, 32]");
    }
}
