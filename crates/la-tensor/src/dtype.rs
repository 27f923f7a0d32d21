use std::fmt;

/// Element types a model file can store weights in.
///
/// Compute always happens in f32; everything else is dequantized on load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    F32,
    /// IEEE 754 half precision.
    F16,
    /// bfloat16, the native dtype of most instruction-tuned checkpoints.
    BF16,
    /// 32-element blocks: f16 scale + 16 bytes of packed nibbles.
    Q4_0,
    /// 32-element blocks: f16 scale + 32 signed bytes.
    Q8_0,
}

impl DType {
    /// Bytes per element, or bytes per block for quantized types.
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DType::F32 => 4,
            DType::F16 | DType::BF16 => 2,
            DType::Q4_0 => 18,
            DType::Q8_0 => 34,
        }
    }

    /// Elements per block (1 for plain float types).
    pub fn block_size(&self) -> usize {
        match self {
            DType::F32 | DType::F16 | DType::BF16 => 1,
            DType::Q4_0 | DType::Q8_0 => 32,
        }
    }

    /// Maps a GGUF `ggml_type` id. Unsupported ids yield `None`.
    pub fn from_gguf_type(id: u32) -> Option<DType> {
        match id {
            0 => Some(DType::F32),
            1 => Some(DType::F16),
            2 => Some(DType::Q4_0),
            8 => Some(DType::Q8_0),
            30 => Some(DType::BF16),
            _ => None,
        }
    }

    pub fn to_gguf_type(&self) -> u32 {
        match self {
            DType::F32 => 0,
            DType::F16 => 1,
            DType::Q4_0 => 2,
            DType::Q8_0 => 8,
            DType::BF16 => 30,
        }
    }

    /// Byte size of `numel` elements stored in this dtype.
    pub fn storage_bytes(&self, numel: usize) -> usize {
        numel.div_ceil(self.block_size()) * self.size_in_bytes()
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DType::F32 => "f32",
            DType::F16 => "f16",
            DType::BF16 => "bf16",
            DType::Q4_0 => "q4_0",
            DType::Q8_0 => "q8_0",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gguf_ids() {
        for dtype in [DType::F32, DType::F16, DType::BF16, DType::Q4_0, DType::Q8_0] {
            assert_eq!(DType::from_gguf_type(dtype.to_gguf_type()), Some(dtype));
        }
        assert!(DType::from_gguf_type(999).is_none());
    }

    #[test]
    fn test_storage_bytes() {
        assert_eq!(DType::F32.storage_bytes(10), 40);
        assert_eq!(DType::BF16.storage_bytes(10), 20);
        // 33 elements need two Q8_0 blocks.
        assert_eq!(DType::Q8_0.storage_bytes(33), 68);
        assert_eq!(DType::Q4_0.storage_bytes(32), 18);
    }
}
