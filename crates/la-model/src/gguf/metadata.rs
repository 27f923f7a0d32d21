use std::collections::HashMap;
use std::io::Read;

use super::bytes::{read_array, read_string, read_u32, read_u64, write_string};
use crate::error::{ModelError, Result};

/// A single GGUF metadata value.
#[derive(Debug, Clone, PartialEq)]
pub enum GgufMetadataValue {
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    U64(u64),
    I64(i64),
    F32(f32),
    F64(f64),
    Bool(bool),
    String(String),
    Array(Vec<GgufMetadataValue>),
}

impl GgufMetadataValue {
    /// Returns a human-readable name for the variant (used in error messages).
    fn type_name(&self) -> &'static str {
        match self {
            GgufMetadataValue::U8(_) => "U8",
            GgufMetadataValue::I8(_) => "I8",
            GgufMetadataValue::U16(_) => "U16",
            GgufMetadataValue::I16(_) => "I16",
            GgufMetadataValue::U32(_) => "U32",
            GgufMetadataValue::I32(_) => "I32",
            GgufMetadataValue::U64(_) => "U64",
            GgufMetadataValue::I64(_) => "I64",
            GgufMetadataValue::F32(_) => "F32",
            GgufMetadataValue::F64(_) => "F64",
            GgufMetadataValue::Bool(_) => "Bool",
            GgufMetadataValue::String(_) => "String",
            GgufMetadataValue::Array(_) => "Array",
        }
    }

    /// GGUF value type ID:
    ///   0=U8, 1=I8, 2=U16, 3=I16, 4=U32, 5=I32, 6=F32, 7=Bool,
    ///   8=String, 9=Array, 10=U64, 11=I64, 12=F64
    fn type_id(&self) -> u32 {
        match self {
            GgufMetadataValue::U8(_) => 0,
            GgufMetadataValue::I8(_) => 1,
            GgufMetadataValue::U16(_) => 2,
            GgufMetadataValue::I16(_) => 3,
            GgufMetadataValue::U32(_) => 4,
            GgufMetadataValue::I32(_) => 5,
            GgufMetadataValue::F32(_) => 6,
            GgufMetadataValue::Bool(_) => 7,
            GgufMetadataValue::String(_) => 8,
            GgufMetadataValue::Array(_) => 9,
            GgufMetadataValue::U64(_) => 10,
            GgufMetadataValue::I64(_) => 11,
            GgufMetadataValue::F64(_) => 12,
        }
    }

    /// Serialize the payload (without the leading type ID).
    pub(crate) fn write_payload(&self, out: &mut Vec<u8>) -> Result<()> {
        match self {
            GgufMetadataValue::U8(v) => out.push(*v),
            GgufMetadataValue::I8(v) => out.extend_from_slice(&v.to_le_bytes()),
            GgufMetadataValue::U16(v) => out.extend_from_slice(&v.to_le_bytes()),
            GgufMetadataValue::I16(v) => out.extend_from_slice(&v.to_le_bytes()),
            GgufMetadataValue::U32(v) => out.extend_from_slice(&v.to_le_bytes()),
            GgufMetadataValue::I32(v) => out.extend_from_slice(&v.to_le_bytes()),
            GgufMetadataValue::U64(v) => out.extend_from_slice(&v.to_le_bytes()),
            GgufMetadataValue::I64(v) => out.extend_from_slice(&v.to_le_bytes()),
            GgufMetadataValue::F32(v) => out.extend_from_slice(&v.to_le_bytes()),
            GgufMetadataValue::F64(v) => out.extend_from_slice(&v.to_le_bytes()),
            GgufMetadataValue::Bool(v) => out.push(u8::from(*v)),
            GgufMetadataValue::String(s) => write_string(out, s),
            GgufMetadataValue::Array(items) => {
                // Arrays are homogeneous; an empty one is written as U8.
                let elem_type = items.first().map(|v| v.type_id()).unwrap_or(0);
                if items.iter().any(|v| v.type_id() != elem_type) {
                    return Err(ModelError::Other(
                        "GGUF arrays must hold a single element type".to_string(),
                    ));
                }
                out.extend_from_slice(&elem_type.to_le_bytes());
                out.extend_from_slice(&(items.len() as u64).to_le_bytes());
                for item in items {
                    item.write_payload(out)?;
                }
            }
        }
        Ok(())
    }
}

/// Collection of GGUF metadata key-value pairs.
#[derive(Debug, Clone, Default)]
pub struct GgufMetadata {
    pub entries: HashMap<String, GgufMetadataValue>,
}

fn mismatch(key: &str, expected: &str, got: &GgufMetadataValue) -> ModelError {
    ModelError::TypeMismatch {
        key: key.to_string(),
        expected: expected.to_string(),
        got: got.type_name().to_string(),
    }
}

impl GgufMetadata {
    fn lookup(&self, key: &str) -> Result<&GgufMetadataValue> {
        self.entries
            .get(key)
            .ok_or_else(|| ModelError::MissingKey(key.to_string()))
    }

    /// Retrieve a string value by key.
    pub fn get_string(&self, key: &str) -> Result<&str> {
        match self.lookup(key)? {
            GgufMetadataValue::String(s) => Ok(s.as_str()),
            other => Err(mismatch(key, "String", other)),
        }
    }

    /// Like [`get_string`](Self::get_string), but a missing key is `None`.
    pub fn get_string_opt(&self, key: &str) -> Result<Option<&str>> {
        match self.get_string(key) {
            Ok(s) => Ok(Some(s)),
            Err(ModelError::MissingKey(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Retrieve a u32 value by key.
    pub fn get_u32(&self, key: &str) -> Result<u32> {
        match self.lookup(key)? {
            GgufMetadataValue::U32(v) => Ok(*v),
            other => Err(mismatch(key, "U32", other)),
        }
    }

    /// Retrieve an f32 value by key.
    pub fn get_f32(&self, key: &str) -> Result<f32> {
        match self.lookup(key)? {
            GgufMetadataValue::F32(v) => Ok(*v),
            other => Err(mismatch(key, "F32", other)),
        }
    }

    /// Retrieve a bool value by key.
    pub fn get_bool(&self, key: &str) -> Result<bool> {
        match self.lookup(key)? {
            GgufMetadataValue::Bool(v) => Ok(*v),
            other => Err(mismatch(key, "Bool", other)),
        }
    }

    fn get_array<T>(
        &self,
        key: &str,
        expected: &str,
        extract: impl Fn(&GgufMetadataValue) -> Option<T>,
    ) -> Result<Vec<T>> {
        match self.lookup(key)? {
            GgufMetadataValue::Array(arr) => arr
                .iter()
                .enumerate()
                .map(|(i, v)| {
                    extract(v).ok_or_else(|| mismatch(&format!("{}[{}]", key, i), expected, v))
                })
                .collect(),
            other => Err(mismatch(key, "Array", other)),
        }
    }

    /// Retrieve a string array value by key.
    pub fn get_string_array(&self, key: &str) -> Result<Vec<String>> {
        self.get_array(key, "String", |v| match v {
            GgufMetadataValue::String(s) => Some(s.clone()),
            _ => None,
        })
    }

    /// Retrieve an f32 array value by key.
    pub fn get_f32_array(&self, key: &str) -> Result<Vec<f32>> {
        self.get_array(key, "F32", |v| match v {
            GgufMetadataValue::F32(f) => Some(*f),
            _ => None,
        })
    }

    /// Retrieve an i32 array value by key, e.g. `tokenizer.ggml.token_type`.
    pub fn get_i32_array(&self, key: &str) -> Result<Vec<i32>> {
        self.get_array(key, "I32", |v| match v {
            GgufMetadataValue::I32(i) => Some(*i),
            _ => None,
        })
    }

    /// Parse `n_kv` key-value metadata entries from a reader.
    ///
    /// Each entry consists of:
    /// 1. A GGUF string key (u64 length + UTF-8 bytes).
    /// 2. A u32 value type ID.
    /// 3. The value payload, whose format depends on the type ID.
    pub fn parse_kv(reader: &mut impl Read, n_kv: u64) -> Result<GgufMetadata> {
        let mut entries = HashMap::new();
        for _ in 0..n_kv {
            let key = read_string(reader)?;
            let type_id = read_u32(reader)?;
            let value = read_value(reader, type_id)?;
            entries.insert(key, value);
        }
        Ok(GgufMetadata { entries })
    }
}

/// Read a single GGUF metadata value given its type ID.
fn read_value(reader: &mut impl Read, type_id: u32) -> Result<GgufMetadataValue> {
    Ok(match type_id {
        0 => GgufMetadataValue::U8(u8::from_le_bytes(read_array(reader)?)),
        1 => GgufMetadataValue::I8(i8::from_le_bytes(read_array(reader)?)),
        2 => GgufMetadataValue::U16(u16::from_le_bytes(read_array(reader)?)),
        3 => GgufMetadataValue::I16(i16::from_le_bytes(read_array(reader)?)),
        4 => GgufMetadataValue::U32(read_u32(reader)?),
        5 => GgufMetadataValue::I32(i32::from_le_bytes(read_array(reader)?)),
        6 => GgufMetadataValue::F32(f32::from_le_bytes(read_array(reader)?)),
        7 => {
            let [b] = read_array::<1>(reader)?;
            GgufMetadataValue::Bool(b != 0)
        }
        8 => GgufMetadataValue::String(read_string(reader)?),
        9 => {
            // Array: u32 element_type, u64 count, then count values of element_type
            let elem_type = read_u32(reader)?;
            let count = read_u64(reader)? as usize;
            let mut values = Vec::with_capacity(count.min(1 << 20));
            for _ in 0..count {
                values.push(read_value(reader, elem_type)?);
            }
            GgufMetadataValue::Array(values)
        }
        10 => GgufMetadataValue::U64(read_u64(reader)?),
        11 => GgufMetadataValue::I64(i64::from_le_bytes(read_array(reader)?)),
        12 => GgufMetadataValue::F64(f64::from_le_bytes(read_array(reader)?)),
        other => return Err(ModelError::UnsupportedGgufType(other)),
    })
}

/// Serialize one key-value entry the way [`GgufMetadata::parse_kv`] reads it.
pub(crate) fn write_kv(out: &mut Vec<u8>, key: &str, value: &GgufMetadataValue) -> Result<()> {
    write_string(out, key);
    out.extend_from_slice(&value.type_id().to_le_bytes());
    value.write_payload(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn parse_one(key: &str, value: GgufMetadataValue) -> GgufMetadata {
        let mut bytes = Vec::new();
        write_kv(&mut bytes, key, &value).unwrap();
        GgufMetadata::parse_kv(&mut Cursor::new(bytes), 1).unwrap()
    }

    #[test]
    fn test_scalar_values() {
        let md = parse_one("a.u32", GgufMetadataValue::U32(42));
        assert_eq!(md.get_u32("a.u32").unwrap(), 42);

        let md = parse_one("a.bool", GgufMetadataValue::Bool(true));
        assert!(md.get_bool("a.bool").unwrap());

        let md = parse_one("a.f64", GgufMetadataValue::F64(-0.25));
        assert_eq!(md.entries["a.f64"], GgufMetadataValue::F64(-0.25));
    }

    #[test]
    fn test_arrays() {
        let md = parse_one(
            "types",
            GgufMetadataValue::Array(vec![GgufMetadataValue::I32(1), GgufMetadataValue::I32(3)]),
        );
        assert_eq!(md.get_i32_array("types").unwrap(), vec![1, 3]);
        assert!(md.get_string_array("types").is_err());
    }

    #[test]
    fn test_type_mismatch_and_missing() {
        let md = parse_one("n", GgufMetadataValue::U64(5));
        assert!(matches!(
            md.get_u32("n").unwrap_err(),
            ModelError::TypeMismatch { .. }
        ));
        assert!(matches!(
            md.get_u32("absent").unwrap_err(),
            ModelError::MissingKey(_)
        ));
        assert_eq!(md.get_string_opt("absent").unwrap(), None);
    }

    #[test]
    fn test_mixed_array_rejected_on_write() {
        let value = GgufMetadataValue::Array(vec![
            GgufMetadataValue::U32(1),
            GgufMetadataValue::F32(1.0),
        ]);
        assert!(write_kv(&mut Vec::new(), "mixed", &value).is_err());
    }

    #[test]
    fn test_unknown_type_id() {
        let mut bytes = Vec::new();
        write_string(&mut bytes, "k");
        bytes.extend_from_slice(&99u32.to_le_bytes());
        let err = GgufMetadata::parse_kv(&mut Cursor::new(bytes), 1).unwrap_err();
        assert!(matches!(err, ModelError::UnsupportedGgufType(99)));
    }
}
