//! Dynamic values exchanged with the embedding host.

use std::fmt;

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Undefined,
    Int(i64),
    Float(f64),
    Bool(bool),
    String(String),
    Array(Vec<Value>),
    Buffer(ExternalBuffer),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Buffer(_) => "buffer",
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_))
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Int(value) => Some(*value as f64),
            Value::Float(value) => Some(*value),
            _ => None,
        }
    }

    /// Integer view of a number, truncating floats toward zero. Floats that
    /// are not finite or do not fit in an `i64` have no integer view.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            Value::Float(value) => {
                let truncated = value.trunc();
                let bound = -(i64::MIN as f64);
                (truncated >= -bound && truncated < bound).then_some(truncated as i64)
            }
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(text) => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn as_buffer(&self) -> Option<ExternalBuffer> {
        match self {
            Value::Buffer(buffer) => Some(*buffer),
            _ => None,
        }
    }

    pub fn is_indexable(&self) -> bool {
        matches!(self, Value::Array(_) | Value::Buffer(_))
    }

    pub fn index_len(&self) -> Option<usize> {
        match self {
            Value::Array(values) => Some(values.len()),
            Value::Buffer(buffer) => Some(buffer.len()),
            _ => None,
        }
    }

    pub fn has_index(&self, index: usize) -> bool {
        self.index_len().is_some_and(|len| index < len)
    }

    pub fn get_index(&self, index: usize) -> Option<Value> {
        match self {
            Value::Array(values) => values.get(index).cloned(),
            Value::Buffer(buffer) => buffer.get(index).map(|byte| Value::Int(byte as i64)),
            _ => None,
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Value {
        Value::Array(bytes.iter().map(|byte| Value::Int(*byte as i64)).collect())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Int(value) => write!(f, "{value}"),
            Value::Float(value) => write!(f, "{value}"),
            Value::Bool(value) => write!(f, "{value}"),
            Value::String(text) => write!(f, "{text}"),
            Value::Array(values) => {
                write!(f, "[")?;
                for (index, value) in values.iter().enumerate() {
                    if index > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{value}")?;
                }
                write!(f, "]")
            }
            Value::Buffer(buffer) => write!(f, "<buffer {:p} len={}>", buffer.ptr, buffer.len),
        }
    }
}

/// Raw byte region exposed to the host as an indexable object.
///
/// Indexed reads and writes go straight to memory. The buffer does not own
/// the region; whoever allocated it frees it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExternalBuffer {
    ptr: *mut u8,
    len: usize,
}

impl ExternalBuffer {
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `len` bytes for as long as
    /// the buffer (or any copy of it) is used.
    pub unsafe fn from_raw_parts(ptr: *mut u8, len: usize) -> Self {
        Self { ptr, len }
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, index: usize) -> Option<u8> {
        if index >= self.len {
            return None;
        }
        Some(unsafe { self.ptr.add(index).read() })
    }

    /// Returns `false` when `index` is out of range.
    pub fn set(&self, index: usize, byte: u8) -> bool {
        if index >= self.len {
            return false;
        }
        unsafe { self.ptr.add(index).write(byte) };
        true
    }

    pub fn to_vec(&self) -> Vec<u8> {
        (0..self.len).filter_map(|index| self.get(index)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_convert_with_truncation() {
        assert_eq!(Value::Float(7.9).as_int(), Some(7));
        assert_eq!(Value::Float(-2.5).as_int(), Some(-2));
        assert_eq!(Value::Float(f64::NAN).as_int(), None);
        assert_eq!(Value::Float(f64::INFINITY).as_int(), None);
        assert_eq!(Value::Float(1e19).as_int(), None);
        assert_eq!(Value::Float(-1e19).as_int(), None);
        assert_eq!(Value::Float(9_223_372_036_854_775_808.0).as_int(), None);
        assert_eq!(Value::Float(-9_223_372_036_854_775_808.0).as_int(), Some(i64::MIN));
        assert_eq!(Value::Int(3).as_number(), Some(3.0));
        assert!(!Value::String("3".to_string()).is_number());
    }

    #[test]
    fn buffer_indexing_reads_and_writes_memory() {
        let mut storage = [0u8; 4];
        let buffer = unsafe { ExternalBuffer::from_raw_parts(storage.as_mut_ptr(), storage.len()) };
        assert!(buffer.set(2, 0xC3));
        assert!(!buffer.set(4, 1));
        let value = Value::Buffer(buffer);
        assert_eq!(value.index_len(), Some(4));
        assert!(value.has_index(3));
        assert!(!value.has_index(4));
        assert_eq!(value.get_index(2), Some(Value::Int(0xC3)));
        assert_eq!(storage[2], 0xC3);
    }

    #[test]
    fn arrays_index_like_buffers() {
        let value = Value::from_bytes(&[1, 2, 3]);
        assert_eq!(value.get_index(1), Some(Value::Int(2)));
        assert_eq!(value.get_index(3), None);
        assert_eq!(value.to_string(), "[1,2,3]");
        assert!(Value::Int(1).get_index(0).is_none());
    }
}
