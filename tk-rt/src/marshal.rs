//! Native words carried across the host boundary as arrays of bytes.
//!
//! The host has no address type, so pointers travel as `size_of::<T>()`
//! element arrays in native byte order.

use crate::fatal::{Fatal, RtResult};
use crate::host::Value;

pub trait NativeWord: Copy {
    const SIZE: usize;

    fn from_ne_slice(bytes: &[u8]) -> Self;
    fn to_ne_vec(self) -> Vec<u8>;
}

macro_rules! impl_native_word_int {
    ($($ty:ty),*) => {
        $(
            impl NativeWord for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                fn from_ne_slice(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(bytes);
                    <$ty>::from_ne_bytes(raw)
                }

                fn to_ne_vec(self) -> Vec<u8> {
                    self.to_ne_bytes().to_vec()
                }
            }
        )*
    };
}

impl_native_word_int!(usize, isize, u32, i32, u64, i64);

impl NativeWord for *mut u8 {
    const SIZE: usize = std::mem::size_of::<*mut u8>();

    fn from_ne_slice(bytes: &[u8]) -> Self {
        usize::from_ne_slice(bytes) as *mut u8
    }

    fn to_ne_vec(self) -> Vec<u8> {
        (self as usize).to_ne_vec()
    }
}

impl NativeWord for *const u8 {
    const SIZE: usize = std::mem::size_of::<*const u8>();

    fn from_ne_slice(bytes: &[u8]) -> Self {
        usize::from_ne_slice(bytes) as *const u8
    }

    fn to_ne_vec(self) -> Vec<u8> {
        (self as usize).to_ne_vec()
    }
}

/// Decodes a byte sequence of exactly `T::SIZE` elements into a `T`.
pub fn to_value<T: NativeWord>(op: &'static str, sequence: &Value) -> RtResult<T> {
    let len = sequence.index_len().ok_or_else(|| {
        Fatal::shape(
            op,
            format!("expected a byte array, got {}", sequence.type_name()),
        )
    })?;
    if len != T::SIZE {
        return Err(Fatal::shape(
            op,
            format!(
                "array does not match value size: expected {} bytes, got {len}",
                T::SIZE
            ),
        ));
    }

    let mut bytes = Vec::with_capacity(T::SIZE);
    for index in 0..T::SIZE {
        let element = sequence.get_index(index).ok_or_else(|| {
            Fatal::shape(op, format!("array does not match value size: missing index {index}"))
        })?;
        bytes.push(byte_from_value(op, &element)?);
    }
    Ok(T::from_ne_slice(&bytes))
}

/// Encodes `value` as a fresh array of its native-order bytes.
pub fn to_byte_sequence<T: NativeWord>(value: T) -> Value {
    Value::from_bytes(&value.to_ne_vec())
}

pub(crate) fn byte_from_value(op: &'static str, value: &Value) -> RtResult<u8> {
    let number = match value {
        Value::Int(number) => *number,
        Value::Float(number) if number.fract() == 0.0 => *number as i64,
        other => {
            return Err(Fatal::shape(
                op,
                format!("byte values must be integers, got {}", other.type_name()),
            ));
        }
    };
    u8::try_from(number)
        .map_err(|_| Fatal::range(op, format!("value outside of byte range: {number}")))
}
