//! Little-endian element codec for uniform and individual properties.
//!
//! Stored binary data is always little-endian regardless of the host. A
//! uniform property holds exactly one element, an individual property holds
//! `len / width` of them back to back.
use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

use crate::record::Format;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CodecError {
    #[error("buffer of {len} bytes is not a multiple of the {width} byte element width")]
    Width { len: usize, width: usize },

    #[error("uniform value needs {width} bytes, found {len}")]
    Uniform { len: usize, width: usize },
}

/// A primitive that can be stored as a property element
pub trait Element: Copy + Sized {
    const FORMAT: Format;
    const WIDTH: usize;

    fn put(self, buf: &mut [u8]);
    fn get(buf: &[u8]) -> Self;
}

macro_rules! element {
    ($ty:ty, $format:expr, $write:ident, $read:ident) => {
        impl Element for $ty {
            const FORMAT: Format = $format;
            const WIDTH: usize = std::mem::size_of::<$ty>();

            fn put(self, buf: &mut [u8]) {
                LittleEndian::$write(buf, self)
            }

            fn get(buf: &[u8]) -> Self {
                LittleEndian::$read(buf)
            }
        }
    };
}

element!(f32, Format::Float32, write_f32, read_f32);
element!(f64, Format::Float64, write_f64, read_f64);
element!(i32, Format::Int32, write_i32, read_i32);
element!(i64, Format::Int64, write_i64, read_i64);
element!(u32, Format::UInt32, write_u32, read_u32);
element!(u64, Format::UInt64, write_u64, read_u64);

impl Element for u8 {
    const FORMAT: Format = Format::UInt8;
    const WIDTH: usize = 1;

    fn put(self, buf: &mut [u8]) {
        buf[0] = self;
    }

    fn get(buf: &[u8]) -> Self {
        buf[0]
    }
}

pub fn encode<T: Element>(values: &[T]) -> Vec<u8> {
    let mut out = vec![0u8; values.len() * T::WIDTH];

    for (v, chunk) in values.iter().zip(out.chunks_exact_mut(T::WIDTH)) {
        v.put(chunk);
    }
    out
}

pub fn encode_uniform<T: Element>(value: T) -> Vec<u8> {
    encode(&[value])
}

pub fn decode<T: Element>(buf: &[u8]) -> Result<Vec<T>, CodecError> {
    if buf.len() % T::WIDTH != 0 {
        return Err(CodecError::Width {
            len: buf.len(),
            width: T::WIDTH,
        });
    }

    Ok(buf.chunks_exact(T::WIDTH).map(T::get).collect())
}

/// Decode a single element. An empty buffer (missing entry) gives `None`.
pub fn decode_uniform<T: Element>(buf: &[u8]) -> Result<Option<T>, CodecError> {
    match buf.len() {
        0 => Ok(None),
        len if len == T::WIDTH => Ok(Some(T::get(buf))),
        len => Err(CodecError::Uniform { len, width: T::WIDTH }),
    }
}
