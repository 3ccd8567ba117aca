//! Self-describing binary encoding for dense numeric arrays.
//!
//! Embeddings, poses and landmark vectors are persisted as opaque blobs.
//! Each blob carries its element type and shape so decoding needs no
//! outside hint:
//!
//! ```text
//! | "LKA1" | dtype u8 | ndim u8 | dims: u64 LE × ndim | elements LE, row-major |
//! ```
//!
//! Floats are stored by bit pattern, so `decode(encode(a)) == a` holds
//! bit-for-bit for every array `encode` accepts (rank at most 32).

use ndarray::{Array1, ArrayD, IxDyn};
use thiserror::Error;

const MAGIC: &[u8; 4] = b"LKA1";
const HEADER_LEN: usize = MAGIC.len() + 2;
const MAX_NDIM: usize = 32;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum EncodeError {
    #[error("array rank {0} exceeds the maximum of {MAX_NDIM}")]
    RankTooLarge(usize),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
    #[error("blob too short: need at least {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("bad magic bytes, not an encoded array")]
    BadMagic,
    #[error("unknown dtype tag {0}")]
    UnknownDtype(u8),
    #[error("array rank {0} exceeds the supported maximum")]
    RankTooLarge(usize),
    #[error("shape {0:?} overflows the addressable element count")]
    ShapeOverflow(Vec<u64>),
    #[error("payload length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("expected a 1-D {expected} array, got {actual}")]
    UnexpectedKind { expected: &'static str, actual: String },
}

/// Element type tag stored in the blob header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Dtype {
    F32 = 1,
    F64 = 2,
    I32 = 3,
    I64 = 4,
    U8 = 5,
}

impl Dtype {
    fn from_tag(tag: u8) -> Result<Self, DecodeError> {
        match tag {
            1 => Ok(Self::F32),
            2 => Ok(Self::F64),
            3 => Ok(Self::I32),
            4 => Ok(Self::I64),
            5 => Ok(Self::U8),
            other => Err(DecodeError::UnknownDtype(other)),
        }
    }

    fn size(self) -> usize {
        match self {
            Self::F32 | Self::I32 => 4,
            Self::F64 | Self::I64 => 8,
            Self::U8 => 1,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::U8 => "u8",
        }
    }
}

/// A dense n-dimensional array of one of the supported element types.
#[derive(Debug, Clone, PartialEq)]
pub enum NumericArray {
    F32(ArrayD<f32>),
    F64(ArrayD<f64>),
    I32(ArrayD<i32>),
    I64(ArrayD<i64>),
    U8(ArrayD<u8>),
}

impl NumericArray {
    pub fn dtype(&self) -> Dtype {
        match self {
            Self::F32(_) => Dtype::F32,
            Self::F64(_) => Dtype::F64,
            Self::I32(_) => Dtype::I32,
            Self::I64(_) => Dtype::I64,
            Self::U8(_) => Dtype::U8,
        }
    }

    pub fn shape(&self) -> &[usize] {
        match self {
            Self::F32(a) => a.shape(),
            Self::F64(a) => a.shape(),
            Self::I32(a) => a.shape(),
            Self::I64(a) => a.shape(),
            Self::U8(a) => a.shape(),
        }
    }

    /// Bit-level equality. Unlike `==`, NaN payloads compare equal to
    /// themselves and `0.0` differs from `-0.0`.
    pub fn bit_eq(&self, other: &NumericArray) -> bool {
        match (self, other) {
            (Self::F32(a), Self::F32(b)) => {
                a.shape() == b.shape()
                    && a.iter().zip(b.iter()).all(|(x, y)| x.to_bits() == y.to_bits())
            }
            (Self::F64(a), Self::F64(b)) => {
                a.shape() == b.shape()
                    && a.iter().zip(b.iter()).all(|(x, y)| x.to_bits() == y.to_bits())
            }
            (Self::I32(a), Self::I32(b)) => a == b,
            (Self::I64(a), Self::I64(b)) => a == b,
            (Self::U8(a), Self::U8(b)) => a == b,
            _ => false,
        }
    }

    fn describe(&self) -> String {
        format!("{} array of shape {:?}", self.dtype().name(), self.shape())
    }
}

trait Element: Copy {
    const DTYPE: Dtype;
    fn put(self, out: &mut Vec<u8>);
    fn take(bytes: &[u8]) -> Self;
}

macro_rules! impl_element {
    ($ty:ty, $dtype:expr) => {
        impl Element for $ty {
            const DTYPE: Dtype = $dtype;

            fn put(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            fn take(bytes: &[u8]) -> Self {
                let mut buf = [0u8; std::mem::size_of::<$ty>()];
                buf.copy_from_slice(bytes);
                <$ty>::from_le_bytes(buf)
            }
        }
    };
}

impl_element!(f32, Dtype::F32);
impl_element!(f64, Dtype::F64);
impl_element!(i32, Dtype::I32);
impl_element!(i64, Dtype::I64);
impl_element!(u8, Dtype::U8);

/// Encoder/decoder handed to the catalog store at construction.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArrayCodec;

impl ArrayCodec {
    pub fn new() -> Self {
        Self
    }

    /// Encode `array`. Arrays of rank above 32 are rejected so that every
    /// blob produced here decodes back to the same array.
    pub fn encode(&self, array: &NumericArray) -> Result<Vec<u8>, EncodeError> {
        let rank = checked_rank(array.shape().len())?;
        Ok(match array {
            NumericArray::F32(a) => encode_typed(a, rank),
            NumericArray::F64(a) => encode_typed(a, rank),
            NumericArray::I32(a) => encode_typed(a, rank),
            NumericArray::I64(a) => encode_typed(a, rank),
            NumericArray::U8(a) => encode_typed(a, rank),
        })
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<NumericArray, DecodeError> {
        if bytes.len() < HEADER_LEN {
            return Err(DecodeError::Truncated {
                expected: HEADER_LEN,
                actual: bytes.len(),
            });
        }
        if &bytes[..MAGIC.len()] != MAGIC {
            return Err(DecodeError::BadMagic);
        }

        let dtype = Dtype::from_tag(bytes[4])?;
        let ndim = bytes[5] as usize;
        if ndim > MAX_NDIM {
            return Err(DecodeError::RankTooLarge(ndim));
        }

        let dims_end = HEADER_LEN + ndim * 8;
        if bytes.len() < dims_end {
            return Err(DecodeError::Truncated {
                expected: dims_end,
                actual: bytes.len(),
            });
        }

        let raw_dims: Vec<u64> = bytes[HEADER_LEN..dims_end]
            .chunks_exact(8)
            .map(read_u64)
            .collect();

        let mut dims = Vec::with_capacity(ndim);
        let mut count: usize = 1;
        for &d in &raw_dims {
            let d = usize::try_from(d).map_err(|_| DecodeError::ShapeOverflow(raw_dims.clone()))?;
            count = count
                .checked_mul(d)
                .ok_or_else(|| DecodeError::ShapeOverflow(raw_dims.clone()))?;
            dims.push(d);
        }
        let payload_len = count
            .checked_mul(dtype.size())
            .ok_or_else(|| DecodeError::ShapeOverflow(raw_dims.clone()))?;

        let payload = &bytes[dims_end..];
        if payload.len() != payload_len {
            return Err(DecodeError::LengthMismatch {
                expected: payload_len,
                actual: payload.len(),
            });
        }

        let array = match dtype {
            Dtype::F32 => NumericArray::F32(decode_typed(&dims, payload)?),
            Dtype::F64 => NumericArray::F64(decode_typed(&dims, payload)?),
            Dtype::I32 => NumericArray::I32(decode_typed(&dims, payload)?),
            Dtype::I64 => NumericArray::I64(decode_typed(&dims, payload)?),
            Dtype::U8 => NumericArray::U8(decode_typed(&dims, payload)?),
        };
        Ok(array)
    }

    /// Encode a flat f32 vector as a 1-D array.
    pub fn encode_vector(&self, values: &[f32]) -> Vec<u8> {
        encode_typed(&Array1::from(values.to_vec()).into_dyn(), 1)
    }

    /// Decode a blob that must hold a 1-D f32 array.
    pub fn decode_vector(&self, bytes: &[u8]) -> Result<Vec<f32>, DecodeError> {
        match self.decode(bytes)? {
            NumericArray::F32(a) if a.ndim() == 1 => Ok(a.iter().copied().collect()),
            other => Err(DecodeError::UnexpectedKind {
                expected: "f32",
                actual: other.describe(),
            }),
        }
    }
}

fn checked_rank(ndim: usize) -> Result<u8, EncodeError> {
    u8::try_from(ndim)
        .ok()
        .filter(|&r| usize::from(r) <= MAX_NDIM)
        .ok_or(EncodeError::RankTooLarge(ndim))
}

fn encode_typed<T: Element>(array: &ArrayD<T>, rank: u8) -> Vec<u8> {
    let elem_size = T::DTYPE.size();
    let mut out = Vec::with_capacity(HEADER_LEN + array.ndim() * 8 + array.len() * elem_size);
    out.extend_from_slice(MAGIC);
    out.push(T::DTYPE as u8);
    out.push(rank);
    for &d in array.shape() {
        out.extend_from_slice(&(d as u64).to_le_bytes());
    }
    // Logical iteration order is row-major regardless of memory layout.
    for &v in array.iter() {
        v.put(&mut out);
    }
    out
}

fn decode_typed<T: Element>(dims: &[usize], payload: &[u8]) -> Result<ArrayD<T>, DecodeError> {
    let values: Vec<T> = payload
        .chunks_exact(T::DTYPE.size())
        .map(T::take)
        .collect();
    let actual = values.len() * T::DTYPE.size();
    ArrayD::from_shape_vec(IxDyn(dims), values).map_err(|_| DecodeError::LengthMismatch {
        expected: dims.iter().product::<usize>() * T::DTYPE.size(),
        actual,
    })
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    u64::from_le_bytes(buf)
}
