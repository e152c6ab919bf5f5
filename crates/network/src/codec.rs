// -------------------------------------------------------------------------------------------------
//  Copyright (C) 2025 Sockline Developers. All rights reserved.
//  https://github.com/sockline/sockline
//
//  Licensed under the GNU Lesser General Public License Version 3.0 (the "License");
//  You may not use this file except in compliance with the License.
//  You may obtain a copy of the License at https://www.gnu.org/licenses/lgpl-3.0.en.html
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.
// -------------------------------------------------------------------------------------------------

//! Serialization of write arguments into the pending send buffer.
//!
//! A write from a foreign thread may carry several fields which are concatenated in argument
//! order: scalars are written as their raw fixed-width representation (native byte order) and
//! byte strings are appended verbatim.

use bytes::{BufMut, Bytes, BytesMut};

/// One field of a multi-field write.
#[derive(Clone, Debug, PartialEq)]
pub enum WireValue {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    /// A byte sequence appended as-is.
    Bytes(Bytes),
}

impl WireValue {
    /// Returns the number of bytes this value occupies on the wire.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        match self {
            Self::U8(_) | Self::I8(_) => 1,
            Self::U16(_) | Self::I16(_) => 2,
            Self::U32(_) | Self::I32(_) | Self::F32(_) => 4,
            Self::U64(_) | Self::I64(_) | Self::F64(_) => 8,
            Self::Bytes(b) => b.len(),
        }
    }

    /// Returns true for an empty byte sequence. Scalars are never empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Bytes(b) if b.is_empty())
    }

    /// Appends the wire representation of this value to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        match self {
            Self::U8(v) => buf.put_u8(*v),
            Self::U16(v) => buf.put_slice(&v.to_ne_bytes()),
            Self::U32(v) => buf.put_slice(&v.to_ne_bytes()),
            Self::U64(v) => buf.put_slice(&v.to_ne_bytes()),
            Self::I8(v) => buf.put_i8(*v),
            Self::I16(v) => buf.put_slice(&v.to_ne_bytes()),
            Self::I32(v) => buf.put_slice(&v.to_ne_bytes()),
            Self::I64(v) => buf.put_slice(&v.to_ne_bytes()),
            Self::F32(v) => buf.put_slice(&v.to_ne_bytes()),
            Self::F64(v) => buf.put_slice(&v.to_ne_bytes()),
            Self::Bytes(b) => buf.put_slice(b),
        }
    }
}

/// Appends every value to `buf` in order.
pub fn encode_values(values: &[WireValue], buf: &mut BytesMut) {
    buf.reserve(values.iter().map(WireValue::encoded_len).sum());
    for value in values {
        value.encode(buf);
    }
}

macro_rules! impl_from_scalar {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for WireValue {
                fn from(value: $ty) -> Self {
                    Self::$variant(value)
                }
            }
        )*
    };
}

impl_from_scalar!(
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    f32 => F32,
    f64 => F64,
);

impl From<Bytes> for WireValue {
    fn from(value: Bytes) -> Self {
        Self::Bytes(value)
    }
}

impl From<Vec<u8>> for WireValue {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(value))
    }
}

impl From<&[u8]> for WireValue {
    fn from(value: &[u8]) -> Self {
        Self::Bytes(Bytes::copy_from_slice(value))
    }
}

impl From<&str> for WireValue {
    fn from(value: &str) -> Self {
        Self::Bytes(Bytes::copy_from_slice(value.as_bytes()))
    }
}

impl From<String> for WireValue {
    fn from(value: String) -> Self {
        Self::Bytes(Bytes::from(value))
    }
}
