//! Primitive codec and the structured helpers built on top of it.
//!
//! Every encoder has a sizing mirror that computes the exact wire size
//! without touching a [`Stream`]. Callers reserve the sum of the mirrors in
//! one shot, then encode.
use crate::stream::{Stream, WIRE_ALIGN};

/// A value with a wire representation.
pub trait Encode {
    /// Wire size in bytes. Must equal what [`Encode::encode`] writes.
    fn sizeof(&self) -> usize;

    /// Write the value at the output cursor. The bytes must be reserved.
    fn encode(&self, cs: &mut Stream<'_>);
}

/// A value that can be read back from the wire.
///
/// Decoding never fails outright: an overrun poisons the stream and the
/// value decodes from zero-filled bytes.
pub trait Decode: Sized {
    fn decode(cs: &mut Stream<'_>) -> Self;
}

/// A value whose wire size does not depend on its contents.
pub trait FixedSize {
    const WIRE_SIZE: usize;
}

/// Round `size` up to the wire alignment.
#[inline]
pub const fn align(size: usize) -> usize {
    (size + WIRE_ALIGN - 1) & !(WIRE_ALIGN - 1)
}

/// Write `val` into a wire slot of `size` bytes.
#[inline]
pub fn encode(cs: &mut Stream<'_>, size: usize, val: &[u8]) {
    assert!(size % WIRE_ALIGN == 0, "unaligned wire size {size}");
    cs.write(size, val);
}

/// Read a wire slot of `size` bytes into `val`.
#[inline]
pub fn decode(cs: &mut Stream<'_>, size: usize, val: &mut [u8]) {
    assert!(size % WIRE_ALIGN == 0, "unaligned wire size {size}");
    cs.read(size, val);
}

/// Read the next `val.len()` bytes without consuming them.
#[inline]
pub fn peek(cs: &mut Stream<'_>, size: usize, val: &mut [u8]) {
    assert!(size % WIRE_ALIGN == 0, "unaligned wire size {size}");
    debug_assert!(val.len() <= size);
    cs.peek(val);
}

macro_rules! numeric {
    ($ty:ty, $size:expr) => {
        impl FixedSize for $ty {
            const WIRE_SIZE: usize = $size;
        }

        impl Encode for $ty {
            #[inline(always)]
            fn sizeof(&self) -> usize {
                $size
            }

            #[inline(always)]
            fn encode(&self, cs: &mut Stream<'_>) {
                encode(cs, $size, &self.to_le_bytes());
            }
        }

        impl Decode for $ty {
            #[inline(always)]
            fn decode(cs: &mut Stream<'_>) -> Self {
                let mut buf = [0u8; std::mem::size_of::<$ty>()];
                decode(cs, $size, &mut buf);
                <$ty>::from_le_bytes(buf)
            }
        }
    };
}

numeric!(u32, 4);
numeric!(i32, 4);
numeric!(u64, 8);
numeric!(i64, 8);
numeric!(f32, 4);
numeric!(f64, 8);

impl FixedSize for bool {
    const WIRE_SIZE: usize = 4;
}

impl Encode for bool {
    #[inline]
    fn sizeof(&self) -> usize {
        Self::WIRE_SIZE
    }

    #[inline]
    fn encode(&self, cs: &mut Stream<'_>) {
        (*self as u32).encode(cs);
    }
}

impl Decode for bool {
    #[inline]
    fn decode(cs: &mut Stream<'_>) -> Self {
        u32::decode(cs) != 0
    }
}

impl FixedSize for usize {
    const WIRE_SIZE: usize = 8;
}

impl Encode for usize {
    #[inline]
    fn sizeof(&self) -> usize {
        Self::WIRE_SIZE
    }

    #[inline]
    fn encode(&self, cs: &mut Stream<'_>) {
        (*self as u64).encode(cs);
    }
}

impl Decode for usize {
    /// Values that do not fit the host word poison the stream.
    #[inline]
    fn decode(cs: &mut Stream<'_>) -> Self {
        let val = u64::decode(cs);
        usize::try_from(val).unwrap_or_else(|_| {
            cs.set_error();
            0
        })
    }
}

impl<T: Encode + ?Sized> Encode for &T {
    #[inline]
    fn sizeof(&self) -> usize {
        (**self).sizeof()
    }

    #[inline]
    fn encode(&self, cs: &mut Stream<'_>) {
        (**self).encode(cs)
    }
}

#[inline]
pub const fn sizeof_array_size(_size: usize) -> usize {
    8
}

/// Element count of the array that follows.
#[inline]
pub fn encode_array_size(cs: &mut Stream<'_>, size: usize) {
    (size as u64).encode(cs);
}

/// Decode an element count, poisoning the stream when it exceeds `max`.
/// An invalid count decodes as 0.
pub fn decode_array_size(cs: &mut Stream<'_>, max: usize) -> usize {
    let size = u64::decode(cs);
    match usize::try_from(size) {
        Ok(size) if size <= max => size,
        _ => {
            tracing::debug!(size, max, "array size out of bounds");
            cs.set_error();
            0
        }
    }
}

pub fn peek_array_size(cs: &mut Stream<'_>) -> u64 {
    let mut buf = [0u8; 8];
    peek(cs, 8, &mut buf);
    u64::from_le_bytes(buf)
}

/// A simple pointer: an array size of 0 or 1 followed by the pointee.
impl<T: Encode> Encode for Option<T> {
    fn sizeof(&self) -> usize {
        match self {
            Some(val) => sizeof_array_size(1) + val.sizeof(),
            None => sizeof_array_size(0),
        }
    }

    fn encode(&self, cs: &mut Stream<'_>) {
        match self {
            Some(val) => {
                encode_array_size(cs, 1);
                val.encode(cs);
            }
            None => encode_array_size(cs, 0),
        }
    }
}

impl<T: Decode> Decode for Option<T> {
    fn decode(cs: &mut Stream<'_>) -> Self {
        match decode_array_size(cs, 1) {
            1 => Some(T::decode(cs)),
            _ => None,
        }
    }
}

#[inline]
pub const fn sizeof_blob(len: usize) -> usize {
    align(len)
}

/// Opaque bytes, zero-padded to the wire alignment. The length travels
/// separately.
#[inline]
pub fn encode_blob(cs: &mut Stream<'_>, data: &[u8]) {
    encode(cs, sizeof_blob(data.len()), data);
}

#[inline]
pub fn decode_blob(cs: &mut Stream<'_>, data: &mut [u8]) {
    decode(cs, sizeof_blob(data.len()), data);
}

/// A NUL-terminated char array: its length including the terminator, then
/// the padded bytes.
impl Encode for str {
    fn sizeof(&self) -> usize {
        let len = self.len() + 1;
        sizeof_array_size(len) + sizeof_blob(len)
    }

    fn encode(&self, cs: &mut Stream<'_>) {
        let len = self.len() + 1;
        encode_array_size(cs, len);
        // the terminator is the first padding byte
        encode(cs, sizeof_blob(len), self.as_bytes());
    }
}

impl Encode for String {
    #[inline]
    fn sizeof(&self) -> usize {
        self.as_str().sizeof()
    }

    #[inline]
    fn encode(&self, cs: &mut Stream<'_>) {
        self.as_str().encode(cs)
    }
}

impl Decode for String {
    /// Bytes after the first NUL are dropped. Invalid UTF-8 poisons the
    /// stream.
    fn decode(cs: &mut Stream<'_>) -> Self {
        let max = cs.in_remaining();
        let len = decode_array_size(cs, max);
        let mut buf = vec![0u8; len];
        decode_blob(cs, &mut buf);

        let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        buf.truncate(end);
        match String::from_utf8(buf) {
            Ok(s) => s,
            Err(_) => {
                cs.set_error();
                String::new()
            }
        }
    }
}

impl<T: Encode> Encode for [T] {
    fn sizeof(&self) -> usize {
        self.iter()
            .fold(sizeof_array_size(self.len()), |acc, v| acc + v.sizeof())
    }

    fn encode(&self, cs: &mut Stream<'_>) {
        encode_array_size(cs, self.len());
        for val in self {
            val.encode(cs);
        }
    }
}

impl<T: Encode> Encode for Vec<T> {
    #[inline]
    fn sizeof(&self) -> usize {
        self.as_slice().sizeof()
    }

    #[inline]
    fn encode(&self, cs: &mut Stream<'_>) {
        self.as_slice().encode(cs)
    }
}

impl<T: Decode> Decode for Vec<T> {
    fn decode(cs: &mut Stream<'_>) -> Self {
        // every element takes at least one wire slot
        let max = cs.in_remaining() / WIRE_ALIGN;
        let len = decode_array_size(cs, max);
        (0..len).map(|_| T::decode(cs)).collect()
    }
}
