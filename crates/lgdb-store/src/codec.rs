//! Fixed-width byte codecs for table keys and values.
//!
//! Every key and value stored in a slot table has a width known at compile
//! time. Encoding is little-endian and alignment-free, so slots can be packed
//! back to back inside the mapped region and read back in another process.

use crate::types::TextRef;

/// A type with a fixed-width, platform-independent byte encoding.
///
/// `encode` receives a slice of exactly `SIZE` bytes; `decode` is handed the
/// same slice back. Implementations must round-trip: `decode(encode(x)) == x`.
pub trait FixedCodec: Sized {
    /// Encoded width in bytes.
    const SIZE: usize;

    fn encode(&self, out: &mut [u8]);

    fn decode(bytes: &[u8]) -> Self;

    /// Convenience: encode into a fresh buffer.
    fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; Self::SIZE];
        self.encode(&mut out);
        out
    }
}

macro_rules! int_codec {
    ($($ty:ty),*) => {
        $(
            impl FixedCodec for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                fn encode(&self, out: &mut [u8]) {
                    out[..Self::SIZE].copy_from_slice(&self.to_le_bytes());
                }

                fn decode(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(&bytes[..Self::SIZE]);
                    <$ty>::from_le_bytes(raw)
                }
            }
        )*
    };
}

int_codec!(u8, u16, u32, u64, i8, i16, i32, i64);

impl FixedCodec for () {
    const SIZE: usize = 0;

    fn encode(&self, _out: &mut [u8]) {}

    fn decode(_bytes: &[u8]) -> Self {}
}

impl FixedCodec for bool {
    const SIZE: usize = 1;

    fn encode(&self, out: &mut [u8]) {
        out[0] = u8::from(*self);
    }

    fn decode(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }
}

impl<const N: usize> FixedCodec for [u8; N] {
    const SIZE: usize = N;

    fn encode(&self, out: &mut [u8]) {
        out[..N].copy_from_slice(self);
    }

    fn decode(bytes: &[u8]) -> Self {
        let mut raw = [0u8; N];
        raw.copy_from_slice(&bytes[..N]);
        raw
    }
}

impl<A: FixedCodec, B: FixedCodec> FixedCodec for (A, B) {
    const SIZE: usize = A::SIZE + B::SIZE;

    fn encode(&self, out: &mut [u8]) {
        self.0.encode(&mut out[..A::SIZE]);
        self.1.encode(&mut out[A::SIZE..A::SIZE + B::SIZE]);
    }

    fn decode(bytes: &[u8]) -> Self {
        (
            A::decode(&bytes[..A::SIZE]),
            B::decode(&bytes[A::SIZE..A::SIZE + B::SIZE]),
        )
    }
}

impl<A: FixedCodec, B: FixedCodec, C: FixedCodec> FixedCodec for (A, B, C) {
    const SIZE: usize = A::SIZE + B::SIZE + C::SIZE;

    fn encode(&self, out: &mut [u8]) {
        let mut w = FieldWriter::new(out);
        w.put(&self.0);
        w.put(&self.1);
        w.put(&self.2);
    }

    fn decode(bytes: &[u8]) -> Self {
        let mut r = FieldReader::new(bytes);
        (r.get(), r.get(), r.get())
    }
}

impl FixedCodec for TextRef {
    const SIZE: usize = 8;

    fn encode(&self, out: &mut [u8]) {
        let mut w = FieldWriter::new(out);
        w.put(&self.offset);
        w.put(&self.len);
    }

    fn decode(bytes: &[u8]) -> Self {
        let mut r = FieldReader::new(bytes);
        TextRef {
            offset: r.get(),
            len: r.get(),
        }
    }
}

/// Sequential writer used to encode records field by field.
pub struct FieldWriter<'a> {
    out: &'a mut [u8],
    at: usize,
}

impl<'a> FieldWriter<'a> {
    pub fn new(out: &'a mut [u8]) -> Self {
        FieldWriter { out, at: 0 }
    }

    pub fn put<T: FixedCodec>(&mut self, value: &T) {
        value.encode(&mut self.out[self.at..self.at + T::SIZE]);
        self.at += T::SIZE;
    }
}

/// Sequential reader mirroring [`FieldWriter`].
pub struct FieldReader<'a> {
    bytes: &'a [u8],
    at: usize,
}

impl<'a> FieldReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        FieldReader { bytes, at: 0 }
    }

    pub fn get<T: FixedCodec>(&mut self) -> T {
        let value = T::decode(&self.bytes[self.at..self.at + T::SIZE]);
        self.at += T::SIZE;
        value
    }
}
