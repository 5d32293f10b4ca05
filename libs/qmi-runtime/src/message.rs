//! The codec contract generated message types implement
//!
//! `TlvCodec`/`FixedTlvCodec` are the only schema-independent machinery in
//! the codec layer; everything schema-dependent (which fields exist, in
//! what order) lives in generated code that calls into these. This is the
//! "no interpretive codec, only a factory table" split: primitives and
//! containers are coded once, here, by hand.

use std::any::Any;

use crate::error::QmiError;

/// A value that can be written into, and read back out of, a TLV payload.
pub trait TlvCodec: Sized {
    fn write_into(&self, buf: &mut Vec<u8>);
    fn read_from(buf: &[u8]) -> Self;
}

/// A [`TlvCodec`] whose wire width never depends on its value.
///
/// Required for `Vec<T>` decoding: without a fixed per-element width there
/// is no way to tell where one array element ends and the next begins.
pub trait FixedTlvCodec: TlvCodec {
    const WIRE_SIZE: usize;
}

macro_rules! impl_int_codec {
    ($ty:ty, $size:expr) => {
        impl TlvCodec for $ty {
            fn write_into(&self, buf: &mut Vec<u8>) {
                buf.extend_from_slice(&self.to_le_bytes());
            }

            fn read_from(buf: &[u8]) -> Self {
                let mut bytes = [0u8; $size];
                let take = buf.len().min($size);
                bytes[..take].copy_from_slice(&buf[..take]);
                <$ty>::from_le_bytes(bytes)
            }
        }

        impl FixedTlvCodec for $ty {
            const WIRE_SIZE: usize = $size;
        }
    };
}

impl_int_codec!(u8, 1);
impl_int_codec!(i8, 1);
impl_int_codec!(u16, 2);
impl_int_codec!(i16, 2);
impl_int_codec!(u32, 4);
impl_int_codec!(i32, 4);
impl_int_codec!(u64, 8);
impl_int_codec!(i64, 8);

impl<const N: usize> TlvCodec for [u8; N] {
    fn write_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self);
    }

    fn read_from(buf: &[u8]) -> Self {
        let mut out = [0u8; N];
        let take = buf.len().min(N);
        out[..take].copy_from_slice(&buf[..take]);
        out
    }
}

impl<const N: usize> FixedTlvCodec for [u8; N] {
    const WIRE_SIZE: usize = N;
}

/// `string` format: consumed to the end of its enclosing TLV's payload (§3).
impl TlvCodec for String {
    fn write_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self.as_bytes());
    }

    fn read_from(buf: &[u8]) -> Self {
        String::from_utf8_lossy(buf).into_owned()
    }
}

/// `array` format: homogeneous repetition of a fixed-width element, length
/// bounded by the enclosing TLV, not self-described.
impl<T: FixedTlvCodec> TlvCodec for Vec<T> {
    fn write_into(&self, buf: &mut Vec<u8>) {
        for item in self {
            item.write_into(buf);
        }
    }

    fn read_from(buf: &[u8]) -> Self {
        let mut out = Vec::new();
        let mut offset = 0;
        while offset + T::WIRE_SIZE <= buf.len() {
            out.push(T::read_from(&buf[offset..offset + T::WIRE_SIZE]));
            offset += T::WIRE_SIZE;
        }
        out
    }
}

/// A generated message's request (Input) half: knows its own routing and
/// how to serialize itself into a TLV stream.
pub trait Request: Send {
    fn service_id(&self) -> u8;
    fn message_id(&self) -> u16;
    fn write_tlvs(&self, buf: &mut Vec<u8>);
}

/// A generated message's response (Output) half, object-safe so the
/// runtime's registry can hand the reader loop a boxed, type-erased
/// instance to decode into.
pub trait Message: Send {
    fn service_id(&self) -> u8;
    fn message_id(&self) -> u16;

    /// Decode this message's TLVs from a raw tlv-stream slice. Tags absent
    /// from the stream leave their field at its zero value, except the
    /// canonical Operation Result tag, whose absence is an error (§4.3).
    fn read_tlvs(&mut self, buf: &[u8]) -> Result<(), QmiError>;

    /// `Some((status, error_code))` if this message's output declares an
    /// Operation Result TLV; `None` otherwise.
    fn operation_result(&self) -> Option<(u16, u16)>;

    /// Type-erasing upcast so `Send` can downcast a boxed `Message` back to
    /// the concrete `Output` type the caller is awaiting.
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u16_round_trips_little_endian() {
        let mut buf = Vec::new();
        0x1234u16.write_into(&mut buf);
        assert_eq!(buf, vec![0x34, 0x12]);
        assert_eq!(u16::read_from(&buf), 0x1234);
    }

    #[test]
    fn vec_of_u8_decodes_every_byte_as_an_element() {
        let decoded: Vec<u8> = Vec::read_from(&[1, 2, 3]);
        assert_eq!(decoded, vec![1, 2, 3]);
    }

    #[test]
    fn string_consumes_whole_slice() {
        let s = String::read_from(b"hello");
        assert_eq!(s, "hello");
    }

    #[test]
    fn fixed_array_round_trips() {
        let mut buf = Vec::new();
        let arr: [u8; 4] = [9, 8, 7, 6];
        arr.write_into(&mut buf);
        assert_eq!(<[u8; 4]>::read_from(&buf), arr);
    }
}
