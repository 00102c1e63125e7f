//! Primitive codecs for fixed-width numbers
//! in either Little Endian or Big Endian,
//! decided at run time.

use crate::header::Tag;
use byteordered::{ByteOrdered, Endianness};
use std::io::{Read, Write};

type Result<T> = std::io::Result<T>;

/// A basic decoder of fixed-width primitive values.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BasicDecoder {
    endianness: Endianness,
}

impl BasicDecoder {
    /// Create a basic decoder for the given byte order.
    pub fn new(endianness: Endianness) -> Self {
        BasicDecoder { endianness }
    }

    /// The byte order of this decoder.
    pub fn endianness(&self) -> Endianness {
        self.endianness
    }

    /// Decode an unsigned short.
    pub fn decode_us<S: Read>(&self, source: S) -> Result<u16> {
        ByteOrdered::runtime(source, self.endianness).read_u16()
    }

    /// Decode a sequence of unsigned shorts.
    pub fn decode_us_into<S: Read>(&self, source: S, target: &mut [u16]) -> Result<()> {
        ByteOrdered::runtime(source, self.endianness).read_u16_into(target)
    }

    /// Decode an unsigned long (32 bits).
    pub fn decode_ul<S: Read>(&self, source: S) -> Result<u32> {
        ByteOrdered::runtime(source, self.endianness).read_u32()
    }

    /// Decode a sequence of unsigned longs.
    pub fn decode_ul_into<S: Read>(&self, source: S, target: &mut [u32]) -> Result<()> {
        ByteOrdered::runtime(source, self.endianness).read_u32_into(target)
    }

    /// Decode an unsigned very long (64 bits).
    pub fn decode_uv<S: Read>(&self, source: S) -> Result<u64> {
        ByteOrdered::runtime(source, self.endianness).read_u64()
    }

    /// Decode a signed short.
    pub fn decode_ss<S: Read>(&self, source: S) -> Result<i16> {
        ByteOrdered::runtime(source, self.endianness).read_i16()
    }

    /// Decode a signed long (32 bits).
    pub fn decode_sl<S: Read>(&self, source: S) -> Result<i32> {
        ByteOrdered::runtime(source, self.endianness).read_i32()
    }

    /// Decode a signed very long (64 bits).
    pub fn decode_sv<S: Read>(&self, source: S) -> Result<i64> {
        ByteOrdered::runtime(source, self.endianness).read_i64()
    }

    /// Decode a single precision float.
    pub fn decode_fl<S: Read>(&self, source: S) -> Result<f32> {
        ByteOrdered::runtime(source, self.endianness).read_f32()
    }

    /// Decode a double precision float.
    pub fn decode_fd<S: Read>(&self, source: S) -> Result<f64> {
        ByteOrdered::runtime(source, self.endianness).read_f64()
    }

    /// Decode an attribute tag (group then element).
    pub fn decode_tag<S: Read>(&self, source: S) -> Result<Tag> {
        let mut source = ByteOrdered::runtime(source, self.endianness);
        let group = source.read_u16()?;
        let element = source.read_u16()?;
        Ok(Tag(group, element))
    }
}

impl From<Endianness> for BasicDecoder {
    fn from(endianness: Endianness) -> Self {
        BasicDecoder::new(endianness)
    }
}

/// A basic encoder of fixed-width primitive values.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BasicEncoder {
    endianness: Endianness,
}

impl BasicEncoder {
    /// Create a basic encoder for the given byte order.
    pub fn new(endianness: Endianness) -> Self {
        BasicEncoder { endianness }
    }

    /// The byte order of this encoder.
    pub fn endianness(&self) -> Endianness {
        self.endianness
    }

    /// Encode an unsigned short.
    pub fn encode_us<S: Write>(&self, sink: S, value: u16) -> Result<()> {
        ByteOrdered::runtime(sink, self.endianness).write_u16(value)
    }

    /// Encode an unsigned long (32 bits).
    pub fn encode_ul<S: Write>(&self, sink: S, value: u32) -> Result<()> {
        ByteOrdered::runtime(sink, self.endianness).write_u32(value)
    }

    /// Encode an unsigned very long (64 bits).
    pub fn encode_uv<S: Write>(&self, sink: S, value: u64) -> Result<()> {
        ByteOrdered::runtime(sink, self.endianness).write_u64(value)
    }

    /// Encode a signed short.
    pub fn encode_ss<S: Write>(&self, sink: S, value: i16) -> Result<()> {
        ByteOrdered::runtime(sink, self.endianness).write_i16(value)
    }

    /// Encode a signed long (32 bits).
    pub fn encode_sl<S: Write>(&self, sink: S, value: i32) -> Result<()> {
        ByteOrdered::runtime(sink, self.endianness).write_i32(value)
    }

    /// Encode a signed very long (64 bits).
    pub fn encode_sv<S: Write>(&self, sink: S, value: i64) -> Result<()> {
        ByteOrdered::runtime(sink, self.endianness).write_i64(value)
    }

    /// Encode a single precision float.
    pub fn encode_fl<S: Write>(&self, sink: S, value: f32) -> Result<()> {
        ByteOrdered::runtime(sink, self.endianness).write_f32(value)
    }

    /// Encode a double precision float.
    pub fn encode_fd<S: Write>(&self, sink: S, value: f64) -> Result<()> {
        ByteOrdered::runtime(sink, self.endianness).write_f64(value)
    }

    /// Encode an attribute tag (group then element).
    pub fn encode_tag<S: Write>(&self, sink: S, tag: Tag) -> Result<()> {
        let mut sink = ByteOrdered::runtime(sink, self.endianness);
        sink.write_u16(tag.0)?;
        sink.write_u16(tag.1)
    }
}

impl From<Endianness> for BasicEncoder {
    fn from(endianness: Endianness) -> Self {
        BasicEncoder::new(endianness)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_integers_both_orders() {
        let data: &[u8] = &[0xC3, 0x3C, 0x33, 0xCC];

        let le = BasicDecoder::new(Endianness::Little);
        let be = BasicDecoder::new(Endianness::Big);

        assert_eq!(le.decode_us(data).unwrap(), 0x3CC3);
        assert_eq!(be.decode_us(data).unwrap(), 0xC33C);
        assert_eq!(le.decode_ul(data).unwrap(), 0xCC33_3CC3);
        assert_eq!(be.decode_ul(data).unwrap(), 0xC33C_33CC);
    }

    #[test]
    fn tag_round_trip() {
        let mut buf = Vec::new();
        let enc = BasicEncoder::new(Endianness::Little);
        enc.encode_tag(&mut buf, Tag(0x0008, 0x0018)).unwrap();
        assert_eq!(buf, [0x08, 0x00, 0x18, 0x00]);

        let dec = BasicDecoder::new(Endianness::Little);
        assert_eq!(dec.decode_tag(&buf[..]).unwrap(), Tag(0x0008, 0x0018));
    }
}
