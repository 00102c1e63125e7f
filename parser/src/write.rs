//! A forward-pass encoder for DICOM data sets.
//!
//! Encoding walks the data set once in tag order. Sequence and item
//! lengths are computed bottom-up and always written out explicitly;
//! undefined lengths never appear on output, except in fragment
//! sequences, whose encoding is delimited by definition. Odd-sized
//! values are padded to even length.

use medicom_core::buffer::FileSegment;
use medicom_core::codec::BasicEncoder;
use medicom_core::header::{Header, Tag, VR, ITEM, SEQUENCE_DELIMITER};
use medicom_core::transfer_syntax::TransferSyntax;
use medicom_core::value::{DicomValue, PrimitiveValue};
use medicom_core::{DataElement, Dataset};
use snafu::{Backtrace, ResultExt, Snafu};
use std::io::Write;

/// An error which occurred while encoding a data set.
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    /// Failed to write to the byte sink.
    #[snafu(display("Failed to write to the byte sink"))]
    WriteSink {
        backtrace: Backtrace,
        source: std::io::Error,
    },
    /// Failed to load a deferred value from its file segment.
    #[snafu(display("Failed to load deferred value from {}", segment.path.display()))]
    LoadDeferred {
        segment: FileSegment,
        backtrace: Backtrace,
        source: std::io::Error,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Encode a full data set into the sink.
pub fn write_dataset<W: Write>(dataset: &Dataset, ts: TransferSyntax, sink: &mut W) -> Result<()> {
    for elem in dataset {
        write_element(elem, ts, sink)?;
    }
    Ok(())
}

/// Encode a data set with a group length element
/// at the start of every attribute group.
///
/// Any group length elements already in the data set are dropped
/// in favor of the computed ones. Command sets require this form.
pub fn write_dataset_with_group_lengths<W: Write>(
    dataset: &Dataset,
    ts: TransferSyntax,
    sink: &mut W,
) -> Result<()> {
    let mut group: Option<u16> = None;
    for elem in dataset {
        if elem.tag().is_group_length() {
            continue;
        }
        if group != Some(elem.tag().group()) {
            let g = elem.tag().group();
            group = Some(g);
            let total: u64 = dataset
                .iter()
                .filter(|e| e.tag().group() == g && !e.tag().is_group_length())
                .map(|e| element_len(e, ts))
                .sum();
            let gl = DataElement::new(
                Tag(g, 0x0000),
                VR::UL,
                DicomValue::primitive(total as u32),
            );
            write_element(&gl, ts, sink)?;
        }
        write_element(elem, ts, sink)?;
    }
    Ok(())
}

/// The number of bytes [`write_dataset`] would produce.
pub fn encoded_len(dataset: &Dataset, ts: TransferSyntax) -> u64 {
    dataset.iter().map(|e| element_len(e, ts)).sum()
}

/// The number of bytes [`write_dataset_with_group_lengths`] would produce.
pub fn encoded_len_with_group_lengths(dataset: &Dataset, ts: TransferSyntax) -> u64 {
    let mut total = 0;
    let mut group: Option<u16> = None;
    for elem in dataset {
        if elem.tag().is_group_length() {
            continue;
        }
        if group != Some(elem.tag().group()) {
            group = Some(elem.tag().group());
            total += header_len(VR::UL, ts) + 4;
        }
        total += element_len(elem, ts);
    }
    total
}

fn pad(len: u64) -> u64 {
    (len + 1) & !1
}

fn header_len(vr: VR, ts: TransferSyntax) -> u64 {
    if !ts.explicit_vr {
        8
    } else if vr.is_short_form() {
        8
    } else {
        12
    }
}

fn value_len(elem: &DataElement, ts: TransferSyntax) -> u64 {
    match elem.value() {
        DicomValue::Primitive(v) => pad(v.byte_len() as u64),
        DicomValue::Sequence { items, .. } => items
            .iter()
            .map(|item| 8 + encoded_len(item, ts))
            .sum(),
        DicomValue::Fragments {
            offset_table,
            fragments,
        } => {
            8 + pad(offset_table.len() as u64)
                + fragments
                    .iter()
                    .map(|f| 8 + pad(f.len() as u64))
                    .sum::<u64>()
                + 8
        }
        DicomValue::Deferred(segment) => pad(segment.len),
    }
}

fn element_len(elem: &DataElement, ts: TransferSyntax) -> u64 {
    header_len(elem.vr(), ts) + value_len(elem, ts)
}

fn write_header<W: Write>(
    tag: Tag,
    vr: VR,
    len: u32,
    ts: TransferSyntax,
    sink: &mut W,
) -> Result<()> {
    let enc = BasicEncoder::new(ts.endianness);
    enc.encode_tag(&mut *sink, tag).context(WriteSinkSnafu)?;
    if !ts.explicit_vr {
        enc.encode_ul(&mut *sink, len).context(WriteSinkSnafu)?;
    } else {
        sink.write_all(&vr.to_bytes()).context(WriteSinkSnafu)?;
        if vr.is_short_form() {
            enc.encode_us(&mut *sink, len as u16)
                .context(WriteSinkSnafu)?;
        } else {
            sink.write_all(&[0, 0]).context(WriteSinkSnafu)?;
            enc.encode_ul(&mut *sink, len).context(WriteSinkSnafu)?;
        }
    }
    Ok(())
}

fn write_element<W: Write>(elem: &DataElement, ts: TransferSyntax, sink: &mut W) -> Result<()> {
    let vr = elem.vr();
    match elem.value() {
        DicomValue::Primitive(value) => {
            let raw_len = value.byte_len() as u64;
            write_header(elem.tag(), vr, pad(raw_len) as u32, ts, sink)?;
            write_primitive(value, vr, ts, sink)?;
            if raw_len % 2 != 0 {
                // space padding for text, NUL for identifiers and binary
                let padding = if vr.is_text() && vr != VR::UI { b' ' } else { 0 };
                sink.write_all(&[padding]).context(WriteSinkSnafu)?;
            }
            Ok(())
        }
        DicomValue::Sequence { items, .. } => {
            let enc = BasicEncoder::new(ts.endianness);
            let total: u64 = items.iter().map(|item| 8 + encoded_len(item, ts)).sum();
            write_header(elem.tag(), VR::SQ, total as u32, ts, sink)?;
            for item in items {
                enc.encode_tag(&mut *sink, ITEM).context(WriteSinkSnafu)?;
                enc.encode_ul(&mut *sink, encoded_len(item, ts) as u32)
                    .context(WriteSinkSnafu)?;
                write_dataset(item, ts, sink)?;
            }
            Ok(())
        }
        DicomValue::Fragments {
            offset_table,
            fragments,
        } => {
            let enc = BasicEncoder::new(ts.endianness);
            write_header(elem.tag(), vr, 0xFFFF_FFFF, ts, sink)?;
            write_fragment_item(&enc, offset_table, sink)?;
            for fragment in fragments {
                write_fragment_item(&enc, fragment, sink)?;
            }
            enc.encode_tag(&mut *sink, SEQUENCE_DELIMITER)
                .context(WriteSinkSnafu)?;
            enc.encode_ul(&mut *sink, 0).context(WriteSinkSnafu)?;
            Ok(())
        }
        DicomValue::Deferred(segment) => {
            let bytes = segment.read_all().context(LoadDeferredSnafu {
                segment: segment.clone(),
            })?;
            write_header(elem.tag(), vr, pad(bytes.len() as u64) as u32, ts, sink)?;
            sink.write_all(&bytes).context(WriteSinkSnafu)?;
            if bytes.len() % 2 != 0 {
                sink.write_all(&[0]).context(WriteSinkSnafu)?;
            }
            Ok(())
        }
    }
}

fn write_fragment_item<W: Write>(enc: &BasicEncoder, bytes: &[u8], sink: &mut W) -> Result<()> {
    enc.encode_tag(&mut *sink, ITEM).context(WriteSinkSnafu)?;
    enc.encode_ul(&mut *sink, pad(bytes.len() as u64) as u32)
        .context(WriteSinkSnafu)?;
    sink.write_all(bytes).context(WriteSinkSnafu)?;
    if bytes.len() % 2 != 0 {
        sink.write_all(&[0]).context(WriteSinkSnafu)?;
    }
    Ok(())
}

fn write_primitive<W: Write>(
    value: &PrimitiveValue,
    vr: VR,
    ts: TransferSyntax,
    sink: &mut W,
) -> Result<()> {
    let enc = BasicEncoder::new(ts.endianness);
    match value {
        PrimitiveValue::Empty => Ok(()),
        PrimitiveValue::Str(s) => sink.write_all(s.as_bytes()).context(WriteSinkSnafu),
        PrimitiveValue::Strs(ss) => {
            for (i, s) in ss.iter().enumerate() {
                if i > 0 {
                    sink.write_all(b"\\").context(WriteSinkSnafu)?;
                }
                sink.write_all(s.as_bytes()).context(WriteSinkSnafu)?;
            }
            Ok(())
        }
        PrimitiveValue::RawStr(v) => sink.write_all(v).context(WriteSinkSnafu),
        PrimitiveValue::U8(v) => sink.write_all(v).context(WriteSinkSnafu),
        PrimitiveValue::I16(v) => {
            for &x in v {
                enc.encode_ss(&mut *sink, x).context(WriteSinkSnafu)?;
            }
            Ok(())
        }
        PrimitiveValue::U16(v) => {
            for &x in v {
                enc.encode_us(&mut *sink, x).context(WriteSinkSnafu)?;
            }
            Ok(())
        }
        PrimitiveValue::I32(v) => {
            for &x in v {
                enc.encode_sl(&mut *sink, x).context(WriteSinkSnafu)?;
            }
            Ok(())
        }
        PrimitiveValue::U32(v) => {
            for &x in v {
                enc.encode_ul(&mut *sink, x).context(WriteSinkSnafu)?;
            }
            Ok(())
        }
        PrimitiveValue::I64(v) => {
            for &x in v {
                enc.encode_sv(&mut *sink, x).context(WriteSinkSnafu)?;
            }
            Ok(())
        }
        PrimitiveValue::U64(v) => {
            for &x in v {
                enc.encode_uv(&mut *sink, x).context(WriteSinkSnafu)?;
            }
            Ok(())
        }
        PrimitiveValue::F32(v) => {
            for &x in v {
                enc.encode_fl(&mut *sink, x).context(WriteSinkSnafu)?;
            }
            Ok(())
        }
        PrimitiveValue::F64(v) => {
            for &x in v {
                enc.encode_fd(&mut *sink, x).context(WriteSinkSnafu)?;
            }
            Ok(())
        }
        PrimitiveValue::Tags(v) => {
            for &x in v {
                enc.encode_tag(&mut *sink, x).context(WriteSinkSnafu)?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::read::{DatasetReader, ReadStatus};
    use medicom_core::buffer::ChunkSource;
    use medicom_core::transfer_syntax::{EXPLICIT_VR_LE, IMPLICIT_VR_LE};

    /// Defined-length nested data set in Explicit VR Little Endian.
    #[rustfmt::skip]
    const NESTED_DEFINED: &[u8] = &[
        // (0008,0060) CS "CT"
        0x08, 0x00, 0x60, 0x00, b'C', b'S', 0x02, 0x00, b'C', b'T',
        // (0008,1110) SQ, defined length 22
        0x08, 0x00, 0x10, 0x11, b'S', b'Q', 0x00, 0x00, 0x16, 0x00, 0x00, 0x00,
        // item, defined length 14
        0xFE, 0xFF, 0x00, 0xE0, 0x0E, 0x00, 0x00, 0x00,
        // (0008,1150) UI "1.2.3" (padded)
        0x08, 0x00, 0x50, 0x11, b'U', b'I', 0x06, 0x00,
        b'1', b'.', b'2', b'.', b'3', 0x00,
        // (0010,0010) PN "DOE^JOHN"
        0x10, 0x00, 0x10, 0x00, b'P', b'N', 0x08, 0x00,
        b'D', b'O', b'E', b'^', b'J', b'O', b'H', b'N',
    ];

    fn decode(bytes: &[u8], ts: TransferSyntax) -> Dataset {
        let mut source = ChunkSource::new();
        source.append(bytes.to_vec());
        let mut reader = DatasetReader::new(source, ts);
        assert_eq!(reader.read(None).unwrap(), ReadStatus::Complete);
        reader.into_dataset()
    }

    #[test]
    fn round_trips_defined_length_stream() {
        let ds = decode(NESTED_DEFINED, EXPLICIT_VR_LE);
        let mut out = Vec::new();
        write_dataset(&ds, EXPLICIT_VR_LE, &mut out).unwrap();
        assert_eq!(out, NESTED_DEFINED);
        assert_eq!(encoded_len(&ds, EXPLICIT_VR_LE), NESTED_DEFINED.len() as u64);
    }

    #[test]
    fn round_trips_text_that_is_not_utf8() {
        // (0010,0010) PN "JOS\xE9E" in Latin-1, space padded
        #[rustfmt::skip]
        const LATIN1_NAME: &[u8] = &[
            0x10, 0x00, 0x10, 0x00, b'P', b'N', 0x06, 0x00,
            b'J', b'O', b'S', 0xE9, b'E', b' ',
        ];
        let ds = decode(LATIN1_NAME, EXPLICIT_VR_LE);
        let mut out = Vec::new();
        write_dataset(&ds, EXPLICIT_VR_LE, &mut out).unwrap();
        assert_eq!(out, LATIN1_NAME);

        // the string accessor substitutes the offending byte and trims the pad
        assert_eq!(
            ds.get_str(Tag(0x0010, 0x0010)).as_deref(),
            Some("JOS\u{FFFD}E")
        );
    }

    #[test]
    fn round_trips_across_syntaxes() {
        let ds = decode(NESTED_DEFINED, EXPLICIT_VR_LE);
        let mut implicit = Vec::new();
        write_dataset(&ds, IMPLICIT_VR_LE, &mut implicit).unwrap();
        assert_eq!(encoded_len(&ds, IMPLICIT_VR_LE), implicit.len() as u64);

        let back = decode(&implicit, IMPLICIT_VR_LE);
        assert_eq!(
            back.get_str(Tag(0x0010, 0x0010)),
            ds.get_str(Tag(0x0010, 0x0010))
        );
        let items = back.get(Tag(0x0008, 0x1110)).unwrap().value().items().unwrap();
        assert_eq!(
            items[0].get_str(Tag(0x0008, 0x1150)).as_deref(),
            Some("1.2.3")
        );
    }

    #[test]
    fn writes_group_lengths() {
        let mut cmd = Dataset::new();
        cmd.put_value(Tag(0x0000, 0x0002), VR::UI, "1.2.840.10008.1.1\0".to_owned());
        cmd.put_value(Tag(0x0000, 0x0100), VR::US, 0x0030u16);
        cmd.put_value(Tag(0x0000, 0x0110), VR::US, 1u16);
        cmd.put_value(Tag(0x0000, 0x0800), VR::US, 0x0101u16);
        cmd.put_value(Tag(0x0000, 0x0900), VR::US, 0u16);

        let mut out = Vec::new();
        write_dataset_with_group_lengths(&cmd, IMPLICIT_VR_LE, &mut out).unwrap();

        // 5 elements of (8 + len), announced by the group length element
        let expected_total: u32 = (8 + 18) + 4 * (8 + 2);
        assert_eq!(
            &out[..12],
            &[
                0x00, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00,
                expected_total as u8, 0x00, 0x00, 0x00,
            ]
        );
        assert_eq!(out.len() as u64, 12 + u64::from(expected_total));
        assert_eq!(
            encoded_len_with_group_lengths(&cmd, IMPLICIT_VR_LE),
            out.len() as u64
        );

        // decoding it back drops the group length and keeps the fields
        let back = decode(&out, IMPLICIT_VR_LE);
        assert_eq!(back.get_u16(Tag(0x0000, 0x0100)), Some(0x0030));
        assert_eq!(back.get_u16(Tag(0x0000, 0x0800)), Some(0x0101));
    }

    #[test]
    fn fragment_sequences_are_delimited() {
        let mut ds = Dataset::new();
        ds.put(DataElement::new(
            Tag(0x7FE0, 0x0010),
            VR::OB,
            DicomValue::Fragments {
                offset_table: Vec::new(),
                fragments: vec![vec![1, 2, 3, 4]],
            },
        ));
        let mut out = Vec::new();
        write_dataset(&ds, EXPLICIT_VR_LE, &mut out).unwrap();
        #[rustfmt::skip]
        let expected: &[u8] = &[
            0xE0, 0x7F, 0x10, 0x00, b'O', b'B', 0x00, 0x00, 0xFF, 0xFF, 0xFF, 0xFF,
            0xFE, 0xFF, 0x00, 0xE0, 0x00, 0x00, 0x00, 0x00,
            0xFE, 0xFF, 0x00, 0xE0, 0x04, 0x00, 0x00, 0x00, 0x01, 0x02, 0x03, 0x04,
            0xFE, 0xFF, 0xDD, 0xE0, 0x00, 0x00, 0x00, 0x00,
        ];
        assert_eq!(out, expected);
        assert_eq!(encoded_len(&ds, EXPLICIT_VR_LE), expected.len() as u64);
    }
}
