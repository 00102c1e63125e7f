//! Value types for DICOM data elements:
//! in-memory primitive values and the composite element value,
//! which may be a primitive, a nested data set sequence,
//! an encapsulated fragment sequence,
//! or a deferred reference into a file.

use crate::buffer::FileSegment;
use crate::dataset::Dataset;
use crate::header::{Length, Tag};
use crate::C;
use snafu::{Backtrace, Snafu};
use std::borrow::Cow;

/// An error raised when fetching a value of an unexpected kind.
#[derive(Debug, Snafu)]
#[snafu(display("Expected {} value, got {} instead", requested, got))]
pub struct CastValueError {
    /// The value kind requested by the caller.
    pub requested: &'static str,
    /// A short description of the actual value.
    pub got: &'static str,
    backtrace: Backtrace,
}

type Result<T, E = CastValueError> = std::result::Result<T, E>;

/// An enum representing a primitive value from a DICOM element,
/// fully in memory.
///
/// Character data is kept byte-faithful: trailing padding present in the
/// encoded stream is preserved in the `Str` variant, and character data
/// which is not valid UTF-8 is retained untouched in the `RawStr` variant,
/// so that writing the value back reproduces the original bytes. The
/// string accessors trim the padding off and substitute offending bytes.
#[derive(Debug, PartialEq, Clone)]
pub enum PrimitiveValue {
    /// No data. Used for zero-length values.
    Empty,
    /// A sequence of strings, as retained from the encoded stream
    /// (backslash separated, padding included).
    Str(String),
    /// Multiple string values, to be joined with a backslash on encoding.
    Strs(C<String>),
    /// Character data which is not valid UTF-8,
    /// kept as the raw bytes from the encoded stream.
    /// The string accessors convert it lossily.
    RawStr(C<u8>),
    /// A sequence of unsigned 8-bit integers, also used for raw byte data.
    U8(C<u8>),
    /// A sequence of signed 16-bit integers.
    I16(C<i16>),
    /// A sequence of unsigned 16-bit integers.
    U16(C<u16>),
    /// A sequence of signed 32-bit integers.
    I32(C<i32>),
    /// A sequence of unsigned 32-bit integers.
    U32(C<u32>),
    /// A sequence of signed 64-bit integers.
    I64(C<i64>),
    /// A sequence of unsigned 64-bit integers.
    U64(C<u64>),
    /// A sequence of 32-bit floating point numbers.
    F32(C<f32>),
    /// A sequence of 64-bit floating point numbers.
    F64(C<f64>),
    /// A sequence of attribute tags.
    Tags(C<Tag>),
}

impl PrimitiveValue {
    /// Create a value with a single string.
    pub fn from_str(s: &str) -> Self {
        PrimitiveValue::Str(s.to_owned())
    }

    /// The number of bytes the value occupies when encoded,
    /// before even-length padding.
    pub fn byte_len(&self) -> usize {
        use PrimitiveValue::*;
        match self {
            Empty => 0,
            Str(s) => s.len(),
            Strs(ss) => {
                if ss.is_empty() {
                    0
                } else {
                    ss.iter().map(|s| s.len()).sum::<usize>() + ss.len() - 1
                }
            }
            RawStr(v) => v.len(),
            U8(v) => v.len(),
            I16(v) => v.len() * 2,
            U16(v) => v.len() * 2,
            I32(v) => v.len() * 4,
            U32(v) => v.len() * 4,
            I64(v) => v.len() * 8,
            U64(v) => v.len() * 8,
            F32(v) => v.len() * 4,
            F64(v) => v.len() * 8,
            Tags(v) => v.len() * 4,
        }
    }

    /// The number of individual values.
    pub fn multiplicity(&self) -> usize {
        use PrimitiveValue::*;
        match self {
            Empty => 0,
            Str(s) => s.split('\\').count(),
            Strs(ss) => ss.len(),
            RawStr(v) => v.split(|&b| b == b'\\').count(),
            U8(v) => v.len(),
            I16(v) => v.len(),
            U16(v) => v.len(),
            I32(v) => v.len(),
            U32(v) => v.len(),
            I64(v) => v.len(),
            U64(v) => v.len(),
            F32(v) => v.len(),
            F64(v) => v.len(),
            Tags(v) => v.len(),
        }
    }

    fn kind(&self) -> &'static str {
        use PrimitiveValue::*;
        match self {
            Empty => "Empty",
            Str(..) => "Str",
            Strs(..) => "Strs",
            RawStr(..) => "RawStr",
            U8(..) => "U8",
            I16(..) => "I16",
            U16(..) => "U16",
            I32(..) => "I32",
            U32(..) => "U32",
            I64(..) => "I64",
            U64(..) => "U64",
            F32(..) => "F32",
            F64(..) => "F64",
            Tags(..) => "Tags",
        }
    }

    /// Fetch the value as a single string,
    /// trimming trailing whitespace and NUL padding.
    pub fn to_str(&self) -> Result<Cow<'_, str>> {
        match self {
            PrimitiveValue::Empty => Ok(Cow::Borrowed("")),
            PrimitiveValue::Str(s) => {
                Ok(Cow::Borrowed(s.trim_end_matches(|c| c == ' ' || c == '\0')))
            }
            PrimitiveValue::Strs(ss) if ss.len() == 1 => {
                Ok(Cow::Borrowed(ss[0].trim_end_matches(|c| c == ' ' || c == '\0')))
            }
            PrimitiveValue::RawStr(v) => Ok(match String::from_utf8_lossy(v) {
                Cow::Borrowed(s) => Cow::Borrowed(s.trim_end_matches(|c| c == ' ' || c == '\0')),
                Cow::Owned(s) => {
                    Cow::Owned(s.trim_end_matches(|c| c == ' ' || c == '\0').to_owned())
                }
            }),
            other => CastValueSnafu {
                requested: "Str",
                got: other.kind(),
            }
            .fail(),
        }
    }

    /// Fetch the value as a list of trimmed strings,
    /// splitting multi-valued text on the backslash separator.
    pub fn to_multi_str(&self) -> Result<Vec<String>> {
        match self {
            PrimitiveValue::Empty => Ok(Vec::new()),
            PrimitiveValue::Str(s) => Ok(s
                .split('\\')
                .map(|p| p.trim_end_matches(|c| c == ' ' || c == '\0').to_owned())
                .collect()),
            PrimitiveValue::Strs(ss) => Ok(ss
                .iter()
                .map(|p| p.trim_end_matches(|c| c == ' ' || c == '\0').to_owned())
                .collect()),
            PrimitiveValue::RawStr(v) => Ok(v
                .split(|&b| b == b'\\')
                .map(|p| {
                    String::from_utf8_lossy(p)
                        .trim_end_matches(|c| c == ' ' || c == '\0')
                        .to_owned()
                })
                .collect()),
            other => CastValueSnafu {
                requested: "Strs",
                got: other.kind(),
            }
            .fail(),
        }
    }

    /// Fetch the first value as an unsigned 16-bit integer.
    pub fn uint16(&self) -> Result<u16> {
        match self {
            PrimitiveValue::U16(v) if !v.is_empty() => Ok(v[0]),
            other => CastValueSnafu {
                requested: "U16",
                got: other.kind(),
            }
            .fail(),
        }
    }

    /// Fetch the first value as an unsigned 32-bit integer.
    pub fn uint32(&self) -> Result<u32> {
        match self {
            PrimitiveValue::U32(v) if !v.is_empty() => Ok(v[0]),
            PrimitiveValue::U16(v) if !v.is_empty() => Ok(u32::from(v[0])),
            other => CastValueSnafu {
                requested: "U32",
                got: other.kind(),
            }
            .fail(),
        }
    }

    /// Fetch the full sequence of unsigned 16-bit integers.
    pub fn uint16_slice(&self) -> Result<&[u16]> {
        match self {
            PrimitiveValue::U16(v) => Ok(v),
            other => CastValueSnafu {
                requested: "U16",
                got: other.kind(),
            }
            .fail(),
        }
    }

    /// Fetch the raw byte data of the value.
    pub fn to_bytes(&self) -> Result<Cow<'_, [u8]>> {
        match self {
            PrimitiveValue::Empty => Ok(Cow::Borrowed(&[])),
            PrimitiveValue::U8(v) => Ok(Cow::Borrowed(v)),
            PrimitiveValue::Str(s) => Ok(Cow::Borrowed(s.as_bytes())),
            PrimitiveValue::RawStr(v) => Ok(Cow::Borrowed(v)),
            other => CastValueSnafu {
                requested: "U8",
                got: other.kind(),
            }
            .fail(),
        }
    }

    /// Fetch the full sequence of attribute tags.
    pub fn tags(&self) -> Result<&[Tag]> {
        match self {
            PrimitiveValue::Tags(v) => Ok(v),
            other => CastValueSnafu {
                requested: "Tags",
                got: other.kind(),
            }
            .fail(),
        }
    }
}

impl From<&str> for PrimitiveValue {
    fn from(s: &str) -> Self {
        PrimitiveValue::Str(s.to_owned())
    }
}

impl From<String> for PrimitiveValue {
    fn from(s: String) -> Self {
        PrimitiveValue::Str(s)
    }
}

impl From<u16> for PrimitiveValue {
    fn from(v: u16) -> Self {
        PrimitiveValue::U16(smallvec::smallvec![v])
    }
}

impl From<u32> for PrimitiveValue {
    fn from(v: u32) -> Self {
        PrimitiveValue::U32(smallvec::smallvec![v])
    }
}

impl From<Vec<u8>> for PrimitiveValue {
    fn from(v: Vec<u8>) -> Self {
        PrimitiveValue::U8(v.into())
    }
}

/// The value of a DICOM data element.
#[derive(Debug, PartialEq, Clone)]
pub enum DicomValue {
    /// A primitive value held in memory.
    Primitive(PrimitiveValue),
    /// A nested sequence of data set items.
    Sequence {
        /// the sequence items
        items: Vec<Dataset>,
        /// the length as declared in the stream
        /// (undefined when delimited)
        length: Length,
    },
    /// An encapsulated pixel data fragment sequence.
    Fragments {
        /// the raw bytes of the basic offset table (first item)
        offset_table: Vec<u8>,
        /// the remaining items, one fragment each
        fragments: Vec<Vec<u8>>,
    },
    /// A value left on disk, identified by its file segment.
    /// Loaded on demand through [`FileSegment::read_all`].
    Deferred(FileSegment),
}

impl DicomValue {
    /// Shorthand for a primitive value.
    pub fn primitive<T: Into<PrimitiveValue>>(value: T) -> Self {
        DicomValue::Primitive(value.into())
    }

    /// Obtain the primitive value, if this is one.
    pub fn as_primitive(&self) -> Option<&PrimitiveValue> {
        match self {
            DicomValue::Primitive(v) => Some(v),
            _ => None,
        }
    }

    /// Obtain the sequence items, if this is a sequence.
    pub fn items(&self) -> Option<&[Dataset]> {
        match self {
            DicomValue::Sequence { items, .. } => Some(items),
            _ => None,
        }
    }
}

impl From<PrimitiveValue> for DicomValue {
    fn from(value: PrimitiveValue) -> Self {
        DicomValue::Primitive(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    #[test]
    fn str_values_trim_but_keep_bytes() {
        let v = PrimitiveValue::Str("CT ".to_owned());
        assert_eq!(v.to_str().unwrap(), "CT");
        assert_eq!(v.byte_len(), 3);

        let v = PrimitiveValue::Str("1.2.840.10008.1.1\0".to_owned());
        assert_eq!(v.to_str().unwrap(), "1.2.840.10008.1.1");
        assert_eq!(v.byte_len(), 18);
    }

    #[test]
    fn multi_valued_strings() {
        let v = PrimitiveValue::Str("ORIGINAL\\PRIMARY ".to_owned());
        assert_eq!(v.multiplicity(), 2);
        assert_eq!(v.to_multi_str().unwrap(), vec!["ORIGINAL", "PRIMARY"]);

        let v = PrimitiveValue::Strs(smallvec!["A".to_owned(), "BC".to_owned()]);
        assert_eq!(v.byte_len(), 4);
    }

    #[test]
    fn non_utf8_text_keeps_raw_bytes() {
        let v = PrimitiveValue::RawStr(smallvec![b'J', b'O', b'S', 0xE9, b'E', b' ']);
        assert_eq!(v.byte_len(), 6);
        assert_eq!(
            v.to_bytes().unwrap().as_ref(),
            &[b'J', b'O', b'S', 0xE9, b'E', b' '][..]
        );
        // offending bytes are substituted and the padding trimmed
        assert_eq!(v.to_str().unwrap(), "JOS\u{FFFD}E");
        assert_eq!(v.multiplicity(), 1);
    }

    #[test]
    fn numeric_access() {
        let v = PrimitiveValue::U16(smallvec![0x8000]);
        assert_eq!(v.uint16().unwrap(), 0x8000);
        assert_eq!(v.uint32().unwrap(), 0x8000);
        assert!(v.to_str().is_err());
    }
}
