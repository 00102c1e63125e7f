//! A resumable pull decoder for DICOM data sets.
//!
//! [`DatasetReader`] consumes bytes from a [`SuspendSource`] and builds the
//! data set element by element. When the source runs out mid-element, the
//! decoder reports how many bytes it is missing and suspends: all cursor
//! state (the partially parsed element, the stack of open sequences and
//! items) lives in the reader, never on the call stack, so decoding resumes
//! exactly where it stopped once more bytes are appended.

use crate::source::SuspendSource;
use medicom_core::codec::BasicDecoder;
use medicom_core::dictionary::{DataDictionary, StandardDataDictionary};
use medicom_core::header::{
    DataElementHeader, Length, Tag, VR, ITEM, ITEM_DELIMITER, SEQUENCE_DELIMITER,
};
use medicom_core::transfer_syntax::{TransferSyntax, IMPLICIT_VR_LE};
use medicom_core::value::{DicomValue, PrimitiveValue};
use medicom_core::{C, DataElement, Dataset};
use smallvec::SmallVec;
use snafu::{Backtrace, ResultExt, Snafu};
use std::collections::HashMap;
use tracing::warn;

/// An error which occurred while decoding a data set.
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    /// Failed to read from the byte source.
    #[snafu(display("Failed to read from the byte source"))]
    ReadSource {
        backtrace: Backtrace,
        source: std::io::Error,
    },
    /// The explicit VR code is not recognized.
    #[snafu(display("Unknown VR code {:?} for element {}", bytes, tag))]
    UnknownVr {
        tag: Tag,
        bytes: [u8; 2],
        backtrace: Backtrace,
    },
    /// Undefined length on an element which does not admit one.
    #[snafu(display("Undefined length not allowed for element {} ({})", tag, vr))]
    UndefinedLengthNotAllowed {
        tag: Tag,
        vr: VR,
        backtrace: Backtrace,
    },
    /// A delimitation element appeared without a matching open frame.
    #[snafu(display("Unexpected delimitation element {}", tag))]
    UnexpectedDelimiter { tag: Tag, backtrace: Backtrace },
    /// A plain data element appeared where a sequence item was expected.
    #[snafu(display("Expected sequence item, found element {}", tag))]
    ExpectedItem { tag: Tag, backtrace: Backtrace },
    /// Only items and the sequence delimiter
    /// may appear in a fragment sequence.
    #[snafu(display("Unexpected element {} in fragment sequence", tag))]
    UnexpectedTagInFragments { tag: Tag, backtrace: Backtrace },
    /// The value length is not a multiple of the value width.
    #[snafu(display("Invalid length {} for element {} ({})", len, tag, vr))]
    InvalidValueLength {
        tag: Tag,
        vr: VR,
        len: u32,
        backtrace: Backtrace,
    },
    /// An element ran past the declared end of its enclosing
    /// sequence or item.
    #[snafu(display(
        "Data set content at position {} overruns enclosing frame ending at {}",
        position,
        end
    ))]
    FrameOverrun {
        position: u64,
        end: u64,
        backtrace: Backtrace,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The outcome of a decoding step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// All buffered bytes were consumed at an element boundary.
    /// More elements may still follow if the stream is not finished.
    Complete,
    /// The decoder is suspended mid-element and needs
    /// at least this many more bytes to make progress.
    NeedMoreData(u32),
}

/// Decoding options.
#[derive(Debug, Clone, Default)]
pub struct DatasetReaderOptions {
    /// Keep group length elements in the data set
    /// instead of dropping them.
    pub keep_group_lengths: bool,
    /// Leave primitive values of at least this many bytes on disk
    /// when the source is file backed,
    /// recording them as deferred file segments.
    pub deferred_threshold: Option<u64>,
}

/// An open decoding frame: a sequence, an item,
/// or an encapsulated fragment sequence.
#[derive(Debug)]
enum Frame {
    Sequence {
        tag: Tag,
        declared: Length,
        /// absolute end position, if the length was defined
        end: Option<u64>,
        /// how the sequence content is encoded
        ts: TransferSyntax,
        items: Vec<Dataset>,
    },
    Item {
        end: Option<u64>,
        dataset: Dataset,
    },
    Fragments {
        tag: Tag,
        vr: VR,
        offset_table: Option<Vec<u8>>,
        fragments: Vec<Vec<u8>>,
    },
}

/// A resumable data set decoder over a suspendable byte source.
#[derive(Debug)]
pub struct DatasetReader<S, D = StandardDataDictionary> {
    source: S,
    dict: D,
    ts: TransferSyntax,
    options: DatasetReaderOptions,
    dataset: Dataset,
    frames: Vec<Frame>,
    // staged state of the element under the cursor
    tag: Option<Tag>,
    vr: Option<VR>,
    len: Option<Length>,
    /// private creator values seen so far, by creator tag
    private_creators: HashMap<Tag, String>,
    /// forward estimate of the total encoded size
    bytes_estimated: u64,
    /// bytes missing at the last suspension
    bytes_needed: u32,
}

impl<S> DatasetReader<S, StandardDataDictionary>
where
    S: SuspendSource,
{
    /// Create a decoder over the given source,
    /// using the built-in attribute dictionary.
    pub fn new(source: S, ts: TransferSyntax) -> Self {
        DatasetReader::with_dictionary(source, ts, StandardDataDictionary)
    }
}

impl<S, D> DatasetReader<S, D>
where
    S: SuspendSource,
    D: DataDictionary,
{
    /// Create a decoder with a specific attribute dictionary.
    pub fn with_dictionary(source: S, ts: TransferSyntax, dict: D) -> Self {
        DatasetReader {
            source,
            dict,
            ts,
            options: DatasetReaderOptions::default(),
            dataset: Dataset::new(),
            frames: Vec::new(),
            tag: None,
            vr: None,
            len: None,
            private_creators: HashMap::new(),
            bytes_estimated: 0,
            bytes_needed: 0,
        }
    }

    /// Replace the decoding options.
    pub fn with_options(mut self, options: DatasetReaderOptions) -> Self {
        self.options = options;
        self
    }

    /// The data set decoded so far.
    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    /// Discard the decoder and keep the data set.
    pub fn into_dataset(self) -> Dataset {
        self.dataset
    }

    /// Access the underlying source, to append more data.
    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// The number of bytes consumed so far.
    pub fn bytes_read(&self) -> u64 {
        self.source.position()
    }

    /// A forward estimate of the encoded data set size, in bytes.
    /// Best effort: updated as element headers complete.
    pub fn bytes_estimated(&self) -> u64 {
        self.bytes_estimated.max(self.bytes_read())
    }

    /// How many bytes the decoder was missing at the last suspension.
    pub fn bytes_needed(&self) -> u32 {
        self.bytes_needed
    }

    /// Whether the decoder is at an element boundary
    /// with no open sequences or items.
    /// A stream which ends in any other state was truncated.
    pub fn is_balanced(&self) -> bool {
        self.frames.is_empty() && self.tag.is_none()
    }

    /// The private creator identifier which reserves
    /// the block of the given private tag, if it was seen.
    pub fn private_creator(&self, tag: Tag) -> Option<&str> {
        let creator = Tag(tag.group(), tag.private_creator_element());
        self.private_creators.get(&creator).map(|s| s.as_str())
    }

    /// Decode as much as the buffered bytes allow.
    ///
    /// Stops before the element with tag `stop_before`
    /// when it appears at the top level,
    /// leaving the cursor positioned at its first byte.
    pub fn read(&mut self, stop_before: Option<Tag>) -> Result<ReadStatus> {
        loop {
            self.close_completed_frames()?;

            if self.tag.is_none() && self.source.available() == 0 {
                self.bytes_needed = 0;
                return Ok(ReadStatus::Complete);
            }

            // stage 1: tag
            let tag = match self.tag {
                Some(tag) => tag,
                None => {
                    if self.source.available() < 4 {
                        return Ok(self.suspend(4));
                    }
                    let position = self.source.position();
                    let tag = self.take_tag()?;
                    if self.frames.is_empty() && stop_before == Some(tag) {
                        self.source.seek_to(position).context(ReadSourceSnafu)?;
                        self.bytes_needed = 0;
                        return Ok(ReadStatus::Complete);
                    }
                    self.tag = Some(tag);
                    tag
                }
            };

            let in_fragments = matches!(self.frames.last(), Some(Frame::Fragments { .. }));

            // item and delimitation elements take no VR,
            // always a 4 byte length field
            if tag.group() == 0xFFFE || in_fragments {
                if self.len.is_none() {
                    if self.source.available() < 4 {
                        return Ok(self.suspend(4));
                    }
                    let len = self.take_u32()?;
                    self.len = Some(Length(len));
                }
                let len = self.len.unwrap_or(Length(0));
                if in_fragments {
                    match self.read_fragment_item(tag, len)? {
                        Some(status) => return Ok(status),
                        None => continue,
                    }
                }
                self.handle_delimitation(tag, len)?;
                self.reset_element();
                continue;
            }

            // plain elements are not allowed directly inside a sequence
            if matches!(self.frames.last(), Some(Frame::Sequence { .. })) {
                return ExpectedItemSnafu { tag }.fail();
            }

            let ts = self.current_ts();

            // stage 2: VR
            let vr = match self.vr {
                Some(vr) => vr,
                None => {
                    let vr = if ts.explicit_vr {
                        if self.source.available() < 2 {
                            return Ok(self.suspend(2));
                        }
                        let bytes = self.take_exact::<2>()?;
                        match VR::from_binary(bytes) {
                            Some(vr) => vr,
                            None => return UnknownVrSnafu { tag, bytes }.fail(),
                        }
                    } else {
                        self.resolve_implicit_vr(tag)
                    };
                    // private creator identifiers are always long strings
                    let vr = if vr == VR::UN && tag.is_private_creator() {
                        VR::LO
                    } else {
                        vr
                    };
                    self.vr = Some(vr);
                    vr
                }
            };

            // stage 3: length
            let len = match self.len {
                Some(len) => len,
                None => {
                    let len = if !ts.explicit_vr {
                        if self.source.available() < 4 {
                            return Ok(self.suspend(4));
                        }
                        Length(self.take_u32()?)
                    } else if vr.is_short_form() {
                        if self.source.available() < 2 {
                            return Ok(self.suspend(2));
                        }
                        Length(u32::from(self.take_u16()?))
                    } else {
                        // 2 reserved bytes, then a 32 bit length
                        if self.source.available() < 6 {
                            return Ok(self.suspend(6));
                        }
                        self.take_exact::<2>()?;
                        Length(self.take_u32()?)
                    };
                    self.len = Some(len);
                    len
                }
            };

            if len.is_undefined() {
                match vr {
                    // undefined length UN is an implicit VR sequence
                    VR::SQ | VR::UN => {
                        let content_ts = if vr == VR::UN { IMPLICIT_VR_LE } else { ts };
                        self.frames.push(Frame::Sequence {
                            tag,
                            declared: Length::UNDEFINED,
                            end: None,
                            ts: content_ts,
                            items: Vec::new(),
                        });
                        self.reset_element();
                        continue;
                    }
                    VR::OB | VR::OW => {
                        self.frames.push(Frame::Fragments {
                            tag,
                            vr,
                            offset_table: None,
                            fragments: Vec::new(),
                        });
                        self.reset_element();
                        continue;
                    }
                    _ => return UndefinedLengthNotAllowedSnafu { tag, vr }.fail(),
                }
            }

            // defined length from here on
            let len_v = len.0;

            // an unknown private value may hold an implicit VR sequence:
            // peek at the first tag when the source allows it
            let vr = if vr == VR::UN && tag.is_private() && len_v >= 8 && self.source.can_seek() {
                if self.source.available() < 4 {
                    return Ok(self.suspend(4));
                }
                let position = self.source.position();
                let peeked = self.take_tag_le()?;
                self.source.seek_to(position).context(ReadSourceSnafu)?;
                if peeked == ITEM {
                    VR::SQ
                } else {
                    vr
                }
            } else {
                vr
            };

            if vr == VR::SQ {
                let position = self.source.position();
                let content_ts = if self.vr == Some(VR::UN) { IMPLICIT_VR_LE } else { ts };
                self.frames.push(Frame::Sequence {
                    tag,
                    declared: len,
                    end: Some(position + u64::from(len_v)),
                    ts: content_ts,
                    items: Vec::new(),
                });
                self.reset_element();
                continue;
            }

            // stage 4: primitive value
            let position = self.source.position();
            self.bytes_estimated = self
                .bytes_estimated
                .max(position + u64::from(len_v));

            // large values on a file backed source stay on disk
            if let Some(threshold) = self.options.deferred_threshold {
                if u64::from(len_v) >= threshold
                    && self.source.available() >= u64::from(len_v)
                {
                    if let Some(segment) = self.source.file_segment(position, u64::from(len_v)) {
                        self.source
                            .seek_to(position + u64::from(len_v))
                            .context(ReadSourceSnafu)?;
                        let header = DataElementHeader::new(tag, vr, len);
                        self.insert_element(DataElement::new_with_len(
                            header,
                            DicomValue::Deferred(segment),
                        ));
                        self.reset_element();
                        continue;
                    }
                }
            }

            if self.source.available() < u64::from(len_v) {
                return Ok(self.suspend(u64::from(len_v)));
            }
            let mut bytes = vec![0; len_v as usize];
            self.source
                .read_exact_into(&mut bytes)
                .context(ReadSourceSnafu)?;
            let decoder = BasicDecoder::new(ts.endianness);
            let value = decode_primitive(tag, vr, bytes, &decoder)?;

            if tag.is_private_creator() {
                if let Ok(id) = value.to_str() {
                    self.private_creators.insert(tag, id.into_owned());
                }
            }

            if tag.is_group_length() && !self.options.keep_group_lengths {
                // consumed, not retained
            } else {
                let header = DataElementHeader::new(tag, vr, len);
                self.insert_element(DataElement::new_with_len(header, DicomValue::Primitive(value)));
            }
            self.reset_element();
        }
    }

    /// Record a suspension: the current step needs `required` bytes in total.
    fn suspend(&mut self, required: u64) -> ReadStatus {
        let missing = required.saturating_sub(self.source.available());
        debug_assert!(missing > 0);
        self.bytes_needed = missing as u32;
        ReadStatus::NeedMoreData(self.bytes_needed)
    }

    fn reset_element(&mut self) {
        self.tag = None;
        self.vr = None;
        self.len = None;
    }

    /// The encoding of the content under the cursor:
    /// the innermost open sequence decides, the stream otherwise.
    fn current_ts(&self) -> TransferSyntax {
        for frame in self.frames.iter().rev() {
            if let Frame::Sequence { ts, .. } = frame {
                return *ts;
            }
        }
        self.ts
    }

    fn resolve_implicit_vr(&self, tag: Tag) -> VR {
        if tag.is_group_length() {
            VR::UL
        } else if tag.is_private_creator() {
            VR::LO
        } else {
            self.dict.vr_of(tag).unwrap_or(VR::UN)
        }
    }

    /// Close every frame whose declared extent ends at the cursor.
    fn close_completed_frames(&mut self) -> Result<()> {
        loop {
            let position = self.source.position();
            let due = match self.frames.last() {
                Some(Frame::Item { end: Some(end), .. })
                | Some(Frame::Sequence { end: Some(end), .. }) => {
                    if position > *end {
                        return FrameOverrunSnafu {
                            position,
                            end: *end,
                        }
                        .fail();
                    }
                    position == *end
                }
                _ => false,
            };
            if !due {
                return Ok(());
            }
            match self.frames.pop() {
                Some(Frame::Item { dataset, .. }) => self.append_item(dataset),
                Some(Frame::Sequence {
                    tag,
                    declared,
                    items,
                    ..
                }) => self.insert_sequence(tag, declared, items),
                _ => unreachable!(),
            }
        }
    }

    fn handle_delimitation(&mut self, tag: Tag, len: Length) -> Result<()> {
        match tag {
            ITEM => {
                let position = self.source.position();
                match self.frames.last() {
                    Some(Frame::Sequence { .. }) => {
                        self.frames.push(Frame::Item {
                            end: len.get().map(|l| position + u64::from(l)),
                            dataset: Dataset::new(),
                        });
                        Ok(())
                    }
                    _ => UnexpectedDelimiterSnafu { tag }.fail(),
                }
            }
            ITEM_DELIMITER => match self.frames.last() {
                Some(Frame::Item { end: None, .. }) => {
                    if let Some(Frame::Item { dataset, .. }) = self.frames.pop() {
                        self.append_item(dataset);
                    }
                    Ok(())
                }
                _ => UnexpectedDelimiterSnafu { tag }.fail(),
            },
            SEQUENCE_DELIMITER => match self.frames.last() {
                Some(Frame::Sequence { end: None, .. }) => {
                    if let Some(Frame::Sequence {
                        tag: seq_tag,
                        declared,
                        items,
                        ..
                    }) = self.frames.pop()
                    {
                        self.insert_sequence(seq_tag, declared, items);
                    }
                    Ok(())
                }
                _ => UnexpectedDelimiterSnafu { tag }.fail(),
            },
            tag => UnexpectedDelimiterSnafu { tag }.fail(),
        }
    }

    /// Consume one item of a fragment sequence,
    /// or close it on the sequence delimiter.
    fn read_fragment_item(&mut self, tag: Tag, len: Length) -> Result<Option<ReadStatus>> {
        match tag {
            ITEM => {
                let len_v = match len.get() {
                    Some(l) => l,
                    None => {
                        return UndefinedLengthNotAllowedSnafu { tag, vr: VR::UN }.fail();
                    }
                };
                if self.source.available() < u64::from(len_v) {
                    return Ok(Some(self.suspend(u64::from(len_v))));
                }
                let mut bytes = vec![0; len_v as usize];
                self.source
                    .read_exact_into(&mut bytes)
                    .context(ReadSourceSnafu)?;
                if let Some(Frame::Fragments {
                    offset_table,
                    fragments,
                    ..
                }) = self.frames.last_mut()
                {
                    // the first item is the basic offset table
                    if offset_table.is_none() {
                        *offset_table = Some(bytes);
                    } else {
                        fragments.push(bytes);
                    }
                }
                self.reset_element();
                Ok(None)
            }
            SEQUENCE_DELIMITER => {
                if len != Length(0) {
                    warn!("non-zero length {} on fragment sequence delimiter", len);
                }
                if let Some(Frame::Fragments {
                    tag: frag_tag,
                    vr,
                    offset_table,
                    fragments,
                }) = self.frames.pop()
                {
                    let header = DataElementHeader::new(frag_tag, vr, Length::UNDEFINED);
                    self.insert_element(DataElement::new_with_len(
                        header,
                        DicomValue::Fragments {
                            offset_table: offset_table.unwrap_or_default(),
                            fragments,
                        },
                    ));
                }
                self.reset_element();
                Ok(None)
            }
            tag => UnexpectedTagInFragmentsSnafu { tag }.fail(),
        }
    }

    fn append_item(&mut self, dataset: Dataset) {
        match self.frames.last_mut() {
            Some(Frame::Sequence { items, .. }) => items.push(dataset),
            // item frames are only ever pushed on top of a sequence frame
            _ => unreachable!(),
        }
    }

    fn insert_sequence(&mut self, tag: Tag, declared: Length, items: Vec<Dataset>) {
        let header = DataElementHeader::new(tag, VR::SQ, declared);
        self.insert_element(DataElement::new_with_len(
            header,
            DicomValue::Sequence {
                items,
                length: declared,
            },
        ));
    }

    fn insert_element(&mut self, elem: DataElement) {
        let idx = self
            .frames
            .iter()
            .rposition(|f| matches!(f, Frame::Item { .. }));
        let target = match idx {
            Some(i) => match &mut self.frames[i] {
                Frame::Item { dataset, .. } => dataset,
                _ => unreachable!(),
            },
            None => &mut self.dataset,
        };
        target.put(elem);
    }

    fn take_exact<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        self.source
            .read_exact_into(&mut buf)
            .context(ReadSourceSnafu)?;
        Ok(buf)
    }

    fn take_tag(&mut self) -> Result<Tag> {
        let buf = self.take_exact::<4>()?;
        let decoder = BasicDecoder::new(self.current_ts().endianness);
        decoder.decode_tag(&buf[..]).context(ReadSourceSnafu)
    }

    fn take_tag_le(&mut self) -> Result<Tag> {
        let buf = self.take_exact::<4>()?;
        Ok(Tag(
            u16::from_le_bytes([buf[0], buf[1]]),
            u16::from_le_bytes([buf[2], buf[3]]),
        ))
    }

    fn take_u16(&mut self) -> Result<u16> {
        let buf = self.take_exact::<2>()?;
        let decoder = BasicDecoder::new(self.current_ts().endianness);
        decoder.decode_us(&buf[..]).context(ReadSourceSnafu)
    }

    fn take_u32(&mut self) -> Result<u32> {
        let buf = self.take_exact::<4>()?;
        let decoder = BasicDecoder::new(self.current_ts().endianness);
        decoder.decode_ul(&buf[..]).context(ReadSourceSnafu)
    }
}

/// Decode a primitive value of the given representation.
fn decode_primitive(
    tag: Tag,
    vr: VR,
    bytes: Vec<u8>,
    decoder: &BasicDecoder,
) -> Result<PrimitiveValue> {
    fn multi<T>(
        tag: Tag,
        vr: VR,
        bytes: &[u8],
        width: usize,
        mut next: impl FnMut(&mut &[u8]) -> std::io::Result<T>,
    ) -> Result<C<T>> {
        if bytes.len() % width != 0 {
            return InvalidValueLengthSnafu {
                tag,
                vr,
                len: bytes.len() as u32,
            }
            .fail();
        }
        let mut rd = bytes;
        let mut out = SmallVec::with_capacity(bytes.len() / width);
        while !rd.is_empty() {
            out.push(next(&mut rd).context(ReadSourceSnafu)?);
        }
        Ok(out)
    }

    if bytes.is_empty() {
        return Ok(PrimitiveValue::Empty);
    }

    let value = match vr {
        VR::AT => PrimitiveValue::Tags(multi(tag, vr, &bytes, 4, |rd| decoder.decode_tag(rd))?),
        VR::FL | VR::OF => {
            PrimitiveValue::F32(multi(tag, vr, &bytes, 4, |rd| decoder.decode_fl(rd))?)
        }
        VR::FD | VR::OD => {
            PrimitiveValue::F64(multi(tag, vr, &bytes, 8, |rd| decoder.decode_fd(rd))?)
        }
        VR::SS => PrimitiveValue::I16(multi(tag, vr, &bytes, 2, |rd| decoder.decode_ss(rd))?),
        VR::US | VR::OW => {
            PrimitiveValue::U16(multi(tag, vr, &bytes, 2, |rd| decoder.decode_us(rd))?)
        }
        VR::SL => PrimitiveValue::I32(multi(tag, vr, &bytes, 4, |rd| decoder.decode_sl(rd))?),
        VR::UL | VR::OL => {
            PrimitiveValue::U32(multi(tag, vr, &bytes, 4, |rd| decoder.decode_ul(rd))?)
        }
        VR::SV => PrimitiveValue::I64(multi(tag, vr, &bytes, 8, |rd| decoder.decode_sv(rd))?),
        VR::UV | VR::OV => {
            PrimitiveValue::U64(multi(tag, vr, &bytes, 8, |rd| decoder.decode_uv(rd))?)
        }
        vr if vr.is_text() => match String::from_utf8(bytes) {
            Ok(s) => PrimitiveValue::Str(s),
            // keep the raw bytes so re-encoding reproduces the input
            Err(e) => PrimitiveValue::RawStr(e.into_bytes().into()),
        },
        _ => PrimitiveValue::U8(bytes.into()),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use medicom_core::buffer::ChunkSource;
    use medicom_core::transfer_syntax::EXPLICIT_VR_LE;
    use medicom_core::HasLength;

    /// A flat data set followed by a delimited sequence,
    /// in Explicit VR Little Endian.
    #[rustfmt::skip]
    const NESTED_EXPLICIT: &[u8] = &[
        // (0008,0060) CS "CT"
        0x08, 0x00, 0x60, 0x00, b'C', b'S', 0x02, 0x00, b'C', b'T',
        // (0008,1110) SQ, undefined length
        0x08, 0x00, 0x10, 0x11, b'S', b'Q', 0x00, 0x00, 0xFF, 0xFF, 0xFF, 0xFF,
        // item, undefined length
        0xFE, 0xFF, 0x00, 0xE0, 0xFF, 0xFF, 0xFF, 0xFF,
        // (0008,1150) UI "1.2.840.10008.1.1" (padded)
        0x08, 0x00, 0x50, 0x11, b'U', b'I', 0x12, 0x00,
        b'1', b'.', b'2', b'.', b'8', b'4', b'0', b'.', b'1', b'0',
        b'0', b'0', b'8', b'.', b'1', b'.', b'1', 0x00,
        // item delimiter
        0xFE, 0xFF, 0x0D, 0xE0, 0x00, 0x00, 0x00, 0x00,
        // sequence delimiter
        0xFE, 0xFF, 0xDD, 0xE0, 0x00, 0x00, 0x00, 0x00,
        // (0010,0010) PN "DOE^JOHN"
        0x10, 0x00, 0x10, 0x00, b'P', b'N', 0x08, 0x00,
        b'D', b'O', b'E', b'^', b'J', b'O', b'H', b'N',
    ];

    fn decode_all(bytes: &[u8], ts: TransferSyntax) -> Dataset {
        let mut source = ChunkSource::new();
        source.append(bytes.to_vec());
        let mut reader = DatasetReader::new(source, ts);
        assert_eq!(reader.read(None).unwrap(), ReadStatus::Complete);
        assert!(reader.is_balanced());
        reader.into_dataset()
    }

    #[test]
    fn decodes_nested_data_set() {
        let ds = decode_all(NESTED_EXPLICIT, EXPLICIT_VR_LE);
        assert_eq!(ds.len(), 3);
        assert_eq!(ds.get_str(Tag(0x0008, 0x0060)).as_deref(), Some("CT"));
        assert_eq!(ds.get_str(Tag(0x0010, 0x0010)).as_deref(), Some("DOE^JOHN"));

        let seq = ds.get(Tag(0x0008, 0x1110)).unwrap();
        assert_eq!(seq.vr(), VR::SQ);
        let items = seq.value().items().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(
            items[0].get_str(Tag(0x0008, 0x1150)).as_deref(),
            Some("1.2.840.10008.1.1")
        );
    }

    #[test]
    fn resumes_byte_by_byte() {
        let whole = decode_all(NESTED_EXPLICIT, EXPLICIT_VR_LE);

        let mut reader = DatasetReader::new(ChunkSource::new(), EXPLICIT_VR_LE);
        for &byte in NESTED_EXPLICIT {
            reader.source_mut().append(vec![byte]);
            match reader.read(None).unwrap() {
                ReadStatus::Complete => {}
                ReadStatus::NeedMoreData(n) => assert!(n >= 1),
            }
        }
        assert_eq!(reader.read(None).unwrap(), ReadStatus::Complete);
        assert!(reader.is_balanced());
        assert_eq!(reader.bytes_read(), NESTED_EXPLICIT.len() as u64);
        assert_eq!(reader.into_dataset(), whole);
    }

    #[test]
    fn drops_group_lengths_by_default() {
        #[rustfmt::skip]
        let bytes: &[u8] = &[
            // (0008,0000) UL 10
            0x08, 0x00, 0x00, 0x00, b'U', b'L', 0x04, 0x00, 0x0A, 0x00, 0x00, 0x00,
            // (0008,0060) CS "MR"
            0x08, 0x00, 0x60, 0x00, b'C', b'S', 0x02, 0x00, b'M', b'R',
        ];
        let ds = decode_all(bytes, EXPLICIT_VR_LE);
        assert_eq!(ds.len(), 1);
        assert!(!ds.contains(Tag(0x0008, 0x0000)));

        let mut source = ChunkSource::new();
        source.append(bytes.to_vec());
        let mut reader = DatasetReader::new(source, EXPLICIT_VR_LE).with_options(
            DatasetReaderOptions {
                keep_group_lengths: true,
                ..Default::default()
            },
        );
        assert_eq!(reader.read(None).unwrap(), ReadStatus::Complete);
        assert_eq!(reader.dataset().get_u32(Tag(0x0008, 0x0000)), Some(10));
    }

    #[test]
    fn decodes_fragment_sequence() {
        #[rustfmt::skip]
        let bytes: &[u8] = &[
            // (7FE0,0010) OB, undefined length
            0xE0, 0x7F, 0x10, 0x00, b'O', b'B', 0x00, 0x00, 0xFF, 0xFF, 0xFF, 0xFF,
            // basic offset table, empty
            0xFE, 0xFF, 0x00, 0xE0, 0x00, 0x00, 0x00, 0x00,
            // one fragment of 4 bytes
            0xFE, 0xFF, 0x00, 0xE0, 0x04, 0x00, 0x00, 0x00, 0x01, 0x02, 0x03, 0x04,
            // sequence delimiter
            0xFE, 0xFF, 0xDD, 0xE0, 0x00, 0x00, 0x00, 0x00,
        ];
        let ds = decode_all(bytes, EXPLICIT_VR_LE);
        let elem = ds.get(Tag(0x7FE0, 0x0010)).unwrap();
        assert!(elem.length().is_undefined());
        match elem.value() {
            DicomValue::Fragments {
                offset_table,
                fragments,
            } => {
                assert!(offset_table.is_empty());
                assert_eq!(fragments.as_slice(), &[vec![1, 2, 3, 4]]);
            }
            other => panic!("unexpected value {:?}", other),
        }
    }

    #[test]
    fn implicit_private_handling() {
        #[rustfmt::skip]
        let bytes: &[u8] = &[
            // (0009,0010) private creator "ACME 1.0"
            0x09, 0x00, 0x10, 0x00, 0x08, 0x00, 0x00, 0x00,
            b'A', b'C', b'M', b'E', b' ', b'1', b'.', b'0',
            // (0009,1001) unknown private data
            0x09, 0x00, 0x01, 0x10, 0x04, 0x00, 0x00, 0x00, 0xDE, 0xAD, 0xBE, 0xEF,
            // (0009,1002) unknown private value holding an item: a sequence
            0x09, 0x00, 0x02, 0x10, 0x10, 0x00, 0x00, 0x00,
            0xFE, 0xFF, 0x00, 0xE0, 0x08, 0x00, 0x00, 0x00,
            0x10, 0x00, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];
        let mut source = ChunkSource::new();
        source.append(bytes.to_vec());
        let mut reader = DatasetReader::new(source, IMPLICIT_VR_LE);
        assert_eq!(reader.read(None).unwrap(), ReadStatus::Complete);
        assert!(reader.is_balanced());

        assert_eq!(
            reader.private_creator(Tag(0x0009, 0x1001)),
            Some("ACME 1.0")
        );
        let ds = reader.dataset();
        assert_eq!(ds.get(Tag(0x0009, 0x0010)).unwrap().vr(), VR::LO);
        assert_eq!(ds.get(Tag(0x0009, 0x1001)).unwrap().vr(), VR::UN);

        let seq = ds.get(Tag(0x0009, 0x1002)).unwrap();
        assert_eq!(seq.vr(), VR::SQ);
        let items = seq.value().items().unwrap();
        assert_eq!(items.len(), 1);
        assert!(items[0].contains(Tag(0x0010, 0x0010)));
    }

    #[test]
    fn stops_before_requested_tag() {
        let mut source = ChunkSource::new();
        source.append(NESTED_EXPLICIT.to_vec());
        let mut reader = DatasetReader::new(source, EXPLICIT_VR_LE);
        assert_eq!(
            reader.read(Some(Tag(0x0010, 0x0010))).unwrap(),
            ReadStatus::Complete
        );
        assert!(!reader.dataset().contains(Tag(0x0010, 0x0010)));
        assert!(reader.dataset().contains(Tag(0x0008, 0x1110)));

        // a later call may carry on past the stop tag
        assert_eq!(reader.read(None).unwrap(), ReadStatus::Complete);
        assert!(reader.dataset().contains(Tag(0x0010, 0x0010)));
    }

    #[test]
    fn rejects_bad_undefined_length() {
        // UT takes the long length form but does not admit undefined lengths
        #[rustfmt::skip]
        let bytes: &[u8] = &[
            0x08, 0x00, 0x60, 0x00, b'U', b'T', 0x00, 0x00, 0xFF, 0xFF, 0xFF, 0xFF,
        ];
        let mut source = ChunkSource::new();
        source.append(bytes.to_vec());
        let mut reader = DatasetReader::new(source, EXPLICIT_VR_LE);
        assert!(matches!(
            reader.read(None),
            Err(Error::UndefinedLengthNotAllowed { .. })
        ));
    }

    #[test]
    fn rejects_stray_delimiter() {
        #[rustfmt::skip]
        let bytes: &[u8] = &[
            0xFE, 0xFF, 0x0D, 0xE0, 0x00, 0x00, 0x00, 0x00,
        ];
        let mut source = ChunkSource::new();
        source.append(bytes.to_vec());
        let mut reader = DatasetReader::new(source, EXPLICIT_VR_LE);
        assert!(matches!(
            reader.read(None),
            Err(Error::UnexpectedDelimiter { .. })
        ));
    }
}
