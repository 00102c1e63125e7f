//! The in-memory DICOM data set:
//! a tag-ordered collection of data elements.

use crate::header::{DataElementHeader, HasLength, Header, Length, Tag, VR};
use crate::value::{DicomValue, PrimitiveValue};
use std::collections::btree_map;
use std::collections::BTreeMap;
use std::iter::FromIterator;

/// A data type that represents and owns a DICOM data element.
#[derive(Debug, PartialEq, Clone)]
pub struct DataElement {
    header: DataElementHeader,
    value: DicomValue,
}

impl HasLength for DataElement {
    #[inline]
    fn length(&self) -> Length {
        self.header.length()
    }
}

impl Header for DataElement {
    #[inline]
    fn tag(&self) -> Tag {
        self.header.tag()
    }
}

impl DataElement {
    /// Create a data element from the given parts,
    /// where the length is inferred from the value's byte length.
    pub fn new<T>(tag: Tag, vr: VR, value: T) -> Self
    where
        T: Into<DicomValue>,
    {
        let value = value.into();
        let len = match &value {
            DicomValue::Primitive(v) => {
                // padded to even on encoding
                Length(((v.byte_len() + 1) & !1) as u32)
            }
            DicomValue::Sequence { length, .. } => *length,
            DicomValue::Fragments { .. } => Length::UNDEFINED,
            DicomValue::Deferred(segment) => Length(segment.len as u32),
        };
        DataElement {
            header: DataElementHeader { tag, vr, len },
            value,
        }
    }

    /// Create a data element from the given parts.
    /// The declared length is kept as is.
    pub fn new_with_len<T>(header: DataElementHeader, value: T) -> Self
    where
        T: Into<DicomValue>,
    {
        DataElement {
            header,
            value: value.into(),
        }
    }

    /// Create an empty data element.
    pub fn empty(tag: Tag, vr: VR) -> Self {
        DataElement {
            header: DataElementHeader {
                tag,
                vr,
                len: Length(0),
            },
            value: PrimitiveValue::Empty.into(),
        }
    }

    /// Retrieve the element header.
    pub fn header(&self) -> &DataElementHeader {
        &self.header
    }

    /// Retrieve the value representation.
    pub fn vr(&self) -> VR {
        self.header.vr()
    }

    /// Retrieve the data value.
    pub fn value(&self) -> &DicomValue {
        &self.value
    }

    /// Move the data value out of the element, discarding the header.
    pub fn into_value(self) -> DicomValue {
        self.value
    }
}

/// An owned DICOM data set,
/// keeping data elements unique and ordered by tag.
///
/// Elements decoded from a valid stream arrive in ascending tag order,
/// so iteration visits them in stream order as well.
/// Inserting an element with a tag already present replaces it.
#[derive(Debug, Default, PartialEq, Clone)]
pub struct Dataset {
    entries: BTreeMap<Tag, DataElement>,
}

impl Dataset {
    /// Create an empty data set.
    pub fn new() -> Self {
        Dataset::default()
    }

    /// Insert a data element, replacing any previous element
    /// with the same tag.
    pub fn put(&mut self, elem: DataElement) {
        self.entries.insert(elem.tag(), elem);
    }

    /// Insert a primitive element built from the given parts.
    pub fn put_value<T>(&mut self, tag: Tag, vr: VR, value: T)
    where
        T: Into<PrimitiveValue>,
    {
        self.put(DataElement::new(tag, vr, DicomValue::Primitive(value.into())));
    }

    /// Retrieve the element with the given tag, if present.
    pub fn get(&self, tag: Tag) -> Option<&DataElement> {
        self.entries.get(&tag)
    }

    /// Whether an element with the given tag is present.
    pub fn contains(&self, tag: Tag) -> bool {
        self.entries.contains_key(&tag)
    }

    /// Remove the element with the given tag, returning it.
    pub fn remove(&mut self, tag: Tag) -> Option<DataElement> {
        self.entries.remove(&tag)
    }

    /// The number of elements in the data set.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the data set has no elements.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over the elements in ascending tag order.
    pub fn iter(&self) -> btree_map::Values<'_, Tag, DataElement> {
        self.entries.values()
    }

    /// Retrieve a string value, trimmed of padding.
    pub fn get_str(&self, tag: Tag) -> Option<String> {
        self.get(tag)
            .and_then(|e| e.value().as_primitive())
            .and_then(|v| v.to_str().ok())
            .map(|s| s.into_owned())
    }

    /// Retrieve an unsigned 16-bit value.
    pub fn get_u16(&self, tag: Tag) -> Option<u16> {
        self.get(tag)
            .and_then(|e| e.value().as_primitive())
            .and_then(|v| v.uint16().ok())
    }

    /// Retrieve an unsigned 16-bit value, or a default when absent.
    pub fn get_u16_or(&self, tag: Tag, default: u16) -> u16 {
        self.get_u16(tag).unwrap_or(default)
    }

    /// Retrieve an unsigned 32-bit value.
    pub fn get_u32(&self, tag: Tag) -> Option<u32> {
        self.get(tag)
            .and_then(|e| e.value().as_primitive())
            .and_then(|v| v.uint32().ok())
    }
}

impl IntoIterator for Dataset {
    type Item = DataElement;
    type IntoIter = btree_map::IntoValues<Tag, DataElement>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_values()
    }
}

impl<'a> IntoIterator for &'a Dataset {
    type Item = &'a DataElement;
    type IntoIter = btree_map::Values<'a, Tag, DataElement>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl FromIterator<DataElement> for Dataset {
    fn from_iter<I: IntoIterator<Item = DataElement>>(iter: I) -> Self {
        let mut out = Dataset::new();
        for elem in iter {
            out.put(elem);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_replace() {
        let mut ds = Dataset::new();
        ds.put_value(Tag(0x0008, 0x0060), VR::CS, "CT");
        ds.put_value(Tag(0x0008, 0x0018), VR::UI, "1.2.3");
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.get_str(Tag(0x0008, 0x0060)).as_deref(), Some("CT"));

        ds.put_value(Tag(0x0008, 0x0060), VR::CS, "MR");
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.get_str(Tag(0x0008, 0x0060)).as_deref(), Some("MR"));
    }

    #[test]
    fn iteration_is_tag_ordered() {
        let mut ds = Dataset::new();
        ds.put_value(Tag(0x0010, 0x0010), VR::PN, "DOE^JOHN");
        ds.put_value(Tag(0x0008, 0x0060), VR::CS, "CT");
        let tags: Vec<_> = ds.iter().map(|e| e.tag()).collect();
        assert_eq!(tags, vec![Tag(0x0008, 0x0060), Tag(0x0010, 0x0010)]);
    }

    #[test]
    fn element_length_is_padded() {
        let elem = DataElement::new(
            Tag(0x0008, 0x0018),
            VR::UI,
            DicomValue::primitive("1.2.840.10008.1.1"),
        );
        assert_eq!(elem.length(), Length(18));
    }
}
