//! Attribute dictionary support for implicit VR resolution.
//!
//! The built-in dictionary covers the command group, the file meta group
//! and the data set attributes exercised by the network services. The
//! [`DataDictionary`] trait keeps the seam open for a complete standard
//! dictionary.

use crate::header::{Tag, VR};

/// An attribute dictionary, mapping tags to their value representation.
pub trait DataDictionary {
    /// Fetch the value representation registered for the given tag.
    fn vr_of(&self, tag: Tag) -> Option<VR>;
}

impl<T: DataDictionary + ?Sized> DataDictionary for &T {
    fn vr_of(&self, tag: Tag) -> Option<VR> {
        (**self).vr_of(tag)
    }
}

/// An empty attribute dictionary.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StubDataDictionary;

impl DataDictionary for StubDataDictionary {
    fn vr_of(&self, _: Tag) -> Option<VR> {
        None
    }
}

/// Entries sorted by tag for binary search.
#[rustfmt::skip]
static ENTRIES: &[(Tag, VR)] = &[
    // command group
    (Tag(0x0000, 0x0002), VR::UI), // Affected SOP Class UID
    (Tag(0x0000, 0x0003), VR::UI), // Requested SOP Class UID
    (Tag(0x0000, 0x0100), VR::US), // Command Field
    (Tag(0x0000, 0x0110), VR::US), // Message ID
    (Tag(0x0000, 0x0120), VR::US), // Message ID Being Responded To
    (Tag(0x0000, 0x0600), VR::AE), // Move Destination
    (Tag(0x0000, 0x0700), VR::US), // Priority
    (Tag(0x0000, 0x0800), VR::US), // Command Data Set Type
    (Tag(0x0000, 0x0900), VR::US), // Status
    (Tag(0x0000, 0x0901), VR::AT), // Offending Element
    (Tag(0x0000, 0x0902), VR::LO), // Error Comment
    (Tag(0x0000, 0x0903), VR::US), // Error ID
    (Tag(0x0000, 0x1000), VR::UI), // Affected SOP Instance UID
    (Tag(0x0000, 0x1001), VR::UI), // Requested SOP Instance UID
    (Tag(0x0000, 0x1002), VR::US), // Event Type ID
    (Tag(0x0000, 0x1005), VR::AT), // Attribute Identifier List
    (Tag(0x0000, 0x1008), VR::US), // Action Type ID
    (Tag(0x0000, 0x1020), VR::US), // Number of Remaining Sub-operations
    (Tag(0x0000, 0x1021), VR::US), // Number of Completed Sub-operations
    (Tag(0x0000, 0x1022), VR::US), // Number of Failed Sub-operations
    (Tag(0x0000, 0x1023), VR::US), // Number of Warning Sub-operations
    (Tag(0x0000, 0x1030), VR::AE), // Move Originator Application Entity Title
    (Tag(0x0000, 0x1031), VR::US), // Move Originator Message ID
    // file meta group
    (Tag(0x0002, 0x0001), VR::OB), // File Meta Information Version
    (Tag(0x0002, 0x0002), VR::UI), // Media Storage SOP Class UID
    (Tag(0x0002, 0x0003), VR::UI), // Media Storage SOP Instance UID
    (Tag(0x0002, 0x0010), VR::UI), // Transfer Syntax UID
    (Tag(0x0002, 0x0012), VR::UI), // Implementation Class UID
    (Tag(0x0002, 0x0013), VR::SH), // Implementation Version Name
    (Tag(0x0002, 0x0016), VR::AE), // Source Application Entity Title
    // data set
    (Tag(0x0008, 0x0005), VR::CS), // Specific Character Set
    (Tag(0x0008, 0x0016), VR::UI), // SOP Class UID
    (Tag(0x0008, 0x0018), VR::UI), // SOP Instance UID
    (Tag(0x0008, 0x0020), VR::DA), // Study Date
    (Tag(0x0008, 0x0030), VR::TM), // Study Time
    (Tag(0x0008, 0x0050), VR::SH), // Accession Number
    (Tag(0x0008, 0x0052), VR::CS), // Query/Retrieve Level
    (Tag(0x0008, 0x0054), VR::AE), // Retrieve AE Title
    (Tag(0x0008, 0x0060), VR::CS), // Modality
    (Tag(0x0008, 0x0070), VR::LO), // Manufacturer
    (Tag(0x0008, 0x0080), VR::LO), // Institution Name
    (Tag(0x0008, 0x0090), VR::PN), // Referring Physician's Name
    (Tag(0x0008, 0x1030), VR::LO), // Study Description
    (Tag(0x0008, 0x103E), VR::LO), // Series Description
    (Tag(0x0008, 0x1110), VR::SQ), // Referenced Study Sequence
    (Tag(0x0008, 0x1115), VR::SQ), // Referenced Series Sequence
    (Tag(0x0008, 0x1140), VR::SQ), // Referenced Image Sequence
    (Tag(0x0008, 0x1150), VR::UI), // Referenced SOP Class UID
    (Tag(0x0008, 0x1155), VR::UI), // Referenced SOP Instance UID
    (Tag(0x0010, 0x0010), VR::PN), // Patient's Name
    (Tag(0x0010, 0x0020), VR::LO), // Patient ID
    (Tag(0x0010, 0x0030), VR::DA), // Patient's Birth Date
    (Tag(0x0010, 0x0040), VR::CS), // Patient's Sex
    (Tag(0x0020, 0x000D), VR::UI), // Study Instance UID
    (Tag(0x0020, 0x000E), VR::UI), // Series Instance UID
    (Tag(0x0020, 0x0010), VR::SH), // Study ID
    (Tag(0x0020, 0x0011), VR::IS), // Series Number
    (Tag(0x0020, 0x0013), VR::IS), // Instance Number
    (Tag(0x0028, 0x0002), VR::US), // Samples per Pixel
    (Tag(0x0028, 0x0004), VR::CS), // Photometric Interpretation
    (Tag(0x0028, 0x0010), VR::US), // Rows
    (Tag(0x0028, 0x0011), VR::US), // Columns
    (Tag(0x0028, 0x0100), VR::US), // Bits Allocated
    (Tag(0x0028, 0x0101), VR::US), // Bits Stored
    (Tag(0x0028, 0x0102), VR::US), // High Bit
    (Tag(0x0028, 0x0103), VR::US), // Pixel Representation
    (Tag(0x7FE0, 0x0010), VR::OW), // Pixel Data
];

/// The built-in attribute dictionary.
///
/// Group length attributes (element number zero) are resolved to UL
/// without a table entry.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StandardDataDictionary;

impl DataDictionary for StandardDataDictionary {
    fn vr_of(&self, tag: Tag) -> Option<VR> {
        if tag.is_group_length() {
            return Some(VR::UL);
        }
        ENTRIES
            .binary_search_by_key(&tag, |&(t, _)| t)
            .ok()
            .map(|i| ENTRIES[i].1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup() {
        let dict = StandardDataDictionary;
        assert_eq!(dict.vr_of(Tag(0x0000, 0x0100)), Some(VR::US));
        assert_eq!(dict.vr_of(Tag(0x0008, 0x0018)), Some(VR::UI));
        assert_eq!(dict.vr_of(Tag(0x7FE0, 0x0010)), Some(VR::OW));
        assert_eq!(dict.vr_of(Tag(0x0009, 0x1001)), None);
    }

    #[test]
    fn group_lengths_are_ul() {
        let dict = StandardDataDictionary;
        assert_eq!(dict.vr_of(Tag(0x0000, 0x0000)), Some(VR::UL));
        assert_eq!(dict.vr_of(Tag(0x0008, 0x0000)), Some(VR::UL));
    }

    #[test]
    fn entries_are_sorted() {
        for w in ENTRIES.windows(2) {
            assert!(w[0].0 < w[1].0);
        }
    }
}
