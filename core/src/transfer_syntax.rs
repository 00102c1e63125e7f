//! Transfer syntax descriptors for the upper layer protocol.
//!
//! Only the uncompressed syntaxes are described here, which is what the
//! network services negotiate by default. Compressed pixel data travels
//! opaquely in fragment sequences and needs no codec at this layer.

use byteordered::Endianness;

/// A transfer syntax: how data sets are encoded on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferSyntax {
    /// the unique identifier of the transfer syntax
    pub uid: &'static str,
    /// the byte order of encoded values
    pub endianness: Endianness,
    /// whether value representations are encoded explicitly
    pub explicit_vr: bool,
}

/// Implicit VR Little Endian: the default transfer syntax.
pub const IMPLICIT_VR_LE: TransferSyntax = TransferSyntax {
    uid: "1.2.840.10008.1.2",
    endianness: Endianness::Little,
    explicit_vr: false,
};

/// Explicit VR Little Endian.
pub const EXPLICIT_VR_LE: TransferSyntax = TransferSyntax {
    uid: "1.2.840.10008.1.2.1",
    endianness: Endianness::Little,
    explicit_vr: true,
};

/// Explicit VR Big Endian (retired, but still encountered).
pub const EXPLICIT_VR_BE: TransferSyntax = TransferSyntax {
    uid: "1.2.840.10008.1.2.2",
    endianness: Endianness::Big,
    explicit_vr: true,
};

impl TransferSyntax {
    /// Look up a transfer syntax by its unique identifier,
    /// trimming any trailing padding from the wire.
    pub fn from_uid(uid: &str) -> Option<TransferSyntax> {
        match uid.trim_end_matches(|c| c == ' ' || c == '\0') {
            "1.2.840.10008.1.2" => Some(IMPLICIT_VR_LE),
            "1.2.840.10008.1.2.1" => Some(EXPLICIT_VR_LE),
            "1.2.840.10008.1.2.2" => Some(EXPLICIT_VR_BE),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_uid() {
        assert_eq!(
            TransferSyntax::from_uid("1.2.840.10008.1.2"),
            Some(IMPLICIT_VR_LE)
        );
        assert_eq!(
            TransferSyntax::from_uid("1.2.840.10008.1.2.1\0"),
            Some(EXPLICIT_VR_LE)
        );
        assert_eq!(TransferSyntax::from_uid("1.2.840.10008.1.2.4.50"), None);
    }
}
