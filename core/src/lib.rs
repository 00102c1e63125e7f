//! This crate contains the core data types
//! for handling DICOM data sets and network messages:
//! attribute tags, value representations, element headers,
//! primitive values, tag-ordered data sets,
//! byte buffers for reassembly and deferred loading,
//! basic endianness-aware codecs,
//! and the minimal transfer syntax descriptors
//! needed by the upper layer protocol.
pub mod buffer;
pub mod codec;
pub mod dataset;
pub mod dictionary;
pub mod header;
pub mod transfer_syntax;
pub mod value;

pub use crate::buffer::{ByteBuffer, ChunkSource, FileSegment};
pub use crate::dataset::{DataElement, Dataset};
pub use crate::dictionary::DataDictionary;
pub use crate::header::{DataElementHeader, HasLength, Header, Length, SequenceItemHeader, Tag, VR};
pub use crate::transfer_syntax::TransferSyntax;
pub use crate::value::{DicomValue, PrimitiveValue};

/// Helper type alias for multi-valued attribute containers.
pub type C<T> = smallvec::SmallVec<[T; 2]>;
