//! This crate works on top of [`medicom-core`](medicom_core)
//! to decode and encode DICOM data sets.
//!
//! The decoder is a resumable pull parser:
//! it consumes bytes from a [`SuspendSource`](source::SuspendSource)
//! and either completes or reports how many more bytes it needs,
//! keeping all of its cursor state between calls.
//! This makes it suitable for parsing messages
//! as they arrive from the network, fragment by fragment.
//!
//! The writer is a single forward pass
//! which always emits explicit lengths.
pub mod read;
pub mod source;
pub mod write;

pub use crate::read::{DatasetReader, DatasetReaderOptions, ReadStatus};
pub use crate::source::{FilePrefixSource, SuspendSource};
pub use crate::write::{
    encoded_len, encoded_len_with_group_lengths, write_dataset, write_dataset_with_group_lengths,
};
