//! Byte sources which a decoder can be suspended on.
//!
//! A [`SuspendSource`] exposes how many bytes are buffered past the read
//! cursor, so the decoder can tell how much it is missing instead of
//! blocking. Sources grow as network fragments arrive: a [`ChunkSource`]
//! accumulates them in memory, while a [`FilePrefixSource`] follows the
//! written prefix of a file being spooled to disk.

use medicom_core::buffer::{ChunkSource, FileSegment};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::PathBuf;

/// A readable byte source with a known buffered extent,
/// supporting decoder suspension and resumption.
pub trait SuspendSource {
    /// The number of bytes buffered past the read cursor.
    fn available(&self) -> u64;

    /// The absolute position of the read cursor.
    fn position(&self) -> u64;

    /// Move the read cursor to an absolute position
    /// within the buffered extent.
    fn seek_to(&mut self, position: u64) -> io::Result<()>;

    /// Whether the cursor may be moved backwards.
    fn can_seek(&self) -> bool;

    /// Fill `buf` from the cursor, advancing it.
    /// The caller is expected to check [`available`](Self::available) first.
    fn read_exact_into(&mut self, buf: &mut [u8]) -> io::Result<()>;

    /// Identify a byte range of this source as a file segment,
    /// if the source is backed by a file.
    fn file_segment(&self, _offset: u64, _len: u64) -> Option<FileSegment> {
        None
    }
}

impl SuspendSource for ChunkSource {
    fn available(&self) -> u64 {
        ChunkSource::available(self)
    }

    fn position(&self) -> u64 {
        ChunkSource::position(self)
    }

    fn seek_to(&mut self, position: u64) -> io::Result<()> {
        self.set_position(position);
        Ok(())
    }

    fn can_seek(&self) -> bool {
        true
    }

    fn read_exact_into(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.read_exact(buf)
    }
}

/// A source over the written prefix of a file.
///
/// The file keeps growing while it is decoded: the owner appends received
/// bytes and extends the readable prefix with [`extend_to`](Self::extend_to).
/// Values may be identified as file segments and left on disk.
#[derive(Debug)]
pub struct FilePrefixSource {
    file: File,
    path: PathBuf,
    /// number of bytes written to the file so far
    written: u64,
    /// absolute read position
    position: u64,
}

impl FilePrefixSource {
    /// Open a source over the given file.
    /// The readable prefix starts empty.
    pub fn new(path: PathBuf) -> io::Result<Self> {
        let file = File::open(&path)?;
        Ok(FilePrefixSource {
            file,
            path,
            written: 0,
            position: 0,
        })
    }

    /// Extend the readable prefix up to `written` bytes.
    pub fn extend_to(&mut self, written: u64) {
        debug_assert!(written >= self.written);
        self.written = written;
    }

    /// The path of the backing file.
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl SuspendSource for FilePrefixSource {
    fn available(&self) -> u64 {
        self.written - self.position
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn seek_to(&mut self, position: u64) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(position))?;
        self.position = position;
        Ok(())
    }

    fn can_seek(&self) -> bool {
        true
    }

    fn read_exact_into(&mut self, buf: &mut [u8]) -> io::Result<()> {
        if self.available() < buf.len() as u64 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "read past the written prefix",
            ));
        }
        self.file.seek(SeekFrom::Start(self.position))?;
        self.file.read_exact(buf)?;
        self.position += buf.len() as u64;
        Ok(())
    }

    fn file_segment(&self, offset: u64, len: u64) -> Option<FileSegment> {
        Some(FileSegment {
            path: self.path.clone(),
            offset,
            len,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn file_prefix_source_follows_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spool.bin");
        let mut writer = File::create(&path).unwrap();
        writer.write_all(&[1, 2, 3, 4]).unwrap();
        writer.flush().unwrap();

        let mut source = FilePrefixSource::new(path).unwrap();
        assert_eq!(source.available(), 0);
        source.extend_to(4);
        assert_eq!(source.available(), 4);

        let mut buf = [0u8; 2];
        source.read_exact_into(&mut buf).unwrap();
        assert_eq!(buf, [1, 2]);

        writer.write_all(&[5, 6]).unwrap();
        writer.flush().unwrap();
        source.extend_to(6);
        assert_eq!(source.available(), 4);

        let mut buf = [0u8; 4];
        source.read_exact_into(&mut buf).unwrap();
        assert_eq!(buf, [3, 4, 5, 6]);

        let seg = source.file_segment(2, 3).unwrap();
        assert_eq!(seg.read_all().unwrap(), vec![3, 4, 5]);
    }
}
