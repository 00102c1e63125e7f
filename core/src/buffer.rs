//! Byte buffer types for value storage and stream reassembly.
//!
//! [`ByteBuffer`] owns value bytes, optionally loading them lazily from a
//! [`FileSegment`]. [`ChunkSource`] accumulates message fragments as they
//! arrive from the network and exposes a read cursor over them, so that a
//! decoder can be resumed whenever more data is appended.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::PathBuf;

/// A byte range within a file, identifying value data
/// which was intentionally left on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSegment {
    /// path to the backing file
    pub path: PathBuf,
    /// offset of the first byte of the segment
    pub offset: u64,
    /// number of bytes in the segment
    pub len: u64,
}

impl FileSegment {
    /// Read the full segment into memory.
    pub fn read_all(&self) -> io::Result<Vec<u8>> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(self.offset))?;
        let mut out = vec![0; self.len as usize];
        file.read_exact(&mut out)?;
        Ok(out)
    }
}

/// An owned byte buffer, either resident in memory
/// or lazily backed by a file segment.
#[derive(Debug)]
pub struct ByteBuffer {
    data: Vec<u8>,
    backing: Option<FileSegment>,
}

impl ByteBuffer {
    /// Create a buffer over bytes already in memory.
    pub fn from_vec(data: Vec<u8>) -> Self {
        ByteBuffer {
            data,
            backing: None,
        }
    }

    /// Create a buffer whose contents live in the given file segment
    /// until first access.
    pub fn from_segment(segment: FileSegment) -> Self {
        ByteBuffer {
            data: Vec::new(),
            backing: Some(segment),
        }
    }

    /// The buffer length in bytes.
    pub fn len(&self) -> u64 {
        match &self.backing {
            Some(seg) => seg.len,
            None => self.data.len() as u64,
        }
    }

    /// Whether the buffer holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the contents are resident in memory.
    pub fn is_loaded(&self) -> bool {
        self.backing.is_none()
    }

    /// Access the buffer bytes, loading them from the backing file
    /// on first touch.
    pub fn bytes(&mut self) -> io::Result<&[u8]> {
        if let Some(seg) = self.backing.take() {
            match seg.read_all() {
                Ok(data) => self.data = data,
                Err(e) => {
                    self.backing = Some(seg);
                    return Err(e);
                }
            }
        }
        Ok(&self.data)
    }

    /// Take the buffer bytes out, loading them if needed.
    pub fn into_vec(mut self) -> io::Result<Vec<u8>> {
        self.bytes()?;
        Ok(self.data)
    }
}

/// An append-only sequence of byte chunks with a read cursor.
///
/// Chunks arrive as network fragments and are retained whole. All positions
/// are absolute stream offsets; the cursor may be moved backwards freely
/// within the retained bytes.
#[derive(Debug, Default)]
pub struct ChunkSource {
    chunks: Vec<Vec<u8>>,
    /// total number of bytes over all chunks
    total: u64,
    /// absolute read position
    position: u64,
}

impl ChunkSource {
    /// Create an empty source.
    pub fn new() -> Self {
        ChunkSource::default()
    }

    /// Append a chunk of bytes at the end of the stream.
    pub fn append(&mut self, chunk: Vec<u8>) {
        if chunk.is_empty() {
            return;
        }
        self.total += chunk.len() as u64;
        self.chunks.push(chunk);
    }

    /// The total number of bytes appended so far.
    pub fn total_len(&self) -> u64 {
        self.total
    }

    /// The absolute position of the read cursor.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Move the read cursor to an absolute position.
    pub fn set_position(&mut self, position: u64) {
        debug_assert!(position <= self.total);
        self.position = position.min(self.total);
    }

    /// The number of bytes between the cursor and the end of the stream.
    pub fn available(&self) -> u64 {
        self.total - self.position
    }

    /// Copy bytes at the cursor into `buf`, advancing the cursor.
    /// Fails with `UnexpectedEof` if fewer than `buf.len()` bytes remain.
    pub fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        if self.available() < buf.len() as u64 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "not enough buffered bytes",
            ));
        }
        let mut pos = self.position;
        let mut written = 0;
        let mut chunk_start = 0u64;
        for chunk in &self.chunks {
            let chunk_end = chunk_start + chunk.len() as u64;
            if pos < chunk_end {
                let in_chunk = (pos - chunk_start) as usize;
                let n = (chunk.len() - in_chunk).min(buf.len() - written);
                buf[written..written + n].copy_from_slice(&chunk[in_chunk..in_chunk + n]);
                written += n;
                pos += n as u64;
                if written == buf.len() {
                    break;
                }
            }
            chunk_start = chunk_end;
        }
        self.position = pos;
        Ok(())
    }

    /// Advance the cursor without copying.
    pub fn skip(&mut self, count: u64) {
        self.position = (self.position + count).min(self.total);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_source_reads_across_chunks() {
        let mut source = ChunkSource::new();
        source.append(vec![1, 2, 3]);
        source.append(vec![4, 5]);
        source.append(vec![6, 7, 8, 9]);
        assert_eq!(source.total_len(), 9);
        assert_eq!(source.available(), 9);

        let mut buf = [0u8; 4];
        source.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
        assert_eq!(source.position(), 4);

        let mut buf = [0u8; 5];
        source.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [5, 6, 7, 8, 9]);
        assert_eq!(source.available(), 0);

        let mut buf = [0u8; 1];
        assert!(source.read_exact(&mut buf).is_err());
    }

    #[test]
    fn chunk_source_rewinds() {
        let mut source = ChunkSource::new();
        source.append(vec![1, 2, 3, 4]);
        let mut buf = [0u8; 2];
        source.read_exact(&mut buf).unwrap();
        source.set_position(1);
        source.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [2, 3]);
    }

    #[test]
    fn byte_buffer_in_memory() {
        let mut buffer = ByteBuffer::from_vec(vec![9, 8, 7]);
        assert!(buffer.is_loaded());
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.bytes().unwrap(), &[9, 8, 7]);
    }
}
