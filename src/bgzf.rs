//! BGZF: blocked gzip compression with random access by virtual offsets.
//!
//! A BGZF file is a series of gzip members (blocks), each holding at most 64 KiB of uncompressed data.
//! The gzip header of each block carries a `BC` extra subfield with the total block size, which makes it possible to find block boundaries without decompressing.
//! The file ends with an empty block.
//! Because the blocks are ordinary gzip members, any gzip reader can decompress the whole file.
//!
//! A position in the uncompressed stream is addressed by a [`VirtualOffset`]: the file offset of the block in the high 48 bits and the offset within the uncompressed block in the low 16 bits.
//! Virtual offsets compare in the same order as the uncompressed positions they address.
//!
//! # Examples
//!
//! ```
//! use slice_base::bgzf::{BgzfReader, BgzfWriter, VirtualOffset};
//! use std::io::{Cursor, Write};
//!
//! let mut writer = BgzfWriter::new(Vec::new());
//! writer.write_all(b"first\n").unwrap();
//! let second = writer.virtual_position();
//! writer.write_all(b"second\n").unwrap();
//! let compressed = writer.finish().unwrap();
//!
//! let mut reader = BgzfReader::new(Cursor::new(compressed));
//! reader.seek(second).unwrap();
//! let mut line = Vec::new();
//! reader.read_line(&mut line).unwrap();
//! assert_eq!(line, b"second\n");
//! assert_eq!(second, VirtualOffset::new(0, 6));
//! ```

use std::io::{self, Read, Seek, SeekFrom, Write};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::{Compression, Crc};


//-----------------------------------------------------------------------------

/// A position in a BGZF file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtualOffset(u64);

impl VirtualOffset {
    /// Creates a virtual offset from a block offset and an offset within the uncompressed block.
    pub fn new(compressed: u64, uncompressed: u16) -> Self {
        VirtualOffset((compressed << 16) | (uncompressed as u64))
    }

    pub fn from_raw(value: u64) -> Self {
        VirtualOffset(value)
    }

    pub fn as_raw(self) -> u64 {
        self.0
    }

    /// Returns the file offset of the block.
    pub fn compressed_offset(self) -> u64 {
        self.0 >> 16
    }

    /// Returns the offset within the uncompressed block.
    pub fn uncompressed_offset(self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }
}

/// A half-open range of virtual offsets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Chunk {
    pub start: VirtualOffset,
    pub end: VirtualOffset,
}

impl Chunk {
    pub fn new(start: VirtualOffset, end: VirtualOffset) -> Self {
        Chunk { start, end }
    }
}

/// Sorts the chunks and merges overlapping or adjacent ones.
pub fn merge_chunks(mut chunks: Vec<Chunk>) -> Vec<Chunk> {
    if chunks.is_empty() {
        return chunks;
    }
    chunks.sort();

    let mut merged: Vec<Chunk> = Vec::with_capacity(chunks.len());
    let mut current = chunks[0];
    for chunk in chunks.into_iter().skip(1) {
        if chunk.start <= current.end {
            current.end = current.end.max(chunk.end);
        } else {
            merged.push(current);
            current = chunk;
        }
    }
    merged.push(current);

    merged
}

//-----------------------------------------------------------------------------

/// Maximum amount of uncompressed data in a block.
pub const MAX_BLOCK_DATA: usize = 0xFF00;

// Fixed part of a block header: gzip header with a 6-byte extra field.
const HEADER_SIZE: usize = 18;

// CRC32 and ISIZE.
const FOOTER_SIZE: usize = 8;

/// The empty block that terminates a BGZF file.
pub const EOF_BLOCK: [u8; 28] = [
    0x1F, 0x8B, 0x08, 0x04, 0x00, 0x00, 0x00, 0x00,
    0x00, 0xFF, 0x06, 0x00, 0x42, 0x43, 0x02, 0x00,
    0x1B, 0x00, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00,
];

fn invalid_data(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}

/// Compresses the data into a single BGZF block.
pub fn compress_block(data: &[u8], level: Compression) -> io::Result<Vec<u8>> {
    if data.len() > MAX_BLOCK_DATA {
        return Err(invalid_data(format!("Block data too large: {} bytes", data.len())));
    }
    let mut encoder = DeflateEncoder::new(Vec::with_capacity(data.len() / 2), level);
    encoder.write_all(data)?;
    let compressed = encoder.finish()?;

    let block_size = HEADER_SIZE + compressed.len() + FOOTER_SIZE;
    if block_size > u16::MAX as usize + 1 {
        return Err(invalid_data(format!("Compressed block too large: {} bytes", block_size)));
    }
    let mut crc = Crc::new();
    crc.update(data);

    let mut block = Vec::with_capacity(block_size);
    block.extend_from_slice(&[0x1F, 0x8B, 0x08, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0xFF]);
    block.extend_from_slice(&6u16.to_le_bytes());
    block.extend_from_slice(&[b'B', b'C']);
    block.extend_from_slice(&2u16.to_le_bytes());
    block.extend_from_slice(&((block_size - 1) as u16).to_le_bytes());
    block.extend_from_slice(&compressed);
    block.extend_from_slice(&crc.sum().to_le_bytes());
    block.extend_from_slice(&(data.len() as u32).to_le_bytes());
    Ok(block)
}

//-----------------------------------------------------------------------------

/// A writer that compresses its input into BGZF blocks.
///
/// Call [`BgzfWriter::finish`] to write the last block and the EOF marker.
pub struct BgzfWriter<W: Write> {
    inner: W,
    buffer: Vec<u8>,
    compressed_offset: u64,
    level: Compression,
}

impl<W: Write> BgzfWriter<W> {
    pub fn new(inner: W) -> Self {
        Self::with_level(inner, Compression::default())
    }

    pub fn with_level(inner: W, level: Compression) -> Self {
        BgzfWriter {
            inner,
            buffer: Vec::with_capacity(MAX_BLOCK_DATA),
            compressed_offset: 0,
            level,
        }
    }

    /// Returns the virtual offset of the next byte to be written.
    pub fn virtual_position(&self) -> VirtualOffset {
        // The buffer is flushed as soon as it becomes full.
        VirtualOffset::new(self.compressed_offset, self.buffer.len() as u16)
    }

    fn write_block(&mut self) -> io::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let block = compress_block(&self.buffer, self.level)?;
        self.inner.write_all(&block)?;
        self.compressed_offset += block.len() as u64;
        self.buffer.clear();
        Ok(())
    }

    /// Writes the remaining data and the EOF marker and returns the inner writer.
    pub fn finish(mut self) -> io::Result<W> {
        self.write_block()?;
        self.inner.write_all(&EOF_BLOCK)?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for BgzfWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut written = 0;
        while written < buf.len() {
            let len = (MAX_BLOCK_DATA - self.buffer.len()).min(buf.len() - written);
            self.buffer.extend_from_slice(&buf[written..written + len]);
            written += len;
            if self.buffer.len() >= MAX_BLOCK_DATA {
                self.write_block()?;
            }
        }
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.write_block()?;
        self.inner.flush()
    }
}

//-----------------------------------------------------------------------------

/// A reader for BGZF data that supports seeking to virtual offsets.
///
/// Only one block is held in memory at a time.
pub struct BgzfReader<R: Read + Seek> {
    inner: R,
    // Uncompressed data of the current block.
    block: Vec<u8>,
    // File offset of the current block.
    block_offset: u64,
    // File offset of the next block.
    next_offset: u64,
    // Offset in the current block.
    position: usize,
}

impl<R: Read + Seek> BgzfReader<R> {
    /// Creates a reader positioned at the start of the inner reader.
    pub fn new(inner: R) -> Self {
        BgzfReader {
            inner,
            block: Vec::new(),
            block_offset: 0,
            next_offset: 0,
            position: 0,
        }
    }

    /// Returns the virtual offset of the next byte to be read.
    pub fn virtual_position(&self) -> VirtualOffset {
        if self.position >= self.block.len() {
            VirtualOffset::new(self.next_offset, 0)
        } else {
            VirtualOffset::new(self.block_offset, self.position as u16)
        }
    }

    /// Moves to the given virtual offset.
    pub fn seek(&mut self, offset: VirtualOffset) -> io::Result<()> {
        let compressed = offset.compressed_offset();
        if compressed != self.block_offset || self.next_offset == 0 {
            self.inner.seek(SeekFrom::Start(compressed))?;
            self.next_offset = compressed;
            self.block.clear();
            self.read_block()?;
        }
        let position = offset.uncompressed_offset() as usize;
        if position > self.block.len() {
            return Err(invalid_data(format!(
                "Virtual offset {}/{} is past the end of a block of {} bytes",
                compressed, position, self.block.len()
            )));
        }
        self.position = position;
        Ok(())
    }

    // Reads the block at `next_offset`. Returns `false` at the end of the file.
    fn read_block(&mut self) -> io::Result<bool> {
        let mut header = [0u8; 12];
        let mut len = 0;
        while len < header.len() {
            let count = self.inner.read(&mut header[len..])?;
            if count == 0 {
                break;
            }
            len += count;
        }
        if len == 0 {
            self.block.clear();
            self.block_offset = self.next_offset;
            self.position = 0;
            return Ok(false);
        }
        if len < header.len() {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "Truncated BGZF block header"));
        }
        if header[0] != 0x1F || header[1] != 0x8B || header[2] != 0x08 || header[3] & 0x04 == 0 {
            return Err(invalid_data(format!("Invalid BGZF block header at offset {}", self.next_offset)));
        }

        // Find the BC subfield in the extra field.
        let xlen = u16::from_le_bytes([header[10], header[11]]) as usize;
        let mut extra = vec![0u8; xlen];
        self.inner.read_exact(&mut extra)?;
        let mut block_size: Option<usize> = None;
        let mut offset = 0;
        while offset + 4 <= extra.len() {
            let slen = u16::from_le_bytes([extra[offset + 2], extra[offset + 3]]) as usize;
            if extra[offset] == b'B' && extra[offset + 1] == b'C' && slen == 2 && offset + 6 <= extra.len() {
                block_size = Some(u16::from_le_bytes([extra[offset + 4], extra[offset + 5]]) as usize + 1);
            }
            offset += 4 + slen;
        }
        let block_size = block_size.ok_or(
            invalid_data(format!("Missing BGZF block size at offset {}", self.next_offset))
        )?;
        if block_size < 12 + xlen + FOOTER_SIZE {
            return Err(invalid_data(format!("Invalid BGZF block size {} at offset {}", block_size, self.next_offset)));
        }

        let mut compressed = vec![0u8; block_size - 12 - xlen];
        self.inner.read_exact(&mut compressed)?;
        let (data, footer) = compressed.split_at(compressed.len() - FOOTER_SIZE);
        let expected_crc = u32::from_le_bytes([footer[0], footer[1], footer[2], footer[3]]);
        let expected_len = u32::from_le_bytes([footer[4], footer[5], footer[6], footer[7]]) as usize;

        self.block.clear();
        self.block.reserve(expected_len);
        let mut decoder = DeflateDecoder::new(data);
        decoder.read_to_end(&mut self.block)?;
        if self.block.len() != expected_len {
            return Err(invalid_data(format!(
                "BGZF block at offset {}: expected {} bytes, got {}",
                self.next_offset, expected_len, self.block.len()
            )));
        }
        let mut crc = Crc::new();
        crc.update(&self.block);
        if crc.sum() != expected_crc {
            return Err(invalid_data(format!("BGZF block at offset {}: CRC mismatch", self.next_offset)));
        }

        self.block_offset = self.next_offset;
        self.next_offset += block_size as u64;
        self.position = 0;
        Ok(true)
    }

    /// Appends the next line, including the newline, to the buffer.
    ///
    /// Returns the number of bytes appended, which is 0 at the end of the file.
    pub fn read_line(&mut self, buf: &mut Vec<u8>) -> io::Result<usize> {
        let mut appended = 0;
        loop {
            if self.position >= self.block.len() {
                if !self.read_block()? {
                    return Ok(appended);
                }
                continue;
            }
            let available = &self.block[self.position..];
            match available.iter().position(|&c| c == b'\n') {
                Some(end) => {
                    buf.extend_from_slice(&available[..=end]);
                    self.position += end + 1;
                    return Ok(appended + end + 1);
                }
                None => {
                    buf.extend_from_slice(available);
                    appended += available.len();
                    self.position = self.block.len();
                }
            }
        }
    }

    /// Returns the inner reader.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

//-----------------------------------------------------------------------------
