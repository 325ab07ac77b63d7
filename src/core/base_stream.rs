use super::error::{PDFError, PDFResult};
use std::io::Read;

/// Base trait for all random-access byte sources.
///
/// This trait provides a common interface for reading data from a file or
/// from memory in a uniform way. Positions are always relative to the start
/// of the stream, so a sub-stream windowed onto a larger source reports
/// offsets from the beginning of its window.
///
/// Implementations must be `Send` so a whole document can be opened on a
/// worker thread.
pub trait BaseStream: Send {
    // ============================================================================
    // Required methods (must be implemented by all stream types)
    // ============================================================================

    /// Returns the total length of the stream in bytes.
    fn length(&self) -> usize;

    /// Returns the current position in the stream.
    fn pos(&self) -> usize;

    /// Sets the current position in the stream.
    fn set_pos(&mut self, pos: usize) -> PDFResult<()>;

    /// Reads and returns a single byte from the stream, advancing the position.
    ///
    /// Returns `UnexpectedEndOfStream` at the end of the stream.
    fn get_byte(&mut self) -> PDFResult<u8>;

    /// Reads up to `length` bytes, advancing the position.
    ///
    /// The result is shorter than `length` only when the end of the stream
    /// is reached.
    fn get_bytes(&mut self, length: usize) -> PDFResult<Vec<u8>>;

    /// Creates an independent stream over `[start, start + length)` of this
    /// stream. The new stream has its own cursor starting at 0.
    fn make_sub_stream(&self, start: usize, length: usize) -> PDFResult<Box<dyn BaseStream>>;

    // ============================================================================
    // Provided methods with default implementations
    // ============================================================================

    /// Returns true if the stream contains no data.
    fn is_empty(&self) -> bool {
        self.length() == 0
    }

    /// Reads a single byte without advancing the position.
    fn peek_byte(&mut self) -> PDFResult<u8> {
        let current_pos = self.pos();
        let byte = self.get_byte()?;
        self.set_pos(current_pos)?;
        Ok(byte)
    }

    /// Returns true once the cursor sits at the end of the stream.
    fn at_end(&self) -> bool {
        self.pos() >= self.length()
    }
}

/// Adapts a [`BaseStream`] to `std::io::Read` so decompressors can pull
/// from it.
pub struct ByteReader {
    inner: Box<dyn BaseStream>,
}

impl ByteReader {
    pub fn new(inner: Box<dyn BaseStream>) -> Self {
        ByteReader { inner }
    }
}

impl Read for ByteReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self.inner.get_bytes(buf.len()) {
            Ok(bytes) => {
                buf[..bytes.len()].copy_from_slice(&bytes);
                Ok(bytes.len())
            }
            Err(PDFError::Io(e)) => Err(e),
            Err(e) => Err(std::io::Error::other(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Stream;

    #[test]
    fn test_byte_reader_reads_window() {
        let stream = Stream::from_bytes(b"0123456789".to_vec());
        let mut reader = ByteReader::new(stream.make_sub_stream(2, 5).unwrap());
        let mut out = String::new();
        reader.read_to_string(&mut out).unwrap();
        assert_eq!(out, "23456");
    }
}
