use super::base_stream::BaseStream;
use super::error::{PDFError, PDFResult};
use std::sync::Arc;

/// A simple in-memory stream implementation.
///
/// Used for byte-slice input and for the decoded bodies of object
/// streams. The underlying data is stored in an Arc, allowing sub-streams
/// to share the same data without cloning.
pub struct Stream {
    /// The underlying byte buffer (shared via Arc)
    bytes: Arc<Vec<u8>>,
    /// Current read position, relative to `start`
    pos: usize,
    /// Starting offset in the buffer
    start: usize,
    /// Length of accessible data from start
    length: usize,
}

impl Stream {
    /// Creates a new Stream from a byte vector.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let length = bytes.len();
        Stream {
            bytes: Arc::new(bytes),
            pos: 0,
            start: 0,
            length,
        }
    }

    /// Creates a new Stream from an Arc-wrapped byte vector.
    ///
    /// This is used internally for creating sub-streams that share data.
    fn from_arc(bytes: Arc<Vec<u8>>, start: usize, length: usize) -> Self {
        Stream {
            bytes,
            pos: 0,
            start,
            length,
        }
    }
}

impl BaseStream for Stream {
    fn length(&self) -> usize {
        self.length
    }

    fn pos(&self) -> usize {
        self.pos
    }

    fn set_pos(&mut self, pos: usize) -> PDFResult<()> {
        if pos > self.length {
            return Err(PDFError::InvalidPosition {
                pos,
                length: self.length,
            });
        }
        self.pos = pos;
        Ok(())
    }

    fn get_byte(&mut self) -> PDFResult<u8> {
        if self.pos >= self.length {
            return Err(PDFError::UnexpectedEndOfStream);
        }
        let byte = self.bytes[self.start + self.pos];
        self.pos += 1;
        Ok(byte)
    }

    fn get_bytes(&mut self, length: usize) -> PDFResult<Vec<u8>> {
        let end_pos = self.pos.saturating_add(length).min(self.length);
        let bytes = self.bytes[self.start + self.pos..self.start + end_pos].to_vec();
        self.pos = end_pos;
        Ok(bytes)
    }

    fn make_sub_stream(&self, start: usize, length: usize) -> PDFResult<Box<dyn BaseStream>> {
        match start.checked_add(length) {
            Some(end) if end <= self.length => {}
            end => {
                return Err(PDFError::InvalidByteRange {
                    begin: start,
                    end: end.unwrap_or(usize::MAX),
                });
            }
        }

        // Share the Arc instead of cloning the data
        Ok(Box::new(Stream::from_arc(
            Arc::clone(&self.bytes),
            self.start + start,
            length,
        )))
    }
}
