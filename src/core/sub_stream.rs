use super::base_stream::BaseStream;
use super::error::{PDFError, PDFResult};

/// A sub-stream that provides a restricted view into a parent stream.
///
/// Used to bound reads to an object's declared `stream ... endstream`
/// window: seeks and reads are clamped to `[start, start + length)` of the
/// parent, and positions are reported relative to `start`.
pub struct SubStream {
    /// The parent stream; this handle owns its cursor
    parent: Box<dyn BaseStream>,
    /// Absolute starting position in the parent stream
    start: usize,
    /// Length of this sub-stream
    length: usize,
    /// Current position relative to start (0 = start of sub-stream)
    pos: usize,
}

impl SubStream {
    /// Creates a new sub-stream from a parent stream.
    ///
    /// # Arguments
    /// * `parent` - The parent stream
    /// * `start` - Starting offset in the parent stream
    /// * `length` - Length of the sub-stream
    pub fn new(parent: Box<dyn BaseStream>, start: usize, length: usize) -> PDFResult<Self> {
        match start.checked_add(length) {
            Some(end) if end <= parent.length() => {}
            end => {
                return Err(PDFError::InvalidByteRange {
                    begin: start,
                    end: end.unwrap_or(usize::MAX),
                });
            }
        }

        Ok(SubStream {
            parent,
            start,
            length,
            pos: 0,
        })
    }

    /// Returns the absolute position in the parent stream.
    fn absolute_pos(&self) -> usize {
        self.start + self.pos
    }
}

impl BaseStream for SubStream {
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

        self.parent.set_pos(self.absolute_pos())?;
        let byte = self.parent.get_byte()?;
        self.pos += 1;
        Ok(byte)
    }

    fn get_bytes(&mut self, length: usize) -> PDFResult<Vec<u8>> {
        let available = self.length - self.pos;
        let to_read = length.min(available);
        if to_read == 0 {
            return Ok(Vec::new());
        }

        self.parent.set_pos(self.absolute_pos())?;
        let bytes = self.parent.get_bytes(to_read)?;
        self.pos += bytes.len();
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
        self.parent.make_sub_stream(self.start + start, length)
    }
}
