//! Stream decoding.
//!
//! A stream body is decoded by stacking `Read` adapters over a bounded
//! window of the byte source: the window itself, then the filter named by
//! `/Filter`, then the row predictor requested by `/DecodeParms`. Each
//! layer pulls bytes from the one below on demand, so nothing is
//! decompressed ahead of what the caller reads.

use super::base_stream::{BaseStream, ByteReader};
use super::error::{PDFError, PDFResult};
use super::parser::{Dictionary, PDFObject};
use flate2::read::DeflateDecoder;
use std::io::{self, Read};

/// Widest predictor row accepted.
const MAX_COLUMNS: usize = 1 << 24;

/// The filters this decoder understands, resolved once from `/Filter`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    /// No `/Filter` entry: bytes pass through unchanged
    None,
    /// `/FlateDecode`
    Flate,
}

impl FilterKind {
    /// Resolves the filter of a stream dictionary.
    ///
    /// A single-element filter array is treated like the bare name.
    pub fn from_dict(dict: &Dictionary) -> PDFResult<Self> {
        let filter = match dict.get("Filter") {
            None | Some(PDFObject::Null) => return Ok(FilterKind::None),
            Some(PDFObject::Array(filters)) => match filters.as_slice() {
                [] => return Ok(FilterKind::None),
                [single] => single,
                _ => {
                    return Err(PDFError::UnsupportedFilter(
                        PDFObject::Array(filters.clone()).to_string(),
                    ));
                }
            },
            Some(other) => other,
        };

        match filter.as_name() {
            Some("FlateDecode") | Some("Fl") => Ok(FilterKind::Flate),
            _ => Err(PDFError::UnsupportedFilter(filter.to_string())),
        }
    }
}

/// Row-predictor settings from `/DecodeParms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecodeParams {
    /// Bytes per row, without the leading tag byte
    pub columns: Option<usize>,
    /// `/Predictor` value, if given
    pub predictor: Option<usize>,
}

impl DecodeParams {
    pub fn from_dict(dict: &Dictionary) -> Self {
        let params = match dict.get("DecodeParms") {
            Some(PDFObject::Dictionary(params)) => Some(params),
            Some(PDFObject::Array(items)) => items.first().and_then(|p| p.as_dict()),
            _ => None,
        };

        match params {
            Some(params) => DecodeParams {
                columns: params.get("Columns").and_then(|c| c.as_usize()),
                predictor: params.get("Predictor").and_then(|p| p.as_usize()),
            },
            None => DecodeParams::default(),
        }
    }

    /// Row width when row reconstruction applies.
    pub fn row_width(&self) -> Option<usize> {
        match (self.columns, self.predictor) {
            (_, Some(1)) => None,
            (Some(columns), _) if columns > 0 => Some(columns),
            _ => None,
        }
    }
}

/// Inflates a raw deflate body after its 2-byte zlib header.
///
/// Corrupt compressed data ends the output at the last good byte, so a
/// damaged body still yields whatever decoded cleanly.
pub struct FlateReader<R: Read> {
    decoder: DeflateDecoder<R>,
    done: bool,
}

impl<R: Read> FlateReader<R> {
    pub fn new(mut source: R) -> io::Result<Self> {
        let mut header = [0u8; 2];
        let mut skipped = 0;
        while skipped < header.len() {
            match source.read(&mut header[skipped..])? {
                0 => break,
                n => skipped += n,
            }
        }

        Ok(FlateReader {
            decoder: DeflateDecoder::new(source),
            done: false,
        })
    }
}

impl<R: Read> Read for FlateReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.done {
            return Ok(0);
        }

        match self.decoder.read(buf) {
            Ok(n) => Ok(n),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::InvalidInput
                        | io::ErrorKind::InvalidData
                        | io::ErrorKind::UnexpectedEof
                ) =>
            {
                tracing::warn!(error = %e, "deflate data ends early");
                self.done = true;
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }
}

/// Reverses "Up" row differencing.
///
/// Each encoded row is one tag byte followed by `columns` bytes; the tag
/// must be 2. Byte `i` of a row is added (mod 256) to byte `i` of the
/// previously reconstructed row, and only the reconstructed bytes are
/// returned.
pub struct PredictorReader<R: Read> {
    source: R,
    /// Encoded row buffer: tag + columns
    raw: Vec<u8>,
    /// Last reconstructed row (zeros before the first row)
    row: Vec<u8>,
    /// Bytes of `row` still to hand out start here
    row_pos: usize,
    /// Valid bytes in `row` (short for a truncated last row)
    row_len: usize,
}

impl<R: Read> PredictorReader<R> {
    pub fn new(source: R, columns: usize) -> Self {
        PredictorReader {
            source,
            raw: vec![0; columns + 1],
            row: vec![0; columns],
            row_pos: 0,
            row_len: 0,
        }
    }

    /// Decodes the next row. Returns false at end of data.
    fn next_row(&mut self) -> io::Result<bool> {
        let mut filled = 0;
        while filled < self.raw.len() {
            match self.source.read(&mut self.raw[filled..])? {
                0 => break,
                n => filled += n,
            }
        }

        if filled == 0 {
            return Ok(false);
        }

        let tag = self.raw[0];
        if tag != 2 {
            return Err(io::Error::other(PDFError::UnsupportedFilter(format!(
                "predictor row type {}",
                tag
            ))));
        }

        let available = filled - 1;
        for i in 0..available {
            self.row[i] = self.row[i].wrapping_add(self.raw[i + 1]);
        }
        self.row_pos = 0;
        self.row_len = available;
        Ok(available > 0)
    }
}

impl<R: Read> Read for PredictorReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.row_pos >= self.row_len && !self.next_row()? {
            return Ok(0);
        }

        let n = buf.len().min(self.row_len - self.row_pos);
        buf[..n].copy_from_slice(&self.row[self.row_pos..self.row_pos + n]);
        self.row_pos += n;
        Ok(n)
    }
}

/// Builds the decoding reader for a stream body.
///
/// `window` must already be bounded to the body's bytes.
pub fn decoded_reader(window: Box<dyn BaseStream>, dict: &Dictionary) -> PDFResult<Box<dyn Read>> {
    let raw = ByteReader::new(window);

    let inflated: Box<dyn Read> = match FilterKind::from_dict(dict)? {
        FilterKind::None => return Ok(Box::new(raw)),
        FilterKind::Flate => Box::new(FlateReader::new(raw).map_err(from_io)?),
    };

    Ok(match DecodeParams::from_dict(dict).row_width() {
        Some(columns) if columns > MAX_COLUMNS => {
            return Err(PDFError::UnsupportedFilter(format!("/Columns {}", columns)));
        }
        Some(columns) => Box::new(PredictorReader::new(inflated, columns)),
        None => inflated,
    })
}

/// Decodes a whole stream body into memory.
pub fn decode_all(window: Box<dyn BaseStream>, dict: &Dictionary) -> PDFResult<Vec<u8>> {
    let mut reader = decoded_reader(window, dict)?;
    let mut out = Vec::new();
    reader.read_to_end(&mut out).map_err(from_io)?;
    Ok(out)
}

/// Fills `buf` from a decoding reader.
///
/// Returns false when the data ends before `buf` is full.
pub fn read_block(reader: &mut dyn Read, buf: &mut [u8]) -> PDFResult<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]).map_err(from_io)? {
            0 => return Ok(false),
            n => filled += n,
        }
    }
    Ok(true)
}

/// Returns true if the stream's payload can be rendered as text: no
/// filter, or Flate without decode parameters.
pub fn is_text_renderable(dict: &Dictionary) -> bool {
    match FilterKind::from_dict(dict) {
        Ok(FilterKind::None) => true,
        Ok(FilterKind::Flate) => !dict.contains_key("DecodeParms"),
        Err(_) => false,
    }
}

/// Unwraps a `PDFError` carried through `std::io::Read`.
fn from_io(e: io::Error) -> PDFError {
    if e.get_ref().is_some_and(|inner| inner.is::<PDFError>()) {
        if let Some(inner) = e.into_inner() {
            if let Ok(err) = inner.downcast::<PDFError>() {
                return *err;
            }
        }
        return PDFError::Io(io::Error::other("decoder error"));
    }
    PDFError::Io(e)
}
