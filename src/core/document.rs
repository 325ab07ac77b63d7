use super::base_stream::BaseStream;
use super::chunk_manager::{DEFAULT_CHUNK_SIZE, DEFAULT_MAX_CACHED_CHUNKS};
use super::decode;
use super::error::{PDFError, PDFResult};
use super::file_chunked_stream::FileChunkedStream;
use super::object::{Location, ObjectRecord, ObjectState};
use super::page;
use super::parser::Dictionary;
use super::stream::Stream;
use super::xref::{ProgressFn, XRef};
use std::fmt;
use std::path::Path;

/// Settings for opening a document.
///
/// ```no_run
/// use pdf_anatomy::{OpenOptions, PDFDocument};
///
/// let options = OpenOptions::new()
///     .chunk_size(16 * 1024)
///     .progress(|percent| eprintln!("scanning: {}%", percent));
/// let doc = PDFDocument::open_with("document.pdf", options).unwrap();
/// println!("{} pages", doc.page_count());
/// ```
pub struct OpenOptions {
    chunk_size: usize,
    max_cached_chunks: usize,
    progress: Option<ProgressFn>,
}

impl OpenOptions {
    pub fn new() -> Self {
        OpenOptions {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_cached_chunks: DEFAULT_MAX_CACHED_CHUNKS,
            progress: None,
        }
    }

    /// Size of the chunks file input is read in.
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// How many chunks stay cached in memory.
    pub fn max_cached_chunks(mut self, max_cached_chunks: usize) -> Self {
        self.max_cached_chunks = max_cached_chunks;
        self
    }

    /// Called with the percentage of the file covered while a recovery
    /// scan runs.
    pub fn progress<F>(mut self, progress: F) -> Self
    where
        F: FnMut(u8) + Send + 'static,
    {
        self.progress = Some(Box::new(progress));
        self
    }
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for OpenOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenOptions")
            .field("chunk_size", &self.chunk_size)
            .field("max_cached_chunks", &self.max_cached_chunks)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// What is known about one object without rendering it.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectInfo {
    pub number: u32,
    /// Role in the document structure, e.g. `/Root` or `/Page 2`
    pub label: Option<String>,
    /// The dictionary's `/Type`, without the slash
    pub obj_type: Option<String>,
    pub location: Location,
    /// Parse error, if the object could not be read
    pub error: Option<String>,
}

impl ObjectInfo {
    /// Byte offset of a directly stored object.
    pub fn offset(&self) -> Option<usize> {
        match self.location {
            Location::Direct { offset } => Some(offset),
            _ => None,
        }
    }

    /// Container number and index of an object stream member.
    pub fn container(&self) -> Option<(u32, usize)> {
        match self.location {
            Location::Contained { container, index } => Some((container, index)),
            _ => None,
        }
    }
}

/// A PDF file opened for structural inspection.
///
/// Opening checks the `%PDF` signature, loads the cross-reference data
/// (falling back to a full scan of the file when it is missing or
/// broken) and walks the page tree. Objects are parsed lazily after that,
/// the first time they are asked for.
pub struct PDFDocument {
    /// The object table and the byte source
    xref: XRef,

    /// Page object numbers in reading order
    pages: Vec<u32>,
}

impl PDFDocument {
    /// Opens a file with default options.
    pub fn open<P: AsRef<Path>>(path: P) -> PDFResult<Self> {
        Self::open_with(path, OpenOptions::default())
    }

    /// Opens a file, reading it in chunks as configured by `options`.
    pub fn open_with<P: AsRef<Path>>(path: P, options: OpenOptions) -> PDFResult<Self> {
        let stream = FileChunkedStream::open(
            path,
            Some(options.chunk_size),
            Some(options.max_cached_chunks),
        )?;
        Self::from_stream(Box::new(stream), options.progress)
    }

    /// Opens a document held in memory.
    pub fn from_bytes(data: Vec<u8>, options: OpenOptions) -> PDFResult<Self> {
        Self::from_stream(Box::new(Stream::from_bytes(data)), options.progress)
    }

    /// Opens a document over any byte source.
    pub fn from_stream(
        mut stream: Box<dyn BaseStream>,
        progress: Option<ProgressFn>,
    ) -> PDFResult<Self> {
        stream.set_pos(0)?;
        if stream.get_bytes(4)? != b"%PDF" {
            return Err(PDFError::Signature);
        }

        let mut xref = XRef::new(stream, progress)?;

        let mut recovered = false;
        match xref.load() {
            Ok(()) if !xref.is_empty() => {}
            Ok(()) => {
                tracing::warn!("cross-reference data lists no objects, scanning file");
                xref.recover()?;
                recovered = true;
            }
            Err(e) if e.is_recoverable() => {
                tracing::warn!(error = %e, "cross-reference data unusable, scanning file");
                xref.recover()?;
                recovered = true;
            }
            Err(e) => return Err(e),
        }

        if !recovered {
            if let Err(e) = Self::check_root(&mut xref) {
                tracing::warn!(error = %e, "document catalog unreadable, scanning file");
                xref.recover()?;
            }
        }

        Self::label_trailer_objects(&mut xref);
        let pages = page::collect_pages(&mut xref)?;

        Ok(PDFDocument { xref, pages })
    }

    /// Fails unless `/Root` resolves to a dictionary.
    fn check_root(xref: &mut XRef) -> PDFResult<()> {
        let root = xref
            .root()
            .ok_or_else(|| PDFError::structure(0, "required: /Root"))?;
        match xref.resolved(root)? {
            Some(resolved) if resolved.dict.is_some() => Ok(()),
            _ => Err(PDFError::structure(0, "required: /Root dictionary")),
        }
    }

    /// Labels objects the trailer refers to with their trailer key.
    fn label_trailer_objects(xref: &mut XRef) {
        let mut refs: Vec<(String, u32)> = xref
            .trailer()
            .iter()
            .filter_map(|(key, value)| Some((format!("/{}", key), value.as_ref_num()?)))
            .collect();
        refs.sort();
        for (label, num) in refs {
            xref.set_label(num, label);
        }
    }

    /// Number of pages found in the page tree.
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Object number of page `n`, counting from 1.
    pub fn get_page(&self, n: usize) -> Option<u32> {
        n.checked_sub(1).and_then(|i| self.pages.get(i)).copied()
    }

    /// All page object numbers in reading order.
    pub fn pages(&self) -> &[u32] {
        &self.pages
    }

    /// All object numbers, ascending.
    pub fn object_numbers(&self) -> Vec<u32> {
        self.xref.numbers()
    }

    /// The trailer entries merged across all revisions.
    pub fn trailer(&self) -> &Dictionary {
        self.xref.trailer()
    }

    /// Object number of the document catalog.
    pub fn root(&self) -> Option<u32> {
        self.xref.root()
    }

    /// Parses object `number` if needed and returns its record.
    pub fn object(&mut self, number: u32) -> PDFResult<&ObjectRecord> {
        self.xref.resolve(number)?;
        self.xref
            .record(number)
            .ok_or_else(|| PDFError::structure(0, format!("object {} not found", number)))
    }

    /// Summarizes object `number`: label, type and where it is stored.
    ///
    /// A parse failure does not fail the call; it is reported in
    /// [`ObjectInfo::error`].
    pub fn describe(&mut self, number: u32) -> PDFResult<ObjectInfo> {
        if self.xref.record(number).is_none() {
            return Err(PDFError::structure(0, format!("object {} not found", number)));
        }

        let error = self.xref.resolve(number).err().map(|e| e.to_string());
        let record = self
            .xref
            .record(number)
            .ok_or_else(|| PDFError::structure(0, format!("object {} not found", number)))?;

        Ok(ObjectInfo {
            number,
            label: record.label.clone(),
            obj_type: record.obj_type().map(str::to_string),
            location: record.location,
            error: error.or_else(|| match &record.state {
                ObjectState::Failed(message) => Some(message.clone()),
                _ => None,
            }),
        })
    }

    /// Fully decoded payload of a stream object.
    pub fn stream_bytes(&mut self, number: u32) -> PDFResult<Vec<u8>> {
        let (dict, window) = match self.xref.resolved(number)? {
            Some(resolved) => match (&resolved.dict, resolved.stream) {
                (Some(dict), Some(window)) => (dict.clone(), window),
                _ => {
                    return Err(PDFError::structure(
                        resolved.extent.start,
                        format!("object {} has no stream", number),
                    ));
                }
            },
            None => {
                return Err(PDFError::structure(
                    0,
                    format!("object {} is still being read", number),
                ));
            }
        };

        let window = self.xref.make_sub_stream(window.start, window.length)?;
        decode::decode_all(window, &dict)
    }

    /// Renders object `number` as text.
    ///
    /// Direct objects show their bytes from the `N G obj` header through
    /// `endobj`; a stream body is replaced by its decoded payload when it
    /// is unfiltered or plain Flate, and by `...` otherwise. Members of an
    /// object stream show their slot of the decoded container. Bytes are
    /// read as Latin-1 and all line endings become `\n`.
    pub fn read_decoded_text(&mut self, number: u32) -> PDFResult<String> {
        let record = self.object(number)?;
        let location = record.location;
        let Some(resolved) = record.resolved() else {
            return Err(PDFError::structure(
                0,
                format!("object {} is still being read", number),
            ));
        };
        let extent = resolved.extent.clone();
        let stream = resolved.stream;
        let dict = resolved.dict.clone().unwrap_or_default();

        let mut text = String::new();
        match location {
            Location::Contained { container, .. } => {
                let data = self.stream_bytes(container)?;
                let end = extent.end.min(data.len());
                let start = extent.start.min(end);
                text.push_str(&latin1(&data[start..end]));
            }
            _ => match stream {
                Some(window) => {
                    let head = self.xref.read_raw(extent.start, window.start - extent.start)?;
                    text.push_str(&latin1(&head));
                    text.push_str(&self.payload_text(number, &dict));
                    let tail = self.xref.read_raw(window.end(), extent.end.saturating_sub(window.end()))?;
                    text.push_str(&latin1(&tail));
                }
                None => {
                    let bytes = self.xref.read_raw(extent.start, extent.len())?;
                    text.push_str(&latin1(&bytes));
                }
            },
        }

        Ok(normalize_line_endings(&text))
    }

    /// Decoded stream payload as text, or `...` when it cannot be shown.
    fn payload_text(&mut self, number: u32, dict: &Dictionary) -> String {
        if !decode::is_text_renderable(dict) {
            return "...".to_string();
        }
        match self.stream_bytes(number) {
            Ok(payload) => latin1(&payload),
            Err(e) => {
                tracing::warn!(object = number, error = %e, "stream payload not decodable");
                "...".to_string()
            }
        }
    }

    /// Closes the document and releases the byte source.
    pub fn close(self) {
        tracing::debug!(objects = self.xref.len(), "closing document");
    }
}

/// Maps every byte to the char with the same code point.
fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

/// Turns CRLF and lone CR into LF.
fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}
