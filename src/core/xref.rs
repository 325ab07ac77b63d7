use super::base_stream::BaseStream;
use super::decode;
use super::error::{PDFError, PDFResult};
use super::lexer::Token;
use super::object::{Location, ObjectRecord, ObjectState};
use super::parser::{Dictionary, PDFObject, Parser};
use rustc_hash::{FxHashMap, FxHashSet};

/// How far from the end of the file `startxref` is looked for.
const STARTXREF_WINDOW: usize = 64;

/// Trailer keys an xref stream contributes to the merged trailer.
const XREF_STREAM_TRAILER_KEYS: [&str; 4] = ["Root", "Size", "Info", "ID"];

/// Receives the recovery scan's progress in percent (0-100).
pub type ProgressFn = Box<dyn FnMut(u8) + Send>;

/// Cross-reference resolver and owner of the object table.
///
/// The table maps each object number to a single [`ObjectRecord`]. It is
/// filled either by walking the cross-reference chain from `startxref`
/// (classic tables, xref streams, and hybrid files mixing both) or, when
/// that structure is unusable, by [`XRef::recover`] scanning the whole
/// file for `N G obj` headers.
///
/// Revisions are walked newest first and an entry is only recorded the
/// first time its number is seen, so the newest definition of every
/// object wins.
pub struct XRef {
    /// Parser over the whole file
    pub(super) parser: Parser,

    /// The object table
    pub(super) objects: FxHashMap<u32, ObjectRecord>,

    /// Trailer keys merged across all revisions
    trailer: Dictionary,

    /// Progress sink for the recovery scan
    progress: Option<ProgressFn>,
}

impl XRef {
    /// Creates an empty resolver over a byte source.
    pub fn new(stream: Box<dyn BaseStream>, progress: Option<ProgressFn>) -> PDFResult<Self> {
        Ok(XRef {
            parser: Parser::new(stream)?,
            objects: FxHashMap::default(),
            trailer: Dictionary::default(),
            progress,
        })
    }

    /// The merged trailer dictionary.
    pub fn trailer(&self) -> &Dictionary {
        &self.trailer
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn record(&self, num: u32) -> Option<&ObjectRecord> {
        self.objects.get(&num)
    }

    /// All known object numbers, ascending.
    pub fn numbers(&self) -> Vec<u32> {
        let mut numbers: Vec<u32> = self.objects.keys().copied().collect();
        numbers.sort_unstable();
        numbers
    }

    /// Where the next token would be read from.
    pub fn cursor(&self) -> usize {
        self.parser.cursor()
    }

    /// Length of the underlying byte source.
    pub fn length(&self) -> usize {
        self.parser.length()
    }

    /// Reads raw bytes of the file without moving the parse cursor.
    pub fn read_raw(&mut self, offset: usize, length: usize) -> PDFResult<Vec<u8>> {
        self.parser.read_raw(offset, length)
    }

    /// Creates a bounded window over the file.
    pub fn make_sub_stream(&self, start: usize, length: usize) -> PDFResult<Box<dyn BaseStream>> {
        self.parser.make_sub_stream(start, length)
    }

    /// Records where object `num` lives, unless it is already known.
    pub fn set_entry(&mut self, num: u32, location: Location) {
        let record = self
            .objects
            .entry(num)
            .or_insert_with(|| ObjectRecord::new(num, Location::Unknown));
        if record.location == Location::Unknown {
            record.location = location;
        }
    }

    /// Gives object `num` a descriptive label unless it already has one.
    pub fn set_label(&mut self, num: u32, label: impl Into<String>) {
        if let Some(record) = self.objects.get_mut(&num) {
            if record.label.is_none() {
                record.label = Some(label.into());
            }
        }
    }

    /// Object number of the document catalog, if the trailer names one.
    pub fn root(&self) -> Option<u32> {
        self.trailer.get("Root").and_then(|r| r.as_ref_num())
    }

    // ========================================================================
    // Cross-reference chain
    // ========================================================================

    /// Walks the cross-reference chain starting at `startxref`.
    pub fn load(&mut self) -> PDFResult<()> {
        let start = self.find_startxref()?;

        // Sections still to read; the top of the stack is read next
        let mut pending = vec![start];
        let mut visited = FxHashSet::default();

        while let Some(offset) = pending.pop() {
            if !visited.insert(offset) {
                tracing::warn!(offset, "cross-reference chain loops, stopping");
                continue;
            }

            let links = self.read_section(offset)?;

            // XRefStm is read before Prev
            if let Some(prev) = links.prev {
                pending.push(prev);
            }
            if let Some(stream) = links.xref_stm {
                pending.push(stream);
            }
        }

        tracing::debug!(objects = self.objects.len(), "cross-reference chain loaded");
        Ok(())
    }

    /// Reads the offset that follows the last `startxref` of the file.
    fn find_startxref(&mut self) -> PDFResult<usize> {
        let length = self.parser.length();
        let tail_start = length.saturating_sub(STARTXREF_WINDOW);
        let tail = self.parser.read_raw(tail_start, length - tail_start)?;

        let marker = b"startxref";
        let found = tail
            .windows(marker.len())
            .rposition(|w| w == marker)
            .ok_or_else(|| PDFError::structure(tail_start, "not found: startxref"))?;

        self.parser.seek(tail_start + found)?;
        self.parser.expect_keyword("startxref")?;
        self.parser.read_integer()
    }

    /// Reads one cross-reference section at `offset`, classic or stream.
    fn read_section(&mut self, offset: usize) -> PDFResult<SectionLinks> {
        if offset >= self.parser.length() {
            return Err(PDFError::structure(
                offset,
                "cross-reference offset beyond end of file",
            ));
        }

        self.parser.seek(offset)?;
        let token = self.parser.next_token()?;

        let dict = if token.is_keyword("xref") {
            let trailer = self.read_xref_table()?;
            self.merge_trailer(&trailer, None);
            trailer
        } else if token.is_number() {
            let dict = self.read_xref_stream(offset)?;
            self.merge_trailer(&dict, Some(&XREF_STREAM_TRAILER_KEYS));
            dict
        } else {
            return Err(self.parser.error_at(&token, "required: xref"));
        };

        Ok(SectionLinks {
            prev: self.dict_usize(&dict, "Prev")?,
            xref_stm: self.dict_usize(&dict, "XRefStm")?,
        })
    }

    /// Reads a classic table after its `xref` keyword and returns the
    /// trailer dictionary that follows it.
    ///
    /// ```text
    /// xref
    /// 0 3
    /// 0000000000 65535 f
    /// 0000000015 00000 n
    /// 0000000079 00000 n
    /// trailer
    /// << /Size 3 /Root 1 0 R >>
    /// ```
    fn read_xref_table(&mut self) -> PDFResult<Dictionary> {
        let mut entries = 0;

        loop {
            let token = self.parser.next_token()?;
            if token.is_keyword("trailer") {
                break;
            }

            let Token::Number(first) = token else {
                return Err(self.parser.error_at(&token, "required: trailer"));
            };
            let first = first as u32;
            let count = self.parser.read_integer()?;

            for i in 0..count {
                let offset = self.parser.read_integer()?;
                // generation
                self.parser.read_integer()?;
                let flag = self.parser.next_token()?;
                let Some(number) = u32::try_from(i).ok().and_then(|i| first.checked_add(i)) else {
                    return Err(self.parser.error_at(&flag, "object number out of range"));
                };

                if flag.is_keyword("n") {
                    if offset > 0 {
                        self.set_entry(number, Location::Direct { offset });
                        entries += 1;
                    }
                } else if !flag.is_keyword("f") {
                    return Err(self.parser.error_at(&flag, "required: n or f"));
                }
            }
        }

        tracing::debug!(entries, "read cross-reference table");

        match self.parser.read_value()? {
            PDFObject::Dictionary(trailer) => Ok(trailer),
            other => Err(PDFError::Structure {
                offset: self.parser.position(),
                token: other.to_string(),
                message: "required: trailer dictionary".to_string(),
            }),
        }
    }

    /// Reads the cross-reference stream object at `offset` and applies
    /// its rows. Returns the stream's dictionary.
    fn read_xref_stream(&mut self, offset: usize) -> PDFResult<Dictionary> {
        self.parser.seek(offset)?;
        let num = self.parser.read_integer()? as u32;

        let resolved = self.read_direct(num, offset)?;
        let (Some(dict), Some(window)) = (resolved.dict.clone(), resolved.stream) else {
            return Err(PDFError::structure(offset, "cross-reference stream has no stream body"));
        };
        if resolved.obj_type() != Some("XRef") {
            return Err(PDFError::structure(offset, "required: /Type /XRef"));
        }

        // Keep the parsed object unless the number already lives elsewhere
        let record = self
            .objects
            .entry(num)
            .or_insert_with(|| ObjectRecord::new(num, Location::Direct { offset }));
        if record.location == (Location::Direct { offset }) && !record.has_read() {
            record.state = ObjectState::Resolved(Box::new(resolved));
            record.read_count += 1;
        }
        self.set_label(num, "/XRef");

        let widths: Vec<usize> = dict
            .get("W")
            .and_then(|w| w.as_array())
            .map(|w| w.iter().filter_map(|n| n.as_usize()).collect())
            .unwrap_or_default();
        if widths.len() != 3 || widths.iter().any(|&w| w > 8) {
            return Err(PDFError::structure(offset, "required: /W"));
        }

        let ranges = match dict.get("Index").and_then(|i| i.as_array()) {
            Some(index) => index
                .chunks_exact(2)
                .filter_map(|pair| Some((pair[0].as_usize()?, pair[1].as_usize()?)))
                .collect(),
            None => {
                let size = self
                    .dict_usize(&dict, "Size")?
                    .ok_or_else(|| PDFError::structure(offset, "required: /Size"))?;
                vec![(0, size)]
            }
        };

        let window = self.parser.make_sub_stream(window.start, window.length)?;
        let mut reader = decode::decoded_reader(window, &dict)?;
        let mut row = vec![0u8; widths.iter().sum()];
        let mut rows = 0;

        'ranges: for (first, count) in ranges {
            for i in 0..count {
                if !decode::read_block(reader.as_mut(), &mut row)? {
                    tracing::warn!(offset, rows, "cross-reference stream ends early");
                    break 'ranges;
                }
                rows += 1;

                let (kind, rest) = row.split_at(widths[0]);
                let (field2, field3) = rest.split_at(widths[1]);
                let kind = if widths[0] == 0 { 1 } else { read_field(kind) };
                let field2 = read_field(field2);
                let field3 = read_field(field3);

                // Rows past the object number space are consumed but dropped
                let Some(number) = first.checked_add(i).and_then(|n| u32::try_from(n).ok()) else {
                    tracing::debug!(offset, first, i, "cross-reference row out of range");
                    continue;
                };
                match kind {
                    1 if field2 > 0 => self.set_entry(
                        number,
                        Location::Direct {
                            offset: field2 as usize,
                        },
                    ),
                    2 if field2 > 0 => self.set_entry(
                        number,
                        Location::Contained {
                            container: field2 as u32,
                            index: field3 as usize,
                        },
                    ),
                    _ => {}
                }
            }
        }

        tracing::debug!(offset, rows, "read cross-reference stream");
        Ok(dict)
    }

    /// Copies trailer entries that are not set yet; `keys` limits which.
    fn merge_trailer(&mut self, dict: &Dictionary, keys: Option<&[&str]>) {
        for (key, value) in dict {
            if keys.is_some_and(|keys| !keys.contains(&key.as_str())) {
                continue;
            }
            self.trailer
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    }

    // ========================================================================
    // Recovery scan
    // ========================================================================

    /// Rebuilds the object table by scanning the whole file for object
    /// headers, parsing each object as it is found.
    ///
    /// Later definitions of a number replace earlier ones, and later
    /// trailer dictionaries override earlier keys, mirroring incremental
    /// updates appended to the file. If no trailer names a `/Root`, the
    /// first `/Type /Catalog` object is adopted.
    pub fn recover(&mut self) -> PDFResult<()> {
        tracing::debug!(length = self.parser.length(), "starting recovery scan");

        self.objects.clear();
        self.trailer.clear();
        self.parser.seek(0)?;

        let length = self.parser.length().max(1);
        let mut last_percent = None;
        let mut failures = 0;

        loop {
            let token = self.parser.next_token()?;
            if token == Token::EOF {
                break;
            }

            let percent = (self.parser.position() * 100 / length).min(100) as u8;
            if last_percent != Some(percent) {
                last_percent = Some(percent);
                self.report_progress(percent);
            }

            if token.is_keyword("trailer") {
                self.scan_trailer()?;
                continue;
            }

            if !token.is_keyword("obj") {
                continue;
            }
            let Some(header) = self.parser.lexer().take_header() else {
                continue;
            };

            self.objects.insert(
                header.number,
                ObjectRecord::new(
                    header.number,
                    Location::Direct {
                        offset: header.offset,
                    },
                ),
            );

            match self.resolved(header.number) {
                Ok(Some(resolved)) => {
                    let end = resolved.extent.end;
                    self.parser.seek(end)?;
                }
                Ok(None) => {}
                Err(e) => {
                    failures += 1;
                    tracing::warn!(
                        object = header.number,
                        offset = header.offset,
                        error = %e,
                        "skipping unreadable object"
                    );
                    if let Some(end) = self.parser.search_ascii(b"endobj")? {
                        self.parser.seek(end)?;
                    }
                }
            }
        }

        if last_percent != Some(100) {
            self.report_progress(100);
        }

        if !self.trailer.contains_key("Root") {
            self.adopt_catalog();
        }

        tracing::debug!(
            objects = self.objects.len(),
            failures,
            root = ?self.root(),
            "recovery scan finished"
        );
        Ok(())
    }

    /// Merges a trailer dictionary met during the recovery scan.
    fn scan_trailer(&mut self) -> PDFResult<()> {
        let saved = self.parser.save();
        match self.parser.read_value() {
            Ok(PDFObject::Dictionary(dict)) => self.trailer.extend(dict),
            _ => {
                tracing::warn!(offset = self.parser.position(), "unreadable trailer");
                self.parser.restore(saved);
            }
        }
        Ok(())
    }

    /// Uses the lowest-numbered `/Type /Catalog` object as `/Root`.
    fn adopt_catalog(&mut self) {
        let catalog = self.numbers().into_iter().find_map(|num| {
            let record = self.objects.get(&num)?;
            let resolved = record.resolved()?;
            (resolved.obj_type() == Some("Catalog")).then_some((num, resolved.generation))
        });

        if let Some((num, generation)) = catalog {
            tracing::debug!(root = num, "adopted catalog as /Root");
            self.trailer
                .insert("Root".to_string(), PDFObject::Ref { num, generation });
        }
    }

    fn report_progress(&mut self, percent: u8) {
        if let Some(progress) = self.progress.as_mut() {
            progress(percent);
        }
    }
}

/// The revisions a cross-reference section points to.
struct SectionLinks {
    prev: Option<usize>,
    xref_stm: Option<usize>,
}

/// Decodes a big-endian field of an xref stream row.
fn read_field(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0, |acc, &b| (acc << 8) | b as u64)
}
