//! Per-object records and on-demand object reading.
//!
//! Every object number in the file has exactly one [`ObjectRecord`] in the
//! table owned by [`XRef`]. A record starts out knowing only where its
//! bytes are ([`Location`]); the first time it is needed it is parsed and
//! moves to [`ObjectState::Resolved`]. Parsing happens at most once per
//! record, and an object that is being parsed is never re-entered, so
//! self-referencing dictionaries terminate.

use super::decode;
use super::error::{PDFError, PDFResult};
use super::parser::{Dictionary, PDFObject, Parser};
use super::stream::Stream;
use super::xref::XRef;
use std::ops::Range;

/// Where an object's bytes live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    /// Known number, no position yet
    Unknown,
    /// `N G obj` header at this byte offset of the file
    Direct { offset: usize },
    /// Member `index` of the object stream `container`
    Contained { container: u32, index: usize },
}

/// The `stream ... endstream` body of an object, in file offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamWindow {
    pub start: usize,
    pub length: usize,
}

impl StreamWindow {
    pub fn end(&self) -> usize {
        self.start + self.length
    }
}

/// The parsed content of an object.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedObject {
    pub generation: u32,
    /// Top-level dictionary, when the object is one
    pub dict: Option<Dictionary>,
    /// Top-level value, when the object is not a dictionary
    pub scalar: Option<PDFObject>,
    /// Stream body, when present
    pub stream: Option<StreamWindow>,
    /// For direct objects, header through `endobj` in the file; for
    /// container members, the member's slot in the decoded container.
    pub extent: Range<usize>,
}

impl ResolvedObject {
    /// The object's value as a single `PDFObject`.
    pub fn value(&self) -> PDFObject {
        match (&self.dict, &self.scalar) {
            (Some(dict), _) => PDFObject::Dictionary(dict.clone()),
            (None, Some(scalar)) => scalar.clone(),
            (None, None) => PDFObject::Null,
        }
    }

    /// The `/Type` name of the dictionary, if any.
    pub fn obj_type(&self) -> Option<&str> {
        self.dict
            .as_ref()
            .and_then(|d| d.get("Type"))
            .and_then(|t| t.as_name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ObjectState {
    Unresolved,
    /// Parse in progress; references back to this object see nothing
    Reading,
    Resolved(Box<ResolvedObject>),
    /// Parsing failed; the message is kept so it is not retried
    Failed(String),
}

/// One entry of the object table.
#[derive(Debug, Clone)]
pub struct ObjectRecord {
    pub number: u32,
    pub location: Location,
    pub state: ObjectState,
    /// Human-readable role discovered while walking the structure, such
    /// as `/Root`, `/XRef`, `/ObjStm`, `/Pages` or `/Page 3`
    pub label: Option<String>,
    /// How many times the object was parsed from bytes
    pub read_count: u32,
}

impl ObjectRecord {
    pub fn new(number: u32, location: Location) -> Self {
        ObjectRecord {
            number,
            location,
            state: ObjectState::Unresolved,
            label: None,
            read_count: 0,
        }
    }

    /// True once parsing was attempted (or is underway).
    pub fn has_read(&self) -> bool {
        !matches!(self.state, ObjectState::Unresolved)
    }

    pub fn resolved(&self) -> Option<&ResolvedObject> {
        match &self.state {
            ObjectState::Resolved(resolved) => Some(resolved),
            _ => None,
        }
    }

    pub fn obj_type(&self) -> Option<&str> {
        self.resolved().and_then(|r| r.obj_type())
    }

    fn finish(&mut self, resolved: ResolvedObject) {
        self.state = ObjectState::Resolved(Box::new(resolved));
        self.read_count += 1;
    }
}

impl XRef {
    /// Makes sure object `num` is parsed.
    ///
    /// Returns `Ok(true)` when the object is available, and `Ok(false)`
    /// when it is currently being parsed further up the call stack. The
    /// parser's position is the same before and after the call.
    pub fn resolve(&mut self, num: u32) -> PDFResult<bool> {
        let record = self
            .objects
            .get_mut(&num)
            .ok_or_else(|| PDFError::structure(0, format!("object {} not found", num)))?;

        let location = record.location;
        match &record.state {
            ObjectState::Resolved(_) => return Ok(true),
            ObjectState::Reading => return Ok(false),
            ObjectState::Failed(message) => {
                return Err(PDFError::structure(location_offset(location), message.clone()));
            }
            ObjectState::Unresolved => {}
        }

        if let Location::Contained { container, .. } = location {
            return self.resolve_member(num, container);
        }

        record.state = ObjectState::Reading;
        let saved = self.parser.save();
        let result = match location {
            Location::Direct { offset } => self.read_direct(num, offset),
            _ => Err(PDFError::structure(
                0,
                format!("object {} has no known position", num),
            )),
        };
        self.parser.restore(saved);

        match result {
            Ok(resolved) => {
                if let Some(record) = self.objects.get_mut(&num) {
                    record.finish(resolved);
                }
                Ok(true)
            }
            Err(e) => {
                if let Some(record) = self.objects.get_mut(&num) {
                    record.state = ObjectState::Failed(e.to_string());
                }
                Err(e)
            }
        }
    }

    /// Resolves a container member by expanding its container.
    fn resolve_member(&mut self, num: u32, container: u32) -> PDFResult<bool> {
        if !self.resolve(container)? {
            return Ok(false);
        }

        let record = self
            .objects
            .get_mut(&num)
            .ok_or_else(|| PDFError::structure(0, format!("object {} not found", num)))?;
        match record.state {
            ObjectState::Resolved(_) => Ok(true),
            ObjectState::Reading => Ok(false),
            _ => {
                let message = format!("object {} not found in object stream {}", num, container);
                record.state = ObjectState::Failed(message.clone());
                Err(PDFError::structure(0, message))
            }
        }
    }

    /// Returns the parsed content of `num`, parsing it first if needed.
    ///
    /// An object still being parsed further up the call stack yields
    /// `None`.
    pub fn resolved(&mut self, num: u32) -> PDFResult<Option<&ResolvedObject>> {
        if !self.resolve(num)? {
            return Ok(None);
        }
        Ok(self.objects.get(&num).and_then(|r| r.resolved()))
    }

    /// Dereferences `value` if it is a reference; other values are
    /// returned as they are.
    pub fn fetch(&mut self, value: &PDFObject) -> PDFResult<PDFObject> {
        match value {
            PDFObject::Ref { num, .. } => Ok(self
                .resolved(*num)?
                .map(|r| r.value())
                .unwrap_or(PDFObject::Null)),
            other => Ok(other.clone()),
        }
    }

    /// Reads `key` from `dict` as a non-negative integer, following a
    /// reference if needed.
    pub fn dict_usize(&mut self, dict: &Dictionary, key: &str) -> PDFResult<Option<usize>> {
        match dict.get(key) {
            Some(value) => Ok(self.fetch(value)?.as_usize()),
            None => Ok(None),
        }
    }

    /// Parses the object whose header sits at `offset`.
    pub(super) fn read_direct(&mut self, num: u32, offset: usize) -> PDFResult<ResolvedObject> {
        self.parser.seek(offset)?;

        let found = self.parser.read_integer()?;
        let generation = self.parser.read_integer()? as u32;
        self.parser.expect_keyword("obj")?;
        if found != num as usize {
            return Err(PDFError::Structure {
                offset,
                token: found.to_string(),
                message: format!("object number mismatch: expected {}", num),
            });
        }

        let (dict, scalar) = match self.parser.read_value()? {
            PDFObject::Dictionary(dict) => (Some(dict), None),
            other => (None, Some(other)),
        };

        let mut stream = None;
        let mut token = self.parser.next_token()?;
        if let Some(dict) = &dict {
            if token.is_keyword("stream") {
                stream = Some(self.read_stream_window(num, dict)?);
                token = self.parser.next_token()?;
            }
        }

        if !token.is_keyword("endobj") {
            return Err(self.parser.error_at(&token, "required: endobj"));
        }

        let resolved = ResolvedObject {
            generation,
            dict,
            scalar,
            stream,
            extent: offset..self.parser.position() + "endobj".len(),
        };

        if resolved.obj_type() == Some("ObjStm") {
            self.expand_object_stream(num, &resolved)?;
        }

        Ok(resolved)
    }

    /// Locates the stream body following the `stream` keyword and leaves
    /// the parser after `endstream`.
    fn read_stream_window(&mut self, num: u32, dict: &Dictionary) -> PDFResult<StreamWindow> {
        let start = self.parser.stream_body_start()?;
        let declared = match self.dict_usize(dict, "Length") {
            Ok(length) => length,
            Err(e) => {
                tracing::debug!(object = num, error = %e, "unresolvable /Length");
                None
            }
        };

        if let Some(length) = declared {
            if length <= self.parser.length().saturating_sub(start) {
                self.parser.seek(start + length)?;
                if self.parser.next_token()?.is_keyword("endstream") {
                    return Ok(StreamWindow { start, length });
                }
            }
        }

        tracing::warn!(
            object = num,
            length = ?declared,
            "stream /Length is missing or wrong, searching for endstream"
        );

        self.parser.seek(start)?;
        let Some(marker) = self.parser.search_ascii(b"endstream")? else {
            return Err(PDFError::structure(start, "required: endstream"));
        };

        // The EOL before the marker belongs to the syntax, not the data
        let mut end = marker;
        let eol_from = marker.saturating_sub(2).max(start);
        let before = self.parser.read_raw(eol_from, marker - eol_from)?;
        match before.as_slice() {
            [.., b'\r', b'\n'] => end -= 2,
            [.., b'\n'] | [.., b'\r'] => end -= 1,
            _ => {}
        }

        self.parser.expect_keyword("endstream")?;
        Ok(StreamWindow {
            start,
            length: end - start,
        })
    }

    /// Parses the members of an object stream into the table.
    ///
    /// Members that the cross-reference data places elsewhere (a newer
    /// revision) or that are already parsed are left alone.
    fn expand_object_stream(&mut self, container: u32, resolved: &ResolvedObject) -> PDFResult<()> {
        let (Some(dict), Some(window)) = (&resolved.dict, resolved.stream) else {
            return Err(PDFError::structure(
                resolved.extent.start,
                "object stream without a stream body",
            ));
        };

        let count = self
            .dict_usize(dict, "N")?
            .ok_or_else(|| PDFError::structure(resolved.extent.start, "required: /N"))?;
        let first = self
            .dict_usize(dict, "First")?
            .ok_or_else(|| PDFError::structure(resolved.extent.start, "required: /First"))?;

        let data = decode::decode_all(
            self.parser.make_sub_stream(window.start, window.length)?,
            dict,
        )?;
        let data_len = data.len();
        let mut members = Parser::new(Box::new(Stream::from_bytes(data)))?;

        let mut index = Vec::new();
        for _ in 0..count {
            let number = members.read_integer()? as u32;
            let offset = members.read_integer()?;
            index.push((number, first.saturating_add(offset)));
        }

        let mut expanded = 0;
        for (i, &(number, start)) in index.iter().enumerate() {
            let end = index
                .get(i + 1)
                .map_or(data_len, |&(_, next)| next)
                .clamp(start, data_len);

            let record = self.objects.entry(number).or_insert_with(|| {
                ObjectRecord::new(number, Location::Contained { container, index: i })
            });
            let owned = matches!(
                record.location,
                Location::Contained { container: c, .. } if c == container
            );
            if !owned || record.has_read() {
                continue;
            }

            if start > data_len {
                record.state = ObjectState::Failed(format!(
                    "object {} lies outside object stream {}",
                    number, container
                ));
                continue;
            }

            members.seek(start)?;
            match members.read_value() {
                Ok(value) => {
                    let (dict, scalar) = match value {
                        PDFObject::Dictionary(dict) => (Some(dict), None),
                        other => (None, Some(other)),
                    };
                    record.finish(ResolvedObject {
                        generation: 0,
                        dict,
                        scalar,
                        stream: None,
                        extent: start..end,
                    });
                    expanded += 1;
                }
                Err(e) => {
                    tracing::warn!(object = number, container, error = %e, "unreadable object stream member");
                    record.state = ObjectState::Failed(e.to_string());
                }
            }
        }

        self.set_label(container, "/ObjStm");
        tracing::debug!(container, members = count, expanded, "expanded object stream");
        Ok(())
    }
}

fn location_offset(location: Location) -> usize {
    match location {
        Location::Direct { offset } => offset,
        _ => 0,
    }
}
