use super::base_stream::BaseStream;
use super::error::{PDFError, PDFResult};
use super::lexer::{Lexer, LexerState, Token};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::fmt;

/// Deepest array/dictionary nesting accepted inside one value.
pub const MAX_NESTING: usize = 256;

/// A PDF dictionary: name keys (without the leading slash) to values.
pub type Dictionary = FxHashMap<String, PDFObject>;

/// PDF object types as defined in the PDF specification.
///
/// References stay unresolved `(num, generation)` pairs; they are looked
/// up in the object table only when a caller dereferences them.
#[derive(Debug, Clone, PartialEq)]
pub enum PDFObject {
    /// Null value
    Null,

    /// Boolean value
    Boolean(bool),

    /// Numeric value (integers and reals)
    Number(f64),

    /// String value (from literal strings like (hello))
    String(Vec<u8>),

    /// Hex string value (from hex strings like <48656c6c6f>)
    HexString(Vec<u8>),

    /// Name value (from /Name)
    Name(String),

    /// A bare keyword or punctuation character, kept verbatim
    Keyword(String),

    /// Array of objects
    Array(Vec<PDFObject>),

    /// Dictionary (key-value pairs)
    Dictionary(Dictionary),

    /// Indirect object reference (like "5 0 R")
    Ref { num: u32, generation: u32 },
}

impl PDFObject {
    /// Returns true if this object is null.
    pub fn is_null(&self) -> bool {
        matches!(self, PDFObject::Null)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            PDFObject::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the value as a non-negative integer, if it is one.
    pub fn as_usize(&self) -> Option<usize> {
        match self {
            PDFObject::Number(n) if *n >= 0.0 && n.fract() == 0.0 => Some(*n as usize),
            _ => None,
        }
    }

    pub fn as_name(&self) -> Option<&str> {
        match self {
            PDFObject::Name(name) => Some(name),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[PDFObject]> {
        match self {
            PDFObject::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&Dictionary> {
        match self {
            PDFObject::Dictionary(dict) => Some(dict),
            _ => None,
        }
    }

    /// Returns the referenced object number if this is a reference.
    pub fn as_ref_num(&self) -> Option<u32> {
        match self {
            PDFObject::Ref { num, .. } => Some(*num),
            _ => None,
        }
    }
}

impl fmt::Display for PDFObject {
    /// Formats the value back into PDF syntax.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PDFObject::Null => write!(f, "null"),
            PDFObject::Boolean(b) => write!(f, "{}", b),
            PDFObject::Number(n) if n.fract() == 0.0 => write!(f, "{}", *n as i64),
            PDFObject::Number(n) => write!(f, "{}", n),
            PDFObject::String(s) => write!(f, "({})", String::from_utf8_lossy(s)),
            PDFObject::HexString(s) => {
                write!(f, "<")?;
                for b in s {
                    write!(f, "{:02X}", b)?;
                }
                write!(f, ">")
            }
            PDFObject::Name(name) => write!(f, "/{}", name),
            PDFObject::Keyword(k) => write!(f, "{}", k),
            PDFObject::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            PDFObject::Dictionary(dict) => {
                // Sorted keys keep the output stable
                let mut keys: Vec<&String> = dict.keys().collect();
                keys.sort();
                write!(f, "<<")?;
                for key in keys {
                    write!(f, " /{} {}", key, dict[key])?;
                }
                write!(f, " >>")
            }
            PDFObject::Ref { num, generation } => write!(f, "{} {} R", num, generation),
        }
    }
}

/// Snapshot of the parser: the lexer state plus any buffered lookahead.
#[derive(Debug, Clone)]
pub struct ParserState {
    lexer: LexerState,
    lookahead: SmallVec<[(Token, usize); 2]>,
    position: usize,
}

/// PDF Parser for building PDF objects from tokens.
///
/// Keeps a small lookahead buffer so that `N G R` can be recognized as an
/// indirect reference; when the third token turns out not to be `R`, the
/// peeked tokens stay buffered and are returned by the following reads.
pub struct Parser {
    /// The lexer that provides tokens
    lexer: Lexer,

    /// Tokens read ahead of the parse position, with their start offsets
    lookahead: SmallVec<[(Token, usize); 2]>,

    /// Start offset of the last token handed out
    position: usize,
}

impl Parser {
    /// Creates a new Parser over a byte source.
    pub fn new(stream: Box<dyn BaseStream>) -> PDFResult<Self> {
        Ok(Parser {
            lexer: Lexer::new(stream)?,
            lookahead: SmallVec::new(),
            position: 0,
        })
    }

    /// Returns the underlying lexer.
    pub fn lexer(&mut self) -> &mut Lexer {
        &mut self.lexer
    }

    /// Total length of the byte source.
    pub fn length(&self) -> usize {
        self.lexer.length()
    }

    /// Start offset of the last token returned by [`Parser::next_token`].
    pub fn position(&self) -> usize {
        self.position
    }

    /// Offset where the next token read will begin its scan.
    pub fn cursor(&self) -> usize {
        match self.lookahead.first() {
            Some((_, pos)) => *pos,
            None => self.lexer.char_position(),
        }
    }

    /// Moves to `offset`, discarding buffered tokens.
    pub fn seek(&mut self, offset: usize) -> PDFResult<()> {
        self.lookahead.clear();
        self.position = offset;
        self.lexer.seek(offset)
    }

    pub fn save(&self) -> ParserState {
        ParserState {
            lexer: self.lexer.save(),
            lookahead: self.lookahead.clone(),
            position: self.position,
        }
    }

    pub fn restore(&mut self, state: ParserState) {
        self.lexer.restore(state.lexer);
        self.lookahead = state.lookahead;
        self.position = state.position;
    }

    /// Returns the next token, draining the lookahead buffer first.
    pub fn next_token(&mut self) -> PDFResult<Token> {
        let (token, position) = if self.lookahead.is_empty() {
            let token = self.lexer.read_token()?;
            (token, self.lexer.position())
        } else {
            self.lookahead.remove(0)
        };
        self.position = position;
        Ok(token)
    }

    /// Peeks `depth` tokens ahead (0 = the next token) without consuming.
    pub fn peek_token(&mut self, depth: usize) -> PDFResult<&Token> {
        while self.lookahead.len() <= depth {
            let token = self.lexer.read_token()?;
            self.lookahead.push((token, self.lexer.position()));
        }
        Ok(&self.lookahead[depth].0)
    }

    /// Reads the next token and checks it is the given keyword.
    pub fn expect_keyword(&mut self, keyword: &str) -> PDFResult<()> {
        let token = self.next_token()?;
        if token.is_keyword(keyword) {
            Ok(())
        } else {
            Err(self.error_at(&token, format!("expected '{}'", keyword)))
        }
    }

    /// Reads the next token as a non-negative integer.
    pub fn read_integer(&mut self) -> PDFResult<usize> {
        let token = self.next_token()?;
        match token {
            Token::Number(n) if n >= 0.0 && n.fract() == 0.0 => Ok(n as usize),
            other => Err(self.error_at(&other, "expected an integer")),
        }
    }

    /// Builds a structure error located at `token`.
    pub fn error_at(&self, token: &Token, message: impl Into<String>) -> PDFError {
        PDFError::Structure {
            offset: self.position,
            token: token.to_string(),
            message: message.into(),
        }
    }

    fn token_error(&self, token: &Token, message: impl Into<String>) -> PDFError {
        PDFError::Token {
            offset: self.position,
            token: token.to_string(),
            message: message.into(),
        }
    }

    /// Parses one value: a number, string, name, keyword, array,
    /// dictionary or indirect reference.
    pub fn read_value(&mut self) -> PDFResult<PDFObject> {
        let token = self.next_token()?;
        self.read_value_from(token, 0)
    }

    fn read_value_from(&mut self, token: Token, depth: usize) -> PDFResult<PDFObject> {
        if depth > MAX_NESTING && matches!(token, Token::ArrayStart | Token::DictStart) {
            return Err(self.error_at(&token, "nesting too deep"));
        }

        match token {
            Token::ArrayStart => self.parse_array(depth + 1),
            Token::DictStart => self.parse_dictionary(depth + 1),

            Token::Number(n) => {
                if let Some(num) = whole(n) {
                    if let Token::Number(g) = self.peek_token(0)? {
                        if let Some(generation) = whole(*g) {
                            if self.peek_token(1)?.is_keyword("R") {
                                self.next_token()?; // generation
                                self.next_token()?; // R
                                return Ok(PDFObject::Ref {
                                    num: num as u32,
                                    generation: generation as u32,
                                });
                            }
                        }
                    }
                }
                Ok(PDFObject::Number(n))
            }

            Token::Keyword(k) => Ok(match k.as_str() {
                "true" => PDFObject::Boolean(true),
                "false" => PDFObject::Boolean(false),
                "null" => PDFObject::Null,
                _ => PDFObject::Keyword(k),
            }),

            Token::String(s) => Ok(PDFObject::String(s)),
            Token::HexString(s) => Ok(PDFObject::HexString(s)),
            Token::Name(n) => Ok(PDFObject::Name(n)),
            Token::Delimiter(ch) => Ok(PDFObject::Keyword((ch as char).to_string())),

            Token::EOF => Err(self.error_at(&token, "unexpected end of file")),
            Token::ArrayEnd | Token::DictEnd => {
                Err(self.token_error(&token, "unexpected closing delimiter"))
            }
        }
    }

    /// Parses an array: [ obj1 obj2 ... ]
    fn parse_array(&mut self, depth: usize) -> PDFResult<PDFObject> {
        let mut array = Vec::new();

        loop {
            let token = self.next_token()?;
            match token {
                Token::ArrayEnd => break,
                Token::EOF => {
                    return Err(self.error_at(&token, "unterminated array (missing ']')"));
                }
                other => array.push(self.read_value_from(other, depth)?),
            }
        }

        Ok(PDFObject::Array(array))
    }

    /// Parses a dictionary: << /Key1 value1 /Key2 value2 ... >>
    fn parse_dictionary(&mut self, depth: usize) -> PDFResult<PDFObject> {
        let mut dict = Dictionary::default();

        loop {
            let token = self.next_token()?;
            let key = match token {
                Token::DictEnd => break,
                Token::EOF => {
                    return Err(self.error_at(&token, "unterminated dictionary (missing '>>')"));
                }
                Token::Name(name) => name,
                other => return Err(self.token_error(&other, "dictionary key must be a name")),
            };

            let token = self.next_token()?;
            let value = self.read_value_from(token, depth)?;
            dict.insert(key, value);
        }

        Ok(PDFObject::Dictionary(dict))
    }

    /// Returns the offset where a stream body begins, given that the
    /// `stream` keyword was the last token read: one EOL (CRLF, CR or LF)
    /// after the keyword is skipped.
    pub fn stream_body_start(&mut self) -> PDFResult<usize> {
        let mut start = self.position + "stream".len();
        let eol = self.lexer.read_raw(start, 2)?;
        match eol.as_slice() {
            [b'\r', b'\n'] => start += 2,
            [b'\r', ..] | [b'\n', ..] => start += 1,
            _ => {}
        }
        Ok(start)
    }

    /// Scans forward from the cursor for `marker`; see [`Lexer::search_ascii`].
    pub fn search_ascii(&mut self, marker: &[u8]) -> PDFResult<Option<usize>> {
        if let Some((_, pos)) = self.lookahead.first() {
            let pos = *pos;
            self.seek(pos)?;
        }
        self.lexer.search_ascii(marker)
    }

    /// Reads raw bytes without disturbing the parse position.
    pub fn read_raw(&mut self, offset: usize, length: usize) -> PDFResult<Vec<u8>> {
        self.lexer.read_raw(offset, length)
    }

    /// Creates a bounded window over the underlying byte source.
    pub fn make_sub_stream(&self, start: usize, length: usize) -> PDFResult<Box<dyn BaseStream>> {
        self.lexer.stream().make_sub_stream(start, length)
    }
}

/// Returns `n` as an integer if it is a non-negative whole number.
fn whole(n: f64) -> Option<u64> {
    if n >= 0.0 && n.fract() == 0.0 && n <= u32::MAX as f64 {
        Some(n as u64)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Stream;

    fn parser(input: &str) -> Parser {
        Parser::new(Box::new(Stream::from_bytes(input.as_bytes().to_vec()))).unwrap()
    }

    fn parse_string(input: &str) -> PDFResult<PDFObject> {
        parser(input).read_value()
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_string("42").unwrap(), PDFObject::Number(42.0));
        assert_eq!(parse_string("-3.5").unwrap(), PDFObject::Number(-3.5));
    }

    #[test]
    fn test_parse_boolean_and_null() {
        assert_eq!(parse_string("true").unwrap(), PDFObject::Boolean(true));
        assert_eq!(parse_string("false").unwrap(), PDFObject::Boolean(false));
        assert_eq!(parse_string("null").unwrap(), PDFObject::Null);
    }

    #[test]
    fn test_parse_keyword_verbatim() {
        assert_eq!(
            parse_string("endobj").unwrap(),
            PDFObject::Keyword("endobj".to_string())
        );
    }

    #[test]
    fn test_parse_strings() {
        assert_eq!(
            parse_string("(Hello World)").unwrap(),
            PDFObject::String(b"Hello World".to_vec())
        );
        assert_eq!(
            parse_string("<48656C6C6F>").unwrap(),
            PDFObject::HexString(b"Hello".to_vec())
        );
    }

    #[test]
    fn test_parse_name() {
        assert_eq!(
            parse_string("/Type").unwrap(),
            PDFObject::Name("Type".to_string())
        );
    }

    #[test]
    fn test_parse_mixed_array() {
        let obj = parse_string("[1 /Name (string) true]").unwrap();
        assert_eq!(
            obj,
            PDFObject::Array(vec![
                PDFObject::Number(1.0),
                PDFObject::Name("Name".to_string()),
                PDFObject::String(b"string".to_vec()),
                PDFObject::Boolean(true),
            ])
        );
    }

    #[test]
    fn test_parse_nested_array() {
        let obj = parse_string("[[1 2] []]").unwrap();
        assert_eq!(
            obj,
            PDFObject::Array(vec![
                PDFObject::Array(vec![PDFObject::Number(1.0), PDFObject::Number(2.0)]),
                PDFObject::Array(vec![]),
            ])
        );
    }

    #[test]
    fn test_parse_empty_dictionary() {
        let obj = parse_string("<<>>").unwrap();
        assert_eq!(obj, PDFObject::Dictionary(Dictionary::default()));
    }

    #[test]
    fn test_parse_nested_dictionary() {
        let obj = parse_string("<< /Outer << /Inner 42 >> /Array [1 2 3] >>").unwrap();
        let outer = obj.as_dict().unwrap();

        let inner = outer.get("Outer").and_then(|o| o.as_dict()).unwrap();
        assert_eq!(inner.get("Inner"), Some(&PDFObject::Number(42.0)));
        assert_eq!(
            outer.get("Array").and_then(|a| a.as_array()).map(|a| a.len()),
            Some(3)
        );
    }

    #[test]
    fn test_parse_indirect_reference() {
        assert_eq!(
            parse_string("5 0 R").unwrap(),
            PDFObject::Ref { num: 5, generation: 0 }
        );
        assert_eq!(
            parse_string("[5 0 R 10 2 R]").unwrap(),
            PDFObject::Array(vec![
                PDFObject::Ref { num: 5, generation: 0 },
                PDFObject::Ref { num: 10, generation: 2 },
            ])
        );
    }

    #[test]
    fn test_two_numbers_without_r_are_not_lost() {
        let mut parser = parser("[1 2 3] 7 8 obj");
        assert_eq!(
            parser.read_value().unwrap(),
            PDFObject::Array(vec![
                PDFObject::Number(1.0),
                PDFObject::Number(2.0),
                PDFObject::Number(3.0),
            ])
        );
        assert_eq!(parser.read_value().unwrap(), PDFObject::Number(7.0));
        assert_eq!(parser.read_value().unwrap(), PDFObject::Number(8.0));
        assert_eq!(
            parser.read_value().unwrap(),
            PDFObject::Keyword("obj".to_string())
        );
    }

    #[test]
    fn test_dictionary_with_reference() {
        let obj = parse_string("<< /Parent 5 0 R /Count 3 >>").unwrap();
        let dict = obj.as_dict().unwrap();
        assert_eq!(dict.get("Parent").and_then(|p| p.as_ref_num()), Some(5));
        assert_eq!(dict.get("Count").and_then(|c| c.as_usize()), Some(3));
    }

    #[test]
    fn test_non_name_key_is_token_error() {
        let err = parse_string("<< 12 /Value >>").unwrap_err();
        assert!(matches!(err, PDFError::Token { offset: 3, .. }));
        assert!(err.to_string().contains("[12]"));
    }

    #[test]
    fn test_unterminated_array() {
        assert!(matches!(
            parse_string("[1 2 3"),
            Err(PDFError::Structure { .. })
        ));
    }

    #[test]
    fn test_unterminated_dictionary() {
        assert!(matches!(
            parse_string("<< /Type /Font"),
            Err(PDFError::Structure { .. })
        ));
    }

    #[test]
    fn test_nesting_limit() {
        let deep = format!("{}{}", "[".repeat(MAX_NESTING), "]".repeat(MAX_NESTING));
        assert!(parse_string(&deep).is_ok());

        let err = parse_string(&"[".repeat(100_000)).unwrap_err();
        assert!(matches!(err, PDFError::Structure { .. }));
        assert!(err.to_string().contains("nesting too deep"));

        let dicts = "<< /A ".repeat(MAX_NESTING + 2);
        assert!(parse_string(&dicts).unwrap_err().to_string().contains("nesting too deep"));
    }

    #[test]
    fn test_save_restore_with_lookahead() {
        let mut parser = parser("1 2 3 4");
        assert_eq!(parser.read_value().unwrap(), PDFObject::Number(1.0));
        let saved = parser.save();
        let cursor = parser.cursor();

        parser.seek(6).unwrap();
        assert_eq!(parser.read_value().unwrap(), PDFObject::Number(4.0));

        parser.restore(saved);
        assert_eq!(parser.cursor(), cursor);
        assert_eq!(parser.read_value().unwrap(), PDFObject::Number(2.0));
        assert_eq!(parser.position(), 2);
    }

    #[test]
    fn test_stream_body_start() {
        let mut crlf = parser("stream\r\nDATA");
        crlf.next_token().unwrap();
        assert_eq!(crlf.stream_body_start().unwrap(), 8);

        let mut lf = parser("<<>> stream\nDATA");
        lf.read_value().unwrap();
        lf.next_token().unwrap();
        assert_eq!(lf.stream_body_start().unwrap(), 12);
    }

    #[test]
    fn test_display_round_trip_shape() {
        let obj = parse_string("<< /Size 4 /Root 1 0 R /ID [<0A0B>] >>").unwrap();
        assert_eq!(obj.to_string(), "<< /ID [<0A0B>] /Root 1 0 R /Size 4 >>");
    }
}
