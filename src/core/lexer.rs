use super::base_stream::BaseStream;
use super::error::{PDFError, PDFResult};
use std::fmt;

/// Size of the lexer's read-ahead window.
const READ_AHEAD: usize = 4096;

/// PDF token types returned by the Lexer.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// End of file marker
    EOF,

    /// Numeric value (integers and reals)
    Number(f64),

    /// Name value (from /Name), stored without the leading slash
    Name(String),

    /// Bare keyword such as `obj`, `R`, `stream`, `trailer`, `true`, `null`
    Keyword(String),

    /// String value (from literal strings like (hello))
    String(Vec<u8>),

    /// Hex string value (from hex strings like <48656c6c6f>)
    HexString(Vec<u8>),

    /// Array start '['
    ArrayStart,

    /// Array end ']'
    ArrayEnd,

    /// Dictionary start '<<'
    DictStart,

    /// Dictionary end '>>'
    DictEnd,

    /// Any other single punctuation character
    Delimiter(u8),
}

impl Token {
    /// Returns true if this token is the given bare keyword.
    pub fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self, Token::Keyword(k) if k == keyword)
    }

    /// Returns the numeric value if this is a number token.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Token::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Token::Number(_))
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::EOF => write!(f, "EOF"),
            Token::Number(n) if n.fract() == 0.0 => write!(f, "{}", *n as i64),
            Token::Number(n) => write!(f, "{}", n),
            Token::Name(name) => write!(f, "/{}", name),
            Token::Keyword(k) => write!(f, "{}", k),
            Token::String(s) => write!(f, "({})", String::from_utf8_lossy(s)),
            Token::HexString(s) => {
                write!(f, "<")?;
                for b in s {
                    write!(f, "{:02X}", b)?;
                }
                write!(f, ">")
            }
            Token::ArrayStart => write!(f, "["),
            Token::ArrayEnd => write!(f, "]"),
            Token::DictStart => write!(f, "<<"),
            Token::DictEnd => write!(f, ">>"),
            Token::Delimiter(ch) => write!(f, "{}", *ch as char),
        }
    }
}

/// Location of an `N G obj` header seen by the lexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjHeader {
    /// Object number (the first of the two numbers before `obj`)
    pub number: u32,
    /// Generation number
    pub generation: u16,
    /// Byte offset where the object number starts
    pub offset: usize,
}

/// Snapshot of everything the lexer needs to resume tokenizing.
///
/// Capturing and restoring it lets a caller parse ahead (e.g. to resolve
/// an indirect `/Length`) and then continue exactly where it left off.
#[derive(Debug, Clone)]
pub struct LexerState {
    /// Offset of the next byte to read
    offset: usize,
    /// Current character being examined (-1 at EOF)
    current_char: i32,
    /// Start offset of the most recent token
    position: usize,
    /// The most recent token
    current: Token,
    /// The two tokens before `current`, when numeric: (value, start offset)
    prev1: Option<(f64, usize)>,
    prev2: Option<(f64, usize)>,
    /// Last object header recognized
    header: Option<ObjHeader>,
}

impl LexerState {
    fn at(offset: usize) -> Self {
        LexerState {
            offset,
            current_char: -1,
            position: offset,
            current: Token::EOF,
            prev1: None,
            prev2: None,
            header: None,
        }
    }
}

/// PDF Lexer for tokenizing PDF syntax.
///
/// The lexer handles:
/// - Whitespace and comment skipping
/// - Number parsing (optional sign, digits, one decimal point)
/// - String parsing (literal and hexadecimal)
/// - Name and keyword parsing
/// - Structural delimiters ([, ], <<, >>) and single punctuation
///
/// It reads through a small read-ahead window, so it never needs more of
/// the underlying source in memory than that window.
pub struct Lexer {
    /// The input stream
    stream: Box<dyn BaseStream>,

    /// Resumable tokenizing state
    state: LexerState,

    /// Read-ahead window and the absolute offset of its first byte
    window: Vec<u8>,
    window_start: usize,

    /// Buffer for building strings
    str_buf: Vec<u8>,
}

impl Lexer {
    /// Creates a new Lexer positioned at the start of `stream`.
    pub fn new(stream: Box<dyn BaseStream>) -> PDFResult<Self> {
        let mut lexer = Lexer {
            stream,
            state: LexerState::at(0),
            window: Vec::new(),
            window_start: 0,
            str_buf: Vec::new(),
        };
        lexer.seek(0)?;
        Ok(lexer)
    }

    /// Returns the total length of the underlying stream.
    pub fn length(&self) -> usize {
        self.stream.length()
    }

    /// Returns the underlying stream.
    pub fn stream(&self) -> &dyn BaseStream {
        self.stream.as_ref()
    }

    /// Start offset of the most recent token.
    pub fn position(&self) -> usize {
        self.state.position
    }

    /// The most recent token.
    pub fn current(&self) -> &Token {
        &self.state.current
    }

    /// Offset of the character the lexer will examine next.
    pub fn char_position(&self) -> usize {
        if self.state.current_char >= 0 {
            self.state.offset - 1
        } else {
            self.state.offset
        }
    }

    /// Returns and clears the last `N G obj` header seen.
    pub fn take_header(&mut self) -> Option<ObjHeader> {
        self.state.header.take()
    }

    /// Repositions the lexer at `offset`, dropping all token history.
    pub fn seek(&mut self, offset: usize) -> PDFResult<()> {
        if offset > self.stream.length() {
            return Err(PDFError::InvalidPosition {
                pos: offset,
                length: self.stream.length(),
            });
        }
        self.state = LexerState::at(offset);
        self.next_char()?;
        Ok(())
    }

    /// Captures the complete lexing state.
    pub fn save(&self) -> LexerState {
        self.state.clone()
    }

    /// Restores a state captured with [`Lexer::save`].
    pub fn restore(&mut self, state: LexerState) {
        self.state = state;
    }

    /// Returns the byte at `offset`, refilling the read-ahead window when needed.
    fn byte_at(&mut self, offset: usize) -> PDFResult<Option<u8>> {
        if offset < self.window_start || offset >= self.window_start + self.window.len() {
            if offset >= self.stream.length() {
                return Ok(None);
            }
            self.stream.set_pos(offset)?;
            self.window = self.stream.get_bytes(READ_AHEAD)?;
            self.window_start = offset;
        }
        Ok(self.window.get(offset - self.window_start).copied())
    }

    /// Advances to the next character.
    fn next_char(&mut self) -> PDFResult<i32> {
        self.state.current_char = match self.byte_at(self.state.offset)? {
            Some(byte) => {
                self.state.offset += 1;
                byte as i32
            }
            None => -1,
        };
        Ok(self.state.current_char)
    }

    /// Peeks at the next character without consuming it.
    fn peek_char(&mut self) -> PDFResult<i32> {
        Ok(self
            .byte_at(self.state.offset)?
            .map(|b| b as i32)
            .unwrap_or(-1))
    }

    /// Checks if a character is whitespace as PDF defines it.
    ///
    /// PDF whitespace: NUL, TAB, LF, FF, CR, SPACE
    fn is_whitespace(ch: i32) -> bool {
        matches!(ch, 0x00 | 0x09 | 0x0A | 0x0C | 0x0D | 0x20)
    }

    /// Checks if a character is a delimiter as PDF defines it.
    ///
    /// PDF delimiters: ( ) < > [ ] { } / %
    fn is_delimiter(ch: i32) -> bool {
        matches!(
            ch,
            0x28 | 0x29 | 0x3C | 0x3E | 0x5B | 0x5D | 0x7B | 0x7D | 0x2F | 0x25
        )
    }

    /// Checks if a character is special (whitespace or delimiter).
    fn is_special(ch: i32) -> bool {
        Self::is_whitespace(ch) || Self::is_delimiter(ch)
    }

    fn is_digit(ch: i32) -> bool {
        (0x30..=0x39).contains(&ch)
    }

    fn is_letter(ch: i32) -> bool {
        (0x41..=0x5A).contains(&ch) || (0x61..=0x7A).contains(&ch)
    }

    /// Skips whitespace and comments.
    fn skip_whitespace_and_comments(&mut self) -> PDFResult<()> {
        let mut comment = false;

        loop {
            let ch = self.state.current_char;

            if ch < 0 {
                break;
            }

            if comment {
                if ch == 0x0A || ch == 0x0D {
                    comment = false;
                }
            } else if ch == 0x25 {
                // '%' starts a comment
                comment = true;
            } else if !Self::is_whitespace(ch) {
                break;
            }

            self.next_char()?;
        }

        Ok(())
    }

    /// Reads the next token, recording its start offset.
    ///
    /// Reading the keyword `obj` right after two numbers also records an
    /// [`ObjHeader`] for the recovery scan.
    pub fn read_token(&mut self) -> PDFResult<Token> {
        self.skip_whitespace_and_comments()?;
        let position = self.char_position();
        let token = self.read_token_internal()?;

        let previous = std::mem::replace(&mut self.state.current, token.clone());
        self.state.prev2 = self.state.prev1;
        self.state.prev1 = previous.as_number().map(|n| (n, self.state.position));
        self.state.position = position;

        if token.is_keyword("obj") {
            if let (Some((number, offset)), Some((generation, _))) =
                (self.state.prev2, self.state.prev1)
            {
                if number >= 0.0 && generation >= 0.0 {
                    self.state.header = Some(ObjHeader {
                        number: number as u32,
                        generation: generation as u16,
                        offset,
                    });
                }
            }
        }

        Ok(token)
    }

    fn read_token_internal(&mut self) -> PDFResult<Token> {
        let ch = self.state.current_char;

        if ch < 0 {
            return Ok(Token::EOF);
        }

        match ch {
            // Numbers: 0-9, +, -, .
            0x30..=0x39 | 0x2B | 0x2D | 0x2E => self.get_number(),

            // Literal string: (
            0x28 => self.get_string(),

            // Name: /
            0x2F => self.get_name(),

            0x5B => {
                self.next_char()?;
                Ok(Token::ArrayStart)
            }

            0x5D => {
                self.next_char()?;
                Ok(Token::ArrayEnd)
            }

            // Hex string or dict start: <
            0x3C => {
                let next_ch = self.next_char()?;
                if next_ch == 0x3C {
                    self.next_char()?;
                    Ok(Token::DictStart)
                } else {
                    self.get_hex_string()
                }
            }

            // Dict end: >>, or a lone '>'
            0x3E => {
                let next_ch = self.next_char()?;
                if next_ch == 0x3E {
                    self.next_char()?;
                    Ok(Token::DictEnd)
                } else {
                    Ok(Token::Delimiter(b'>'))
                }
            }

            _ if Self::is_letter(ch) => self.get_keyword(),

            _ => {
                self.next_char()?;
                Ok(Token::Delimiter(ch as u8))
            }
        }
    }

    /// Parses a number token: optional sign, digits, at most one '.'.
    fn get_number(&mut self) -> PDFResult<Token> {
        let mut ch = self.state.current_char;
        let mut sign = 1.0;

        if ch == 0x2D {
            sign = -1.0;
            ch = self.next_char()?;
        } else if ch == 0x2B {
            ch = self.next_char()?;
        }

        let mut value = 0.0;
        let mut divide_by = 0.0; // Non-zero once a decimal point was seen

        loop {
            if Self::is_digit(ch) {
                value = value * 10.0 + (ch - 0x30) as f64;
                if divide_by != 0.0 {
                    divide_by *= 10.0;
                }
            } else if ch == 0x2E && divide_by == 0.0 {
                divide_by = 1.0;
            } else {
                break;
            }
            ch = self.next_char()?;
        }

        if divide_by > 1.0 {
            value /= divide_by;
        }

        Ok(Token::Number(sign * value))
    }

    /// Parses a literal string token.
    ///
    /// Handles nested parentheses and escape sequences; an unescaped `)`
    /// that balances the opening `(` terminates the string.
    fn get_string(&mut self) -> PDFResult<Token> {
        let mut num_paren = 1; // Track nested parentheses
        self.str_buf.clear();

        let mut ch = self.next_char()?; // Consume opening '('

        loop {
            let mut char_buffered = false;

            match ch {
                -1 => break,

                0x28 => {
                    num_paren += 1;
                    self.str_buf.push(b'(');
                }

                0x29 => {
                    num_paren -= 1;
                    if num_paren == 0 {
                        self.next_char()?; // Consume closing ')'
                        break;
                    }
                    self.str_buf.push(b')');
                }

                0x5C => {
                    // '\' - escape sequence
                    ch = self.next_char()?;
                    match ch {
                        -1 => break,
                        0x6E => self.str_buf.push(b'\n'),
                        0x72 => self.str_buf.push(b'\r'),
                        0x74 => self.str_buf.push(b'\t'),
                        0x62 => self.str_buf.push(0x08),
                        0x66 => self.str_buf.push(0x0C),
                        0x30..=0x37 => {
                            // Octal escape \ddd (1-3 digits)
                            let mut x = (ch & 0x0F) as u8;
                            ch = self.next_char()?;
                            char_buffered = true;

                            if (0x30..=0x37).contains(&ch) {
                                x = (x << 3) + (ch & 0x0F) as u8;
                                ch = self.next_char()?;

                                if (0x30..=0x37).contains(&ch) {
                                    char_buffered = false;
                                    x = (x << 3) + (ch & 0x0F) as u8;
                                }
                            }
                            self.str_buf.push(x);
                        }
                        0x0D => {
                            // Line continuation
                            if self.peek_char()? == 0x0A {
                                self.next_char()?;
                            }
                        }
                        0x0A => {}
                        _ => self.str_buf.push(ch as u8),
                    }
                }

                _ => self.str_buf.push(ch as u8),
            }

            if !char_buffered {
                ch = self.next_char()?;
            }
        }

        Ok(Token::String(self.str_buf.clone()))
    }

    /// Converts a hex character to its numeric value.
    ///
    /// Returns -1 if not a valid hex digit.
    fn to_hex_digit(ch: i32) -> i32 {
        if Self::is_digit(ch) {
            ch & 0x0F
        } else if (0x41..=0x46).contains(&ch) || (0x61..=0x66).contains(&ch) {
            (ch & 0x0F) + 9
        } else {
            -1
        }
    }

    /// Parses a hex string token. The opening '<' is already consumed.
    fn get_hex_string(&mut self) -> PDFResult<Token> {
        self.str_buf.clear();
        let mut ch = self.state.current_char;
        let mut first_digit = -1;

        loop {
            if ch < 0 {
                break;
            } else if ch == 0x3E {
                self.next_char()?;
                break;
            } else {
                let digit = Self::to_hex_digit(ch);
                if digit == -1 {
                    // Whitespace or garbage inside a hex string is skipped
                } else if first_digit == -1 {
                    first_digit = digit;
                } else {
                    self.str_buf.push(((first_digit << 4) | digit) as u8);
                    first_digit = -1;
                }
                ch = self.next_char()?;
            }
        }

        // If there's an odd number of hex digits, assume final digit is 0
        if first_digit != -1 {
            self.str_buf.push((first_digit << 4) as u8);
        }

        Ok(Token::HexString(self.str_buf.clone()))
    }

    /// Parses a name token.
    ///
    /// Names start with '/' and continue until whitespace or delimiter.
    /// Handles '#' escape sequences like #20 for space.
    fn get_name(&mut self) -> PDFResult<Token> {
        self.str_buf.clear();

        let mut ch = self.next_char()?;

        while ch >= 0 && !Self::is_special(ch) {
            if ch == 0x23 {
                let hi = Self::to_hex_digit(self.peek_char()?);
                if hi != -1 {
                    self.next_char()?;
                    let lo = Self::to_hex_digit(self.peek_char()?);
                    if lo != -1 {
                        self.next_char()?;
                        self.str_buf.push(((hi << 4) | lo) as u8);
                    } else {
                        self.str_buf.push(b'#');
                        self.str_buf.push(self.state.current_char as u8);
                    }
                } else {
                    self.str_buf.push(b'#');
                }
            } else {
                self.str_buf.push(ch as u8);
            }

            ch = self.next_char()?;
        }

        Ok(Token::Name(
            String::from_utf8_lossy(&self.str_buf).into_owned(),
        ))
    }

    /// Parses a keyword: a letter followed by letters, digits, `-`, `_`,
    /// `.` or `#`.
    fn get_keyword(&mut self) -> PDFResult<Token> {
        let mut keyword = String::new();
        let mut ch = self.state.current_char;

        while Self::is_letter(ch)
            || Self::is_digit(ch)
            || matches!(ch, 0x2D | 0x5F | 0x2E | 0x23)
        {
            keyword.push(ch as u8 as char);
            ch = self.next_char()?;
        }

        Ok(Token::Keyword(keyword))
    }

    /// Scans forward from the current character for the literal `marker`.
    ///
    /// On success the lexer is positioned at the first byte of the match
    /// (so the next token read starts there) and the match offset is
    /// returned. On failure the lexer state is left untouched.
    pub fn search_ascii(&mut self, marker: &[u8]) -> PDFResult<Option<usize>> {
        let Some(&first) = marker.first() else {
            return Ok(None);
        };

        let mut offset = self.char_position();
        let length = self.stream.length();

        while offset + marker.len() <= length {
            if self.byte_at(offset)? == Some(first) {
                let mut matched = true;
                for (i, &expected) in marker.iter().enumerate().skip(1) {
                    if self.byte_at(offset + i)? != Some(expected) {
                        matched = false;
                        break;
                    }
                }
                if matched {
                    self.seek(offset)?;
                    self.state.position = offset;
                    return Ok(Some(offset));
                }
            }
            offset += 1;
        }

        Ok(None)
    }

    /// Reads `length` raw bytes starting at `offset` without touching the
    /// tokenizing state.
    pub fn read_raw(&mut self, offset: usize, length: usize) -> PDFResult<Vec<u8>> {
        self.stream.set_pos(offset)?;
        self.stream.get_bytes(length)
    }
}
