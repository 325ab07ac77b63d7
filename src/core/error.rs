use thiserror::Error;

/// Universal error type for PDF structure analysis.
///
/// Positioned variants carry the byte offset of the token being examined,
/// the token text itself and a human-readable message, and render as
/// `<hex offset> [<token>] <message>`.
#[derive(Debug, Error)]
pub enum PDFError {
    /// The file does not start with `%PDF`.
    #[error("signature is not %PDF")]
    Signature,

    /// A required key or keyword is missing, or the file disagrees with
    /// the cross-reference data (e.g. object number mismatch at an offset).
    #[error("{offset:x} [{token}] {message}")]
    Structure {
        offset: usize,
        token: String,
        message: String,
    },

    /// A token of an unexpected class was encountered.
    #[error("{offset:x} [{token}] {message}")]
    Token {
        offset: usize,
        token: String,
        message: String,
    },

    /// A stream filter or predictor that is not supported.
    #[error("unsupported filter: {0}")]
    UnsupportedFilter(String),

    /// End of stream reached unexpectedly
    #[error("unexpected end of stream")]
    UnexpectedEndOfStream,

    /// Invalid byte range requested
    #[error("invalid byte range: {begin}..{end}")]
    InvalidByteRange { begin: usize, end: usize },

    /// Invalid stream position
    #[error("invalid position {pos} for stream of length {length}")]
    InvalidPosition { pos: usize, length: usize },

    /// Underlying file I/O failure. Never retried.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PDFError {
    /// Builds a structure error that is not tied to a token.
    pub fn structure(offset: usize, message: impl Into<String>) -> Self {
        PDFError::Structure {
            offset,
            token: String::new(),
            message: message.into(),
        }
    }

    /// Returns true if the top-level open may fall back to the linear
    /// recovery scan after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PDFError::Structure { .. }
                | PDFError::Token { .. }
                | PDFError::UnexpectedEndOfStream
                | PDFError::InvalidPosition { .. }
                | PDFError::InvalidByteRange { .. }
                | PDFError::UnsupportedFilter(_)
        )
    }
}

/// Result type alias for PDF operations
pub type PDFResult<T> = Result<T, PDFError>;
