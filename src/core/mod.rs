pub mod base_stream;
pub mod chunk_manager;
pub mod decode;
pub mod document;
pub mod error;
pub mod file_chunked_stream;
pub mod lexer;
pub mod object;
pub mod page;
pub mod parser;
pub mod stream;
pub mod sub_stream;
pub mod xref;

pub use base_stream::BaseStream;
pub use document::{ObjectInfo, OpenOptions, PDFDocument};
pub use error::{PDFError, PDFResult};
pub use file_chunked_stream::FileChunkedStream;
pub use lexer::{Lexer, Token};
pub use object::{Location, ObjectRecord, ObjectState, ResolvedObject, StreamWindow};
pub use parser::{Dictionary, PDFObject, Parser};
pub use stream::Stream;
pub use sub_stream::SubStream;
pub use xref::{ProgressFn, XRef};
