pub mod core;

// Re-export main types for convenience
pub use core::{
    BaseStream, Dictionary, FileChunkedStream, Location, ObjectInfo, ObjectRecord, OpenOptions,
    PDFDocument, PDFError, PDFObject, PDFResult, Stream, XRef,
};
