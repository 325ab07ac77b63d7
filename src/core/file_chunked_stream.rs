use super::base_stream::BaseStream;
use super::chunk_manager::{ChunkLoader, ChunkManager};
use super::error::{PDFError, PDFResult};
use super::sub_stream::SubStream;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Helper function to standardize mutex lock error handling.
#[inline]
fn lock<T>(mutex: &Mutex<T>) -> PDFResult<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| PDFError::Io(std::io::Error::other("byte source lock poisoned")))
}

/// Reads whole chunks straight from the file handle.
struct FileLoader<'a> {
    file: &'a mut File,
    manager_chunk_size: usize,
    total_length: usize,
}

impl ChunkLoader for FileLoader<'_> {
    fn request_chunk(&mut self, chunk_num: usize) -> PDFResult<Vec<u8>> {
        let chunk_start = chunk_num * self.manager_chunk_size;
        let chunk_end = (chunk_start + self.manager_chunk_size).min(self.total_length);

        self.file.seek(SeekFrom::Start(chunk_start as u64))?;
        let mut buffer = vec![0u8; chunk_end - chunk_start];
        self.file.read_exact(&mut buffer)?;

        Ok(buffer)
    }
}

/// A byte source that reads a file on demand in fixed-size chunks.
///
/// Only the chunks touched by the parser are read, and at most
/// `max_cached_chunks` of them stay in memory. The file handle and chunk
/// cache are shared via Arc, so sub-streams reuse the same resources.
pub struct FileChunkedStream {
    /// File handle for reading chunks (shared)
    file: Arc<Mutex<File>>,
    /// Path to the file (stored for diagnostics)
    file_path: PathBuf,
    /// The chunk cache (shared)
    manager: Arc<Mutex<ChunkManager>>,
    /// Current read position
    pos: usize,
    /// Cached chunk size (immutable, no need to lock manager)
    chunk_size: usize,
    /// Cached total file length (immutable, no need to lock manager)
    total_length: usize,
}

impl FileChunkedStream {
    /// Opens a file as a chunked byte source.
    ///
    /// # Arguments
    /// * `path` - Path to the PDF file
    /// * `chunk_size` - Size of each chunk (default: 64KB)
    /// * `max_cached_chunks` - Maximum chunks to keep in memory (default: 10)
    pub fn open<P: AsRef<Path>>(
        path: P,
        chunk_size: Option<usize>,
        max_cached_chunks: Option<usize>,
    ) -> PDFResult<Self> {
        let file_path = path.as_ref().to_path_buf();
        let mut file = File::open(&file_path)?;
        let length = file.seek(SeekFrom::End(0))? as usize;
        file.seek(SeekFrom::Start(0))?;

        let manager = ChunkManager::new(length, chunk_size, max_cached_chunks);
        let chunk_size = manager.chunk_size();

        tracing::debug!(path = %file_path.display(), length, chunk_size, "opened byte source");

        Ok(FileChunkedStream {
            file: Arc::new(Mutex::new(file)),
            file_path,
            manager: Arc::new(Mutex::new(manager)),
            pos: 0,
            chunk_size,
            total_length: length,
        })
    }

    /// Creates a new handle that shares the file and cache with `self`.
    fn share(&self) -> Self {
        FileChunkedStream {
            file: Arc::clone(&self.file),
            file_path: self.file_path.clone(),
            manager: Arc::clone(&self.manager),
            pos: 0,
            chunk_size: self.chunk_size,
            total_length: self.total_length,
        }
    }

    /// Returns the path this stream reads from.
    pub fn path(&self) -> &Path {
        &self.file_path
    }

    /// Returns how many chunk reads hit the file so far.
    pub fn chunk_loads(&self) -> usize {
        self.manager.lock().map(|m| m.loads()).unwrap_or(0)
    }

    /// Copies `[begin, end)` out of the cache, loading chunks as needed.
    fn copy_range(&self, begin: usize, end: usize, out: &mut Vec<u8>) -> PDFResult<()> {
        let mut manager = lock(&self.manager)?;
        let mut file = lock(&self.file)?;
        let mut loader = FileLoader {
            file: &mut *file,
            manager_chunk_size: self.chunk_size,
            total_length: self.total_length,
        };

        let begin_chunk = manager.get_chunk_number(begin);
        let end_chunk = manager.get_chunk_number(end - 1);

        for chunk_num in begin_chunk..=end_chunk {
            let chunk_start_pos = chunk_num * self.chunk_size;
            let chunk = manager.get_chunk(chunk_num, &mut loader)?;

            let read_start = if chunk_num == begin_chunk {
                begin - chunk_start_pos
            } else {
                0
            };
            let read_end = if chunk_num == end_chunk {
                end - chunk_start_pos
            } else {
                chunk.len()
            };

            out.extend_from_slice(&chunk[read_start..read_end]);
        }

        Ok(())
    }
}

impl BaseStream for FileChunkedStream {
    fn length(&self) -> usize {
        self.total_length
    }

    fn pos(&self) -> usize {
        self.pos
    }

    fn set_pos(&mut self, pos: usize) -> PDFResult<()> {
        if pos > self.total_length {
            return Err(PDFError::InvalidPosition {
                pos,
                length: self.total_length,
            });
        }
        self.pos = pos;
        Ok(())
    }

    fn get_byte(&mut self) -> PDFResult<u8> {
        if self.pos >= self.total_length {
            return Err(PDFError::UnexpectedEndOfStream);
        }

        let mut out = Vec::with_capacity(1);
        self.copy_range(self.pos, self.pos + 1, &mut out)?;
        self.pos += 1;
        Ok(out[0])
    }

    fn get_bytes(&mut self, length: usize) -> PDFResult<Vec<u8>> {
        let end_pos = self.pos.saturating_add(length).min(self.total_length);
        if end_pos <= self.pos {
            return Ok(Vec::new());
        }

        let mut result = Vec::with_capacity(end_pos - self.pos);
        self.copy_range(self.pos, end_pos, &mut result)?;
        self.pos = end_pos;
        Ok(result)
    }

    fn make_sub_stream(&self, start: usize, length: usize) -> PDFResult<Box<dyn BaseStream>> {
        let sub = SubStream::new(Box::new(self.share()), start, length)?;
        Ok(Box::new(sub))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_test_file(size: usize) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        let data: Vec<u8> = (0..size).map(|i| (i % 256) as u8).collect();
        file.write_all(&data).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_file_chunked_stream_creation() {
        let temp_file = create_test_file(1024);
        let stream = FileChunkedStream::open(temp_file.path(), None, None).unwrap();

        assert_eq!(stream.length(), 1024);
        assert_eq!(stream.pos(), 0);
        assert_eq!(stream.chunk_loads(), 0);
    }

    #[test]
    fn test_get_bytes_across_chunks() {
        let temp_file = create_test_file(1024);
        let mut stream = FileChunkedStream::open(temp_file.path(), Some(100), Some(2)).unwrap();

        stream.set_pos(95).unwrap();
        let bytes = stream.get_bytes(10).unwrap();
        assert_eq!(bytes, (95..105).map(|i| i as u8).collect::<Vec<_>>());
        assert_eq!(stream.pos(), 105);
        assert_eq!(stream.chunk_loads(), 2);
    }

    #[test]
    fn test_only_touched_chunks_are_read() {
        let temp_file = create_test_file(200_000);
        let mut stream = FileChunkedStream::open(temp_file.path(), Some(65536), Some(2)).unwrap();

        stream.set_pos(199_990).unwrap();
        assert_eq!(stream.get_bytes(100).unwrap().len(), 10);
        assert_eq!(stream.chunk_loads(), 1);
    }

    #[test]
    fn test_sub_stream_shares_resources() {
        let temp_file = create_test_file(1024);
        let stream = FileChunkedStream::open(temp_file.path(), None, None).unwrap();

        let mut sub = stream.make_sub_stream(512, 4).unwrap();
        assert_eq!(sub.get_bytes(10).unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(Arc::strong_count(&stream.manager), 2);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = FileChunkedStream::open("/nonexistent/file.pdf", None, None);
        assert!(matches!(result, Err(PDFError::Io(_))));
    }
}
