use super::error::{PDFError, PDFResult};
use lru::LruCache;
use std::num::NonZeroUsize;

/// Default chunk size: 64KB
pub const DEFAULT_CHUNK_SIZE: usize = 65536;

/// Default maximum number of chunks to keep in memory cache
pub const DEFAULT_MAX_CACHED_CHUNKS: usize = 10;

/// Trait for loading chunks from a data source.
///
/// Implementers own the actual data source (a file handle) and perform
/// the I/O when a chunk is requested; [`ChunkManager`] only stores what
/// they return.
pub trait ChunkLoader {
    /// Loads a specific chunk (0-based) from the data source.
    ///
    /// The returned data may be shorter than the chunk size for the last chunk.
    fn request_chunk(&mut self, chunk_num: usize) -> PDFResult<Vec<u8>>;
}

/// Keeps recently used chunks of a byte source in a bounded LRU cache.
///
/// Chunks evicted from the cache are simply loaded again on the next
/// access, so memory use never exceeds `max_cached_chunks * chunk_size`.
pub struct ChunkManager {
    /// Total length of the data in bytes
    total_length: usize,
    /// Size of each chunk in bytes
    chunk_size: usize,
    /// Total number of chunks
    num_chunks: usize,
    /// Cache of loaded chunks (chunk_number -> data)
    chunk_cache: LruCache<usize, Vec<u8>>,
    /// Number of chunk loads performed so far, including reloads
    loads: usize,
}

impl ChunkManager {
    /// Creates a new ChunkManager.
    ///
    /// # Arguments
    /// * `total_length` - Total length of the data
    /// * `chunk_size` - Size of each chunk (default: 64KB)
    /// * `max_cached_chunks` - Maximum chunks to keep in memory (default: 10)
    pub fn new(
        total_length: usize,
        chunk_size: Option<usize>,
        max_cached_chunks: Option<usize>,
    ) -> Self {
        let chunk_size = chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE).max(1);
        let capacity = NonZeroUsize::new(max_cached_chunks.unwrap_or(DEFAULT_MAX_CACHED_CHUNKS))
            .unwrap_or(NonZeroUsize::MIN);

        ChunkManager {
            total_length,
            chunk_size,
            num_chunks: total_length.div_ceil(chunk_size),
            chunk_cache: LruCache::new(capacity),
            loads: 0,
        }
    }

    /// Returns the total length of the data.
    pub fn length(&self) -> usize {
        self.total_length
    }

    /// Returns the chunk size.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Returns the total number of chunks.
    pub fn num_chunks(&self) -> usize {
        self.num_chunks
    }

    /// Returns how many chunk loads have happened.
    pub fn loads(&self) -> usize {
        self.loads
    }

    /// Returns the number of chunks currently held in memory.
    pub fn cached_chunks(&self) -> usize {
        self.chunk_cache.len()
    }

    /// Gets the chunk number for a given byte position.
    pub fn get_chunk_number(&self, pos: usize) -> usize {
        pos / self.chunk_size
    }

    /// Returns the byte range covered by a chunk.
    pub fn chunk_range(&self, chunk_num: usize) -> (usize, usize) {
        let begin = chunk_num * self.chunk_size;
        let end = (begin + self.chunk_size).min(self.total_length);
        (begin, end)
    }

    /// Returns the chunk, loading it through `loader` when it is not cached.
    pub fn get_chunk(
        &mut self,
        chunk_num: usize,
        loader: &mut dyn ChunkLoader,
    ) -> PDFResult<&Vec<u8>> {
        if chunk_num >= self.num_chunks {
            let (begin, _) = self.chunk_range(chunk_num);
            return Err(PDFError::InvalidByteRange {
                begin,
                end: begin + self.chunk_size,
            });
        }

        if !self.chunk_cache.contains(&chunk_num) {
            let data = loader.request_chunk(chunk_num)?;
            self.loads += 1;
            self.chunk_cache.put(chunk_num, data);
        }

        self.chunk_cache
            .get(&chunk_num)
            .ok_or(PDFError::UnexpectedEndOfStream)
    }
}
