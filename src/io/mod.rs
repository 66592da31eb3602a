mod http;

pub use http::HttpRangeReader;

use anyhow::Result;
use async_trait::async_trait;

/// Trait for random access reading from a data source
#[async_trait]
pub trait ReadAt: Send + Sync {
    /// Read data at the specified offset into the buffer
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// Get the total size of the data source.
    ///
    /// Remote sources discover this lazily, so it may perform I/O the first time.
    async fn size(&self) -> Result<u64>;
}

/// In-memory source used by unit tests of the ZIP layer.
#[cfg(test)]
pub(crate) struct MemoryReader {
    data: Vec<u8>,
    pub reads: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl MemoryReader {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            reads: std::sync::atomic::AtomicUsize::new(0),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl ReadAt for MemoryReader {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        self.reads
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let start = (offset as usize).min(self.data.len());
        let end = (start + buf.len()).min(self.data.len());
        buf[..end - start].copy_from_slice(&self.data[start..end]);
        Ok(end - start)
    }

    async fn size(&self) -> Result<u64> {
        Ok(self.data.len() as u64)
    }
}
