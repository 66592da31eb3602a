use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::io::ReadAt;
use anyhow::{Result, bail};

use super::parser::ZipParser;
use super::stream::{EntryStream, spawn_entry_stream};
use super::structures::{ArchiveEntry, CompressionMethod};

/// Random-access view of a (usually remote) ZIP archive.
///
/// The index is fetched on the first listing and kept for the lifetime of
/// the value. A failed listing is not remembered, so the next caller tries
/// again.
pub struct ZipArchive<R: ReadAt> {
    parser: ZipParser<R>,
    index: OnceCell<Arc<[ArchiveEntry]>>,
}

impl<R: ReadAt + 'static> ZipArchive<R> {
    pub fn new(reader: Arc<R>) -> Self {
        Self {
            parser: ZipParser::new(reader),
            index: OnceCell::new(),
        }
    }

    /// List all entries in the archive
    pub async fn entries(&self) -> Result<Arc<[ArchiveEntry]>> {
        let index = self
            .index
            .get_or_try_init(|| async { self.parser.read_index().await.map(Arc::from) })
            .await?;
        Ok(Arc::clone(index))
    }

    /// Look up a file entry by exact name. Directory entries never match.
    pub async fn find(&self, name: &str) -> Result<Option<ArchiveEntry>> {
        let entries = self.entries().await?;
        Ok(entries
            .iter()
            .find(|entry| entry.name == name && !entry.is_directory())
            .cloned())
    }

    /// Open a live stream of the entry's decompressed bytes.
    ///
    /// Only the local header is read before returning; the data itself is
    /// fetched while the stream is consumed.
    pub async fn open(&self, entry: &ArchiveEntry) -> Result<EntryStream> {
        if entry.is_encrypted() {
            bail!("Encrypted entries are not supported: {}", entry.name);
        }
        if let CompressionMethod::Unknown(method) = entry.compression_method {
            bail!(
                "Unsupported compression method {} for {} (only STORED and DEFLATE)",
                method,
                entry.name
            );
        }

        let data_offset = self.parser.data_offset(entry).await?;
        Ok(spawn_entry_stream(
            Arc::clone(self.parser.reader()),
            entry.clone(),
            data_offset,
        ))
    }

    pub fn reader(&self) -> &Arc<R> {
        self.parser.reader()
    }
}
