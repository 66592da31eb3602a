//! Random access to ZIP archives.
//!
//! A ZIP file is read from its end: the End of Central Directory record
//! points at the Central Directory, which lists every entry together with
//! the offset of its local header. That makes it possible to list a remote
//! archive and pull out one entry with a handful of HTTP Range requests.
//!
//! - `structures`: on-disk records (EOCD, ZIP64 records, entries)
//! - `parser`: reads the index and locates entry data
//! - `archive`: [`ZipArchive`], the cached index plus entry lookup
//! - `stream`: incremental inflation of one entry into a byte stream
//!
//! Supported: STORED and DEFLATE entries, ZIP64 archives. Not supported:
//! encryption, multi-disk archives, other compression methods.

mod archive;
mod parser;
mod stream;
mod structures;

pub use archive::ZipArchive;
pub use parser::ZipParser;
pub use stream::{CHUNK_SIZE, EntryStream};
pub use structures::*;
