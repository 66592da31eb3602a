//! # artifact-proxy
//!
//! Serves individual files out of remote CI artifact archives without
//! downloading the archives.
//!
//! A request names a repository, an archive (either a fixed artifact id or a
//! branch whose newest build is looked up through the upstream API) and a
//! path inside the archive. The proxy reads the ZIP index with HTTP Range
//! requests, locates the entry, and streams it to the client while it is
//! being inflated.
//!
//! ## Layout
//!
//! - [`io`]: random-access sources ([`ReadAt`], [`HttpRangeReader`])
//! - [`zip`]: ZIP index parsing and entry streaming ([`ZipArchive`])
//! - [`resolve`]: request path parsing and branch resolution ([`Resolver`])
//! - [`cache`]: one shared reader per archive URL ([`ReaderCache`])
//! - [`server`]: axum router and request handler
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use artifact_proxy::{HttpRangeReader, ZipArchive};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let reader = HttpRangeReader::new(
//!         reqwest::Client::new(),
//!         "https://example.com/archive.zip",
//!         Default::default(),
//!     );
//!     let archive = ZipArchive::new(Arc::new(reader));
//!
//!     for entry in archive.entries().await?.iter() {
//!         println!("{}", entry.name);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod io;
pub mod resolve;
pub mod server;
pub mod zip;

pub use self::zip::{ArchiveEntry, ZipArchive};
pub use cache::ReaderCache;
pub use config::Config;
pub use error::ProxyError;
pub use io::{HttpRangeReader, ReadAt};
pub use resolve::Resolver;
pub use server::{AppState, build_router};
