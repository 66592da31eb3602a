//! Producer side of entry streaming.
//!
//! A spawned task walks the entry's compressed bytes with range reads,
//! inflates them incrementally and pushes chunks through a bounded channel.
//! The receiving half is handed out as a [`Stream`](futures::Stream) that
//! becomes the response body. Dropping that stream (a client disconnect)
//! closes the channel, and the producer stops before its next range fetch.

use anyhow::anyhow;
use bytes::Bytes;
use flate2::{Crc, Decompress, FlushDecompress, Status};
use futures::StreamExt;
use futures::stream::BoxStream;
use std::io;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::io::ReadAt;

use super::structures::{ArchiveEntry, CompressionMethod};

/// Size of each range read against the archive.
pub const CHUNK_SIZE: usize = 32 * 1024;

/// Chunks buffered between the producer and the consumer.
const CHANNEL_DEPTH: usize = 4;

/// Decompressed bytes of one entry, in arrival order.
pub type EntryStream = BoxStream<'static, Result<Bytes, io::Error>>;

#[derive(Debug, Error)]
enum PumpError {
    #[error("consumer went away")]
    Disconnected,
    #[error(transparent)]
    Read(#[from] anyhow::Error),
    #[error(transparent)]
    Inflate(#[from] io::Error),
}

enum Inflater {
    Stored,
    Deflate { state: Decompress, finished: bool },
}

impl Inflater {
    fn new(method: CompressionMethod) -> Self {
        match method {
            CompressionMethod::Deflate => Inflater::Deflate {
                state: Decompress::new(false),
                finished: false,
            },
            _ => Inflater::Stored,
        }
    }

    /// Next piece of output for `input`, advancing it past consumed bytes.
    ///
    /// Each piece holds at most [`CHUNK_SIZE`] bytes. `None` means the input
    /// is exhausted, or the compressed stream has ended.
    fn next_chunk(&mut self, input: &mut &[u8]) -> io::Result<Option<Bytes>> {
        match self {
            Inflater::Stored => {
                let data: &[u8] = *input;
                *input = &[];
                Ok((!data.is_empty()).then(|| Bytes::copy_from_slice(data)))
            }
            Inflater::Deflate { state, finished } => {
                let mut out = Vec::with_capacity(CHUNK_SIZE);
                while !*finished {
                    let data: &[u8] = *input;
                    let before = state.total_in();
                    let status = state.decompress_vec(data, &mut out, FlushDecompress::None)?;
                    let consumed = (state.total_in() - before) as usize;
                    *input = &data[consumed..];
                    *finished = status == Status::StreamEnd;

                    if !out.is_empty() {
                        return Ok(Some(Bytes::from(out)));
                    }
                    if consumed == 0 {
                        break;
                    }
                }
                // Bytes after the end of the deflate stream are ignored
                if *finished {
                    *input = &[];
                }
                Ok(None)
            }
        }
    }
}

pub(crate) fn spawn_entry_stream<R: ReadAt + 'static>(
    reader: Arc<R>,
    entry: ArchiveEntry,
    data_offset: u64,
) -> EntryStream {
    let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);

    tokio::spawn(async move {
        match pump(reader.as_ref(), &entry, data_offset, &tx).await {
            Ok(()) => debug!(entry = %entry.name, "entry streamed"),
            Err(PumpError::Disconnected) => {
                debug!(entry = %entry.name, "stream was interrupted by the client")
            }
            Err(err) => {
                warn!(entry = %entry.name, error = %err, "entry stream failed");
                let _ = tx.send(Err(io::Error::other(err.to_string()))).await;
            }
        }
    });

    futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    })
    .boxed()
}

async fn pump<R: ReadAt>(
    reader: &R,
    entry: &ArchiveEntry,
    data_offset: u64,
    tx: &mpsc::Sender<Result<Bytes, io::Error>>,
) -> Result<(), PumpError> {
    let mut inflater = Inflater::new(entry.compression_method);
    let mut crc = Crc::new();
    let mut produced = 0u64;

    let Some(end) = data_offset.checked_add(entry.compressed_size) else {
        let err = anyhow!("entry {} extends past the archive", entry.name);
        return Err(err.into());
    };
    let mut position = data_offset;
    let mut buf = vec![0u8; CHUNK_SIZE];

    while position < end {
        if tx.is_closed() {
            return Err(PumpError::Disconnected);
        }

        let want = (end - position).min(CHUNK_SIZE as u64) as usize;
        let n = reader.read_at(position, &mut buf[..want]).await?;
        if n == 0 {
            let err = anyhow!("archive truncated inside {}", entry.name);
            return Err(err.into());
        }
        position += n as u64;

        let mut window = &buf[..n];
        while let Some(chunk) = inflater.next_chunk(&mut window)? {
            send(tx, chunk, &mut crc, &mut produced).await?;
        }
    }

    // Output still held by the decoder once all input is in
    let mut rest: &[u8] = &[];
    while let Some(chunk) = inflater.next_chunk(&mut rest)? {
        send(tx, chunk, &mut crc, &mut produced).await?;
    }

    if produced != entry.uncompressed_size || crc.sum() != entry.crc32 {
        return Err(anyhow!(
            "integrity check failed for {}: {} bytes with crc {:08x}, expected {} bytes with crc {:08x}",
            entry.name,
            produced,
            crc.sum(),
            entry.uncompressed_size,
            entry.crc32
        )
        .into());
    }

    Ok(())
}

async fn send(
    tx: &mpsc::Sender<Result<Bytes, io::Error>>,
    chunk: Bytes,
    crc: &mut Crc,
    produced: &mut u64,
) -> Result<(), PumpError> {
    if chunk.is_empty() {
        return Ok(());
    }
    crc.update(&chunk);
    *produced += chunk.len() as u64;
    tx.send(Ok(chunk))
        .await
        .map_err(|_| PumpError::Disconnected)
}
