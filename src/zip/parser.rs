//! Low-level ZIP index parser.
//!
//! Reads the archive's index from any source implementing [`ReadAt`]:
//! 1. Find the End of Central Directory (EOCD) at the archive's end
//! 2. If ZIP64, follow the locator to the ZIP64 EOCD
//! 3. Fetch the Central Directory in a single read and parse every header
//!
//! Local File Headers are only read when an entry is opened, so listing a
//! remote archive costs two or three range requests regardless of its size.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};
use std::sync::Arc;

use crate::io::ReadAt;
use anyhow::{Result, bail};

use super::structures::*;

/// Maximum ZIP comment size allowed by the format (65535 bytes).
///
/// This limits the search area when looking for EOCD with a comment.
const MAX_COMMENT_SIZE: u64 = 65535;

/// Upper bound on the central directory we are willing to download.
const MAX_CENTRAL_DIRECTORY_SIZE: u64 = 64 * 1024 * 1024;

/// Reads ZIP structures from a shared random-access source.
pub struct ZipParser<R: ReadAt> {
    reader: Arc<R>,
}

impl<R: ReadAt> ZipParser<R> {
    pub fn new(reader: Arc<R>) -> Self {
        Self { reader }
    }

    /// Find and parse the End of Central Directory record.
    ///
    /// Tries the comment-less layout first, then scans backwards through
    /// the largest possible comment window.
    ///
    /// Returns the record together with its offset in the archive.
    pub async fn find_eocd(&self) -> Result<(EndOfCentralDirectory, u64)> {
        let size = self.reader.size().await?;

        if size >= EndOfCentralDirectory::SIZE as u64 {
            let offset = size - EndOfCentralDirectory::SIZE as u64;
            let mut buf = vec![0u8; EndOfCentralDirectory::SIZE];
            self.read_exact_at(offset, &mut buf).await?;

            if &buf[0..4] == EndOfCentralDirectory::SIGNATURE && buf[20..22] == [0u8, 0u8] {
                let eocd = EndOfCentralDirectory::from_bytes(&buf)?;
                return Ok((eocd, offset));
            }
        }

        let search_size = (MAX_COMMENT_SIZE + EndOfCentralDirectory::SIZE as u64).min(size);
        let search_start = size - search_size;

        let mut buf = vec![0u8; search_size as usize];
        self.read_exact_at(search_start, &mut buf).await?;

        let last_candidate = buf.len().saturating_sub(EndOfCentralDirectory::SIZE);
        for i in (0..=last_candidate).rev() {
            if buf.len() < i + EndOfCentralDirectory::SIZE {
                continue;
            }
            if &buf[i..i + 4] == EndOfCentralDirectory::SIGNATURE {
                // The comment length must account for every byte that follows
                let comment_len = u16::from_le_bytes([buf[i + 20], buf[i + 21]]) as usize;

                if comment_len == buf.len() - i - EndOfCentralDirectory::SIZE {
                    let eocd = EndOfCentralDirectory::from_bytes(
                        &buf[i..i + EndOfCentralDirectory::SIZE],
                    )?;
                    return Ok((eocd, search_start + i as u64));
                }
            }
        }

        bail!("Not a valid ZIP file")
    }

    /// Read the ZIP64 End of Central Directory record.
    ///
    /// The locator sits immediately before the regular EOCD.
    pub async fn read_zip64_eocd(&self, eocd_offset: u64) -> Result<Zip64EOCD> {
        let Some(locator_offset) = eocd_offset.checked_sub(Zip64EOCDLocator::SIZE as u64) else {
            bail!("Invalid ZIP64 locator");
        };
        let mut locator_buf = vec![0u8; Zip64EOCDLocator::SIZE];
        self.read_exact_at(locator_offset, &mut locator_buf).await?;

        let locator = Zip64EOCDLocator::from_bytes(&locator_buf)?;

        let mut eocd64_buf = vec![0u8; Zip64EOCD::MIN_SIZE];
        self.read_exact_at(locator.eocd64_offset, &mut eocd64_buf)
            .await?;

        Zip64EOCD::from_bytes(&eocd64_buf)
    }

    /// Read the archive index: every entry in the central directory.
    pub async fn read_index(&self) -> Result<Vec<ArchiveEntry>> {
        let (eocd, eocd_offset) = self.find_eocd().await?;

        let (cd_offset, cd_size, total_entries) = if eocd.is_zip64() {
            let eocd64 = self.read_zip64_eocd(eocd_offset).await?;
            (eocd64.cd_offset, eocd64.cd_size, eocd64.total_entries)
        } else {
            (
                eocd.cd_offset as u64,
                eocd.cd_size as u64,
                eocd.total_entries as u64,
            )
        };

        if cd_size > MAX_CENTRAL_DIRECTORY_SIZE {
            bail!("Central directory too large: {} bytes", cd_size);
        }
        // Every header takes at least CDFH_MIN_SIZE bytes
        if total_entries > cd_size / CDFH_MIN_SIZE as u64 {
            bail!(
                "Central directory claims {} entries in {} bytes",
                total_entries,
                cd_size
            );
        }

        // One read for the whole directory keeps remote listing to a single range request
        let mut cd_data = vec![0u8; cd_size as usize];
        self.read_exact_at(cd_offset, &mut cd_data).await?;

        let mut entries = Vec::with_capacity(total_entries as usize);
        let mut cursor = Cursor::new(cd_data.as_slice());

        for _ in 0..total_entries {
            entries.push(parse_cdfh(&mut cursor)?);
        }

        Ok(entries)
    }

    /// Offset of an entry's compressed bytes.
    ///
    /// The local header's name and extra field lengths may differ from the
    /// central directory copy, so the local header is read to find the data.
    pub async fn data_offset(&self, entry: &ArchiveEntry) -> Result<u64> {
        let mut lfh_buf = vec![0u8; LFH_SIZE];
        self.read_exact_at(entry.header_offset, &mut lfh_buf).await?;

        if &lfh_buf[0..4] != LFH_SIGNATURE {
            bail!("Invalid Local File Header for {}", entry.name);
        }

        let mut cursor = Cursor::new(&lfh_buf);
        cursor.set_position(26);

        let file_name_length = cursor.read_u16::<LittleEndian>()? as u64;
        let extra_field_length = cursor.read_u16::<LittleEndian>()? as u64;

        Ok(entry.header_offset + LFH_SIZE as u64 + file_name_length + extra_field_length)
    }

    pub fn reader(&self) -> &Arc<R> {
        &self.reader
    }

    async fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let n = self.reader.read_at(offset, buf).await?;
        if n < buf.len() {
            bail!(
                "Unexpected end of archive: wanted {} bytes at offset {}, got {}",
                buf.len(),
                offset,
                n
            );
        }
        Ok(())
    }
}

/// Parse one Central Directory File Header.
fn parse_cdfh(cursor: &mut Cursor<&[u8]>) -> Result<ArchiveEntry> {
    let mut sig = [0u8; 4];
    cursor.read_exact(&mut sig)?;
    if sig != CDFH_SIGNATURE {
        bail!("Invalid Central Directory File Header");
    }

    let _version_made_by = cursor.read_u16::<LittleEndian>()?;
    let _version_needed = cursor.read_u16::<LittleEndian>()?;
    let flags = cursor.read_u16::<LittleEndian>()?;
    let compression_method = cursor.read_u16::<LittleEndian>()?;
    let _last_mod_time = cursor.read_u16::<LittleEndian>()?;
    let _last_mod_date = cursor.read_u16::<LittleEndian>()?;
    let crc32 = cursor.read_u32::<LittleEndian>()?;
    let mut compressed_size = cursor.read_u32::<LittleEndian>()? as u64;
    let mut uncompressed_size = cursor.read_u32::<LittleEndian>()? as u64;
    let file_name_length = cursor.read_u16::<LittleEndian>()?;
    let extra_field_length = cursor.read_u16::<LittleEndian>()?;
    let file_comment_length = cursor.read_u16::<LittleEndian>()?;
    let _disk_number_start = cursor.read_u16::<LittleEndian>()?;
    let _internal_attrs = cursor.read_u16::<LittleEndian>()?;
    let _external_attrs = cursor.read_u32::<LittleEndian>()?;
    let mut header_offset = cursor.read_u32::<LittleEndian>()? as u64;

    let mut name_bytes = vec![0u8; file_name_length as usize];
    cursor.read_exact(&mut name_bytes)?;
    let name = String::from_utf8_lossy(&name_bytes).into_owned();

    // ZIP64 extended information lives in extra field 0x0001; each value is
    // present only when the matching header field holds the 0xFFFFFFFF sentinel.
    let extra_field_end = cursor.position() + extra_field_length as u64;

    while cursor.position() + 4 <= extra_field_end {
        let header_id = cursor.read_u16::<LittleEndian>()?;
        let field_size = cursor.read_u16::<LittleEndian>()? as u64;
        let field_end = cursor.position() + field_size;

        if header_id == 0x0001 {
            if uncompressed_size == 0xFFFFFFFF && cursor.position() + 8 <= field_end {
                uncompressed_size = cursor.read_u64::<LittleEndian>()?;
            }
            if compressed_size == 0xFFFFFFFF && cursor.position() + 8 <= field_end {
                compressed_size = cursor.read_u64::<LittleEndian>()?;
            }
            if header_offset == 0xFFFFFFFF && cursor.position() + 8 <= field_end {
                header_offset = cursor.read_u64::<LittleEndian>()?;
            }
        }
        cursor.set_position(field_end);
    }

    cursor.set_position(extra_field_end + file_comment_length as u64);

    Ok(ArchiveEntry {
        name,
        compression_method: CompressionMethod::from_u16(compression_method),
        compressed_size,
        uncompressed_size,
        crc32,
        header_offset,
        flags,
    })
}
