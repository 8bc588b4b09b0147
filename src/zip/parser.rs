//! Low-level ZIP archive parser.
//!
//! ZIP files are read from the end: find the End of Central Directory
//! (EOCD), follow it to the central directory, and only touch a local file
//! header when an entry is actually read. Over an HTTP backing this keeps
//! enumeration down to a couple of range requests on the archive's tail.

use std::io::{Cursor, Read};
use std::sync::Arc;

use crate::error::{ReadError, ReadResult};
use crate::io::ReadAt;

use super::structures::*;

/// Maximum ZIP comment size allowed by the format (65535 bytes).
///
/// This limits the search area when looking for an EOCD with a comment.
const MAX_COMMENT_SIZE: u64 = 65535;

/// Parses ZIP structures from any [`ReadAt`] source.
#[derive(Debug)]
pub struct ZipParser<R: ReadAt> {
    reader: Arc<R>,
    size: u64,
}

impl<R: ReadAt> ZipParser<R> {
    pub fn new(reader: Arc<R>) -> Self {
        let size = reader.size();
        Self { reader, size }
    }

    /// Finds and parses the End of Central Directory record, returning it
    /// with its offset in the archive.
    pub async fn find_eocd(&self) -> ReadResult<(EndOfCentralDirectory, u64)> {
        // Fast path: no archive comment, EOCD sits exactly at the end.
        if self.size >= EndOfCentralDirectory::SIZE as u64 {
            let offset = self.size - EndOfCentralDirectory::SIZE as u64;
            let mut buf = vec![0u8; EndOfCentralDirectory::SIZE];
            self.reader.read_exact_at(offset, &mut buf).await?;

            if &buf[0..4] == EndOfCentralDirectory::SIGNATURE && &buf[20..22] == b"\x00\x00" {
                let eocd = EndOfCentralDirectory::from_bytes(&buf)?;
                return Ok((eocd, offset));
            }
        }

        // The EOCD is earlier when the archive carries a comment; scan
        // backwards over the maximal comment window for its signature.
        let search_size = (MAX_COMMENT_SIZE + EndOfCentralDirectory::SIZE as u64).min(self.size);
        let search_start = self.size - search_size;

        let mut buf = vec![0u8; search_size as usize];
        self.reader.read_exact_at(search_start, &mut buf).await?;

        for i in (0..buf.len().saturating_sub(EndOfCentralDirectory::SIZE)).rev() {
            if &buf[i..i + 4] == EndOfCentralDirectory::SIGNATURE {
                // A real EOCD's comment length must account for every byte
                // that follows it.
                let comment_len = u16::from_le_bytes([buf[i + 20], buf[i + 21]]) as usize;
                if comment_len == buf.len() - i - EndOfCentralDirectory::SIZE {
                    let eocd =
                        EndOfCentralDirectory::from_bytes(&buf[i..i + EndOfCentralDirectory::SIZE])?;
                    return Ok((eocd, search_start + i as u64));
                }
            }
        }

        Err(ReadError::Decoding("not a valid ZIP archive".into()))
    }

    /// Reads the ZIP64 End of Central Directory, reached through the locator
    /// sitting immediately before the regular EOCD.
    pub async fn read_zip64_eocd(&self, eocd_offset: u64) -> ReadResult<Zip64Eocd> {
        let locator_offset = eocd_offset
            .checked_sub(Zip64EocdLocator::SIZE as u64)
            .ok_or_else(|| ReadError::Decoding("missing ZIP64 locator".into()))?;
        let mut locator_buf = vec![0u8; Zip64EocdLocator::SIZE];
        self.reader
            .read_exact_at(locator_offset, &mut locator_buf)
            .await?;

        let locator = Zip64EocdLocator::from_bytes(&locator_buf)?;

        let mut eocd64_buf = vec![0u8; Zip64Eocd::MIN_SIZE];
        self.reader
            .read_exact_at(locator.eocd64_offset, &mut eocd64_buf)
            .await?;

        Zip64Eocd::from_bytes(&eocd64_buf)
    }

    /// Enumerates all entries by reading the central directory.
    pub async fn read_central_directory(&self) -> ReadResult<Vec<ZipEntryMeta>> {
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

        if cd_offset.checked_add(cd_size).is_none_or(|end| end > self.size) {
            return Err(ReadError::Decoding(
                "central directory out of archive bounds".into(),
            ));
        }

        // One request for the whole central directory; a single range
        // request over HTTP backings.
        let mut cd_data = crate::error::try_alloc(cd_size as usize)?;
        self.reader.read_exact_at(cd_offset, &mut cd_data).await?;

        let mut entries = Vec::with_capacity(total_entries.min(u16::MAX as u64) as usize);
        let mut cursor = Cursor::new(cd_data.as_slice());

        for _ in 0..total_entries {
            entries.push(parse_cdfh(&mut cursor)?);
        }

        Ok(entries)
    }

    /// Resolves where an entry's data begins.
    ///
    /// The local file header repeats the variable-length name and extra
    /// field with lengths that may differ from the central directory, so
    /// the data offset can only be computed by reading it.
    pub async fn data_offset(&self, meta: &ZipEntryMeta) -> ReadResult<u64> {
        let mut lfh_buf = vec![0u8; LFH_SIZE];
        self.reader.read_exact_at(meta.lfh_offset, &mut lfh_buf).await?;

        if &lfh_buf[0..4] != LFH_SIGNATURE {
            return Err(ReadError::Decoding(format!(
                "invalid local file header for \"{}\"",
                meta.name
            )));
        }

        let mut cursor = Cursor::new(&lfh_buf[26..]);
        let file_name_length = read_u16(&mut cursor)? as u64;
        let extra_field_length = read_u16(&mut cursor)? as u64;

        Ok(meta.lfh_offset + LFH_SIZE as u64 + file_name_length + extra_field_length)
    }

    pub fn reader(&self) -> &Arc<R> {
        &self.reader
    }
}

/// Parses one Central Directory File Header, leaving the cursor at the next.
fn parse_cdfh(cursor: &mut Cursor<&[u8]>) -> ReadResult<ZipEntryMeta> {
    let mut sig = [0u8; 4];
    cursor
        .read_exact(&mut sig)
        .map_err(|_| ReadError::Decoding("truncated central directory".into()))?;
    if sig != CDFH_SIGNATURE {
        return Err(ReadError::Decoding(
            "invalid central directory file header".into(),
        ));
    }

    let _version_made_by = read_u16(cursor)?;
    let _version_needed = read_u16(cursor)?;
    let _flags = read_u16(cursor)?;
    let method = read_u16(cursor)?;
    let _last_mod_time = read_u16(cursor)?;
    let _last_mod_date = read_u16(cursor)?;
    let crc32 = read_u32(cursor)?;
    let mut compressed_size = read_u32(cursor)? as u64;
    let mut uncompressed_size = read_u32(cursor)? as u64;
    let file_name_length = read_u16(cursor)?;
    let extra_field_length = read_u16(cursor)?;
    let file_comment_length = read_u16(cursor)?;
    let _disk_number_start = read_u16(cursor)?;
    let _internal_attrs = read_u16(cursor)?;
    let _external_attrs = read_u32(cursor)?;
    let mut lfh_offset = read_u32(cursor)? as u64;

    let mut file_name_bytes = vec![0u8; file_name_length as usize];
    cursor
        .read_exact(&mut file_name_bytes)
        .map_err(|_| ReadError::Decoding("truncated central directory".into()))?;
    // Lossy conversion keeps non-UTF8 names addressable.
    let name = String::from_utf8_lossy(&file_name_bytes).to_string();
    let is_directory = name.ends_with('/');

    // ZIP64 extended information lives in extra field 0x0001; each 64-bit
    // value is present only when its 32-bit counterpart saturates.
    let extra_field_end = cursor.position() + extra_field_length as u64;
    while cursor.position() + 4 <= extra_field_end {
        let header_id = read_u16(cursor)?;
        let field_size = read_u16(cursor)?;

        if header_id == 0x0001 {
            if uncompressed_size == 0xFFFFFFFF && cursor.position() + 8 <= extra_field_end {
                uncompressed_size = read_u64(cursor)?;
            }
            if compressed_size == 0xFFFFFFFF && cursor.position() + 8 <= extra_field_end {
                compressed_size = read_u64(cursor)?;
            }
            if lfh_offset == 0xFFFFFFFF && cursor.position() + 8 <= extra_field_end {
                lfh_offset = read_u64(cursor)?;
            }
            let remaining = extra_field_end.saturating_sub(cursor.position());
            cursor.set_position(cursor.position() + remaining);
        } else {
            cursor.set_position(cursor.position() + field_size as u64);
        }
    }
    cursor.set_position(extra_field_end);

    // Skip the file comment.
    cursor.set_position(cursor.position() + file_comment_length as u64);

    Ok(ZipEntryMeta {
        name,
        method: CompressionMethod::from_u16(method),
        compressed_size,
        uncompressed_size,
        crc32,
        lfh_offset,
        is_directory,
    })
}
