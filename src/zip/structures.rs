use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt};

use crate::error::{ReadError, ReadResult};

/// ZIP compression methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflate,
    Unknown(u16),
}

impl CompressionMethod {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflate,
            _ => CompressionMethod::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflate => 8,
            CompressionMethod::Unknown(v) => *v,
        }
    }
}

/// End of Central Directory (EOCD) - 22 bytes minimum.
#[derive(Debug)]
pub struct EndOfCentralDirectory {
    pub disk_entries: u16,
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
}

impl EndOfCentralDirectory {
    pub const SIGNATURE: &'static [u8] = b"PK\x05\x06";
    pub const SIZE: usize = 22;

    pub fn from_bytes(data: &[u8]) -> ReadResult<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(ReadError::Decoding(
                "invalid end of central directory".into(),
            ));
        }

        let mut cursor = Cursor::new(&data[4..]);
        let _disk_number = read_u16(&mut cursor)?;
        let _disk_with_cd = read_u16(&mut cursor)?;

        Ok(Self {
            disk_entries: read_u16(&mut cursor)?,
            total_entries: read_u16(&mut cursor)?,
            cd_size: read_u32(&mut cursor)?,
            cd_offset: read_u32(&mut cursor)?,
        })
    }

    pub fn is_zip64(&self) -> bool {
        self.disk_entries == 0xFFFF
            || self.total_entries == 0xFFFF
            || self.cd_size == 0xFFFFFFFF
            || self.cd_offset == 0xFFFFFFFF
    }
}

/// ZIP64 End of Central Directory Locator - 20 bytes.
pub struct Zip64EocdLocator {
    pub eocd64_offset: u64,
}

impl Zip64EocdLocator {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x07";
    pub const SIZE: usize = 20;

    pub fn from_bytes(data: &[u8]) -> ReadResult<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(ReadError::Decoding("invalid ZIP64 locator".into()));
        }

        let mut cursor = Cursor::new(&data[4..]);
        let _disk_with_eocd64 = read_u32(&mut cursor)?;

        Ok(Self {
            eocd64_offset: read_u64(&mut cursor)?,
        })
    }
}

/// ZIP64 End of Central Directory - 56 bytes minimum.
pub struct Zip64Eocd {
    pub total_entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
}

impl Zip64Eocd {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x06";
    pub const MIN_SIZE: usize = 56;

    pub fn from_bytes(data: &[u8]) -> ReadResult<Self> {
        if data.len() < Self::MIN_SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(ReadError::Decoding(
                "invalid ZIP64 end of central directory".into(),
            ));
        }

        let mut cursor = Cursor::new(&data[4..]);
        let _eocd64_size = read_u64(&mut cursor)?;
        let _version_made_by = read_u16(&mut cursor)?;
        let _version_needed = read_u16(&mut cursor)?;
        let _disk_number = read_u32(&mut cursor)?;
        let _disk_with_cd = read_u32(&mut cursor)?;
        let _disk_entries = read_u64(&mut cursor)?;

        Ok(Self {
            total_entries: read_u64(&mut cursor)?,
            cd_size: read_u64(&mut cursor)?,
            cd_offset: read_u64(&mut cursor)?,
        })
    }
}

/// Central Directory File Header (CDFH) signature.
pub const CDFH_SIGNATURE: &[u8] = b"PK\x01\x02";

/// Local File Header (LFH) - 30 bytes.
pub const LFH_SIGNATURE: &[u8] = b"PK\x03\x04";
pub const LFH_SIZE: usize = 30;

/// Metadata of an archive entry, parsed from the central directory.
#[derive(Debug, Clone)]
pub struct ZipEntryMeta {
    pub name: String,
    pub method: CompressionMethod,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub crc32: u32,
    pub lfh_offset: u64,
    pub is_directory: bool,
}

pub(super) fn read_u16(cursor: &mut Cursor<&[u8]>) -> ReadResult<u16> {
    cursor
        .read_u16::<LittleEndian>()
        .map_err(|_| truncated_header())
}

pub(super) fn read_u32(cursor: &mut Cursor<&[u8]>) -> ReadResult<u32> {
    cursor
        .read_u32::<LittleEndian>()
        .map_err(|_| truncated_header())
}

pub(super) fn read_u64(cursor: &mut Cursor<&[u8]>) -> ReadResult<u64> {
    cursor
        .read_u64::<LittleEndian>()
        .map_err(|_| truncated_header())
}

fn truncated_header() -> ReadError {
    ReadError::Decoding("truncated ZIP header".into())
}
