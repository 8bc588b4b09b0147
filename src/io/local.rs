use std::io::ErrorKind;
use std::path::Path;

use async_trait::async_trait;

use super::ReadAt;
use crate::error::{ReadError, ReadResult};

/// Local file reader with random access support.
#[derive(Debug)]
pub struct FileReader {
    file: std::fs::File,
    size: u64,
}

impl FileReader {
    pub fn open(path: &Path) -> ReadResult<Self> {
        let file = std::fs::File::open(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => ReadError::not_found(path.to_string_lossy()),
            ErrorKind::PermissionDenied => {
                ReadError::AccessDenied(format!("cannot open {}", path.display()))
            }
            _ => ReadError::from(e),
        })?;
        let size = file.metadata()?.len();
        Ok(Self { file, size })
    }
}

#[async_trait]
impl ReadAt for FileReader {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> ReadResult<usize> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            Ok(self.file.read_at(buf, offset)?)
        }

        #[cfg(not(unix))]
        {
            use std::io::{Read, Seek, SeekFrom};
            let mut file = &self.file;
            file.seek(SeekFrom::Start(offset))?;
            Ok(file.read(buf)?)
        }
    }

    fn size(&self) -> u64 {
        self.size
    }
}
