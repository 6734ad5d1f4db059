use std::{
    fs::File,
    io::{self, Read, Seek, SeekFrom},
    path::{Path, PathBuf},
};

use super::{FetchContext, PartitionSource, SourceError};
use crate::{
    partition::{Partition, PartitionId, PartitionKey},
    BoxError,
};

// Granularity at which a read checks its deadline and cancellation
const READ_SLICE: usize = 64 * 1024;

/// Returns the size of the file at `path` in megabytes (10^6 bytes)
pub fn file_size_mb(path: impl AsRef<Path>) -> io::Result<f64> {
    let raw_size = std::fs::metadata(path)?.len();
    Ok(raw_size as f64 * 1e-6)
}

/// A file split into consecutive byte ranges of `chunk_size` bytes
///
/// The file length is captured when the source is opened. A file truncated afterwards
/// makes fetching the missing ranges fail.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    len: u64,
    chunk_size: u64,
}

impl FileSource {
    pub fn open(path: impl Into<PathBuf>, chunk_size: u64) -> io::Result<Self> {
        if chunk_size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "chunk size must be non-zero",
            ));
        }
        let path = path.into();
        let len = std::fs::metadata(&path)?.len();
        Ok(Self {
            path,
            len,
            chunk_size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    pub fn len(&self) -> u64 {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn num_chunks(&self) -> u64 {
        self.len.div_ceil(self.chunk_size)
    }
}

/// Cursor over the byte ranges of a [FileSource]
#[derive(Debug, Clone)]
pub struct ByteRangeCursor {
    len: u64,
    chunk_size: u64,
    offset: u64,
    index: usize,
}

impl Iterator for ByteRangeCursor {
    type Item = Partition;

    fn next(&mut self) -> Option<Partition> {
        if self.offset >= self.len {
            return None;
        }
        let len = self.chunk_size.min(self.len - self.offset);
        let partition = Partition::new(
            PartitionId(self.index),
            PartitionKey::ByteRange {
                offset: self.offset,
                len,
            },
        );
        self.offset += len;
        self.index += 1;
        Some(partition)
    }
}

impl PartitionSource for FileSource {
    type Payload = Vec<u8>;
    type Cursor = ByteRangeCursor;

    fn cursor(&self) -> ByteRangeCursor {
        ByteRangeCursor {
            len: self.len,
            chunk_size: self.chunk_size,
            offset: 0,
            index: 0,
        }
    }

    fn fetch(&self, partition: &Partition, ctx: &FetchContext) -> Result<Vec<u8>, BoxError> {
        let (offset, len) = match &partition.key {
            PartitionKey::ByteRange { offset, len } => (*offset, *len as usize),
            key => return Err(SourceError::unsupported("FileSource", key).into()),
        };

        // handle is dropped on every return path
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;

        let mut buf = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            ctx.check()?;
            let end = (filled + READ_SLICE).min(len);
            file.read_exact(&mut buf[filled..end])?;
            filled = end;
        }
        Ok(buf)
    }
}
