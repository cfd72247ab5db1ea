use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use futures::future::BoxFuture;

use super::BinaryRangeSource;
use crate::error::SourceError;

/// Local-filesystem dataset. The base path is either the cloud-optimized
/// file itself (root resource) or a directory holding the tiled layout.
pub struct FileRangeSource {
    name: String,
    base: PathBuf,
}

impl FileRangeSource {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        let base = base.into();
        let name = base.to_string_lossy().to_string();
        Self { name, base }
    }

    fn path_for(&self, resource: &str) -> PathBuf {
        if resource.is_empty() {
            self.base.clone()
        } else {
            self.base.join(resource)
        }
    }

    fn read_range(path: &Path, resource: &str, begin: u64, end: u64) -> Result<Vec<u8>, SourceError> {
        let io_err = |source| SourceError::Io {
            resource: resource.to_string(),
            source,
        };
        let mut file = File::open(path).map_err(io_err)?;
        let len = file.metadata().map_err(io_err)?.len();
        if begin > end || end > len {
            return Err(SourceError::OutOfRange {
                resource: resource.to_string(),
                begin,
                end,
                len,
            });
        }
        file.seek(SeekFrom::Start(begin)).map_err(io_err)?;
        let mut buf = vec![0u8; (end - begin) as usize];
        file.read_exact(&mut buf).map_err(io_err)?;
        Ok(buf)
    }
}

impl BinaryRangeSource for FileRangeSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch_range<'a>(
        &'a self,
        resource: &'a str,
        begin: u64,
        end: u64,
    ) -> BoxFuture<'a, Result<Vec<u8>, SourceError>> {
        // Local reads are fast enough to run inline on the driving task.
        Box::pin(async move { Self::read_range(&self.path_for(resource), resource, begin, end) })
    }

    fn fetch_all<'a>(&'a self, resource: &'a str) -> BoxFuture<'a, Result<Vec<u8>, SourceError>> {
        Box::pin(async move {
            std::fs::read(self.path_for(resource)).map_err(|source| SourceError::Io {
                resource: resource.to_string(),
                source,
            })
        })
    }
}
