//! Byte-range access to dataset resources.
//!
//! A dataset is a named resource tree: the root resource (empty name) is the
//! cloud-optimized file itself, while directory-tiled datasets address
//! metadata, hierarchy pages, and node blocks as relative paths. All loaders
//! and the fetch scheduler go through [`BinaryRangeSource`], so network,
//! local-file, and in-memory datasets are interchangeable.

mod file;
mod http;
mod memory;

pub use file::FileRangeSource;
pub use http::HttpRangeSource;
pub use memory::MemoryRangeSource;

use crate::error::SourceError;
use futures::future::BoxFuture;

/// Fetches byte ranges from named resources of one dataset.
///
/// `resource` is a path relative to the dataset root; the empty string names
/// the root resource. Ranges are half-open `[begin, end)`.
pub trait BinaryRangeSource: Send + Sync {
    /// Stable name of the dataset for logs and error messages.
    fn name(&self) -> &str;

    /// Fetch bytes `[begin, end)` of `resource`.
    fn fetch_range<'a>(
        &'a self,
        resource: &'a str,
        begin: u64,
        end: u64,
    ) -> BoxFuture<'a, Result<Vec<u8>, SourceError>>;

    /// Fetch a whole resource.
    fn fetch_all<'a>(&'a self, resource: &'a str) -> BoxFuture<'a, Result<Vec<u8>, SourceError>>;
}

/// Slice a fully resident buffer, range-checked. Shared by the local sources.
fn slice_range(
    resource: &str,
    data: &[u8],
    begin: u64,
    end: u64,
) -> Result<Vec<u8>, SourceError> {
    let len = data.len() as u64;
    if begin > end || end > len {
        return Err(SourceError::OutOfRange {
            resource: resource.to_string(),
            begin,
            end,
            len,
        });
    }
    Ok(data[begin as usize..end as usize].to_vec())
}
