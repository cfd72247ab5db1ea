use std::collections::HashMap;

use futures::future::BoxFuture;

use super::{BinaryRangeSource, slice_range};
use crate::error::SourceError;

/// In-memory dataset, used for tests and for buffers handed over by a host
/// that already downloaded the whole file.
#[derive(Default)]
pub struct MemoryRangeSource {
    name: String,
    resources: HashMap<String, Vec<u8>>,
}

impl MemoryRangeSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resources: HashMap::new(),
        }
    }

    /// Single-resource dataset: the buffer becomes the root resource.
    pub fn from_buffer(name: impl Into<String>, data: Vec<u8>) -> Self {
        let mut source = Self::new(name);
        source.insert("", data);
        source
    }

    pub fn insert(&mut self, resource: impl Into<String>, data: Vec<u8>) {
        self.resources.insert(resource.into(), data);
    }

    pub fn remove(&mut self, resource: &str) {
        self.resources.remove(resource);
    }
}

impl BinaryRangeSource for MemoryRangeSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch_range<'a>(
        &'a self,
        resource: &'a str,
        begin: u64,
        end: u64,
    ) -> BoxFuture<'a, Result<Vec<u8>, SourceError>> {
        Box::pin(async move {
            let data = self
                .resources
                .get(resource)
                .ok_or_else(|| SourceError::not_found(resource))?;
            slice_range(resource, data, begin, end)
        })
    }

    fn fetch_all<'a>(&'a self, resource: &'a str) -> BoxFuture<'a, Result<Vec<u8>, SourceError>> {
        Box::pin(async move {
            self.resources
                .get(resource)
                .cloned()
                .ok_or_else(|| SourceError::not_found(resource))
        })
    }
}
