use futures::future::BoxFuture;

use super::BinaryRangeSource;
use crate::error::SourceError;

/// HTTP dataset addressed by a base URL.
///
/// Range fetches use standard `Range: bytes=` requests, so the server must
/// support partial content for cloud-optimized files. Connect-level failures
/// (including CORS rejections, which browsers surface as opaque request
/// errors) map to [`SourceError::Network`] so callers can distinguish them
/// from format problems and fall back to whole-file download.
pub struct HttpRangeSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRangeSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url_for(&self, resource: &str) -> String {
        if resource.is_empty() {
            self.base_url.clone()
        } else {
            format!("{}/{}", self.base_url, resource)
        }
    }

    async fn get(
        &self,
        resource: &str,
        range: Option<(u64, u64)>,
    ) -> Result<Vec<u8>, SourceError> {
        let network_err = |e: reqwest::Error| SourceError::Network {
            resource: resource.to_string(),
            message: e.to_string(),
        };

        let mut request = self.client.get(self.url_for(resource));
        if let Some((begin, end)) = range {
            // Inclusive last byte per RFC 9110.
            request = request.header(reqwest::header::RANGE, format!("bytes={}-{}", begin, end - 1));
        }

        let response = request.send().await.map_err(network_err)?;
        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Http {
                resource: resource.to_string(),
                status: status.as_u16(),
            });
        }

        let bytes = response.bytes().await.map_err(network_err)?;
        let mut data = bytes.to_vec();
        // A server free to ignore Range answers 200 with the whole body;
        // a body shorter than the requested range is an error, not a
        // stand-in for the range.
        if let Some((begin, end)) = range {
            if status == reqwest::StatusCode::OK {
                data = super::slice_range(resource, &data, begin, end)?;
            }
        }
        Ok(data)
    }
}

impl BinaryRangeSource for HttpRangeSource {
    fn name(&self) -> &str {
        &self.base_url
    }

    fn fetch_range<'a>(
        &'a self,
        resource: &'a str,
        begin: u64,
        end: u64,
    ) -> BoxFuture<'a, Result<Vec<u8>, SourceError>> {
        Box::pin(self.get(resource, Some((begin, end))))
    }

    fn fetch_all<'a>(&'a self, resource: &'a str) -> BoxFuture<'a, Result<Vec<u8>, SourceError>> {
        Box::pin(self.get(resource, None))
    }
}
