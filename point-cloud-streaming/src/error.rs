/// Error taxonomy for the streaming loader.
///
/// Per-node failures (`Network`, `Decode`, `HierarchyPage`) are isolated and
/// reported through the session event channel; only header and root-hierarchy
/// failures abort initialization.
use crate::hierarchy::NodeKey;
use thiserror::Error;

/// Failures surfaced by byte-range sources.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Transport-level failure: DNS, connect refusal, or a CORS rejection
    /// (which reaches clients as an opaque request failure). Callers can
    /// match on this variant to fall back to whole-file download.
    #[error("network fetch failed for '{resource}': {message}")]
    Network { resource: String, message: String },

    /// The server answered with a non-success status code.
    #[error("http status {status} for '{resource}'")]
    Http { resource: String, status: u16 },

    /// The requested byte range lies outside the resource.
    #[error("range {begin}..{end} out of bounds for '{resource}' ({len} bytes)")]
    OutOfRange {
        resource: String,
        begin: u64,
        end: u64,
        len: u64,
    },

    /// Local I/O failure, including missing resources.
    #[error("io error for '{resource}': {source}")]
    Io {
        resource: String,
        #[source]
        source: std::io::Error,
    },
}

impl SourceError {
    /// Missing-resource error shared by the file and in-memory sources.
    pub fn not_found(resource: &str) -> Self {
        SourceError::Io {
            resource: resource.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such resource"),
        }
    }
}

/// Failures produced by the streaming core.
#[derive(Debug, Error)]
pub enum StreamError {
    /// Unsupported or unrecognized dataset header. Fatal to session
    /// initialization; there is no fallback inside this crate.
    #[error("unrecognized dataset format: {0}")]
    Format(String),

    /// A hierarchy sub-page could not be loaded. Non-fatal: the sub-tree is
    /// treated as having no finer detail available.
    #[error("hierarchy page below {key} unavailable: {source}")]
    HierarchyPage {
        key: NodeKey,
        #[source]
        source: SourceError,
    },

    /// A byte-range fetch failed. The affected node returns to
    /// `Unrequested` and stays eligible for re-selection.
    #[error(transparent)]
    Network(#[from] SourceError),

    /// A point block failed to decompress or parse. The node is marked
    /// `Failed` and skipped; sibling nodes are unaffected.
    #[error("failed to decode node {key}: {message}")]
    Decode { key: NodeKey, message: String },

    /// The session API was used after `destroy()`.
    #[error("session is destroyed")]
    SessionClosed,
}
