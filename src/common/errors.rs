use thiserror::Error;

/// Errors surfaced by the cache, proxy and HLS prefetch layers.
///
/// Not every variant reaches the caller — several are handled locally
/// (retried, logged and defaulted, or translated into an HTTP status on the
/// wire) and only escape the component that produced them when no local
/// recovery is possible.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("client sent an empty request")]
    RequestEmpty,

    #[error("malformed request line: {0}")]
    RequestMalformed(String),

    #[error("range not satisfiable (length {length})")]
    RangeUnsatisfiable { length: u64 },

    #[error("upstream returned status {0}")]
    UpstreamStatus(u16),

    #[error("failed to connect to origin: {0}")]
    UpstreamConnectError(String),

    #[error("client disconnected mid-stream")]
    ClientDisconnect,

    #[error("download ended with a length mismatch, cache invalidated")]
    IncompleteDownload,

    #[error("segment fetch failed: {0}")]
    SegmentFetchFailed(String),

    #[error("prefetch aborted: {0}")]
    PrefetchAborted(String),

    #[error("playlist references segments that are not on disk")]
    MissingSegments,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
