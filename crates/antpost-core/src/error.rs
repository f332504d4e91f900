use thiserror::Error;

/// Failures of the pipelined HTTP engine itself.
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid url '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("url '{0}' has no host")]
    MissingHost(String),
    #[error("invalid host '{0}'")]
    InvalidHost(String),
    #[error("connection writer closed")]
    WriterClosed,
}

/// A problem with one received response. The response is still delivered,
/// carrying whatever body could be recovered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResponseError {
    #[error("malformed status line: {0:?}")]
    MalformedStatusLine(String),
    #[error("malformed content-length: {0:?}")]
    MalformedContentLength(String),
    #[error("malformed chunk size line: {0:?}")]
    MalformedChunk(String),
    #[error("connection closed after {received} of {expected} body bytes")]
    Truncated { expected: usize, received: usize },
    #[error("connection closed inside a chunked body")]
    UnfinishedChunked,
}
