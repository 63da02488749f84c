use reqwest::StatusCode;

#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("transport error on {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("http status {status} on {url}")]
    Status { url: String, status: StatusCode },

    /// Length probe answered without a usable Content-Length.
    #[error("no content length reported for {url}")]
    MissingLength { url: String },

    #[error("fetch task for segment {index} did not complete: {reason}")]
    Task { index: usize, reason: String },
}

#[derive(thiserror::Error, Debug)]
pub enum ResumeError {
    #[error("cannot derive a resume offset from segment {index} url: {url}")]
    Unparseable { index: usize, url: String },

    #[error("length probe for segment {index} failed: {source}")]
    Probe {
        index: usize,
        #[source]
        source: FetchError,
    },

    #[error("refetching partial segment {index} failed: {source}")]
    Fetch {
        index: usize,
        #[source]
        source: FetchError,
    },

    #[error("segment {index} is {len} bytes, shorter than the {skip} bytes already on disk")]
    ShortBody { index: usize, len: u64, skip: u64 },

    #[error("writing recovered tail: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum AssembleError {
    #[error("segment {index} delivered twice or after it was written (cursor at {cursor})")]
    Duplicate { index: usize, cursor: usize },

    #[error("segment {index} is outside the window ending at {end}")]
    OutOfWindow { index: usize, end: usize },

    #[error("writing segment {index}: {source}")]
    Io {
        index: usize,
        #[source]
        source: std::io::Error,
    },
}

#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("playlist has no segments")]
    EmptyPlaylist,

    #[error("invalid segment range {start}..={end} for a playlist of {len} segments")]
    InvalidWindow { start: usize, end: usize, len: usize },

    #[error("resume: {0}")]
    Resume(#[from] ResumeError),

    #[error("download: {0}")]
    Fetch(#[from] FetchError),

    #[error("assemble: {0}")]
    Assemble(#[from] AssembleError),

    #[error("output {path}: {source}")]
    Output {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("scheduler stopped before segment {cursor} was delivered")]
    Incomplete { cursor: usize },
}
