use bytes::Bytes;
use std::path::PathBuf;
use uuid::Uuid;

use crate::core::error::FetchError;

pub type RunId = Uuid;

/// One fetchable unit of the stream, addressed by its position in the playlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub index: usize,
    pub url: String,
}

impl Segment {
    pub fn new(index: usize, url: impl Into<String>) -> Self {
        Self { index, url: url.into() }
    }

    /// Builds the indexed sequence from playlist order.
    pub fn sequence<I, S>(urls: I) -> Vec<Segment>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        urls.into_iter()
            .enumerate()
            .map(|(index, url)| Segment::new(index, url))
            .collect()
    }
}

/// Where a resumed download continues from. Computed once per resume attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadState {
    pub output_length: u64,
    /// Segment that is refetched to complete the partially written tail.
    pub partial_index: usize,
    /// Absolute stream offset at which the partial segment starts.
    pub segment_start: u64,
    /// Bytes of the partial segment already on disk; discarded from the refetch.
    pub skip_bytes: u64,
    /// Next segment the scheduler must fetch.
    pub resume_index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeOutcome {
    Resume(DownloadState),
    NothingToResume,
}

/// Completed fetch handed from the scheduler to the reassembler.
#[derive(Debug)]
pub struct FetchResult {
    pub index: usize,
    pub body: Result<Bytes, FetchError>,
}

impl FetchResult {
    pub fn ok(index: usize, body: Bytes) -> Self {
        Self { index, body: Ok(body) }
    }

    pub fn failed(index: usize, err: FetchError) -> Self {
        Self { index, body: Err(err) }
    }
}

/// Inclusive index range handed to the scheduler, with the clamped pool size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    pub start: usize,
    pub end: usize,
    pub concurrency: usize,
}

impl FetchWindow {
    pub fn len(&self) -> usize {
        self.end - self.start + 1
    }
}

#[derive(Debug, Clone)]
pub struct RunRequest {
    pub output: PathBuf,
    pub start: usize,
    pub end: Option<usize>,
    pub concurrency: usize,
    pub resume: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunSummary {
    pub segments_written: usize,
    pub bytes_written: u64,
    /// Output length found on disk when resuming.
    pub resumed_from: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed(RunSummary),
    NothingToResume,
}
