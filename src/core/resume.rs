//! Maps the length of a partially written output back onto the segment sequence.
//!
//! Two URL conventions carry offset information, and which one applies is
//! decided by matching the first segment URL:
//!
//! * [`SegmentShape::Range`]: `?start_offset=S&end_offset=E`, inclusive byte
//!   bounds in the whole stream.
//! * [`SegmentShape::FileNumbered`]: the file stem ends in the segment's byte
//!   offset inside its group. The number drops back to 0 when a new group
//!   starts, and the group's real start is only known by probing the length of
//!   the previous group's last segment.

use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use url::Url;

use crate::core::error::ResumeError;
use crate::core::model::{DownloadState, ResumeOutcome, Segment};
use crate::plugins::registry::SegmentFetcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentShape {
    Range,
    FileNumbered,
}

impl SegmentShape {
    pub fn detect(url: &str) -> Option<Self> {
        if range_bounds(url).is_some() {
            Some(Self::Range)
        } else if file_offset(url).is_some() {
            Some(Self::FileNumbered)
        } else {
            None
        }
    }
}

/// Inclusive `(start_offset, end_offset)` from the query string.
pub fn range_bounds(url: &str) -> Option<(u64, u64)> {
    let u = Url::parse(url).ok()?;
    let mut start = None;
    let mut end = None;
    for (k, v) in u.query_pairs() {
        match k.as_ref() {
            "start_offset" => start = v.parse::<u64>().ok(),
            "end_offset" => end = v.parse::<u64>().ok(),
            _ => {}
        }
    }
    match (start, end) {
        (Some(s), Some(e)) if e >= s => Some((s, e)),
        _ => None,
    }
}

/// Trailing decimal number of the file stem, e.g. `.../chunked/1048576.ts` -> 1048576.
pub fn file_offset(url: &str) -> Option<u64> {
    let u = Url::parse(url).ok()?;
    let file = u.path_segments()?.last()?;
    let stem = match file.rfind('.') {
        Some(dot) if dot > 0 => &file[..dot],
        _ => return None,
    };
    let digits_at = stem
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(i, _)| i)?;
    stem[digits_at..].parse().ok()
}

fn unparseable(segment: &Segment) -> ResumeError {
    ResumeError::Unparseable { index: segment.index, url: segment.url.clone() }
}

fn partial_at(output_length: u64, index: usize, segment_start: u64) -> DownloadState {
    DownloadState {
        output_length,
        partial_index: index,
        segment_start,
        skip_bytes: output_length - segment_start,
        resume_index: index + 1,
    }
}

/// Range-addressed resolution: needs no network access.
pub fn locate_by_ranges(output_length: u64, segments: &[Segment]) -> Result<ResumeOutcome, ResumeError> {
    let mut acc = 0u64;
    for seg in segments {
        let (start, end) = range_bounds(&seg.url).ok_or_else(|| unparseable(seg))?;
        let next = (end - start)
            .checked_add(1)
            .and_then(|len| acc.checked_add(len))
            .ok_or_else(|| unparseable(seg))?;
        if next > output_length {
            return Ok(ResumeOutcome::Resume(partial_at(output_length, seg.index, acc)));
        }
        acc = next;
    }
    Ok(ResumeOutcome::NothingToResume)
}

pub struct ResumeResolver {
    fetcher: Arc<dyn SegmentFetcher>,
}

impl ResumeResolver {
    pub fn new(fetcher: Arc<dyn SegmentFetcher>) -> Self {
        Self { fetcher }
    }

    pub async fn resolve(&self, output_length: u64, segments: &[Segment]) -> Result<ResumeOutcome, ResumeError> {
        let first = match segments.first() {
            Some(s) => s,
            None => return Ok(ResumeOutcome::NothingToResume),
        };

        match SegmentShape::detect(&first.url) {
            Some(SegmentShape::Range) => locate_by_ranges(output_length, segments),
            Some(SegmentShape::FileNumbered) => self.locate_by_file_offsets(output_length, segments).await,
            None => Err(unparseable(first)),
        }
    }

    async fn probe(&self, segment: &Segment) -> Result<u64, ResumeError> {
        self.fetcher
            .content_length(segment)
            .await
            .map_err(|source| ResumeError::Probe { index: segment.index, source })
    }

    async fn locate_by_file_offsets(
        &self,
        output_length: u64,
        segments: &[Segment],
    ) -> Result<ResumeOutcome, ResumeError> {
        // The first group is measured from wherever its first segment starts.
        let mut shift = None;
        let mut group_base = 0u64;
        let mut prev_start = 0u64;

        for (pos, seg) in segments.iter().enumerate() {
            let local = file_offset(&seg.url).ok_or_else(|| unparseable(seg))?;

            if local == 0 && pos > 0 {
                let prev_len = self.probe(&segments[pos - 1]).await?;
                group_base = prev_start
                    .checked_add(prev_len)
                    .ok_or_else(|| unparseable(&segments[pos - 1]))?;
                shift = Some(0);
                tracing::debug!(index = seg.index, group_base, "segment group boundary");
            }

            let abs = group_base
                .checked_add(local.saturating_sub(*shift.get_or_insert(local)))
                .ok_or_else(|| unparseable(seg))?;

            if abs > output_length {
                // pos > 0 here: the first segment always sits at offset 0.
                let prev = &segments[pos - 1];
                return Ok(ResumeOutcome::Resume(partial_at(output_length, prev.index, prev_start)));
            }
            prev_start = abs;
        }

        // The last segment may still be cut short.
        let last = &segments[segments.len() - 1];
        match self.probe(last).await {
            Ok(len) if output_length < prev_start.saturating_add(len) => {
                Ok(ResumeOutcome::Resume(partial_at(output_length, last.index, prev_start)))
            }
            Ok(_) => Ok(ResumeOutcome::NothingToResume),
            Err(e) => {
                tracing::warn!(error = %e, "cannot size the last segment, assuming it is complete");
                Ok(ResumeOutcome::NothingToResume)
            }
        }
    }

    /// Refetches the partial segment and appends the bytes that are not on disk yet.
    pub async fn recover_tail<W: AsyncWrite + Unpin>(
        &self,
        state: &DownloadState,
        segments: &[Segment],
        sink: &mut W,
    ) -> Result<u64, ResumeError> {
        let seg = &segments[state.partial_index];
        let body = self
            .fetcher
            .fetch(seg)
            .await
            .map_err(|source| ResumeError::Fetch { index: seg.index, source })?;

        let len = body.len() as u64;
        if len < state.skip_bytes {
            return Err(ResumeError::ShortBody { index: seg.index, len, skip: state.skip_bytes });
        }

        let tail = &body[state.skip_bytes as usize..];
        sink.write_all(tail).await?;
        sink.flush().await?;
        Ok(tail.len() as u64)
    }

    /// Resolves the resume point and, if there is one, completes the partial segment.
    pub async fn resume<W: AsyncWrite + Unpin>(
        &self,
        output_length: u64,
        segments: &[Segment],
        sink: &mut W,
    ) -> Result<(ResumeOutcome, u64), ResumeError> {
        let outcome = self.resolve(output_length, segments).await?;
        let recovered = match &outcome {
            ResumeOutcome::Resume(state) => {
                tracing::info!(
                    partial = state.partial_index,
                    skip = state.skip_bytes,
                    next = state.resume_index,
                    "resuming download"
                );
                self.recover_tail(state, segments, sink).await?
            }
            ResumeOutcome::NothingToResume => 0,
        };
        Ok((outcome, recovered))
    }
}
