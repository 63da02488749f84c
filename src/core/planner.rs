use crate::core::error::EngineError;
use crate::core::model::FetchWindow;

/// Validates the requested index range and clamps the pool to the number of segments in it.
pub fn plan_window(
    total: usize,
    start: usize,
    end: Option<usize>,
    concurrency: usize,
) -> Result<FetchWindow, EngineError> {
    if total == 0 {
        return Err(EngineError::EmptyPlaylist);
    }

    let end = end.unwrap_or(total - 1);
    if end >= total || start > end {
        return Err(EngineError::InvalidWindow { start, end, len: total });
    }

    let len = end - start + 1;
    Ok(FetchWindow { start, end, concurrency: concurrency.max(1).min(len) })
}
