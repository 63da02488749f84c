use crate::core::model::{DownloadState, FetchWindow, RunId, RunOutcome};

#[derive(Debug, Clone)]
pub enum EngineEvent {
    RunStarted { run_id: RunId, total_segments: usize, window: FetchWindow },
    Resumed { run_id: RunId, state: DownloadState, recovered: u64 },
    SegmentWritten {
        run_id: RunId,
        index: usize,
        len: u64,
        written: usize,
        remaining: usize,
        output_bytes: u64,
    },
    Finished { run_id: RunId, outcome: RunOutcome },
    Error { scope: String, message: String },
    Info { scope: String, message: String },
}
