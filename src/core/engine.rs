use std::path::Path;
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::AsyncWrite;
use tokio::sync::broadcast;
use tracing::Instrument;
use uuid::Uuid;

use crate::core::assembler::{create_output, open_for_append, Reassembler};
use crate::core::error::{EngineError, FetchError};
use crate::core::events::EngineEvent;
use crate::core::model::*;
use crate::core::planner::plan_window;
use crate::core::resume::ResumeResolver;
use crate::core::scheduler::FetchScheduler;
use crate::plugins::registry::SegmentFetcher;

#[derive(Clone)]
pub struct Engine {
    fetcher: Arc<dyn SegmentFetcher>,
    event_tx: broadcast::Sender<EngineEvent>,
}

/// Output handle plus where the scheduler has to pick up.
struct Prepared {
    file: File,
    start: usize,
    resumed_from: Option<u64>,
    recovered: u64,
}

fn output_error(path: &Path, source: std::io::Error) -> EngineError {
    EngineError::Output { path: path.display().to_string(), source }
}

impl Engine {
    pub fn new(fetcher: Arc<dyn SegmentFetcher>) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self { fetcher, event_tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.event_tx.subscribe()
    }

    fn emit(&self, evt: EngineEvent) {
        let _ = self.event_tx.send(evt);
    }

    pub async fn run(&self, segments: Vec<Segment>, req: RunRequest) -> Result<RunOutcome, EngineError> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "run",
            %run_id,
            output = %req.output.display(),
            fetcher = self.fetcher.name()
        );
        let result = self.run_inner(run_id, segments, &req).instrument(span).await;

        match &result {
            Ok(outcome) => self.emit(EngineEvent::Finished { run_id, outcome: *outcome }),
            Err(e) => self.emit(EngineEvent::Error { scope: format!("run({})", run_id), message: e.to_string() }),
        }
        result
    }

    async fn run_inner(
        &self,
        run_id: RunId,
        segments: Vec<Segment>,
        req: &RunRequest,
    ) -> Result<RunOutcome, EngineError> {
        let total = segments.len();
        // Validate the requested range before touching the output.
        let requested = plan_window(total, req.start, req.end, req.concurrency)?;

        let prepared = match self.prepare_output(run_id, &segments, req).await? {
            Some(p) => p,
            None => return Ok(RunOutcome::NothingToResume),
        };

        let mut summary = RunSummary {
            segments_written: 0,
            bytes_written: prepared.recovered,
            resumed_from: prepared.resumed_from,
        };

        if prepared.start > requested.end {
            tracing::info!(resume_index = prepared.start, end = requested.end, "nothing left to schedule");
            return Ok(RunOutcome::Completed(summary));
        }

        let window = plan_window(total, prepared.start, Some(requested.end), req.concurrency)?;
        self.emit(EngineEvent::RunStarted { run_id, total_segments: total, window });
        tracing::info!(start = window.start, end = window.end, concurrency = window.concurrency, "scheduling segments");

        let mut reassembler = Reassembler::new(prepared.file, window.start, window.end);
        let mut rx = FetchScheduler::new(self.fetcher.clone()).spawn(Arc::from(segments), window);
        let base_bytes = prepared.resumed_from.unwrap_or(0) + prepared.recovered;

        while let Some(result) = rx.recv().await {
            let body = match result.body {
                Ok(b) => b,
                Err(e) => return Err(abandon(&mut reassembler, result.index, e).await),
            };

            for w in reassembler.accept(result.index, body).await? {
                self.emit(EngineEvent::SegmentWritten {
                    run_id,
                    index: w.index,
                    len: w.len,
                    written: reassembler.segments_written(),
                    remaining: window.end + 1 - reassembler.cursor(),
                    output_bytes: base_bytes + reassembler.bytes_written(),
                });
            }

            if reassembler.is_complete() {
                break;
            }
        }

        if !reassembler.is_complete() {
            return Err(EngineError::Incomplete { cursor: reassembler.cursor() });
        }

        reassembler.flush().await.map_err(|e| output_error(&req.output, e))?;
        summary.segments_written = reassembler.segments_written();
        summary.bytes_written += reassembler.bytes_written();
        Ok(RunOutcome::Completed(summary))
    }

    /// Opens the output and, when resuming, completes the partial segment.
    /// `None` means the existing output already covers the playlist.
    async fn prepare_output(
        &self,
        run_id: RunId,
        segments: &[Segment],
        req: &RunRequest,
    ) -> Result<Option<Prepared>, EngineError> {
        let path = req.output.as_path();

        if req.resume && req.start != 0 {
            self.emit(EngineEvent::Info {
                scope: "resume".to_string(),
                message: format!("explicit start index {} given, starting a fresh file", req.start),
            });
        }

        if req.resume && req.start == 0 {
            match open_for_append(path).await.map_err(|e| output_error(path, e))? {
                Some((mut file, len)) if len > 0 => {
                    let resolver = ResumeResolver::new(self.fetcher.clone());
                    let (outcome, recovered) = resolver.resume(len, segments, &mut file).await?;
                    return match outcome {
                        ResumeOutcome::NothingToResume => Ok(None),
                        ResumeOutcome::Resume(state) => {
                            self.emit(EngineEvent::Resumed { run_id, state, recovered });
                            Ok(Some(Prepared {
                                file,
                                start: state.resume_index,
                                resumed_from: Some(len),
                                recovered,
                            }))
                        }
                    };
                }
                Some((file, _)) => {
                    tracing::info!("previous output is empty, starting from the first segment");
                    return Ok(Some(Prepared { file, start: 0, resumed_from: None, recovered: 0 }));
                }
                None => {
                    tracing::info!("no previous output, starting from the first segment");
                }
            }
        }

        let file = create_output(path).await.map_err(|e| output_error(path, e))?;
        Ok(Some(Prepared { file, start: req.start, resumed_from: None, recovered: 0 }))
    }
}

/// Stops a run on a fetch failure. Everything before the cursor stays on disk for a later resume.
async fn abandon<W: AsyncWrite + Unpin>(
    reassembler: &mut Reassembler<W>,
    index: usize,
    error: FetchError,
) -> EngineError {
    if let Err(e) = reassembler.flush().await {
        tracing::warn!(error = %e, cursor = reassembler.cursor(), "could not flush output before aborting");
    }
    tracing::error!(index, cursor = reassembler.cursor(), "aborting run");
    EngineError::Fetch(error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MemoryFetcher;
    use std::path::PathBuf;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::Duration;

    fn url(i: usize) -> String {
        format!("mem://vod/{}.ts", i)
    }

    fn body(i: usize) -> Vec<u8> {
        vec![i as u8; 10 + i]
    }

    fn playlist(n: usize) -> (Vec<Segment>, MemoryFetcher) {
        let fetcher = (0..n).fold(MemoryFetcher::new(), |f, i| {
            f.with_body(&url(i), body(i))
                .with_delay(&url(i), Duration::from_millis(((n - i) * 5 % 13) as u64))
        });
        (Segment::sequence((0..n).map(url)), fetcher)
    }

    fn expected(range: std::ops::Range<usize>) -> Vec<u8> {
        range.flat_map(body).collect()
    }

    fn request(output: PathBuf) -> RunRequest {
        RunRequest { output, start: 0, end: None, concurrency: 4, resume: false }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn writes_segments_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("v.ts");
        let (segs, fetcher) = playlist(12);
        let engine = Engine::new(Arc::new(fetcher));
        let mut rx = engine.subscribe();

        let outcome = engine.run(segs, request(out.clone())).await.unwrap();
        let RunOutcome::Completed(summary) = outcome else { panic!("expected completion") };
        assert_eq!(summary.segments_written, 12);
        assert_eq!(summary.bytes_written, expected(0..12).len() as u64);
        assert_eq!(std::fs::read(&out).unwrap(), expected(0..12));

        let mut order = Vec::new();
        while let Ok(evt) = rx.try_recv() {
            if let EngineEvent::SegmentWritten { index, .. } = evt {
                order.push(index);
            }
        }
        assert_eq!(order, (0..12).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn start_and_end_select_a_subrange() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("part.ts");
        let (segs, fetcher) = playlist(10);
        let engine = Engine::new(Arc::new(fetcher));

        let req = RunRequest { start: 2, end: Some(5), ..request(out.clone()) };
        engine.run(segs, req).await.unwrap();
        assert_eq!(std::fs::read(&out).unwrap(), expected(2..6));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn fatal_fetch_leaves_valid_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("v.ts");
        let (segs, fetcher) = playlist(10);
        let fetcher = fetcher.failing(&url(5));
        let engine = Engine::new(Arc::new(fetcher));

        let err = engine.run(segs, request(out.clone())).await.unwrap_err();
        assert!(matches!(err, EngineError::Fetch(_)), "got {:?}", err);
        assert_eq!(std::fs::read(&out).unwrap(), expected(0..5));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn aborted_run_resumes_to_identical_output() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("v.ts");
        let bounds: Vec<(u64, u64)> = (0..6u64).map(|i| (i * 50, i * 50 + 49)).collect();
        let urls: Vec<String> = bounds
            .iter()
            .map(|(s, e)| format!("http://cdn.test/v.ts?start_offset={}&end_offset={}", s, e))
            .collect();
        let full: Vec<u8> = (0..300u32).map(|b| (b % 251) as u8).collect();
        let fetcher = urls.iter().zip(&bounds).fold(MemoryFetcher::new(), |f, (u, (s, e))| {
            f.with_body(u, full[*s as usize..=*e as usize].to_vec())
        });
        let fetcher = Arc::new(fetcher);

        // Simulate an interrupted earlier run that stopped inside segment 2.
        std::fs::write(&out, &full[..130]).unwrap();

        let engine = Engine::new(fetcher.clone());
        let req = RunRequest { resume: true, concurrency: 3, ..request(out.clone()) };
        let outcome = engine.run(Segment::sequence(urls.clone()), req).await.unwrap();

        let RunOutcome::Completed(summary) = outcome else { panic!("expected completion") };
        assert_eq!(summary.resumed_from, Some(130));
        assert_eq!(summary.segments_written, 3);
        assert_eq!(summary.bytes_written, 170);
        assert_eq!(std::fs::read(&out).unwrap(), full);
        // Segments 0 and 1 were never refetched.
        assert!(!fetcher.fetched().contains(&urls[0]));
        assert!(!fetcher.fetched().contains(&urls[1]));
    }

    #[tokio::test]
    async fn complete_output_is_nothing_to_resume() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("v.ts");
        let urls: Vec<String> = [(0, 99), (100, 199), (200, 299)]
            .iter()
            .map(|(s, e)| format!("http://cdn.test/v.ts?start_offset={}&end_offset={}", s, e))
            .collect();
        std::fs::write(&out, vec![1u8; 300]).unwrap();
        let fetcher = Arc::new(MemoryFetcher::new());
        let engine = Engine::new(fetcher.clone());

        let req = RunRequest { resume: true, ..request(out.clone()) };
        let outcome = engine.run(Segment::sequence(urls), req).await.unwrap();
        assert_eq!(outcome, RunOutcome::NothingToResume);
        assert!(fetcher.fetched().is_empty());
        assert_eq!(std::fs::read(&out).unwrap().len(), 300);
    }

    #[tokio::test]
    async fn resume_without_existing_file_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("new.ts");
        let (segs, fetcher) = playlist(4);
        let engine = Engine::new(Arc::new(fetcher));

        let req = RunRequest { resume: true, ..request(out.clone()) };
        engine.run(segs, req).await.unwrap();
        assert_eq!(std::fs::read(&out).unwrap(), expected(0..4));
    }

    #[tokio::test]
    async fn explicit_start_ignores_continue_and_recreates_output() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("v.ts");
        std::fs::write(&out, b"stale bytes from another run").unwrap();
        let (segs, fetcher) = playlist(5);
        let engine = Engine::new(Arc::new(fetcher));
        let mut rx = engine.subscribe();

        let req = RunRequest { resume: true, start: 2, ..request(out.clone()) };
        let outcome = engine.run(segs, req).await.unwrap();
        let RunOutcome::Completed(summary) = outcome else { panic!("expected completion") };
        assert_eq!(summary.resumed_from, None);
        assert_eq!(std::fs::read(&out).unwrap(), expected(2..5));

        let mut infos = Vec::new();
        while let Ok(evt) = rx.try_recv() {
            match evt {
                EngineEvent::Info { scope, message } => infos.push((scope, message)),
                EngineEvent::Resumed { .. } => panic!("must not resume"),
                _ => {}
            }
        }
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].0, "resume");
        assert!(infos[0].1.contains("start index 2"));
    }

    #[tokio::test]
    async fn empty_output_under_continue_starts_from_first_segment() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("v.ts");
        std::fs::write(&out, b"").unwrap();
        let (segs, fetcher) = playlist(4);
        let fetcher = Arc::new(fetcher);
        let engine = Engine::new(fetcher.clone());

        let req = RunRequest { resume: true, ..request(out.clone()) };
        let outcome = engine.run(segs, req).await.unwrap();
        let RunOutcome::Completed(summary) = outcome else { panic!("expected completion") };
        assert_eq!(summary.resumed_from, None);
        assert_eq!(summary.segments_written, 4);
        assert_eq!(std::fs::read(&out).unwrap(), expected(0..4));
        assert!(fetcher.probed().is_empty());
    }

    struct BrokenFlush(Vec<u8>);

    impl AsyncWrite for BrokenFlush {
        fn poll_write(mut self: Pin<&mut Self>, _: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
            self.0.extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Err(std::io::Error::new(std::io::ErrorKind::Other, "disk gone")))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn flush_failure_on_abort_keeps_fetch_error() {
        let mut reassembler = Reassembler::new(BrokenFlush(Vec::new()), 0, 3);
        let err = abandon(&mut reassembler, 2, FetchError::MissingLength { url: url(2) }).await;
        match err {
            EngineError::Fetch(FetchError::MissingLength { url: u }) => assert_eq!(u, url(2)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn unparseable_resume_state_is_fatal_and_keeps_output() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("v.ts");
        std::fs::write(&out, b"partial").unwrap();
        let segs = Segment::sequence(["http://cdn.test/a/muted.ts", "http://cdn.test/a/other.ts"]);
        let engine = Engine::new(Arc::new(MemoryFetcher::new()));

        let req = RunRequest { resume: true, ..request(out.clone()) };
        let err = engine.run(segs, req).await.unwrap_err();
        assert!(matches!(err, EngineError::Resume(crate::core::error::ResumeError::Unparseable { .. })));
        assert_eq!(std::fs::read(&out).unwrap(), b"partial");
    }

    #[tokio::test]
    async fn invalid_window_is_rejected_before_output_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("never.ts");
        let (segs, fetcher) = playlist(3);
        let engine = Engine::new(Arc::new(fetcher));

        let req = RunRequest { end: Some(7), ..request(out.clone()) };
        assert!(matches!(engine.run(segs, req).await, Err(EngineError::InvalidWindow { .. })));
        assert!(!out.exists());
        assert!(matches!(
            engine.run(Vec::new(), request(out.clone())).await,
            Err(EngineError::EmptyPlaylist)
        ));
    }
}
