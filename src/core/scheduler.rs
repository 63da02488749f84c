use futures::future::{BoxFuture, FutureExt};
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::core::error::FetchError;
use crate::core::model::{FetchResult, FetchWindow, Segment};
use crate::plugins::registry::SegmentFetcher;

/// Sliding-window fetcher: keeps `window.concurrency` segment fetches running
/// as tokio tasks and launches one replacement per delivered result.
///
/// Delivery order is completion order. After the first failure nothing new is
/// launched; in-flight fetches below the failing index are still delivered so
/// the consumer can write a gap-free prefix, the rest are aborted, and the
/// failure is sent last.
#[derive(Clone)]
pub struct FetchScheduler {
    fetcher: Arc<dyn SegmentFetcher>,
}

impl FetchScheduler {
    pub fn new(fetcher: Arc<dyn SegmentFetcher>) -> Self {
        Self { fetcher }
    }

    pub fn spawn(&self, segments: Arc<[Segment]>, window: FetchWindow) -> mpsc::Receiver<FetchResult> {
        let (tx, rx) = mpsc::channel(window.concurrency.max(1));
        let pool = Pool {
            fetcher: self.fetcher.clone(),
            segments,
            running: FuturesUnordered::new(),
            aborts: HashMap::new(),
        };
        tokio::spawn(pool.run(window, tx));
        rx
    }
}

struct Pool {
    fetcher: Arc<dyn SegmentFetcher>,
    segments: Arc<[Segment]>,
    running: FuturesUnordered<BoxFuture<'static, FetchResult>>,
    aborts: HashMap<usize, AbortHandle>,
}

impl Pool {
    fn launch(&mut self, index: usize) {
        let fetcher = self.fetcher.clone();
        let segments = self.segments.clone();
        let handle = tokio::spawn(async move { fetcher.fetch(&segments[index]).await });
        self.aborts.insert(index, handle.abort_handle());
        tracing::trace!(index, in_flight = self.aborts.len(), "segment fetch launched");

        self.running.push(
            async move {
                match handle.await {
                    Ok(Ok(body)) => FetchResult::ok(index, body),
                    Ok(Err(e)) => FetchResult::failed(index, e),
                    Err(e) => FetchResult::failed(index, FetchError::Task { index, reason: e.to_string() }),
                }
            }
            .boxed(),
        );
    }

    fn abort_above(&self, index: usize) {
        for (i, h) in &self.aborts {
            if *i > index {
                h.abort();
            }
        }
    }

    fn abort_all(&self) {
        for h in self.aborts.values() {
            h.abort();
        }
    }

    async fn run(mut self, window: FetchWindow, tx: mpsc::Sender<FetchResult>) {
        let mut next = window.start;
        while next <= window.end && self.running.len() < window.concurrency {
            self.launch(next);
            next += 1;
        }

        let mut failure: Option<FetchResult> = None;

        while let Some(result) = self.running.next().await {
            self.aborts.remove(&result.index);

            if let Some(failed) = &failure {
                if result.index > failed.index {
                    continue;
                }
                if result.body.is_err() {
                    // A lower index failed as well; report that one instead.
                    self.abort_above(result.index);
                    failure = Some(result);
                } else if tx.send(result).await.is_err() {
                    self.abort_all();
                    return;
                }
                continue;
            }

            if let Err(e) = &result.body {
                tracing::warn!(index = result.index, error = %e, "segment fetch failed, no further fetches");
                self.abort_above(result.index);
                failure = Some(result);
                continue;
            }

            if tx.send(result).await.is_err() {
                self.abort_all();
                return;
            }

            if next <= window.end {
                self.launch(next);
                next += 1;
            }
        }

        if let Some(failed) = failure {
            let _ = tx.send(failed).await;
        }
    }
}
