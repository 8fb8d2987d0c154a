use futures::StreamExt;
use futures::stream::FuturesUnordered;
use serde::Serialize;
use tokio::sync::Semaphore;

use crate::domain::{DownloadStatus, TrackerRecord, WorkItem};
use crate::error::{FetchError, HarvestError};
use crate::http::Fetcher;
use crate::report::{RunCounts, TOP_ERRORS, TrackerReport};
use crate::tracker::Tracker;
use crate::worker::FetchWorker;

pub const DEFAULT_CONCURRENCY: usize = 40;

#[derive(Debug, Clone)]
pub enum ProgressEvent {
    Started { candidates: usize, already_done: usize },
    Recorded { item_id: i64, status: DownloadStatus },
    Finished,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub candidates: usize,
    pub recorded: RunCounts,
    pub report: TrackerReport,
}

/// Drives one run: diff the source items against the tracker, download the
/// rest with bounded concurrency, record outcomes as they finish.
pub struct Pipeline<F> {
    tracker: Tracker,
    worker: FetchWorker<F>,
    concurrency: usize,
}

impl<F: Fetcher> Pipeline<F> {
    pub fn new(tracker: Tracker, worker: FetchWorker<F>, concurrency: usize) -> Self {
        Self {
            tracker,
            worker,
            concurrency: concurrency.max(1),
        }
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    pub async fn run(
        &self,
        items: &[WorkItem],
        sink: &dyn ProgressSink,
    ) -> Result<RunSummary, HarvestError> {
        self.tracker.initialize()?;
        let completed = self.tracker.list_completed_ids()?;

        let candidates: Vec<&WorkItem> = items
            .iter()
            .filter(|item| item.has_url() && !completed.contains(&item.item_id))
            .collect();
        tracing::info!(
            candidates = candidates.len(),
            already_done = completed.len(),
            concurrency = self.concurrency,
            "starting run"
        );
        sink.event(ProgressEvent::Started {
            candidates: candidates.len(),
            already_done: completed.len(),
        });

        let semaphore = Semaphore::new(self.concurrency);
        let mut in_flight = candidates
            .iter()
            .map(|item| {
                let semaphore = &semaphore;
                async move {
                    match semaphore.acquire().await {
                        Ok(permit) => self.worker.download(item, permit).await,
                        Err(err) => TrackerRecord::failed(
                            item.item_id,
                            FetchError::unexpected(err.to_string()).to_string(),
                        ),
                    }
                }
            })
            .collect::<FuturesUnordered<_>>();

        let mut recorded = RunCounts::default();
        while let Some(record) = in_flight.next().await {
            self.tracker.upsert(&record)?;
            recorded.record(record.status);
            sink.event(ProgressEvent::Recorded {
                item_id: record.item_id,
                status: record.status,
            });
        }
        sink.event(ProgressEvent::Finished);

        let report = self.tracker.report(TOP_ERRORS)?;
        tracing::info!(
            downloaded = recorded.downloaded,
            failed = recorded.failed,
            skipped = recorded.skipped,
            "run finished"
        );
        Ok(RunSummary {
            candidates: candidates.len(),
            recorded,
            report,
        })
    }
}
