use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use camino::Utf8PathBuf;
use futures::{FutureExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::sync::SemaphorePermit;

use crate::domain::{TrackerRecord, WorkItem};
use crate::error::FetchError;
use crate::http::{BodyStream, Fetcher, retry_after_delay};
use crate::normalize::select_download_url;
use crate::paths::{ArtifactLayout, extension_for, write_sidecar};

pub const NO_VALID_URL: &str = "No valid URL";

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts allowed after the first one.
    pub retries: u32,
    /// Pause after a failed attempt other than 429.
    pub backoff: Duration,
    /// Pause after a 429 without a usable `Retry-After`.
    pub default_retry_after: Duration,
    /// Courtesy delay before every attempt.
    pub pacing: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            backoff: Duration::from_secs(1),
            default_retry_after: Duration::from_secs(5),
            pacing: Duration::from_millis(50),
        }
    }
}

#[derive(Debug)]
enum AttemptError {
    RateLimited(Duration),
    Failed(FetchError),
}

impl From<FetchError> for AttemptError {
    fn from(err: FetchError) -> Self {
        AttemptError::Failed(err)
    }
}

impl From<std::io::Error> for AttemptError {
    fn from(err: std::io::Error) -> Self {
        AttemptError::Failed(err.into())
    }
}

struct Stored {
    path: Utf8PathBuf,
    size: u64,
}

/// Downloads one item per call and turns every way that can go wrong into
/// a terminal `TrackerRecord`. Persisting the record is the caller's job.
pub struct FetchWorker<F> {
    fetcher: F,
    layout: ArtifactLayout,
    policy: RetryPolicy,
    prefer_origin: bool,
}

impl<F: Fetcher> FetchWorker<F> {
    pub fn new(fetcher: F, layout: ArtifactLayout, policy: RetryPolicy, prefer_origin: bool) -> Self {
        Self {
            fetcher,
            layout,
            policy,
            prefer_origin,
        }
    }

    pub async fn download(&self, item: &WorkItem, permit: SemaphorePermit<'_>) -> TrackerRecord {
        let record = AssertUnwindSafe(self.download_item(item))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| {
                let err = FetchError::unexpected(format!("panic: {}", panic_message(&*payload)));
                tracing::error!(item_id = item.item_id, error = %err, "download panicked");
                TrackerRecord::failed(item.item_id, err.to_string())
            });
        drop(permit);
        record
    }

    async fn download_item(&self, item: &WorkItem) -> TrackerRecord {
        let Some(url) = select_download_url(
            item.primary_url.as_deref(),
            item.fallback_url.as_deref(),
            self.prefer_origin,
        ) else {
            tracing::debug!(item_id = item.item_id, "no usable URL");
            return TrackerRecord::skipped(item.item_id, NO_VALID_URL);
        };

        let base = ArtifactLayout::base_name(
            item.item_id,
            &item.variant_kind,
            item.width,
            item.height,
            &url,
        );
        let attempts = self.policy.retries.saturating_add(1);
        let mut last_error = FetchError::unexpected("no attempt made");

        for attempt in 1..=attempts {
            tokio::time::sleep(self.policy.pacing).await;
            let wait = match self.attempt(item, &url, &base).await {
                Ok(stored) => {
                    tracing::debug!(item_id = item.item_id, path = %stored.path, bytes = stored.size, "stored");
                    return TrackerRecord::downloaded(
                        item.item_id,
                        url,
                        stored.path.into_string(),
                        stored.size,
                    );
                }
                Err(AttemptError::RateLimited(wait)) => {
                    last_error = FetchError::Status(429);
                    wait
                }
                Err(AttemptError::Failed(err)) => {
                    last_error = err;
                    self.policy.backoff
                }
            };
            tracing::debug!(
                item_id = item.item_id,
                %url,
                attempt,
                error = %last_error,
                "attempt failed"
            );
            if attempt < attempts {
                tokio::time::sleep(wait).await;
            }
        }

        tracing::warn!(item_id = item.item_id, %url, error = %last_error, "download failed");
        TrackerRecord::failed(item.item_id, last_error.to_string())
    }

    async fn attempt(&self, item: &WorkItem, url: &str, base: &str) -> Result<Stored, AttemptError> {
        let response = self.fetcher.get(url).await?;
        if response.status == 429 {
            let wait = retry_after_delay(
                response.retry_after.as_deref(),
                self.policy.default_retry_after,
            );
            return Err(AttemptError::RateLimited(wait));
        }
        if !response.is_success() {
            return Err(FetchError::Status(response.status).into());
        }

        let extension = extension_for(url, response.content_type.as_deref());
        let final_path = self.layout.artifact_path(base, &extension);
        let sidecar = self.layout.sidecar_path(base);

        if let Ok(meta) = tokio::fs::metadata(final_path.as_std_path()).await {
            if meta.is_file() {
                write_sidecar(&sidecar, item);
                return Ok(Stored {
                    path: final_path,
                    size: meta.len(),
                });
            }
        }

        let size = self.stream_to(response.body, base, &final_path).await?;
        write_sidecar(&sidecar, item);
        Ok(Stored {
            path: final_path,
            size,
        })
    }

    /// Streams into a temp file next to the target and renames it into place
    /// once the body is complete. The temp file is removed if anything fails.
    async fn stream_to(
        &self,
        mut body: BodyStream,
        base: &str,
        final_path: &Utf8PathBuf,
    ) -> Result<u64, AttemptError> {
        let (file, temp_path) = self.layout.temp_file(base)?.into_parts();
        let mut file = tokio::fs::File::from_std(file);
        let mut written = 0u64;
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        temp_path
            .persist(final_path.as_std_path())
            .map_err(|err| FetchError::from(err.error))?;
        Ok(written)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    "unknown panic".to_string()
}
