//! Reassembles fetcher output in global range order.
//!
//! Range `i` of a batch belongs to fetcher `i % workers`, and each fetcher
//! sends in its own range order, so receiving round-robin yields ranges
//! `0..total` in order without buffering.

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{SampleError, SampleResult};
use crate::fetcher::{ErrorSlot, RawRecord};
use crate::handoff::HandoffReceiver;

/// Consumer end of one fetcher.
pub(crate) struct FetcherLink {
    rx: HandoffReceiver<Option<RawRecord>>,
    error: ErrorSlot,
}

impl FetcherLink {
    pub(crate) fn new(rx: HandoffReceiver<Option<RawRecord>>, error: ErrorSlot) -> Self {
        Self { rx, error }
    }
}

pub(crate) struct OrderedSyncer {
    links: Vec<FetcherLink>,
    total: usize,
    cancel: CancellationToken,
}

impl OrderedSyncer {
    pub(crate) fn new(links: Vec<FetcherLink>, total: usize, cancel: CancellationToken) -> Self {
        Self {
            links,
            total,
            cancel,
        }
    }

    /// Calls `consume` for every sampled record, in range order.
    ///
    /// On any failure the batch is cancelled and every channel drained
    /// before the error is returned.
    pub(crate) async fn run<F>(mut self, mut consume: F) -> SampleResult<()>
    where
        F: FnMut(RawRecord) -> SampleResult<()>,
    {
        let result = self.deliver(&mut consume).await;
        if let Err(err) = &result {
            debug!(error = %err, "aborting sample batch");
            self.cancel.cancel();
            self.drain().await;
        }
        result
    }

    async fn deliver<F>(&mut self, consume: &mut F) -> SampleResult<()>
    where
        F: FnMut(RawRecord) -> SampleResult<()>,
    {
        if self.links.is_empty() {
            return if self.total == 0 {
                Ok(())
            } else {
                Err(SampleError::Internal("sample batch without fetchers".into()))
            };
        }
        for step in 0..self.total {
            let worker = step % self.links.len();
            let link = &mut self.links[worker];
            let message = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(SampleError::Cancelled),
                message = link.rx.recv() => message,
            };
            if let Some(err) = link.error.get() {
                return Err(err);
            }
            match message {
                Some(Some(record)) => consume(record)?,
                Some(None) => {}
                None if self.cancel.is_cancelled() => return Err(SampleError::Cancelled),
                None => {
                    return Err(SampleError::Internal(format!(
                        "fetcher {worker} closed before range {step}"
                    )))
                }
            }
        }
        Ok(())
    }

    async fn drain(&mut self) {
        for link in &mut self.links {
            while link.rx.recv().await.is_some() {}
        }
    }
}
