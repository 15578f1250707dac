use crate::enrichment::{EnrichedFields, Enricher, EnrichmentError};
use futures::stream::{self, StreamExt};
use std::time::Duration;
use tracing::warn;

/// Result of one enrichment attempt, keyed by position in the working set
pub(crate) type BatchOutcome = (usize, Result<EnrichedFields, EnrichmentError>);

/// Runs one concurrent batch of per-state enrichment calls.
///
/// Each call is bounded by `timeout`; at most `max_concurrent` calls are in
/// flight. The batch always runs to completion: individual failures are
/// returned, never propagated.
pub(crate) struct EnrichmentBatch<'a> {
    enricher: &'a dyn Enricher,
    timeout: Duration,
    max_concurrent: usize,
}

impl<'a> EnrichmentBatch<'a> {
    pub(crate) fn new(enricher: &'a dyn Enricher, timeout: Duration, max_concurrent: usize) -> Self {
        Self {
            enricher,
            timeout,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Enrich every `(index, state name)` pair. Output order is unspecified.
    pub(crate) async fn run(&self, targets: Vec<(usize, String)>) -> Vec<BatchOutcome> {
        stream::iter(targets)
            .map(move |(idx, name)| async move {
                let result = self.enrich_one(&name).await;
                if let Err(e) = &result {
                    warn!(state = %name, error = %e, "Enrichment failed, keeping previous data");
                }
                (idx, result)
            })
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await
    }

    async fn enrich_one(&self, name: &str) -> Result<EnrichedFields, EnrichmentError> {
        match tokio::time::timeout(self.timeout, self.enricher.enrich(name)).await {
            Ok(result) => result,
            Err(_) => Err(EnrichmentError::Timeout {
                state: name.to_string(),
                timeout_secs: self.timeout.as_secs(),
            }),
        }
    }
}
