use super::batch::EnrichmentBatch;
use super::SyncError;
use crate::seed::SeedProvider;
use crate::state::StateRecord;
use tracing::{info, warn};

/// Produce the first full state set from seed shells.
///
/// Every shell is enriched when a batch is given. Shells whose enrichment
/// fails (or all of them, when enrichment is disabled) are still returned,
/// carrying the "never enriched" sentinels so the next pass retries them.
/// The output is unsorted.
pub(crate) async fn bootstrap_states(
    seed: &SeedProvider,
    batch: Option<&EnrichmentBatch<'_>>,
    now: i64,
) -> Result<Vec<StateRecord>, SyncError> {
    if seed.is_empty() {
        return Err(SyncError::EmptySeed);
    }

    let mut states = seed.shells();

    let Some(batch) = batch else {
        info!(states = states.len(), "Enrichment disabled, bootstrapping bare shells");
        for state in &mut states {
            state.mark_unenriched();
        }
        return Ok(states);
    };

    info!(states = states.len(), "Bootstrapping state data from seed");

    let targets = states
        .iter()
        .enumerate()
        .map(|(idx, state)| (idx, state.name.clone()))
        .collect();

    let mut enriched = 0;
    for (idx, outcome) in batch.run(targets).await {
        match outcome {
            Ok(fields) => {
                states[idx].apply_enrichment(fields, now);
                enriched += 1;
            }
            Err(_) => states[idx].mark_unenriched(),
        }
    }

    let failed = states.len() - enriched;
    if failed > 0 {
        warn!(enriched, failed, "Bootstrap finished with incomplete states");
    } else {
        info!(enriched, "Bootstrap finished");
    }

    Ok(states)
}
