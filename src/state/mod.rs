// State records and working-set helpers

mod record;

pub use record::{Demographics, StateRecord, Stats, PLACEHOLDER_POLITICAL_CLIMATE};

use std::cmp::Ordering;
use std::collections::HashMap;


/// Collapse duplicate ids into one record per state.
///
/// When a store hands back the same id twice, the copy with the newest
/// `last_refreshed_at` wins. Input order of first appearance is kept.
pub fn dedupe_by_id(records: Vec<StateRecord>) -> Vec<StateRecord> {
    let mut positions: HashMap<String, usize> = HashMap::with_capacity(records.len());
    let mut unique: Vec<StateRecord> = Vec::with_capacity(records.len());

    for record in records {
        match positions.get(&record.id) {
            Some(&idx) => {
                if record.last_refreshed_at > unique[idx].last_refreshed_at {
                    unique[idx] = record;
                }
            }
            None => {
                positions.insert(record.id.clone(), unique.len());
                unique.push(record);
            }
        }
    }

    unique
}

/// Sort states by display name, falling back to id for equal names.
pub fn sort_by_name(records: &mut [StateRecord]) {
    records.sort_by(compare_by_name);
}

fn compare_by_name(a: &StateRecord, b: &StateRecord) -> Ordering {
    a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id))
}
