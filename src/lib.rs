// State records and working-set helpers
pub mod state;

// Local JSON cache tier
pub mod cache;

// Remote entity store tier
pub mod store;

// Per-state enrichment via the generative service
pub mod enrichment;

// Seed shells for bootstrap
pub mod seed;

// Staleness detection and refresh orchestration
pub mod sync;

// Service configuration
pub mod config;

// HTTP API
pub mod api;

pub use state::StateRecord;
pub use sync::{StateDataService, SyncConfig};
