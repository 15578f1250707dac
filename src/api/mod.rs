// HTTP API for the game front end

pub mod states;

pub use states::{create_states_router, StatesAppState, StatusResponse};
