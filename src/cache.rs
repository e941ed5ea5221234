//! Cache state and the manager answering reads against it.

pub mod manager;
pub mod state;
