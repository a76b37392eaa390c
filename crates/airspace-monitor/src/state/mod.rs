//! Airspace state.

mod store;

pub use store::{AirspaceStore, Upsert};
