//! Store - the observation log.

pub mod observation_store;

pub use observation_store::{ObservationStore, TEMPORAL_INDEX_CAP};
