//! Container Alert Suppression
//!
//! Per-container state machine deciding whether a container alert goes out:
//! allowlists, blue/green sibling awareness, one alert per outage, and
//! optional persistence across restarts.

mod key;
mod normalized;
mod pairing;
mod persist;
mod state;
mod store;

pub use key::{EntityKey, ParseKeyError};
pub use normalized::NormalizedSet;
pub use pairing::{extract_paired_base, Color, PairedName, SiblingLookup};
pub use persist::{PersistError, PersistedEntry, StateFile};
pub use state::{compute_state, EntityState, FailureState};
pub use store::{
    Decision, SuppressionConfig, SuppressionEntry, SuppressionReason, SuppressionStore,
    DEFAULT_STATE_FILE,
};
