//! Container Inventory
//!
//! This crate talks to the container inventory (Portainer CE) used to verify
//! webhook alerts and to poll container liveness. It provides the client
//! trait, a REST implementation, a host → scope map, and verification of
//! webhook-reported containers.

mod client;
mod error;
mod mock;
mod scope_map;
mod types;
mod verify;

pub use client::{InventoryClient, PortainerClient, PortainerConfig};
pub use error::InventoryError;
pub use mock::MockInventory;
pub use scope_map::{parse_scope_map, ScopeMap};
pub use types::{
    normalize_name, short_id, DetailedState, EntityRecord, ScopeId, ScopeMetadata,
};
pub use verify::{
    candidate_names, find_match, match_name, EntityMatch, EntityVerifier, FailPolicy,
    VerificationResult,
};
