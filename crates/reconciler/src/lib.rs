//! Inventory Reconciler
//!
//! Periodically polls the container inventory, confirms outages with
//! hysteresis and emits down/recovery notifications through the shared
//! suppression store and cooldown cache.

mod classify;
mod hysteresis;
mod monitor;

pub use classify::{classify, Liveness, LivenessObservation};
pub use hysteresis::{Hysteresis, Transition, TransitionCounter};
pub use monitor::{CycleReport, InventoryMonitor, MonitorConfig, ScopeMode};
