//! Entity states

use inventory::VerificationResult;
use serde::{Deserialize, Serialize};
use std::fmt;

/// States that fire an alert on the first occurrence after `running`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureState {
    Down,
    Restarting,
    Exited,
    Dead,
    Unknown,
    Stopped,
    Created,
}

impl FailureState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureState::Down => "down",
            FailureState::Restarting => "restarting",
            FailureState::Exited => "exited",
            FailureState::Dead => "dead",
            FailureState::Unknown => "unknown",
            FailureState::Stopped => "stopped",
            FailureState::Created => "created",
        }
    }
}

/// Observed container state, as fed to the suppression store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EntityState {
    Running,
    Paused,
    Failure(FailureState),
    /// Unrecognized; neither fires nor resets
    Other(String),
}

impl EntityState {
    pub const DOWN: EntityState = EntityState::Failure(FailureState::Down);
    pub const UNKNOWN: EntityState = EntityState::Failure(FailureState::Unknown);

    /// Parse a state string (trimmed, case-insensitive)
    pub fn parse(raw: &str) -> Self {
        let lowered = raw.trim().to_lowercase();
        match lowered.as_str() {
            "running" => EntityState::Running,
            "paused" => EntityState::Paused,
            "down" => EntityState::DOWN,
            "restarting" => EntityState::Failure(FailureState::Restarting),
            "exited" => EntityState::Failure(FailureState::Exited),
            "dead" => EntityState::Failure(FailureState::Dead),
            "unknown" => EntityState::UNKNOWN,
            "stopped" => EntityState::Failure(FailureState::Stopped),
            "created" => EntityState::Failure(FailureState::Created),
            _ => EntityState::Other(lowered),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EntityState::Running => "running",
            EntityState::Paused => "paused",
            EntityState::Failure(f) => f.as_str(),
            EntityState::Other(s) => s,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, EntityState::Failure(_))
    }
}

impl fmt::Display for EntityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for EntityState {
    fn from(raw: String) -> Self {
        EntityState::parse(&raw)
    }
}

impl From<EntityState> for String {
    fn from(state: EntityState) -> Self {
        state.as_str().to_string()
    }
}

/// Map an inventory status string onto a state.
///
/// Statuses outside the docker vocabulary count as `down`.
fn from_inventory_status(status: &str, health: Option<&str>) -> EntityState {
    let status = status.trim().to_lowercase();
    if status.is_empty() {
        return EntityState::UNKNOWN;
    }
    if status == "running" || status.starts_with("up") {
        if health.is_some_and(|h| h.eq_ignore_ascii_case("unhealthy")) {
            return EntityState::DOWN;
        }
        return EntityState::Running;
    }
    match EntityState::parse(&status) {
        EntityState::Other(_) => {
            if status.contains("paused") {
                EntityState::Paused
            } else {
                EntityState::DOWN
            }
        }
        known => known,
    }
}

/// Derive the state of a webhook-reported container.
///
/// A verified inventory answer wins. Otherwise the Grafana convention applies:
/// firing with value 0 is `down`, resolved with value 1 is `running`, and
/// anything else is `unknown`.
pub fn compute_state(
    verification: &VerificationResult,
    value: Option<f64>,
    alert_status: &str,
) -> EntityState {
    if let VerificationResult::Verified {
        running,
        status,
        health,
        ..
    } = verification
    {
        if *running {
            return from_inventory_status("running", health.as_deref());
        }
        let state = from_inventory_status(status, health.as_deref());
        // inventory said not running, never trust a "running" status text
        return match state {
            EntityState::Running => EntityState::DOWN,
            other => other,
        };
    }

    let status = alert_status.trim().to_lowercase();
    match value {
        Some(v) if status == "firing" && v == 0.0 => EntityState::DOWN,
        Some(v) if status == "resolved" && v == 1.0 => EntityState::Running,
        _ => EntityState::UNKNOWN,
    }
}
