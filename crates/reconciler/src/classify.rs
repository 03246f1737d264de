//! Liveness classification of inventory records

use inventory::{EntityRecord, ScopeId};

const DOWN_MARKERS: [&str; 6] = ["missing", "exited", "dead", "created", "stopped", "removing"];

/// Coarse liveness of one container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Running,
    Paused,
    Down,
}

impl Liveness {
    pub fn is_running(self) -> bool {
        self == Liveness::Running
    }
}

/// Classify from the inventory's `State` and `Status` texts
pub fn classify(state: &str, status: &str) -> Liveness {
    let state = state.trim().to_lowercase();
    let status = status.trim().to_lowercase();
    let combined = format!("{} {}", state, status);

    if combined.contains("paused") {
        return Liveness::Paused;
    }
    if DOWN_MARKERS.iter().any(|m| combined.contains(m)) {
        return Liveness::Down;
    }
    if state == "running" || status.starts_with("up") {
        Liveness::Running
    } else {
        Liveness::Down
    }
}

/// One cycle's view of one container
#[derive(Debug, Clone, PartialEq)]
pub struct LivenessObservation {
    pub scope: ScopeId,
    pub entity_id: String,
    pub name: String,
    pub state: String,
    pub liveness: Liveness,
}

impl LivenessObservation {
    pub fn from_record(scope: ScopeId, record: &EntityRecord) -> Self {
        Self {
            scope,
            entity_id: record.id.clone(),
            name: record.display_name(),
            state: record.state.to_lowercase(),
            liveness: classify(&record.state, &record.status),
        }
    }

    /// Synthetic observation for a container that vanished from the listing
    pub fn missing(scope: ScopeId, entity_id: &str) -> Self {
        let record = EntityRecord {
            id: entity_id.to_string(),
            ..Default::default()
        };
        Self {
            scope,
            entity_id: entity_id.to_string(),
            name: record.display_name(),
            state: "missing".to_string(),
            liveness: Liveness::Down,
        }
    }

    pub fn is_running(&self) -> bool {
        self.liveness.is_running()
    }
}
