//! Down/up hysteresis
//!
//! A container has to be seen not running for `threshold` consecutive cycles
//! before it is reported down; a single running observation after a confirmed
//! outage reports the recovery.

use inventory::ScopeId;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

use crate::classify::LivenessObservation;

/// Consecutive observation counters of one container
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransitionCounter {
    pub running: u32,
    pub down: u32,
}

/// Emitted state change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    WentDown,
    Recovered,
}

type EntityRef = (ScopeId, String);

/// Counters and last-cycle snapshots, per scope
#[derive(Debug)]
pub struct Hysteresis {
    threshold: u32,
    counters: HashMap<EntityRef, TransitionCounter>,
    /// Entities whose outage reached the threshold
    confirmed_down: HashSet<EntityRef>,
    previous: HashMap<ScopeId, BTreeMap<String, bool>>,
}

impl Hysteresis {
    /// `threshold` is clamped to at least 1
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            counters: HashMap::new(),
            confirmed_down: HashSet::new(),
            previous: HashMap::new(),
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn counter(&self, scope: ScopeId, entity_id: &str) -> Option<TransitionCounter> {
        self.counters.get(&(scope, entity_id.to_string())).copied()
    }

    /// Previous-cycle running flag of a container
    pub fn previous(&self, scope: ScopeId, entity_id: &str) -> Option<bool> {
        self.previous.get(&scope)?.get(entity_id).copied()
    }

    /// Feed one scope's deduplicated observations, returning the transitions
    pub fn observe_scope(
        &mut self,
        scope: ScopeId,
        observations: Vec<LivenessObservation>,
    ) -> Vec<(LivenessObservation, Transition)> {
        let previous = self.previous.remove(&scope).unwrap_or_default();
        let mut current = BTreeMap::new();
        let mut transitions = Vec::new();

        for obs in observations {
            let running = obs.is_running();
            let prev = previous.get(&obs.entity_id).copied();
            current.insert(obs.entity_id.clone(), running);
            if let Some(transition) = self.step(scope, &obs.entity_id, running, prev) {
                transitions.push((obs, transition));
            } else {
                debug!(
                    "No transition for {} in scope {} (running={}, prev={:?})",
                    obs.name, scope, running, prev
                );
            }
        }

        for (entity_id, was_running) in previous {
            if current.contains_key(&entity_id) {
                continue;
            }
            let key = (scope, entity_id.clone());
            let counter = self.counters.entry(key.clone()).or_default();
            counter.down += 1;
            if counter.down >= self.threshold {
                debug!("Entity {} vanished from scope {}", entity_id, scope);
                self.counters.remove(&key);
                self.confirmed_down.remove(&key);
                transitions.push((
                    LivenessObservation::missing(scope, &entity_id),
                    Transition::WentDown,
                ));
            } else {
                current.insert(entity_id, was_running);
            }
        }

        self.previous.insert(scope, current);
        transitions
    }

    fn step(
        &mut self,
        scope: ScopeId,
        entity_id: &str,
        running: bool,
        prev: Option<bool>,
    ) -> Option<Transition> {
        let key = (scope, entity_id.to_string());
        let counter = self.counters.entry(key.clone()).or_default();

        if running {
            counter.running += 1;
            counter.down = 0;
            let confirmed = self.confirmed_down.remove(&key);
            return (prev == Some(false) && confirmed).then_some(Transition::Recovered);
        }

        counter.down += 1;
        if counter.down >= self.threshold {
            self.confirmed_down.insert(key);
            Some(Transition::WentDown)
        } else {
            None
        }
    }
}
