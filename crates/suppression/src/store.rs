//! Suppression State Store
//!
//! One alert per outage: the first failure after `running` sends, repeats are
//! held back until the container is seen running again. Webhook handlers and
//! the inventory monitor share one store through an `Arc`.

use chrono::Utc;
use inventory::FailPolicy;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::key::EntityKey;
use crate::normalized::NormalizedSet;
use crate::pairing::{extract_paired_base, SiblingLookup};
use crate::persist::{PersistedEntry, StateFile};
use crate::state::EntityState;

/// Default location of the persisted state
pub const DEFAULT_STATE_FILE: &str = "/tmp/proxy-alertmanager-suppression-state.json";

/// Suppression configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuppressionConfig {
    pub enabled: bool,
    /// Entries idle longer than this are dropped
    pub ttl_seconds: u64,
    pub persist: bool,
    pub state_file: PathBuf,
    pub paused_allowlist: NormalizedSet,
    pub always_notify: NormalizedSet,
    pub ignore: NormalizedSet,
    pub blue_green_enabled: bool,
    /// Applies when a sibling lookup fails
    pub fail_policy: FailPolicy,
}

impl Default for SuppressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_seconds: 86_400,
            persist: true,
            state_file: PathBuf::from(DEFAULT_STATE_FILE),
            paused_allowlist: NormalizedSet::new(),
            always_notify: NormalizedSet::new(),
            ignore: NormalizedSet::new(),
            blue_green_enabled: true,
            fail_policy: FailPolicy::Open,
        }
    }
}

impl SuppressionConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

/// Per-entity suppression record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuppressionEntry {
    pub suppressed: bool,
    pub last_state: EntityState,
    /// Epoch seconds
    pub last_seen: i64,
}

/// Why a decision was taken
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuppressionReason {
    FeatureDisabled,
    CompletelyIgnored,
    AlwaysNotifyAllowlisted,
    PausedAllowlisted,
    ResetOnRunning,
    BlueGreenSiblingActive(String),
    InventoryUnreachable,
    AlreadySuppressedUntilRunning,
    FirstFailureSinceRunning,
    NonFailureState,
}

impl fmt::Display for SuppressionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SuppressionReason::FeatureDisabled => f.write_str("feature_disabled"),
            SuppressionReason::CompletelyIgnored => f.write_str("completely_ignored"),
            SuppressionReason::AlwaysNotifyAllowlisted => f.write_str("always_notify_allowlisted"),
            SuppressionReason::PausedAllowlisted => f.write_str("paused_allowlisted"),
            SuppressionReason::ResetOnRunning => f.write_str("reset_on_running"),
            SuppressionReason::BlueGreenSiblingActive(sibling) => {
                write!(f, "blue_green_sibling_active:{}", sibling)
            }
            SuppressionReason::InventoryUnreachable => f.write_str("inventory_unreachable"),
            SuppressionReason::AlreadySuppressedUntilRunning => {
                f.write_str("already_suppressed_until_running")
            }
            SuppressionReason::FirstFailureSinceRunning => {
                f.write_str("first_failure_since_running")
            }
            SuppressionReason::NonFailureState => f.write_str("non_failure_state"),
        }
    }
}

/// Outcome of `should_send`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub send: bool,
    pub reason: SuppressionReason,
}

impl Decision {
    fn send(reason: SuppressionReason) -> Self {
        Self { send: true, reason }
    }

    fn hold(reason: SuppressionReason) -> Self {
        Self {
            send: false,
            reason,
        }
    }
}

/// Result of the sibling pre-check, computed before the lock is taken
enum SiblingCheck {
    NotApplicable,
    Active(String),
    Unreachable,
}

struct Inner {
    entries: HashMap<EntityKey, SuppressionEntry>,
    version: u64,
}

/// Shared suppression state
pub struct SuppressionStore {
    config: SuppressionConfig,
    inner: Mutex<Inner>,
    file: Option<StateFile>,
}

impl SuppressionStore {
    /// Create a store, reloading persisted state when persistence is on
    pub fn new(config: SuppressionConfig) -> Self {
        let file = config
            .persist
            .then(|| StateFile::new(config.state_file.clone()));
        let entries = match &file {
            Some(file) => load_entries(file, config.ttl_seconds, Utc::now().timestamp()),
            None => HashMap::new(),
        };

        Self {
            config,
            inner: Mutex::new(Inner {
                entries,
                version: 0,
            }),
            file,
        }
    }

    /// Store without persistence
    pub fn in_memory(mut config: SuppressionConfig) -> Self {
        config.persist = false;
        Self::new(config)
    }

    pub fn config(&self) -> &SuppressionConfig {
        &self.config
    }

    pub fn is_always_notify(&self, name: &str) -> bool {
        self.config.always_notify.contains(name)
    }

    pub fn is_paused_allowlisted(&self, name: &str) -> bool {
        self.config.paused_allowlist.contains(name)
    }

    pub fn is_ignored(&self, name: &str) -> bool {
        self.config.ignore.contains(name)
    }

    /// Current record for a key
    pub fn entry(&self, key: &EntityKey) -> Option<SuppressionEntry> {
        self.lock().entries.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decide whether an alert for `key` in `state` goes out
    pub async fn should_send(
        &self,
        key: &EntityKey,
        state: &EntityState,
        entity_name: &str,
        sibling: Option<&SiblingLookup<'_>>,
    ) -> Decision {
        self.should_send_at(key, state, entity_name, sibling, Utc::now().timestamp())
            .await
    }

    /// Like `should_send` with an explicit clock (epoch seconds)
    pub async fn should_send_at(
        &self,
        key: &EntityKey,
        state: &EntityState,
        entity_name: &str,
        sibling: Option<&SiblingLookup<'_>>,
        now: i64,
    ) -> Decision {
        if !self.config.enabled {
            return Decision::send(SuppressionReason::FeatureDisabled);
        }

        let sibling_check = if state.is_failure() && !self.bypasses(entity_name) {
            self.check_sibling(entity_name, sibling).await
        } else {
            SiblingCheck::NotApplicable
        };

        let (decision, snapshot) = {
            let mut inner = self.lock();
            self.purge_expired(&mut inner, now);
            let decision = self.decide(&mut inner, key, state, entity_name, sibling_check, now);
            inner.version += 1;
            let snapshot = self
                .file
                .as_ref()
                .map(|_| (inner.version, snapshot_of(&inner.entries)));
            (decision, snapshot)
        };

        debug!(
            "Suppression decision for {} ({}): state={} send={} reason={}",
            key, entity_name, state, decision.send, decision.reason
        );

        if let (Some(file), Some((version, snapshot))) = (&self.file, snapshot) {
            if let Err(e) = file.save(version, &snapshot) {
                warn!("Failed to persist suppression state: {}", e);
            }
        }

        decision
    }

    fn bypasses(&self, name: &str) -> bool {
        self.is_ignored(name) || self.is_always_notify(name)
    }

    async fn check_sibling(&self, name: &str, sibling: Option<&SiblingLookup<'_>>) -> SiblingCheck {
        if !self.config.blue_green_enabled {
            return SiblingCheck::NotApplicable;
        }
        let (Some(lookup), Some(paired)) = (sibling, extract_paired_base(name)) else {
            return SiblingCheck::NotApplicable;
        };

        let sibling_name = paired.sibling_name();
        match lookup.is_running(&sibling_name).await {
            Ok(true) => SiblingCheck::Active(sibling_name),
            Ok(false) => SiblingCheck::NotApplicable,
            Err(e) => match self.config.fail_policy {
                FailPolicy::Open => {
                    warn!("Sibling lookup for {} failed, proceeding: {}", name, e);
                    SiblingCheck::NotApplicable
                }
                FailPolicy::Closed => {
                    warn!("Sibling lookup for {} failed, holding alert: {}", name, e);
                    SiblingCheck::Unreachable
                }
            },
        }
    }

    fn decide(
        &self,
        inner: &mut Inner,
        key: &EntityKey,
        state: &EntityState,
        name: &str,
        sibling_check: SiblingCheck,
        now: i64,
    ) -> Decision {
        let entry = inner
            .entries
            .entry(key.clone())
            .or_insert_with(|| SuppressionEntry {
                suppressed: false,
                last_state: state.clone(),
                last_seen: now,
            });
        entry.last_state = state.clone();
        entry.last_seen = now;

        if self.is_ignored(name) {
            return Decision::hold(SuppressionReason::CompletelyIgnored);
        }
        if self.is_always_notify(name) {
            return Decision::send(SuppressionReason::AlwaysNotifyAllowlisted);
        }

        match state {
            EntityState::Paused if self.is_paused_allowlisted(name) => {
                Decision::hold(SuppressionReason::PausedAllowlisted)
            }
            EntityState::Running => {
                entry.suppressed = false;
                Decision::hold(SuppressionReason::ResetOnRunning)
            }
            EntityState::Failure(_) => match sibling_check {
                SiblingCheck::Active(sibling) => {
                    entry.suppressed = false;
                    Decision::hold(SuppressionReason::BlueGreenSiblingActive(sibling))
                }
                SiblingCheck::Unreachable => Decision::hold(SuppressionReason::InventoryUnreachable),
                SiblingCheck::NotApplicable if entry.suppressed => {
                    Decision::hold(SuppressionReason::AlreadySuppressedUntilRunning)
                }
                SiblingCheck::NotApplicable => {
                    entry.suppressed = true;
                    Decision::send(SuppressionReason::FirstFailureSinceRunning)
                }
            },
            _ => Decision::hold(SuppressionReason::NonFailureState),
        }
    }

    fn purge_expired(&self, inner: &mut Inner, now: i64) {
        let ttl = self.config.ttl_seconds as i64;
        let before = inner.entries.len();
        inner.entries.retain(|_, e| now - e.last_seen <= ttl);
        let purged = before - inner.entries.len();
        if purged > 0 {
            debug!("Purged {} expired suppression entries", purged);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn snapshot_of(entries: &HashMap<EntityKey, SuppressionEntry>) -> BTreeMap<String, PersistedEntry> {
    entries
        .iter()
        .map(|(key, e)| {
            (
                key.to_string(),
                PersistedEntry {
                    suppressed: e.suppressed,
                    last_state: e.last_state.to_string(),
                    last_seen: e.last_seen,
                },
            )
        })
        .collect()
}

fn load_entries(file: &StateFile, ttl_seconds: u64, now: i64) -> HashMap<EntityKey, SuppressionEntry> {
    let raw = match file.load() {
        Ok(raw) => raw,
        Err(e) => {
            warn!(
                "Ignoring suppression state at {}: {}",
                file.path().display(),
                e
            );
            return HashMap::new();
        }
    };

    let ttl = ttl_seconds as i64;
    let total = raw.len();
    let entries: HashMap<_, _> = raw
        .into_iter()
        .filter(|(_, e)| now - e.last_seen <= ttl)
        .filter_map(|(key, e)| {
            let key = key
                .parse::<EntityKey>()
                .map_err(|err| warn!("Skipping persisted entry: {}", err))
                .ok()?;
            Some((
                key,
                SuppressionEntry {
                    suppressed: e.suppressed,
                    last_state: EntityState::parse(&e.last_state),
                    last_seen: e.last_seen,
                },
            ))
        })
        .collect();

    info!(
        "Loaded {} of {} suppression entries from {}",
        entries.len(),
        total,
        file.path().display()
    );
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::FailureState;
    use inventory::{EntityRecord, MockInventory};
    use proptest::prelude::*;

    const NOW: i64 = 1_700_000_000;

    fn store() -> SuppressionStore {
        SuppressionStore::in_memory(SuppressionConfig::default())
    }

    fn key(name: &str) -> EntityKey {
        EntityKey::by_name(Some("10.0.0.1"), Some(name))
    }

    async fn decide(store: &SuppressionStore, name: &str, state: &str) -> Decision {
        store
            .should_send_at(&key(name), &EntityState::parse(state), name, None, NOW)
            .await
    }

    fn reason(d: &Decision) -> String {
        d.reason.to_string()
    }

    #[tokio::test]
    async fn test_one_alert_per_outage() {
        let store = store();

        let first = decide(&store, "web", "down").await;
        assert!(first.send);
        assert_eq!(reason(&first), "first_failure_since_running");

        let repeat = decide(&store, "web", "exited").await;
        assert!(!repeat.send);
        assert_eq!(reason(&repeat), "already_suppressed_until_running");

        let running = decide(&store, "web", "running").await;
        assert!(!running.send);
        assert_eq!(reason(&running), "reset_on_running");
        assert!(!store.entry(&key("web")).unwrap().suppressed);

        assert!(decide(&store, "web", "dead").await.send);
    }

    #[tokio::test]
    async fn test_disabled_always_sends() {
        let store = SuppressionStore::in_memory(SuppressionConfig {
            enabled: false,
            ..Default::default()
        });
        for _ in 0..3 {
            let d = decide(&store, "web", "down").await;
            assert!(d.send);
            assert_eq!(reason(&d), "feature_disabled");
        }
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_allowlists() {
        let store = SuppressionStore::in_memory(SuppressionConfig {
            paused_allowlist: NormalizedSet::from_csv("batch"),
            always_notify: NormalizedSet::from_csv("Critical-DB"),
            ignore: NormalizedSet::from_csv("/noisy"),
            ..Default::default()
        });

        let ignored = decide(&store, "noisy", "down").await;
        assert!(!ignored.send);
        assert_eq!(reason(&ignored), "completely_ignored");

        for _ in 0..2 {
            let d = decide(&store, "critical-db", "down").await;
            assert!(d.send);
            assert_eq!(reason(&d), "always_notify_allowlisted");
        }

        let paused = decide(&store, "batch", "paused").await;
        assert!(!paused.send);
        assert_eq!(reason(&paused), "paused_allowlisted");
        let entry = store.entry(&key("batch")).unwrap();
        assert_eq!(entry.last_state, EntityState::Paused);
        assert!(!entry.suppressed);

        let other = decide(&store, "web", "paused").await;
        assert_eq!(reason(&other), "non_failure_state");
        let other = decide(&store, "web", "migrating").await;
        assert!(!other.send);
        assert_eq!(reason(&other), "non_failure_state");
    }

    #[tokio::test]
    async fn test_blue_green_sibling_active() {
        let mock = MockInventory::new().with_scope(15, "prod");
        mock.set_entities(
            15,
            vec![
                EntityRecord::new("b1", "app-blue", "exited", "Exited (1)"),
                EntityRecord::new("g1", "app-green", "running", "Up 2 hours"),
            ],
        );
        let lookup = SiblingLookup::new(&mock, 15);
        let store = store();

        let d = store
            .should_send_at(&key("app-blue"), &EntityState::DOWN, "app-blue", Some(&lookup), NOW)
            .await;
        assert_eq!(
            (d.send, reason(&d).as_str()),
            (false, "blue_green_sibling_active:app-green")
        );
        assert!(!store.entry(&key("app-blue")).unwrap().suppressed);
    }

    #[tokio::test]
    async fn test_blue_green_both_down() {
        let mock = MockInventory::new().with_scope(15, "prod");
        mock.set_entities(
            15,
            vec![
                EntityRecord::new("b1", "app-blue", "exited", "Exited (1)"),
                EntityRecord::new("g1", "app-green", "exited", "Exited (1)"),
            ],
        );
        let lookup = SiblingLookup::new(&mock, 15);
        let store = store();

        for name in ["app-blue", "app-green"] {
            let d = store
                .should_send_at(&key(name), &EntityState::DOWN, name, Some(&lookup), NOW)
                .await;
            assert_eq!((d.send, reason(&d).as_str()), (true, "first_failure_since_running"));
        }
    }

    #[tokio::test]
    async fn test_sibling_lookup_failure_policy() {
        let mock = MockInventory::new().with_scope(15, "prod");
        mock.fail_scope(15, true);
        let lookup = SiblingLookup::new(&mock, 15);

        let open = store();
        let d = open
            .should_send_at(&key("app-blue"), &EntityState::DOWN, "app-blue", Some(&lookup), NOW)
            .await;
        assert!(d.send);

        let closed = SuppressionStore::in_memory(SuppressionConfig {
            fail_policy: FailPolicy::Closed,
            ..Default::default()
        });
        let d = closed
            .should_send_at(&key("app-blue"), &EntityState::DOWN, "app-blue", Some(&lookup), NOW)
            .await;
        assert!(!d.send);
        assert_eq!(reason(&d), "inventory_unreachable");
        let entry = closed.entry(&key("app-blue")).unwrap();
        assert!(!entry.suppressed);
        assert_eq!(entry.last_state, EntityState::DOWN);
    }

    #[tokio::test]
    async fn test_blue_green_disabled_skips_lookup() {
        let mock = MockInventory::new().with_scope(15, "prod");
        let lookup = SiblingLookup::new(&mock, 15);
        let store = SuppressionStore::in_memory(SuppressionConfig {
            blue_green_enabled: false,
            ..Default::default()
        });
        store
            .should_send_at(&key("app-blue"), &EntityState::DOWN, "app-blue", Some(&lookup), NOW)
            .await;
        assert_eq!(mock.list_calls(), 0);
    }

    #[tokio::test]
    async fn test_ttl_expiry_rearms() {
        let store = SuppressionStore::in_memory(SuppressionConfig {
            ttl_seconds: 60,
            ..Default::default()
        });
        let k = key("web");
        let down = EntityState::Failure(FailureState::Exited);

        assert!(store.should_send_at(&k, &down, "web", None, NOW).await.send);
        assert!(!store.should_send_at(&k, &down, "web", None, NOW + 60).await.send);
        assert!(store.should_send_at(&k, &down, "web", None, NOW + 121).await.send);
    }

    #[tokio::test]
    async fn test_reload_keeps_suppression() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let now = Utc::now().timestamp();
        let k = EntityKey::by_id(Some("192.168.1.100"), "abc123");
        let stale = EntityKey::by_id(Some("192.168.1.100"), "old");

        let mut persisted = BTreeMap::new();
        persisted.insert(
            k.to_string(),
            PersistedEntry {
                suppressed: true,
                last_state: "down".to_string(),
                last_seen: now - 1,
            },
        );
        persisted.insert(
            stale.to_string(),
            PersistedEntry {
                suppressed: true,
                last_state: "down".to_string(),
                last_seen: now - 7200,
            },
        );
        std::fs::write(&path, serde_json::to_string(&persisted).unwrap()).unwrap();

        let config = SuppressionConfig {
            ttl_seconds: 3600,
            state_file: path.clone(),
            ..Default::default()
        };
        let store = SuppressionStore::new(config.clone());
        assert_eq!(store.len(), 1);

        let d = store.should_send(&k, &EntityState::DOWN, "api", None).await;
        assert!(!d.send);
        assert_eq!(reason(&d), "already_suppressed_until_running");

        store.should_send(&k, &EntityState::Running, "api", None).await;
        let reloaded = SuppressionStore::new(config);
        assert!(!reloaded.entry(&k).unwrap().suppressed);
    }

    #[tokio::test]
    async fn test_unwritable_state_file_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();

        let store = SuppressionStore::new(SuppressionConfig {
            state_file: blocker.join("state.json"),
            ..Default::default()
        });
        assert!(decide(&store, "web", "down").await.send);
        assert!(!decide(&store, "web", "down").await.send);
    }

    fn failure_state() -> impl Strategy<Value = EntityState> {
        prop_oneof![
            Just("down"),
            Just("restarting"),
            Just("exited"),
            Just("dead"),
            Just("unknown"),
            Just("stopped"),
            Just("created"),
        ]
        .prop_map(EntityState::parse)
    }

    proptest! {
        #[test]
        fn prop_first_failure_after_running_sends_once(
            failures in proptest::collection::vec(failure_state(), 1..12)
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            runtime.block_on(async {
                let store = store();
                let k = key("svc");
                store.should_send_at(&k, &EntityState::Running, "svc", None, NOW).await;

                let mut sent = Vec::new();
                for state in &failures {
                    sent.push(store.should_send_at(&k, state, "svc", None, NOW).await.send);
                }
                prop_assert!(sent[0]);
                prop_assert!(sent[1..].iter().all(|s| !s));
                Ok(())
            })?;
        }
    }
}
