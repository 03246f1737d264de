//! Inventory Monitor
//!
//! Polls every monitored scope, runs liveness through the hysteresis and
//! routes confirmed transitions through suppression and cooldown to the
//! notifier.

use alerting::{
    AlertCategory, AlertPhase, CooldownCache, Fingerprint, Notification, NotificationField,
    Notifier,
};
use inventory::{InventoryClient, InventoryError, ScopeMap, ScopeMetadata};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use suppression::{EntityKey, EntityState, NormalizedSet, SiblingLookup, SuppressionStore};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::classify::{Liveness, LivenessObservation};
use crate::hysteresis::{Hysteresis, Transition};

const DOWN_COLOR: u32 = 0xFF0000;
const UP_COLOR: u32 = 0x00FF00;

/// Which scopes are monitored when no explicit list is given
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeMode {
    /// Only scopes present in the scope map
    #[default]
    Map,
    All,
}

impl FromStr for ScopeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "map" => Ok(ScopeMode::Map),
            "all" => Ok(ScopeMode::All),
            other => Err(format!("unknown scope mode '{}'", other)),
        }
    }
}

/// Monitor configuration
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub interval: Duration,
    /// Explicit scope ids or names; overrides `scope_mode` when non-empty
    pub scopes: NormalizedSet,
    pub scope_mode: ScopeMode,
    pub down_confirmations: u32,
    pub cooldown_enabled: bool,
    /// Bound on every inventory and notifier call
    pub call_timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            scopes: NormalizedSet::new(),
            scope_mode: ScopeMode::Map,
            down_confirmations: 1,
            cooldown_enabled: true,
            call_timeout: Duration::from_secs(3),
        }
    }
}

/// Outcome of one polling cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub scopes_polled: usize,
    pub scopes_failed: usize,
    pub transitions: usize,
    pub notifications_sent: usize,
}

/// Polling reconciler over the inventory
pub struct InventoryMonitor {
    config: MonitorConfig,
    inventory: Arc<dyn InventoryClient>,
    notifier: Arc<dyn Notifier>,
    suppression: Arc<SuppressionStore>,
    cooldown: Arc<CooldownCache>,
    scope_map: Arc<ScopeMap>,
    hysteresis: Hysteresis,
}

impl InventoryMonitor {
    pub fn new(
        config: MonitorConfig,
        inventory: Arc<dyn InventoryClient>,
        notifier: Arc<dyn Notifier>,
        suppression: Arc<SuppressionStore>,
        cooldown: Arc<CooldownCache>,
        scope_map: Arc<ScopeMap>,
    ) -> Self {
        let hysteresis = Hysteresis::new(config.down_confirmations);
        Self {
            config,
            inventory,
            notifier,
            suppression,
            cooldown,
            scope_map,
            hysteresis,
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Poll until `shutdown` flips to true; checked between cycles only
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Inventory monitor started (interval {:?}, confirmations {})",
            self.config.interval,
            self.hysteresis.threshold()
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let report = self.run_cycle().await;
            debug!("Monitor cycle: {:?}", report);

            tokio::select! {
                _ = tokio::time::sleep(self.config.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Inventory monitor stopped");
    }

    /// One pass over all monitored scopes
    pub async fn run_cycle(&mut self) -> CycleReport {
        metrics::counter!("monitor_cycles_total").increment(1);
        let mut report = CycleReport::default();

        self.scope_map.maybe_reload();
        let scopes = match self.timed(self.inventory.list_scopes()).await {
            Ok(scopes) => scopes,
            Err(e) => {
                error!("Monitor could not list scopes: {}", e);
                metrics::counter!("monitor_scope_errors_total").increment(1);
                return report;
            }
        };

        for meta in scopes.values() {
            if !self.should_monitor(meta) {
                continue;
            }
            report.scopes_polled += 1;

            let records = match self.timed(self.inventory.list_entities(meta.id, true)).await {
                Ok(records) => records,
                Err(e) => {
                    warn!("Monitor skipped scope {} ({}): {}", meta.id, meta.display_name(), e);
                    metrics::counter!("monitor_scope_errors_total").increment(1);
                    report.scopes_failed += 1;
                    continue;
                }
            };

            let mut seen = HashSet::new();
            let observations: Vec<_> = records
                .iter()
                .filter(|r| !r.id.is_empty())
                .filter(|r| {
                    let fresh = seen.insert(r.id.clone());
                    if !fresh {
                        debug!("Duplicate entity {} in scope {}", r.short_id(), meta.id);
                    }
                    fresh
                })
                .map(|r| LivenessObservation::from_record(meta.id, r))
                .collect();

            let transitions = self.hysteresis.observe_scope(meta.id, observations);
            report.transitions += transitions.len();

            let scope_host = self.scope_host(meta);
            for (obs, transition) in transitions {
                if self.route(&scope_host, &obs, transition).await {
                    report.notifications_sent += 1;
                }
            }
        }

        report
    }

    fn should_monitor(&self, meta: &ScopeMetadata) -> bool {
        if !self.config.scopes.is_empty() {
            return self.config.scopes.contains(&meta.id.to_string())
                || self.config.scopes.contains(&meta.name);
        }
        match self.config.scope_mode {
            ScopeMode::All => true,
            ScopeMode::Map => {
                self.scope_map.contains_scope(meta.id) || self.scope_map.get(&meta.name).is_some()
            }
        }
    }

    /// Host used in keys and fingerprints for a scope
    fn scope_host(&self, meta: &ScopeMetadata) -> String {
        self.scope_map
            .host_for_scope(meta.id)
            .unwrap_or_else(|| meta.display_name().to_lowercase())
    }

    /// Gate one transition and deliver it; true when a notification went out
    async fn route(&self, scope_host: &str, obs: &LivenessObservation, transition: Transition) -> bool {
        let key = EntityKey::by_id(Some(scope_host), &obs.entity_id);
        let state = match transition {
            Transition::Recovered => EntityState::Running,
            Transition::WentDown if obs.liveness == Liveness::Paused => EntityState::Paused,
            Transition::WentDown => EntityState::DOWN,
        };

        let sibling = SiblingLookup::new(self.inventory.as_ref(), obs.scope)
            .with_timeout(self.config.call_timeout);
        let decision = self
            .suppression
            .should_send(&key, &state, &obs.name, Some(&sibling))
            .await;
        if !decision.send {
            debug!("Monitor held {} ({}): {}", obs.name, key, decision.reason);
            metrics::counter!("alerts_suppressed_total", "gate" => "suppression").increment(1);
            return false;
        }

        let phase = match transition {
            Transition::WentDown => AlertPhase::Firing,
            Transition::Recovered => AlertPhase::Resolved,
        };
        if self.config.cooldown_enabled && !self.suppression.is_always_notify(&obs.name) {
            let fp = Fingerprint::new(AlertCategory::Container, scope_host, Some(&obs.name), phase);
            if !self.cooldown.check_and_touch(fp) {
                debug!("Monitor alert for {} within cooldown", obs.name);
                metrics::counter!("alerts_suppressed_total", "gate" => "cooldown").increment(1);
                return false;
            }
        }

        let notification = build_notification(scope_host, obs, transition);
        match tokio::time::timeout(self.config.call_timeout, self.notifier.send(&notification)).await {
            Ok(Ok(receipt)) => {
                info!(
                    "Monitor sent {:?} for {} on {} (status {})",
                    transition, obs.name, scope_host, receipt.status
                );
                metrics::counter!("alerts_sent_total", "source" => "monitor").increment(1);
                true
            }
            Ok(Err(e)) => {
                warn!("Monitor failed to deliver alert for {}: {}", obs.name, e);
                false
            }
            Err(_) => {
                warn!("Monitor delivery for {} timed out", obs.name);
                false
            }
        }
    }

    async fn timed<T, F>(&self, call: F) -> Result<T, InventoryError>
    where
        F: std::future::Future<Output = Result<T, InventoryError>>,
    {
        tokio::time::timeout(self.config.call_timeout, call)
            .await
            .map_err(|_| InventoryError::Timeout(self.config.call_timeout))?
    }
}

fn build_notification(
    scope_host: &str,
    obs: &LivenessObservation,
    transition: Transition,
) -> Notification {
    let (content, color, status) = match transition {
        Transition::WentDown => (
            format!("🔴 **Container DOWN**: `{}` on {}", obs.name, scope_host),
            DOWN_COLOR,
            format!("🔴 state `{}`", obs.state),
        ),
        Transition::Recovered => (
            format!("🟢 **Container UP**: `{}` on {}", obs.name, scope_host),
            UP_COLOR,
            "🟢 running".to_string(),
        ),
    };

    Notification::new(content)
        .with_color(color)
        .with_field(NotificationField::new("Container", format!("`{}`", obs.name)))
        .with_field(NotificationField::new("Host", scope_host))
        .with_field(NotificationField::new("Status", status))
        .with_field(NotificationField::new(
            "ID",
            format!("`{}`", inventory::short_id(&obs.entity_id)),
        ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alerting::RecordingNotifier;
    use inventory::{EntityRecord, MockInventory};
    use suppression::SuppressionConfig;

    struct Harness {
        inventory: Arc<MockInventory>,
        notifier: Arc<RecordingNotifier>,
        suppression: Arc<SuppressionStore>,
        monitor: InventoryMonitor,
    }

    fn harness(config: MonitorConfig, suppression: SuppressionConfig) -> Harness {
        let inventory = Arc::new(MockInventory::new().with_scope(1, "prod").with_scope(2, "staging"));
        let notifier = Arc::new(RecordingNotifier::new());
        let suppression = Arc::new(SuppressionStore::in_memory(suppression));
        let monitor = InventoryMonitor::new(
            config,
            inventory.clone(),
            notifier.clone(),
            suppression.clone(),
            Arc::new(CooldownCache::new(Duration::from_secs(3600), 100)),
            Arc::new(ScopeMap::from_entries([("192.168.1.10", 1)])),
        );
        Harness {
            inventory,
            notifier,
            suppression,
            monitor,
        }
    }

    fn running(id: &str, name: &str) -> EntityRecord {
        EntityRecord::new(id, name, "running", "Up 1 hour")
    }

    fn exited(id: &str, name: &str) -> EntityRecord {
        EntityRecord::new(id, name, "exited", "Exited (1) 5 seconds ago")
    }

    #[tokio::test]
    async fn test_down_and_recovery_notifications() {
        let mut h = harness(MonitorConfig::default(), SuppressionConfig::default());
        h.inventory.set_entities(1, vec![running("abc123", "api")]);
        let report = h.monitor.run_cycle().await;
        assert_eq!(report.scopes_polled, 1);
        assert_eq!(report.notifications_sent, 0);

        h.inventory.set_entities(1, vec![exited("abc123", "api")]);
        let report = h.monitor.run_cycle().await;
        assert_eq!(report.transitions, 1);
        assert_eq!(report.notifications_sent, 1);
        let sent = h.notifier.sent();
        assert!(sent[0].content.contains("DOWN"));
        assert!(sent[0].content.contains("192.168.1.10"));

        // still down: suppression holds the repeat
        let report = h.monitor.run_cycle().await;
        assert_eq!(report.transitions, 1);
        assert_eq!(report.notifications_sent, 0);

        // recovery resets suppression without a notification
        h.inventory.set_entities(1, vec![running("abc123", "api")]);
        let report = h.monitor.run_cycle().await;
        assert_eq!(report.transitions, 1);
        assert_eq!(report.notifications_sent, 0);
        let key = EntityKey::by_id(Some("192.168.1.10"), "abc123");
        assert!(!h.suppression.entry(&key).unwrap().suppressed);
    }

    #[tokio::test]
    async fn test_always_notify_gets_recovery() {
        let mut h = harness(
            MonitorConfig::default(),
            SuppressionConfig {
                always_notify: NormalizedSet::from_csv("api"),
                ..Default::default()
            },
        );
        h.inventory.set_entities(1, vec![running("abc123", "api")]);
        h.monitor.run_cycle().await;
        h.inventory.set_entities(1, vec![exited("abc123", "api")]);
        h.monitor.run_cycle().await;
        h.inventory.set_entities(1, vec![running("abc123", "api")]);
        h.monitor.run_cycle().await;

        let sent = h.notifier.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent[1].content.contains("UP"));
        assert_eq!(sent[1].color, Some(UP_COLOR));
    }

    #[tokio::test]
    async fn test_confirmations_then_running_emits_nothing() {
        let mut h = harness(
            MonitorConfig {
                down_confirmations: 3,
                ..Default::default()
            },
            SuppressionConfig::default(),
        );
        h.inventory.set_entities(1, vec![running("abc123", "api")]);
        h.monitor.run_cycle().await;
        for _ in 0..2 {
            h.inventory.set_entities(1, vec![exited("abc123", "api")]);
            assert_eq!(h.monitor.run_cycle().await.transitions, 0);
        }
        h.inventory.set_entities(1, vec![running("abc123", "api")]);
        assert_eq!(h.monitor.run_cycle().await.transitions, 0);
        assert_eq!(h.notifier.count(), 0);
    }

    fn paused(id: &str, name: &str) -> EntityRecord {
        EntityRecord::new(id, name, "paused", "Up 1 hour (Paused)")
    }

    #[tokio::test]
    async fn test_paused_is_never_a_failure() {
        let mut h = harness(MonitorConfig::default(), SuppressionConfig::default());
        h.inventory.set_entities(1, vec![running("abc123", "batch")]);
        h.monitor.run_cycle().await;

        h.inventory.set_entities(1, vec![paused("abc123", "batch")]);
        let report = h.monitor.run_cycle().await;
        assert_eq!(report.transitions, 1);
        assert_eq!(report.notifications_sent, 0);
        assert_eq!(h.notifier.count(), 0);

        let key = EntityKey::by_id(Some("192.168.1.10"), "abc123");
        let entry = h.suppression.entry(&key).unwrap();
        assert_eq!(entry.last_state, EntityState::Paused);
        assert!(!entry.suppressed);
    }

    #[tokio::test]
    async fn test_paused_allowlisted_is_held() {
        let mut h = harness(
            MonitorConfig::default(),
            SuppressionConfig {
                paused_allowlist: NormalizedSet::from_csv("batch"),
                ..Default::default()
            },
        );
        h.inventory.set_entities(1, vec![running("abc123", "batch")]);
        h.monitor.run_cycle().await;

        h.inventory.set_entities(1, vec![paused("abc123", "batch")]);
        let report = h.monitor.run_cycle().await;
        assert_eq!(report.transitions, 1);
        assert_eq!(report.notifications_sent, 0);

        let key = EntityKey::by_id(Some("192.168.1.10"), "abc123");
        let entry = h.suppression.entry(&key).unwrap();
        assert_eq!(entry.last_state, EntityState::Paused);
        assert!(!entry.suppressed);

        // a later real outage still alerts
        h.inventory.set_entities(1, vec![exited("abc123", "batch")]);
        assert_eq!(h.monitor.run_cycle().await.notifications_sent, 1);
    }

    #[tokio::test]
    async fn test_scope_failure_is_isolated() {
        let mut h = harness(
            MonitorConfig {
                scope_mode: ScopeMode::All,
                ..Default::default()
            },
            SuppressionConfig::default(),
        );
        h.inventory.set_entities(1, vec![running("a1", "api")]);
        h.inventory.set_entities(2, vec![running("b1", "worker")]);
        h.monitor.run_cycle().await;

        h.inventory.fail_scope(1, true);
        h.inventory.set_entities(2, vec![exited("b1", "worker")]);
        let report = h.monitor.run_cycle().await;
        assert_eq!(report.scopes_polled, 2);
        assert_eq!(report.scopes_failed, 1);
        assert_eq!(report.notifications_sent, 1);
        // scope 1 snapshot untouched
        assert_eq!(h.monitor.hysteresis.previous(1, "a1"), Some(true));

        h.inventory.fail_scope_listing(true);
        assert_eq!(h.monitor.run_cycle().await, CycleReport::default());
    }

    #[tokio::test]
    async fn test_scope_selection() {
        let mut h = harness(MonitorConfig::default(), SuppressionConfig::default());
        h.inventory.set_entities(2, vec![exited("b1", "worker")]);
        let report = h.monitor.run_cycle().await;
        assert_eq!(report.scopes_polled, 1);
        assert_eq!(report.transitions, 0);

        let mut h = harness(
            MonitorConfig {
                scopes: NormalizedSet::from_csv("Staging"),
                ..Default::default()
            },
            SuppressionConfig::default(),
        );
        h.inventory.set_entities(2, vec![exited("b1", "worker")]);
        let report = h.monitor.run_cycle().await;
        assert_eq!(report.scopes_polled, 1);
        assert_eq!(report.notifications_sent, 1);
        assert!(h.notifier.sent()[0].content.contains("staging"));
    }

    #[tokio::test]
    async fn test_blue_green_sibling_holds_alert() {
        let mut h = harness(MonitorConfig::default(), SuppressionConfig::default());
        h.inventory.set_entities(
            1,
            vec![running("b1", "app-blue"), running("g1", "app-green")],
        );
        h.monitor.run_cycle().await;

        h.inventory.set_entities(
            1,
            vec![exited("b1", "app-blue"), running("g1", "app-green")],
        );
        let report = h.monitor.run_cycle().await;
        assert_eq!(report.transitions, 1);
        assert_eq!(report.notifications_sent, 0);
    }

    #[tokio::test]
    async fn test_duplicates_and_vanished_entities() {
        let mut h = harness(MonitorConfig::default(), SuppressionConfig::default());
        h.inventory.set_entities(
            1,
            vec![running("abc123", "api"), running("abc123", "api"), running("def456", "db")],
        );
        assert_eq!(h.monitor.run_cycle().await.transitions, 0);

        h.inventory.set_entities(1, vec![running("def456", "db")]);
        let report = h.monitor.run_cycle().await;
        assert_eq!(report.transitions, 1);
        assert_eq!(report.notifications_sent, 1);
        assert!(h.notifier.sent()[0].content.contains("container-abc123"));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let h = harness(
            MonitorConfig {
                interval: Duration::from_millis(10),
                ..Default::default()
            },
            SuppressionConfig::default(),
        );
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(h.monitor.run(rx));
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(h.inventory.list_calls() >= 1);
    }

    #[test]
    fn test_scope_mode_parse() {
        assert_eq!("ALL".parse::<ScopeMode>().unwrap(), ScopeMode::All);
        assert_eq!(" map ".parse::<ScopeMode>().unwrap(), ScopeMode::Map);
        assert!("some".parse::<ScopeMode>().is_err());
    }
}
