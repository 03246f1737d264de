//! Alert Routes

use alerting::{
    AlertCategory, AlertPhase, Fingerprint, Notification, NotificationField, NotifyError,
};
use axum::{extract::State, http::StatusCode, Json};
use inventory::VerificationResult;
use serde::Serialize;
use std::sync::Arc;
use suppression::{compute_state, EntityKey, SiblingLookup};
use tracing::{debug, info, warn};

use crate::payload::{detect_category, GrafanaAlert, GrafanaPayload};
use crate::AppState;

const LOW_COLOR: u32 = 0xFFFF00;
const MEDIUM_COLOR: u32 = 0xFFA500;
const HIGH_COLOR: u32 = 0xFF0000;
const CONTAINER_UP_COLOR: u32 = 0x00FF00;
const RESOLVED_COLOR: u32 = 0x008000;

/// What happened to one alert of the payload
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertOutcome {
    pub alertname: String,
    pub category: String,
    pub sent: bool,
    pub reason: String,
}

/// Response for the alert endpoint
#[derive(Debug, Serialize)]
pub struct AlertResponse {
    pub received: usize,
    pub sent: usize,
    pub alerts: Vec<AlertOutcome>,
}

/// Receive a Grafana webhook
pub async fn post_alert(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<GrafanaPayload>,
) -> (StatusCode, Json<AlertResponse>) {
    if payload.alerts.is_empty() {
        let outcome = handle_legacy(&state, &payload).await;
        return respond(vec![outcome]);
    }

    let mut outcomes = Vec::with_capacity(payload.alerts.len());
    for alert in &payload.alerts {
        outcomes.push(handle_alert(&state, alert, &payload.status).await);
    }
    respond(outcomes)
}

fn respond(alerts: Vec<AlertOutcome>) -> (StatusCode, Json<AlertResponse>) {
    let sent = alerts.iter().filter(|a| a.sent).count();
    (
        StatusCode::OK,
        Json(AlertResponse {
            received: alerts.len(),
            sent,
            alerts,
        }),
    )
}

fn held(alert: &GrafanaAlert, category: AlertCategory, gate: &'static str, reason: String) -> AlertOutcome {
    metrics::counter!("alerts_suppressed_total", "gate" => gate).increment(1);
    debug!("Held {} ({}): {}", alert.alertname(), category.as_str(), reason);
    AlertOutcome {
        alertname: alert.alertname().to_string(),
        category: category.as_str().to_string(),
        sent: false,
        reason,
    }
}

async fn handle_alert(state: &AppState, alert: &GrafanaAlert, payload_status: &str) -> AlertOutcome {
    metrics::counter!("alerts_received_total").increment(1);

    let category = detect_category(alert);
    let status = alert.effective_status(payload_status).to_lowercase();
    let phase = AlertPhase::from_status(&status);
    let host = alert.host();
    let value = alert.metric_value();
    let container = alert.container_name().unwrap_or_default().to_string();
    let mut verification = VerificationResult::Disabled;

    if category == AlertCategory::Container {
        if state.monitor_only_source {
            return held(alert, category, "monitor_only", "monitor_only_source".to_string());
        }

        if let Some(verifier) = &state.verifier {
            verification = match verifier.verify(host.as_deref(), &alert.labels).await {
                Ok(result) => result,
                Err(e) => match state.fail_policy.degrade(&e) {
                    Some(result) => {
                        warn!("Inventory verification failed, proceeding: {}", e);
                        result
                    }
                    None => {
                        warn!("Inventory verification failed, holding alert: {}", e);
                        return held(alert, category, "inventory", "inventory_unreachable".to_string());
                    }
                },
            };
        }

        let entity_state = compute_state(&verification, value, &status);
        let key = EntityKey::from_labels(host.as_deref(), &alert.labels);

        let decision = match &state.verifier {
            Some(verifier) => {
                let scope = match verification.scope() {
                    Some(scope) => Some(scope),
                    None => verifier.resolve_scope(host.as_deref()).await,
                };
                let client = verifier.client();
                let sibling = scope.map(|scope| {
                    SiblingLookup::new(client.as_ref(), scope).with_timeout(state.call_timeout)
                });
                state
                    .suppression
                    .should_send(&key, &entity_state, &container, sibling.as_ref())
                    .await
            }
            None => {
                state
                    .suppression
                    .should_send(&key, &entity_state, &container, None)
                    .await
            }
        };
        if !decision.send {
            return held(alert, category, "suppression", decision.reason.to_string());
        }
    }

    let always_notify =
        category == AlertCategory::Container && state.suppression.is_always_notify(&container);
    if state.cooldown_enabled && !always_notify {
        let fp = Fingerprint::from_labels(
            category,
            host.as_deref().unwrap_or("unknown"),
            &alert.labels,
            phase,
        );
        if !state.cooldown.check_and_touch(fp.clone()) {
            return held(alert, category, "cooldown", format!("cooldown:{}", fp));
        }
    }

    let notification = format_alert(alert, category, phase, host.as_deref(), value, &verification);
    let reason = match deliver(state, &notification).await {
        Ok(status) => {
            info!(
                "Forwarded {} ({}) for {} (status {})",
                alert.alertname(),
                category.as_str(),
                host.as_deref().unwrap_or("unknown"),
                status
            );
            metrics::counter!("alerts_sent_total", "source" => "webhook").increment(1);
            return AlertOutcome {
                alertname: alert.alertname().to_string(),
                category: category.as_str().to_string(),
                sent: true,
                reason: "sent".to_string(),
            };
        }
        Err(e) => {
            warn!("Failed to deliver {}: {}", alert.alertname(), e);
            format!("delivery_failed:{}", e)
        }
    };

    AlertOutcome {
        alertname: alert.alertname().to_string(),
        category: category.as_str().to_string(),
        sent: false,
        reason,
    }
}

async fn handle_legacy(state: &AppState, payload: &GrafanaPayload) -> AlertOutcome {
    metrics::counter!("alerts_received_total").increment(1);

    let title = payload.title.as_deref().unwrap_or("Alert");
    let message = payload.message.as_deref().unwrap_or_default();
    let notification = Notification::new(format!("🚨 **{}**\n{}", title, message));

    let (sent, reason) = match deliver(state, &notification).await {
        Ok(_) => {
            metrics::counter!("alerts_sent_total", "source" => "legacy").increment(1);
            (true, "sent".to_string())
        }
        Err(e) => {
            warn!("Failed to deliver legacy alert: {}", e);
            (false, format!("delivery_failed:{}", e))
        }
    };
    AlertOutcome {
        alertname: title.to_string(),
        category: AlertCategory::Default.as_str().to_string(),
        sent,
        reason,
    }
}

async fn deliver(state: &AppState, notification: &Notification) -> Result<u16, NotifyError> {
    match tokio::time::timeout(state.call_timeout, state.notifier.send(notification)).await {
        Ok(result) => result.map(|receipt| receipt.status),
        Err(_) => Err(NotifyError::Timeout(state.call_timeout.as_millis() as u64)),
    }
}

fn severity(value: Option<f64>) -> (&'static str, &'static str, u32) {
    match value {
        Some(v) if v >= 90.0 => ("🔥", "CRITICAL", HIGH_COLOR),
        Some(v) if v >= 80.0 => ("⚠️", "WARNING", MEDIUM_COLOR),
        _ => ("🚧", "ATTENTION", LOW_COLOR),
    }
}

fn format_value(value: Option<f64>, category: AlertCategory) -> String {
    let unit = match category {
        AlertCategory::Cpu | AlertCategory::Memory | AlertCategory::Disk => "%",
        _ => "",
    };
    match value {
        Some(v) => format!("{:.2}{}", v, unit),
        None => "N/A".to_string(),
    }
}

fn format_alert(
    alert: &GrafanaAlert,
    category: AlertCategory,
    phase: AlertPhase,
    host: Option<&str>,
    value: Option<f64>,
    verification: &VerificationResult,
) -> Notification {
    let (emoji, title) = match category {
        AlertCategory::Cpu => ("🖥️", "CPU"),
        AlertCategory::Memory => ("💾", "MEMORY"),
        AlertCategory::Disk => ("💿", "DISK"),
        AlertCategory::Container => ("🐳", "CONTAINER"),
        AlertCategory::Default => ("🚨", "SYSTEM"),
    };

    let (level_emoji, level, color) = match (phase, category) {
        (AlertPhase::Resolved, _) => ("🟢", "RESOLVED", RESOLVED_COLOR),
        (AlertPhase::Firing, AlertCategory::Container) if value == Some(0.0) => {
            ("🚨", "CONTAINER OFFLINE", HIGH_COLOR)
        }
        (AlertPhase::Firing, AlertCategory::Container) => ("✅", "CONTAINER ONLINE", CONTAINER_UP_COLOR),
        (AlertPhase::Firing, _) => severity(value),
    };

    let host = host.unwrap_or("unknown");
    let mut lines = vec![
        format!("{} **{} ALERT** {}", emoji, title, level_emoji),
        String::new(),
        format!("**Level:** `{}`", level),
        format!("**Server:** `{}`", host),
    ];
    match category {
        AlertCategory::Container => {
            if let Some(name) = alert.container_name() {
                lines.push(format!("**Container:** `{}`", name));
            }
        }
        AlertCategory::Disk => {
            if let Some(device) = alert.label("device") {
                lines.push(format!("**Device:** `{}`", device));
            }
            lines.push(format!(
                "**Mountpoint:** `{}`",
                alert.label("mountpoint").unwrap_or("/")
            ));
        }
        _ => {}
    }
    if category != AlertCategory::Container {
        lines.push(format!("**Value:** `{}`", format_value(value, category)));
    }
    lines.push(String::new());
    lines.push(format!("**Description:** {}", alert.description()));
    lines.push(format!("**Status:** {}", phase.as_str().to_uppercase()));
    if let Some(starts_at) = &alert.starts_at {
        lines.push(format!("**Time:** {}", starts_at));
    }

    let mut notification = Notification::new(lines.join("\n"))
        .with_color(color)
        .with_field(NotificationField::new(
            "📊 Details",
            format!(
                "**Alert:** {}\n**Instance:** {}\n**Severity:** {}",
                alert.alertname(),
                alert.label("instance").unwrap_or("N/A"),
                level
            ),
        ));
    if let Some(inventory) = inventory_field(verification) {
        notification = notification.with_field(inventory);
    }
    notification
}

fn inventory_field(verification: &VerificationResult) -> Option<NotificationField> {
    let value = match verification {
        VerificationResult::Disabled => return None,
        VerificationResult::Verified {
            running,
            status,
            health,
            matched_name,
            ..
        } => {
            let mut lines = vec![format!(
                "{} state `{}`",
                if *running { "🟢" } else { "🔴" },
                status
            )];
            if let Some(health) = health {
                lines.push(format!("❤️ health `{}`", health));
            }
            if let Some(name) = matched_name {
                lines.push(format!("📛 name `{}`", name));
            }
            lines.join("\n")
        }
        VerificationResult::Unverified { reason } => format!("ℹ️ {}", reason),
    };
    Some(NotificationField::new("Inventory", value))
}
