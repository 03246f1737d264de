//! Grafana webhook payloads

use alerting::AlertCategory;
use regex::Regex;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::HashMap;

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Unified alerting webhook body; `title`/`message` cover legacy alerts
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GrafanaPayload {
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub alerts: Vec<GrafanaAlert>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// One alert of the payload
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GrafanaAlert {
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub labels: HashMap<String, String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub annotations: HashMap<String, String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub values: HashMap<String, Value>,
    #[serde(rename = "valueString", default, deserialize_with = "null_as_default")]
    pub value_string: String,
    #[serde(rename = "startsAt", default)]
    pub starts_at: Option<String>,
}

impl GrafanaAlert {
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    pub fn alertname(&self) -> &str {
        self.label("alertname").unwrap_or("Alert")
    }

    pub fn description(&self) -> &str {
        ["description", "summary"]
            .iter()
            .filter_map(|k| self.annotations.get(*k))
            .map(|v| v.trim())
            .find(|v| !v.is_empty())
            .unwrap_or("No description")
    }

    /// Alert status, falling back to the payload-level one
    pub fn effective_status<'a>(&'a self, payload_status: &'a str) -> &'a str {
        if self.status.trim().is_empty() {
            payload_status
        } else {
            &self.status
        }
    }

    /// Container name carried by the labels
    pub fn container_name(&self) -> Option<&str> {
        ["container", "container_name", "pod", "name"]
            .iter()
            .find_map(|k| self.label(k))
    }

    /// Numeric value: refs A, C, B, D, then any other, then `valueString`
    pub fn metric_value(&self) -> Option<f64> {
        let as_f64 = |v: &Value| match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        };

        let preferred = ["A", "C", "B", "D"]
            .iter()
            .filter_map(|k| self.values.get(*k))
            .find_map(as_f64);
        if preferred.is_some() {
            return preferred;
        }
        let mut refs: Vec<_> = self.values.iter().collect();
        refs.sort_by(|a, b| a.0.cmp(b.0));
        if let Some(v) = refs.into_iter().find_map(|(_, v)| as_f64(v)) {
            return Some(v);
        }

        VALUE_RE
            .captures(&self.value_string)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
    }

    /// Host of the alert: extracted IP labels first, then `instance`
    pub fn host(&self) -> Option<String> {
        ["host_ip", "real_host", "__address__", "instance"]
            .iter()
            .filter_map(|k| self.label(k))
            .map(|v| strip_port(v.trim()))
            .find(|h| !matches!(h.as_str(), "" | "N/A" | "localhost" | "127.0.0.1" | "unknown"))
    }
}

lazy_static::lazy_static! {
    static ref VALUE_RE: Regex = Regex::new(r"value=([0-9]*\.?[0-9]+)").expect("valid value pattern");
}

fn strip_port(host: &str) -> String {
    let host = host
        .trim_start_matches("http://")
        .trim_start_matches("https://");
    let host = host.split('/').next().unwrap_or(host);
    host.split(':').next().unwrap_or(host).to_string()
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// Whether the labels describe a container alert
pub fn is_container_alert(labels: &HashMap<String, String>) -> bool {
    let get = |k: &str| labels.get(k).map(|v| v.to_lowercase()).unwrap_or_default();
    let has = |k: &str| labels.get(k).is_some_and(|v| !v.trim().is_empty());

    let service_type = get("service_type");
    let job = get("job");
    let metric = get("__name__");
    let alertname: String = get("alertname")
        .chars()
        .filter(|c| !matches!(c, ' ' | '_' | '-'))
        .collect();

    has("container")
        || has("container_name")
        || has("pod")
        || has("pod_name")
        || contains_any(&service_type, &["container", "docker"])
        || contains_any(&job, &["container", "docker", "cadvisor", "kubelet"])
        || metric.starts_with("container_")
        || contains_any(&alertname, &["container", "poddown", "dockerdown"])
}

/// Category of an alert from its labels, name and description
pub fn detect_category(alert: &GrafanaAlert) -> AlertCategory {
    const CPU: [&str; 3] = ["cpu", "processor", "load"];
    const MEMORY: [&str; 3] = ["memory", "mem", "ram"];
    const DISK: [&str; 3] = ["disk", "storage", "filesystem"];
    const CONTAINER: [&str; 3] = ["container", "docker", "pod"];

    if is_container_alert(&alert.labels) {
        return AlertCategory::Container;
    }

    let name = alert.alertname().to_lowercase();
    let service_type = alert
        .label("service_type")
        .map(str::to_lowercase)
        .unwrap_or_default();
    let has_device = alert.labels.contains_key("device");

    if service_type.contains("postgres") {
        return AlertCategory::Default;
    }
    if service_type.contains("node") {
        if has_device || contains_any(&name, &DISK) {
            return AlertCategory::Disk;
        }
        if contains_any(&name, &MEMORY) {
            return AlertCategory::Memory;
        }
        if contains_any(&name, &CPU) {
            return AlertCategory::Cpu;
        }
    }

    if contains_any(&name, &CPU) {
        return AlertCategory::Cpu;
    }
    if contains_any(&name, &MEMORY) {
        return AlertCategory::Memory;
    }
    if contains_any(&name, &DISK) || has_device {
        return AlertCategory::Disk;
    }
    if contains_any(&name, &CONTAINER) {
        return AlertCategory::Container;
    }

    let description = alert.description().to_lowercase();
    if description.contains("cpu") {
        AlertCategory::Cpu
    } else if contains_any(&description, &MEMORY) {
        AlertCategory::Memory
    } else if contains_any(&description, &["disk"]) {
        AlertCategory::Disk
    } else if contains_any(&description, &CONTAINER) {
        AlertCategory::Container
    } else {
        AlertCategory::Default
    }
}
