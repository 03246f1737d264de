//! Alert Fingerprints
//!
//! A fingerprint is the identity of a logical alert condition, used as the
//! cooldown key. The alert phase is part of the key so a resolution is never
//! swallowed by the cooldown of the firing that preceded it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Alert category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertCategory {
    Cpu,
    Memory,
    Disk,
    Container,
    Default,
}

impl AlertCategory {
    /// Category name as it appears in fingerprints
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertCategory::Cpu => "cpu",
            AlertCategory::Memory => "memory",
            AlertCategory::Disk => "disk",
            AlertCategory::Container => "container",
            AlertCategory::Default => "default",
        }
    }

    /// Whether the category is keyed by host alone
    pub fn is_host_wide(&self) -> bool {
        !matches!(self, AlertCategory::Disk | AlertCategory::Container)
    }
}

impl fmt::Display for AlertCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alert phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertPhase {
    Firing,
    Resolved,
}

impl AlertPhase {
    /// Parse a webhook status string; anything but "resolved" is firing
    pub fn from_status(status: &str) -> Self {
        if status.trim().eq_ignore_ascii_case("resolved") {
            AlertPhase::Resolved
        } else {
            AlertPhase::Firing
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertPhase::Firing => "firing",
            AlertPhase::Resolved => "resolved",
        }
    }
}

impl fmt::Display for AlertPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reduce a host or `host:port` to its lowercase address portion
pub fn normalize_host(host: &str) -> String {
    host.trim()
        .split(':')
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase()
}

/// Stable identity of an alert condition
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Build a fingerprint.
    ///
    /// `discriminant` is the container name for containers and the device or
    /// mountpoint for disks; it is ignored for host-wide categories. Empty
    /// parts are skipped.
    pub fn new(
        category: AlertCategory,
        host: &str,
        discriminant: Option<&str>,
        phase: AlertPhase,
    ) -> Self {
        let host = normalize_host(host);
        let discriminant = if category.is_host_wide() {
            None
        } else {
            discriminant.map(str::trim).filter(|d| !d.is_empty())
        };

        let mut parts: Vec<&str> = vec![category.as_str()];
        if !host.is_empty() {
            parts.push(&host);
        }
        if let Some(d) = discriminant {
            parts.push(d);
        }
        parts.push(phase.as_str());

        Fingerprint(parts.join("|"))
    }

    /// Build a fingerprint picking the discriminant from webhook labels
    pub fn from_labels(
        category: AlertCategory,
        host: &str,
        labels: &HashMap<String, String>,
        phase: AlertPhase,
    ) -> Self {
        let first = |keys: &[&str]| {
            keys.iter()
                .filter_map(|k| labels.get(*k))
                .map(|v| v.as_str())
                .find(|v| !v.trim().is_empty())
        };

        let discriminant = match category {
            AlertCategory::Container => first(&["container", "container_name", "pod", "name"]),
            AlertCategory::Disk => first(&["device", "fstype", "mountpoint"]).or(Some("/")),
            _ => None,
        };

        Self::new(category, host, discriminant, phase)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
