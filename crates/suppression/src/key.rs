//! Entity Keys

use alerting::normalize_host;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

const ID_PREFIX: &str = "id:";

/// Identity of a container for suppression and dedupe.
///
/// `ByName` keys come from webhook alerts where only the label is known;
/// `ById` keys come from the inventory. The two never compare equal, and
/// their string forms never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKey {
    ByName { host: String, name: String },
    ById { host: String, id: String },
}

fn clean_host(host: Option<&str>) -> String {
    let host = host.map(normalize_host).unwrap_or_default();
    if host.is_empty() {
        "unknown".to_string()
    } else {
        host
    }
}

fn clean_part(value: Option<&str>) -> String {
    let value = value.map(|v| v.trim().to_lowercase()).unwrap_or_default();
    if value.is_empty() {
        "unknown".to_string()
    } else {
        value
    }
}

fn escape(value: &str, reserved: &[char]) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if c == '%' || reserved.contains(&c) {
            out.push_str(&format!("%{:02x}", c as u32));
        } else {
            out.push(c);
        }
    }
    out
}

fn unescape(value: &str) -> Option<String> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c == '%' {
            let hex: String = chars.by_ref().take(2).collect();
            let code = u32::from_str_radix(&hex, 16).ok()?;
            out.push(char::from_u32(code)?);
        } else {
            out.push(c);
        }
    }
    Some(out)
}

impl EntityKey {
    /// Key for a webhook alert that only knows the container label
    pub fn by_name(host: Option<&str>, name: Option<&str>) -> Self {
        EntityKey::ByName {
            host: clean_host(host),
            name: clean_part(name),
        }
    }

    /// Key for an inventory container with a stable id
    pub fn by_id(host: Option<&str>, id: &str) -> Self {
        EntityKey::ById {
            host: clean_host(host),
            id: clean_part(Some(id)),
        }
    }

    /// Name-based key from webhook labels (`container`, `container_name`, `pod`, `name`)
    pub fn from_labels(host: Option<&str>, labels: &HashMap<String, String>) -> Self {
        let host = host
            .filter(|h| !h.trim().is_empty())
            .or_else(|| {
                ["host_ip", "real_host", "instance"]
                    .iter()
                    .filter_map(|k| labels.get(*k))
                    .map(String::as_str)
                    .find(|v| !v.trim().is_empty())
            });
        let name = ["container", "container_name", "pod", "name"]
            .iter()
            .filter_map(|k| labels.get(*k))
            .map(String::as_str)
            .find(|v| !v.trim().is_empty());
        Self::by_name(host, name)
    }

    pub fn host(&self) -> &str {
        match self {
            EntityKey::ByName { host, .. } | EntityKey::ById { host, .. } => host,
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKey::ByName { host, name } => {
                write!(f, "{}|{}", escape(host, &['|']), escape(name, &['|', ':']))
            }
            EntityKey::ById { host, id } => {
                write!(f, "{}|{}{}", escape(host, &['|']), ID_PREFIX, escape(id, &['|']))
            }
        }
    }
}

/// Error parsing a persisted key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseKeyError(pub String);

impl fmt::Display for ParseKeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid entity key: {}", self.0)
    }
}

impl std::error::Error for ParseKeyError {}

impl FromStr for EntityKey {
    type Err = ParseKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseKeyError(s.to_string());
        let (host, rest) = s.split_once('|').ok_or_else(err)?;
        let host = unescape(host).ok_or_else(err)?;

        match rest.strip_prefix(ID_PREFIX) {
            Some(id) => Ok(EntityKey::ById {
                host,
                id: unescape(id).ok_or_else(err)?,
            }),
            None => Ok(EntityKey::ByName {
                host,
                name: unescape(rest).ok_or_else(err)?,
            }),
        }
    }
}
