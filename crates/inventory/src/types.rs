//! Inventory Records
//!
//! Wire shapes of the Portainer/Docker API, reduced to the fields the proxy
//! reads.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

/// Identifier of a scope (Portainer endpoint)
pub type ScopeId = i64;

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Normalize a container name: trim, drop the leading `/`, lowercase
pub fn normalize_name(name: &str) -> String {
    name.trim().trim_start_matches('/').trim().to_lowercase()
}

/// Scope metadata as returned by `GET /endpoints`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeMetadata {
    #[serde(rename = "Id")]
    pub id: ScopeId,
    #[serde(rename = "Name", default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(rename = "PublicURL", default)]
    pub public_url: Option<String>,
    #[serde(rename = "URL", default)]
    pub url: Option<String>,
}

impl ScopeMetadata {
    pub fn new(id: ScopeId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            public_url: None,
            url: None,
        }
    }

    /// Name used in logs and filters, falling back to the id
    pub fn display_name(&self) -> String {
        if self.name.trim().is_empty() {
            self.id.to_string()
        } else {
            self.name.clone()
        }
    }
}

/// Container record as returned by `GET /docker/containers/json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    #[serde(rename = "Id", default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(rename = "Names", default, deserialize_with = "null_as_default")]
    pub names: Vec<String>,
    #[serde(rename = "State", default, deserialize_with = "null_as_default")]
    pub state: String,
    #[serde(rename = "Status", default, deserialize_with = "null_as_default")]
    pub status: String,
    #[serde(rename = "Labels", default, deserialize_with = "null_as_default")]
    pub labels: HashMap<String, String>,
}

impl EntityRecord {
    /// Build a record with a single name
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        state: impl Into<String>,
        status: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            names: vec![format!("/{}", name.into())],
            state: state.into(),
            status: status.into(),
            labels: HashMap::new(),
        }
    }

    /// First 12 characters of the id
    pub fn short_id(&self) -> &str {
        short_id(&self.id)
    }

    /// Human name: first listed name, then compose service, then the short id
    pub fn display_name(&self) -> String {
        if let Some(name) = self
            .names
            .iter()
            .map(|n| n.trim_start_matches('/'))
            .find(|n| !n.is_empty())
        {
            return name.to_string();
        }
        match self.labels.get("com.docker.compose.service") {
            Some(service) if !service.is_empty() => service.clone(),
            _ => format!("container-{}", self.short_id()),
        }
    }

    /// Whether any listed name equals `name` after normalization
    pub fn has_name(&self, name: &str) -> bool {
        let wanted = normalize_name(name);
        self.names.iter().any(|n| normalize_name(n) == wanted)
    }

    /// Whether the reported state is `running`
    pub fn is_running(&self) -> bool {
        self.state.trim().eq_ignore_ascii_case("running")
    }
}

/// First 12 characters of a container id
pub fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}

/// Detailed state as returned by `GET /docker/containers/{id}/json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetailedState {
    pub running: bool,
    pub status: Option<String>,
    pub health: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct InspectHealth {
    #[serde(rename = "Status", default)]
    status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct InspectState {
    #[serde(rename = "Running", default)]
    running: bool,
    #[serde(rename = "Status", default)]
    status: Option<String>,
    #[serde(rename = "Health", default)]
    health: Option<InspectHealth>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct InspectResponse {
    #[serde(rename = "State", default)]
    state: Option<InspectState>,
}

impl From<InspectResponse> for DetailedState {
    fn from(resp: InspectResponse) -> Self {
        let state = resp.state.unwrap_or_default();
        DetailedState {
            running: state.running,
            status: state.status,
            health: state.health.and_then(|h| h.status),
        }
    }
}
