//! Inventory Client
//!
//! The [`InventoryClient`] trait is the seam the verifier, the suppression
//! sibling lookup and the monitor talk through. [`PortainerClient`] is the
//! REST implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::InventoryError;
use crate::types::{DetailedState, EntityRecord, InspectResponse, ScopeId, ScopeMetadata};

/// How long the scope listing is served from cache
const SCOPE_CACHE_TTL: Duration = Duration::from_secs(60);

/// Container inventory service
#[async_trait]
pub trait InventoryClient: Send + Sync {
    /// All scopes, keyed by id
    async fn list_scopes(&self) -> Result<BTreeMap<ScopeId, ScopeMetadata>, InventoryError>;

    /// Entities in a scope; `include_stopped` also lists non-running ones
    async fn list_entities(
        &self,
        scope: ScopeId,
        include_stopped: bool,
    ) -> Result<Vec<EntityRecord>, InventoryError>;

    /// Detailed state of one entity
    async fn inspect(&self, scope: ScopeId, entity_id: &str)
        -> Result<DetailedState, InventoryError>;
}

/// Portainer connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortainerConfig {
    /// Whether the inventory is consulted at all
    pub enabled: bool,
    /// API base URL, e.g. `https://portainer:9443/api`
    pub base_url: Option<String>,
    /// `X-API-Key` token
    pub api_key: Option<String>,
    /// Per-request timeout (seconds)
    pub timeout_seconds: u64,
    /// Verify TLS certificates
    pub verify_tls: bool,
    /// Proceed unverified when the inventory fails (otherwise suppress)
    pub fail_open: bool,
    /// Exact name matching only
    pub strict_name_match: bool,
    /// Host → scope map file
    pub endpoint_map_file: Option<PathBuf>,
}

impl Default for PortainerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: None,
            api_key: None,
            timeout_seconds: 3,
            verify_tls: true,
            fail_open: true,
            strict_name_match: false,
            endpoint_map_file: None,
        }
    }
}

impl PortainerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.max(1))
    }
}

#[derive(Default)]
struct ScopeCache {
    fetched_at: Option<Instant>,
    scopes: BTreeMap<ScopeId, ScopeMetadata>,
}

/// Portainer REST client
pub struct PortainerClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
    cache: Mutex<ScopeCache>,
}

impl PortainerClient {
    /// Create a client; fails when disabled or missing URL/key
    pub fn new(config: &PortainerConfig) -> Result<Self, InventoryError> {
        if !config.enabled {
            return Err(InventoryError::NotConfigured("validation disabled".to_string()));
        }
        let base_url = config
            .base_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| InventoryError::NotConfigured("portainer_base_url".to_string()))?
            .trim_end_matches('/')
            .to_string();
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| InventoryError::NotConfigured("portainer_api_key".to_string()))?;

        if !config.verify_tls {
            warn!("TLS verification disabled for inventory client");
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .map_err(|e| InventoryError::NotConfigured(e.to_string()))?;

        info!("Creating Portainer client for {}", base_url);
        Ok(Self {
            base_url,
            api_key,
            client,
            cache: Mutex::new(ScopeCache::default()),
        })
    }

    async fn get_json<T>(&self, path: &str, query: &[(&str, &str)]) -> Result<T, InventoryError>
    where
        T: serde::de::DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {}", url);

        let resp = self
            .client
            .get(&url)
            .header("X-API-Key", &self.api_key)
            .header("Accept", "application/json")
            .query(query)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(InventoryError::Status {
                status: status.as_u16(),
                path: path.to_string(),
            });
        }

        let body = resp.bytes().await?;
        if body.is_empty() {
            return Ok(serde_json::from_str("[]")?);
        }
        Ok(serde_json::from_slice(&body)?)
    }

    fn cached_scopes(&self, fresh_only: bool) -> Option<BTreeMap<ScopeId, ScopeMetadata>> {
        let cache = self.cache.lock().ok()?;
        let fetched_at = cache.fetched_at?;
        if fresh_only && fetched_at.elapsed() >= SCOPE_CACHE_TTL {
            return None;
        }
        Some(cache.scopes.clone())
    }
}

#[async_trait]
impl InventoryClient for PortainerClient {
    async fn list_scopes(&self) -> Result<BTreeMap<ScopeId, ScopeMetadata>, InventoryError> {
        if let Some(scopes) = self.cached_scopes(true) {
            return Ok(scopes);
        }

        match self.get_json::<Vec<ScopeMetadata>>("/endpoints", &[]).await {
            Ok(list) => {
                let scopes: BTreeMap<_, _> = list.into_iter().map(|s| (s.id, s)).collect();
                debug!(
                    "Scopes discovered: {}",
                    scopes
                        .values()
                        .map(|s| format!("{}({})", s.display_name(), s.id))
                        .collect::<Vec<_>>()
                        .join(", ")
                );
                if let Ok(mut cache) = self.cache.lock() {
                    cache.scopes = scopes.clone();
                    cache.fetched_at = Some(Instant::now());
                }
                Ok(scopes)
            }
            Err(e) => match self.cached_scopes(false) {
                Some(stale) => {
                    warn!("Scope refresh failed, serving cached list: {}", e);
                    Ok(stale)
                }
                None => Err(e),
            },
        }
    }

    async fn list_entities(
        &self,
        scope: ScopeId,
        include_stopped: bool,
    ) -> Result<Vec<EntityRecord>, InventoryError> {
        let all = if include_stopped { "1" } else { "0" };
        self.get_json(
            &format!("/endpoints/{}/docker/containers/json", scope),
            &[("all", all)],
        )
        .await
    }

    async fn inspect(
        &self,
        scope: ScopeId,
        entity_id: &str,
    ) -> Result<DetailedState, InventoryError> {
        let resp: InspectResponse = self
            .get_json(
                &format!("/endpoints/{}/docker/containers/{}/json", scope, entity_id),
                &[],
            )
            .await?;
        Ok(resp.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled_config() -> PortainerConfig {
        PortainerConfig {
            enabled: true,
            base_url: Some("https://portainer.local/api/".to_string()),
            api_key: Some("ptr_token".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_disabled_client_not_created() {
        let err = PortainerClient::new(&PortainerConfig::default()).err().unwrap();
        assert!(matches!(err, InventoryError::NotConfigured(_)));
    }

    #[test]
    fn test_missing_key_not_created() {
        let config = PortainerConfig {
            api_key: None,
            ..enabled_config()
        };
        assert!(PortainerClient::new(&config).is_err());
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = PortainerClient::new(&enabled_config()).unwrap();
        assert_eq!(client.base_url, "https://portainer.local/api");
        assert!(client.cached_scopes(false).is_none());
    }

    #[tokio::test]
    async fn test_unreachable_host_is_http_error() {
        let config = PortainerConfig {
            base_url: Some("http://127.0.0.1:1".to_string()),
            timeout_seconds: 1,
            ..enabled_config()
        };
        let client = PortainerClient::new(&config).unwrap();
        let err = client.list_scopes().await.unwrap_err();
        assert!(err.is_unreachable());
    }
}
