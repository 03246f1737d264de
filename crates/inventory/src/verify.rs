//! Entity Verification
//!
//! Checks a webhook-reported container against the inventory: resolve the
//! host to a scope, find the container by one of its label-derived names,
//! and read its live state.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::client::InventoryClient;
use crate::error::InventoryError;
use crate::scope_map::ScopeMap;
use crate::types::{normalize_name, EntityRecord, ScopeId};

/// What to do when the inventory cannot answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailPolicy {
    /// Treat as unverifiable and proceed
    Open,
    /// Suppress
    Closed,
}

impl FailPolicy {
    pub fn from_fail_open(fail_open: bool) -> Self {
        if fail_open {
            FailPolicy::Open
        } else {
            FailPolicy::Closed
        }
    }

    /// Degrade an inventory error: `Some(Unverified)` to proceed, `None` to suppress
    pub fn degrade(self, err: &InventoryError) -> Option<VerificationResult> {
        match self {
            FailPolicy::Open => Some(VerificationResult::Unverified {
                reason: format!("api_error:{}", err),
            }),
            FailPolicy::Closed => None,
        }
    }
}

/// Outcome of a verification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum VerificationResult {
    /// The inventory answered for this container
    Verified {
        scope: ScopeId,
        entity_id: Option<String>,
        matched_name: Option<String>,
        running: bool,
        status: String,
        health: Option<String>,
    },
    /// The inventory could not be used for this alert
    Unverified { reason: String },
    /// Verification is switched off
    Disabled,
}

impl VerificationResult {
    pub fn scope(&self) -> Option<ScopeId> {
        match self {
            VerificationResult::Verified { scope, .. } => Some(*scope),
            _ => None,
        }
    }
}

/// Container found in a listing
#[derive(Debug, Clone, PartialEq)]
pub struct EntityMatch {
    pub entity_id: Option<String>,
    pub matched_name: String,
    pub status: Option<String>,
}

/// Candidate container names carried by webhook labels, in preference order
pub fn candidate_names(labels: &HashMap<String, String>) -> Vec<String> {
    const KEYS: [&str; 9] = [
        "container",
        "container_name",
        "name",
        "pod",
        "pod_name",
        "service",
        "job",
        "com.docker.compose.service",
        "com.docker.stack.namespace",
    ];

    let mut candidates: Vec<String> = KEYS
        .iter()
        .filter_map(|k| labels.get(*k))
        .filter(|v| !v.trim().is_empty())
        .cloned()
        .collect();
    if let Some(service) = labels.get("label_com_docker_compose_service") {
        if !labels.contains_key("com.docker.compose.service") && !service.is_empty() {
            candidates.push(service.clone());
        }
    }
    candidates
}

/// Match listed names against candidates: exact first, then substring unless strict
pub fn match_name<'a, I>(names: I, candidates: &[String], strict: bool) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let wanted: Vec<String> = candidates
        .iter()
        .map(|c| normalize_name(c))
        .filter(|c| !c.is_empty())
        .collect();
    if wanted.is_empty() {
        return None;
    }
    let names: Vec<String> = names
        .into_iter()
        .map(normalize_name)
        .filter(|n| !n.is_empty())
        .collect();

    if let Some(exact) = wanted.iter().find(|c| names.contains(c)) {
        return Some(exact.clone());
    }
    if strict {
        return None;
    }
    names
        .iter()
        .find(|n| wanted.iter().any(|c| c.contains(n.as_str()) || n.contains(c.as_str())))
        .cloned()
}

/// First entity whose names (or compose/kubernetes labels) match a candidate
pub fn find_match(
    entities: &[EntityRecord],
    candidates: &[String],
    strict: bool,
) -> Option<EntityMatch> {
    entities.iter().find_map(|entry| {
        let by_name = match_name(entry.names.iter().map(String::as_str), candidates, strict);
        let matched = by_name.or_else(|| {
            let alt = ["com.docker.compose.service", "io.kubernetes.container.name"]
                .iter()
                .filter_map(|k| entry.labels.get(*k))
                .map(String::as_str);
            match_name(alt, candidates, strict)
        })?;

        let status = [&entry.state, &entry.status]
            .into_iter()
            .find(|s| !s.is_empty())
            .cloned();
        Some(EntityMatch {
            entity_id: Some(entry.id.clone()).filter(|id| !id.is_empty()),
            matched_name: matched,
            status,
        })
    })
}

/// Verifies webhook-reported containers against the inventory
pub struct EntityVerifier {
    client: Arc<dyn InventoryClient>,
    scope_map: Arc<ScopeMap>,
    strict_name_match: bool,
    timeout: Duration,
}

impl EntityVerifier {
    pub fn new(
        client: Arc<dyn InventoryClient>,
        scope_map: Arc<ScopeMap>,
        strict_name_match: bool,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            scope_map,
            strict_name_match,
            timeout,
        }
    }

    /// The underlying inventory client
    pub fn client(&self) -> Arc<dyn InventoryClient> {
        Arc::clone(&self.client)
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, InventoryError>
    where
        F: std::future::Future<Output = Result<T, InventoryError>>,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| InventoryError::Timeout(self.timeout))?
    }

    /// Resolve a host to a scope: map file first, then scope names
    pub async fn resolve_scope(&self, host: Option<&str>) -> Option<ScopeId> {
        let host = host?.split(':').next()?.trim().to_lowercase();
        if host.is_empty() || host == "unknown" {
            return None;
        }

        self.scope_map.maybe_reload();
        if let Some(scope) = self.scope_map.resolve(&host) {
            return Some(scope);
        }

        let scopes = match self.bounded(self.client.list_scopes()).await {
            Ok(scopes) => scopes,
            Err(e) => {
                debug!("Scope listing failed while resolving {}: {}", host, e);
                return None;
            }
        };
        let short = host.split('.').next().unwrap_or(&host).to_string();
        scopes
            .values()
            .find(|s| {
                let name = s.name.trim().to_lowercase();
                name == host || name == short
            })
            .map(|s| s.id)
    }

    /// Verify the container described by `labels` on `host`
    pub async fn verify(
        &self,
        host: Option<&str>,
        labels: &HashMap<String, String>,
    ) -> Result<VerificationResult, InventoryError> {
        let Some(scope) = self.resolve_scope(host).await else {
            debug!("Inventory: no scope for host {:?}", host);
            return Ok(VerificationResult::Unverified {
                reason: "endpoint_not_found".to_string(),
            });
        };

        let candidates = candidate_names(labels);
        debug!("Inventory name candidates for {:?}: {:?}", host, candidates);

        match self.verify_in_scope(scope, &candidates).await {
            Err(InventoryError::Decode(e)) => {
                warn!("Malformed inventory response for scope {}: {}", scope, e);
                Ok(VerificationResult::Unverified {
                    reason: "malformed_response".to_string(),
                })
            }
            other => other,
        }
    }

    async fn verify_in_scope(
        &self,
        scope: ScopeId,
        candidates: &[String],
    ) -> Result<VerificationResult, InventoryError> {
        let running = self.bounded(self.client.list_entities(scope, false)).await?;
        if let Some(m) = find_match(&running, candidates, self.strict_name_match) {
            return Ok(VerificationResult::Verified {
                scope,
                entity_id: m.entity_id,
                matched_name: Some(m.matched_name),
                running: true,
                status: m.status.unwrap_or_else(|| "running".to_string()),
                health: None,
            });
        }

        let all = self.bounded(self.client.list_entities(scope, true)).await?;
        let Some(m) = find_match(&all, candidates, self.strict_name_match) else {
            return Ok(VerificationResult::Verified {
                scope,
                entity_id: None,
                matched_name: None,
                running: false,
                status: "missing".to_string(),
                health: None,
            });
        };

        let Some(entity_id) = m.entity_id.clone() else {
            return Ok(VerificationResult::Verified {
                scope,
                entity_id: None,
                matched_name: Some(m.matched_name),
                running: false,
                status: m.status.unwrap_or_else(|| "unknown".to_string()),
                health: None,
            });
        };

        let detail = self.bounded(self.client.inspect(scope, &entity_id)).await?;
        Ok(VerificationResult::Verified {
            scope,
            entity_id: Some(entity_id),
            matched_name: Some(m.matched_name),
            running: detail.running,
            status: detail
                .status
                .or(m.status)
                .unwrap_or_else(|| "unknown".to_string()),
            health: detail.health,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockInventory;
    use crate::types::DetailedState;

    fn labels(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn verifier(mock: Arc<MockInventory>, strict: bool) -> EntityVerifier {
        EntityVerifier::new(
            mock,
            Arc::new(ScopeMap::from_entries([("10.0.0.5", 4)])),
            strict,
            Duration::from_secs(1),
        )
    }

    #[test]
    fn test_match_name_exact_then_substring() {
        let names = ["/nginx-proxy-1"];
        assert_eq!(
            match_name(names, &["nginx-proxy-1".to_string()], true).as_deref(),
            Some("nginx-proxy-1")
        );
        assert_eq!(match_name(names, &["nginx".to_string()], true), None);
        assert_eq!(
            match_name(names, &["nginx".to_string()], false).as_deref(),
            Some("nginx-proxy-1")
        );
    }

    #[test]
    fn test_candidate_order() {
        let c = candidate_names(&labels(&[("job", "cadvisor"), ("container", "api")]));
        assert_eq!(c, vec!["api".to_string(), "cadvisor".to_string()]);
    }

    #[tokio::test]
    async fn test_verify_running_container() {
        let mock = Arc::new(MockInventory::new().with_scope(4, "prod"));
        mock.set_entities(4, vec![EntityRecord::new("c1", "api", "running", "Up 3 hours")]);

        let result = verifier(mock, false)
            .verify(Some("10.0.0.5:9100"), &labels(&[("container", "api")]))
            .await
            .unwrap();

        match result {
            VerificationResult::Verified { running, scope, .. } => {
                assert!(running);
                assert_eq!(scope, 4);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_verify_stopped_container_uses_inspect() {
        let mock = Arc::new(MockInventory::new().with_scope(4, "prod"));
        mock.set_entities(4, vec![EntityRecord::new("c2", "worker", "exited", "Exited (1)")]);
        mock.set_inspect(
            4,
            "c2",
            DetailedState {
                running: false,
                status: Some("exited".to_string()),
                health: Some("unhealthy".to_string()),
            },
        );

        let result = verifier(mock, false)
            .verify(Some("10.0.0.5"), &labels(&[("container", "worker")]))
            .await
            .unwrap();

        assert_eq!(
            result,
            VerificationResult::Verified {
                scope: 4,
                entity_id: Some("c2".to_string()),
                matched_name: Some("worker".to_string()),
                running: false,
                status: "exited".to_string(),
                health: Some("unhealthy".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn test_verify_missing_container() {
        let mock = Arc::new(MockInventory::new().with_scope(4, "prod"));
        let result = verifier(mock, true)
            .verify(Some("10.0.0.5"), &labels(&[("container", "ghost")]))
            .await
            .unwrap();
        assert!(matches!(
            result,
            VerificationResult::Verified { running: false, ref status, .. } if status == "missing"
        ));
    }

    #[tokio::test]
    async fn test_malformed_response_is_unverified() {
        let mock = Arc::new(MockInventory::new().with_scope(4, "prod"));
        mock.malform_scope(4, true);
        let result = verifier(mock, false)
            .verify(Some("10.0.0.5"), &labels(&[("container", "api")]))
            .await
            .unwrap();
        assert_eq!(
            result,
            VerificationResult::Unverified {
                reason: "malformed_response".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_unreachable_scope_is_an_error() {
        let mock = Arc::new(MockInventory::new().with_scope(4, "prod"));
        mock.fail_scope(4, true);
        let err = verifier(mock, false)
            .verify(Some("10.0.0.5"), &labels(&[("container", "api")]))
            .await
            .unwrap_err();
        assert!(err.is_unreachable());
    }

    #[tokio::test]
    async fn test_unknown_host_is_unverified() {
        let mock = Arc::new(MockInventory::new());
        let result = verifier(mock, false)
            .verify(Some("192.168.99.99"), &labels(&[("container", "api")]))
            .await
            .unwrap();
        assert_eq!(
            result,
            VerificationResult::Unverified {
                reason: "endpoint_not_found".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_scope_resolved_by_name() {
        let mock = Arc::new(MockInventory::new().with_scope(11, "Edge01"));
        let v = verifier(mock, false);
        assert_eq!(v.resolve_scope(Some("edge01.example.org")).await, Some(11));
    }

    #[tokio::test]
    async fn test_api_error_and_policy() {
        let mock = Arc::new(MockInventory::new().with_scope(4, "prod"));
        mock.fail_scope(4, true);

        let err = verifier(mock, false)
            .verify(Some("10.0.0.5"), &labels(&[("container", "api")]))
            .await
            .unwrap_err();

        assert!(matches!(
            FailPolicy::Open.degrade(&err),
            Some(VerificationResult::Unverified { .. })
        ));
        assert_eq!(FailPolicy::Closed.degrade(&err), None);
    }
}
