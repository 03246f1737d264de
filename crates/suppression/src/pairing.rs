//! Blue/green pairs
//!
//! `nginx-blue` and `nginx-green` are one deployment; while one of them runs
//! the other going down is expected.

use inventory::{InventoryClient, InventoryError, ScopeId};
use regex::Regex;
use std::fmt;
use std::time::Duration;
use tracing::debug;

lazy_static::lazy_static! {
    static ref PAIRED_RE: Regex = Regex::new(r"(?i)^(.+)([-_])(blue|green)$").expect("valid pair pattern");
}

/// Deployment color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Color {
    Blue,
    Green,
}

impl Color {
    pub fn opposite(self) -> Self {
        match self {
            Color::Blue => Color::Green,
            Color::Green => Color::Blue,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Color::Blue => "blue",
            Color::Green => "green",
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A name of the form `<base>[-_](blue|green)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairedName {
    /// Lowercase base name
    pub base: String,
    pub separator: char,
    pub color: Color,
}

impl PairedName {
    /// Name of the other half of the pair, same separator
    pub fn sibling_name(&self) -> String {
        format!("{}{}{}", self.base, self.separator, self.color.opposite())
    }
}

/// Split a blue/green name into base and color; `None` for other names
pub fn extract_paired_base(name: &str) -> Option<PairedName> {
    let name = name.trim().trim_start_matches('/');
    let caps = PAIRED_RE.captures(name)?;
    let base = caps.get(1)?.as_str().to_lowercase();
    let separator = caps.get(2)?.as_str().chars().next()?;
    let color = if caps.get(3)?.as_str().eq_ignore_ascii_case("blue") {
        Color::Blue
    } else {
        Color::Green
    };
    Some(PairedName {
        base,
        separator,
        color,
    })
}

/// Looks up a sibling's liveness in one scope
pub struct SiblingLookup<'a> {
    inventory: &'a dyn InventoryClient,
    scope: ScopeId,
    timeout: Duration,
}

impl<'a> SiblingLookup<'a> {
    pub fn new(inventory: &'a dyn InventoryClient, scope: ScopeId) -> Self {
        Self {
            inventory,
            scope,
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn scope(&self) -> ScopeId {
        self.scope
    }

    /// Whether a container named `sibling` is running in the scope
    pub async fn is_running(&self, sibling: &str) -> Result<bool, InventoryError> {
        let entities = tokio::time::timeout(
            self.timeout,
            self.inventory.list_entities(self.scope, true),
        )
        .await
        .map_err(|_| InventoryError::Timeout(self.timeout))??;

        let running = entities
            .iter()
            .find(|e| e.has_name(sibling))
            .map(|e| e.is_running())
            .unwrap_or(false);
        debug!(
            "Sibling {} in scope {}: running={}",
            sibling, self.scope, running
        );
        Ok(running)
    }
}
