//! Host → Scope Map
//!
//! Maps host names and addresses to inventory scope ids. The map file is
//! either JSON (`{"10.0.0.5": 4}` or `{"10.0.0.5": {"id": 4}}`) or plain
//! `host: id` lines with `#` comments. It is reloaded when its mtime changes.

use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::SystemTime;
use tracing::{debug, info, warn};

use crate::ScopeId;

lazy_static::lazy_static! {
    static ref IPV4_RE: Regex = Regex::new(r"^\d{1,3}(?:\.\d{1,3}){3}$").expect("valid IPv4 pattern");
}

#[derive(Debug, Default)]
struct MapState {
    entries: BTreeMap<String, ScopeId>,
    mtime: Option<SystemTime>,
}

/// Host → scope id mapping
#[derive(Debug, Default)]
pub struct ScopeMap {
    path: Option<PathBuf>,
    state: RwLock<MapState>,
}

impl ScopeMap {
    /// Empty map with no backing file
    pub fn empty() -> Self {
        Self::default()
    }

    /// In-memory map
    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, ScopeId)>,
        S: AsRef<str>,
    {
        let entries = entries
            .into_iter()
            .map(|(k, v)| (k.as_ref().trim().to_lowercase(), v))
            .collect();
        Self {
            path: None,
            state: RwLock::new(MapState {
                entries,
                mtime: None,
            }),
        }
    }

    /// Load the map from `path`; a missing or unreadable file yields an empty map
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let map = Self {
            path: Some(path),
            state: RwLock::new(MapState::default()),
        };
        map.maybe_reload();
        let count = map.len();
        if count > 0 {
            info!("Scope map loaded ({} hosts)", count);
        }
        map
    }

    /// Re-read the backing file if its mtime changed
    pub fn maybe_reload(&self) {
        let Some(path) = self.path.as_deref() else {
            return;
        };
        let Some(mtime) = file_mtime(path) else {
            debug!("Scope map file not found: {}", path.display());
            return;
        };

        let unchanged = self
            .state
            .read()
            .map(|s| s.mtime == Some(mtime))
            .unwrap_or(false);
        if unchanged {
            return;
        }

        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Failed to read scope map {}: {}", path.display(), e);
                return;
            }
        };

        let entries = parse_scope_map(&raw);
        if let Ok(mut state) = self.state.write() {
            // An empty parse keeps the previous map
            if !entries.is_empty() || state.entries.is_empty() {
                state.entries = entries;
            }
            state.mtime = Some(mtime);
            debug!("Scope map reloaded ({} hosts)", state.entries.len());
        }
    }

    /// Resolve a host (port stripped) to a scope id: exact key, then short hostname
    pub fn resolve(&self, host: &str) -> Option<ScopeId> {
        let cleaned = host.split(':').next().unwrap_or_default().trim().to_lowercase();
        if cleaned.is_empty() {
            return None;
        }
        let state = self.state.read().ok()?;
        if let Some(id) = state.entries.get(&cleaned) {
            return Some(*id);
        }
        let short = cleaned.split('.').next()?;
        if short != cleaned {
            return state.entries.get(short).copied();
        }
        None
    }

    /// A host key mapped to `scope`, preferring IPv4-looking keys
    pub fn host_for_scope(&self, scope: ScopeId) -> Option<String> {
        let state = self.state.read().ok()?;
        let mut any = None;
        for (host, id) in state.entries.iter() {
            if *id != scope {
                continue;
            }
            if IPV4_RE.is_match(host) {
                return Some(host.clone());
            }
            if any.is_none() {
                any = Some(host.clone());
            }
        }
        any
    }

    /// Whether `scope` is a value of the map
    pub fn contains_scope(&self, scope: ScopeId) -> bool {
        self.state
            .read()
            .map(|s| s.entries.values().any(|id| *id == scope))
            .unwrap_or(false)
    }

    /// Mapped id for a host key, if present
    pub fn get(&self, host: &str) -> Option<ScopeId> {
        let state = self.state.read().ok()?;
        state.entries.get(&host.trim().to_lowercase()).copied()
    }

    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn file_mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn parse_id(value: &serde_json::Value) -> Option<ScopeId> {
    match value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        serde_json::Value::Object(obj) => obj.get("id").and_then(parse_id),
        _ => None,
    }
}

/// Parse the map file contents (JSON object or `host: id` lines)
pub fn parse_scope_map(raw: &str) -> BTreeMap<String, ScopeId> {
    let mut entries = BTreeMap::new();
    let raw = raw.trim();
    if raw.is_empty() {
        return entries;
    }

    if let Ok(serde_json::Value::Object(obj)) = serde_json::from_str::<serde_json::Value>(raw) {
        for (key, value) in obj.iter() {
            match parse_id(value) {
                Some(id) => {
                    entries.insert(key.trim().to_lowercase(), id);
                }
                None => warn!("Invalid scope map value for '{}': {}", key, value),
            }
        }
        return entries;
    }

    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        match value.trim().parse::<ScopeId>() {
            Ok(id) => {
                entries.insert(key.trim().to_lowercase(), id);
            }
            Err(_) => warn!("Invalid scope map value for '{}': {}", key.trim(), value.trim()),
        }
    }
    entries
}
