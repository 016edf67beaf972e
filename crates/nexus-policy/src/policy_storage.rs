use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use nexus_core::{read_text_if_exists, write_text_atomic};
use serde::Serialize;
use serde_json::Value;

use crate::{lamports_to_sol, sol_to_lamports, PolicyRecord, Protocol};

pub const POLICY_STORAGE_KEY: &str = "nexus.policy.v1";

/// Get/set capability for opaque string blobs.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
}

#[derive(Debug, Default)]
/// Public struct `InMemoryKeyValueStore` used across Nexus components.
pub struct InMemoryKeyValueStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl KeyValueStore for InMemoryKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("in-memory store lock poisoned"))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("in-memory store lock poisoned"))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// JSON object file holding every key, rewritten atomically on each set.
#[derive(Debug)]
pub struct FileKeyValueStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileKeyValueStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// An unparsable file reads as empty so the next `set` rewrites it.
    fn read_entries(&self) -> Result<BTreeMap<String, String>> {
        let Some(raw) = read_text_if_exists(&self.path)? else {
            return Ok(BTreeMap::new());
        };
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        match serde_json::from_str(&raw) {
            Ok(entries) => Ok(entries),
            Err(error) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %error,
                    "key-value store is corrupt; treating it as empty"
                );
                Ok(BTreeMap::new())
            }
        }
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read_entries()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| anyhow::anyhow!("key-value store lock poisoned"))?;
        let mut entries = self.read_entries()?;
        entries.insert(key.to_string(), value.to_string());
        let encoded = serde_json::to_string_pretty(&entries)
            .context("failed to encode key-value store")?;
        write_text_atomic(&self.path, &encoded)
            .with_context(|| format!("failed to write key-value store {}", self.path.display()))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StoredPolicy {
    daily_limit_sol: f64,
    daily_spent_sol: f64,
    allowed_protocols: Vec<Protocol>,
    is_active: bool,
}

/// Builds a policy from loosely-typed stored JSON, falling back field by field
/// to the defaults.
pub fn coerce_policy(value: &Value) -> PolicyRecord {
    let defaults = PolicyRecord::default();
    let Some(object) = value.as_object() else {
        return defaults;
    };

    let daily_limit_sol = sanitize_sol(object.get("dailyLimitSol"), defaults.daily_limit_sol());
    let daily_spent_sol = sanitize_sol(object.get("dailySpentSol"), defaults.daily_spent_sol());

    let allowed_protocols = match object.get("allowedProtocols").and_then(Value::as_array) {
        Some(values) => {
            let mut protocols: Vec<Protocol> = Vec::new();
            for protocol in values
                .iter()
                .filter_map(Value::as_str)
                .filter_map(|raw| Protocol::ALL.into_iter().find(|p| p.as_str() == raw))
            {
                if !protocols.contains(&protocol) {
                    protocols.push(protocol);
                }
            }
            protocols
        }
        None => Vec::new(),
    };

    PolicyRecord {
        daily_limit_lamports: sol_to_lamports(daily_limit_sol),
        daily_spent_lamports: sol_to_lamports(daily_spent_sol),
        allowed_protocols: if allowed_protocols.is_empty() {
            defaults.allowed_protocols
        } else {
            allowed_protocols
        },
        is_active: object
            .get("isActive")
            .and_then(Value::as_bool)
            .unwrap_or(defaults.is_active),
    }
}

fn sanitize_sol(value: Option<&Value>, fallback: f64) -> f64 {
    let parsed = match value {
        Some(Value::Number(number)) => number.as_f64(),
        Some(Value::String(raw)) => raw.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(amount) if amount.is_finite() => amount.max(0.0),
        _ => fallback,
    }
}

/// Missing or corrupt data yields the default policy; store failures propagate.
pub fn load_policy(store: &dyn KeyValueStore) -> Result<PolicyRecord> {
    let Some(raw) = store
        .get(POLICY_STORAGE_KEY)
        .context("failed to read stored policy")?
    else {
        return Ok(PolicyRecord::default());
    };
    match serde_json::from_str::<Value>(&raw) {
        Ok(value) => Ok(coerce_policy(&value)),
        Err(error) => {
            tracing::warn!(error = %error, "stored policy is corrupt; using defaults");
            Ok(PolicyRecord::default())
        }
    }
}

pub fn save_policy(store: &dyn KeyValueStore, policy: &PolicyRecord) -> Result<()> {
    let stored = StoredPolicy {
        daily_limit_sol: lamports_to_sol(policy.daily_limit_lamports),
        daily_spent_sol: lamports_to_sol(policy.daily_spent_lamports),
        allowed_protocols: policy.allowed_protocols.clone(),
        is_active: policy.is_active,
    };
    let encoded = serde_json::to_string(&stored).context("failed to encode policy")?;
    store
        .set(POLICY_STORAGE_KEY, &encoded)
        .context("failed to persist policy")
}
