//! Registry of recognized external-service credentials.
//!
//! Readers take lock-free snapshots through `ArcSwap`; writers are serialized
//! by a mutex and publish a fully built map in one swap, so no reader ever
//! observes a partially applied update.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use serde::Serialize;
use thiserror::Error;
use wolf_core::normalize_env_value;

pub const KEY_STATUS_SET: &str = "已設定";
pub const KEY_STATUS_UNSET: &str = "未設定";

/// Errors returned by key registry updates.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyRegistryError {
    #[error("unrecognized key name '{0}'")]
    UnrecognizedKey(String),
    #[error("value for '{0}' must not be empty; send null to clear it")]
    EmptyValue(KeyName),
}

/// Closed set of credential names the service understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum KeyName {
    #[serde(rename = "GOOGLE_API_KEY")]
    GoogleApiKey,
    #[serde(rename = "API_KEY_FRED")]
    ApiKeyFred,
    #[serde(rename = "API_KEY_FINMIND")]
    ApiKeyFinmind,
    #[serde(rename = "API_KEY_FINNHUB")]
    ApiKeyFinnhub,
    #[serde(rename = "API_KEY_FMP")]
    ApiKeyFmp,
    #[serde(rename = "ALPHA_VANTAGE_API_KEY")]
    AlphaVantageApiKey,
    #[serde(rename = "DEEPSEEK_API_KEY")]
    DeepseekApiKey,
}

impl KeyName {
    pub const ALL: [KeyName; 7] = [
        KeyName::GoogleApiKey,
        KeyName::ApiKeyFred,
        KeyName::ApiKeyFinmind,
        KeyName::ApiKeyFinnhub,
        KeyName::ApiKeyFmp,
        KeyName::AlphaVantageApiKey,
        KeyName::DeepseekApiKey,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::GoogleApiKey => "GOOGLE_API_KEY",
            Self::ApiKeyFred => "API_KEY_FRED",
            Self::ApiKeyFinmind => "API_KEY_FINMIND",
            Self::ApiKeyFinnhub => "API_KEY_FINNHUB",
            Self::ApiKeyFmp => "API_KEY_FMP",
            Self::AlphaVantageApiKey => "ALPHA_VANTAGE_API_KEY",
            Self::DeepseekApiKey => "DEEPSEEK_API_KEY",
        }
    }
}

impl fmt::Display for KeyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyName {
    type Err = KeyRegistryError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|name| name.as_str() == raw)
            .ok_or_else(|| KeyRegistryError::UnrecognizedKey(raw.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySource {
    Environment,
    Runtime,
}

/// Secret value with redacted formatting.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretValue(String);

impl SecretValue {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// Current value and provenance of one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEntry {
    pub name: KeyName,
    pub value: Option<SecretValue>,
    pub source: KeySource,
}

impl KeyEntry {
    pub fn is_set(&self) -> bool {
        self.value.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum KeyStatus {
    Set,
    Unset,
}

impl KeyStatus {
    /// Localized label shown by the dashboard.
    pub fn label(self) -> &'static str {
        match self {
            Self::Set => KEY_STATUS_SET,
            Self::Unset => KEY_STATUS_UNSET,
        }
    }
}

/// Requested change for one key in a batch update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyUpdate {
    Set(String),
    Clear,
}

type KeyMap = BTreeMap<KeyName, KeyEntry>;

/// Thread-safe holder of credential values keyed by `KeyName`.
pub struct KeyRegistry {
    entries: ArcSwap<KeyMap>,
    writer: Mutex<()>,
}

impl fmt::Debug for KeyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyRegistry")
            .field("entries", &self.entries.load_full())
            .finish()
    }
}

impl Default for KeyRegistry {
    fn default() -> Self {
        Self::from_environment(std::iter::empty::<(KeyName, String)>())
    }
}

impl KeyRegistry {
    /// Seeds the registry with environment-sourced values captured at startup.
    /// Blank values are treated as absent.
    pub fn from_environment<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = (KeyName, V)>,
        V: AsRef<str>,
    {
        let mut entries = KeyMap::new();
        for (name, raw) in values {
            if let Some(value) = normalize_env_value(raw.as_ref()) {
                entries.insert(
                    name,
                    KeyEntry {
                        name,
                        value: Some(SecretValue(value)),
                        source: KeySource::Environment,
                    },
                );
            }
        }
        Self {
            entries: ArcSwap::from_pointee(entries),
            writer: Mutex::new(()),
        }
    }

    /// Returns the current value, or `None` when unset.
    pub fn get(&self, name: KeyName) -> Option<String> {
        self.entries
            .load()
            .get(&name)
            .and_then(|entry| entry.value.as_ref())
            .map(|value| value.expose().to_string())
    }

    /// Returns the entry with provenance, or `None` if the key was never supplied.
    pub fn entry(&self, name: KeyName) -> Option<KeyEntry> {
        self.entries.load().get(&name).cloned()
    }

    pub fn status(&self) -> BTreeMap<KeyName, KeyStatus> {
        let snapshot = self.entries.load();
        KeyName::ALL
            .into_iter()
            .map(|name| {
                let status = match snapshot.get(&name) {
                    Some(entry) if entry.is_set() => KeyStatus::Set,
                    _ => KeyStatus::Unset,
                };
                (name, status)
            })
            .collect()
    }

    /// Status keyed by wire name with localized labels.
    pub fn status_labels(&self) -> BTreeMap<&'static str, &'static str> {
        self.status()
            .into_iter()
            .map(|(name, status)| (name.as_str(), status.label()))
            .collect()
    }

    /// Sets `name` to a non-empty `value` for the rest of the process.
    pub fn set(&self, name: &str, value: &str) -> Result<(), KeyRegistryError> {
        self.apply([(name.to_string(), KeyUpdate::Set(value.to_string()))])
            .map(|_| ())
    }

    /// Clears `name`; the cleared state still shadows any environment value.
    pub fn clear(&self, name: &str) -> Result<(), KeyRegistryError> {
        self.apply([(name.to_string(), KeyUpdate::Clear)]).map(|_| ())
    }

    /// Validates every update, then publishes them together.
    ///
    /// Returns the names that were updated, in request order.
    pub fn apply<I>(&self, updates: I) -> Result<Vec<KeyName>, KeyRegistryError>
    where
        I: IntoIterator<Item = (String, KeyUpdate)>,
    {
        let mut validated = Vec::new();
        for (raw_name, update) in updates {
            let name = raw_name.parse::<KeyName>()?;
            let value = match update {
                KeyUpdate::Set(value) => {
                    let trimmed = value.trim();
                    if trimmed.is_empty() {
                        return Err(KeyRegistryError::EmptyValue(name));
                    }
                    Some(SecretValue(trimmed.to_string()))
                }
                KeyUpdate::Clear => None,
            };
            validated.push((name, value));
        }

        let _guard = self
            .writer
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut next = KeyMap::clone(&self.entries.load());
        let mut updated = Vec::with_capacity(validated.len());
        for (name, value) in validated {
            let action = if value.is_some() { "set" } else { "cleared" };
            next.insert(
                name,
                KeyEntry {
                    name,
                    value,
                    source: KeySource::Runtime,
                },
            );
            tracing::info!(key = %name, action, "api key updated at runtime");
            updated.push(name);
        }
        self.entries.store(Arc::new(next));
        Ok(updated)
    }

    pub fn configured_count(&self) -> usize {
        self.entries
            .load()
            .values()
            .filter(|entry| entry.is_set())
            .count()
    }
}
