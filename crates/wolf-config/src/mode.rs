use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ConfigurationError;

/// Process-wide storage mode, fixed at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationMode {
    /// Session-local storage discarded when the process exits.
    Ephemeral,
    /// Remote-backed folders and stores that survive restarts.
    Durable,
}

impl OperationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ephemeral => "ephemeral",
            Self::Durable => "durable",
        }
    }

    pub fn is_durable(self) -> bool {
        matches!(self, Self::Durable)
    }
}

impl fmt::Display for OperationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationMode {
    type Err = ConfigurationError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "ephemeral" | "transient" => Ok(Self::Ephemeral),
            "durable" | "persistent" => Ok(Self::Durable),
            _ => Err(ConfigurationError::InvalidValue {
                setting: "OPERATION_MODE",
                value: raw.to_string(),
            }),
        }
    }
}

/// Which remote folder implementation backs durable mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteBackendKind {
    /// Google Drive folders addressed by folder id.
    Drive,
    /// Mounted directories addressed by path.
    Filesystem,
}

impl RemoteBackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Drive => "drive",
            Self::Filesystem => "filesystem",
        }
    }
}

impl FromStr for RemoteBackendKind {
    type Err = ConfigurationError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "drive" | "google_drive" | "google-drive" => Ok(Self::Drive),
            "filesystem" | "fs" | "local" => Ok(Self::Filesystem),
            _ => Err(ConfigurationError::InvalidValue {
                setting: "WOLF_REMOTE_BACKEND",
                value: raw.to_string(),
            }),
        }
    }
}
