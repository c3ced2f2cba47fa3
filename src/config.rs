/// Caller-injected configuration for vault preparation.
use serde::{Deserialize, Serialize};

use crate::crypto::cipher::CipherMode;
use crate::error::{Result, VaultError};
use crate::sharing::SharingConfig;

/// Configuration for a vault preparation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VaultConfig {
    /// Share count and reconstruction threshold (3-of-5 by default).
    pub sharing: SharingConfig,
    /// Payload cipher mode for new vaults.
    pub cipher_mode: CipherMode,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            sharing: SharingConfig::default(),
            cipher_mode: CipherMode::Cbc,
        }
    }
}

impl VaultConfig {
    pub fn validate(&self) -> Result<()> {
        self.sharing.validate()
    }

    /// Load from a JSON document; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| VaultError::Serialization(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}
