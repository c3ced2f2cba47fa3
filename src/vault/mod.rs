/// Vault data model: the plaintext payload, its encrypted metadata and the
/// storage envelope handed to external storage.
///
/// The payload exists in plaintext only inside the caller and inside the
/// encrypted vault. The metadata travels encrypted under the vault id. The
/// envelope is what storage sees: `{id, v, t, m, d}`, opaque apart from the
/// id and version.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::cipher::EncryptedVault;
use crate::error::{Result, VaultError};

/// Current envelope format version for a freshly created vault.
pub const ENVELOPE_VERSION: u32 = 1;

/// Type tag carried in every envelope.
pub const ENVELOPE_TYPE: &str = "vault";

/// Metadata `encryptionVersion` for vaults written by this crate.
pub const ENCRYPTION_VERSION: u8 = 3;

/// The plaintext being protected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultPayload {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub documents: Vec<Document>,
    #[serde(default)]
    pub security_questions: Vec<SecurityQuestion>,
    #[serde(default)]
    pub beneficiaries: Vec<Beneficiary>,
    pub trigger: ReleaseTrigger,
    #[serde(default)]
    pub payment_method: String,
    #[serde(default)]
    pub will_type: WillType,
    #[serde(default)]
    pub use_hybrid: bool,
}

impl VaultPayload {
    /// The copy that gets sealed into the encrypted vault. Answers are
    /// blanked: only their commitments survive, in the metadata.
    pub fn without_answers(&self) -> Self {
        let mut sealed = self.clone();
        for question in &mut sealed.security_questions {
            question.answer.clear();
        }
        sealed
    }
}

/// An attached document blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub name: String,
    pub size: u64,
    /// Declared MIME type, as supplied by the uploader.
    #[serde(rename = "type")]
    pub mime_type: String,
    #[serde(with = "crate::encoding::base64_bytes")]
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityQuestion {
    pub question: String,
    pub answer: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Beneficiary {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet_address: Option<String>,
}

/// When the vault may be released.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ReleaseTrigger {
    Date { date: DateTime<Utc> },
    Death,
    Manual,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WillType {
    #[default]
    Editable,
    NonEditable,
}

/// Stored per security question: the question can be shown again, the
/// answer can only be checked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityQuestionRecord {
    /// Question text, metadata-cipher encrypted.
    pub encrypted_question: String,
    /// Answer commitment string.
    pub answer_commitment: String,
}

/// Vault metadata, encrypted as a unit under the vault id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultMetadata {
    pub trigger: ReleaseTrigger,
    pub beneficiary_count: usize,
    pub security_questions: Vec<SecurityQuestionRecord>,
    pub will_type: WillType,
    pub is_pqc_enabled: bool,
    pub encryption_version: u8,
    /// Base64 ML-KEM-768 public key, hybrid vaults only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pqc_public_key: Option<String>,
}

impl VaultMetadata {
    pub fn answer_commitments(&self) -> Vec<&str> {
        self.security_questions
            .iter()
            .map(|q| q.answer_commitment.as_str())
            .collect()
    }
}

/// The obfuscated record written to storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageEnvelope {
    /// Vault id.
    pub id: String,
    /// Envelope version; each edit writes a new, higher version.
    pub v: u32,
    /// Type tag.
    pub t: String,
    /// Encrypted metadata (versioned string).
    pub m: String,
    /// Encrypted vault.
    pub d: EncryptedVault,
}

impl StorageEnvelope {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| VaultError::Serialization(e.to_string()))
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let envelope: Self =
            serde_json::from_slice(data).map_err(|e| VaultError::Serialization(e.to_string()))?;
        if envelope.t != ENVELOPE_TYPE {
            return Err(VaultError::InvalidInput(format!(
                "unexpected envelope type {:?}",
                envelope.t
            )));
        }
        if envelope.id.is_empty() {
            return Err(VaultError::InvalidInput("envelope has no vault id".to_string()));
        }
        Ok(envelope)
    }
}
