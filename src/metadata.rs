/// Versioned, vault-bound metadata encryption.
///
/// The key is derived from the vault id alone (PBKDF2-HMAC-SHA256 with a
/// fixed application salt), so the same id always re-derives the same key
/// and nothing extra has to be stored. The vault id is therefore not a
/// secret: it must be unguessable (a random UUID), but anyone holding it can
/// read the metadata. Access control lives in the share quorum, not here.
///
/// Formats:
/// - `v3:<base64(nonce12 ‖ ciphertext ‖ tag16)>`: AES-256-GCM with the vault
///   id as associated data, so a blob cannot be replayed under another id.
/// - `v1` (legacy, read-only): `base64(iv16 ‖ ciphertext)` with AES-256-CBC,
///   unprefixed or `v1:`-prefixed. No authentication.
/// - `v2:` was retired and is always rejected.
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::crypto::cipher::{self, CBC_IV_LEN, GCM_NONCE_LEN};
use crate::crypto::sensitive::SensitiveBytes32;
use crate::crypto::{kdf, random};
use crate::encoding::{b64_decode, b64_encode};
use crate::error::{Result, VaultError};

pub const METADATA_KDF_SALT: &[u8] = b"heirvault-metadata-salt-v1";
pub const METADATA_KDF_ITERATIONS: u32 = 100_000;

/// Version written by [`MetadataCipher::encrypt_text`].
pub const CURRENT_VERSION: MetadataVersion = MetadataVersion::V3;

/// Metadata ciphertext versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataVersion {
    /// Legacy AES-256-CBC.
    V1,
    /// Retired; never decrypted.
    V2,
    /// AES-256-GCM bound to the vault id.
    V3,
}

impl MetadataVersion {
    pub fn prefix(self) -> &'static str {
        match self {
            MetadataVersion::V1 => "v1:",
            MetadataVersion::V2 => "v2:",
            MetadataVersion::V3 => "v3:",
        }
    }

    pub fn number(self) -> u8 {
        match self {
            MetadataVersion::V1 => 1,
            MetadataVersion::V2 => 2,
            MetadataVersion::V3 => 3,
        }
    }

    /// Split a versioned string into its version and body.
    pub fn detect(value: &str) -> Result<(Self, &str)> {
        if let Some(body) = value.strip_prefix("v3:") {
            return Ok((MetadataVersion::V3, body));
        }
        if value.starts_with("v2:") {
            return Err(VaultError::UnsupportedVersion(
                "metadata version v2 is no longer supported".to_string(),
            ));
        }
        if let Some(body) = value.strip_prefix("v1:") {
            return Ok((MetadataVersion::V1, body));
        }
        if let Some(other) = version_prefix(value) {
            return Err(VaultError::UnsupportedVersion(format!(
                "unknown metadata version {other}"
            )));
        }
        Ok((MetadataVersion::V1, value))
    }
}

/// `vN` when `value` starts with `v<digits>:`. Base64 never contains `:`.
fn version_prefix(value: &str) -> Option<&str> {
    let (head, _) = value.split_once(':')?;
    let digits = head.strip_prefix('v')?;
    (!digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())).then_some(head)
}

/// Metadata cipher for one vault. Derives the key once.
pub struct MetadataCipher {
    vault_id: String,
    key: SensitiveBytes32,
}

impl MetadataCipher {
    pub fn for_vault(vault_id: &str) -> Result<Self> {
        Self::with_iterations(vault_id, METADATA_KDF_ITERATIONS)
    }

    fn with_iterations(vault_id: &str, iterations: u32) -> Result<Self> {
        if vault_id.is_empty() {
            return Err(VaultError::InvalidInput("vault id is empty".to_string()));
        }
        let key = kdf::pbkdf2_sha256(vault_id.as_bytes(), METADATA_KDF_SALT, iterations)?;
        Ok(Self {
            vault_id: vault_id.to_string(),
            key,
        })
    }

    /// Encrypt text in the current (`v3`) format.
    pub fn encrypt_text(&self, plaintext: &str) -> Result<String> {
        self.encrypt_text_with_rng(plaintext, &mut OsRng)
    }

    pub fn encrypt_text_with_rng<R: RngCore + CryptoRng>(
        &self,
        plaintext: &str,
        rng: &mut R,
    ) -> Result<String> {
        let nonce: [u8; GCM_NONCE_LEN] = random::array_with_rng(rng);
        let ciphertext = cipher::gcm_encrypt(
            &self.key,
            &nonce,
            plaintext.as_bytes(),
            self.vault_id.as_bytes(),
        )?;

        let mut blob = Vec::with_capacity(GCM_NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);

        Ok(format!("{}{}", CURRENT_VERSION.prefix(), b64_encode(&blob)))
    }

    /// Decrypt any supported version.
    pub fn decrypt_text(&self, value: &str) -> Result<String> {
        let (version, body) = MetadataVersion::detect(value.trim())?;
        debug!(version = version.number(), "Decrypting metadata");

        let blob = b64_decode("metadata", body)?;
        let plaintext = match version {
            MetadataVersion::V3 => {
                if blob.len() < GCM_NONCE_LEN {
                    return Err(VaultError::Decryption(
                        "v3 metadata is shorter than its nonce".to_string(),
                    ));
                }
                let (nonce, ciphertext) = blob.split_at(GCM_NONCE_LEN);
                let nonce: [u8; GCM_NONCE_LEN] = nonce
                    .try_into()
                    .map_err(|_| VaultError::Decryption("bad v3 nonce".to_string()))?;
                cipher::gcm_decrypt(&self.key, &nonce, ciphertext, self.vault_id.as_bytes())?
            }
            MetadataVersion::V1 => {
                if blob.len() < CBC_IV_LEN {
                    return Err(VaultError::Decryption(
                        "v1 metadata is shorter than its IV".to_string(),
                    ));
                }
                let (iv, ciphertext) = blob.split_at(CBC_IV_LEN);
                let iv: [u8; CBC_IV_LEN] = iv
                    .try_into()
                    .map_err(|_| VaultError::Decryption("bad v1 IV".to_string()))?;
                cipher::cbc_decrypt(&self.key, &iv, ciphertext)?
            }
            MetadataVersion::V2 => {
                return Err(VaultError::UnsupportedVersion(
                    "metadata version v2 is no longer supported".to_string(),
                ))
            }
        };

        String::from_utf8(plaintext)
            .map_err(|_| VaultError::Decryption("metadata is not valid UTF-8".to_string()))
    }

    pub fn encrypt<T: Serialize + ?Sized>(&self, metadata: &T) -> Result<String> {
        self.encrypt_with_rng(metadata, &mut OsRng)
    }

    pub fn encrypt_with_rng<T, R>(&self, metadata: &T, rng: &mut R) -> Result<String>
    where
        T: Serialize + ?Sized,
        R: RngCore + CryptoRng,
    {
        let json =
            serde_json::to_string(metadata).map_err(|e| VaultError::Serialization(e.to_string()))?;
        self.encrypt_text_with_rng(&json, rng)
    }

    pub fn decrypt<T: DeserializeOwned>(&self, value: &str) -> Result<T> {
        let json = self.decrypt_text(value)?;
        serde_json::from_str(&json).map_err(|e| VaultError::Serialization(e.to_string()))
    }

    /// Legacy writer, for producing `v1` fixtures.
    #[cfg(test)]
    fn encrypt_text_v1(&self, plaintext: &str) -> Result<String> {
        let iv: [u8; CBC_IV_LEN] = random::array_with_rng(&mut OsRng);
        let ciphertext = cipher::cbc_encrypt(&self.key, &iv, plaintext.as_bytes())?;
        let mut blob = iv.to_vec();
        blob.extend_from_slice(&ciphertext);
        Ok(b64_encode(&blob))
    }
}

/// Encrypt a metadata object under `vault_id` (current version).
pub fn encrypt_metadata<T: Serialize + ?Sized>(metadata: &T, vault_id: &str) -> Result<String> {
    MetadataCipher::for_vault(vault_id)?.encrypt(metadata)
}

/// Decrypt a versioned metadata string produced for `vault_id`.
pub fn decrypt_metadata<T: DeserializeOwned>(value: &str, vault_id: &str) -> Result<T> {
    MetadataCipher::for_vault(vault_id)?.decrypt(value)
}
