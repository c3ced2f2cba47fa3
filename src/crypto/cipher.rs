/// Symmetric payload cipher: AES-256 in CBC (legacy block mode) or GCM (AEAD).
///
/// Payloads are serialized to compact JSON before encryption. New
/// ciphertexts always carry an explicit `algorithm` tag; untagged records
/// written by older clients fall back to IV-length inference when the
/// `legacy-mode-inference` feature is enabled.
///
/// CBC offers no integrity protection. The SHA-256 checksum stored next to
/// the ciphertext is advisory only: for CBC records a mismatch is logged,
/// never enforced. Only GCM detects tampering.
use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::crypto::{hash, random};
use crate::crypto::sensitive::SensitiveBytes32;
use crate::encoding::{b64_decode, b64_encode};
use crate::error::{Result, VaultError};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

pub const CBC_IV_LEN: usize = 16;
pub const GCM_NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// Which AES mode protects a ciphertext.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CipherMode {
    /// AES-256-CBC with PKCS#7 padding. Unauthenticated.
    #[default]
    #[serde(rename = "aes-256-cbc")]
    Cbc,
    /// AES-256-GCM with a 16-byte tag appended to the ciphertext.
    #[serde(rename = "aes-256-gcm")]
    Gcm,
}

impl CipherMode {
    pub fn iv_len(self) -> usize {
        match self {
            CipherMode::Cbc => CBC_IV_LEN,
            CipherMode::Gcm => GCM_NONCE_LEN,
        }
    }

    pub fn is_authenticated(self) -> bool {
        matches!(self, CipherMode::Gcm)
    }
}

/// An encrypted payload as it crosses the storage boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedVault {
    /// Base64 ciphertext (GCM: ciphertext followed by the tag).
    pub cipher_text: String,
    /// Base64 IV (CBC, 16 bytes) or nonce (GCM, 12 bytes).
    pub iv: String,
    /// Hex SHA-256 of the raw ciphertext bytes. Advisory.
    pub checksum: String,
    /// Explicit mode tag. Absent only on legacy records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<CipherMode>,
    /// Base64 KEM ciphertext when the key was encapsulated (hybrid mode).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pqc_cipher_text: Option<String>,
}

impl EncryptedVault {
    /// Resolve the cipher mode: explicit tag first, IV length as fallback.
    pub fn mode(&self) -> Result<CipherMode> {
        let iv = b64_decode("iv", &self.iv)?;
        self.resolve_mode(iv.len())
    }

    fn resolve_mode(&self, iv_len: usize) -> Result<CipherMode> {
        match self.algorithm {
            Some(mode) => Ok(mode),
            None => infer_mode(iv_len),
        }
    }

    pub fn is_hybrid(&self) -> bool {
        self.pqc_cipher_text.is_some()
    }
}

#[cfg(feature = "legacy-mode-inference")]
fn infer_mode(iv_len: usize) -> Result<CipherMode> {
    let mode = if iv_len == GCM_NONCE_LEN {
        CipherMode::Gcm
    } else {
        CipherMode::Cbc
    };
    debug!(iv_len, ?mode, "Inferred cipher mode from IV length");
    Ok(mode)
}

#[cfg(not(feature = "legacy-mode-inference"))]
fn infer_mode(_iv_len: usize) -> Result<CipherMode> {
    Err(VaultError::InvalidInput(
        "encrypted vault has no algorithm tag".to_string(),
    ))
}

/// Encrypt a payload in block mode (AES-256-CBC).
///
/// `key` may be any length; see [`hash::normalize_key`].
pub fn encrypt<T: Serialize + ?Sized>(payload: &T, key: &[u8]) -> Result<EncryptedVault> {
    encrypt_with_mode(payload, key, CipherMode::Cbc)
}

pub fn encrypt_with_mode<T: Serialize + ?Sized>(
    payload: &T,
    key: &[u8],
    mode: CipherMode,
) -> Result<EncryptedVault> {
    encrypt_with_rng(payload, key, mode, &mut OsRng)
}

pub fn encrypt_with_rng<T, R>(
    payload: &T,
    key: &[u8],
    mode: CipherMode,
    rng: &mut R,
) -> Result<EncryptedVault>
where
    T: Serialize + ?Sized,
    R: RngCore + CryptoRng,
{
    let plaintext =
        serde_json::to_vec(payload).map_err(|e| VaultError::Serialization(e.to_string()))?;
    let key = SensitiveBytes32::new(hash::normalize_key(key));

    let (iv, ciphertext) = match mode {
        CipherMode::Cbc => {
            let iv: [u8; CBC_IV_LEN] = random::array_with_rng(rng);
            (iv.to_vec(), cbc_encrypt(&key, &iv, &plaintext)?)
        }
        CipherMode::Gcm => {
            let nonce: [u8; GCM_NONCE_LEN] = random::array_with_rng(rng);
            (nonce.to_vec(), gcm_encrypt(&key, &nonce, &plaintext, b"")?)
        }
    };

    debug!(?mode, bytes = plaintext.len(), "Encrypted payload");

    Ok(EncryptedVault {
        checksum: hash::sha256_hex(&ciphertext),
        cipher_text: b64_encode(&ciphertext),
        iv: b64_encode(&iv),
        algorithm: Some(mode),
        pqc_cipher_text: None,
    })
}

/// Decrypt a payload produced by [`encrypt`] or [`encrypt_with_mode`].
pub fn decrypt<T: DeserializeOwned>(encrypted: &EncryptedVault, key: &[u8]) -> Result<T> {
    let plaintext = decrypt_bytes(encrypted, key)?;
    serde_json::from_slice(&plaintext)
        .map_err(|e| VaultError::Decryption(format!("plaintext is not a valid payload: {e}")))
}

/// Decrypt to the raw serialized payload bytes.
pub fn decrypt_bytes(encrypted: &EncryptedVault, key: &[u8]) -> Result<Vec<u8>> {
    let ciphertext = b64_decode("cipherText", &encrypted.cipher_text)?;
    let iv = b64_decode("iv", &encrypted.iv)?;
    let mode = encrypted.resolve_mode(iv.len())?;
    if iv.len() != mode.iv_len() {
        return Err(VaultError::InvalidInput(format!(
            "{mode:?} IV must be {} bytes, got {}",
            mode.iv_len(),
            iv.len()
        )));
    }

    // GCM's tag already covers the ciphertext.
    if !mode.is_authenticated()
        && !encrypted.checksum.is_empty()
        && encrypted.checksum != hash::sha256_hex(&ciphertext)
    {
        warn!(?mode, "Ciphertext checksum mismatch");
    }

    let key = SensitiveBytes32::new(hash::normalize_key(key));

    match mode {
        CipherMode::Cbc => {
            let iv: [u8; CBC_IV_LEN] = iv
                .as_slice()
                .try_into()
                .map_err(|_| VaultError::InvalidInput("bad CBC IV".to_string()))?;
            cbc_decrypt(&key, &iv, &ciphertext)
        }
        CipherMode::Gcm => {
            let nonce: [u8; GCM_NONCE_LEN] = iv
                .as_slice()
                .try_into()
                .map_err(|_| VaultError::InvalidInput("bad GCM nonce".to_string()))?;
            gcm_decrypt(&key, &nonce, &ciphertext, b"")
        }
    }
}

/// AES-256-CBC with PKCS#7 padding.
pub fn cbc_encrypt(
    key: &SensitiveBytes32,
    iv: &[u8; CBC_IV_LEN],
    plaintext: &[u8],
) -> Result<Vec<u8>> {
    let cipher = Aes256CbcEnc::new_from_slices(key.as_bytes(), iv)
        .map_err(|e| VaultError::Encryption(e.to_string()))?;
    Ok(cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
}

pub fn cbc_decrypt(
    key: &SensitiveBytes32,
    iv: &[u8; CBC_IV_LEN],
    ciphertext: &[u8],
) -> Result<Vec<u8>> {
    if ciphertext.is_empty() || ciphertext.len() % 16 != 0 {
        return Err(VaultError::Decryption(format!(
            "CBC ciphertext length {} is not a positive multiple of 16",
            ciphertext.len()
        )));
    }
    let cipher = Aes256CbcDec::new_from_slices(key.as_bytes(), iv)
        .map_err(|e| VaultError::Decryption(e.to_string()))?;
    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| VaultError::Decryption("invalid padding (wrong key or corrupted data)".into()))
}

/// AES-256-GCM. Returns ciphertext with the 16-byte tag appended.
pub fn gcm_encrypt(
    key: &SensitiveBytes32,
    nonce: &[u8; GCM_NONCE_LEN],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| VaultError::Encryption(e.to_string()))?;
    cipher
        .encrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| VaultError::Encryption(e.to_string()))
}

/// AES-256-GCM decrypt. Tag mismatch surfaces as [`VaultError::Authentication`].
pub fn gcm_decrypt(
    key: &SensitiveBytes32,
    nonce: &[u8; GCM_NONCE_LEN],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    if ciphertext.len() < TAG_LEN {
        return Err(VaultError::Decryption(format!(
            "AEAD ciphertext is {} bytes, shorter than the {TAG_LEN}-byte tag",
            ciphertext.len()
        )));
    }
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| VaultError::Decryption(e.to_string()))?;
    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| VaultError::Authentication("AES-GCM tag verification failed".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::{json, Value};

    fn flip_ciphertext_byte(encrypted: &mut EncryptedVault, index: usize) {
        let mut raw = b64_decode("cipherText", &encrypted.cipher_text).unwrap();
        raw[index] ^= 0x01;
        encrypted.cipher_text = b64_encode(&raw);
    }

    #[test]
    fn test_cbc_roundtrip() {
        let key = [0x42u8; 32];
        let payload = json!({"title": "My will", "documents": [], "useHybrid": false});

        let encrypted = encrypt(&payload, &key).unwrap();
        assert_eq!(encrypted.algorithm, Some(CipherMode::Cbc));
        assert_eq!(b64_decode("iv", &encrypted.iv).unwrap().len(), CBC_IV_LEN);

        let decrypted: Value = decrypt(&encrypted, &key).unwrap();
        assert_eq!(decrypted, payload);
    }

    #[test]
    fn test_scenario_hi_message_gcm() {
        let key = [0xFFu8; 32];
        let payload = json!({"message": "hi"});

        let encrypted = encrypt_with_mode(&payload, &key, CipherMode::Gcm).unwrap();
        let decrypted: Value = decrypt(&encrypted, &key).unwrap();
        assert_eq!(decrypted, payload);

        let mut tampered = encrypted.clone();
        flip_ciphertext_byte(&mut tampered, 0);
        let err = decrypt::<Value>(&tampered, &key).unwrap_err();
        assert!(matches!(err, VaultError::Authentication(_)));
    }

    #[test]
    fn test_scenario_hi_message_cbc() {
        let key = [0xFFu8; 32];
        let payload = json!({"message": "hi"});
        let encrypted = encrypt(&payload, &key).unwrap();
        let decrypted: Value = decrypt(&encrypted, &key).unwrap();
        assert_eq!(decrypted, payload);
    }

    #[test]
    fn test_gcm_every_byte_flip_detected() {
        let key = [0x07u8; 32];
        let encrypted = encrypt_with_mode(&json!({"a": 1}), &key, CipherMode::Gcm).unwrap();
        let len = b64_decode("cipherText", &encrypted.cipher_text).unwrap().len();

        // Covers ciphertext body and the trailing tag.
        for i in 0..len {
            let mut tampered = encrypted.clone();
            flip_ciphertext_byte(&mut tampered, i);
            assert!(matches!(
                decrypt::<Value>(&tampered, &key),
                Err(VaultError::Authentication(_))
            ));
        }
    }

    #[test]
    fn test_gcm_wrong_key_fails() {
        let encrypted =
            encrypt_with_mode(&json!({"secret": true}), &[1u8; 32], CipherMode::Gcm).unwrap();
        assert!(matches!(
            decrypt::<Value>(&encrypted, &[2u8; 32]),
            Err(VaultError::Authentication(_))
        ));
    }

    #[test]
    fn test_cbc_wrong_key_fails() {
        let encrypted = encrypt(&json!({"secret": "a longer payload body"}), &[1u8; 32]).unwrap();
        // Padding or JSON parsing rejects the garbage plaintext.
        assert!(decrypt::<Value>(&encrypted, &[2u8; 32]).is_err());
    }

    #[test]
    fn test_gcm_short_ciphertext_rejected() {
        let encrypted = EncryptedVault {
            cipher_text: b64_encode([0u8; 8]),
            iv: b64_encode([0u8; GCM_NONCE_LEN]),
            checksum: String::new(),
            algorithm: Some(CipherMode::Gcm),
            pqc_cipher_text: None,
        };
        assert!(matches!(
            decrypt::<Value>(&encrypted, &[0u8; 32]),
            Err(VaultError::Decryption(_))
        ));
    }

    #[test]
    fn test_malformed_base64_rejected() {
        let mut encrypted = encrypt(&json!({}), &[0u8; 32]).unwrap();
        encrypted.cipher_text = "%%%".to_string();
        assert!(matches!(
            decrypt::<Value>(&encrypted, &[0u8; 32]),
            Err(VaultError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_explicit_tag_overrides_iv_length() {
        let key = [3u8; 32];
        let mut encrypted = encrypt_with_mode(&json!({"x": 1}), &key, CipherMode::Gcm).unwrap();
        encrypted.algorithm = Some(CipherMode::Cbc);
        // A 12-byte IV is not a valid CBC IV: the tag wins over inference.
        assert!(matches!(
            decrypt::<Value>(&encrypted, &key),
            Err(VaultError::InvalidInput(_))
        ));
    }

    #[cfg(feature = "legacy-mode-inference")]
    #[test]
    fn test_untagged_records_infer_mode() {
        let key = [9u8; 32];
        let payload = json!({"legacy": true});

        let mut gcm = encrypt_with_mode(&payload, &key, CipherMode::Gcm).unwrap();
        gcm.algorithm = None;
        assert_eq!(gcm.mode().unwrap(), CipherMode::Gcm);
        assert_eq!(decrypt::<Value>(&gcm, &key).unwrap(), payload);

        let mut cbc = encrypt(&payload, &key).unwrap();
        cbc.algorithm = None;
        assert_eq!(cbc.mode().unwrap(), CipherMode::Cbc);
        assert_eq!(decrypt::<Value>(&cbc, &key).unwrap(), payload);
    }

    #[test]
    fn test_non_32_byte_key_is_normalized() {
        let payload = json!({"k": "v"});
        let encrypted = encrypt(&payload, b"not a 32 byte key").unwrap();
        let via_hash: Value = decrypt(&encrypted, &hash::sha256(b"not a 32 byte key")).unwrap();
        assert_eq!(via_hash, payload);
    }

    #[test]
    fn test_checksum_matches_ciphertext() {
        let encrypted = encrypt(&json!({"c": 1}), &[5u8; 32]).unwrap();
        let raw = b64_decode("cipherText", &encrypted.cipher_text).unwrap();
        assert_eq!(encrypted.checksum, hash::sha256_hex(&raw));
    }

    #[test]
    fn test_iv_length_must_match_mode() {
        let key = [6u8; 32];
        let mut encrypted = encrypt(&json!({"i": 1}), &key).unwrap();
        encrypted.iv = b64_encode([0u8; 8]);
        let err = decrypt::<Value>(&encrypted, &key).unwrap_err();
        assert!(matches!(err, VaultError::InvalidInput(msg) if msg.contains("16 bytes")));
    }

    #[test]
    fn test_bad_checksum_is_advisory() {
        let key = [5u8; 32];
        let mut encrypted = encrypt(&json!({"c": 1}), &key).unwrap();
        encrypted.checksum = "00".repeat(32);
        assert!(decrypt::<Value>(&encrypted, &key).is_ok());
    }

    #[test]
    fn test_seeded_encryption_is_deterministic() {
        let key = [8u8; 32];
        let payload = json!({"d": 1});
        let a = encrypt_with_rng(&payload, &key, CipherMode::Gcm, &mut StdRng::seed_from_u64(1))
            .unwrap();
        let b = encrypt_with_rng(&payload, &key, CipherMode::Gcm, &mut StdRng::seed_from_u64(1))
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_wire_format_field_names() {
        let encrypted = encrypt(&json!({}), &[0u8; 32]).unwrap();
        let wire = serde_json::to_value(&encrypted).unwrap();
        assert!(wire.get("cipherText").is_some());
        assert_eq!(wire["algorithm"], "aes-256-cbc");
        assert!(wire.get("pqcCipherText").is_none());
    }

    fn any_mode() -> impl Strategy<Value = CipherMode> {
        prop_oneof![Just(CipherMode::Cbc), Just(CipherMode::Gcm)]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_any_payload_any_key_roundtrips(
            text in ".*",
            key in proptest::array::uniform32(any::<u8>()),
            mode in any_mode(),
        ) {
            let encrypted = encrypt_with_mode(&text, &key, mode).unwrap();
            prop_assert_eq!(encrypted.algorithm, Some(mode));
            let decrypted: String = decrypt(&encrypted, &key).unwrap();
            prop_assert_eq!(decrypted, text);
        }
    }
}
