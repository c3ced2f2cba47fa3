/// Post-quantum key encapsulation: ML-KEM-768 (CRYSTALS-Kyber, NIST FIPS 203).
///
/// Sizes for this parameter set:
/// - public key: 1184 bytes
/// - secret key: 2400 bytes
/// - ciphertext: 1088 bytes
/// - shared secret: 32 bytes
///
/// Downstream code consumes only the first 32 bytes of the shared secret as
/// an AES-256 key ([`shared_secret_to_key`]). For Kyber768 that is the whole
/// secret, but the truncation is part of the format: a future parameter set
/// with a longer shared secret must keep taking the leading 32 bytes to stay
/// interoperable with existing vaults.
///
/// Randomness for key generation and encapsulation comes from the pqcrypto
/// backend (OS randomness), not from a caller-supplied RNG.
use pqcrypto_kyber::kyber768;
use pqcrypto_traits::kem::{
    Ciphertext as _, PublicKey as PqPublicKey, SecretKey as PqSecretKey, SharedSecret as _,
};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::crypto::sensitive::{SensitiveBytes32, SensitiveVec};
use crate::encoding::{b64_decode, b64_encode};
use crate::error::{Result, VaultError};

pub const PUBLIC_KEY_LEN: usize = 1184;
pub const SECRET_KEY_LEN: usize = 2400;
pub const CIPHERTEXT_LEN: usize = 1088;
pub const SHARED_SECRET_LEN: usize = 32;

/// Key pair for ML-KEM-768.
pub struct KemKeyPair {
    pub public_key: Vec<u8>,
    secret_key: Vec<u8>,
}

impl KemKeyPair {
    pub fn generate() -> Self {
        let (pk, sk) = kyber768::keypair();
        Self {
            public_key: pk.as_bytes().to_vec(),
            secret_key: sk.as_bytes().to_vec(),
        }
    }

    /// Rebuild a key pair from raw bytes, checking both lengths.
    pub fn from_bytes(public_key: &[u8], secret_key: &[u8]) -> Result<Self> {
        check_len("ML-KEM-768 public key", public_key, PUBLIC_KEY_LEN)?;
        check_len("ML-KEM-768 secret key", secret_key, SECRET_KEY_LEN)?;
        Ok(Self {
            public_key: public_key.to_vec(),
            secret_key: secret_key.to_vec(),
        })
    }

    pub fn secret_key_bytes(&self) -> &[u8] {
        &self.secret_key
    }

    /// Base64 form for storage and hand-off to the caller.
    pub fn to_serialized(&self) -> SerializedKeyPair {
        SerializedKeyPair {
            public_key: b64_encode(&self.public_key),
            secret_key: b64_encode(&self.secret_key),
        }
    }
}

impl Drop for KemKeyPair {
    fn drop(&mut self) {
        self.secret_key.zeroize();
    }
}

/// Base64 key pair: `{publicKey, secretKey}`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedKeyPair {
    pub public_key: String,
    pub secret_key: String,
}

impl SerializedKeyPair {
    pub fn to_key_pair(&self) -> Result<KemKeyPair> {
        let public_key = b64_decode("publicKey", &self.public_key)?;
        let mut secret_key = b64_decode("secretKey", &self.secret_key)?;
        let pair = KemKeyPair::from_bytes(&public_key, &secret_key);
        secret_key.zeroize();
        pair
    }
}

impl std::fmt::Debug for SerializedKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerializedKeyPair")
            .field("public_key", &self.public_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

impl Drop for SerializedKeyPair {
    fn drop(&mut self) {
        self.secret_key.zeroize();
    }
}

/// Result of encapsulating against a public key.
pub struct Encapsulation {
    /// KEM ciphertext (1088 bytes), safe to publish.
    pub ciphertext: Vec<u8>,
    /// Shared secret, known only to the encapsulator and the key holder.
    pub shared_secret: SensitiveVec,
}

/// Encapsulate a fresh shared secret to `public_key`.
///
/// Every call produces a different ciphertext.
pub fn encapsulate(public_key: &[u8]) -> Result<Encapsulation> {
    let pk = kyber768::PublicKey::from_bytes(public_key)
        .map_err(|e| VaultError::InvalidInput(format!("Invalid ML-KEM-768 public key: {e:?}")))?;
    let (ss, ct) = kyber768::encapsulate(&pk);

    Ok(Encapsulation {
        ciphertext: ct.as_bytes().to_vec(),
        shared_secret: SensitiveVec::new(ss.as_bytes().to_vec()),
    })
}

/// Recover the shared secret for `ciphertext` with `secret_key`.
///
/// A well-formed but wrong secret key does not fail here: ML-KEM uses
/// implicit rejection and returns an unrelated pseudo-random secret.
pub fn decapsulate(ciphertext: &[u8], secret_key: &[u8]) -> Result<SensitiveVec> {
    let sk = kyber768::SecretKey::from_bytes(secret_key)
        .map_err(|e| VaultError::InvalidInput(format!("Invalid ML-KEM-768 secret key: {e:?}")))?;
    let ct = kyber768::Ciphertext::from_bytes(ciphertext)
        .map_err(|e| VaultError::InvalidInput(format!("Invalid ML-KEM-768 ciphertext: {e:?}")))?;
    let ss = kyber768::decapsulate(&ct, &sk);

    Ok(SensitiveVec::new(ss.as_bytes().to_vec()))
}

/// First 32 bytes of a shared secret, used as the AES-256 key.
pub fn shared_secret_to_key(shared_secret: &SensitiveVec) -> Result<SensitiveBytes32> {
    let bytes = shared_secret.as_bytes();
    if bytes.len() < 32 {
        return Err(VaultError::KeyDerivation(format!(
            "shared secret is {} bytes, need at least 32",
            bytes.len()
        )));
    }
    SensitiveBytes32::from_slice(&bytes[..32])
        .ok_or_else(|| VaultError::KeyDerivation("shared secret truncation failed".into()))
}

fn check_len(what: &str, bytes: &[u8], expected: usize) -> Result<()> {
    if bytes.len() != expected {
        return Err(VaultError::InvalidInput(format!(
            "{what} must be {expected} bytes, got {}",
            bytes.len()
        )));
    }
    Ok(())
}
