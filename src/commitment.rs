/// Security-question answer commitments.
///
/// Two stored formats coexist:
/// - `Legacy`: bare 64-character hex SHA-256 of the lowercased, trimmed
///   answer. Unsalted and cheap to brute force; only read for vaults created
///   before salted commitments existed.
/// - `Pbkdf2`: `pbkdf2-sha256$<iterations>$<saltB64>$<hashHex>`, a random
///   16-byte salt and PBKDF2-HMAC-SHA256 output.
///
/// [`verify`] never errors. An empty, malformed or unknown commitment is
/// simply a wrong answer.
use std::fmt;
use std::str::FromStr;

use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tracing::warn;
use unicode_normalization::UnicodeNormalization;

use crate::crypto::{hash, kdf, random};
use crate::encoding::{b64_decode, b64_encode};
use crate::error::{Result, VaultError};

pub const COMMITMENT_ITERATIONS: u32 = 100_000;
/// Stored counts above this are treated as malformed.
pub const MAX_COMMITMENT_ITERATIONS: u32 = 10 * COMMITMENT_ITERATIONS;
pub const SALT_LEN: usize = 16;
const PBKDF2_TAG: &str = "pbkdf2-sha256";

/// Answer normalization applied before hashing.
///
/// The profile used to verify must be the one used to commit; a mismatch
/// is indistinguishable from a wrong answer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Normalization {
    /// Use the answer verbatim.
    None,
    /// Unicode NFC, lowercase, trim.
    #[default]
    Default,
}

impl Normalization {
    pub fn apply(self, answer: &str) -> String {
        match self {
            Normalization::None => answer.to_string(),
            Normalization::Default => {
                let composed: String = answer.nfc().collect();
                composed.to_lowercase().trim().to_string()
            }
        }
    }
}

impl FromStr for Normalization {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(Normalization::None),
            "default" => Ok(Normalization::Default),
            other => Err(VaultError::InvalidInput(format!(
                "unknown normalization profile {other:?}"
            ))),
        }
    }
}

/// A stored answer commitment.
#[derive(Clone, PartialEq, Eq)]
pub enum Commitment {
    Legacy([u8; 32]),
    Pbkdf2 {
        iterations: u32,
        salt: Vec<u8>,
        hash: [u8; 32],
    },
}

impl Commitment {
    /// Commit to `answer` with a fresh random salt.
    pub fn new_with_rng<R: RngCore + CryptoRng>(
        answer: &str,
        normalization: Normalization,
        iterations: u32,
        rng: &mut R,
    ) -> Result<Self> {
        check_iterations(iterations)?;
        let salt = random::bytes_with_rng(rng, SALT_LEN);
        let normalized = normalization.apply(answer);
        let derived = kdf::pbkdf2_sha256(normalized.as_bytes(), &salt, iterations)?;
        Ok(Commitment::Pbkdf2 {
            iterations,
            salt,
            hash: *derived.as_bytes(),
        })
    }

    /// Recompute and compare in constant time.
    ///
    /// Legacy commitments always use lowercase + trim, regardless of
    /// `normalization`, because that is how they were written.
    pub fn matches(&self, answer: &str, normalization: Normalization) -> bool {
        match self {
            Commitment::Legacy(expected) => {
                let candidate = hash::sha256(answer.to_lowercase().trim().as_bytes());
                candidate[..].ct_eq(&expected[..]).into()
            }
            Commitment::Pbkdf2 {
                iterations,
                salt,
                hash,
            } => {
                let normalized = normalization.apply(answer);
                match kdf::pbkdf2_sha256(normalized.as_bytes(), salt, *iterations) {
                    Ok(derived) => derived.as_bytes()[..].ct_eq(&hash[..]).into(),
                    Err(_) => false,
                }
            }
        }
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, Commitment::Legacy(_))
    }
}

impl fmt::Display for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Commitment::Legacy(hash) => f.write_str(&hex::encode(hash)),
            Commitment::Pbkdf2 {
                iterations,
                salt,
                hash,
            } => write!(
                f,
                "{PBKDF2_TAG}${iterations}${}${}",
                b64_encode(salt),
                hex::encode(hash)
            ),
        }
    }
}

impl fmt::Debug for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Commitment::Legacy(_) => f.write_str("Commitment::Legacy"),
            Commitment::Pbkdf2 { iterations, .. } => {
                write!(f, "Commitment::Pbkdf2 {{ iterations: {iterations} }}")
            }
        }
    }
}

impl FromStr for Commitment {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(VaultError::InvalidInput("commitment is empty".to_string()));
        }

        if s.contains('$') {
            let parts: Vec<&str> = s.split('$').collect();
            let [tag, iterations, salt, hash] = parts.as_slice() else {
                return Err(VaultError::InvalidInput(format!(
                    "commitment has {} fields, expected 4",
                    parts.len()
                )));
            };
            if *tag != PBKDF2_TAG {
                return Err(VaultError::UnsupportedVersion(format!(
                    "commitment scheme {tag:?}"
                )));
            }
            let iterations: u32 = iterations.parse().map_err(|_| {
                VaultError::InvalidInput(format!("commitment iterations {iterations:?}"))
            })?;
            check_iterations(iterations)?;
            let salt = b64_decode("commitment salt", salt)?;
            let hash = decode_digest(hash)?;
            return Ok(Commitment::Pbkdf2 {
                iterations,
                salt,
                hash,
            });
        }

        Ok(Commitment::Legacy(decode_digest(s)?))
    }
}

fn check_iterations(iterations: u32) -> Result<()> {
    if iterations == 0 || iterations > MAX_COMMITMENT_ITERATIONS {
        return Err(VaultError::InvalidInput(format!(
            "commitment iterations {iterations} outside 1..={MAX_COMMITMENT_ITERATIONS}"
        )));
    }
    Ok(())
}

fn decode_digest(hex_str: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(hex_str)
        .map_err(|e| VaultError::InvalidInput(format!("commitment hash is not hex: {e}")))?;
    <[u8; 32]>::try_from(bytes.as_slice()).map_err(|_| {
        VaultError::InvalidInput(format!(
            "commitment hash is {} bytes, expected 32",
            bytes.len()
        ))
    })
}

/// Commit to an answer in the current salted format.
pub fn commit(answer: &str, normalization: Normalization) -> Result<String> {
    commit_with(answer, normalization, COMMITMENT_ITERATIONS, &mut OsRng)
}

pub fn commit_with<R: RngCore + CryptoRng>(
    answer: &str,
    normalization: Normalization,
    iterations: u32,
    rng: &mut R,
) -> Result<String> {
    Ok(Commitment::new_with_rng(answer, normalization, iterations, rng)?.to_string())
}

/// Legacy unsalted commitment. Kept so old vaults can be reproduced in tests
/// and migration tooling; new vaults never use it.
pub fn commit_legacy(answer: &str) -> String {
    Commitment::Legacy(hash::sha256(answer.to_lowercase().trim().as_bytes())).to_string()
}

/// Check `answer` against a stored commitment string.
pub fn verify(answer: &str, stored: &str, normalization: Normalization) -> bool {
    match stored.parse::<Commitment>() {
        Ok(commitment) => commitment.matches(answer, normalization),
        Err(e) => {
            if !stored.trim().is_empty() {
                warn!(error = %e, "Unparseable answer commitment treated as mismatch");
            }
            false
        }
    }
}

/// Positional verification; a missing answer or commitment is `false`.
pub fn verify_all<A: AsRef<str>, C: AsRef<str>>(
    answers: &[A],
    commitments: &[C],
    normalization: Normalization,
) -> Vec<bool> {
    commitments
        .iter()
        .enumerate()
        .map(|(i, stored)| {
            answers
                .get(i)
                .map(|answer| verify(answer.as_ref(), stored.as_ref(), normalization))
                .unwrap_or(false)
        })
        .collect()
}
