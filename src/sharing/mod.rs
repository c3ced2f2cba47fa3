//! Threshold secret sharing (Shamir over GF(2^8)).
//!
//! Each byte of the secret is the constant term of its own random
//! polynomial of degree `threshold - 1`; share `i` holds that polynomial
//! evaluated at `x = i` for every byte.
//!
//! Share strings are `<bits><id><data>`:
//! - `bits`: field width as one base-36 digit (always `8`)
//! - `id`: the x-coordinate as two lowercase hex digits (`01`..`ff`)
//! - `data`: hex of the evaluated bytes, same length as the secret
//!
//! **Insufficient shares are not detected.** Combining fewer shares than the
//! split threshold still interpolates a value and returns it without error;
//! that value is unrelated to the secret. Callers find out when the
//! recovered key fails to decrypt the vault it protects.
mod gf256;

use std::collections::BTreeMap;

use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::sensitive::SensitiveVec;
use crate::error::{Result, VaultError};

/// Field width in bits. Share strings carry it so other widths can be
/// recognised and rejected.
pub const FIELD_BITS: u32 = 8;

/// Largest share count the field supports (non-zero x-coordinates).
pub const MAX_SHARES: u8 = u8::MAX;

/// How many shares to produce and how many recover the secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharingConfig {
    pub total_shares: u8,
    pub threshold: u8,
}

impl Default for SharingConfig {
    fn default() -> Self {
        Self {
            total_shares: 5,
            threshold: 3,
        }
    }
}

impl SharingConfig {
    pub fn new(threshold: u8, total_shares: u8) -> Result<Self> {
        let config = Self {
            total_shares,
            threshold,
        };
        config.validate()?;
        Ok(config)
    }

    /// `1 <= threshold <= total_shares <= 255`.
    pub fn validate(&self) -> Result<()> {
        if self.threshold == 0 {
            return Err(VaultError::Sharing(
                "threshold must be at least 1".to_string(),
            ));
        }
        if self.total_shares == 0 {
            return Err(VaultError::Sharing(
                "total shares must be at least 1".to_string(),
            ));
        }
        if self.threshold > self.total_shares {
            return Err(VaultError::Sharing(format!(
                "threshold {} exceeds total shares {}",
                self.threshold, self.total_shares
            )));
        }
        Ok(())
    }
}

/// A parsed share.
#[derive(Debug, Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Share {
    /// x-coordinate, never zero.
    pub id: u8,
    /// One evaluated byte per secret byte.
    pub data: Vec<u8>,
}

impl Share {
    /// Render in the `<bits><id><data>` string form.
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(3 + self.data.len() * 2);
        out.push(char::from_digit(FIELD_BITS, 36).unwrap_or('8'));
        out.push_str(&format!("{:02x}", self.id));
        out.push_str(&hex::encode(&self.data));
        out
    }
}

/// Parse one share string.
pub fn parse_share(share: &str) -> Result<Share> {
    let share = share.trim();
    let mut chars = share.chars();

    let bits = chars
        .next()
        .ok_or_else(|| VaultError::Sharing("share is empty".to_string()))?
        .to_digit(36)
        .ok_or_else(|| VaultError::Sharing("share has an invalid bit-width prefix".to_string()))?;
    if bits != FIELD_BITS {
        return Err(VaultError::Sharing(format!(
            "share uses {bits}-bit field, only {FIELD_BITS}-bit shares are supported"
        )));
    }

    let rest = chars.as_str();
    if rest.len() < 4 {
        return Err(VaultError::Sharing(format!(
            "share is too short ({} characters)",
            share.len()
        )));
    }
    if !rest.is_char_boundary(2) {
        return Err(VaultError::Sharing("share id is not hex".to_string()));
    }
    let (id_hex, data_hex) = rest.split_at(2);

    let id = u8::from_str_radix(id_hex, 16)
        .map_err(|_| VaultError::Sharing(format!("share id {id_hex:?} is not hex")))?;
    if id == 0 {
        return Err(VaultError::Sharing("share id cannot be zero".to_string()));
    }

    let data = hex::decode(data_hex)
        .map_err(|e| VaultError::Sharing(format!("share {id} data is not valid hex: {e}")))?;

    Ok(Share { id, data })
}

/// Split `secret` into `config.total_shares` share strings.
pub fn split(secret: &[u8], config: &SharingConfig) -> Result<Vec<String>> {
    split_with_rng(secret, config, &mut OsRng)
}

pub fn split_with_rng<R: RngCore + CryptoRng>(
    secret: &[u8],
    config: &SharingConfig,
    rng: &mut R,
) -> Result<Vec<String>> {
    config.validate()?;
    if secret.is_empty() {
        return Err(VaultError::Sharing("cannot split an empty secret".to_string()));
    }

    let mut shares: Vec<Share> = (1..=config.total_shares)
        .map(|id| Share {
            id,
            data: vec![0u8; secret.len()],
        })
        .collect();

    let mut coeffs = vec![0u8; config.threshold as usize];
    for (byte_idx, &byte) in secret.iter().enumerate() {
        coeffs[0] = byte;
        rng.fill_bytes(&mut coeffs[1..]);

        for share in &mut shares {
            share.data[byte_idx] = gf256::eval_poly(&coeffs, share.id);
        }
    }
    coeffs.zeroize();

    Ok(shares.iter().map(Share::encode).collect())
}

/// Reconstruct the secret from share strings.
///
/// Exact duplicates are ignored; two shares with the same id but different
/// data are an error. Fewer shares than the split threshold produce a wrong
/// result, not an error (see the module docs).
pub fn combine<S: AsRef<str>>(shares: &[S]) -> Result<SensitiveVec> {
    if shares.is_empty() {
        return Err(VaultError::Sharing("no shares provided".to_string()));
    }

    let mut unique: BTreeMap<u8, Share> = BTreeMap::new();
    for raw in shares {
        let share = parse_share(raw.as_ref())?;
        match unique.get(&share.id) {
            Some(existing) if existing.data != share.data => {
                return Err(VaultError::Sharing(format!(
                    "conflicting shares with id {}",
                    share.id
                )));
            }
            Some(_) => {}
            None => {
                unique.insert(share.id, share);
            }
        }
    }

    let parsed: Vec<&Share> = unique.values().collect();
    let len = parsed[0].data.len();
    if let Some(bad) = parsed.iter().find(|s| s.data.len() != len) {
        return Err(VaultError::Sharing(format!(
            "share {} has {} data bytes, expected {len}",
            bad.id,
            bad.data.len()
        )));
    }

    // Lagrange basis evaluated at x = 0: L_j(0) = prod_{k != j} x_k / (x_j - x_k).
    // Subtraction in GF(2^8) is XOR.
    let basis: Vec<u8> = parsed
        .iter()
        .map(|sj| {
            parsed
                .iter()
                .filter(|sk| sk.id != sj.id)
                .fold(1u8, |acc, sk| gf256::mul(acc, gf256::div(sk.id, sj.id ^ sk.id)))
        })
        .collect();

    let secret = (0..len)
        .map(|byte_idx| {
            parsed
                .iter()
                .zip(&basis)
                .fold(0u8, |acc, (s, &l)| acc ^ gf256::mul(s.data[byte_idx], l))
        })
        .collect();

    Ok(SensitiveVec::new(secret))
}
