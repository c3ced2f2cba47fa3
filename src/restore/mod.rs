/// Unlock side of a vault, the inverse of [`crate::pipeline`]:
/// 1. Decrypt the metadata with the vault id (no shares needed)
/// 2. Show the stored security questions and check answers against their
///    commitments
/// 3. Combine beneficiary shares into the protecting key
/// 4. Decrypt the payload (classic: AES key; hybrid: ML-KEM-768 secret key)
///
/// Answer checks gate nothing here. Whether a failed answer blocks release is
/// up to the caller; the shares alone are sufficient to open the payload.
use tracing::{debug, info, warn};

use crate::commitment::{self, Normalization};
use crate::crypto::cipher;
use crate::crypto::hybrid;
use crate::crypto::kem;
use crate::crypto::sensitive::SensitiveVec;
use crate::error::{Result, VaultError};
use crate::metadata::MetadataCipher;
use crate::sharing;
use crate::vault::{StorageEnvelope, VaultMetadata, VaultPayload};

/// Reconstruct the protecting key (AES key or KEM secret key) from shares.
///
/// Too few shares yield the wrong bytes, which then fail at decryption.
pub fn recover_key<S: AsRef<str>>(shares: &[S]) -> Result<SensitiveVec> {
    let key = sharing::combine(shares)?;
    debug!(provided = shares.len(), key_len = key.len(), "Combined shares");
    Ok(key)
}

/// Decrypt the envelope's metadata.
pub fn read_metadata(envelope: &StorageEnvelope) -> Result<VaultMetadata> {
    MetadataCipher::for_vault(&envelope.id)?.decrypt(&envelope.m)
}

/// Plaintext security questions, in stored order.
pub fn security_questions(envelope: &StorageEnvelope) -> Result<Vec<String>> {
    let metadata_cipher = MetadataCipher::for_vault(&envelope.id)?;
    let metadata: VaultMetadata = metadata_cipher.decrypt(&envelope.m)?;
    metadata
        .security_questions
        .iter()
        .map(|q| metadata_cipher.decrypt_text(&q.encrypted_question))
        .collect()
}

/// Check answers positionally against the stored commitments.
pub fn verify_answers<A: AsRef<str>>(
    envelope: &StorageEnvelope,
    answers: &[A],
    normalization: Normalization,
) -> Result<Vec<bool>> {
    let metadata = read_metadata(envelope)?;
    let commitments = metadata.answer_commitments();
    if answers.len() != commitments.len() {
        warn!(
            vault_id = %envelope.id,
            answers = answers.len(),
            questions = commitments.len(),
            "Answer count does not match question count"
        );
    }

    let results = commitment::verify_all(answers, &commitments, normalization);
    info!(
        vault_id = %envelope.id,
        matched = results.iter().filter(|ok| **ok).count(),
        questions = results.len(),
        "Verified security answers"
    );
    Ok(results)
}

/// Recover the key from `shares` and decrypt the payload.
pub fn open_vault<S: AsRef<str>>(envelope: &StorageEnvelope, shares: &[S]) -> Result<VaultPayload> {
    info!(
        vault_id = %envelope.id,
        version = envelope.v,
        hybrid = envelope.d.is_hybrid(),
        "Opening vault"
    );

    let key = recover_key(shares)?;

    let payload = if envelope.d.is_hybrid() {
        if key.len() != kem::SECRET_KEY_LEN {
            return Err(VaultError::InvalidInput(format!(
                "shares reconstruct {} bytes, hybrid vault needs a {}-byte secret key",
                key.len(),
                kem::SECRET_KEY_LEN
            )));
        }
        hybrid::decrypt_hybrid(&envelope.d, key.as_bytes())?
    } else {
        cipher::decrypt(&envelope.d, key.as_bytes())?
    };

    info!(vault_id = %envelope.id, "Vault opened");
    Ok(payload)
}
