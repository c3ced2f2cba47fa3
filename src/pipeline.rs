/// Vault preparation orchestrator.
///
/// Coordinates the full creation flow:
/// 1. Generate a vault id
/// 2. Encrypt the payload (classic: random AES key; hybrid: ML-KEM-768
///    key pair) and split the protecting key into shares
/// 3. Assign shares to beneficiaries round-robin
/// 4. Commit security answers and encrypt the question texts
/// 5. Build and encrypt the vault metadata under the vault id
/// 6. Assemble the storage envelope
///
/// Any failure aborts the whole run. Nothing partial is returned and there
/// is no resume state: the caller starts again from the payload.
///
/// Share contents: a classic vault's shares reconstruct the raw 32-byte AES
/// key. A hybrid vault's shares reconstruct the raw 2400-byte ML-KEM-768
/// secret key (the `pqcrypto` byte encoding, not base64 text), which
/// [`crate::restore::open_vault`] feeds straight into decapsulation.
///
/// The sealed payload never contains security answers. They are blanked
/// before encryption and survive only as commitments in the metadata.
///
/// The orchestrator never persists key material. The KEM secret key is split
/// into shares and also returned (serialized) to the caller; what happens to
/// it after that is the caller's concern.
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use serde::Serialize;
use tracing::{debug, info};
use uuid::{Builder, Uuid};

use crate::commitment::{self, Normalization, COMMITMENT_ITERATIONS};
use crate::config::VaultConfig;
use crate::crypto::cipher::{self, EncryptedVault};
use crate::crypto::kem::{KemKeyPair, SerializedKeyPair};
use crate::crypto::{hybrid, random};
use crate::encoding::b64_encode;
use crate::error::{Result, VaultError};
use crate::metadata::MetadataCipher;
use crate::sharing;
use crate::vault::{
    Beneficiary, SecurityQuestionRecord, StorageEnvelope, VaultMetadata, VaultPayload,
    ENCRYPTION_VERSION, ENVELOPE_TYPE, ENVELOPE_VERSION,
};

/// One share handed to one beneficiary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareAssignment {
    pub beneficiary_index: usize,
    pub beneficiary_name: String,
    pub share_index: usize,
    pub share: String,
}

/// Everything a creation run produces.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreparedVault {
    pub vault_id: Uuid,
    /// All shares, in id order.
    pub shares: Vec<String>,
    /// Empty when the payload names no beneficiaries.
    pub share_assignments: Vec<ShareAssignment>,
    /// Storage-ready record.
    pub envelope: StorageEnvelope,
    /// Same value as `envelope.d`.
    pub encrypted_vault: EncryptedVault,
    /// Hybrid vaults only. The caller's copy; not stored anywhere by us.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pqc_key_pair: Option<SerializedKeyPair>,
}

/// Prepare a new vault.
pub fn prepare_vault(payload: &VaultPayload, config: &VaultConfig) -> Result<PreparedVault> {
    prepare_vault_with_rng(payload, config, &mut OsRng)
}

/// Prepare a new vault drawing the id, keys, IVs, salts and share
/// polynomials from `rng`. A classic vault is fully reproducible from a
/// seeded generator; a hybrid vault's KEM step still uses system randomness.
pub fn prepare_vault_with_rng<R: RngCore + CryptoRng>(
    payload: &VaultPayload,
    config: &VaultConfig,
    rng: &mut R,
) -> Result<PreparedVault> {
    let vault_id = Builder::from_random_bytes(random::array_with_rng(rng)).into_uuid();
    prepare(payload, config, vault_id, ENVELOPE_VERSION, rng)
}

/// Re-run preparation for an edited payload.
///
/// Keeps the vault id and writes the next envelope version. Keys, shares and
/// commitments are all fresh; the previous envelope stays as it was.
pub fn prepare_vault_edit(
    payload: &VaultPayload,
    config: &VaultConfig,
    previous: &StorageEnvelope,
) -> Result<PreparedVault> {
    prepare_vault_edit_with_rng(payload, config, previous, &mut OsRng)
}

pub fn prepare_vault_edit_with_rng<R: RngCore + CryptoRng>(
    payload: &VaultPayload,
    config: &VaultConfig,
    previous: &StorageEnvelope,
    rng: &mut R,
) -> Result<PreparedVault> {
    let vault_id = Uuid::parse_str(&previous.id)
        .map_err(|e| VaultError::InvalidInput(format!("previous envelope id: {e}")))?;
    let version = previous
        .v
        .checked_add(1)
        .ok_or_else(|| VaultError::InvalidInput("envelope version overflow".to_string()))?;
    prepare(payload, config, vault_id, version, rng)
}

fn prepare<R: RngCore + CryptoRng>(
    payload: &VaultPayload,
    config: &VaultConfig,
    vault_id: Uuid,
    version: u32,
    rng: &mut R,
) -> Result<PreparedVault> {
    config.validate()?;
    let id = vault_id.to_string();
    let mode = config.cipher_mode;

    info!(
        vault_id = %id,
        version,
        hybrid = payload.use_hybrid,
        beneficiaries = payload.beneficiaries.len(),
        questions = payload.security_questions.len(),
        "Preparing vault"
    );

    // 2. Encrypt and split
    let sealed = payload.without_answers();
    let (encrypted_vault, shares, key_pair) = if payload.use_hybrid {
        let key_pair = KemKeyPair::generate();
        let encrypted = hybrid::encrypt_hybrid_with_rng(&sealed, &key_pair.public_key, mode, rng)?;
        let shares = sharing::split_with_rng(key_pair.secret_key_bytes(), &config.sharing, rng)?;
        (encrypted, shares, Some(key_pair))
    } else {
        let key = random::key_with_rng(rng);
        let encrypted = cipher::encrypt_with_rng(&sealed, key.as_bytes(), mode, rng)?;
        let shares = sharing::split_with_rng(key.as_bytes(), &config.sharing, rng)?;
        (encrypted, shares, None)
    };
    debug!(
        shares = shares.len(),
        threshold = config.sharing.threshold,
        ?mode,
        "Payload encrypted and key split"
    );

    // 3. Distribute
    let share_assignments = assign_shares(&payload.beneficiaries, &shares);

    // 4. Security questions
    let metadata_cipher = MetadataCipher::for_vault(&id)?;
    let mut security_questions = Vec::with_capacity(payload.security_questions.len());
    for q in &payload.security_questions {
        security_questions.push(SecurityQuestionRecord {
            encrypted_question: metadata_cipher.encrypt_text_with_rng(&q.question, rng)?,
            answer_commitment: commitment::commit_with(
                &q.answer,
                Normalization::Default,
                COMMITMENT_ITERATIONS,
                rng,
            )?,
        });
    }

    // 5. Metadata
    let metadata = VaultMetadata {
        trigger: payload.trigger.clone(),
        beneficiary_count: payload.beneficiaries.len(),
        security_questions,
        will_type: payload.will_type,
        is_pqc_enabled: key_pair.is_some(),
        encryption_version: ENCRYPTION_VERSION,
        pqc_public_key: key_pair.as_ref().map(|kp| b64_encode(&kp.public_key)),
    };
    let encrypted_metadata = metadata_cipher.encrypt_with_rng(&metadata, rng)?;

    // 6. Envelope
    let envelope = StorageEnvelope {
        id: id.clone(),
        v: version,
        t: ENVELOPE_TYPE.to_string(),
        m: encrypted_metadata,
        d: encrypted_vault.clone(),
    };

    info!(
        vault_id = %id,
        version,
        shares = shares.len(),
        assigned = share_assignments.len(),
        "Vault prepared"
    );

    Ok(PreparedVault {
        vault_id,
        shares,
        share_assignments,
        envelope,
        encrypted_vault,
        pqc_key_pair: key_pair.as_ref().map(KemKeyPair::to_serialized),
    })
}

/// Beneficiary `i` receives share `i % shares.len()`.
pub fn assign_shares(beneficiaries: &[Beneficiary], shares: &[String]) -> Vec<ShareAssignment> {
    if shares.is_empty() {
        return Vec::new();
    }
    beneficiaries
        .iter()
        .enumerate()
        .map(|(i, beneficiary)| {
            let share_index = i % shares.len();
            ShareAssignment {
                beneficiary_index: i,
                beneficiary_name: beneficiary.name.clone(),
                share_index,
                share: shares[share_index].clone(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::cipher::CipherMode;
    use crate::crypto::kem;
    use crate::encoding::b64_decode;
    use crate::metadata::decrypt_metadata;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use crate::sharing::SharingConfig;
    use crate::vault::{ReleaseTrigger, SecurityQuestion, WillType};

    fn beneficiary(name: &str) -> Beneficiary {
        Beneficiary {
            name: name.to_string(),
            email: None,
            wallet_address: None,
        }
    }

    fn payload(use_hybrid: bool, beneficiaries: usize) -> VaultPayload {
        VaultPayload {
            title: "Will".to_string(),
            content: "All my books go to the town library.".to_string(),
            documents: vec![],
            security_questions: vec![SecurityQuestion {
                question: "Name of the first dog?".to_string(),
                answer: "Rex".to_string(),
            }],
            beneficiaries: (0..beneficiaries)
                .map(|i| beneficiary(&format!("heir-{i}")))
                .collect(),
            trigger: ReleaseTrigger::Death,
            payment_method: "crypto".to_string(),
            will_type: WillType::Editable,
            use_hybrid,
        }
    }

    #[test]
    fn test_classic_vault_decrypts_with_threshold_shares() {
        let prepared = prepare_vault(&payload(false, 2), &VaultConfig::default()).unwrap();

        assert_eq!(prepared.shares.len(), 5);
        assert!(prepared.pqc_key_pair.is_none());
        assert_eq!(prepared.envelope.id, prepared.vault_id.to_string());
        assert_eq!(prepared.envelope.v, ENVELOPE_VERSION);
        assert_eq!(prepared.envelope.d, prepared.encrypted_vault);
        assert!(prepared.envelope.m.starts_with("v3:"));

        let key = sharing::combine(&prepared.shares[1..4]).unwrap();
        assert_eq!(key.len(), 32);
        let decrypted: VaultPayload =
            cipher::decrypt(&prepared.encrypted_vault, key.as_bytes()).unwrap();
        assert_eq!(decrypted, payload(false, 2).without_answers());
    }

    #[test]
    fn test_hybrid_vault_shares_hold_kem_secret_key() {
        let prepared = prepare_vault(&payload(true, 1), &VaultConfig::default()).unwrap();

        let pair = prepared.pqc_key_pair.as_ref().unwrap().to_key_pair().unwrap();
        let secret_key = sharing::combine(&prepared.shares[..3]).unwrap();
        assert_eq!(secret_key.len(), kem::SECRET_KEY_LEN);
        assert_eq!(secret_key.as_bytes(), pair.secret_key_bytes());

        let decrypted: VaultPayload =
            hybrid::decrypt_hybrid(&prepared.encrypted_vault, secret_key.as_bytes()).unwrap();
        assert_eq!(decrypted, payload(true, 1).without_answers());

        let metadata: VaultMetadata =
            decrypt_metadata(&prepared.envelope.m, &prepared.envelope.id).unwrap();
        assert!(metadata.is_pqc_enabled);
        let pk = b64_decode("pk", metadata.pqc_public_key.as_deref().unwrap()).unwrap();
        assert_eq!(pk, pair.public_key);
    }

    #[test]
    fn test_metadata_contents() {
        let prepared = prepare_vault(&payload(false, 3), &VaultConfig::default()).unwrap();
        let cipher = MetadataCipher::for_vault(&prepared.envelope.id).unwrap();
        let metadata: VaultMetadata = cipher.decrypt(&prepared.envelope.m).unwrap();

        assert_eq!(metadata.beneficiary_count, 3);
        assert_eq!(metadata.trigger, ReleaseTrigger::Death);
        assert_eq!(metadata.will_type, WillType::Editable);
        assert!(!metadata.is_pqc_enabled);
        assert!(metadata.pqc_public_key.is_none());
        assert_eq!(metadata.encryption_version, 3);

        let record = &metadata.security_questions[0];
        assert_eq!(
            cipher.decrypt_text(&record.encrypted_question).unwrap(),
            "Name of the first dog?"
        );
        assert!(commitment::verify(" rex", &record.answer_commitment, Normalization::Default));
        assert!(!record.answer_commitment.contains("Rex"));
    }

    #[test]
    fn test_round_robin_assignment() {
        let shares: Vec<String> = (0..3).map(|i| format!("share-{i}")).collect();
        let heirs: Vec<Beneficiary> = (0..7).map(|i| beneficiary(&format!("h{i}"))).collect();

        let assignments = assign_shares(&heirs, &shares);
        let indices: Vec<usize> = assignments.iter().map(|a| a.share_index).collect();
        assert_eq!(indices, vec![0, 1, 2, 0, 1, 2, 0]);
        assert_eq!(assignments[4].share, "share-1");
        assert_eq!(assignments[6].beneficiary_name, "h6");
    }

    #[test]
    fn test_no_beneficiaries_no_assignments() {
        let prepared = prepare_vault(&payload(false, 0), &VaultConfig::default()).unwrap();
        assert_eq!(prepared.shares.len(), 5);
        assert!(prepared.share_assignments.is_empty());
    }

    #[test]
    fn test_custom_config_and_gcm() {
        let config = VaultConfig {
            sharing: SharingConfig::new(2, 4).unwrap(),
            cipher_mode: CipherMode::Gcm,
        };
        let prepared = prepare_vault(&payload(false, 4), &config).unwrap();
        assert_eq!(prepared.shares.len(), 4);
        assert_eq!(prepared.encrypted_vault.algorithm, Some(CipherMode::Gcm));

        let key = sharing::combine(&[&prepared.shares[0], &prepared.shares[3]]).unwrap();
        let decrypted: VaultPayload =
            cipher::decrypt(&prepared.encrypted_vault, key.as_bytes()).unwrap();
        assert_eq!(decrypted.title, "Will");
    }

    #[test]
    fn test_invalid_config_aborts() {
        let config = VaultConfig {
            sharing: SharingConfig {
                total_shares: 2,
                threshold: 5,
            },
            cipher_mode: CipherMode::Cbc,
        };
        assert!(matches!(
            prepare_vault(&payload(false, 1), &config),
            Err(VaultError::Sharing(_))
        ));
    }

    #[test]
    fn test_edit_bumps_version_keeps_id() {
        let first = prepare_vault(&payload(false, 1), &VaultConfig::default()).unwrap();

        let mut edited = payload(false, 1);
        edited.content = "Changed my mind: everything to the cat.".to_string();
        let second = prepare_vault_edit(&edited, &VaultConfig::default(), &first.envelope).unwrap();

        assert_eq!(second.vault_id, first.vault_id);
        assert_eq!(second.envelope.v, first.envelope.v + 1);
        assert_ne!(second.shares, first.shares);

        let key = sharing::combine(&second.shares[..3]).unwrap();
        let decrypted: VaultPayload = cipher::decrypt(&second.envelope.d, key.as_bytes()).unwrap();
        assert_eq!(decrypted.content, edited.content);
    }

    #[test]
    fn test_edit_requires_uuid_id() {
        let first = prepare_vault(&payload(false, 0), &VaultConfig::default()).unwrap();
        let mut envelope = first.envelope.clone();
        envelope.id = "not-a-uuid".to_string();
        let result = prepare_vault_edit(&payload(false, 0), &VaultConfig::default(), &envelope);
        assert!(result.is_err());
    }

    #[test]
    fn test_vault_ids_unique() {
        let a = prepare_vault(&payload(false, 0), &VaultConfig::default()).unwrap();
        let b = prepare_vault(&payload(false, 0), &VaultConfig::default()).unwrap();
        assert_ne!(a.vault_id, b.vault_id);
    }

    #[test]
    fn test_sealed_payload_has_no_answers() {
        let prepared = prepare_vault(&payload(false, 1), &VaultConfig::default()).unwrap();
        let key = sharing::combine(&prepared.shares[..3]).unwrap();
        let plaintext = cipher::decrypt_bytes(&prepared.envelope.d, key.as_bytes()).unwrap();

        assert!(!String::from_utf8(plaintext).unwrap().contains("Rex"));
    }

    #[test]
    fn test_seeded_classic_runs_are_identical() {
        let config = VaultConfig::default();
        let run = |seed| {
            prepare_vault_with_rng(&payload(false, 2), &config, &mut StdRng::seed_from_u64(seed))
                .unwrap()
        };

        let (a, b) = (run(11), run(11));
        assert_eq!(a.vault_id, b.vault_id);
        assert_eq!(a.vault_id.get_version_num(), 4);
        assert_eq!(a.shares, b.shares);
        assert_eq!(a.share_assignments, b.share_assignments);
        assert_eq!(a.envelope, b.envelope);

        let c = run(12);
        assert_ne!(a.vault_id, c.vault_id);
        assert_ne!(a.envelope, c.envelope);
    }

    #[test]
    fn test_seeded_edit_is_reproducible() {
        let config = VaultConfig::default();
        let first = prepare_vault(&payload(false, 1), &config).unwrap();
        let edit = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            prepare_vault_edit_with_rng(&payload(false, 1), &config, &first.envelope, &mut rng)
                .unwrap()
        };

        let (a, b) = (edit(5), edit(5));
        assert_eq!(a.envelope, b.envelope);
        assert_eq!(a.envelope.v, first.envelope.v + 1);
    }
}
