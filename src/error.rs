use thiserror::Error;

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    /// AEAD tag mismatch: the ciphertext, tag or associated data was altered.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unsupported version: {0}")]
    UnsupportedVersion(String),

    #[error("Secret sharing failed: {0}")]
    Sharing(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, VaultError>;
