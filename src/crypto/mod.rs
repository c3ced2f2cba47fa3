//! Cryptographic primitives: randomness, hashing, key derivation, the
//! payload cipher, the ML-KEM-768 layer and their hybrid composition.
pub mod cipher;
pub mod hash;
pub mod hybrid;
pub mod kdf;
pub mod kem;
pub mod random;
pub mod sensitive;
