//! PHI encryption: password-derived per-user keys and AES-256-GCM fields.

pub mod keyring;
pub mod phi;

use thiserror::Error;

pub use keyring::PhiKeyring;
pub use phi::{decrypt_field, derive_key, encrypt_field, generate_salt, EncryptedField, PhiKey};

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("No PHI key is unlocked for this session")]
    KeyUnavailable,
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),
    #[error("Encryption failed")]
    Encrypt,
    #[error("Decryption failed (wrong key or tampered data)")]
    Decrypt,
    #[error("Malformed encrypted field: {0}")]
    Encoding(String),
}
