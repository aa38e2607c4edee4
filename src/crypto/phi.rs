//! Field-level encryption for protected health information.
//!
//! Keys are derived from the owning user's password with argon2id and the
//! per-user `phi_salt`, so the server can only decrypt while that user holds
//! an unlocked session. Every field carries its own random 96-bit nonce, and
//! a caller-supplied context string is bound in as associated data so a
//! ciphertext cannot be moved to another record.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use argon2::{
    password_hash::rand_core::{OsRng, RngCore},
    Argon2,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use secrecy::{ExposeSecret, SecretBox};
use std::fmt;
use std::str::FromStr;

use super::CryptoError;

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const SALT_LEN: usize = 16;
const FORMAT_VERSION: &str = "v1";

/// AES-256 key material, zeroized on drop.
pub struct PhiKey(SecretBox<[u8; KEY_LEN]>);

impl PhiKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(SecretBox::new(Box::new(bytes)))
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(self.0.expose_secret().into())
    }
}

impl fmt::Debug for PhiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PhiKey([REDACTED])")
    }
}

/// Fresh random salt, base64 encoded for the `users.phi_salt` column.
pub fn generate_salt() -> String {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    URL_SAFE_NO_PAD.encode(salt)
}

/// Derive a user's PHI key from their password and stored salt.
pub fn derive_key(password: &str, salt_b64: &str) -> Result<PhiKey, CryptoError> {
    let salt = URL_SAFE_NO_PAD
        .decode(salt_b64.trim())
        .map_err(|e| CryptoError::Encoding(format!("salt: {}", e)))?;
    if salt.len() < 8 {
        return Err(CryptoError::Encoding("salt must be at least 8 bytes".to_string()));
    }

    let mut key = [0u8; KEY_LEN];
    Argon2::default()
        .hash_password_into(password.as_bytes(), &salt, &mut key)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    let key = PhiKey::from_bytes(key);
    Ok(key)
}

/// An encrypted field. Text form: `v1.<nonce>.<ciphertext+tag>`, base64url.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedField {
    nonce: [u8; NONCE_LEN],
    ciphertext: Vec<u8>,
}

impl fmt::Display for EncryptedField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}",
            FORMAT_VERSION,
            URL_SAFE_NO_PAD.encode(self.nonce),
            URL_SAFE_NO_PAD.encode(&self.ciphertext)
        )
    }
}

impl FromStr for EncryptedField {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('.');
        let (version, nonce, ciphertext) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(v), Some(n), Some(c), None) => (v, n, c),
            _ => return Err(CryptoError::Encoding("expected three dot-separated parts".to_string())),
        };
        if version != FORMAT_VERSION {
            return Err(CryptoError::Encoding(format!("unsupported format version '{}'", version)));
        }

        let nonce_bytes = URL_SAFE_NO_PAD
            .decode(nonce)
            .map_err(|e| CryptoError::Encoding(format!("nonce: {}", e)))?;
        let nonce: [u8; NONCE_LEN] = nonce_bytes
            .try_into()
            .map_err(|_| CryptoError::Encoding("nonce must be 12 bytes".to_string()))?;
        let ciphertext = URL_SAFE_NO_PAD
            .decode(ciphertext)
            .map_err(|e| CryptoError::Encoding(format!("ciphertext: {}", e)))?;
        if ciphertext.len() < 16 {
            return Err(CryptoError::Encoding("ciphertext shorter than the auth tag".to_string()));
        }

        Ok(Self { nonce, ciphertext })
    }
}

pub fn encrypt_field(key: &PhiKey, plaintext: &str, context: &str) -> Result<EncryptedField, CryptoError> {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let ciphertext = key
        .cipher()
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: plaintext.as_bytes(),
                aad: context.as_bytes(),
            },
        )
        .map_err(|_| CryptoError::Encrypt)?;

    Ok(EncryptedField { nonce, ciphertext })
}

/// Fails with `CryptoError::Decrypt` on a wrong key, wrong context or any tampering.
pub fn decrypt_field(key: &PhiKey, field: &EncryptedField, context: &str) -> Result<String, CryptoError> {
    let plaintext = key
        .cipher()
        .decrypt(
            Nonce::from_slice(&field.nonce),
            Payload {
                msg: &field.ciphertext,
                aad: context.as_bytes(),
            },
        )
        .map_err(|_| CryptoError::Decrypt)?;

    String::from_utf8(plaintext).map_err(|_| CryptoError::Decrypt)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_for(password: &str, salt: &str) -> PhiKey {
        derive_key(password, salt).unwrap()
    }

    #[test]
    fn encrypt_then_decrypt_with_same_password() {
        let salt = generate_salt();
        let field = encrypt_field(&key_for("hunter2-but-longer", &salt), "Discussed attachment styles", "note:1").unwrap();

        // A fresh derivation (e.g. next login) must reproduce the key
        let text = decrypt_field(&key_for("hunter2-but-longer", &salt), &field, "note:1").unwrap();
        assert_eq!(text, "Discussed attachment styles");
    }

    #[test]
    fn wrong_password_salt_or_context_fails() {
        let salt = generate_salt();
        let key = key_for("right-password", &salt);
        let field = encrypt_field(&key, "PHI", "note:1").unwrap();

        assert!(matches!(decrypt_field(&key_for("wrong-password", &salt), &field, "note:1"), Err(CryptoError::Decrypt)));
        assert!(matches!(decrypt_field(&key_for("right-password", &generate_salt()), &field, "note:1"), Err(CryptoError::Decrypt)));
        assert!(matches!(decrypt_field(&key, &field, "note:2"), Err(CryptoError::Decrypt)));
    }

    #[test]
    fn nonces_are_unique_per_encryption() {
        let key = key_for("pw-pw-pw-pw", &generate_salt());
        let a = encrypt_field(&key, "same", "ctx").unwrap();
        let b = encrypt_field(&key, "same", "ctx").unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn text_form_parses_back_and_detects_tampering() {
        let key = key_for("pw-pw-pw-pw", &generate_salt());
        let field = encrypt_field(&key, "content", "ctx").unwrap();
        let stored = field.to_string();
        assert!(stored.starts_with("v1."));

        let parsed: EncryptedField = stored.parse().unwrap();
        assert_eq!(parsed, field);

        let mut tampered = parsed.clone();
        tampered.ciphertext[0] ^= 0x01;
        assert!(decrypt_field(&key, &tampered, "ctx").is_err());

        assert!("v2.a.b".parse::<EncryptedField>().is_err());
        assert!("garbage".parse::<EncryptedField>().is_err());
    }

    #[test]
    fn short_salt_is_rejected() {
        assert!(matches!(derive_key("pw", "AAAA"), Err(CryptoError::Encoding(_))));
    }
}
