use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

use super::{CryptoError, PhiKey};

/// Unlocked PHI keys, one per live session (token `jti`).
///
/// A key is only ever derived from the password at login, so a session
/// that loses its entry has to sign in again before it can touch PHI.
#[derive(Default)]
pub struct PhiKeyring {
    keys: DashMap<Uuid, (Arc<PhiKey>, i64)>,
}

impl PhiKeyring {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, jti: Uuid, key: PhiKey, expires_at: i64) {
        self.keys.insert(jti, (Arc::new(key), expires_at));
    }

    /// Expired entries are dropped on access.
    pub fn get(&self, jti: &Uuid) -> Result<Arc<PhiKey>, CryptoError> {
        let now = Utc::now().timestamp();
        let (key, expires_at) = self
            .keys
            .get(jti)
            .map(|entry| (entry.value().0.clone(), entry.value().1))
            .ok_or(CryptoError::KeyUnavailable)?;

        if expires_at <= now {
            self.keys.remove(jti);
            return Err(CryptoError::KeyUnavailable);
        }
        Ok(key)
    }

    /// Re-home a key from a refreshed token onto its replacement.
    pub fn transfer(&self, from: &Uuid, to: Uuid, expires_at: i64) -> bool {
        match self.keys.remove(from) {
            Some((_, (key, _))) => {
                self.keys.insert(to, (key, expires_at));
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, jti: &Uuid) -> bool {
        self.keys.remove(jti).is_some()
    }

    pub fn purge_expired(&self) -> usize {
        let now = Utc::now().timestamp();
        let before = self.keys.len();
        self.keys.retain(|_, (_, expires_at)| *expires_at > now);
        before.saturating_sub(self.keys.len())
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> PhiKey {
        PhiKey::from_bytes([7u8; 32])
    }

    #[test]
    fn lookup_transfer_and_remove() {
        let ring = PhiKeyring::new();
        let later = Utc::now().timestamp() + 3600;
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        ring.insert(first, key(), later);
        assert!(ring.get(&first).is_ok());

        assert!(ring.transfer(&first, second, later));
        assert!(matches!(ring.get(&first), Err(CryptoError::KeyUnavailable)));
        assert!(ring.get(&second).is_ok());

        assert!(ring.remove(&second));
        assert!(ring.is_empty());
        assert!(!ring.transfer(&second, first, later));
    }

    #[test]
    fn expired_keys_are_unavailable_and_purged() {
        let ring = PhiKeyring::new();
        let stale = Uuid::new_v4();
        ring.insert(stale, key(), Utc::now().timestamp() - 1);
        ring.insert(Uuid::new_v4(), key(), Utc::now().timestamp() + 60);

        assert_eq!(ring.purge_expired(), 1);
        assert_eq!(ring.len(), 1);

        ring.insert(stale, key(), Utc::now().timestamp() - 1);
        assert!(matches!(ring.get(&stale), Err(CryptoError::KeyUnavailable)));
        assert_eq!(ring.len(), 1);
    }
}
