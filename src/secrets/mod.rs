//! Encryption at rest for provider API keys.
//!
//! [`AesGcmCipher`] seals secrets with AES-256-GCM using a fresh 96-bit
//! nonce per call; the 128-bit tag travels at the end of the ciphertext.
//! [`CredentialStore`] keeps sealed keys per provider and opens them on
//! demand.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::Rng;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::config::{ProviderConfig, ProviderConfigBuilder};
use crate::errors::SecretError;
use crate::types::query::ProviderId;

/// AES-256 key length in bytes.
pub const KEY_LEN: usize = 32;

/// GCM nonce length in bytes.
pub const NONCE_LEN: usize = 12;

/// A sealed secret; both fields are standard base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedSecret {
    /// Ciphertext with the authentication tag appended.
    pub ciphertext: String,
    /// The nonce used for sealing.
    pub iv: String,
}

/// Seals and opens secrets.
pub trait SecretCipher: Send + Sync {
    /// Seals `plaintext`.
    fn encrypt(&self, plaintext: &str) -> Result<EncryptedSecret, SecretError>;

    /// Opens a sealed secret.
    fn decrypt(&self, ciphertext: &str, iv: &str) -> Result<SecretString, SecretError>;
}

/// AES-256-GCM implementation of [`SecretCipher`].
#[derive(Clone)]
pub struct AesGcmCipher {
    cipher: Aes256Gcm,
}

impl AesGcmCipher {
    /// Creates a cipher from a 32-byte key.
    pub fn new(key: &[u8]) -> Result<Self, SecretError> {
        if key.len() != KEY_LEN {
            return Err(SecretError::InvalidKey {
                message: format!("expected {KEY_LEN} bytes, got {}", key.len()),
            });
        }

        let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| SecretError::InvalidKey {
            message: e.to_string(),
        })?;
        Ok(Self { cipher })
    }

    /// Creates a cipher from a base64 encoded key.
    pub fn from_base64(key: &str) -> Result<Self, SecretError> {
        let bytes = STANDARD
            .decode(key.trim())
            .map_err(|e| SecretError::InvalidKey {
                message: e.to_string(),
            })?;
        Self::new(&bytes)
    }

    /// Generates a random key, base64 encoded.
    pub fn generate_key() -> String {
        let mut key = [0u8; KEY_LEN];
        rand::thread_rng().fill(&mut key[..]);
        STANDARD.encode(key)
    }
}

impl SecretCipher for AesGcmCipher {
    fn encrypt(&self, plaintext: &str) -> Result<EncryptedSecret, SecretError> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill(&mut nonce[..]);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|_| SecretError::Encryption)?;

        Ok(EncryptedSecret {
            ciphertext: STANDARD.encode(ciphertext),
            iv: STANDARD.encode(nonce),
        })
    }

    fn decrypt(&self, ciphertext: &str, iv: &str) -> Result<SecretString, SecretError> {
        let nonce = STANDARD.decode(iv)?;
        if nonce.len() != NONCE_LEN {
            return Err(SecretError::Encoding {
                message: format!("expected a {NONCE_LEN}-byte iv, got {}", nonce.len()),
            });
        }
        let ciphertext = STANDARD.decode(ciphertext)?;

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_ref())
            .map_err(|_| SecretError::Decryption)?;

        String::from_utf8(plaintext)
            .map(SecretString::new)
            .map_err(|_| SecretError::Decryption)
    }
}

impl std::fmt::Debug for AesGcmCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AesGcmCipher([REDACTED])")
    }
}

/// Sealed API keys, one per provider.
pub struct CredentialStore {
    cipher: Arc<dyn SecretCipher>,
    entries: RwLock<HashMap<ProviderId, EncryptedSecret>>,
}

impl CredentialStore {
    /// Creates an empty store.
    pub fn new(cipher: Arc<dyn SecretCipher>) -> Self {
        Self {
            cipher,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Seals and stores a provider's API key, replacing any previous one.
    pub fn insert(&self, provider: ProviderId, api_key: &SecretString) -> Result<(), SecretError> {
        let sealed = self.cipher.encrypt(api_key.expose_secret())?;
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(provider, sealed);
        tracing::debug!(provider = %provider, "Credential stored");
        Ok(())
    }

    /// Stores an already sealed key, e.g. one loaded from disk.
    pub fn insert_sealed(&self, provider: ProviderId, sealed: EncryptedSecret) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(provider, sealed);
    }

    /// Opens a provider's API key.
    pub fn get(&self, provider: ProviderId) -> Result<SecretString, SecretError> {
        let sealed = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&provider)
            .cloned()
            .ok_or(SecretError::NotFound { provider })?;

        self.cipher.decrypt(&sealed.ciphertext, &sealed.iv)
    }

    /// The sealed form of a provider's key.
    pub fn sealed(&self, provider: ProviderId) -> Option<EncryptedSecret> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&provider)
            .cloned()
    }

    /// Removes a provider's key; returns true if one was stored.
    pub fn remove(&self, provider: ProviderId) -> bool {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&provider)
            .is_some()
    }

    /// Providers with a stored key, in priority order.
    pub fn providers(&self) -> Vec<ProviderId> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        ProviderId::ALL
            .into_iter()
            .filter(|id| entries.contains_key(id))
            .collect()
    }

    /// A provider config builder carrying the opened key.
    pub fn provider_config(
        &self,
        provider: ProviderId,
    ) -> Result<ProviderConfigBuilder, SecretError> {
        let api_key = self.get(provider)?;
        Ok(ProviderConfig::builder(provider).api_key_secret(api_key))
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("providers", &self.providers())
            .finish_non_exhaustive()
    }
}
