//! Encrypted at-rest persistence for the flow registry.

use super::FlowRegistry;
use crate::error::FlowError;
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use tokio::fs;
use tracing::{debug, info, warn};

/// Key derivation path for registry encryption.
const KEY_DERIVATION_PATH: &str = "onboarding/flow-registry";

/// Nonce size for AES-GCM (96 bits = 12 bytes).
const NONCE_SIZE: usize = 12;

/// Derive the 32-byte registry key: SHA256(secret || derivation path).
pub fn derive_key(secret: &SecretString) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(secret.expose_secret().as_bytes());
    hasher.update(KEY_DERIVATION_PATH.as_bytes());

    let mut key = [0u8; 32];
    key.copy_from_slice(&hasher.finalize());
    key
}

fn encrypt(plaintext: &[u8], key: &[u8; 32]) -> Result<Vec<u8>, FlowError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher.encrypt(nonce, plaintext)?;

    let mut data = nonce_bytes.to_vec();
    data.extend(ciphertext);
    Ok(data)
}

fn decrypt(data: &[u8], key: &[u8; 32]) -> Result<Vec<u8>, FlowError> {
    if data.len() < NONCE_SIZE {
        return Err(FlowError::Encryption("Data too short".into()));
    }

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Nonce::from_slice(&data[..NONCE_SIZE]);

    cipher.decrypt(nonce, &data[NONCE_SIZE..]).map_err(|_| {
        FlowError::Encryption(
            "Failed to decrypt flow registry. The encryption secret may have changed.".to_string(),
        )
    })
}

/// AES-256-GCM encrypted file holding the whole registry.
pub struct EncryptedBackend {
    storage_path: PathBuf,
    key: [u8; 32],
}

impl EncryptedBackend {
    pub fn new(storage_path: PathBuf, secret: &SecretString) -> Self {
        Self {
            storage_path,
            key: derive_key(secret),
        }
    }

    /// Save the registry.
    ///
    /// File format: [12 bytes nonce][ciphertext with auth tag]
    pub async fn save(&self, registry: &FlowRegistry) -> Result<(), FlowError> {
        let plaintext = serde_json::to_vec(registry)?;
        let data = encrypt(&plaintext, &self.key)?;

        if let Some(parent) = self.storage_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write atomically using temp file + rename
        let temp_path = self.storage_path.with_extension("tmp");
        fs::write(&temp_path, &data).await?;
        fs::rename(&temp_path, &self.storage_path).await?;

        debug!(
            "Saved encrypted flow registry ({} bytes) to {:?}",
            data.len(),
            self.storage_path
        );
        Ok(())
    }

    /// Load the registry. Returns an empty registry if the file doesn't exist.
    pub async fn load(&self) -> Result<FlowRegistry, FlowError> {
        if !self.storage_path.exists() {
            info!(
                "Flow registry not found at {:?}, starting with empty registry",
                self.storage_path
            );
            return Ok(FlowRegistry::new());
        }

        let data = fs::read(&self.storage_path).await?;

        if data.len() < NONCE_SIZE {
            warn!("Flow registry file too short, starting with empty registry");
            return Ok(FlowRegistry::new());
        }

        let plaintext = decrypt(&data, &self.key)?;
        let registry: FlowRegistry = serde_json::from_slice(&plaintext)?;

        info!(
            "Loaded encrypted flow registry with {} records from {:?}",
            registry.count(),
            self.storage_path
        );
        Ok(registry)
    }
}

/// No persistence; flows live only in process memory.
pub struct MemoryBackend;

impl MemoryBackend {
    pub async fn save(&self, _registry: &FlowRegistry) -> Result<(), FlowError> {
        debug!("Memory backend: save is a no-op");
        Ok(())
    }

    pub async fn load(&self) -> Result<FlowRegistry, FlowError> {
        Ok(FlowRegistry::new())
    }
}

/// Storage backend for the persisted flow variant.
pub enum Backend {
    Encrypted(EncryptedBackend),
    Memory(MemoryBackend),
}

impl Backend {
    /// Encrypted file storage when a secret is available, memory otherwise.
    pub fn new(storage_path: PathBuf, secret: Option<&SecretString>) -> Self {
        match secret {
            Some(secret) => {
                info!("Using encrypted flow storage at {:?}", storage_path);
                Backend::Encrypted(EncryptedBackend::new(storage_path, secret))
            }
            None => {
                warn!("No flow encryption secret configured, using in-memory storage (flows are lost on restart)");
                Backend::Memory(MemoryBackend)
            }
        }
    }

    pub fn memory() -> Self {
        Backend::Memory(MemoryBackend)
    }

    pub fn is_persistent(&self) -> bool {
        matches!(self, Backend::Encrypted(_))
    }

    pub async fn save(&self, registry: &FlowRegistry) -> Result<(), FlowError> {
        match self {
            Backend::Encrypted(b) => b.save(registry).await,
            Backend::Memory(b) => b.save(registry).await,
        }
    }

    pub async fn load(&self) -> Result<FlowRegistry, FlowError> {
        match self {
            Backend::Encrypted(b) => b.load().await,
            Backend::Memory(b) => b.load().await,
        }
    }
}
