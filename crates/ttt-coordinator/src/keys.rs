//! File-backed participant key store

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use ttt_core::{Result, TttError};

/// Resolves a participant slot ("agent1", "agent2") to an address
pub trait KeyStore: Send + Sync {
    fn address_for(&self, slot: &str) -> Result<String>;
}

#[derive(Debug, Serialize, Deserialize)]
struct DemoKey {
    address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    private_key_demo: Option<String>,
}

/// Key store rooted at a directory
///
/// Lookup order per slot: `<slot>-wallet.key` (32 raw bytes), then
/// `<slot>/key.json`, then a freshly generated demo key written to
/// `<slot>/key.json`.
#[derive(Debug, Clone)]
pub struct FileKeyStore {
    root: PathBuf,
}

impl FileKeyStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn wallet_address(&self, slot: &str) -> Option<String> {
        let path = self.root.join(format!("{}-wallet.key", slot));
        let bytes = fs::read(&path).ok()?;
        if bytes.len() != 32 {
            warn!("Ignoring {:?}: expected 32 bytes, found {}", path, bytes.len());
            return None;
        }
        let digest = hex::encode(Sha256::digest(&bytes));
        Some(format!("real_{}_{}", slot, &digest[..16]))
    }

    fn demo_address(&self, slot: &str) -> Result<String> {
        let dir = self.root.join(slot);
        let path = dir.join("key.json");

        if let Ok(text) = fs::read_to_string(&path) {
            match serde_json::from_str::<DemoKey>(&text) {
                Ok(key) if !key.address.is_empty() => return Ok(key.address),
                _ => warn!("Unreadable key file {:?}; generating a new one", path),
            }
        }

        let mut secret = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        let private_hex = hex::encode(secret);
        let digest = hex::encode(Sha256::digest(private_hex.as_bytes()));
        let key = DemoKey {
            address: format!("demo_{}", &digest[..40]),
            private_key_demo: Some(private_hex),
        };

        fs::create_dir_all(&dir)
            .map_err(|e| TttError::KeyStore(format!("create {:?}: {}", dir, e)))?;
        fs::write(&path, serde_json::to_string(&key)?)
            .map_err(|e| TttError::KeyStore(format!("write {:?}: {}", path, e)))?;
        info!("Created demo key for {} at {:?}", slot, path);
        Ok(key.address)
    }
}

impl KeyStore for FileKeyStore {
    fn address_for(&self, slot: &str) -> Result<String> {
        match self.wallet_address(slot) {
            Some(address) => Ok(address),
            None => self.demo_address(slot),
        }
    }
}
