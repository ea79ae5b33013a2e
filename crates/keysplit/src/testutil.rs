// In-memory doubles for the storage and key-generation seams.

use crate::{
    blob::BlobStore,
    custody::{cipher::KeyProvider, hasher::ContentHasher},
    errors::CustodyError,
    wallet::{GeneratedKey, KeyGenerator, WalletRecord, WalletRepository, WalletStatus},
};
use async_trait::async_trait;
use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex,
    },
};
use zeroize::Zeroizing;

fn poisoned<E: std::fmt::Display>(e: E) -> CustodyError {
    CustodyError::unavailable(format!("mutex poisoned: {e}"))
}

pub fn record_fixture(id: &str, user_id: &str, network: &str) -> WalletRecord {
    WalletRecord {
        id: id.to_owned(),
        user_id: user_id.to_owned(),
        address: "0x52908400098527886E0F7030069857D2E4169EE7".to_owned(),
        network: network.to_owned(),
        db_share: Some("db-share".to_owned()),
        share_hash: Some("abcd".to_owned()),
        nonce: Some("00".to_owned()),
        status: WalletStatus::Active,
        is_default: true,
        priority: 0,
        created_at: "2026-01-01T00:00:00+00:00".to_owned(),
    }
}

#[derive(Debug, Default)]
pub struct MemoryWalletRepository {
    rows: Mutex<Vec<WalletRecord>>,
    inserts: AtomicUsize,
}

impl MemoryWalletRepository {
    pub fn len(&self) -> eyre::Result<usize> {
        Ok(self
            .rows
            .lock()
            .map_err(|e| eyre::eyre!("mutex poisoned: {e}"))?
            .len())
    }

    pub fn insert_calls(&self) -> usize {
        self.inserts.load(Ordering::SeqCst)
    }

    /// Bypass the insert-only contract to simulate out-of-band edits.
    pub fn update(&self, id: &str, f: impl FnOnce(&mut WalletRecord)) -> eyre::Result<()> {
        let mut rows = self
            .rows
            .lock()
            .map_err(|e| eyre::eyre!("mutex poisoned: {e}"))?;
        let row = rows
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| eyre::eyre!("no row {id}"))?;
        f(row);
        Ok(())
    }
}

#[async_trait]
impl WalletRepository for MemoryWalletRepository {
    async fn find_active(
        &self,
        user_id: &str,
        network: &str,
    ) -> Result<Option<WalletRecord>, CustodyError> {
        let rows = self.rows.lock().map_err(poisoned)?;
        Ok(rows
            .iter()
            .find(|r| {
                r.user_id == user_id && r.network == network && r.status == WalletStatus::Active
            })
            .cloned())
    }

    async fn find_by_id(&self, wallet_id: &str) -> Result<Option<WalletRecord>, CustodyError> {
        let rows = self.rows.lock().map_err(poisoned)?;
        Ok(rows.iter().find(|r| r.id == wallet_id).cloned())
    }

    async fn find_by_address(
        &self,
        user_id: &str,
        address: &str,
    ) -> Result<Option<WalletRecord>, CustodyError> {
        let rows = self.rows.lock().map_err(poisoned)?;
        // Same preference as the turso query: active first, then newest.
        Ok(rows
            .iter()
            .filter(|r| r.user_id == user_id && r.address == address)
            .min_by(|a, b| {
                (a.status != WalletStatus::Active)
                    .cmp(&(b.status != WalletStatus::Active))
                    .then_with(|| b.created_at.cmp(&a.created_at))
            })
            .cloned())
    }

    async fn insert(&self, record: &WalletRecord) -> Result<(), CustodyError> {
        self.inserts.fetch_add(1, Ordering::SeqCst);
        let mut rows = self.rows.lock().map_err(poisoned)?;
        let duplicate = rows.iter().any(|r| {
            r.user_id == record.user_id && r.network == record.network && r.status == record.status
        });
        if duplicate {
            return Err(CustodyError::Conflict);
        }
        rows.push(record.clone());
        Ok(())
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<WalletRecord>, CustodyError> {
        let rows = self.rows.lock().map_err(poisoned)?;
        Ok(rows.iter().filter(|r| r.user_id == user_id).cloned().collect())
    }
}

#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<BTreeMap<String, Vec<u8>>>,
    gets: AtomicUsize,
    puts: AtomicUsize,
    unavailable: AtomicBool,
}

impl MemoryBlobStore {
    pub fn len(&self) -> eyre::Result<usize> {
        Ok(self
            .blobs
            .lock()
            .map_err(|e| eyre::eyre!("mutex poisoned: {e}"))?
            .len())
    }

    pub fn get_calls(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn put_calls(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn set_unavailable(&self, v: bool) {
        self.unavailable.store(v, Ordering::SeqCst);
    }

    pub fn paths(&self) -> eyre::Result<Vec<String>> {
        Ok(self
            .blobs
            .lock()
            .map_err(|e| eyre::eyre!("mutex poisoned: {e}"))?
            .keys()
            .cloned()
            .collect())
    }

    pub fn raw(&self, path: &str) -> eyre::Result<Vec<u8>> {
        self.blobs
            .lock()
            .map_err(|e| eyre::eyre!("mutex poisoned: {e}"))?
            .get(path)
            .cloned()
            .ok_or_else(|| eyre::eyre!("no blob at {path}"))
    }

    /// Overwrite a stored object, ignoring the create-only contract.
    pub fn overwrite(&self, path: &str, bytes: Vec<u8>) -> eyre::Result<()> {
        self.blobs
            .lock()
            .map_err(|e| eyre::eyre!("mutex poisoned: {e}"))?
            .insert(path.to_owned(), bytes);
        Ok(())
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, path: &str, bytes: &[u8]) -> Result<(), CustodyError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CustodyError::unavailable("blob store offline"));
        }
        let mut blobs = self.blobs.lock().map_err(poisoned)?;
        blobs
            .entry(path.to_owned())
            .or_insert_with(|| bytes.to_vec());
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, CustodyError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CustodyError::unavailable("blob store offline"));
        }
        let blobs = self.blobs.lock().map_err(poisoned)?;
        blobs
            .get(path)
            .cloned()
            .ok_or_else(|| CustodyError::NotFound(path.to_owned()))
    }
}

/// Maps every input to the same digest, so any two blobs collide.
#[derive(Debug, Clone, Copy)]
pub struct ConstantHasher(pub &'static str);

impl ContentHasher for ConstantHasher {
    fn digest(&self, _bytes: &[u8]) -> String {
        self.0.to_owned()
    }
}

#[derive(Debug, Clone)]
pub struct FixedKeyGenerator {
    pub secret: String,
    pub address: String,
}

impl KeyGenerator for FixedKeyGenerator {
    fn generate(&self) -> Result<GeneratedKey, CustodyError> {
        Ok(GeneratedKey {
            secret: Zeroizing::new(self.secret.clone()),
            address: self.address.clone(),
        })
    }
}

/// Fixed in-process root key.
pub struct StaticKeyProvider {
    key: Zeroizing<[u8; 32]>,
}

impl StaticKeyProvider {
    pub fn new(key: [u8; 32]) -> Self {
        Self {
            key: Zeroizing::new(key),
        }
    }
}

impl KeyProvider for StaticKeyProvider {
    fn root_key(&self) -> Result<Zeroizing<[u8; 32]>, CustodyError> {
        Ok(self.key.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_address_lookup_prefers_active_then_newest() -> eyre::Result<()> {
        let repo = MemoryWalletRepository::default();
        let mut old_inactive = record_fixture("w1", "u1", "base");
        old_inactive.status = WalletStatus::Inactive;
        let mut new_inactive = record_fixture("w2", "u1", "ethereum");
        new_inactive.status = WalletStatus::Inactive;
        new_inactive.created_at = "2026-06-01T00:00:00+00:00".to_owned();
        repo.insert(&old_inactive).await?;
        repo.insert(&new_inactive).await?;

        let address = old_inactive.address.clone();
        let found = repo.find_by_address("u1", &address).await?;
        assert_eq!(found.map(|r| r.id), Some("w2".to_owned()));

        repo.insert(&record_fixture("w3", "u1", "polygon")).await?;
        let found = repo.find_by_address("u1", &address).await?;
        assert_eq!(found.map(|r| r.id), Some("w3".to_owned()));
        Ok(())
    }
}
