use crate::{
    blob::BlobStore,
    custody::hasher::is_hex_digest,
    errors::CustodyError,
    wallet::{validate_user_id, WalletRecord, WalletRepository},
};
use std::sync::Arc;

/// Content-addressed location of the second share: `keys/{user_id}/{address}/{hash}.key`.
pub fn blob_path(user_id: &str, address: &str, hash: &str) -> Result<String, CustodyError> {
    validate_user_id(user_id)?;
    if address.is_empty() || !address.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(CustodyError::invalid("malformed address"));
    }
    if !is_hex_digest(hash) {
        return Err(CustodyError::invalid("malformed share hash"));
    }
    Ok(format!("keys/{user_id}/{address}/{hash}.key"))
}

/// Keeps the two shares apart: share #1 in the wallet row, share #2 in the blob store.
#[derive(Clone)]
pub struct DualStore {
    wallets: Arc<dyn WalletRepository>,
    blobs: Arc<dyn BlobStore>,
}

impl std::fmt::Debug for DualStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DualStore").finish_non_exhaustive()
    }
}

impl DualStore {
    pub fn new(wallets: Arc<dyn WalletRepository>, blobs: Arc<dyn BlobStore>) -> Self {
        Self { wallets, blobs }
    }

    pub fn wallets(&self) -> &dyn WalletRepository {
        self.wallets.as_ref()
    }

    /// Commit the wallet row carrying share #1. Rows are insert-only.
    pub async fn write_db_share(&self, record: &WalletRecord) -> Result<(), CustodyError> {
        if record.db_share.is_none() {
            return Err(CustodyError::invalid("record carries no db share"));
        }
        self.wallets.insert(record).await
    }

    pub async fn write_blob_share(
        &self,
        user_id: &str,
        address: &str,
        hash: &str,
        ciphertext: &[u8],
    ) -> Result<(), CustodyError> {
        let path = blob_path(user_id, address, hash)?;
        self.blobs.put(&path, ciphertext).await
    }

    pub async fn read_db_share(&self, wallet_id: &str) -> Result<String, CustodyError> {
        let record = self
            .wallets
            .find_by_id(wallet_id)
            .await?
            .ok_or_else(|| CustodyError::NotFound(format!("wallet {wallet_id}")))?;
        record.db_share.ok_or(CustodyError::NotPlatformManaged)
    }

    pub async fn read_blob_share(
        &self,
        user_id: &str,
        address: &str,
        hash: &str,
    ) -> Result<Vec<u8>, CustodyError> {
        let path = blob_path(user_id, address, hash)?;
        self.blobs.get(&path).await
    }
}
