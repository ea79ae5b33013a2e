pub mod cipher;
pub mod dual_store;
pub mod hasher;
pub mod splitter;

use crate::{
    config::DEFAULT_NONCE_BYTES,
    errors::CustodyError,
    wallet::{validate_user_id, NewWallet, WalletRecord, WalletStatus},
};
use cipher::ShareCipher;
use dual_store::DualStore;
use hasher::ContentHasher;
use std::sync::Arc;
use subtle::ConstantTimeEq as _;
use zeroize::Zeroizing;

/// Tracing target for reveal failure detail. The CLI keeps it off stderr so the detailed kind
/// only reaches the log file.
pub const REVEAL_LOG_TARGET: &str = "keysplit::reveal";

/// How a caller names the wallet to reveal.
#[derive(Debug, Clone, Copy)]
pub enum WalletRef<'a> {
    Id(&'a str),
    Address(&'a str),
}

/// Orchestrates the split-key protocol over the injected stores.
///
/// Holds no key material between calls. Plaintext halves live in `Zeroizing` buffers for the
/// duration of one `provision` or `reveal`.
#[derive(Clone)]
pub struct CustodyService {
    store: DualStore,
    cipher: ShareCipher,
    hasher: Arc<dyn ContentHasher>,
    nonce_bytes: usize,
}

impl std::fmt::Debug for CustodyService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustodyService")
            .field("nonce_bytes", &self.nonce_bytes)
            .finish_non_exhaustive()
    }
}

impl CustodyService {
    pub fn new(store: DualStore, cipher: ShareCipher, hasher: Arc<dyn ContentHasher>) -> Self {
        Self {
            store,
            cipher,
            hasher,
            nonce_bytes: DEFAULT_NONCE_BYTES,
        }
    }

    #[must_use]
    pub const fn with_nonce_bytes(mut self, nonce_bytes: usize) -> Self {
        self.nonce_bytes = nonce_bytes;
        self
    }

    pub const fn store(&self) -> &DualStore {
        &self.store
    }

    /// Split, seal and persist `secret` for a new wallet.
    ///
    /// The blob write completes before the wallet row is committed, so a committed row always
    /// points at an existing blob.
    pub async fn provision(
        &self,
        secret: &str,
        wallet: NewWallet,
    ) -> Result<WalletRecord, CustodyError> {
        let nonce = cipher::generate_nonce(self.nonce_bytes);
        self.provision_with_nonce(secret, wallet, nonce).await
    }

    async fn provision_with_nonce(
        &self,
        secret: &str,
        wallet: NewWallet,
        nonce: String,
    ) -> Result<WalletRecord, CustodyError> {
        validate_user_id(&wallet.user_id)?;
        let (part_a, part_b) = splitter::split(secret)?;

        let cipher_a = self.cipher.seal(&nonce, &part_a)?;
        let cipher_b = self.cipher.seal(&nonce, &part_b)?;
        drop((part_a, part_b));

        let share_hash = self.hasher.digest(&cipher_b);
        self.store
            .write_blob_share(&wallet.user_id, &wallet.address, &share_hash, &cipher_b)
            .await?;
        tracing::debug!(wallet_id = %wallet.id, user_id = %wallet.user_id, "blob share stored");

        let db_share = String::from_utf8(cipher_a)
            .map_err(|e| CustodyError::DecryptionError(format!("sealed share utf-8: {e}")))?;
        let record = WalletRecord {
            id: wallet.id,
            user_id: wallet.user_id,
            address: wallet.address,
            network: wallet.network,
            db_share: Some(db_share),
            share_hash: Some(share_hash),
            nonce: Some(nonce),
            status: WalletStatus::Active,
            is_default: wallet.is_default,
            priority: wallet.priority,
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        self.store.write_db_share(&record).await?;
        tracing::debug!(
            wallet_id = %record.id,
            network = %record.network,
            "wallet record committed"
        );
        Ok(record)
    }

    async fn load_record(
        &self,
        wallet: WalletRef<'_>,
        user_id: &str,
    ) -> Result<WalletRecord, CustodyError> {
        let found = match wallet {
            WalletRef::Id(id) => self
                .store
                .wallets()
                .find_by_id(id)
                .await?
                // A wallet id belonging to someone else is reported like a missing one.
                .filter(|r| r.user_id == user_id),
            WalletRef::Address(address) => {
                self.store
                    .wallets()
                    .find_by_address(user_id, address)
                    .await?
            }
        };
        found.ok_or(CustodyError::WalletNotFound)
    }

    /// Fetch both shares, verify content hash and nonce pairing, and rebuild the secret.
    ///
    /// Returns the specific failure kind; callers facing users must collapse it (see
    /// `RevealError`).
    pub async fn reveal(
        &self,
        wallet: WalletRef<'_>,
        user_id: &str,
    ) -> Result<Zeroizing<String>, CustodyError> {
        let record = self.load_record(wallet, user_id).await?;
        let parts = record.custody_parts()?;

        // Rows are never updated after insert, and a db share that no longer matches the
        // loaded nonce fails the pairing check below.
        let (db_share, cipher_b) = tokio::try_join!(
            self.store.read_db_share(&record.id),
            self.store
                .read_blob_share(&record.user_id, &record.address, parts.share_hash),
        )?;

        if !self.hasher.verify(&cipher_b, parts.share_hash) {
            tracing::error!(
                target: REVEAL_LOG_TARGET,
                wallet_id = %record.id,
                "blob share failed content hash check"
            );
            return Err(CustodyError::IntegrityViolation);
        }

        let opened_a = self.cipher.open(db_share.as_bytes())?;
        let opened_b = self.cipher.open(&cipher_b)?;

        let nonce = parts.nonce.as_bytes();
        let paired: bool = (opened_a.nonce.as_bytes().ct_eq(nonce)
            & opened_b.nonce.as_bytes().ct_eq(nonce))
        .into();
        if !paired {
            tracing::error!(
                target: REVEAL_LOG_TARGET,
                wallet_id = %record.id,
                "share nonce mismatch"
            );
            return Err(CustodyError::ConsistencyViolation);
        }

        Ok(splitter::recombine(&opened_a.share, &opened_b.share))
    }

    /// Recompute the blob share hash without decrypting anything.
    pub async fn check_integrity(
        &self,
        wallet: WalletRef<'_>,
        user_id: &str,
    ) -> Result<(), CustodyError> {
        let record = self.load_record(wallet, user_id).await?;
        let parts = record.custody_parts()?;
        let cipher_b = self
            .store
            .read_blob_share(&record.user_id, &record.address, parts.share_hash)
            .await?;
        if self.hasher.verify(&cipher_b, parts.share_hash) {
            Ok(())
        } else {
            Err(CustodyError::IntegrityViolation)
        }
    }
}
