use crate::{
    audit::AuditLog,
    config::CustodyConfig,
    custody::{CustodyService, WalletRef, REVEAL_LOG_TARGET},
    errors::{CustodyError, ProvisionResponse, RevealError},
    wallet::{
        normalize_address, validate_user_id, KeyGenerator, NewWallet, WalletRecord, WalletSummary,
    },
};
use secrecy::SecretString;
use serde_json::json;
use std::sync::Arc;
use zeroize::Zeroizing;

/// Public face of the custody engine: one active wallet per `(user_id, network)`, idempotent
/// provisioning and the opaque reveal boundary.
pub struct WalletLifecycleManager {
    custody: CustodyService,
    keys: Arc<dyn KeyGenerator>,
    cfg: CustodyConfig,
    audit: Option<AuditLog>,
}

impl std::fmt::Debug for WalletLifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletLifecycleManager")
            .field("custody", &self.custody)
            .finish_non_exhaustive()
    }
}

impl WalletLifecycleManager {
    pub fn new(custody: CustodyService, keys: Arc<dyn KeyGenerator>, cfg: CustodyConfig) -> Self {
        Self {
            custody,
            keys,
            cfg,
            audit: None,
        }
    }

    #[must_use]
    pub fn with_audit(mut self, audit: AuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    fn record_audit(&self, entry: &serde_json::Value) {
        let Some(audit) = &self.audit else {
            return;
        };
        if let Err(e) = audit.append(entry) {
            tracing::warn!(error = %format!("{e:#}"), "audit append failed");
        }
    }

    fn check_network(&self, network: &str) -> Result<(), CustodyError> {
        if self.cfg.is_network_allowed(network) {
            Ok(())
        } else {
            Err(CustodyError::invalid(format!("unsupported network: {network}")))
        }
    }

    /// Return the active wallet for `(user_id, network)`, creating one if none exists.
    ///
    /// The lookup and the insert are not atomic. Two concurrent callers can both see "absent";
    /// the repository's uniqueness rule then fails the slower one with
    /// [`CustodyError::Conflict`].
    pub async fn provision_if_absent(
        &self,
        user_id: &str,
        network: &str,
    ) -> Result<WalletRecord, CustodyError> {
        validate_user_id(user_id)?;
        self.check_network(network)?;

        if let Some(existing) = self
            .custody
            .store()
            .wallets()
            .find_active(user_id, network)
            .await?
        {
            tracing::debug!(user_id, network, wallet_id = %existing.id, "active wallet exists");
            return Ok(existing);
        }

        let key = self.keys.generate()?;
        let address = normalize_address(&key.address)?;
        let wallet = NewWallet {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_owned(),
            address,
            network: network.to_owned(),
            is_default: true,
            priority: 0,
        };
        let record = self.custody.provision(&key.secret, wallet).await?;
        tracing::info!(
            user_id,
            network,
            wallet_id = %record.id,
            address = %record.address,
            "wallet provisioned"
        );
        Ok(record)
    }

    pub async fn provision_wallet(&self, user_id: &str, network: &str) -> ProvisionResponse {
        match self.provision_if_absent(user_id, network).await {
            Ok(record) => {
                self.record_audit(&json!({
                    "op": "provision",
                    "user_id": user_id,
                    "address": record.address,
                    "network": network,
                    "result": "ok",
                }));
                ProvisionResponse::ok(record.address)
            }
            Err(e) => {
                tracing::warn!(
                    user_id,
                    network,
                    error_code = e.code(),
                    error = %e,
                    "provision failed"
                );
                self.record_audit(&json!({
                    "op": "provision",
                    "user_id": user_id,
                    "network": network,
                    "result": "failed",
                    "error_code": e.code(),
                }));
                ProvisionResponse::failed(&e)
            }
        }
    }

    /// Rebuild the private key for `address`.
    ///
    /// Every failure is logged in full and then collapsed into [`RevealError`]; the caller
    /// never learns which check failed.
    pub async fn reveal_private_key(
        &self,
        address: &str,
        user_id: &str,
    ) -> Result<SecretString, RevealError> {
        self.reveal_at(WalletRef::Address(address), user_id).await
    }

    /// Same boundary as [`Self::reveal_private_key`], addressed by wallet id.
    pub async fn reveal_private_key_by_id(
        &self,
        wallet_id: &str,
        user_id: &str,
    ) -> Result<SecretString, RevealError> {
        self.reveal_at(WalletRef::Id(wallet_id), user_id).await
    }

    async fn reveal_checked(
        &self,
        wallet: WalletRef<'_>,
        user_id: &str,
    ) -> Result<Zeroizing<String>, CustodyError> {
        match wallet {
            WalletRef::Address(address) => {
                let addr = normalize_address(address)?;
                self.custody
                    .reveal(WalletRef::Address(&addr), user_id)
                    .await
            }
            WalletRef::Id(_) => self.custody.reveal(wallet, user_id).await,
        }
    }

    async fn reveal_at(
        &self,
        wallet: WalletRef<'_>,
        user_id: &str,
    ) -> Result<SecretString, RevealError> {
        let (wallet_id, address) = match wallet {
            WalletRef::Id(id) => (Some(id), None),
            WalletRef::Address(a) => (None, Some(a)),
        };

        match self.reveal_checked(wallet, user_id).await {
            Ok(mut secret) => {
                tracing::info!(
                    target: REVEAL_LOG_TARGET,
                    user_id,
                    ?wallet_id,
                    ?address,
                    "private key revealed"
                );
                self.record_audit(&json!({
                    "op": "reveal",
                    "user_id": user_id,
                    "wallet_id": wallet_id,
                    "address": address,
                    "result": "ok",
                }));
                Ok(SecretString::new(std::mem::take(&mut *secret).into()))
            }
            Err(e) => {
                if e.is_security_incident() {
                    tracing::error!(
                        target: REVEAL_LOG_TARGET,
                        user_id,
                        ?wallet_id,
                        ?address,
                        error_code = e.code(),
                        error = %e,
                        "reveal refused: share verification failed"
                    );
                } else {
                    tracing::warn!(
                        target: REVEAL_LOG_TARGET,
                        user_id,
                        ?wallet_id,
                        ?address,
                        error_code = e.code(),
                        error = %e,
                        "reveal failed"
                    );
                }
                self.record_audit(&json!({
                    "op": "reveal",
                    "user_id": user_id,
                    "wallet_id": wallet_id,
                    "address": address,
                    "result": "failed",
                    "error_code": e.code(),
                }));
                Err(RevealError::from(e))
            }
        }
    }

    pub async fn list_wallets(&self, user_id: &str) -> Result<Vec<WalletSummary>, CustodyError> {
        validate_user_id(user_id)?;
        let rows = self.custody.store().wallets().list_for_user(user_id).await?;
        Ok(rows.iter().map(WalletRecord::summary).collect())
    }

    /// `Ok(false)` means the blob no longer matches its recorded hash.
    pub async fn verify_wallet(&self, address: &str, user_id: &str) -> Result<bool, CustodyError> {
        let addr = normalize_address(address)?;
        match self
            .custody
            .check_integrity(WalletRef::Address(&addr), user_id)
            .await
        {
            Ok(()) => Ok(true),
            Err(CustodyError::IntegrityViolation) => {
                tracing::error!(user_id, address = %addr, "blob share failed integrity check");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}
