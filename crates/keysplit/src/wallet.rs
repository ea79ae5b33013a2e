use crate::errors::CustodyError;
use alloy::{primitives::Address, signers::local::PrivateKeySigner};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::str::FromStr as _;
use zeroize::Zeroizing;

const MAX_USER_ID_LEN: usize = 128;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WalletStatus {
    Active,
    Inactive,
}

impl WalletStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CustodyError> {
        match s {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            other => Err(CustodyError::unavailable(format!(
                "unknown wallet status in store: {other}"
            ))),
        }
    }
}

/// A wallet row as persisted by the relational store.
///
/// `db_share`, `share_hash` and `nonce` are either all set (platform custody) or all unset
/// (externally imported wallet).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletRecord {
    pub id: String,
    pub user_id: String,
    pub address: String,
    pub network: String,
    pub db_share: Option<String>,
    pub share_hash: Option<String>,
    pub nonce: Option<String>,
    pub status: WalletStatus,
    pub is_default: bool,
    pub priority: i64,
    pub created_at: String,
}

/// Borrowed hash and nonce of a platform-managed wallet.
#[derive(Debug, Clone, Copy)]
pub struct CustodyParts<'a> {
    pub share_hash: &'a str,
    pub nonce: &'a str,
}

impl WalletRecord {
    pub fn custody_parts(&self) -> Result<CustodyParts<'_>, CustodyError> {
        match (&self.db_share, &self.share_hash, &self.nonce) {
            (Some(_), Some(share_hash), Some(nonce)) => Ok(CustodyParts {
                share_hash,
                nonce,
            }),
            _ => Err(CustodyError::NotPlatformManaged),
        }
    }

    pub fn summary(&self) -> WalletSummary {
        WalletSummary {
            id: self.id.clone(),
            address: self.address.clone(),
            network: self.network.clone(),
            status: self.status,
            is_default: self.is_default,
            priority: self.priority,
            custodial: self.custody_parts().is_ok(),
            created_at: self.created_at.clone(),
        }
    }
}

/// Identity of a wallet about to be provisioned. The custody columns are filled in by
/// `CustodyService::provision`.
#[derive(Debug, Clone)]
pub struct NewWallet {
    pub id: String,
    pub user_id: String,
    pub address: String,
    pub network: String,
    pub is_default: bool,
    pub priority: i64,
}

/// Metadata-only projection, safe to return to callers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WalletSummary {
    pub id: String,
    pub address: String,
    pub network: String,
    pub status: WalletStatus,
    pub is_default: bool,
    pub priority: i64,
    pub custodial: bool,
    pub created_at: String,
}

/// Relational store seam.
///
/// Implementations must reject a second `Active` row for the same `(user_id, network)` with
/// [`CustodyError::Conflict`]; `WalletLifecycleManager` relies on it.
#[async_trait]
pub trait WalletRepository: Send + Sync {
    async fn find_active(
        &self,
        user_id: &str,
        network: &str,
    ) -> Result<Option<WalletRecord>, CustodyError>;

    async fn find_by_id(&self, wallet_id: &str) -> Result<Option<WalletRecord>, CustodyError>;

    async fn find_by_address(
        &self,
        user_id: &str,
        address: &str,
    ) -> Result<Option<WalletRecord>, CustodyError>;

    async fn insert(&self, record: &WalletRecord) -> Result<(), CustodyError>;

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<WalletRecord>, CustodyError>;
}

/// Freshly generated key material. The secret is wiped when dropped.
pub struct GeneratedKey {
    pub secret: Zeroizing<String>,
    pub address: String,
}

impl std::fmt::Debug for GeneratedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratedKey")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Key-pair generation primitive.
pub trait KeyGenerator: Send + Sync {
    fn generate(&self) -> Result<GeneratedKey, CustodyError>;
}

/// secp256k1 keys with EIP-55 addresses, valid on every EVM network.
#[derive(Debug, Clone, Copy, Default)]
pub struct EvmKeyGenerator;

impl KeyGenerator for EvmKeyGenerator {
    fn generate(&self) -> Result<GeneratedKey, CustodyError> {
        let signer = PrivateKeySigner::random();
        let secret = Zeroizing::new(hex::encode(signer.to_bytes()));
        Ok(GeneratedKey {
            secret,
            address: signer.address().to_checksum(None),
        })
    }
}

/// Parse an EVM address and return its checksummed form.
pub fn normalize_address(address: &str) -> Result<String, CustodyError> {
    let trimmed = address.trim();
    if !trimmed.starts_with("0x") || trimmed.len() != 42 {
        return Err(CustodyError::invalid("malformed address"));
    }
    let parsed =
        Address::from_str(trimmed).map_err(|e| CustodyError::invalid(format!("address: {e}")))?;
    Ok(parsed.to_checksum(None))
}

/// User ids become blob path segments, so only a conservative charset is accepted.
pub fn validate_user_id(user_id: &str) -> Result<(), CustodyError> {
    if user_id.is_empty() || user_id.len() > MAX_USER_ID_LEN {
        return Err(CustodyError::invalid("user id length"));
    }
    if user_id == "." || user_id == ".." {
        return Err(CustodyError::invalid("user id"));
    }
    let ok = user_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '@'));
    if !ok {
        return Err(CustodyError::invalid("user id contains unsupported characters"));
    }
    Ok(())
}
