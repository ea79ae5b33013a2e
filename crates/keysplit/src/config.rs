use serde::{Deserialize, Serialize};

pub const DEFAULT_NONCE_BYTES: usize = 32;
/// Below this the nonce stops being a meaningful pairing anchor.
pub const MIN_NONCE_BYTES: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RootKeySource {
    /// 32-byte key file in the config dir, generated on first use.
    #[default]
    Machine,
    /// Hex key from `KEYSPLIT_ROOT_KEY_HEX`.
    Env,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Relational store file, relative to the data dir unless absolute.
    pub db_file: String,
    /// Root of the content-addressed share store, relative to the data dir unless absolute.
    pub blob_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_file: "keysplit.db".into(),
            blob_dir: "blobs".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CustodyConfig {
    /// Random bytes per provisioning nonce (hex-encoded, so the stored nonce is twice as long).
    pub nonce_bytes: usize,
    /// Chain identifiers accepted by `provision`.
    pub allowed_networks: Vec<String>,
    pub root_key_source: RootKeySource,
}

impl Default for CustodyConfig {
    fn default() -> Self {
        Self {
            nonce_bytes: DEFAULT_NONCE_BYTES,
            allowed_networks: [
                "ethereum",
                "polygon",
                "base",
                "arbitrum",
                "optimism",
                "bsc",
                "avalanche",
            ]
            .into_iter()
            .map(str::to_owned)
            .collect(),
            root_key_source: RootKeySource::Machine,
        }
    }
}

impl CustodyConfig {
    pub fn effective_nonce_bytes(&self) -> usize {
        self.nonce_bytes.max(MIN_NONCE_BYTES)
    }

    pub fn is_network_allowed(&self, network: &str) -> bool {
        self.allowed_networks.iter().any(|n| n == network)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct KeysplitConfig {
    pub storage: StorageConfig,
    pub custody: CustodyConfig,
}
