use crate::{
    errors::CustodyError,
    wallet::{WalletRecord, WalletRepository, WalletStatus},
};
use async_trait::async_trait;
use eyre::Context as _;
use std::path::Path;
use tokio::sync::Mutex;

// Wallet rows live in a local embedded store (Turso, pure Rust).
//
// The custody columns are stored as TEXT with '' meaning "absent"; a non-custodial wallet has
// all three empty. The primary key makes a second active row for a (user, network) pair fail
// at commit, which is what turns a provisioning race into `Conflict`.

const COLUMNS: &str = "id, user_id, address, network, db_share, share_hash, nonce, status, \
                       is_default, priority, created_at";

struct DbInner {
    // Keep the database handle alive for the lifetime of the connection.
    _db: turso::Database,
    conn: turso::Connection,
}

pub struct Db {
    inner: Mutex<DbInner>,
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db").finish_non_exhaustive()
    }
}

fn opt_to_col(v: Option<&String>) -> &str {
    v.map_or("", String::as_str)
}

fn col_to_opt(v: String) -> Option<String> {
    if v.is_empty() {
        None
    } else {
        Some(v)
    }
}

fn row_to_record(row: &turso::Row) -> eyre::Result<WalletRecord> {
    let status: String = row.get(7).context("row.status")?;
    let is_default: i64 = row.get(8).context("row.is_default")?;
    Ok(WalletRecord {
        id: row.get(0).context("row.id")?,
        user_id: row.get(1).context("row.user_id")?,
        address: row.get(2).context("row.address")?,
        network: row.get(3).context("row.network")?,
        db_share: col_to_opt(row.get(4).context("row.db_share")?),
        share_hash: col_to_opt(row.get(5).context("row.share_hash")?),
        nonce: col_to_opt(row.get(6).context("row.nonce")?),
        status: WalletStatus::parse(&status)?,
        is_default: is_default != 0,
        priority: row.get(9).context("row.priority")?,
        created_at: row.get(10).context("row.created_at")?,
    })
}

fn storage_err(e: &eyre::Report) -> CustodyError {
    CustodyError::unavailable(format!("{e:#}"))
}

fn is_unique_violation(e: &eyre::Report) -> bool {
    let msg = format!("{e:#}").to_ascii_lowercase();
    msg.contains("unique") || msg.contains("constraint") || msg.contains("primary key")
}

impl Db {
    pub async fn open(path: &Path) -> eyre::Result<Self> {
        if let Some(parent) = path.parent() {
            crate::fsutil::ensure_private_dir(parent)?;
        }
        let p_s = path.to_string_lossy();

        let db = turso::Builder::new_local(p_s.as_ref())
            .build()
            .await
            .context("open turso local db")?;
        let conn = db.connect().context("connect turso db")?;

        let this = Self {
            inner: Mutex::new(DbInner { _db: db, conn }),
        };
        this.init().await?;
        Ok(this)
    }

    async fn init(&self) -> eyre::Result<()> {
        let inner = self.inner.lock().await;
        inner
            .conn
            .execute(
                "CREATE TABLE IF NOT EXISTS keysplit_wallets (\
                  id TEXT NOT NULL UNIQUE,\
                  user_id TEXT NOT NULL,\
                  address TEXT NOT NULL,\
                  network TEXT NOT NULL,\
                  db_share TEXT NOT NULL DEFAULT '',\
                  share_hash TEXT NOT NULL DEFAULT '',\
                  nonce TEXT NOT NULL DEFAULT '',\
                  status TEXT NOT NULL,\
                  is_default INTEGER NOT NULL,\
                  priority INTEGER NOT NULL,\
                  created_at TEXT NOT NULL,\
                  PRIMARY KEY (user_id, network, status)\
                )",
                (),
            )
            .await
            .context("create keysplit_wallets")?;
        Ok(())
    }

    async fn query_one(
        &self,
        sql: &str,
        params: (&str, &str),
    ) -> eyre::Result<Option<WalletRecord>> {
        let inner = self.inner.lock().await;
        let mut rows = inner
            .conn
            .query(sql, params)
            .await
            .context("query keysplit_wallets")?;
        let Some(row) = rows.next().await.context("next row")? else {
            return Ok(None);
        };
        row_to_record(&row).map(Some)
    }

    async fn row_by_id(&self, wallet_id: &str) -> eyre::Result<Option<WalletRecord>> {
        let inner = self.inner.lock().await;
        let mut rows = inner
            .conn
            .query(
                &format!("SELECT {COLUMNS} FROM keysplit_wallets WHERE id = ?"),
                (wallet_id,),
            )
            .await
            .context("query keysplit_wallets")?;
        let Some(row) = rows.next().await.context("next row")? else {
            return Ok(None);
        };
        row_to_record(&row).map(Some)
    }

    async fn insert_row(&self, r: &WalletRecord) -> eyre::Result<()> {
        let inner = self.inner.lock().await;
        inner
            .conn
            .execute(
                &format!(
                    "INSERT INTO keysplit_wallets ({COLUMNS}) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
                ),
                (
                    r.id.as_str(),
                    r.user_id.as_str(),
                    r.address.as_str(),
                    r.network.as_str(),
                    opt_to_col(r.db_share.as_ref()),
                    opt_to_col(r.share_hash.as_ref()),
                    opt_to_col(r.nonce.as_ref()),
                    r.status.as_str(),
                    i64::from(r.is_default),
                    r.priority,
                    r.created_at.as_str(),
                ),
            )
            .await
            .context("insert keysplit_wallets")?;
        Ok(())
    }

    async fn list_rows(&self, user_id: &str) -> eyre::Result<Vec<WalletRecord>> {
        let inner = self.inner.lock().await;
        let mut rows = inner
            .conn
            .query(
                &format!(
                    "SELECT {COLUMNS} FROM keysplit_wallets WHERE user_id = ? \
                     ORDER BY is_default DESC, priority ASC, created_at ASC"
                ),
                (user_id,),
            )
            .await
            .context("query keysplit_wallets")?;

        let mut out: Vec<WalletRecord> = vec![];
        while let Some(row) = rows.next().await.context("next row")? {
            out.push(row_to_record(&row)?);
        }
        Ok(out)
    }
}

#[async_trait]
impl WalletRepository for Db {
    async fn find_active(
        &self,
        user_id: &str,
        network: &str,
    ) -> Result<Option<WalletRecord>, CustodyError> {
        self.query_one(
            &format!(
                "SELECT {COLUMNS} FROM keysplit_wallets \
                 WHERE user_id = ? AND network = ? AND status = 'active'"
            ),
            (user_id, network),
        )
        .await
        .map_err(|e| storage_err(&e))
    }

    async fn find_by_id(&self, wallet_id: &str) -> Result<Option<WalletRecord>, CustodyError> {
        self.row_by_id(wallet_id).await.map_err(|e| storage_err(&e))
    }

    async fn find_by_address(
        &self,
        user_id: &str,
        address: &str,
    ) -> Result<Option<WalletRecord>, CustodyError> {
        // Prefer the active row when the same address was provisioned on several networks.
        self.query_one(
            &format!(
                "SELECT {COLUMNS} FROM keysplit_wallets \
                 WHERE user_id = ? AND address = ? \
                 ORDER BY CASE status WHEN 'active' THEN 0 ELSE 1 END, created_at DESC"
            ),
            (user_id, address),
        )
        .await
        .map_err(|e| storage_err(&e))
    }

    async fn insert(&self, record: &WalletRecord) -> Result<(), CustodyError> {
        self.insert_row(record).await.map_err(|e| {
            if is_unique_violation(&e) {
                CustodyError::Conflict
            } else {
                storage_err(&e)
            }
        })
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<WalletRecord>, CustodyError> {
        self.list_rows(user_id).await.map_err(|e| storage_err(&e))
    }
}
