//! SQLite storage backend for the LIRA indexer.
//!
//! Persists checkpoints and the whole read model to a single SQLite file.
//! Uses `sqlx` with WAL mode for concurrent read performance. `U256`
//! amounts are stored as decimal `TEXT`.
//!
//! # Usage
//! ```rust,no_run
//! use liraindex_storage::sqlite::SqliteStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStorage::open("./liraindex.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStorage::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use alloy_primitives::U256;
use async_trait::async_trait;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use liraindex_core::checkpoint::{Checkpoint, CheckpointStore};
use liraindex_core::entities::{
    EdgeType, Profile, RoleKind, SocialEdge, StatDelta, Token, TokenEvent, TokenStat, TokenType,
    User, UserTokenRole,
};
use liraindex_core::error::IndexerError;
use liraindex_core::store::ProjectionStore;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS checkpoints (
        chain_id     TEXT    NOT NULL,
        contract     TEXT    NOT NULL,
        block_number INTEGER NOT NULL,
        updated_at   INTEGER NOT NULL,
        PRIMARY KEY (chain_id, contract)
    );",
    "CREATE TABLE IF NOT EXISTS token_events (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        token_address   TEXT    NOT NULL,
        event_type      TEXT    NOT NULL,
        from_address    TEXT,
        to_address      TEXT,
        amount          TEXT,
        tx_hash         TEXT    NOT NULL,
        block_number    INTEGER NOT NULL,
        block_timestamp INTEGER NOT NULL,
        log_index       INTEGER NOT NULL,
        metadata        TEXT    NOT NULL,
        UNIQUE (tx_hash, log_index)
    );",
    "CREATE INDEX IF NOT EXISTS idx_token_events_token ON token_events (token_address, block_number);",
    "CREATE TABLE IF NOT EXISTS tokens (
        address         TEXT    PRIMARY KEY,
        name            TEXT    NOT NULL,
        symbol          TEXT    NOT NULL,
        decimals        INTEGER NOT NULL,
        total_supply    TEXT    NOT NULL,
        token_type      TEXT    NOT NULL,
        creator_address TEXT,
        owner_address   TEXT,
        registry_id     TEXT,
        is_active       INTEGER NOT NULL,
        launched_at     INTEGER
    );",
    "CREATE TABLE IF NOT EXISTS token_stats (
        token_address     TEXT    PRIMARY KEY,
        holder_count      INTEGER NOT NULL,
        transaction_count INTEGER NOT NULL,
        volume_total      TEXT    NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS users (
        id      INTEGER PRIMARY KEY AUTOINCREMENT,
        address TEXT    NOT NULL UNIQUE,
        handle  TEXT    UNIQUE
    );",
    "CREATE TABLE IF NOT EXISTS profiles (
        user_id               INTEGER PRIMARY KEY REFERENCES users (id),
        metadata_uri          TEXT,
        primary_token_address TEXT
    );",
    "CREATE TABLE IF NOT EXISTS user_token_roles (
        user_id       INTEGER NOT NULL REFERENCES users (id),
        token_address TEXT    NOT NULL,
        role          TEXT    NOT NULL,
        balance       TEXT    NOT NULL,
        PRIMARY KEY (user_id, token_address, role)
    );",
    "CREATE TABLE IF NOT EXISTS social_edges (
        follower_id  INTEGER NOT NULL REFERENCES users (id),
        following_id INTEGER NOT NULL REFERENCES users (id),
        edge_type    TEXT    NOT NULL,
        PRIMARY KEY (follower_id, following_id, edge_type)
    );",
];

fn db(e: sqlx::Error) -> IndexerError {
    IndexerError::Storage(e.to_string())
}

fn parse_u256(raw: &str) -> Result<U256, IndexerError> {
    raw.parse()
        .map_err(|e| IndexerError::Storage(format!("bad amount '{raw}': {e}")))
}

/// SQLite-backed projection and checkpoint store.
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./liraindex.db"`) or a full
    /// SQLite URL (`"sqlite:./liraindex.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, IndexerError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(db)?;
        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Open an in-memory SQLite database on a single connection.
    ///
    /// All data is lost when the pool is dropped.
    pub async fn in_memory() -> Result<Self, IndexerError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(db)?;
        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Create tables and enable WAL mode.
    async fn init_schema(&self) -> Result<(), IndexerError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(db)?;
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await.map_err(db)?;
        }
        Ok(())
    }

    /// Total audit rows across all tokens.
    pub async fn event_count(&self) -> Result<u64, IndexerError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM token_events")
            .fetch_one(&self.pool)
            .await
            .map_err(db)?;
        Ok(row.try_get::<i64, _>("cnt").map_err(db)? as u64)
    }
}

fn event_from_row(row: &SqliteRow) -> Result<TokenEvent, IndexerError> {
    let amount: Option<String> = row.try_get("amount").map_err(db)?;
    let metadata: String = row.try_get("metadata").map_err(db)?;
    Ok(TokenEvent {
        token_address: row.try_get("token_address").map_err(db)?,
        event_type: row.try_get("event_type").map_err(db)?,
        from_address: row.try_get("from_address").map_err(db)?,
        to_address: row.try_get("to_address").map_err(db)?,
        amount: amount.as_deref().map(parse_u256).transpose()?,
        tx_hash: row.try_get("tx_hash").map_err(db)?,
        block_number: row.try_get::<i64, _>("block_number").map_err(db)? as u64,
        block_timestamp: row.try_get("block_timestamp").map_err(db)?,
        log_index: row.try_get::<i64, _>("log_index").map_err(db)? as u32,
        metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null),
    })
}

fn token_from_row(row: &SqliteRow) -> Result<Token, IndexerError> {
    let supply: String = row.try_get("total_supply").map_err(db)?;
    let token_type: String = row.try_get("token_type").map_err(db)?;
    let registry_id: Option<String> = row.try_get("registry_id").map_err(db)?;
    Ok(Token {
        address: row.try_get("address").map_err(db)?,
        name: row.try_get("name").map_err(db)?,
        symbol: row.try_get("symbol").map_err(db)?,
        decimals: row.try_get::<i64, _>("decimals").map_err(db)? as u8,
        total_supply: parse_u256(&supply)?,
        token_type: TokenType::parse(&token_type)?,
        creator_address: row.try_get("creator_address").map_err(db)?,
        owner_address: row.try_get("owner_address").map_err(db)?,
        registry_id: registry_id.as_deref().map(parse_u256).transpose()?,
        is_active: row.try_get("is_active").map_err(db)?,
        launched_at: row.try_get("launched_at").map_err(db)?,
    })
}

fn stat_from_row(row: &SqliteRow) -> Result<TokenStat, IndexerError> {
    let volume: String = row.try_get("volume_total").map_err(db)?;
    Ok(TokenStat {
        token_address: row.try_get("token_address").map_err(db)?,
        holder_count: row.try_get::<i64, _>("holder_count").map_err(db)? as u64,
        transaction_count: row.try_get::<i64, _>("transaction_count").map_err(db)? as u64,
        volume_total: parse_u256(&volume)?,
    })
}

fn user_from_row(row: &SqliteRow) -> Result<User, IndexerError> {
    Ok(User {
        id: row.try_get("id").map_err(db)?,
        address: row.try_get("address").map_err(db)?,
        handle: row.try_get("handle").map_err(db)?,
    })
}

fn role_from_row(row: &SqliteRow) -> Result<UserTokenRole, IndexerError> {
    let role: String = row.try_get("role").map_err(db)?;
    let balance: String = row.try_get("balance").map_err(db)?;
    Ok(UserTokenRole {
        user_id: row.try_get("user_id").map_err(db)?,
        token_address: row.try_get("token_address").map_err(db)?,
        role: RoleKind::parse(&role)?,
        balance: parse_u256(&balance)?,
    })
}

fn edge_from_row(row: &SqliteRow) -> Result<SocialEdge, IndexerError> {
    let edge_type: String = row.try_get("edge_type").map_err(db)?;
    Ok(SocialEdge {
        follower_id: row.try_get("follower_id").map_err(db)?,
        following_id: row.try_get("following_id").map_err(db)?,
        edge_type: EdgeType::parse(&edge_type)?,
    })
}

// ─── ProjectionStore impl ────────────────────────────────────────────────────

#[async_trait]
impl ProjectionStore for SqliteStorage {
    async fn insert_token_event(&self, event: &TokenEvent) -> Result<bool, IndexerError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO token_events
             (token_address, event_type, from_address, to_address, amount, tx_hash,
              block_number, block_timestamp, log_index, metadata)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&event.token_address)
        .bind(&event.event_type)
        .bind(&event.from_address)
        .bind(&event.to_address)
        .bind(event.amount.map(|a| a.to_string()))
        .bind(&event.tx_hash)
        .bind(event.block_number as i64)
        .bind(event.block_timestamp)
        .bind(event.log_index as i64)
        .bind(event.metadata.to_string())
        .execute(&self.pool)
        .await
        .map_err(db)?;

        let inserted = result.rows_affected() == 1;
        if inserted {
            debug!(token = %event.token_address, tx_hash = %event.tx_hash, log_index = event.log_index, "token event stored");
        }
        Ok(inserted)
    }

    async fn latest_event_block(&self, token_address: &str) -> Result<Option<u64>, IndexerError> {
        let row = sqlx::query("SELECT MAX(block_number) AS latest FROM token_events WHERE token_address = ?")
            .bind(token_address)
            .fetch_one(&self.pool)
            .await
            .map_err(db)?;
        let latest: Option<i64> = row.try_get("latest").map_err(db)?;
        Ok(latest.map(|b| b as u64))
    }

    async fn token_events(&self, token_address: &str) -> Result<Vec<TokenEvent>, IndexerError> {
        let rows = sqlx::query(
            "SELECT * FROM token_events WHERE token_address = ? ORDER BY block_number, log_index",
        )
        .bind(token_address)
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;
        rows.iter().map(event_from_row).collect()
    }

    async fn token(&self, address: &str) -> Result<Option<Token>, IndexerError> {
        let row = sqlx::query("SELECT * FROM tokens WHERE address = ?")
            .bind(address)
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;
        row.as_ref().map(token_from_row).transpose()
    }

    async fn save_token(&self, token: &Token) -> Result<(), IndexerError> {
        sqlx::query(
            "INSERT OR REPLACE INTO tokens
             (address, name, symbol, decimals, total_supply, token_type, creator_address,
              owner_address, registry_id, is_active, launched_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&token.address)
        .bind(&token.name)
        .bind(&token.symbol)
        .bind(token.decimals as i64)
        .bind(token.total_supply.to_string())
        .bind(token.token_type.as_str())
        .bind(&token.creator_address)
        .bind(&token.owner_address)
        .bind(token.registry_id.map(|id| id.to_string()))
        .bind(token.is_active)
        .bind(token.launched_at)
        .execute(&self.pool)
        .await
        .map_err(db)?;
        Ok(())
    }

    async fn token_stat(&self, token_address: &str) -> Result<Option<TokenStat>, IndexerError> {
        let row = sqlx::query("SELECT * FROM token_stats WHERE token_address = ?")
            .bind(token_address)
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;
        row.as_ref().map(stat_from_row).transpose()
    }

    async fn create_token_stat(
        &self,
        token_address: &str,
        holder_count: u64,
    ) -> Result<bool, IndexerError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO token_stats
             (token_address, holder_count, transaction_count, volume_total)
             VALUES (?, ?, 0, '0')",
        )
        .bind(token_address)
        .bind(holder_count as i64)
        .execute(&self.pool)
        .await
        .map_err(db)?;
        Ok(result.rows_affected() == 1)
    }

    async fn record_activity(
        &self,
        token_address: &str,
        delta: StatDelta,
    ) -> Result<(), IndexerError> {
        let mut tx = self.pool.begin().await.map_err(db)?;
        let row = sqlx::query("SELECT * FROM token_stats WHERE token_address = ?")
            .bind(token_address)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db)?;
        let mut stat = match row {
            Some(row) => stat_from_row(&row)?,
            None => TokenStat::empty(token_address),
        };
        stat.apply(&delta);

        sqlx::query(
            "INSERT OR REPLACE INTO token_stats
             (token_address, holder_count, transaction_count, volume_total)
             VALUES (?, ?, ?, ?)",
        )
        .bind(&stat.token_address)
        .bind(stat.holder_count as i64)
        .bind(stat.transaction_count as i64)
        .bind(stat.volume_total.to_string())
        .execute(&mut *tx)
        .await
        .map_err(db)?;
        tx.commit().await.map_err(db)
    }

    async fn user(&self, address: &str) -> Result<Option<User>, IndexerError> {
        let row = sqlx::query("SELECT id, address, handle FROM users WHERE address = ?")
            .bind(address)
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn ensure_user(&self, address: &str) -> Result<User, IndexerError> {
        sqlx::query("INSERT OR IGNORE INTO users (address) VALUES (?)")
            .bind(address)
            .execute(&self.pool)
            .await
            .map_err(db)?;
        self.user(address)
            .await?
            .ok_or_else(|| IndexerError::Storage(format!("user {address} vanished after insert")))
    }

    async fn set_handle(&self, user_id: i64, handle: &str) -> Result<(), IndexerError> {
        let result = sqlx::query("UPDATE users SET handle = ? WHERE id = ?")
            .bind(handle)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref d) if d.is_unique_violation() => {
                    IndexerError::Storage(format!("handle '{handle}' already taken"))
                }
                other => db(other),
            })?;
        if result.rows_affected() == 0 {
            return Err(IndexerError::Storage(format!("no user with id {user_id}")));
        }
        Ok(())
    }

    async fn profile(&self, user_id: i64) -> Result<Option<Profile>, IndexerError> {
        let row = sqlx::query("SELECT * FROM profiles WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;
        row.map(|r| -> Result<Profile, IndexerError> {
            Ok(Profile {
                user_id: r.try_get("user_id").map_err(db)?,
                metadata_uri: r.try_get("metadata_uri").map_err(db)?,
                primary_token_address: r.try_get("primary_token_address").map_err(db)?,
            })
        })
        .transpose()
    }

    async fn save_profile(&self, profile: &Profile) -> Result<(), IndexerError> {
        sqlx::query(
            "INSERT OR REPLACE INTO profiles (user_id, metadata_uri, primary_token_address)
             VALUES (?, ?, ?)",
        )
        .bind(profile.user_id)
        .bind(&profile.metadata_uri)
        .bind(&profile.primary_token_address)
        .execute(&self.pool)
        .await
        .map_err(db)?;
        Ok(())
    }

    async fn role(
        &self,
        user_id: i64,
        token_address: &str,
        role: RoleKind,
    ) -> Result<Option<UserTokenRole>, IndexerError> {
        let row = sqlx::query(
            "SELECT * FROM user_token_roles WHERE user_id = ? AND token_address = ? AND role = ?",
        )
        .bind(user_id)
        .bind(token_address)
        .bind(role.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db)?;
        row.as_ref().map(role_from_row).transpose()
    }

    async fn save_role(&self, role: &UserTokenRole) -> Result<(), IndexerError> {
        sqlx::query(
            "INSERT OR REPLACE INTO user_token_roles (user_id, token_address, role, balance)
             VALUES (?, ?, ?, ?)",
        )
        .bind(role.user_id)
        .bind(&role.token_address)
        .bind(role.role.as_str())
        .bind(role.balance.to_string())
        .execute(&self.pool)
        .await
        .map_err(db)?;
        Ok(())
    }

    async fn roles_for_token(
        &self,
        token_address: &str,
    ) -> Result<Vec<UserTokenRole>, IndexerError> {
        let rows = sqlx::query(
            "SELECT * FROM user_token_roles WHERE token_address = ? ORDER BY user_id, role",
        )
        .bind(token_address)
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;
        rows.iter().map(role_from_row).collect()
    }

    async fn add_edge(&self, edge: SocialEdge) -> Result<(), IndexerError> {
        sqlx::query(
            "INSERT OR IGNORE INTO social_edges (follower_id, following_id, edge_type) VALUES (?, ?, ?)",
        )
        .bind(edge.follower_id)
        .bind(edge.following_id)
        .bind(edge.edge_type.as_str())
        .execute(&self.pool)
        .await
        .map_err(db)?;
        Ok(())
    }

    async fn remove_edge(&self, edge: SocialEdge) -> Result<bool, IndexerError> {
        let result = sqlx::query(
            "DELETE FROM social_edges WHERE follower_id = ? AND following_id = ? AND edge_type = ?",
        )
        .bind(edge.follower_id)
        .bind(edge.following_id)
        .bind(edge.edge_type.as_str())
        .execute(&self.pool)
        .await
        .map_err(db)?;
        Ok(result.rows_affected() > 0)
    }

    async fn block(&self, blocker_id: i64, blocked_id: i64) -> Result<(), IndexerError> {
        let mut tx = self.pool.begin().await.map_err(db)?;
        sqlx::query(
            "INSERT OR IGNORE INTO social_edges (follower_id, following_id, edge_type) VALUES (?, ?, 'block')",
        )
        .bind(blocker_id)
        .bind(blocked_id)
        .execute(&mut *tx)
        .await
        .map_err(db)?;
        sqlx::query(
            "DELETE FROM social_edges WHERE edge_type = 'follow'
             AND ((follower_id = ? AND following_id = ?) OR (follower_id = ? AND following_id = ?))",
        )
        .bind(blocker_id)
        .bind(blocked_id)
        .bind(blocked_id)
        .bind(blocker_id)
        .execute(&mut *tx)
        .await
        .map_err(db)?;
        tx.commit().await.map_err(db)
    }

    async fn edge_exists(&self, edge: SocialEdge) -> Result<bool, IndexerError> {
        let row = sqlx::query(
            "SELECT 1 FROM social_edges WHERE follower_id = ? AND following_id = ? AND edge_type = ?",
        )
        .bind(edge.follower_id)
        .bind(edge.following_id)
        .bind(edge.edge_type.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db)?;
        Ok(row.is_some())
    }

    async fn edges_between(&self, a: i64, b: i64) -> Result<Vec<SocialEdge>, IndexerError> {
        let rows = sqlx::query(
            "SELECT * FROM social_edges
             WHERE (follower_id = ? AND following_id = ?) OR (follower_id = ? AND following_id = ?)
             ORDER BY follower_id, edge_type",
        )
        .bind(a)
        .bind(b)
        .bind(b)
        .bind(a)
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;
        rows.iter().map(edge_from_row).collect()
    }

    async fn close(&self) -> Result<(), IndexerError> {
        self.pool.close().await;
        debug!("sqlite pool closed");
        Ok(())
    }
}

// ─── CheckpointStore impl ────────────────────────────────────────────────────

#[async_trait]
impl CheckpointStore for SqliteStorage {
    async fn load(
        &self,
        chain_id: &str,
        contract: &str,
    ) -> Result<Option<Checkpoint>, IndexerError> {
        let row = sqlx::query(
            "SELECT chain_id, contract, block_number, updated_at
             FROM checkpoints WHERE chain_id = ? AND contract = ?",
        )
        .bind(chain_id)
        .bind(contract)
        .fetch_optional(&self.pool)
        .await
        .map_err(db)?;

        row.map(|r| -> Result<Checkpoint, IndexerError> {
            Ok(Checkpoint {
                chain_id: r.try_get("chain_id").map_err(db)?,
                contract: r.try_get("contract").map_err(db)?,
                block_number: r.try_get::<i64, _>("block_number").map_err(db)? as u64,
                updated_at: r.try_get("updated_at").map_err(db)?,
            })
        })
        .transpose()
    }

    async fn save(&self, checkpoint: Checkpoint) -> Result<(), IndexerError> {
        sqlx::query(
            "INSERT OR REPLACE INTO checkpoints (chain_id, contract, block_number, updated_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(&checkpoint.chain_id)
        .bind(&checkpoint.contract)
        .bind(checkpoint.block_number as i64)
        .bind(checkpoint.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db)?;

        debug!(
            chain_id = %checkpoint.chain_id,
            contract = %checkpoint.contract,
            block = checkpoint.block_number,
            "checkpoint saved"
        );
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(tx: &str, log_index: u32, block: u64) -> TokenEvent {
        TokenEvent {
            token_address: "0xaa".into(),
            event_type: "Transfer".into(),
            from_address: None,
            to_address: Some("0xcc".into()),
            amount: Some(U256::from(10u64).pow(U256::from(30u64))),
            tx_hash: tx.into(),
            block_number: block,
            block_timestamp: 1_700_000_000,
            log_index,
            metadata: json!({ "note": "mint" }),
        }
    }

    // ── CheckpointStore ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn checkpoint_upsert() {
        let store = SqliteStorage::in_memory().await.unwrap();
        for block in [100, 200] {
            store
                .save(Checkpoint {
                    chain_id: "base-sepolia".into(),
                    contract: "LiraToken".into(),
                    block_number: block,
                    updated_at: block as i64,
                })
                .await
                .unwrap();
        }
        let loaded = store.load("base-sepolia", "LiraToken").await.unwrap().unwrap();
        assert_eq!(loaded.block_number, 200);
        assert!(store.load("base-mainnet", "LiraToken").await.unwrap().is_none());
    }

    // ── Token events ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn token_event_dedup_and_big_amounts() {
        let store = SqliteStorage::in_memory().await.unwrap();
        assert!(store.insert_token_event(&event("0x01", 0, 10)).await.unwrap());
        assert!(!store.insert_token_event(&event("0x01", 0, 10)).await.unwrap());
        assert!(store.insert_token_event(&event("0x01", 1, 12)).await.unwrap());
        assert_eq!(store.event_count().await.unwrap(), 2);

        let events = store.token_events("0xaa").await.unwrap();
        assert_eq!(events[0], event("0x01", 0, 10));
        assert_eq!(store.latest_event_block("0xaa").await.unwrap(), Some(12));
        assert_eq!(store.latest_event_block("0xbb").await.unwrap(), None);
    }

    // ── Tokens and stats ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn token_roundtrip() {
        let store = SqliteStorage::in_memory().await.unwrap();
        let mut token = Token::placeholder("0xaa", TokenType::Social);
        token.registry_id = Some(U256::from(7u64));
        token.launched_at = Some(1_700_000_000);
        store.save_token(&token).await.unwrap();
        assert_eq!(store.token("0xaa").await.unwrap(), Some(token.clone()));

        token.is_active = false;
        store.save_token(&token).await.unwrap();
        assert!(!store.token("0xaa").await.unwrap().unwrap().is_active);
    }

    #[tokio::test]
    async fn stats_accumulate() {
        let store = SqliteStorage::in_memory().await.unwrap();
        assert!(store.create_token_stat("0xaa", 1).await.unwrap());
        assert!(!store.create_token_stat("0xaa", 5).await.unwrap());
        store
            .record_activity("0xaa", StatDelta { holders: 1, transactions: 1, volume: U256::from(40u64) })
            .await
            .unwrap();
        store
            .record_activity("0xaa", StatDelta { holders: 0, transactions: 1, volume: U256::from(2u64) })
            .await
            .unwrap();

        let stat = store.token_stat("0xaa").await.unwrap().unwrap();
        assert_eq!((stat.holder_count, stat.transaction_count), (2, 2));
        assert_eq!(stat.volume_total, U256::from(42u64));
    }

    // ── Users, profiles, roles ───────────────────────────────────────────────

    #[tokio::test]
    async fn users_are_created_once_and_handles_are_unique() {
        let store = SqliteStorage::in_memory().await.unwrap();
        let a = store.ensure_user("0x0a").await.unwrap();
        assert_eq!(store.ensure_user("0x0a").await.unwrap().id, a.id);
        let b = store.ensure_user("0x0b").await.unwrap();

        store.set_handle(a.id, "alice").await.unwrap();
        let err = store.set_handle(b.id, "alice").await.unwrap_err();
        assert!(err.to_string().contains("already taken"));
        // re-applying the same handle is fine
        store.set_handle(a.id, "alice").await.unwrap();

        store
            .save_profile(&Profile { user_id: a.id, metadata_uri: Some("ipfs://a".into()), primary_token_address: None })
            .await
            .unwrap();
        assert_eq!(store.profile(a.id).await.unwrap().unwrap().metadata_uri.as_deref(), Some("ipfs://a"));
    }

    #[tokio::test]
    async fn roles_upsert() {
        let store = SqliteStorage::in_memory().await.unwrap();
        let u = store.ensure_user("0x0c").await.unwrap();
        let mut role = UserTokenRole {
            user_id: u.id,
            token_address: "0xaa".into(),
            role: RoleKind::Holder,
            balance: U256::from(5u64),
        };
        store.save_role(&role).await.unwrap();
        role.balance = U256::from(9u64);
        store.save_role(&role).await.unwrap();

        let roles = store.roles_for_token("0xaa").await.unwrap();
        assert_eq!(roles, vec![role]);
        assert!(store.role(u.id, "0xaa", RoleKind::Creator).await.unwrap().is_none());
    }

    // ── Social graph ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn block_drops_follows_both_ways() {
        let store = SqliteStorage::in_memory().await.unwrap();
        let a = store.ensure_user("0x0a").await.unwrap().id;
        let b = store.ensure_user("0x0b").await.unwrap().id;
        store.add_edge(SocialEdge::new(a, b, EdgeType::Follow)).await.unwrap();
        store.add_edge(SocialEdge::new(b, a, EdgeType::Follow)).await.unwrap();
        store.add_edge(SocialEdge::new(a, b, EdgeType::Mute)).await.unwrap();

        store.block(b, a).await.unwrap();

        let edges = store.edges_between(a, b).await.unwrap();
        assert_eq!(edges.len(), 2);
        assert!(edges.contains(&SocialEdge::new(b, a, EdgeType::Block)));
        assert!(edges.contains(&SocialEdge::new(a, b, EdgeType::Mute)));
        assert!(!store.edge_exists(SocialEdge::new(a, b, EdgeType::Follow)).await.unwrap());
        assert!(!store.remove_edge(SocialEdge::new(a, b, EdgeType::Follow)).await.unwrap());
    }
}
