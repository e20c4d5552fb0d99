//! SQLite storage backend.
//!
//! Persists every event table plus the processed-file ledger to a single
//! SQLite file. Each record file is written inside one `sqlx::Transaction`.
//!
//! # Usage
//! ```rust,no_run
//! use recordindex_storage::sqlite::SqliteStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStorage::open("./ledger.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStorage::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool};
use tracing::debug;

use recordindex_core::checkpoint::ProcessedFileRecord;
use recordindex_core::entity::{EntityId, EntityType};
use recordindex_core::error::PersistenceError;
use recordindex_core::event::{
    ContractLog, ContractResult, ContractStateChange, DomainEvent, EntityUpsert, EventKind,
    FileData, LiveHash, TopicMessage, TransactionEvent, Transfer,
};
use recordindex_core::writer::{StorageBackend, StorageTransaction};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS entity (
        id                               INTEGER PRIMARY KEY,
        shard                            INTEGER NOT NULL,
        realm                            INTEGER NOT NULL,
        num                              INTEGER NOT NULL,
        type                             TEXT    NOT NULL,
        balance                          INTEGER NOT NULL DEFAULT 0
                                         CHECK (typeof(balance) = 'integer'),
        balance_timestamp                INTEGER,
        created_timestamp                INTEGER,
        modified_timestamp               INTEGER,
        deleted                          INTEGER,
        key                              BLOB,
        memo                             TEXT,
        expiration_timestamp             INTEGER,
        auto_renew_period                INTEGER,
        auto_renew_account_id            INTEGER,
        receiver_sig_required            INTEGER,
        max_automatic_token_associations INTEGER,
        alias                            BLOB,
        submit_key                       BLOB,
        file_id                          INTEGER,
        initcode                         BLOB,
        obtainer_id                      INTEGER
    );",
    "CREATE TABLE IF NOT EXISTS ledger_transaction (
        consensus_timestamp    INTEGER PRIMARY KEY,
        type                   INTEGER NOT NULL,
        result                 INTEGER NOT NULL,
        payer_account_id       INTEGER,
        node_account_id        INTEGER,
        entity_id              INTEGER,
        charged_tx_fee         INTEGER NOT NULL,
        max_fee                INTEGER NOT NULL,
        memo                   TEXT    NOT NULL,
        valid_start_ns         INTEGER,
        valid_duration_seconds INTEGER,
        transaction_hash       BLOB    NOT NULL,
        idx                    INTEGER NOT NULL,
        scheduled              INTEGER NOT NULL,
        nonce                  INTEGER NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS crypto_transfer (
        consensus_timestamp INTEGER NOT NULL,
        entity_id           INTEGER NOT NULL,
        amount              INTEGER NOT NULL,
        payer_account_id    INTEGER,
        PRIMARY KEY (consensus_timestamp, entity_id)
    );",
    "CREATE TABLE IF NOT EXISTS non_fee_transfer (
        consensus_timestamp INTEGER NOT NULL,
        entity_id           INTEGER NOT NULL,
        amount              INTEGER NOT NULL,
        payer_account_id    INTEGER
    );",
    "CREATE INDEX IF NOT EXISTS idx_non_fee_transfer_ts ON non_fee_transfer (consensus_timestamp);",
    "CREATE TABLE IF NOT EXISTS contract_result (
        consensus_timestamp  INTEGER PRIMARY KEY,
        contract_id          INTEGER,
        payer_account_id     INTEGER,
        sender_id            INTEGER,
        amount               INTEGER NOT NULL,
        gas_limit            INTEGER NOT NULL,
        gas_used             INTEGER NOT NULL,
        function_parameters  BLOB    NOT NULL,
        call_result          BLOB    NOT NULL,
        error_message        TEXT,
        bloom                BLOB    NOT NULL,
        created_contract_ids TEXT    NOT NULL,
        transaction_result   INTEGER NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS contract_log (
        consensus_timestamp INTEGER NOT NULL,
        idx                 INTEGER NOT NULL,
        contract_id         INTEGER,
        root_contract_id    INTEGER,
        payer_account_id    INTEGER,
        bloom               BLOB    NOT NULL,
        data                BLOB    NOT NULL,
        topic0              BLOB,
        topic1              BLOB,
        topic2              BLOB,
        topic3              BLOB,
        PRIMARY KEY (consensus_timestamp, idx)
    );",
    "CREATE TABLE IF NOT EXISTS contract_state_change (
        consensus_timestamp INTEGER NOT NULL,
        contract_id         INTEGER NOT NULL,
        payer_account_id    INTEGER,
        slot                BLOB    NOT NULL,
        value_read          BLOB    NOT NULL,
        value_written       BLOB,
        PRIMARY KEY (consensus_timestamp, contract_id, slot)
    );",
    "CREATE TABLE IF NOT EXISTS contract_state (
        contract_id        INTEGER NOT NULL,
        slot               BLOB    NOT NULL,
        value              BLOB    NOT NULL,
        created_timestamp  INTEGER NOT NULL,
        modified_timestamp INTEGER NOT NULL,
        PRIMARY KEY (contract_id, slot)
    );",
    "CREATE TABLE IF NOT EXISTS topic_message (
        consensus_timestamp             INTEGER PRIMARY KEY,
        topic_id                        INTEGER NOT NULL,
        payer_account_id                INTEGER,
        message                         BLOB    NOT NULL,
        sequence_number                 INTEGER NOT NULL,
        running_hash                    BLOB    NOT NULL,
        running_hash_version            INTEGER NOT NULL,
        chunk_num                       INTEGER,
        chunk_total                     INTEGER,
        initial_transaction_valid_start INTEGER
    );",
    "CREATE TABLE IF NOT EXISTS live_hash (
        consensus_timestamp INTEGER PRIMARY KEY,
        account_id          INTEGER NOT NULL,
        hash                BLOB    NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS file_data (
        consensus_timestamp INTEGER PRIMARY KEY,
        entity_id           INTEGER NOT NULL,
        transaction_type    INTEGER NOT NULL,
        file_data           BLOB    NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS record_file (
        name            TEXT    PRIMARY KEY,
        idx             INTEGER NOT NULL UNIQUE,
        version         INTEGER NOT NULL,
        hapi_version    TEXT    NOT NULL,
        consensus_start INTEGER NOT NULL,
        consensus_end   INTEGER NOT NULL,
        count           INTEGER NOT NULL,
        prev_hash       TEXT    NOT NULL,
        hash            TEXT    NOT NULL,
        file_hash       TEXT    NOT NULL,
        metadata_hash   TEXT,
        node_id         INTEGER,
        size            INTEGER NOT NULL,
        load_start      INTEGER NOT NULL,
        load_end        INTEGER NOT NULL
    );",
];

/// Tables [`SqliteStorage::row_count`] accepts.
pub const TABLES: &[&str] = &[
    "entity",
    "ledger_transaction",
    "crypto_transfer",
    "non_fee_transfer",
    "contract_result",
    "contract_log",
    "contract_state_change",
    "contract_state",
    "topic_message",
    "live_hash",
    "file_data",
    "record_file",
];

const RECORD_FILE_COLUMNS: &str = "name, idx, version, hapi_version, consensus_start, \
     consensus_end, count, prev_hash, hash, file_hash, metadata_hash, node_id, size, \
     load_start, load_end";

// ─── Error mapping ───────────────────────────────────────────────────────────

/// Map a sqlx error raised while touching `table`.
fn classify(table: &'static str) -> impl Fn(sqlx::Error) -> PersistenceError {
    move |e| match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => PersistenceError::Constraint {
            table: table.to_string(),
            detail: db.message().to_string(),
        },
        // SQLITE_BUSY / SQLITE_LOCKED, including extended codes
        sqlx::Error::Database(db)
            if db
                .code()
                .and_then(|c| c.parse::<i32>().ok())
                .is_some_and(|c| matches!(c & 0xff, 5 | 6)) =>
        {
            PersistenceError::Transient(e.to_string())
        }
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => PersistenceError::Transient(e.to_string()),
        _ => PersistenceError::Other(e.to_string()),
    }
}

fn other(e: impl std::fmt::Display) -> PersistenceError {
    PersistenceError::Other(e.to_string())
}

fn encode(id: Option<EntityId>) -> Option<i64> {
    id.map(|id| id.encode())
}

// ─── SqliteStorage ───────────────────────────────────────────────────────────

/// SQLite-backed event store and processed-file ledger.
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./ledger.db"`) or a full
    /// SQLite URL (`"sqlite:./ledger.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, PersistenceError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url)
            .await
            .map_err(classify("connection"))?;

        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&pool)
            .await
            .map_err(classify("connection"))?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Open an in-memory SQLite database.
    ///
    /// The pool holds exactly one connection that never expires, since each
    /// connection to `sqlite::memory:` is a separate database.
    pub async fn in_memory() -> Result<Self, PersistenceError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(classify("connection"))?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    async fn init_schema(&self) -> Result<(), PersistenceError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(classify("schema"))?;
        }
        debug!(tables = TABLES.len(), "SQLite schema initialised");
        Ok(())
    }

    // ─── Queries ────────────────────────────────────────────────────────────

    /// Number of rows in `table`, which must be one of [`TABLES`].
    pub async fn row_count(&self, table: &str) -> Result<i64, PersistenceError> {
        if !TABLES.contains(&table) {
            return Err(other(format!("unknown table '{table}'")));
        }
        let row = sqlx::query(&format!("SELECT COUNT(*) AS n FROM {table}"))
            .fetch_one(&self.pool)
            .await
            .map_err(classify("query"))?;
        row.try_get("n").map_err(other)
    }

    /// Committed balance of `id`; zero for unknown entities.
    pub async fn balance(&self, id: EntityId) -> Result<i64, PersistenceError> {
        let row = sqlx::query("SELECT balance FROM entity WHERE id = ?")
            .bind(id.encode())
            .fetch_optional(&self.pool)
            .await
            .map_err(classify("entity"))?;
        match row {
            Some(r) => r.try_get("balance").map_err(other),
            None => Ok(0),
        }
    }

    pub async fn entity_memo(&self, id: EntityId) -> Result<Option<String>, PersistenceError> {
        let row = sqlx::query("SELECT memo FROM entity WHERE id = ?")
            .bind(id.encode())
            .fetch_optional(&self.pool)
            .await
            .map_err(classify("entity"))?;
        match row {
            Some(r) => r.try_get("memo").map_err(other),
            None => Ok(None),
        }
    }

    /// Current value of a contract storage slot.
    pub async fn contract_state(
        &self,
        contract: EntityId,
        slot: &[u8],
    ) -> Result<Option<Vec<u8>>, PersistenceError> {
        let row = sqlx::query("SELECT value FROM contract_state WHERE contract_id = ? AND slot = ?")
            .bind(contract.encode())
            .bind(slot)
            .fetch_optional(&self.pool)
            .await
            .map_err(classify("contract_state"))?;
        row.map(|r| r.try_get("value").map_err(other)).transpose()
    }

    /// Ledger rows in index order.
    pub async fn processed_files(&self) -> Result<Vec<ProcessedFileRecord>, PersistenceError> {
        let rows = sqlx::query(&format!(
            "SELECT {RECORD_FILE_COLUMNS} FROM record_file ORDER BY idx"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(classify("record_file"))?;
        rows.iter().map(record_from_row).collect()
    }
}

fn record_from_row(row: &SqliteRow) -> Result<ProcessedFileRecord, PersistenceError> {
    let node = row
        .try_get::<Option<i64>, _>("node_id")
        .map_err(other)?
        .map(EntityId::decode)
        .transpose()
        .map_err(other)?;

    Ok(ProcessedFileRecord {
        name: row.try_get("name").map_err(other)?,
        version: row.try_get("version").map_err(other)?,
        hapi_version: row.try_get("hapi_version").map_err(other)?,
        index: row.try_get("idx").map_err(other)?,
        consensus_start: row.try_get("consensus_start").map_err(other)?,
        consensus_end: row.try_get("consensus_end").map_err(other)?,
        count: row.try_get("count").map_err(other)?,
        previous_hash: row.try_get("prev_hash").map_err(other)?,
        hash: row.try_get("hash").map_err(other)?,
        file_hash: row.try_get("file_hash").map_err(other)?,
        metadata_hash: row.try_get("metadata_hash").map_err(other)?,
        node,
        size: row.try_get("size").map_err(other)?,
        load_start: row.try_get("load_start").map_err(other)?,
        load_end: row.try_get("load_end").map_err(other)?,
    })
}

#[async_trait]
impl StorageBackend for SqliteStorage {
    async fn last_processed(&self) -> Result<Option<ProcessedFileRecord>, PersistenceError> {
        let row = sqlx::query(&format!(
            "SELECT {RECORD_FILE_COLUMNS} FROM record_file ORDER BY idx DESC LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await
        .map_err(classify("record_file"))?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn find_processed(
        &self,
        name: &str,
    ) -> Result<Option<ProcessedFileRecord>, PersistenceError> {
        let row = sqlx::query(&format!(
            "SELECT {RECORD_FILE_COLUMNS} FROM record_file WHERE name = ?"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify("record_file"))?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn begin(&self) -> Result<Box<dyn StorageTransaction>, PersistenceError> {
        let tx = self.pool.begin().await.map_err(classify("transaction"))?;
        Ok(Box::new(SqliteTransaction { tx }))
    }
}

// ─── Transaction ─────────────────────────────────────────────────────────────

struct SqliteTransaction {
    tx: sqlx::Transaction<'static, Sqlite>,
}

#[async_trait]
impl StorageTransaction for SqliteTransaction {
    async fn write_batch(
        &mut self,
        kind: EventKind,
        events: &[DomainEvent],
    ) -> Result<(), PersistenceError> {
        let conn: &mut SqliteConnection = &mut self.tx;
        for event in events {
            if event.kind() != kind {
                return Err(other(format!("{} event in a {kind} batch", event.kind())));
            }
            match event {
                DomainEvent::Transaction(e) => insert_transaction(conn, e).await?,
                DomainEvent::EntityUpsert(e) => upsert_entity(conn, e).await?,
                DomainEvent::Transfer(e) => insert_transfer(conn, e).await?,
                DomainEvent::NonFeeTransfer(e) => insert_non_fee_transfer(conn, e).await?,
                DomainEvent::ContractResult(e) => insert_contract_result(conn, e).await?,
                DomainEvent::ContractLog(e) => insert_contract_log(conn, e).await?,
                DomainEvent::ContractStateChange(e) => insert_state_change(conn, e).await?,
                DomainEvent::TopicMessage(e) => insert_topic_message(conn, e).await?,
                DomainEvent::LiveHash(e) => insert_live_hash(conn, e).await?,
                DomainEvent::FileData(e) => insert_file_data(conn, e).await?,
            }
        }
        Ok(())
    }

    async fn write_file_record(
        &mut self,
        record: &ProcessedFileRecord,
    ) -> Result<(), PersistenceError> {
        sqlx::query(&format!(
            "INSERT INTO record_file ({RECORD_FILE_COLUMNS})
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&record.name)
        .bind(record.index)
        .bind(record.version)
        .bind(&record.hapi_version)
        .bind(record.consensus_start)
        .bind(record.consensus_end)
        .bind(record.count)
        .bind(&record.previous_hash)
        .bind(&record.hash)
        .bind(&record.file_hash)
        .bind(&record.metadata_hash)
        .bind(encode(record.node))
        .bind(record.size)
        .bind(record.load_start)
        .bind(record.load_end)
        .execute(&mut *self.tx)
        .await
        .map_err(classify("record_file"))?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), PersistenceError> {
        let Self { tx } = *self;
        tx.commit().await.map_err(classify("transaction"))
    }

    async fn rollback(self: Box<Self>) -> Result<(), PersistenceError> {
        let Self { tx } = *self;
        tx.rollback().await.map_err(classify("transaction"))
    }
}

// ─── Row writers ─────────────────────────────────────────────────────────────

async fn insert_transaction(
    conn: &mut SqliteConnection,
    e: &TransactionEvent,
) -> Result<(), PersistenceError> {
    sqlx::query(
        "INSERT INTO ledger_transaction (
            consensus_timestamp, type, result, payer_account_id, node_account_id, entity_id,
            charged_tx_fee, max_fee, memo, valid_start_ns, valid_duration_seconds,
            transaction_hash, idx, scheduled, nonce
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(e.consensus_timestamp)
    .bind(e.transaction_type.code())
    .bind(e.result)
    .bind(encode(e.payer))
    .bind(encode(e.node))
    .bind(encode(e.entity))
    .bind(e.charged_fee)
    .bind(e.max_fee)
    .bind(&e.memo)
    .bind(e.valid_start_ns)
    .bind(e.valid_duration_seconds)
    .bind(&e.transaction_hash)
    .bind(e.index)
    .bind(e.scheduled)
    .bind(e.nonce)
    .execute(conn)
    .await
    .map_err(classify("ledger_transaction"))?;
    Ok(())
}

async fn upsert_entity(
    conn: &mut SqliteConnection,
    e: &EntityUpsert,
) -> Result<(), PersistenceError> {
    sqlx::query(
        "INSERT INTO entity (
            id, shard, realm, num, type, created_timestamp, modified_timestamp, deleted, key,
            memo, expiration_timestamp, auto_renew_period, auto_renew_account_id,
            receiver_sig_required, max_automatic_token_associations, alias, submit_key,
            file_id, initcode, obtainer_id
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (id) DO UPDATE SET
            type                             = excluded.type,
            modified_timestamp               = excluded.modified_timestamp,
            created_timestamp                = COALESCE(excluded.created_timestamp, entity.created_timestamp),
            deleted                          = COALESCE(excluded.deleted, entity.deleted),
            key                              = COALESCE(excluded.key, entity.key),
            memo                             = COALESCE(excluded.memo, entity.memo),
            expiration_timestamp             = COALESCE(excluded.expiration_timestamp, entity.expiration_timestamp),
            auto_renew_period                = COALESCE(excluded.auto_renew_period, entity.auto_renew_period),
            auto_renew_account_id            = COALESCE(excluded.auto_renew_account_id, entity.auto_renew_account_id),
            receiver_sig_required            = COALESCE(excluded.receiver_sig_required, entity.receiver_sig_required),
            max_automatic_token_associations = COALESCE(excluded.max_automatic_token_associations, entity.max_automatic_token_associations),
            alias                            = COALESCE(excluded.alias, entity.alias),
            submit_key                       = COALESCE(excluded.submit_key, entity.submit_key),
            file_id                          = COALESCE(excluded.file_id, entity.file_id),
            initcode                         = COALESCE(excluded.initcode, entity.initcode),
            obtainer_id                      = COALESCE(excluded.obtainer_id, entity.obtainer_id)",
    )
    .bind(e.id.encode())
    .bind(e.id.shard())
    .bind(e.id.realm())
    .bind(e.id.num())
    .bind(e.entity_type.as_str())
    .bind(e.created_timestamp)
    .bind(e.consensus_timestamp)
    .bind(e.deleted)
    .bind(&e.key)
    .bind(&e.memo)
    .bind(e.expiration_timestamp)
    .bind(e.auto_renew_period)
    .bind(encode(e.auto_renew_account))
    .bind(e.receiver_sig_required)
    .bind(e.max_automatic_token_associations)
    .bind(&e.alias)
    .bind(&e.submit_key)
    .bind(encode(e.file_id))
    .bind(&e.initcode)
    .bind(encode(e.obtainer))
    .execute(conn)
    .await
    .map_err(classify("entity"))?;
    Ok(())
}

async fn insert_transfer(
    conn: &mut SqliteConnection,
    e: &Transfer,
) -> Result<(), PersistenceError> {
    sqlx::query(
        "INSERT INTO crypto_transfer (consensus_timestamp, entity_id, amount, payer_account_id)
         VALUES (?, ?, ?, ?)",
    )
    .bind(e.consensus_timestamp)
    .bind(e.entity_id.encode())
    .bind(e.amount)
    .bind(encode(e.payer))
    .execute(&mut *conn)
    .await
    .map_err(classify("crypto_transfer"))?;

    sqlx::query(
        "INSERT INTO entity (id, shard, realm, num, type, balance, balance_timestamp)
         VALUES (?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT (id) DO UPDATE SET
            balance           = entity.balance + excluded.balance,
            balance_timestamp = excluded.balance_timestamp",
    )
    .bind(e.entity_id.encode())
    .bind(e.entity_id.shard())
    .bind(e.entity_id.realm())
    .bind(e.entity_id.num())
    .bind(EntityType::Account.as_str())
    .bind(e.amount)
    .bind(e.consensus_timestamp)
    .execute(&mut *conn)
    .await
    .map_err(classify("entity"))?;
    Ok(())
}

async fn insert_non_fee_transfer(
    conn: &mut SqliteConnection,
    e: &Transfer,
) -> Result<(), PersistenceError> {
    sqlx::query(
        "INSERT INTO non_fee_transfer (consensus_timestamp, entity_id, amount, payer_account_id)
         VALUES (?, ?, ?, ?)",
    )
    .bind(e.consensus_timestamp)
    .bind(e.entity_id.encode())
    .bind(e.amount)
    .bind(encode(e.payer))
    .execute(conn)
    .await
    .map_err(classify("non_fee_transfer"))?;
    Ok(())
}

async fn insert_contract_result(
    conn: &mut SqliteConnection,
    e: &ContractResult,
) -> Result<(), PersistenceError> {
    let created = serde_json::to_string(&e.created_contract_ids).map_err(other)?;
    sqlx::query(
        "INSERT INTO contract_result (
            consensus_timestamp, contract_id, payer_account_id, sender_id, amount, gas_limit,
            gas_used, function_parameters, call_result, error_message, bloom,
            created_contract_ids, transaction_result
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(e.consensus_timestamp)
    .bind(encode(e.contract_id))
    .bind(encode(e.payer))
    .bind(encode(e.sender))
    .bind(e.amount)
    .bind(e.gas_limit)
    .bind(e.gas_used)
    .bind(&e.function_parameters)
    .bind(&e.call_result)
    .bind(&e.error_message)
    .bind(&e.bloom)
    .bind(created)
    .bind(e.transaction_result)
    .execute(conn)
    .await
    .map_err(classify("contract_result"))?;
    Ok(())
}

async fn insert_contract_log(
    conn: &mut SqliteConnection,
    e: &ContractLog,
) -> Result<(), PersistenceError> {
    let topic = |i: usize| e.topics.get(i).cloned();
    sqlx::query(
        "INSERT INTO contract_log (
            consensus_timestamp, idx, contract_id, root_contract_id, payer_account_id, bloom,
            data, topic0, topic1, topic2, topic3
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(e.consensus_timestamp)
    .bind(e.index)
    .bind(encode(e.contract_id))
    .bind(encode(e.root_contract_id))
    .bind(encode(e.payer))
    .bind(&e.bloom)
    .bind(&e.data)
    .bind(topic(0))
    .bind(topic(1))
    .bind(topic(2))
    .bind(topic(3))
    .execute(conn)
    .await
    .map_err(classify("contract_log"))?;
    Ok(())
}

async fn insert_state_change(
    conn: &mut SqliteConnection,
    e: &ContractStateChange,
) -> Result<(), PersistenceError> {
    sqlx::query(
        "INSERT INTO contract_state_change (
            consensus_timestamp, contract_id, payer_account_id, slot, value_read, value_written
        ) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(e.consensus_timestamp)
    .bind(e.contract_id.encode())
    .bind(encode(e.payer))
    .bind(&e.slot)
    .bind(&e.value_read)
    .bind(&e.value_written)
    .execute(&mut *conn)
    .await
    .map_err(classify("contract_state_change"))?;

    if let Some(value) = e.value_written.as_ref().filter(|_| e.applied) {
        sqlx::query(
            "INSERT INTO contract_state (contract_id, slot, value, created_timestamp, modified_timestamp)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (contract_id, slot) DO UPDATE SET
                value              = excluded.value,
                modified_timestamp = excluded.modified_timestamp",
        )
        .bind(e.contract_id.encode())
        .bind(&e.slot)
        .bind(value)
        .bind(e.consensus_timestamp)
        .bind(e.consensus_timestamp)
        .execute(&mut *conn)
        .await
        .map_err(classify("contract_state"))?;
    }
    Ok(())
}

async fn insert_topic_message(
    conn: &mut SqliteConnection,
    e: &TopicMessage,
) -> Result<(), PersistenceError> {
    sqlx::query(
        "INSERT INTO topic_message (
            consensus_timestamp, topic_id, payer_account_id, message, sequence_number,
            running_hash, running_hash_version, chunk_num, chunk_total,
            initial_transaction_valid_start
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(e.consensus_timestamp)
    .bind(e.topic_id.encode())
    .bind(encode(e.payer))
    .bind(&e.message)
    .bind(e.sequence_number)
    .bind(&e.running_hash)
    .bind(e.running_hash_version)
    .bind(e.chunk_num)
    .bind(e.chunk_total)
    .bind(e.initial_valid_start_ns)
    .execute(conn)
    .await
    .map_err(classify("topic_message"))?;
    Ok(())
}

async fn insert_live_hash(
    conn: &mut SqliteConnection,
    e: &LiveHash,
) -> Result<(), PersistenceError> {
    sqlx::query("INSERT INTO live_hash (consensus_timestamp, account_id, hash) VALUES (?, ?, ?)")
        .bind(e.consensus_timestamp)
        .bind(e.account_id.encode())
        .bind(&e.hash)
        .execute(conn)
        .await
        .map_err(classify("live_hash"))?;
    Ok(())
}

async fn insert_file_data(
    conn: &mut SqliteConnection,
    e: &FileData,
) -> Result<(), PersistenceError> {
    sqlx::query(
        "INSERT INTO file_data (consensus_timestamp, entity_id, transaction_type, file_data)
         VALUES (?, ?, ?, ?)",
    )
    .bind(e.consensus_timestamp)
    .bind(e.file_id.encode())
    .bind(e.transaction_type.code())
    .bind(&e.data)
    .execute(conn)
    .await
    .map_err(classify("file_data"))?;
    Ok(())
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn id(num: i64) -> EntityId {
        EntityId::of_num(num).unwrap()
    }

    fn transfer(ts: i64, num: i64, amount: i64) -> DomainEvent {
        DomainEvent::Transfer(Transfer {
            consensus_timestamp: ts,
            entity_id: id(num),
            amount,
            payer: Some(id(2)),
        })
    }

    fn record(name: &str, index: i64) -> ProcessedFileRecord {
        ProcessedFileRecord {
            name: name.into(),
            version: 5,
            hapi_version: "0.11.0".into(),
            index,
            consensus_start: index * 10 + 1,
            consensus_end: index * 10 + 5,
            count: 1,
            previous_hash: "00".into(),
            hash: "aa".into(),
            file_hash: "bb".into(),
            metadata_hash: None,
            node: Some(id(3)),
            size: 128,
            load_start: 1,
            load_end: 2,
        }
    }

    #[tokio::test]
    async fn ledger_roundtrip() {
        let store = SqliteStorage::in_memory().await.unwrap();
        assert!(store.last_processed().await.unwrap().is_none());

        for (i, name) in ["a.rcd", "b.rcd"].into_iter().enumerate() {
            let mut tx = store.begin().await.unwrap();
            tx.write_file_record(&record(name, i as i64)).await.unwrap();
            tx.commit().await.unwrap();
        }

        let last = store.last_processed().await.unwrap().unwrap();
        assert_eq!(last, record("b.rcd", 1));
        assert_eq!(store.find_processed("a.rcd").await.unwrap(), Some(record("a.rcd", 0)));
        assert!(store.find_processed("c.rcd").await.unwrap().is_none());
        assert_eq!(store.processed_files().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn balance_overflow_is_an_error() {
        let store = SqliteStorage::in_memory().await.unwrap();
        let mut tx = store.begin().await.unwrap();
        let err = tx
            .write_batch(EventKind::Transfer, &[transfer(1, 98, i64::MAX), transfer(2, 98, 1)])
            .await
            .unwrap_err();
        assert!(matches!(err, PersistenceError::Other(_)));
        tx.rollback().await.unwrap();
        assert_eq!(store.balance(id(98)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn transfers_accumulate_balance() {
        let store = SqliteStorage::in_memory().await.unwrap();
        let mut tx = store.begin().await.unwrap();
        tx.write_batch(
            EventKind::Transfer,
            &[transfer(1, 98, 10), transfer(1, 2, -10), transfer(2, 98, 5)],
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.balance(id(98)).await.unwrap(), 15);
        assert_eq!(store.balance(id(2)).await.unwrap(), -10);
        assert_eq!(store.balance(id(7)).await.unwrap(), 0);
        assert_eq!(store.row_count("crypto_transfer").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn rollback_leaves_no_rows() {
        let store = SqliteStorage::in_memory().await.unwrap();
        let mut tx = store.begin().await.unwrap();
        tx.write_batch(EventKind::Transfer, &[transfer(1, 98, 10)])
            .await
            .unwrap();
        tx.write_file_record(&record("a.rcd", 0)).await.unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(store.row_count("crypto_transfer").await.unwrap(), 0);
        assert_eq!(store.row_count("entity").await.unwrap(), 0);
        assert!(store.last_processed().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_transaction_is_a_constraint_violation() {
        let store = SqliteStorage::in_memory().await.unwrap();
        let row = DomainEvent::LiveHash(LiveHash {
            consensus_timestamp: 9,
            account_id: id(1001),
            hash: vec![1; 48],
        });
        let mut tx = store.begin().await.unwrap();
        let err = tx
            .write_batch(EventKind::LiveHash, &[row.clone(), row])
            .await
            .unwrap_err();
        assert!(
            matches!(err, PersistenceError::Constraint { ref table, .. } if table == "live_hash"),
            "{err:?}"
        );
    }

    #[tokio::test]
    async fn upsert_coalesces_missing_fields() {
        let store = SqliteStorage::in_memory().await.unwrap();
        let account = id(1001);
        let mut created = EntityUpsert::created(account, EntityType::Account, 10);
        created.memo = Some("hello".into());
        let touched = EntityUpsert::touch(account, EntityType::Account, 20);

        let mut tx = store.begin().await.unwrap();
        tx.write_batch(
            EventKind::EntityUpsert,
            &[DomainEvent::EntityUpsert(created), DomainEvent::EntityUpsert(touched)],
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.entity_memo(account).await.unwrap().as_deref(), Some("hello"));
        assert_eq!(store.row_count("entity").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn state_change_updates_current_slot() {
        let store = SqliteStorage::in_memory().await.unwrap();
        let contract = id(1001);
        let change = |ts, written: Option<Vec<u8>>, applied| {
            DomainEvent::ContractStateChange(ContractStateChange {
                consensus_timestamp: ts,
                contract_id: contract,
                payer: None,
                slot: vec![1],
                value_read: vec![0],
                value_written: written,
                applied,
            })
        };
        let mut tx = store.begin().await.unwrap();
        tx.write_batch(
            EventKind::ContractStateChange,
            &[
                change(1, Some(vec![7]), true),
                change(2, Some(vec![8]), true),
                change(3, None, true),
                change(4, Some(vec![9]), false),
            ],
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.contract_state(contract, &[1]).await.unwrap(), Some(vec![8]));
        assert_eq!(store.row_count("contract_state_change").await.unwrap(), 4);
    }

    #[tokio::test]
    async fn unknown_table_is_rejected() {
        let store = SqliteStorage::in_memory().await.unwrap();
        assert!(store.row_count("sqlite_master; DROP TABLE entity").await.is_err());
    }
}
