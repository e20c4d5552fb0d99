//! In-memory storage backend.
//!
//! Committed tables live behind a `Mutex`. `begin` copies them into a staged
//! set that the transaction mutates; `commit` swaps the staged set in, while
//! `rollback` or a drop discards it. Faults queued with
//! [`InMemoryStorage::fail_next_writes`] make upcoming `write_batch` calls fail.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use recordindex_core::checkpoint::ProcessedFileRecord;
use recordindex_core::entity::{EntityId, EntityType};
use recordindex_core::error::PersistenceError;
use recordindex_core::event::{
    ContractLog, ContractResult, ContractStateChange, DomainEvent, EntityUpsert, EventKind,
    FileData, LiveHash, TopicMessage, TransactionEvent, Transfer,
};
use recordindex_core::writer::{StorageBackend, StorageTransaction};

// ─── Rows ────────────────────────────────────────────────────────────────────

/// Current state of one entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityRow {
    pub id: EntityId,
    pub entity_type: EntityType,
    /// Running sum of committed transfers.
    pub balance: i64,
    pub balance_timestamp: Option<i64>,
    pub created_timestamp: Option<i64>,
    pub modified_timestamp: Option<i64>,
    pub deleted: Option<bool>,
    pub key: Option<Vec<u8>>,
    pub memo: Option<String>,
    pub expiration_timestamp: Option<i64>,
    pub auto_renew_period: Option<i64>,
    pub auto_renew_account: Option<EntityId>,
    pub receiver_sig_required: Option<bool>,
    pub max_automatic_token_associations: Option<i32>,
    pub alias: Option<Vec<u8>>,
    pub submit_key: Option<Vec<u8>>,
    pub file_id: Option<EntityId>,
    pub initcode: Option<Vec<u8>>,
    pub obtainer: Option<EntityId>,
}

impl EntityRow {
    fn new(id: EntityId, entity_type: EntityType) -> Self {
        Self {
            id,
            entity_type,
            balance: 0,
            balance_timestamp: None,
            created_timestamp: None,
            modified_timestamp: None,
            deleted: None,
            key: None,
            memo: None,
            expiration_timestamp: None,
            auto_renew_period: None,
            auto_renew_account: None,
            receiver_sig_required: None,
            max_automatic_token_associations: None,
            alias: None,
            submit_key: None,
            file_id: None,
            initcode: None,
            obtainer: None,
        }
    }

    /// Overwrite the attributes `upsert` carries; keep the rest.
    fn merge(&mut self, upsert: &EntityUpsert) {
        self.entity_type = upsert.entity_type;
        self.modified_timestamp = Some(upsert.consensus_timestamp);
        set(&mut self.created_timestamp, &upsert.created_timestamp);
        set(&mut self.deleted, &upsert.deleted);
        set(&mut self.key, &upsert.key);
        set(&mut self.memo, &upsert.memo);
        set(&mut self.expiration_timestamp, &upsert.expiration_timestamp);
        set(&mut self.auto_renew_period, &upsert.auto_renew_period);
        set(&mut self.auto_renew_account, &upsert.auto_renew_account);
        set(&mut self.receiver_sig_required, &upsert.receiver_sig_required);
        set(
            &mut self.max_automatic_token_associations,
            &upsert.max_automatic_token_associations,
        );
        set(&mut self.alias, &upsert.alias);
        set(&mut self.submit_key, &upsert.submit_key);
        set(&mut self.file_id, &upsert.file_id);
        set(&mut self.initcode, &upsert.initcode);
        set(&mut self.obtainer, &upsert.obtainer);
    }
}

fn set<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
    if let Some(v) = value {
        *slot = Some(v.clone());
    }
}

/// Every table of the store. Keys mirror the SQLite primary keys.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tables {
    pub entities: BTreeMap<EntityId, EntityRow>,
    pub transactions: BTreeMap<i64, TransactionEvent>,
    pub transfers: BTreeMap<(i64, EntityId), Transfer>,
    pub non_fee_transfers: Vec<Transfer>,
    pub contract_results: BTreeMap<i64, ContractResult>,
    pub contract_logs: BTreeMap<(i64, i32), ContractLog>,
    pub contract_state_changes: BTreeMap<(i64, EntityId, Vec<u8>), ContractStateChange>,
    /// Latest written value per `(contract, slot)`.
    pub contract_state: BTreeMap<(EntityId, Vec<u8>), Vec<u8>>,
    pub topic_messages: BTreeMap<i64, TopicMessage>,
    pub live_hashes: BTreeMap<i64, LiveHash>,
    pub file_data: BTreeMap<i64, FileData>,
    pub record_files: BTreeMap<String, ProcessedFileRecord>,
}

impl Tables {
    fn apply(&mut self, event: &DomainEvent) -> Result<(), PersistenceError> {
        let ts = event.consensus_timestamp();
        match event {
            DomainEvent::Transaction(e) => insert_unique("transaction", &mut self.transactions, ts, e),
            DomainEvent::EntityUpsert(e) => {
                self.entities
                    .entry(e.id)
                    .or_insert_with(|| EntityRow::new(e.id, e.entity_type))
                    .merge(e);
                Ok(())
            }
            DomainEvent::Transfer(e) => {
                insert_unique("crypto_transfer", &mut self.transfers, (ts, e.entity_id), e)?;
                let row = self
                    .entities
                    .entry(e.entity_id)
                    .or_insert_with(|| EntityRow::new(e.entity_id, EntityType::Account));
                row.balance = row.balance.checked_add(e.amount).ok_or_else(|| {
                    PersistenceError::Other(format!("balance overflow for entity {}", e.entity_id))
                })?;
                row.balance_timestamp = Some(ts);
                Ok(())
            }
            DomainEvent::NonFeeTransfer(e) => {
                self.non_fee_transfers.push(e.clone());
                Ok(())
            }
            DomainEvent::ContractResult(e) => {
                insert_unique("contract_result", &mut self.contract_results, ts, e)
            }
            DomainEvent::ContractLog(e) => {
                insert_unique("contract_log", &mut self.contract_logs, (ts, e.index), e)
            }
            DomainEvent::ContractStateChange(e) => {
                let key = (ts, e.contract_id, e.slot.clone());
                insert_unique("contract_state_change", &mut self.contract_state_changes, key, e)?;
                if let Some(value) = e.value_written.as_ref().filter(|_| e.applied) {
                    self.contract_state
                        .insert((e.contract_id, e.slot.clone()), value.clone());
                }
                Ok(())
            }
            DomainEvent::TopicMessage(e) => {
                insert_unique("topic_message", &mut self.topic_messages, ts, e)
            }
            DomainEvent::LiveHash(e) => insert_unique("live_hash", &mut self.live_hashes, ts, e),
            DomainEvent::FileData(e) => insert_unique("file_data", &mut self.file_data, ts, e),
        }
    }
}

fn insert_unique<K, V>(
    table: &str,
    map: &mut BTreeMap<K, V>,
    key: K,
    value: &V,
) -> Result<(), PersistenceError>
where
    K: Ord + fmt::Debug,
    V: Clone,
{
    match map.entry(key) {
        Entry::Occupied(slot) => Err(PersistenceError::Constraint {
            table: table.to_string(),
            detail: format!("duplicate key {:?}", slot.key()),
        }),
        Entry::Vacant(slot) => {
            slot.insert(value.clone());
            Ok(())
        }
    }
}

// ─── InMemoryStorage ─────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Faults {
    /// Successful `write_batch` calls to allow before `pending` starts firing.
    grace: usize,
    pending: VecDeque<PersistenceError>,
}

#[derive(Debug, Default)]
struct Inner {
    tables: Mutex<Tables>,
    faults: Mutex<Faults>,
}

/// In-memory store. Cloning shares the underlying tables.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStorage {
    inner: Arc<Inner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` batch writes fail with a transient error.
    pub fn fail_next_writes(&self, n: usize) {
        let mut faults = lock(&self.inner.faults);
        for _ in 0..n {
            faults
                .pending
                .push_back(PersistenceError::Transient("injected connection reset".into()));
        }
    }

    /// Make the next batch write fail with `error`.
    pub fn fail_next_writes_with(&self, error: PersistenceError) {
        lock(&self.inner.faults).pending.push_back(error);
    }

    /// Let `n` batch writes succeed before queued faults fire.
    pub fn fail_after_writes(&self, n: usize) {
        lock(&self.inner.faults).grace = n;
    }

    fn take_fault(&self) -> Option<PersistenceError> {
        let mut faults = lock(&self.inner.faults);
        if faults.pending.is_empty() {
            return None;
        }
        if faults.grace > 0 {
            faults.grace -= 1;
            return None;
        }
        faults.pending.pop_front()
    }

    /// Copy of the committed tables.
    pub fn snapshot(&self) -> Tables {
        lock(&self.inner.tables).clone()
    }

    pub fn entity(&self, id: EntityId) -> Option<EntityRow> {
        lock(&self.inner.tables).entities.get(&id).cloned()
    }

    /// Committed balance of `id`; zero for unknown entities.
    pub fn balance(&self, id: EntityId) -> i64 {
        self.entity(id).map_or(0, |row| row.balance)
    }

    /// Ledger rows in index order.
    pub fn processed_files(&self) -> Vec<ProcessedFileRecord> {
        let mut files: Vec<_> = lock(&self.inner.tables)
            .record_files
            .values()
            .cloned()
            .collect();
        files.sort_by_key(|f| f.index);
        files
    }

    pub fn transaction_count(&self) -> usize {
        lock(&self.inner.tables).transactions.len()
    }
}

#[async_trait]
impl StorageBackend for InMemoryStorage {
    async fn last_processed(&self) -> Result<Option<ProcessedFileRecord>, PersistenceError> {
        Ok(lock(&self.inner.tables)
            .record_files
            .values()
            .max_by_key(|f| f.index)
            .cloned())
    }

    async fn find_processed(
        &self,
        name: &str,
    ) -> Result<Option<ProcessedFileRecord>, PersistenceError> {
        Ok(lock(&self.inner.tables).record_files.get(name).cloned())
    }

    async fn begin(&self) -> Result<Box<dyn StorageTransaction>, PersistenceError> {
        Ok(Box::new(MemoryTransaction {
            store: self.clone(),
            staged: self.snapshot(),
        }))
    }
}

/// Staged copy of the tables; becomes visible on commit.
struct MemoryTransaction {
    store: InMemoryStorage,
    staged: Tables,
}

#[async_trait]
impl StorageTransaction for MemoryTransaction {
    async fn write_batch(
        &mut self,
        kind: EventKind,
        events: &[DomainEvent],
    ) -> Result<(), PersistenceError> {
        if let Some(fault) = self.store.take_fault() {
            return Err(fault);
        }
        for event in events {
            if event.kind() != kind {
                return Err(PersistenceError::Other(format!(
                    "{} event in a {kind} batch",
                    event.kind()
                )));
            }
            self.staged.apply(event)?;
        }
        Ok(())
    }

    async fn write_file_record(
        &mut self,
        record: &ProcessedFileRecord,
    ) -> Result<(), PersistenceError> {
        insert_unique(
            "record_file",
            &mut self.staged.record_files,
            record.name.clone(),
            record,
        )
    }

    async fn commit(self: Box<Self>) -> Result<(), PersistenceError> {
        let MemoryTransaction { store, staged } = *self;
        debug!(files = staged.record_files.len(), "Committing in-memory transaction");
        *lock(&store.inner.tables) = staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), PersistenceError> {
        Ok(())
    }
}

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
            payer: None,
        })
    }

    #[tokio::test]
    async fn commit_publishes_staged_writes() {
        let store = InMemoryStorage::new();
        let mut tx = store.begin().await.unwrap();
        tx.write_batch(EventKind::Transfer, &[transfer(1, 98, 10), transfer(1, 2, -10)])
            .await
            .unwrap();
        assert_eq!(store.balance(id(98)), 0);

        tx.commit().await.unwrap();
        assert_eq!(store.balance(id(98)), 10);
        assert_eq!(store.balance(id(2)), -10);
        assert_eq!(store.entity(id(98)).unwrap().entity_type, EntityType::Account);
    }

    #[tokio::test]
    async fn rollback_discards_staged_writes() {
        let store = InMemoryStorage::new();
        let mut tx = store.begin().await.unwrap();
        tx.write_batch(EventKind::Transfer, &[transfer(1, 98, 10)])
            .await
            .unwrap();
        tx.rollback().await.unwrap();
        assert_eq!(store.snapshot(), Tables::default());
    }

    #[tokio::test]
    async fn balance_overflow_is_an_error() {
        let store = InMemoryStorage::new();
        let mut tx = store.begin().await.unwrap();
        let err = tx
            .write_batch(EventKind::Transfer, &[transfer(1, 98, i64::MAX), transfer(2, 98, 1)])
            .await
            .unwrap_err();
        assert!(matches!(err, PersistenceError::Other(_)));
        tx.rollback().await.unwrap();
        assert_eq!(store.balance(id(98)), 0);
    }

    #[tokio::test]
    async fn duplicate_transfer_is_a_constraint_violation() {
        let store = InMemoryStorage::new();
        let mut tx = store.begin().await.unwrap();
        let err = tx
            .write_batch(EventKind::Transfer, &[transfer(1, 98, 10), transfer(1, 98, 10)])
            .await
            .unwrap_err();
        assert!(matches!(err, PersistenceError::Constraint { ref table, .. } if table == "crypto_transfer"));
    }

    #[tokio::test]
    async fn upsert_only_overwrites_present_fields() {
        let store = InMemoryStorage::new();
        let account = id(1001);
        let mut created = EntityUpsert::created(account, EntityType::Account, 10);
        created.memo = Some("first".into());
        created.key = Some(vec![1, 2, 3]);
        let mut updated = EntityUpsert::touch(account, EntityType::Account, 20);
        updated.memo = Some("second".into());

        let mut tx = store.begin().await.unwrap();
        tx.write_batch(
            EventKind::EntityUpsert,
            &[DomainEvent::EntityUpsert(created), DomainEvent::EntityUpsert(updated)],
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let row = store.entity(account).unwrap();
        assert_eq!(row.memo.as_deref(), Some("second"));
        assert_eq!(row.key, Some(vec![1, 2, 3]));
        assert_eq!(row.created_timestamp, Some(10));
        assert_eq!(row.modified_timestamp, Some(20));
        assert_eq!(row.deleted, Some(false));
    }

    #[tokio::test]
    async fn state_change_tracks_current_value() {
        let store = InMemoryStorage::new();
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
                change(2, None, true),
                change(3, Some(vec![9]), false),
            ],
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let tables = store.snapshot();
        assert_eq!(tables.contract_state_changes.len(), 3);
        assert_eq!(tables.contract_state.get(&(contract, vec![1])), Some(&vec![7]));
    }

    #[tokio::test]
    async fn injected_faults_fire_after_grace() {
        let store = InMemoryStorage::new();
        store.fail_after_writes(1);
        store.fail_next_writes_with(PersistenceError::Other("disk full".into()));

        let mut tx = store.begin().await.unwrap();
        tx.write_batch(EventKind::Transfer, &[transfer(1, 98, 1)])
            .await
            .unwrap();
        let err = tx
            .write_batch(EventKind::Transfer, &[transfer(2, 98, 1)])
            .await
            .unwrap_err();
        assert!(matches!(err, PersistenceError::Other(_)));
        tx.write_batch(EventKind::Transfer, &[transfer(3, 98, 1)])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn mismatched_kind_is_rejected() {
        let store = InMemoryStorage::new();
        let mut tx = store.begin().await.unwrap();
        let err = tx
            .write_batch(EventKind::LiveHash, &[transfer(1, 98, 1)])
            .await
            .unwrap_err();
        assert!(!err.is_transient());
    }
}
