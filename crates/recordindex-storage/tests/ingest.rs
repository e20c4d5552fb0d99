//! End-to-end ingestion against the in-memory backend.

mod common;

use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use common::*;
use recordindex_core::event::{DomainEvent, EventKind, Transfer};
use recordindex_core::filter::{FilterConfig, FilterRuleConfig};
use recordindex_core::{
    FileState, IngestConfig, IngestError, IngestOutcome, IngestionController, PersistenceError,
    StorageBackend,
};
use recordindex_storage::{InMemoryStorage, Tables};

async fn controller(store: &InMemoryStorage, config: IngestConfig) -> IngestionController {
    IngestionController::new(&config, Arc::new(store.clone()))
        .await
        .unwrap()
}

#[tokio::test]
async fn ingests_a_chain_and_tracks_balances() {
    let store = InMemoryStorage::new();
    let mut c = controller(&store, IngestConfig::default()).await;
    let mut source: VecDeque<_> = chain(3).into();

    let summary = c.run(&mut source, &AtomicBool::new(false)).await.unwrap();
    assert_eq!(summary.committed, 3);
    assert!(!summary.interrupted);

    let files = store.processed_files();
    assert_eq!(files.len(), 3);
    assert_eq!(files.iter().map(|f| f.index).collect::<Vec<_>>(), vec![0, 1, 2]);
    assert_eq!(files[1].previous_hash, files[0].hash);
    assert_eq!(files[0].node, Some(id(NODE)));

    assert_eq!(store.transaction_count(), 6);
    assert_eq!(store.balance(created_account(1)), 600);
    assert_eq!(store.balance(id(PAYER)), -620 * 3);
    assert_eq!(store.balance(id(FEE_COLLECTOR)), 16 * 3);

    let account = store.entity(created_account(2)).unwrap();
    assert_eq!(account.memo.as_deref(), Some("account 2"));
    assert_eq!(account.created_timestamp, Some(3 * FILE_SPAN));
    assert_eq!(account.deleted, Some(false));

    // Only the payer's initial-balance leg is missing from the explicit list.
    let tables = store.snapshot();
    assert_eq!(tables.non_fee_transfers.len(), 3);
    assert!(tables
        .non_fee_transfers
        .iter()
        .all(|t| t.entity_id == id(PAYER) && t.amount == -500));
}

#[tokio::test]
async fn replaying_files_changes_nothing() {
    let store = InMemoryStorage::new();
    let files = chain(3);
    let mut c = controller(&store, IngestConfig::default()).await;
    let mut source: VecDeque<_> = files.clone().into();
    c.run(&mut source, &AtomicBool::new(false)).await.unwrap();
    let once = store.snapshot();

    for _ in 0..2 {
        let mut source: VecDeque<_> = files.clone().into();
        let summary = c.run(&mut source, &AtomicBool::new(false)).await.unwrap();
        assert_eq!(summary.committed, 0);
        assert_eq!(summary.skipped, 3);
    }

    // A restarted controller resumes from the ledger.
    let mut restarted = controller(&store, IngestConfig::default()).await;
    assert_eq!(restarted.last_accepted().unwrap().name, name(2));
    let mut source: VecDeque<_> = files.into();
    restarted.run(&mut source, &AtomicBool::new(false)).await.unwrap();

    assert_eq!(store.snapshot(), once);
}

#[tokio::test]
async fn mid_file_failure_leaves_no_trace() {
    let store = InMemoryStorage::new();
    store.fail_after_writes(2);
    store.fail_next_writes_with(PersistenceError::Other("disk full".into()));
    let config = IngestConfig {
        batch_size: 1,
        ..IngestConfig::default()
    };
    let mut c = controller(&store, config).await;
    let (data, _) = file(0, None);

    let err = c.ingest(data).await.unwrap_err();
    match err {
        IngestError::Persistence { attempts, source, .. } => {
            assert_eq!(attempts, 1);
            assert!(matches!(source, PersistenceError::Other(_)));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(c.state(), FileState::Aborted);
    assert_eq!(store.snapshot(), Tables::default());
    assert!(store.last_processed().await.unwrap().is_none());
}

#[tokio::test]
async fn key_collision_rolls_back_and_is_not_retried() {
    let store = InMemoryStorage::new();
    let mut c = controller(&store, fast_retry(3)).await;
    let mut files = chain(2).into_iter();
    c.ingest(files.next().unwrap()).await.unwrap();

    // A row the second file will also try to insert.
    let mut tx = store.begin().await.unwrap();
    tx.write_batch(
        EventKind::Transfer,
        &[DomainEvent::Transfer(Transfer {
            consensus_timestamp: transfer_ts(1),
            entity_id: id(NODE),
            amount: 2,
            payer: None,
        })],
    )
    .await
    .unwrap();
    tx.commit().await.unwrap();
    let before = store.snapshot();

    let err = c.ingest(files.next().unwrap()).await.unwrap_err();
    match err {
        IngestError::Persistence { attempts, source, .. } => {
            assert_eq!(attempts, 1);
            assert!(matches!(source, PersistenceError::Constraint { .. }));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(store.snapshot(), before);
    assert_eq!(c.last_accepted().unwrap().name, name(0));
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let store = InMemoryStorage::new();
    store.fail_next_writes(2);
    let mut c = controller(&store, fast_retry(3)).await;
    let (data, _) = file(0, None);

    match c.ingest(data).await.unwrap() {
        IngestOutcome::Committed { attempts, stats, .. } => {
            assert_eq!(attempts, 3);
            assert_eq!(stats.by_kind.get(&EventKind::Transaction), Some(&2));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(store.transaction_count(), 2);
    assert_eq!(store.processed_files().len(), 1);
}

#[tokio::test]
async fn exhausted_retries_abort_the_file() {
    let store = InMemoryStorage::new();
    store.fail_next_writes(5);
    let mut c = controller(&store, fast_retry(2)).await;
    let (data, _) = file(0, None);

    match c.ingest(data).await.unwrap_err() {
        IngestError::Persistence { attempts, source, .. } => {
            assert_eq!(attempts, 3);
            assert!(source.is_transient());
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(store.snapshot(), Tables::default());
}

#[tokio::test]
async fn broken_chain_is_rejected_before_any_write() {
    let store = InMemoryStorage::new();
    let mut c = controller(&store, IngestConfig::default()).await;
    let (first, _) = file(0, None);
    c.ingest(first).await.unwrap();
    let before = store.snapshot();

    let wrong = "ab".repeat(48);
    let (second, _) = file(1, Some(&wrong));
    let err = c.ingest(second).await.unwrap_err();

    assert!(err.is_hash_mismatch());
    assert_eq!(c.state(), FileState::Aborted);
    assert_eq!(store.snapshot(), before);
    assert_eq!(c.last_accepted().unwrap().name, name(0));
}

#[tokio::test]
async fn bypass_tolerates_breaks_up_to_the_named_file() {
    let store = InMemoryStorage::new();
    let config = IngestConfig {
        bypass_hash_mismatch_until: Some(name(1)),
        ..IngestConfig::default()
    };
    let mut c = controller(&store, config).await;
    let wrong = "cd".repeat(48);

    let (first, _) = file(0, None);
    c.ingest(first).await.unwrap();
    let (second, second_hash) = file(1, Some(&wrong));
    c.ingest(second).await.unwrap();
    assert_eq!(c.last_accepted().unwrap().hash, second_hash);

    let (third, _) = file(2, Some(&wrong));
    assert!(c.ingest(third).await.unwrap_err().is_hash_mismatch());
}

#[tokio::test]
async fn genesis_accepts_any_previous_hash() {
    let store = InMemoryStorage::new();
    let mut c = controller(&store, IngestConfig::default()).await;
    let (data, _) = file(0, Some(&"ef".repeat(48)));
    assert!(matches!(c.ingest(data).await.unwrap(), IngestOutcome::Committed { .. }));
}

#[tokio::test]
async fn earlier_file_name_is_out_of_order() {
    let store = InMemoryStorage::new();
    let mut c = controller(&store, IngestConfig::default()).await;
    let files = chain(3);
    c.ingest(files[2].clone()).await.unwrap();

    let err = c.ingest(files[1].clone()).await.unwrap_err();
    assert!(matches!(err, IngestError::OutOfOrder { .. }));
    assert_eq!(store.processed_files().len(), 1);
}

#[tokio::test]
async fn excluded_entities_are_not_persisted() {
    let store = InMemoryStorage::new();
    let config = IngestConfig {
        filter: FilterConfig {
            include: Vec::new(),
            exclude: vec![FilterRuleConfig {
                entities: vec![format!("0.0.{FEE_COLLECTOR}")],
                ..Default::default()
            }],
        },
        ..IngestConfig::default()
    };
    let mut c = controller(&store, config).await;
    let mut source: VecDeque<_> = chain(2).into();
    c.run(&mut source, &AtomicBool::new(false)).await.unwrap();

    assert!(store.entity(id(FEE_COLLECTOR)).is_none());
    assert_eq!(store.balance(id(NODE)), 8);
    assert_eq!(store.transaction_count(), 4);
}

#[tokio::test]
async fn shutdown_stops_between_files() {
    let store = InMemoryStorage::new();
    let mut c = controller(&store, IngestConfig::default()).await;
    let mut source: VecDeque<_> = chain(2).into();

    let summary = c.run(&mut source, &AtomicBool::new(true)).await.unwrap();
    assert!(summary.interrupted);
    assert_eq!(summary.committed, 0);
    assert_eq!(source.len(), 2);
}
