//! Domain-event extraction.
//!
//! ```text
//!  RecordItem ──► transaction row
//!             ──► explicit transfers (record transfer list)
//!             ──► per-type mapping (entity upserts, topic messages, file data, ...)
//!             ──► contract result, logs, state changes, child contracts
//!             ──► non-fee transfers
//!             ──► persist toggles + IngestionFilter ──► Vec<DomainEvent>
//! ```
//!
//! Extraction is pure; the returned list is ordered by item and, within an
//! item, by the stages above.

mod non_fee;

use tracing::debug;

use crate::config::PersistConfig;
use crate::entity::{EntityId, EntityType};
use crate::event::{
    ContractLog, ContractResult, ContractStateChange, DomainEvent, EntityUpsert, FileData,
    LiveHash, TopicMessage, Transfer, TransactionEvent,
};
use crate::filter::IngestionFilter;
use crate::proto::{self, transaction_body::Data};
use crate::stream::{RecordItem, StreamFile};
use crate::types::TransactionType;

/// Turns verified files into filtered, ordered domain events.
#[derive(Debug, Clone, Default)]
pub struct EventExtractor {
    filter: IngestionFilter,
    persist: PersistConfig,
}

impl EventExtractor {
    pub fn new(filter: IngestionFilter, persist: PersistConfig) -> Self {
        Self { filter, persist }
    }

    /// Events for every item of `file`, in consensus order.
    pub fn extract_file(&self, file: &StreamFile) -> Vec<DomainEvent> {
        let events: Vec<DomainEvent> = file.items.iter().flat_map(|item| self.extract(item)).collect();
        debug!(file = %file.name, items = file.count(), events = events.len(), "Extracted events");
        events
    }

    /// Events for a single item after persist toggles and the filter.
    pub fn extract(&self, item: &RecordItem) -> Vec<DomainEvent> {
        let mut events = Vec::new();
        ItemMapper::new(item).map(&mut events);
        events.retain(|e| self.persist.allows(e.kind()) && self.filter.passes(e, item.transaction_type));
        events
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

/// Proto id to `EntityId`; unset and out-of-range ids are dropped.
pub(crate) fn to_id(id: Option<&proto::EntityNum>) -> Option<EntityId> {
    match EntityId::from_proto(id)? {
        Ok(id) => Some(id),
        Err(e) => {
            debug!(error = %e, "Ignoring invalid entity id");
            None
        }
    }
}

/// The receipt's identity wins; the body's is the fallback.
pub(crate) fn resolve(from_receipt: Option<EntityId>, from_body: Option<EntityId>) -> Option<EntityId> {
    from_receipt.or(from_body)
}

fn nanos(ts: Option<&proto::Timestamp>) -> Option<i64> {
    ts.and_then(proto::Timestamp::to_nanos)
}

fn seconds(d: Option<&proto::Duration>) -> Option<i64> {
    d.map(|d| d.seconds)
}

fn non_empty(bytes: &[u8]) -> Option<Vec<u8>> {
    (!bytes.is_empty()).then(|| bytes.to_vec())
}

fn non_empty_str(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

fn saturating_i64(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

// ─── ItemMapper ──────────────────────────────────────────────────────────────

struct ItemMapper<'a> {
    item: &'a RecordItem,
    ts: i64,
    payer: Option<EntityId>,
    success: bool,
    receipt: Option<&'a proto::TransactionReceipt>,
}

impl<'a> ItemMapper<'a> {
    fn new(item: &'a RecordItem) -> Self {
        Self {
            item,
            ts: item.consensus_timestamp,
            payer: item.payer(),
            success: item.is_successful(),
            receipt: item.receipt(),
        }
    }

    fn map(&self, out: &mut Vec<DomainEvent>) {
        out.push(DomainEvent::Transaction(self.transaction_row()));
        self.explicit_transfers(out);
        self.by_type(out);
        self.contract_result(out);
        out.extend(non_fee::non_fee_transfers(self.item).into_iter().map(DomainEvent::NonFeeTransfer));
    }

    fn receipt_id(&self, pick: fn(&proto::TransactionReceipt) -> Option<&proto::EntityNum>) -> Option<EntityId> {
        self.receipt.and_then(|r| to_id(pick(r)))
    }

    /// Entity the transaction targets, receipt first.
    fn target(&self) -> Option<EntityId> {
        let from_receipt = self
            .receipt_id(|r| r.account_id.as_ref())
            .or_else(|| self.receipt_id(|r| r.contract_id.as_ref()))
            .or_else(|| self.receipt_id(|r| r.file_id.as_ref()))
            .or_else(|| self.receipt_id(|r| r.topic_id.as_ref()));
        let from_body = match &self.item.body.data {
            Some(Data::CryptoUpdateAccount(b)) => to_id(b.account_id_to_update.as_ref()),
            Some(Data::CryptoDelete(b)) => to_id(b.delete_account_id.as_ref()),
            Some(Data::CryptoAddLiveHash(b)) => {
                b.live_hash.as_ref().and_then(|h| to_id(h.account_id.as_ref()))
            }
            Some(Data::CryptoDeleteLiveHash(b)) => to_id(b.account_of_live_hash.as_ref()),
            Some(Data::ContractCall(b)) => to_id(b.contract_id.as_ref()),
            Some(Data::ContractUpdateInstance(b)) => to_id(b.contract_id.as_ref()),
            Some(Data::ContractDeleteInstance(b)) => to_id(b.contract_id.as_ref()),
            Some(Data::FileAppend(b)) => to_id(b.file_id.as_ref()),
            Some(Data::FileUpdate(b)) => to_id(b.file_id.as_ref()),
            Some(Data::FileDelete(b)) => to_id(b.file_id.as_ref()),
            Some(Data::ConsensusUpdateTopic(b)) => to_id(b.topic_id.as_ref()),
            Some(Data::ConsensusDeleteTopic(b)) => to_id(b.topic_id.as_ref()),
            Some(Data::ConsensusSubmitMessage(b)) => to_id(b.topic_id.as_ref()),
            _ => None,
        };
        resolve(from_receipt, from_body)
    }

    fn transaction_row(&self) -> TransactionEvent {
        let body = &self.item.body;
        let id = body.transaction_id.as_ref();
        TransactionEvent {
            consensus_timestamp: self.ts,
            transaction_type: self.item.transaction_type,
            result: self.item.status(),
            payer: self.payer,
            node: to_id(body.node_account_id.as_ref()),
            entity: self.target(),
            charged_fee: saturating_i64(self.item.record.transaction_fee),
            max_fee: saturating_i64(body.transaction_fee),
            memo: body.memo.clone(),
            valid_start_ns: nanos(id.and_then(|i| i.transaction_valid_start.as_ref())),
            valid_duration_seconds: seconds(body.transaction_valid_duration.as_ref()),
            transaction_hash: self.item.record.transaction_hash.clone(),
            index: i32::try_from(self.item.index).unwrap_or(i32::MAX),
            scheduled: id.is_some_and(|i| i.scheduled),
            nonce: id.map(|i| i.nonce).unwrap_or_default(),
        }
    }

    fn explicit_transfers(&self, out: &mut Vec<DomainEvent>) {
        let Some(list) = &self.item.record.transfer_list else {
            return;
        };
        for aa in &list.account_amounts {
            let Some(entity_id) = to_id(aa.account_id.as_ref()) else {
                continue;
            };
            if aa.amount == 0 {
                continue;
            }
            out.push(DomainEvent::Transfer(Transfer {
                consensus_timestamp: self.ts,
                entity_id,
                amount: aa.amount,
                payer: self.payer,
            }));
        }
    }

    fn upsert(&self, out: &mut Vec<DomainEvent>, upsert: EntityUpsert) {
        out.push(DomainEvent::EntityUpsert(upsert));
    }

    fn by_type(&self, out: &mut Vec<DomainEvent>) {
        let Some(data) = &self.item.body.data else {
            self.unknown(out);
            return;
        };
        if !self.success {
            // failed transactions change no entity state
            return;
        }
        let ts = self.ts;
        match data {
            Data::CryptoCreateAccount(b) => {
                let Some(id) = self.receipt_id(|r| r.account_id.as_ref()) else {
                    return;
                };
                self.upsert(
                    out,
                    EntityUpsert {
                        key: non_empty(&b.key),
                        memo: Some(b.memo.clone()),
                        auto_renew_period: seconds(b.auto_renew_period.as_ref()),
                        receiver_sig_required: Some(b.receiver_sig_required),
                        max_automatic_token_associations: Some(b.max_automatic_token_associations),
                        alias: non_empty(&b.alias),
                        ..EntityUpsert::created(id, EntityType::Account, ts)
                    },
                );
            }
            Data::CryptoUpdateAccount(b) => {
                let Some(id) = self.target() else { return };
                self.upsert(
                    out,
                    EntityUpsert {
                        key: b.key.clone(),
                        expiration_timestamp: nanos(b.expiration_time.as_ref()),
                        auto_renew_period: seconds(b.auto_renew_period.as_ref()),
                        receiver_sig_required: b.receiver_sig_required,
                        memo: b.memo.clone(),
                        max_automatic_token_associations: b.max_automatic_token_associations,
                        ..EntityUpsert::touch(id, EntityType::Account, ts)
                    },
                );
            }
            Data::CryptoDelete(b) => {
                let Some(id) = self.target() else { return };
                self.upsert(
                    out,
                    EntityUpsert {
                        deleted: Some(true),
                        obtainer: to_id(b.transfer_account_id.as_ref()),
                        ..EntityUpsert::touch(id, EntityType::Account, ts)
                    },
                );
            }
            Data::CryptoAddLiveHash(b) => {
                let Some(live_hash) = &b.live_hash else { return };
                let Some(account_id) = self.target() else { return };
                out.push(DomainEvent::LiveHash(LiveHash {
                    consensus_timestamp: ts,
                    account_id,
                    hash: live_hash.hash.clone(),
                }));
            }
            Data::CryptoDeleteLiveHash(_) | Data::CryptoTransfer(_) | Data::ContractCall(_) => {}
            Data::ContractCreateInstance(b) => {
                let created = resolve(
                    self.receipt_id(|r| r.contract_id.as_ref()),
                    self.item.record.contract_result().and_then(|r| to_id(r.contract_id.as_ref())),
                );
                let Some(id) = created else { return };
                self.upsert(
                    out,
                    EntityUpsert {
                        key: non_empty(&b.admin_key),
                        memo: Some(b.memo.clone()),
                        auto_renew_period: seconds(b.auto_renew_period.as_ref()),
                        file_id: to_id(b.file_id.as_ref()),
                        initcode: non_empty(&b.initcode),
                        ..EntityUpsert::created(id, EntityType::Contract, ts)
                    },
                );
            }
            Data::ContractUpdateInstance(b) => {
                let Some(id) = self.target() else { return };
                self.upsert(
                    out,
                    EntityUpsert {
                        key: b.admin_key.clone(),
                        expiration_timestamp: nanos(b.expiration_time.as_ref()),
                        auto_renew_period: seconds(b.auto_renew_period.as_ref()),
                        memo: b.memo.clone(),
                        ..EntityUpsert::touch(id, EntityType::Contract, ts)
                    },
                );
            }
            Data::ContractDeleteInstance(b) => {
                let Some(id) = self.target() else { return };
                self.upsert(
                    out,
                    EntityUpsert {
                        deleted: Some(true),
                        obtainer: to_id(b.transfer_account_id.as_ref())
                            .or_else(|| to_id(b.transfer_contract_id.as_ref())),
                        ..EntityUpsert::touch(id, EntityType::Contract, ts)
                    },
                );
            }
            Data::FileCreate(b) => {
                let Some(id) = self.receipt_id(|r| r.file_id.as_ref()) else {
                    return;
                };
                self.upsert(
                    out,
                    EntityUpsert {
                        key: non_empty(&b.keys),
                        memo: Some(b.memo.clone()),
                        expiration_timestamp: nanos(b.expiration_time.as_ref()),
                        ..EntityUpsert::created(id, EntityType::File, ts)
                    },
                );
                self.file_data(out, id, &b.contents, true);
            }
            Data::FileUpdate(b) => {
                let Some(id) = self.target() else { return };
                self.upsert(
                    out,
                    EntityUpsert {
                        key: b.keys.clone(),
                        memo: b.memo.clone(),
                        expiration_timestamp: nanos(b.expiration_time.as_ref()),
                        ..EntityUpsert::touch(id, EntityType::File, ts)
                    },
                );
                self.file_data(out, id, &b.contents, false);
            }
            Data::FileAppend(b) => {
                let Some(id) = self.target() else { return };
                self.file_data(out, id, &b.contents, false);
            }
            Data::FileDelete(_) => {
                let Some(id) = self.target() else { return };
                self.upsert(
                    out,
                    EntityUpsert {
                        deleted: Some(true),
                        ..EntityUpsert::touch(id, EntityType::File, ts)
                    },
                );
            }
            Data::ConsensusCreateTopic(b) => {
                let Some(id) = self.receipt_id(|r| r.topic_id.as_ref()) else {
                    return;
                };
                self.upsert(
                    out,
                    EntityUpsert {
                        key: non_empty(&b.admin_key),
                        submit_key: non_empty(&b.submit_key),
                        memo: Some(b.memo.clone()),
                        auto_renew_period: seconds(b.auto_renew_period.as_ref()),
                        auto_renew_account: to_id(b.auto_renew_account.as_ref()),
                        ..EntityUpsert::created(id, EntityType::Topic, ts)
                    },
                );
            }
            Data::ConsensusUpdateTopic(b) => {
                let Some(id) = self.target() else { return };
                self.upsert(
                    out,
                    EntityUpsert {
                        key: b.admin_key.clone(),
                        submit_key: b.submit_key.clone(),
                        memo: b.memo.clone(),
                        expiration_timestamp: nanos(b.expiration_time.as_ref()),
                        auto_renew_period: seconds(b.auto_renew_period.as_ref()),
                        auto_renew_account: to_id(b.auto_renew_account.as_ref()),
                        ..EntityUpsert::touch(id, EntityType::Topic, ts)
                    },
                );
            }
            Data::ConsensusDeleteTopic(_) => {
                let Some(id) = self.target() else { return };
                self.upsert(
                    out,
                    EntityUpsert {
                        deleted: Some(true),
                        ..EntityUpsert::touch(id, EntityType::Topic, ts)
                    },
                );
            }
            Data::ConsensusSubmitMessage(b) => {
                let Some(topic_id) = self.target() else { return };
                let receipt = self.receipt.cloned().unwrap_or_default();
                let chunk = b.chunk_info.as_ref();
                out.push(DomainEvent::TopicMessage(TopicMessage {
                    consensus_timestamp: ts,
                    topic_id,
                    payer: self.payer,
                    message: b.message.clone(),
                    sequence_number: saturating_i64(receipt.topic_sequence_number),
                    running_hash: receipt.topic_running_hash,
                    running_hash_version: i32::try_from(receipt.topic_running_hash_version)
                        .unwrap_or(i32::MAX),
                    chunk_num: chunk.map(|c| c.number),
                    chunk_total: chunk.map(|c| c.total),
                    initial_valid_start_ns: nanos(
                        chunk
                            .and_then(|c| c.initial_transaction_id.as_ref())
                            .and_then(|id| id.transaction_valid_start.as_ref()),
                    ),
                }));
            }
        }
    }

    fn file_data(&self, out: &mut Vec<DomainEvent>, file_id: EntityId, contents: &[u8], keep_empty: bool) {
        if contents.is_empty() && !keep_empty {
            return;
        }
        out.push(DomainEvent::FileData(FileData {
            consensus_timestamp: self.ts,
            file_id,
            transaction_type: self.item.transaction_type,
            data: contents.to_vec(),
        }));
    }

    /// Types without a mapping: record whatever entities the receipt names.
    fn unknown(&self, out: &mut Vec<DomainEvent>) {
        if let TransactionType::Unknown(code) = self.item.transaction_type {
            debug!(code, consensus_timestamp = self.ts, "Unmapped transaction type");
        }
        if !self.success {
            return;
        }
        let named = [
            (self.receipt_id(|r| r.account_id.as_ref()), EntityType::Account),
            (self.receipt_id(|r| r.contract_id.as_ref()), EntityType::Contract),
            (self.receipt_id(|r| r.file_id.as_ref()), EntityType::File),
            (self.receipt_id(|r| r.topic_id.as_ref()), EntityType::Topic),
        ];
        for (id, entity_type) in named {
            if let Some(id) = id {
                self.upsert(out, EntityUpsert::touch(id, entity_type, self.ts));
            }
        }
    }

    fn contract_result(&self, out: &mut Vec<DomainEvent>) {
        let Some(result) = self.item.record.contract_result() else {
            return;
        };
        let ts = self.ts;
        let contract_id = resolve(
            self.receipt_id(|r| r.contract_id.as_ref()),
            to_id(result.contract_id.as_ref()),
        );
        let created: Vec<EntityId> = result
            .created_contract_ids
            .iter()
            .filter_map(|id| to_id(Some(id)))
            .collect();

        out.push(DomainEvent::ContractResult(ContractResult {
            consensus_timestamp: ts,
            contract_id,
            payer: self.payer,
            sender: to_id(result.sender_id.as_ref()),
            amount: result.amount,
            gas_limit: result.gas,
            gas_used: saturating_i64(result.gas_used),
            function_parameters: result.function_parameters.clone(),
            call_result: result.contract_call_result.clone(),
            error_message: non_empty_str(&result.error_message),
            bloom: result.bloom.clone(),
            created_contract_ids: created.clone(),
            transaction_result: self.item.status(),
        }));

        for (index, log) in result.log_info.iter().enumerate() {
            out.push(DomainEvent::ContractLog(ContractLog {
                consensus_timestamp: ts,
                index: i32::try_from(index).unwrap_or(i32::MAX),
                contract_id: to_id(log.contract_id.as_ref()),
                root_contract_id: contract_id,
                payer: self.payer,
                bloom: log.bloom.clone(),
                data: log.data.clone(),
                topics: log.topic.clone(),
            }));
        }

        for change in &result.state_changes {
            let Some(changed) = to_id(change.contract_id.as_ref()) else {
                continue;
            };
            for storage in &change.storage_changes {
                out.push(DomainEvent::ContractStateChange(ContractStateChange {
                    consensus_timestamp: ts,
                    contract_id: changed,
                    payer: self.payer,
                    slot: storage.slot.clone(),
                    value_read: storage.value_read.clone(),
                    value_written: storage.value_written.clone(),
                    applied: self.success,
                }));
            }
        }

        if self.success {
            for child in created.into_iter().filter(|id| Some(*id) != contract_id) {
                self.upsert(out, EntityUpsert::created(child, EntityType::Contract, ts));
            }
        }
    }
}
