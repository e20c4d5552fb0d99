//! Balance movements implied by a transaction but absent from its record's
//! transfer list.
//!
//! ```text
//! crypto create     payer -initial_balance   new account +initial_balance
//! contract create   payer -initial_balance   new contract +initial_balance
//! contract call     payer -amount            contract +amount
//! crypto transfer   the body's transfer list
//! ```
//!
//! Credit legs need a successful outcome; a failed transaction keeps only
//! the payer's debits. An implied leg equal to an entry of the record's
//! transfer list is already explicit and is dropped; each explicit entry
//! absorbs at most one implied leg. A value with no negation (`i64::MIN`)
//! yields no legs.

use std::collections::HashMap;

use tracing::debug;

use super::{resolve, to_id};
use crate::entity::EntityId;
use crate::event::Transfer;
use crate::proto::transaction_body::Data;
use crate::stream::RecordItem;

pub(crate) fn non_fee_transfers(item: &RecordItem) -> Vec<Transfer> {
    let payer = item.payer();
    let success = item.is_successful();
    let receipt = item.receipt();

    let mut legs: Vec<(Option<EntityId>, i64)> = Vec::new();
    match &item.body.data {
        Some(Data::CryptoCreateAccount(body)) => {
            let amount = i64::try_from(body.initial_balance).unwrap_or(i64::MAX);
            push_pair(&mut legs, payer, receipt.and_then(|r| to_id(r.account_id.as_ref())), amount);
        }
        Some(Data::ContractCreateInstance(body)) => {
            let created = resolve(
                receipt.and_then(|r| to_id(r.contract_id.as_ref())),
                item.record.contract_result().and_then(|r| to_id(r.contract_id.as_ref())),
            );
            push_pair(&mut legs, payer, created, body.initial_balance);
        }
        Some(Data::ContractCall(body)) => {
            let contract = resolve(
                receipt.and_then(|r| to_id(r.contract_id.as_ref())),
                to_id(body.contract_id.as_ref()),
            );
            push_pair(&mut legs, payer, contract, body.amount);
        }
        Some(Data::CryptoTransfer(body)) => {
            let declared = body.transfers.iter().flat_map(|t| t.account_amounts.iter());
            legs.extend(declared.map(|aa| (to_id(aa.account_id.as_ref()), aa.amount)));
        }
        _ => return Vec::new(),
    }

    let mut explicit: HashMap<(EntityId, i64), usize> = HashMap::new();
    for aa in item.record.transfer_list.iter().flat_map(|t| t.account_amounts.iter()) {
        if let Some(id) = to_id(aa.account_id.as_ref()) {
            *explicit.entry((id, aa.amount)).or_default() += 1;
        }
    }

    legs.into_iter()
        .filter_map(|(account, amount)| Some((account?, amount)))
        .filter(|&(_, amount)| amount != 0)
        .filter(|&(account, amount)| success || (Some(account) == payer && amount < 0))
        .filter(|key| match explicit.get_mut(key) {
            Some(n) if *n > 0 => {
                *n -= 1;
                false
            }
            _ => true,
        })
        .map(|(entity_id, amount)| Transfer {
            consensus_timestamp: item.consensus_timestamp,
            entity_id,
            amount,
            payer,
        })
        .collect()
}

/// Payer debit and matching credit of `amount`.
fn push_pair(
    legs: &mut Vec<(Option<EntityId>, i64)>,
    payer: Option<EntityId>,
    credited: Option<EntityId>,
    amount: i64,
) {
    match amount.checked_neg() {
        Some(debit) => {
            legs.push((payer, debit));
            legs.push((credited, amount));
        }
        None => debug!(amount, "Ignoring implied transfer with unrepresentable debit"),
    }
}
