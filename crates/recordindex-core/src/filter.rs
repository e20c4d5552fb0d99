//! Include/exclude filtering of domain events.
//!
//! An event passes when there are no include rules or it matches at least
//! one, and it matches no exclude rule. Within a rule every non-empty
//! criterion must match; an empty criterion matches anything.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::entity::EntityId;
use crate::error::FilterConfigError;
use crate::event::{DomainEvent, EventKind};
use crate::types::TransactionType;

/// Rule as written in configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterRuleConfig {
    /// `shard.realm.num` identities.
    pub entities: Vec<String>,
    /// Event kind names, e.g. `transfer`, `topic_message`.
    pub kinds: Vec<String>,
    /// Transaction type names (`CRYPTOTRANSFER`) or numeric codes.
    pub transaction_types: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub include: Vec<FilterRuleConfig>,
    pub exclude: Vec<FilterRuleConfig>,
}

impl FilterConfig {
    pub fn compile(&self) -> Result<IngestionFilter, FilterConfigError> {
        Ok(IngestionFilter {
            include: compile_rules(&self.include, "include")?,
            exclude: compile_rules(&self.exclude, "exclude")?,
        })
    }
}

fn compile_rules(
    rules: &[FilterRuleConfig],
    list: &'static str,
) -> Result<Vec<FilterRule>, FilterConfigError> {
    rules
        .iter()
        .enumerate()
        .map(|(index, rule)| FilterRule::compile(rule, list, index))
        .collect()
}

#[derive(Debug, Clone, Default)]
struct FilterRule {
    entities: HashSet<EntityId>,
    kinds: HashSet<EventKind>,
    transaction_types: HashSet<TransactionType>,
}

impl FilterRule {
    fn compile(
        rule: &FilterRuleConfig,
        list: &'static str,
        index: usize,
    ) -> Result<Self, FilterConfigError> {
        if rule.entities.is_empty() && rule.kinds.is_empty() && rule.transaction_types.is_empty() {
            return Err(FilterConfigError::EmptyRule { list, index });
        }
        let entities = rule
            .entities
            .iter()
            .map(|s| s.parse::<EntityId>())
            .collect::<Result<_, _>>()?;
        let kinds = rule
            .kinds
            .iter()
            .map(|s| s.parse::<EventKind>().map_err(FilterConfigError::UnknownKind))
            .collect::<Result<_, _>>()?;
        let transaction_types = rule
            .transaction_types
            .iter()
            .map(|s| {
                s.parse::<TransactionType>()
                    .map_err(FilterConfigError::UnknownTransactionType)
            })
            .collect::<Result<_, _>>()?;
        Ok(Self {
            entities,
            kinds,
            transaction_types,
        })
    }

    fn matches(&self, event: &DomainEvent, transaction_type: TransactionType) -> bool {
        let entity_ok = self.entities.is_empty()
            || event.entity_id().is_some_and(|id| self.entities.contains(&id));
        let kind_ok = self.kinds.is_empty() || self.kinds.contains(&event.kind());
        let type_ok =
            self.transaction_types.is_empty() || self.transaction_types.contains(&transaction_type);
        entity_ok && kind_ok && type_ok
    }
}

/// Compiled, immutable filter.
#[derive(Debug, Clone, Default)]
pub struct IngestionFilter {
    include: Vec<FilterRule>,
    exclude: Vec<FilterRule>,
}

impl IngestionFilter {
    /// A filter that lets everything through.
    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn is_pass_through(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    /// `transaction_type` is the type of the item the event came from.
    pub fn passes(&self, event: &DomainEvent, transaction_type: TransactionType) -> bool {
        let included = self.include.is_empty()
            || self.include.iter().any(|r| r.matches(event, transaction_type));
        included && !self.exclude.iter().any(|r| r.matches(event, transaction_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Transfer;

    fn transfer(num: i64) -> DomainEvent {
        DomainEvent::Transfer(Transfer {
            consensus_timestamp: 1,
            entity_id: EntityId::of_num(num).unwrap(),
            amount: 10,
            payer: None,
        })
    }

    fn rule(entities: &[&str], kinds: &[&str]) -> FilterRuleConfig {
        FilterRuleConfig {
            entities: entities.iter().map(|s| s.to_string()).collect(),
            kinds: kinds.iter().map(|s| s.to_string()).collect(),
            transaction_types: vec![],
        }
    }

    #[test]
    fn empty_filter_passes_everything() {
        let f = FilterConfig::default().compile().unwrap();
        assert!(f.is_pass_through());
        assert!(f.passes(&transfer(5), TransactionType::CryptoTransfer));
    }

    #[test]
    fn allow_all_matches_empty_config() {
        let f = IngestionFilter::allow_all();
        assert!(f.is_pass_through());
        assert!(f.passes(&transfer(98), TransactionType::ContractCall));
    }

    #[test]
    fn exclude_wins_on_conflict() {
        let f = FilterConfig {
            include: vec![rule(&["0.0.5"], &["transfer"])],
            exclude: vec![rule(&["0.0.5"], &[])],
        }
        .compile()
        .unwrap();
        assert!(!f.passes(&transfer(5), TransactionType::CryptoTransfer));
    }

    #[test]
    fn include_restricts() {
        let f = FilterConfig {
            include: vec![rule(&["0.0.5"], &[])],
            exclude: vec![],
        }
        .compile()
        .unwrap();
        assert!(f.passes(&transfer(5), TransactionType::CryptoTransfer));
        assert!(!f.passes(&transfer(6), TransactionType::CryptoTransfer));
    }

    #[test]
    fn transaction_type_criterion() {
        let f = FilterConfig {
            include: vec![],
            exclude: vec![FilterRuleConfig {
                transaction_types: vec!["CONSENSUSSUBMITMESSAGE".into()],
                ..Default::default()
            }],
        }
        .compile()
        .unwrap();
        assert!(!f.passes(&transfer(5), TransactionType::ConsensusSubmitMessage));
        assert!(f.passes(&transfer(5), TransactionType::CryptoTransfer));
    }

    #[test]
    fn bad_rules_are_rejected() {
        let empty = FilterConfig {
            include: vec![FilterRuleConfig::default()],
            exclude: vec![],
        };
        assert!(matches!(
            empty.compile(),
            Err(FilterConfigError::EmptyRule { list: "include", index: 0 })
        ));

        let bad_kind = FilterConfig {
            include: vec![],
            exclude: vec![rule(&[], &["balances"])],
        };
        assert!(matches!(bad_kind.compile(), Err(FilterConfigError::UnknownKind(_))));

        let bad_id = FilterConfig {
            include: vec![rule(&["0.0.x"], &[])],
            exclude: vec![],
        };
        assert!(matches!(bad_id.compile(), Err(FilterConfigError::InvalidEntityId(_))));
    }

    #[test]
    fn deserializes_from_json() {
        let cfg: FilterConfig = serde_json::from_str(
            r#"{ "exclude": [ { "entities": ["0.0.98"], "kinds": ["non_fee_transfer"] } ] }"#,
        )
        .unwrap();
        assert!(cfg.include.is_empty());
        assert_eq!(cfg.exclude[0].kinds, vec!["non_fee_transfer".to_string()]);
    }
}
