//! MiniMart ABI decoding: raw logs into typed [`EventRecord`]s.
//!
//! Every MiniMart event has only static parameters, so decoding is a matter of
//! reading indexed values from `topics[1..]` and the rest from consecutive
//! 32-byte words of `data`. `topics[0]` is the keccak256 of the canonical
//! signature and selects the variant.

use std::str::FromStr;

use alloy_primitives::{hex, keccak256, Address, B256, U256};

use minimart_indexer_core::error::IndexerError;
use minimart_indexer_core::types::{EventRecord, MiniMartEvent};

use crate::fetcher::RawLog;

/// The events the MiniMart contract emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    OrderListed,
    OrderFulfilled,
    OrderRemoved,
    OwnershipTransferred,
    Paused,
    Unpaused,
    Eip712DomainChanged,
}

impl EventKind {
    pub const ALL: [EventKind; 7] = [
        Self::OrderListed,
        Self::OrderFulfilled,
        Self::OrderRemoved,
        Self::OwnershipTransferred,
        Self::Paused,
        Self::Unpaused,
        Self::Eip712DomainChanged,
    ];

    /// Canonical ABI signature, the preimage of topic0.
    pub fn signature(self) -> &'static str {
        match self {
            Self::OrderListed => "OrderListed(bytes32,address,address,uint256,uint256)",
            Self::OrderFulfilled => "OrderFulfilled(bytes32,address)",
            Self::OrderRemoved => "OrderRemoved(bytes32)",
            Self::OwnershipTransferred => "OwnershipTransferred(address,address)",
            Self::Paused => "Paused(address)",
            Self::Unpaused => "Unpaused(address)",
            Self::Eip712DomainChanged => "EIP712DomainChanged()",
        }
    }

    pub fn topic0(self) -> B256 {
        keccak256(self.signature())
    }

    /// `(indexed params, data words)`.
    fn layout(self) -> (usize, usize) {
        match self {
            Self::OrderListed => (3, 2),
            Self::OrderFulfilled => (2, 0),
            Self::OrderRemoved => (1, 0),
            Self::OwnershipTransferred => (2, 0),
            Self::Paused | Self::Unpaused => (0, 1),
            Self::Eip712DomainChanged => (0, 0),
        }
    }
}

/// Decodes MiniMart logs.
#[derive(Debug, Clone)]
pub struct MiniMartDecoder {
    selectors: Vec<(B256, EventKind)>,
}

impl Default for MiniMartDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl MiniMartDecoder {
    pub fn new() -> Self {
        Self {
            selectors: EventKind::ALL.iter().map(|k| (k.topic0(), *k)).collect(),
        }
    }

    /// All topic0 values, for the `eth_getLogs` filter.
    pub fn topic0s(&self) -> Vec<B256> {
        self.selectors.iter().map(|(t, _)| *t).collect()
    }

    pub fn kind_of(&self, topic0: &B256) -> Option<EventKind> {
        self.selectors
            .iter()
            .find(|(t, _)| t == topic0)
            .map(|(_, k)| *k)
    }

    /// Decode one log. Logs the node flagged `removed` yield `Ok(None)`.
    pub fn decode(&self, log: &RawLog) -> Result<Option<EventRecord>, IndexerError> {
        if log.is_removed() {
            tracing::debug!(tx = %log.tx_hash, log_index = %log.log_index, "skipping removed log");
            return Ok(None);
        }

        let fields = LogFields::parse(log)?;
        let topic0 = fields.topic(0)?;
        let kind = self
            .kind_of(&topic0)
            .ok_or_else(|| log.malformed(format!("unknown event topic {topic0}")))?;

        let (indexed, words) = kind.layout();
        if fields.topics.len() != indexed + 1 {
            return Err(log.malformed(format!(
                "{} expects {} topics, got {}",
                kind.signature(),
                indexed + 1,
                fields.topics.len()
            )));
        }
        if fields.data.len() < words * 32 {
            return Err(log.malformed(format!(
                "{} data truncated: {} bytes, need {}",
                kind.signature(),
                fields.data.len(),
                words * 32
            )));
        }

        let event = match kind {
            EventKind::OrderListed => MiniMartEvent::OrderListed {
                order_id: fields.topic(1)?,
                seller: Address::from_word(fields.topic(2)?),
                nft_contract: Address::from_word(fields.topic(3)?),
                token_id: U256::from_be_bytes(fields.word(0).0),
                price: U256::from_be_bytes(fields.word(1).0),
            },
            EventKind::OrderFulfilled => MiniMartEvent::OrderFulfilled {
                order_id: fields.topic(1)?,
                buyer: Address::from_word(fields.topic(2)?),
            },
            EventKind::OrderRemoved => MiniMartEvent::OrderRemoved {
                order_id: fields.topic(1)?,
            },
            EventKind::OwnershipTransferred => MiniMartEvent::OwnershipTransferred {
                previous_owner: Address::from_word(fields.topic(1)?),
                new_owner: Address::from_word(fields.topic(2)?),
            },
            EventKind::Paused => MiniMartEvent::Paused {
                account: Address::from_word(fields.word(0)),
            },
            EventKind::Unpaused => MiniMartEvent::Unpaused {
                account: Address::from_word(fields.word(0)),
            },
            EventKind::Eip712DomainChanged => MiniMartEvent::Eip712DomainChanged,
        };

        let transaction_hash = B256::from_str(&log.tx_hash)
            .map_err(|e| log.malformed(format!("bad transactionHash: {e}")))?;

        Ok(Some(EventRecord {
            event,
            block_number: log.block_number_u64()?,
            transaction_hash,
            log_index: log.log_index_u32()?,
        }))
    }

    /// Decode a batch, dropping removed logs. The first bad log fails the
    /// whole batch.
    pub fn decode_all(&self, logs: &[RawLog]) -> Result<Vec<EventRecord>, IndexerError> {
        let mut records = Vec::with_capacity(logs.len());
        for log in logs {
            if let Some(record) = self.decode(log)? {
                records.push(record);
            }
        }
        Ok(records)
    }
}

/// Topics and data of one log, hex-decoded.
struct LogFields<'a> {
    log: &'a RawLog,
    topics: Vec<B256>,
    data: Vec<u8>,
}

impl<'a> LogFields<'a> {
    fn parse(log: &'a RawLog) -> Result<Self, IndexerError> {
        let topics = log
            .topics
            .iter()
            .map(|t| B256::from_str(t).map_err(|e| log.malformed(format!("bad topic {t}: {e}"))))
            .collect::<Result<Vec<_>, _>>()?;
        let data = hex::decode(&log.data).map_err(|e| log.malformed(format!("bad data: {e}")))?;
        Ok(Self { log, topics, data })
    }

    fn topic(&self, i: usize) -> Result<B256, IndexerError> {
        self.topics
            .get(i)
            .copied()
            .ok_or_else(|| self.log.malformed(format!("missing topic {i}")))
    }

    /// Data word `i`; callers check the data length against the layout first.
    fn word(&self, i: usize) -> B256 {
        B256::from_slice(&self.data[i * 32..(i + 1) * 32])
    }
}
