//! Shared types for the ingestion pipeline.

use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

use crate::error::IndexerError;

// ─── MiniMartEvent ───────────────────────────────────────────────────────────

/// A decoded MiniMart contract event, tagged by event name.
///
/// Serializes as `{"eventName": "...", "args": {...}}`. Addresses are rendered
/// EIP-55 checksummed and `uint256` values as decimal strings so that values
/// beyond 2^53 survive any JSON consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "eventName", content = "args")]
pub enum MiniMartEvent {
    #[serde(rename_all = "camelCase")]
    OrderListed {
        order_id: B256,
        #[serde(with = "checksummed")]
        seller: Address,
        #[serde(with = "checksummed")]
        nft_contract: Address,
        #[serde(with = "decimal")]
        token_id: U256,
        #[serde(with = "decimal")]
        price: U256,
    },
    #[serde(rename_all = "camelCase")]
    OrderFulfilled {
        order_id: B256,
        #[serde(with = "checksummed")]
        buyer: Address,
    },
    #[serde(rename_all = "camelCase")]
    OrderRemoved { order_id: B256 },
    #[serde(rename_all = "camelCase")]
    OwnershipTransferred {
        #[serde(with = "checksummed")]
        previous_owner: Address,
        #[serde(with = "checksummed")]
        new_owner: Address,
    },
    Paused {
        #[serde(with = "checksummed")]
        account: Address,
    },
    Unpaused {
        #[serde(with = "checksummed")]
        account: Address,
    },
    #[serde(rename = "EIP712DomainChanged")]
    Eip712DomainChanged,
}

impl MiniMartEvent {
    /// The event name as emitted by the contract (e.g. `"OrderListed"`).
    pub fn name(&self) -> &'static str {
        match self {
            Self::OrderListed { .. } => "OrderListed",
            Self::OrderFulfilled { .. } => "OrderFulfilled",
            Self::OrderRemoved { .. } => "OrderRemoved",
            Self::OwnershipTransferred { .. } => "OwnershipTransferred",
            Self::Paused { .. } => "Paused",
            Self::Unpaused { .. } => "Unpaused",
            Self::Eip712DomainChanged => "EIP712DomainChanged",
        }
    }

    /// The variant's argument payload as JSON (`null` for argument-less events).
    pub fn args_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        let mut tagged = serde_json::to_value(self)?;
        Ok(tagged
            .get_mut("args")
            .map(serde_json::Value::take)
            .unwrap_or(serde_json::Value::Null))
    }
}

// ─── EventRecord ─────────────────────────────────────────────────────────────

/// A decoded, immutable log record: the unit of ingestion.
///
/// `(transaction_hash, log_index)` identifies a record across all time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    pub event: MiniMartEvent,
    /// Source position (block number).
    pub block_number: u64,
    pub transaction_hash: B256,
    /// Position of the log within its block.
    pub log_index: u32,
}

impl EventRecord {
    pub fn event_name(&self) -> &'static str {
        self.event.name()
    }

    /// The uniqueness key for idempotent persistence.
    pub fn identity(&self) -> (B256, u32) {
        (self.transaction_hash, self.log_index)
    }

    /// Serialized `args` column value; `None` for argument-less events.
    pub fn args_text(&self) -> Result<Option<String>, IndexerError> {
        let args = self.event.args_json().map_err(|e| {
            IndexerError::Other(format!("serialize args of {}: {e}", self.event_name()))
        })?;
        Ok((!args.is_null()).then(|| args.to_string()))
    }

    /// Block number as decimal text, the form it is bound to the store in.
    pub fn block_number_text(&self) -> String {
        self.block_number.to_string()
    }

    /// `0x`-prefixed lowercase transaction hash.
    pub fn transaction_hash_hex(&self) -> String {
        self.transaction_hash.to_string()
    }
}

// ─── IndexPhase ──────────────────────────────────────────────────────────────

/// Which scanner phase produced a batch of records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexPhase {
    /// Catching up from the resume position to the chain head.
    Backfill,
    /// Following the chain tip through the log subscription.
    Live,
}

impl std::fmt::Display for IndexPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Backfill => write!(f, "backfill"),
            Self::Live => write!(f, "live"),
        }
    }
}

// ─── serde helpers ───────────────────────────────────────────────────────────

mod decimal {
    use alloy_primitives::U256;
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};
    use std::str::FromStr;

    pub fn serialize<S: Serializer>(value: &U256, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<U256, D::Error> {
        let text = String::deserialize(d)?;
        U256::from_str(&text).map_err(D::Error::custom)
    }
}

mod checksummed {
    use alloy_primitives::Address;
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};
    use std::str::FromStr;

    pub fn serialize<S: Serializer>(value: &Address, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&value.to_checksum(None))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Address, D::Error> {
        let text = String::deserialize(d)?;
        Address::from_str(&text).map_err(D::Error::custom)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn listed(price: U256) -> MiniMartEvent {
        MiniMartEvent::OrderListed {
            order_id: B256::repeat_byte(0x11),
            seller: Address::repeat_byte(0xaa),
            nft_contract: Address::repeat_byte(0xbb),
            token_id: U256::from(42u64),
            price,
        }
    }

    #[test]
    fn big_integers_serialize_as_decimal_text() {
        // Larger than u64::MAX and far past an f64 mantissa.
        let price = U256::from(u64::MAX) * U256::from(64u64);
        let args = listed(price).args_json().unwrap();
        assert_eq!(args["price"], "1180591620717411303360");
        assert_eq!(args["tokenId"], "42");
    }

    #[test]
    fn args_use_camel_case_and_checksummed_addresses() {
        let args = listed(U256::from(1u64)).args_json().unwrap();
        assert_eq!(
            args["orderId"],
            "0x1111111111111111111111111111111111111111111111111111111111111111"
        );
        let seller = args["seller"].as_str().unwrap();
        assert_eq!(seller, Address::repeat_byte(0xaa).to_checksum(None));
        assert!(args.get("nftContract").is_some());
    }

    #[test]
    fn argless_event_has_null_args() {
        let ev = MiniMartEvent::Eip712DomainChanged;
        assert_eq!(ev.name(), "EIP712DomainChanged");
        assert_eq!(ev.args_json().unwrap(), serde_json::Value::Null);
        let rec = EventRecord {
            event: ev,
            block_number: 1,
            transaction_hash: B256::ZERO,
            log_index: 0,
        };
        assert_eq!(rec.args_text().unwrap(), None);
    }

    #[test]
    fn tagged_roundtrip() {
        let ev = listed(U256::MAX);
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains("\"eventName\":\"OrderListed\""));
        let back: MiniMartEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ev);
    }

    #[test]
    fn record_identity_and_text_forms() {
        let rec = EventRecord {
            event: MiniMartEvent::Paused {
                account: Address::repeat_byte(0x01),
            },
            block_number: 32_908_523,
            transaction_hash: B256::repeat_byte(0xcd),
            log_index: 4,
        };
        assert_eq!(rec.event_name(), "Paused");
        let args = rec.args_text().unwrap().unwrap();
        assert!(args.starts_with("{\"account\":\"0x"));
        assert_eq!(rec.identity(), (B256::repeat_byte(0xcd), 4));
        assert_eq!(rec.block_number_text(), "32908523");
        assert!(rec.transaction_hash_hex().starts_with("0xcdcd"));
        assert_eq!(rec.transaction_hash_hex().len(), 66);
    }
}
