//! Typed decoding of market contract events out of receipt logs.
//!
//! Logs are matched on topic0; anything from another contract or with an
//! unknown topic is skipped. A recognised event with malformed data is also
//! skipped (and logged), never treated as an error: the orchestrators fall
//! back to resync for anything the receipt cannot tell them.

use crate::chain::abi::{self, AbiReader};
use crate::chain::types::{RawLog, RpcError, Side, TxReceipt, WinningSide};
use alloy::primitives::{Address, B256, U256};
use tracing::debug;

/// Events emitted by the market contract.
#[derive(Debug, Clone, PartialEq)]
pub enum MarketEvent {
    /// MarketCreated(uint256 indexed marketId, address indexed creator,
    ///               string question, uint256 endTime)
    MarketCreated {
        market_id: u64,
        creator: Address,
        question: String,
        end_time: u64,
    },
    /// BetPlaced(uint256 indexed marketId, address indexed user,
    ///           uint8 side, uint256 amount)
    BetPlaced {
        market_id: u64,
        user: Address,
        side: Side,
        amount: U256,
    },
    /// MarketResolved(uint256 indexed marketId, uint8 winningSide,
    ///                uint256 distributablePool, uint256 feeAmount)
    MarketResolved {
        market_id: u64,
        winning_side: WinningSide,
        distributable_pool: U256,
        fee_amount: U256,
    },
    /// PayoutClaimed(uint256 indexed marketId, address indexed user, uint256 payout)
    PayoutClaimed {
        market_id: u64,
        user: Address,
        payout: U256,
    },
}

impl MarketEvent {
    pub fn market_id(&self) -> u64 {
        match self {
            MarketEvent::MarketCreated { market_id, .. }
            | MarketEvent::BetPlaced { market_id, .. }
            | MarketEvent::MarketResolved { market_id, .. }
            | MarketEvent::PayoutClaimed { market_id, .. } => *market_id,
        }
    }
}

impl std::fmt::Display for MarketEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MarketCreated { market_id, end_time, .. } => {
                write!(f, "MarketCreated(id={}, end={})", market_id, end_time)
            }
            Self::BetPlaced { market_id, side, amount, .. } => {
                write!(f, "BetPlaced(id={}, side={}, amount={})", market_id, side, amount)
            }
            Self::MarketResolved { market_id, winning_side, .. } => {
                write!(f, "MarketResolved(id={}, side={})", market_id, winning_side)
            }
            Self::PayoutClaimed { market_id, payout, .. } => {
                write!(f, "PayoutClaimed(id={}, payout={})", market_id, payout)
            }
        }
    }
}

fn topic_u64(log: &RawLog, index: usize) -> Result<u64, RpcError> {
    let topic = log
        .topics
        .get(index)
        .ok_or_else(|| RpcError::Decode(format!("missing topic {index}")))?;
    u64::try_from(U256::from_be_bytes(topic.0))
        .map_err(|_| RpcError::Decode(format!("topic {index} overflows u64")))
}

fn topic_address(log: &RawLog, index: usize) -> Result<Address, RpcError> {
    let topic: &B256 = log
        .topics
        .get(index)
        .ok_or_else(|| RpcError::Decode(format!("missing topic {index}")))?;
    Ok(Address::from_slice(&topic.0[12..]))
}

fn decode_known(log: &RawLog, topic0: B256) -> Result<Option<MarketEvent>, RpcError> {
    let data = AbiReader::new(&log.data);
    let event = match topic0 {
        t if t == abi::MARKET_CREATED_TOPIC => MarketEvent::MarketCreated {
            market_id: topic_u64(log, 1)?,
            creator: topic_address(log, 2)?,
            question: data.string(0)?,
            end_time: data.u64(1)?,
        },
        t if t == abi::BET_PLACED_TOPIC => {
            let raw_side = data.u8(0)?;
            MarketEvent::BetPlaced {
                market_id: topic_u64(log, 1)?,
                user: topic_address(log, 2)?,
                side: Side::from_u8(raw_side)
                    .ok_or_else(|| RpcError::Decode(format!("unknown side {raw_side}")))?,
                amount: data.uint(1)?,
            }
        }
        t if t == abi::MARKET_RESOLVED_TOPIC => {
            let raw_side = data.u8(0)?;
            MarketEvent::MarketResolved {
                market_id: topic_u64(log, 1)?,
                winning_side: WinningSide::from_u8(raw_side)
                    .ok_or_else(|| RpcError::Decode(format!("unknown outcome {raw_side}")))?,
                distributable_pool: data.uint(1)?,
                fee_amount: data.uint(2)?,
            }
        }
        t if t == abi::PAYOUT_CLAIMED_TOPIC => MarketEvent::PayoutClaimed {
            market_id: topic_u64(log, 1)?,
            user: topic_address(log, 2)?,
            payout: data.uint(0)?,
        },
        _ => return Ok(None),
    };
    Ok(Some(event))
}

/// Decode one log emitted by `contract`. Returns `None` for foreign or
/// unrecognised logs.
pub fn decode_log(log: &RawLog, contract: Address) -> Option<MarketEvent> {
    if log.address != contract {
        return None;
    }
    let topic0 = *log.topics.first()?;
    match decode_known(log, topic0) {
        Ok(event) => event,
        Err(e) => {
            debug!(topic = %topic0, error = %e, "skipping malformed market event");
            None
        }
    }
}

/// All market events in a receipt, in log order.
pub fn decode_receipt(receipt: &TxReceipt, contract: Address) -> Vec<MarketEvent> {
    receipt
        .logs
        .iter()
        .filter_map(|log| decode_log(log, contract))
        .collect()
}

/// Build the raw log for an event. Used by the in-process chain double and
/// handy when replaying fixtures.
pub fn encode_event(contract: Address, event: &MarketEvent) -> RawLog {
    use crate::chain::abi::{encode, Token};

    let id_topic = |id: u64| B256::from(U256::from(id).to_be_bytes::<32>());
    let addr_topic = |a: &Address| B256::left_padding_from(a.as_slice());

    let (topics, data) = match event {
        MarketEvent::MarketCreated { market_id, creator, question, end_time } => (
            vec![abi::MARKET_CREATED_TOPIC, id_topic(*market_id), addr_topic(creator)],
            encode(&[Token::String(question.clone()), Token::uint(*end_time)]),
        ),
        MarketEvent::BetPlaced { market_id, user, side, amount } => (
            vec![abi::BET_PLACED_TOPIC, id_topic(*market_id), addr_topic(user)],
            encode(&[Token::uint(u64::from(side.as_u8())), Token::Uint(*amount)]),
        ),
        MarketEvent::MarketResolved { market_id, winning_side, distributable_pool, fee_amount } => (
            vec![abi::MARKET_RESOLVED_TOPIC, id_topic(*market_id)],
            encode(&[
                Token::uint(u64::from(winning_side.as_u8())),
                Token::Uint(*distributable_pool),
                Token::Uint(*fee_amount),
            ]),
        ),
        MarketEvent::PayoutClaimed { market_id, user, payout } => (
            vec![abi::PAYOUT_CLAIMED_TOPIC, id_topic(*market_id), addr_topic(user)],
            encode(&[Token::Uint(*payout)]),
        ),
    };

    RawLog {
        address: contract,
        topics,
        data: data.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::Bytes;

    fn contract() -> Address {
        Address::repeat_byte(0xc0)
    }

    #[test]
    fn test_decodes_bet_placed() {
        let user = Address::repeat_byte(0x22);
        let event = MarketEvent::BetPlaced {
            market_id: 7,
            user,
            side: Side::No,
            amount: U256::from(1_000u64),
        };
        let log = encode_event(contract(), &event);
        assert_eq!(decode_log(&log, contract()), Some(event));
    }

    #[test]
    fn test_skips_foreign_and_unknown_logs() {
        let event = MarketEvent::PayoutClaimed {
            market_id: 1,
            user: Address::repeat_byte(0x01),
            payout: U256::from(5u64),
        };
        let log = encode_event(contract(), &event);
        assert_eq!(decode_log(&log, Address::repeat_byte(0xff)), None);

        let unknown = RawLog {
            address: contract(),
            topics: vec![B256::repeat_byte(0xab)],
            data: Bytes::new(),
        };
        assert_eq!(decode_log(&unknown, contract()), None);
    }

    #[test]
    fn test_malformed_event_is_skipped() {
        let mut log = encode_event(
            contract(),
            &MarketEvent::MarketResolved {
                market_id: 3,
                winning_side: WinningSide::Tie,
                distributable_pool: U256::from(4u64),
                fee_amount: U256::ZERO,
            },
        );
        log.data = Bytes::from(vec![0u8; 10]);
        assert_eq!(decode_log(&log, contract()), None);
    }

    #[test]
    fn test_receipt_keeps_log_order() {
        let created = MarketEvent::MarketCreated {
            market_id: 9,
            creator: Address::repeat_byte(0x33),
            question: "Q?".to_string(),
            end_time: 42,
        };
        let bet = MarketEvent::BetPlaced {
            market_id: 9,
            user: Address::repeat_byte(0x33),
            side: Side::Yes,
            amount: U256::from(1u64),
        };
        let receipt = TxReceipt {
            tx_hash: B256::repeat_byte(0x01),
            success: true,
            from: Address::repeat_byte(0x33),
            to: Some(contract()),
            block_number: Some(1),
            logs: vec![encode_event(contract(), &created), encode_event(contract(), &bet)],
        };
        assert_eq!(decode_receipt(&receipt, contract()), vec![created, bet]);
    }
}
