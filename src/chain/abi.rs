//! Market contract ABI: selectors, event topics, calldata encoding and
//! bounds-checked return-data decoding.
//!
//! We only need a handful of functions and events, so encoding is done by
//! hand on 32-byte words rather than pulling in a full ABI codec.

use crate::chain::types::RpcError;
use alloy::primitives::{b256, Address, Bytes, B256, U256};

// ─── Function selectors (first 4 bytes of keccak256(signature)) ─────────────

/// keccak256("marketCount()")
pub const MARKET_COUNT: [u8; 4] = [0xec, 0x97, 0x90, 0x82];
/// keccak256("getMarket(uint256)")
pub const GET_MARKET: [u8; 4] = [0xeb, 0x44, 0xfd, 0xd3];
/// keccak256("getUserStakes(uint256,address)")
pub const GET_USER_STAKES: [u8; 4] = [0x14, 0xce, 0x78, 0x3d];
/// keccak256("getClaimable(uint256,address)")
pub const GET_CLAIMABLE: [u8; 4] = [0xb9, 0x61, 0xcb, 0xe1];
/// keccak256("getMarketImbalance(uint256)")
pub const GET_MARKET_IMBALANCE: [u8; 4] = [0x76, 0xd7, 0xa3, 0x58];
/// keccak256("isBetLocked(uint256)")
pub const IS_BET_LOCKED: [u8; 4] = [0xcd, 0x03, 0x49, 0x06];
/// keccak256("createMarket(string,uint256)")
pub const CREATE_MARKET: [u8; 4] = [0x88, 0x3c, 0x84, 0xc1];
/// keccak256("placeBet(uint256,uint8)")
pub const PLACE_BET: [u8; 4] = [0x03, 0xed, 0xf9, 0x14];
/// keccak256("resolveMarket(uint256)")
pub const RESOLVE_MARKET: [u8; 4] = [0x63, 0x99, 0xd0, 0x3d];
/// keccak256("claim(uint256)")
pub const CLAIM: [u8; 4] = [0x37, 0x96, 0x07, 0xf5];

// ─── Event topic0 hashes ────────────────────────────────────────────────────

/// keccak256("MarketCreated(uint256,address,string,uint256)")
pub const MARKET_CREATED_TOPIC: B256 =
    b256!("03e783e31593f59fda73a59d05e2525d610a533995cce4d4750186c3b6bf80bb");

/// keccak256("BetPlaced(uint256,address,uint8,uint256)")
pub const BET_PLACED_TOPIC: B256 =
    b256!("4f1eed5e863a822b0f9eb960dfdab2cc5a99beec4b191f2a7a9c7e28e5a15524");

/// keccak256("MarketResolved(uint256,uint8,uint256,uint256)")
pub const MARKET_RESOLVED_TOPIC: B256 =
    b256!("503d167e0856e2f40aaac2dac6550f9543efb837691cc189cde53b0172e4f32b");

/// keccak256("PayoutClaimed(uint256,address,uint256)")
pub const PAYOUT_CLAIMED_TOPIC: B256 =
    b256!("e97cee5a4c0549d3fdc81e322b718ddf0aeb3418ec87dce4f9a7fb28d117c312");

/// Selector of `Error(string)` revert payloads.
const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];

/// Compute keccak256 hash of a byte slice.
pub fn keccak256(data: &[u8]) -> B256 {
    use tiny_keccak::{Hasher, Keccak};
    let mut hasher = Keccak::v256();
    let mut output = [0u8; 32];
    hasher.update(data);
    hasher.finalize(&mut output);
    B256::from(output)
}

/// Verify that the pre-computed selectors and topics match their signatures.
/// Called at startup so a typo shows up in the logs instead of as silent
/// decode misses.
pub fn verify_signatures() -> Vec<(String, bool)> {
    let selectors: [(&str, [u8; 4]); 10] = [
        ("marketCount()", MARKET_COUNT),
        ("getMarket(uint256)", GET_MARKET),
        ("getUserStakes(uint256,address)", GET_USER_STAKES),
        ("getClaimable(uint256,address)", GET_CLAIMABLE),
        ("getMarketImbalance(uint256)", GET_MARKET_IMBALANCE),
        ("isBetLocked(uint256)", IS_BET_LOCKED),
        ("createMarket(string,uint256)", CREATE_MARKET),
        ("placeBet(uint256,uint8)", PLACE_BET),
        ("resolveMarket(uint256)", RESOLVE_MARKET),
        ("claim(uint256)", CLAIM),
    ];
    let topics: [(&str, B256); 4] = [
        ("MarketCreated(uint256,address,string,uint256)", MARKET_CREATED_TOPIC),
        ("BetPlaced(uint256,address,uint8,uint256)", BET_PLACED_TOPIC),
        ("MarketResolved(uint256,uint8,uint256,uint256)", MARKET_RESOLVED_TOPIC),
        ("PayoutClaimed(uint256,address,uint256)", PAYOUT_CLAIMED_TOPIC),
    ];

    let mut checks: Vec<(String, bool)> = selectors
        .iter()
        .map(|(sig, expected)| {
            let computed = keccak256(sig.as_bytes());
            (sig.to_string(), computed[..4] == expected[..])
        })
        .collect();
    checks.extend(topics.iter().map(|(sig, expected)| {
        (sig.to_string(), keccak256(sig.as_bytes()) == *expected)
    }));
    checks
}

// ─── Encoding ───────────────────────────────────────────────────────────────

/// A single ABI argument.
#[derive(Debug, Clone)]
pub enum Token {
    Uint(U256),
    Address(Address),
    Bool(bool),
    String(String),
}

impl Token {
    pub fn uint(v: u64) -> Self {
        Token::Uint(U256::from(v))
    }
}

fn word_of(token: &Token) -> [u8; 32] {
    let mut word = [0u8; 32];
    match token {
        Token::Uint(v) => word = v.to_be_bytes::<32>(),
        Token::Address(a) => word[12..].copy_from_slice(a.as_slice()),
        Token::Bool(b) => word[31] = u8::from(*b),
        Token::String(_) => {}
    }
    word
}

/// ABI-encode a tuple of tokens (head words, then dynamic tails).
pub fn encode(tokens: &[Token]) -> Vec<u8> {
    let head_len = tokens.len() * 32;
    let mut head = Vec::with_capacity(head_len);
    let mut tail: Vec<u8> = Vec::new();

    for token in tokens {
        match token {
            Token::String(s) => {
                let offset = U256::from(head_len + tail.len());
                head.extend_from_slice(&offset.to_be_bytes::<32>());
                let bytes = s.as_bytes();
                tail.extend_from_slice(&U256::from(bytes.len()).to_be_bytes::<32>());
                tail.extend_from_slice(bytes);
                let pad = (32 - bytes.len() % 32) % 32;
                tail.extend(std::iter::repeat(0u8).take(pad));
            }
            other => head.extend_from_slice(&word_of(other)),
        }
    }

    head.extend_from_slice(&tail);
    head
}

/// Selector followed by the encoded arguments.
pub fn encode_call(selector: [u8; 4], args: &[Token]) -> Bytes {
    let mut data = selector.to_vec();
    data.extend_from_slice(&encode(args));
    Bytes::from(data)
}

pub fn create_market_call(question: &str, duration_secs: u64) -> Bytes {
    encode_call(
        CREATE_MARKET,
        &[Token::String(question.to_string()), Token::uint(duration_secs)],
    )
}

pub fn place_bet_call(market_id: u64, side: crate::chain::Side) -> Bytes {
    encode_call(
        PLACE_BET,
        &[Token::uint(market_id), Token::uint(u64::from(side.as_u8()))],
    )
}

pub fn resolve_market_call(market_id: u64) -> Bytes {
    encode_call(RESOLVE_MARKET, &[Token::uint(market_id)])
}

pub fn claim_call(market_id: u64) -> Bytes {
    encode_call(CLAIM, &[Token::uint(market_id)])
}

// ─── Decoding ───────────────────────────────────────────────────────────────

/// Word-indexed reader over ABI-encoded data. Every accessor is bounds
/// checked; garbage in gives `RpcError::Decode`, never a panic.
pub struct AbiReader<'a> {
    data: &'a [u8],
}

impl<'a> AbiReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn word_count(&self) -> usize {
        self.data.len() / 32
    }

    fn slice(&self, start: usize, len: usize) -> Result<&'a [u8], RpcError> {
        let end = start
            .checked_add(len)
            .ok_or_else(|| RpcError::Decode("offset overflow".to_string()))?;
        self.data.get(start..end).ok_or_else(|| {
            RpcError::Decode(format!(
                "need bytes {}..{}, have {}",
                start,
                end,
                self.data.len()
            ))
        })
    }

    pub fn word(&self, index: usize) -> Result<[u8; 32], RpcError> {
        let bytes = self.slice(index * 32, 32)?;
        let mut word = [0u8; 32];
        word.copy_from_slice(bytes);
        Ok(word)
    }

    pub fn uint(&self, index: usize) -> Result<U256, RpcError> {
        Ok(U256::from_be_bytes(self.word(index)?))
    }

    pub fn u64(&self, index: usize) -> Result<u64, RpcError> {
        let v = self.uint(index)?;
        u64::try_from(v).map_err(|_| RpcError::Decode(format!("word {index} overflows u64")))
    }

    pub fn u8(&self, index: usize) -> Result<u8, RpcError> {
        let v = self.uint(index)?;
        u8::try_from(v).map_err(|_| RpcError::Decode(format!("word {index} overflows u8")))
    }

    pub fn boolean(&self, index: usize) -> Result<bool, RpcError> {
        match self.u8(index)? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(RpcError::Decode(format!("word {index} is not a bool ({other})"))),
        }
    }

    pub fn address(&self, index: usize) -> Result<Address, RpcError> {
        let word = self.word(index)?;
        Ok(Address::from_slice(&word[12..]))
    }

    /// Dynamic string whose offset sits at head word `index`.
    pub fn string(&self, index: usize) -> Result<String, RpcError> {
        let offset = usize::try_from(self.uint(index)?)
            .map_err(|_| RpcError::Decode("string offset overflows usize".to_string()))?;
        let len_word = self.slice(offset, 32)?;
        let len = usize::try_from(U256::from_be_slice(len_word))
            .map_err(|_| RpcError::Decode("string length overflows usize".to_string()))?;
        let bytes = self.slice(offset + 32, len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| RpcError::Decode(format!("string is not utf-8: {e}")))
    }
}

/// Fields returned by `getMarket(uint256)`.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketTuple {
    pub question: String,
    pub creator: Address,
    pub end_time: u64,
    pub resolved: bool,
    pub winning_side: u8,
    pub total_yes: U256,
    pub total_no: U256,
    pub fee_amount: U256,
    pub distributable_pool: U256,
}

pub fn decode_market(data: &[u8]) -> Result<MarketTuple, RpcError> {
    let r = AbiReader::new(data);
    Ok(MarketTuple {
        question: r.string(0)?,
        creator: r.address(1)?,
        end_time: r.u64(2)?,
        resolved: r.boolean(3)?,
        winning_side: r.u8(4)?,
        total_yes: r.uint(5)?,
        total_no: r.uint(6)?,
        fee_amount: r.uint(7)?,
        distributable_pool: r.uint(8)?,
    })
}

/// Best-effort revert reason from `Error(string)` revert data, or from a
/// provider message of the form "execution reverted: <reason>".
pub fn decode_revert_reason(data: &[u8]) -> Option<String> {
    if data.len() >= 4 && data[..4] == ERROR_STRING_SELECTOR {
        return AbiReader::new(&data[4..]).string(0).ok();
    }
    None
}

pub fn revert_reason_from_message(message: &str) -> Option<String> {
    let lower = message.to_lowercase();
    let pos = lower.find("execution reverted")?;
    let rest = message[pos + "execution reverted".len()..]
        .trim_start_matches(':')
        .trim();
    if rest.is_empty() {
        None
    } else {
        Some(rest.to_string())
    }
}
