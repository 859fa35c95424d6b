//! Valkey (Redis-compatible) mirror for multi-process deployments.
//!
//! Data model:
//!   market:{id}              → HASH { json, synced_us, provisional }
//!   markets                  → SET of market ids
//!   bets:{id}                → LIST of JSON Bet (append-only)
//!   bet_tx:{id}              → SET of "{tx}:{user}" (dedupe guard)
//!   user_bets:{addr}         → LIST of JSON Bet
//!   claim:{id}:{addr}        → JSON Claim (SET NX)
//!   user_claims:{addr}       → SET of market ids
//!
//! Compare-and-replace and the append guards run as Lua scripts so
//! concurrent writers cannot interleave between the check and the write.

use super::{Bet, Claim, Market, MirrorError, MirrorStore, UpsertOutcome};
use alloy::primitives::Address;
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, Script};
use tracing::{debug, info, warn};

/// Returns 0 = stale, 1 = inserted, 2 = replaced.
const UPSERT_MARKET: &str = r#"
local cur = redis.call('HMGET', KEYS[1], 'synced_us', 'provisional')
if cur[1] then
  local cur_prov = cur[2] == '1'
  local inc_prov = ARGV[3] == '1'
  local inc_us = tonumber(ARGV[2])
  local cur_us = tonumber(cur[1])
  if not (cur_prov and not inc_prov) then
    if inc_us < cur_us or (inc_prov and not cur_prov and inc_us == cur_us) then
      return 0
    end
  end
  redis.call('HSET', KEYS[1], 'json', ARGV[1], 'synced_us', ARGV[2], 'provisional', ARGV[3])
  return 2
end
redis.call('HSET', KEYS[1], 'json', ARGV[1], 'synced_us', ARGV[2], 'provisional', ARGV[3])
redis.call('SADD', KEYS[2], ARGV[4])
return 1
"#;

const APPEND_BET: &str = r#"
if redis.call('SADD', KEYS[1], ARGV[1]) == 0 then
  return 0
end
redis.call('RPUSH', KEYS[2], ARGV[2])
redis.call('RPUSH', KEYS[3], ARGV[2])
return 1
"#;

const APPEND_CLAIM: &str = r#"
if redis.call('SET', KEYS[1], ARGV[1], 'NX') then
  redis.call('SADD', KEYS[2], ARGV[2])
  return 1
end
return 0
"#;

/// Namespaced key layout: "{prefix}:{suffix}".
#[derive(Debug, Clone)]
struct Keys {
    prefix: String,
}

impl Keys {
    fn key(&self, suffix: &str) -> String {
        format!("{}:{}", self.prefix, suffix)
    }

    fn market(&self, id: u64) -> String {
        self.key(&format!("market:{id}"))
    }

    fn markets(&self) -> String {
        self.key("markets")
    }

    fn bets(&self, id: u64) -> String {
        self.key(&format!("bets:{id}"))
    }

    fn bet_guard(&self, id: u64) -> String {
        self.key(&format!("bet_tx:{id}"))
    }

    fn user_bets(&self, user: Address) -> String {
        self.key(&format!("user_bets:{}", addr(user)))
    }

    fn claim(&self, id: u64, user: Address) -> String {
        self.key(&format!("claim:{id}:{}", addr(user)))
    }

    fn user_claims(&self, user: Address) -> String {
        self.key(&format!("user_claims:{}", addr(user)))
    }
}

fn addr(a: Address) -> String {
    a.to_string().to_lowercase()
}

#[derive(Clone)]
pub struct ValkeyMirror {
    conn: MultiplexedConnection,
    keys: Keys,
}

impl ValkeyMirror {
    pub async fn connect(url: &str, prefix: &str) -> Result<Self, MirrorError> {
        let client = Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        info!(prefix = prefix, "connected to Valkey mirror");
        Ok(Self {
            conn,
            keys: Keys {
                prefix: prefix.to_string(),
            },
        })
    }

    pub async fn ping(&self) -> Result<(), MirrorError> {
        let mut conn = self.conn.clone();
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        debug!(response = %pong, "Valkey ping");
        Ok(())
    }

    async fn read_json_list<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Vec<T>, MirrorError> {
        let mut conn = self.conn.clone();
        let rows: Vec<String> = conn.lrange(key, 0, -1).await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            match serde_json::from_str::<T>(&row) {
                Ok(v) => out.push(v),
                Err(e) => warn!(key = key, error = %e, "skipping unreadable mirror row"),
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl MirrorStore for ValkeyMirror {
    async fn upsert_market(&self, market: Market) -> Result<UpsertOutcome, MirrorError> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(&market)?;
        let synced_us = market.last_synced_at.timestamp_micros();
        let provisional = if market.provisional { "1" } else { "0" };

        let code: i64 = Script::new(UPSERT_MARKET)
            .key(self.keys.market(market.id))
            .key(self.keys.markets())
            .arg(json)
            .arg(synced_us)
            .arg(provisional)
            .arg(market.id)
            .invoke_async(&mut conn)
            .await?;

        let outcome = match code {
            0 => UpsertOutcome::Stale,
            1 => UpsertOutcome::Inserted,
            _ => UpsertOutcome::Replaced,
        };
        if outcome == UpsertOutcome::Stale {
            debug!(market_id = market.id, "dropping stale market write");
        }
        Ok(outcome)
    }

    async fn get_market(&self, id: u64) -> Result<Option<Market>, MirrorError> {
        let mut conn = self.conn.clone();
        let json: Option<String> = conn.hget(self.keys.market(id), "json").await?;
        match json {
            Some(j) => Ok(Some(serde_json::from_str(&j)?)),
            None => Ok(None),
        }
    }

    async fn all_markets(&self) -> Result<Vec<Market>, MirrorError> {
        let ids = self.market_ids().await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut pipe = redis::pipe();
        for id in &ids {
            pipe.hget(self.keys.market(*id), "json");
        }
        let mut conn = self.conn.clone();
        let rows: Vec<Option<String>> = pipe.query_async(&mut conn).await?;

        let mut markets = Vec::with_capacity(rows.len());
        for row in rows.into_iter().flatten() {
            match serde_json::from_str::<Market>(&row) {
                Ok(m) => markets.push(m),
                Err(e) => warn!(error = %e, "skipping unreadable market row"),
            }
        }
        Ok(markets)
    }

    async fn market_ids(&self) -> Result<Vec<u64>, MirrorError> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn.smembers(self.keys.markets()).await?;
        let mut ids: Vec<u64> = members.iter().filter_map(|s| s.parse().ok()).collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn append_bet(&self, bet: Bet) -> Result<bool, MirrorError> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(&bet)?;
        let guard = format!("{}:{}", bet.tx_hash, addr(bet.user));

        let added: i64 = Script::new(APPEND_BET)
            .key(self.keys.bet_guard(bet.market_id))
            .key(self.keys.bets(bet.market_id))
            .key(self.keys.user_bets(bet.user))
            .arg(guard)
            .arg(json)
            .invoke_async(&mut conn)
            .await?;
        Ok(added == 1)
    }

    async fn bets_for_market(&self, market_id: u64) -> Result<Vec<Bet>, MirrorError> {
        self.read_json_list(&self.keys.bets(market_id)).await
    }

    async fn bets_for_user(&self, user: Address) -> Result<Vec<Bet>, MirrorError> {
        let mut bets: Vec<Bet> = self.read_json_list(&self.keys.user_bets(user)).await?;
        bets.sort_by_key(|b| (b.market_id, b.created_at));
        Ok(bets)
    }

    async fn append_claim(&self, claim: Claim) -> Result<bool, MirrorError> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(&claim)?;
        let added: i64 = Script::new(APPEND_CLAIM)
            .key(self.keys.claim(claim.market_id, claim.user))
            .key(self.keys.user_claims(claim.user))
            .arg(json)
            .arg(claim.market_id)
            .invoke_async(&mut conn)
            .await?;
        Ok(added == 1)
    }

    async fn has_claim(&self, market_id: u64, user: Address) -> Result<bool, MirrorError> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(self.keys.claim(market_id, user)).await?;
        Ok(exists)
    }

    async fn claims_for_user(&self, user: Address) -> Result<Vec<Claim>, MirrorError> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn.smembers(self.keys.user_claims(user)).await?;
        let mut ids: Vec<u64> = members.iter().filter_map(|s| s.parse().ok()).collect();
        ids.sort_unstable();

        let mut claims = Vec::with_capacity(ids.len());
        for id in ids {
            let json: Option<String> = conn.get(self.keys.claim(id, user)).await?;
            if let Some(j) = json {
                claims.push(serde_json::from_str(&j)?);
            }
        }
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout_is_namespaced() {
        let keys = Keys {
            prefix: "ledgersync".to_string(),
        };
        let user: Address = "0x00000000000000000000000000000000000000AB".parse().unwrap();

        assert_eq!(keys.market(7), "ledgersync:market:7");
        assert_eq!(keys.markets(), "ledgersync:markets");
        assert_eq!(keys.bets(7), "ledgersync:bets:7");
        assert_eq!(
            keys.claim(7, user),
            "ledgersync:claim:7:0x00000000000000000000000000000000000000ab"
        );
        assert_eq!(
            keys.user_bets(user),
            "ledgersync:user_bets:0x00000000000000000000000000000000000000ab"
        );
    }
}
