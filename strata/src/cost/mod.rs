//! Real-time cost accounting over the KV adapter.
//!
//! Every tracked spend increments three counters (per-user, per-tier, and
//! the global total) in one transaction, so concurrent callers never lose
//! updates. Keys auto-expire at period end; the TTL is set once per key
//! (expire-NX) inside the same transaction.
//!
//! Key shapes: `cost:<period>:user:<uid>`, `cost:<period>:tier:<n>`,
//! `cost:<period>:total`, plus `cost:<period>:users` (approximate distinct
//! spender count).

pub mod alerts;

pub use alerts::{AlertCallback, AlertManager};

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::kv::{KvError, KvOp, KvStore};
use crate::tier::Tier;

/// Named spend window with a fixed TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Daily,
    Weekly,
    Monthly,
}

impl Period {
    pub fn ttl(self) -> Duration {
        match self {
            Period::Daily => Duration::from_secs(86_400),
            Period::Weekly => Duration::from_secs(604_800),
            Period::Monthly => Duration::from_secs(2_592_000),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Period::Daily => "daily",
            Period::Weekly => "weekly",
            Period::Monthly => "monthly",
        }
    }
}

impl FromStr for Period {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "daily" => Ok(Period::Daily),
            "weekly" => Ok(Period::Weekly),
            "monthly" => Ok(Period::Monthly),
            other => Err(format!("invalid period: {} (use daily, weekly, or monthly)", other)),
        }
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cost-tracking failure.
#[derive(Debug, Error)]
pub enum CostError {
    #[error("cost must be non-negative, got {0}")]
    NegativeCost(f64),

    #[error(transparent)]
    Kv(#[from] KvError),
}

fn user_key(period: Period, user_id: &str) -> String {
    format!("cost:{}:user:{}", period, user_id)
}

fn tier_key(period: Period, tier: Tier) -> String {
    format!("cost:{}:tier:{}", period, tier.as_u8())
}

fn total_key(period: Period) -> String {
    format!("cost:{}:total", period)
}

fn users_key(period: Period) -> String {
    format!("cost:{}:users", period)
}

/// Atomic per-(user, tier, period) cost counters.
///
/// Tier validity is enforced by the [`Tier`] type; costs must be ≥ 0.
#[derive(Clone)]
pub struct CostTracker {
    kv: Arc<dyn KvStore>,
}

impl CostTracker {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Tracks a spend and returns the user's new period total.
    pub async fn track_cost(
        &self,
        user_id: &str,
        tier: Tier,
        cost: f64,
        period: Period,
    ) -> Result<f64, CostError> {
        if cost < 0.0 {
            return Err(CostError::NegativeCost(cost));
        }
        let ttl = period.ttl();
        let user = user_key(period, user_id);
        let replies = self
            .kv
            .exec(vec![
                KvOp::IncrByFloat { key: user.clone(), by: cost },
                KvOp::IncrByFloat { key: tier_key(period, tier), by: cost },
                KvOp::IncrByFloat { key: total_key(period), by: cost },
                KvOp::Expire { key: user.clone(), ttl, nx: true },
                KvOp::Expire { key: tier_key(period, tier), ttl, nx: true },
                KvOp::Expire { key: total_key(period), ttl, nx: true },
                KvOp::Pfadd { key: users_key(period), member: user_id.to_string() },
                KvOp::Expire { key: users_key(period), ttl, nx: true },
            ])
            .await?;
        let new_total = replies.first().and_then(|r| r.as_float()).unwrap_or(cost);
        debug!(
            user = user_id,
            tier = %tier,
            period = %period,
            cost,
            new_total,
            "tracked cost"
        );
        Ok(new_total)
    }

    /// The user's spend in a period (0 when untracked).
    pub async fn total_for_user(&self, user_id: &str, period: Period) -> Result<f64, CostError> {
        Ok(parse_float(self.kv.get(&user_key(period, user_id)).await?))
    }

    /// Spend per tier for a period; only tiers with spend appear.
    pub async fn by_tier(&self, period: Period) -> Result<BTreeMap<u8, f64>, CostError> {
        let pattern = format!("cost:{}:tier:*", period);
        let (_, keys) = self.kv.scan(0, &pattern, 100).await?;
        let mut out = BTreeMap::new();
        for key in keys {
            let Some(tier) = key.rsplit(':').next().and_then(|t| t.parse::<u8>().ok()) else {
                continue;
            };
            out.insert(tier, parse_float(self.kv.get(&key).await?));
        }
        Ok(out)
    }

    /// Total spend across all users and tiers.
    pub async fn global_total(&self, period: Period) -> Result<f64, CostError> {
        Ok(parse_float(self.kv.get(&total_key(period)).await?))
    }

    /// Approximate number of distinct spenders in the period.
    pub async fn unique_spenders(&self, period: Period) -> Result<u64, CostError> {
        Ok(self.kv.pfcount(&users_key(period)).await?)
    }

    /// Top `limit` spenders, highest first (scan + sort).
    pub async fn top_spenders(
        &self,
        period: Period,
        limit: usize,
    ) -> Result<Vec<(String, f64)>, CostError> {
        let pattern = format!("cost:{}:user:*", period);
        let prefix = format!("cost:{}:user:", period);
        let (_, keys) = self.kv.scan(0, &pattern, 100).await?;
        let mut spenders = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(user_id) = key.strip_prefix(&prefix) else { continue };
            spenders.push((user_id.to_string(), parse_float(self.kv.get(&key).await?)));
        }
        spenders.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        spenders.truncate(limit);
        Ok(spenders)
    }

    /// Admin reset: deletes the user's spend key for the period.
    pub async fn reset_user(&self, user_id: &str, period: Period) -> Result<(), CostError> {
        self.kv.del(&user_key(period, user_id)).await?;
        info!(user = user_id, period = %period, "reset user cost");
        Ok(())
    }
}

fn parse_float(value: Option<String>) -> f64 {
    value.and_then(|v| v.parse().ok()).unwrap_or(0.0)
}
