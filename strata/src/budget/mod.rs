//! Hard budget enforcement with optimistic concurrency.
//!
//! A deduction reads the current spend and limit under a watch on the
//! spend key, rejects when the limit would be violated, and commits the
//! increment only if no concurrent writer touched the key; a conflicted
//! commit retries the whole loop. Per (user, period) the effect is
//! linearizable: the sum of successful deductions never exceeds the limit,
//! and a rejected deduction mutates nothing.
//!
//! Keys: spend at `budget:<uid>:<period>`, limit at
//! `budget:<uid>:<period>:limit`, both carrying the period's TTL.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, trace};

use crate::cost::{AlertManager, Period};
use crate::kv::{KvError, KvOp, KvStore};

/// Budget failure surfaced to callers.
#[derive(Debug, Error)]
pub enum BudgetError {
    #[error("budget exceeded: ${current:.4} + ${cost:.4} > ${limit:.4}")]
    Exceeded { current: f64, cost: f64, limit: f64 },

    #[error("budget limit must be positive, got {0}")]
    InvalidLimit(f64),

    #[error(transparent)]
    Kv(#[from] KvError),
}

/// Spend/limit snapshot for one (user, period).
#[derive(Debug, Clone, Serialize)]
pub struct BudgetStatus {
    pub current_spend: f64,
    pub limit: f64,
    pub remaining: f64,
    /// Percent of the limit consumed; 0 when no limit is set.
    pub utilization_pct: f64,
}

/// Hard budget limits over the KV adapter, with optional threshold alerts
/// fired after successful deductions.
#[derive(Clone)]
pub struct BudgetEnforcer {
    kv: Arc<dyn KvStore>,
    alerts: Option<AlertManager>,
}

fn spend_key(user_id: &str, period: Period) -> String {
    format!("budget:{}:{}", user_id, period)
}

fn limit_key(user_id: &str, period: Period) -> String {
    format!("budget:{}:{}:limit", user_id, period)
}

impl BudgetEnforcer {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv, alerts: None }
    }

    /// Fire 80/90/95 % utilization alerts through `alerts` after deductions.
    pub fn with_alerts(mut self, alerts: AlertManager) -> Self {
        self.alerts = Some(alerts);
        self
    }

    /// Creates (or resets) a budget: spend 0, the given limit, both with
    /// the period's TTL. The limit must be positive.
    pub async fn create_budget(
        &self,
        user_id: &str,
        period: Period,
        limit: f64,
    ) -> Result<(), BudgetError> {
        if limit <= 0.0 {
            return Err(BudgetError::InvalidLimit(limit));
        }
        let ttl = Some(period.ttl());
        self.kv
            .exec(vec![
                KvOp::Set { key: spend_key(user_id, period), value: "0".into(), ttl, nx: false },
                KvOp::Set {
                    key: limit_key(user_id, period),
                    value: format!("{}", limit),
                    ttl,
                    nx: false,
                },
            ])
            .await?;
        info!(user = user_id, period = %period, limit, "created budget");
        Ok(())
    }

    /// Whether `cost` fits: true iff no limit is set or
    /// `current + cost <= limit`. Read-only and therefore racy; use
    /// [`BudgetEnforcer::deduct_budget`] to actually spend.
    pub async fn check_budget(
        &self,
        user_id: &str,
        period: Period,
        cost: f64,
    ) -> Result<bool, BudgetError> {
        let current = self.read_float(&spend_key(user_id, period)).await?;
        let limit = self.read_float(&limit_key(user_id, period)).await?;
        Ok(limit == 0.0 || current + cost <= limit)
    }

    /// Atomically deducts `cost`, failing with [`BudgetError::Exceeded`]
    /// (and no mutation) when the hard limit would be violated. Retries on
    /// optimistic conflicts until the commit lands or the limit rejects it.
    pub async fn deduct_budget(
        &self,
        user_id: &str,
        period: Period,
        cost: f64,
    ) -> Result<(), BudgetError> {
        let spend = spend_key(user_id, period);
        let limit_k = limit_key(user_id, period);

        let (new_spend, limit) = loop {
            let version = self.kv.version(&spend).await?;
            let current = self.read_float(&spend).await?;
            let limit = self.read_float(&limit_k).await?;

            if limit > 0.0 && current + cost > limit {
                debug!(user = user_id, period = %period, current, cost, limit, "budget denied");
                return Err(BudgetError::Exceeded { current, cost, limit });
            }

            let committed = self
                .kv
                .exec_if_unchanged(
                    &[(spend.clone(), version)],
                    vec![KvOp::IncrByFloat { key: spend.clone(), by: cost }],
                )
                .await?;
            match committed {
                Some(_) => break (current + cost, limit),
                None => {
                    trace!(user = user_id, period = %period, "deduct conflicted, retrying");
                    continue;
                }
            }
        };
        debug!(user = user_id, period = %period, cost, new_spend, "deducted budget");

        if let Some(alerts) = &self.alerts {
            alerts.check_and_alert(user_id, new_spend, limit, period).await?;
        }
        Ok(())
    }

    /// Spend/limit snapshot.
    pub async fn status(&self, user_id: &str, period: Period) -> Result<BudgetStatus, BudgetError> {
        let current = self.read_float(&spend_key(user_id, period)).await?;
        let limit = self.read_float(&limit_key(user_id, period)).await?;
        Ok(BudgetStatus {
            current_spend: current,
            limit,
            remaining: (limit - current).max(0.0),
            utilization_pct: if limit > 0.0 { current / limit * 100.0 } else { 0.0 },
        })
    }

    async fn read_float(&self, key: &str) -> Result<f64, KvError> {
        Ok(self.kv.get(key).await?.and_then(|v| v.parse().ok()).unwrap_or(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;

    fn enforcer() -> BudgetEnforcer {
        BudgetEnforcer::new(Arc::new(MemoryKv::new()))
    }

    #[tokio::test]
    async fn create_requires_positive_limit() {
        let e = enforcer();
        assert!(matches!(
            e.create_budget("u", Period::Daily, 0.0).await,
            Err(BudgetError::InvalidLimit(_))
        ));
        e.create_budget("u", Period::Daily, 5.0).await.unwrap();
        let status = e.status("u", Period::Daily).await.unwrap();
        assert_eq!(status.limit, 5.0);
        assert_eq!(status.current_spend, 0.0);
    }

    #[tokio::test]
    async fn check_budget_no_limit_is_unbounded() {
        let e = enforcer();
        assert!(e.check_budget("ghost", Period::Daily, 1e9).await.unwrap());
    }

    #[tokio::test]
    async fn deduct_up_to_but_not_past_limit() {
        let e = enforcer();
        e.create_budget("u", Period::Daily, 1.0).await.unwrap();
        e.deduct_budget("u", Period::Daily, 0.6).await.unwrap();
        e.deduct_budget("u", Period::Daily, 0.4).await.unwrap();

        let err = e.deduct_budget("u", Period::Daily, 0.01).await.unwrap_err();
        assert!(matches!(err, BudgetError::Exceeded { .. }));
        // Rejected deduction left spend unchanged.
        let status = e.status("u", Period::Daily).await.unwrap();
        assert!((status.current_spend - 1.0).abs() < 1e-9);
        assert_eq!(status.remaining, 0.0);
    }

    #[tokio::test]
    async fn concurrent_deductions_never_exceed_limit() {
        let e = enforcer();
        e.create_budget("u", Period::Daily, 1.0).await.unwrap();

        let mut handles = Vec::new();
        // 1/64 is exactly representable, so the arithmetic is exact.
        for _ in 0..100 {
            let e = e.clone();
            handles.push(tokio::spawn(async move {
                e.deduct_budget("u", Period::Daily, 0.015625).await.is_ok()
            }));
        }
        let mut ok = 0;
        for h in handles {
            if h.await.unwrap() {
                ok += 1;
            }
        }
        assert_eq!(ok, 64);
        let status = e.status("u", Period::Daily).await.unwrap();
        assert!((status.current_spend - 1.0).abs() < 1e-6);
    }
}
