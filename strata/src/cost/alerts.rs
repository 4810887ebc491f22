//! Budget utilization alerts at 80/90/95 %.
//!
//! Idempotence rides on the KV store: the flag
//! `alert:<period>:<uid>:<pct>` is written with set-NX and the period's
//! TTL, so a threshold fires its callback at most once per period even
//! under concurrent deductions.

use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::info;

use super::Period;
use crate::kv::{KvError, KvStore};

/// Invoked once per (user, period, threshold) crossing with
/// `(user_id, utilization, period)`.
pub type AlertCallback =
    Arc<dyn Fn(String, f64, Period) -> BoxFuture<'static, ()> + Send + Sync>;

/// Wraps an async closure into an [`AlertCallback`].
pub fn alert_callback<F, Fut>(f: F) -> AlertCallback
where
    F: Fn(String, f64, Period) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    Arc::new(move |user, utilization, period| Box::pin(f(user, utilization, period)))
}

/// Threshold-crossing alert manager.
#[derive(Clone)]
pub struct AlertManager {
    kv: Arc<dyn KvStore>,
    callback: Option<AlertCallback>,
    thresholds: Vec<f64>,
}

impl AlertManager {
    pub const DEFAULT_THRESHOLDS: [f64; 3] = [0.80, 0.90, 0.95];

    pub fn new(kv: Arc<dyn KvStore>, callback: Option<AlertCallback>) -> Self {
        Self { kv, callback, thresholds: Self::DEFAULT_THRESHOLDS.to_vec() }
    }

    pub fn with_thresholds(mut self, thresholds: Vec<f64>) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Checks the crossed thresholds and fires the callback for each one
    /// whose idempotence flag was newly set. No-op when no limit is set.
    pub async fn check_and_alert(
        &self,
        user_id: &str,
        current_spend: f64,
        budget_limit: f64,
        period: Period,
    ) -> Result<(), KvError> {
        if budget_limit <= 0.0 {
            return Ok(());
        }
        let utilization = current_spend / budget_limit;

        for &threshold in &self.thresholds {
            if utilization < threshold {
                continue;
            }
            let key = format!("alert:{}:{}:{}", period, user_id, (threshold * 100.0) as u32);
            let newly_set = self.kv.set(&key, "1", Some(period.ttl()), true).await?;
            if newly_set {
                if let Some(callback) = &self.callback {
                    callback(user_id.to_string(), utilization, period).await;
                }
                info!(
                    user = user_id,
                    period = %period,
                    threshold = threshold,
                    utilization = utilization,
                    "budget alert fired"
                );
            }
        }
        Ok(())
    }
}
