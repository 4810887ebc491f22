//! A/B experiments over workflow versions: weighted sticky assignment,
//! per-variant metrics, and a two-proportion z-test winner check.
//!
//! Assignment is deterministic-sticky: a user's first assignment is
//! weighted-random, stored with a long TTL, and returned unchanged on
//! every later call within that TTL. Metrics accumulate in a KV hash per
//! (experiment, variant); derived rates are computed on read.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::info;

use super::{versioning::WorkflowVersionManager, WorkflowError};
use crate::kv::KvStore;

const EXPERIMENT_TTL: Duration = Duration::from_secs(86_400 * 90);
const ASSIGNMENT_TTL: Duration = Duration::from_secs(86_400 * 30);

/// Experiment lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentStatus {
    Draft,
    Running,
    Paused,
    Completed,
    Cancelled,
}

impl ExperimentStatus {
    fn as_str(self) -> &'static str {
        match self {
            ExperimentStatus::Draft => "draft",
            ExperimentStatus::Running => "running",
            ExperimentStatus::Paused => "paused",
            ExperimentStatus::Completed => "completed",
            ExperimentStatus::Cancelled => "cancelled",
        }
    }
}

/// One arm of an experiment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variant {
    pub variant_id: String,
    pub workflow_version: String,
    /// Fraction of traffic in [0, 1]; weights across variants sum to 1.
    pub traffic_weight: f64,
    #[serde(default)]
    pub description: String,
}

/// Accumulated counters plus derived rates for one variant.
#[derive(Debug, Clone, Default, Serialize)]
pub struct VariantMetrics {
    pub variant_id: String,
    pub impressions: u64,
    pub successes: u64,
    pub failures: u64,
    pub total_latency: f64,
    pub total_cost: f64,
    pub conversion_rate: f64,
    pub avg_latency: f64,
    pub avg_cost: f64,
}

impl VariantMetrics {
    fn derive_rates(&mut self) {
        if self.impressions > 0 {
            let n = self.impressions as f64;
            self.conversion_rate = self.successes as f64 / n;
            self.avg_latency = self.total_latency / n;
            self.avg_cost = self.total_cost / n;
        }
    }
}

/// A stored experiment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    pub experiment_id: String,
    pub workflow_id: String,
    pub name: String,
    pub description: String,
    pub variants: Vec<Variant>,
    pub status: ExperimentStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner_variant_id: Option<String>,
    /// Minimum impressions per variant before a winner check runs.
    pub min_sample_size: u64,
    /// Statistical confidence in (0, 1); winner requires
    /// `p < 1 - confidence_level`.
    pub confidence_level: f64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

/// Result of a two-proportion z-test between the two leading variants.
#[derive(Debug, Clone, Serialize)]
pub struct StatisticalTest {
    pub variant_a: String,
    pub variant_b: String,
    pub significant: bool,
    pub confidence_level: f64,
    pub p_value: f64,
    pub z_score: f64,
    /// Set only when the difference is significant.
    pub winner: Option<String>,
}

fn experiment_key(experiment_id: &str) -> String {
    format!("ab:experiment:{}", experiment_id)
}

fn metrics_key(experiment_id: &str, variant_id: &str) -> String {
    format!("ab:metrics:{}:{}", experiment_id, variant_id)
}

fn assignment_key(experiment_id: &str, user_id: &str) -> String {
    format!("ab:assignment:{}:{}", experiment_id, user_id)
}

fn experiments_key(workflow_id: &str) -> String {
    format!("ab:experiments:{}", workflow_id)
}

/// Experiment manager over the KV adapter and the version store.
#[derive(Clone)]
pub struct AbTestManager {
    kv: Arc<dyn KvStore>,
    versions: WorkflowVersionManager,
}

impl AbTestManager {
    pub fn new(kv: Arc<dyn KvStore>, versions: WorkflowVersionManager) -> Self {
        Self { kv, versions }
    }

    /// Creates a draft experiment. Requires ≥ 2 variants, weights summing
    /// to 1 (± 0.01), and every referenced workflow version to exist.
    pub async fn create_experiment(
        &self,
        workflow_id: &str,
        name: &str,
        description: &str,
        variants: Vec<Variant>,
        min_sample_size: u64,
        confidence_level: f64,
    ) -> Result<Experiment, WorkflowError> {
        if variants.len() < 2 {
            return Err(WorkflowError::InvalidExperiment("at least 2 variants required".into()));
        }
        let total_weight: f64 = variants.iter().map(|v| v.traffic_weight).sum();
        if !(0.99..=1.01).contains(&total_weight) {
            return Err(WorkflowError::InvalidExperiment(format!(
                "traffic weights must sum to 1.0, got {}",
                total_weight
            )));
        }
        for variant in &variants {
            if self.versions.get_version(workflow_id, &variant.workflow_version).await?.is_none() {
                return Err(WorkflowError::VersionNotFound {
                    workflow_id: workflow_id.to_string(),
                    version: variant.workflow_version.clone(),
                });
            }
        }

        let created_at = Utc::now();
        let digest =
            Sha256::digest(format!("{}:{}:{}", workflow_id, name, created_at.to_rfc3339()));
        let experiment_id: String =
            digest.iter().take(8).map(|byte| format!("{:02x}", byte)).collect();

        let experiment = Experiment {
            experiment_id: experiment_id.clone(),
            workflow_id: workflow_id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            variants,
            status: ExperimentStatus::Draft,
            created_at,
            started_at: None,
            completed_at: None,
            winner_variant_id: None,
            min_sample_size,
            confidence_level,
            metadata: BTreeMap::new(),
        };
        self.store(&experiment).await?;
        self.kv.sadd(&experiments_key(workflow_id), &experiment_id).await?;
        info!(
            experiment = %experiment_id,
            workflow = workflow_id,
            variants = experiment.variants.len(),
            "created experiment"
        );
        Ok(experiment)
    }

    pub async fn get_experiment(
        &self,
        experiment_id: &str,
    ) -> Result<Option<Experiment>, WorkflowError> {
        let Some(raw) = self.kv.get(&experiment_key(experiment_id)).await? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }

    /// Experiments attached to a workflow, optionally filtered by status.
    pub async fn list_experiments(
        &self,
        workflow_id: &str,
        status: Option<ExperimentStatus>,
    ) -> Result<Vec<Experiment>, WorkflowError> {
        let ids = self.kv.smembers(&experiments_key(workflow_id)).await?;
        let mut experiments = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(experiment) = self.get_experiment(&id).await? {
                if status.is_none() || status == Some(experiment.status) {
                    experiments.push(experiment);
                }
            }
        }
        experiments.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(experiments)
    }

    pub async fn start_experiment(&self, experiment_id: &str) -> Result<(), WorkflowError> {
        let mut experiment = self.require(experiment_id).await?;
        self.expect_status(&experiment, ExperimentStatus::Draft)?;
        experiment.status = ExperimentStatus::Running;
        experiment.started_at = Some(Utc::now());
        self.store(&experiment).await?;
        info!(experiment = %experiment_id, "started experiment");
        Ok(())
    }

    pub async fn pause_experiment(&self, experiment_id: &str) -> Result<(), WorkflowError> {
        let mut experiment = self.require(experiment_id).await?;
        self.expect_status(&experiment, ExperimentStatus::Running)?;
        experiment.status = ExperimentStatus::Paused;
        self.store(&experiment).await?;
        Ok(())
    }

    pub async fn cancel_experiment(&self, experiment_id: &str) -> Result<(), WorkflowError> {
        let mut experiment = self.require(experiment_id).await?;
        experiment.status = ExperimentStatus::Cancelled;
        experiment.completed_at = Some(Utc::now());
        self.store(&experiment).await?;
        info!(experiment = %experiment_id, "cancelled experiment");
        Ok(())
    }

    /// Assigns a variant to `user_id`. Sticky: the stored assignment wins
    /// for its TTL; fresh users get a weighted random draw.
    pub async fn assign_variant(
        &self,
        experiment_id: &str,
        user_id: &str,
    ) -> Result<Variant, WorkflowError> {
        let experiment = self.require(experiment_id).await?;
        self.expect_status(&experiment, ExperimentStatus::Running)?;

        let key = assignment_key(experiment_id, user_id);
        if let Some(existing) = self.kv.get(&key).await? {
            if let Some(variant) =
                experiment.variants.iter().find(|v| v.variant_id == existing)
            {
                return Ok(variant.clone());
            }
        }

        let variant = weighted_choice(&experiment.variants).clone();
        self.kv.set(&key, &variant.variant_id, Some(ASSIGNMENT_TTL), false).await?;
        Ok(variant)
    }

    pub async fn record_impression(
        &self,
        experiment_id: &str,
        variant_id: &str,
    ) -> Result<(), WorkflowError> {
        self.kv.hincrby(&metrics_key(experiment_id, variant_id), "impressions", 1).await?;
        Ok(())
    }

    pub async fn record_success(
        &self,
        experiment_id: &str,
        variant_id: &str,
        latency: f64,
        cost: f64,
    ) -> Result<(), WorkflowError> {
        let key = metrics_key(experiment_id, variant_id);
        self.kv.hincrby(&key, "successes", 1).await?;
        self.kv.hincrbyfloat(&key, "total_latency", latency).await?;
        self.kv.hincrbyfloat(&key, "total_cost", cost).await?;
        Ok(())
    }

    pub async fn record_failure(
        &self,
        experiment_id: &str,
        variant_id: &str,
    ) -> Result<(), WorkflowError> {
        self.kv.hincrby(&metrics_key(experiment_id, variant_id), "failures", 1).await?;
        Ok(())
    }

    /// Metrics for every variant, with derived rates.
    pub async fn metrics(
        &self,
        experiment_id: &str,
    ) -> Result<BTreeMap<String, VariantMetrics>, WorkflowError> {
        let experiment = self.require(experiment_id).await?;
        let mut out = BTreeMap::new();
        for variant in &experiment.variants {
            let raw = self.kv.hgetall(&metrics_key(experiment_id, &variant.variant_id)).await?;
            let mut metrics = VariantMetrics {
                variant_id: variant.variant_id.clone(),
                impressions: read_u64(&raw, "impressions"),
                successes: read_u64(&raw, "successes"),
                failures: read_u64(&raw, "failures"),
                total_latency: read_f64(&raw, "total_latency"),
                total_cost: read_f64(&raw, "total_cost"),
                ..VariantMetrics::default()
            };
            metrics.derive_rates();
            out.insert(variant.variant_id.clone(), metrics);
        }
        Ok(out)
    }

    /// Two-proportion z-test over conversion rate between the two leading
    /// variants. `None` until every variant has `min_sample_size`
    /// impressions.
    pub async fn check_winner(
        &self,
        experiment_id: &str,
    ) -> Result<Option<StatisticalTest>, WorkflowError> {
        let experiment = self.require(experiment_id).await?;
        let metrics = self.metrics(experiment_id).await?;

        for (variant_id, variant_metrics) in &metrics {
            if variant_metrics.impressions < experiment.min_sample_size {
                info!(
                    experiment = %experiment_id,
                    variant = %variant_id,
                    impressions = variant_metrics.impressions,
                    needed = experiment.min_sample_size,
                    "below minimum sample size"
                );
                return Ok(None);
            }
        }

        // Compare the two variants with the highest conversion rates.
        let mut ranked: Vec<&VariantMetrics> = metrics.values().collect();
        ranked.sort_by(|a, b| {
            b.conversion_rate
                .partial_cmp(&a.conversion_rate)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let (a, b) = (ranked[0], ranked[1]);

        let (z_score, p_value) =
            two_proportion_z_test(a.successes, a.impressions, b.successes, b.impressions);
        let significant = p_value < (1.0 - experiment.confidence_level);
        let test = StatisticalTest {
            variant_a: a.variant_id.clone(),
            variant_b: b.variant_id.clone(),
            significant,
            confidence_level: experiment.confidence_level,
            p_value,
            z_score,
            winner: significant.then(|| a.variant_id.clone()),
        };
        info!(
            experiment = %experiment_id,
            p_value,
            winner = ?test.winner,
            "winner check"
        );
        Ok(Some(test))
    }

    /// Promotes the winning variant's version to active and completes the
    /// experiment. With `winner_variant_id = None` the statistical check
    /// must name a significant winner.
    pub async fn promote_winner(
        &self,
        experiment_id: &str,
        winner_variant_id: Option<&str>,
    ) -> Result<String, WorkflowError> {
        let mut experiment = self.require(experiment_id).await?;

        let winner_id = match winner_variant_id {
            Some(id) => id.to_string(),
            None => self
                .check_winner(experiment_id)
                .await?
                .and_then(|test| test.winner)
                .ok_or_else(|| WorkflowError::NoWinner(experiment_id.to_string()))?,
        };
        let winner = experiment
            .variants
            .iter()
            .find(|v| v.variant_id == winner_id)
            .cloned()
            .ok_or_else(|| {
                WorkflowError::InvalidExperiment(format!("unknown variant: {}", winner_id))
            })?;

        self.versions.set_active(&experiment.workflow_id, &winner.workflow_version).await?;

        experiment.status = ExperimentStatus::Completed;
        experiment.completed_at = Some(Utc::now());
        experiment.winner_variant_id = Some(winner_id.clone());
        self.store(&experiment).await?;
        info!(
            experiment = %experiment_id,
            winner = %winner_id,
            version = %winner.workflow_version,
            "promoted winner"
        );
        Ok(winner.workflow_version)
    }

    async fn require(&self, experiment_id: &str) -> Result<Experiment, WorkflowError> {
        self.get_experiment(experiment_id)
            .await?
            .ok_or_else(|| WorkflowError::ExperimentNotFound(experiment_id.to_string()))
    }

    fn expect_status(
        &self,
        experiment: &Experiment,
        expected: ExperimentStatus,
    ) -> Result<(), WorkflowError> {
        if experiment.status != expected {
            return Err(WorkflowError::WrongExperimentState {
                experiment_id: experiment.experiment_id.clone(),
                expected: expected.as_str().to_string(),
                actual: experiment.status.as_str().to_string(),
            });
        }
        Ok(())
    }

    async fn store(&self, experiment: &Experiment) -> Result<(), WorkflowError> {
        let raw = serde_json::to_string(experiment)?;
        self.kv
            .set(&experiment_key(&experiment.experiment_id), &raw, Some(EXPERIMENT_TTL), false)
            .await?;
        Ok(())
    }
}

fn read_u64(raw: &BTreeMap<String, String>, field: &str) -> u64 {
    raw.get(field).and_then(|v| v.parse().ok()).unwrap_or(0)
}

fn read_f64(raw: &BTreeMap<String, String>, field: &str) -> f64 {
    raw.get(field).and_then(|v| v.parse().ok()).unwrap_or(0.0)
}

/// Weighted random draw over variants (weights sum to ~1).
fn weighted_choice(variants: &[Variant]) -> &Variant {
    let roll: f64 = rand::thread_rng().gen();
    let mut cumulative = 0.0;
    for variant in variants {
        cumulative += variant.traffic_weight;
        if roll < cumulative {
            return variant;
        }
    }
    // Float rounding can leave the roll past the final boundary.
    &variants[variants.len() - 1]
}

/// Two-proportion z-test; returns `(z, p_value)` for the two-sided test.
fn two_proportion_z_test(s1: u64, n1: u64, s2: u64, n2: u64) -> (f64, f64) {
    if n1 == 0 || n2 == 0 {
        return (0.0, 1.0);
    }
    let p1 = s1 as f64 / n1 as f64;
    let p2 = s2 as f64 / n2 as f64;
    let pooled = (s1 + s2) as f64 / (n1 + n2) as f64;
    let se = (pooled * (1.0 - pooled) * (1.0 / n1 as f64 + 1.0 / n2 as f64)).sqrt();
    if se == 0.0 {
        return (0.0, 1.0);
    }
    let z = (p1 - p2) / se;
    let p_value = 2.0 * (1.0 - normal_cdf(z.abs()));
    (z, p_value.clamp(0.0, 1.0))
}

/// Standard normal CDF via the Abramowitz–Stegun erf approximation
/// (formula 7.1.26, |error| < 1.5e-7).
fn normal_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf(x / std::f64::consts::SQRT_2))
}

fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();

    const A1: f64 = 0.254829592;
    const A2: f64 = -0.284496736;
    const A3: f64 = 1.421413741;
    const A4: f64 = -1.453152027;
    const A5: f64 = 1.061405429;
    const P: f64 = 0.3275911;

    let t = 1.0 / (1.0 + P * x);
    let y = 1.0 - (((((A5 * t + A4) * t) + A3) * t + A2) * t + A1) * t * (-x * x).exp();
    sign * y
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;
    use serde_json::json;

    async fn setup() -> (AbTestManager, String) {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let versions = WorkflowVersionManager::new(kv.clone());
        versions
            .create_version("wf", "1.0.0", json!({"v": 1}), "a", "one", None, true)
            .await
            .unwrap();
        versions
            .create_version("wf", "1.1.0", json!({"v": 2}), "a", "two", None, false)
            .await
            .unwrap();
        let manager = AbTestManager::new(kv, versions);
        let experiment = manager
            .create_experiment(
                "wf",
                "model comparison",
                "compare versions",
                vec![
                    Variant {
                        variant_id: "control".into(),
                        workflow_version: "1.0.0".into(),
                        traffic_weight: 0.5,
                        description: String::new(),
                    },
                    Variant {
                        variant_id: "test".into(),
                        workflow_version: "1.1.0".into(),
                        traffic_weight: 0.5,
                        description: String::new(),
                    },
                ],
                10,
                0.95,
            )
            .await
            .unwrap();
        (manager, experiment.experiment_id)
    }

    #[tokio::test]
    async fn create_validates_variants_and_weights() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let versions = WorkflowVersionManager::new(kv.clone());
        versions.create_version("wf", "1.0.0", json!({}), "a", "c", None, true).await.unwrap();
        let manager = AbTestManager::new(kv, versions);

        let one = manager
            .create_experiment(
                "wf",
                "x",
                "",
                vec![Variant {
                    variant_id: "only".into(),
                    workflow_version: "1.0.0".into(),
                    traffic_weight: 1.0,
                    description: String::new(),
                }],
                10,
                0.95,
            )
            .await;
        assert!(matches!(one, Err(WorkflowError::InvalidExperiment(_))));

        let bad_weights = manager
            .create_experiment(
                "wf",
                "x",
                "",
                vec![
                    Variant {
                        variant_id: "a".into(),
                        workflow_version: "1.0.0".into(),
                        traffic_weight: 0.5,
                        description: String::new(),
                    },
                    Variant {
                        variant_id: "b".into(),
                        workflow_version: "1.0.0".into(),
                        traffic_weight: 0.2,
                        description: String::new(),
                    },
                ],
                10,
                0.95,
            )
            .await;
        assert!(matches!(bad_weights, Err(WorkflowError::InvalidExperiment(_))));

        let missing_version = manager
            .create_experiment(
                "wf",
                "x",
                "",
                vec![
                    Variant {
                        variant_id: "a".into(),
                        workflow_version: "1.0.0".into(),
                        traffic_weight: 0.5,
                        description: String::new(),
                    },
                    Variant {
                        variant_id: "b".into(),
                        workflow_version: "9.9.9".into(),
                        traffic_weight: 0.5,
                        description: String::new(),
                    },
                ],
                10,
                0.95,
            )
            .await;
        assert!(matches!(missing_version, Err(WorkflowError::VersionNotFound { .. })));
    }

    #[tokio::test]
    async fn assignment_is_sticky() {
        let (manager, id) = setup().await;
        manager.start_experiment(&id).await.unwrap();

        let first = manager.assign_variant(&id, "user1").await.unwrap();
        for _ in 0..20 {
            let again = manager.assign_variant(&id, "user1").await.unwrap();
            assert_eq!(again.variant_id, first.variant_id);
        }
    }

    #[tokio::test]
    async fn assignment_requires_running_experiment() {
        let (manager, id) = setup().await;
        let err = manager.assign_variant(&id, "u").await.unwrap_err();
        assert!(matches!(err, WorkflowError::WrongExperimentState { .. }));
    }

    #[tokio::test]
    async fn metrics_accumulate_and_derive() {
        let (manager, id) = setup().await;
        manager.start_experiment(&id).await.unwrap();
        for _ in 0..4 {
            manager.record_impression(&id, "control").await.unwrap();
        }
        manager.record_success(&id, "control", 2.0, 0.10).await.unwrap();
        manager.record_success(&id, "control", 4.0, 0.30).await.unwrap();
        manager.record_failure(&id, "control").await.unwrap();

        let metrics = manager.metrics(&id).await.unwrap();
        let control = &metrics["control"];
        assert_eq!(control.impressions, 4);
        assert_eq!(control.successes, 2);
        assert_eq!(control.failures, 1);
        assert!((control.conversion_rate - 0.5).abs() < 1e-9);
        assert!((control.avg_latency - 1.5).abs() < 1e-9);
        assert!((control.avg_cost - 0.1).abs() < 1e-9);
    }

    #[tokio::test]
    async fn winner_needs_sample_size_then_significance() {
        let (manager, id) = setup().await;
        manager.start_experiment(&id).await.unwrap();

        // Below sample size: no test.
        manager.record_impression(&id, "control").await.unwrap();
        assert!(manager.check_winner(&id).await.unwrap().is_none());

        // Lopsided outcomes: control converts 90%, test 10%.
        for i in 0..100 {
            manager.record_impression(&id, "control").await.unwrap();
            manager.record_impression(&id, "test").await.unwrap();
            if i % 10 != 0 {
                manager.record_success(&id, "control", 1.0, 0.01).await.unwrap();
            }
            if i % 10 == 0 {
                manager.record_success(&id, "test", 1.0, 0.01).await.unwrap();
            }
        }
        let test = manager.check_winner(&id).await.unwrap().unwrap();
        assert!(test.significant);
        assert_eq!(test.winner.as_deref(), Some("control"));
        assert!(test.p_value < 0.05);
    }

    #[tokio::test]
    async fn promote_winner_activates_version_and_completes() {
        let (manager, id) = setup().await;
        manager.start_experiment(&id).await.unwrap();
        let version = manager.promote_winner(&id, Some("test")).await.unwrap();
        assert_eq!(version, "1.1.0");

        let experiment = manager.get_experiment(&id).await.unwrap().unwrap();
        assert_eq!(experiment.status, ExperimentStatus::Completed);
        assert_eq!(experiment.winner_variant_id.as_deref(), Some("test"));
        assert!(experiment.completed_at.is_some());

        let active = manager.versions.active_version("wf").await.unwrap().unwrap();
        assert_eq!(active.version, "1.1.0");
    }

    #[tokio::test]
    async fn promote_without_winner_errors_when_not_significant() {
        let (manager, id) = setup().await;
        manager.start_experiment(&id).await.unwrap();
        // Identical outcomes: no significant winner.
        for _ in 0..50 {
            for variant in ["control", "test"] {
                manager.record_impression(&id, variant).await.unwrap();
                manager.record_success(&id, variant, 1.0, 0.01).await.unwrap();
            }
        }
        let err = manager.promote_winner(&id, None).await.unwrap_err();
        assert!(matches!(err, WorkflowError::NoWinner(_)));
    }

    #[test]
    fn z_test_extremes() {
        // Identical proportions: p-value 1.
        let (z, p) = two_proportion_z_test(50, 100, 50, 100);
        assert!(z.abs() < 1e-9);
        assert!((p - 1.0).abs() < 1e-9);

        // Wildly different proportions: tiny p-value.
        let (z, p) = two_proportion_z_test(90, 100, 10, 100);
        assert!(z > 5.0);
        assert!(p < 1e-6);
    }

    #[test]
    fn erf_matches_known_values() {
        assert!((erf(0.0)).abs() < 1e-7);
        assert!((erf(1.0) - 0.8427007).abs() < 1e-5);
        assert!((erf(-1.0) + 0.8427007).abs() < 1e-5);
        assert!((normal_cdf(1.96) - 0.975).abs() < 1e-3);
    }
}
