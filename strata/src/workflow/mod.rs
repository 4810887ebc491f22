//! Workflow versioning and A/B experimentation.

mod ab;
mod versioning;

pub use ab::{
    AbTestManager, Experiment, ExperimentStatus, StatisticalTest, Variant, VariantMetrics,
};
pub use versioning::{
    checksum, ChangeKind, VersionChange, VersionComparison, VersionStatus, VersionSummary,
    WorkflowVersion, WorkflowVersionManager,
};

use thiserror::Error;

use crate::kv::KvError;

/// Versioning / experiment failure.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("invalid semantic version: {0}")]
    InvalidVersion(String),

    #[error("version {version} already exists for workflow {workflow_id}")]
    VersionExists { workflow_id: String, version: String },

    #[error("version {version} not found for workflow {workflow_id}")]
    VersionNotFound { workflow_id: String, version: String },

    #[error("experiment not found: {0}")]
    ExperimentNotFound(String),

    #[error("invalid experiment: {0}")]
    InvalidExperiment(String),

    #[error("experiment {experiment_id} is {actual}, expected {expected}")]
    WrongExperimentState { experiment_id: String, expected: String, actual: String },

    #[error("no statistically significant winner for experiment {0}")]
    NoWinner(String),

    #[error(transparent)]
    Kv(#[from] KvError),

    #[error("serialization: {0}")]
    Serde(#[from] serde_json::Error),
}
