//! Immutable, semver'd workflow snapshots with an active pointer.
//!
//! A version record (metadata + workflow data + SHA-256 checksum) lives
//! under one KV key; `workflow:versions:<id>` is a creation-time-ordered
//! index and `workflow:active:<id>` the single-writer active pointer.
//! Records are immutable apart from the status field; the data and its
//! checksum never change after `create_version`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::info;

use super::WorkflowError;
use crate::kv::KvStore;

/// Records are kept for a year unless recreated.
const RECORD_TTL: Duration = Duration::from_secs(86_400 * 365);

/// Lifecycle state of a version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionStatus {
    Draft,
    Active,
    Deprecated,
    Archived,
}

/// One immutable workflow snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowVersion {
    pub workflow_id: String,
    /// Semantic version string (`major.minor.patch`).
    pub version: String,
    pub status: VersionStatus,
    pub created_at: DateTime<Utc>,
    pub author: String,
    pub changelog: String,
    pub data: Value,
    /// SHA-256 hex of the canonical JSON encoding of `data`.
    pub checksum: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_version: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

/// Kind of one diff entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Removed,
    Modified,
}

/// One path-keyed difference between two versions.
#[derive(Debug, Clone, Serialize)]
pub struct VersionChange {
    pub kind: ChangeKind,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_value: Option<Value>,
}

/// Diff summary between two versions.
#[derive(Debug, Clone, Serialize)]
pub struct VersionComparison {
    pub old_version: String,
    pub new_version: String,
    pub changes: Vec<VersionChange>,
    /// Removed paths and type changes.
    pub breaking_changes: Vec<String>,
    pub compatible: bool,
}

/// Compact history entry (no workflow data).
#[derive(Debug, Clone, Serialize)]
pub struct VersionSummary {
    pub version: String,
    pub status: VersionStatus,
    pub created_at: DateTime<Utc>,
    pub author: String,
    pub changelog: String,
    pub parent_version: Option<String>,
    pub checksum: String,
}

/// SHA-256 hex of the canonical JSON encoding (serde_json maps are
/// key-ordered, so the encoding is stable).
pub fn checksum(data: &Value) -> String {
    let canonical = data.to_string();
    let digest = Sha256::digest(canonical.as_bytes());
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

fn valid_semver(version: &str) -> bool {
    let parts: Vec<&str> = version.split('.').collect();
    parts.len() == 3
        && parts
            .iter()
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()))
}

fn version_key(workflow_id: &str, version: &str) -> String {
    format!("workflow:version:{}:{}", workflow_id, version)
}

fn active_key(workflow_id: &str) -> String {
    format!("workflow:active:{}", workflow_id)
}

fn versions_key(workflow_id: &str) -> String {
    format!("workflow:versions:{}", workflow_id)
}

/// Version store over the KV adapter.
#[derive(Clone)]
pub struct WorkflowVersionManager {
    kv: Arc<dyn KvStore>,
}

impl WorkflowVersionManager {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Creates a new immutable version. Fails on malformed semver or a
    /// duplicate (workflow, version) pair.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_version(
        &self,
        workflow_id: &str,
        version: &str,
        data: Value,
        author: &str,
        changelog: &str,
        parent_version: Option<String>,
        set_active: bool,
    ) -> Result<WorkflowVersion, WorkflowError> {
        if !valid_semver(version) {
            return Err(WorkflowError::InvalidVersion(version.to_string()));
        }
        if self.kv.exists(&version_key(workflow_id, version)).await? {
            return Err(WorkflowError::VersionExists {
                workflow_id: workflow_id.to_string(),
                version: version.to_string(),
            });
        }

        let record = WorkflowVersion {
            workflow_id: workflow_id.to_string(),
            version: version.to_string(),
            status: if set_active { VersionStatus::Active } else { VersionStatus::Draft },
            created_at: Utc::now(),
            author: author.to_string(),
            changelog: changelog.to_string(),
            checksum: checksum(&data),
            data,
            parent_version,
            metadata: BTreeMap::new(),
        };

        self.store_record(&record).await?;
        self.kv
            .zadd(
                &versions_key(workflow_id),
                record.created_at.timestamp_millis() as f64,
                version,
            )
            .await?;
        if set_active {
            self.kv.set(&active_key(workflow_id), version, None, false).await?;
        }
        info!(workflow = workflow_id, version, "created workflow version");
        Ok(record)
    }

    pub async fn get_version(
        &self,
        workflow_id: &str,
        version: &str,
    ) -> Result<Option<WorkflowVersion>, WorkflowError> {
        let Some(raw) = self.kv.get(&version_key(workflow_id, version)).await? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }

    /// The version the active pointer names, if any.
    pub async fn active_version(
        &self,
        workflow_id: &str,
    ) -> Result<Option<WorkflowVersion>, WorkflowError> {
        let Some(version) = self.kv.get(&active_key(workflow_id)).await? else {
            return Ok(None);
        };
        self.get_version(workflow_id, &version).await
    }

    /// Versions newest-first, optionally filtered by status.
    pub async fn list_versions(
        &self,
        workflow_id: &str,
        status: Option<VersionStatus>,
        limit: usize,
    ) -> Result<Vec<WorkflowVersion>, WorkflowError> {
        let names = self
            .kv
            .zrange(&versions_key(workflow_id), 0, limit.saturating_sub(1) as i64, true)
            .await?;
        let mut versions = Vec::with_capacity(names.len());
        for (name, _) in names {
            if let Some(record) = self.get_version(workflow_id, &name).await? {
                if status.is_none() || status == Some(record.status) {
                    versions.push(record);
                }
            }
        }
        Ok(versions)
    }

    /// Moves the active pointer (rollback and rollforward both land here).
    pub async fn set_active(&self, workflow_id: &str, version: &str) -> Result<(), WorkflowError> {
        let Some(mut record) = self.get_version(workflow_id, version).await? else {
            return Err(WorkflowError::VersionNotFound {
                workflow_id: workflow_id.to_string(),
                version: version.to_string(),
            });
        };
        self.kv.set(&active_key(workflow_id), version, None, false).await?;
        record.status = VersionStatus::Active;
        self.store_record(&record).await?;
        info!(workflow = workflow_id, version, "set active workflow version");
        Ok(())
    }

    /// Rollback = activate an older version; returns it.
    pub async fn rollback(
        &self,
        workflow_id: &str,
        target_version: &str,
    ) -> Result<WorkflowVersion, WorkflowError> {
        self.set_active(workflow_id, target_version).await?;
        info!(workflow = workflow_id, version = target_version, "rolled back workflow");
        self.get_version(workflow_id, target_version).await?.ok_or_else(|| {
            WorkflowError::VersionNotFound {
                workflow_id: workflow_id.to_string(),
                version: target_version.to_string(),
            }
        })
    }

    /// Marks a version deprecated; false when it does not exist.
    pub async fn deprecate(&self, workflow_id: &str, version: &str) -> Result<bool, WorkflowError> {
        let Some(mut record) = self.get_version(workflow_id, version).await? else {
            return Ok(false);
        };
        record.status = VersionStatus::Deprecated;
        self.store_record(&record).await?;
        info!(workflow = workflow_id, version, "deprecated workflow version");
        Ok(true)
    }

    /// Path-keyed diff between two stored versions.
    pub async fn compare(
        &self,
        workflow_id: &str,
        old_version: &str,
        new_version: &str,
    ) -> Result<VersionComparison, WorkflowError> {
        let old = self.require(workflow_id, old_version).await?;
        let new = self.require(workflow_id, new_version).await?;
        let mut changes = Vec::new();
        diff_values(&old.data, &new.data, "", &mut changes);
        let breaking_changes = breaking(&changes);
        Ok(VersionComparison {
            old_version: old_version.to_string(),
            new_version: new_version.to_string(),
            compatible: breaking_changes.is_empty(),
            changes,
            breaking_changes,
        })
    }

    /// Metadata-only history, newest first.
    pub async fn history(
        &self,
        workflow_id: &str,
        limit: usize,
    ) -> Result<Vec<VersionSummary>, WorkflowError> {
        let versions = self.list_versions(workflow_id, None, limit).await?;
        Ok(versions
            .into_iter()
            .map(|record| VersionSummary {
                version: record.version,
                status: record.status,
                created_at: record.created_at,
                author: record.author,
                changelog: record.changelog,
                parent_version: record.parent_version,
                checksum: record.checksum,
            })
            .collect())
    }

    async fn require(
        &self,
        workflow_id: &str,
        version: &str,
    ) -> Result<WorkflowVersion, WorkflowError> {
        self.get_version(workflow_id, version).await?.ok_or_else(|| {
            WorkflowError::VersionNotFound {
                workflow_id: workflow_id.to_string(),
                version: version.to_string(),
            }
        })
    }

    async fn store_record(&self, record: &WorkflowVersion) -> Result<(), WorkflowError> {
        let raw = serde_json::to_string(record)?;
        self.kv
            .set(&version_key(&record.workflow_id, &record.version), &raw, Some(RECORD_TTL), false)
            .await?;
        Ok(())
    }
}

fn diff_values(old: &Value, new: &Value, path: &str, out: &mut Vec<VersionChange>) {
    match (old, new) {
        (Value::Object(old_map), Value::Object(new_map)) => {
            for (key, old_value) in old_map {
                let child = join_path(path, key);
                match new_map.get(key) {
                    None => out.push(VersionChange {
                        kind: ChangeKind::Removed,
                        path: child,
                        old_value: Some(old_value.clone()),
                        new_value: None,
                    }),
                    Some(new_value) => diff_values(old_value, new_value, &child, out),
                }
            }
            for (key, new_value) in new_map {
                if !old_map.contains_key(key) {
                    out.push(VersionChange {
                        kind: ChangeKind::Added,
                        path: join_path(path, key),
                        old_value: None,
                        new_value: Some(new_value.clone()),
                    });
                }
            }
        }
        _ if old != new => out.push(VersionChange {
            kind: ChangeKind::Modified,
            path: path.to_string(),
            old_value: Some(old.clone()),
            new_value: Some(new.clone()),
        }),
        _ => {}
    }
}

fn join_path(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", path, key)
    }
}

fn value_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Removed paths and type changes are breaking.
fn breaking(changes: &[VersionChange]) -> Vec<String> {
    changes
        .iter()
        .filter_map(|change| match change.kind {
            ChangeKind::Removed => Some(format!("removed: {}", change.path)),
            ChangeKind::Modified => {
                let (Some(old), Some(new)) = (&change.old_value, &change.new_value) else {
                    return None;
                };
                (value_type(old) != value_type(new))
                    .then(|| format!("type changed: {}", change.path))
            }
            ChangeKind::Added => None,
        })
        .collect()
}
