//! Workflow versioning and A/B experiment integration tests.

mod init_logging;

use std::sync::Arc;

use serde_json::json;
use strata::kv::{KvStore, MemoryKv};
use strata::workflow::{
    checksum, AbTestManager, ExperimentStatus, Variant, VersionStatus, WorkflowVersionManager,
};

fn variant(id: &str, version: &str, weight: f64) -> Variant {
    Variant {
        variant_id: id.to_string(),
        workflow_version: version.to_string(),
        traffic_weight: weight,
        description: String::new(),
    }
}

/// **Scenario**: version immutability: after creates, activations, and
/// deprecations of other versions, fetching the original returns data
/// whose checksum equals the one stored at creation.
#[tokio::test]
async fn version_bytes_survive_unrelated_churn() {
    let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
    let versions = WorkflowVersionManager::new(kv);

    let data = json!({"agents": ["planner", "coder"], "steps": [{"agent": "planner"}]});
    let original = versions
        .create_version("pipeline", "1.0.0", data.clone(), "system", "initial", None, true)
        .await
        .unwrap();

    versions
        .create_version("pipeline", "1.1.0", json!({"agents": []}), "system", "emptied", Some("1.0.0".into()), true)
        .await
        .unwrap();
    versions.deprecate("pipeline", "1.1.0").await.unwrap();
    versions.set_active("pipeline", "1.0.0").await.unwrap();
    versions.create_version("pipeline", "2.0.0", json!({"v": 3}), "system", "next", None, false).await.unwrap();

    let fetched = versions.get_version("pipeline", "1.0.0").await.unwrap().unwrap();
    assert_eq!(fetched.data, data);
    assert_eq!(fetched.checksum, original.checksum);
    assert_eq!(checksum(&fetched.data), original.checksum);
}

/// **Scenario**: the full experiment lifecycle (create, start, sticky
/// assignment, metric accumulation, significant winner, promotion) ends
/// with the winner's version active and the experiment completed.
#[tokio::test]
async fn experiment_lifecycle_promotes_winner() {
    let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
    let versions = WorkflowVersionManager::new(kv.clone());
    versions.create_version("wf", "1.0.0", json!({"prompt": "v1"}), "a", "one", None, true).await.unwrap();
    versions.create_version("wf", "2.0.0", json!({"prompt": "v2"}), "a", "two", None, false).await.unwrap();
    let ab = AbTestManager::new(kv, versions.clone());

    let experiment = ab
        .create_experiment(
            "wf",
            "prompt test",
            "v1 vs v2",
            vec![variant("control", "1.0.0", 0.5), variant("candidate", "2.0.0", 0.5)],
            20,
            0.95,
        )
        .await
        .unwrap();
    let id = experiment.experiment_id.clone();
    assert_eq!(experiment.status, ExperimentStatus::Draft);

    ab.start_experiment(&id).await.unwrap();

    // Sticky assignment holds per user.
    let assigned = ab.assign_variant(&id, "user-1").await.unwrap();
    for _ in 0..10 {
        assert_eq!(ab.assign_variant(&id, "user-1").await.unwrap().variant_id, assigned.variant_id);
    }

    // Candidate converts far better than control.
    for i in 0..60 {
        ab.record_impression(&id, "control").await.unwrap();
        ab.record_impression(&id, "candidate").await.unwrap();
        if i % 5 == 0 {
            ab.record_success(&id, "control", 2.0, 0.02).await.unwrap();
        } else {
            ab.record_failure(&id, "control").await.unwrap();
        }
        ab.record_success(&id, "candidate", 1.0, 0.01).await.unwrap();
    }

    let test = ab.check_winner(&id).await.unwrap().expect("sample size met");
    assert!(test.significant);
    assert_eq!(test.winner.as_deref(), Some("candidate"));

    let promoted = ab.promote_winner(&id, None).await.unwrap();
    assert_eq!(promoted, "2.0.0");
    assert_eq!(versions.active_version("wf").await.unwrap().unwrap().version, "2.0.0");

    let finished = ab.get_experiment(&id).await.unwrap().unwrap();
    assert_eq!(finished.status, ExperimentStatus::Completed);
    assert_eq!(finished.winner_variant_id.as_deref(), Some("candidate"));

    // Promoted version keeps Active status in the listing.
    let listed = versions.list_versions("wf", Some(VersionStatus::Active), 10).await.unwrap();
    assert!(listed.iter().any(|v| v.version == "2.0.0"));
}

/// **Scenario**: experiments list per workflow and filter by status.
#[tokio::test]
async fn experiments_listed_per_workflow() {
    let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
    let versions = WorkflowVersionManager::new(kv.clone());
    versions.create_version("wf", "1.0.0", json!({}), "a", "c", None, true).await.unwrap();
    versions.create_version("wf", "1.1.0", json!({}), "a", "c", None, false).await.unwrap();
    let ab = AbTestManager::new(kv, versions);

    let first = ab
        .create_experiment(
            "wf",
            "one",
            "",
            vec![variant("a", "1.0.0", 0.5), variant("b", "1.1.0", 0.5)],
            10,
            0.95,
        )
        .await
        .unwrap();
    let second = ab
        .create_experiment(
            "wf",
            "two",
            "",
            vec![variant("a", "1.0.0", 0.9), variant("b", "1.1.0", 0.1)],
            10,
            0.95,
        )
        .await
        .unwrap();
    ab.start_experiment(&second.experiment_id).await.unwrap();

    assert_eq!(ab.list_experiments("wf", None).await.unwrap().len(), 2);
    let running = ab.list_experiments("wf", Some(ExperimentStatus::Running)).await.unwrap();
    assert_eq!(running.len(), 1);
    assert_eq!(running[0].experiment_id, second.experiment_id);
    assert_ne!(first.experiment_id, second.experiment_id);
}
