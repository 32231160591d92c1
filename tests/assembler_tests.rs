//! Artifact retrieval and deletion against a fully processed task.

mod common;

use std::collections::HashSet;
use std::path::PathBuf;

use bulkcert::artifact::{ArtifactLayout, MANIFEST_NAME};
use bulkcert::assembler::{Artifacts, RetrievalMode};
use bulkcert::domain::TaskState;
use bulkcert::splitter::BulkRequest;
use common::{increment_template, static_template, zip_entries, zip_read, Harness, PREFIX};
use pretty_assertions::assert_eq;
use serde_json::Value;

async fn completed_task(h: &Harness, quantity: i64, ca_alias: &str) -> String {
    let accepted = h
        .splitter
        .submit(BulkRequest {
            quantity,
            ca_alias: ca_alias.to_string(),
            cert_info: increment_template("b-", "0"),
        })
        .await
        .unwrap();
    h.drain().await;
    accepted.task_id
}

#[tokio::test]
async fn links_cover_every_chunk() {
    let h = Harness::new(3);
    let task_id = completed_task(&h, 7, "default").await;

    let Some(Artifacts::Links(links)) = h
        .assembler
        .get_artifacts(&task_id, RetrievalMode::Links)
        .await
        .unwrap()
    else {
        panic!("expected links");
    };
    assert_eq!(links.len(), 3);
    for (i, link) in links.iter().enumerate() {
        let prefix = format!("memory://{}/{PREFIX}/{task_id}/{}/certs.zip", common::BUCKET, i + 1);
        assert!(link.starts_with(&prefix), "{link}");
    }
}

#[tokio::test]
async fn bundle_merges_chunks_and_manifests() {
    let h = Harness::new(3);
    let task_id = completed_task(&h, 7, "acme").await;

    let Some(Artifacts::Bundle(path)) = h
        .assembler
        .get_artifacts(&task_id, RetrievalMode::Bundle)
        .await
        .unwrap()
    else {
        panic!("expected a bundle");
    };
    assert_eq!(path.parent(), Some(h.bundle_dir.path()));
    let file_name = path.file_name().unwrap().to_str().unwrap();
    assert!(file_name.starts_with(&format!("{task_id}-")), "{file_name}");
    assert!(file_name.ends_with(".zip"), "{file_name}");

    let bytes = std::fs::read(&path).unwrap();
    let entries = zip_entries(&bytes);
    assert_eq!(entries.len(), 7 * 2 + 1);
    assert_eq!(entries.iter().filter(|e| *e == MANIFEST_NAME).count(), 1);

    let manifest: Vec<Value> = serde_json::from_str(&zip_read(&bytes, MANIFEST_NAME)).unwrap();
    let names: Vec<&str> = manifest.iter().map(|e| e["name"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["b-0", "b-1", "b-2", "b-3", "b-4", "b-5", "b-6"]);
}

#[tokio::test]
async fn concurrent_bundles_do_not_share_a_file() {
    let h = Harness::new(3);
    let task_id = completed_task(&h, 7, "acme").await;

    let mut retrievals = tokio::task::JoinSet::new();
    for _ in 0..16 {
        let assembler = h.assembler.clone();
        let task_id = task_id.clone();
        retrievals.spawn(async move {
            match assembler
                .get_artifacts(&task_id, RetrievalMode::Bundle)
                .await
                .unwrap()
            {
                Some(Artifacts::Bundle(path)) => {
                    let bytes = tokio::fs::read(&path).await.unwrap();
                    (path, bytes)
                },
                other => panic!("expected a bundle, got {other:?}"),
            }
        });
    }

    let mut bundles = Vec::new();
    while let Some(joined) = retrievals.join_next().await {
        bundles.push(joined.unwrap());
    }
    let distinct: HashSet<PathBuf> = bundles.iter().map(|(path, _)| path.to_path_buf()).collect();
    assert_eq!(distinct.len(), 16);
    for (_, bytes) in &bundles {
        assert_eq!(zip_entries(bytes).len(), 7 * 2 + 1);
    }

    drop(bundles);
    assert_eq!(std::fs::read_dir(h.bundle_dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn bundle_of_managed_task_has_no_manifest() {
    let h = Harness::new(2);
    let task_id = completed_task(&h, 3, "default").await;
    let Some(Artifacts::Bundle(path)) = h
        .assembler
        .get_artifacts(&task_id, RetrievalMode::Bundle)
        .await
        .unwrap()
    else {
        panic!("expected a bundle");
    };
    let entries = zip_entries(&std::fs::read(path).unwrap());
    assert_eq!(entries.len(), 6);
    assert!(!entries.iter().any(|e| e == MANIFEST_NAME));
}

#[tokio::test]
async fn missing_archive_yields_none() {
    let h = Harness::new(2);
    let task_id = completed_task(&h, 4, "default").await;
    let layout = ArtifactLayout::new(PREFIX);
    assert!(h.artifacts.remove(&layout.chunk_key(&task_id, 2)));

    let result = h
        .assembler
        .get_artifacts(&task_id, RetrievalMode::Bundle)
        .await
        .unwrap();
    assert!(result.is_none());
}

#[tokio::test]
async fn pending_task_is_not_found() {
    let h = Harness::new(2);
    let accepted = h
        .splitter
        .submit(BulkRequest {
            quantity: 3,
            ca_alias: "default".to_string(),
            cert_info: static_template("p"),
        })
        .await
        .unwrap();
    let err = h
        .assembler
        .get_artifacts(&accepted.task_id, RetrievalMode::Links)
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 404);
}

#[tokio::test]
async fn delete_batch_removes_only_that_task() {
    let h = Harness::new(2);
    let doomed = completed_task(&h, 5, "default").await;
    let kept = completed_task(&h, 2, "default").await;
    assert_eq!(h.artifacts.len(), 4);

    assert_eq!(h.assembler.delete_batch(&doomed).await.unwrap(), 3);
    assert_eq!(h.artifacts.len(), 1);
    assert_eq!(h.assembler.delete_batch(&doomed).await.unwrap(), 0);

    // Records survive deletion; the task still reports complete.
    let view = h.aggregator.status(&doomed).await.unwrap();
    assert_eq!(view.status, TaskState::Complete);
    let after = h
        .assembler
        .get_artifacts(&doomed, RetrievalMode::Bundle)
        .await
        .unwrap();
    assert!(after.is_none());

    assert!(h
        .assembler
        .get_artifacts(&kept, RetrievalMode::Bundle)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn delete_batch_rejects_path_like_ids() {
    let h = Harness::new(2);
    for bad in ["", "a/b"] {
        let err = h.assembler.delete_batch(bad).await.unwrap_err();
        assert_eq!(err.status_code(), 400);
    }
}
