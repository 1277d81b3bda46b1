//! Artifact pipeline integration tests
//!
//! Payloads travel from the loopback runtime through the controller's
//! session callback into the content-addressed store, then back out through
//! the dispatcher.

mod fixtures;

use base64::Engine;
use fixtures::{inline_start, payload, Harness, TARGET};
use hooklane::artifact::blob_store::sha256_hex;
use hooklane::INLINE_MAX_BYTES;
use hooklane_protocol::ops::{names, ArtifactsGetResponse, ArtifactsListResponse, JobType};
use hooklane_protocol::ErrorCode;
use serde_json::json;

// ===== Capture =====

#[test]
fn test_emitted_payloads_are_captured_in_order() {
    let h = Harness::new();
    let job = h.controller.start_job(inline_start(JobType::Daemon, None)).unwrap();

    for i in 0..3 {
        let body = format!("{{\"hit\":{}}}", i);
        assert!(h.runtime.emit(TARGET, &job.job_id, payload("trace", body.as_bytes())));
    }

    let records = h.controller.artifacts().list_by_job(&job.job_id);
    assert_eq!(records.len(), 3);
    for (i, record) in records.iter().enumerate() {
        assert_eq!(record.target_id, TARGET);
        assert_eq!(record.artifact_type, "trace");
        assert_eq!(record.mime, "application/octet-stream");
        let bytes = h.controller.artifacts().read_payload(&record.artifact_id).unwrap();
        assert_eq!(bytes, format!("{{\"hit\":{}}}", i).into_bytes());
    }
    assert!(
        records.windows(2).all(|w| w[0].artifact_id < w[1].artifact_id),
        "artifacts list oldest first"
    );
}

#[test]
fn test_payload_after_cancel_is_dropped() {
    let h = Harness::new();
    let job = h.controller.start_job(inline_start(JobType::Daemon, None)).unwrap();
    h.runtime.emit(TARGET, &job.job_id, payload("log", b"before"));

    let other = h.controller.start_job(inline_start(JobType::Daemon, None)).unwrap();
    h.controller.cancel_job(&job.job_id).unwrap();

    // The session is still held by the other job, so the event is delivered.
    assert!(h.runtime.emit(TARGET, &job.job_id, payload("log", b"after")));
    assert_eq!(h.controller.artifacts().list_by_job(&job.job_id).len(), 1);
    assert!(h.controller.artifacts().list_by_job(&other.job_id).is_empty());
}

#[test]
fn test_payload_at_expiry_is_not_captured() {
    let h = Harness::new();
    let job = h.controller.start_job(inline_start(JobType::Daemon, Some(1000))).unwrap();
    let keeper = h.controller.start_job(inline_start(JobType::Daemon, None)).unwrap();

    h.clock.advance(std::time::Duration::from_millis(1000));
    h.runtime.emit(TARGET, &job.job_id, payload("log", b"late"));

    assert!(h.controller.artifacts().list_by_job(&job.job_id).is_empty());
    assert_eq!(
        h.controller.job_status(&job.job_id).unwrap().state,
        hooklane_protocol::ops::JobState::Expired
    );
    h.controller.cancel_job(&keeper.job_id).unwrap();
}

// ===== Content addressing =====

#[test]
fn test_identical_payloads_share_one_blob() {
    let h = Harness::new();
    let a = h.controller.start_job(inline_start(JobType::Daemon, None)).unwrap();
    let b = h.controller.start_job(inline_start(JobType::Daemon, None)).unwrap();

    let dump = vec![0xABu8; 4096];
    h.runtime.emit(TARGET, &a.job_id, payload("memdump", &dump));
    h.runtime.emit(TARGET, &b.job_id, payload("memdump", &dump));

    let records = h.controller.artifacts().list_by_target(TARGET);
    assert_eq!(records.len(), 2);
    assert_ne!(records[0].artifact_id, records[1].artifact_id);
    assert_eq!(records[0].sha256, records[1].sha256);
    assert_eq!(records[0].storage_ref, records[1].storage_ref);
    assert_eq!(records[0].sha256, sha256_hex(&dump));

    let stats = h.controller.artifacts().blob_store().stats().unwrap();
    assert_eq!(stats.blobs, 1, "blob is written once");
    assert_eq!(stats.bytes, 4096);
}

#[test]
fn test_payload_round_trips_to_its_hash() {
    let h = Harness::new();
    let job = h.controller.start_job(inline_start(JobType::Daemon, None)).unwrap();
    let bodies: [&[u8]; 3] = [b"", b"x", &[0u8, 1, 2, 255, 254]];
    for body in bodies {
        h.runtime.emit(TARGET, &job.job_id, payload("bin", body));
    }

    for record in h.controller.artifacts().list_by_job(&job.job_id) {
        let bytes = h.controller.artifacts().read_payload(&record.artifact_id).unwrap();
        assert_eq!(sha256_hex(&bytes), record.sha256);
        assert_eq!(bytes.len() as u64, record.size_bytes);
    }
}

#[test]
fn test_missing_blob_is_soft_miss() {
    let h = Harness::new();
    let job = h.controller.start_job(inline_start(JobType::Daemon, None)).unwrap();
    h.runtime.emit(TARGET, &job.job_id, payload("log", b"ephemeral"));

    let record = h.controller.artifacts().list_by_job(&job.job_id).remove(0);
    let blob = h.controller.artifacts().root().join(&record.storage_ref);
    std::fs::remove_file(&blob).unwrap();

    assert!(h.controller.artifacts().get(&record.artifact_id).is_some());
    assert!(h.controller.artifacts().read_payload(&record.artifact_id).is_none());
    assert!(h.controller.artifacts().read_payload("01jnotanartifact").is_none());
}

// ===== Retrieval through the dispatcher =====

#[test]
fn test_get_inlines_small_payloads() {
    let h = Harness::new();
    let job = h.controller.start_job(inline_start(JobType::Daemon, None)).unwrap();
    h.runtime.emit(TARGET, &job.job_id, payload("log", b"small"));
    let large = vec![7u8; INLINE_MAX_BYTES as usize + 1];
    h.runtime.emit(TARGET, &job.job_id, payload("memdump", &large));

    let records = h.controller.artifacts().list_by_job(&job.job_id);

    let resp = h.call(names::ARTIFACTS_GET, json!({ "artifact_id": records[0].artifact_id }));
    assert!(resp.ok);
    let small: ArtifactsGetResponse = serde_json::from_value(resp.payload.unwrap()).unwrap();
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(small.inline_base64.unwrap())
        .unwrap();
    assert_eq!(decoded, b"small");
    assert_eq!(small.storage_ref, small.record.storage_ref);

    let resp = h.call(names::ARTIFACTS_GET, json!({ "artifact_id": records[1].artifact_id }));
    let big: ArtifactsGetResponse = serde_json::from_value(resp.payload.unwrap()).unwrap();
    assert!(big.inline_base64.is_none(), "payloads over the threshold are not inlined");
    assert_eq!(big.record.size_bytes, INLINE_MAX_BYTES + 1);
}

#[test]
fn test_list_pages_resume_after_cursor() {
    let h = Harness::new();
    let job = h.controller.start_job(inline_start(JobType::Daemon, None)).unwrap();
    for i in 0..5u8 {
        h.runtime.emit(TARGET, &job.job_id, payload("tick", &[i]));
    }

    let resp = h.call(names::ARTIFACTS_LIST, json!({ "target_id": TARGET, "limit": 2 }));
    let first: ArtifactsListResponse = serde_json::from_value(resp.payload.unwrap()).unwrap();
    assert_eq!(first.artifacts.len(), 2);
    let cursor = first.next_after.expect("more pages remain");

    let resp = h.call(
        names::ARTIFACTS_LIST,
        json!({ "job_id": job.job_id, "after": cursor, "limit": 10 }),
    );
    let rest: ArtifactsListResponse = serde_json::from_value(resp.payload.unwrap()).unwrap();
    assert_eq!(rest.artifacts.len(), 3);
    assert!(rest.next_after.is_none());
}

#[test]
fn test_list_requires_a_selector() {
    let h = Harness::new();
    let resp = h.call(names::ARTIFACTS_LIST, json!({}));
    assert!(!resp.ok);
    assert_eq!(resp.error.unwrap().code, ErrorCode::InvalidArgument);
}

#[test]
fn test_get_unknown_artifact() {
    let h = Harness::new();
    let resp = h.call(names::ARTIFACTS_GET, json!({ "artifact_id": "01jmissing" }));
    let error = resp.error.unwrap();
    assert_eq!(error.code, ErrorCode::NotFound);
    assert!(!error.retryable);
    assert!(error.hint.is_some());
}
