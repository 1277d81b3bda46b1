//! Dispatcher integration tests
//!
//! Exercises the JSON-lines surface end to end: request framing, protocol
//! version checks, and the mapping of controller failures onto the outward
//! error taxonomy.

mod fixtures;

use std::io::Cursor;
use std::time::Duration;

use fixtures::{Harness, TARGET};
use hooklane::RpcResponse;
use hooklane_protocol::ops::{names, CancelAllResponse, CancelResponse, JobSnapshot, JobState, ListResponse, StartResponse};
use hooklane_protocol::ErrorCode;
use serde_json::json;

fn start_payload(job_type: &str) -> serde_json::Value {
    json!({
        "target_id": TARGET,
        "type": job_type,
        "module": { "kind": "inline", "source": "send('ready');" }
    })
}

fn ok_payload<T: serde::de::DeserializeOwned>(resp: RpcResponse) -> T {
    let payload = resp
        .into_result()
        .unwrap_or_else(|e| panic!("expected success, got {:?}", e));
    serde_json::from_value(payload).unwrap()
}

// ===== Framing =====

#[test]
fn test_json_lines_session() {
    let h = Harness::new();
    let input = format!(
        "{}\n\n{}\nnot json\n",
        json!({
            "protocol_version": 1,
            "op": names::START,
            "request_id": "r1",
            "payload": start_payload("daemon")
        }),
        json!({
            "protocol_version": 1,
            "op": names::LIST,
            "request_id": "r2",
            "payload": { "target_id": TARGET }
        })
    );

    let mut reader = Cursor::new(input.into_bytes());
    let mut output = Vec::new();
    h.handler().run_with_io(&mut reader, &mut output).unwrap();

    let lines: Vec<RpcResponse> = String::from_utf8(output)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 3, "blank lines are skipped, bad lines answered");

    assert_eq!(lines[0].request_id, "r1");
    let started: StartResponse = ok_payload(lines[0].clone());
    assert_eq!(started.state, JobState::Running);

    assert_eq!(lines[1].request_id, "r2");
    let listed: ListResponse = ok_payload(lines[1].clone());
    assert_eq!(listed.jobs.len(), 1);
    assert_eq!(listed.jobs[0].job_id, started.job_id);

    assert!(!lines[2].ok);
    assert_eq!(lines[2].protocol_version, 0);
    assert_eq!(lines[2].error.as_ref().unwrap().code, ErrorCode::InvalidArgument);
}

#[test]
fn test_unsupported_protocol_version() {
    let h = Harness::new();
    let resp = h.handler().handle_json(
        &json!({
            "protocol_version": 7,
            "op": names::STATUS,
            "request_id": "r9",
            "payload": { "job_id": "x" }
        })
        .to_string(),
    );
    assert!(!resp.ok);
    assert_eq!(resp.request_id, "r9");
    let error = resp.error.unwrap();
    assert_eq!(error.code, ErrorCode::InvalidArgument);
    assert_eq!(error.data.unwrap()["supported"], json!(1));
}

#[test]
fn test_unknown_operation() {
    let h = Harness::new();
    let resp = h.call("reboot", json!({}));
    let error = resp.error.unwrap();
    assert_eq!(error.code, ErrorCode::InvalidArgument);
    assert_eq!(error.data.unwrap()["op"], json!("reboot"));
}

// ===== Error taxonomy =====

#[test]
fn test_malformed_start_payloads() {
    let h = Harness::new();
    let cases = vec![
        json!({ "target_id": TARGET, "type": "cron", "module": { "kind": "inline", "source": "x" } }),
        json!({ "target_id": TARGET, "type": "daemon", "module": { "kind": "url", "href": "x" } }),
        json!({ "target_id": TARGET, "type": "oneshot", "ttl_ms": 1000, "module": { "kind": "inline", "source": "x" } }),
        json!({ "target_id": TARGET, "type": "daemon", "ttl_ms": 0, "module": { "kind": "inline", "source": "x" } }),
        json!({ "target_id": TARGET, "type": "daemon", "params": "pid=1", "module": { "kind": "inline", "source": "x" } }),
        json!({ "target_id": "  ", "type": "daemon", "module": { "kind": "inline", "source": "x" } }),
    ];
    for (i, payload) in cases.into_iter().enumerate() {
        let resp = h.call(names::START, payload);
        let error = resp.error.unwrap_or_else(|| panic!("case {} should fail", i));
        assert_eq!(error.code, ErrorCode::InvalidArgument, "case {}", i);
        assert!(!error.retryable, "case {}", i);
        assert!(error.hint.is_some(), "case {}", i);
    }
    assert_eq!(h.runtime.attach_count(TARGET), 0);
}

#[test]
fn test_attach_timeout_is_retryable() {
    let h = Harness::with_config(|c| c.attach_timeout_ms = 50);
    h.runtime.set_attach_delay(Duration::from_millis(500));

    let resp = h.call(names::START, start_payload("daemon"));
    let error = resp.error.unwrap();
    assert_eq!(error.code, ErrorCode::Unavailable);
    assert!(error.retryable);
    assert_eq!(error.data.unwrap()["target_id"], json!(TARGET));

    h.runtime.clear_failures();
    let started: StartResponse = ok_payload(h.call(names::START, start_payload("daemon")));
    assert_eq!(started.state, JobState::Running);
}

#[test]
fn test_unknown_job_hint() {
    let h = Harness::new();
    let resp = h.call(names::STATUS, json!({ "job_id": "01jdoesnotexist" }));
    let error = resp.error.unwrap();
    assert_eq!(error.code, ErrorCode::NotFound);
    assert!(!error.retryable);
    assert_eq!(error.data.unwrap()["kind"], json!("job"));
    assert!(error.hint.unwrap().contains("list"));
}

#[test]
fn test_published_module_conflict_surfaces_already_exists() {
    let h = Harness::new();
    h.sources.publish("trace-open", "1.0.0", "a").unwrap();
    let err = h.sources.publish("trace-open", "1.0.0", "b").unwrap_err();
    let err = hooklane::ControllerError::from(err).to_rpc_error();
    assert_eq!(err.code, ErrorCode::AlreadyExists);
    assert!(!err.retryable);
}

// ===== Operations =====

#[test]
fn test_status_reports_expiry_not_error() {
    let h = Harness::new();
    let mut payload = start_payload("daemon");
    payload["ttl_ms"] = json!(1000);
    let started: StartResponse = ok_payload(h.call(names::START, payload));

    h.clock.advance(Duration::from_millis(1500));
    let snapshot: JobSnapshot = ok_payload(h.call(names::STATUS, json!({ "job_id": started.job_id })));
    assert_eq!(snapshot.state, JobState::Expired);
    assert!(snapshot.last_error.is_none());
}

#[test]
fn test_cancel_twice_over_the_wire() {
    let h = Harness::new();
    let started: StartResponse = ok_payload(h.call(names::START, start_payload("interactive")));

    let first: CancelResponse = ok_payload(h.call(names::CANCEL, json!({ "job_id": started.job_id })));
    let second: CancelResponse = ok_payload(h.call(names::CANCEL, json!({ "job_id": started.job_id })));
    assert_eq!(first.state, JobState::Cancelled);
    assert_eq!(second.state, JobState::Cancelled);
    assert!(!first.already_terminal);
    assert!(second.already_terminal);
}

#[test]
fn test_cancel_all_over_the_wire() {
    let h = Harness::new();
    let a: StartResponse = ok_payload(h.call(names::START, start_payload("daemon")));
    let b: StartResponse = ok_payload(h.call(names::START, start_payload("daemon")));

    let ack: CancelAllResponse = ok_payload(h.call(names::CANCEL_ALL, json!({ "target_id": TARGET })));
    assert_eq!(ack.target_id, TARGET);
    assert_eq!(ack.cancelled, vec![a.job_id, b.job_id]);
    assert!(ack.session_closed);

    let empty: CancelAllResponse = ok_payload(h.call(names::CANCEL_ALL, json!({ "target_id": "idle" })));
    assert!(empty.cancelled.is_empty());
}
