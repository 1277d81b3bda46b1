//! Shared harness for the integration tests.
//!
//! A [`Harness`] owns a temporary data directory, a loopback runtime, a
//! manual clock and a controller wired to all three. Dropping the controller
//! and calling [`Harness::restart`] simulates a process restart over the same
//! data directory.

#![allow(dead_code)]

use std::sync::Arc;

use hooklane::mock::MockRuntime;
use hooklane::runtime::EmittedPayload;
use hooklane::{ControllerConfig, JobController, ManualClock, RpcHandler, StaticSourceResolver};
use hooklane_protocol::ops::{JobType, ModuleSelector, StartRequest};
use hooklane_protocol::{RpcRequest, RpcResponse};
use tempfile::TempDir;

pub const TARGET: &str = "R58M1";

pub struct Harness {
    pub dir: TempDir,
    pub runtime: MockRuntime,
    pub clock: Arc<ManualClock>,
    pub sources: Arc<StaticSourceResolver>,
    pub controller: JobController,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// Build a harness, letting the caller adjust the config first.
    pub fn with_config(adjust: impl FnOnce(&mut ControllerConfig)) -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let clock = Arc::new(ManualClock::default());
        Self::open(dir, clock, adjust)
    }

    fn open(dir: TempDir, clock: Arc<ManualClock>, adjust: impl FnOnce(&mut ControllerConfig)) -> Self {
        let runtime = MockRuntime::new();
        let sources = Arc::new(StaticSourceResolver::new());
        let mut config = ControllerConfig::with_data_dir(dir.path());
        config.detach_wait_ms = 100;
        adjust(&mut config);

        let controller = JobController::open(
            config,
            Arc::new(runtime.clone()),
            sources.clone(),
            clock.clone(),
        )
        .expect("open controller");

        Self {
            dir,
            runtime,
            clock,
            sources,
            controller,
        }
    }

    /// Drop the controller and open a fresh one over the same data directory.
    ///
    /// The new controller gets a new runtime; every session of the old one is
    /// gone, as after a real crash.
    pub fn restart(self) -> Self {
        let Harness { dir, clock, .. } = self;
        Self::open(dir, clock, |_| {})
    }

    pub fn handler(&self) -> RpcHandler {
        RpcHandler::new(self.controller.clone())
    }

    /// Send one request through the dispatcher.
    pub fn call(&self, op: &str, payload: serde_json::Value) -> RpcResponse {
        self.handler().handle_request(&RpcRequest::new(op, "test", payload))
    }
}

/// Start request for an inline module on [`TARGET`].
pub fn inline_start(job_type: JobType, ttl_ms: Option<u64>) -> StartRequest {
    StartRequest {
        target_id: TARGET.to_string(),
        job_type,
        module: ModuleSelector::Inline {
            source: "Interceptor.attach(ptr('0x1000'), { onEnter() { send('hit'); } });".to_string(),
        },
        params: None,
        ttl_ms,
    }
}

pub fn payload(artifact_type: &str, bytes: &[u8]) -> EmittedPayload {
    EmittedPayload {
        artifact_type: artifact_type.to_string(),
        bytes: bytes.to_vec(),
        mime: None,
        name: None,
        metadata: serde_json::Map::new(),
    }
}
