//! Request dispatcher
//!
//! Reads newline-delimited JSON requests, dispatches each to the
//! [`JobController`], and writes one JSON response line per request.
//!
//!   hooklane serve < requests.jsonl

use std::io::{self, BufRead, Write};

use serde::de::DeserializeOwned;
use serde::Serialize;

use hooklane_protocol::ops::{
    names, ArtifactsGetRequest, ArtifactsGetResponse, ArtifactsListRequest, ArtifactsListResponse,
    CancelAllRequest, CancelRequest, ListRequest, ListResponse, StartRequest, StartResponse,
    StatusRequest,
};
use hooklane_protocol::{RpcError, RpcRequest, RpcResponse, PROTOCOL_VERSION};

use crate::artifact::ArtifactQuery;
use crate::error::ControllerError;
use crate::job::JobController;

/// Dispatches protocol requests to a controller.
#[derive(Clone)]
pub struct RpcHandler {
    controller: JobController,
}

fn parse<T: DeserializeOwned>(request: &RpcRequest) -> Result<T, RpcError> {
    serde_json::from_value(request.payload.clone()).map_err(|e| {
        RpcError::invalid_argument(format!("invalid {} payload: {}", request.op, e))
            .with_hint("fix the request and send it again")
    })
}

fn to_payload<T: Serialize>(value: &T) -> Result<serde_json::Value, RpcError> {
    serde_json::to_value(value)
        .map_err(|e| RpcError::internal(format!("failed to encode response: {}", e)))
}

impl RpcHandler {
    pub fn new(controller: JobController) -> Self {
        Self { controller }
    }

    pub fn controller(&self) -> &JobController {
        &self.controller
    }

    /// Serve stdin to stdout until EOF.
    pub fn run(&self) -> io::Result<()> {
        self.run_with_io(&mut io::stdin().lock(), &mut io::stdout().lock())
    }

    /// Serve requests from `reader`, one per line, until EOF.
    pub fn run_with_io<R: BufRead, W: Write>(&self, reader: &mut R, writer: &mut W) -> io::Result<()> {
        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                return Ok(());
            }
            if line.trim().is_empty() {
                continue;
            }
            let response = self.handle_json(&line);
            serde_json::to_writer(&mut *writer, &response)?;
            writer.write_all(b"\n")?;
            writer.flush()?;
        }
    }

    /// Handle one raw request line.
    pub fn handle_json(&self, line: &str) -> RpcResponse {
        match serde_json::from_str::<RpcRequest>(line) {
            Ok(request) => self.handle_request(&request),
            Err(e) => RpcResponse::malformed(RpcError::invalid_argument(format!("invalid request: {}", e))),
        }
    }

    pub fn handle_request(&self, request: &RpcRequest) -> RpcResponse {
        if request.protocol_version != PROTOCOL_VERSION {
            return RpcResponse::failure(
                request,
                RpcError::unsupported_protocol(request.protocol_version, PROTOCOL_VERSION),
            );
        }

        log::debug!("request {} op={}", request.request_id, request.op);
        match self.dispatch(request) {
            Ok(payload) => RpcResponse::success(request, payload),
            Err(error) => {
                log::debug!("request {} failed: {}", request.request_id, error);
                RpcResponse::failure(request, error)
            }
        }
    }

    fn dispatch(&self, request: &RpcRequest) -> Result<serde_json::Value, RpcError> {
        let rpc = |e: ControllerError| e.to_rpc_error();
        match request.op.as_str() {
            names::START => {
                let req: StartRequest = parse(request)?;
                let job = self.controller.start_job(req).map_err(rpc)?;
                to_payload(&StartResponse {
                    job_id: job.job_id,
                    state: job.state,
                })
            }
            names::STATUS => {
                let req: StatusRequest = parse(request)?;
                to_payload(&self.controller.job_status(&req.job_id).map_err(rpc)?)
            }
            names::LIST => {
                let req: ListRequest = parse(request)?;
                let jobs = self.controller.list_jobs(&req.target_id).map_err(rpc)?;
                to_payload(&ListResponse { jobs })
            }
            names::CANCEL => {
                let req: CancelRequest = parse(request)?;
                to_payload(&self.controller.cancel_job(&req.job_id).map_err(rpc)?)
            }
            names::CANCEL_ALL => {
                let req: CancelAllRequest = parse(request)?;
                to_payload(
                    &self
                        .controller
                        .cancel_all_jobs_for_target(&req.target_id)
                        .map_err(rpc)?,
                )
            }
            names::ARTIFACTS_LIST => {
                let req: ArtifactsListRequest = parse(request)?;
                let page = self
                    .controller
                    .artifacts()
                    .page(&ArtifactQuery {
                        target_id: req.target_id,
                        job_id: req.job_id,
                        after: req.after,
                        limit: req.limit,
                    })
                    .map_err(|e| rpc(e.into()))?;
                to_payload(&ArtifactsListResponse {
                    artifacts: page.artifacts,
                    next_after: page.next_after,
                })
            }
            names::ARTIFACTS_GET => {
                let req: ArtifactsGetRequest = parse(request)?;
                let artifacts = self.controller.artifacts();
                let record = artifacts
                    .get(&req.artifact_id)
                    .ok_or_else(|| rpc(ControllerError::not_found("artifact", &req.artifact_id)))?;
                let inline_base64 = artifacts.inline_payload_b64(&record);
                to_payload(&ArtifactsGetResponse {
                    storage_ref: record.storage_ref.clone(),
                    record,
                    inline_base64,
                })
            }
            other => Err(RpcError::unknown_operation(other)),
        }
    }
}
