//! Operation-specific types.

pub mod artifacts;
pub mod cancel;
pub mod job;
pub mod start;
pub mod status;

pub use artifacts::{
    ArtifactRecord, ArtifactsGetRequest, ArtifactsGetResponse, ArtifactsListRequest,
    ArtifactsListResponse,
};
pub use cancel::{CancelAllRequest, CancelAllResponse, CancelRequest, CancelResponse};
pub use job::{JobError, JobSnapshot, JobState, JobType, ModuleSelector, Provenance};
pub use start::{StartRequest, StartResponse};
pub use status::{ListRequest, ListResponse, StatusRequest};

/// Known operation names.
pub mod names {
    pub const START: &str = "start";
    pub const STATUS: &str = "status";
    pub const LIST: &str = "list";
    pub const CANCEL: &str = "cancel";
    pub const CANCEL_ALL: &str = "cancel_all";
    pub const ARTIFACTS_LIST: &str = "artifacts_list";
    pub const ARTIFACTS_GET: &str = "artifacts_get";
}
