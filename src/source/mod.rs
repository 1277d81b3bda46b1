//! Module source resolution
//!
//! Turns a caller's [`ModuleSelector`] into source text plus the
//! [`Provenance`] recorded on the job. Drafts and published modules live in
//! stores outside this crate; [`StaticSourceResolver`] is an in-memory stand-in
//! for them.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use hooklane_protocol::ops::{ModuleSelector, Provenance};
use hooklane_protocol::ErrorCode;

/// Errors from a source store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    #[error("invalid module selector: {0}")]
    Invalid(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("source store failure: {0}")]
    Internal(String),
}

impl SourceError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::Invalid(_) => ErrorCode::InvalidArgument,
            Self::AlreadyExists(_) => ErrorCode::AlreadyExists,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }
}

/// Source text with its origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSource {
    pub source: String,
    pub provenance: Provenance,
}

/// Resolves selectors to source text.
pub trait SourceResolver: Send + Sync {
    fn resolve(&self, selector: &ModuleSelector) -> Result<ResolvedSource, SourceError>;
}

/// In-memory drafts and published modules.
#[derive(Debug, Default)]
pub struct StaticSourceResolver {
    drafts: RwLock<HashMap<String, String>>,
    /// Keyed by (name, version).
    modules: RwLock<HashMap<(String, String), String>>,
}

impl StaticSourceResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace a draft.
    pub fn put_draft(&self, draft_id: impl Into<String>, source: impl Into<String>) {
        self.drafts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(draft_id.into(), source.into());
    }

    /// Publish a module version. Published versions are immutable.
    pub fn publish(
        &self,
        name: impl Into<String>,
        version: impl Into<String>,
        source: impl Into<String>,
    ) -> Result<(), SourceError> {
        let key = (name.into(), version.into());
        let mut modules = self.modules.write().unwrap_or_else(PoisonError::into_inner);
        if modules.contains_key(&key) {
            return Err(SourceError::AlreadyExists(format!("module {}@{}", key.0, key.1)));
        }
        modules.insert(key, source.into());
        Ok(())
    }
}

impl SourceResolver for StaticSourceResolver {
    fn resolve(&self, selector: &ModuleSelector) -> Result<ResolvedSource, SourceError> {
        match selector {
            ModuleSelector::Inline { source } => {
                if source.trim().is_empty() {
                    return Err(SourceError::Invalid("inline source is empty".to_string()));
                }
                Ok(ResolvedSource {
                    source: source.clone(),
                    provenance: Provenance::Inline,
                })
            }
            ModuleSelector::Draft { draft_id } => {
                if draft_id.is_empty() {
                    return Err(SourceError::Invalid("draft_id is empty".to_string()));
                }
                let drafts = self.drafts.read().unwrap_or_else(PoisonError::into_inner);
                let source = drafts.get(draft_id).ok_or_else(|| SourceError::NotFound {
                    kind: "draft",
                    id: draft_id.clone(),
                })?;
                Ok(ResolvedSource {
                    source: source.clone(),
                    provenance: Provenance::Draft {
                        draft_id: draft_id.clone(),
                    },
                })
            }
            ModuleSelector::Module { name, version } => {
                if name.is_empty() || version.is_empty() {
                    return Err(SourceError::Invalid(
                        "module name and version are required".to_string(),
                    ));
                }
                let modules = self.modules.read().unwrap_or_else(PoisonError::into_inner);
                let source = modules
                    .get(&(name.clone(), version.clone()))
                    .ok_or_else(|| SourceError::NotFound {
                        kind: "module",
                        id: format!("{}@{}", name, version),
                    })?;
                Ok(ResolvedSource {
                    source: source.clone(),
                    provenance: Provenance::Module {
                        name: name.clone(),
                        version: version.clone(),
                    },
                })
            }
        }
    }
}
