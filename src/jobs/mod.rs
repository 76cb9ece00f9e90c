//! Sync jobs: one shared engine driven by declarative per-resource
//! definitions.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fmt;

use crate::db::{LocalRecord, UPDATED_AT};
use crate::esi::PageRequest;
use crate::model::{Credentials, Owner, OwnerKind, SyncScope};

pub mod batcher;
pub mod character;
pub mod corporation;
pub mod dispatch;
pub mod engine;
pub mod known_keys;
pub mod paginator;

pub use batcher::UpsertBatcher;
pub use dispatch::{run_targets, RunResult, Target};
pub use engine::{SyncError, SyncJob, SyncOutcome, SyncReport};
pub use known_keys::KnownKeys;
pub use paginator::Paginator;

/// Turns one remote item into local rows for `scope`, stamped with `now`.
/// Most resources produce exactly one row per item; nested collections
/// (structure services) produce one per child.
pub type RecordMapper = fn(
    item: &Value,
    scope: &SyncScope,
    now: DateTime<Utc>,
) -> Result<Vec<LocalRecord>, serde_json::Error>;

/// Everything that distinguishes one resource's sync from another.
#[derive(Clone, Copy)]
pub struct JobDefinition {
    pub name: &'static str,
    pub owner_kind: OwnerKind,
    pub endpoint: &'static str,
    pub version: &'static str,
    pub required_scope: Option<&'static str>,
    /// Any one of these corporation roles is enough.
    pub required_roles: &'static [&'static str],
    pub tags: &'static [&'static str],
    pub table: &'static str,
    pub chunk_size: usize,
    /// Natural key tuple, scope column included.
    pub conflict_keys: &'static [&'static str],
    /// Columns refreshed when a row already exists.
    pub value_columns: &'static [&'static str],
    /// Columns, scope column excluded, compared against the remote key set
    /// during cleanup. `None` for single-object resources that are never
    /// reconciled.
    pub known_key: Option<&'static [&'static str]>,
    pub mapper: RecordMapper,
}

impl fmt::Debug for JobDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobDefinition")
            .field("name", &self.name)
            .field("endpoint", &self.endpoint)
            .field("version", &self.version)
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

impl JobDefinition {
    pub fn scope(&self, owner: Owner) -> SyncScope {
        SyncScope::new(owner, self.name)
    }

    /// Value columns plus `updated_at`. `created_at` is never updated.
    pub fn update_columns(&self) -> Vec<&'static str> {
        self.value_columns
            .iter()
            .copied()
            .chain(std::iter::once(UPDATED_AT))
            .collect()
    }

    pub fn request(&self, scope: &SyncScope, page: u32, credentials: &Credentials) -> PageRequest {
        PageRequest::new(self.endpoint, self.version)
            .param(scope.owner.column(), scope.owner.id())
            .page(page)
            .token(credentials.access_token.clone())
    }

    /// First grant this job needs that `credentials` lacks, if any.
    pub fn missing_grant(&self, credentials: &Credentials) -> Option<String> {
        if let Some(scope) = self.required_scope {
            if !credentials.has_scope(scope) {
                return Some(format!("scope {}", scope));
            }
        }
        if !credentials.has_any_role(self.required_roles) {
            return Some(format!("one of roles [{}]", self.required_roles.join(", ")));
        }
        None
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size.max(1)
    }
}

pub static JOBS: &[&JobDefinition] = &[
    &corporation::ASSETS,
    &corporation::BLUEPRINTS,
    &corporation::STRUCTURE_SERVICES,
    &character::INFO,
    &character::AGENTS_RESEARCH,
    &character::CONTACTS,
];

pub fn all() -> &'static [&'static JobDefinition] {
    JOBS
}

pub fn find(name: &str) -> Option<&'static JobDefinition> {
    JOBS.iter().copied().find(|job| job.name == name)
}
