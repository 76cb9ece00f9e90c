//! Execution of one sync run: page through the remote collection, upsert what
//! it contains, then delete local rows the remote no longer has.
//!
//! ```text
//! START -> authorize -> fetch page 1 -> cached && local rows? -> SKIP
//!                                  \-> map -> upsert -> record keys -> next page ...
//!       ... last page -> flush -> RECONCILE -> END
//! ```
//!
//! Any failure ends the run before RECONCILE. Cleanup only ever runs
//! against the complete key set of a finished walk.

use chrono::Utc;
use std::collections::HashSet;
use thiserror::Error;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use super::batcher::UpsertBatcher;
use super::known_keys::KnownKeys;
use super::paginator::Paginator;
use super::JobDefinition;
use crate::db::{LocalRecord, NaturalKey, RecordStore};
use crate::esi::{Page, PageSource};
use crate::model::{Credentials, Owner, SyncScope};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{job} for {owner} needs {missing}")]
    Unauthorized {
        job: &'static str,
        owner: Owner,
        missing: String,
    },
    #[error("fetching page {page} failed: {cause:#}")]
    Transport { page: u32, cause: anyhow::Error },
    #[error("item {index} on page {page} is malformed: {source}")]
    Mapping {
        page: u32,
        index: usize,
        source: serde_json::Error,
    },
    #[error("{job} produced a record on page {page} without key columns {columns:?}")]
    MissingKey {
        job: &'static str,
        page: u32,
        columns: &'static [&'static str],
    },
    #[error("store failure: {0:#}")]
    Persistence(anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncReport {
    pub pages: u32,
    pub upserted: usize,
    pub batches: usize,
    pub deleted: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// First page came from cache and local rows already exist.
    Skipped,
    Completed(SyncReport),
}

/// One run of one job for one owner. Consumed by `run`, which bounds the
/// lifetime of its known-key set.
#[derive(Debug)]
pub struct SyncJob<'a> {
    definition: &'a JobDefinition,
    scope: SyncScope,
    known_keys: KnownKeys,
}

impl<'a> SyncJob<'a> {
    pub fn new(definition: &'a JobDefinition, owner: Owner) -> Self {
        Self {
            definition,
            scope: definition.scope(owner),
            known_keys: KnownKeys::new(),
        }
    }

    pub async fn run(
        self,
        source: &dyn PageSource,
        store: &dyn RecordStore,
        credentials: &Credentials,
    ) -> Result<SyncOutcome, SyncError> {
        let span = info_span!(
            "sync",
            run_id = %Uuid::new_v4(),
            job = self.definition.name,
            owner = %self.scope.owner,
        );
        self.execute(source, store, credentials).instrument(span).await
    }

    async fn execute(
        mut self,
        source: &dyn PageSource,
        store: &dyn RecordStore,
        credentials: &Credentials,
    ) -> Result<SyncOutcome, SyncError> {
        let def = self.definition;
        if let Some(missing) = def.missing_grant(credentials) {
            return Err(SyncError::Unauthorized {
                job: def.name,
                owner: self.scope.owner,
                missing,
            });
        }

        let mut paginator = Paginator::new();
        let mut batcher = UpsertBatcher::new(def);
        let mut pages = 0;

        loop {
            let page_no = paginator.current();
            let request = def.request(&self.scope, page_no, credentials);
            let page = match source.retrieve(&request).await {
                Ok(page) => page,
                Err(cause) => {
                    let err = SyncError::Transport {
                        page: page_no,
                        cause,
                    };
                    return Err(abort(&mut batcher, store, err).await);
                }
            };
            pages += 1;

            if paginator.is_first() && should_skip(def, &self.scope, &page, store).await? {
                info!(items = page.items.len(), "cached load with local data present; skipping");
                return Ok(SyncOutcome::Skipped);
            }

            let records = match map_page(def, &self.scope, &page, page_no) {
                Ok(records) => records,
                Err(err) => return Err(abort(&mut batcher, store, err).await),
            };
            let keys = match page_keys(def, &records, page_no) {
                Ok(keys) => keys,
                Err(err) => return Err(abort(&mut batcher, store, err).await),
            };

            batcher.push(store, records).await?;
            if let Some(keys) = keys {
                self.known_keys.record(keys);
            }

            if !paginator.advance(page.total_pages) {
                break;
            }
        }

        batcher.flush(store).await?;

        let deleted = match def.known_key {
            Some(key_columns) => {
                reconcile(def, &self.scope, key_columns, &self.known_keys.all(), store).await?
            }
            None => 0,
        };

        let report = SyncReport {
            pages,
            upserted: batcher.written(),
            batches: batcher.batches(),
            deleted,
        };
        info!(
            pages = report.pages,
            upserted = report.upserted,
            batches = report.batches,
            deleted = report.deleted,
            "sync completed"
        );
        Ok(SyncOutcome::Completed(report))
    }
}

/// A cached first page means nothing changed upstream since the last fetch;
/// that is only safe to act on when a previous run left rows behind.
pub async fn should_skip(
    def: &JobDefinition,
    scope: &SyncScope,
    page: &Page,
    store: &dyn RecordStore,
) -> Result<bool, SyncError> {
    if !page.is_cached_load {
        return Ok(false);
    }
    let existing = store
        .count(def.table, &scope.owner)
        .await
        .map_err(SyncError::Persistence)?;
    Ok(existing > 0)
}

/// Map every item of a page, failing on the first malformed one.
pub fn map_page(
    def: &JobDefinition,
    scope: &SyncScope,
    page: &Page,
    page_no: u32,
) -> Result<Vec<LocalRecord>, SyncError> {
    let now = Utc::now();
    let mut records = Vec::with_capacity(page.items.len());
    for (index, item) in page.items.iter().enumerate() {
        let mapped = (def.mapper)(item, scope, now).map_err(|source| SyncError::Mapping {
            page: page_no,
            index,
            source,
        })?;
        records.extend(mapped);
    }
    Ok(records)
}

fn page_keys(
    def: &JobDefinition,
    records: &[LocalRecord],
    page_no: u32,
) -> Result<Option<Vec<NaturalKey>>, SyncError> {
    let Some(columns) = def.known_key else {
        return Ok(None);
    };
    records
        .iter()
        .map(|record| {
            record.key(columns).ok_or(SyncError::MissingKey {
                job: def.name,
                page: page_no,
                columns,
            })
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
}

/// Delete the scope's rows whose key was not seen in this run.
pub async fn reconcile(
    def: &JobDefinition,
    scope: &SyncScope,
    key_columns: &[&str],
    known: &HashSet<NaturalKey>,
    store: &dyn RecordStore,
) -> Result<u64, SyncError> {
    let deleted = store
        .delete_missing(def.table, &scope.owner, key_columns, known)
        .await
        .map_err(SyncError::Persistence)?;
    if deleted > 0 {
        info!(deleted, known = known.len(), "removed records gone upstream");
    }
    Ok(deleted)
}

/// Persist records of pages that were fully mapped before the failure, then
/// hand back the original error.
async fn abort(batcher: &mut UpsertBatcher<'_>, store: &dyn RecordStore, err: SyncError) -> SyncError {
    if let Err(flush_err) = batcher.flush(store).await {
        warn!(error = %flush_err, "could not flush pending records after failure");
    }
    warn!(error = %err, "sync aborted");
    err
}
