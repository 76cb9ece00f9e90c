use futures::stream::{self, StreamExt};
use tracing::{error, info};

use super::engine::{SyncError, SyncJob, SyncOutcome};
use super::JobDefinition;
use crate::config::TargetConfig;
use crate::db::RecordStore;
use crate::esi::PageSource;
use crate::model::{Credentials, Owner};

/// An owner, its grants and the jobs to run for it.
#[derive(Debug, Clone)]
pub struct Target {
    pub owner: Owner,
    pub credentials: Credentials,
    pub jobs: Vec<&'static JobDefinition>,
}

impl Target {
    pub fn new(owner: Owner, credentials: Credentials, jobs: Vec<&'static JobDefinition>) -> Self {
        Self {
            owner,
            credentials,
            jobs,
        }
    }

    /// Resolve job names from config. Unknown names are dropped; `validate`
    /// rejects them before this point. A non-empty `only` keeps just those jobs.
    pub fn from_config(cfg: &TargetConfig, only: &[String]) -> Self {
        let jobs = cfg
            .jobs
            .iter()
            .filter(|name| only.is_empty() || only.contains(name))
            .filter_map(|name| super::find(name))
            .collect();
        Self::new(cfg.owner(), cfg.credentials.clone(), jobs)
    }
}

#[derive(Debug)]
pub struct RunResult {
    pub job: &'static str,
    pub owner: Owner,
    pub result: Result<SyncOutcome, SyncError>,
}

impl RunResult {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Run every (target, job) pair with at most `concurrency` runs in flight.
/// Runs are independent: one failing never cancels the others.
pub async fn run_targets(
    source: &dyn PageSource,
    store: &dyn RecordStore,
    targets: &[Target],
    concurrency: usize,
) -> Vec<RunResult> {
    let runs = targets
        .iter()
        .flat_map(|target| target.jobs.iter().map(move |job| (target, *job)));

    let results: Vec<RunResult> = stream::iter(runs)
        .map(|(target, job)| async move {
            let result = SyncJob::new(job, target.owner)
                .run(source, store, &target.credentials)
                .await;
            match &result {
                Ok(SyncOutcome::Skipped) => info!(job = job.name, owner = %target.owner, "unchanged"),
                Ok(SyncOutcome::Completed(report)) => info!(
                    job = job.name,
                    owner = %target.owner,
                    upserted = report.upserted,
                    deleted = report.deleted,
                    "synced"
                ),
                Err(e) => error!(job = job.name, owner = %target.owner, error = %e, "sync failed"),
            }
            RunResult {
                job: job.name,
                owner: target.owner,
                result,
            }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let failed = results.iter().filter(|r| !r.is_ok()).count();
    info!(runs = results.len(), failed, "dispatch finished");
    results
}
