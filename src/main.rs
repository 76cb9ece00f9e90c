use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use esi_sync::config;
use esi_sync::db::{self, SqliteStore};
use esi_sync::esi::{EsiClient, FileCache, NoCache, ResponseCache};
use esi_sync::jobs::{self, Target};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Only run these jobs (repeatable). Defaults to every configured job.
    #[arg(long = "job")]
    jobs: Vec<String>,

    /// Print an example config and exit
    #[arg(long)]
    print_example: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    if args.print_example {
        print!("{}", config::example());
        return Ok(());
    }

    for name in &args.jobs {
        if jobs::find(name).is_none() {
            bail!("unknown job '{}'", name);
        }
    }

    let cfg = config::load(Some(&args.config))
        .with_context(|| format!("loading {}", args.config.display()))?;
    cfg.ensure_dirs()?;

    let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| cfg.database_url());
    let pool = db::init_pool(&database_url)
        .await
        .with_context(|| format!("opening {}", database_url))?;
    db::run_migrations(&pool).await?;
    let store = SqliteStore::new(pool);

    let cache: Arc<dyn ResponseCache> = if cfg.esi.cache_responses {
        let cache = FileCache::open(cfg.cache_dir())
            .with_context(|| format!("opening cache {}", cfg.cache_dir().display()))?;
        info!(dir = %cache.dir().display(), "caching ESI responses");
        Arc::new(cache)
    } else {
        Arc::new(NoCache)
    };
    let client = EsiClient::from_config(&cfg.esi, cache)?;

    let targets: Vec<Target> = cfg
        .targets
        .iter()
        .map(|t| Target::from_config(t, &args.jobs))
        .filter(|t| !t.jobs.is_empty())
        .collect();
    if targets.is_empty() {
        warn!("nothing to sync");
        return Ok(());
    }

    info!(targets = targets.len(), concurrency = cfg.app.concurrency, "starting sync");
    let results = jobs::run_targets(&client, &store, &targets, cfg.app.concurrency).await;

    let failed: Vec<_> = results.iter().filter(|r| !r.is_ok()).collect();
    if !failed.is_empty() {
        for run in &failed {
            if let Err(e) = &run.result {
                warn!(job = run.job, owner = %run.owner, "{}", e);
            }
        }
        bail!("{} of {} sync runs failed", failed.len(), results.len());
    }
    Ok(())
}
