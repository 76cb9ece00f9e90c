use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::Parser;
use esi_sync::config;
use esi_sync::esi::{EsiClient, NoCache, PageRequest};

#[derive(Parser, Debug)]
struct Args {
    /// Path to YAML config
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Endpoint template, e.g. /corporations/{corporation_id}/assets/
    #[arg(long)]
    endpoint: String,

    /// API version segment
    #[arg(long, default_value = "latest")]
    version: String,

    /// Endpoint parameter as name=value (repeatable)
    #[arg(long = "param", value_parser = parse_param)]
    params: Vec<(String, String)>,

    #[arg(long, default_value_t = 1)]
    page: u32,

    /// Bearer token; defaults to the first configured target's token
    #[arg(long)]
    token: Option<String>,
}

fn parse_param(raw: &str) -> Result<(String, String)> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| anyhow!("expected name=value, got '{}'", raw))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let cfg = config::load(Some(&args.config))?;
    let client = EsiClient::from_config(&cfg.esi, Arc::new(NoCache))?;

    let token = args
        .token
        .or_else(|| cfg.targets.iter().find_map(|t| t.credentials.access_token.clone()));
    let mut request = PageRequest::new(args.endpoint, args.version)
        .page(args.page)
        .token(token);
    for (name, value) in args.params {
        request = request.param(name, value);
    }

    println!("URL: {}", client.build_url(&request)?);
    let response = client.fetch(&request).await?;
    println!("Pages: {}", response.pages);
    if let Some(expires) = response.expires {
        println!("Expires: {}", expires.to_rfc3339());
    }
    if let Some(etag) = &response.etag {
        println!("ETag: {}", etag);
    }
    println!("Cached: {}", response.is_cached_load());

    let page = response
        .into_page()
        .ok_or_else(|| anyhow!("response body is neither an array nor an object"))?;
    println!("Items on page: {}", page.items.len());
    match page.items.first() {
        Some(item) => println!("First item:\n{}", serde_json::to_string_pretty(item)?),
        None => println!("First item: <none>"),
    }
    Ok(())
}
