//! Read-only dump of a persistent cache database

use clap::Parser;
use fincache_server::CacheStore;
use fincache_server::agent::sqlite::SqliteCacheStore;
use fincache_server::agent::{CacheError, CacheGeneration};
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(name = "fincache-inspect")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path of the cache database (`<FINCACHE_CACHE_DIR>/cache.db`)
    db: PathBuf,

    /// Only show this generation
    #[arg(long)]
    generation: Option<String>,

    /// Only show entries whose target starts with this
    #[arg(long)]
    prefix: Option<String>,
}

/// One listed entry; `problem` is set when the stored entry fails to load
#[derive(Debug)]
struct EntryLine {
    key: String,
    status: Option<u16>,
    content_type: Option<String>,
    body_len: usize,
    stored_at: Option<String>,
    problem: Option<String>,
}

#[derive(Debug)]
struct GenerationReport {
    name: String,
    entries: Vec<EntryLine>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(&cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("fincache-inspect: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Returns `Ok(false)` when any entry failed to load
async fn run(cli: &Cli) -> Result<bool, Box<dyn Error>> {
    // Opening a missing path would create an empty database
    if !cli.db.is_file() {
        return Err(format!("{} does not exist", cli.db.display()).into());
    }
    let store = SqliteCacheStore::new(&cli.db)?;
    let reports = inspect(&store, cli.generation.as_deref(), cli.prefix.as_deref()).await?;

    let mut clean = true;
    for report in &reports {
        println!("{} ({} entries)", report.name, report.entries.len());
        for entry in &report.entries {
            match &entry.problem {
                Some(problem) => {
                    clean = false;
                    println!("  {}  !! {}", entry.key, problem);
                }
                None => println!(
                    "  {}  {}  {}  {} bytes  {}",
                    entry.key,
                    entry.status.unwrap_or_default(),
                    entry.content_type.as_deref().unwrap_or("-"),
                    entry.body_len,
                    entry.stored_at.as_deref().unwrap_or("-"),
                ),
            }
        }
    }
    Ok(clean)
}

async fn inspect(
    store: &dyn CacheStore,
    only: Option<&str>,
    prefix: Option<&str>,
) -> Result<Vec<GenerationReport>, CacheError> {
    let mut reports = Vec::new();
    for name in store.generation_names().await? {
        if only.is_some_and(|only| only != name) {
            continue;
        }
        // The generation exists, so this never creates one
        let generation: CacheGeneration = store.open(&name).await?;

        let mut entries = Vec::new();
        for key in store.keys(&generation).await? {
            if prefix.is_some_and(|p| !key.target().starts_with(p)) {
                continue;
            }
            let line = match store.lookup(&generation, &key).await {
                Ok(Some(entry)) => EntryLine {
                    key: key.to_string(),
                    status: Some(entry.response.status),
                    content_type: entry.response.header("content-type").map(str::to_string),
                    body_len: entry.response.body.len(),
                    stored_at: Some(entry.stored_at.to_rfc3339()),
                    problem: None,
                },
                Ok(None) => continue,
                Err(e) => EntryLine {
                    key: key.to_string(),
                    status: None,
                    content_type: None,
                    body_len: 0,
                    stored_at: None,
                    problem: Some(e.to_string()),
                },
            };
            entries.push(line);
        }
        reports.push(GenerationReport { name, entries });
    }
    Ok(reports)
}
