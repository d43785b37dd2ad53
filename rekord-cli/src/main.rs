//! Entry point: parses [`args::Cli`], merges config-file/env/flag settings,
//! and dispatches to the matching `commands::*` module.
//!
//! Grounded on `examples/tvlfyi-tvix/store/src/bin/tvix-store.rs`'s
//! `main`/tracing-init/dispatch shape.

mod args;
mod commands;
mod config;
mod password;

use anyhow::{bail, Result};
use args::{Cli, Command};
use clap::Parser;
use config::FileConfig;
use std::path::PathBuf;

/// Deterministic per-repository metadata cache path, so repeat `put` runs
/// against the same repository reuse the same cache file.
fn cache_path(url: &str) -> PathBuf {
    let digest = blake3::hash(url.as_bytes());
    let dir = dirs::cache_dir().unwrap_or_else(std::env::temp_dir).join("rekord");
    let _ = std::fs::create_dir_all(&dir);
    dir.join(format!("{}.db", digest.to_hex()))
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("rekord: error: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    rekord_tracing::TracingBuilder::default().level(cli.log_level).build()?;

    let file_config = FileConfig::load(cli.config.as_deref())?;
    file_config.apply_to_env();

    let workers = cli
        .threads
        .or(file_config.threads)
        .unwrap_or_else(rekord_core::concurrency::default_worker_count);

    match cli.command {
        Command::Init {
            dir,
            full_password,
            write_password,
        } => {
            let url = dir.or(cli.repository).or(file_config.repository);
            let Some(url) = url else {
                bail!("no repository given: pass a directory, -R/--repository, REKORD_REPOSITORY, or set [Repository] url in the config file");
            };
            commands::init::run(&url, full_password, write_password).await
        }
        Command::Put {
            paths,
            name,
            follow_symlinks,
            raw,
        } => {
            let url = repository_url(cli.repository, &file_config)?;
            let password = password::resolve(cli.password, "repository password")?;
            commands::put::run(&url, &password, paths, name, follow_symlinks, raw, workers).await
        }
        Command::Get { oid, destination, flat } => {
            let url = repository_url(cli.repository, &file_config)?;
            let password = password::resolve(cli.password, "repository password")?;
            commands::get::run(&url, &password, &oid, destination, flat, workers).await
        }
        Command::List => {
            let url = repository_url(cli.repository, &file_config)?;
            let password = password::resolve(cli.password, "repository password")?;
            commands::list::run(&url, &password).await
        }
    }
}

fn repository_url(flag: Option<String>, file_config: &FileConfig) -> Result<String> {
    flag.or_else(|| file_config.repository.clone())
        .ok_or_else(|| anyhow::anyhow!("no repository given: pass -R/--repository, REKORD_REPOSITORY, or set [Repository] url in the config file"))
}
