use anyhow::Result;
use rekord_core::cache::Cache;
use rekord_core::repository::Repository;
use rekord_core::writer::{put, PutSettings};
use std::path::PathBuf;
use std::sync::Arc;

#[allow(clippy::too_many_arguments)]
pub async fn run(
    url: &str,
    password: &str,
    paths: Vec<PathBuf>,
    name: Option<String>,
    follow_symlinks: bool,
    raw: bool,
    workers: usize,
) -> Result<()> {
    let repo = Arc::new(Repository::open(url, password).await?);
    let cache = Arc::new(Cache::open_or_empty(&crate::cache_path(url)));

    let settings = PutSettings {
        raw,
        follow_symlinks,
        name,
        workers,
    };

    let outcome = put(repo, cache, &paths, &settings).await?;

    match outcome.tag_name {
        Some(tag) => println!("Snapshot {} stored as tag {tag} ({} bytes, {} newly stored)", outcome.oid, outcome.total_len, outcome.stored_len),
        None => println!("Stored {} ({} bytes, {} newly stored)", outcome.oid, outcome.total_len, outcome.stored_len),
    }
    Ok(())
}
