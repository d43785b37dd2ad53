use anyhow::{Context, Result};
use rekord_core::oid::Oid;
use rekord_core::reader::{get, GetSettings};
use rekord_core::repository::Repository;
use std::path::PathBuf;
use std::sync::Arc;

pub async fn run(
    url: &str,
    password: &str,
    oid: &str,
    destination: PathBuf,
    flat: bool,
    workers: usize,
) -> Result<()> {
    let oid = Oid::parse(oid).with_context(|| format!("invalid object id {oid}"))?;
    let repo = Arc::new(Repository::open(url, password).await?);

    let settings = GetSettings { workers, flat };

    get(repo, &oid, &destination, &settings).await?;

    println!("Restored {oid} to {}", destination.display());
    Ok(())
}
