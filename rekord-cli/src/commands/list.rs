use anyhow::Result;
use rekord_core::reader::list;
use rekord_core::repository::Repository;

pub async fn run(url: &str, password: &str) -> Result<()> {
    let repo = Repository::open(url, password).await?;
    let snapshots = list(&repo).await?;

    if snapshots.is_empty() {
        println!("No snapshots.");
        return Ok(());
    }

    println!("{:<18} {:<70} {:<12} {:>14} {:>14}", "TAG", "OID", "TIME", "SIZE", "STORED");
    for snapshot in snapshots {
        println!(
            "{:<18} {:<70} {:<12} {:>14} {:>14}  {}",
            snapshot.tag_name, snapshot.oid, snapshot.time, snapshot.len, snapshot.stored, snapshot.name
        );
    }
    Ok(())
}
