use crate::password;
use anyhow::Result;
use rekord_core::Repository;

pub async fn run(url: &str, full_password: Option<String>, write_password: Option<String>) -> Result<()> {
    let full_password = full_password.unwrap_or_else(password::generate);
    let write_password = write_password.unwrap_or_else(password::generate);

    Repository::init(url, &full_password, &write_password).await?;

    println!("Initialized repository at {url}");
    println!("Full (read+write) password:  {full_password}");
    println!("Write-only password:         {write_password}");
    println!("Store these somewhere safe — they cannot be recovered if lost.");
    Ok(())
}
