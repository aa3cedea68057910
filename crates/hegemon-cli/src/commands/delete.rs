use anyhow::{bail, Result};
use hegemon_core::{Config, StorageManager};

pub async fn run(config: &Config, name: &str) -> Result<()> {
    let storage = StorageManager::new(config.storage.path.clone());
    if !storage.delete(name).await? {
        bail!("No backup named {} in the ledger", name);
    }
    println!("Deleted {}", name);
    Ok(())
}
