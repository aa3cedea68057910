use anyhow::Result;
use hegemon_core::{Config, StorageManager};

pub async fn run(config: &Config) -> Result<()> {
    let storage = StorageManager::new(config.storage.path.clone());
    let policy = &config.backup.retention;
    let deleted = storage.apply_retention(policy).await?;
    println!(
        "Pruned {} backup(s) (max_count {}, max_age_days {})",
        deleted, policy.max_count, policy.max_age_days
    );
    Ok(())
}
