use anyhow::{bail, Result};
use hegemon_core::{Config, StorageManager};
use tracing::{info, warn};

pub async fn run(config: &Config, name: Option<&str>) -> Result<()> {
    let storage = StorageManager::new(config.storage.path.clone());

    let names: Vec<String> = match name {
        Some(name) => vec![name.to_string()],
        None => storage
            .list()
            .await?
            .into_iter()
            .map(|a| a.file_name)
            .collect(),
    };

    if names.is_empty() {
        println!("No backups to verify");
        return Ok(());
    }

    let mut failed = 0usize;
    for name in &names {
        match storage.verify(name).await {
            Ok(true) => println!("  OK       {}", name),
            Ok(false) => {
                failed += 1;
                println!("  MISMATCH {}", name);
            }
            Err(e) => {
                failed += 1;
                warn!(artifact = %name, error = %e, "Verification failed");
                println!("  ERROR    {} ({})", name, e);
            }
        }
    }

    if failed > 0 {
        bail!("{} of {} backup(s) failed verification", failed, names.len());
    }
    info!("All {} backup(s) verified", names.len());
    Ok(())
}
