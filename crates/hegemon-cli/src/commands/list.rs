use anyhow::{bail, Result};
use hegemon_core::{Config, StorageManager};
use tracing::info;

pub async fn run(config: &Config, format: &str) -> Result<()> {
    let storage = StorageManager::new(config.storage.path.clone());
    info!("Listing backups in: {}", storage.root().display());
    let artifacts = storage.list().await?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&artifacts)?);
        }
        "text" => {
            if artifacts.is_empty() {
                println!("No backups found in {}", storage.root().display());
                return Ok(());
            }
            println!("Available backups:");
            for artifact in &artifacts {
                println!(
                    "  - {} ({} bytes, created {}, sha256 {})",
                    artifact.file_name,
                    artifact.size_bytes,
                    artifact
                        .created_at
                        .with_timezone(&chrono::Local)
                        .format("%Y-%m-%d %H:%M:%S"),
                    &artifact.checksum[..artifact.checksum.len().min(12)]
                );
            }
        }
        other => bail!("Unknown output format: {} (expected text or json)", other),
    }

    Ok(())
}
