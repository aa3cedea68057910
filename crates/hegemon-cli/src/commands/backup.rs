use anyhow::Result;
use hegemon_core::{backup::BackupEngine, Config, CredentialResolver};
use tracing::info;

pub async fn run(config: Config, kind: &str) -> Result<()> {
    let credentials = CredentialResolver::shared();
    let engine = BackupEngine::new(config, credentials.clone())?;

    let result = engine.run(kind).await;
    credentials.clear_all();
    let report = result?;

    info!("Backup completed successfully");
    println!("Stored: {}", report.artifact.file_name);
    println!("  Size:      {} bytes", report.artifact.size_bytes);
    println!("  SHA-256:   {}", report.artifact.checksum);
    println!("  Compressed: {}", if report.compressed { "yes" } else { "no" });
    if report.retention_deleted > 0 {
        println!("  Pruned:    {} old backup(s)", report.retention_deleted);
    }
    println!("  Duration:  {:.1}s", report.elapsed.as_secs_f64());
    Ok(())
}
