use anyhow::Result;
use hegemon_core::{restore::RestoreEngine, Config, CredentialResolver};
use tracing::info;

pub async fn run(config: Config, artifact: &str) -> Result<()> {
    let credentials = CredentialResolver::shared();
    let engine = RestoreEngine::new(config, credentials.clone())?;

    let result = engine.run(artifact).await;
    credentials.clear_all();
    let report = result?;

    info!("Restore completed successfully");
    println!(
        "Restored {} in {:.1}s",
        report.artifact.display(),
        report.elapsed.as_secs_f64()
    );
    Ok(())
}
