use anyhow::Result;
use hegemon_core::{backup::BackupEngine, Config, CredentialResolver, Scheduler};
use std::sync::Arc;
use tracing::info;

pub async fn run(config: Config) -> Result<()> {
    let credentials = CredentialResolver::shared();
    let engine = Arc::new(BackupEngine::new(config, credentials.clone())?);
    let scheduler = Arc::new(Scheduler::new(engine)?);

    let handle = scheduler.clone().spawn();

    tokio::signal::ctrl_c().await?;
    info!("Received interrupt, stopping scheduler");
    scheduler.shutdown();
    handle.await?;

    credentials.clear_all();
    Ok(())
}
