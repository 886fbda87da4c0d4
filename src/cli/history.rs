use anyhow::Result;
use std::sync::Arc;

use crate::cli::SortOrder;
use crate::config::Config;
use crate::ctx::Ctx;
use crate::deploy::Deployer;
use crate::output;

pub async fn run(ctx: &Ctx, config: Arc<Config>, sort: SortOrder) -> Result<()> {
    let deployer = Deployer::new(config);
    let ascending = matches!(sort, SortOrder::Asc);
    let entries = deployer.history(ctx, ascending).await?;

    if entries.is_empty() {
        output::info("No versions have been deployed yet");
        return Ok(());
    }
    for entry in entries {
        println!("{}  {}", entry.timestamp.to_rfc3339(), entry.version);
    }
    Ok(())
}
