use anyhow::Result;
use std::sync::Arc;

use crate::config::Config;
use crate::ctx::Ctx;
use crate::deploy::Deployer;

pub async fn run(ctx: &Ctx, config: Arc<Config>) -> Result<()> {
    let deployer = Deployer::new(config);
    deployer.deploy(ctx).await?;
    Ok(())
}
