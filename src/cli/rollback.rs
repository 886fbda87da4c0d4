use anyhow::Result;
use std::sync::Arc;

use crate::config::Config;
use crate::ctx::Ctx;
use crate::deploy::Deployer;

pub async fn run(ctx: &Ctx, config: Arc<Config>, version: &str) -> Result<()> {
    let deployer = Deployer::new(config);
    deployer.rollback(ctx, version).await
}
