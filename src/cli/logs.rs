use anyhow::Result;
use std::sync::Arc;

use crate::config::Config;
use crate::ctx::Ctx;
use crate::deploy::Deployer;

pub async fn run(
    ctx: &Ctx,
    config: Arc<Config>,
    follow: bool,
    lines: Option<u32>,
    since: Option<&str>,
) -> Result<()> {
    let deployer = Deployer::new(config);
    let container = deployer.current_container(ctx).await?;
    deployer.logs(ctx, &container, follow, lines, since).await
}
