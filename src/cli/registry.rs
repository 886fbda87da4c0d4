use anyhow::Result;
use std::sync::Arc;

use crate::cli::RegistryAction;
use crate::config::Config;
use crate::ctx::Ctx;
use crate::deploy::Deployer;
use crate::output;

pub async fn run(ctx: &Ctx, config: Arc<Config>, action: RegistryAction) -> Result<()> {
    let deployer = Deployer::new(config);
    match action {
        RegistryAction::Login => {
            deployer.registry_login(ctx).await?;
            output::success("Logged in on every server");
        }
        RegistryAction::Logout => {
            deployer.registry_logout(ctx).await?;
            output::success("Logged out on every server");
        }
    }
    Ok(())
}
