use anyhow::Result;
use std::sync::Arc;

use crate::cli::ContainerAction;
use crate::config::Config;
use crate::ctx::Ctx;
use crate::deploy::Deployer;
use crate::output;

pub async fn run(ctx: &Ctx, config: Arc<Config>, action: ContainerAction) -> Result<()> {
    let deployer = Deployer::new(config);

    match action {
        ContainerAction::Show => {
            let info = deployer.show_proxy_info(ctx).await?;
            for (host, text) in &info {
                output::header(host);
                print!("{}", text);
            }
        }
        ContainerAction::Start => {
            let container = deployer.proxy_container()?;
            deployer.start_service(ctx, &container).await?;
            output::success("Started");
        }
        ContainerAction::Stop => {
            let container = deployer.proxy_container()?;
            deployer.stop_service(ctx, &container).await?;
            output::success("Stopped");
        }
        ContainerAction::Restart => {
            let container = deployer.proxy_container()?;
            deployer.restart_service(ctx, &container).await?;
            output::success("Restarted");
        }
        ContainerAction::Logs { follow, lines, since } => {
            let container = deployer.proxy_container()?;
            deployer.logs(ctx, &container, follow, lines, since.as_deref()).await?;
        }
        ContainerAction::Exec { interactive, cmd } => {
            let container = deployer.proxy_container()?;
            deployer.exec(ctx, &container, &cmd.join(" "), interactive).await?;
        }
    }

    Ok(())
}
