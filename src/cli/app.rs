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
            let container = deployer.current_container(ctx).await?;
            let info = deployer.show_service_info(ctx, &container).await?;
            print_info(&info);
        }
        ContainerAction::Start => {
            let container = deployer.current_container(ctx).await?;
            deployer.start_service(ctx, &container).await?;
            output::success("Started");
        }
        ContainerAction::Stop => {
            let container = deployer.current_container(ctx).await?;
            deployer.stop_service(ctx, &container).await?;
            output::success("Stopped");
        }
        ContainerAction::Restart => {
            let container = deployer.current_container(ctx).await?;
            deployer.restart_service(ctx, &container).await?;
            output::success("Restarted");
        }
        ContainerAction::Logs { follow, lines, since } => {
            let container = deployer.current_container(ctx).await?;
            deployer.logs(ctx, &container, follow, lines, since.as_deref()).await?;
        }
        ContainerAction::Exec { interactive, cmd } => {
            let container = deployer.current_container(ctx).await?;
            deployer.exec(ctx, &container, &cmd.join(" "), interactive).await?;
        }
    }

    Ok(())
}

fn print_info(info: &std::collections::BTreeMap<String, String>) {
    for (host, text) in info {
        output::header(host);
        print!("{}", text);
    }
}
