//! Tollgate - forward HTTP/HTTPS proxy with token login and domain filtering.
//!
//! This is the main binary:
//! - `run` (default): the proxy listener, optionally with the control API
//! - `hosts add|remove|list`: edit the filter list
//! - `report <ip>`: per-client report from the event log
//! - `about`: product description

use std::sync::Arc;

use clap::Parser;
use tokio::sync::oneshot;

use tollgate_app::logging;
use tollgate_app::{Args, Command, HostsCommand};
use tollgate_proxy::ProxyController;
use tollgate_server::{Server, ServerConfig};

async fn run(controller: Arc<ProxyController>, api: Option<std::net::SocketAddr>) -> anyhow::Result<()> {
    let addr = controller.start()?;
    tracing::info!("Proxy listening on {}", addr);
    tracing::info!(
        "Filter list: {} ({} entries)",
        controller.config().filter_file.display(),
        controller.list_hosts().len()
    );

    let (api_stop, api_task) = match api {
        Some(api_addr) => {
            let config = ServerConfig::default()
                .with_host(api_addr.ip().to_string())
                .with_port(api_addr.port());
            let server = Server::new(config, Arc::clone(&controller))?;
            let (tx, rx) = oneshot::channel::<()>();
            let task = tokio::spawn(async move {
                let shutdown = async move {
                    let _ = rx.await;
                };
                if let Err(e) = server.run_until(shutdown).await {
                    tracing::error!("API server error: {}", e);
                }
            });
            (Some(tx), Some(task))
        }
        None => (None, None),
    };

    tokio::signal::ctrl_c().await?;
    tracing::info!("Interrupt received, shutting down");

    if let Some(tx) = api_stop {
        let _ = tx.send(());
    }
    if let Some(task) = api_task {
        let _ = task.await;
    }
    controller.shutdown().await;
    Ok(())
}

fn hosts(controller: &ProxyController, command: HostsCommand) -> anyhow::Result<()> {
    match command {
        HostsCommand::Add { host } => {
            if controller.add_host(&host)? {
                println!("Added {}", host.trim());
            } else {
                println!("{} is already listed", host.trim());
            }
        }
        HostsCommand::Remove { host } => {
            if controller.remove_host(&host)? {
                println!("Removed {}", host.trim());
            } else {
                anyhow::bail!("{} is not listed", host.trim());
            }
        }
        HostsCommand::List => {
            for host in controller.list_hosts() {
                println!("{host}");
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let command = args.command();

    if command == Command::About {
        println!("{}", tollgate_proxy::about());
        return Ok(());
    }

    let data_dir = args.data_dir();
    let _log_guard = logging::init(args.log_level(), &data_dir.join("logs"));
    tracing::debug!("Args: {:?}", args);

    let config = args.proxy_config()?;
    let controller = Arc::new(ProxyController::new(config)?);

    match command {
        Command::Run { api } => run(controller, api).await?,
        Command::Hosts(command) => hosts(&controller, command)?,
        Command::Report { ip } => {
            let path = controller.generate_report(&ip)?;
            println!("Report written to {}", path.display());
        }
        Command::About => println!("{}", controller.about()),
    }

    tracing::info!("Tollgate shutting down");
    Ok(())
}
