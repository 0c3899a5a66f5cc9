use anyhow::Result;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use super::StartArgs;
use crate::core::config::MembraneConfig;
use crate::core::container::{DockerCli, FunctionLauncher};
use crate::core::lifecycle::LifecycleManager;
use crate::core::services::Services;
use crate::core::terminal::{self, ConsoleStatus, print_link, print_status, print_step};
use crate::interfaces::control::ControlPlaneServer;
use crate::interfaces::gateway::{GatewayServer, GatewayState};

async fn load_config(args: &StartArgs) -> Result<MembraneConfig> {
    let mut config = match &args.config {
        Some(path) => MembraneConfig::load_file(path).await?,
        None => MembraneConfig::load(std::env::current_dir()?).await?,
    };
    if let Some(host) = &args.host {
        config.gateway_host = host.clone();
    }
    if let Some(port) = args.gateway_port {
        config.gateway_port = port;
    }
    if let Some(port) = args.control_port {
        config.control_port = port;
    }
    Ok(config)
}

pub(super) async fn run_start(args: StartArgs) -> Result<()> {
    let config = load_config(&args).await?;
    let log_tx = crate::logging::init(&config.log_level)?;
    config.log_summary();

    terminal::print_banner();
    print_step("Starting membrane...");

    let mut lifecycle = LifecycleManager::new().await?;
    let services = Services::new(&config, lifecycle.scheduler.clone());
    services.pool.subscribe(Arc::new(ConsoleStatus));

    lifecycle.attach(Arc::new(Mutex::new(ControlPlaneServer::new(
        services.pool.clone(),
        config.control_addr(),
    ))));

    let gateway_state = GatewayState::new(
        services.clone(),
        log_tx,
        config.proxy_connect_timeout(),
    )?;
    lifecycle.attach(Arc::new(Mutex::new(GatewayServer::new(
        gateway_state,
        config.gateway_addr(),
        config.gateway_idle_timeout(),
    ))));

    if args.launch_functions && !config.functions.is_empty() {
        lifecycle.attach(Arc::new(Mutex::new(FunctionLauncher::new(
            Arc::new(DockerCli::new(config.engine.clone())),
            config.functions.clone(),
            config.control_port,
            config.run_dir.clone(),
        ))));
    }

    lifecycle.start().await?;

    print_link("Gateway", &config.gateway_url());
    print_link("Control plane", &format!("ws://{}/register", config.control_addr()));
    print_status("Storage", &config.storage_dir.display().to_string());
    print_status("Functions", &config.functions.len().to_string());
    println!();

    tokio::signal::ctrl_c().await?;
    info!("Interrupt received, shutting down");
    lifecycle.shutdown().await
}
