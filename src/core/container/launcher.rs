use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::{BuildOptions, ContainerEngine, ContainerError, ContainerSpec};
use crate::core::config::FunctionConfig;
use crate::core::lifecycle::LifecycleComponent;

const HOST_ALIAS: &str = "host.docker.internal";

struct RunningFunction {
    name: String,
    container_id: String,
    logs: Option<tokio::task::JoinHandle<()>>,
}

/// Builds and runs every configured function container, pointing each one
/// at the control plane.
pub struct FunctionLauncher {
    engine: Arc<dyn ContainerEngine>,
    functions: Vec<FunctionConfig>,
    control_port: u16,
    log_dir: PathBuf,
    running: Vec<RunningFunction>,
}

impl FunctionLauncher {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        functions: Vec<FunctionConfig>,
        control_port: u16,
        run_dir: PathBuf,
    ) -> Self {
        Self {
            engine,
            functions,
            control_port,
            log_dir: run_dir.join("logs"),
            running: Vec::new(),
        }
    }

    pub fn running(&self) -> Vec<&str> {
        self.running.iter().map(|r| r.name.as_str()).collect()
    }

    fn container_spec(&self, function: &FunctionConfig, image: String) -> ContainerSpec {
        let mut env = std::collections::BTreeMap::new();
        env.insert(
            "SERVICE_ADDRESS".to_string(),
            format!("{}:{}", HOST_ALIAS, self.control_port),
        );
        env.insert("SERVICE_PORT".to_string(), self.control_port.to_string());
        env.extend(function.env.clone());

        ContainerSpec {
            name: format!("membrane-{}", function.name),
            image,
            env,
            extra_hosts: vec![format!("{}:host-gateway", HOST_ALIAS)],
        }
    }

    async fn launch(&self, function: &FunctionConfig) -> Result<RunningFunction, ContainerError> {
        let image = match (&function.image, &function.dockerfile) {
            (Some(image), _) => image.clone(),
            (None, Some(dockerfile)) => {
                let tag = format!("membrane-{}", function.name);
                let context = function
                    .context
                    .clone()
                    .or_else(|| dockerfile.parent().map(PathBuf::from))
                    .unwrap_or_else(|| PathBuf::from("."));
                self.engine
                    .build(&BuildOptions {
                        tag: tag.clone(),
                        dockerfile: dockerfile.clone(),
                        context,
                    })
                    .await?;
                tag
            }
            (None, None) => return Err(ContainerError::NoImage(function.name.clone())),
        };

        let spec = self.container_spec(function, image);
        let container_id = self.engine.container_create(&spec).await?;
        self.engine.start(&container_id).await?;

        let log_path = self.log_dir.join(format!("{}.log", function.name));
        let logs = match self.engine.logger(&container_id, &log_path).await {
            Ok(task) => Some(task),
            Err(e) => {
                warn!(function = %function.name, "could not follow logs: {}", e);
                None
            }
        };

        info!(function = %function.name, container = %container_id, "function started");
        Ok(RunningFunction {
            name: function.name.clone(),
            container_id,
            logs,
        })
    }
}

#[async_trait::async_trait]
impl LifecycleComponent for FunctionLauncher {
    async fn on_start(&mut self) -> Result<()> {
        if self.functions.is_empty() {
            info!("No functions configured; waiting for external workers.");
            return Ok(());
        }
        info!(
            "Starting {} function(s) with {}",
            self.functions.len(),
            self.engine.name()
        );

        for function in &self.functions {
            match self.launch(function).await {
                Ok(running) => self.running.push(running),
                Err(e) => error!(function = %function.name, "failed to start function: {}", e),
            }
        }
        Ok(())
    }

    async fn on_shutdown(&mut self) -> Result<()> {
        for function in self.running.drain(..) {
            if let Some(logs) = function.logs {
                logs.abort();
            }
            match self.engine.stop(&function.container_id).await {
                Ok(()) => info!(function = %function.name, "function stopped"),
                Err(e) => warn!(function = %function.name, "failed to stop function: {}", e),
            }
        }
        Ok(())
    }
}
