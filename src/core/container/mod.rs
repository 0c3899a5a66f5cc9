//! Container engine capability used to run function containers locally.

mod docker;
mod launcher;

pub use docker::DockerCli;
pub use launcher::FunctionLauncher;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: i32,
        stderr: String,
    },
    #[error("log sink error: {0}")]
    Logs(#[from] std::io::Error),
    #[error("function '{0}' has neither an image nor a dockerfile")]
    NoImage(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuildOptions {
    pub tag: String,
    pub dockerfile: PathBuf,
    pub context: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub env: BTreeMap<String, String>,
    /// Extra `host:ip` entries, e.g. so the container can reach the host.
    pub extra_hosts: Vec<String>,
}

#[async_trait]
pub trait ContainerEngine: Send + Sync {
    fn name(&self) -> &str;

    async fn build(&self, options: &BuildOptions) -> Result<(), ContainerError>;

    /// Create a stopped container and return its id.
    async fn container_create(&self, spec: &ContainerSpec) -> Result<String, ContainerError>;

    async fn start(&self, id: &str) -> Result<(), ContainerError>;

    async fn stop(&self, id: &str) -> Result<(), ContainerError>;

    /// Block until the container exits and return its exit code.
    async fn container_wait(&self, id: &str) -> Result<i64, ContainerError>;

    /// Follow the container's output into `sink`. Runs until the container
    /// stops or the returned task is aborted.
    async fn logger(
        &self,
        id: &str,
        sink: &Path,
    ) -> Result<tokio::task::JoinHandle<()>, ContainerError>;
}
