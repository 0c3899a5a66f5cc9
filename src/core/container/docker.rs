use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{BuildOptions, ContainerEngine, ContainerError, ContainerSpec};

/// Drives the `docker` (or `podman`) command line.
pub struct DockerCli {
    program: String,
}

impl DockerCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn build_args(options: &BuildOptions) -> Vec<String> {
        vec![
            "build".to_string(),
            "-t".to_string(),
            options.tag.clone(),
            "-f".to_string(),
            options.dockerfile.display().to_string(),
            options.context.display().to_string(),
        ]
    }

    fn create_args(spec: &ContainerSpec) -> Vec<String> {
        let mut args = vec![
            "create".to_string(),
            "--name".to_string(),
            spec.name.clone(),
        ];
        for host in &spec.extra_hosts {
            args.push("--add-host".to_string());
            args.push(host.clone());
        }
        for (key, value) in &spec.env {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }
        args.push(spec.image.clone());
        args
    }

    async fn run(&self, args: &[String]) -> Result<String, ContainerError> {
        debug!("{} {}", self.program, args.join(" "));
        let output = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| ContainerError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(ContainerError::Failed {
                command: format!("{} {}", self.program, args.first().map(String::as_str).unwrap_or("")),
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl ContainerEngine for DockerCli {
    fn name(&self) -> &str {
        &self.program
    }

    async fn build(&self, options: &BuildOptions) -> Result<(), ContainerError> {
        info!("Building image {}", options.tag);
        self.run(&Self::build_args(options)).await.map(|_| ())
    }

    async fn container_create(&self, spec: &ContainerSpec) -> Result<String, ContainerError> {
        // A leftover container from a previous run would make the name clash.
        if let Err(e) = self
            .run(&["rm".to_string(), "-f".to_string(), spec.name.clone()])
            .await
        {
            debug!("no previous container {}: {}", spec.name, e);
        }
        self.run(&Self::create_args(spec)).await
    }

    async fn start(&self, id: &str) -> Result<(), ContainerError> {
        self.run(&["start".to_string(), id.to_string()])
            .await
            .map(|_| ())
    }

    async fn stop(&self, id: &str) -> Result<(), ContainerError> {
        self.run(&["stop".to_string(), id.to_string()])
            .await
            .map(|_| ())
    }

    async fn container_wait(&self, id: &str) -> Result<i64, ContainerError> {
        let out = self.run(&["wait".to_string(), id.to_string()]).await?;
        Ok(out.parse().unwrap_or(-1))
    }

    async fn logger(
        &self,
        id: &str,
        sink: &Path,
    ) -> Result<tokio::task::JoinHandle<()>, ContainerError> {
        if let Some(parent) = sink.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::File::create(sink).await?.into_std().await;
        let stderr = file.try_clone()?;

        let mut child = Command::new(&self.program)
            .args(["logs", "-f", id])
            .stdin(Stdio::null())
            .stdout(Stdio::from(file))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ContainerError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let id = id.to_string();
        Ok(tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => debug!(container = %id, "log follower exited with {}", status),
                Err(e) => warn!(container = %id, "log follower failed: {}", e),
            }
        }))
    }
}
