use anyhow::{Result, bail};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

pub const CONFIG_FILE: &str = "membrane.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct MembraneConfig {
    #[serde(default = "default_host")]
    pub gateway_host: String,

    #[serde(default = "default_gateway_port")]
    pub gateway_port: u16,

    #[serde(default = "default_control_port")]
    pub control_port: u16,

    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,

    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    #[serde(default = "default_run_dir")]
    pub run_dir: PathBuf,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_proxy_connect_timeout_ms")]
    pub proxy_connect_timeout_ms: u64,

    /// Gateway connections that send nothing for this long are closed.
    #[serde(default = "default_gateway_idle_timeout_ms")]
    pub gateway_idle_timeout_ms: u64,

    /// `docker` or `podman`.
    #[serde(default = "default_engine")]
    pub engine: String,

    #[serde(default)]
    pub functions: Vec<FunctionConfig>,

    /// File this config was read from; `None` when running on defaults.
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

/// A function container started by `membrane start`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct FunctionConfig {
    pub name: String,

    /// Prebuilt image. When absent the function is built from `dockerfile`.
    #[serde(default)]
    pub image: Option<String>,

    #[serde(default)]
    pub dockerfile: Option<PathBuf>,

    #[serde(default)]
    pub context: Option<PathBuf>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_gateway_port() -> u16 {
    9001
}
fn default_control_port() -> u16 {
    50051
}
fn default_visibility_timeout_secs() -> u64 {
    crate::core::queue::DEFAULT_VISIBILITY_TIMEOUT_SECS
}
fn default_history_capacity() -> usize {
    crate::core::history::DEFAULT_CAPACITY
}
fn default_storage_dir() -> PathBuf {
    PathBuf::from(".membrane/buckets")
}
fn default_run_dir() -> PathBuf {
    PathBuf::from(".membrane")
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_proxy_connect_timeout_ms() -> u64 {
    1000
}
fn default_gateway_idle_timeout_ms() -> u64 {
    1000
}
fn default_engine() -> String {
    "docker".to_string()
}

impl Default for MembraneConfig {
    fn default() -> Self {
        Self {
            gateway_host: default_host(),
            gateway_port: default_gateway_port(),
            control_port: default_control_port(),
            visibility_timeout_secs: default_visibility_timeout_secs(),
            history_capacity: default_history_capacity(),
            storage_dir: default_storage_dir(),
            run_dir: default_run_dir(),
            log_level: default_log_level(),
            proxy_connect_timeout_ms: default_proxy_connect_timeout_ms(),
            gateway_idle_timeout_ms: default_gateway_idle_timeout_ms(),
            engine: default_engine(),
            functions: Vec::new(),
            source: None,
        }
    }
}

impl MembraneConfig {
    /// Load `membrane.toml` from the project directory, or defaults when absent.
    pub async fn load<P: AsRef<Path>>(project_dir: P) -> Result<Self> {
        let project_dir = project_dir.as_ref();
        let config_path = project_dir.join(CONFIG_FILE);
        if !config_path.exists() {
            let mut config = Self::default();
            config.resolve_paths(project_dir);
            return Ok(config);
        }
        Self::load_file(&config_path).await
    }

    /// Load an explicit config file. Relative paths in it are resolved
    /// against the file's directory.
    pub async fn load_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let mut config: MembraneConfig = toml::from_str(&content)?;
        config.validate()?;
        if let Some(dir) = path.parent() {
            config.resolve_paths(dir);
        }
        config.source = Some(path.to_path_buf());
        Ok(config)
    }

    /// Emit where the config came from and what it binds. Called once
    /// logging is up.
    pub fn log_summary(&self) {
        match &self.source {
            Some(path) => info!("Loaded membrane config from {}", path.display()),
            None => info!("No {} found, using defaults.", CONFIG_FILE),
        }
        info!(
            "Membrane config: gateway={}, control={}, functions={}",
            self.gateway_addr(),
            self.control_addr(),
            self.functions.len()
        );
    }

    fn validate(&self) -> Result<()> {
        if self.history_capacity == 0 {
            bail!("history_capacity must be at least 1");
        }
        if self.gateway_idle_timeout_ms == 0 {
            bail!("gateway_idle_timeout_ms must be at least 1");
        }
        if self.engine != "docker" && self.engine != "podman" {
            bail!("unsupported container engine '{}'", self.engine);
        }
        let mut seen = HashSet::new();
        for function in &self.functions {
            if function.name.trim().is_empty() {
                bail!("function entries need a name");
            }
            if !seen.insert(function.name.as_str()) {
                bail!("function '{}' is defined more than once", function.name);
            }
            if function.image.is_none() && function.dockerfile.is_none() {
                bail!(
                    "function '{}' needs either an image or a dockerfile",
                    function.name
                );
            }
        }
        Ok(())
    }

    fn resolve_paths(&mut self, base: &Path) {
        if self.storage_dir.is_relative() {
            self.storage_dir = base.join(&self.storage_dir);
        }
        if self.run_dir.is_relative() {
            self.run_dir = base.join(&self.run_dir);
        }
        for function in &mut self.functions {
            if let Some(context) = &function.context
                && context.is_relative()
            {
                function.context = Some(base.join(context));
            }
            if let Some(dockerfile) = &function.dockerfile
                && dockerfile.is_relative()
            {
                function.dockerfile = Some(base.join(dockerfile));
            }
        }
    }

    pub fn gateway_addr(&self) -> String {
        format!("{}:{}", self.gateway_host, self.gateway_port)
    }

    pub fn control_addr(&self) -> String {
        format!("{}:{}", self.gateway_host, self.control_port)
    }

    pub fn gateway_url(&self) -> String {
        format!("http://{}", self.gateway_addr())
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    pub fn proxy_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.proxy_connect_timeout_ms)
    }

    pub fn gateway_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.gateway_idle_timeout_ms)
    }
}
