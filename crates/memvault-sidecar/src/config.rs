use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_ENGINE_PORT: u16 = 8000;
pub const CONTAINER_ENGINE_PORT: u16 = 8000;
pub const CONTAINER_DATA_DIR: &str = "/chroma/chroma";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchPreference {
    Auto,
    Native,
    Container,
}

impl LaunchPreference {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "native" => Some(Self::Native),
            "container" | "docker" => Some(Self::Container),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContainerConfig {
    pub runtime: String,
    pub image: String,
    pub name: String,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            runtime: "docker".to_string(),
            image: "chromadb/chroma:0.5.23".to_string(),
            name: "memvault-chroma".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SidecarConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub engine_bin: String,
    pub container: ContainerConfig,
    pub preference: LaunchPreference,
    pub probe_timeout: Duration,
    pub poll_interval: Duration,
    pub ready_timeout: Duration,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_ENGINE_PORT,
            data_dir: default_data_dir(),
            engine_bin: "chroma".to_string(),
            container: ContainerConfig::default(),
            preference: LaunchPreference::Auto,
            probe_timeout: Duration::from_secs(2),
            poll_interval: Duration::from_secs(1),
            ready_timeout: Duration::from_secs(30),
        }
    }
}

impl SidecarConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let host = std::env::var("MEMVAULT_ENGINE_HOST").unwrap_or(defaults.host);
        let port = std::env::var("MEMVAULT_ENGINE_PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
            .filter(|p| *p > 0)
            .unwrap_or(defaults.port);
        let data_dir = std::env::var("MEMVAULT_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);
        let engine_bin = std::env::var("MEMVAULT_ENGINE_BIN").unwrap_or(defaults.engine_bin);
        let container = ContainerConfig {
            runtime: std::env::var("MEMVAULT_CONTAINER_RUNTIME")
                .unwrap_or(defaults.container.runtime),
            image: std::env::var("MEMVAULT_CONTAINER_IMAGE").unwrap_or(defaults.container.image),
            name: std::env::var("MEMVAULT_CONTAINER_NAME").unwrap_or(defaults.container.name),
        };
        let preference = std::env::var("MEMVAULT_LAUNCH_STRATEGY")
            .ok()
            .and_then(|v| LaunchPreference::parse(&v))
            .unwrap_or(defaults.preference);

        Self {
            host,
            port,
            data_dir,
            engine_bin,
            container,
            preference,
            probe_timeout: env_millis("MEMVAULT_PROBE_TIMEOUT_MS", 2_000, 100, 30_000),
            poll_interval: env_millis("MEMVAULT_READY_POLL_MS", 1_000, 50, 10_000),
            ready_timeout: env_millis("MEMVAULT_READY_TIMEOUT_MS", 30_000, 1_000, 120_000),
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".memvault").join("vector-db"))
        .unwrap_or_else(|| PathBuf::from("./data/vector-db"))
}

fn env_millis(name: &str, default: u64, min: u64, max: u64) -> Duration {
    let ms = std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
        .clamp(min, max);
    Duration::from_millis(ms)
}
