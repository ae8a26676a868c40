use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::{CONTAINER_DATA_DIR, CONTAINER_ENGINE_PORT, LaunchPreference, SidecarConfig};
use crate::error::SidecarError;

#[async_trait]
pub trait Launcher: Send + Sync {
    fn strategy(&self) -> &'static str;

    /// Issues the launch and returns without waiting for readiness.
    async fn launch(&self) -> Result<(), SidecarError>;
}

/// What the host can run, resolved against `PATH`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostCapabilities {
    pub native_binary: Option<PathBuf>,
    pub container_runtime: Option<PathBuf>,
}

impl HostCapabilities {
    pub fn detect(config: &SidecarConfig) -> Self {
        Self {
            native_binary: find_executable(&config.engine_bin),
            container_runtime: find_executable(&config.container.runtime),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessLauncher {
    NativeSpawn {
        binary: PathBuf,
        data_dir: PathBuf,
        host: String,
        port: u16,
    },
    ContainerSpawn {
        runtime: PathBuf,
        name: String,
        image: String,
        data_dir: PathBuf,
        host: String,
        port: u16,
    },
}

/// Native first, container as the fallback, unless the configuration pins one.
pub fn select_launcher(
    caps: &HostCapabilities,
    config: &SidecarConfig,
) -> Result<ProcessLauncher, SidecarError> {
    let native = || {
        caps.native_binary
            .clone()
            .map(|binary| ProcessLauncher::NativeSpawn {
                binary,
                data_dir: config.data_dir.clone(),
                host: config.host.clone(),
                port: config.port,
            })
    };
    let container = || {
        caps.container_runtime
            .clone()
            .map(|runtime| ProcessLauncher::ContainerSpawn {
                runtime,
                name: config.container.name.clone(),
                image: config.container.image.clone(),
                data_dir: config.data_dir.clone(),
                host: config.host.clone(),
                port: config.port,
            })
    };

    let picked = match config.preference {
        LaunchPreference::Auto => native().or_else(container),
        LaunchPreference::Native => native(),
        LaunchPreference::Container => container(),
    };
    picked.ok_or_else(|| {
        SidecarError::NoLaunchStrategy(format!(
            "neither `{}` nor `{}` found on PATH (preference {:?})",
            config.engine_bin, config.container.runtime, config.preference
        ))
    })
}

impl ProcessLauncher {
    pub fn native_args(data_dir: &Path, host: &str, port: u16) -> Vec<String> {
        vec![
            "run".to_string(),
            "--path".to_string(),
            data_dir.display().to_string(),
            "--host".to_string(),
            host.to_string(),
            "--port".to_string(),
            port.to_string(),
        ]
    }

    pub fn container_run_args(
        name: &str,
        image: &str,
        data_dir: &Path,
        host: &str,
        port: u16,
    ) -> Vec<String> {
        vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            name.to_string(),
            "--restart".to_string(),
            "unless-stopped".to_string(),
            "-p".to_string(),
            format!("{host}:{port}:{CONTAINER_ENGINE_PORT}"),
            "-v".to_string(),
            format!("{}:{CONTAINER_DATA_DIR}", data_dir.display()),
            "-e".to_string(),
            "IS_PERSISTENT=TRUE".to_string(),
            "-e".to_string(),
            "ANONYMIZED_TELEMETRY=FALSE".to_string(),
            image.to_string(),
        ]
    }

    fn spawn_native(
        binary: &Path,
        data_dir: &Path,
        host: &str,
        port: u16,
    ) -> Result<(), SidecarError> {
        std::fs::create_dir_all(data_dir).map_err(|e| SidecarError::spawn("native", e))?;

        let mut cmd = Command::new(binary);
        cmd.args(Self::native_args(data_dir, host, port))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false);
        #[cfg(unix)]
        cmd.process_group(0);
        #[cfg(windows)]
        cmd.creation_flags(0x0000_0008);

        let child = cmd.spawn().map_err(|e| SidecarError::spawn("native", e))?;
        info!(pid = child.id(), binary = %binary.display(), "spawned detached vector engine");
        Ok(())
    }

    async fn run_runtime(runtime: &Path, args: &[String]) -> Result<(), SidecarError> {
        let output = Command::new(runtime)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| SidecarError::spawn("container", e))?;
        if output.status.success() {
            return Ok(());
        }
        Err(SidecarError::Container {
            status: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

#[async_trait]
impl Launcher for ProcessLauncher {
    fn strategy(&self) -> &'static str {
        match self {
            Self::NativeSpawn { .. } => "native",
            Self::ContainerSpawn { .. } => "container",
        }
    }

    async fn launch(&self) -> Result<(), SidecarError> {
        match self {
            Self::NativeSpawn {
                binary,
                data_dir,
                host,
                port,
            } => Self::spawn_native(binary, data_dir, host, *port),
            Self::ContainerSpawn {
                runtime,
                name,
                image,
                data_dir,
                host,
                port,
            } => {
                let start = vec!["start".to_string(), name.clone()];
                match Self::run_runtime(runtime, &start).await {
                    Ok(()) => {
                        info!(container = %name, "restarted existing engine container");
                        Ok(())
                    }
                    Err(err) => {
                        debug!(
                            container = %name,
                            error = %err,
                            "no startable container, creating one"
                        );
                        std::fs::create_dir_all(data_dir)
                            .map_err(|e| SidecarError::spawn("container", e))?;
                        let run = Self::container_run_args(name, image, data_dir, host, *port);
                        Self::run_runtime(runtime, &run).await?;
                        info!(container = %name, image = %image, "created engine container");
                        Ok(())
                    }
                }
            }
        }
    }
}

fn find_executable(name: &str) -> Option<PathBuf> {
    if name.trim().is_empty() {
        return None;
    }
    let direct = Path::new(name);
    if direct.components().count() > 1 {
        return direct.is_file().then(|| direct.to_path_buf());
    }
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths).find_map(|dir| {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Some(candidate);
        }
        if cfg!(windows) {
            let exe = dir.join(format!("{name}.exe"));
            if exe.is_file() {
                return Some(exe);
            }
        }
        None
    })
}
