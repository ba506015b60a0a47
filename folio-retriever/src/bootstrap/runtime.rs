//! Provisioning runtimes: whatever can start a managed vector store instance.

use crate::error::ProvisioningError;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::{Instant, timeout};
use tracing::{debug, info};

/// Bound on quick docker calls (info, inspect, start, port).
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
/// `docker run` may have to pull the image first.
const RUN_TIMEOUT: Duration = Duration::from_secs(300);
const HEALTH_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);
/// Port the vector store listens on inside its container.
const CONTAINER_PORT: u16 = 6333;

/// What to run and where to expose it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceSpec {
    pub name: String,
    pub image: String,
    pub port: u16,
    pub data_dir: Option<PathBuf>,
}

/// What the runtime knows about a managed instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceInfo {
    pub name: String,
    pub running: bool,
    /// Host port, when published.
    pub port: Option<u16>,
}

/// Starts and inspects the long-lived vector store instance.
///
/// Instances are never torn down: later processes reuse them.
#[async_trait]
pub trait ProvisioningRuntime: Send + Sync {
    fn name(&self) -> &str;

    /// Fails with [`ProvisioningError::PermissionDenied`] when the runtime
    /// is missing or not usable by this user.
    async fn check_permission(&self) -> Result<(), ProvisioningError>;

    /// `None` when no instance with that name exists.
    async fn instance_info(
        &self,
        spec: &InstanceSpec,
    ) -> Result<Option<InstanceInfo>, ProvisioningError>;

    /// Reuse, start or create the instance so that it is running.
    async fn ensure_managed_instance(
        &self,
        spec: &InstanceSpec,
    ) -> Result<InstanceInfo, ProvisioningError>;

    /// Poll until the instance answers its health check, or fail with
    /// [`ProvisioningError::HealthTimeout`] after `wait`.
    async fn wait_for_health(
        &self,
        url: &str,
        wait: Duration,
        interval: Duration,
    ) -> Result<(), ProvisioningError>;
}

/// Drives the Docker CLI.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    binary: String,
    client: reqwest::Client,
}

impl Default for DockerRuntime {
    fn default() -> Self {
        Self::new()
    }
}

struct CommandOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

impl DockerRuntime {
    pub fn new() -> Self {
        Self::with_binary("docker")
    }

    /// Use a different docker-compatible CLI, e.g. `podman`.
    pub fn with_binary(binary: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(HEALTH_REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            binary: binary.into(),
            client,
        }
    }

    async fn run(
        &self,
        args: &[String],
        limit: Duration,
    ) -> Result<CommandOutput, ProvisioningError> {
        debug!("Running {} {}", self.binary, args.join(" "));
        let command = Command::new(&self.binary)
            .args(args)
            .kill_on_drop(true)
            .output();
        let output = timeout(limit, command)
            .await
            .map_err(|_| {
                ProvisioningError::Runtime(format!(
                    "`{} {}` did not finish within {:?}",
                    self.binary,
                    args.first().map(String::as_str).unwrap_or_default(),
                    limit
                ))
            })?
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ProvisioningError::PermissionDenied {
                        runtime: self.binary.clone(),
                        detail: format!("{} executable not found", self.binary),
                    }
                } else {
                    ProvisioningError::Runtime(format!("failed to run {}: {}", self.binary, e))
                }
            })?;

        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    async fn published_port(&self, name: &str) -> Option<u16> {
        let args = vec![
            "port".to_string(),
            name.to_string(),
            format!("{CONTAINER_PORT}/tcp"),
        ];
        let output = self.run(&args, COMMAND_TIMEOUT).await.ok()?;
        if !output.success {
            return None;
        }
        parse_published_port(&output.stdout)
    }

    fn run_args(spec: &InstanceSpec) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            spec.name.clone(),
            "--restart".to_string(),
            "unless-stopped".to_string(),
            "--label".to_string(),
            "folio.managed=true".to_string(),
            "-p".to_string(),
            format!("{}:{}", spec.port, CONTAINER_PORT),
        ];
        if let Some(dir) = &spec.data_dir {
            args.push("-v".to_string());
            args.push(format!("{}:/qdrant/storage", dir.display()));
        }
        args.push(spec.image.clone());
        args
    }
}

/// Host port from `docker port` output such as `0.0.0.0:6333`.
fn parse_published_port(output: &str) -> Option<u16> {
    output
        .lines()
        .filter_map(|line| line.trim().rsplit(':').next())
        .find_map(|port| port.parse().ok())
}

#[async_trait]
impl ProvisioningRuntime for DockerRuntime {
    fn name(&self) -> &str {
        &self.binary
    }

    async fn check_permission(&self) -> Result<(), ProvisioningError> {
        let args = vec![
            "info".to_string(),
            "--format".to_string(),
            "{{.ServerVersion}}".to_string(),
        ];
        let output = self.run(&args, COMMAND_TIMEOUT).await?;
        if output.success {
            debug!("{} server version {}", self.binary, output.stdout);
            return Ok(());
        }
        Err(ProvisioningError::PermissionDenied {
            runtime: self.binary.clone(),
            detail: if output.stderr.is_empty() {
                "daemon is not reachable".to_string()
            } else {
                output.stderr
            },
        })
    }

    async fn instance_info(
        &self,
        spec: &InstanceSpec,
    ) -> Result<Option<InstanceInfo>, ProvisioningError> {
        let args = vec![
            "inspect".to_string(),
            "--format".to_string(),
            "{{.State.Running}}".to_string(),
            spec.name.clone(),
        ];
        let output = self.run(&args, COMMAND_TIMEOUT).await?;
        if !output.success {
            return Ok(None);
        }
        let running = output.stdout == "true";
        let port = if running {
            self.published_port(&spec.name).await
        } else {
            None
        };
        Ok(Some(InstanceInfo {
            name: spec.name.clone(),
            running,
            port,
        }))
    }

    async fn ensure_managed_instance(
        &self,
        spec: &InstanceSpec,
    ) -> Result<InstanceInfo, ProvisioningError> {
        match self.instance_info(spec).await? {
            Some(info) if info.running => {
                info!("Reusing running instance {}", spec.name);
                return Ok(info);
            }
            Some(_) => {
                info!("Starting stopped instance {}", spec.name);
                let args = vec!["start".to_string(), spec.name.clone()];
                let output = self.run(&args, COMMAND_TIMEOUT).await?;
                if !output.success {
                    return Err(ProvisioningError::Runtime(format!(
                        "failed to start {}: {}",
                        spec.name, output.stderr
                    )));
                }
            }
            None => {
                info!("Creating instance {} from {}", spec.name, spec.image);
                let output = self.run(&Self::run_args(spec), RUN_TIMEOUT).await?;
                if !output.success {
                    return Err(ProvisioningError::Runtime(format!(
                        "failed to create {}: {}",
                        spec.name, output.stderr
                    )));
                }
            }
        }

        self.instance_info(spec).await?.ok_or_else(|| {
            ProvisioningError::Runtime(format!("{} disappeared after start", spec.name))
        })
    }

    async fn wait_for_health(
        &self,
        url: &str,
        wait: Duration,
        interval: Duration,
    ) -> Result<(), ProvisioningError> {
        let health_url = format!("{}/healthz", url.trim_end_matches('/'));
        let deadline = Instant::now() + wait;
        loop {
            match self.client.get(&health_url).send().await {
                Ok(response) if response.status().is_success() => return Ok(()),
                Ok(response) => debug!("{} answered {}", health_url, response.status()),
                Err(e) => debug!("{} not reachable yet: {}", health_url, e),
            }
            if Instant::now() + interval > deadline {
                return Err(ProvisioningError::HealthTimeout {
                    url: url.to_string(),
                    timeout: wait,
                });
            }
            tokio::time::sleep(interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_published_port() {
        assert_eq!(parse_published_port("0.0.0.0:6333"), Some(6333));
        assert_eq!(parse_published_port("0.0.0.0:7000\n[::]:7000"), Some(7000));
        assert_eq!(parse_published_port(""), None);
    }

    #[test]
    fn test_run_args() {
        let spec = InstanceSpec {
            name: "folio-qdrant".to_string(),
            image: "qdrant/qdrant:latest".to_string(),
            port: 7333,
            data_dir: Some(PathBuf::from("/var/lib/folio")),
        };
        let args = DockerRuntime::run_args(&spec);
        assert_eq!(args[0], "run");
        assert!(args.windows(2).any(|w| w == ["--restart", "unless-stopped"]));
        assert!(args.windows(2).any(|w| w == ["-p", "7333:6333"]));
        assert!(args.windows(2).any(|w| w == ["-v", "/var/lib/folio:/qdrant/storage"]));
        assert_eq!(args.last().map(String::as_str), Some("qdrant/qdrant:latest"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_permission_denied() {
        let runtime = DockerRuntime::with_binary("folio-no-such-container-cli");
        let err = runtime.check_permission().await.unwrap_err();
        assert!(matches!(err, ProvisioningError::PermissionDenied { .. }));
    }

    #[tokio::test]
    async fn test_health_times_out_when_nothing_listens() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let runtime = DockerRuntime::new();
        let err = runtime
            .wait_for_health(
                &format!("http://127.0.0.1:{port}"),
                Duration::from_millis(300),
                Duration::from_millis(100),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisioningError::HealthTimeout { .. }));
    }
}
