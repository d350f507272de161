use std::collections::HashMap;
use std::io::Write;
use std::time::Duration;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions, UploadToContainerOptions,
    WaitContainerOptions,
};
use bollard::image::BuildImageOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use futures_util::StreamExt;
use tracing::{debug, warn};

use super::{ContainerError, ContainerHost, ContainerLimits, ContainerResult, ExitOutcome, TarEntry};

/// `ContainerHost` backed by a real container engine via bollard. Cheap to
/// clone: `bollard::Docker` is itself an `Arc`-backed hyper client, so one
/// instance is shared across every concurrent invocation task.
#[derive(Clone)]
pub struct DockerContainerHost {
    docker: Docker,
}

impl DockerContainerHost {
    /// Connects using an explicit endpoint override if given, then falls
    /// back to the engine's own default discovery (which on Unix already
    /// probes the well-known per-user socket paths).
    pub fn connect(endpoint_override: Option<&str>) -> ContainerResult<Self> {
        let docker = match endpoint_override {
            Some(endpoint) if endpoint.starts_with("unix://") || endpoint.starts_with("npipe://") => {
                Docker::connect_with_socket(endpoint, 120, bollard::API_DEFAULT_VERSION)
            }
            Some(endpoint) => Docker::connect_with_http(endpoint, 120, bollard::API_DEFAULT_VERSION),
            None => Docker::connect_with_local_defaults(),
        }
        .map_err(|e| ContainerError::Engine(e.to_string()))?;

        Ok(Self { docker })
    }

    fn build_tar(entries: &[TarEntry]) -> ContainerResult<Vec<u8>> {
        let mut builder = tar::Builder::new(Vec::new());
        for entry in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(entry.contents.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, &entry.path, entry.contents.as_slice())
                .map_err(|e| ContainerError::Engine(e.to_string()))?;
        }
        builder
            .into_inner()
            .map_err(|e| ContainerError::Engine(e.to_string()))
    }

    fn gzip(tar_bytes: Vec<u8>) -> ContainerResult<Vec<u8>> {
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder
            .write_all(&tar_bytes)
            .map_err(|e| ContainerError::Engine(e.to_string()))?;
        encoder
            .finish()
            .map_err(|e| ContainerError::Engine(e.to_string()))
    }
}

#[async_trait]
impl ContainerHost for DockerContainerHost {
    async fn build_image(&self, context: Vec<TarEntry>, tag: &str) -> ContainerResult<String> {
        let tar_bytes = Self::build_tar(&context)?;
        let gz_bytes = Self::gzip(tar_bytes)?;

        let options = BuildImageOptions {
            t: tag.to_string(),
            rm: true,
            ..Default::default()
        };

        let mut stream = self.docker.build_image(options, None, Some(gz_bytes.into()));
        let mut tail: Vec<String> = Vec::new();

        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(stream_line) = info.stream {
                        if tail.len() >= 10 {
                            tail.remove(0);
                        }
                        tail.push(stream_line.trim_end().to_string());
                    }
                    if let Some(error) = info.error {
                        return Err(ContainerError::Build(error));
                    }
                }
                Err(e) => {
                    tail.push(e.to_string());
                    return Err(ContainerError::Build(tail.join("\n")));
                }
            }
        }

        Ok(tag.to_string())
    }

    async fn create_container(
        &self,
        image: &str,
        env: &HashMap<String, String>,
        limits: ContainerLimits,
    ) -> ContainerResult<String> {
        let env_vars: Vec<String> = env.iter().map(|(k, v)| format!("{k}={v}")).collect();

        let mut tmpfs = HashMap::new();
        tmpfs.insert("/tmp".to_string(), "rw,exec,nosuid,size=64m".to_string());

        let host_config = HostConfig {
            memory: Some(limits.memory_bytes),
            memory_swap: Some(limits.memory_bytes),
            nano_cpus: Some(limits.cpu_nanos),
            pids_limit: Some(limits.pids_max),
            readonly_rootfs: Some(limits.read_only_rootfs),
            tmpfs: Some(tmpfs),
            // Invocation containers never receive bind/volume mounts; code
            // enters solely via the post-create archive upload.
            mounts: None,
            network_mode: Some("none".to_string()),
            security_opt: Some(vec!["no-new-privileges".to_string()]),
            cap_drop: Some(dropped_capabilities()),
            oom_kill_disable: Some(false),
            ..Default::default()
        };

        let config = Config {
            image: Some(image.to_string()),
            env: Some(env_vars),
            cmd: Some(vec!["python3".to_string(), "/app/bootstrap.py".to_string()]),
            host_config: Some(host_config),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            working_dir: Some("/app".to_string()),
            ..Default::default()
        };

        let options = CreateContainerOptions::<String> {
            name: String::new(),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| ContainerError::Engine(e.to_string()))?;

        Ok(response.id)
    }

    async fn put_archive(
        &self,
        container_id: &str,
        path: &str,
        entries: Vec<TarEntry>,
    ) -> ContainerResult<()> {
        let tar_bytes = Self::build_tar(&entries)?;

        let options = UploadToContainerOptions {
            path: path.to_string(),
            ..Default::default()
        };

        self.docker
            .upload_to_container(container_id, Some(options), tar_bytes.into())
            .await
            .map_err(|e| ContainerError::Engine(e.to_string()))
    }

    async fn start_and_wait(
        &self,
        container_id: &str,
        timeout: Duration,
    ) -> ContainerResult<ExitOutcome> {
        self.docker
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| ContainerError::Engine(e.to_string()))?;

        let wait = async {
            let mut stream = self
                .docker
                .wait_container(container_id, None::<WaitContainerOptions<String>>);
            match stream.next().await {
                Some(Ok(response)) => Ok(response.status_code),
                Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
                Some(Err(e)) => Err(ContainerError::Engine(e.to_string())),
                None => Ok(0),
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(Ok(code)) => Ok(ExitOutcome::Exited(code)),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                self.force_stop(container_id).await;
                Ok(ExitOutcome::Timeout)
            }
        }
    }

    async fn read_logs(&self, container_id: &str) -> ContainerResult<(Vec<u8>, Vec<u8>)> {
        let options = Some(LogsOptions::<String> {
            stdout: true,
            stderr: true,
            ..Default::default()
        });

        let mut stream = self.docker.logs(container_id, options);
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        while let Some(result) = stream.next().await {
            match result {
                Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                    stdout.extend_from_slice(&message);
                }
                Ok(LogOutput::StdErr { message }) => {
                    stderr.extend_from_slice(&message);
                }
                Ok(LogOutput::StdIn { .. }) => {}
                Err(e) => {
                    warn!("log stream error for {}: {}", container_id, e);
                    break;
                }
            }
        }

        Ok((stdout, stderr))
    }

    async fn remove_container(&self, container_id: &str) -> ContainerResult<()> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };

        match self.docker.remove_container(container_id, Some(options)).await {
            Ok(_) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(()),
            Err(e) => {
                warn!("failed to remove container {}: {}", container_id, e);
                Ok(())
            }
        }
    }
}

impl DockerContainerHost {
    async fn force_stop(&self, container_id: &str) {
        let stop_options = StopContainerOptions { t: 2 };
        if self
            .docker
            .stop_container(container_id, Some(stop_options))
            .await
            .is_err()
        {
            let kill_options = KillContainerOptions { signal: "SIGKILL" };
            if let Err(e) = self.docker.kill_container(container_id, Some(kill_options)).await {
                debug!("kill after timeout failed for {}: {}", container_id, e);
            }
        }
    }
}

fn dropped_capabilities() -> Vec<String> {
    vec![
        "SETPCAP", "MKNOD", "AUDIT_WRITE", "NET_RAW", "DAC_OVERRIDE", "FOWNER", "FSETID",
        "NET_BIND_SERVICE", "SYS_CHROOT", "SETFCAP", "AUDIT_CONTROL", "AUDIT_READ",
        "BLOCK_SUSPEND", "DAC_READ_SEARCH", "IPC_LOCK", "IPC_OWNER", "LEASE", "LINUX_IMMUTABLE",
        "MAC_ADMIN", "MAC_OVERRIDE", "NET_ADMIN", "NET_BROADCAST", "SYSLOG", "SYS_ADMIN",
        "SYS_BOOT", "SYS_MODULE", "SYS_NICE", "SYS_PACCT", "SYS_PTRACE", "SYS_RAWIO",
        "SYS_RESOURCE", "SYS_TIME", "SYS_TTY_CONFIG", "WAKE_ALARM",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}
