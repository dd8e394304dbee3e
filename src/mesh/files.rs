//! On-disk layout of the mesh daemon installation.

use crate::config::MeshConfig;
use crate::error::{ProtocolError, Result};
use crate::utils::timeout::{with_timeout_error, REQUEST_TIMEOUT};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// Paths to the daemon and its control CLI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshFiles {
    directory: PathBuf,
    core: PathBuf,
    cli: PathBuf,
    packet_library: Option<PathBuf>,
}

impl MeshFiles {
    pub fn from_config(config: &MeshConfig) -> Self {
        Self {
            directory: config.directory.clone(),
            core: config.directory.join(&config.core_name),
            cli: config.directory.join(&config.cli_name),
            packet_library: config
                .packet_library_name
                .as_ref()
                .map(|name| config.directory.join(name)),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn core(&self) -> &Path {
        &self.core
    }

    pub fn cli(&self) -> &Path {
        &self.cli
    }

    /// Fail fast unless every required file exists.
    ///
    /// # Errors
    /// `EnvironmentMissing` naming the first absent file.
    pub fn check(&self) -> Result<()> {
        let required = [Some(&self.core), Some(&self.cli), self.packet_library.as_ref()];
        for path in required.into_iter().flatten() {
            if !path.is_file() {
                return Err(ProtocolError::EnvironmentMissing(
                    path.display().to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Daemon version from `<core> --version`, without the build suffix.
    pub async fn daemon_version(&self) -> Result<String> {
        self.check()?;
        let run = async {
            Command::new(&self.core)
                .arg("--version")
                .current_dir(&self.directory)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output()
                .await
                .map_err(|e| {
                    ProtocolError::ProcessLaunchFailure(format!("{}: {e}", self.core.display()))
                })
        };
        let output = with_timeout_error(run, REQUEST_TIMEOUT).await?;

        parse_version(&String::from_utf8_lossy(&output.stdout)).ok_or_else(|| {
            ProtocolError::MeshControl(format!(
                "unexpected version output: {}",
                String::from_utf8_lossy(&output.stdout).trim()
            ))
        })
    }
}

/// `easytier-core 2.4.5-abcdef` -> `2.4.5`
fn parse_version(output: &str) -> Option<String> {
    let token = output.split_whitespace().nth(1)?;
    token.split('-').next().map(str::to_owned)
}
