//! VBoxManage command composition and execution.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info, warn};
use vm_core::command_stream::{render_command_line, CommandOutput, CommandRunner, DuctRunner};
use vm_core::platform::{current_os, default_hypervisor_path};
use vm_core::{resolve_executable, VmError};

use crate::error::{OrchestratorError, Result};

const DEFAULT_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HypervisorConfig {
    /// Path to `VBoxManage`, or a bare program name looked up on `PATH`.
    #[serde(default = "default_path")]
    pub path: PathBuf,

    /// Per-command deadline. `0` disables it.
    #[serde(default = "default_timeout_secs")]
    pub command_timeout_secs: u64,
}

fn default_path() -> PathBuf {
    std::env::var_os("VM_HYPERVISOR_PATH")
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| default_hypervisor_path(current_os()))
}

fn default_timeout_secs() -> u64 {
    std::env::var("VM_HYPERVISOR_TIMEOUT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_TIMEOUT_SECS)
}

impl Default for HypervisorConfig {
    fn default() -> Self {
        Self {
            path: default_path(),
            command_timeout_secs: default_timeout_secs(),
        }
    }
}

impl HypervisorConfig {
    pub fn from_env() -> Self {
        Self::default()
    }

    pub fn timeout(&self) -> Option<Duration> {
        match self.command_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

/// Names the lifecycle step a hypervisor command belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    Register,
    Configure,
    CreateDisk,
    Start,
    PowerOff,
    Unregister,
    CloseDisk,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::Register => "register",
            Step::Configure => "configure",
            Step::CreateDisk => "create-disk",
            Step::Start => "start",
            Step::PowerOff => "poweroff",
            Step::Unregister => "unregister",
            Step::CloseDisk => "close-disk",
        };
        f.write_str(name)
    }
}

/// One VBoxManage invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HypervisorCommand {
    CreateVm { name: String, os_type: String },
    ModifyVm { name: String, cpus: i64, memory_mb: i64 },
    CreateDisk { name: String, size_mb: i64 },
    StartVm { name: String },
    PowerOff { name: String },
    UnregisterVm { name: String },
    CloseDisk { name: String },
}

impl HypervisorCommand {
    pub fn step(&self) -> Step {
        match self {
            Self::CreateVm { .. } => Step::Register,
            Self::ModifyVm { .. } => Step::Configure,
            Self::CreateDisk { .. } => Step::CreateDisk,
            Self::StartVm { .. } => Step::Start,
            Self::PowerOff { .. } => Step::PowerOff,
            Self::UnregisterVm { .. } => Step::Unregister,
            Self::CloseDisk { .. } => Step::CloseDisk,
        }
    }

    /// Argument vector passed to the executable as-is.
    pub fn args(&self) -> Vec<String> {
        match self {
            Self::CreateVm { name, os_type } => vec![
                "createvm".into(),
                "--name".into(),
                name.clone(),
                "--ostype".into(),
                os_type.clone(),
                "--register".into(),
            ],
            Self::ModifyVm {
                name,
                cpus,
                memory_mb,
            } => vec![
                "modifyvm".into(),
                name.clone(),
                "--cpus".into(),
                cpus.to_string(),
                "--memory".into(),
                memory_mb.to_string(),
            ],
            Self::CreateDisk { name, size_mb } => vec![
                "createhd".into(),
                "--filename".into(),
                disk_filename(name),
                "--size".into(),
                size_mb.to_string(),
            ],
            Self::StartVm { name } => vec![
                "startvm".into(),
                name.clone(),
                "--type".into(),
                "headless".into(),
            ],
            Self::PowerOff { name } => vec!["controlvm".into(), name.clone(), "poweroff".into()],
            Self::UnregisterVm { name } => {
                vec!["unregistervm".into(), name.clone(), "--delete".into()]
            }
            Self::CloseDisk { name } => vec![
                "closemedium".into(),
                "disk".into(),
                disk_filename(name),
                "--delete".into(),
            ],
        }
    }
}

pub fn disk_filename(name: &str) -> String {
    format!("{}.vdi", name)
}

/// Resolves the hypervisor executable and runs commands against it.
#[derive(Clone)]
pub struct Hypervisor {
    config: HypervisorConfig,
    runner: Arc<dyn CommandRunner>,
}

impl Hypervisor {
    pub fn new(config: HypervisorConfig) -> Self {
        Self::with_runner(config, Arc::new(DuctRunner))
    }

    pub fn with_runner(config: HypervisorConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self { config, runner }
    }

    pub fn config(&self) -> &HypervisorConfig {
        &self.config
    }

    /// Re-validates the configured path. Called before every lifecycle
    /// operation, never cached.
    pub fn resolve(&self) -> Result<PathBuf> {
        resolve_executable(&self.config.path).map_err(|e| match e {
            VmError::Unavailable { path, reason } => {
                OrchestratorError::HypervisorUnavailable { path, reason }
            }
            other => OrchestratorError::HypervisorUnavailable {
                path: self.config.path.clone(),
                reason: other.to_string(),
            },
        })
    }

    /// Runs one command and maps anything but exit code 0 to an error
    /// attributed to the command's step.
    pub async fn run(&self, program: &Path, command: HypervisorCommand) -> Result<CommandOutput> {
        let step = command.step();
        let args = command.args();
        info!(
            "Executing {} step: {}",
            step,
            render_command_line(program, &args)
        );

        let runner = Arc::clone(&self.runner);
        let program = program.to_path_buf();
        let timeout = self.config.timeout();
        let outcome = tokio::task::spawn_blocking(move || runner.run(&program, &args, timeout)).await?;

        let output = match outcome {
            Ok(output) => {
                for line in output.output.lines() {
                    debug!("[{}] {}", step, line);
                }
                output
            }
            Err(VmError::Timeout { timeout, .. }) => {
                warn!("Hypervisor {} step timed out after {:?}", step, timeout);
                return Err(OrchestratorError::Timeout { step, timeout });
            }
            Err(e) => {
                warn!("Hypervisor {} step could not run: {}", step, e);
                return Err(OrchestratorError::Io {
                    step,
                    message: e.to_string(),
                });
            }
        };

        if !output.success() {
            warn!(
                "Hypervisor {} step failed with exit code {:?}",
                step, output.exit_code
            );
            return Err(OrchestratorError::ExternalCommand {
                step,
                exit_code: output.exit_code,
                output: output.output,
            });
        }

        Ok(output)
    }
}

impl fmt::Debug for Hypervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hypervisor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
