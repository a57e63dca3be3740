use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::hypervisor::Step;
use crate::vm::VmId;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("A VM named '{0}' already exists")]
    AlreadyExists(String),

    #[error("VM not found: {0}")]
    NotFound(VmId),

    #[error("Hypervisor not available at {}: {reason}", .path.display())]
    HypervisorUnavailable { path: PathBuf, reason: String },

    #[error("Hypervisor command '{step}' failed with exit code {}{}", format_exit_code(.exit_code), format_output(.output))]
    ExternalCommand {
        step: Step,
        exit_code: Option<i32>,
        output: String,
    },

    #[error("Failed to run hypervisor command '{step}': {message}")]
    Io { step: Step, message: String },

    #[error("Hypervisor command '{step}' timed out after {timeout:?}")]
    Timeout { step: Step, timeout: Duration },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("IO error: {0}")]
    FileSystem(#[from] std::io::Error),
}

impl OrchestratorError {
    /// Stable, machine-readable name of the failure kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::AlreadyExists(_) => "already_exists",
            Self::NotFound(_) => "not_found",
            Self::HypervisorUnavailable { .. } => "hypervisor_unavailable",
            Self::ExternalCommand { .. } => "external_command",
            Self::Io { .. } => "io",
            Self::Timeout { .. } => "timeout",
            Self::Database(_) | Self::Migration(_) => "database",
            Self::Task(_) | Self::FileSystem(_) => "internal",
        }
    }

    /// The lifecycle step a hypervisor failure is attributed to, if any.
    pub fn step(&self) -> Option<Step> {
        match self {
            Self::ExternalCommand { step, .. } | Self::Io { step, .. } | Self::Timeout { step, .. } => {
                Some(*step)
            }
            _ => None,
        }
    }

    /// Raw tool output attached to a failed command.
    pub fn command_output(&self) -> Option<&str> {
        match self {
            Self::ExternalCommand { output, .. } => Some(output),
            _ => None,
        }
    }
}

fn format_exit_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "none (terminated by signal)".to_string(),
    }
}

fn format_output(output: &str) -> String {
    let lines: Vec<&str> = output.lines().collect();
    if lines.is_empty() {
        return String::new();
    }
    let start = lines.len().saturating_sub(50);
    format!("\n\nOutput (last 50 lines):\n{}", lines[start..].join("\n"))
}
