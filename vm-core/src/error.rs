use std::fmt::{self, Display, Formatter};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VmError {
    /// The process could not be started at all.
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    /// The process outlived its deadline and was killed.
    Timeout { command: String, timeout: Duration },
    /// The configured executable cannot be used.
    Unavailable { path: PathBuf, reason: String },
    Io(#[from] std::io::Error),
}

impl Display for VmError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            VmError::Spawn { command, source } => {
                write!(f, "Failed to start command '{}': {}", command, source)
            }
            VmError::Timeout { command, timeout } => {
                write!(
                    f,
                    "Command timed out after {:?}: {}\n\nTo debug, try running manually:\n  {}",
                    timeout, command, command
                )
            }
            VmError::Unavailable { path, reason } => {
                write!(
                    f,
                    "Hypervisor executable not available at {}: {}",
                    path.display(),
                    reason
                )
            }
            VmError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

pub type Result<T> = std::result::Result<T, VmError>;
