//! Low-level building blocks shared by the lifecycle service: running external
//! tools with an argument vector and locating the hypervisor executable.

pub mod command_stream;
pub mod error;
pub mod hypervisor;
pub mod platform;

pub use command_stream::{CommandOutput, CommandRunner, DuctRunner};
pub use error::{Result, VmError};
pub use hypervisor::resolve_executable;
