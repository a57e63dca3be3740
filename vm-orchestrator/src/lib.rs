//! VM lifecycle orchestration business logic
//!
//! This crate validates lifecycle requests, drives `VBoxManage` through the
//! command sequences each operation needs, and keeps the VM store in line with
//! what the hypervisor confirmed. It is consumed by the vm-api HTTP service
//! but has no HTTP knowledge of its own.

pub mod db;
pub mod error;
pub mod hypervisor;
pub mod lifecycle;
pub mod locks;
pub mod store;
pub mod vm;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use error::{OrchestratorError, Result};
pub use hypervisor::{Hypervisor, HypervisorCommand, HypervisorConfig, Step};
pub use lifecycle::VmOrchestrator;
pub use store::{MemoryVmStore, SqliteVmStore, VmStore};
pub use vm::{name_key, CreateVmRequest, NewVm, VmId, VmRecord, VmStatus};
