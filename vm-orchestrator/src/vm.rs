use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::{OrchestratorError, Result};

pub type VmId = i64;

/// Persisted metadata and last confirmed status of one virtual machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VmRecord {
    pub id: VmId,
    /// Handle passed to every hypervisor command. Never changes.
    pub name: String,
    pub os_type: String,
    pub cpu: i64,
    /// Memory in MB.
    pub ram: i64,
    /// Disk size in GB, handed to `createhd --size` unchanged.
    pub storage: i64,
    pub status: VmStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Only confirmed states are persisted. A failed transition leaves the
/// previous status in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(rename_all = "lowercase")]
pub enum VmStatus {
    Stopped,
    Running,
}

impl std::fmt::Display for VmStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VmStatus::Stopped => write!(f, "Stopped"),
            VmStatus::Running => write!(f, "Running"),
        }
    }
}

/// Inbound create request. Any `status` a client sends is ignored.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateVmRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub os_type: String,
    #[serde(default)]
    pub cpu: i64,
    #[serde(default)]
    pub ram: i64,
    #[serde(default)]
    pub storage: i64,
}

impl CreateVmRequest {
    /// Checks fields in a fixed order and reports only the first violation.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(invalid("VM name cannot be empty"));
        }
        if self.os_type.trim().is_empty() {
            return Err(invalid("VM OS type cannot be empty"));
        }
        if self.cpu < 1 {
            return Err(invalid("VM must have at least one CPU"));
        }
        if self.ram < 1 {
            return Err(invalid("VM must have some RAM"));
        }
        if self.storage < 1 {
            return Err(invalid("VM must have storage allocated"));
        }
        Ok(())
    }
}

fn invalid(msg: &str) -> OrchestratorError {
    OrchestratorError::Validation(msg.to_string())
}

/// Case-folded form of a VM name. Two names with the same key are the same
/// VM as far as uniqueness and lookups go.
pub fn name_key(name: &str) -> String {
    name.to_lowercase()
}

/// A record that has not been assigned an id yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewVm {
    pub name: String,
    pub os_type: String,
    pub cpu: i64,
    pub ram: i64,
    pub storage: i64,
    pub status: VmStatus,
}

impl NewVm {
    pub fn stopped(req: &CreateVmRequest) -> Self {
        Self {
            name: req.name.clone(),
            os_type: req.os_type.clone(),
            cpu: req.cpu,
            ram: req.ram,
            storage: req.storage,
            status: VmStatus::Stopped,
        }
    }
}
