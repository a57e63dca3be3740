use std::sync::Arc;

use sqlx::SqlitePool;
use vm_orchestrator::{Hypervisor, HypervisorConfig, SqliteVmStore, VmOrchestrator};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: VmOrchestrator,
}

impl AppState {
    pub fn new(orchestrator: VmOrchestrator) -> Self {
        Self { orchestrator }
    }

    /// SQLite-backed store and the real `VBoxManage` runner.
    pub fn from_pool(pool: SqlitePool, hypervisor: HypervisorConfig) -> Self {
        Self::new(VmOrchestrator::new(
            Arc::new(SqliteVmStore::new(pool)),
            Hypervisor::new(hypervisor),
        ))
    }
}
