use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::VmStore;
use crate::error::{OrchestratorError, Result};
use crate::vm::{name_key, NewVm, VmId, VmRecord};

/// In-process store, used by tests and for running without a database.
#[derive(Debug, Default)]
pub struct MemoryVmStore {
    state: RwLock<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    next_id: VmId,
    records: BTreeMap<VmId, VmRecord>,
}

impl MemoryVmStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VmStore for MemoryVmStore {
    async fn find_all(&self) -> Result<Vec<VmRecord>> {
        Ok(self.state.read().await.records.values().cloned().collect())
    }

    async fn find_by_id(&self, id: VmId) -> Result<Option<VmRecord>> {
        Ok(self.state.read().await.records.get(&id).cloned())
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<VmRecord>> {
        let wanted = name_key(name);
        Ok(self
            .state
            .read()
            .await
            .records
            .values()
            .find(|vm| name_key(&vm.name) == wanted)
            .cloned())
    }

    async fn insert(&self, vm: NewVm) -> Result<VmRecord> {
        let mut state = self.state.write().await;

        let wanted = name_key(&vm.name);
        if state
            .records
            .values()
            .any(|existing| name_key(&existing.name) == wanted)
        {
            return Err(OrchestratorError::AlreadyExists(vm.name));
        }

        state.next_id += 1;
        let now = Utc::now();
        let record = VmRecord {
            id: state.next_id,
            name: vm.name,
            os_type: vm.os_type,
            cpu: vm.cpu,
            ram: vm.ram,
            storage: vm.storage,
            status: vm.status,
            created_at: now,
            updated_at: now,
        };
        state.records.insert(record.id, record.clone());

        Ok(record)
    }

    async fn save(&self, vm: &VmRecord) -> Result<VmRecord> {
        let mut state = self.state.write().await;
        let slot = state
            .records
            .get_mut(&vm.id)
            .ok_or(OrchestratorError::NotFound(vm.id))?;

        let mut updated = vm.clone();
        updated.created_at = slot.created_at;
        updated.updated_at = Utc::now();
        *slot = updated.clone();

        Ok(updated)
    }

    async fn delete(&self, id: VmId) -> Result<bool> {
        Ok(self.state.write().await.records.remove(&id).is_some())
    }
}
