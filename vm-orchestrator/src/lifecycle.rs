use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::error::{OrchestratorError, Result};
use crate::hypervisor::{Hypervisor, HypervisorCommand};
use crate::locks::KeyedLocks;
use crate::store::VmStore;
use crate::vm::{name_key, CreateVmRequest, NewVm, VmId, VmRecord, VmStatus};

/// Sequences hypervisor commands and the store updates that follow them.
///
/// Status is only written after the hypervisor confirms the command, and
/// operations on the same VM id never overlap. Once a mutating operation holds
/// its lock it runs on its own task, so dropping the returned future does not
/// cut it short: the command finishes, status is persisted and a failed create
/// is still cleaned up.
#[derive(Clone)]
pub struct VmOrchestrator {
    store: Arc<dyn VmStore>,
    hypervisor: Hypervisor,
    vm_locks: KeyedLocks<VmId>,
    name_locks: KeyedLocks<String>,
}

/// What a partially completed create has left behind on the hypervisor.
#[derive(Debug, Default, Clone, Copy)]
struct Provisioned {
    registered: bool,
    disk_created: bool,
}

impl VmOrchestrator {
    pub fn new(store: Arc<dyn VmStore>, hypervisor: Hypervisor) -> Self {
        Self {
            store,
            hypervisor,
            vm_locks: KeyedLocks::new(),
            name_locks: KeyedLocks::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn VmStore> {
        &self.store
    }

    pub fn hypervisor(&self) -> &Hypervisor {
        &self.hypervisor
    }

    /// Fetch all VMs
    pub async fn list_vms(&self) -> Result<Vec<VmRecord>> {
        self.store.find_all().await
    }

    pub async fn get_vm(&self, id: VmId) -> Result<VmRecord> {
        self.load(id).await
    }

    /// Register, configure and allocate storage for a new VM, then persist it
    /// as `Stopped`.
    ///
    /// If a step after registration fails, the VM (and its disk, if already
    /// created) is removed from the hypervisor again before the original
    /// error is returned. No record is written in that case.
    pub async fn create_vm(&self, req: CreateVmRequest) -> Result<VmRecord> {
        req.validate()?;

        let guard = self.name_locks.lock(name_key(&req.name)).await;
        let this = self.clone();
        detached(async move {
            let _guard = guard;
            this.create_locked(req).await
        })
        .await
    }

    async fn create_locked(&self, req: CreateVmRequest) -> Result<VmRecord> {
        if self.store.find_by_name(&req.name).await?.is_some() {
            return Err(OrchestratorError::AlreadyExists(req.name));
        }

        let program = self.hypervisor.resolve()?;
        info!("Creating VM: {} ({})", req.name, req.os_type);

        let mut provisioned = Provisioned::default();
        match self.provision(&program, &req, &mut provisioned).await {
            Ok(vm) => {
                info!("VM created and saved: {} (id {})", vm.name, vm.id);
                Ok(vm)
            }
            Err(e) => {
                error!("Error creating VM {}: {}", req.name, e);
                self.compensate(&program, &req.name, provisioned).await;
                Err(e)
            }
        }
    }

    async fn provision(
        &self,
        program: &Path,
        req: &CreateVmRequest,
        provisioned: &mut Provisioned,
    ) -> Result<VmRecord> {
        self.hypervisor
            .run(
                program,
                HypervisorCommand::CreateVm {
                    name: req.name.clone(),
                    os_type: req.os_type.clone(),
                },
            )
            .await?;
        provisioned.registered = true;

        self.hypervisor
            .run(
                program,
                HypervisorCommand::ModifyVm {
                    name: req.name.clone(),
                    cpus: req.cpu,
                    memory_mb: req.ram,
                },
            )
            .await?;

        self.hypervisor
            .run(
                program,
                HypervisorCommand::CreateDisk {
                    name: req.name.clone(),
                    size_mb: req.storage,
                },
            )
            .await?;
        provisioned.disk_created = true;

        self.store.insert(NewVm::stopped(req)).await
    }

    /// Best effort: failures are logged and never replace the error that
    /// triggered the cleanup.
    async fn compensate(&self, program: &Path, name: &str, provisioned: Provisioned) {
        if provisioned.registered {
            warn!("Unregistering partially created VM: {}", name);
            let command = HypervisorCommand::UnregisterVm {
                name: name.to_string(),
            };
            if let Err(e) = self.hypervisor.run(program, command).await {
                error!("Cleanup of VM {} failed, manual removal needed: {}", name, e);
            }
        }

        if provisioned.disk_created {
            warn!("Deleting disk of partially created VM: {}", name);
            let command = HypervisorCommand::CloseDisk {
                name: name.to_string(),
            };
            if let Err(e) = self.hypervisor.run(program, command).await {
                error!("Cleanup of disk for VM {} failed, manual removal needed: {}", name, e);
            }
        }
    }

    /// Start VM headless; status becomes `Running` only if the hypervisor
    /// accepted the command.
    pub async fn start_vm(&self, id: VmId) -> Result<VmRecord> {
        let guard = self.vm_locks.lock(id).await;
        let this = self.clone();
        detached(async move {
            let _guard = guard;
            this.start_locked(id).await
        })
        .await
    }

    /// Power the VM off; status becomes `Stopped` only on success.
    pub async fn stop_vm(&self, id: VmId) -> Result<VmRecord> {
        let guard = self.vm_locks.lock(id).await;
        let this = self.clone();
        detached(async move {
            let _guard = guard;
            this.stop_locked(id).await
        })
        .await
    }

    /// Stop followed by start, under a single lock.
    ///
    /// A failed stop returns before start is attempted. A failed start after
    /// a successful stop leaves the VM `Stopped`; there is no attempt to bring
    /// it back up.
    pub async fn restart_vm(&self, id: VmId) -> Result<VmRecord> {
        let guard = self.vm_locks.lock(id).await;
        let this = self.clone();
        detached(async move {
            let _guard = guard;
            info!("Restarting VM with ID: {}", id);

            this.stop_locked(id).await?;
            this.start_locked(id).await
        })
        .await
    }

    /// Unregister the VM and delete its media, then drop the record. The
    /// record is kept if the hypervisor refuses.
    pub async fn delete_vm(&self, id: VmId) -> Result<()> {
        let guard = self.vm_locks.lock(id).await;
        let this = self.clone();
        detached(async move {
            let _guard = guard;
            this.delete_locked(id).await
        })
        .await
    }

    async fn delete_locked(&self, id: VmId) -> Result<()> {
        let vm = self.load(id).await?;
        let program = self.hypervisor.resolve()?;
        info!("Deleting VM with ID: {} ({})", id, vm.name);

        self.hypervisor
            .run(
                &program,
                HypervisorCommand::UnregisterVm {
                    name: vm.name.clone(),
                },
            )
            .await?;

        if !self.store.delete(id).await? {
            warn!("VM {} was already gone from the store", id);
        }

        info!("VM deleted successfully: {}", vm.name);
        Ok(())
    }

    async fn start_locked(&self, id: VmId) -> Result<VmRecord> {
        let vm = self.load(id).await?;
        let program = self.hypervisor.resolve()?;
        info!("Starting VM with ID: {} ({})", id, vm.name);

        self.hypervisor
            .run(
                &program,
                HypervisorCommand::StartVm {
                    name: vm.name.clone(),
                },
            )
            .await?;

        let vm = self.persist_status(vm, VmStatus::Running).await?;
        info!("VM started successfully: {}", vm.name);
        Ok(vm)
    }

    async fn stop_locked(&self, id: VmId) -> Result<VmRecord> {
        let vm = self.load(id).await?;
        let program = self.hypervisor.resolve()?;
        info!("Stopping VM with ID: {} ({})", id, vm.name);

        self.hypervisor
            .run(
                &program,
                HypervisorCommand::PowerOff {
                    name: vm.name.clone(),
                },
            )
            .await?;

        let vm = self.persist_status(vm, VmStatus::Stopped).await?;
        info!("VM stopped successfully: {}", vm.name);
        Ok(vm)
    }

    async fn load(&self, id: VmId) -> Result<VmRecord> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or(OrchestratorError::NotFound(id))
    }

    async fn persist_status(&self, mut vm: VmRecord, status: VmStatus) -> Result<VmRecord> {
        vm.status = status;
        self.store.save(&vm).await
    }
}

/// Runs `operation` to completion on its own task, whether or not the caller
/// keeps waiting for it.
async fn detached<T, F>(operation: F) -> Result<T>
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(operation).await?
}
