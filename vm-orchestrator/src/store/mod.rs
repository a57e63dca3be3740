//! Durable storage of VM records.

mod memory;
mod sqlite;

pub use memory::MemoryVmStore;
pub use sqlite::SqliteVmStore;

use async_trait::async_trait;

use crate::error::Result;
use crate::vm::{NewVm, VmId, VmRecord};

/// Keyed storage of VM records. Each call is atomic on its own; the
/// orchestrator never needs a transaction spanning more than one call.
#[async_trait]
pub trait VmStore: Send + Sync {
    /// All records, ordered by id.
    async fn find_all(&self) -> Result<Vec<VmRecord>>;

    async fn find_by_id(&self, id: VmId) -> Result<Option<VmRecord>>;

    /// Case-insensitive lookup by name.
    async fn find_by_name(&self, name: &str) -> Result<Option<VmRecord>>;

    /// Persist a new record and assign its id.
    async fn insert(&self, vm: NewVm) -> Result<VmRecord>;

    /// Overwrite an existing record. Fails with `NotFound` if it is gone.
    async fn save(&self, vm: &VmRecord) -> Result<VmRecord>;

    /// Returns whether a record was removed.
    async fn delete(&self, id: VmId) -> Result<bool>;
}
