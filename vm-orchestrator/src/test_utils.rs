//! Fixtures shared by this crate's tests and by vm-api's.

use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use vm_core::command_stream::{render_command_line, CommandOutput, CommandRunner};
use vm_core::VmError;

use crate::{
    CreateVmRequest, Hypervisor, HypervisorConfig, MemoryVmStore, SqliteVmStore, VmOrchestrator,
    VmStore,
};

/// Helper to create an in-memory test database with migrations applied
pub async fn create_test_db() -> SqlitePool {
    // A single connection: every new in-memory connection is a fresh database.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    pool
}

/// Hypervisor config pointing at the running test binary, which always
/// exists and is executable. The binary is never actually invoked because
/// tests pair this config with a [`ScriptedRunner`].
pub fn test_hypervisor_config() -> HypervisorConfig {
    HypervisorConfig {
        path: std::env::current_exe().expect("test binary path"),
        command_timeout_secs: 5,
    }
}

/// Orchestrator over an in-memory store and a scripted hypervisor.
pub fn memory_orchestrator(runner: Arc<ScriptedRunner>) -> (VmOrchestrator, Arc<MemoryVmStore>) {
    let store = Arc::new(MemoryVmStore::new());
    let hypervisor = Hypervisor::with_runner(test_hypervisor_config(), runner);
    let orchestrator = VmOrchestrator::new(store.clone() as Arc<dyn VmStore>, hypervisor);
    (orchestrator, store)
}

/// Orchestrator over a SQLite pool and a scripted hypervisor.
pub fn sqlite_orchestrator(pool: SqlitePool, runner: Arc<ScriptedRunner>) -> VmOrchestrator {
    let hypervisor = Hypervisor::with_runner(test_hypervisor_config(), runner);
    VmOrchestrator::new(Arc::new(SqliteVmStore::new(pool)), hypervisor)
}

/// The create request used throughout the tests.
pub fn web01_request() -> CreateVmRequest {
    create_request("web01")
}

pub fn create_request(name: &str) -> CreateVmRequest {
    CreateVmRequest {
        name: name.to_string(),
        os_type: "Ubuntu_64".to_string(),
        cpu: 2,
        ram: 2048,
        storage: 20,
    }
}

#[derive(Debug, Clone)]
enum Outcome {
    Exit(i32, String),
    SpawnFailure,
    Timeout,
}

/// [`CommandRunner`] that records every invocation and answers from a
/// script keyed by VBoxManage subcommand (`createvm`, `startvm`, ...).
/// Unscripted subcommands succeed.
#[derive(Default)]
pub struct ScriptedRunner {
    outcomes: Mutex<HashMap<String, Outcome>>,
    calls: Mutex<Vec<Vec<String>>>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call blocks for `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn fail(&self, subcommand: &str, exit_code: i32, output: &str) {
        self.script(subcommand, Outcome::Exit(exit_code, output.to_string()));
    }

    pub fn fail_to_spawn(&self, subcommand: &str) {
        self.script(subcommand, Outcome::SpawnFailure);
    }

    pub fn time_out(&self, subcommand: &str) {
        self.script(subcommand, Outcome::Timeout);
    }

    pub fn succeed(&self, subcommand: &str) {
        self.outcomes.lock().unwrap().remove(subcommand);
    }

    fn script(&self, subcommand: &str, outcome: Outcome) {
        self.outcomes
            .lock()
            .unwrap()
            .insert(subcommand.to_string(), outcome);
    }

    /// Full argument vectors in call order.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    /// Just the subcommands, in call order.
    pub fn subcommands(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|args| args.first().cloned())
            .collect()
    }

    pub fn was_called(&self, subcommand: &str) -> bool {
        self.subcommands().iter().any(|s| s == subcommand)
    }

    /// Highest number of calls that were running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(
        &self,
        program: &Path,
        args: &[String],
        timeout: Option<Duration>,
    ) -> vm_core::Result<CommandOutput> {
        self.calls.lock().unwrap().push(args.to_vec());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let outcome = args
            .first()
            .and_then(|sub| self.outcomes.lock().unwrap().get(sub).cloned());
        let command = render_command_line(program, args);

        match outcome {
            None => Ok(CommandOutput {
                output: String::new(),
                exit_code: Some(0),
            }),
            Some(Outcome::Exit(code, output)) => Ok(CommandOutput {
                output,
                exit_code: Some(code),
            }),
            Some(Outcome::SpawnFailure) => Err(VmError::Spawn {
                command,
                source: io::Error::new(io::ErrorKind::NotFound, "no such file or directory"),
            }),
            Some(Outcome::Timeout) => Err(VmError::Timeout {
                command,
                timeout: timeout.unwrap_or_default(),
            }),
        }
    }
}
