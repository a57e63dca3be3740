//! Integration tests for vm-orchestrator
//!
//! Drives the orchestrator against a scripted hypervisor and checks what ends
//! up in the store after each lifecycle operation, successful or not.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use vm_orchestrator::test_utils::{
    create_request, memory_orchestrator, test_hypervisor_config, web01_request, ScriptedRunner,
};
use vm_orchestrator::{
    CreateVmRequest, Hypervisor, HypervisorConfig, MemoryVmStore, NewVm, OrchestratorError,
    Step, VmId, VmOrchestrator, VmRecord, VmStatus, VmStore,
};

fn scripted() -> Arc<ScriptedRunner> {
    Arc::new(ScriptedRunner::new())
}

#[tokio::test]
async fn test_full_lifecycle_scenario() {
    let runner = scripted();
    let (orchestrator, store) = memory_orchestrator(runner.clone());

    let vm = orchestrator
        .create_vm(web01_request())
        .await
        .expect("Failed to create VM");
    assert_eq!(vm.name, "web01");
    assert_eq!(vm.os_type, "Ubuntu_64");
    assert_eq!(vm.status, VmStatus::Stopped);

    orchestrator.start_vm(vm.id).await.expect("Failed to start VM");
    let running = store.find_by_id(vm.id).await.unwrap().unwrap();
    assert_eq!(running.status, VmStatus::Running);

    orchestrator.stop_vm(vm.id).await.expect("Failed to stop VM");
    let stopped = store.find_by_id(vm.id).await.unwrap().unwrap();
    assert_eq!(stopped.status, VmStatus::Stopped);

    orchestrator.delete_vm(vm.id).await.expect("Failed to delete VM");
    assert!(store.find_by_id(vm.id).await.unwrap().is_none());

    assert_eq!(
        runner.calls(),
        vec![
            vec!["createvm", "--name", "web01", "--ostype", "Ubuntu_64", "--register"],
            vec!["modifyvm", "web01", "--cpus", "2", "--memory", "2048"],
            vec!["createhd", "--filename", "web01.vdi", "--size", "20"],
            vec!["startvm", "web01", "--type", "headless"],
            vec!["controlvm", "web01", "poweroff"],
            vec!["unregistervm", "web01", "--delete"],
        ]
    );
}

#[tokio::test]
async fn test_create_persists_stopped_for_various_inputs() {
    let (orchestrator, store) = memory_orchestrator(scripted());

    let inputs = [
        ("a", "Other", 1, 1, 1),
        ("db server", "Debian_64", 8, 16384, 200),
        ("Win-11", "Windows11_64", 4, 8192, 64),
    ];

    for (name, os, cpu, ram, storage) in inputs {
        let vm = orchestrator
            .create_vm(CreateVmRequest {
                name: name.to_string(),
                os_type: os.to_string(),
                cpu,
                ram,
                storage,
            })
            .await
            .expect("Failed to create VM");

        let persisted = store.find_by_id(vm.id).await.unwrap().unwrap();
        assert_eq!(persisted.status, VmStatus::Stopped);
        assert_eq!(persisted, vm);
    }

    assert_eq!(orchestrator.list_vms().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_validation_never_reaches_hypervisor() {
    let runner = scripted();
    let (orchestrator, store) = memory_orchestrator(runner.clone());

    let err = orchestrator
        .create_vm(CreateVmRequest {
            name: "web01".to_string(),
            os_type: String::new(),
            cpu: 0,
            ram: 0,
            storage: 0,
        })
        .await
        .unwrap_err();

    match err {
        OrchestratorError::Validation(msg) => assert_eq!(msg, "VM OS type cannot be empty"),
        other => panic!("Expected validation error, got {:?}", other),
    }
    assert!(runner.calls().is_empty());
    assert!(store.find_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_duplicate_name_rejected_case_insensitively() {
    let runner = scripted();
    let (orchestrator, _store) = memory_orchestrator(runner.clone());

    orchestrator.create_vm(web01_request()).await.unwrap();
    let calls_before = runner.calls().len();

    let err = orchestrator
        .create_vm(create_request("WEB01"))
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestratorError::AlreadyExists(_)), "got {:?}", err);
    assert_eq!(runner.calls().len(), calls_before);
}

#[tokio::test]
async fn test_create_unavailable_hypervisor() {
    let runner = scripted();
    let store = Arc::new(MemoryVmStore::new());
    let hypervisor = Hypervisor::with_runner(
        HypervisorConfig {
            path: PathBuf::from("/opt/missing/VBoxManage"),
            command_timeout_secs: 5,
        },
        runner.clone(),
    );
    let orchestrator = VmOrchestrator::new(store.clone(), hypervisor);

    let err = orchestrator.create_vm(web01_request()).await.unwrap_err();

    assert!(
        matches!(err, OrchestratorError::HypervisorUnavailable { .. }),
        "got {:?}",
        err
    );
    assert!(runner.calls().is_empty());
    assert!(store.find_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_create_register_failure_runs_nothing_else() {
    let runner = scripted();
    runner.fail("createvm", 1, "VBoxManage: error: Machine settings file already exists");
    let (orchestrator, store) = memory_orchestrator(runner.clone());

    let err = orchestrator.create_vm(web01_request()).await.unwrap_err();

    match &err {
        OrchestratorError::ExternalCommand {
            step,
            exit_code,
            output,
        } => {
            assert_eq!(*step, Step::Register);
            assert_eq!(*exit_code, Some(1));
            assert!(output.contains("already exists"));
        }
        other => panic!("Expected external command error, got {:?}", other),
    }
    // Nothing was registered by us, so nothing is cleaned up either.
    assert_eq!(runner.subcommands(), vec!["createvm"]);
    assert!(store.find_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_create_configure_failure_unregisters_vm() {
    let runner = scripted();
    runner.fail("modifyvm", 1, "invalid cpu count");
    let (orchestrator, store) = memory_orchestrator(runner.clone());

    let err = orchestrator.create_vm(web01_request()).await.unwrap_err();

    assert_eq!(err.step(), Some(Step::Configure));
    assert_eq!(
        runner.subcommands(),
        vec!["createvm", "modifyvm", "unregistervm"]
    );
    assert!(store.find_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_create_disk_failure_unregisters_vm() {
    let runner = scripted();
    runner.fail("createhd", 1, "disk full");
    let (orchestrator, store) = memory_orchestrator(runner.clone());

    let err = orchestrator.create_vm(web01_request()).await.unwrap_err();

    assert_eq!(err.step(), Some(Step::CreateDisk));
    assert_eq!(
        runner.subcommands(),
        vec!["createvm", "modifyvm", "createhd", "unregistervm"]
    );
    assert!(store.find_all().await.unwrap().is_empty());

    // The name is free again, so a retry goes through once the cause is fixed.
    runner.succeed("createhd");
    let vm = orchestrator.create_vm(web01_request()).await.unwrap();
    assert_eq!(vm.status, VmStatus::Stopped);
}

#[tokio::test]
async fn test_failed_cleanup_keeps_original_error() {
    let runner = scripted();
    runner.fail("createhd", 1, "disk full");
    runner.fail("unregistervm", 1, "machine locked");
    let (orchestrator, _store) = memory_orchestrator(runner.clone());

    let err = orchestrator.create_vm(web01_request()).await.unwrap_err();

    assert_eq!(err.step(), Some(Step::CreateDisk));
}

#[tokio::test]
async fn test_start_failure_leaves_status_unchanged() {
    let runner = scripted();
    let (orchestrator, store) = memory_orchestrator(runner.clone());
    let vm = orchestrator.create_vm(web01_request()).await.unwrap();

    runner.fail("startvm", 1, "VT-x is not available");
    let err = orchestrator.start_vm(vm.id).await.unwrap_err();

    assert_eq!(err.step(), Some(Step::Start));
    assert_eq!(err.command_output(), Some("VT-x is not available"));
    let persisted = store.find_by_id(vm.id).await.unwrap().unwrap();
    assert_eq!(persisted.status, VmStatus::Stopped);
    assert_eq!(persisted.updated_at, vm.updated_at);
}

#[tokio::test]
async fn test_stop_failure_leaves_running() {
    let runner = scripted();
    let (orchestrator, store) = memory_orchestrator(runner.clone());
    let vm = orchestrator.create_vm(web01_request()).await.unwrap();
    orchestrator.start_vm(vm.id).await.unwrap();

    runner.fail("controlvm", 1, "not running");
    let err = orchestrator.stop_vm(vm.id).await.unwrap_err();

    assert_eq!(err.step(), Some(Step::PowerOff));
    let persisted = store.find_by_id(vm.id).await.unwrap().unwrap();
    assert_eq!(persisted.status, VmStatus::Running);
}

#[tokio::test]
async fn test_spawn_failure_is_io_error() {
    let runner = scripted();
    let (orchestrator, store) = memory_orchestrator(runner.clone());
    let vm = orchestrator.create_vm(web01_request()).await.unwrap();

    runner.fail_to_spawn("startvm");
    let err = orchestrator.start_vm(vm.id).await.unwrap_err();

    assert!(matches!(err, OrchestratorError::Io { step: Step::Start, .. }), "got {:?}", err);
    let persisted = store.find_by_id(vm.id).await.unwrap().unwrap();
    assert_eq!(persisted.status, VmStatus::Stopped);
}

#[tokio::test]
async fn test_timeout_is_reported() {
    let runner = scripted();
    let (orchestrator, store) = memory_orchestrator(runner.clone());
    let vm = orchestrator.create_vm(web01_request()).await.unwrap();

    runner.time_out("startvm");
    let err = orchestrator.start_vm(vm.id).await.unwrap_err();

    assert!(
        matches!(
            err,
            OrchestratorError::Timeout { step: Step::Start, timeout } if timeout == Duration::from_secs(5)
        ),
        "got {:?}",
        err
    );
    assert_eq!(err.kind(), "timeout");
    assert!(err.to_string().ends_with("timed out after 5s"), "got {}", err);
    let persisted = store.find_by_id(vm.id).await.unwrap().unwrap();
    assert_eq!(persisted.status, VmStatus::Stopped);
}

#[tokio::test]
async fn test_restart_success_keeps_running() {
    let runner = scripted();
    let (orchestrator, store) = memory_orchestrator(runner.clone());
    let vm = orchestrator.create_vm(web01_request()).await.unwrap();
    orchestrator.start_vm(vm.id).await.unwrap();

    let restarted = orchestrator.restart_vm(vm.id).await.unwrap();

    assert_eq!(restarted.status, VmStatus::Running);
    assert_eq!(
        store.find_by_id(vm.id).await.unwrap().unwrap().status,
        VmStatus::Running
    );
    let tail: Vec<String> = runner.subcommands().into_iter().rev().take(2).collect();
    assert_eq!(tail, vec!["startvm", "controlvm"]);
}

#[tokio::test]
async fn test_restart_start_failure_leaves_stopped() {
    let runner = scripted();
    let (orchestrator, store) = memory_orchestrator(runner.clone());
    let vm = orchestrator.create_vm(web01_request()).await.unwrap();
    orchestrator.start_vm(vm.id).await.unwrap();

    runner.fail("startvm", 1, "session busy");
    let err = orchestrator.restart_vm(vm.id).await.unwrap_err();

    assert_eq!(err.step(), Some(Step::Start));
    let persisted = store.find_by_id(vm.id).await.unwrap().unwrap();
    assert_eq!(persisted.status, VmStatus::Stopped);
}

#[tokio::test]
async fn test_restart_stop_failure_never_starts() {
    let runner = scripted();
    let (orchestrator, store) = memory_orchestrator(runner.clone());
    let vm = orchestrator.create_vm(web01_request()).await.unwrap();
    orchestrator.start_vm(vm.id).await.unwrap();
    let starts_before = runner
        .subcommands()
        .iter()
        .filter(|s| *s == "startvm")
        .count();

    runner.fail("controlvm", 1, "poweroff failed");
    let err = orchestrator.restart_vm(vm.id).await.unwrap_err();

    assert_eq!(err.step(), Some(Step::PowerOff));
    let starts_after = runner
        .subcommands()
        .iter()
        .filter(|s| *s == "startvm")
        .count();
    assert_eq!(starts_after, starts_before);
    let persisted = store.find_by_id(vm.id).await.unwrap().unwrap();
    assert_eq!(persisted.status, VmStatus::Running);
}

#[tokio::test]
async fn test_delete_failure_keeps_record() {
    let runner = scripted();
    let (orchestrator, store) = memory_orchestrator(runner.clone());
    let vm = orchestrator.create_vm(web01_request()).await.unwrap();

    runner.fail("unregistervm", 1, "machine is locked");
    let err = orchestrator.delete_vm(vm.id).await.unwrap_err();

    assert_eq!(err.step(), Some(Step::Unregister));
    assert!(store.find_by_id(vm.id).await.unwrap().is_some());

    runner.succeed("unregistervm");
    orchestrator.delete_vm(vm.id).await.unwrap();
    assert!(store.find_by_id(vm.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_unknown_id_is_not_found() {
    let runner = scripted();
    let (orchestrator, _store) = memory_orchestrator(runner.clone());

    for result in [
        orchestrator.start_vm(404).await.map(|_| ()),
        orchestrator.stop_vm(404).await.map(|_| ()),
        orchestrator.restart_vm(404).await.map(|_| ()),
        orchestrator.delete_vm(404).await,
        orchestrator.get_vm(404).await.map(|_| ()),
    ] {
        assert!(
            matches!(result, Err(OrchestratorError::NotFound(404))),
            "got {:?}",
            result
        );
    }
    assert!(runner.calls().is_empty());
}

#[tokio::test]
async fn test_names_with_spaces_are_single_arguments() {
    let runner = scripted();
    let (orchestrator, _store) = memory_orchestrator(runner.clone());

    let vm = orchestrator
        .create_vm(create_request("my \"test\" vm; echo pwned"))
        .await
        .unwrap();
    orchestrator.start_vm(vm.id).await.unwrap();

    let start = runner.calls().pop().unwrap();
    assert_eq!(start[1], "my \"test\" vm; echo pwned");
    assert_eq!(start.len(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_operations_on_same_vm_are_serialized() {
    let runner = Arc::new(ScriptedRunner::new().with_delay(Duration::from_millis(150)));
    let (orchestrator, store) = memory_orchestrator(runner.clone());
    let vm = orchestrator.create_vm(web01_request()).await.unwrap();

    let (a, b, c) = tokio::join!(
        orchestrator.start_vm(vm.id),
        orchestrator.stop_vm(vm.id),
        orchestrator.restart_vm(vm.id),
    );
    a.unwrap();
    b.unwrap();
    c.unwrap();

    assert_eq!(runner.max_in_flight(), 1);
    assert!(store.find_by_id(vm.id).await.unwrap().is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_operations_on_different_vms_run_in_parallel() {
    let runner = Arc::new(ScriptedRunner::new().with_delay(Duration::from_millis(300)));
    let (orchestrator, _store) = memory_orchestrator(runner.clone());
    let first = orchestrator.create_vm(create_request("one")).await.unwrap();
    let second = orchestrator.create_vm(create_request("two")).await.unwrap();

    let (a, b) = tokio::join!(
        orchestrator.start_vm(first.id),
        orchestrator.start_vm(second.id),
    );
    a.unwrap();
    b.unwrap();

    assert_eq!(runner.max_in_flight(), 2);
}

/// Polls until `done` holds, failing the test after a few seconds.
async fn wait_until(mut done: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !done() {
        assert!(tokio::time::Instant::now() < deadline, "condition never became true");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_abandoned_start_still_completes_and_persists() {
    let runner = Arc::new(ScriptedRunner::new().with_delay(Duration::from_millis(200)));
    let (orchestrator, store) = memory_orchestrator(runner.clone());
    let vm = orchestrator.create_vm(web01_request()).await.unwrap();

    let abandoned =
        tokio::time::timeout(Duration::from_millis(50), orchestrator.start_vm(vm.id)).await;
    assert!(abandoned.is_err());

    // Queues behind the abandoned start instead of overlapping it
    orchestrator.stop_vm(vm.id).await.unwrap();

    assert_eq!(runner.max_in_flight(), 1);
    assert_eq!(
        runner.subcommands(),
        vec!["createvm", "modifyvm", "createhd", "startvm", "controlvm"]
    );
    let persisted = store.find_by_id(vm.id).await.unwrap().unwrap();
    assert_eq!(persisted.status, VmStatus::Stopped);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_abandoned_start_records_running() {
    let runner = Arc::new(ScriptedRunner::new().with_delay(Duration::from_millis(200)));
    let (orchestrator, store) = memory_orchestrator(runner.clone());
    let vm = orchestrator.create_vm(web01_request()).await.unwrap();

    let abandoned =
        tokio::time::timeout(Duration::from_millis(50), orchestrator.start_vm(vm.id)).await;
    assert!(abandoned.is_err());

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let current = store.find_by_id(vm.id).await.unwrap().unwrap();
        if current.status == VmStatus::Running {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "start was never persisted");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_abandoned_create_is_still_cleaned_up() {
    let runner = Arc::new(ScriptedRunner::new().with_delay(Duration::from_millis(150)));
    runner.fail("createhd", 1, "VBoxManage: error: Could not create the medium storage unit");
    let (orchestrator, store) = memory_orchestrator(runner.clone());

    let abandoned =
        tokio::time::timeout(Duration::from_millis(200), orchestrator.create_vm(web01_request()))
            .await;
    assert!(abandoned.is_err());

    wait_until(|| runner.was_called("unregistervm")).await;
    assert_eq!(
        runner.subcommands(),
        vec!["createvm", "modifyvm", "createhd", "unregistervm"]
    );
    assert!(store.find_all().await.unwrap().is_empty());
}

/// Memory store whose inserts always fail, as if the database went away
/// after the hypervisor work was done.
#[derive(Default)]
struct FailingInsertStore {
    inner: MemoryVmStore,
}

#[async_trait]
impl VmStore for FailingInsertStore {
    async fn find_all(&self) -> vm_orchestrator::Result<Vec<VmRecord>> {
        self.inner.find_all().await
    }

    async fn find_by_id(&self, id: VmId) -> vm_orchestrator::Result<Option<VmRecord>> {
        self.inner.find_by_id(id).await
    }

    async fn find_by_name(&self, name: &str) -> vm_orchestrator::Result<Option<VmRecord>> {
        self.inner.find_by_name(name).await
    }

    async fn insert(&self, _vm: NewVm) -> vm_orchestrator::Result<VmRecord> {
        Err(OrchestratorError::Database(sqlx::Error::PoolClosed))
    }

    async fn save(&self, vm: &VmRecord) -> vm_orchestrator::Result<VmRecord> {
        self.inner.save(vm).await
    }

    async fn delete(&self, id: VmId) -> vm_orchestrator::Result<bool> {
        self.inner.delete(id).await
    }
}

#[tokio::test]
async fn test_failed_insert_removes_vm_and_disk() {
    let runner = scripted();
    let store = Arc::new(FailingInsertStore::default());
    let orchestrator = VmOrchestrator::new(
        store.clone(),
        Hypervisor::with_runner(test_hypervisor_config(), runner.clone()),
    );

    let err = orchestrator.create_vm(web01_request()).await.unwrap_err();

    assert!(
        matches!(err, OrchestratorError::Database(sqlx::Error::PoolClosed)),
        "got {:?}",
        err
    );
    assert_eq!(
        runner.subcommands(),
        vec!["createvm", "modifyvm", "createhd", "unregistervm", "closemedium"]
    );
    assert_eq!(
        runner.calls().last().unwrap(),
        &vec!["closemedium", "disk", "web01.vdi", "--delete"]
    );
    assert!(store.find_all().await.unwrap().is_empty());
}
