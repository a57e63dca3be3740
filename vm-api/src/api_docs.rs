use utoipa::OpenApi;
use vm_orchestrator::{CreateVmRequest, VmRecord, VmStatus};

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::health::health_check,
        crate::routes::health::readiness_check,
        crate::routes::vms::list_vms,
        crate::routes::vms::create_vm,
        crate::routes::vms::get_vm,
        crate::routes::vms::start_vm,
        crate::routes::vms::stop_vm,
        crate::routes::vms::restart_vm,
        crate::routes::vms::delete_vm,
    ),
    components(schemas(VmRecord, VmStatus, CreateVmRequest)),
    tags(
        (name = "vms", description = "VM lifecycle"),
        (name = "health", description = "Liveness and readiness")
    )
)]
pub struct ApiDoc;
