use anyhow::Result;
use tracing::{info, warn};
use vm_api::{create_app, AppState, Config};
use vm_orchestrator::db::{backup_database, create_pool, run_migrations};

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = vm_logging::init_subscriber();

    info!("Starting vm-api service...");

    let config = Config::from_env();
    info!(
        "Configuration loaded: bind_addr={}, db_path={}, hypervisor={}",
        config.bind_addr,
        config.db_path.display(),
        config.hypervisor.path.display()
    );

    // Backup before migrations
    let db_path = &config.db_path;
    if db_path.exists() {
        let backup_path = backup_database(db_path)?;
        info!("Database backed up to: {}", backup_path.display());
    }

    let pool = create_pool(db_path).await?;
    info!("Running database migrations...");
    run_migrations(&pool).await?;
    info!("Migrations complete");

    let state = AppState::from_pool(pool, config.hypervisor.clone());

    // Resolution is repeated per operation, so a missing install is not fatal
    match state.orchestrator.hypervisor().resolve() {
        Ok(path) => info!("Hypervisor found at {}", path.display()),
        Err(e) => warn!("{}", e),
    }

    let app = create_app(state.orchestrator);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("Listening on http://{}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
