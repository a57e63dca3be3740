use serde::Deserialize;
use std::path::PathBuf;
use vm_orchestrator::HypervisorConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default)]
    pub hypervisor: HypervisorConfig,
}

fn default_bind_addr() -> String {
    std::env::var("VM_API_BIND").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
}

fn default_db_path() -> PathBuf {
    if let Ok(path) = std::env::var("VM_API_DB_PATH") {
        return PathBuf::from(path);
    }

    if cfg!(windows) {
        let appdata = std::env::var("APPDATA").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(appdata).join("vm").join("api").join("vms.db")
    } else {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(".vm").join("api").join("vms.db")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            db_path: default_db_path(),
            hypervisor: HypervisorConfig::from_env(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::default()
    }
}
