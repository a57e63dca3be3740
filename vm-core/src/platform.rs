// Standard library
use std::env;
use std::path::PathBuf;

/// Supported operating systems for platform detection.
///
/// Maps `std::env::consts::OS` values onto the platforms that ship a
/// VirtualBox installation with a known layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Os {
    Linux,
    MacOS,
    Windows,
    Unsupported,
}

pub fn current_os() -> Os {
    match env::consts::OS {
        "linux" => Os::Linux,
        "macos" => Os::MacOS,
        "windows" => Os::Windows,
        _ => Os::Unsupported,
    }
}

/// Where VirtualBox puts `VBoxManage` on a default install.
///
/// Linux packages put it on `PATH`, so the bare program name is returned and
/// resolved with `which` at call time.
pub fn default_hypervisor_path(os: Os) -> PathBuf {
    match os {
        Os::Windows => PathBuf::from(r"C:\Program Files\Oracle\VirtualBox\VBoxManage.exe"),
        Os::MacOS => PathBuf::from("/Applications/VirtualBox.app/Contents/MacOS/VBoxManage"),
        Os::Linux | Os::Unsupported => PathBuf::from("VBoxManage"),
    }
}
