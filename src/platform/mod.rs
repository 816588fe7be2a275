use std::path::{Path, PathBuf};

pub const DATA_DIR_ENV: &str = "ROOMBRIDGE_DATA_DIR";

/// Platform-specific operations abstracted behind a common interface.
/// Each OS provides its own `NativePlatform` implementation so call sites
/// remain free of `#[cfg]` blocks.
pub trait Platform {
    /// Set restrictive *directory* permissions (0o700 on Unix, no-op on Windows).
    fn restrict_dir_permissions(path: &Path);

    /// Set restrictive *file* permissions (0o600 on Unix, no-op on Windows).
    fn restrict_file_permissions(path: &Path);

    /// Address of the local Docker Engine when neither config nor
    /// `DOCKER_HOST` names one.
    fn default_docker_socket() -> &'static str;

    /// Root data directory for the manager.
    /// Unix: `~/.roombridge`, Windows: `%APPDATA%\roombridge`.
    fn data_dir() -> PathBuf;
}

/// `ROOMBRIDGE_DATA_DIR` wins over the platform default when set and non-empty.
pub fn resolve_data_dir(default: PathBuf) -> PathBuf {
    match std::env::var(DATA_DIR_ENV) {
        Ok(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
        _ => default,
    }
}

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub use unix::NativePlatform;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use windows::NativePlatform;
