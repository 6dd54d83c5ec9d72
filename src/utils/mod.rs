use std::io;
use std::path::{Path, PathBuf};

use tracing_subscriber::EnvFilter;
use which::which;

const DEFAULT_LOG_FILTER: &str = "dbbackup=info";

/// Initialize tracing to stderr. `RUST_LOG` overrides the default filter.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

/// Resolves the dump tool executable.
///
/// A bare name (`mysqldump`) is looked up in PATH; anything containing a path
/// separator is taken as given.
pub fn resolve_executable(tool: &str) -> io::Result<PathBuf> {
    let candidate = Path::new(tool);
    if candidate.components().count() > 1 || candidate.is_absolute() {
        return Ok(candidate.to_path_buf());
    }
    which(tool).map_err(|e| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} executable not found in PATH: {}", tool, e),
        )
    })
}
