use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Where shard files live for this process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataDir {
    pub path: PathBuf,
    /// True for the default per-process temp directory, which the server
    /// removes again on shutdown.
    pub ephemeral: bool,
}

/// Resolve the shard directory.
///
/// Priority:
/// 1. explicit `dir` (CLI flag)
/// 2. `SCRT_DATA_DIR` environment variable
/// 3. `<tmp>/scrt-<pid>`
pub fn data_dir(dir: Option<&Path>) -> Result<DataDir> {
    let explicit = dir
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os("SCRT_DATA_DIR").map(PathBuf::from));

    let resolved = match explicit {
        Some(path) => DataDir {
            path,
            ephemeral: false,
        },
        None => DataDir {
            path: process_temp_dir(),
            ephemeral: true,
        },
    };

    std::fs::create_dir_all(&resolved.path)
        .with_context(|| format!("create data dir: {}", resolved.path.display()))?;
    Ok(resolved)
}

fn process_temp_dir() -> PathBuf {
    std::env::temp_dir().join(format!("scrt-{}", std::process::id()))
}
