//! Executable file output.
//!
//! Start scripts and node files flagged executable are written with mode
//! `0o755` so that the container image can run them without a `chmod`
//! layer.

use crate::error::{EmuError, Result};
use std::path::Path;

/// Write `content` to `path` and mark it executable.
pub fn write_executable(path: &Path, content: &str) -> Result<()> {
    std::fs::write(path, content).map_err(|e| EmuError::artifact(path, e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(path)
            .map_err(|e| EmuError::artifact(path, e))?
            .permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(path, perms).map_err(|e| EmuError::artifact(path, e))?;
    }

    Ok(())
}
