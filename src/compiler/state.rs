//! Per-node state directories.
//!
//! Services that persist data (for example a blockchain data directory)
//! declare a state volume on their node. The compiler creates the host side
//! of each volume under the output directory so it can be bind-mounted.

use crate::error::{EmuError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

/// What to do when a state directory already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateDirPolicy {
    /// Keep the existing directory and its contents
    #[default]
    Reuse,
    /// Remove the directory and create it empty (destroys saved state)
    Recreate,
}

/// Create `base/subpath` according to `policy`, returning its path.
pub fn create_state_directory(base: &Path, subpath: &str, policy: StateDirPolicy) -> Result<PathBuf> {
    let relative = Path::new(subpath);
    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return Err(EmuError::InvalidTopology(format!(
            "state directory '{}' must be a relative path without '..'",
            subpath
        )));
    }

    let dir = base.join(relative);
    if dir.exists() {
        match policy {
            StateDirPolicy::Reuse => {
                log::debug!("Reusing state directory {}", dir.display());
                return Ok(dir);
            }
            StateDirPolicy::Recreate => {
                log::warn!("Removing existing state directory {}", dir.display());
                std::fs::remove_dir_all(&dir).map_err(|e| EmuError::artifact(&dir, e))?;
            }
        }
    }
    std::fs::create_dir_all(&dir).map_err(|e| EmuError::artifact(&dir, e))?;
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_reuse_keeps_contents() {
        let base = TempDir::new().unwrap();
        let dir = create_state_directory(base.path(), "eth-states/1", StateDirPolicy::Reuse).unwrap();
        std::fs::write(dir.join("chaindata"), "blocks").unwrap();

        let again = create_state_directory(base.path(), "eth-states/1", StateDirPolicy::Reuse).unwrap();
        assert_eq!(again, dir);
        assert!(dir.join("chaindata").exists());
    }

    #[test]
    fn test_recreate_empties_directory() {
        let base = TempDir::new().unwrap();
        let dir = create_state_directory(base.path(), "eth-states/1", StateDirPolicy::Recreate).unwrap();
        std::fs::write(dir.join("chaindata"), "blocks").unwrap();

        create_state_directory(base.path(), "eth-states/1", StateDirPolicy::Recreate).unwrap();
        assert!(dir.exists());
        assert!(!dir.join("chaindata").exists());
    }

    #[test]
    fn test_escaping_paths_rejected() {
        let base = TempDir::new().unwrap();
        assert!(create_state_directory(base.path(), "../outside", StateDirPolicy::Reuse).is_err());
        assert!(create_state_directory(base.path(), "/abs", StateDirPolicy::Reuse).is_err());
    }
}
