//! # Compiler
//!
//! A compiler walks a rendered [`Registry`] and writes a target-specific
//! artifact tree. The only target is [`Docker`]: one directory per node
//! plus a `docker-compose.yml` manifest referencing all of them.
//!
//! ## Output layout
//!
//! ```text
//! output/
//! ├── docker-compose.yml
//! ├── as100_router0/
//! │   ├── Dockerfile
//! │   ├── start.sh
//! │   ├── node.json
//! │   └── files/etc/bird/bird.conf
//! ├── ix100_rs/
//! └── eth-states/1/        (state directories, when requested)
//! ```
//!
//! ## Overwriting
//!
//! An existing output directory is never merged into. Without
//! `override_existing` the compile fails before writing anything; with it
//! the previous artifacts are removed first. State directory roots survive
//! an override unless the state policy is [`StateDirPolicy::Recreate`].
//!
//! A filesystem error aborts the remaining emission without rolling back
//! what was already written.

pub mod compose;
pub mod docker;
pub mod state;

use crate::error::Result;
use crate::registry::Registry;
use std::path::Path;

pub use compose::{ComposeFile, ComposeNetwork, ComposeService};
pub use docker::Docker;
pub use state::{create_state_directory, StateDirPolicy};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompileOptions {
    /// Replace an existing output directory
    pub override_existing: bool,
    pub state_policy: StateDirPolicy,
}

impl CompileOptions {
    pub fn overriding() -> Self {
        CompileOptions {
            override_existing: true,
            ..CompileOptions::default()
        }
    }
}

pub trait Compiler {
    fn name(&self) -> &str;

    fn compile(&self, registry: &Registry, output: &Path, options: CompileOptions) -> Result<()>;
}
