//! Shared utilities: identifier sanitizing and executable script output.

pub mod naming;
pub mod script;

pub use naming::sanitize_identifier;
pub use script::write_executable;
