//! Core engine for sergio container lifecycles.
//!
//! This crate ties together definition loading, inheritance flattening,
//! dependency resolution, and action-stack execution into the `Engine` —
//! the central API realizing every verb (create, start, stop, destroy,
//! backup, restore, nat, denat, login, download, upload, exec, and named
//! actions) against the abstract container runtime and firewall.

pub mod engine;
pub mod model;
pub mod output;
pub mod registry;
pub mod resolve;
pub mod stack;
pub mod template;

pub use engine::Engine;
pub use model::Container;
pub use output::{Output, OutputMode};
pub use registry::Registry;
pub use resolve::launch_order;
pub use stack::ActionStack;
pub use template::Templater;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("schema error: {0}")]
    Schema(#[from] sergio_schema::SchemaError),
    #[error("runtime error: {0}")]
    Runtime(#[from] sergio_runtime::RuntimeError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no definition found for container '{0}'")]
    DefinitionNotFound(String),
    #[error("definition '{id}' failed to load: {source}")]
    DefinitionInvalid {
        id: String,
        #[source]
        source: sergio_schema::SchemaError,
    },
    #[error("circular 'extends' chain while loading '{0}'")]
    ExtendsCycle(String),
    #[error("requirements of '{0}' are not met")]
    RequirementsNotMet(String),
    #[error("unresolvable requirements (dependency cycle among: {0})")]
    UnresolvableRequirements(String),
    #[error("action line failed in '{container}': {line}")]
    ExecutionFailed { container: String, line: String },
    #[error("'!parent' used in the topmost frame of action '{0}'")]
    StackUnderflow(String),
    #[error("container '{container}' has no device '{device}'")]
    NoSuchDevice { container: String, device: String },
    #[error("no backup found for '{0}'")]
    NoBackupFound(String),
    #[error("container '{0}' defines no image ('box') to launch from")]
    MissingImage(String),
    #[error("container '{container}' has no file payload for '{filename}'")]
    MissingFilePayload { container: String, filename: String },
    #[error("container '{0}' is not running")]
    NotRunning(String),
}
