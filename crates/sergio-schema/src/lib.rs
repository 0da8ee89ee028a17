//! On-disk data model for sergio container definitions.
//!
//! This crate covers everything that lives in YAML: the root configuration
//! file (definitions directory, backups directory, global variables), the
//! per-container definition documents, and the tagged action-item nodes
//! (`!rpc`, `!df`, `!tf`, `!rm`, `!cwd`, `!echo`, `!load`, `!idle`,
//! `!parent`) that definitions embed inside their `actions` and `files`
//! sections.

pub mod action;
pub mod config;
pub mod definition;

pub use action::{
    ActionItem, DumpFileSpec, FileSource, LoadRef, RpcSpec, TransferDirection, TransferSpec,
};
pub use config::{discover_config, parse_config_file, parse_config_str, RootConfig};
pub use definition::{
    parse_definition_file, parse_definition_str, Definition, MountpointDef, PortDef,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to read definition file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("no configuration file found (searched -c, ./sergio.y{{a,}}ml, ./config.y{{a,}}ml, ~/sergio.y{{a,}}ml)")]
    ConfigNotFound,
    #[error("definition document has no top-level 'container' mapping")]
    MissingContainerKey,
    #[error("unknown action tag: !{0}")]
    UnknownTag(String),
    #[error("invalid {kind} action: {reason}")]
    InvalidAction { kind: &'static str, reason: String },
    #[error("bad transfer direction '{0}' (expected d/down/< or u/up/>)")]
    BadDirection(String),
    #[error("load reference '{0}' resolves to no existing file")]
    LoadNotFound(String),
    #[error("load reference '{0}' is not valid UTF-8 text (mark it binary to embed verbatim)")]
    LoadNotText(String),
}
