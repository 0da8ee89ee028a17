//! Execution layer for sergio containers.
//!
//! This crate holds the external collaborators behind abstract contracts:
//! the `ContainerRuntime` trait with an implementation shelling out to the
//! `lxc` binary and a mock for tests, the `Firewall` trait with an
//! iptables/ip6tables implementation and a mock, and host prerequisite
//! checks.

pub mod client;
pub mod lxc;
pub mod mock;
pub mod nat;
pub mod prereq;

pub use client::{select_firewall, select_runtime, Address, ContainerRuntime};
pub use lxc::LxcCli;
pub use mock::MockRuntime;
pub use nat::{
    matching_rule_lines, Firewall, ForwardRule, IpFamily, IptablesCli, MockFirewall,
    EXTERNAL_INTERFACE,
};
pub use prereq::{check_host_prereqs, format_missing, MissingPrereq};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse engine response: {0}")]
    Json(#[from] serde_json::Error),
    #[error("launching '{container}' from '{image}' failed with status {status}")]
    LaunchFailed {
        container: String,
        image: String,
        status: i32,
    },
    #[error("'{command}' failed with status {status}")]
    CommandFailed { command: String, status: i32 },
    #[error("container '{0}' is unknown to the engine")]
    UnknownContainer(String),
    #[error("runtime '{0}' is not available")]
    Unavailable(String),
}
