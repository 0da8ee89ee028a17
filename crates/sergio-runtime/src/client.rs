use crate::nat::{Firewall, IptablesCli, MockFirewall};
use crate::RuntimeError;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// One address reported for a network device inside a container.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Address {
    /// `inet` for IPv4, `inet6` for IPv6.
    pub family: String,
    pub address: String,
}

/// Abstract contract against the container engine.
///
/// The non-interactive `execute` and the interactive `shell` are distinct
/// operations: the former returns an exit code only, the latter attaches the
/// operator's terminal.
pub trait ContainerRuntime: Send + Sync {
    fn name(&self) -> &str;

    fn exists(&self, id: &str) -> Result<bool, RuntimeError>;

    fn is_running(&self, id: &str) -> Result<bool, RuntimeError>;

    /// Create and start a container from an image. Non-zero engine status is
    /// a launch failure.
    fn launch(&self, image: &str, id: &str) -> Result<(), RuntimeError>;

    /// Start a stopped container, blocking until it is up.
    fn start(&self, id: &str) -> Result<(), RuntimeError>;

    /// Stop a running container, blocking until it is down.
    fn stop(&self, id: &str) -> Result<(), RuntimeError>;

    /// Force-delete a container.
    fn delete(&self, id: &str) -> Result<(), RuntimeError>;

    /// Names of devices currently attached to the container.
    fn device_names(&self, id: &str) -> Result<Vec<String>, RuntimeError>;

    /// Attach a host directory as a disk device and persist the config.
    fn add_disk_device(
        &self,
        id: &str,
        name: &str,
        source: &str,
        path: &str,
    ) -> Result<(), RuntimeError>;

    /// Per-device addresses from the engine's state endpoint.
    fn network_state(&self, id: &str) -> Result<BTreeMap<String, Vec<Address>>, RuntimeError>;

    fn file_push(
        &self,
        id: &str,
        path: &str,
        data: &[u8],
        mode: Option<&str>,
    ) -> Result<(), RuntimeError>;

    fn file_pull(&self, id: &str, path: &str) -> Result<Vec<u8>, RuntimeError>;

    fn file_delete(&self, id: &str, path: &str) -> Result<(), RuntimeError>;

    /// Run an argument vector inside the container, output captured. Returns
    /// the exit code.
    fn execute(&self, id: &str, argv: &[String]) -> Result<i32, RuntimeError>;

    /// Run a login shell inside the container as the given user; `code` runs
    /// `shell -c CODE` instead of an interactive session. When `forward` is
    /// false the container's stdout/stderr are discarded.
    fn shell(
        &self,
        id: &str,
        user: &str,
        shell: &str,
        code: Option<&str>,
        forward: bool,
    ) -> Result<i32, RuntimeError>;
}

pub fn select_runtime(name: &str) -> Result<Arc<dyn ContainerRuntime>, RuntimeError> {
    match name {
        "lxc" => Ok(Arc::new(crate::lxc::LxcCli::new())),
        "mock" => Ok(Arc::new(crate::mock::MockRuntime::new())),
        other => Err(RuntimeError::Unavailable(other.to_owned())),
    }
}

pub fn select_firewall(name: &str) -> Result<Arc<dyn Firewall>, RuntimeError> {
    match name {
        "iptables" => Ok(Arc::new(IptablesCli::new())),
        "mock" => Ok(Arc::new(MockFirewall::new())),
        other => Err(RuntimeError::Unavailable(other.to_owned())),
    }
}
