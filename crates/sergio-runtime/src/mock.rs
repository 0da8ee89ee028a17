//! In-memory `ContainerRuntime` for tests.
//!
//! Tracks container state, pushed files, and every exec/shell invocation.
//! Failures are scripted by substring: any shell code or exec argv containing
//! a registered pattern exits non-zero.

use crate::client::{Address, ContainerRuntime};
use crate::RuntimeError;
use std::collections::BTreeMap;
use std::sync::Mutex;

#[derive(Default)]
pub struct MockRuntime {
    state: Mutex<MockState>,
}

#[derive(Default)]
struct MockState {
    containers: BTreeMap<String, MockContainer>,
    launched: Vec<(String, String)>,
    started: Vec<String>,
    exec_log: Vec<(String, Vec<String>)>,
    shell_log: Vec<ShellCall>,
    push_log: Vec<(String, String, Vec<u8>)>,
    fail_containing: Vec<String>,
}

#[derive(Default)]
struct MockContainer {
    running: bool,
    files: BTreeMap<String, Vec<u8>>,
    devices: BTreeMap<String, (String, String)>,
    addresses: BTreeMap<String, Vec<Address>>,
}

/// One recorded shell invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCall {
    pub container: String,
    pub user: String,
    pub shell: String,
    pub code: Option<String>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a container with the given run state and a default pair of
    /// eth0 addresses.
    pub fn add_container(&self, id: &str, running: bool) {
        let mut state = self.lock();
        let octet = 10 + state.containers.len();
        let container = state.containers.entry(id.to_owned()).or_default();
        container.running = running;
        container.addresses.insert(
            "eth0".to_owned(),
            vec![
                Address {
                    family: "inet".to_owned(),
                    address: format!("10.206.0.{octet}"),
                },
                Address {
                    family: "inet6".to_owned(),
                    address: format!("fd42::{octet}"),
                },
            ],
        );
    }

    pub fn set_addresses(&self, id: &str, device: &str, addresses: Vec<Address>) {
        self.lock()
            .containers
            .entry(id.to_owned())
            .or_default()
            .addresses
            .insert(device.to_owned(), addresses);
    }

    pub fn seed_file(&self, id: &str, path: &str, data: &[u8]) {
        self.lock()
            .containers
            .entry(id.to_owned())
            .or_default()
            .files
            .insert(path.to_owned(), data.to_vec());
    }

    /// Any exec argv or shell code containing `pattern` exits with status 1.
    pub fn fail_containing(&self, pattern: &str) {
        self.lock().fail_containing.push(pattern.to_owned());
    }

    pub fn launched(&self) -> Vec<(String, String)> {
        self.lock().launched.clone()
    }

    /// Containers passed to `start`, in call order.
    pub fn started(&self) -> Vec<String> {
        self.lock().started.clone()
    }

    /// Every `file_push`, as (container, path, data), in call order.
    pub fn pushed(&self) -> Vec<(String, String, Vec<u8>)> {
        self.lock().push_log.clone()
    }

    pub fn exec_calls(&self) -> Vec<(String, Vec<String>)> {
        self.lock().exec_log.clone()
    }

    pub fn shell_calls(&self) -> Vec<ShellCall> {
        self.lock().shell_log.clone()
    }

    /// Shell code lines run against one container, in order.
    pub fn shell_lines(&self, id: &str) -> Vec<String> {
        self.lock()
            .shell_log
            .iter()
            .filter(|call| call.container == id)
            .filter_map(|call| call.code.clone())
            .collect()
    }

    pub fn file_contents(&self, id: &str, path: &str) -> Option<Vec<u8>> {
        self.lock()
            .containers
            .get(id)
            .and_then(|c| c.files.get(path))
            .cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().expect("mock state poisoned")
    }

    fn scripted_status(state: &MockState, haystack: &str) -> i32 {
        if state.fail_containing.iter().any(|p| haystack.contains(p)) {
            1
        } else {
            0
        }
    }
}

impl ContainerRuntime for MockRuntime {
    fn name(&self) -> &str {
        "mock"
    }

    fn exists(&self, id: &str) -> Result<bool, RuntimeError> {
        Ok(self.lock().containers.contains_key(id))
    }

    fn is_running(&self, id: &str) -> Result<bool, RuntimeError> {
        self.lock()
            .containers
            .get(id)
            .map(|c| c.running)
            .ok_or_else(|| RuntimeError::UnknownContainer(id.to_owned()))
    }

    fn launch(&self, image: &str, id: &str) -> Result<(), RuntimeError> {
        if self.lock().containers.contains_key(id) {
            return Err(RuntimeError::LaunchFailed {
                container: id.to_owned(),
                image: image.to_owned(),
                status: 1,
            });
        }
        self.add_container(id, true);
        self.lock().launched.push((image.to_owned(), id.to_owned()));
        Ok(())
    }

    fn start(&self, id: &str) -> Result<(), RuntimeError> {
        let mut state = self.lock();
        state.started.push(id.to_owned());
        state
            .containers
            .get_mut(id)
            .map(|c| c.running = true)
            .ok_or_else(|| RuntimeError::UnknownContainer(id.to_owned()))
    }

    fn stop(&self, id: &str) -> Result<(), RuntimeError> {
        self.lock()
            .containers
            .get_mut(id)
            .map(|c| c.running = false)
            .ok_or_else(|| RuntimeError::UnknownContainer(id.to_owned()))
    }

    fn delete(&self, id: &str) -> Result<(), RuntimeError> {
        self.lock()
            .containers
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| RuntimeError::UnknownContainer(id.to_owned()))
    }

    fn device_names(&self, id: &str) -> Result<Vec<String>, RuntimeError> {
        Ok(self
            .lock()
            .containers
            .get(id)
            .map(|c| c.devices.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn add_disk_device(
        &self,
        id: &str,
        name: &str,
        source: &str,
        path: &str,
    ) -> Result<(), RuntimeError> {
        self.lock()
            .containers
            .get_mut(id)
            .map(|c| {
                c.devices
                    .insert(name.to_owned(), (source.to_owned(), path.to_owned()));
            })
            .ok_or_else(|| RuntimeError::UnknownContainer(id.to_owned()))
    }

    fn network_state(&self, id: &str) -> Result<BTreeMap<String, Vec<Address>>, RuntimeError> {
        self.lock()
            .containers
            .get(id)
            .map(|c| c.addresses.clone())
            .ok_or_else(|| RuntimeError::UnknownContainer(id.to_owned()))
    }

    fn file_push(
        &self,
        id: &str,
        path: &str,
        data: &[u8],
        _mode: Option<&str>,
    ) -> Result<(), RuntimeError> {
        let mut state = self.lock();
        state
            .push_log
            .push((id.to_owned(), path.to_owned(), data.to_vec()));
        state
            .containers
            .get_mut(id)
            .map(|c| {
                c.files.insert(path.to_owned(), data.to_vec());
            })
            .ok_or_else(|| RuntimeError::UnknownContainer(id.to_owned()))
    }

    fn file_pull(&self, id: &str, path: &str) -> Result<Vec<u8>, RuntimeError> {
        self.lock()
            .containers
            .get(id)
            .and_then(|c| c.files.get(path).cloned())
            .ok_or_else(|| RuntimeError::CommandFailed {
                command: format!("file pull {id}{path}"),
                status: 1,
            })
    }

    fn file_delete(&self, id: &str, path: &str) -> Result<(), RuntimeError> {
        self.lock()
            .containers
            .get_mut(id)
            .and_then(|c| c.files.remove(path))
            .map(|_| ())
            .ok_or_else(|| RuntimeError::CommandFailed {
                command: format!("file delete {id}{path}"),
                status: 1,
            })
    }

    fn execute(&self, id: &str, argv: &[String]) -> Result<i32, RuntimeError> {
        let mut state = self.lock();
        state.exec_log.push((id.to_owned(), argv.to_vec()));
        Ok(Self::scripted_status(&state, &argv.join(" ")))
    }

    fn shell(
        &self,
        id: &str,
        user: &str,
        shell: &str,
        code: Option<&str>,
        _forward: bool,
    ) -> Result<i32, RuntimeError> {
        let mut state = self.lock();
        state.shell_log.push(ShellCall {
            container: id.to_owned(),
            user: user.to_owned(),
            shell: shell.to_owned(),
            code: code.map(str::to_owned),
        });
        Ok(code.map_or(0, |c| Self::scripted_status(&state, c)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_roundtrip() {
        let rt = MockRuntime::new();
        assert!(!rt.exists("db").unwrap());

        rt.launch("images:alpine/3.19", "db").unwrap();
        assert!(rt.exists("db").unwrap());
        assert!(rt.is_running("db").unwrap());
        assert_eq!(rt.launched(), vec![("images:alpine/3.19".to_owned(), "db".to_owned())]);

        rt.stop("db").unwrap();
        assert!(!rt.is_running("db").unwrap());
        rt.start("db").unwrap();
        assert!(rt.is_running("db").unwrap());

        rt.delete("db").unwrap();
        assert!(!rt.exists("db").unwrap());
    }

    #[test]
    fn launch_on_existing_id_fails() {
        let rt = MockRuntime::new();
        rt.add_container("db", false);
        assert!(matches!(
            rt.launch("img", "db"),
            Err(RuntimeError::LaunchFailed { .. })
        ));
    }

    #[test]
    fn files_roundtrip_and_absence() {
        let rt = MockRuntime::new();
        rt.add_container("db", true);
        rt.file_push("db", "/tmp/x", b"payload", Some("0644")).unwrap();
        assert_eq!(rt.file_pull("db", "/tmp/x").unwrap(), b"payload");
        rt.file_delete("db", "/tmp/x").unwrap();
        assert!(rt.file_pull("db", "/tmp/x").is_err());
        assert!(rt.file_delete("db", "/tmp/x").is_err());
    }

    #[test]
    fn scripted_failures_hit_matching_code() {
        let rt = MockRuntime::new();
        rt.add_container("db", true);
        rt.fail_containing("rm /tmp");
        assert_eq!(rt.shell("db", "root", "/bin/sh", Some("rm /tmp/x"), false).unwrap(), 1);
        assert_eq!(rt.shell("db", "root", "/bin/sh", Some("echo ok"), false).unwrap(), 0);
        assert_eq!(rt.shell_lines("db"), vec!["rm /tmp/x", "echo ok"]);
    }

    #[test]
    fn default_addresses_cover_both_families() {
        let rt = MockRuntime::new();
        rt.add_container("db", true);
        let net = rt.network_state("db").unwrap();
        let families: Vec<_> = net["eth0"].iter().map(|a| a.family.as_str()).collect();
        assert_eq!(families, vec!["inet", "inet6"]);
    }

    #[test]
    fn devices_attach_once() {
        let rt = MockRuntime::new();
        rt.add_container("web", true);
        assert!(rt.device_names("web").unwrap().is_empty());
        rt.add_disk_device("web", "webroot", "/srv/www", "/var/www").unwrap();
        assert_eq!(rt.device_names("web").unwrap(), vec!["webroot"]);
    }
}
