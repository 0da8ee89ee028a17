//! `ContainerRuntime` implementation over the `lxc` command-line client.
//!
//! State queries go through `lxc query` (raw API JSON); lifecycle and file
//! operations use the porcelain subcommands. Interactive shells are realized
//! as `lxc exec <id> -- sudo --login --user <user> <shell> [-c CODE]`.

use crate::client::{Address, ContainerRuntime};
use crate::RuntimeError;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::process::{Command, Output, Stdio};
use tracing::debug;

pub struct LxcCli {
    binary: String,
}

impl Default for LxcCli {
    fn default() -> Self {
        Self {
            binary: "lxc".to_owned(),
        }
    }
}

impl LxcCli {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the client binary, for tests and nonstandard installs.
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn run(&self, args: &[String]) -> Result<Output, RuntimeError> {
        debug!("{} {}", self.binary, args.join(" "));
        Ok(Command::new(&self.binary).args(args).output()?)
    }

    fn run_checked(&self, args: &[String]) -> Result<Vec<u8>, RuntimeError> {
        let output = self.run(args)?;
        if !output.status.success() {
            return Err(RuntimeError::CommandFailed {
                command: format!("{} {}", self.binary, args.join(" ")),
                status: output.status.code().unwrap_or(-1),
            });
        }
        Ok(output.stdout)
    }

    fn query_state(&self, id: &str) -> Result<InstanceState, RuntimeError> {
        let args = strings(&["query", &format!("/1.0/instances/{id}/state")]);
        let output = self.run(&args)?;
        if !output.status.success() {
            return Err(RuntimeError::UnknownContainer(id.to_owned()));
        }
        Ok(serde_json::from_slice(&output.stdout)?)
    }
}

#[derive(Debug, Deserialize)]
struct InstanceState {
    status: String,
    #[serde(default)]
    network: Option<BTreeMap<String, NetworkDevice>>,
}

#[derive(Debug, Deserialize)]
struct NetworkDevice {
    #[serde(default)]
    addresses: Vec<Address>,
}

#[derive(Debug, Deserialize)]
struct InstanceConfig {
    #[serde(default)]
    devices: BTreeMap<String, serde_json::Value>,
}

/// `<id>/<path>` form the file subcommands expect; absolute guest paths
/// concatenate without doubling the separator.
fn remote_path(id: &str, path: &str) -> String {
    if path.starts_with('/') {
        format!("{id}{path}")
    } else {
        format!("{id}/{path}")
    }
}

fn shell_argv(id: &str, user: &str, shell: &str, code: Option<&str>) -> Vec<String> {
    let mut argv = strings(&[
        "exec", id, "--", "sudo", "--login", "--user", user, shell,
    ]);
    if let Some(code) = code {
        argv.push("-c".to_owned());
        argv.push(code.to_owned());
    }
    argv
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|a| (*a).to_owned()).collect()
}

impl ContainerRuntime for LxcCli {
    fn name(&self) -> &str {
        "lxc"
    }

    fn exists(&self, id: &str) -> Result<bool, RuntimeError> {
        let output = self.run(&strings(&["info", id]))?;
        Ok(output.status.success())
    }

    fn is_running(&self, id: &str) -> Result<bool, RuntimeError> {
        Ok(self.query_state(id)?.status == "Running")
    }

    fn launch(&self, image: &str, id: &str) -> Result<(), RuntimeError> {
        let output = self.run(&strings(&["launch", image, id, "-v"]))?;
        if !output.status.success() {
            return Err(RuntimeError::LaunchFailed {
                container: id.to_owned(),
                image: image.to_owned(),
                status: output.status.code().unwrap_or(-1),
            });
        }
        Ok(())
    }

    fn start(&self, id: &str) -> Result<(), RuntimeError> {
        self.run_checked(&strings(&["start", id])).map(|_| ())
    }

    fn stop(&self, id: &str) -> Result<(), RuntimeError> {
        self.run_checked(&strings(&["stop", id])).map(|_| ())
    }

    fn delete(&self, id: &str) -> Result<(), RuntimeError> {
        self.run_checked(&strings(&["delete", id, "-f"])).map(|_| ())
    }

    fn device_names(&self, id: &str) -> Result<Vec<String>, RuntimeError> {
        let stdout = self.run_checked(&strings(&["query", &format!("/1.0/instances/{id}")]))?;
        let config: InstanceConfig = serde_json::from_slice(&stdout)?;
        Ok(config.devices.into_keys().collect())
    }

    fn add_disk_device(
        &self,
        id: &str,
        name: &str,
        source: &str,
        path: &str,
    ) -> Result<(), RuntimeError> {
        self.run_checked(&strings(&[
            "config",
            "device",
            "add",
            id,
            name,
            "disk",
            &format!("source={source}"),
            &format!("path={path}"),
        ]))
        .map(|_| ())
    }

    fn network_state(&self, id: &str) -> Result<BTreeMap<String, Vec<Address>>, RuntimeError> {
        let state = self.query_state(id)?;
        Ok(state
            .network
            .unwrap_or_default()
            .into_iter()
            .map(|(device, net)| (device, net.addresses))
            .collect())
    }

    fn file_push(
        &self,
        id: &str,
        path: &str,
        data: &[u8],
        mode: Option<&str>,
    ) -> Result<(), RuntimeError> {
        let remote = remote_path(id, path);
        let mut args = strings(&["file", "push", "-", &remote]);
        if let Some(mode) = mode {
            args.push("--mode".to_owned());
            args.push(mode.to_owned());
        }
        debug!("{} {} ({} bytes)", self.binary, args.join(" "), data.len());
        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        if let Some(stdin) = child.stdin.as_mut() {
            stdin.write_all(data)?;
        }
        let status = child.wait()?;
        if !status.success() {
            return Err(RuntimeError::CommandFailed {
                command: format!("{} file push - {remote}", self.binary),
                status: status.code().unwrap_or(-1),
            });
        }
        Ok(())
    }

    fn file_pull(&self, id: &str, path: &str) -> Result<Vec<u8>, RuntimeError> {
        self.run_checked(&strings(&["file", "pull", &remote_path(id, path), "-"]))
    }

    fn file_delete(&self, id: &str, path: &str) -> Result<(), RuntimeError> {
        self.run_checked(&strings(&["file", "delete", &remote_path(id, path)]))
            .map(|_| ())
    }

    fn execute(&self, id: &str, argv: &[String]) -> Result<i32, RuntimeError> {
        let mut args = strings(&["exec", id, "--"]);
        args.extend(argv.iter().cloned());
        let output = self.run(&args)?;
        Ok(output.status.code().unwrap_or(-1))
    }

    fn shell(
        &self,
        id: &str,
        user: &str,
        shell: &str,
        code: Option<&str>,
        forward: bool,
    ) -> Result<i32, RuntimeError> {
        let argv = shell_argv(id, user, shell, code);
        debug!("{} {}", self.binary, argv.join(" "));
        let stdio = || {
            if forward {
                Stdio::inherit()
            } else {
                Stdio::null()
            }
        };
        let status = Command::new(&self.binary)
            .args(&argv)
            .stdin(Stdio::inherit())
            .stdout(stdio())
            .stderr(stdio())
            .status()?;
        Ok(status.code().unwrap_or(-1))
    }
}
