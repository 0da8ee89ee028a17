//! The lifecycle engine.
//!
//! `Engine` realizes every verb against the abstract runtime and firewall:
//! it walks launch orders, executes action stacks frame by frame, publishes
//! NAT rules, and manages backups. All operations are synchronous; the two
//! fixed quiescence sleeps after launch/start give the guest's DHCP a chance
//! to settle before ports are forwarded.

use crate::model::Container;
use crate::output::Output;
use crate::registry::Registry;
use crate::resolve::launch_order;
use crate::stack::ActionStack;
use crate::template::Templater;
use crate::CoreError;
use regex::Regex;
use sergio_runtime::{matching_rule_lines, ContainerRuntime, Firewall, ForwardRule, IpFamily};
use sergio_schema::{
    ActionItem, DumpFileSpec, FileSource, RootConfig, RpcSpec, TransferDirection, TransferSpec,
};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Pause after launch/start before NAT, letting DHCP settle.
pub const QUIESCENCE_DELAY: Duration = Duration::from_secs(5);

const BACKUP_TEMP_PATH: &str = "/tmp/backup.zip";

pub struct Engine {
    registry: Registry,
    runtime: Arc<dyn ContainerRuntime>,
    firewall: Arc<dyn Firewall>,
    templater: Templater,
    backups_dir: PathBuf,
    /// Search order for `!load` payloads: cwd, config dir, definitions dir.
    load_search: Vec<PathBuf>,
    output: Output,
    quiescence: Duration,
}

impl Engine {
    pub fn new(
        config: &RootConfig,
        runtime: Arc<dyn ContainerRuntime>,
        firewall: Arc<dyn Firewall>,
        output: Output,
    ) -> Self {
        Self {
            registry: Registry::new(config.definitions.clone()),
            runtime,
            firewall,
            templater: Templater::new(config.variables.clone()),
            backups_dir: config.backups.clone(),
            load_search: vec![
                PathBuf::from("."),
                config.config_dir.clone(),
                config.definitions.clone(),
            ],
            output,
            quiescence: QUIESCENCE_DELAY,
        }
    }

    /// Shorten (or zero) the post-start settle delay; tests use this.
    pub fn with_quiescence(mut self, quiescence: Duration) -> Self {
        self.quiescence = quiescence;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    // ------------------------------------------------------------------
    // Verbs

    pub fn create(&self, id: &str, recursive: bool) -> Result<(), CoreError> {
        let c = self.registry.get(id)?;
        if self.runtime.exists(&c.id)? {
            self.output.log(&c.name, "Already exists");
            return Ok(());
        }
        let image = c
            .image
            .clone()
            .ok_or_else(|| CoreError::MissingImage(c.id.clone()))?;
        self.output
            .log(&c.name, format!("Create new container {} from {}", c.id, image));
        self.check_requirements(&c, recursive, recursive)?;
        self.runtime.launch(&image, &c.id)?;
        self.mount(&c)?;
        self.output.log(&c.name, "Waiting for network to calm down");
        std::thread::sleep(self.quiescence);
        self.nat_container(&c)?;
        self.execute_action(&c, "create", &BTreeMap::new())?;
        self.execute_action(&c, "start", &BTreeMap::new())?;
        self.output.log(&c.name, "Done");
        Ok(())
    }

    pub fn start(&self, id: &str, recursive: bool) -> Result<(), CoreError> {
        let c = self.registry.get(id)?;
        if self.runtime.is_running(&c.id)? {
            self.output.log(&c.name, "Already running");
            return Ok(());
        }
        self.check_requirements(&c, recursive, false)?;
        self.output.log(&c.name, "Starting...");
        self.runtime.start(&c.id)?;
        self.output.log(&c.name, "Waiting for network to calm down");
        std::thread::sleep(self.quiescence);
        self.nat_container(&c)?;
        self.execute_action(&c, "start", &BTreeMap::new())?;
        self.output.log(&c.name, "Done");
        Ok(())
    }

    pub fn stop(&self, id: &str) -> Result<(), CoreError> {
        let c = self.registry.get(id)?;
        if !self.runtime.is_running(&c.id)? {
            self.output.log(&c.name, "Is not running");
            return Ok(());
        }
        self.output.log(&c.name, "Stopping...");
        self.execute_action(&c, "stop", &BTreeMap::new())?;
        self.denat_container(&c)?;
        self.runtime.stop(&c.id)?;
        self.output.log(&c.name, "Done");
        Ok(())
    }

    /// Tear down and delete. Everything before the final delete is
    /// best-effort: failures are logged and the delete still happens.
    pub fn destroy(&self, id: &str) -> Result<(), CoreError> {
        let c = self.registry.get(id)?;
        if let Err(error) = self.teardown(&c) {
            warn!(container = %c.id, %error, "ignoring teardown error before delete");
        }
        self.runtime.delete(&c.id)?;
        self.output.log(&c.name, "Done");
        Ok(())
    }

    fn teardown(&self, c: &Rc<Container>) -> Result<(), CoreError> {
        // A destroy action needs a running container to run in.
        if c.has_action("destroy") && !self.runtime.is_running(&c.id)? {
            self.start(&c.id, true)?;
        }
        if self.runtime.is_running(&c.id)? {
            self.execute_action(c, "stop", &BTreeMap::new())?;
            self.denat_container(c)?;
        }
        if c.has_action("destroy") {
            self.execute_action(c, "destroy", &BTreeMap::new())?;
        }
        Ok(())
    }

    pub fn nat(&self, id: &str) -> Result<(), CoreError> {
        let c = self.registry.get(id)?;
        self.nat_container(&c)
    }

    pub fn denat(&self, id: &str) -> Result<(), CoreError> {
        let c = self.registry.get(id)?;
        self.denat_container(&c)
    }

    pub fn login(&self, id: &str, dir: Option<&str>) -> Result<(), CoreError> {
        let c = self.registry.get(id)?;
        if !self.runtime.is_running(&c.id)? {
            self.output.log(&c.name, "Not running");
            return Ok(());
        }
        let code = dir.map(|dir| {
            c.set_workdir(dir.to_owned());
            format!("cd {dir}; exec {}", c.shell)
        });
        self.runtime
            .shell(&c.id, &c.user, &c.shell, code.as_deref(), true)?;
        Ok(())
    }

    pub fn backup(&self, id: &str) -> Result<(), CoreError> {
        let c = self.registry.get(id)?;
        if !c.has_action("backup") {
            self.output.log(&c.name, "Action \"backup\" does not exist");
            return Ok(());
        }
        if !self.runtime.is_running(&c.id)? {
            self.output.log(&c.name, "Not running");
        }
        self.execute_action(&c, "backup", &BTreeMap::new())?;
        let bytes = self.runtime.file_pull(&c.id, BACKUP_TEMP_PATH)?;
        std::fs::create_dir_all(&self.backups_dir)?;
        let stamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S");
        let filename = format!("{}_{stamp}.zip", c.id);
        let destination = self.backups_dir.join(&filename);
        std::fs::write(&destination, &bytes)?;
        self.runtime.file_delete(&c.id, BACKUP_TEMP_PATH)?;

        let latest = self.backups_dir.join(format!("{}_latest.zip", c.id));
        if latest.symlink_metadata().is_ok() {
            std::fs::remove_file(&latest)?;
        }
        std::os::unix::fs::symlink(&filename, &latest)?;
        self.output
            .log(&c.name, format!("Backup written to {}", destination.display()));
        Ok(())
    }

    pub fn restore(&self, id: &str, path: Option<&str>) -> Result<(), CoreError> {
        let c = self.registry.get(id)?;
        if !c.has_action("restore") {
            self.output.log(&c.name, "Action \"restore\" does not exist");
            return Ok(());
        }
        if !self.runtime.is_running(&c.id)? {
            self.output.log(&c.name, "Not running");
        }
        let source = self
            .restore_candidates(&c.id, path)
            .into_iter()
            .find(|candidate| candidate.exists())
            .ok_or_else(|| CoreError::NoBackupFound(c.id.clone()))?;
        self.output
            .log(&c.name, format!("Restoring from {}", source.display()));
        let bytes = std::fs::read(&source)?;
        self.runtime
            .file_push(&c.id, BACKUP_TEMP_PATH, &bytes, None)?;
        if let Err(error) = self.execute_action(&c, "restore", &BTreeMap::new()) {
            warn!(container = %c.id, %error, "ignoring restore action error");
        }
        self.runtime.file_delete(&c.id, BACKUP_TEMP_PATH)?;
        Ok(())
    }

    /// Candidate backup sources, most specific first: an explicit path under
    /// the cwd then the backups directory, the `_latest` symlink, then dated
    /// backups newest first.
    fn restore_candidates(&self, id: &str, path: Option<&str>) -> Vec<PathBuf> {
        let mut candidates = Vec::new();
        if let Some(path) = path {
            candidates.push(PathBuf::from(path));
            candidates.push(self.backups_dir.join(path));
        }
        candidates.push(self.backups_dir.join(format!("{id}_latest.zip")));

        let pattern = format!(r"^{}_[0-9]{{4}}([-_][0-9]{{2}}){{5}}\.zip$", regex::escape(id));
        let dated = Regex::new(&pattern).expect("backup pattern is valid");
        let mut names: Vec<String> = std::fs::read_dir(&self.backups_dir)
            .map(|entries| {
                entries
                    .flatten()
                    .filter_map(|entry| entry.file_name().into_string().ok())
                    .filter(|name| dated.is_match(name))
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        for name in names.iter().rev() {
            candidates.push(self.backups_dir.join(name));
        }
        candidates
    }

    pub fn download(&self, id: &str, source: &str, destination: &str) -> Result<(), CoreError> {
        let c = self.registry.get(id)?;
        let bytes = self.runtime.file_pull(&c.id, source)?;
        if destination == "-" {
            std::io::stdout().write_all(&bytes)?;
        } else {
            std::fs::write(destination, &bytes)?;
            self.output
                .log(&c.name, format!("Downloaded {source} to {destination}"));
        }
        Ok(())
    }

    pub fn upload(&self, id: &str, source: &str, destination: &str) -> Result<(), CoreError> {
        let c = self.registry.get(id)?;
        let bytes = if source == "-" {
            let mut buffer = Vec::new();
            std::io::stdin().read_to_end(&mut buffer)?;
            buffer
        } else {
            std::fs::read(source)?
        };
        self.runtime
            .file_push(&c.id, destination, &bytes, None)?;
        let owner = format!("{user}:{user}", user = c.user);
        self.runtime
            .execute(&c.id, &["chown".to_owned(), owner, destination.to_owned()])?;
        self.output
            .log(&c.name, format!("Uploaded {source} to {destination}"));
        Ok(())
    }

    /// Whether the container both exists and is running.
    pub fn is_running(&self, id: &str) -> Result<bool, CoreError> {
        let c = self.registry.get(id)?;
        if !self.runtime.exists(&c.id)? {
            return Ok(false);
        }
        Ok(self.runtime.is_running(&c.id)?)
    }

    /// `exec` and unknown verbs: an ad-hoc RPC against the target container.
    /// `tokens` is the action name followed by `key=value` parameters.
    pub fn rpc_verb(&self, id: &str, tokens: &[String]) -> Result<(), CoreError> {
        let c = self.registry.get(id)?;
        let mut argv = vec![c.id.clone()];
        argv.extend(tokens.iter().cloned());
        let spec = RpcSpec::from_tokens(argv)?;
        self.execute_rpc(&c, &spec, &BTreeMap::new())
    }

    // ------------------------------------------------------------------
    // Requirements and mounting

    fn check_requirements(
        &self,
        c: &Rc<Container>,
        can_start: bool,
        can_create: bool,
    ) -> Result<(), CoreError> {
        for req_id in launch_order(&self.registry, c)? {
            let req = self.registry.get(&req_id)?;
            if !self.runtime.exists(&req.id)? {
                if can_create {
                    self.create(&req.id, true)?;
                } else {
                    self.output.log(
                        &c.name,
                        format!("Requires {} ({}), but it does not exist", req.name, req.id),
                    );
                    return Err(CoreError::RequirementsNotMet(c.id.clone()));
                }
            } else if !self.runtime.is_running(&req.id)? {
                if can_start {
                    self.start(&req.id, false)?;
                } else {
                    self.output.log(
                        &c.name,
                        format!("Requires {} ({}), but it is not running", req.name, req.id),
                    );
                    return Err(CoreError::RequirementsNotMet(c.id.clone()));
                }
            }
        }
        Ok(())
    }

    fn mount(&self, c: &Rc<Container>) -> Result<(), CoreError> {
        if c.mountpoints.is_empty() {
            return Ok(());
        }
        let attached = self.runtime.device_names(&c.id)?;
        for mountpoint in &c.mountpoints {
            if attached.contains(&mountpoint.name) {
                continue;
            }
            self.output
                .log(&c.name, format!("Mounting {}", mountpoint.name));
            self.runtime.add_disk_device(
                &c.id,
                &mountpoint.name,
                &mountpoint.source,
                &mountpoint.path,
            )?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // NAT

    fn nat_container(&self, c: &Rc<Container>) -> Result<(), CoreError> {
        if !self.runtime.is_running(&c.id)? {
            self.output.log(&c.name, "Container not running, no NAT needed");
            return Ok(());
        }
        for port in &c.ports {
            if let Some(ip) = self.container_ip(c, &port.device, IpFamily::V4)? {
                self.output.log(
                    &c.name,
                    format!("Forwarding {} to {}:{} ({})", port.to, ip, port.from, port.device),
                );
            }
            for family in [IpFamily::V4, IpFamily::V6] {
                self.delete_forwards(family, port.to)?;
                let Some(address) = self.container_ip(c, &port.device, family)? else {
                    debug!(
                        container = %c.id,
                        device = %port.device,
                        family = family.address_family(),
                        "no address for family, skipping forward"
                    );
                    continue;
                };
                let rule = ForwardRule {
                    protocol: port.protocol.clone(),
                    dest_port: port.to,
                    target: family.target(&address, port.from),
                    comment: port.comment.clone(),
                };
                self.firewall.append_prerouting(family, &rule)?;
            }
        }
        Ok(())
    }

    fn denat_container(&self, c: &Rc<Container>) -> Result<(), CoreError> {
        for port in &c.ports {
            self.output.log(
                &c.name,
                format!("Removing forward from {} ({})", port.to, port.device),
            );
            for family in [IpFamily::V4, IpFamily::V6] {
                self.delete_forwards(family, port.to)?;
            }
        }
        Ok(())
    }

    fn delete_forwards(&self, family: IpFamily, to_port: u16) -> Result<(), CoreError> {
        let listing = self.firewall.nat_listing(family)?;
        let mut lines = matching_rule_lines(&listing, to_port);
        // Delete bottom-up so earlier line numbers stay valid.
        lines.reverse();
        for line in lines {
            self.firewall.delete_prerouting(family, line)?;
        }
        Ok(())
    }

    /// First address of the requested family on a device, from the cached
    /// network snapshot. Unknown devices fail; a known device without an
    /// address of that family yields `None`.
    fn container_ip(
        &self,
        c: &Rc<Container>,
        device: &str,
        family: IpFamily,
    ) -> Result<Option<String>, CoreError> {
        if c.network_snapshot().is_none() {
            let state = self.runtime.network_state(&c.id)?;
            c.cache_network(state);
        }
        let snapshot = c.network_snapshot();
        let devices = snapshot.as_ref().expect("snapshot populated above");
        let addresses = devices
            .get(device)
            .ok_or_else(|| CoreError::NoSuchDevice {
                container: c.id.clone(),
                device: device.to_owned(),
            })?;
        Ok(addresses
            .iter()
            .find(|address| address.family == family.address_family())
            .map(|address| address.address.clone()))
    }

    // ------------------------------------------------------------------
    // Action execution

    /// Run a named action with per-invocation parameters. A missing action
    /// logs and no-ops.
    pub fn execute_action(
        &self,
        c: &Rc<Container>,
        action: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<(), CoreError> {
        let Some(stack) = c.actions.get(action) else {
            self.output
                .log(&c.name, format!("Action \"{action}\" does not exist"));
            return Ok(());
        };
        self.output
            .log(&c.name, format!("Execute action \"{action}\""));
        self.run_frame(c, stack, action, stack.top(), params)
    }

    fn run_frame(
        &self,
        c: &Rc<Container>,
        stack: &ActionStack,
        action: &str,
        position: usize,
        params: &BTreeMap<String, String>,
    ) -> Result<(), CoreError> {
        let frame = stack
            .frame(position)
            .ok_or_else(|| CoreError::StackUnderflow(action.to_owned()))?;
        let mut idle = false;
        for item in frame {
            match item {
                ActionItem::Idle => idle = true,
                ActionItem::Parent => {
                    if position == 0 {
                        return Err(CoreError::StackUnderflow(action.to_owned()));
                    }
                    self.run_frame(c, stack, action, position - 1, params)?;
                }
                ActionItem::Shell(line) => {
                    let expanded = self.templater.apply(line, Some(&c.variables), Some(params));
                    self.output.log(&c.name, &expanded);
                    let code = match c.workdir() {
                        Some(workdir) => format!("cd {workdir}; {expanded}"),
                        None => expanded.clone(),
                    };
                    let status = self.runtime.shell(
                        &c.id,
                        &c.user,
                        &c.shell,
                        Some(&code),
                        self.output.forward_actions(),
                    )?;
                    if status != 0 && !idle {
                        self.output.log(&c.name, "Execution failed");
                        return Err(CoreError::ExecutionFailed {
                            container: c.id.clone(),
                            line: expanded,
                        });
                    }
                }
                ActionItem::Rpc(spec) => self.execute_rpc(c, spec, params)?,
                ActionItem::DumpFile(spec) => self.dump_file(c, spec, params)?,
                ActionItem::Transfer(spec) => self.transfer(c, spec, params)?,
                ActionItem::RemoveFile { filename } => {
                    let filename = self.templater.apply(filename, Some(&c.variables), Some(params));
                    self.output.log(&c.name, format!("Removing file {filename}"));
                    if let Err(error) = self.runtime.file_delete(&c.id, &filename) {
                        debug!(container = %c.id, %error, "ignoring missing file on remove");
                    }
                }
                ActionItem::Workdir { path } => {
                    let path = self.templater.apply(path, Some(&c.variables), Some(params));
                    c.set_workdir(path);
                }
                ActionItem::Echo { text } => {
                    let text = self.templater.apply(text, Some(&c.variables), Some(params));
                    self.output.log(&c.name, text);
                }
            }
        }
        Ok(())
    }

    fn execute_rpc(
        &self,
        caller: &Rc<Container>,
        spec: &RpcSpec,
        params: &BTreeMap<String, String>,
    ) -> Result<(), CoreError> {
        let target = if spec.target == "self" {
            Rc::clone(caller)
        } else {
            self.registry.get(&spec.target)?
        };
        let mut expanded = BTreeMap::new();
        for (key, value) in &spec.parameters {
            expanded.insert(
                key.clone(),
                self.templater.apply(value, Some(&caller.variables), Some(params)),
            );
        }
        expanded.insert("caller".to_owned(), caller.id.clone());
        self.execute_action(&target, &spec.action, &expanded)
    }

    fn dump_file(
        &self,
        c: &Rc<Container>,
        spec: &DumpFileSpec,
        params: &BTreeMap<String, String>,
    ) -> Result<(), CoreError> {
        let filename = self.templater.apply(&spec.filename, Some(&c.variables), Some(params));
        self.output.log(&c.name, format!("Dropping file {filename}"));
        if filename != spec.filename {
            // The payload is keyed by the unexpanded name; only the target
            // path is templated.
            debug!(key = %spec.filename, target = %filename, "payload keyed by unexpanded filename");
        }
        if let Some(parent) = Path::new(&filename).parent() {
            if !parent.as_os_str().is_empty() {
                self.runtime.execute(
                    &c.id,
                    &[
                        "mkdir".to_owned(),
                        "-p".to_owned(),
                        parent.to_string_lossy().into_owned(),
                    ],
                )?;
            }
        }
        let source = c
            .files
            .get(&spec.filename)
            .ok_or_else(|| CoreError::MissingFilePayload {
                container: c.id.clone(),
                filename: spec.filename.clone(),
            })?;
        let bytes = match source {
            FileSource::Inline(text) => self
                .templater
                .apply(text, Some(&c.variables), Some(params))
                .into_bytes(),
            FileSource::Load(load) => load.read(&self.load_search)?,
        };
        self.runtime.file_push(&c.id, &filename, &bytes, None)?;
        let owner = spec
            .chown
            .clone()
            .unwrap_or_else(|| format!("{user}:{user}", user = c.user));
        let mode = spec.chmod.clone().unwrap_or_else(|| "0755".to_owned());
        self.runtime
            .execute(&c.id, &["chown".to_owned(), owner, filename.clone()])?;
        self.runtime
            .execute(&c.id, &["chmod".to_owned(), mode, filename])?;
        Ok(())
    }

    fn transfer(
        &self,
        c: &Rc<Container>,
        spec: &TransferSpec,
        params: &BTreeMap<String, String>,
    ) -> Result<(), CoreError> {
        let other = self.registry.get(&spec.other)?;
        let (from, to): (&Rc<Container>, &Rc<Container>) = match spec.direction {
            TransferDirection::Down => (&other, c),
            TransferDirection::Up => (c, &other),
        };
        for side in [from, to] {
            if !self.runtime.is_running(&side.id)? {
                return Err(CoreError::NotRunning(side.id.clone()));
            }
        }
        let source = self.templater.apply(&spec.source, Some(&c.variables), Some(params));
        let target = self.templater.apply(&spec.target, Some(&c.variables), Some(params));
        self.output.log(
            &c.name,
            format!("Transferring {}:{} to {}:{}", from.id, source, to.id, target),
        );
        let bytes = self.runtime.file_pull(&from.id, &source)?;
        self.runtime.file_push(&to.id, &target, &bytes, None)?;
        if to.id != c.id {
            // Longstanding quirk: the chown runs on the caller container
            // even when the destination is the other side.
            warn!(caller = %c.id, destination = %to.id, "chown after transfer runs on the caller");
        }
        let owner = format!("{user}:{user}", user = to.user);
        self.runtime
            .execute(&c.id, &["chown".to_owned(), owner, target])?;
        Ok(())
    }
}
