//! Port forwarding through the host's NAT table.
//!
//! Rules live in the `nat` table's PREROUTING chain and are keyed by their
//! destination port: deletion selects every listing line containing
//! `dpt:<port>` and removes them by line number, highest first. IPv6 rules go
//! through `ip6tables` and use the bracketed `[addr]:port` target form.

use crate::RuntimeError;
use std::process::Command;
use std::sync::Mutex;
use tracing::debug;

/// Fixed external interface forwarded ports arrive on.
pub const EXTERNAL_INTERFACE: &str = "enp1s0f0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpFamily {
    V4,
    V6,
}

impl IpFamily {
    pub fn binary(self) -> &'static str {
        match self {
            IpFamily::V4 => "iptables",
            IpFamily::V6 => "ip6tables",
        }
    }

    /// Address family string the engine reports for this IP version.
    pub fn address_family(self) -> &'static str {
        match self {
            IpFamily::V4 => "inet",
            IpFamily::V6 => "inet6",
        }
    }

    /// DNAT target for an address and guest port.
    pub fn target(self, address: &str, port: u16) -> String {
        match self {
            IpFamily::V4 => format!("{address}:{port}"),
            IpFamily::V6 => format!("[{address}]:{port}"),
        }
    }
}

/// One PREROUTING DNAT rule to append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardRule {
    /// `tcp` or `udp`.
    pub protocol: String,
    /// Host-side destination port (`to` in the definition).
    pub dest_port: u16,
    /// `ip:port` or `[ip6]:port`.
    pub target: String,
    pub comment: String,
}

impl ForwardRule {
    pub fn to_args(&self) -> Vec<String> {
        [
            "-t",
            "nat",
            "-A",
            "PREROUTING",
            "-p",
            &self.protocol,
            "-i",
            EXTERNAL_INTERFACE,
            "--dport",
            &self.dest_port.to_string(),
            "-j",
            "DNAT",
            "--to-destination",
            &self.target,
            "-m",
            "comment",
            "--comment",
            &self.comment,
        ]
        .iter()
        .map(|s| (*s).to_owned())
        .collect()
    }
}

/// Abstract contract against the host firewall binaries.
pub trait Firewall: Send + Sync {
    /// Lines of `-L -n -t nat --line-numbers` output.
    fn nat_listing(&self, family: IpFamily) -> Result<Vec<String>, RuntimeError>;

    fn delete_prerouting(&self, family: IpFamily, line: u32) -> Result<(), RuntimeError>;

    fn append_prerouting(&self, family: IpFamily, rule: &ForwardRule) -> Result<(), RuntimeError>;
}

/// Line numbers of listing entries matching `dpt:<port>`, in listing order.
pub fn matching_rule_lines(listing: &[String], to_port: u16) -> Vec<u32> {
    let needle = format!("dpt:{to_port}");
    listing
        .iter()
        .filter(|line| line.contains(&needle))
        .filter_map(|line| line.split_whitespace().next()?.parse().ok())
        .collect()
}

/// Firewall over passwordless `sudo iptables` / `sudo ip6tables`.
#[derive(Default)]
pub struct IptablesCli;

impl IptablesCli {
    pub fn new() -> Self {
        Self
    }

    fn run(family: IpFamily, args: &[String]) -> Result<Vec<u8>, RuntimeError> {
        debug!("sudo {} {}", family.binary(), args.join(" "));
        let output = Command::new("sudo").arg(family.binary()).args(args).output()?;
        if !output.status.success() {
            return Err(RuntimeError::CommandFailed {
                command: format!("sudo {} {}", family.binary(), args.join(" ")),
                status: output.status.code().unwrap_or(-1),
            });
        }
        Ok(output.stdout)
    }
}

impl Firewall for IptablesCli {
    fn nat_listing(&self, family: IpFamily) -> Result<Vec<String>, RuntimeError> {
        let args: Vec<String> = ["-L", "-n", "-t", "nat", "--line-numbers"]
            .iter()
            .map(|s| (*s).to_owned())
            .collect();
        let stdout = Self::run(family, &args)?;
        Ok(String::from_utf8_lossy(&stdout)
            .lines()
            .map(str::to_owned)
            .collect())
    }

    fn delete_prerouting(&self, family: IpFamily, line: u32) -> Result<(), RuntimeError> {
        let args: Vec<String> = ["-t", "nat", "-D", "PREROUTING"]
            .iter()
            .map(|s| (*s).to_owned())
            .chain(std::iter::once(line.to_string()))
            .collect();
        Self::run(family, &args).map(|_| ())
    }

    fn append_prerouting(&self, family: IpFamily, rule: &ForwardRule) -> Result<(), RuntimeError> {
        Self::run(family, &rule.to_args()).map(|_| ())
    }
}

/// Test double recording every mutation.
#[derive(Default)]
pub struct MockFirewall {
    state: Mutex<MockFirewallState>,
}

#[derive(Default)]
struct MockFirewallState {
    listings: std::collections::HashMap<IpFamily, Vec<String>>,
    deleted: Vec<(IpFamily, u32)>,
    appended: Vec<(IpFamily, ForwardRule)>,
}

impl MockFirewall {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the listing returned for a family.
    pub fn set_listing(&self, family: IpFamily, lines: Vec<String>) {
        self.state.lock().expect("mock poisoned").listings.insert(family, lines);
    }

    pub fn deleted(&self) -> Vec<(IpFamily, u32)> {
        self.state.lock().expect("mock poisoned").deleted.clone()
    }

    pub fn appended(&self) -> Vec<(IpFamily, ForwardRule)> {
        self.state.lock().expect("mock poisoned").appended.clone()
    }
}

impl Firewall for MockFirewall {
    fn nat_listing(&self, family: IpFamily) -> Result<Vec<String>, RuntimeError> {
        Ok(self
            .state
            .lock()
            .expect("mock poisoned")
            .listings
            .get(&family)
            .cloned()
            .unwrap_or_default())
    }

    fn delete_prerouting(&self, family: IpFamily, line: u32) -> Result<(), RuntimeError> {
        self.state.lock().expect("mock poisoned").deleted.push((family, line));
        Ok(())
    }

    fn append_prerouting(&self, family: IpFamily, rule: &ForwardRule) -> Result<(), RuntimeError> {
        self.state
            .lock()
            .expect("mock poisoned")
            .appended
            .push((family, rule.clone()));
        Ok(())
    }
}
