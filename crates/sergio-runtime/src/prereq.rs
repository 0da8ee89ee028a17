use std::fmt;
use std::process::Command;

/// A missing host prerequisite with actionable install instructions.
#[derive(Debug)]
pub struct MissingPrereq {
    pub name: &'static str,
    pub purpose: &'static str,
    pub install_hint: &'static str,
}

impl fmt::Display for MissingPrereq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  - {}: {} (install: {})",
            self.name, self.purpose, self.install_hint
        )
    }
}

fn command_exists(name: &str) -> bool {
    Command::new("which")
        .arg(name)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Check everything the lxc runtime and the iptables firewall need.
/// Returns a list of missing items; empty means the host is ready.
pub fn check_host_prereqs() -> Vec<MissingPrereq> {
    let mut missing = Vec::new();

    if !command_exists("lxc") {
        missing.push(MissingPrereq {
            name: "lxc",
            purpose: "container lifecycle and in-container execution",
            install_hint: "snap install lxd | apt install lxd | zypper install lxd",
        });
    }

    if !command_exists("sudo") {
        missing.push(MissingPrereq {
            name: "sudo",
            purpose: "privileged iptables invocation",
            install_hint: "apt install sudo | zypper install sudo",
        });
    }

    if !command_exists("iptables") {
        missing.push(MissingPrereq {
            name: "iptables",
            purpose: "NAT port forwarding",
            install_hint: "apt install iptables | zypper install iptables",
        });
    }

    missing
}

/// Format a list of missing prerequisites into a user-friendly error message.
pub fn format_missing(missing: &[MissingPrereq]) -> String {
    use std::fmt::Write as _;
    let mut msg = String::from("missing prerequisites:\n");
    for m in missing {
        let _ = writeln!(msg, "{m}");
    }
    msg.push_str("\nsergio requires these tools to manage containers.");
    msg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_prereq_display() {
        let m = MissingPrereq {
            name: "lxc",
            purpose: "container lifecycle",
            install_hint: "snap install lxd",
        };
        let s = format!("{m}");
        assert!(s.contains("lxc"));
        assert!(s.contains("container lifecycle"));
        assert!(s.contains("snap install lxd"));
    }

    #[test]
    fn format_missing_produces_readable_output() {
        let items = vec![
            MissingPrereq {
                name: "lxc",
                purpose: "containers",
                install_hint: "snap install lxd",
            },
            MissingPrereq {
                name: "iptables",
                purpose: "NAT",
                install_hint: "apt install iptables",
            },
        ];
        let output = format_missing(&items);
        assert!(output.contains("missing prerequisites:"));
        assert!(output.contains("lxc"));
        assert!(output.contains("iptables"));
    }
}
