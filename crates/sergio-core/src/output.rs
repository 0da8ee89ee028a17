//! Operator-facing output routing.
//!
//! The `[name] message` lines and the forwarded in-container stdio are
//! product output, selected with `-o`; diagnostics go through `tracing`
//! separately.

use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    #[default]
    Both,
    /// Forward in-container stdout/stderr only.
    Actions,
    /// Emit `[name] message` lines only.
    Log,
    None,
}

impl OutputMode {
    pub fn log_enabled(self) -> bool {
        matches!(self, OutputMode::Both | OutputMode::Log)
    }

    pub fn actions_enabled(self) -> bool {
        matches!(self, OutputMode::Both | OutputMode::Actions)
    }
}

impl FromStr for OutputMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "both" => Ok(OutputMode::Both),
            "actions" => Ok(OutputMode::Actions),
            "log" => Ok(OutputMode::Log),
            "none" => Ok(OutputMode::None),
            other => Err(format!("unknown output mode '{other}'")),
        }
    }
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OutputMode::Both => "both",
            OutputMode::Actions => "actions",
            OutputMode::Log => "log",
            OutputMode::None => "none",
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Output {
    mode: OutputMode,
}

impl Output {
    pub fn new(mode: OutputMode) -> Self {
        Self { mode }
    }

    /// Emit one `[name] message` line.
    pub fn log(&self, name: &str, message: impl fmt::Display) {
        if self.mode.log_enabled() {
            println!("[{name}] {message}");
        }
    }

    /// Whether in-container stdout/stderr should reach the terminal.
    pub fn forward_actions(&self) -> bool {
        self.mode.actions_enabled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_parses_all_variants() {
        assert_eq!("both".parse::<OutputMode>().unwrap(), OutputMode::Both);
        assert_eq!("actions".parse::<OutputMode>().unwrap(), OutputMode::Actions);
        assert_eq!("log".parse::<OutputMode>().unwrap(), OutputMode::Log);
        assert_eq!("none".parse::<OutputMode>().unwrap(), OutputMode::None);
        assert!("loud".parse::<OutputMode>().is_err());
    }

    #[test]
    fn mode_routing_matrix() {
        assert!(OutputMode::Both.log_enabled() && OutputMode::Both.actions_enabled());
        assert!(OutputMode::Log.log_enabled() && !OutputMode::Log.actions_enabled());
        assert!(!OutputMode::Actions.log_enabled() && OutputMode::Actions.actions_enabled());
        assert!(!OutputMode::None.log_enabled() && !OutputMode::None.actions_enabled());
    }

    #[test]
    fn display_roundtrips() {
        for mode in [OutputMode::Both, OutputMode::Actions, OutputMode::Log, OutputMode::None] {
            assert_eq!(mode.to_string().parse::<OutputMode>().unwrap(), mode);
        }
    }
}
