//! Layered `$name` / `${name}` substitution.
//!
//! Three scopes, highest wins: per-invocation (rpc) over per-container over
//! global. Unknown placeholders pass through unchanged and expansion is a
//! single pass — values are never re-expanded.

use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::sync::OnceLock;

fn placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\$(?:\{([A-Za-z_][A-Za-z0-9_]*)\}|([A-Za-z_][A-Za-z0-9_]*))")
            .expect("placeholder pattern is valid")
    })
}

#[derive(Debug, Clone, Default)]
pub struct Templater {
    globals: BTreeMap<String, String>,
}

impl Templater {
    pub fn new(globals: BTreeMap<String, String>) -> Self {
        Self { globals }
    }

    pub fn apply(
        &self,
        template: &str,
        container_vars: Option<&BTreeMap<String, String>>,
        rpc_vars: Option<&BTreeMap<String, String>>,
    ) -> String {
        placeholder()
            .replace_all(template, |caps: &Captures<'_>| {
                let name = caps
                    .get(1)
                    .or_else(|| caps.get(2))
                    .map(|m| m.as_str())
                    .unwrap_or_default();
                self.lookup(name, container_vars, rpc_vars)
                    .map_or_else(|| caps[0].to_owned(), str::to_owned)
            })
            .into_owned()
    }

    fn lookup<'a>(
        &'a self,
        name: &str,
        container_vars: Option<&'a BTreeMap<String, String>>,
        rpc_vars: Option<&'a BTreeMap<String, String>>,
    ) -> Option<&'a str> {
        rpc_vars
            .and_then(|vars| vars.get(name))
            .or_else(|| container_vars.and_then(|vars| vars.get(name)))
            .or_else(|| self.globals.get(name))
            .map(String::as_str)
    }
}
