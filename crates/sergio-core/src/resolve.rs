//! Launch-order resolution over the transitive `requires` closure.
//!
//! The output lists every transitive prerequisite of the target exactly once,
//! each after all of its own prerequisites, and never the target itself.
//! Ties break by insertion order during expansion, which makes the order
//! deterministic for a fixed set of definitions.

use crate::registry::Registry;
use crate::model::Container;
use crate::CoreError;

pub fn launch_order(registry: &Registry, target: &Container) -> Result<Vec<String>, CoreError> {
    // Work list of (id, unmet requires), in insertion order.
    let mut pending: Vec<(String, Vec<String>)> = Vec::new();

    for req in &target.requires {
        if !pending.iter().any(|(id, _)| id == req) {
            let container = registry.get(req)?;
            pending.push((req.clone(), container.requires.clone()));
        }
    }

    // Expansion: pull in requirements-of-requirements until stable.
    loop {
        let missing: Vec<String> = pending
            .iter()
            .flat_map(|(_, reqs)| reqs.iter())
            .filter(|req| !pending.iter().any(|(id, _)| id == *req))
            .cloned()
            .collect();
        if missing.is_empty() {
            break;
        }
        for req in missing {
            if !pending.iter().any(|(id, _)| id == &req) {
                let container = registry.get(&req)?;
                pending.push((req, container.requires.clone()));
            }
        }
    }

    // Emission: repeatedly take the first entry with no unmet requires.
    let mut order = Vec::with_capacity(pending.len());
    while !pending.is_empty() {
        let position = pending.iter().position(|(_, reqs)| reqs.is_empty());
        let Some(position) = position else {
            let stuck: Vec<&str> = pending.iter().map(|(id, _)| id.as_str()).collect();
            return Err(CoreError::UnresolvableRequirements(stuck.join(", ")));
        };
        let (id, _) = pending.remove(position);
        for (_, reqs) in &mut pending {
            reqs.retain(|req| req != &id);
        }
        order.push(id);
    }
    Ok(order)
}
