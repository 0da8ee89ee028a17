//! The merged in-memory container description.
//!
//! A `Container` is the result of flattening one definition's `extends`
//! chain. Merged state is immutable; the transient workdir and the network
//! snapshot are per-invocation cells (the engine is single-threaded, see
//! the concurrency notes in the crate docs).

use crate::stack::ActionStack;
use sergio_runtime::Address;
use sergio_schema::{Definition, FileSource, PortDef};
use std::cell::{Ref, RefCell};
use std::collections::BTreeMap;

pub const DEFAULT_SHELL: &str = "/bin/sh";
pub const DEFAULT_USER: &str = "root";

#[derive(Debug)]
pub struct Container {
    pub id: String,
    pub name: String,
    pub description: String,
    pub image: Option<String>,
    pub shell: String,
    pub user: String,
    pub requires: Vec<String>,
    pub variables: BTreeMap<String, String>,
    pub files: BTreeMap<String, FileSource>,
    pub mountpoints: Vec<Mountpoint>,
    pub ports: Vec<Port>,
    pub actions: BTreeMap<String, ActionStack>,
    workdir: RefCell<Option<String>>,
    network: RefCell<Option<BTreeMap<String, Vec<Address>>>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mountpoint {
    pub name: String,
    pub source: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Port {
    pub device: String,
    pub protocol: String,
    pub from: u16,
    pub to: u16,
    pub comment: String,
}

impl Port {
    fn new(def: &PortDef, container_name: &str) -> Self {
        Self {
            device: def.device.clone(),
            protocol: def.protocol.clone(),
            from: def.from,
            to: def.to,
            comment: def.comment.clone().unwrap_or_else(|| container_name.to_owned()),
        }
    }
}

impl Container {
    /// Merge a definition onto its (already merged) parent. Scalars are
    /// child-wins, `requires` concatenates child first, `variables` and
    /// `files` merge key-wise with the child winning, and actions defined on
    /// both sides stack the child frame on top of the parent's.
    pub fn from_definition(id: &str, def: &Definition, parent: Option<&Container>) -> Self {
        let image = def.image.clone().or_else(|| parent.and_then(|p| p.image.clone()));
        let shell = def
            .shell
            .clone()
            .unwrap_or_else(|| parent.map_or_else(|| DEFAULT_SHELL.to_owned(), |p| p.shell.clone()));
        let user = def
            .user
            .clone()
            .unwrap_or_else(|| parent.map_or_else(|| DEFAULT_USER.to_owned(), |p| p.user.clone()));

        let mut requires = def.requires.clone();
        if let Some(parent) = parent {
            requires.extend(parent.requires.iter().cloned());
        }

        let mut variables = parent.map(|p| p.variables.clone()).unwrap_or_default();
        variables.extend(def.variables.clone());
        variables.insert("_name".to_owned(), def.name.clone());
        variables.insert("_description".to_owned(), def.description.clone());

        let mut files = parent.map(|p| p.files.clone()).unwrap_or_default();
        files.extend(def.files.clone());

        let mut actions: BTreeMap<String, ActionStack> = parent
            .map(|p| p.actions.clone())
            .unwrap_or_default();
        for (name, frame) in &def.actions {
            let merged = match actions.get(name) {
                Some(parent_stack) => parent_stack.appended(frame.clone()),
                None => ActionStack::single(frame.clone()),
            };
            actions.insert(name.clone(), merged);
        }

        let mountpoints = def
            .mountpoints
            .iter()
            .map(|(name, mp)| Mountpoint {
                name: name.clone(),
                source: mp.source.clone(),
                path: mp.path.clone(),
            })
            .collect();
        let ports = def.ports.iter().map(|p| Port::new(p, &def.name)).collect();

        Self {
            id: id.to_owned(),
            name: def.name.clone(),
            description: def.description.clone(),
            image,
            shell,
            user,
            requires,
            variables,
            files,
            mountpoints,
            ports,
            actions,
            workdir: RefCell::new(None),
            network: RefCell::new(None),
        }
    }

    pub fn has_action(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    /// Transient working directory, set by `!cwd` for the rest of the
    /// invocation.
    pub fn workdir(&self) -> Option<String> {
        self.workdir.borrow().clone()
    }

    pub fn set_workdir(&self, path: String) {
        *self.workdir.borrow_mut() = Some(path);
    }

    /// Cached network snapshot; populated on first IP lookup and never
    /// invalidated within an invocation.
    pub fn network_snapshot(&self) -> Ref<'_, Option<BTreeMap<String, Vec<Address>>>> {
        self.network.borrow()
    }

    pub fn cache_network(&self, state: BTreeMap<String, Vec<Address>>) {
        *self.network.borrow_mut() = Some(state);
    }
}
