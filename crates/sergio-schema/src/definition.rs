//! Per-container definition documents.
//!
//! A definition file holds one YAML document whose top-level `container` key
//! carries the description. The `actions` and `files` sections arrive as raw
//! YAML values so tagged nodes survive deserialization; they are resolved
//! into typed items here.

use crate::action::{file_source_from_value, item_from_value, ActionItem, FileSource};
use crate::SchemaError;
use serde::Deserialize;
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// One container definition as written on disk, before inheritance
/// flattening.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Definition {
    pub name: String,
    pub description: String,
    /// Image identifier for the engine; inheritable.
    pub image: Option<String>,
    pub shell: Option<String>,
    pub user: Option<String>,
    /// Parent definition id for single inheritance.
    pub extends: Option<String>,
    pub requires: Vec<String>,
    pub variables: BTreeMap<String, String>,
    pub files: BTreeMap<String, FileSource>,
    pub mountpoints: BTreeMap<String, MountpointDef>,
    pub ports: Vec<PortDef>,
    pub actions: BTreeMap<String, Vec<ActionItem>>,
}

/// Host-to-guest bind mount.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MountpointDef {
    pub source: String,
    pub path: String,
}

/// One published port.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PortDef {
    #[serde(default = "default_device")]
    pub device: String,
    pub protocol: String,
    pub from: u16,
    pub to: u16,
    /// Defaults to the container name when absent.
    #[serde(default)]
    pub comment: Option<String>,
}

fn default_device() -> String {
    "eth0".to_owned()
}

#[derive(Debug, Deserialize)]
struct DefinitionDoc {
    container: RawDefinition,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDefinition {
    name: String,
    description: String,
    #[serde(rename = "box")]
    image: Option<String>,
    shell: Option<String>,
    user: Option<String>,
    extends: Option<String>,
    #[serde(default)]
    requires: Vec<String>,
    #[serde(default)]
    variables: BTreeMap<String, String>,
    #[serde(default)]
    files: BTreeMap<String, Value>,
    #[serde(default)]
    mountpoints: BTreeMap<String, MountpointDef>,
    #[serde(default)]
    ports: Vec<PortDef>,
    #[serde(default)]
    actions: BTreeMap<String, Vec<Value>>,
}

pub fn parse_definition_str(input: &str) -> Result<Definition, SchemaError> {
    // A document without the `container` key is reported as such rather
    // than as a generic missing-field error.
    let probe: BTreeMap<String, Value> = serde_yaml::from_str(input)?;
    if !probe.contains_key("container") {
        return Err(SchemaError::MissingContainerKey);
    }
    let doc: DefinitionDoc = serde_yaml::from_str(input)?;
    let raw = doc.container;

    let mut files = BTreeMap::new();
    for (path, value) in &raw.files {
        files.insert(path.clone(), file_source_from_value(value)?);
    }

    let mut actions = BTreeMap::new();
    for (name, items) in &raw.actions {
        let frame = items
            .iter()
            .map(item_from_value)
            .collect::<Result<Vec<_>, _>>()?;
        actions.insert(name.clone(), frame);
    }

    Ok(Definition {
        name: raw.name,
        description: raw.description,
        image: raw.image,
        shell: raw.shell,
        user: raw.user,
        extends: raw.extends,
        requires: raw.requires,
        variables: raw.variables,
        files,
        mountpoints: raw.mountpoints,
        ports: raw.ports,
        actions,
    })
}

pub fn parse_definition_file(path: impl AsRef<Path>) -> Result<Definition, SchemaError> {
    let content = fs::read_to_string(path)?;
    parse_definition_str(&content)
}
