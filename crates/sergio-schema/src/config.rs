use crate::SchemaError;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration after path resolution.
///
/// `definitions` and `backups` are given relative to the configuration file
/// and are resolved against its directory at parse time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootConfig {
    pub definitions: PathBuf,
    pub backups: PathBuf,
    pub variables: BTreeMap<String, String>,
    /// Directory the configuration file was read from; load references
    /// fall back to it when a payload file is not found under the cwd.
    pub config_dir: PathBuf,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    definitions: String,
    backups: String,
    #[serde(default)]
    variables: BTreeMap<String, String>,
}

pub fn parse_config_str(input: &str, base_dir: &Path) -> Result<RootConfig, SchemaError> {
    let raw: RawConfig = serde_yaml::from_str(input)?;
    Ok(RootConfig {
        definitions: resolve_against(base_dir, &raw.definitions),
        backups: resolve_against(base_dir, &raw.backups),
        variables: raw.variables,
        config_dir: base_dir.to_path_buf(),
    })
}

pub fn parse_config_file(path: impl AsRef<Path>) -> Result<RootConfig, SchemaError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)?;
    let base = path.parent().unwrap_or(Path::new("."));
    parse_config_str(&content, base)
}

fn resolve_against(base: &Path, value: &str) -> PathBuf {
    let p = Path::new(value);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base.join(p)
    }
}

const CWD_CANDIDATES: [&str; 4] = ["sergio.yml", "sergio.yaml", "config.yml", "config.yaml"];
const HOME_CANDIDATES: [&str; 2] = ["sergio.yml", "sergio.yaml"];

/// Locate the configuration file: an explicit `-c` path wins, otherwise the
/// first existing candidate under the cwd, then under `$HOME`.
pub fn discover_config(explicit: Option<&Path>) -> Result<PathBuf, SchemaError> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return Err(SchemaError::ConfigNotFound);
    }
    for name in CWD_CANDIDATES {
        let candidate = PathBuf::from(name);
        if candidate.exists() {
            return Ok(candidate);
        }
    }
    if let Ok(home) = std::env::var("HOME") {
        for name in HOME_CANDIDATES {
            let candidate = Path::new(&home).join(name);
            if candidate.exists() {
                return Ok(candidate);
            }
        }
    }
    Err(SchemaError::ConfigNotFound)
}
