//! Action-item variants and the tag-payload parsers behind them.
//!
//! A definition's `actions` section holds sequences of frame items. Plain
//! strings become shell lines; tagged nodes (`!rpc`, `!df`, `!tf`, `!rm`,
//! `!cwd`, `!echo`) become the corresponding special action; `!idle` and
//! `!parent` are sentinels interpreted by the stack executor. Tag payloads
//! may be a scalar (whitespace-split where an argument vector is expected)
//! or a sequence of strings.

use crate::SchemaError;
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionItem {
    /// A line executed in the container's shell.
    Shell(String),
    Rpc(RpcSpec),
    DumpFile(DumpFileSpec),
    Transfer(TransferSpec),
    RemoveFile { filename: String },
    Workdir { path: String },
    Echo { text: String },
    /// Sentinel: later shell failures in the same frame are tolerated.
    Idle,
    /// Sentinel: delegate to the frame one level shallower in the stack.
    Parent,
}

/// An in-process call re-entering the action executor on a (possibly
/// different) container with a fresh parameter scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcSpec {
    /// Target container id, or the literal `self`.
    pub target: String,
    pub action: String,
    pub parameters: BTreeMap<String, String>,
}

impl RpcSpec {
    /// Parse an argument vector: target, action, then `key=value` pairs
    /// (split on the first `=`). Empty tokens are dropped.
    pub fn from_tokens<I, S>(tokens: I) -> Result<Self, SchemaError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut tokens = tokens
            .into_iter()
            .map(|t| t.as_ref().to_owned())
            .filter(|t| !t.is_empty());
        let target = tokens.next().ok_or_else(|| SchemaError::InvalidAction {
            kind: "rpc",
            reason: "missing target container".to_owned(),
        })?;
        let action = tokens.next().ok_or_else(|| SchemaError::InvalidAction {
            kind: "rpc",
            reason: "missing action name".to_owned(),
        })?;
        let mut parameters = BTreeMap::new();
        for pair in tokens {
            let (key, value) = pair.split_once('=').ok_or_else(|| SchemaError::InvalidAction {
                kind: "rpc",
                reason: format!("parameter '{pair}' is not key=value"),
            })?;
            parameters.insert(key.to_owned(), value.to_owned());
        }
        Ok(Self {
            target,
            action,
            parameters,
        })
    }
}

/// Drop an embedded payload from the definition's `files` mapping into the
/// container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpFileSpec {
    pub filename: String,
    pub chown: Option<String>,
    pub chmod: Option<String>,
}

impl DumpFileSpec {
    /// Optional leading `chown=…` / `chmod=…` tokens, then the filename
    /// (remaining tokens joined by a space).
    pub fn from_tokens(tokens: &[String]) -> Result<Self, SchemaError> {
        let mut chown = None;
        let mut chmod = None;
        let mut rest = tokens;
        while let Some(first) = rest.first() {
            if let Some(value) = first.strip_prefix("chown=") {
                chown = Some(value.to_owned());
            } else if let Some(value) = first.strip_prefix("chmod=") {
                chmod = Some(value.to_owned());
            } else {
                break;
            }
            rest = &rest[1..];
        }
        if rest.is_empty() {
            return Err(SchemaError::InvalidAction {
                kind: "df",
                reason: "missing filename".to_owned(),
            });
        }
        Ok(Self {
            filename: rest.join(" "),
            chown,
            chmod,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    /// Copy from the current container into the other.
    Up,
    /// Copy from the other container into the current one.
    Down,
}

/// Copy a file between the current container and a sibling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSpec {
    pub direction: TransferDirection,
    pub other: String,
    pub source: String,
    pub target: String,
}

impl TransferSpec {
    pub fn from_tokens(tokens: &[String]) -> Result<Self, SchemaError> {
        if tokens.len() != 4 {
            return Err(SchemaError::InvalidAction {
                kind: "tf",
                reason: format!("expected 'DIRECTION CONTAINER SRC DST', got {} tokens", tokens.len()),
            });
        }
        let direction = match tokens[0].as_str() {
            "d" | "down" | "<" => TransferDirection::Down,
            "u" | "up" | ">" => TransferDirection::Up,
            other => return Err(SchemaError::BadDirection(other.to_owned())),
        };
        Ok(Self {
            direction,
            other: tokens[1].clone(),
            source: tokens[2].clone(),
            target: tokens[3].clone(),
        })
    }
}

/// A deferred file read attached inside the `files` mapping, resolved on use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRef {
    pub filename: String,
    pub binary: bool,
}

impl LoadRef {
    /// Read the referenced file, trying each search directory in order
    /// (absolute filenames are used as-is). Text payloads must be UTF-8;
    /// binary payloads are returned verbatim.
    pub fn read(&self, search: &[PathBuf]) -> Result<Vec<u8>, SchemaError> {
        let path = self
            .locate(search)
            .ok_or_else(|| SchemaError::LoadNotFound(self.filename.clone()))?;
        let bytes = std::fs::read(path)?;
        if !self.binary && std::str::from_utf8(&bytes).is_err() {
            return Err(SchemaError::LoadNotText(self.filename.clone()));
        }
        Ok(bytes)
    }

    fn locate(&self, search: &[PathBuf]) -> Option<PathBuf> {
        let name = Path::new(&self.filename);
        if name.is_absolute() {
            return name.exists().then(|| name.to_path_buf());
        }
        search
            .iter()
            .map(|dir| dir.join(name))
            .find(|candidate| candidate.exists())
    }
}

/// A value of the `files` mapping: an inline payload (templated on use) or
/// a load reference (read on use, never templated).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileSource {
    Inline(String),
    Load(LoadRef),
}

pub fn file_source_from_value(value: &Value) -> Result<FileSource, SchemaError> {
    match value {
        Value::String(s) => Ok(FileSource::Inline(s.clone())),
        Value::Tagged(tagged) if tagged.tag == "load" => load_ref_from_value(&tagged.value),
        Value::Tagged(tagged) => Err(SchemaError::UnknownTag(bare_tag(&tagged.tag))),
        _ => Err(SchemaError::InvalidAction {
            kind: "files",
            reason: "entry must be a string or a !load reference".to_owned(),
        }),
    }
}

fn load_ref_from_value(value: &Value) -> Result<FileSource, SchemaError> {
    match value {
        Value::String(filename) => Ok(FileSource::Load(LoadRef {
            filename: filename.clone(),
            binary: false,
        })),
        Value::Mapping(map) => {
            let filename = map
                .get("filename")
                .and_then(Value::as_str)
                .ok_or_else(|| SchemaError::InvalidAction {
                    kind: "load",
                    reason: "mapping form needs a 'filename' key".to_owned(),
                })?;
            let binary = map.get("binary").and_then(Value::as_bool).unwrap_or(false);
            Ok(FileSource::Load(LoadRef {
                filename: filename.to_owned(),
                binary,
            }))
        }
        _ => Err(SchemaError::InvalidAction {
            kind: "load",
            reason: "payload must be a filename or a mapping".to_owned(),
        }),
    }
}

/// Resolve one frame item from its YAML node.
pub fn item_from_value(value: &Value) -> Result<ActionItem, SchemaError> {
    match value {
        Value::String(s) => Ok(match s.as_str() {
            "!idle" => ActionItem::Idle,
            "!parent" => ActionItem::Parent,
            _ => ActionItem::Shell(s.clone()),
        }),
        Value::Tagged(tagged) => {
            let payload = &tagged.value;
            if tagged.tag == "rpc" {
                Ok(ActionItem::Rpc(RpcSpec::from_tokens(tokens_of(payload, "rpc")?)?))
            } else if tagged.tag == "df" {
                Ok(ActionItem::DumpFile(DumpFileSpec::from_tokens(&tokens_of(
                    payload, "df",
                )?)?))
            } else if tagged.tag == "tf" {
                Ok(ActionItem::Transfer(TransferSpec::from_tokens(&tokens_of(
                    payload, "tf",
                )?)?))
            } else if tagged.tag == "rm" {
                Ok(ActionItem::RemoveFile {
                    filename: scalar_of(payload, "rm")?,
                })
            } else if tagged.tag == "cwd" {
                Ok(ActionItem::Workdir {
                    path: scalar_of(payload, "cwd")?,
                })
            } else if tagged.tag == "echo" {
                Ok(ActionItem::Echo {
                    text: scalar_of(payload, "echo")?,
                })
            } else if tagged.tag == "idle" {
                Ok(ActionItem::Idle)
            } else if tagged.tag == "parent" {
                Ok(ActionItem::Parent)
            } else if tagged.tag == "load" {
                Err(SchemaError::InvalidAction {
                    kind: "load",
                    reason: "!load is only valid inside the files mapping".to_owned(),
                })
            } else {
                Err(SchemaError::UnknownTag(bare_tag(&tagged.tag)))
            }
        }
        _ => Err(SchemaError::InvalidAction {
            kind: "action",
            reason: "frame item must be a string or a tagged node".to_owned(),
        }),
    }
}

/// Argument vector of a tag payload: a scalar splits on whitespace, a
/// sequence contributes one token per string element.
fn tokens_of(value: &Value, kind: &'static str) -> Result<Vec<String>, SchemaError> {
    match value {
        Value::String(s) => Ok(s.split_whitespace().map(str::to_owned).collect()),
        Value::Sequence(seq) => seq
            .iter()
            .map(|item| {
                item.as_str().map(str::to_owned).ok_or_else(|| SchemaError::InvalidAction {
                    kind,
                    reason: "sequence payload must contain only strings".to_owned(),
                })
            })
            .collect(),
        _ => Err(SchemaError::InvalidAction {
            kind,
            reason: "payload must be a string or a sequence of strings".to_owned(),
        }),
    }
}

fn scalar_of(value: &Value, kind: &'static str) -> Result<String, SchemaError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Sequence(_) => {
            let tokens = tokens_of(value, kind)?;
            if tokens.is_empty() {
                return Err(SchemaError::InvalidAction {
                    kind,
                    reason: "payload must not be empty".to_owned(),
                });
            }
            Ok(tokens.join(" "))
        }
        _ => Err(SchemaError::InvalidAction {
            kind,
            reason: "payload must be a string".to_owned(),
        }),
    }
}

fn bare_tag(tag: &serde_yaml::value::Tag) -> String {
    tag.to_string().trim_start_matches('!').to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(yaml: &str) -> ActionItem {
        let value: Value = serde_yaml::from_str(yaml).unwrap();
        item_from_value(&value).unwrap()
    }

    #[test]
    fn plain_string_is_shell() {
        assert_eq!(item("systemctl restart nginx"), ActionItem::Shell("systemctl restart nginx".into()));
    }

    #[test]
    fn sentinel_strings_resolve() {
        assert_eq!(item("\"!idle\""), ActionItem::Idle);
        assert_eq!(item("\"!parent\""), ActionItem::Parent);
    }

    #[test]
    fn tagged_sentinels_resolve() {
        assert_eq!(item("!idle"), ActionItem::Idle);
        assert_eq!(item("!parent"), ActionItem::Parent);
    }

    #[test]
    fn rpc_scalar_payload() {
        let parsed = item("!rpc db migrate version=12 force=yes");
        let ActionItem::Rpc(rpc) = parsed else {
            panic!("expected rpc, got {parsed:?}");
        };
        assert_eq!(rpc.target, "db");
        assert_eq!(rpc.action, "migrate");
        assert_eq!(rpc.parameters.get("version").unwrap(), "12");
        assert_eq!(rpc.parameters.get("force").unwrap(), "yes");
    }

    #[test]
    fn rpc_splits_on_first_equals_only() {
        let ActionItem::Rpc(rpc) = item("!rpc self greet msg=a=b") else {
            panic!()
        };
        assert_eq!(rpc.parameters.get("msg").unwrap(), "a=b");
    }

    #[test]
    fn rpc_sequence_payload() {
        let ActionItem::Rpc(rpc) = item("!rpc [web, reload]") else {
            panic!()
        };
        assert_eq!(rpc.target, "web");
        assert_eq!(rpc.action, "reload");
        assert!(rpc.parameters.is_empty());
    }

    #[test]
    fn rpc_missing_action_fails() {
        let value: Value = serde_yaml::from_str("!rpc db").unwrap();
        assert!(item_from_value(&value).is_err());
    }

    #[test]
    fn rpc_bare_parameter_fails() {
        let value: Value = serde_yaml::from_str("!rpc db migrate oops").unwrap();
        assert!(item_from_value(&value).is_err());
    }

    #[test]
    fn df_plain_filename() {
        let ActionItem::DumpFile(df) = item("!df /etc/nginx/nginx.conf") else {
            panic!()
        };
        assert_eq!(df.filename, "/etc/nginx/nginx.conf");
        assert_eq!(df.chown, None);
        assert_eq!(df.chmod, None);
    }

    #[test]
    fn df_with_chown_and_chmod() {
        let ActionItem::DumpFile(df) = item("!df chown=www:www chmod=0640 /etc/app.conf") else {
            panic!()
        };
        assert_eq!(df.filename, "/etc/app.conf");
        assert_eq!(df.chown.as_deref(), Some("www:www"));
        assert_eq!(df.chmod.as_deref(), Some("0640"));
    }

    #[test]
    fn df_filename_with_spaces_joins() {
        let ActionItem::DumpFile(df) = item("!df [chmod=0600, /etc/motd, of, the, day]") else {
            panic!()
        };
        assert_eq!(df.filename, "/etc/motd of the day");
    }

    #[test]
    fn df_without_filename_fails() {
        let value: Value = serde_yaml::from_str("!df chown=root:root").unwrap();
        assert!(item_from_value(&value).is_err());
    }

    #[test]
    fn tf_directions() {
        for token in ["d", "down", "<"] {
            let ActionItem::Transfer(tf) = item(&format!("!tf \"{token} db /a /b\"")) else {
                panic!()
            };
            assert_eq!(tf.direction, TransferDirection::Down);
        }
        for token in ["u", "up", ">"] {
            let ActionItem::Transfer(tf) = item(&format!("!tf \"{token} db /a /b\"")) else {
                panic!()
            };
            assert_eq!(tf.direction, TransferDirection::Up);
        }
    }

    #[test]
    fn tf_bad_direction_is_surfaced() {
        let value: Value = serde_yaml::from_str("!tf sideways db /a /b").unwrap();
        assert!(matches!(
            item_from_value(&value),
            Err(SchemaError::BadDirection(d)) if d == "sideways"
        ));
    }

    #[test]
    fn tf_wrong_arity_fails() {
        let value: Value = serde_yaml::from_str("!tf down db /only-src").unwrap();
        assert!(item_from_value(&value).is_err());
    }

    #[test]
    fn rm_cwd_echo_resolve() {
        assert_eq!(
            item("!rm /tmp/backup.zip"),
            ActionItem::RemoveFile {
                filename: "/tmp/backup.zip".into()
            }
        );
        assert_eq!(
            item("!cwd /srv/app"),
            ActionItem::Workdir {
                path: "/srv/app".into()
            }
        );
        assert_eq!(
            item("!echo deploying $_name"),
            ActionItem::Echo {
                text: "deploying $_name".into()
            }
        );
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let value: Value = serde_yaml::from_str("!frobnicate x").unwrap();
        assert!(matches!(
            item_from_value(&value),
            Err(SchemaError::UnknownTag(t)) if t == "frobnicate"
        ));
    }

    #[test]
    fn load_in_actions_is_rejected() {
        let value: Value = serde_yaml::from_str("!load payload.sh").unwrap();
        assert!(item_from_value(&value).is_err());
    }

    #[test]
    fn file_source_inline() {
        let value: Value = serde_yaml::from_str("server {}\n").unwrap();
        assert_eq!(
            file_source_from_value(&value).unwrap(),
            FileSource::Inline("server {}\n".into())
        );
    }

    #[test]
    fn file_source_load_scalar() {
        let value: Value = serde_yaml::from_str("!load nginx.conf").unwrap();
        let FileSource::Load(load) = file_source_from_value(&value).unwrap() else {
            panic!()
        };
        assert_eq!(load.filename, "nginx.conf");
        assert!(!load.binary);
    }

    #[test]
    fn file_source_load_mapping_binary() {
        let value: Value = serde_yaml::from_str("!load {filename: logo.png, binary: true}").unwrap();
        let FileSource::Load(load) = file_source_from_value(&value).unwrap() else {
            panic!()
        };
        assert_eq!(load.filename, "logo.png");
        assert!(load.binary);
    }

    #[test]
    fn load_ref_searches_directories_in_order() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        std::fs::write(second.path().join("payload.txt"), "from second").unwrap();
        let load = LoadRef {
            filename: "payload.txt".into(),
            binary: false,
        };
        let search = vec![first.path().to_path_buf(), second.path().to_path_buf()];
        assert_eq!(load.read(&search).unwrap(), b"from second");

        std::fs::write(first.path().join("payload.txt"), "from first").unwrap();
        assert_eq!(load.read(&search).unwrap(), b"from first");
    }

    #[test]
    fn load_ref_missing_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let load = LoadRef {
            filename: "absent.txt".into(),
            binary: false,
        };
        assert!(matches!(
            load.read(&[dir.path().to_path_buf()]),
            Err(SchemaError::LoadNotFound(_))
        ));
    }

    #[test]
    fn load_ref_binary_skips_utf8_check() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("blob"), [0xff, 0xfe, 0x00]).unwrap();
        let text = LoadRef {
            filename: "blob".into(),
            binary: false,
        };
        assert!(matches!(
            text.read(&[dir.path().to_path_buf()]),
            Err(SchemaError::LoadNotText(_))
        ));
        let binary = LoadRef {
            filename: "blob".into(),
            binary: true,
        };
        assert_eq!(binary.read(&[dir.path().to_path_buf()]).unwrap(), vec![0xff, 0xfe, 0x00]);
    }
}
