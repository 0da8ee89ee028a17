//! Lazy, memoizing definition registry.
//!
//! Definitions load on first use; `<id>.yaml` wins over `<id>.yml`. Loading
//! recurses through `extends` to build the merged container exactly once,
//! tracking the in-progress chain so a circular `extends` fails instead of
//! recursing forever. Merged containers are handed out as shared references
//! for the rest of the invocation.

use crate::model::Container;
use crate::CoreError;
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;
use tracing::debug;

pub struct Registry {
    definitions_dir: PathBuf,
    containers: RefCell<HashMap<String, Rc<Container>>>,
    loading: RefCell<Vec<String>>,
}

impl Registry {
    pub fn new(definitions_dir: PathBuf) -> Self {
        Self {
            definitions_dir,
            containers: RefCell::new(HashMap::new()),
            loading: RefCell::new(Vec::new()),
        }
    }

    pub fn definitions_dir(&self) -> &PathBuf {
        &self.definitions_dir
    }

    /// Whether a definition is memoized or present on disk.
    pub fn has(&self, id: &str) -> bool {
        self.containers.borrow().contains_key(id) || self.path(id).is_some()
    }

    fn path(&self, id: &str) -> Option<PathBuf> {
        for extension in ["yaml", "yml"] {
            let candidate = self.definitions_dir.join(format!("{id}.{extension}"));
            if candidate.exists() {
                return Some(candidate);
            }
        }
        None
    }

    /// All definition ids present in the definitions directory.
    pub fn list(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.definitions_dir) else {
            return Vec::new();
        };
        let mut ids: Vec<String> = entries
            .flatten()
            .filter_map(|entry| {
                let name = entry.file_name().into_string().ok()?;
                name.strip_suffix(".yaml")
                    .or_else(|| name.strip_suffix(".yml"))
                    .map(str::to_owned)
            })
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// The merged container for `id`, loading and flattening on first use.
    pub fn get(&self, id: &str) -> Result<Rc<Container>, CoreError> {
        if let Some(container) = self.containers.borrow().get(id) {
            return Ok(Rc::clone(container));
        }
        if self.loading.borrow().iter().any(|loading| loading == id) {
            return Err(CoreError::ExtendsCycle(id.to_owned()));
        }
        let path = self
            .path(id)
            .ok_or_else(|| CoreError::DefinitionNotFound(id.to_owned()))?;
        debug!("loading definition {}", path.display());
        let definition = sergio_schema::parse_definition_file(&path).map_err(|source| {
            CoreError::DefinitionInvalid {
                id: id.to_owned(),
                source,
            }
        })?;

        let parent = match &definition.extends {
            Some(parent_id) => {
                self.loading.borrow_mut().push(id.to_owned());
                let loaded = self.get(parent_id);
                self.loading.borrow_mut().pop();
                Some(loaded?)
            }
            None => None,
        };

        let container = Rc::new(Container::from_definition(
            id,
            &definition,
            parent.as_deref(),
        ));
        self.containers
            .borrow_mut()
            .insert(id.to_owned(), Rc::clone(&container));
        Ok(container)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &std::path::Path, name: &str, content: &str) {
        std::fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn yaml_wins_over_yml() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "db.yml", "container:\n  name: from-yml\n  description: d\n");
        write(dir.path(), "db.yaml", "container:\n  name: from-yaml\n  description: d\n");

        let reg = Registry::new(dir.path().to_path_buf());
        assert_eq!(reg.get("db").unwrap().name, "from-yaml");
    }

    #[test]
    fn yml_is_the_fallback() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "db.yml", "container:\n  name: from-yml\n  description: d\n");

        let reg = Registry::new(dir.path().to_path_buf());
        assert!(reg.has("db"));
        assert_eq!(reg.get("db").unwrap().name, "from-yml");
    }

    #[test]
    fn get_memoizes() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "db.yaml", "container:\n  name: db\n  description: d\n");

        let reg = Registry::new(dir.path().to_path_buf());
        let first = reg.get("db").unwrap();
        std::fs::remove_file(dir.path().join("db.yaml")).unwrap();
        let second = reg.get("db").unwrap();
        assert!(Rc::ptr_eq(&first, &second));
    }

    #[test]
    fn missing_definition_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let reg = Registry::new(dir.path().to_path_buf());
        assert!(!reg.has("ghost"));
        assert!(matches!(
            reg.get("ghost"),
            Err(CoreError::DefinitionNotFound(id)) if id == "ghost"
        ));
    }

    #[test]
    fn parse_failure_names_the_definition() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "bad.yaml", "container:\n  description: missing name\n");

        let reg = Registry::new(dir.path().to_path_buf());
        assert!(matches!(
            reg.get("bad"),
            Err(CoreError::DefinitionInvalid { id, .. }) if id == "bad"
        ));
    }

    #[test]
    fn extends_chain_flattens_transitively() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.yaml", "container:\n  name: a\n  description: a\n  box: img\n  variables: {x: a}\n");
        write(dir.path(), "b.yaml", "container:\n  name: b\n  description: b\n  extends: a\n  variables: {y: b}\n");
        write(dir.path(), "c.yaml", "container:\n  name: c\n  description: c\n  extends: b\n");

        let reg = Registry::new(dir.path().to_path_buf());
        let c = reg.get("c").unwrap();
        assert_eq!(c.image.as_deref(), Some("img"));
        assert_eq!(c.variables["x"], "a");
        assert_eq!(c.variables["y"], "b");
        assert_eq!(c.variables["_name"], "c");
    }

    #[test]
    fn extends_cycle_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.yaml", "container:\n  name: a\n  description: a\n  extends: b\n");
        write(dir.path(), "b.yaml", "container:\n  name: b\n  description: b\n  extends: a\n");

        let reg = Registry::new(dir.path().to_path_buf());
        assert!(matches!(reg.get("a"), Err(CoreError::ExtendsCycle(_))));
    }

    #[test]
    fn self_extends_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.yaml", "container:\n  name: a\n  description: a\n  extends: a\n");

        let reg = Registry::new(dir.path().to_path_buf());
        assert!(matches!(reg.get("a"), Err(CoreError::ExtendsCycle(_))));
    }

    #[test]
    fn list_strips_extensions_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "web.yaml", "x: y\n");
        write(dir.path(), "db.yml", "x: y\n");
        write(dir.path(), "notes.txt", "ignored\n");

        let reg = Registry::new(dir.path().to_path_buf());
        assert_eq!(reg.list(), vec!["db", "web"]);
    }
}
