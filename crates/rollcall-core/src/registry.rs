//! Label registry: the persisted mapping between numeric identities and
//! enrolled names.
//!
//! The file is line-oriented, one `<id>:<name>` entry per line. Writes are
//! single-line appends; a missing file is an empty registry.

use crate::types::UNKNOWN;
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("invalid name {0:?}: {1}")]
    InvalidName(String, &'static str),
    #[error("registry io ({path}): {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Check a display name before it is written anywhere.
///
/// Returns the trimmed name. Colons and line breaks would split a registry
/// line, so they are refused.
pub fn validate_name(name: &str) -> Result<&str, RegistryError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(RegistryError::InvalidName(name.to_string(), "name cannot be empty"));
    }
    if trimmed.contains([':', '\n', '\r']) {
        return Err(RegistryError::InvalidName(
            name.to_string(),
            "name cannot contain ':' or line breaks",
        ));
    }
    if trimmed == UNKNOWN {
        return Err(RegistryError::InvalidName(name.to_string(), "name is reserved"));
    }
    Ok(trimmed)
}

/// In-memory snapshot of the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Labels {
    by_id: BTreeMap<u32, String>,
}

impl Labels {
    /// Parse registry text, skipping malformed and conflicting lines.
    pub fn parse(text: &str) -> Self {
        let mut labels = Labels::default();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            let Some((id, name)) = line.split_once(':') else {
                if !line.is_empty() {
                    tracing::debug!(line = lineno + 1, "registry: skipping line without separator");
                }
                continue;
            };
            let Ok(id) = id.trim().parse::<u32>() else {
                tracing::debug!(line = lineno + 1, "registry: skipping line with non-numeric id");
                continue;
            };
            if id == 0 || labels.by_id.contains_key(&id) || labels.id_of(name).is_some() {
                tracing::debug!(line = lineno + 1, id, "registry: skipping conflicting entry");
                continue;
            }
            labels.by_id.insert(id, name.to_string());
        }
        labels
    }

    pub fn get(&self, id: u32) -> Option<&str> {
        self.by_id.get(&id).map(String::as_str)
    }

    pub fn id_of(&self, name: &str) -> Option<u32> {
        self.by_id
            .iter()
            .find(|(_, n)| n.as_str() == name)
            .map(|(&id, _)| id)
    }

    /// Next identity to allocate: one past the highest id in use.
    pub fn next_id(&self) -> u32 {
        self.by_id.keys().next_back().map_or(1, |max| max + 1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> {
        self.by_id.iter().map(|(&id, name)| (id, name.as_str()))
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

/// File-backed label registry.
#[derive(Debug, Clone)]
pub struct LabelRegistry {
    path: PathBuf,
}

impl LabelRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the current snapshot. A missing file is an empty registry.
    pub fn load(&self) -> Result<Labels, RegistryError> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => Ok(Labels::parse(&text)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Labels::default()),
            Err(source) => Err(self.io_error(source)),
        }
    }

    /// Return the id registered for `name`, appending a new entry if needed.
    pub fn resolve_or_create(&self, name: &str) -> Result<u32, RegistryError> {
        let name = validate_name(name)?;
        let labels = self.load()?;
        if let Some(id) = labels.id_of(name) {
            tracing::debug!(id, name, "registry: existing identity");
            return Ok(id);
        }

        let id = labels.next_id();
        self.append(id, name)?;
        tracing::info!(id, name, "registry: new identity");
        Ok(id)
    }

    fn append(&self, id: u32, name: &str) -> Result<(), RegistryError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io_error(e))?;
        file.write_all(format!("{id}:{name}\n").as_bytes())
            .map_err(|e| self.io_error(e))
    }

    /// Delete the registry file. Missing is fine.
    pub fn remove(&self) -> Result<bool, RegistryError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(source) => Err(self.io_error(source)),
        }
    }

    fn io_error(&self, source: std::io::Error) -> RegistryError {
        RegistryError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> (tempfile::TempDir, LabelRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let reg = LabelRegistry::new(dir.path().join("labels.txt"));
        (dir, reg)
    }

    #[test]
    fn test_missing_file_is_empty() {
        let (_dir, reg) = registry();
        assert!(reg.load().unwrap().is_empty());
    }

    #[test]
    fn test_resolve_or_create_scenario() {
        let (_dir, reg) = registry();
        assert_eq!(reg.resolve_or_create("Alice").unwrap(), 1);
        assert_eq!(reg.resolve_or_create("Alice").unwrap(), 1);
        assert_eq!(reg.resolve_or_create("Bob").unwrap(), 2);

        let text = std::fs::read_to_string(reg.path()).unwrap();
        assert_eq!(text, "1:Alice\n2:Bob\n");
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let (_dir, reg) = registry();
        for name in ["Carol", "Dan", "Carol", "  Dan  ", "Erin"] {
            let first = reg.resolve_or_create(name).unwrap();
            let second = reg.resolve_or_create(name).unwrap();
            assert_eq!(first, second, "{name}");
        }
        assert_eq!(reg.load().unwrap().len(), 3);
    }

    #[test]
    fn test_rejects_invalid_names() {
        let (_dir, reg) = registry();
        for bad in ["", "   ", "a:b", "line\nbreak", "cr\rname", UNKNOWN] {
            let err = reg.resolve_or_create(bad).unwrap_err();
            assert!(matches!(err, RegistryError::InvalidName(..)), "{bad:?}");
        }
        assert!(!reg.path().exists());
    }

    #[test]
    fn test_name_with_comma() {
        let (_dir, reg) = registry();
        assert_eq!(reg.resolve_or_create("Smith, John").unwrap(), 1);
        assert_eq!(reg.resolve_or_create("Smith, John").unwrap(), 1);
        assert_eq!(reg.resolve_or_create("Smith").unwrap(), 2);
        assert_eq!(reg.load().unwrap().get(1), Some("Smith, John"));
    }

    #[test]
    fn test_parse_skips_malformed_lines() {
        let labels = Labels::parse("1:Alice\ngarbage\nx:Nope\n0:Zero\n2:Bob Smith\n\n2:Dup\n3:Alice\n");
        assert_eq!(labels.len(), 2);
        assert_eq!(labels.get(1), Some("Alice"));
        assert_eq!(labels.get(2), Some("Bob Smith"));
        assert_eq!(labels.get(3), None);
    }

    #[test]
    fn test_next_id_skips_gaps() {
        let labels = Labels::parse("1:Alice\n5:Eve\n");
        assert_eq!(labels.next_id(), 6);
        assert_eq!(Labels::default().next_id(), 1);
    }

    #[test]
    fn test_round_trip() {
        let (_dir, reg) = registry();
        for name in ["Alice", "Bob", "Chandra Rao"] {
            reg.resolve_or_create(name).unwrap();
        }
        let labels = reg.load().unwrap();
        let pairs: Vec<_> = labels.iter().collect();
        assert_eq!(pairs, vec![(1, "Alice"), (2, "Bob"), (3, "Chandra Rao")]);
    }

    #[test]
    fn test_remove() {
        let (_dir, reg) = registry();
        assert!(!reg.remove().unwrap());
        reg.resolve_or_create("Alice").unwrap();
        assert!(reg.remove().unwrap());
        assert!(reg.load().unwrap().is_empty());
    }
}
