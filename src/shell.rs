//! "Remove Background" context-menu integration for image file types.
//!
//! Associations are kept in an [`AssociationStore`], one entry per file
//! extension. [`DirectoryStore`] persists them under a per-user directory, so
//! no elevated privileges are needed; [`MemoryStore`] keeps them in memory.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::{Error, Result};

/// File extensions that receive the context-menu verb.
pub const EXTENSIONS: [&str; 4] = [".jpg", ".jpeg", ".png", ".webp"];

/// Registry-style key of the verb.
pub const VERB: &str = "RemoveBackground";

/// Menu text shown to the user.
pub const VERB_LABEL: &str = "Remove Background";

/// Environment variable overriding the association directory.
pub const HOME_ENV: &str = "NOBG_HOME";

/// One persisted context-menu association.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssociationEntry {
    /// Verb key.
    pub verb: String,
    /// Menu text.
    pub label: String,
    /// Command line run for the selected file; `%1` stands for its path.
    pub command: String,
    /// Optional menu icon.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<PathBuf>,
}

impl AssociationEntry {
    /// Entry invoking `executable` on the selected file.
    #[must_use]
    pub fn for_executable(executable: &Path, icon: Option<PathBuf>) -> Self {
        Self {
            verb: VERB.to_string(),
            label: VERB_LABEL.to_string(),
            command: format!("\"{}\" \"%1\"", executable.display()),
            icon,
        }
    }
}

/// Persistent per-extension association records.
pub trait AssociationStore {
    /// Entry registered for `extension`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] or [`Error::Io`] if the record cannot be read.
    fn get(&self, extension: &str) -> Result<Option<AssociationEntry>>;

    /// Create or overwrite the entry for `extension`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] or [`Error::Io`] if the record cannot be written.
    fn set(&mut self, extension: &str, entry: &AssociationEntry) -> Result<()>;

    /// Remove the entry for `extension`; returns whether one existed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] or [`Error::Io`] if the record cannot be removed.
    fn delete(&mut self, extension: &str) -> Result<bool>;
}

/// In-memory store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: BTreeMap<String, AssociationEntry>,
}

impl MemoryStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl AssociationStore for MemoryStore {
    fn get(&self, extension: &str) -> Result<Option<AssociationEntry>> {
        Ok(self.entries.get(&normalize(extension)?).cloned())
    }

    fn set(&mut self, extension: &str, entry: &AssociationEntry) -> Result<()> {
        self.entries.insert(normalize(extension)?, entry.clone());
        Ok(())
    }

    fn delete(&mut self, extension: &str) -> Result<bool> {
        Ok(self.entries.remove(&normalize(extension)?).is_some())
    }
}

/// Store keeping one JSON file per extension in a directory.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    /// Store rooted at `root`; the directory is created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store in the current user's data directory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if no user-scoped directory can be determined.
    pub fn user_default() -> Result<Self> {
        user_directory(|key| std::env::var_os(key))
            .map(Self::new)
            .ok_or_else(|| Error::Store("cannot determine a per-user data directory".to_string()))
    }

    /// Directory holding the records.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, extension: &str) -> Result<PathBuf> {
        let key = normalize(extension)?;
        Ok(self.root.join(format!("{}.json", &key[1..])))
    }
}

impl AssociationStore for DirectoryStore {
    fn get(&self, extension: &str) -> Result<Option<AssociationEntry>> {
        let path = self.path_for(extension)?;
        match std::fs::read_to_string(&path) {
            Ok(text) => Ok(Some(serde_json::from_str(&text)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&mut self, extension: &str, entry: &AssociationEntry) -> Result<()> {
        let path = self.path_for(extension)?;
        std::fs::create_dir_all(&self.root)?;
        let mut tmp = NamedTempFile::new_in(&self.root)?;
        serde_json::to_writer_pretty(tmp.as_file_mut(), entry)?;
        tmp.persist(&path).map_err(|e| Error::Io(e.error))?;
        Ok(())
    }

    fn delete(&mut self, extension: &str) -> Result<bool> {
        let path = self.path_for(extension)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Installs and removes the context-menu verb for every entry of [`EXTENSIONS`].
#[derive(Debug)]
pub struct ShellIntegration<S> {
    store: S,
    entry: AssociationEntry,
}

impl<S: AssociationStore> ShellIntegration<S> {
    /// Integration writing `entry` into `store`.
    pub fn new(store: S, entry: AssociationEntry) -> Self {
        Self { store, entry }
    }

    /// Register the verb for all extensions, overwriting existing entries.
    ///
    /// # Errors
    ///
    /// Propagates the first store failure.
    pub fn install(&mut self) -> Result<()> {
        for ext in EXTENSIONS {
            self.store.set(ext, &self.entry)?;
            tracing::debug!(extension = ext, "association written");
        }
        Ok(())
    }

    /// Remove the verb from all extensions; returns how many entries existed.
    ///
    /// Missing entries are skipped.
    ///
    /// # Errors
    ///
    /// Propagates the first store failure.
    pub fn uninstall(&mut self) -> Result<usize> {
        let mut removed = 0;
        for ext in EXTENSIONS {
            if self.store.delete(ext)? {
                removed += 1;
                tracing::debug!(extension = ext, "association removed");
            }
        }
        Ok(removed)
    }

    /// Whether every extension carries the configured entry.
    ///
    /// # Errors
    ///
    /// Propagates store read failures.
    pub fn is_installed(&self) -> Result<bool> {
        for ext in EXTENSIONS {
            if self.store.get(ext)?.as_ref() != Some(&self.entry) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }
}

/// Lowercase `.ext` key; rejects anything that is not a plain extension.
fn normalize(extension: &str) -> Result<String> {
    let bare = extension.strip_prefix('.').unwrap_or(extension);
    if bare.is_empty() || !bare.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(Error::Store(format!("invalid file extension {extension:?}")));
    }
    Ok(format!(".{}", bare.to_ascii_lowercase()))
}

fn user_directory(lookup: impl Fn(&str) -> Option<OsString>) -> Option<PathBuf> {
    let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty()).map(PathBuf::from);

    if let Some(home) = non_empty(HOME_ENV) {
        return Some(home);
    }
    if let Some(data) = non_empty("XDG_DATA_HOME") {
        return Some(data.join("nobg").join("associations"));
    }
    if let Some(home) = non_empty("HOME") {
        return Some(
            home.join(".local")
                .join("share")
                .join("nobg")
                .join("associations"),
        );
    }
    non_empty("APPDATA").map(|appdata| appdata.join("nobg").join("associations"))
}
