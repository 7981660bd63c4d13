use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::gallery::matching::{self, VarContext};

pub mod sevenzip;

pub use sevenzip::{BackendError, SevenZip};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    /// A single archive file read and written through the archive backend.
    File,
    /// A folder of loose files accessed directly on the filesystem.
    Folder,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetKind::File => write!(f, "file"),
            TargetKind::Folder => write!(f, "folder"),
        }
    }
}

/// Where a file name was found, and therefore how it must be re-resolved
/// for reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Archive,
    Folder,
    ParentFolder,
}

#[derive(Error, Debug)]
pub enum TargetError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// One unit of work: an archive file or a folder representing one image set.
///
/// The file listing is populated on first access and memoized; re-reading
/// requires a fresh target.
#[derive(Debug)]
pub struct Target {
    kind: TargetKind,
    source_path: PathBuf,
    dir_path: PathBuf,
    display_name: String,
    files: Option<Vec<String>>,
    partial: bool,
    vars: VarContext,
    backend: SevenZip,
}

impl Target {
    pub fn archive_file(path: PathBuf, backend: SevenZip) -> Self {
        let dir_path = path.parent().unwrap_or(Path::new("")).to_path_buf();
        let display_name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let vars = VarContext::new().with("name", display_name.clone());
        Self {
            kind: TargetKind::File,
            source_path: path,
            dir_path,
            display_name,
            files: None,
            partial: false,
            vars,
            backend,
        }
    }

    pub fn folder(dir: PathBuf, files: Vec<String>, partial: bool, backend: SevenZip) -> Self {
        let display_name = dir
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let vars = VarContext::new().with("name", display_name.clone());
        Self {
            kind: TargetKind::Folder,
            source_path: dir.clone(),
            dir_path: dir,
            display_name,
            files: Some(files),
            partial,
            vars,
            backend,
        }
    }

    pub fn kind(&self) -> TargetKind {
        self.kind
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn dir_path(&self) -> &Path {
        &self.dir_path
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// True when the file list is known to be incomplete (a single loose
    /// image standing in for its whole folder).
    pub fn is_partial(&self) -> bool {
        self.partial
    }

    pub fn variables(&self) -> &VarContext {
        &self.vars
    }

    /// Binds an additional substitution variable. The context is replaced
    /// wholesale, so earlier clones of it are unaffected.
    pub fn define_variable(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars = self.vars.with(key, value);
    }

    /// Returns the cached file listing, populating it from the backend on
    /// first access. A full archive listing supersedes the partial flag.
    pub async fn files(&mut self) -> Result<&[String], TargetError> {
        if self.files.is_none() {
            let listed = self.backend.list(&self.source_path).await?;
            self.files = Some(listed);
            self.partial = false;
        }
        Ok(self.files.as_deref().unwrap_or_default())
    }

    /// First file inside the archive matching any rule. Folder targets have
    /// no nested archive and always report none.
    pub async fn find_existing_file_in_archive(
        &mut self,
        rules: &[String],
    ) -> Result<Option<(String, Scope)>, TargetError> {
        if self.kind == TargetKind::Folder || rules.is_empty() {
            return Ok(None);
        }
        let vars = self.vars.clone();
        let files = self.files().await?;
        Ok(matching_file(files, rules, &vars).map(|name| (name, Scope::Archive)))
    }

    /// First file in the containing folder matching any rule.
    pub fn find_existing_file_in_folder(&self, rules: &[String]) -> Option<(String, Scope)> {
        let files = list_folder_files(&self.dir_path);
        matching_file(&files, rules, &self.vars).map(|name| (name, Scope::Folder))
    }

    /// First file in the parent of the containing folder matching any rule.
    pub fn find_existing_file_in_parent_folder(&self, rules: &[String]) -> Option<(String, Scope)> {
        let parent = self.dir_path.parent()?;
        let files = list_folder_files(parent);
        matching_file(&files, rules, &self.vars).map(|name| (name, Scope::ParentFolder))
    }

    /// Reads a named file in the given scope.
    pub async fn read_file(&self, name: &str, scope: Scope) -> Result<Vec<u8>, TargetError> {
        match scope {
            Scope::Archive if self.kind == TargetKind::File => {
                Ok(self.backend.read_entry(&self.source_path, name).await?)
            }
            Scope::Archive | Scope::Folder => read_fs_file(&self.dir_path.join(name)),
            Scope::ParentFolder => {
                let parent = self.dir_path.parent().unwrap_or(Path::new(""));
                read_fs_file(&parent.join(name))
            }
        }
    }

    /// Reads one of the target's own content files (an entry of `files()`).
    pub async fn read_content_file(&self, name: &str) -> Result<Vec<u8>, TargetError> {
        let scope = match self.kind {
            TargetKind::File => Scope::Archive,
            TargetKind::Folder => Scope::Folder,
        };
        self.read_file(name, scope).await
    }

    /// Writes a named file into the target itself: into the archive for
    /// File targets, into the folder for Folder targets.
    pub async fn write_file(&self, name: &str, content: &[u8]) -> Result<(), TargetError> {
        match self.kind {
            TargetKind::File => {
                Ok(self.backend.write_entry(&self.source_path, name, content).await?)
            }
            TargetKind::Folder => {
                let path = self.dir_path.join(name);
                fs::write(&path, content).map_err(|source| TargetError::Io { path, source })
            }
        }
    }

    /// Applies variable substitution (without escaping) to a configured
    /// file name pattern.
    pub fn file_name_format(&self, pattern: &str) -> String {
        matching::substitute(pattern, &self.vars, false)
    }
}

fn matching_file(files: &[String], rules: &[String], vars: &VarContext) -> Option<String> {
    if rules.is_empty() {
        return None;
    }
    files
        .iter()
        .find(|file| matching::matches_list(file, false, rules, vars))
        .cloned()
}

/// Base names of the plain files directly inside `dir`; unreadable
/// directories list as empty.
fn list_folder_files(dir: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<String> = entries
        .flatten()
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    files.sort();
    files
}

fn read_fs_file(path: &Path) -> Result<Vec<u8>, TargetError> {
    fs::read(path).map_err(|source| TargetError::Io {
        path: path.to_path_buf(),
        source,
    })
}
