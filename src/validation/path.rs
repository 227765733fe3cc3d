//! Playbook and inventory path resolution.
//!
//! Every reference coming from a request is joined under the configured root
//! for its kind and checked against the filesystem before a job may use it.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use regex::Regex;
use thiserror::Error;
use walkdir::WalkDir;

const PLAYBOOK_EXTENSIONS: &[&str] = &["yml", "yaml"];

/// Kind of file a request refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    Playbook,
    Inventory,
}

impl fmt::Display for PathKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathKind::Playbook => write!(f, "Playbook"),
            PathKind::Inventory => write!(f, "Inventory"),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("Playbook {} not found", .0.display())]
    PlaybookNotFound(PathBuf),

    #[error("Inventory file not found: {}", .0.display())]
    InventoryNotFound(PathBuf),

    #[error("Invalid playbook file type: {0}")]
    InvalidType(String),

    #[error("Playbook {0} is not in the whitelist")]
    NotWhitelisted(String),

    #[error("{kind} path escapes the configured directory: {name}")]
    OutsideRoot { kind: PathKind, name: String },
}

/// Resolves request-supplied names against the configured directories.
#[derive(Debug, Clone)]
pub struct PathValidator {
    playbook_dir: PathBuf,
    inventory_dir: PathBuf,
    default_inventory: PathBuf,
    whitelist: Vec<Regex>,
}

impl PathValidator {
    pub fn new(
        playbook_dir: impl Into<PathBuf>,
        inventory_dir: impl Into<PathBuf>,
        default_inventory: impl Into<PathBuf>,
        whitelist: Vec<Regex>,
    ) -> Self {
        Self {
            playbook_dir: playbook_dir.into(),
            inventory_dir: inventory_dir.into(),
            default_inventory: default_inventory.into(),
            whitelist,
        }
    }

    /// Compile whitelist patterns. Patterns are anchored at the start of the
    /// relative playbook path only, so `deploy_` admits `deploy_web.yml`.
    pub fn compile_whitelist(patterns: &[String]) -> Result<Vec<Regex>, regex::Error> {
        patterns
            .iter()
            .map(|pattern| Regex::new(&format!("^(?:{})", pattern)))
            .collect()
    }

    /// Resolve `raw_name` for `kind`.
    ///
    /// For inventories, `None` selects the configured default inventory file.
    /// Playbooks always require a name.
    pub fn resolve(&self, kind: PathKind, raw_name: Option<&str>) -> Result<PathBuf, PathError> {
        match kind {
            PathKind::Playbook => self.resolve_playbook(raw_name.unwrap_or_default()),
            PathKind::Inventory => match raw_name {
                Some(name) => self.resolve_inventory(name),
                None => self.default_inventory(),
            },
        }
    }

    fn resolve_playbook(&self, name: &str) -> Result<PathBuf, PathError> {
        let path = join_under(&self.playbook_dir, name, PathKind::Playbook)?;
        if !path.is_file() {
            return Err(PathError::PlaybookNotFound(path));
        }
        ensure_within(&self.playbook_dir, &path, name, PathKind::Playbook)?;

        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        if !PLAYBOOK_EXTENSIONS.contains(&extension) {
            return Err(PathError::InvalidType(name.to_string()));
        }

        if !self.is_whitelisted(name) {
            return Err(PathError::NotWhitelisted(name.to_string()));
        }

        Ok(path)
    }

    fn resolve_inventory(&self, name: &str) -> Result<PathBuf, PathError> {
        let path = join_under(&self.inventory_dir, name, PathKind::Inventory)?;
        if !path.is_file() {
            return Err(PathError::InventoryNotFound(path));
        }
        ensure_within(&self.inventory_dir, &path, name, PathKind::Inventory)?;
        Ok(path)
    }

    fn default_inventory(&self) -> Result<PathBuf, PathError> {
        if !self.default_inventory.is_file() {
            return Err(PathError::InventoryNotFound(self.default_inventory.clone()));
        }
        Ok(self.default_inventory.clone())
    }

    fn is_whitelisted(&self, relative: &str) -> bool {
        self.whitelist.is_empty() || self.whitelist.iter().any(|re| re.is_match(relative))
    }

    /// All playbooks under the playbook directory that a request may name,
    /// as sorted relative paths.
    pub fn available_playbooks(&self) -> Vec<String> {
        let mut playbooks: Vec<String> = WalkDir::new(&self.playbook_dir)
            .follow_links(false)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| {
                entry
                    .path()
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| PLAYBOOK_EXTENSIONS.contains(&e))
            })
            .filter_map(|entry| {
                entry
                    .path()
                    .strip_prefix(&self.playbook_dir)
                    .ok()
                    .map(|p| p.to_string_lossy().to_string())
            })
            .filter(|relative| self.is_whitelisted(relative))
            .collect();
        playbooks.sort();
        playbooks
    }
}

/// Join `name` under `root`, refusing absolute names and parent traversal.
fn join_under(root: &Path, name: &str, kind: PathKind) -> Result<PathBuf, PathError> {
    let relative = Path::new(name);
    let escapes = name.is_empty()
        || relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        if name.is_empty() {
            return Err(not_found(kind, root.to_path_buf()));
        }
        return Err(PathError::OutsideRoot {
            kind,
            name: name.to_string(),
        });
    }
    Ok(root.join(relative))
}

fn not_found(kind: PathKind, path: PathBuf) -> PathError {
    match kind {
        PathKind::Playbook => PathError::PlaybookNotFound(path),
        PathKind::Inventory => PathError::InventoryNotFound(path),
    }
}

/// Symlinks inside the root must not point outside of it.
fn ensure_within(root: &Path, path: &Path, name: &str, kind: PathKind) -> Result<(), PathError> {
    let outside = || PathError::OutsideRoot {
        kind,
        name: name.to_string(),
    };
    let root = root.canonicalize().map_err(|_| outside())?;
    let resolved = path.canonicalize().map_err(|_| outside())?;
    if resolved.starts_with(&root) {
        Ok(())
    } else {
        Err(outside())
    }
}
