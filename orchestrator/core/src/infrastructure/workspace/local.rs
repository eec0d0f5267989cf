// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Local Filesystem Workspace
//!
//! Exposes the project root to agents. Paths are always interpreted relative
//! to the root; absolute paths and `..` components are rejected before any
//! filesystem access.

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::domain::agent::AgentId;
use crate::domain::workspace::{DirEntry, EntryType, Workspace, WorkspaceError, WorkspaceService};

pub struct LocalWorkspaceService {
    workspace: Arc<LocalWorkspace>,
}

impl LocalWorkspaceService {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            workspace: Arc::new(LocalWorkspace::new(root)),
        }
    }
}

#[async_trait]
impl WorkspaceService for LocalWorkspaceService {
    async fn open(&self, _agent_id: &AgentId) -> Result<Arc<dyn Workspace>, WorkspaceError> {
        if !self.workspace.root.is_dir() {
            return Err(WorkspaceError::NotFound(self.workspace.root.display().to_string()));
        }
        Ok(self.workspace.clone())
    }
}

pub struct LocalWorkspace {
    root: PathBuf,
}

impl LocalWorkspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, WorkspaceError> {
        let mut resolved = self.root.clone();
        for component in Path::new(path).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(WorkspaceError::PathTraversal(path.to_string()));
                }
            }
        }
        Ok(resolved)
    }
}

fn io_error(path: &str, err: std::io::Error) -> WorkspaceError {
    if err.kind() == std::io::ErrorKind::NotFound {
        WorkspaceError::NotFound(path.to_string())
    } else {
        WorkspaceError::Io(format!("{path}: {err}"))
    }
}

#[async_trait]
impl Workspace for LocalWorkspace {
    async fn read_file(&self, path: &str) -> Result<String, WorkspaceError> {
        let fs_path = self.resolve(path)?;
        tokio::fs::read_to_string(&fs_path).await.map_err(|e| io_error(path, e))
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<(), WorkspaceError> {
        let fs_path = self.resolve(path)?;
        if let Some(parent) = fs_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| io_error(path, e))?;
        }
        tokio::fs::write(&fs_path, content).await.map_err(|e| io_error(path, e))
    }

    async fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>, WorkspaceError> {
        let fs_path = self.resolve(path)?;
        let mut reader = tokio::fs::read_dir(&fs_path).await.map_err(|e| io_error(path, e))?;
        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await.map_err(|e| io_error(path, e))? {
            let file_type = entry.file_type().await.map_err(|e| io_error(path, e))?;
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                entry_type: if file_type.is_dir() { EntryType::Directory } else { EntryType::File },
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}
