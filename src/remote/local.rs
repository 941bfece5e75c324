use super::service::RemoteFolderService;
use crate::download::errors::RemoteError;
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};

/// Id of the mirror root folder
pub const ROOT_FOLDER_ID: &str = "root";

/// Remote backend backed by a local directory (e.g. a synced cloud drive)
///
/// Folder ids are paths relative to the mirror root, so they are stable across
/// restarts and readable in logs.
#[derive(Debug, Clone)]
pub struct LocalMirrorService {
    root: PathBuf,
}

impl LocalMirrorService {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn folder_path(&self, folder_id: &str) -> Result<PathBuf, RemoteError> {
        if folder_id == ROOT_FOLDER_ID {
            return Ok(self.root.clone());
        }
        let relative = Path::new(folder_id);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(RemoteError(format!("Invalid folder id '{}'", folder_id)));
        }
        Ok(self.root.join(relative))
    }

    fn child_id(parent_id: &str, name: &str) -> String {
        if parent_id == ROOT_FOLDER_ID {
            name.to_string()
        } else {
            format!("{}/{}", parent_id, name)
        }
    }
}

#[async_trait]
impl RemoteFolderService for LocalMirrorService {
    async fn find_folder(
        &self,
        name: &str,
        parent_id: &str,
    ) -> Result<Option<String>, RemoteError> {
        let path = self.folder_path(parent_id)?.join(name);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => Ok(Some(Self::child_id(parent_id, name))),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_folder(&self, name: &str, parent_id: &str) -> Result<String, RemoteError> {
        let parent = self.folder_path(parent_id)?;
        if !tokio::fs::try_exists(&parent).await? {
            return Err(RemoteError(format!("Parent folder '{}' does not exist", parent_id)));
        }
        match tokio::fs::create_dir(parent.join(name)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e.into()),
        }
        Ok(Self::child_id(parent_id, name))
    }

    async fn upload_file(
        &self,
        bytes: Vec<u8>,
        name: &str,
        folder_id: &str,
    ) -> Result<String, RemoteError> {
        let folder = self.folder_path(folder_id)?;
        let target = folder.join(name);
        let temp = folder.join(format!(".{}.part", name));
        tokio::fs::write(&temp, bytes).await?;
        tokio::fs::rename(&temp, &target).await?;
        tracing::debug!("Mirrored {} to {}", name, target.display());
        Ok(Self::child_id(folder_id, name))
    }
}
