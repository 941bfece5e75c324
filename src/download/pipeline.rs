use super::errors::{ItemError, TransferError};
use super::item::DownloadItem;
use super::queue::{CompletedTransfer, ItemDownloader};
use super::transfer::TransferService;
use crate::remote::FolderResolver;
use crate::session::SessionPath;
use crate::session::naming::sanitize_filename;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Remote mirror target for finished documents
#[derive(Clone)]
pub struct MirrorTarget {
    pub resolver: FolderResolver,
    pub root_folder_id: String,
}

/// Download operation for one session
///
/// Writes each document under `{download_root}/{session path}/{month}` and,
/// when a mirror is configured, uploads it into the same folder structure on
/// the remote backend.
pub struct SessionDownloader {
    session: SessionPath,
    download_root: PathBuf,
    transfer: Arc<dyn TransferService>,
    mirror: Option<MirrorTarget>,
}

impl SessionDownloader {
    pub fn new(
        session: SessionPath,
        download_root: impl Into<PathBuf>,
        transfer: Arc<dyn TransferService>,
    ) -> Self {
        Self {
            session,
            download_root: download_root.into(),
            transfer,
            mirror: None,
        }
    }

    pub fn with_mirror(mut self, mirror: MirrorTarget) -> Self {
        self.mirror = Some(mirror);
        self
    }

    pub fn session(&self) -> &SessionPath {
        &self.session
    }

    /// Local destination for an item
    pub fn destination_for(&self, item: &DownloadItem) -> PathBuf {
        let mut path = self.download_root.clone();
        for segment in self.session.segments(item.order_date) {
            path.push(segment);
        }
        path.push(sanitize_filename(&item.destination_name));
        path
    }

    async fn mirror(
        &self,
        mirror: &MirrorTarget,
        item: &DownloadItem,
        local: &std::path::Path,
    ) -> Result<(), ItemError> {
        let segments = self.session.segments(item.order_date);
        let folder_id = mirror
            .resolver
            .resolve_path(&segments, &mirror.root_folder_id)
            .await?;
        let bytes = tokio::fs::read(local)
            .await
            .map_err(|e| TransferError::Mirror(format!("{}: {}", local.display(), e)))?;
        mirror
            .resolver
            .service()
            .upload_file(bytes, &sanitize_filename(&item.destination_name), &folder_id)
            .await
            .map_err(|e| TransferError::Mirror(e.to_string()))?;
        tracing::debug!(item_id = %item.id, folder_id = %folder_id, "Mirrored to remote");
        Ok(())
    }
}

#[async_trait]
impl ItemDownloader for SessionDownloader {
    async fn download(
        &self,
        item: &DownloadItem,
        cancel: &CancellationToken,
    ) -> Result<CompletedTransfer, ItemError> {
        let destination = self.destination_for(item);
        let receipt = self
            .transfer
            .download(&item.source_location, &destination, cancel)
            .await?;

        if let Some(mirror) = &self.mirror {
            self.mirror(mirror, item, &receipt.destination).await?;
        }

        Ok(CompletedTransfer {
            destination: receipt.destination,
            transfer_id: receipt.transfer_id,
            bytes: receipt.bytes,
        })
    }
}
