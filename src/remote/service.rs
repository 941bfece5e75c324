use crate::download::errors::RemoteError;
use async_trait::async_trait;

/// Contract of the remote storage backend that downloads are mirrored to
///
/// Only folder lookup/creation and file upload matter to the engine; the wire
/// protocol behind it is the implementation's business.
#[async_trait]
pub trait RemoteFolderService: Send + Sync {
    /// Exact-name folder lookup under `parent_id`
    async fn find_folder(&self, name: &str, parent_id: &str)
    -> Result<Option<String>, RemoteError>;

    async fn create_folder(&self, name: &str, parent_id: &str) -> Result<String, RemoteError>;

    /// Returns the remote file id
    async fn upload_file(
        &self,
        bytes: Vec<u8>,
        name: &str,
        folder_id: &str,
    ) -> Result<String, RemoteError>;
}
