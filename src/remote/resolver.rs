//! Remote folder resolution with de-duplication
//!
//! Many queue items land in the same month folder at the same time. The
//! resolver guarantees one find-or-create round trip per `(parent, name)` key:
//! the first caller starts it, every concurrent caller awaits the same shared
//! result, and successful ids are cached for the life of the resolver.

use super::service::RemoteFolderService;
use crate::download::errors::ResolutionError;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

type PendingResolution = Shared<BoxFuture<'static, Result<String, ResolutionError>>>;

#[derive(Default)]
struct ResolverState {
    cache: HashMap<String, String>,
    pending: HashMap<String, PendingResolution>,
}

fn lock(state: &Mutex<ResolverState>) -> MutexGuard<'_, ResolverState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

/// Removes the pending entry when the resolution task ends, whatever the outcome
struct PendingGuard {
    state: Arc<Mutex<ResolverState>>,
    key: String,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        lock(&self.state).pending.remove(&self.key);
    }
}

/// Cache + in-flight map for remote folder ids
///
/// Clones share the same cache.
#[derive(Clone)]
pub struct FolderResolver {
    service: Arc<dyn RemoteFolderService>,
    state: Arc<Mutex<ResolverState>>,
}

impl FolderResolver {
    pub fn new(service: Arc<dyn RemoteFolderService>) -> Self {
        Self {
            service,
            state: Arc::new(Mutex::new(ResolverState::default())),
        }
    }

    pub fn service(&self) -> &Arc<dyn RemoteFolderService> {
        &self.service
    }

    fn cache_key(name: &str, parent_id: &str) -> String {
        format!("{}/{}", parent_id, name)
    }

    /// Resolve `name` under `parent_id` to a folder id, creating it if needed
    pub async fn resolve(&self, name: &str, parent_id: &str) -> Result<String, ResolutionError> {
        if name.trim().is_empty() || name.contains('/') {
            return Err(ResolutionError::InvalidName(name.to_string()));
        }
        let key = Self::cache_key(name, parent_id);

        let pending = {
            let mut state = lock(&self.state);
            if let Some(id) = state.cache.get(&key) {
                tracing::trace!(key = %key, "Folder cache hit");
                return Ok(id.clone());
            }
            match state.pending.get(&key) {
                Some(pending) => {
                    tracing::trace!(key = %key, "Awaiting in-flight folder resolution");
                    pending.clone()
                }
                None => {
                    let pending = self.spawn_resolution(key.clone(), name, parent_id);
                    state.pending.insert(key, pending.clone());
                    pending
                }
            }
        };

        pending.await
    }

    /// Fold `resolve` over path segments starting at `root_id`
    pub async fn resolve_path<S: AsRef<str>>(
        &self,
        segments: &[S],
        root_id: &str,
    ) -> Result<String, ResolutionError> {
        let mut parent = root_id.to_string();
        for segment in segments {
            parent = self.resolve(segment.as_ref(), &parent).await?;
        }
        Ok(parent)
    }

    pub fn cached_len(&self) -> usize {
        lock(&self.state).cache.len()
    }

    pub fn pending_len(&self) -> usize {
        lock(&self.state).pending.len()
    }

    /// Spawned so the round trip and its cleanup finish even if every caller
    /// gives up waiting
    fn spawn_resolution(&self, key: String, name: &str, parent_id: &str) -> PendingResolution {
        let service = self.service.clone();
        let guard = PendingGuard {
            state: self.state.clone(),
            key: key.clone(),
        };
        let name = name.to_string();
        let parent_id = parent_id.to_string();
        let task_key = key.clone();

        let handle = tokio::spawn(async move {
            let result = find_or_create(service.as_ref(), &task_key, &name, &parent_id).await;
            if let Ok(id) = &result {
                lock(&guard.state).cache.insert(task_key.clone(), id.clone());
            }
            drop(guard);
            result
        });

        async move {
            handle
                .await
                .unwrap_or_else(|_| Err(ResolutionError::Interrupted(key)))
        }
        .boxed()
        .shared()
    }
}

async fn find_or_create(
    service: &dyn RemoteFolderService,
    key: &str,
    name: &str,
    parent_id: &str,
) -> Result<String, ResolutionError> {
    let existing = service
        .find_folder(name, parent_id)
        .await
        .map_err(|e| ResolutionError::Lookup {
            key: key.to_string(),
            message: e.to_string(),
        })?;
    if let Some(id) = existing {
        tracing::debug!(key, folder_id = %id, "Reusing existing remote folder");
        return Ok(id);
    }

    let id = service
        .create_folder(name, parent_id)
        .await
        .map_err(|e| ResolutionError::Create {
            key: key.to_string(),
            message: e.to_string(),
        })?;
    tracing::info!(key, folder_id = %id, "Created remote folder");
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::errors::RemoteError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct CountingService {
        finds: AtomicUsize,
        creates: AtomicUsize,
        fail: AtomicBool,
        existing: Mutex<HashMap<String, String>>,
    }

    #[async_trait]
    impl RemoteFolderService for CountingService {
        async fn find_folder(
            &self,
            name: &str,
            parent_id: &str,
        ) -> Result<Option<String>, RemoteError> {
            self.finds.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.fail.load(Ordering::SeqCst) {
                return Err(RemoteError("backend down".into()));
            }
            let existing = self.existing.lock().unwrap();
            Ok(existing.get(&format!("{}/{}", parent_id, name)).cloned())
        }

        async fn create_folder(&self, name: &str, parent_id: &str) -> Result<String, RemoteError> {
            let n = self.creates.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            let id = format!("id-{}-{}", name, n);
            self.existing
                .lock()
                .unwrap()
                .insert(format!("{}/{}", parent_id, name), id.clone());
            Ok(id)
        }

        async fn upload_file(
            &self,
            _bytes: Vec<u8>,
            name: &str,
            _folder_id: &str,
        ) -> Result<String, RemoteError> {
            Ok(name.to_string())
        }
    }

    #[tokio::test]
    async fn test_concurrent_resolves_share_one_round_trip() {
        let service = Arc::new(CountingService::default());
        let resolver = FolderResolver::new(service.clone());

        let mut handles = Vec::new();
        for _ in 0..16 {
            let resolver = resolver.clone();
            handles.push(tokio::spawn(async move {
                resolver.resolve("2025-08_August", "session").await
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap());
        }

        assert!(ids.iter().all(|id| id == &ids[0]));
        assert_eq!(service.finds.load(Ordering::SeqCst), 1);
        assert_eq!(service.creates.load(Ordering::SeqCst), 1);
        assert_eq!(resolver.pending_len(), 0);
        assert_eq!(resolver.cached_len(), 1);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_remote() {
        let service = Arc::new(CountingService::default());
        let resolver = FolderResolver::new(service.clone());

        let first = resolver.resolve("DE", "root").await.unwrap();
        let second = resolver.resolve("DE", "root").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(service.finds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_existing_folder_is_reused() {
        let service = Arc::new(CountingService::default());
        service
            .existing
            .lock()
            .unwrap()
            .insert("root/Amazon_Invoices".into(), "pre-existing".into());
        let resolver = FolderResolver::new(service.clone());

        let id = resolver.resolve("Amazon_Invoices", "root").await.unwrap();

        assert_eq!(id, "pre-existing");
        assert_eq!(service.creates.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failure_reaches_all_awaiters_and_is_not_cached() {
        let service = Arc::new(CountingService::default());
        service.fail.store(true, Ordering::SeqCst);
        let resolver = FolderResolver::new(service.clone());

        let (a, b) = tokio::join!(resolver.resolve("X", "root"), resolver.resolve("X", "root"));
        assert!(matches!(a, Err(ResolutionError::Lookup { .. })));
        assert_eq!(a, b);
        assert_eq!(service.finds.load(Ordering::SeqCst), 1);
        assert_eq!(service.creates.load(Ordering::SeqCst), 0);
        assert_eq!(resolver.pending_len(), 0);
        assert_eq!(resolver.cached_len(), 0);

        // A later attempt is not blocked by the failed one
        service.fail.store(false, Ordering::SeqCst);
        assert!(resolver.resolve("X", "root").await.is_ok());
    }

    #[tokio::test]
    async fn test_resolve_path_folds_segments() {
        let service = Arc::new(CountingService::default());
        let resolver = FolderResolver::new(service.clone());

        let leaf = resolver
            .resolve_path(&["Amazon_Invoices", "Amazon-DE", "Session_001"], "root")
            .await
            .unwrap();

        assert_eq!(leaf, "id-Session_001-2");
        assert_eq!(service.creates.load(Ordering::SeqCst), 3);
        assert_eq!(resolver.cached_len(), 3);
    }

    #[tokio::test]
    async fn test_invalid_name_rejected() {
        let resolver = FolderResolver::new(Arc::new(CountingService::default()));
        assert!(matches!(
            resolver.resolve("a/b", "root").await,
            Err(ResolutionError::InvalidName(_))
        ));
    }
}
