use crate::identity_cache::IdentityCache;
use crate::pipeline::PendingLoad;
use crate::{
    AssetEvent, AssetLibrary, AssetLoader, AssetLoaderRegistry, AssetManagerConfig,
    AssetMetadata, AssetRef, LoadedAsset, ReleaseHook,
};
use cistern_base::{
    AssetId, AsyncError, AsyncResult, AsyncState, TaskExecutor, TaskExecutorThreadPool,
};
use crossbeam_channel::{Receiver, Sender};
use std::sync::{Arc, Mutex, RwLock};

pub(crate) struct AssetManagerInner {
    pub(crate) config: AssetManagerConfig,
    pub(crate) executor: Arc<dyn TaskExecutor>,
    libraries: RwLock<Vec<Arc<dyn AssetLibrary>>>,
    loaders: RwLock<AssetLoaderRegistry>,
    pub(crate) cache: Arc<Mutex<IdentityCache>>,
    pub(crate) release_hook: ReleaseHook,
    event_senders: Mutex<Vec<Sender<AssetEvent>>>,
}

enum LoadLookup {
    Cached(AssetRef),
    Loading(AsyncResult<AssetRef>),
    Started(Arc<PendingLoad>, AsyncResult<AssetRef>),
}

impl AssetManagerInner {
    pub(crate) fn load_async(
        self: &Arc<Self>,
        asset_id: AssetId,
    ) -> AsyncResult<AssetRef> {
        profiling::scope!("AssetManager::load_async");

        // Lookup and registration of a new load are one critical section so that concurrent
        // requests for the same id share a single pipeline
        let lookup = {
            let mut cache = self.cache.lock().unwrap();
            if let Some(asset) = cache.find(asset_id) {
                LoadLookup::Cached(asset)
            } else if let Some(result) = cache
                .find_loading(asset_id)
                .and_then(|pending| pending.async_result())
            {
                LoadLookup::Loading(result)
            } else {
                let op = AsyncState::new();
                let result = AsyncResult::from_op(op.clone());
                let pending = Arc::new(PendingLoad::new(asset_id, op));
                cache.begin_load(pending.clone());
                LoadLookup::Started(pending, result)
            }
        };

        match lookup {
            LoadLookup::Cached(asset) => {
                log::trace!("Asset {} found in cache", asset_id);
                AsyncResult::completed(asset)
            }
            LoadLookup::Loading(result) => {
                log::trace!("Asset {} is already loading", asset_id);
                result
            }
            LoadLookup::Started(pending, result) => {
                self.start_load(&pending);
                result
            }
        }
    }

    pub(crate) fn find_library(
        &self,
        asset_id: AssetId,
    ) -> Option<Arc<dyn AssetLibrary>> {
        self.libraries
            .read()
            .unwrap()
            .iter()
            .find(|library| library.has_asset(asset_id))
            .cloned()
    }

    pub(crate) fn find_loader(
        &self,
        name: &str,
    ) -> Option<Arc<dyn AssetLoader>> {
        self.loaders.read().unwrap().find_loader(name)
    }

    pub(crate) fn send_event(
        &self,
        event: AssetEvent,
    ) {
        let mut event_senders = self.event_senders.lock().unwrap();
        event_senders.retain(|sender| sender.send(event.clone()).is_ok());
    }
}

/// Entry point for loading assets.
///
/// Loads are deduplicated by id: while an asset is loading every request shares the same
/// pending load, and once it is loaded every request returns the same object for as long as
/// someone holds a reference to it. Cloning the manager is cheap and clones share all state.
#[derive(Clone)]
pub struct AssetManager {
    inner: Arc<AssetManagerInner>,
}

impl AssetManager {
    pub fn new(
        config: AssetManagerConfig,
        executor: Arc<dyn TaskExecutor>,
        loaders: AssetLoaderRegistry,
    ) -> Self {
        let cache = Arc::new(Mutex::new(IdentityCache::default()));

        // Holds the cache weakly so live objects don't keep a dropped manager around
        let weak_cache = Arc::downgrade(&cache);
        let release_hook: ReleaseHook = Arc::new(move |asset: &LoadedAsset| {
            if let Some(cache) = weak_cache.upgrade() {
                if let Ok(mut cache) = cache.lock() {
                    if cache.release(asset) {
                        log::debug!("Released asset {}", asset.asset_id());
                    }
                }
            }
        });

        log::debug!(
            "Created asset manager with {} loaders",
            loaders.len()
        );

        let inner = AssetManagerInner {
            config,
            executor,
            libraries: RwLock::new(Vec::default()),
            loaders: RwLock::new(loaders),
            cache,
            release_hook,
            event_senders: Mutex::new(Vec::default()),
        };

        AssetManager {
            inner: Arc::new(inner),
        }
    }

    /// Creates a manager running its pipeline on a new [`TaskExecutorThreadPool`]
    pub fn from_config(config: AssetManagerConfig) -> std::io::Result<Self> {
        let executor = Arc::new(TaskExecutorThreadPool::new(config.worker_thread_count)?);
        let mut loaders = AssetLoaderRegistry::default();
        if config.discover_loaders {
            loaders.discover_loaders();
        }

        Ok(Self::new(config, executor, loaders))
    }

    pub fn config(&self) -> &AssetManagerConfig {
        &self.inner.config
    }

    /// Starts loading `asset_id`, or joins the load already in flight. Returns an already
    /// completed result if the asset is cached. Failures are reported through the result, the
    /// error can be downcast to [`LoadError`](crate::LoadError).
    pub fn load_async(
        &self,
        asset_id: impl Into<AssetId>,
    ) -> AsyncResult<AssetRef> {
        self.inner.load_async(asset_id.into())
    }

    /// Same as [`AssetManager::load_async`], with `callback` invoked once the load completes.
    /// The callback runs on the thread that completed the load, or immediately if the asset was
    /// cached.
    pub fn load_async_with_callback<F>(
        &self,
        asset_id: impl Into<AssetId>,
        callback: F,
    ) -> AsyncResult<AssetRef>
    where
        F: FnOnce(Result<&AssetRef, &AsyncError>) + Send + 'static,
    {
        let result = self.load_async(asset_id);
        result.add_on_completion(callback);
        result
    }

    /// Loads `asset_id` and blocks until it is available. Returns `None` if the load failed,
    /// the error is logged. Calling this from a pipeline task can deadlock the executor.
    pub fn load(
        &self,
        asset_id: impl Into<AssetId>,
    ) -> Option<AssetRef> {
        self.load_async(asset_id).wait().ok()
    }

    /// Returns the cached object if it is still alive. Never starts a load.
    pub fn find(
        &self,
        asset_id: impl Into<AssetId>,
    ) -> Option<AssetRef> {
        let asset_id = asset_id.into();
        let asset = self.inner.cache.lock().unwrap().find(asset_id);
        asset
    }

    pub fn add_library(
        &self,
        library: Arc<dyn AssetLibrary>,
    ) {
        log::debug!("Adding asset library {}", library.name());
        self.inner.libraries.write().unwrap().push(library);
    }

    pub fn add_loader(
        &self,
        loader: Arc<dyn AssetLoader>,
    ) {
        log::debug!("Adding asset loader {}", loader.name());
        self.inner.loaders.write().unwrap().add_loader(loader);
    }

    /// Adds every loader registered with `register_asset_loader!` that isn't registered yet
    pub fn discover_loaders(&self) -> usize {
        self.inner.loaders.write().unwrap().discover_loaders()
    }

    /// The first library, in registration order, that has the asset
    pub fn find_library(
        &self,
        asset_id: impl Into<AssetId>,
    ) -> Option<Arc<dyn AssetLibrary>> {
        self.inner.find_library(asset_id.into())
    }

    pub fn find_metadata(
        &self,
        asset_id: impl Into<AssetId>,
    ) -> Option<AssetMetadata> {
        let asset_id = asset_id.into();
        let library = self.inner.find_library(asset_id)?;
        match library.find_metadata(asset_id) {
            Ok(metadata) => Some(metadata),
            Err(error) => {
                log::warn!(
                    "Library {} failed to provide metadata for {}: {}",
                    library.name(),
                    asset_id,
                    error
                );
                None
            }
        }
    }

    pub fn find_loader(
        &self,
        name: &str,
    ) -> Option<Arc<dyn AssetLoader>> {
        self.inner.find_loader(name)
    }

    /// Forgets every cached object. Objects still referenced elsewhere stay alive but later
    /// requests load them again. Loads in flight are unaffected and publish when done.
    pub fn clear(&self) {
        let cleared = self.inner.cache.lock().unwrap().clear();
        log::debug!("Cleared {} cached assets", cleared);
    }

    /// Drops cache entries for objects that no longer exist. Returns the number removed.
    pub fn gc(&self) -> usize {
        profiling::scope!("AssetManager::gc");
        self.inner.cache.lock().unwrap().remove_expired()
    }

    /// Number of cached objects that are still alive
    pub fn cached_count(&self) -> usize {
        self.inner.cache.lock().unwrap().cached_count()
    }

    pub fn loading_count(&self) -> usize {
        self.inner.cache.lock().unwrap().loading_count()
    }

    pub fn is_loading(
        &self,
        asset_id: impl Into<AssetId>,
    ) -> bool {
        self.inner.cache.lock().unwrap().is_loading(asset_id.into())
    }

    /// Returns a channel that receives an [`AssetEvent`] for every load finishing from now on
    pub fn subscribe_events(&self) -> Receiver<AssetEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.inner.event_senders.lock().unwrap().push(tx);
        rx
    }
}
