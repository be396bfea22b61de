use crate::{AssetLibrary, AssetMetadata, BlobData, BlobInfo, LibraryError, LibraryResult};
use cistern_base::hashing::HashMap;
use cistern_base::{AssetId, AsyncError, AsyncResult};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

/// Library serving metadata and blobs registered at runtime. Reads complete immediately on the
/// calling thread.
pub struct MemoryLibrary {
    name: String,
    assets: RwLock<HashMap<AssetId, AssetMetadata>>,
    blobs: RwLock<HashMap<String, BlobData>>,
    metadata_request_count: AtomicUsize,
    blob_read_count: AtomicUsize,
}

impl MemoryLibrary {
    pub fn new(name: impl Into<String>) -> Self {
        MemoryLibrary {
            name: name.into(),
            assets: Default::default(),
            blobs: Default::default(),
            metadata_request_count: AtomicUsize::new(0),
            blob_read_count: AtomicUsize::new(0),
        }
    }

    pub fn add_asset(
        &self,
        asset_id: impl Into<AssetId>,
        metadata: AssetMetadata,
    ) {
        self.assets.write().unwrap().insert(asset_id.into(), metadata);
    }

    pub fn remove_asset(
        &self,
        asset_id: impl Into<AssetId>,
    ) -> Option<AssetMetadata> {
        self.assets.write().unwrap().remove(&asset_id.into())
    }

    pub fn add_blob(
        &self,
        path: impl Into<String>,
        data: impl Into<Vec<u8>>,
    ) {
        self.blobs
            .write()
            .unwrap()
            .insert(path.into(), Arc::new(data.into()));
    }

    pub fn asset_count(&self) -> usize {
        self.assets.read().unwrap().len()
    }

    /// Number of `find_metadata` calls served so far
    pub fn metadata_request_count(&self) -> usize {
        self.metadata_request_count.load(Ordering::Acquire)
    }

    /// Number of `read_blob` calls served so far
    pub fn blob_read_count(&self) -> usize {
        self.blob_read_count.load(Ordering::Acquire)
    }
}

impl AssetLibrary for MemoryLibrary {
    fn name(&self) -> &str {
        &self.name
    }

    fn has_asset(
        &self,
        asset_id: AssetId,
    ) -> bool {
        self.assets.read().unwrap().contains_key(&asset_id)
    }

    fn find_metadata(
        &self,
        asset_id: AssetId,
    ) -> LibraryResult<AssetMetadata> {
        self.metadata_request_count.fetch_add(1, Ordering::AcqRel);
        self.assets
            .read()
            .unwrap()
            .get(&asset_id)
            .cloned()
            .ok_or_else(|| LibraryError::NotFound(asset_id.to_string()))
    }

    fn find_blob_info(
        &self,
        path: &str,
    ) -> LibraryResult<BlobInfo> {
        self.blobs
            .read()
            .unwrap()
            .get(path)
            .map(|data| BlobInfo { size: data.len() })
            .ok_or_else(|| LibraryError::NotFound(path.to_string()))
    }

    fn read_blob(
        &self,
        path: &str,
        mut buffer: Vec<u8>,
    ) -> AsyncResult<BlobData> {
        profiling::scope!("MemoryLibrary::read_blob");
        self.blob_read_count.fetch_add(1, Ordering::AcqRel);
        let blobs = self.blobs.read().unwrap();
        match blobs.get(path) {
            Some(data) => {
                buffer.resize(data.len(), 0);
                buffer.copy_from_slice(data);
                AsyncResult::completed(Arc::new(buffer))
            }
            None => AsyncResult::failed(AsyncError::new(LibraryError::NotFound(path.to_string()))),
        }
    }
}
