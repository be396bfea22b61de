use crate::LibraryResult;
use cistern_base::{AssetId, AsyncResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Everything the pipeline needs to know about an asset before loading it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetMetadata {
    /// Name of the loader that constructs this asset
    pub loader: String,
    /// Assets that must be loaded before this one can be constructed
    #[serde(default)]
    pub dependencies: Vec<AssetId>,
    /// Loader-specific parameters
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BlobInfo {
    pub size: usize,
}

/// Bytes produced by a blob read
pub type BlobData = Arc<Vec<u8>>;

/// A source of asset metadata and raw data blobs.
///
/// Libraries are queried in registration order and the first one that reports having an asset
/// serves all of its metadata. Blob reads are asynchronous: the library may complete them on its
/// own threads.
pub trait AssetLibrary: Send + Sync {
    fn name(&self) -> &str;

    fn has_asset(
        &self,
        asset_id: AssetId,
    ) -> bool;

    fn find_metadata(
        &self,
        asset_id: AssetId,
    ) -> LibraryResult<AssetMetadata>;

    fn find_blob_info(
        &self,
        path: &str,
    ) -> LibraryResult<BlobInfo>;

    /// Fills `buffer`, which is sized from [`AssetLibrary::find_blob_info`], with the contents
    /// of the blob at `path`
    fn read_blob(
        &self,
        path: &str,
        buffer: Vec<u8>,
    ) -> AsyncResult<BlobData>;
}
