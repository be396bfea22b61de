use crate::{Asset, AssetMetadata, AssetRef, BlobData, LoaderResult};
use cistern_base::hashing::HashMap;
use cistern_base::AssetId;
use serde::de::DeserializeOwned;

/// Blobs a loader needs read before it can construct an asset, as `(tag, path)` pairs. The tag
/// is how the loader finds the bytes again in [`AssetLoadResult`].
#[derive(Debug, Clone, Default)]
pub struct AssetLoadRequest {
    data_files: Vec<(String, String)>,
}

impl AssetLoadRequest {
    pub fn add_data_file(
        &mut self,
        tag: impl Into<String>,
        path: impl Into<String>,
    ) -> &mut Self {
        self.data_files.push((tag.into(), path.into()));
        self
    }

    pub fn data_files(&self) -> &[(String, String)] {
        &self.data_files
    }

    pub fn is_empty(&self) -> bool {
        self.data_files.is_empty()
    }
}

/// Bytes read for an [`AssetLoadRequest`], keyed by tag
#[derive(Debug, Default)]
pub struct AssetLoadResult {
    data_files: HashMap<String, BlobData>,
}

impl AssetLoadResult {
    pub fn add_data_file(
        &mut self,
        tag: impl Into<String>,
        data: BlobData,
    ) {
        self.data_files.insert(tag.into(), data);
    }

    pub fn data_file(
        &self,
        tag: &str,
    ) -> Option<&[u8]> {
        self.data_files.get(tag).map(|data| data.as_slice())
    }

    /// Takes ownership of the bytes for `tag`. Avoids a copy when this result holds the only
    /// reference to them.
    pub fn take_data_file(
        &mut self,
        tag: &str,
    ) -> Option<Vec<u8>> {
        self.data_files
            .remove(tag)
            .map(|data| std::sync::Arc::try_unwrap(data).unwrap_or_else(|data| (*data).clone()))
    }

    pub fn len(&self) -> usize {
        self.data_files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data_files.is_empty()
    }
}

/// What a loader can see while filling a request or constructing an asset
pub struct AssetLoadContext<'a> {
    asset_id: AssetId,
    metadata: &'a AssetMetadata,
    dependencies: &'a [(AssetId, AssetRef)],
}

impl<'a> AssetLoadContext<'a> {
    pub fn new(
        asset_id: AssetId,
        metadata: &'a AssetMetadata,
        dependencies: &'a [(AssetId, AssetRef)],
    ) -> Self {
        AssetLoadContext {
            asset_id,
            metadata,
            dependencies,
        }
    }

    pub fn asset_id(&self) -> AssetId {
        self.asset_id
    }

    pub fn metadata(&self) -> &AssetMetadata {
        self.metadata
    }

    /// Deserializes the loader parameters from the metadata
    pub fn params<T: DeserializeOwned>(&self) -> LoaderResult<T> {
        Ok(serde_json::from_value(self.metadata.params.clone())?)
    }

    /// The loaded object of a declared dependency. Only available once dependencies have
    /// finished loading, which is always the case for the loader callbacks.
    pub fn dependency(
        &self,
        asset_id: impl Into<AssetId>,
    ) -> Option<&AssetRef> {
        let asset_id = asset_id.into();
        self.dependencies
            .iter()
            .find(|(id, _)| *id == asset_id)
            .map(|(_, asset)| asset)
    }

    pub fn dependencies(&self) -> impl Iterator<Item = &'a AssetRef> + 'a {
        self.dependencies.iter().map(|(_, asset)| asset)
    }
}

/// Turns raw blobs into a typed asset object.
///
/// Loaders are registered by name and shared between all loads, so they must be stateless or
/// internally synchronized. Both callbacks run on executor threads.
pub trait AssetLoader: Send + Sync {
    fn name(&self) -> &str;

    /// Lists the blobs to read for `asset_id`. An empty request is valid.
    fn fill_request(
        &self,
        context: &AssetLoadContext,
        asset_id: AssetId,
    ) -> LoaderResult<AssetLoadRequest>;

    fn construct(
        &self,
        context: &AssetLoadContext,
        asset_id: AssetId,
        result: AssetLoadResult,
    ) -> LoaderResult<Box<dyn Asset>>;
}
