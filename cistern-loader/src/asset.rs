use cistern_base::AssetId;
use downcast_rs::Downcast;
use std::fmt;
use std::sync::Arc;

/// Implemented by every object a loader can construct. Objects are shared between threads once
/// published, so they must be `Send + Sync`.
pub trait Asset: Downcast + Send + Sync {
    fn asset_type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

downcast_rs::impl_downcast!(Asset);

/// Invoked exactly once, when the last strong reference to a loaded asset goes away
pub type ReleaseHook = Arc<dyn Fn(&LoadedAsset) + Send + Sync>;

/// A constructed asset object together with the id it was loaded for.
///
/// Published objects are handed out as [`AssetRef`]s. The cache only keeps a weak reference, so
/// the object lives exactly as long as some caller holds on to it.
pub struct LoadedAsset {
    asset_id: AssetId,
    object: Box<dyn Asset>,
    release_hook: Option<ReleaseHook>,
}

pub type AssetRef = Arc<LoadedAsset>;

impl LoadedAsset {
    pub fn new(
        asset_id: AssetId,
        object: Box<dyn Asset>,
        release_hook: Option<ReleaseHook>,
    ) -> Self {
        LoadedAsset {
            asset_id,
            object,
            release_hook,
        }
    }

    pub fn asset_id(&self) -> AssetId {
        self.asset_id
    }

    pub fn object(&self) -> &dyn Asset {
        &*self.object
    }

    pub fn get<T: Asset>(&self) -> Option<&T> {
        self.object.downcast_ref::<T>()
    }

    pub fn is<T: Asset>(&self) -> bool {
        self.object.is::<T>()
    }
}

impl Drop for LoadedAsset {
    fn drop(&mut self) {
        if let Some(release_hook) = self.release_hook.take() {
            (release_hook)(self);
        }
    }
}

impl fmt::Debug for LoadedAsset {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("LoadedAsset")
            .field("asset_id", &self.asset_id)
            .field("type", &self.object.asset_type_name())
            .finish()
    }
}
