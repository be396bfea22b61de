use crate::pipeline::PendingLoad;
use crate::{AssetRef, LoadedAsset};
use cistern_base::hashing::HashMap;
use cistern_base::AssetId;
use std::sync::{Arc, Weak};

// Maps ids to published objects and to loads in flight. Only weak references to published
// objects are kept. The owner must never let a strong reference obtained from here drop while
// the cache lock is held, since that can run the release hook which takes the same lock.
#[derive(Default)]
pub(crate) struct IdentityCache {
    assets: HashMap<AssetId, Weak<LoadedAsset>>,
    loading: HashMap<AssetId, Arc<PendingLoad>>,
}

impl IdentityCache {
    pub fn find(
        &self,
        asset_id: AssetId,
    ) -> Option<AssetRef> {
        self.assets.get(&asset_id).and_then(|asset| asset.upgrade())
    }

    pub fn find_loading(
        &self,
        asset_id: AssetId,
    ) -> Option<&Arc<PendingLoad>> {
        self.loading.get(&asset_id)
    }

    pub fn begin_load(
        &mut self,
        pending: Arc<PendingLoad>,
    ) {
        let old = self.loading.insert(pending.asset_id(), pending);
        debug_assert!(old.is_none());
    }

    // Publishes the object and retires the pending load in one step
    pub fn publish(
        &mut self,
        pending: &Arc<PendingLoad>,
        asset: &AssetRef,
    ) {
        self.end_load(pending);
        self.assets
            .insert(pending.asset_id(), Arc::downgrade(asset));
    }

    pub fn end_load(
        &mut self,
        pending: &Arc<PendingLoad>,
    ) {
        let asset_id = pending.asset_id();
        if self
            .loading
            .get(&asset_id)
            .map_or(false, |current| Arc::ptr_eq(current, pending))
        {
            self.loading.remove(&asset_id);
        }
    }

    /// Removes the entry for a released object, unless the entry has since been replaced by a
    /// newer object for the same id
    pub fn release(
        &mut self,
        asset: &LoadedAsset,
    ) -> bool {
        let asset_id = asset.asset_id();
        let is_current = self
            .assets
            .get(&asset_id)
            .map_or(false, |entry| std::ptr::eq(entry.as_ptr(), asset));
        if is_current {
            self.assets.remove(&asset_id);
        }
        is_current
    }

    pub fn clear(&mut self) -> usize {
        let count = self.assets.len();
        self.assets.clear();
        count
    }

    // Drops entries whose object is gone but whose release hook has not removed them yet
    pub fn remove_expired(&mut self) -> usize {
        let before = self.assets.len();
        self.assets.retain(|_, asset| asset.strong_count() > 0);
        before - self.assets.len()
    }

    pub fn cached_count(&self) -> usize {
        self.assets
            .values()
            .filter(|asset| asset.strong_count() > 0)
            .count()
    }

    pub fn loading_count(&self) -> usize {
        self.loading.len()
    }

    pub fn is_loading(
        &self,
        asset_id: AssetId,
    ) -> bool {
        self.loading.contains_key(&asset_id)
    }
}
