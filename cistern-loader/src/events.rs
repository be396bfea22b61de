use crate::LoadError;
use cistern_base::AssetId;

/// Emitted once per finished load to every subscriber of
/// [`AssetManager::subscribe_events`](crate::AssetManager::subscribe_events)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetEvent {
    Loaded(AssetId),
    LoadFailed(AssetId, LoadError),
}

impl AssetEvent {
    pub fn asset_id(&self) -> AssetId {
        match self {
            AssetEvent::Loaded(asset_id) => *asset_id,
            AssetEvent::LoadFailed(asset_id, _) => *asset_id,
        }
    }
}
