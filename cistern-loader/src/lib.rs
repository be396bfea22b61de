pub use inventory;

mod error;
pub use error::{LibraryError, LibraryResult, LoadError, LoaderError, LoaderResult};

mod config;
pub use config::{AssetManagerConfig, ConfigError};

mod asset;
pub use asset::{Asset, AssetRef, LoadedAsset, ReleaseHook};

mod library;
pub use library::{AssetLibrary, AssetMetadata, BlobData, BlobInfo};

mod memory_library;
pub use memory_library::MemoryLibrary;

mod file_system_library;
pub use file_system_library::{AssetMetaFile, FileSystemLibrary, META_FILE_EXTENSION};

mod loader;
pub use loader::{AssetLoadContext, AssetLoadRequest, AssetLoadResult, AssetLoader};

mod loader_registry;
pub use loader_registry::{
    AssetLoaderRegistration, AssetLoaderRegistry, AssetLoaderRegistryBuilder,
};

mod events;
pub use events::AssetEvent;

mod identity_cache;

mod pipeline;
pub use pipeline::LoadStage;

mod asset_manager;
pub use asset_manager::AssetManager;

pub use cistern_base::{AssetId, AsyncError, AsyncResult, AsyncStatus};

#[cfg(test)]
mod tests;
