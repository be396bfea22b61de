use cistern_base::AssetId;
use std::sync::Arc;

/// Why a load failed. Every variant names the asset whose load failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    // No registered library claims the asset
    LibraryNotFound(AssetId),
    MetadataNotFound(AssetId, String),
    // The loader named by the metadata is not registered
    LoaderNotFound(AssetId, String),
    DependencyFailed {
        asset: AssetId,
        dependency: Option<AssetId>,
    },
    RequestFillFailed(AssetId, String),
    DataFetchFailed {
        asset: AssetId,
        path: String,
        reason: String,
    },
    ConstructionFailed(AssetId, String),
}

impl LoadError {
    pub fn asset_id(&self) -> AssetId {
        match *self {
            LoadError::LibraryNotFound(asset) => asset,
            LoadError::MetadataNotFound(asset, _) => asset,
            LoadError::LoaderNotFound(asset, _) => asset,
            LoadError::DependencyFailed { asset, .. } => asset,
            LoadError::RequestFillFailed(asset, _) => asset,
            LoadError::DataFetchFailed { asset, .. } => asset,
            LoadError::ConstructionFailed(asset, _) => asset,
        }
    }
}

impl std::error::Error for LoadError {}

impl core::fmt::Display for LoadError {
    fn fmt(
        &self,
        fmt: &mut core::fmt::Formatter,
    ) -> core::fmt::Result {
        match self {
            LoadError::LibraryNotFound(asset) => {
                write!(fmt, "no library provides asset {}", asset)
            }
            LoadError::MetadataNotFound(asset, reason) => {
                write!(fmt, "failed to read metadata of asset {}: {}", asset, reason)
            }
            LoadError::LoaderNotFound(asset, loader) => {
                write!(fmt, "no loader {} registered for asset {}", loader, asset)
            }
            LoadError::DependencyFailed {
                asset,
                dependency: Some(dependency),
            } => write!(fmt, "dependency {} of asset {} failed to load", dependency, asset),
            LoadError::DependencyFailed {
                asset,
                dependency: None,
            } => write!(fmt, "a dependency of asset {} failed to load", asset),
            LoadError::RequestFillFailed(asset, reason) => {
                write!(fmt, "failed to fill load request of asset {}: {}", asset, reason)
            }
            LoadError::DataFetchFailed {
                asset,
                path,
                reason,
            } => write!(fmt, "failed to read {} for asset {}: {}", path, asset, reason),
            LoadError::ConstructionFailed(asset, reason) => {
                write!(fmt, "failed to construct asset {}: {}", asset, reason)
            }
        }
    }
}

/// Failures reported by an [`AssetLibrary`](crate::AssetLibrary)
#[derive(Debug, Clone)]
pub enum LibraryError {
    NotFound(String),
    IoError(Arc<std::io::Error>),
    JsonError(Arc<serde_json::Error>),
}

impl std::error::Error for LibraryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match *self {
            LibraryError::NotFound(_) => None,
            LibraryError::IoError(ref e) => Some(&**e),
            LibraryError::JsonError(ref e) => Some(&**e),
        }
    }
}

impl core::fmt::Display for LibraryError {
    fn fmt(
        &self,
        fmt: &mut core::fmt::Formatter,
    ) -> core::fmt::Result {
        match *self {
            LibraryError::NotFound(ref name) => write!(fmt, "{} not found", name),
            LibraryError::IoError(ref e) => write!(fmt, "{}", e),
            LibraryError::JsonError(ref e) => write!(fmt, "{}", e),
        }
    }
}

impl From<std::io::Error> for LibraryError {
    fn from(error: std::io::Error) -> Self {
        LibraryError::IoError(Arc::new(error))
    }
}

impl From<serde_json::Error> for LibraryError {
    fn from(error: serde_json::Error) -> Self {
        LibraryError::JsonError(Arc::new(error))
    }
}

pub type LibraryResult<T> = Result<T, LibraryError>;

/// Error type returned by loader callbacks
pub type LoaderError = Box<dyn std::error::Error + Send + Sync>;

pub type LoaderResult<T> = Result<T, LoaderError>;
