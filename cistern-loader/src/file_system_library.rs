use crate::{AssetLibrary, AssetMetadata, BlobData, BlobInfo, LibraryError, LibraryResult};
use cistern_base::hashing::HashMap;
use cistern_base::{AssetId, AsyncError, AsyncOp, AsyncResult, AsyncState};
use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;

/// Extension of the metadata files scanned by [`FileSystemLibrary`]
pub const META_FILE_EXTENSION: &str = "meta";

/// Contents of a `.meta` file. Blob paths referenced by loaders are relative to the library root.
///
/// ```json
/// {
///     "id": "texture:white",
///     "loader": "texture",
///     "dependencies": [],
///     "params": { "width": 2, "height": 2 }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetMetaFile {
    pub id: AssetId,
    #[serde(flatten)]
    pub metadata: AssetMetadata,
}

struct DiskIoRequest {
    path: PathBuf,
    buffer: Vec<u8>,
    op: AsyncOp<BlobData>,
}

fn read_blob_from_disk(
    path: &Path,
    buffer: &mut Vec<u8>,
) -> std::io::Result<()> {
    profiling::scope!("std::fs::File::read_exact");
    let mut reader = std::fs::File::open(path)?;
    reader.read_exact(buffer)
}

// Thread that takes reads out of the request channel and ends when the finish channel is signalled
struct DiskIoWorkerThread {
    finish_tx: Sender<()>,
    join_handle: Option<JoinHandle<()>>,
}

impl DiskIoWorkerThread {
    fn new(
        request_rx: Receiver<DiskIoRequest>,
        active_request_count: Arc<AtomicUsize>,
        thread_index: usize,
    ) -> std::io::Result<Self> {
        let (finish_tx, finish_rx) = crossbeam_channel::bounded(1);
        let join_handle = std::thread::Builder::new()
            .name(format!("IO Thread {}", thread_index))
            .spawn(move || {
                profiling::register_thread!(&format!("DiskIoWorkerThread {}", thread_index));
                loop {
                    crossbeam_channel::select! {
                        recv(request_rx) -> msg => {
                            let Ok(mut msg) = msg else {
                                return;
                            };

                            profiling::scope!("DiskIoRequest");
                            log::trace!("Start read {:?}", msg.path);
                            match read_blob_from_disk(&msg.path, &mut msg.buffer) {
                                Ok(()) => {
                                    msg.op.set_result(Arc::new(msg.buffer));
                                }
                                Err(error) => {
                                    log::warn!("Failed to read {:?}: {}", msg.path, error);
                                    msg.op.set_failed(AsyncError::new(LibraryError::from(error)));
                                }
                            }
                            active_request_count.fetch_sub(1, Ordering::Release);
                        },
                        recv(finish_rx) -> _msg => {
                            return;
                        }
                    }
                }
            })?;

        Ok(DiskIoWorkerThread {
            finish_tx,
            join_handle: Some(join_handle),
        })
    }
}

// Spans N threads, proxies reads to them, and stops the threads when the pool is dropped
struct DiskIoThreadPool {
    worker_threads: Vec<DiskIoWorkerThread>,
    request_tx: Sender<DiskIoRequest>,
    active_request_count: Arc<AtomicUsize>,
}

impl DiskIoThreadPool {
    fn new(max_requests_in_flight: usize) -> std::io::Result<Self> {
        let (request_tx, request_rx) = crossbeam_channel::unbounded::<DiskIoRequest>();
        let active_request_count = Arc::new(AtomicUsize::new(0));

        let mut worker_threads = Vec::with_capacity(max_requests_in_flight);
        for thread_index in 0..max_requests_in_flight.max(1) {
            let worker = DiskIoWorkerThread::new(
                request_rx.clone(),
                active_request_count.clone(),
                thread_index,
            )?;
            worker_threads.push(worker);
        }

        Ok(DiskIoThreadPool {
            worker_threads,
            request_tx,
            active_request_count,
        })
    }

    fn active_request_count(&self) -> usize {
        self.active_request_count.load(Ordering::Acquire)
    }

    fn add_request(
        &self,
        request: DiskIoRequest,
    ) {
        self.active_request_count.fetch_add(1, Ordering::Release);
        if let Err(error) = self.request_tx.send(request) {
            self.active_request_count.fetch_sub(1, Ordering::Release);
            let request = error.into_inner();
            request.op.set_failed(AsyncError::new(LibraryError::NotFound(
                "disk IO threads are not running".to_string(),
            )));
        }
    }
}

impl Drop for DiskIoThreadPool {
    fn drop(&mut self) {
        for worker_thread in &self.worker_threads {
            let _ = worker_thread.finish_tx.send(());
        }

        for worker_thread in &mut self.worker_threads {
            if let Some(join_handle) = worker_thread.join_handle.take() {
                if join_handle.join().is_err() {
                    log::error!("Disk IO thread panicked");
                }
            }
        }
    }
}

/// Serves assets described by `.meta` JSON files found under a root directory. Blobs are plain
/// files under the same root, read on a dedicated pool of IO threads.
pub struct FileSystemLibrary {
    name: String,
    root_path: PathBuf,
    // asset id -> path of its .meta file
    manifest: RwLock<HashMap<AssetId, PathBuf>>,
    io_thread_pool: DiskIoThreadPool,
}

impl FileSystemLibrary {
    pub fn new<P: Into<PathBuf>>(
        root_path: P,
        io_thread_count: usize,
    ) -> LibraryResult<Self> {
        let root_path = root_path.into();
        if !root_path.is_dir() {
            return Err(LibraryError::NotFound(format!(
                "library root {}",
                root_path.display()
            )));
        }

        let library = FileSystemLibrary {
            name: format!("fs:{}", root_path.display()),
            manifest: RwLock::new(HashMap::default()),
            io_thread_pool: DiskIoThreadPool::new(io_thread_count)?,
            root_path,
        };
        library.rescan()?;
        Ok(library)
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    pub fn asset_count(&self) -> usize {
        self.manifest.read().unwrap().len()
    }

    pub fn pending_read_count(&self) -> usize {
        self.io_thread_pool.active_request_count()
    }

    /// Rebuilds the id to metadata file index from the files currently on disk. Returns the
    /// number of assets found.
    pub fn rescan(&self) -> LibraryResult<usize> {
        profiling::scope!("FileSystemLibrary::rescan");
        let pattern = format!("**/*.{}", META_FILE_EXTENSION);
        let walker = globwalk::GlobWalkerBuilder::from_patterns(&self.root_path, &[pattern])
            .file_type(globwalk::FileType::FILE)
            .build()
            .map_err(|e| LibraryError::NotFound(e.to_string()))?;

        let mut manifest = HashMap::default();
        for file in walker {
            let file = match file {
                Ok(file) => file,
                Err(error) => {
                    log::warn!("Skipping unreadable entry in {:?}: {}", self.root_path, error);
                    continue;
                }
            };

            match Self::read_meta_file(file.path()) {
                Ok(meta_file) => {
                    log::trace!("Found asset {} in {:?}", meta_file.id, file.path());
                    if let Some(previous) = manifest.insert(meta_file.id, file.path().to_path_buf())
                    {
                        log::warn!(
                            "Asset {} is described by both {:?} and {:?}",
                            meta_file.id,
                            previous,
                            file.path()
                        );
                    }
                }
                Err(error) => log::warn!("Skipping invalid meta file {:?}: {}", file.path(), error),
            }
        }

        let asset_count = manifest.len();
        log::debug!("Library {} indexed {} assets", self.name, asset_count);
        *self.manifest.write().unwrap() = manifest;
        Ok(asset_count)
    }

    fn read_meta_file(path: &Path) -> LibraryResult<AssetMetaFile> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    fn blob_path(
        &self,
        path: &str,
    ) -> PathBuf {
        self.root_path.join(path)
    }
}

impl AssetLibrary for FileSystemLibrary {
    fn name(&self) -> &str {
        &self.name
    }

    fn has_asset(
        &self,
        asset_id: AssetId,
    ) -> bool {
        self.manifest.read().unwrap().contains_key(&asset_id)
    }

    fn find_metadata(
        &self,
        asset_id: AssetId,
    ) -> LibraryResult<AssetMetadata> {
        let meta_path = self
            .manifest
            .read()
            .unwrap()
            .get(&asset_id)
            .cloned()
            .ok_or_else(|| LibraryError::NotFound(asset_id.to_string()))?;

        let meta_file = Self::read_meta_file(&meta_path)?;
        if meta_file.id != asset_id {
            return Err(LibraryError::NotFound(format!(
                "{} (meta file {:?} now describes {})",
                asset_id, meta_path, meta_file.id
            )));
        }

        Ok(meta_file.metadata)
    }

    fn find_blob_info(
        &self,
        path: &str,
    ) -> LibraryResult<BlobInfo> {
        let metadata = std::fs::metadata(self.blob_path(path))?;
        if !metadata.is_file() {
            return Err(LibraryError::NotFound(path.to_string()));
        }

        Ok(BlobInfo {
            size: metadata.len() as usize,
        })
    }

    fn read_blob(
        &self,
        path: &str,
        buffer: Vec<u8>,
    ) -> AsyncResult<BlobData> {
        let op = AsyncState::new();
        self.io_thread_pool.add_request(DiskIoRequest {
            path: self.blob_path(path),
            buffer,
            op: op.clone(),
        });
        AsyncResult::from_op(op)
    }
}
