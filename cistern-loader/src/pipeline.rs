use crate::asset_manager::AssetManagerInner;
use crate::{
    AssetEvent, AssetLibrary, AssetLoadContext, AssetLoadResult, AssetLoader, AssetMetadata,
    AssetRef, BlobData, LoadError, LoadedAsset,
};
use cistern_base::{
    AssetId, Async, AsyncError, AsyncOp, AsyncResult, AsyncState, Task, TaskError,
};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Steps every load goes through, in order. A failure at any step ends the load.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum LoadStage {
    #[default]
    ResolveLibrary,
    ResolveMetadata,
    ResolveLoader,
    AwaitDependencies,
    FillRequest,
    FetchData,
    Construct,
    Publish,
}

impl LoadStage {
    /// The error reported when the stage fails for a reason it does not classify itself
    pub fn failure(
        self,
        asset_id: AssetId,
        reason: String,
    ) -> LoadError {
        match self {
            LoadStage::ResolveLibrary => LoadError::LibraryNotFound(asset_id),
            LoadStage::ResolveMetadata => LoadError::MetadataNotFound(asset_id, reason),
            LoadStage::ResolveLoader => LoadError::LoaderNotFound(asset_id, reason),
            LoadStage::AwaitDependencies => LoadError::DependencyFailed {
                asset: asset_id,
                dependency: None,
            },
            LoadStage::FillRequest => LoadError::RequestFillFailed(asset_id, reason),
            LoadStage::FetchData => LoadError::DataFetchFailed {
                asset: asset_id,
                path: String::default(),
                reason,
            },
            LoadStage::Construct | LoadStage::Publish => {
                LoadError::ConstructionFailed(asset_id, reason)
            }
        }
    }
}

impl fmt::Display for LoadStage {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Clone)]
struct ResolvedLoad {
    library: Arc<dyn AssetLibrary>,
    metadata: Arc<AssetMetadata>,
    loader: Arc<dyn AssetLoader>,
}

struct PendingRead {
    tag: String,
    path: String,
    data: AsyncResult<BlobData>,
}

#[derive(Default)]
struct PendingLoadState {
    stage: LoadStage,
    resolved: Option<ResolvedLoad>,
    // Handles to dependency loads. Holding them keeps the dependency objects alive until this
    // load finishes.
    dependencies: Vec<(AssetId, AsyncResult<AssetRef>)>,
    reads: Vec<PendingRead>,
}

/// Bookkeeping for one in-flight load. Shared by everyone who asked for the asset while it was
/// loading and by the continuation tasks that drive it.
pub(crate) struct PendingLoad {
    asset_id: AssetId,
    // Taken when the load finishes, after which only requesters share the outcome
    op: Mutex<Option<AsyncOp<AssetRef>>>,
    state: Mutex<PendingLoadState>,
    finished: AtomicBool,
    started: Instant,
}

impl PendingLoad {
    pub fn new(
        asset_id: AssetId,
        op: AsyncOp<AssetRef>,
    ) -> Self {
        PendingLoad {
            asset_id,
            op: Mutex::new(Some(op)),
            state: Mutex::new(PendingLoadState::default()),
            finished: AtomicBool::new(false),
            started: Instant::now(),
        }
    }

    pub fn asset_id(&self) -> AssetId {
        self.asset_id
    }

    /// `None` once the load has finished
    pub fn async_result(&self) -> Option<AsyncResult<AssetRef>> {
        self.op.lock().unwrap().clone().map(AsyncResult::from_op)
    }

    fn take_op(&self) -> Option<AsyncOp<AssetRef>> {
        self.op.lock().unwrap().take()
    }

    pub fn stage(&self) -> LoadStage {
        self.state.lock().unwrap().stage
    }

    fn enter_stage(
        &self,
        stage: LoadStage,
    ) {
        log::trace!("Asset {} entering stage {}", self.asset_id, stage);
        self.state.lock().unwrap().stage = stage;
    }

    fn resolved(&self) -> Option<ResolvedLoad> {
        self.state.lock().unwrap().resolved.clone()
    }

    fn loaded_dependencies(&self) -> Option<Vec<(AssetId, AssetRef)>> {
        let state = self.state.lock().unwrap();
        state
            .dependencies
            .iter()
            .map(|(asset_id, result)| result.result().map(|asset| (*asset_id, asset.clone())))
            .collect()
    }

    fn first_failed_dependency(&self) -> Option<AssetId> {
        let state = self.state.lock().unwrap();
        state
            .dependencies
            .iter()
            .find(|(_, result)| result.is_failed())
            .map(|(asset_id, _)| *asset_id)
    }

    fn first_failed_read(&self) -> Option<(String, String)> {
        let state = self.state.lock().unwrap();
        state.reads.iter().find_map(|read| {
            read.data
                .error()
                .map(|error| (read.path.clone(), error.to_string()))
        })
    }

    fn take_reads(&self) -> Vec<PendingRead> {
        std::mem::take(&mut self.state.lock().unwrap().reads)
    }

    // Returns true for the first caller only
    fn mark_finished(&self) -> bool {
        !self.finished.swap(true, Ordering::AcqRel)
    }

    fn take_state(&self) -> PendingLoadState {
        let mut state = self.state.lock().unwrap();
        let stage = state.stage;
        let taken = std::mem::take(&mut *state);
        state.stage = stage;
        taken
    }
}

type StageFn = fn(&Arc<AssetManagerInner>, &Arc<PendingLoad>) -> Result<(), LoadError>;

impl AssetManagerInner {
    pub(crate) fn start_load(
        self: &Arc<Self>,
        pending: &Arc<PendingLoad>,
    ) {
        log::debug!("Start loading asset {}", pending.asset_id());
        self.schedule_stage(
            pending,
            LoadStage::ResolveLibrary,
            Async::completed(),
            Self::resolve,
        );
    }

    // Runs `stage_fn` on the executor once `depends_on` succeeds. Any way the task can fail ends
    // the load with an error attributed to the stage.
    fn schedule_stage(
        self: &Arc<Self>,
        pending: &Arc<PendingLoad>,
        stage: LoadStage,
        depends_on: Async,
        stage_fn: StageFn,
    ) {
        let task_name = format!("{} {}", stage, pending.asset_id());
        let inner = self.clone();
        let task_pending = pending.clone();
        let task = Task::new(task_name, move |_context| {
            task_pending.enter_stage(stage);
            if let Err(error) = stage_fn(&inner, &task_pending) {
                inner.finish_load(&task_pending, Err(error));
            }
            Ok(())
        })
        .schedule(&self.executor, depends_on);

        let inner = self.clone();
        let pending = pending.clone();
        task.add_on_completion(move |outcome| {
            if let Err(error) = outcome {
                let load_error = inner.classify_task_failure(&pending, stage, error);
                inner.finish_load(&pending, Err(load_error));
            }
        });
    }

    fn classify_task_failure(
        &self,
        pending: &PendingLoad,
        stage: LoadStage,
        error: &AsyncError,
    ) -> LoadError {
        let asset_id = pending.asset_id();
        match (error.downcast_ref::<TaskError>(), stage) {
            (Some(TaskError::PredecessorFailed(_)), LoadStage::FillRequest) => {
                LoadError::DependencyFailed {
                    asset: asset_id,
                    dependency: pending.first_failed_dependency(),
                }
            }
            (Some(TaskError::PredecessorFailed(_)), LoadStage::Construct) => {
                match pending.first_failed_read() {
                    Some((path, reason)) => LoadError::DataFetchFailed {
                        asset: asset_id,
                        path,
                        reason,
                    },
                    None => LoadStage::FetchData.failure(asset_id, error.to_string()),
                }
            }
            (Some(TaskError::PredecessorFailed(_)), _) => stage.failure(asset_id, error.to_string()),
            _ => pending.stage().failure(asset_id, error.to_string()),
        }
    }

    // Library, metadata and loader lookup, then kicks off dependency loads
    fn resolve(
        self: &Arc<Self>,
        pending: &Arc<PendingLoad>,
    ) -> Result<(), LoadError> {
        let asset_id = pending.asset_id();

        let library = self
            .find_library(asset_id)
            .ok_or(LoadError::LibraryNotFound(asset_id))?;

        pending.enter_stage(LoadStage::ResolveMetadata);
        let metadata = library
            .find_metadata(asset_id)
            .map_err(|e| LoadError::MetadataNotFound(asset_id, e.to_string()))?;

        pending.enter_stage(LoadStage::ResolveLoader);
        let loader = self
            .find_loader(&metadata.loader)
            .ok_or_else(|| LoadError::LoaderNotFound(asset_id, metadata.loader.clone()))?;

        pending.enter_stage(LoadStage::AwaitDependencies);
        if metadata.dependencies.contains(&asset_id) {
            log::warn!("Asset {} lists itself as a dependency", asset_id);
            return Err(LoadError::DependencyFailed {
                asset: asset_id,
                dependency: Some(asset_id),
            });
        }

        log::trace!(
            "Asset {} uses loader {} from library {} with dependencies {:?}",
            asset_id,
            loader.name(),
            library.name(),
            metadata.dependencies
        );

        let dependencies: Vec<_> = metadata
            .dependencies
            .iter()
            .map(|&dependency| (dependency, self.load_async(dependency)))
            .collect();
        let depends_on = Async::join(dependencies.iter().map(|(_, result)| result.as_async()));

        {
            let mut state = pending.state.lock().unwrap();
            state.resolved = Some(ResolvedLoad {
                library,
                metadata: Arc::new(metadata),
                loader,
            });
            state.dependencies = dependencies;
        }

        self.schedule_stage(pending, LoadStage::FillRequest, depends_on, Self::fill_request);
        Ok(())
    }

    // Asks the loader which blobs it needs and starts reading them
    fn fill_request(
        self: &Arc<Self>,
        pending: &Arc<PendingLoad>,
    ) -> Result<(), LoadError> {
        let asset_id = pending.asset_id();
        let resolved = pending
            .resolved()
            .ok_or_else(|| LoadStage::FillRequest.failure(asset_id, "load was never resolved".into()))?;
        let dependencies = pending.loaded_dependencies().ok_or(LoadError::DependencyFailed {
            asset: asset_id,
            dependency: None,
        })?;

        let request = {
            profiling::scope!("AssetLoader::fill_request");
            let context = AssetLoadContext::new(asset_id, &resolved.metadata, &dependencies);
            resolved
                .loader
                .fill_request(&context, asset_id)
                .map_err(|e| LoadError::RequestFillFailed(asset_id, e.to_string()))?
        };
        // No strong references to dependencies may outlive this task
        drop(dependencies);

        pending.enter_stage(LoadStage::FetchData);
        let mut reads = Vec::with_capacity(request.data_files().len());
        for (tag, path) in request.data_files() {
            let blob_info = resolved.library.find_blob_info(path).map_err(|e| {
                LoadError::DataFetchFailed {
                    asset: asset_id,
                    path: path.clone(),
                    reason: e.to_string(),
                }
            })?;

            log::trace!(
                "Asset {} reading {} ({} bytes) as {}",
                asset_id,
                path,
                blob_info.size,
                tag
            );
            let buffer = vec![0u8; blob_info.size];
            reads.push(PendingRead {
                tag: tag.clone(),
                path: path.clone(),
                data: resolved.library.read_blob(path, buffer),
            });
        }

        let depends_on = Async::join(reads.iter().map(|read| read.data.as_async()));
        pending.state.lock().unwrap().reads = reads;

        self.schedule_stage(pending, LoadStage::Construct, depends_on, Self::construct);
        Ok(())
    }

    // Hands the blobs to the loader and publishes the object it builds
    fn construct(
        self: &Arc<Self>,
        pending: &Arc<PendingLoad>,
    ) -> Result<(), LoadError> {
        let asset_id = pending.asset_id();
        let resolved = pending
            .resolved()
            .ok_or_else(|| LoadStage::Construct.failure(asset_id, "load was never resolved".into()))?;
        let dependencies = pending.loaded_dependencies().ok_or(LoadError::DependencyFailed {
            asset: asset_id,
            dependency: None,
        })?;

        let mut load_result = AssetLoadResult::default();
        for read in pending.take_reads() {
            match read.data.result() {
                Some(data) => load_result.add_data_file(read.tag, data.clone()),
                None => {
                    return Err(LoadError::DataFetchFailed {
                        asset: asset_id,
                        path: read.path,
                        reason: read
                            .data
                            .error()
                            .map(|error| error.to_string())
                            .unwrap_or_default(),
                    })
                }
            }
        }

        let construct_start = Instant::now();
        let object = {
            profiling::scope!("AssetLoader::construct");
            let context = AssetLoadContext::new(asset_id, &resolved.metadata, &dependencies);
            resolved
                .loader
                .construct(&context, asset_id, load_result)
                .map_err(|e| LoadError::ConstructionFailed(asset_id, e.to_string()))?
        };
        drop(dependencies);
        log::trace!(
            "Constructed asset {} in {} sec",
            asset_id,
            construct_start.elapsed().as_secs_f32()
        );

        pending.enter_stage(LoadStage::Publish);
        let asset = Arc::new(LoadedAsset::new(
            asset_id,
            object,
            Some(self.release_hook.clone()),
        ));
        self.finish_load(pending, Ok(asset));
        Ok(())
    }

    // Terminal step, runs once per load no matter how many ways it fails
    pub(crate) fn finish_load(
        self: &Arc<Self>,
        pending: &Arc<PendingLoad>,
        outcome: Result<AssetRef, LoadError>,
    ) {
        if !pending.mark_finished() {
            log::trace!("Asset {} already finished loading", pending.asset_id());
            return;
        }

        let asset_id = pending.asset_id();
        let op = {
            let mut cache = self.cache.lock().unwrap();
            match &outcome {
                Ok(asset) => cache.publish(pending, asset),
                Err(_) => cache.end_load(pending),
            }

            // Taken in the same critical section that retires the load, so no requester can
            // find the load without also getting a handle to its outcome
            pending.take_op()
        };

        // Dependency handles must be gone before requesters are woken
        let stage = pending.take_state().stage;

        let Some(op) = op else {
            log::error!("Asset {} finished without a pending outcome", asset_id);
            return;
        };

        match outcome {
            Ok(asset) => {
                log::info!(
                    "Loaded asset {} in {} sec",
                    asset_id,
                    pending.started.elapsed().as_secs_f32()
                );
                AsyncState::set_result_and_release(op, asset);
                self.send_event(AssetEvent::Loaded(asset_id));
            }
            Err(error) => {
                log::error!(
                    "Failed to load asset {} at stage {}: {}",
                    asset_id,
                    stage,
                    error
                );
                AsyncState::set_failed_and_release(op, AsyncError::new(error.clone()));
                self.send_event(AssetEvent::LoadFailed(asset_id, error));
            }
        }
    }
}
