use crate::*;
use cistern_base::{TaskExecutor, TaskExecutorThreadPool};
use crossbeam_channel::Receiver;
use serde::Deserialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default, Debug)]
struct TestAsset {
    data: Vec<u8>,
    dependencies: Vec<AssetRef>,
}

impl Asset for TestAsset {}

#[derive(Default, Deserialize)]
#[serde(default)]
struct TestParams {
    files: Vec<String>,
    fail_construct: bool,
    panic_construct: bool,
}

// Reads every file listed in its params and concatenates them. Keeps its dependencies alive.
struct TestLoader {
    name: String,
    fill_count: AtomicUsize,
    construct_count: AtomicUsize,
    constructed: Mutex<Vec<AssetId>>,
    gate: Mutex<Option<Receiver<()>>>,
}

impl TestLoader {
    fn named(name: &str) -> Arc<Self> {
        Arc::new(TestLoader {
            name: name.to_string(),
            fill_count: AtomicUsize::new(0),
            construct_count: AtomicUsize::new(0),
            constructed: Mutex::new(Vec::default()),
            gate: Mutex::new(None),
        })
    }

    fn construct_count(&self) -> usize {
        self.construct_count.load(Ordering::SeqCst)
    }
}

impl AssetLoader for TestLoader {
    fn name(&self) -> &str {
        &self.name
    }

    fn fill_request(
        &self,
        context: &AssetLoadContext,
        _asset_id: AssetId,
    ) -> LoaderResult<AssetLoadRequest> {
        self.fill_count.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.recv_timeout(Duration::from_secs(10))?;
        }

        let params: TestParams = context.params()?;
        let mut request = AssetLoadRequest::default();
        for (index, file) in params.files.iter().enumerate() {
            request.add_data_file(format!("file{}", index), file.as_str());
        }
        Ok(request)
    }

    fn construct(
        &self,
        context: &AssetLoadContext,
        asset_id: AssetId,
        result: AssetLoadResult,
    ) -> LoaderResult<Box<dyn Asset>> {
        self.construct_count.fetch_add(1, Ordering::SeqCst);
        let params: TestParams = context.params()?;
        if params.panic_construct {
            panic!("construct panicked for {}", asset_id);
        }
        if params.fail_construct {
            return Err("refusing to construct".into());
        }

        for dependency in &context.metadata().dependencies {
            if context.dependency(*dependency).is_none() {
                return Err(format!("dependency {} not loaded", dependency).into());
            }
        }

        let mut data = Vec::default();
        for index in 0..result.len() {
            data.extend_from_slice(result.data_file(&format!("file{}", index)).unwrap_or_default());
        }

        self.constructed.lock().unwrap().push(asset_id);
        Ok(Box::new(TestAsset {
            data,
            dependencies: context.dependencies().cloned().collect(),
        }))
    }
}

#[derive(Default)]
struct DiscoverableLoader;

impl AssetLoader for DiscoverableLoader {
    fn name(&self) -> &str {
        "discoverable"
    }

    fn fill_request(
        &self,
        _context: &AssetLoadContext,
        _asset_id: AssetId,
    ) -> LoaderResult<AssetLoadRequest> {
        Ok(AssetLoadRequest::default())
    }

    fn construct(
        &self,
        _context: &AssetLoadContext,
        _asset_id: AssetId,
        _result: AssetLoadResult,
    ) -> LoaderResult<Box<dyn Asset>> {
        Ok(Box::new(TestAsset::default()))
    }
}

crate::register_asset_loader!(DiscoverableLoader);

struct TestFixture {
    manager: AssetManager,
    library: Arc<MemoryLibrary>,
    loader: Arc<TestLoader>,
}

impl TestFixture {
    fn new() -> Self {
        let executor: Arc<dyn TaskExecutor> = Arc::new(TaskExecutorThreadPool::new(4).unwrap());
        let manager = AssetManager::new(
            AssetManagerConfig::default(),
            executor,
            AssetLoaderRegistry::default(),
        );

        let library = Arc::new(MemoryLibrary::new("memory"));
        manager.add_library(library.clone());
        let loader = TestLoader::named("test");
        manager.add_loader(loader.clone());

        TestFixture {
            manager,
            library,
            loader,
        }
    }

    fn add_asset(
        &self,
        name: &str,
        dependencies: &[&str],
        files: &[(&str, &[u8])],
    ) {
        let paths: Vec<&str> = files.iter().map(|(path, _)| *path).collect();
        self.add_asset_with_params(name, dependencies, serde_json::json!({ "files": paths }));
        for (path, data) in files {
            self.library.add_blob(*path, *data);
        }
    }

    fn add_asset_with_params(
        &self,
        name: &str,
        dependencies: &[&str],
        params: serde_json::Value,
    ) {
        self.library.add_asset(
            name,
            AssetMetadata {
                loader: "test".to_string(),
                dependencies: dependencies.iter().map(|name| AssetId::from_name(name)).collect(),
                params,
            },
        );
    }

    fn load_error(
        &self,
        name: &str,
    ) -> LoadError {
        let error = self.manager.load_async(name).wait().unwrap_err();
        error.downcast_ref::<LoadError>().unwrap().clone()
    }
}

fn test_data(asset: &AssetRef) -> &[u8] {
    &asset.get::<TestAsset>().unwrap().data
}

#[test]
fn load_returns_constructed_object() {
    let fixture = TestFixture::new();
    fixture.add_asset("texture:white", &[], &[("white.bin", &[1, 2, 3, 4])]);

    let texture = fixture.manager.load("texture:white").unwrap();
    assert_eq!(texture.asset_id(), AssetId::from_name("texture:white"));
    assert_eq!(test_data(&texture), &[1, 2, 3, 4]);
    assert!(texture.is::<TestAsset>());

    let found = fixture.manager.find("texture:white").unwrap();
    assert!(Arc::ptr_eq(&texture, &found));
}

#[test]
fn empty_request_constructs_with_no_data() {
    let fixture = TestFixture::new();
    fixture.add_asset("config:empty", &[], &[]);

    let asset = fixture.manager.load("config:empty").unwrap();
    assert!(test_data(&asset).is_empty());
    assert_eq!(fixture.library.blob_read_count(), 0);
}

#[test]
fn concurrent_requests_share_one_load() {
    let fixture = TestFixture::new();
    fixture.add_asset("mesh:cube", &[], &[("cube.bin", &[9])]);
    let (gate_tx, gate_rx) = crossbeam_channel::unbounded();
    *fixture.loader.gate.lock().unwrap() = Some(gate_rx);

    let first = fixture.manager.load_async("mesh:cube");
    let second = fixture.manager.load_async("mesh:cube");
    assert!(fixture.manager.is_loading("mesh:cube"));
    assert_eq!(fixture.manager.loading_count(), 1);
    assert!(!first.is_completed());

    gate_tx.send(()).unwrap();
    let first = first.wait().unwrap();
    let second = second.wait().unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(fixture.loader.construct_count(), 1);
    assert_eq!(fixture.loader.fill_count.load(Ordering::SeqCst), 1);
    assert_eq!(fixture.library.metadata_request_count(), 1);
    assert_eq!(fixture.manager.loading_count(), 0);
}

#[test]
fn loads_from_many_threads_construct_once() {
    let fixture = TestFixture::new();
    fixture.add_asset("mesh:cube", &[], &[("cube.bin", &[9])]);

    let assets: Vec<AssetRef> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| scope.spawn(|| fixture.manager.load("mesh:cube").unwrap()))
            .collect();
        handles.into_iter().map(|handle| handle.join().unwrap()).collect()
    });

    for asset in &assets {
        assert!(Arc::ptr_eq(asset, &assets[0]));
    }
    assert_eq!(fixture.loader.construct_count(), 1);
}

#[test]
fn cache_hit_completes_immediately_without_io() {
    let fixture = TestFixture::new();
    fixture.add_asset("texture:white", &[], &[("white.bin", &[1])]);
    let texture = fixture.manager.load("texture:white").unwrap();

    let metadata_requests = fixture.library.metadata_request_count();
    let blob_reads = fixture.library.blob_read_count();
    let again = fixture.manager.load_async("texture:white");
    assert_eq!(again.status(), AsyncStatus::Ok);
    assert!(Arc::ptr_eq(again.result().unwrap(), &texture));
    assert_eq!(fixture.library.metadata_request_count(), metadata_requests);
    assert_eq!(fixture.library.blob_read_count(), blob_reads);
    assert_eq!(fixture.loader.construct_count(), 1);
}

#[test]
fn released_asset_is_evicted_and_reloaded() {
    let fixture = TestFixture::new();
    fixture.add_asset("texture:white", &[], &[("white.bin", &[1])]);

    let texture = fixture.manager.load("texture:white").unwrap();
    assert_eq!(fixture.manager.cached_count(), 1);

    drop(texture);
    assert!(fixture.manager.find("texture:white").is_none());
    assert_eq!(fixture.manager.cached_count(), 0);
    assert_eq!(fixture.manager.gc(), 0);

    let texture = fixture.manager.load("texture:white").unwrap();
    assert_eq!(test_data(&texture), &[1]);
    assert_eq!(fixture.loader.construct_count(), 2);
}

#[test]
fn dropping_the_only_reference_evicts_immediately() {
    let fixture = TestFixture::new();
    fixture.add_asset("texture:white", &[], &[("white.bin", &[1])]);
    fixture.add_asset("material:default", &["texture:white"], &[]);

    let mut still_cached = 0;
    for _ in 0..500 {
        let material = fixture.manager.load("material:default").unwrap();
        drop(material);
        if fixture.manager.find("material:default").is_some()
            || fixture.manager.find("texture:white").is_some()
        {
            still_cached += 1;
        }
    }

    assert_eq!(still_cached, 0);
    assert_eq!(fixture.loader.construct_count(), 1000);
}

#[test]
fn dependencies_are_published_before_dependents_construct() {
    let fixture = TestFixture::new();
    fixture.add_asset("texture:white", &[], &[("white.bin", &[1])]);
    fixture.add_asset("material:default", &["texture:white"], &[("default.mat", &[2])]);
    fixture.add_asset("model:cube", &["material:default"], &[("cube.mesh", &[3])]);

    let model = fixture.manager.load("model:cube").unwrap();
    assert_eq!(
        *fixture.loader.constructed.lock().unwrap(),
        vec![
            AssetId::from_name("texture:white"),
            AssetId::from_name("material:default"),
            AssetId::from_name("model:cube"),
        ]
    );

    let material = fixture.manager.find("material:default").unwrap();
    assert!(Arc::ptr_eq(
        &model.get::<TestAsset>().unwrap().dependencies[0],
        &material
    ));
    assert!(fixture.manager.find("texture:white").is_some());

    // The chain is only kept alive by the model
    drop(material);
    drop(model);
    assert!(fixture.manager.find("model:cube").is_none());
    assert!(fixture.manager.find("material:default").is_none());
    assert!(fixture.manager.find("texture:white").is_none());
}

#[test]
fn shared_dependency_loads_once() {
    let fixture = TestFixture::new();
    fixture.add_asset("texture:white", &[], &[("white.bin", &[1])]);
    fixture.add_asset("material:a", &["texture:white"], &[]);
    fixture.add_asset("material:b", &["texture:white"], &[]);

    let a = fixture.manager.load_async("material:a");
    let b = fixture.manager.load_async("material:b");
    let a = a.wait().unwrap();
    let b = b.wait().unwrap();
    assert!(Arc::ptr_eq(
        &a.get::<TestAsset>().unwrap().dependencies[0],
        &b.get::<TestAsset>().unwrap().dependencies[0]
    ));
    assert_eq!(fixture.loader.construct_count(), 3);
}

#[test]
fn failed_dependency_fails_dependent() {
    let fixture = TestFixture::new();
    fixture.add_asset("material:default", &["texture:missing"], &[("default.mat", &[2])]);

    assert_eq!(
        fixture.load_error("material:default"),
        LoadError::DependencyFailed {
            asset: AssetId::from_name("material:default"),
            dependency: Some(AssetId::from_name("texture:missing")),
        }
    );
    assert!(fixture.manager.find("material:default").is_none());
    assert_eq!(fixture.manager.loading_count(), 0);
    assert_eq!(fixture.loader.construct_count(), 0);
}

#[test]
fn failure_propagates_through_a_dependency_chain() {
    let fixture = TestFixture::new();
    fixture.add_asset_with_params("chain:texture", &[], serde_json::json!({ "fail_construct": true }));
    fixture.add_asset("chain:material", &["chain:texture"], &[]);
    fixture.add_asset("chain:model", &["chain:material"], &[]);

    let texture = AssetId::from_name("chain:texture");
    let material = AssetId::from_name("chain:material");
    let model = AssetId::from_name("chain:model");
    assert_eq!(
        fixture.load_error("chain:model"),
        LoadError::DependencyFailed {
            asset: model,
            dependency: Some(material),
        }
    );
    assert_eq!(
        fixture.load_error("chain:material"),
        LoadError::DependencyFailed {
            asset: material,
            dependency: Some(texture),
        }
    );
    assert!(matches!(
        fixture.load_error("chain:texture"),
        LoadError::ConstructionFailed(..)
    ));

    for asset_id in [texture, material, model] {
        assert!(fixture.manager.find(asset_id).is_none());
    }
    assert_eq!(fixture.manager.loading_count(), 0);
    assert!(fixture.loader.constructed.lock().unwrap().is_empty());
}

#[test]
fn unreadable_metadata_fails_dependents() {
    let root = tempfile::tempdir().unwrap();
    let write_meta = |file: &str, id: &str, dependencies: &[&str]| {
        let meta = serde_json::json!({
            "id": id,
            "loader": "test",
            "dependencies": dependencies,
        });
        std::fs::write(root.path().join(file), meta.to_string()).unwrap();
    };
    write_meta("white.meta", "texture:white", &[]);
    write_meta("default.meta", "material:default", &["texture:white"]);
    write_meta("cube.meta", "model:cube", &["material:default"]);

    let library = Arc::new(FileSystemLibrary::new(root.path(), 1).unwrap());
    assert_eq!(library.asset_count(), 3);
    let fixture = TestFixture::new();
    fixture.manager.add_library(library);

    // The library indexed the file, but it no longer parses
    std::fs::write(root.path().join("default.meta"), "{ not json").unwrap();

    let material = AssetId::from_name("material:default");
    let model = AssetId::from_name("model:cube");
    assert_eq!(
        fixture.load_error("model:cube"),
        LoadError::DependencyFailed {
            asset: model,
            dependency: Some(material),
        }
    );
    assert!(matches!(
        fixture.load_error("material:default"),
        LoadError::MetadataNotFound(asset_id, _) if asset_id == material
    ));
    assert!(fixture.manager.find(model).is_none());
    assert!(fixture.manager.find(material).is_none());
    assert_eq!(fixture.manager.loading_count(), 0);
    assert_eq!(fixture.loader.construct_count(), 0);
}

#[test]
fn failure_is_not_cached_and_can_be_retried() {
    let fixture = TestFixture::new();
    fixture.library.add_asset(
        "shader:late",
        AssetMetadata {
            loader: "late".to_string(),
            dependencies: Vec::default(),
            params: serde_json::json!({}),
        },
    );

    assert_eq!(
        fixture.load_error("shader:late"),
        LoadError::LoaderNotFound(AssetId::from_name("shader:late"), "late".to_string())
    );
    assert!(!fixture.manager.is_loading("shader:late"));

    fixture.manager.add_loader(TestLoader::named("late"));
    assert!(fixture.manager.load("shader:late").is_some());
}

#[test]
fn stage_failures_are_reported() {
    let fixture = TestFixture::new();
    fixture.add_asset_with_params("bad:params", &[], serde_json::json!({ "files": 5 }));
    fixture.add_asset_with_params("bad:blob", &[], serde_json::json!({ "files": ["nowhere.bin"] }));
    fixture.add_asset_with_params("bad:construct", &[], serde_json::json!({ "fail_construct": true }));
    fixture.add_asset_with_params("bad:panic", &[], serde_json::json!({ "panic_construct": true }));

    let missing = AssetId::from_name("bad:missing");
    assert_eq!(fixture.load_error("bad:missing"), LoadError::LibraryNotFound(missing));
    assert!(matches!(
        fixture.load_error("bad:params"),
        LoadError::RequestFillFailed(..)
    ));
    assert!(matches!(
        fixture.load_error("bad:blob"),
        LoadError::DataFetchFailed { path, .. } if path == "nowhere.bin"
    ));
    assert!(matches!(
        fixture.load_error("bad:construct"),
        LoadError::ConstructionFailed(..)
    ));
    assert!(matches!(
        fixture.load_error("bad:panic"),
        LoadError::ConstructionFailed(..)
    ));
    assert_eq!(fixture.manager.cached_count(), 0);
    assert_eq!(fixture.manager.loading_count(), 0);
}

#[test]
fn self_dependency_fails() {
    let fixture = TestFixture::new();
    fixture.add_asset("loop:self", &["loop:self"], &[]);
    let asset_id = AssetId::from_name("loop:self");
    assert_eq!(
        fixture.load_error("loop:self"),
        LoadError::DependencyFailed {
            asset: asset_id,
            dependency: Some(asset_id),
        }
    );
}

#[test]
fn first_library_with_asset_wins() {
    let fixture = TestFixture::new();
    fixture.add_asset("texture:white", &[], &[("white.bin", &[1])]);

    let overrides = Arc::new(MemoryLibrary::new("overrides"));
    overrides.add_asset(
        "texture:white",
        AssetMetadata {
            loader: "test".to_string(),
            dependencies: Vec::default(),
            params: serde_json::json!({ "files": ["other.bin"] }),
        },
    );
    overrides.add_blob("other.bin", vec![2]);
    fixture.manager.add_library(overrides.clone());

    let library = fixture.manager.find_library("texture:white").unwrap();
    assert_eq!(library.name(), "memory");
    assert_eq!(test_data(&fixture.manager.load("texture:white").unwrap()), &[1]);
    assert_eq!(overrides.metadata_request_count(), 0);
}

#[test]
fn lookups() {
    let fixture = TestFixture::new();
    fixture.add_asset("texture:white", &["texture:base"], &[]);

    let metadata = fixture.manager.find_metadata("texture:white").unwrap();
    assert_eq!(metadata.loader, "test");
    assert_eq!(metadata.dependencies, vec![AssetId::from_name("texture:base")]);
    assert!(fixture.manager.find_metadata("texture:none").is_none());
    assert!(fixture.manager.find_library("texture:none").is_none());
    assert!(fixture.manager.find_loader("test").is_some());
    assert!(fixture.manager.find_loader("none").is_none());
}

#[test]
fn clear_keeps_live_objects_but_forgets_them() {
    let fixture = TestFixture::new();
    fixture.add_asset("texture:white", &[], &[("white.bin", &[1])]);

    let old = fixture.manager.load("texture:white").unwrap();
    fixture.manager.clear();
    assert!(fixture.manager.find("texture:white").is_none());
    assert_eq!(test_data(&old), &[1]);

    let new = fixture.manager.load("texture:white").unwrap();
    assert!(!Arc::ptr_eq(&old, &new));
    assert_eq!(fixture.loader.construct_count(), 2);

    // Releasing the forgotten object must not evict its replacement
    drop(old);
    let found = fixture.manager.find("texture:white").unwrap();
    assert!(Arc::ptr_eq(&found, &new));
}

#[test]
fn callbacks_and_events() {
    let fixture = TestFixture::new();
    fixture.add_asset("texture:white", &[], &[("white.bin", &[1])]);
    let events = fixture.manager.subscribe_events();

    let (done_tx, done_rx) = crossbeam_channel::bounded(1);
    let texture = fixture
        .manager
        .load_async_with_callback("texture:white", move |outcome| {
            done_tx.send(outcome.map(|asset| asset.asset_id()).ok()).unwrap();
        });
    assert_eq!(
        done_rx.recv_timeout(Duration::from_secs(10)).unwrap(),
        Some(AssetId::from_name("texture:white"))
    );
    assert_eq!(
        events.recv_timeout(Duration::from_secs(10)).unwrap(),
        AssetEvent::Loaded(AssetId::from_name("texture:white"))
    );

    let failed = fixture.manager.load_async("texture:none");
    assert!(failed.wait().is_err());
    match events.recv_timeout(Duration::from_secs(10)).unwrap() {
        AssetEvent::LoadFailed(asset_id, LoadError::LibraryNotFound(_)) => {
            assert_eq!(asset_id, AssetId::from_name("texture:none"))
        }
        event => panic!("unexpected event {:?}", event),
    }

    // A cached asset completes immediately, so the callback runs before returning
    assert!(texture.is_ok());
    let (cached_tx, cached_rx) = crossbeam_channel::bounded(1);
    fixture
        .manager
        .load_async_with_callback("texture:white", move |outcome| {
            cached_tx.send(outcome.is_ok()).unwrap();
        });
    assert_eq!(cached_rx.try_recv(), Ok(true));
}

#[test]
fn discovered_loaders_are_registered() {
    let mut registry = AssetLoaderRegistry::default();
    assert!(registry.discover_loaders() >= 1);
    assert!(registry.find_loader("discoverable").is_some());
    assert_eq!(registry.discover_loaders(), 0);

    let mut builder = AssetLoaderRegistry::builder();
    builder.register_loader::<DiscoverableLoader>();
    let registry = builder.build();
    assert_eq!(registry.loader_names().collect::<Vec<_>>(), vec!["discoverable"]);
}

#[test]
fn file_system_library_loads_meta_files() {
    let root = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(root.path().join("textures")).unwrap();
    std::fs::create_dir_all(root.path().join("materials")).unwrap();
    std::fs::write(
        root.path().join("textures/white.meta"),
        r#"{ "id": "texture:white", "loader": "test", "params": { "files": ["textures/white.bin"] } }"#,
    )
    .unwrap();
    std::fs::write(root.path().join("textures/white.bin"), [7u8, 7, 7]).unwrap();
    std::fs::write(
        root.path().join("materials/default.meta"),
        r#"{ "id": "material:default", "loader": "test", "dependencies": ["texture:white"], "params": { "files": ["materials/default.txt", "missing.bin"] } }"#,
    )
    .unwrap();
    std::fs::write(root.path().join("materials/default.txt"), "shiny").unwrap();
    std::fs::write(root.path().join("broken.meta"), "not json").unwrap();

    let library = Arc::new(FileSystemLibrary::new(root.path(), 2).unwrap());
    assert_eq!(library.asset_count(), 2);
    assert!(library.has_asset(AssetId::from_name("texture:white")));

    let fixture = TestFixture::new();
    fixture.manager.add_library(library.clone());

    let texture = fixture.manager.load("texture:white").unwrap();
    assert_eq!(test_data(&texture), &[7, 7, 7]);

    // missing.bin has no blob on disk
    assert!(matches!(
        fixture.load_error("material:default"),
        LoadError::DataFetchFailed { path, .. } if path == "missing.bin"
    ));

    std::fs::write(root.path().join("missing.bin"), "!").unwrap();
    let material = fixture.manager.load("material:default").unwrap();
    assert_eq!(test_data(&material), b"shiny!");
    assert!(Arc::ptr_eq(
        &material.get::<TestAsset>().unwrap().dependencies[0],
        &texture
    ));
}

#[test]
fn file_system_library_requires_directory() {
    let root = tempfile::tempdir().unwrap();
    let missing = root.path().join("nope");
    assert!(matches!(
        FileSystemLibrary::new(missing, 1),
        Err(LibraryError::NotFound(_))
    ));
}
