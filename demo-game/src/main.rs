mod example_assets;

use cistern::loader::{AssetEvent, AssetManager, AssetManagerConfig, FileSystemLibrary};
use example_assets::{Material, Model, Texture};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub fn data_source_path() -> PathBuf {
    PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/data"))
}

fn main() {
    // Setup logging
    env_logger::Builder::default()
        .write_style(env_logger::WriteStyle::Always)
        .filter_level(log::LevelFilter::Debug)
        .init();
    profiling::register_thread!("Main Thread");

    let config_path = data_source_path().join("cistern.json");
    let config = match AssetManagerConfig::load_from_file(&config_path) {
        Ok(config) => config,
        Err(error) => {
            log::warn!("Using default config, could not read {:?}: {}", config_path, error);
            AssetManagerConfig::default()
        }
    };

    let library = FileSystemLibrary::new(data_source_path(), config.io_thread_count).unwrap();
    let asset_manager = AssetManager::from_config(config).unwrap();
    asset_manager.add_library(Arc::new(library));
    let events = asset_manager.subscribe_events();

    // Both requests share one load, and the model pulls in its material and texture
    let model_request = asset_manager.load_async_with_callback("model:cube", |outcome| {
        if let Ok(model) = outcome {
            println!("model:cube ready on {:?}", std::thread::current().name());
            println!("  is model: {}", model.is::<Model>());
        }
    });
    let second_request = asset_manager.load_async("model:cube");
    let broken_request = asset_manager.load_async("model:broken");

    let model = model_request.wait().unwrap();
    assert!(Arc::ptr_eq(&model, &second_request.wait().unwrap()));
    if let Err(error) = broken_request.wait() {
        println!("model:broken failed as expected: {}", error);
    }

    if let Some(model_data) = model.get::<Model>() {
        println!("model:cube has {} vertices", model_data.positions.len());
        if let Some(material) = model_data.material.get::<Material>() {
            println!(
                "  material {} base color {:?} roughness {}",
                model_data.material.asset_id(),
                material.base_color,
                material.roughness
            );
            if let Some(texture) = material.albedo.get::<Texture>() {
                println!(
                    "  texture {} is {}x{} ({} bytes)",
                    material.albedo.asset_id(),
                    texture.width,
                    texture.height,
                    texture.rgba.len()
                );
            }
        }
    }

    while let Ok(event) = events.recv_timeout(Duration::from_millis(100)) {
        match event {
            AssetEvent::Loaded(asset_id) => println!("event: loaded {}", asset_id),
            AssetEvent::LoadFailed(asset_id, error) => {
                println!("event: failed {}: {}", asset_id, error)
            }
        }
    }

    println!("{} assets cached", asset_manager.cached_count());
    drop(second_request);
    drop(model_request);
    drop(model);
    println!(
        "{} assets cached after releasing the model",
        asset_manager.cached_count()
    );
}
