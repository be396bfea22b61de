use crate::AssetLoader;
use cistern_base::hashing::HashMap;
use std::sync::Arc;

/// Static registration of a loader type, collected at link time with `inventory`. Use
/// [`register_asset_loader!`](crate::register_asset_loader) rather than building these by hand.
pub struct AssetLoaderRegistration {
    type_name: &'static str,
    factory: fn() -> Box<dyn AssetLoader>,
}

impl AssetLoaderRegistration {
    pub const fn new(
        type_name: &'static str,
        factory: fn() -> Box<dyn AssetLoader>,
    ) -> Self {
        AssetLoaderRegistration { type_name, factory }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn create(&self) -> Box<dyn AssetLoader> {
        (self.factory)()
    }
}

inventory::collect!(AssetLoaderRegistration);

/// Registers a `Default`-constructible [`AssetLoader`] so that
/// [`AssetLoaderRegistryBuilder::discover_loaders`] picks it up.
///
/// ```ignore
/// #[derive(Default)]
/// struct TextureLoader;
///
/// impl AssetLoader for TextureLoader { ... }
///
/// cistern_loader::register_asset_loader!(TextureLoader);
/// ```
#[macro_export]
macro_rules! register_asset_loader {
    ($loader:ty) => {
        const _: () = {
            fn create_asset_loader() -> ::std::boxed::Box<dyn $crate::AssetLoader> {
                ::std::boxed::Box::new(<$loader as ::std::default::Default>::default())
            }

            $crate::inventory::submit! {
                $crate::AssetLoaderRegistration::new(stringify!($loader), create_asset_loader)
            }
        };
    };
}

/// Loaders keyed by the name they report
#[derive(Default, Clone)]
pub struct AssetLoaderRegistry {
    loaders: HashMap<String, Arc<dyn AssetLoader>>,
}

impl AssetLoaderRegistry {
    pub fn builder() -> AssetLoaderRegistryBuilder {
        AssetLoaderRegistryBuilder::default()
    }

    pub fn find_loader(
        &self,
        name: &str,
    ) -> Option<Arc<dyn AssetLoader>> {
        self.loaders.get(name).cloned()
    }

    pub fn contains(
        &self,
        name: &str,
    ) -> bool {
        self.loaders.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.loaders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loaders.is_empty()
    }

    pub fn loader_names(&self) -> impl Iterator<Item = &str> {
        self.loaders.keys().map(|name| name.as_str())
    }

    /// Adds `loader`, replacing any loader previously registered under the same name
    pub fn add_loader(
        &mut self,
        loader: Arc<dyn AssetLoader>,
    ) -> Option<Arc<dyn AssetLoader>> {
        let name = loader.name().to_string();
        let old = self.loaders.insert(name, loader);
        if let Some(old) = &old {
            log::warn!("Replacing previously registered asset loader {}", old.name());
        }
        old
    }

    /// Instantiates every loader registered with `register_asset_loader!` that is not already
    /// present. Returns the number of loaders added.
    pub fn discover_loaders(&mut self) -> usize {
        profiling::scope!("AssetLoaderRegistry::discover_loaders");
        let mut discovered = 0;
        for registration in inventory::iter::<AssetLoaderRegistration> {
            let loader = registration.create();
            if self.loaders.contains_key(loader.name()) {
                log::debug!(
                    "Skipping discovered asset loader {} ({}), name already registered",
                    loader.name(),
                    registration.type_name()
                );
                continue;
            }

            log::debug!(
                "Discovered asset loader {} ({})",
                loader.name(),
                registration.type_name()
            );
            self.loaders
                .insert(loader.name().to_string(), Arc::from(loader));
            discovered += 1;
        }

        discovered
    }
}

#[derive(Default)]
pub struct AssetLoaderRegistryBuilder {
    registry: AssetLoaderRegistry,
}

impl AssetLoaderRegistryBuilder {
    pub fn register_loader<T: AssetLoader + Default + 'static>(&mut self) -> &mut Self {
        self.register_loader_instance(T::default())
    }

    pub fn register_loader_instance<T: AssetLoader + 'static>(
        &mut self,
        loader: T,
    ) -> &mut Self {
        if self.registry.contains(loader.name()) {
            panic!("Multiple asset loaders registered with the name {}", loader.name());
        }

        self.registry.add_loader(Arc::new(loader));
        self
    }

    pub fn discover_loaders(&mut self) -> &mut Self {
        self.registry.discover_loaders();
        self
    }

    pub fn build(self) -> AssetLoaderRegistry {
        self.registry
    }
}
