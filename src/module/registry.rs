//! Module registry
//!
//! Loads plugin shared objects and tracks every module by its unique name.
//! All mutations are serialized by one lock; lookups clone the entry out so
//! no caller holds the lock while talking to a module.

use super::{Module, ModuleExitFn, ModuleInitFn, MODULE_EXIT_SYMBOL, MODULE_INIT_SYMBOL};
use crate::config::catalog::{Catalog, KEY_PATH};
use crate::error::{Result, SensordError};
use libloading::{Library, Symbol};
use std::ffi::c_void;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// An open plugin library and the module instance it constructed.
///
/// Dropping the last reference destroys the instance through `module_exit`
/// and then closes the library.
pub struct PluginLibrary {
    path: PathBuf,
    instance: *mut c_void,
    exit: ModuleExitFn,
    // Dropped last: the exit function lives inside it.
    _library: Library,
}

// SAFETY: `instance` is only handed back to `module_exit` once, from `drop`,
// and the module it points to is itself `Send + Sync`.
unsafe impl Send for PluginLibrary {}
unsafe impl Sync for PluginLibrary {}

impl PluginLibrary {
    /// Open `path`, resolve both entry points and construct the module
    fn open(path: &Path) -> Result<(Module, Arc<PluginLibrary>)> {
        let library = unsafe { Library::new(path) }.map_err(|e| {
            tracing::error!("Failed to open plugin {}: {}", path.display(), e);
            SensordError::Load(format!("Failed to open {}: {}", path.display(), e))
        })?;

        let init: ModuleInitFn = {
            let symbol: Symbol<ModuleInitFn> =
                unsafe { library.get(MODULE_INIT_SYMBOL) }.map_err(|e| {
                    SensordError::Load(format!(
                        "{} has no module_init entry point: {}",
                        path.display(),
                        e
                    ))
                })?;
            *symbol
        };
        let exit: ModuleExitFn = {
            let symbol: Symbol<ModuleExitFn> =
                unsafe { library.get(MODULE_EXIT_SYMBOL) }.map_err(|e| {
                    SensordError::Load(format!(
                        "{} has no module_exit entry point: {}",
                        path.display(),
                        e
                    ))
                })?;
            *symbol
        };

        let instance = unsafe { init() };
        if instance.is_null() {
            return Err(SensordError::Load(format!(
                "module_init of {} returned no module",
                path.display()
            )));
        }

        // SAFETY: a non-null result of `module_init` is a boxed `Module`.
        let module = unsafe { (*(instance as *const Module)).clone() };
        let handle = Arc::new(PluginLibrary {
            path: path.to_path_buf(),
            instance,
            exit,
            _library: library,
        });
        Ok((module, handle))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PluginLibrary {
    fn drop(&mut self) {
        tracing::debug!("Closing plugin {}", self.path.display());
        unsafe { (self.exit)(self.instance) };
    }
}

impl std::fmt::Debug for PluginLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginLibrary").field("path", &self.path).finish()
    }
}

/// A registered module
#[derive(Clone)]
pub struct RegistryEntry {
    pub module: Module,
    /// Library the module's code lives in (None for built-in modules)
    pub library: Option<Arc<PluginLibrary>>,
    /// Whether this entry is the original load rather than a composed clone
    pub owner: bool,
}

/// Name-keyed registry of loaded modules
#[derive(Default)]
pub struct ModuleRegistry {
    entries: Mutex<Vec<RegistryEntry>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, Vec<RegistryEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn insert(&self, entry: RegistryEntry) -> Result<()> {
        let mut entries = self.entries();
        let name = entry.module.name();
        if entries.iter().any(|e| e.module.name() == name) {
            return Err(SensordError::Load(format!(
                "A module named {} is already registered",
                name
            )));
        }
        tracing::debug!("Registered {} module {}", entry.module.kind(), name);
        entries.push(entry);
        Ok(())
    }

    /// Load a plugin shared object and register the module it constructs
    pub fn load(&self, path: impl AsRef<Path>) -> Result<Module> {
        let (module, library) = PluginLibrary::open(path.as_ref())?;
        self.register_plugin(module, library)
    }

    fn register_plugin(&self, module: Module, library: Arc<PluginLibrary>) -> Result<Module> {
        let inserted = self.insert(RegistryEntry {
            module: module.clone(),
            library: Some(library.clone()),
            owner: true,
        });
        if let Err(e) = inserted {
            // The module's code lives in the library: release it before closing.
            drop(module);
            drop(library);
            return Err(e);
        }
        tracing::info!(
            "Loaded {} module {} from {}",
            module.kind(),
            module.name(),
            library.path().display()
        );
        Ok(module)
    }

    /// Load every enabled section of a module catalog.
    ///
    /// A plugin that fails to load is logged and skipped. Returns the number
    /// of modules registered.
    pub fn load_catalog(&self, catalog: &Catalog) -> usize {
        let mut loaded = 0;
        for section in catalog.sections() {
            if catalog.is_disabled(section) {
                tracing::info!("Module {} is disabled", section);
                continue;
            }
            let Some(path) = catalog.text(section, KEY_PATH) else {
                tracing::warn!("Module {} has no {} entry", section, KEY_PATH);
                continue;
            };
            match self.load(&path) {
                Ok(_) => loaded += 1,
                Err(e) => tracing::error!("Module {} unusable: {}", section, e),
            }
        }
        loaded
    }

    /// Register a module compiled into the server
    pub fn register_builtin(&self, module: Module) -> Result<()> {
        self.insert(RegistryEntry {
            module,
            library: None,
            owner: true,
        })
    }

    /// Register a composed instance; it keeps its library open but never closes it
    pub fn register_instance(&self, module: Module, library: Option<Arc<PluginLibrary>>) -> Result<()> {
        self.insert(RegistryEntry {
            module,
            library,
            owner: false,
        })
    }

    /// Find a module by exact name
    pub fn lookup(&self, name: &str) -> Option<Module> {
        self.lookup_entry(name).map(|entry| entry.module)
    }

    /// Find a module and its library by exact name
    pub fn lookup_entry(&self, name: &str) -> Option<RegistryEntry> {
        self.entries()
            .iter()
            .find(|e| e.module.name() == name)
            .cloned()
    }

    /// Remove a module and release it.
    ///
    /// The library handle is closed once nothing references it any more, which
    /// only an owning entry can bring about.
    pub fn unregister(&self, name: &str) -> bool {
        let entry = {
            let mut entries = self.entries();
            match entries.iter().position(|e| e.module.name() == name) {
                Some(index) => entries.remove(index),
                None => return false,
            }
        };
        entry.module.destroy();
        let kind = if entry.owner { "owning" } else { "instance" };
        tracing::info!("Unregistered {} module {} ({})", entry.module.kind(), name, kind);
        true
    }

    /// Names of every registered module, in registration order
    pub fn names(&self) -> Vec<String> {
        self.entries()
            .iter()
            .map(|e| e.module.name().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Release every module, instances first
    pub fn clear(&self) {
        let drained: Vec<RegistryEntry> = std::mem::take(&mut *self.entries());
        for entry in drained.iter().rev() {
            entry.module.destroy();
        }
    }
}
