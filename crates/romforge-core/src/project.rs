//! The project: an opened ROM and everything derived from it.
//!
//! A [`Project`] owns the parsed ROM container, the identity cache of
//! deserialised models, the dirty set of modified file paths, the item tree
//! and the instantiated module set. All reads, mutations and saves go
//! through it.
//!
//! # Model cache
//!
//! [`Project::open_file`] deserialises each ROM file at most once and hands
//! out clones of one [`ModelHandle`] per path, so every editor surface works
//! on the same live model. The handler that produced a model is recorded and
//! is the one used to serialise it at save time.
//!
//! # Current project
//!
//! The application is single-document: at most one project exists per
//! process. The current instance is installed explicitly with
//! [`install_project`] and read through [`current_project`], so tests can
//! inject a fixture project the same way the open task installs a real one.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::{Mutex, MutexGuard, RwLock};

use crate::context::{ModelContext, ModelHandle};
use crate::error::{ProjectError, Result};
use crate::handlers::{FileHandlerRegistry, HandlerContext, HandlerId, StaticData};
use crate::module::{Module, ModuleRegistry, NavRequest};
use crate::tree::{ItemId, ItemTree};

/// The parsed ROM image, provided by an external ROM library.
///
/// Paths are forward-slash separated names inside the image, e.g.
/// `BALANCE/item_p.bin`. Writes mutate the in-memory image only;
/// [`save_to_disk`](Self::save_to_disk) persists it.
pub trait RomContainer: Send {
    /// Read the bytes of a file inside the image.
    fn read_file(&self, path: &str) -> Result<Vec<u8>>;

    /// Replace the bytes of a file inside the image.
    fn write_file(&mut self, path: &str, bytes: Vec<u8>) -> Result<()>;

    /// Write the whole image to disk.
    fn save_to_disk(&self, path: &Path) -> Result<()>;
}

/// Opens a ROM image from disk and probes its version.
pub trait RomLoader: Send + Sync {
    /// Read the image and derive its static data bundle.
    fn load(&self, path: &Path) -> Result<(Box<dyn RomContainer>, StaticData)>;
}

/// A cached model together with the handler that produced it.
struct CacheEntry {
    handler: HandlerId,
    model: ModelHandle,
}

/// Cache and dirty set, guarded together.
#[derive(Default)]
struct FileState {
    cache: HashMap<String, CacheEntry>,
    /// Modified paths, unique, in insertion order.
    dirty: Vec<String>,
}

/// An opened ROM with its caches, modules and item tree.
pub struct Project {
    rom_path: PathBuf,
    rom: Mutex<Box<dyn RomContainer>>,
    static_data: StaticData,
    handlers: Arc<FileHandlerRegistry>,
    files: Mutex<FileState>,
    modules: OnceLock<ModuleRegistry>,
    tree: Mutex<ItemTree>,
}

impl Project {
    /// Create a project over an already-read ROM container.
    ///
    /// Modules are installed separately, after construction, because they
    /// receive a handle to the project.
    pub fn new(
        rom_path: impl Into<PathBuf>,
        rom: Box<dyn RomContainer>,
        static_data: StaticData,
        handlers: Arc<FileHandlerRegistry>,
    ) -> Self {
        Self {
            rom_path: rom_path.into(),
            rom: Mutex::new(rom),
            static_data,
            handlers,
            files: Mutex::new(FileState::default()),
            modules: OnceLock::new(),
            tree: Mutex::new(ItemTree::new()),
        }
    }

    /// Path of the ROM image on disk.
    pub fn rom_path(&self) -> &Path {
        &self.rom_path
    }

    /// ROM version and constants.
    pub fn static_data(&self) -> &StaticData {
        &self.static_data
    }

    /// The handler registry this project resolves handlers from.
    pub fn handlers(&self) -> &Arc<FileHandlerRegistry> {
        &self.handlers
    }

    /// Get the model for a ROM file, deserialising it on first access.
    ///
    /// Subsequent calls for the same path return the same live model; the
    /// handler recorded on first open is the one used at save. Asking for a
    /// cached path with a different handler is a contract violation, since
    /// it would otherwise create a second live model for the path.
    pub fn open_file(&self, path: &str, handler_id: HandlerId) -> Result<ModelHandle> {
        let mut files = self.files.lock();

        if let Some(entry) = files.cache.get(path) {
            if entry.handler != handler_id {
                return Err(ProjectError::contract(format!(
                    "{path} is already open with handler {}, requested {handler_id}",
                    entry.handler
                )));
            }
            return Ok(entry.model.clone());
        }

        let handler = self.handlers.get(handler_id).ok_or_else(|| {
            ProjectError::contract(format!("no handler registered for id {handler_id}"))
        })?;
        let bytes = self.rom.lock().read_file(path)?;
        let ctx = HandlerContext {
            static_data: &self.static_data,
            handlers: &*self.handlers,
        };
        let model = handler.deserialize(path, &bytes, &ctx)?;
        let handle = ModelContext::with_thread_safety(model, handler.thread_safe());
        tracing::debug!(
            target: "romforge_core::project",
            path,
            handler = %handler_id,
            "file deserialised and cached"
        );
        files.cache.insert(
            path.to_string(),
            CacheEntry {
                handler: handler_id,
                model: handle.clone(),
            },
        );
        Ok(handle)
    }

    /// Whether a path has been opened and cached.
    pub fn is_cached(&self, path: &str) -> bool {
        self.files.lock().cache.contains_key(path)
    }

    /// The handler recorded for a cached path.
    pub fn cached_handler(&self, path: &str) -> Option<HandlerId> {
        self.files.lock().cache.get(path).map(|entry| entry.handler)
    }

    /// Mark a cached file as modified.
    ///
    /// Duplicate marks are ignored; insertion order is preserved. Marking a
    /// path that was never opened is a contract violation, since there would
    /// be no model to serialise at save.
    pub fn mark_modified(&self, path: &str) -> Result<()> {
        let mut files = self.files.lock();
        if !files.cache.contains_key(path) {
            return Err(ProjectError::contract(format!(
                "cannot mark {path} modified: not in the file cache"
            )));
        }
        if !files.dirty.iter().any(|p| p == path) {
            files.dirty.push(path.to_string());
            tracing::debug!(target: "romforge_core::project", path, "marked modified");
        }
        Ok(())
    }

    /// Mark the file backing a model as modified, looked up by identity.
    pub fn mark_model_modified(&self, model: &ModelHandle) -> Result<()> {
        let path = {
            let files = self.files.lock();
            files
                .cache
                .iter()
                .find(|(_, entry)| entry.model.ptr_eq(model))
                .map(|(path, _)| path.clone())
        };
        match path {
            Some(path) => self.mark_modified(&path),
            None => Err(ProjectError::contract(
                "model does not belong to this project's cache",
            )),
        }
    }

    /// Whether any file is marked modified.
    pub fn has_modifications(&self) -> bool {
        !self.files.lock().dirty.is_empty()
    }

    /// The modified paths, in mark order.
    pub fn dirty_files(&self) -> Vec<String> {
        self.files.lock().dirty.clone()
    }

    /// Serialise every modified file and write the ROM to disk.
    ///
    /// Files are serialised in mark order into the in-memory image; the
    /// image is written to disk only after every serialisation succeeded,
    /// so the on-disk ROM is either the pre-save or the fully-new state.
    /// On failure the dirty set is left intact for retry.
    pub fn save_blocking(&self) -> Result<()> {
        let mut files = self.files.lock();
        let mut rom = self.rom.lock();

        for path in &files.dirty {
            let entry = files.cache.get(path).ok_or_else(|| {
                ProjectError::contract(format!("dirty path {path} is not in the file cache"))
            })?;
            let handler = self.handlers.get(entry.handler).ok_or_else(|| {
                ProjectError::contract(format!(
                    "handler {} for {path} disappeared from the registry",
                    entry.handler
                ))
            })?;
            let bytes = entry.model.with(|model| handler.serialize(path, model))?;
            rom.write_file(path, bytes)?;
            tracing::debug!(target: "romforge_core::project", path, "serialised into image");
        }

        rom.save_to_disk(&self.rom_path)?;
        let saved = files.dirty.len();
        files.dirty.clear();
        tracing::info!(
            target: "romforge_core::project",
            files = saved,
            path = %self.rom_path.display(),
            "ROM written to disk"
        );
        Ok(())
    }

    /// Install the instantiated module set. May only happen once.
    pub fn install_modules(&self, modules: ModuleRegistry) -> Result<()> {
        self.modules
            .set(modules)
            .map_err(|_| ProjectError::contract("modules are already installed"))
    }

    /// The module set.
    ///
    /// # Panics
    ///
    /// Panics if called before [`install_modules`](Self::install_modules);
    /// the open task always installs modules before handing the project out.
    pub fn modules(&self) -> &ModuleRegistry {
        self.modules
            .get()
            .expect("modules not installed; Project::install_modules must run during open")
    }

    /// The module set, if already installed.
    pub fn try_modules(&self) -> Option<&ModuleRegistry> {
        self.modules.get()
    }

    /// Look up a module by name.
    pub fn get_module(&self, name: &str) -> Option<&dyn Module> {
        self.modules().get(name)
    }

    /// The ROM-meta module.
    pub fn rom_module(&self) -> &dyn Module {
        self.modules().rom_module()
    }

    /// Lock the item tree.
    pub fn tree(&self) -> MutexGuard<'_, ItemTree> {
        self.tree.lock()
    }

    /// Run a closure against the locked item tree.
    pub fn with_tree<R>(&self, f: impl FnOnce(&mut ItemTree) -> R) -> R {
        f(&mut self.tree.lock())
    }

    /// Ask every module to populate the tree, then finalise it.
    pub fn populate_tree(&self) -> Result<()> {
        let mut tree = self.tree.lock();
        self.modules().populate_tree(&mut tree)?;
        tree.finalise();
        Ok(())
    }

    /// Route a navigation request across the module set.
    pub fn resolve_request(&self, request: &NavRequest) -> Option<ItemId> {
        self.modules().resolve_request(request)
    }
}

impl Drop for Project {
    fn drop(&mut self) {
        tracing::debug!(
            target: "romforge_core::project",
            path = %self.rom_path.display(),
            "project dropped, caches released"
        );
    }
}

static_assertions::assert_impl_all!(Project: Send, Sync);

/// A weak back-reference from a module to its owning project.
///
/// Modules hold this instead of a strong reference so the project and its
/// caches are released as soon as the current-project slot lets go.
#[derive(Clone)]
pub struct ProjectHandle {
    inner: Weak<Project>,
}

impl ProjectHandle {
    /// Create a handle from a live project.
    pub fn new(project: &Arc<Project>) -> Self {
        Self {
            inner: Arc::downgrade(project),
        }
    }

    /// Upgrade to the owning project.
    ///
    /// Fails if the project has been closed.
    pub fn project(&self) -> Result<Arc<Project>> {
        self.inner
            .upgrade()
            .ok_or_else(|| ProjectError::contract("the owning project has been closed"))
    }
}

/// The process-wide current project slot.
static CURRENT_PROJECT: RwLock<Option<Arc<Project>>> = RwLock::new(None);

/// Install a project as the current one.
///
/// Returns the previously installed project, if any. Callers clear the slot
/// before opening a new ROM so a stale instance never coexists with a new
/// one.
pub fn install_project(project: Arc<Project>) -> Option<Arc<Project>> {
    CURRENT_PROJECT.write().replace(project)
}

/// Clear the current project slot, returning the displaced project.
pub fn clear_project() -> Option<Arc<Project>> {
    CURRENT_PROJECT.write().take()
}

/// The current project, if one is installed.
pub fn current_project() -> Option<Arc<Project>> {
    CURRENT_PROJECT.read().clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::BoxedModel;
    use crate::handlers::GameRegion;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    const H_BYTES: HandlerId = HandlerId::new("bytes");
    const H_TEXT: HandlerId = HandlerId::new("text");

    /// In-memory ROM with switchable disk failure.
    struct MemoryRom {
        files: HashMap<String, Vec<u8>>,
        fail_disk: Arc<AtomicBool>,
        written: Arc<Mutex<Option<HashMap<String, Vec<u8>>>>>,
    }

    impl RomContainer for MemoryRom {
        fn read_file(&self, path: &str) -> Result<Vec<u8>> {
            self.files
                .get(path)
                .cloned()
                .ok_or_else(|| ProjectError::not_found(path))
        }

        fn write_file(&mut self, path: &str, bytes: Vec<u8>) -> Result<()> {
            self.files.insert(path.to_string(), bytes);
            Ok(())
        }

        fn save_to_disk(&self, _path: &Path) -> Result<()> {
            if self.fail_disk.load(Ordering::SeqCst) {
                return Err(ProjectError::from(std::io::Error::other("disk full")));
            }
            *self.written.lock() = Some(self.files.clone());
            Ok(())
        }
    }

    struct Fixture {
        project: Arc<Project>,
        fail_disk: Arc<AtomicBool>,
        written: Arc<Mutex<Option<HashMap<String, Vec<u8>>>>>,
    }

    fn fixture() -> Fixture {
        let handlers = Arc::new(FileHandlerRegistry::new());
        handlers
            .register_fns(
                H_BYTES,
                |_path, bytes, _ctx| Ok(Box::new(bytes.to_vec()) as BoxedModel),
                |path, model| {
                    model
                        .downcast_ref::<Vec<u8>>()
                        .cloned()
                        .ok_or_else(|| ProjectError::serialize(path, "not a byte vector"))
                },
                false,
            )
            .unwrap();
        handlers
            .register_fns(
                H_TEXT,
                |path, bytes, _ctx| {
                    String::from_utf8(bytes.to_vec())
                        .map(|s| Box::new(s) as BoxedModel)
                        .map_err(|_| ProjectError::parse(path, "not valid UTF-8"))
                },
                |path, model| {
                    model
                        .downcast_ref::<String>()
                        .map(|s| s.as_bytes().to_vec())
                        .ok_or_else(|| ProjectError::serialize(path, "not a string"))
                },
                true,
            )
            .unwrap();

        let fail_disk = Arc::new(AtomicBool::new(false));
        let written = Arc::new(Mutex::new(None));
        let mut files = HashMap::new();
        files.insert("BALANCE/item_p.bin".to_string(), vec![1, 2, 3]);
        files.insert("MESSAGE/en.str".to_string(), b"hello".to_vec());
        files.insert("FONT/raw.dat".to_string(), vec![0xFF, 0xFE]);
        let rom = MemoryRom {
            files,
            fail_disk: fail_disk.clone(),
            written: written.clone(),
        };

        let project = Arc::new(Project::new(
            "/tmp/game.nds",
            Box::new(rom),
            StaticData::new("CXXP", GameRegion::Europe),
            handlers,
        ));
        Fixture {
            project,
            fail_disk,
            written,
        }
    }

    #[test]
    fn test_open_file_caches_by_identity() {
        let fx = fixture();
        let a = fx.project.open_file("BALANCE/item_p.bin", H_BYTES).unwrap();
        let b = fx.project.open_file("BALANCE/item_p.bin", H_BYTES).unwrap();

        assert!(a.ptr_eq(&b));
        assert!(fx.project.is_cached("BALANCE/item_p.bin"));
        assert_eq!(fx.project.cached_handler("BALANCE/item_p.bin"), Some(H_BYTES));
    }

    #[test]
    fn test_open_file_missing_path() {
        let fx = fixture();
        let err = fx.project.open_file("GHOST/file.bin", H_BYTES).unwrap_err();
        assert_eq!(err.kind(), "not-found");
        assert!(!fx.project.is_cached("GHOST/file.bin"));
    }

    #[test]
    fn test_open_file_parse_failure_leaves_no_cache_entry() {
        let fx = fixture();
        let err = fx.project.open_file("FONT/raw.dat", H_TEXT).unwrap_err();
        assert_eq!(err.kind(), "parse");
        assert!(!fx.project.is_cached("FONT/raw.dat"));

        // The path stays usable with a handler that accepts the bytes.
        assert!(fx.project.open_file("FONT/raw.dat", H_BYTES).is_ok());
    }

    #[test]
    fn test_handler_mismatch_on_cached_path() {
        let fx = fixture();
        fx.project.open_file("BALANCE/item_p.bin", H_BYTES).unwrap();
        let err = fx.project.open_file("BALANCE/item_p.bin", H_TEXT).unwrap_err();
        assert_eq!(err.kind(), "contract");
        // The original model stays the only live one.
        assert_eq!(fx.project.cached_handler("BALANCE/item_p.bin"), Some(H_BYTES));
    }

    #[test]
    fn test_mark_modified_requires_cache_entry() {
        let fx = fixture();
        assert!(fx.project.mark_modified("BALANCE/item_p.bin").is_err());

        fx.project.open_file("BALANCE/item_p.bin", H_BYTES).unwrap();
        fx.project.mark_modified("BALANCE/item_p.bin").unwrap();
        assert!(fx.project.has_modifications());
    }

    #[test]
    fn test_dirty_set_is_ordered_and_unique() {
        let fx = fixture();
        fx.project.open_file("MESSAGE/en.str", H_TEXT).unwrap();
        fx.project.open_file("BALANCE/item_p.bin", H_BYTES).unwrap();

        fx.project.mark_modified("MESSAGE/en.str").unwrap();
        fx.project.mark_modified("BALANCE/item_p.bin").unwrap();
        fx.project.mark_modified("MESSAGE/en.str").unwrap();

        assert_eq!(
            fx.project.dirty_files(),
            vec!["MESSAGE/en.str".to_string(), "BALANCE/item_p.bin".to_string()]
        );
    }

    #[test]
    fn test_mark_by_model_identity() {
        let fx = fixture();
        let model = fx.project.open_file("MESSAGE/en.str", H_TEXT).unwrap();

        fx.project.mark_model_modified(&model).unwrap();
        assert_eq!(fx.project.dirty_files(), vec!["MESSAGE/en.str".to_string()]);

        // A model the project never produced is rejected.
        let foreign = ModelHandle::thread_safe(Box::new(0_u32) as BoxedModel);
        assert!(fx.project.mark_model_modified(&foreign).is_err());
    }

    #[test]
    fn test_save_round_trip() {
        let fx = fixture();
        let model = fx.project.open_file("MESSAGE/en.str", H_TEXT).unwrap();
        model
            .with_as::<String, _>(|s| {
                s.clear();
                s.push_str("goodbye");
            })
            .unwrap();
        fx.project.mark_model_modified(&model).unwrap();

        fx.project.save_blocking().unwrap();

        assert!(!fx.project.has_modifications());
        let written = fx.written.lock();
        let image = written.as_ref().expect("image written to disk");
        assert_eq!(image.get("MESSAGE/en.str").unwrap(), b"goodbye");
        // Untouched file kept its original bytes.
        assert_eq!(image.get("BALANCE/item_p.bin").unwrap(), &vec![1, 2, 3]);
    }

    #[test]
    fn test_failed_save_preserves_dirty_set() {
        let fx = fixture();
        let model = fx.project.open_file("MESSAGE/en.str", H_TEXT).unwrap();
        model.with_as::<String, _>(|s| s.push('!')).unwrap();
        fx.project.mark_model_modified(&model).unwrap();

        fx.fail_disk.store(true, Ordering::SeqCst);
        let err = fx.project.save_blocking().unwrap_err();
        assert_eq!(err.kind(), "io");
        assert!(fx.project.has_modifications());
        assert!(fx.written.lock().is_none());

        // Retry succeeds once the disk recovers.
        fx.fail_disk.store(false, Ordering::SeqCst);
        fx.project.save_blocking().unwrap();
        assert!(!fx.project.has_modifications());
    }

    #[test]
    fn test_project_handle_upgrades_while_alive() {
        let fx = fixture();
        let handle = ProjectHandle::new(&fx.project);
        assert!(handle.project().is_ok());

        drop(fx);
        assert!(handle.project().is_err());
    }
}
