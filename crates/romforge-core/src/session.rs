//! Project lifecycle orchestration and view loading.
//!
//! [`Workbench`] bundles the long-lived collaborators (runner, bus, handler
//! registry, module catalog, ROM loader) and schedules the asynchronous
//! halves of the project lifecycle: opening a ROM, saving it, closing it.
//! Each operation runs on the worker and reports back through the bus with
//! `ProjectOpened`/`ProjectSaved` or the matching error signal.
//!
//! [`ViewLoader`] resolves a tree selection to a view by running the entry's
//! factory on the worker and posting `ViewLoaded` to the bus.
//!
//! Lifecycle task bodies run under `catch_unwind`; a panicking handler or
//! module surfaces as an error signal instead of killing the worker.

use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;

use crate::bus::UiEventBus;
use crate::error::{ErrorValue, ProjectError, Result};
use crate::event::UiSignal;
use crate::handlers::FileHandlerRegistry;
use crate::module::{ModuleDescriptor, ModuleRegistry, NavRequest};
use crate::project::{
    Project, RomLoader, clear_project, current_project, install_project,
};
use crate::runner::{AsyncRunner, TaskHandle};
use crate::tree::{ItemData, ItemId, ViewFactory};

/// Run a lifecycle task body, turning panics into error values.
fn run_guarded(body: impl FnOnce() -> Result<()>) -> std::result::Result<(), ErrorValue> {
    match std::panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(ErrorValue::from(&err)),
        Err(payload) => Err(ErrorValue::new(
            "panic",
            crate::runner::panic_message(payload.as_ref()),
        )),
    }
}

/// The long-lived coordinator owning one runner, one bus and the catalog.
pub struct Workbench {
    runner: Arc<AsyncRunner>,
    bus: UiEventBus,
    handlers: Arc<FileHandlerRegistry>,
    catalog: Arc<[ModuleDescriptor]>,
    loader: Arc<dyn RomLoader>,
}

impl Workbench {
    /// Create a workbench.
    pub fn new(
        runner: Arc<AsyncRunner>,
        bus: UiEventBus,
        handlers: Arc<FileHandlerRegistry>,
        catalog: Vec<ModuleDescriptor>,
        loader: Arc<dyn RomLoader>,
    ) -> Self {
        Self {
            runner,
            bus,
            handlers,
            catalog: catalog.into(),
            loader,
        }
    }

    /// The runner project operations are scheduled on.
    pub fn runner(&self) -> &Arc<AsyncRunner> {
        &self.runner
    }

    /// The bus lifecycle signals are emitted on.
    pub fn bus(&self) -> &UiEventBus {
        &self.bus
    }

    /// Open a ROM image asynchronously.
    ///
    /// A previously installed project is cleared first. On success the new
    /// project is installed and `ProjectOpened` is emitted; on failure
    /// nothing stays installed and `ProjectOpenedError` is emitted.
    ///
    /// Returns `None` if the runner has been stopped.
    pub fn open(&self, path: impl Into<PathBuf>) -> Option<TaskHandle<()>> {
        let path = path.into();
        let bus = self.bus.clone();
        let handlers = self.handlers.clone();
        let catalog = self.catalog.clone();
        let loader = self.loader.clone();

        self.runner.submit(move || {
            clear_project();
            let outcome = run_guarded(|| {
                let project = open_blocking(&path, &loader, &handlers, &catalog)?;
                install_project(project);
                Ok(())
            });
            match outcome {
                Ok(()) => bus.emit(UiSignal::ProjectOpened),
                Err(error) => {
                    clear_project();
                    tracing::warn!(target: "romforge_core::session", %error, "open failed");
                    bus.emit(UiSignal::ProjectOpenedError(error));
                }
            }
        })
    }

    /// Save the current project asynchronously.
    ///
    /// Emits `ProjectSaved` on success. Any failure, including there being
    /// no current project, emits `ProjectSavedError` and preserves the
    /// dirty set for retry.
    ///
    /// Returns `None` if the runner has been stopped.
    pub fn save(&self) -> Option<TaskHandle<()>> {
        let bus = self.bus.clone();
        self.runner.submit(move || {
            let outcome = run_guarded(|| {
                let project = current_project()
                    .ok_or_else(|| ProjectError::contract("no project is open"))?;
                project.save_blocking()
            });
            match outcome {
                Ok(()) => bus.emit(UiSignal::ProjectSaved),
                Err(error) => {
                    tracing::warn!(target: "romforge_core::session", %error, "save failed");
                    bus.emit(UiSignal::ProjectSavedError(error));
                }
            }
        })
    }

    /// Close the current project, releasing its caches.
    pub fn close(&self) {
        if clear_project().is_some() {
            tracing::info!(target: "romforge_core::session", "project closed");
        }
    }

    /// Route a navigation request through the current project's modules.
    pub fn route_request(&self, request: &NavRequest) -> Option<ItemId> {
        current_project()?.resolve_request(request)
    }
}

/// Read the ROM, instantiate modules and populate the tree.
fn open_blocking(
    path: &std::path::Path,
    loader: &Arc<dyn RomLoader>,
    handlers: &Arc<FileHandlerRegistry>,
    catalog: &Arc<[ModuleDescriptor]>,
) -> Result<Arc<Project>> {
    tracing::info!(
        target: "romforge_core::session",
        path = %path.display(),
        "opening ROM"
    );
    handlers.freeze();
    let (rom, static_data) = loader.load(path)?;
    let project = Arc::new(Project::new(path, rom, static_data, handlers.clone()));
    let modules = ModuleRegistry::load(catalog, &project)?;
    project.install_modules(modules)?;
    project.populate_tree()?;
    Ok(project)
}

/// Resolves a tree selection to a view on the worker thread.
pub struct ViewLoader {
    runner: Arc<AsyncRunner>,
    bus: UiEventBus,
}

impl ViewLoader {
    /// Create a view loader.
    pub fn new(runner: Arc<AsyncRunner>, bus: UiEventBus) -> Self {
        Self { runner, bus }
    }

    /// Construct the view for a module and item payload.
    ///
    /// The factory runs on the worker; `ViewLoaded` or `ViewLoadedError` is
    /// posted to the bus. Returns `None` if the runner has been stopped.
    pub fn load(
        &self,
        project: Arc<Project>,
        module: impl Into<String>,
        factory: ViewFactory,
        item_data: ItemData,
    ) -> Option<TaskHandle<()>> {
        let module = module.into();
        let bus = self.bus.clone();

        self.runner.submit(move || {
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
                let resolved = project.get_module(&module).ok_or_else(|| {
                    ProjectError::contract(format!("no module named {module:?}"))
                })?;
                factory(resolved, &item_data)
            }));
            match outcome {
                Ok(Ok(view)) => {
                    bus.emit(UiSignal::ViewLoaded {
                        module,
                        view,
                        item_data,
                    });
                }
                Ok(Err(err)) => {
                    tracing::warn!(
                        target: "romforge_core::session",
                        module,
                        error = %err,
                        "view construction failed"
                    );
                    bus.emit(UiSignal::ViewLoadedError(ErrorValue::from(&err)));
                }
                Err(payload) => {
                    let error = ErrorValue::new(
                        "panic",
                        crate::runner::panic_message(payload.as_ref()),
                    );
                    tracing::error!(
                        target: "romforge_core::session",
                        module,
                        %error,
                        "view factory panicked"
                    );
                    bus.emit(UiSignal::ViewLoadedError(error));
                }
            }
        })
    }

    /// Construct the view for a tree entry.
    ///
    /// Reads the entry under the tree lock, then proceeds as
    /// [`load`](Self::load). Fails fast with `ViewLoadedError` if the entry
    /// handle is stale.
    pub fn load_entry(&self, project: Arc<Project>, item: ItemId) -> Option<TaskHandle<()>> {
        let entry = {
            let tree = project.tree();
            tree.entry(item).map(|entry| {
                (
                    entry.module.clone(),
                    entry.view_factory.clone(),
                    entry.item_data.clone(),
                )
            })
        };
        match entry {
            Ok((module, factory, item_data)) => self.load(project, module, factory, item_data),
            Err(err) => {
                let error = ErrorValue::from(&ProjectError::from(err));
                self.bus.emit(UiSignal::ViewLoadedError(error));
                None
            }
        }
    }
}
