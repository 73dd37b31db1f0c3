//! Project core for RomForge.
//!
//! This crate is the engine between a raw ROM image and every editor
//! surface of the RomForge workbench:
//!
//! - **Project**: lifecycle of an opened ROM, the identity cache of
//!   deserialised models and the dirty set of modified files
//! - **Module Registry**: dependency-ordered instantiation of editor
//!   modules against a project
//! - **Item Tree**: the persistent navigation model with modification
//!   propagation
//! - **Async Runner**: a single background worker for long-running project
//!   operations
//! - **UI Event Bus**: typed signals delivered on the UI thread
//! - **Model Context**: scoped mutual exclusion for models shared between
//!   threads
//!
//! The GUI itself, the per-asset editors and the concrete ROM parsing
//! library live outside this crate; they plug in through [`RomLoader`],
//! [`FileHandler`] and [`Module`].
//!
//! # Signal Flow Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use romforge_core::{
//!     AsyncRunner, FileHandlerRegistry, ModuleDescriptor, SignalKind,
//!     UiDispatcher, UiEventBus, Workbench,
//! };
//! # use romforge_core::{RomLoader, RomContainer, StaticData, Result};
//! # use std::path::Path;
//! # struct MyLoader;
//! # impl RomLoader for MyLoader {
//! #     fn load(&self, _: &Path) -> Result<(Box<dyn RomContainer>, StaticData)> {
//! #         unimplemented!()
//! #     }
//! # }
//! # fn rom_module_descriptor() -> ModuleDescriptor { unimplemented!() }
//!
//! // The GUI thread owns the dispatcher and pumps it from its event loop.
//! let dispatcher = Arc::new(UiDispatcher::new());
//! dispatcher.bind_current_thread();
//!
//! let runner = Arc::new(AsyncRunner::new(dispatcher.clone()));
//! let bus = UiEventBus::new(dispatcher.clone());
//! let handlers = Arc::new(FileHandlerRegistry::new());
//!
//! bus.subscribe(SignalKind::ProjectOpened, |_| {
//!     println!("ROM is ready");
//! });
//!
//! let workbench = Workbench::new(
//!     runner.clone(),
//!     bus.clone(),
//!     handlers,
//!     vec![rom_module_descriptor()],
//!     Arc::new(MyLoader),
//! );
//! workbench.open("game.nds");
//!
//! // Inside the GUI event loop:
//! dispatcher.process_pending();
//! ```
//!
//! # Threading Model
//!
//! Exactly two threads matter: the UI thread, which owns all UI state and
//! never blocks, and the worker thread inside [`AsyncRunner`]. Worker code
//! reaches the UI only through [`AsyncRunner::post_to_ui`]; the bus routes
//! its signals the same way. Models that both threads may touch are wrapped
//! in a [`ModelContext`].

mod bus;
mod context;
mod dispatch;
mod error;
mod event;
pub mod handlers;
pub mod logging;
pub mod module;
mod project;
mod runner;
mod session;
pub mod tree;

pub use bus::{SubscriptionGuard, SubscriptionId, UiEventBus};
pub use context::{BoxedModel, ModelContext, ModelHandle};
pub use dispatch::{ThreadAffinity, UiDispatcher};
pub use error::{DependencyError, ErrorValue, ProjectError, Result};
pub use event::{SignalKind, UiSignal};
pub use handlers::{
    FileHandler, FileHandlerRegistry, GameRegion, HandlerContext, HandlerId, StaticData,
};
pub use logging::{ItemTreeDebug, TreeFormatOptions, TreeStyle};
pub use module::{
    Module, ModuleCtor, ModuleDescriptor, ModuleRegistry, NavRequest, NavRequestKind, ROM_MODULE,
    ViewStatus, resolve_load_order,
};
pub use project::{
    Project, ProjectHandle, RomContainer, RomLoader, clear_project, current_project,
    install_project,
};
pub use runner::{AsyncRunner, CancellationToken, RunnerBuilder, RunnerConfig, TaskHandle};
pub use session::{ViewLoader, Workbench};
pub use tree::{
    ItemData, ItemId, ItemTree, ItemTreeEntry, Recursion, TreeError, TreeResult, ViewFactory,
    ViewHandle,
};
