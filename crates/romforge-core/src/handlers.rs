//! File handler identities and the handler registry.
//!
//! A handler turns the raw bytes of one kind of ROM sub-file into a model
//! and back. The core never parses asset formats itself; it looks handlers
//! up by [`HandlerId`] and delegates. A round trip through a handler may
//! change the bytes (formats can be lossy at the byte level) but must
//! preserve the model semantically.
//!
//! Registrations happen at startup, before a project is opened; the
//! registry is frozen during open and read-only afterwards.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use crate::context::BoxedModel;
use crate::error::{ProjectError, Result};

/// Stable identity of a file handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HandlerId(&'static str);

impl HandlerId {
    /// Create a handler identity from a static key.
    pub const fn new(key: &'static str) -> Self {
        Self(key)
    }

    /// The underlying key.
    pub fn key(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// ROM version and constants, produced when the ROM is read.
///
/// Handlers receive this bundle at deserialise time so version-dependent
/// formats can adjust without re-probing the ROM.
#[derive(Debug, Clone)]
pub struct StaticData {
    game_code: String,
    region: GameRegion,
    constants: HashMap<String, i64>,
}

/// Region of the game image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GameRegion {
    /// North American release.
    NorthAmerica,
    /// European release.
    Europe,
    /// Japanese release.
    Japan,
}

impl StaticData {
    /// Create a bundle for a game code and region.
    pub fn new(game_code: impl Into<String>, region: GameRegion) -> Self {
        Self {
            game_code: game_code.into(),
            region,
            constants: HashMap::new(),
        }
    }

    /// The four-letter game code.
    pub fn game_code(&self) -> &str {
        &self.game_code
    }

    /// The image region.
    pub fn region(&self) -> GameRegion {
        self.region
    }

    /// Record a named constant, e.g. a table address inside an overlay.
    pub fn insert_constant(&mut self, name: impl Into<String>, value: i64) {
        self.constants.insert(name.into(), value);
    }

    /// Look up a named constant.
    pub fn constant(&self, name: &str) -> Option<i64> {
        self.constants.get(name).copied()
    }
}

/// Auxiliary context handed to handlers at deserialise time.
pub struct HandlerContext<'a> {
    /// ROM version and constants.
    pub static_data: &'a StaticData,
    /// The registry, so composite formats can delegate to sibling handlers.
    pub handlers: &'a FileHandlerRegistry,
}

/// A deserialise/serialise pair for one kind of ROM sub-file.
pub trait FileHandler: Send + Sync {
    /// Turn raw bytes into a model.
    fn deserialize(&self, path: &str, bytes: &[u8], ctx: &HandlerContext<'_>)
    -> Result<BoxedModel>;

    /// Turn a model back into bytes.
    fn serialize(&self, path: &str, model: &BoxedModel) -> Result<Vec<u8>>;

    /// Whether produced models may be accessed from the worker thread.
    fn thread_safe(&self) -> bool {
        false
    }
}

/// Handler built from a deserialise/serialise closure pair.
struct FnHandler<D, S> {
    deserialize: D,
    serialize: S,
    thread_safe: bool,
}

impl<D, S> FileHandler for FnHandler<D, S>
where
    D: Fn(&str, &[u8], &HandlerContext<'_>) -> Result<BoxedModel> + Send + Sync,
    S: Fn(&str, &BoxedModel) -> Result<Vec<u8>> + Send + Sync,
{
    fn deserialize(
        &self,
        path: &str,
        bytes: &[u8],
        ctx: &HandlerContext<'_>,
    ) -> Result<BoxedModel> {
        (self.deserialize)(path, bytes, ctx)
    }

    fn serialize(&self, path: &str, model: &BoxedModel) -> Result<Vec<u8>> {
        (self.serialize)(path, model)
    }

    fn thread_safe(&self) -> bool {
        self.thread_safe
    }
}

/// Mapping from handler identities to handlers.
///
/// Frozen when a project opens; registration afterwards is a contract error.
pub struct FileHandlerRegistry {
    handlers: RwLock<HashMap<HandlerId, Arc<dyn FileHandler>>>,
    frozen: AtomicBool,
}

impl FileHandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            frozen: AtomicBool::new(false),
        }
    }

    /// Register a handler.
    ///
    /// Fails if the identity is already taken or the registry is frozen.
    pub fn register(&self, id: HandlerId, handler: Arc<dyn FileHandler>) -> Result<()> {
        if self.is_frozen() {
            return Err(ProjectError::contract(format!(
                "cannot register handler {id} after the registry was frozen"
            )));
        }
        let mut handlers = self.handlers.write();
        if handlers.contains_key(&id) {
            return Err(ProjectError::contract(format!(
                "handler {id} is already registered"
            )));
        }
        handlers.insert(id, handler);
        tracing::debug!(target: "romforge_core::handlers", %id, "handler registered");
        Ok(())
    }

    /// Register a deserialise/serialise closure pair.
    pub fn register_fns<D, S>(
        &self,
        id: HandlerId,
        deserialize: D,
        serialize: S,
        thread_safe: bool,
    ) -> Result<()>
    where
        D: Fn(&str, &[u8], &HandlerContext<'_>) -> Result<BoxedModel> + Send + Sync + 'static,
        S: Fn(&str, &BoxedModel) -> Result<Vec<u8>> + Send + Sync + 'static,
    {
        self.register(
            id,
            Arc::new(FnHandler {
                deserialize,
                serialize,
                thread_safe,
            }),
        )
    }

    /// Look up a handler by identity.
    pub fn get(&self, id: HandlerId) -> Option<Arc<dyn FileHandler>> {
        self.handlers.read().get(&id).cloned()
    }

    /// Make the registry read-only. Idempotent.
    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::Release);
    }

    /// Whether the registry is read-only.
    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    /// Whether no handlers are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }
}

impl Default for FileHandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

static_assertions::assert_impl_all!(FileHandlerRegistry: Send, Sync);

/// Downcast a boxed model for a serialiser written against a concrete type.
pub fn model_as<'a, M: Any>(path: &str, model: &'a BoxedModel) -> Result<&'a M> {
    model.downcast_ref::<M>().ok_or_else(|| {
        ProjectError::serialize(
            path,
            format!("model is not a {}", std::any::type_name::<M>()),
        )
    })
}
