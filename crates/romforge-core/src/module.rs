//! Editor modules, the module catalog and the dependency resolver.
//!
//! A module is a pluggable unit providing tree entries and views for one
//! family of assets. Modules are declared in a catalog of
//! [`ModuleDescriptor`]s; when a project opens, the resolver orders the
//! catalog by declared dependencies, each module is instantiated against the
//! project, and the set drives tree population. A module that depends on
//! another can query it at load time through [`ModuleRegistry::get`],
//! because dependencies are always instantiated first.
//!
//! The ROM-meta module (name [`ROM_MODULE`]) is special: it is always
//! present, always at load position 0, and owns the root of the item tree.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::error::{DependencyError, Result};
use crate::project::{Project, ProjectHandle};
use crate::tree::{ItemId, ItemTree, ViewHandle};

/// Name of the ROM-meta module, always first in load order.
pub const ROM_MODULE: &str = "rom";

/// Textual descriptors a module reports when one of its views is entered.
///
/// Consumed by presence-style collaborators; the module produces the text
/// directly so no caller has to inspect module types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewStatus {
    /// What the user is looking at, e.g. an asset name.
    pub info: String,
    /// Where in the hierarchy it sits.
    pub state: String,
}

/// Kinds of cross-module navigation requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NavRequestKind {
    /// Jump to a whole map scene.
    Scene,
    /// Jump to a scene's enter script.
    SceneEnter,
    /// Jump to an acting (cutscene) script of a scene.
    SceneActing,
    /// Jump to a sub script of a scene.
    SceneSub,
    /// Jump to a dungeon tileset.
    DungeonTileset,
}

/// An abstract "jump to" request routed across modules.
///
/// The first module whose [`Module::handle_request`] returns an entry wins.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NavRequest {
    /// What kind of target is requested.
    pub kind: NavRequestKind,
    /// Identifier of the target, e.g. a map name or tileset index.
    pub ident: String,
}

impl NavRequest {
    /// Create a request.
    pub fn new(kind: NavRequestKind, ident: impl Into<String>) -> Self {
        Self {
            kind,
            ident: ident.into(),
        }
    }
}

/// A pluggable editor unit owning a family of assets.
///
/// Modules read and write ROM files only through their [`Project`] handle
/// and contribute entries to the shared item tree.
pub trait Module: Any + Send + Sync {
    /// The module's unique name, matching its descriptor.
    fn name(&self) -> &'static str;

    /// Populate this module's slice of the item tree.
    ///
    /// Called once during project open, after every dependency has been
    /// instantiated. The ROM-meta module installs the root here.
    fn load_tree_items(&self, tree: &mut ItemTree) -> Result<()>;

    /// Map a navigation request to one of this module's entries.
    fn handle_request(&self, _request: &NavRequest) -> Option<ItemId> {
        None
    }

    /// Report textual descriptors for a view of this module being entered.
    fn on_view_entered(&self, _view: &ViewHandle, breadcrumbs: &[String]) -> ViewStatus {
        ViewStatus {
            info: self.name().to_string(),
            state: breadcrumbs.join(" / "),
        }
    }

    /// The module as `Any`, for typed cross-module queries.
    fn as_any(&self) -> &dyn Any;
}

/// Constructor stored in a descriptor.
pub type ModuleCtor = Arc<dyn Fn(ProjectHandle) -> Result<Box<dyn Module>> + Send + Sync>;

/// Catalog entry describing one module before instantiation.
#[derive(Clone)]
pub struct ModuleDescriptor {
    name: &'static str,
    depends_on: &'static [&'static str],
    sort_order: u32,
    ctor: ModuleCtor,
}

impl ModuleDescriptor {
    /// Describe a module.
    ///
    /// `sort_order` places the module's entries in the tree-population pass;
    /// it does not influence dependency resolution.
    pub fn new<F>(
        name: &'static str,
        depends_on: &'static [&'static str],
        sort_order: u32,
        ctor: F,
    ) -> Self
    where
        F: Fn(ProjectHandle) -> Result<Box<dyn Module>> + Send + Sync + 'static,
    {
        Self {
            name,
            depends_on,
            sort_order,
            ctor: Arc::new(ctor),
        }
    }

    /// The module name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Names of modules that must load before this one.
    pub fn depends_on(&self) -> &'static [&'static str] {
        self.depends_on
    }

    /// Tree-population ordering hint.
    pub fn sort_order(&self) -> u32 {
        self.sort_order
    }
}

impl fmt::Debug for ModuleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDescriptor")
            .field("name", &self.name)
            .field("depends_on", &self.depends_on)
            .field("sort_order", &self.sort_order)
            .finish_non_exhaustive()
    }
}

/// Resolve the load order of a module catalog.
///
/// Extracts modules in waves: a module is extractable once all of its
/// dependencies have been extracted. Within one wave, modules are ordered
/// lexicographically by name, so the result is deterministic for a fixed
/// catalog. Returns indices into the catalog.
pub fn resolve_load_order(
    catalog: &[ModuleDescriptor],
) -> std::result::Result<Vec<usize>, DependencyError> {
    let mut by_name: HashMap<&str, usize> = HashMap::new();
    for (index, descriptor) in catalog.iter().enumerate() {
        if by_name.insert(descriptor.name, index).is_some() {
            return Err(DependencyError::DuplicateModule {
                name: descriptor.name.to_string(),
            });
        }
    }
    for descriptor in catalog {
        for &dep in descriptor.depends_on {
            if !by_name.contains_key(dep) {
                return Err(DependencyError::MissingDependency {
                    module: descriptor.name.to_string(),
                    requires: dep.to_string(),
                });
            }
        }
    }

    let mut order = Vec::with_capacity(catalog.len());
    let mut resolved: HashSet<&str> = HashSet::new();
    let mut remaining: Vec<usize> = (0..catalog.len()).collect();

    while !remaining.is_empty() {
        let mut wave: Vec<usize> = remaining
            .iter()
            .copied()
            .filter(|&index| {
                catalog[index]
                    .depends_on
                    .iter()
                    .all(|dep| resolved.contains(dep))
            })
            .collect();

        if wave.is_empty() {
            let mut modules: Vec<String> = remaining
                .iter()
                .map(|&index| catalog[index].name.to_string())
                .collect();
            modules.sort();
            return Err(DependencyError::DependencyCycle { modules });
        }

        wave.sort_by_key(|&index| catalog[index].name);
        for &index in &wave {
            resolved.insert(catalog[index].name);
            order.push(index);
        }
        remaining.retain(|index| !wave.contains(index));
    }

    Ok(order)
}

/// One instantiated module with its population ordering hint.
struct LoadedModule {
    module: Box<dyn Module>,
    sort_order: u32,
}

/// The instantiated module set of one project, in load order.
pub struct ModuleRegistry {
    modules: Vec<LoadedModule>,
    by_name: HashMap<&'static str, usize>,
}

impl ModuleRegistry {
    /// Resolve the catalog and instantiate every module against a project.
    ///
    /// The ROM-meta module must be present and dependency-free; it is placed
    /// at load position 0, which is always order-preserving since nothing
    /// can be ordered before a module without dependencies.
    pub fn load(catalog: &[ModuleDescriptor], project: &Arc<Project>) -> Result<Self> {
        let mut order = resolve_load_order(catalog)?;

        let rom_index = catalog
            .iter()
            .position(|descriptor| descriptor.name == ROM_MODULE)
            .ok_or(DependencyError::RomMetaMissing)?;
        if !catalog[rom_index].depends_on.is_empty() {
            return Err(DependencyError::RomMetaDependent.into());
        }
        let rom_position = order
            .iter()
            .position(|&index| index == rom_index)
            .expect("resolved order covers the catalog");
        order.remove(rom_position);
        order.insert(0, rom_index);

        let handle = ProjectHandle::new(project);
        let mut modules = Vec::with_capacity(order.len());
        let mut by_name = HashMap::with_capacity(order.len());
        for index in order {
            let descriptor = &catalog[index];
            tracing::debug!(
                target: "romforge_core::module",
                name = descriptor.name,
                "instantiating module"
            );
            let module = (descriptor.ctor)(handle.clone())?;
            by_name.insert(descriptor.name, modules.len());
            modules.push(LoadedModule {
                module,
                sort_order: descriptor.sort_order,
            });
        }

        Ok(Self { modules, by_name })
    }

    /// Iterate modules in load order.
    pub fn all(&self) -> impl Iterator<Item = &dyn Module> {
        self.modules.iter().map(|loaded| loaded.module.as_ref())
    }

    /// Look up a module by name.
    pub fn get(&self, name: &str) -> Option<&dyn Module> {
        self.by_name
            .get(name)
            .map(|&index| self.modules[index].module.as_ref())
    }

    /// Look up a module by name and concrete type.
    pub fn get_as<M: Module>(&self, name: &str) -> Option<&M> {
        self.get(name)?.as_any().downcast_ref::<M>()
    }

    /// The ROM-meta module.
    pub fn rom_module(&self) -> &dyn Module {
        self.modules[0].module.as_ref()
    }

    /// Number of modules.
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Whether the set is empty. Never true for a loaded registry.
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Ask every module to populate its slice of the tree.
    ///
    /// The ROM-meta module goes first so the root exists; the rest follow
    /// ascending sort order, ties kept in load order.
    pub fn populate_tree(&self, tree: &mut ItemTree) -> Result<()> {
        let mut population: Vec<usize> = (1..self.modules.len()).collect();
        population.sort_by_key(|&index| self.modules[index].sort_order);

        self.modules[0].module.load_tree_items(tree)?;
        for index in population {
            self.modules[index].module.load_tree_items(tree)?;
        }
        Ok(())
    }

    /// Route a navigation request, first answer wins.
    pub fn resolve_request(&self, request: &NavRequest) -> Option<ItemId> {
        for loaded in &self.modules {
            if let Some(id) = loaded.module.handle_request(request) {
                return Some(id);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_descriptor(
        name: &'static str,
        depends_on: &'static [&'static str],
    ) -> ModuleDescriptor {
        ModuleDescriptor::new(name, depends_on, 100, move |_project| {
            Ok(Box::new(NoopModule { name }) as Box<dyn Module>)
        })
    }

    struct NoopModule {
        name: &'static str,
    }

    impl Module for NoopModule {
        fn name(&self) -> &'static str {
            self.name
        }

        fn load_tree_items(&self, _tree: &mut ItemTree) -> Result<()> {
            Ok(())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn names(catalog: &[ModuleDescriptor], order: &[usize]) -> Vec<&'static str> {
        order.iter().map(|&index| catalog[index].name()).collect()
    }

    #[test]
    fn test_chain_resolves_depth_first() {
        let catalog = vec![
            noop_descriptor("a", &["b"]),
            noop_descriptor("b", &["c"]),
            noop_descriptor("c", &[]),
        ];
        let order = resolve_load_order(&catalog).unwrap();
        assert_eq!(names(&catalog, &order), vec!["c", "b", "a"]);
    }

    #[test]
    fn test_wave_is_lexicographic() {
        let catalog = vec![
            noop_descriptor("zeta", &[]),
            noop_descriptor("alpha", &[]),
            noop_descriptor("mid", &["alpha", "zeta"]),
        ];
        let order = resolve_load_order(&catalog).unwrap();
        assert_eq!(names(&catalog, &order), vec!["alpha", "zeta", "mid"]);
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let catalog = vec![
            noop_descriptor("d", &["b"]),
            noop_descriptor("c", &["a"]),
            noop_descriptor("b", &[]),
            noop_descriptor("a", &[]),
        ];
        let first = resolve_load_order(&catalog).unwrap();
        for _ in 0..10 {
            assert_eq!(resolve_load_order(&catalog).unwrap(), first);
        }
        assert_eq!(names(&catalog, &first), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_missing_dependency() {
        let catalog = vec![noop_descriptor("a", &["ghost"])];
        assert_eq!(
            resolve_load_order(&catalog),
            Err(DependencyError::MissingDependency {
                module: "a".to_string(),
                requires: "ghost".to_string(),
            })
        );
    }

    #[test]
    fn test_cycle_names_involved_modules() {
        let catalog = vec![
            noop_descriptor("a", &["b"]),
            noop_descriptor("b", &["a"]),
            noop_descriptor("free", &[]),
        ];
        match resolve_load_order(&catalog) {
            Err(DependencyError::DependencyCycle { modules }) => {
                assert_eq!(modules, vec!["a".to_string(), "b".to_string()]);
            }
            other => panic!("expected cycle error, got {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_module_name() {
        let catalog = vec![noop_descriptor("a", &[]), noop_descriptor("a", &[])];
        assert!(matches!(
            resolve_load_order(&catalog),
            Err(DependencyError::DuplicateModule { .. })
        ));
    }
}
