//! The navigation item tree.
//!
//! Every module contributes entries to one [`ItemTree`] per project; the GUI
//! renders it as the left-hand navigation pane. Entries carry an icon key, a
//! display name, the owning module, a view factory and opaque item data. The
//! tree also tracks modification state: marking an entry modified can
//! propagate to ancestors or descendants, and the presented label of a
//! modified entry is its name prefixed with `*`, so the save-required
//! indicator is visible at every level.
//!
//! Entries are stored in an arena; an [`ItemId`] is a stable handle that
//! survives in-place updates and becomes invalid when the entry or one of
//! its ancestors is deleted.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use slotmap::{SlotMap, new_key_type};

use crate::error::Result;
use crate::module::Module;

new_key_type! {
    /// A stable handle to an entry in the item tree.
    ///
    /// Remains valid across label and data updates; invalidated when the
    /// entry or an ancestor is deleted.
    pub struct ItemId;
}

/// Opaque payload handed to a view factory together with the module.
pub type ItemData = Arc<dyn Any + Send + Sync>;

/// Opaque view produced by a view factory.
pub type ViewHandle = Arc<dyn Any + Send + Sync>;

/// Factory invoked on the worker to construct the view for an entry.
pub type ViewFactory = Arc<dyn Fn(&dyn Module, &ItemData) -> Result<ViewHandle> + Send + Sync>;

/// Errors raised by item tree operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    /// The entry handle is invalid or the entry has been deleted.
    InvalidEntryRef,
    /// A root entry has already been installed.
    RootAlreadyInstalled,
}

impl fmt::Display for TreeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEntryRef => write!(f, "Invalid or deleted tree entry handle"),
            Self::RootAlreadyInstalled => write!(f, "The tree already has a root entry"),
        }
    }
}

impl std::error::Error for TreeError {}

/// Result type for item tree operations.
pub type TreeResult<T> = std::result::Result<T, TreeError>;

/// How a modification mark spreads through the tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Recursion {
    /// Mark only the given entry.
    None,
    /// Mark the entry and every ancestor up to the root.
    Up,
    /// Mark the entry and every descendant.
    Down,
}

/// The user-visible content of one tree entry.
#[derive(Clone)]
pub struct ItemTreeEntry {
    /// Icon key resolved by the GUI theme.
    pub icon: String,
    /// Display name. The presented label derives from this and the
    /// modification state.
    pub name: String,
    /// Name of the owning module.
    pub module: String,
    /// Factory constructing the entry's view.
    pub view_factory: ViewFactory,
    /// Opaque payload passed to the factory.
    pub item_data: ItemData,
}

impl ItemTreeEntry {
    /// Create a new entry.
    pub fn new(
        icon: impl Into<String>,
        name: impl Into<String>,
        module: impl Into<String>,
        view_factory: ViewFactory,
        item_data: ItemData,
    ) -> Self {
        Self {
            icon: icon.into(),
            name: name.into(),
            module: module.into(),
            view_factory,
            item_data,
        }
    }
}

impl fmt::Debug for ItemTreeEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ItemTreeEntry")
            .field("icon", &self.icon)
            .field("name", &self.name)
            .field("module", &self.module)
            .finish_non_exhaustive()
    }
}

/// Internal node storage.
struct NodeData {
    entry: ItemTreeEntry,
    parent: Option<ItemId>,
    children: Vec<ItemId>,
    modified: bool,
    label: String,
}

impl NodeData {
    fn new(entry: ItemTreeEntry, parent: Option<ItemId>) -> Self {
        let label = entry.name.clone();
        Self {
            entry,
            parent,
            children: Vec::new(),
            modified: false,
            label,
        }
    }

    fn derive_label(&mut self) {
        self.label = if self.modified {
            format!("*{}", self.entry.name)
        } else {
            self.entry.name.clone()
        };
    }
}

/// The navigation hierarchy with modification tracking.
pub struct ItemTree {
    nodes: SlotMap<ItemId, NodeData>,
    root: Option<ItemId>,
    finalised: bool,
}

impl ItemTree {
    /// Create an empty tree.
    pub fn new() -> Self {
        Self {
            nodes: SlotMap::with_key(),
            root: None,
            finalised: false,
        }
    }

    /// Install the root entry. May only be called once.
    pub fn set_root(&mut self, entry: ItemTreeEntry) -> TreeResult<ItemId> {
        if self.root.is_some() {
            return Err(TreeError::RootAlreadyInstalled);
        }
        let id = self.nodes.insert(NodeData::new(entry, None));
        self.root = Some(id);
        tracing::trace!(target: "romforge_core::tree", ?id, "root entry installed");
        Ok(id)
    }

    /// The root entry, if one has been installed.
    pub fn root(&self) -> Option<ItemId> {
        self.root
    }

    /// Append a child entry under `parent`, in insertion order.
    pub fn add_entry(&mut self, parent: ItemId, entry: ItemTreeEntry) -> TreeResult<ItemId> {
        if !self.nodes.contains_key(parent) {
            return Err(TreeError::InvalidEntryRef);
        }
        let id = self.nodes.insert(NodeData::new(entry, Some(parent)));
        self.nodes[parent].children.push(id);
        self.nodes[id].derive_label();
        Ok(id)
    }

    /// Replace the content of an entry in place.
    ///
    /// Parent and modification flag are preserved; the flag is then topped
    /// up from the children so a modified subtree stays visibly modified.
    pub fn update(&mut self, id: ItemId, entry: ItemTreeEntry) -> TreeResult<()> {
        if !self.nodes.contains_key(id) {
            return Err(TreeError::InvalidEntryRef);
        }
        let children_modified = self.nodes[id]
            .children
            .iter()
            .any(|&child| self.nodes[child].modified);
        let node = &mut self.nodes[id];
        node.entry = entry;
        node.modified = node.modified || children_modified;
        node.derive_label();
        Ok(())
    }

    /// Remove all descendants of an entry.
    ///
    /// Their handles become invalid. Returns the number of removed entries.
    pub fn delete_children(&mut self, id: ItemId) -> TreeResult<usize> {
        let descendants = self.collect_descendants(id)?;
        let count = descendants.len();
        for child in descendants {
            self.nodes.remove(child);
        }
        self.nodes[id].children.clear();
        tracing::trace!(target: "romforge_core::tree", ?id, count, "deleted child entries");
        Ok(count)
    }

    /// Direct children in insertion order.
    pub fn children(&self, id: ItemId) -> TreeResult<&[ItemId]> {
        self.nodes
            .get(id)
            .map(|node| node.children.as_slice())
            .ok_or(TreeError::InvalidEntryRef)
    }

    /// The parent of an entry, `None` for the root.
    pub fn parent(&self, id: ItemId) -> TreeResult<Option<ItemId>> {
        self.nodes
            .get(id)
            .map(|node| node.parent)
            .ok_or(TreeError::InvalidEntryRef)
    }

    /// The content of an entry.
    pub fn entry(&self, id: ItemId) -> TreeResult<&ItemTreeEntry> {
        self.nodes
            .get(id)
            .map(|node| &node.entry)
            .ok_or(TreeError::InvalidEntryRef)
    }

    /// The presented label: the name, prefixed with `*` when modified.
    pub fn label(&self, id: ItemId) -> TreeResult<&str> {
        self.nodes
            .get(id)
            .map(|node| node.label.as_str())
            .ok_or(TreeError::InvalidEntryRef)
    }

    /// Whether an entry carries the modification mark.
    pub fn is_modified(&self, id: ItemId) -> TreeResult<bool> {
        self.nodes
            .get(id)
            .map(|node| node.modified)
            .ok_or(TreeError::InvalidEntryRef)
    }

    /// Whether a handle still points at a live entry.
    pub fn contains(&self, id: ItemId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the tree has no entries.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Find a direct child by display name.
    pub fn find_child_by_name(&self, id: ItemId, name: &str) -> TreeResult<Option<ItemId>> {
        let children = self.children(id)?;
        for &child in children {
            if self.nodes[child].entry.name == name {
                return Ok(Some(child));
            }
        }
        Ok(None)
    }

    /// Mark an entry modified, optionally spreading the mark.
    pub fn mark_modified(&mut self, id: ItemId, recursion: Recursion) -> TreeResult<()> {
        if !self.nodes.contains_key(id) {
            return Err(TreeError::InvalidEntryRef);
        }
        match recursion {
            Recursion::None => {
                self.set_modified(id, true);
            }
            Recursion::Up => {
                let mut current = Some(id);
                while let Some(node) = current {
                    self.set_modified(node, true);
                    current = self.nodes[node].parent;
                }
            }
            Recursion::Down => {
                self.set_modified(id, true);
                for child in self.collect_descendants(id)? {
                    self.set_modified(child, true);
                }
            }
        }
        Ok(())
    }

    /// Clear the modification mark on every entry.
    pub fn clear_modified(&mut self) {
        let ids: Vec<ItemId> = self.nodes.keys().collect();
        for id in ids {
            self.set_modified(id, false);
        }
    }

    /// Mark the tree as fully populated.
    ///
    /// Recomputes every label; afterwards labels are kept current eagerly on
    /// each mutation. Idempotent.
    pub fn finalise(&mut self) {
        self.finalised = true;
        let ids: Vec<ItemId> = self.nodes.keys().collect();
        for id in ids {
            self.nodes[id].derive_label();
        }
        tracing::debug!(target: "romforge_core::tree", entries = self.nodes.len(), "tree finalised");
    }

    /// Whether initial population has completed.
    pub fn is_finalised(&self) -> bool {
        self.finalised
    }

    fn set_modified(&mut self, id: ItemId, modified: bool) {
        let node = &mut self.nodes[id];
        node.modified = modified;
        node.derive_label();
    }

    /// Collect all descendant ids, children before parents.
    fn collect_descendants(&self, id: ItemId) -> TreeResult<Vec<ItemId>> {
        let mut result = Vec::new();
        self.collect_descendants_recursive(id, &mut result)?;
        Ok(result)
    }

    fn collect_descendants_recursive(
        &self,
        id: ItemId,
        result: &mut Vec<ItemId>,
    ) -> TreeResult<()> {
        let node = self.nodes.get(id).ok_or(TreeError::InvalidEntryRef)?;
        for &child in &node.children {
            self.collect_descendants_recursive(child, result)?;
            result.push(child);
        }
        Ok(())
    }
}

impl Default for ItemTree {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str) -> ItemTreeEntry {
        let factory: ViewFactory = Arc::new(|_, _| Ok(Arc::new(()) as ViewHandle));
        ItemTreeEntry::new("folder", name, "test", factory, Arc::new(()) as ItemData)
    }

    fn three_levels() -> (ItemTree, ItemId, ItemId, ItemId) {
        let mut tree = ItemTree::new();
        let root = tree.set_root(entry("root")).unwrap();
        let mid = tree.add_entry(root, entry("mid")).unwrap();
        let leaf = tree.add_entry(mid, entry("leaf")).unwrap();
        tree.finalise();
        (tree, root, mid, leaf)
    }

    #[test]
    fn test_single_root() {
        let mut tree = ItemTree::new();
        tree.set_root(entry("root")).unwrap();
        assert_eq!(
            tree.set_root(entry("other")),
            Err(TreeError::RootAlreadyInstalled)
        );
    }

    #[test]
    fn test_children_in_insertion_order() {
        let mut tree = ItemTree::new();
        let root = tree.set_root(entry("root")).unwrap();
        let a = tree.add_entry(root, entry("a")).unwrap();
        let b = tree.add_entry(root, entry("b")).unwrap();
        let c = tree.add_entry(root, entry("c")).unwrap();

        assert_eq!(tree.children(root).unwrap(), &[a, b, c]);
    }

    #[test]
    fn test_label_derivation() {
        let (mut tree, _, _, leaf) = three_levels();

        assert_eq!(tree.label(leaf).unwrap(), "leaf");
        tree.mark_modified(leaf, Recursion::None).unwrap();
        assert_eq!(tree.label(leaf).unwrap(), "*leaf");
    }

    #[test]
    fn test_mark_up_propagates_to_root() {
        let (mut tree, root, mid, leaf) = three_levels();

        tree.mark_modified(leaf, Recursion::Up).unwrap();

        for id in [root, mid, leaf] {
            assert!(tree.is_modified(id).unwrap());
            assert!(tree.label(id).unwrap().starts_with('*'));
        }
    }

    #[test]
    fn test_mark_down_covers_subtree() {
        let (mut tree, root, mid, leaf) = three_levels();

        tree.mark_modified(root, Recursion::Down).unwrap();

        assert!(tree.is_modified(root).unwrap());
        assert!(tree.is_modified(mid).unwrap());
        assert!(tree.is_modified(leaf).unwrap());
    }

    #[test]
    fn test_mark_none_is_local() {
        let (mut tree, root, mid, leaf) = three_levels();

        tree.mark_modified(mid, Recursion::None).unwrap();

        assert!(!tree.is_modified(root).unwrap());
        assert!(tree.is_modified(mid).unwrap());
        assert!(!tree.is_modified(leaf).unwrap());
    }

    #[test]
    fn test_clear_modified() {
        let (mut tree, root, mid, leaf) = three_levels();

        tree.mark_modified(leaf, Recursion::Up).unwrap();
        tree.clear_modified();

        for id in [root, mid, leaf] {
            assert!(!tree.is_modified(id).unwrap());
            assert!(!tree.label(id).unwrap().starts_with('*'));
        }
    }

    #[test]
    fn test_update_preserves_parent_and_flag() {
        let (mut tree, _, mid, _) = three_levels();

        tree.mark_modified(mid, Recursion::None).unwrap();
        tree.update(mid, entry("renamed")).unwrap();

        assert!(tree.is_modified(mid).unwrap());
        assert_eq!(tree.label(mid).unwrap(), "*renamed");
        assert!(tree.parent(mid).unwrap().is_some());
    }

    #[test]
    fn test_update_rederives_from_children() {
        let (mut tree, _, mid, leaf) = three_levels();

        tree.mark_modified(leaf, Recursion::None).unwrap();
        // mid itself is unmarked, but its child is modified.
        tree.update(mid, entry("mid")).unwrap();

        assert!(tree.is_modified(mid).unwrap());
    }

    #[test]
    fn test_delete_children_invalidates_refs() {
        let (mut tree, root, mid, leaf) = three_levels();

        let removed = tree.delete_children(root).unwrap();
        assert_eq!(removed, 2);

        assert!(tree.contains(root));
        assert!(!tree.contains(mid));
        assert!(!tree.contains(leaf));
        assert_eq!(tree.children(mid), Err(TreeError::InvalidEntryRef));
        assert_eq!(tree.children(root).unwrap(), &[] as &[ItemId]);
    }

    #[test]
    fn test_find_child_by_name() {
        let mut tree = ItemTree::new();
        let root = tree.set_root(entry("root")).unwrap();
        let b = tree.add_entry(root, entry("b")).unwrap();
        tree.add_entry(root, entry("a")).unwrap();

        assert_eq!(tree.find_child_by_name(root, "b").unwrap(), Some(b));
        assert_eq!(tree.find_child_by_name(root, "zzz").unwrap(), None);
    }

    #[test]
    fn test_finalise_is_idempotent() {
        let (mut tree, root, _, _) = three_levels();

        tree.mark_modified(root, Recursion::None).unwrap();
        tree.finalise();
        tree.finalise();

        assert!(tree.is_finalised());
        assert_eq!(tree.label(root).unwrap(), "*root");
    }
}
