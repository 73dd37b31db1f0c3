//! Logging and debugging facilities.
//!
//! The crate is instrumented with the `tracing` crate. To see logs, install
//! a subscriber in the application:
//!
//! ```ignore
//! tracing_subscriber::fmt::init();
//! ```
//!
//! Use the constants in [`targets`] with `tracing` directives to filter by
//! subsystem, e.g. `romforge_core::project=debug`.

use std::fmt::Write as FmtWrite;

use crate::tree::{ItemId, ItemTree};

/// Target names for log filtering.
pub mod targets {
    /// Whole-crate target prefix.
    pub const CORE: &str = "romforge_core";
    /// UI dispatch queue.
    pub const DISPATCH: &str = "romforge_core::dispatch";
    /// Background task runner.
    pub const RUNNER: &str = "romforge_core::runner";
    /// Signal bus.
    pub const BUS: &str = "romforge_core::bus";
    /// Item tree.
    pub const TREE: &str = "romforge_core::tree";
    /// Handler registry.
    pub const HANDLERS: &str = "romforge_core::handlers";
    /// Module registry and resolver.
    pub const MODULE: &str = "romforge_core::module";
    /// Project state and file cache.
    pub const PROJECT: &str = "romforge_core::project";
    /// Lifecycle orchestration.
    pub const SESSION: &str = "romforge_core::session";
}

/// Style options for item tree visualization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TreeStyle {
    /// ASCII characters for tree branches.
    Ascii,
    /// Unicode box-drawing characters.
    #[default]
    Unicode,
}

/// Configuration for item tree debug output.
#[derive(Debug, Clone)]
pub struct TreeFormatOptions {
    /// The style of tree visualization.
    pub style: TreeStyle,
    /// Whether to show the owning module of each entry.
    pub show_modules: bool,
    /// Whether to show icon keys.
    pub show_icons: bool,
}

impl Default for TreeFormatOptions {
    fn default() -> Self {
        Self {
            style: TreeStyle::default(),
            show_modules: true,
            show_icons: false,
        }
    }
}

/// Debug utility for visualizing the item tree.
///
/// Labels are printed as presented, so modified entries show their `*`
/// prefix.
#[derive(Debug, Clone, Default)]
pub struct ItemTreeDebug {
    options: TreeFormatOptions,
}

impl ItemTreeDebug {
    /// Create with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with custom options.
    pub fn with_options(options: TreeFormatOptions) -> Self {
        Self { options }
    }

    /// Format the whole tree, one line per entry.
    pub fn format_tree(&self, tree: &ItemTree) -> String {
        let mut out = String::new();
        if let Some(root) = tree.root() {
            self.format_node(tree, root, "", true, true, &mut out);
        } else {
            out.push_str("(empty tree)\n");
        }
        out
    }

    fn format_node(
        &self,
        tree: &ItemTree,
        id: ItemId,
        prefix: &str,
        is_last: bool,
        is_root: bool,
        out: &mut String,
    ) {
        let (branch, continuation) = match (self.options.style, is_last) {
            _ if is_root => ("", ""),
            (TreeStyle::Unicode, true) => ("└── ", "    "),
            (TreeStyle::Unicode, false) => ("├── ", "│   "),
            (TreeStyle::Ascii, true) => ("`-- ", "    "),
            (TreeStyle::Ascii, false) => ("|-- ", "|   "),
        };

        let label = tree.label(id).unwrap_or("<stale>");
        let _ = write!(out, "{prefix}{branch}{label}");
        if let Ok(entry) = tree.entry(id) {
            if self.options.show_modules {
                let _ = write!(out, " [{}]", entry.module);
            }
            if self.options.show_icons {
                let _ = write!(out, " ({})", entry.icon);
            }
        }
        out.push('\n');

        let children: Vec<ItemId> = tree.children(id).map(|c| c.to_vec()).unwrap_or_default();
        let child_prefix = if is_root {
            String::new()
        } else {
            format!("{prefix}{continuation}")
        };
        let count = children.len();
        for (index, child) in children.into_iter().enumerate() {
            self.format_node(tree, child, &child_prefix, index + 1 == count, false, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{ItemData, ItemTreeEntry, Recursion, ViewFactory, ViewHandle};
    use std::sync::Arc;

    fn entry(name: &str) -> ItemTreeEntry {
        let factory: ViewFactory = Arc::new(|_, _| Ok(Arc::new(()) as ViewHandle));
        ItemTreeEntry::new("folder", name, "rom", factory, Arc::new(()) as ItemData)
    }

    #[test]
    fn test_format_empty_tree() {
        let formatted = ItemTreeDebug::new().format_tree(&ItemTree::new());
        assert_eq!(formatted, "(empty tree)\n");
    }

    #[test]
    fn test_format_shows_modified_labels() {
        let mut tree = ItemTree::new();
        let root = tree.set_root(entry("game.nds")).unwrap();
        let child = tree.add_entry(root, entry("Items")).unwrap();
        tree.add_entry(root, entry("Scripts")).unwrap();
        tree.finalise();
        tree.mark_modified(child, Recursion::Up).unwrap();

        let formatted = ItemTreeDebug::with_options(TreeFormatOptions {
            style: TreeStyle::Ascii,
            show_modules: false,
            show_icons: false,
        })
        .format_tree(&tree);

        assert!(formatted.contains("*game.nds"));
        assert!(formatted.contains("|-- *Items"));
        assert!(formatted.contains("`-- Scripts"));
    }
}
