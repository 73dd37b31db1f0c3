//! Error types for the RomForge project core.

use std::fmt;
use std::io;

use crate::tree::TreeError;

/// The main error type for project core operations.
#[derive(Debug)]
pub enum ProjectError {
    /// A requested ROM file path does not exist in the container.
    NotFound {
        /// The ROM-internal path that was requested.
        path: String,
    },
    /// A handler's deserialiser rejected the bytes.
    Parse {
        /// The ROM-internal path whose bytes were rejected.
        path: String,
        /// Handler-provided description of the failure.
        message: String,
    },
    /// A handler's serialiser rejected the model.
    Serialize {
        /// The ROM-internal path whose model was rejected.
        path: String,
        /// Handler-provided description of the failure.
        message: String,
    },
    /// Disk read or write failed.
    Io(io::Error),
    /// The module registry cannot resolve a load order.
    Dependency(DependencyError),
    /// A caller violated an API contract.
    Contract(String),
    /// Item tree operation failed.
    Tree(TreeError),
}

impl ProjectError {
    /// Build a `NotFound` error for a ROM-internal path.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    /// Build a `Parse` error for a ROM-internal path.
    pub fn parse(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Build a `Serialize` error for a ROM-internal path.
    pub fn serialize(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Serialize {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Build a `Contract` error from a description of the violation.
    pub fn contract(message: impl Into<String>) -> Self {
        Self::Contract(message.into())
    }

    /// A short stable identifier for the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not-found",
            Self::Parse { .. } => "parse",
            Self::Serialize { .. } => "serialize",
            Self::Io(_) => "io",
            Self::Dependency(_) => "dependency",
            Self::Contract(_) => "contract",
            Self::Tree(_) => "tree",
        }
    }
}

impl fmt::Display for ProjectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { path } => {
                write!(f, "ROM file not found: {path}")
            }
            Self::Parse { path, message } => {
                write!(f, "Failed to parse {path}: {message}")
            }
            Self::Serialize { path, message } => {
                write!(f, "Failed to serialise {path}: {message}")
            }
            Self::Io(err) => write!(f, "I/O error: {err}"),
            Self::Dependency(err) => write!(f, "Module dependency error: {err}"),
            Self::Contract(message) => write!(f, "API contract violation: {message}"),
            Self::Tree(err) => write!(f, "Item tree error: {err}"),
        }
    }
}

impl std::error::Error for ProjectError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Dependency(err) => Some(err),
            Self::Tree(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for ProjectError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<DependencyError> for ProjectError {
    fn from(err: DependencyError) -> Self {
        Self::Dependency(err)
    }
}

impl From<TreeError> for ProjectError {
    fn from(err: TreeError) -> Self {
        Self::Tree(err)
    }
}

/// Errors raised while resolving the module load order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyError {
    /// Two catalog entries share the same module name.
    DuplicateModule {
        /// The name that appeared more than once.
        name: String,
    },
    /// A module names a dependency that is not in the catalog.
    MissingDependency {
        /// The module declaring the dependency.
        module: String,
        /// The dependency that could not be found.
        requires: String,
    },
    /// The dependency graph contains a cycle.
    DependencyCycle {
        /// The modules involved in the cycle, sorted by name.
        modules: Vec<String>,
    },
    /// The catalog does not contain the ROM-meta module.
    RomMetaMissing,
    /// The ROM-meta module declares dependencies, which it must not.
    RomMetaDependent,
}

impl fmt::Display for DependencyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateModule { name } => {
                write!(f, "Module {name:?} is registered more than once")
            }
            Self::MissingDependency { module, requires } => {
                write!(f, "Module {module:?} depends on unknown module {requires:?}")
            }
            Self::DependencyCycle { modules } => {
                write!(f, "Dependency cycle involving modules: {}", modules.join(", "))
            }
            Self::RomMetaMissing => {
                write!(f, "The ROM-meta module is missing from the catalog")
            }
            Self::RomMetaDependent => {
                write!(f, "The ROM-meta module must not declare dependencies")
            }
        }
    }
}

impl std::error::Error for DependencyError {}

/// A specialized Result type for project core operations.
pub type Result<T> = std::result::Result<T, ProjectError>;

/// The normalised payload carried by every error signal.
///
/// Signals always carry this single shape rather than the raw error object,
/// so subscribers can render it without downcasting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorValue {
    /// Stable kind identifier, e.g. `"parse"` or `"io"`.
    pub kind: &'static str,
    /// Human-readable description.
    pub message: String,
}

impl ErrorValue {
    /// Build an error value from a kind and message.
    pub fn new(kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl From<&ProjectError> for ErrorValue {
    fn from(err: &ProjectError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl From<ProjectError> for ErrorValue {
    fn from(err: ProjectError) -> Self {
        Self::from(&err)
    }
}
