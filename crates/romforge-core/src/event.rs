//! UI signal definitions for the project core.
//!
//! The core communicates with the GUI exclusively through the closed set of
//! signals below, delivered via [`crate::UiEventBus`]. Subscribers receive a
//! typed [`UiSignal`] value and match on it; there is no name-based dispatch.

use std::fmt;

use crate::error::ErrorValue;
use crate::tree::{ItemData, ViewHandle};

/// A named event with a fixed payload, emitted toward the UI.
pub enum UiSignal {
    /// A project finished opening and is installed.
    ProjectOpened,
    /// Opening a project failed; no project is installed.
    ProjectOpenedError(ErrorValue),
    /// The current project was saved to disk.
    ProjectSaved,
    /// Saving failed; modifications are preserved for retry.
    ProjectSavedError(ErrorValue),
    /// A view for a tree entry finished construction.
    ViewLoaded {
        /// Name of the module owning the entry.
        module: String,
        /// The constructed view.
        view: ViewHandle,
        /// The entry's opaque payload, echoed back for the UI.
        item_data: ItemData,
    },
    /// View construction failed; the UI reverts the selection.
    ViewLoadedError(ErrorValue),
}

impl UiSignal {
    /// The discriminant of this signal, for subscription filtering.
    pub fn kind(&self) -> SignalKind {
        match self {
            Self::ProjectOpened => SignalKind::ProjectOpened,
            Self::ProjectOpenedError(_) => SignalKind::ProjectOpenedError,
            Self::ProjectSaved => SignalKind::ProjectSaved,
            Self::ProjectSavedError(_) => SignalKind::ProjectSavedError,
            Self::ViewLoaded { .. } => SignalKind::ViewLoaded,
            Self::ViewLoadedError(_) => SignalKind::ViewLoadedError,
        }
    }

    /// The error payload, for the error variants.
    pub fn error(&self) -> Option<&ErrorValue> {
        match self {
            Self::ProjectOpenedError(err)
            | Self::ProjectSavedError(err)
            | Self::ViewLoadedError(err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Debug for UiSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProjectOpened => write!(f, "ProjectOpened"),
            Self::ProjectOpenedError(err) => write!(f, "ProjectOpenedError({err})"),
            Self::ProjectSaved => write!(f, "ProjectSaved"),
            Self::ProjectSavedError(err) => write!(f, "ProjectSavedError({err})"),
            Self::ViewLoaded { module, .. } => write!(f, "ViewLoaded({module})"),
            Self::ViewLoadedError(err) => write!(f, "ViewLoadedError({err})"),
        }
    }
}

/// Discriminants of [`UiSignal`], used to filter subscriptions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SignalKind {
    /// Matches [`UiSignal::ProjectOpened`].
    ProjectOpened,
    /// Matches [`UiSignal::ProjectOpenedError`].
    ProjectOpenedError,
    /// Matches [`UiSignal::ProjectSaved`].
    ProjectSaved,
    /// Matches [`UiSignal::ProjectSavedError`].
    ProjectSavedError,
    /// Matches [`UiSignal::ViewLoaded`].
    ViewLoaded,
    /// Matches [`UiSignal::ViewLoadedError`].
    ViewLoadedError,
}

static_assertions::assert_impl_all!(UiSignal: Send);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        let err = ErrorValue::new("io", "disk full");
        assert_eq!(UiSignal::ProjectOpened.kind(), SignalKind::ProjectOpened);
        assert_eq!(
            UiSignal::ProjectSavedError(err.clone()).kind(),
            SignalKind::ProjectSavedError
        );
        assert_eq!(
            UiSignal::ViewLoadedError(err).kind(),
            SignalKind::ViewLoadedError
        );
    }

    #[test]
    fn test_error_accessor() {
        let err = ErrorValue::new("parse", "bad header");
        let signal = UiSignal::ProjectOpenedError(err.clone());
        assert_eq!(signal.error(), Some(&err));
        assert!(UiSignal::ProjectSaved.error().is_none());
    }
}
