//! Host collaborator traits.
//!
//! The interpreter never owns editor state. It remembers documents by
//! id and asks the [`Host`] to resolve an id to a live [`Document`] for
//! the duration of one native call. A host that no longer has the
//! document answers `None`, and the machine aborts the call instead of
//! touching freed state.

use std::any::Any;

/// Stable identity of a document, valid across suspensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocumentId(pub u64);

/// One open document a macro can operate on.
///
/// Native routines that know their concrete host downcast through
/// [`Document::as_any_mut`].
pub trait Document {
    fn id(&self) -> DocumentId;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Resolves document ids for the machine.
pub trait Host {
    /// Borrow the document with the given id, if it still exists.
    fn document(&mut self, id: DocumentId) -> Option<&mut dyn Document>;
}
