//! Buffers and the document store.

use std::collections::HashMap;

use macl_interp::{Document, DocumentId, Host, Value};

use crate::command::MacroCommandData;

/// A shell command a routine asked for; the workspace runs it once the
/// machine has suspended.
#[derive(Debug, Clone)]
pub(crate) struct PendingShell {
    pub command: String,
    pub input: String,
}

/// One open buffer. Macro-visible output and macro bookkeeping live
/// here; at most one macro command is attached to a buffer at a time.
pub struct Buffer {
    id: DocumentId,
    pub name: String,
    /// Everything `t_print` has written.
    pub printed: String,
    /// The in-progress banner, when one is showing.
    pub banner: Option<String>,
    /// Failure message of the last macro run on this buffer.
    pub last_error: Option<String>,
    /// Value the last completed macro returned.
    pub last_result: Option<Value>,
    pub(crate) macro_cmd: Option<MacroCommandData>,
    pub(crate) pending_shell: Option<PendingShell>,
}

impl Buffer {
    fn new(id: DocumentId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            printed: String::new(),
            banner: None,
            last_error: None,
            last_result: None,
            macro_cmd: None,
            pending_shell: None,
        }
    }

    /// Whether a macro command is attached (running or suspended).
    pub fn macro_running(&self) -> bool {
        self.macro_cmd.is_some()
    }
}

impl Document for Buffer {
    fn id(&self) -> DocumentId {
        self.id
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

/// All open buffers, addressed by id. This is the [`Host`] the machine
/// executes against; a buffer that disappears mid-run makes the next
/// native call fail rather than dangle.
#[derive(Default)]
pub struct DocumentStore {
    buffers: HashMap<DocumentId, Buffer>,
    next_id: u64,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, name: impl Into<String>) -> DocumentId {
        self.next_id += 1;
        let id = DocumentId(self.next_id);
        self.buffers.insert(id, Buffer::new(id, name));
        id
    }

    pub fn get(&self, id: DocumentId) -> Option<&Buffer> {
        self.buffers.get(&id)
    }

    pub fn get_mut(&mut self, id: DocumentId) -> Option<&mut Buffer> {
        self.buffers.get_mut(&id)
    }

    pub fn remove(&mut self, id: DocumentId) -> Option<Buffer> {
        self.buffers.remove(&id)
    }

    pub fn contains(&self, id: DocumentId) -> bool {
        self.buffers.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

impl Host for DocumentStore {
    fn document(&mut self, id: DocumentId) -> Option<&mut dyn Document> {
        self.buffers.get_mut(&id).map(|b| b as &mut dyn Document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_creates_distinct_ids() {
        let mut store = DocumentStore::new();
        let a = store.create("a");
        let b = store.create("b");
        assert_ne!(a, b);
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(a).unwrap().name, "a");
    }

    #[test]
    fn test_removed_buffer_vanishes_from_host() {
        let mut store = DocumentStore::new();
        let id = store.create("a");
        assert!(store.document(id).is_some());
        store.remove(id);
        assert!(store.document(id).is_none());
    }
}
