//! Identity shared by every node kind: name, parent linkage, handle slot.
//!
//! Holds no backend logic. Strong references only ever point rootward (a
//! child keeps its parent alive for path computation and ascent, never the
//! other way around), so node graphs cannot form ownership cycles.

use std::sync::Arc;

use crate::dir::VirtualDirectory;

/// Mutable identity of a node, generic over the backend handle kind.
///
/// `handle == None` is the *unloaded* state: the node is known by name and
/// position but not yet bound to a concrete backend object. A `move_to`
/// rewrites all three fields at once so the object itself survives the move.
pub(crate) struct NodeState<H> {
    pub(crate) name: String,
    pub(crate) parent: Option<Arc<VirtualDirectory>>,
    pub(crate) handle: Option<H>,
}

impl<H> NodeState<H> {
    pub(crate) fn new(
        name: impl Into<String>,
        parent: Option<Arc<VirtualDirectory>>,
        handle: Option<H>,
    ) -> Self {
        Self {
            name: name.into(),
            parent,
            handle,
        }
    }

    pub(crate) fn is_loaded(&self) -> bool {
        self.handle.is_some()
    }

    /// Path recomputed on demand by walking parent links; never cached, since
    /// ancestors can be renamed or moved after this node was constructed.
    pub(crate) fn path(&self) -> String {
        match &self.parent {
            Some(parent) => format!("{}/{}", parent.path(), self.name),
            None => self.name.clone(),
        }
    }
}
