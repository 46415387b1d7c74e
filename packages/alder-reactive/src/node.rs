//! Reactive nodes and the link records connecting them.

use std::any::Any;
use std::ops::BitOr;

use slotmap::new_key_type;
use smallvec::SmallVec;

use crate::root::{EqualsFn, NodeCallback, Root};

new_key_type! {
    /// Id of a node in the reactive graph.
    pub(crate) struct NodeId;
}

new_key_type! {
    /// Id of a producer→consumer edge. Edges live in a slot map so that
    /// detached records are recycled instead of reallocated.
    pub(crate) struct LinkId;
}

/// What a node is. Propagation and refresh branch on this tag; the payload
/// (`value`, `callback`) is interpreted accordingly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NodeKind {
    /// A writable cell. Has a value, never has dependencies.
    Source,
    /// A lazily recomputed derivation. Has a value and a callback.
    Memo,
    /// A side-effecting subscriber. Has a callback, no value.
    Effect,
    /// A lifecycle container. Participates in no propagation.
    Scope,
}

/// Status bits shared by every node.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct NodeFlags(u8);

impl NodeFlags {
    /// The node is inside its own execution; reads capture dependencies onto
    /// it and propagation must not re-mark it.
    pub const TRACKING: Self = Self(1 << 0);
    /// The node is queued in the effect runner.
    pub const NOTIFIED: Self = Self(1 << 1);
    /// An input definitely changed; recompute unconditionally on pull.
    pub const DIRTY: Self = Self(1 << 2);
    /// An ancestor may have changed; verify dependencies before trusting the
    /// cached value.
    pub const PENDING: Self = Self(1 << 3);
    /// The effect may re-queue itself from within its own execution.
    pub const RECURSIVE: Self = Self(1 << 4);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    /// Either `DIRTY` or `PENDING` is set.
    pub fn is_stale(self) -> bool {
        self.intersects(Self::DIRTY | Self::PENDING)
    }
}

impl BitOr for NodeFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::fmt::Debug for NodeFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut set = f.debug_set();
        for (bit, name) in [
            (Self::TRACKING, "TRACKING"),
            (Self::NOTIFIED, "NOTIFIED"),
            (Self::DIRTY, "DIRTY"),
            (Self::PENDING, "PENDING"),
            (Self::RECURSIVE, "RECURSIVE"),
        ] {
            if self.contains(bit) {
                set.entry(&name);
            }
        }
        set.finish()
    }
}

/// A producer→consumer edge. Every link is threaded through two doubly-linked
/// lists at once: the producer's subscriber list (walked by propagation) and
/// the consumer's dependency list (walked by refresh, in read order).
pub(crate) struct Link {
    pub producer: NodeId,
    pub consumer: NodeId,
    /// Neighbors in the producer's subscriber list.
    pub prev_sub: LinkId,
    pub next_sub: LinkId,
    /// Neighbors in the consumer's dependency list.
    pub prev_dep: LinkId,
    pub next_dep: LinkId,
    /// The producer's version when this dependency was last captured. A
    /// mismatch during a pending check means the producer has since produced
    /// a new value.
    pub seen_version: u64,
}

/// A node in the reactive graph. The header (kind, flags, version, list
/// heads) is uniform across kinds so that propagation and refresh can walk
/// the graph without caring what a node computes.
pub(crate) struct ReactiveNode {
    pub kind: NodeKind,
    pub flags: NodeFlags,
    /// Bumped every time the observable value changes.
    pub version: u64,
    /// Epoch of the execution that last captured this node as a dependency.
    /// Suppresses duplicate edges within a single execution.
    pub tracked_epoch: u64,
    /// Head of the dependency list (links in read order).
    pub deps_head: LinkId,
    /// Head of the subscriber list (newest first).
    pub subs_head: LinkId,
    /// Value of the node, if any. Sources always have one; memos after their
    /// first evaluation; effects and scopes never.
    pub value: Option<Box<dyn Any>>,
    /// Callback run to bring the node up to date. Returns whether the value
    /// changed. `None` for sources and scopes.
    pub callback: Option<NodeCallback>,
    /// Equality predicate deciding whether a write to a source should
    /// propagate. Memos embed theirs in the callback instead.
    pub equals: Option<EqualsFn>,
    /// The node that owns this node, or the null key at the top level.
    pub parent: NodeId,
    /// Nodes owned by this node, in creation order.
    pub children: SmallVec<[NodeId; 4]>,
    /// Callbacks run untracked before every re-execution and at disposal.
    pub cleanups: Vec<Box<dyn FnOnce()>>,
    /// Where the node was created, for diagnostics.
    #[cfg(debug_assertions)]
    pub created_at: &'static std::panic::Location<'static>,
}

/// A handle to a node in the reactive graph, used to dispose it.
///
/// Disposing a node stops it permanently: its cleanup callbacks run, the
/// nodes it owns are disposed in reverse creation order, and every edge it
/// participates in is detached. Disposing an already-disposed node is a
/// no-op.
#[derive(Clone, Copy)]
pub struct NodeHandle(pub(crate) NodeId, pub(crate) &'static Root);

impl NodeHandle {
    /// Returns `true` if the node has not been disposed yet.
    pub fn is_alive(self) -> bool {
        self.1.nodes.borrow().get(self.0).is_some()
    }

    /// Dispose the node and everything it owns.
    pub fn dispose(self) {
        self.1.dispose_node(self.0);
    }

    /// Dispose everything the node owns, but not the node itself.
    pub fn dispose_children(self) {
        self.1.dispose_children(self.0);
    }
}

impl std::fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("NodeHandle").field(&self.0).finish()
    }
}
