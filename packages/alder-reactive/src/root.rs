//! [`Root`] of the reactive graph and the propagate/refresh machinery.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::mem;
use std::panic;
use std::rc::Rc;

use slotmap::{Key, SlotMap};
use smallvec::SmallVec;

use crate::node::{Link, LinkId, NodeFlags, NodeId, NodeKind, ReactiveNode};
use crate::NodeHandle;

/// Callback bringing a node up to date. Receives the node's value slot
/// (`None` before the first evaluation) and returns whether the value
/// changed.
pub(crate) type NodeCallback = Box<dyn FnMut(&mut Option<Box<dyn Any>>) -> bool>;

/// Type-erased equality predicate for source values.
pub(crate) type EqualsFn = Box<dyn Fn(&dyn Any, &dyn Any) -> bool>;

/// Sink receiving panics that escape effect bodies.
type ErrorHook = Rc<dyn Fn(Box<dyn Any + Send>)>;

/// The ambient tracking register: which node is currently capturing
/// dependencies, and where its dependency-reuse cursor stands.
#[derive(Clone, Copy)]
pub(crate) struct Tracker {
    /// The node currently capturing dependencies, or the null key.
    pub subscriber: NodeId,
    /// Epoch of this execution. A producer stamped with this epoch has
    /// already been captured during the current run.
    pub epoch: u64,
    /// The last dependency link confirmed during this run. New reads reuse
    /// or splice in links right after it.
    pub cursor: LinkId,
}

impl Tracker {
    fn inactive() -> Self {
        Self {
            subscriber: NodeId::null(),
            epoch: 0,
            cursor: LinkId::null(),
        }
    }
}

/// The struct managing the state of the reactive system. Only one should be
/// created per running app.
///
/// The `Root` is leaked so that `&'static Root` can be stored in handles, but
/// it is also `dispose`-able: disposing tears down every node allocated under
/// it, so the only memory held for the lifetime of the program is the `Root`
/// itself.
pub(crate) struct Root {
    /// All the nodes created in this `Root`.
    pub nodes: RefCell<SlotMap<NodeId, ReactiveNode>>,
    /// All the edges between nodes. Vacated slots are reused, which makes
    /// this the link pool.
    pub links: RefCell<SlotMap<LinkId, Link>>,
    /// The ambient tracking register.
    pub tracker: Cell<Tracker>,
    /// The node that owns everything created in its scope.
    pub current_owner: Cell<NodeId>,
    /// Monotonic counter handing out one epoch per tracked execution.
    epoch: Cell<u64>,
    /// The top-level scope of the graph.
    pub root_node: Cell<NodeId>,
    /// While this is non-zero, notified effects accumulate in the queue
    /// instead of running.
    batch_depth: Cell<u32>,
    /// Effects waiting to run, in FIFO order of first notification.
    pub effect_queue: RefCell<VecDeque<NodeId>>,
    /// Re-entrancy latch for the effect runner.
    draining: Cell<bool>,
    /// Sink receiving panics that escape effect bodies.
    error_hook: RefCell<Option<ErrorHook>>,
}

thread_local! {
    /// The current reactive root.
    static GLOBAL_ROOT: Cell<Option<&'static Root>> = const { Cell::new(None) };
}

impl Root {
    /// Get the current reactive root. Panics if no root is found.
    #[cfg_attr(debug_assertions, track_caller)]
    pub fn global() -> &'static Root {
        GLOBAL_ROOT.with(|root| root.get()).expect("no root found")
    }

    /// Sets the current reactive root. Returns the previous root.
    pub fn set_global(root: Option<&'static Root>) -> Option<&'static Root> {
        GLOBAL_ROOT.with(|r| r.replace(root))
    }

    /// Create a new reactive root, leaked for the rest of the program.
    pub fn new_static() -> &'static Self {
        let this = Self {
            nodes: RefCell::new(SlotMap::default()),
            links: RefCell::new(SlotMap::default()),
            tracker: Cell::new(Tracker::inactive()),
            current_owner: Cell::new(NodeId::null()),
            epoch: Cell::new(0),
            root_node: Cell::new(NodeId::null()),
            batch_depth: Cell::new(0),
            effect_queue: RefCell::new(VecDeque::new()),
            draining: Cell::new(false),
            error_hook: RefCell::new(None),
        };
        let _ref = Box::leak(Box::new(this));
        _ref.reinit();
        _ref
    }

    /// Disposes of all the resources held on by this root and resets the
    /// state.
    pub fn reinit(&'static self) {
        NodeHandle(self.root_node.get(), self).dispose();

        let _ = self.nodes.take();
        let _ = self.links.take();
        let _ = self.effect_queue.take();
        let _ = self.error_hook.take();
        self.tracker.set(Tracker::inactive());
        self.current_owner.set(NodeId::null());
        self.epoch.set(0);
        self.batch_depth.set(0);
        self.draining.set(false);

        // Create a new top-level scope that owns everything created directly
        // under the root.
        let prev = Root::set_global(Some(self));
        let root_node = self.create_node(NodeKind::Scope, None, None, None, NodeFlags::default());
        Root::set_global(prev);
        self.root_node.set(root_node);
        self.current_owner.set(root_node);
    }

    fn next_epoch(&self) -> u64 {
        let epoch = self.epoch.get() + 1;
        self.epoch.set(epoch);
        epoch
    }

    /// Insert a node owned by the current owner.
    #[cfg_attr(debug_assertions, track_caller)]
    pub(crate) fn create_node(
        &'static self,
        kind: NodeKind,
        value: Option<Box<dyn Any>>,
        callback: Option<NodeCallback>,
        equals: Option<EqualsFn>,
        flags: NodeFlags,
    ) -> NodeId {
        let parent = self.current_owner.get();
        let id = self.nodes.borrow_mut().insert(ReactiveNode {
            kind,
            flags,
            version: 0,
            tracked_epoch: 0,
            deps_head: LinkId::null(),
            subs_head: LinkId::null(),
            value,
            callback,
            equals,
            parent,
            children: SmallVec::new(),
            cleanups: Vec::new(),
            #[cfg(debug_assertions)]
            created_at: std::panic::Location::caller(),
        });
        if !parent.is_null() {
            if let Some(owner) = self.nodes.borrow_mut().get_mut(parent) {
                owner.children.push(id);
            }
        }
        id
    }

    /// Run `f` with the tracking register cleared, so reads inside do not
    /// capture dependencies.
    pub(crate) fn untracked<T>(&'static self, f: impl FnOnce() -> T) -> T {
        let prev = self.tracker.replace(Tracker::inactive());
        let ret = f();
        self.tracker.set(prev);
        ret
    }

    // ------------------------------------------------------------------
    // Link arena.
    // ------------------------------------------------------------------

    /// Record a read of `producer` by the active subscriber.
    ///
    /// The positional link at the reuse cursor is reused when it already
    /// points at `producer`; otherwise a fresh link is spliced into the
    /// subscriber's dependency list at the cursor and pushed at the head of
    /// the producer's subscriber list. A producer already captured during
    /// this execution is skipped, so the dependency list never holds
    /// duplicate edges.
    pub(crate) fn track_access(&'static self, producer: NodeId) {
        let t = self.tracker.get();
        if t.subscriber.is_null() {
            return;
        }
        let mut nodes = self.nodes.borrow_mut();
        let mut links = self.links.borrow_mut();

        let Some(p) = nodes.get_mut(producer) else {
            return;
        };
        if p.flags.contains(NodeFlags::TRACKING) {
            // The producer is in the middle of its own execution: this read
            // closes a producer→consumer cycle.
            drop(links);
            drop(nodes);
            panic!("cyclic reactive dependency");
        }
        if p.tracked_epoch == t.epoch {
            return;
        }
        p.tracked_epoch = t.epoch;
        let version = p.version;

        let candidate = if t.cursor.is_null() {
            nodes[t.subscriber].deps_head
        } else {
            links[t.cursor].next_dep
        };
        if !candidate.is_null() && links[candidate].producer == producer {
            links[candidate].seen_version = version;
            self.tracker.set(Tracker {
                cursor: candidate,
                ..t
            });
            return;
        }

        let subs_head = nodes[producer].subs_head;
        let id = links.insert(Link {
            producer,
            consumer: t.subscriber,
            prev_sub: LinkId::null(),
            next_sub: subs_head,
            prev_dep: t.cursor,
            next_dep: candidate,
            seen_version: version,
        });
        if t.cursor.is_null() {
            nodes[t.subscriber].deps_head = id;
        } else {
            links[t.cursor].next_dep = id;
        }
        if !candidate.is_null() {
            links[candidate].prev_dep = id;
        }
        if !subs_head.is_null() {
            links[subs_head].prev_sub = id;
        }
        nodes[producer].subs_head = id;
        self.tracker.set(Tracker { cursor: id, ..t });
    }

    /// Detach every dependency link of `consumer` after `cursor`: that
    /// suffix was not re-read during the execution that just ended.
    fn clear_stale_deps(&self, consumer: NodeId, cursor: LinkId) {
        let mut nodes = self.nodes.borrow_mut();
        let mut links = self.links.borrow_mut();
        let mut cur = if cursor.is_null() {
            match nodes.get_mut(consumer) {
                Some(node) => mem::replace(&mut node.deps_head, LinkId::null()),
                None => return,
            }
        } else {
            mem::replace(&mut links[cursor].next_dep, LinkId::null())
        };
        while !cur.is_null() {
            let next = links[cur].next_dep;
            Self::unlink_from_subs(&mut nodes, &mut links, cur);
            links.remove(cur);
            cur = next;
        }
    }

    /// Splice a link out of its producer's subscriber list.
    fn unlink_from_subs(
        nodes: &mut SlotMap<NodeId, ReactiveNode>,
        links: &mut SlotMap<LinkId, Link>,
        id: LinkId,
    ) {
        let Link {
            producer,
            prev_sub,
            next_sub,
            ..
        } = links[id];
        if prev_sub.is_null() {
            if let Some(p) = nodes.get_mut(producer) {
                p.subs_head = next_sub;
            }
        } else {
            links[prev_sub].next_sub = next_sub;
        }
        if !next_sub.is_null() {
            links[next_sub].prev_sub = prev_sub;
        }
    }

    /// Splice a link out of its consumer's dependency list.
    fn unlink_from_deps(
        nodes: &mut SlotMap<NodeId, ReactiveNode>,
        links: &mut SlotMap<LinkId, Link>,
        id: LinkId,
    ) {
        let Link {
            consumer,
            prev_dep,
            next_dep,
            ..
        } = links[id];
        if prev_dep.is_null() {
            if let Some(c) = nodes.get_mut(consumer) {
                c.deps_head = next_dep;
            }
        } else {
            links[prev_dep].next_dep = next_dep;
        }
        if !next_dep.is_null() {
            links[next_dep].prev_dep = prev_dep;
        }
    }

    // ------------------------------------------------------------------
    // Disposal.
    // ------------------------------------------------------------------

    /// Dispose everything `id` owns: cleanup callbacks first (untracked),
    /// then owned nodes in reverse creation order.
    pub(crate) fn dispose_children(&'static self, id: NodeId) {
        let (cleanups, children) = {
            let mut nodes = self.nodes.borrow_mut();
            let Some(node) = nodes.get_mut(id) else {
                return;
            };
            (mem::take(&mut node.cleanups), mem::take(&mut node.children))
        };
        self.untracked(|| {
            for cb in cleanups {
                cb();
            }
        });
        for child in children.into_iter().rev() {
            self.dispose_node(child);
        }
    }

    /// Dispose `id` and everything it owns, detaching every edge it
    /// participates in. A no-op when `id` is already gone.
    pub(crate) fn dispose_node(&'static self, id: NodeId) {
        if self.nodes.borrow().get(id).is_none() {
            return;
        }
        self.dispose_children(id);

        let removed = {
            let mut nodes = self.nodes.borrow_mut();
            // The node's own cleanups may have disposed it re-entrantly.
            if nodes.get(id).is_none() {
                return;
            }
            let mut links = self.links.borrow_mut();
            let mut cur = nodes[id].deps_head;
            while !cur.is_null() {
                let next = links[cur].next_dep;
                Self::unlink_from_subs(&mut nodes, &mut links, cur);
                links.remove(cur);
                cur = next;
            }
            let mut cur = nodes[id].subs_head;
            while !cur.is_null() {
                let next = links[cur].next_sub;
                Self::unlink_from_deps(&mut nodes, &mut links, cur);
                links.remove(cur);
                cur = next;
            }
            let parent = nodes[id].parent;
            if let Some(p) = nodes.get_mut(parent) {
                if let Some(i) = p.children.iter().position(|&c| c == id) {
                    p.children.remove(i);
                }
            }
            nodes.remove(id)
        };
        // Dropping the node's value or callback can run arbitrary user code;
        // do it without holding a borrow of the graph.
        drop(removed);
    }

    // ------------------------------------------------------------------
    // Propagation (top-down dirty marking).
    // ------------------------------------------------------------------

    /// Mark the subscribers of `from` stale. Direct subscribers become
    /// `DIRTY`, transitive ones `PENDING`; a node already stale is not
    /// descended into again. Effects gaining a mark are notified and queued
    /// in FIFO order.
    fn mark_subscribers(&'static self, from: NodeId, direct: bool) {
        let consumers: SmallVec<[NodeId; 8]> = {
            let nodes = self.nodes.borrow();
            let links = self.links.borrow();
            let Some(node) = nodes.get(from) else {
                return;
            };
            let mut out = SmallVec::new();
            let mut cur = node.subs_head;
            while !cur.is_null() {
                let link = &links[cur];
                out.push(link.consumer);
                cur = link.next_sub;
            }
            out
        };
        for id in consumers {
            let (descend, enqueue) = {
                let mut nodes = self.nodes.borrow_mut();
                let Some(node) = nodes.get_mut(id) else {
                    continue;
                };
                if node.flags.contains(NodeFlags::TRACKING)
                    && !(node.kind == NodeKind::Effect
                        && node.flags.contains(NodeFlags::RECURSIVE))
                {
                    // Mid-execution: its dependencies are still being
                    // established, so it must not be re-marked now.
                    continue;
                }
                let already = node.flags.is_stale();
                if direct {
                    node.flags.insert(NodeFlags::DIRTY);
                    node.flags.remove(NodeFlags::PENDING);
                } else if !already {
                    node.flags.insert(NodeFlags::PENDING);
                }
                let enqueue = node.kind == NodeKind::Effect
                    && !node.flags.contains(NodeFlags::NOTIFIED);
                if enqueue {
                    node.flags.insert(NodeFlags::NOTIFIED);
                }
                (!already && node.kind == NodeKind::Memo, enqueue)
            };
            if enqueue {
                self.effect_queue.borrow_mut().push_back(id);
            }
            if descend {
                self.mark_subscribers(id, false);
            }
        }
    }

    /// Called after `id`'s value has been replaced by a write. Marks the
    /// downstream graph stale and, outside a batch, drains the effect queue.
    #[cfg_attr(
        all(feature = "trace", not(debug_assertions)),
        tracing::instrument(skip(self))
    )]
    pub(crate) fn propagate_from(&'static self, id: NodeId) {
        // Writes can come from outside a `run_in` closure (for example from
        // a completed task); make this root current so effect bodies can use
        // the ambient API.
        let prev = Root::set_global(Some(self));
        self.mark_subscribers(id, true);
        if self.batch_depth.get() == 0 {
            self.run_effects();
        }
        Root::set_global(prev);
    }

    // ------------------------------------------------------------------
    // Pull / refresh (bottom-up re-evaluation).
    // ------------------------------------------------------------------

    /// Bring a memo up to date before its value is observed.
    ///
    /// `DIRTY` recomputes unconditionally. `PENDING` first refreshes the
    /// node's own producers in read order and recomputes only if one of them
    /// actually produced a new value. Anything else is a no-op.
    pub(crate) fn refresh(&'static self, id: NodeId) {
        let flags = {
            let nodes = self.nodes.borrow();
            match nodes.get(id) {
                Some(node) if node.kind == NodeKind::Memo => node.flags,
                _ => return,
            }
        };
        if flags.contains(NodeFlags::TRACKING) {
            // Mid-execution; the value from its last completed run stands.
            return;
        }
        if flags.contains(NodeFlags::DIRTY) {
            self.run_node_update(id);
        } else if flags.contains(NodeFlags::PENDING) {
            if self.any_dependency_changed(id) {
                self.run_node_update(id);
            } else {
                self.nodes.borrow_mut()[id].flags.remove(NodeFlags::PENDING);
            }
        }
    }

    /// Refresh each dependency of `id` in read order, reporting whether any
    /// of them now carries a version newer than the one captured on the
    /// link.
    fn any_dependency_changed(&'static self, id: NodeId) -> bool {
        let mut cur = match self.nodes.borrow().get(id) {
            Some(node) => node.deps_head,
            None => return false,
        };
        while !cur.is_null() {
            let (producer, seen, next) = {
                let links = self.links.borrow();
                let link = &links[cur];
                (link.producer, link.seen_version, link.next_dep)
            };
            self.refresh(producer);
            match self.nodes.borrow().get(producer) {
                Some(p) if p.version != seen => return true,
                _ => {}
            }
            cur = next;
        }
        false
    }

    /// Re-execute a node's callback under the tracking protocol.
    ///
    /// Children and cleanups from the previous run are disposed first, the
    /// callback runs with this node as the active subscriber and owner, and
    /// any dependency suffix that was not re-read is detached afterwards. A
    /// changed value bumps the version and propagates with this node as
    /// root.
    #[cfg_attr(
        all(feature = "trace", not(debug_assertions)),
        tracing::instrument(skip(self))
    )]
    #[cfg_attr(
        all(feature = "trace", debug_assertions),
        tracing::instrument(skip(self), fields(created_at = self.nodes.borrow()[current].created_at.to_string()))
    )]
    pub(crate) fn run_node_update(&'static self, current: NodeId) {
        // Anything created during the previous execution belongs to that
        // execution; tear it down before re-running.
        self.dispose_children(current);

        let (callback, mut value, kind) = {
            let mut nodes = self.nodes.borrow_mut();
            let Some(node) = nodes.get_mut(current) else {
                return;
            };
            node.flags.remove(NodeFlags::DIRTY | NodeFlags::PENDING);
            node.flags.insert(NodeFlags::TRACKING);
            (node.callback.take(), node.value.take(), node.kind)
        };
        let Some(mut callback) = callback else {
            return;
        };

        let prev_owner = self.current_owner.replace(current);
        let prev_tracker = self.tracker.replace(Tracker {
            subscriber: current,
            epoch: self.next_epoch(),
            cursor: LinkId::null(),
        });
        let result = panic::catch_unwind(panic::AssertUnwindSafe(|| callback(&mut value)));
        let end_cursor = self.tracker.get().cursor;
        self.tracker.set(prev_tracker);
        self.current_owner.set(prev_owner);
        self.clear_stale_deps(current, end_cursor);

        let changed = {
            let mut nodes = self.nodes.borrow_mut();
            let Some(node) = nodes.get_mut(current) else {
                // The node disposed itself from within its own execution.
                return;
            };
            node.flags.remove(NodeFlags::TRACKING);
            node.callback = Some(callback);
            node.value = value;
            match &result {
                Ok(changed) => {
                    if *changed {
                        node.version += 1;
                    }
                    *changed
                }
                Err(_) if kind == NodeKind::Memo => {
                    // The previous cached value stands; retry on a later
                    // read.
                    node.flags.insert(NodeFlags::DIRTY);
                    false
                }
                Err(_) => false,
            }
        };
        match result {
            Ok(_) => {
                if changed {
                    self.mark_subscribers(current, true);
                }
            }
            Err(payload) if kind == NodeKind::Effect => self.report_error(payload),
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    // ------------------------------------------------------------------
    // Effect runner.
    // ------------------------------------------------------------------

    /// Drain the effect queue in FIFO order of first notification. Writes
    /// made by running effects append to the same queue and are drained in
    /// the same pass.
    pub(crate) fn run_effects(&'static self) {
        if self.draining.replace(true) {
            return;
        }
        struct DrainGuard<'a>(&'a Cell<bool>);
        impl Drop for DrainGuard<'_> {
            fn drop(&mut self) {
                self.0.set(false);
            }
        }
        let _guard = DrainGuard(&self.draining);

        loop {
            let next = self.effect_queue.borrow_mut().pop_front();
            let Some(id) = next else { break };
            self.run_effect(id);
        }
    }

    /// Run `f` with the effect-runner latch held, so that writes made inside
    /// only enqueue, then drain whatever was queued. Used for the initial
    /// synchronous run of an effect: without the latch, a self-requeueing
    /// write from the body would be drained mid-run and lost.
    pub(crate) fn with_deferred_effects(&'static self, f: impl FnOnce()) {
        let was = self.draining.replace(true);
        f();
        self.draining.set(was);
        if !was && self.batch_depth.get() == 0 {
            self.run_effects();
        }
    }

    /// Run a single queued effect. `DIRTY` runs unconditionally; `PENDING`
    /// runs only if one of its dependencies actually produced a new value.
    fn run_effect(&'static self, id: NodeId) {
        let flags = match self.nodes.borrow().get(id) {
            Some(node) => node.flags,
            // Disposed while queued.
            None => return,
        };
        let recursive = flags.contains(NodeFlags::RECURSIVE);
        if recursive {
            // Clear before running so a self-requeue from the body survives.
            self.nodes.borrow_mut()[id].flags.remove(NodeFlags::NOTIFIED);
        }
        if flags.contains(NodeFlags::DIRTY) {
            self.run_node_update(id);
        } else if flags.contains(NodeFlags::PENDING) {
            if self.any_dependency_changed(id) {
                self.run_node_update(id);
            } else {
                self.nodes.borrow_mut()[id].flags.remove(NodeFlags::PENDING);
            }
        }
        if !recursive {
            if let Some(node) = self.nodes.borrow_mut().get_mut(id) {
                node.flags.remove(NodeFlags::NOTIFIED);
            }
        }
    }

    // ------------------------------------------------------------------
    // Batching.
    // ------------------------------------------------------------------

    pub(crate) fn start_batch(&self) {
        self.batch_depth.set(self.batch_depth.get() + 1);
    }

    pub(crate) fn end_batch(&'static self) {
        let depth = self.batch_depth.get() - 1;
        self.batch_depth.set(depth);
        if depth == 0 {
            self.run_effects();
        }
    }

    // ------------------------------------------------------------------
    // Error sink.
    // ------------------------------------------------------------------

    fn report_error(&'static self, payload: Box<dyn Any + Send>) {
        let hook = self.error_hook.borrow().clone();
        match hook {
            Some(hook) => hook(payload),
            None => eprintln!("effect panicked: {}", payload_message(&*payload)),
        }
    }
}

fn payload_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "Box<dyn Any>"
    }
}

/// A handle to a root. This lets you reinitialize or dispose the root for
/// resource cleanup.
///
/// This is generally obtained from [`create_root`].
#[derive(Clone, Copy)]
pub struct RootHandle {
    _ref: &'static Root,
}

impl RootHandle {
    /// Destroy everything that was created in this root.
    pub fn dispose(&self) {
        self._ref.reinit();
    }

    /// Runs the closure with this root as the current root.
    pub fn run_in<T>(&self, f: impl FnOnce() -> T) -> T {
        let prev = Root::set_global(Some(self._ref));
        let ret = f();
        Root::set_global(prev);
        ret
    }
}

impl std::fmt::Debug for RootHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootHandle").finish()
    }
}

/// Creates a new reactive root. Everything else in this crate must be called
/// under a root, either inside the closure or later via
/// [`RootHandle::run_in`].
///
/// # Example
/// ```rust
/// # use alder_reactive::*;
/// create_root(|| {
///     let signal = create_signal(123);
///
///     let child_scope = create_child_scope(move || {
///         // ...
///     });
/// });
/// ```
#[must_use = "root should be disposed"]
pub fn create_root(f: impl FnOnce()) -> RootHandle {
    let _ref = Root::new_static();
    #[cfg(not(target_arch = "wasm32"))]
    {
        /// A raw pointer wrapper that is never dereferenced again, so it can
        /// be stored in a global.
        #[allow(dead_code)]
        struct UnsafeSendPtr<T>(*const T);
        unsafe impl<T> Send for UnsafeSendPtr<T> {}

        /// Keeps the leaked `Root`s reachable so that leak checkers do not
        /// report them.
        static KEEP_ALIVE: std::sync::Mutex<Vec<UnsafeSendPtr<Root>>> =
            std::sync::Mutex::new(Vec::new());
        KEEP_ALIVE
            .lock()
            .unwrap()
            .push(UnsafeSendPtr(_ref as *const Root));
    }

    let prev = Root::set_global(Some(_ref));
    f();
    Root::set_global(prev);
    RootHandle { _ref }
}

/// Create a child scope: a lifecycle container grouping every signal, memo,
/// effect, and scope created while the closure runs.
///
/// Returns the created [`NodeHandle`] which can be used to dispose it. A
/// scope participates in no propagation; disposing it stops its contents in
/// reverse creation order.
#[cfg_attr(debug_assertions, track_caller)]
pub fn create_child_scope(f: impl FnOnce()) -> NodeHandle {
    let root = Root::global();
    let id = root.create_node(NodeKind::Scope, None, None, None, NodeFlags::default());
    let prev = root.current_owner.replace(id);
    f();
    root.current_owner.set(prev);
    NodeHandle(id, root)
}

/// Adds a callback that is called when the current scope is re-run or
/// disposed.
///
/// # Example
/// ```rust
/// # use alder_reactive::*;
/// # let _ = create_root(|| {
/// let child_scope = create_child_scope(|| {
///     on_cleanup(|| {
///         println!("child scope is being disposed");
///     });
/// });
/// child_scope.dispose(); // Executes the on_cleanup callback.
/// # });
/// ```
pub fn on_cleanup(f: impl FnOnce() + 'static) {
    let root = Root::global();
    let owner = root.current_owner.get();
    if !owner.is_null() {
        if let Some(node) = root.nodes.borrow_mut().get_mut(owner) {
            node.cleanups.push(Box::new(f));
        }
    }
}

/// Batch writes from related signals together, deferring effects until the
/// end of the outermost batch.
///
/// Reads during the batch still observe fresh values; only effect execution
/// is deferred. Batches nest.
///
/// # Example
///
/// ```
/// # use alder_reactive::*;
/// # let _ = create_root(|| {
/// let state = create_signal(1);
/// let double = create_memo(move || state.get() * 2);
/// batch(move || {
///     state.set(2);
///     assert_eq!(double.get(), 4);
/// });
/// # });
/// ```
pub fn batch<T>(f: impl FnOnce() -> T) -> T {
    let root = Root::global();
    root.start_batch();
    // Keep the depth balanced even if `f` panics.
    struct BatchGuard(&'static Root);
    impl Drop for BatchGuard {
        fn drop(&mut self) {
            self.0.end_batch();
        }
    }
    let _guard = BatchGuard(root);
    f()
}

/// Run the passed closure inside an untracked dependency scope.
///
/// See also [`ReadSignal::get_untracked`](crate::ReadSignal::get_untracked).
///
/// # Example
///
/// ```
/// # use alder_reactive::*;
/// # let _ = create_root(|| {
/// let state = create_signal(1);
/// let double = create_memo(move || untrack(|| state.get() * 2));
/// assert_eq!(double.get(), 2);
///
/// state.set(2);
/// // The double value is still stale because state was read untracked.
/// assert_eq!(double.get(), 2);
/// # });
/// ```
pub fn untrack<T>(f: impl FnOnce() -> T) -> T {
    Root::global().untracked(f)
}

/// Get a handle to the current owning scope.
pub fn use_current_scope() -> NodeHandle {
    let root = Root::global();
    NodeHandle(root.current_owner.get(), root)
}

/// Get a handle to the top-level scope of the current root.
pub fn use_global_scope() -> NodeHandle {
    let root = Root::global();
    NodeHandle(root.root_node.get(), root)
}

/// Install a sink receiving panics that escape effect bodies.
///
/// A panicking effect is isolated: the panic is delivered here, the effect
/// stays subscribed to the dependencies it read before panicking, and the
/// rest of the queue still runs. The default sink prints to stderr.
pub fn set_error_hook(f: impl Fn(Box<dyn Any + Send>) + 'static) {
    *Root::global().error_hook.borrow_mut() = Some(Rc::new(f));
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::*;

    #[test]
    fn cleanup() {
        let _ = create_root(|| {
            let cleanup_called = create_signal(false);
            let scope = create_child_scope(move || {
                on_cleanup(move || {
                    cleanup_called.set(true);
                });
            });
            assert!(!cleanup_called.get());
            scope.dispose();
            assert!(cleanup_called.get());
        });
    }

    #[test]
    fn double_dispose_is_noop() {
        let _ = create_root(|| {
            let scope = create_child_scope(|| {});
            scope.dispose();
            scope.dispose();
            assert!(!scope.is_alive());
        });
    }

    #[test]
    fn scopes_dispose_in_reverse_creation_order() {
        let _ = create_root(|| {
            let order = Rc::new(RefCell::new(Vec::new()));
            let scope = create_child_scope({
                let order = Rc::clone(&order);
                move || {
                    for i in 0..3 {
                        let order = Rc::clone(&order);
                        create_child_scope(move || {
                            on_cleanup(move || order.borrow_mut().push(i));
                        });
                    }
                }
            });
            scope.dispose();
            assert_eq!(*order.borrow(), vec![2, 1, 0]);
        });
    }

    #[test]
    fn cleanup_in_effect() {
        let _ = create_root(|| {
            let trigger = create_signal(());
            let counter = create_signal(0);

            create_effect(move || {
                trigger.track();

                on_cleanup(move || {
                    counter.set(counter.get() + 1);
                });
            });

            assert_eq!(counter.get(), 0);

            trigger.update(|_| ());
            assert_eq!(counter.get(), 1);

            trigger.update(|_| ());
            assert_eq!(counter.get(), 2);
        });
    }

    #[test]
    fn cleanup_is_untracked() {
        let _ = create_root(|| {
            let trigger = create_signal(());
            let counter = create_signal(0);

            create_effect(move || {
                counter.set(counter.get_untracked() + 1);

                on_cleanup(move || {
                    trigger.track(); // trigger should not be tracked
                });
            });

            assert_eq!(counter.get(), 1);

            trigger.update(|_| ());
            assert_eq!(counter.get(), 1);
        });
    }

    #[test]
    fn batch_reads_are_fresh() {
        let _ = create_root(|| {
            let state = create_signal(1);
            let double = create_memo(move || state.get() * 2);
            batch(move || {
                state.set(2);
                // Only effects are deferred; pulls see the latest write.
                assert_eq!(double.get(), 4);
            });
            assert_eq!(double.get(), 4);
        });
    }

    #[test]
    fn batch_coalesces_effects() {
        let _ = create_root(|| {
            let a = create_signal(1);
            let b = create_signal(2);
            let runs = create_signal(0);
            create_effect(move || {
                a.track();
                b.track();
                runs.set(runs.get_untracked() + 1);
            });
            assert_eq!(runs.get(), 1);
            batch(move || {
                a.set(10);
                assert_eq!(runs.get(), 1);
                b.set(20);
                assert_eq!(runs.get(), 1);
            });
            assert_eq!(runs.get(), 2);
        });
    }

    #[test]
    fn nested_batches_defer_to_outermost() {
        let _ = create_root(|| {
            let a = create_signal(1);
            let runs = create_signal(0);
            create_effect(move || {
                a.track();
                runs.set(runs.get_untracked() + 1);
            });
            batch(move || {
                batch(move || {
                    a.set(2);
                });
                // The inner batch closed but the outer one is still open.
                assert_eq!(runs.get(), 1);
                a.set(3);
            });
            assert_eq!(runs.get(), 2);
        });
    }

    #[test]
    fn untrack_does_not_capture() {
        let _ = create_root(|| {
            let a = create_signal(1);
            let b = create_signal(2);
            let runs = create_signal(0);
            create_effect(move || {
                a.track();
                let _ = untrack(|| b.get());
                runs.set(runs.get_untracked() + 1);
            });
            assert_eq!(runs.get(), 1);

            b.set(99);
            assert_eq!(runs.get(), 1);

            a.set(42);
            assert_eq!(runs.get(), 2);
        });
    }

    #[test]
    fn graph_is_clean_after_top_level_writes() {
        let _ = create_root(|| {
            let a = create_signal(1);
            let b = create_signal(2);
            let sum = create_memo(move || a.get() + b.get());
            let double = create_memo(move || sum.get() * 2);
            create_effect(move || {
                double.track();
            });

            a.set(10);
            b.set(20);
            batch(|| {
                a.set(100);
                b.set(200);
            });

            let root = Root::global();
            assert!(root.effect_queue.borrow().is_empty());
            for (_, node) in root.nodes.borrow().iter() {
                assert!(
                    !node.flags.is_stale(),
                    "node left stale after top-level writes: {:?}",
                    node.flags
                );
            }
        });
    }

    #[test]
    #[should_panic(expected = "cyclic reactive dependency")]
    fn self_referential_memo_panics() {
        let _ = create_root(|| {
            let this = Rc::new(Cell::new(None::<ReadSignal<i32>>));
            let memo = create_memo({
                let this = Rc::clone(&this);
                move || match this.get() {
                    Some(memo) => memo.get() + 1,
                    None => 0,
                }
            });
            this.set(Some(memo));
            // First evaluation happens here and reads the memo itself.
            let _ = memo.get();
        });
    }

    #[test]
    #[should_panic(expected = "no root found")]
    fn no_root_panics() {
        let _ = create_signal(0);
    }

    #[test]
    fn root_handle_run_in_and_dispose() {
        let cleared = Rc::new(Cell::new(false));
        let root = create_root(|| {});
        root.run_in({
            let cleared = Rc::clone(&cleared);
            move || {
                on_cleanup(move || cleared.set(true));
            }
        });
        assert!(!cleared.get());
        root.dispose();
        assert!(cleared.get());
    }

    #[test]
    fn error_hook_receives_effect_panics() {
        let _ = create_root(|| {
            let caught = Rc::new(RefCell::new(Vec::new()));
            set_error_hook({
                let caught = Rc::clone(&caught);
                move |payload| {
                    let msg = payload
                        .downcast_ref::<&str>()
                        .copied()
                        .unwrap_or("<unknown>");
                    caught.borrow_mut().push(msg.to_string());
                }
            });

            let trigger = create_signal(());
            let runs = create_signal(0);
            create_effect(move || {
                trigger.track();
                runs.set(runs.get_untracked() + 1);
                if runs.get_untracked() > 1 {
                    panic!("boom");
                }
            });
            assert_eq!(runs.get(), 1);
            assert!(caught.borrow().is_empty());

            trigger.update(|_| ());
            assert_eq!(runs.get(), 2);
            assert_eq!(*caught.borrow(), vec!["boom".to_string()]);

            // The effect is still subscribed after panicking.
            trigger.update(|_| ());
            assert_eq!(runs.get(), 3);
            assert_eq!(caught.borrow().len(), 2);
        });
    }
}
