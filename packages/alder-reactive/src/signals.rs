//! Reactive signals: writable source cells.

use std::cell::{Ref, RefMut};
use std::fmt;
use std::fmt::Formatter;
use std::hash::Hash;
use std::marker::PhantomData;
use std::ops::{AddAssign, Deref, DivAssign, MulAssign, RemAssign, SubAssign};

use crate::node::{NodeFlags, NodeId, NodeKind, ReactiveNode};
use crate::root::{EqualsFn, Root};
use crate::NodeHandle;

/// A read-only reactive value.
///
/// The underlying data is not immutable: it can be updated through the
/// corresponding [`Signal`] (or, for memos, by the reactive system itself)
/// and the new value will show up through the `ReadSignal` as well.
///
/// A `ReadSignal` can be obtained by dereferencing a [`Signal`]. Memos are
/// plain `ReadSignal`s.
///
/// # Example
/// ```
/// # use alder_reactive::*;
/// # let _ = create_root(|| {
/// let signal: Signal<i32> = create_signal(123);
/// let read_signal: ReadSignal<i32> = *signal;
/// assert_eq!(read_signal.get(), 123);
/// signal.set(456);
/// assert_eq!(read_signal.get(), 456);
/// // read_signal.set(789); // <-- This is not allowed!
/// # });
/// ```
pub struct ReadSignal<T: 'static> {
    pub(crate) id: NodeId,
    pub(crate) root: &'static Root,
    /// Keep track of where the signal was created for diagnostics.
    #[cfg(debug_assertions)]
    created_at: &'static std::panic::Location<'static>,
    _phantom: PhantomData<T>,
}

/// A reactive value that can be read and written to.
///
/// This is the writable analog of [`ReadSignal`]. See [`create_signal`] for
/// more information.
pub struct Signal<T: 'static>(pub(crate) ReadSignal<T>);

/// Create a new [`Signal`].
///
/// Signals are reactive atoms, pieces of state that can be read and written
/// to and which will automatically update anything which depends on them.
///
/// Writing a value equal to the current one (by `PartialEq`) is a no-op and
/// triggers no downstream work. Use [`create_signal_with`] to supply a
/// different equality predicate, or [`Signal::update`] to force a
/// notification.
///
/// # Usage
/// The simplest way to use a signal is [`.get()`](ReadSignal::get) and
/// [`.set(...)`](Signal::set). `get` requires the value to implement
/// [`Copy`]; for [`Clone`] values use [`.get_clone()`](ReadSignal::get_clone)
/// and for everything else [`.with(...)`](ReadSignal::with).
///
/// ```rust
/// # use alder_reactive::*;
/// # let _ = create_root(|| {
/// let signal = create_signal(1);
/// signal.get(); // Should return 1.
/// signal.set(2);
/// signal.get(); // Should return 2.
/// # });
/// ```
///
/// # Reactivity
/// Accessing a signal inside a tracked context (a memo or an effect)
/// automatically subscribes the surrounding computation to it:
///
/// ```rust
/// # use alder_reactive::*;
/// # let _ = create_root(|| {
/// let signal = create_signal(1);
/// let double = create_memo(move || signal.get() * 2);
/// assert_eq!(double.get(), 2);
/// signal.set(2);
/// assert_eq!(double.get(), 4);
/// # });
/// ```
///
/// # Ownership
/// Signals are owned by the scope they are created in, which is what manages
/// the memory of the actual value. What is returned from this function is a
/// `Copy` handle, so it can be freely moved into closures and event handlers
/// without worrying about ownership.
#[cfg_attr(debug_assertions, track_caller)]
pub fn create_signal<T: PartialEq + 'static>(value: T) -> Signal<T> {
    create_signal_with(value, PartialEq::eq)
}

/// Create a new [`Signal`] with a custom equality predicate.
///
/// The predicate decides whether a written value should propagate: returning
/// `true` means "unchanged, skip". Pass `|_, _| false` to always propagate,
/// which also makes signals of non-`PartialEq` types possible.
#[cfg_attr(debug_assertions, track_caller)]
pub fn create_signal_with<T: 'static>(
    value: T,
    eq: impl Fn(&T, &T) -> bool + 'static,
) -> Signal<T> {
    let root = Root::global();
    let equals: EqualsFn = Box::new(move |a, b| {
        match (a.downcast_ref::<T>(), b.downcast_ref::<T>()) {
            (Some(a), Some(b)) => eq(a, b),
            _ => false,
        }
    });
    let id = root.create_node(
        NodeKind::Source,
        Some(Box::new(value)),
        None,
        Some(equals),
        NodeFlags::default(),
    );
    Signal(ReadSignal::new(id, root))
}

impl<T> ReadSignal<T> {
    #[cfg_attr(debug_assertions, track_caller)]
    pub(crate) fn new(id: NodeId, root: &'static Root) -> Self {
        Self {
            id,
            root,
            #[cfg(debug_assertions)]
            created_at: std::panic::Location::caller(),
            _phantom: PhantomData,
        }
    }

    /// Get an immutable reference to the underlying node.
    #[cfg_attr(debug_assertions, track_caller)]
    pub(crate) fn get_ref(self) -> Ref<'static, ReactiveNode> {
        Ref::map(self.root.nodes.borrow(), |nodes| match nodes.get(self.id) {
            Some(node) => node,
            None => panic!("{}", self.get_disposed_panic_message()),
        })
    }

    /// Get a mutable reference to the underlying node.
    #[cfg_attr(debug_assertions, track_caller)]
    pub(crate) fn get_mut(self) -> RefMut<'static, ReactiveNode> {
        RefMut::map(self.root.nodes.borrow_mut(), |nodes| {
            match nodes.get_mut(self.id) {
                Some(node) => node,
                None => panic!("{}", self.get_disposed_panic_message()),
            }
        })
    }

    /// Returns `true` if the signal is still alive, i.e. has not yet been
    /// disposed.
    pub fn is_alive(self) -> bool {
        self.root.nodes.borrow().get(self.id).is_some()
    }

    /// Disposes the signal, i.e. frees up the memory held on by it.
    /// Accessing a signal after it has been disposed causes a panic.
    pub fn dispose(self) {
        NodeHandle(self.id, self.root).dispose();
    }

    fn get_disposed_panic_message(self) -> String {
        #[cfg(not(debug_assertions))]
        return "signal was disposed".to_string();

        #[cfg(debug_assertions)]
        return format!("signal was disposed. Created at {}", self.created_at);
    }

    /// Get the value of the signal without tracking it. The type must
    /// implement [`Copy`]. If this is not the case, use
    /// [`ReadSignal::get_clone_untracked`] or [`ReadSignal::with_untracked`]
    /// instead.
    #[cfg_attr(debug_assertions, track_caller)]
    pub fn get_untracked(self) -> T
    where
        T: Copy,
    {
        self.with_untracked(|value| *value)
    }

    /// Get the value of the signal without tracking it. The value is
    /// [`Clone`]-ed automatically.
    #[cfg_attr(debug_assertions, track_caller)]
    pub fn get_clone_untracked(self) -> T
    where
        T: Clone,
    {
        self.with_untracked(Clone::clone)
    }

    /// Get the value of the signal. The type must implement [`Copy`]. If
    /// this is not the case, use [`ReadSignal::get_clone`] or
    /// [`ReadSignal::with`] instead.
    ///
    /// When called inside a tracked context, the signal is automatically
    /// tracked.
    #[cfg_attr(debug_assertions, track_caller)]
    pub fn get(self) -> T
    where
        T: Copy,
    {
        self.track();
        self.with_untracked(|value| *value)
    }

    /// Get the value of the signal. The value is [`Clone`]-ed automatically.
    ///
    /// When called inside a tracked context, the signal is automatically
    /// tracked.
    #[cfg_attr(debug_assertions, track_caller)]
    pub fn get_clone(self) -> T
    where
        T: Clone,
    {
        self.track();
        self.with_untracked(Clone::clone)
    }

    /// Get a value from the signal without tracking it.
    ///
    /// A stale memo is still brought up to date first: untracked reads skip
    /// dependency capture, never freshness.
    #[cfg_attr(debug_assertions, track_caller)]
    pub fn with_untracked<U>(self, f: impl FnOnce(&T) -> U) -> U {
        self.root.refresh(self.id);
        let node = self.get_ref();
        let value = node.value.as_ref().expect("value updating");
        f(value.downcast_ref().expect("wrong signal type"))
    }

    /// Get a value from the signal.
    ///
    /// When called inside a tracked context, the signal is automatically
    /// tracked.
    #[cfg_attr(debug_assertions, track_caller)]
    pub fn with<U>(self, f: impl FnOnce(&T) -> U) -> U {
        self.track();
        self.with_untracked(f)
    }

    /// Track the signal in the current tracked context without reading its
    /// value. This is done automatically by [`ReadSignal::get`] and friends.
    pub fn track(self) {
        self.root.refresh(self.id);
        self.root.track_access(self.id);
    }
}

impl<T> Signal<T> {
    /// Silently set a new value for the signal. This will not trigger any
    /// updates in dependent computations. As such, this is generally not
    /// recommended as it can easily lead to state inconsistencies.
    #[cfg_attr(debug_assertions, track_caller)]
    pub fn set_silent(self, new: T) {
        self.replace_silent(new);
    }

    /// Set a new value for the signal and automatically update any
    /// dependents.
    ///
    /// If the new value is equal to the current one by the signal's equality
    /// predicate, nothing downstream runs.
    #[cfg_attr(debug_assertions, track_caller)]
    pub fn set(self, new: T) {
        self.replace(new);
    }

    /// Silently set a new value for the signal and return the previous
    /// value.
    #[cfg_attr(debug_assertions, track_caller)]
    pub fn replace_silent(self, new: T) -> T {
        self.update_silent(|val| std::mem::replace(val, new))
    }

    /// Set a new value for the signal and return the previous value.
    #[cfg_attr(debug_assertions, track_caller)]
    pub fn replace(self, new: T) -> T {
        let unchanged = {
            let node = self.get_ref();
            match (&node.equals, node.value.as_deref()) {
                (Some(eq), Some(old)) => eq(old, &new),
                _ => false,
            }
        };
        let old = self.replace_silent(new);
        if !unchanged {
            self.get_mut().version += 1;
            self.0.root.propagate_from(self.0.id);
        }
        old
    }

    /// Replace the value with [`Default::default`] without notifying
    /// dependents, returning the previous value.
    #[cfg_attr(debug_assertions, track_caller)]
    pub fn take_silent(self) -> T
    where
        T: Default,
    {
        self.replace_silent(T::default())
    }

    /// Replace the value with [`Default::default`], returning the previous
    /// value.
    #[cfg_attr(debug_assertions, track_caller)]
    pub fn take(self) -> T
    where
        T: Default,
    {
        self.replace(T::default())
    }

    /// Update the value of the signal in place without notifying dependents.
    #[cfg_attr(debug_assertions, track_caller)]
    pub fn update_silent<U>(self, f: impl FnOnce(&mut T) -> U) -> U {
        let mut value = self.get_mut().value.take().expect("value updating");
        let ret = f(value.downcast_mut().expect("wrong signal type"));
        self.get_mut().value = Some(value);
        ret
    }

    /// Update the value of the signal in place and notify dependents.
    ///
    /// Because the value is mutated in place there is nothing to compare
    /// against: an `update` always propagates, even if the closure did not
    /// actually change anything.
    #[cfg_attr(debug_assertions, track_caller)]
    pub fn update<U>(self, f: impl FnOnce(&mut T) -> U) -> U {
        let ret = self.update_silent(f);
        self.get_mut().version += 1;
        self.0.root.propagate_from(self.0.id);
        ret
    }

    /// Set the value from a function of the previous value, without
    /// notifying dependents.
    #[cfg_attr(debug_assertions, track_caller)]
    pub fn set_fn_silent(self, f: impl FnOnce(&T) -> T) {
        self.update_silent(move |val| *val = f(val));
    }

    /// Set the value from a function of the previous value and notify
    /// dependents.
    #[cfg_attr(debug_assertions, track_caller)]
    pub fn set_fn(self, f: impl FnOnce(&T) -> T) {
        self.update(move |val| *val = f(val));
    }

    /// Create a memo projecting this signal through `f`.
    #[cfg_attr(debug_assertions, track_caller)]
    pub fn map<U: PartialEq>(self, mut f: impl FnMut(&T) -> U + 'static) -> ReadSignal<U> {
        crate::create_memo(move || self.with(&mut f))
    }

    /// Split the signal into a read half and a setter closure.
    pub fn split(self) -> (ReadSignal<T>, impl Fn(T) -> T) {
        (*self, move |value| self.replace(value))
    }
}

/// We manually implement `Clone` + `Copy` for `ReadSignal` and `Signal` so
/// that we don't get extra bounds on `T`.
impl<T> Clone for ReadSignal<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for ReadSignal<T> {}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Signal<T> {}

impl<T: Default> Default for ReadSignal<T> {
    fn default() -> Self {
        *create_signal_with(Default::default(), |_, _| false)
    }
}
impl<T: Default> Default for Signal<T> {
    fn default() -> Self {
        create_signal_with(Default::default(), |_, _| false)
    }
}

// Forward `PartialEq`, `Eq`, `PartialOrd`, `Ord`, `Hash` from the inner
// type.
impl<T: PartialEq> PartialEq for ReadSignal<T> {
    #[cfg_attr(debug_assertions, track_caller)]
    fn eq(&self, other: &Self) -> bool {
        self.with(|value| other.with(|other| value == other))
    }
}
impl<T: Eq> Eq for ReadSignal<T> {}
impl<T: PartialOrd> PartialOrd for ReadSignal<T> {
    #[cfg_attr(debug_assertions, track_caller)]
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.with(|value| other.with(|other| value.partial_cmp(other)))
    }
}
impl<T: Ord> Ord for ReadSignal<T> {
    #[cfg_attr(debug_assertions, track_caller)]
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.with(|value| other.with(|other| value.cmp(other)))
    }
}
impl<T: Hash> Hash for ReadSignal<T> {
    #[cfg_attr(debug_assertions, track_caller)]
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.with(|value| value.hash(state))
    }
}

impl<T: PartialEq> PartialEq for Signal<T> {
    #[cfg_attr(debug_assertions, track_caller)]
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl<T: Eq> Eq for Signal<T> {}
impl<T: PartialOrd> PartialOrd for Signal<T> {
    #[cfg_attr(debug_assertions, track_caller)]
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.0.partial_cmp(&other.0)
    }
}
impl<T: Ord> Ord for Signal<T> {
    #[cfg_attr(debug_assertions, track_caller)]
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}
impl<T: Hash> Hash for Signal<T> {
    #[cfg_attr(debug_assertions, track_caller)]
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state)
    }
}

impl<T> Deref for Signal<T> {
    type Target = ReadSignal<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

// Formatting implementations for `ReadSignal` and `Signal`.
impl<T: fmt::Debug> fmt::Debug for ReadSignal<T> {
    #[cfg_attr(debug_assertions, track_caller)]
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.with(|value| value.fmt(f))
    }
}
impl<T: fmt::Debug> fmt::Debug for Signal<T> {
    #[cfg_attr(debug_assertions, track_caller)]
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl<T: fmt::Display> fmt::Display for ReadSignal<T> {
    #[cfg_attr(debug_assertions, track_caller)]
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.with(|value| value.fmt(f))
    }
}
impl<T: fmt::Display> fmt::Display for Signal<T> {
    #[cfg_attr(debug_assertions, track_caller)]
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// Serde implementations for `ReadSignal` and `Signal`.
#[cfg(feature = "serde")]
impl<T: serde::Serialize> serde::Serialize for ReadSignal<T> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.with(|value| value.serialize(serializer))
    }
}
#[cfg(feature = "serde")]
impl<'de, T: serde::Deserialize<'de> + PartialEq> serde::Deserialize<'de> for ReadSignal<T> {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(*create_signal(T::deserialize(deserializer)?))
    }
}
#[cfg(feature = "serde")]
impl<T: serde::Serialize> serde::Serialize for Signal<T> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}
#[cfg(feature = "serde")]
impl<'de, T: serde::Deserialize<'de> + PartialEq> serde::Deserialize<'de> for Signal<T> {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(create_signal(T::deserialize(deserializer)?))
    }
}

impl<T: AddAssign<Rhs>, Rhs> AddAssign<Rhs> for Signal<T> {
    fn add_assign(&mut self, rhs: Rhs) {
        self.update(|this| *this += rhs);
    }
}
impl<T: SubAssign<Rhs>, Rhs> SubAssign<Rhs> for Signal<T> {
    fn sub_assign(&mut self, rhs: Rhs) {
        self.update(|this| *this -= rhs);
    }
}
impl<T: MulAssign<Rhs>, Rhs> MulAssign<Rhs> for Signal<T> {
    fn mul_assign(&mut self, rhs: Rhs) {
        self.update(|this| *this *= rhs);
    }
}
impl<T: DivAssign<Rhs>, Rhs> DivAssign<Rhs> for Signal<T> {
    fn div_assign(&mut self, rhs: Rhs) {
        self.update(|this| *this /= rhs);
    }
}
impl<T: RemAssign<Rhs>, Rhs> RemAssign<Rhs> for Signal<T> {
    fn rem_assign(&mut self, rhs: Rhs) {
        self.update(|this| *this %= rhs);
    }
}
