//! Memos: lazy, cached derivations.

use std::cell::RefCell;

use crate::node::{NodeFlags, NodeKind};
use crate::root::{NodeCallback, Root};
use crate::{create_signal, ReadSignal, Signal};

/// Creates a memoized computation from some signals.
///
/// The output is derived from all the signals that are used within the memo
/// closure. If any of the tracked signals are updated, the memo is marked
/// stale and recomputed the next time it is read.
///
/// # Laziness
///
/// A memo does no work until somebody reads it: creation does not run the
/// closure, and a write to a dependency only marks the memo, it does not
/// recompute it. An effect subscribed to the memo counts as a reader.
///
/// # Equality
///
/// If a recomputation produces a value equal to the cached one (by
/// [`PartialEq`]), dependents are not notified. Use [`create_memo_with`] to
/// supply a different predicate or to access the previously cached value
/// while computing.
///
/// # Example
/// ```rust
/// # use alder_reactive::*;
/// # let _ = create_root(|| {
/// let state = create_signal(0);
/// let double = create_memo(move || state.get() * 2);
///
/// assert_eq!(double.get(), 0);
/// state.set(1);
/// assert_eq!(double.get(), 2);
/// # });
/// ```
#[cfg_attr(debug_assertions, track_caller)]
pub fn create_memo<T: PartialEq + 'static>(
    mut f: impl FnMut() -> T + 'static,
) -> ReadSignal<T> {
    create_memo_with(|a, b| a == b, move |_| f())
}

/// Creates a memo with a custom equality predicate and access to the
/// previously cached value.
///
/// `eq` receives the freshly computed value and the cached one and returns
/// `true` if dependents should *not* be notified. `f` receives the cached
/// value from the previous run, or `None` on the first evaluation.
///
/// # Example
/// ```rust
/// # use alder_reactive::*;
/// # let _ = create_root(|| {
/// let state = create_signal(1);
/// // Accumulate all values state has taken.
/// let history = create_memo_with(
///     |_, _| false,
///     move |prev: Option<&Vec<i32>>| {
///         let mut history = prev.cloned().unwrap_or_default();
///         history.push(state.get());
///         history
///     },
/// );
/// assert_eq!(history.get_clone(), vec![1]);
/// state.set(2);
/// assert_eq!(history.get_clone(), vec![1, 2]);
/// state.set(3);
/// assert_eq!(history.get_clone(), vec![1, 2, 3]);
/// # });
/// ```
#[cfg_attr(debug_assertions, track_caller)]
pub fn create_memo_with<T: 'static>(
    mut eq: impl FnMut(&T, &T) -> bool + 'static,
    mut f: impl FnMut(Option<&T>) -> T + 'static,
) -> ReadSignal<T> {
    let root = Root::global();
    let callback: NodeCallback = Box::new(move |slot| {
        let new = f(slot.as_ref().and_then(|value| value.downcast_ref::<T>()));
        match slot.as_mut().and_then(|value| value.downcast_mut::<T>()) {
            Some(old) if eq(&new, old) => false,
            Some(old) => {
                *old = new;
                true
            }
            None => {
                *slot = Some(Box::new(new));
                true
            }
        }
    });
    // Created stale; the first read computes the initial value.
    let id = root.create_node(NodeKind::Memo, None, Some(callback), None, NodeFlags::DIRTY);
    ReadSignal::new(id, root)
}

/// An alternative to [`create_signal`] that uses a reducer to get the next
/// value.
///
/// It uses a reducer function that takes the previous value and a message
/// and returns the next value.
///
/// Returns a [`ReadSignal`] and a dispatch function to send messages to the
/// reducer.
///
/// # Example
/// ```rust
/// # use alder_reactive::*;
/// enum Msg {
///     Increment,
///     Decrement,
/// }
///
/// # let _ = create_root(|| {
/// let (state, dispatch) = create_reducer(0, |&state, msg: Msg| match msg {
///     Msg::Increment => state + 1,
///     Msg::Decrement => state - 1,
/// });
///
/// assert_eq!(state.get(), 0);
/// dispatch(Msg::Increment);
/// assert_eq!(state.get(), 1);
/// dispatch(Msg::Decrement);
/// assert_eq!(state.get(), 0);
/// # });
/// ```
#[cfg_attr(debug_assertions, track_caller)]
pub fn create_reducer<T: PartialEq + 'static, Msg>(
    initial: T,
    reduce: impl FnMut(&T, Msg) -> T + 'static,
) -> (ReadSignal<T>, impl Fn(Msg)) {
    let reduce = RefCell::new(reduce);
    let signal: Signal<T> = create_signal(initial);
    let dispatch = move |msg| signal.update(|value| *value = (*reduce.borrow_mut())(value, msg));
    (*signal, dispatch)
}
