//! Fine-grained reactive primitives.
//!
//! The reactive graph is made of three kinds of nodes: [`Signal`]s (writable
//! cells), memos (lazily recomputed derivations, see [`create_memo`]), and
//! effects (side-effecting subscribers, see [`create_effect`]). Reading a
//! value inside a memo or effect automatically subscribes the surrounding
//! computation to it, so state stays consistent without manual wiring:
//!
//! ```rust
//! use alder_reactive::*;
//!
//! let root = create_root(|| {
//!     let count = create_signal(0);
//!     let doubled = create_memo(move || count.get() * 2);
//!
//!     create_effect(move || {
//!         println!("doubled = {}", doubled.get());
//!     });
//!     // Prints "doubled = 0"
//!
//!     count.set(1);
//!     // Prints "doubled = 2"
//! });
//! ```
//!
//! A write marks the downstream graph stale top-down; values are recomputed
//! bottom-up when they are next read, and only along paths where something
//! actually changed. Effects queue up and run at the end of the triggering
//! write, or at the end of the outermost [`batch`].

#![warn(missing_docs)]

mod effects;
mod memos;
mod node;
mod root;
mod signals;

pub use effects::*;
pub use memos::*;
pub use node::NodeHandle;
pub use root::*;
pub use signals::*;

/// Reactive values that can be tracked as dependencies: signals, memos, and
/// tuples or arrays of them. Used with [`on`].
pub trait Track {
    /// Track every reactive value in `self` in the current tracked context.
    fn track(&self);
}

impl<T> Track for ReadSignal<T> {
    fn track(&self) {
        ReadSignal::track(*self);
    }
}

impl<T> Track for Signal<T> {
    fn track(&self) {
        ReadSignal::track(**self);
    }
}

impl<T: Track, const N: usize> Track for [T; N] {
    fn track(&self) {
        for dependency in self {
            dependency.track();
        }
    }
}

macro_rules! impl_track_for_tuple {
    ($($name:ident),*) => {
        impl<$($name: Track),*> Track for ($($name,)*) {
            fn track(&self) {
                #[allow(non_snake_case)]
                let ($($name,)*) = self;
                $($name.track();)*
            }
        }
    };
}

impl_track_for_tuple!(A);
impl_track_for_tuple!(A, B);
impl_track_for_tuple!(A, B, C);
impl_track_for_tuple!(A, B, C, D);
impl_track_for_tuple!(A, B, C, D, E);
impl_track_for_tuple!(A, B, C, D, E, F);

/// A helper for making the dependencies of a computation explicit.
///
/// The returned closure tracks `dependencies` and runs `f` untracked, so the
/// computation re-runs exactly when one of the listed dependencies changes.
/// This is particularly useful for async computations, where reads after the
/// first suspension point are not captured automatically.
///
/// # Example
/// ```
/// # use alder_reactive::*;
/// # let _ = create_root(|| {
/// let state = create_signal(0);
///
/// create_effect(on(*state, move || {
///     println!("state changed. new value = {}", state.get_untracked());
/// })); // Prints "state changed. new value = 0"
///
/// state.set(1); // Prints "state changed. new value = 1"
/// # });
/// ```
pub fn on<D: Track + 'static, U>(
    dependencies: D,
    mut f: impl FnMut() -> U + 'static,
) -> impl FnMut() -> U + 'static {
    move || {
        dependencies.track();
        untrack(&mut f)
    }
}
