//! Side effects!

use crate::node::{NodeFlags, NodeKind};
use crate::root::{NodeCallback, Root};
use crate::NodeHandle;

/// Creates an effect on signals used inside the effect closure.
///
/// The closure runs once immediately to capture its initial dependencies,
/// and again whenever one of them changes. Inside a [`batch`](crate::batch),
/// effects are deferred to the end of the batch and run at most once no
/// matter how many of their dependencies were written.
///
/// The returned [`NodeHandle`] stops the effect: disposing it detaches the
/// effect from every signal it was subscribed to.
///
/// # Example
/// ```
/// # use alder_reactive::*;
/// # let _ = create_root(|| {
/// let state = create_signal(0);
///
/// create_effect(move || {
///     println!("new state = {}", state.get());
/// });
/// // Prints "new state = 0"
///
/// state.set(1);
/// // Prints "new state = 1"
/// # });
/// ```
///
/// `create_effect` should only be used for creating **side-effects**. It is
/// generally not recommended to update signal states inside an effect. You
/// probably should be using a [`create_memo`](crate::create_memo) instead.
///
/// An effect that writes one of its own dependencies does not re-trigger
/// itself; see [`create_recursive_effect`] if that is what you want.
#[cfg_attr(debug_assertions, track_caller)]
pub fn create_effect(f: impl FnMut() + 'static) -> NodeHandle {
    create_effect_impl(f, NodeFlags::default())
}

/// Like [`create_effect`], but the effect is allowed to re-queue itself by
/// writing its own dependencies.
///
/// The effect keeps re-running until a run leaves its dependencies
/// unchanged, so the closure must converge.
///
/// # Example
/// ```
/// # use alder_reactive::*;
/// # let _ = create_root(|| {
/// let n = create_signal(0);
/// create_recursive_effect(move || {
///     // Count up to 5, one run at a time.
///     if n.get() < 5 {
///         n.set(n.get_untracked() + 1);
///     }
/// });
/// assert_eq!(n.get(), 5);
/// # });
/// ```
#[cfg_attr(debug_assertions, track_caller)]
pub fn create_recursive_effect(f: impl FnMut() + 'static) -> NodeHandle {
    create_effect_impl(f, NodeFlags::RECURSIVE)
}

#[cfg_attr(debug_assertions, track_caller)]
fn create_effect_impl(mut f: impl FnMut() + 'static, flags: NodeFlags) -> NodeHandle {
    let root = Root::global();
    let callback: NodeCallback = Box::new(move |_| {
        f();
        false
    });
    let id = root.create_node(
        NodeKind::Effect,
        None,
        Some(callback),
        None,
        flags | NodeFlags::DIRTY,
    );
    // Runs synchronously once to capture the initial dependencies.
    root.with_deferred_effects(|| root.run_node_update(id));
    NodeHandle(id, root)
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use slotmap::Key;

    use crate::root::Root;
    use crate::*;

    #[test]
    fn effect() {
        let _ = create_root(|| {
            let state = create_signal(0);
            let double = create_signal(-1);

            create_effect(move || {
                double.set(state.get() * 2);
            });
            // The effect runs once at creation.
            assert_eq!(double.get(), 0);

            state.set(1);
            assert_eq!(double.get(), 2);
            state.set(2);
            assert_eq!(double.get(), 4);
        });
    }

    #[test]
    fn effect_logs_memo_values() {
        let _ = create_root(|| {
            let count = create_signal(0);
            let doubled = create_memo(move || count.get() * 2);
            let log = Rc::new(RefCell::new(Vec::new()));
            create_effect({
                let log = Rc::clone(&log);
                move || log.borrow_mut().push(doubled.get())
            });

            count.set(1);
            count.set(2);
            assert_eq!(*log.borrow(), vec![0, 2, 4]);
        });
    }

    #[test]
    fn effect_with_explicit_dependencies() {
        let _ = create_root(|| {
            let state = create_signal(0);
            let double = create_signal(-1);

            create_effect(on(*state, move || {
                double.set(state.get_untracked() * 2);
            }));
            assert_eq!(double.get(), 0);

            state.set(1);
            assert_eq!(double.get(), 2);
            state.set(2);
            assert_eq!(double.get(), 4);
        });
    }

    #[test]
    fn effect_cannot_create_infinite_loop() {
        let _ = create_root(|| {
            let state = create_signal(0);
            create_effect(move || {
                state.track();
                state.update(|_| ());
            });
            state.update(|_| ());
        });
    }

    #[test]
    fn recursive_effect_converges() {
        let _ = create_root(|| {
            let n = create_signal(0);
            create_recursive_effect(move || {
                if n.get() < 5 {
                    n.set(n.get_untracked() + 1);
                }
            });
            assert_eq!(n.get(), 5);
        });
    }

    #[test]
    fn effect_should_only_subscribe_once_to_same_signal() {
        let _ = create_root(|| {
            let state = create_signal(0);

            let counter = create_signal(0);
            create_effect(move || {
                counter.set(counter.get_untracked() + 1);

                // Track `state` twice, subscribe once.
                state.track();
                state.track();
            });

            assert_eq!(counter.get(), 1);

            state.set(1);
            assert_eq!(counter.get(), 2);
        });
    }

    #[test]
    fn effect_should_recreate_dependencies_each_time() {
        let _ = create_root(|| {
            let condition = create_signal(true);

            let state1 = create_signal(0);
            let state2 = create_signal(1);

            let counter = create_signal(0);
            create_effect(move || {
                counter.set(counter.get_untracked() + 1);

                if condition.get() {
                    state1.track();
                } else {
                    state2.track();
                }
            });

            assert_eq!(counter.get(), 1);

            state1.set(1);
            assert_eq!(counter.get(), 2);

            state2.set(1);
            assert_eq!(counter.get(), 2); // not tracked

            condition.set(false);
            assert_eq!(counter.get(), 3);

            state1.set(2);
            assert_eq!(counter.get(), 3); // not tracked

            state2.set(2);
            assert_eq!(counter.get(), 4); // tracked after condition.set
        });
    }

    #[test]
    fn effects_run_in_order_of_first_notification() {
        let _ = create_root(|| {
            let state = create_signal(0);
            let order = Rc::new(RefCell::new(Vec::new()));
            for name in ["first", "second", "third"] {
                let order = Rc::clone(&order);
                create_effect(move || {
                    state.track();
                    order.borrow_mut().push(name);
                });
            }
            order.borrow_mut().clear();

            state.set(1);
            // Propagation visits the newest subscriber first, so the queue
            // holds the effects in reverse creation order.
            assert_eq!(*order.borrow(), vec!["third", "second", "first"]);
        });
    }

    #[test]
    fn destroy_effects_on_scope_dispose() {
        let _ = create_root(|| {
            let counter = create_signal(0);
            let trigger = create_signal(());

            let child_scope = create_child_scope(move || {
                create_effect(move || {
                    trigger.track();
                    counter.set(counter.get_untracked() + 1);
                });
            });

            assert_eq!(counter.get(), 1);

            trigger.update(|_| ());
            assert_eq!(counter.get(), 2);

            child_scope.dispose();
            trigger.update(|_| ());
            assert_eq!(counter.get(), 2); // the effect is gone
        });
    }

    #[test]
    fn stopped_effect_leaves_no_subscriptions_behind() {
        let _ = create_root(|| {
            let state = create_signal(0);
            let handle = create_effect(move || {
                state.track();
            });
            handle.dispose();

            let root = Root::global();
            let nodes = root.nodes.borrow();
            for (_, node) in nodes.iter() {
                assert!(
                    node.subs_head.is_null() && node.deps_head.is_null(),
                    "dangling link after effect disposal"
                );
            }
            drop(nodes);

            // Double-stop is a no-op.
            handle.dispose();
        });
    }

    #[test]
    fn nested_effects_are_disposed_with_their_parent_run() {
        let _ = create_root(|| {
            let trigger = create_signal(());

            let outer_counter = create_signal(0);
            let inner_counter = create_signal(0);

            create_effect(move || {
                trigger.track();
                outer_counter.set(outer_counter.get_untracked() + 1);

                create_effect(move || {
                    trigger.track();
                    inner_counter.set(inner_counter.get_untracked() + 1);
                });
            });

            assert_eq!(outer_counter.get(), 1);
            assert_eq!(inner_counter.get(), 1);

            trigger.update(|_| ());

            assert_eq!(outer_counter.get(), 2);
            // The old inner effect ran once from the queue before the outer
            // re-run disposed it and created a replacement, which ran once
            // more at creation.
            assert_eq!(inner_counter.get(), 3);
        });
    }

    #[test]
    fn effect_scoped_subscribing_to_own_signal() {
        let _ = create_root(|| {
            let trigger = create_signal(());
            create_effect(move || {
                trigger.track();
                let signal = create_signal(());
                // Track a signal created inside this very effect.
                signal.track();
            });
            trigger.update(|_| ());
        });
    }

    #[test]
    fn effect_created_inside_batch_runs_immediately() {
        let _ = create_root(|| {
            let state = create_signal(0);
            let seen = create_signal(-1);
            batch(move || {
                state.set(1);
                create_effect(move || {
                    seen.set(state.get());
                });
                // The initial run is synchronous even inside a batch.
                assert_eq!(seen.get(), 1);
            });
        });
    }
}
