//! Reactive wrappers around futures and streams.

use std::future::Future;
use std::mem;
use std::task::{Context, Poll};

use alder_reactive::{create_effect, create_signal_with, ReadSignal, Signal};
use futures::task::noop_waker;
use futures::{Stream, StreamExt};

use crate::{spawn_local_scoped, AsyncValue};

/// Creates a derivation whose computation is asynchronous.
///
/// The returned signal holds an [`AsyncValue`]: `Loading` while a run is in
/// flight (carrying the previous data, if any), then `Data` on success or
/// `Error` on failure.
///
/// Each re-run calls `f` and polls the returned future once, synchronously,
/// under dependency tracking: every reactive value read before the first
/// suspension point becomes a dependency. Reads after the first `await` are
/// *not* tracked; list them explicitly with [`on`](alder_reactive::on) if
/// they should trigger re-runs.
///
/// When a dependency changes, the in-flight run is cancelled and a new one
/// starts. A cancelled run never updates the state: only the latest run's
/// result is observable. The same happens when the owning scope is disposed.
///
/// # Example
/// ```rust
/// # use alder_futures::*;
/// # use alder_reactive::*;
/// # let _ = provide_executor_scope(async {
/// # let _ = create_root(|| {
/// let id = create_signal(1);
/// let user = create_async_memo(move || async move {
///     let id = id.get(); // tracked: read before the first await
///     load_user(id).await
/// });
/// # });
/// # });
/// # async fn load_user(id: i32) -> Result<String, std::convert::Infallible> {
/// #     Ok(format!("user-{id}"))
/// # }
/// ```
pub fn create_async_memo<T, E, Fut>(
    mut f: impl FnMut() -> Fut + 'static,
) -> ReadSignal<AsyncValue<T, E>>
where
    T: 'static,
    E: 'static,
    Fut: Future<Output = Result<T, E>> + 'static,
{
    let state = create_signal_with(AsyncValue::Loading { previous: None }, |_, _| false);
    create_effect(move || {
        // The synchronous prefix of the future runs here, under tracking.
        // The previous run's task is aborted by the cleanup registered when
        // it was spawned.
        let mut fut = Box::pin(f());
        let waker = noop_waker();
        match fut.as_mut().poll(&mut Context::from_waker(&waker)) {
            Poll::Ready(result) => settle(state, result),
            Poll::Pending => {
                begin_loading(state);
                spawn_local_scoped(async move {
                    let result = fut.await;
                    settle(state, result);
                });
            }
        }
    });
    *state
}

/// Creates a derivation fed by a stream.
///
/// `f` runs under dependency tracking and returns the stream to subscribe
/// to; each item moves the state to `Data` (or `Error` for failed items).
/// When a dependency changes, the current subscription is torn down and `f`
/// is called again for a fresh one. Disposing the owning scope tears the
/// subscription down for good.
pub fn create_stream_memo<T, E, S>(
    mut f: impl FnMut() -> S + 'static,
) -> ReadSignal<AsyncValue<T, E>>
where
    T: 'static,
    E: 'static,
    S: Stream<Item = Result<T, E>> + 'static,
{
    let state = create_signal_with(AsyncValue::Loading { previous: None }, |_, _| false);
    create_effect(move || {
        // Creating the stream is the tracked prefix of the subscription.
        let mut stream = Box::pin(f());
        begin_loading(state);
        spawn_local_scoped(async move {
            while let Some(item) = stream.next().await {
                settle(state, item);
            }
        });
    });
    *state
}

/// Move the state to `Loading`, carrying over the latest successful data.
fn begin_loading<T: 'static, E: 'static>(state: Signal<AsyncValue<T, E>>) {
    state.update(|value| {
        let previous =
            mem::replace(value, AsyncValue::Loading { previous: None }).into_latest_data();
        *value = AsyncValue::Loading { previous };
    });
}

/// Record the result of a completed run.
fn settle<T: 'static, E: 'static>(state: Signal<AsyncValue<T, E>>, result: Result<T, E>) {
    state.update(|value| {
        let previous =
            mem::replace(value, AsyncValue::Loading { previous: None }).into_latest_data();
        *value = match result {
            Ok(data) => AsyncValue::Data(data),
            Err(error) => AsyncValue::Error { error, previous },
        };
    });
}

#[cfg(all(test, not(target_arch = "wasm32")))]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::convert::Infallible;
    use std::rc::Rc;

    use alder_reactive::*;
    use futures::channel::{mpsc, oneshot};
    use futures::StreamExt;

    use crate::*;

    /// Poll the local task set a few times so spawned tasks make progress.
    async fn drive() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn async_memo_resolves() {
        provide_executor_scope(async {
            let root = create_root(|| {});
            let value = root.run_in(|| {
                create_async_memo(move || async move {
                    tokio::task::yield_now().await;
                    Ok::<_, Infallible>(42)
                })
            });
            root.run_in(|| {
                assert!(value.with(AsyncValue::is_loading));
            });

            drive().await;
            root.run_in(|| {
                assert_eq!(value.with(|v| v.data().copied()), Some(42));
            });
        })
        .await;
    }

    #[tokio::test]
    async fn ready_future_settles_synchronously() {
        provide_executor_scope(async {
            let root = create_root(|| {});
            root.run_in(|| {
                let value = create_async_memo(move || async move { Ok::<_, Infallible>(7) });
                // No suspension point: the data is available immediately.
                assert_eq!(value.with(|v| v.data().copied()), Some(7));
            });
        })
        .await;
    }

    #[tokio::test]
    async fn dependency_change_discards_stale_result() {
        provide_executor_scope(async {
            let root = create_root(|| {});
            let resolved = Rc::new(RefCell::new(Vec::new()));
            root.run_in({
                let resolved = Rc::clone(&resolved);
                move || {
                    let id = create_signal(1);
                    let value = create_async_memo(move || async move {
                        let captured = id.get();
                        tokio::task::yield_now().await;
                        Ok::<_, Infallible>(captured)
                    });
                    create_effect(move || {
                        value.with(|v| {
                            if let Some(&data) = v.data() {
                                resolved.borrow_mut().push(data);
                            }
                        });
                    });
                    // Change the dependency before the first run resolves.
                    id.set(2);
                }
            });

            drive().await;
            // The first run was cancelled; only the latest result landed.
            assert_eq!(*resolved.borrow(), vec![2]);
        })
        .await;
    }

    #[tokio::test]
    async fn reloading_keeps_previous_data() {
        provide_executor_scope(async {
            let root = create_root(|| {});
            let (id, value) = root.run_in(|| {
                let id = create_signal(1);
                let value = create_async_memo(move || async move {
                    let captured = id.get();
                    tokio::task::yield_now().await;
                    Ok::<_, Infallible>(captured * 10)
                });
                (id, value)
            });

            drive().await;
            root.run_in(|| {
                assert_eq!(value.with(|v| v.data().copied()), Some(10));
                id.set(2);
                // Back to loading, but the old data is still observable.
                assert!(value.with(AsyncValue::is_loading));
                assert_eq!(value.with(|v| v.previous_data().copied()), Some(10));
            });

            drive().await;
            root.run_in(|| {
                assert_eq!(value.with(|v| v.data().copied()), Some(20));
            });
        })
        .await;
    }

    #[tokio::test]
    async fn failure_keeps_previous_data() {
        provide_executor_scope(async {
            let root = create_root(|| {});
            let (attempt, value) = root.run_in(|| {
                let attempt = create_signal(1);
                let value = create_async_memo(move || async move {
                    let attempt = attempt.get();
                    tokio::task::yield_now().await;
                    if attempt > 1 {
                        Err("unreachable host")
                    } else {
                        Ok(attempt)
                    }
                });
                (attempt, value)
            });

            drive().await;
            root.run_in(|| {
                assert_eq!(value.with(|v| v.data().copied()), Some(1));
                attempt.set(2);
            });

            drive().await;
            root.run_in(|| {
                assert_eq!(value.with(|v| v.error().copied()), Some("unreachable host"));
                assert_eq!(value.with(|v| v.previous_data().copied()), Some(1));
                assert_eq!(value.with(|v| v.latest_data().copied()), Some(1));
            });
        })
        .await;
    }

    #[tokio::test]
    async fn scope_dispose_aborts_in_flight_run() {
        provide_executor_scope(async {
            let root = create_root(|| {});
            let resumed = Rc::new(Cell::new(false));
            let (scope, tx) = root.run_in({
                let resumed = Rc::clone(&resumed);
                move || {
                    let (tx, rx) = oneshot::channel::<()>();
                    let rx = RefCell::new(Some(rx));
                    let scope = create_child_scope(move || {
                        let _value = create_async_memo(move || {
                            let rx = rx.borrow_mut().take().expect("single run");
                            let resumed = Rc::clone(&resumed);
                            async move {
                                let _ = rx.await;
                                resumed.set(true);
                                Ok::<_, Infallible>(0)
                            }
                        });
                    });
                    (scope, tx)
                }
            });

            root.run_in(|| scope.dispose());
            let _ = tx.send(());
            drive().await;
            // The task was aborted at disposal and never resumed.
            assert!(!resumed.get());
        })
        .await;
    }

    #[tokio::test]
    async fn stream_memo_observes_items() {
        provide_executor_scope(async {
            let root = create_root(|| {});
            let (tx, rx) = mpsc::unbounded::<i32>();
            let rx = RefCell::new(Some(rx));
            let value = root.run_in(move || {
                create_stream_memo(move || {
                    let rx = rx.borrow_mut().take().expect("single subscription");
                    rx.map(Ok::<_, Infallible>)
                })
            });

            root.run_in(|| assert!(value.with(AsyncValue::is_loading)));

            tx.unbounded_send(1).unwrap();
            drive().await;
            root.run_in(|| assert_eq!(value.with(|v| v.data().copied()), Some(1)));

            tx.unbounded_send(2).unwrap();
            drive().await;
            root.run_in(|| assert_eq!(value.with(|v| v.data().copied()), Some(2)));
        })
        .await;
    }

    #[tokio::test]
    async fn stream_subscription_renews_on_dependency_change() {
        provide_executor_scope(async {
            let root = create_root(|| {});
            let (id, value) = root.run_in(|| {
                let id = create_signal(1);
                let value = create_stream_memo(move || {
                    futures::stream::iter(vec![Ok::<_, Infallible>(id.get() * 10)])
                });
                (id, value)
            });

            drive().await;
            root.run_in(|| assert_eq!(value.with(|v| v.data().copied()), Some(10)));

            root.run_in(|| id.set(2));
            drive().await;
            root.run_in(|| assert_eq!(value.with(|v| v.data().copied()), Some(20)));
        })
        .await;
    }
}
