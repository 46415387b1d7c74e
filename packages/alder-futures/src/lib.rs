//! Async derivations for `alder-reactive`.
//!
//! [`create_async_memo`] and [`create_stream_memo`] wrap a future- or
//! stream-producing computation in a reactive node whose observable state is
//! an [`AsyncValue`]: loading, data, or error, with the previous data carried
//! across re-runs. Dependencies read before the first suspension point are
//! captured automatically; a dependency change cancels the in-flight run and
//! starts a new one, and a cancelled run never touches the observable state.
//!
//! ```rust
//! use alder_futures::*;
//! use alder_reactive::*;
//!
//! # async fn fetch_username(id: i32) -> Result<String, std::convert::Infallible> {
//! #     Ok(format!("user-{id}"))
//! # }
//! # let _ = provide_executor_scope(async {
//! let root = create_root(|| {
//!     let user_id = create_signal(1);
//!     let username = create_async_memo(move || async move {
//!         // `user_id` is read before the first await, so it is tracked.
//!         let id = user_id.get();
//!         fetch_username(id).await
//!     });
//!
//!     create_effect(move || {
//!         username.with(|value| match value {
//!             AsyncValue::Loading { .. } => println!("loading..."),
//!             AsyncValue::Data(name) => println!("hello, {name}"),
//!             AsyncValue::Error { .. } => println!("something went wrong"),
//!         });
//!     });
//! });
//! # });
//! ```

#![deny(missing_debug_implementations)]
#![warn(missing_docs)]

mod async_memo;
mod async_value;

pub use async_memo::*;
pub use async_value::*;

use alder_reactive::on_cleanup;
use futures::future::abortable;
use futures::Future;

/// If running on the `wasm32` target, does nothing. Otherwise runs `f`
/// inside a new `tokio::task::LocalSet` so that `!Send` futures can be
/// spawned.
pub async fn provide_executor_scope<U>(f: impl Future<Output = U>) -> U {
    #[cfg(target_arch = "wasm32")]
    {
        f.await
    }
    #[cfg(not(target_arch = "wasm32"))]
    {
        let local = tokio::task::LocalSet::new();
        local.run_until(f).await
    }
}

/// Spawns a `!Send` future on the current scope. If the scope is disposed
/// before the future is completed, it is aborted immediately. This ensures
/// that it is impossible to access any reactive value owned by the scope
/// after it is gone.
pub fn spawn_local_scoped(f: impl Future<Output = ()> + 'static) {
    let (abortable, handle) = abortable(f);
    on_cleanup(move || handle.abort());
    #[cfg(not(target_arch = "wasm32"))]
    {
        let _ = tokio::task::spawn_local(async move {
            let _ = abortable.await;
        });
    }
    #[cfg(target_arch = "wasm32")]
    wasm_bindgen_futures::spawn_local(async move {
        let _ = abortable.await;
    });
}
