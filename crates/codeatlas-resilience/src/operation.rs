use codeatlas_core::Result;
use futures::future::{BoxFuture, FutureExt};
use std::future::Future;
use std::sync::Arc;

/// A re-invocable asynchronous operation. Strategies such as retry call
/// the factory once per attempt.
pub type Operation<'a, T> = Arc<dyn Fn() -> BoxFuture<'a, Result<T>> + Send + Sync + 'a>;

/// Wrap a closure returning a future into an [`Operation`].
pub fn operation<'a, T, F, Fut>(f: F) -> Operation<'a, T>
where
    F: Fn() -> Fut + Send + Sync + 'a,
    Fut: Future<Output = Result<T>> + Send + 'a,
{
    Arc::new(move || f().boxed())
}
