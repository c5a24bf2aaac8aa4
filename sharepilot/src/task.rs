use std::future::Future;
use tokio::task::{AbortHandle, JoinHandle, JoinSet};
use tracing::Instrument;

/// Spawns a task whose log lines are tagged with `task = name`.
pub fn spawn_named<F>(name: &str, future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(future.instrument(tracing::info_span!("task", name = %name)))
}

/// [`spawn_named`] for tasks owned by a `JoinSet`.
pub fn spawn_named_in<F>(set: &mut JoinSet<F::Output>, name: &str, future: F) -> AbortHandle
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    set.spawn(future.instrument(tracing::info_span!("task", name = %name)))
}
