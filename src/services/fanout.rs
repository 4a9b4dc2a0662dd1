use std::{future::Future, sync::Arc};

use tokio::sync::Semaphore;

use crate::{
    error::{AppError, AppResult},
    models::MovieId,
};

/// Runs `fetch` for every id on its own task, at most `limit` at a time.
///
/// Results come back in the order of `ids`. A branch that fails, or whose
/// task panics, is logged and yields `None` so one bad lookup never aborts
/// the caller.
pub async fn fan_out<T, F, Fut>(ids: &[MovieId], limit: usize, fetch: F) -> Vec<(MovieId, Option<T>)>
where
    T: Send + 'static,
    F: Fn(MovieId) -> Fut,
    Fut: Future<Output = AppResult<T>> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(limit.max(1)));
    let mut tasks = Vec::with_capacity(ids.len());

    for &id in ids {
        let semaphore = semaphore.clone();
        let request = fetch(id);
        let task = tokio::spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|e| AppError::Internal(e.to_string()))?;
            request.await
        });
        tasks.push((id, task));
    }

    let mut results = Vec::with_capacity(tasks.len());
    let mut failures = 0usize;
    for (id, task) in tasks {
        let value = match task.await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) if e.is_provider_error() => {
                failures += 1;
                tracing::warn!(movie_id = id, error = %e, "Metadata provider degraded");
                None
            }
            Ok(Err(e)) => {
                failures += 1;
                tracing::error!(movie_id = id, error = %e, "Metadata lookup failed");
                None
            }
            Err(e) => {
                failures += 1;
                tracing::error!(movie_id = id, error = %e, "Task join error");
                None
            }
        };
        results.push((id, value));
    }

    if failures > 0 {
        tracing::warn!(
            success_count = results.len() - failures,
            error_count = failures,
            "Partial metadata fan-out failure"
        );
    }

    results
}
