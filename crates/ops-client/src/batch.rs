//! Bulk request batching
//!
//! OPS bulk endpoints accept at most [`MAX_BATCH_SIZE`] identifiers per POST.
//! Larger inputs are split into ordered, contiguous chunks and fetched one
//! after another. The first failing chunk aborts the whole run.

use std::fmt;
use std::future::Future;

use tracing::{debug, info};

use crate::context::Context;
use crate::error::{Error, Result};

/// Upper bound on identifiers per bulk request.
pub const MAX_BATCH_SIZE: usize = 100;

/// Progress callback: `(1-based batch index, total batches)`.
pub type ProgressFn = Box<dyn Fn(usize, usize) + Send + Sync>;

/// Tuning for one bulk run.
pub struct BulkOptions {
    /// Items per batch; 0 selects the endpoint maximum
    pub batch_size: usize,
    /// Validated but not honored yet; batches always run sequentially
    pub max_concurrent: usize,
    pub progress: Option<ProgressFn>,
}

impl Default for BulkOptions {
    fn default() -> Self {
        Self {
            batch_size: 0,
            max_concurrent: 1,
            progress: None,
        }
    }
}

impl fmt::Debug for BulkOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BulkOptions")
            .field("batch_size", &self.batch_size)
            .field("max_concurrent", &self.max_concurrent)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl BulkOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    pub fn on_progress(mut self, progress: impl Fn(usize, usize) + Send + Sync + 'static) -> Self {
        self.progress = Some(Box::new(progress));
        self
    }

    /// Effective batch size against an endpoint maximum.
    fn resolve_batch_size(&self, max_batch_size: usize) -> Result<usize> {
        if max_batch_size == 0 {
            return Err(Error::validation("max_batch_size", "must be at least 1"));
        }
        if self.max_concurrent == 0 {
            return Err(Error::validation("max_concurrent", "must be at least 1"));
        }
        match self.batch_size {
            0 => Ok(max_batch_size),
            n if n > max_batch_size => Err(Error::validation(
                "batch_size",
                format!("{n} exceeds the maximum of {max_batch_size}"),
            )),
            n => Ok(n),
        }
    }
}

/// Split `items` into ordered chunks of at most `size`. Empty input yields
/// no chunks; a zero `size` is a validation error.
pub fn split_into_batches<T>(items: &[T], size: usize) -> Result<Vec<&[T]>> {
    if size == 0 {
        return Err(Error::validation("batch_size", "must be at least 1"));
    }
    Ok(items.chunks(size).collect())
}

/// Fetch `items` in sequential batches, one result per batch in input order.
///
/// Cancellation is checked before each batch. On failure the error names the
/// 1-based batch index and total and wraps the cause; earlier results are
/// discarded.
pub async fn execute_bulk<'a, T, R, F, Fut>(
    ctx: &Context,
    items: &'a [T],
    max_batch_size: usize,
    options: &BulkOptions,
    mut fetch_one: F,
) -> Result<Vec<R>>
where
    F: FnMut(&'a [T]) -> Fut,
    Fut: Future<Output = Result<R>>,
{
    let batch_size = options.resolve_batch_size(max_batch_size)?;
    let batches = split_into_batches(items, batch_size)?;
    let total = batches.len();
    if total == 0 {
        return Ok(Vec::new());
    }

    info!(items = items.len(), batches = total, batch_size, "starting bulk fetch");
    let mut results = Vec::with_capacity(total);
    for (i, batch) in batches.into_iter().enumerate() {
        let index = i + 1;
        ctx.check().map_err(|source| batch_error(index, total, source))?;

        let result = fetch_one(batch)
            .await
            .map_err(|source| batch_error(index, total, source))?;
        results.push(result);

        debug!(batch = index, total, size = batch.len(), "batch complete");
        if let Some(progress) = &options.progress {
            progress(index, total);
        }
    }
    Ok(results)
}

fn batch_error(index: usize, total: usize, source: Error) -> Error {
    Error::Batch {
        index,
        total,
        source: Box::new(source),
    }
}

/// Newline-joined bulk request body.
pub fn join_identifiers<S: AsRef<str>>(batch: &[S]) -> String {
    batch
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Reject a single request carrying more identifiers than the endpoint takes.
pub fn ensure_within_cap(count: usize) -> Result<()> {
    if count > MAX_BATCH_SIZE {
        return Err(Error::validation(
            "identifiers",
            format!("{count} identifiers exceed the per-request limit of {MAX_BATCH_SIZE}"),
        ));
    }
    Ok(())
}
