//! Bounded-concurrency job scheduler.
//!
//! [`BoundedScheduler::run`] turns a lazy sequence of job futures into a
//! stream of their outputs, in completion order. At most `limit` jobs are
//! in flight; whenever one finishes another is pulled from the source
//! before the finished job's output is handed back.
//!
//! Everything runs on the polling task. Jobs make progress by waiting on
//! I/O (a sandbox process, an HTTP call), so overlapping the waits is all
//! the concurrency needed.
//!
//! The scheduler never times out or cancels a job; a job that never
//! completes holds its slot for the rest of the run.

use std::future::Future;
use std::iter::Fuse;
use std::num::NonZeroUsize;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::stream::{FuturesUnordered, Stream, StreamExt};
use tracing::trace;

use crate::error::SchedulerError;

/// Counters shared between a running schedule and its observers.
#[derive(Debug, Default)]
pub struct SchedulerStats {
    admitted: AtomicUsize,
    completed: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl SchedulerStats {
    pub fn admitted(&self) -> usize {
        self.admitted.load(Ordering::Relaxed)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Highest number of simultaneously running jobs seen so far.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::Relaxed)
    }

    fn admit(&self) {
        self.admitted.fetch_add(1, Ordering::Relaxed);
        let now = self.in_flight.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::Relaxed);
    }

    fn complete(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BoundedScheduler {
    limit: NonZeroUsize,
}

impl BoundedScheduler {
    /// A limit of zero is a configuration error.
    pub fn new(limit: usize) -> Result<Self, SchedulerError> {
        NonZeroUsize::new(limit)
            .map(|limit| Self { limit })
            .ok_or(SchedulerError::InvalidLimit(limit))
    }

    pub fn limit(&self) -> usize {
        self.limit.get()
    }

    /// Run every job in `jobs`, at most `limit` at a time.
    ///
    /// The source is only advanced when a slot is free, so it can be
    /// arbitrarily long. The returned stream ends once the source is
    /// exhausted and the last running job has finished.
    pub fn run<I>(&self, jobs: I) -> Schedule<I::IntoIter>
    where
        I: IntoIterator,
        I::IntoIter: Unpin,
        I::Item: Future,
    {
        Schedule {
            source: jobs.into_iter().fuse(),
            active: FuturesUnordered::new(),
            limit: self.limit.get(),
            stats: Arc::new(SchedulerStats::default()),
        }
    }
}

/// Stream of job outputs produced by [`BoundedScheduler::run`].
#[must_use = "streams do nothing unless polled"]
pub struct Schedule<I>
where
    I: Iterator,
    I::Item: Future,
{
    source: Fuse<I>,
    active: FuturesUnordered<I::Item>,
    limit: usize,
    stats: Arc<SchedulerStats>,
}

impl<I> Schedule<I>
where
    I: Iterator,
    I::Item: Future,
{
    pub fn stats(&self) -> Arc<SchedulerStats> {
        Arc::clone(&self.stats)
    }

    /// Top the active set up to the limit from the source.
    fn fill(&mut self) {
        while self.active.len() < self.limit {
            match self.source.next() {
                Some(job) => {
                    self.stats.admit();
                    self.active.push(job);
                    trace!(in_flight = self.active.len(), "job admitted");
                }
                None => break,
            }
        }
    }
}

impl<I> Stream for Schedule<I>
where
    I: Iterator + Unpin,
    I::Item: Future,
{
    type Item = <I::Item as Future>::Output;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        this.fill();
        match this.active.poll_next_unpin(cx) {
            Poll::Ready(Some(output)) => {
                this.stats.complete();
                // Refill before handing the output back, so the freed slot
                // is taken without waiting for the consumer.
                this.fill();
                Poll::Ready(Some(output))
            }
            // `fill` just ran, so an empty active set means the source is dry.
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let (lower, upper) = self.source.size_hint();
        let running = self.active.len();
        (
            lower.saturating_add(running),
            upper.and_then(|u| u.checked_add(running)),
        )
    }
}
