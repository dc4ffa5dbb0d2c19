//! Write-back dispatcher: a bounded pool of writer threads fed by the single
//! sequential reader.
//!
//! # Model
//! The reader decodes clusters in stream order and hands each one, by value,
//! to [`Submitter::submit`].  With the `parallel` feature a Rayon pool picks
//! the job up and writes it under the target device's lock; without it the
//! write happens inline on the reader thread.
//!
//! Jobs for one device may land in any order.  That is fine because no two
//! block-infos share an offset.
//!
//! # Backpressure
//! At most `max_in_flight` clusters are queued or being written at once.
//! `submit` blocks once the limit is reached, which caps memory at roughly
//! `max_in_flight × 64 KiB`.
//!
//! # Failure
//! The first writer error is kept.  The next `submit` returns it so the
//! reader stops; [`dispatch`] still waits for every queued job before it
//! returns, so no write is left half-issued.

pub mod devices;

pub use devices::{DeviceFile, DeviceSet};

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};

use crate::cluster::ClusterWrite;
use crate::error::{Result, VmaError};

/// Default bound on queued clusters (64 MiB of buffers).
pub const DEFAULT_MAX_IN_FLIGHT: usize = 1024;

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Writer threads.
    pub workers:       usize,
    /// Clusters allowed in the queue before `submit` blocks.
    pub max_in_flight: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers:       default_workers(),
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }
}

pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(4)
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

// ── Shared state ─────────────────────────────────────────────────────────────

struct Shared<'d> {
    devices:   &'d DeviceSet,
    in_flight: Mutex<usize>,
    freed:     Condvar,
    limit:     usize,
    failed:    AtomicBool,
    failure:   Mutex<Option<VmaError>>,
}

impl<'d> Shared<'d> {
    fn new(devices: &'d DeviceSet, limit: usize) -> Self {
        Self {
            devices,
            in_flight: Mutex::new(0),
            freed:     Condvar::new(),
            limit:     limit.max(1),
            failed:    AtomicBool::new(false),
            failure:   Mutex::new(None),
        }
    }

    #[cfg_attr(not(feature = "parallel"), allow(dead_code))]
    fn acquire(&self) -> Permit<'_, 'd> {
        let mut n = lock(&self.in_flight);
        while *n >= self.limit {
            n = self.freed.wait(n).unwrap_or_else(|p| p.into_inner());
        }
        *n += 1;
        Permit(self)
    }

    #[cfg_attr(not(feature = "parallel"), allow(dead_code))]
    fn record(&self, err: VmaError) {
        let mut slot = lock(&self.failure);
        if slot.is_none() {
            *slot = Some(err);
        } else {
            tracing::error!(error = %err, "additional write failure");
        }
        self.failed.store(true, Ordering::Release);
    }

    fn take_failure(&self) -> Option<VmaError> {
        if !self.failed.load(Ordering::Acquire) {
            return None;
        }
        lock(&self.failure).take()
    }
}

/// One slot of the in-flight budget, returned on drop (including unwinding).
struct Permit<'a, 'd>(&'a Shared<'d>);

impl Drop for Permit<'_, '_> {
    fn drop(&mut self) {
        let mut n = lock(&self.0.in_flight);
        *n -= 1;
        self.0.freed.notify_one();
    }
}

// ── Submitter ────────────────────────────────────────────────────────────────

/// Handle the reader uses to queue clusters.  Only lives inside [`dispatch`].
pub struct Submitter<'a, 'scope> {
    shared: &'scope Shared<'scope>,
    #[cfg(feature = "parallel")]
    scope:  &'a rayon::Scope<'scope>,
    #[cfg(not(feature = "parallel"))]
    _scope: std::marker::PhantomData<&'a ()>,
}

impl Submitter<'_, '_> {
    /// Queue `job` for writing.
    ///
    /// Returns the first writer failure seen so far, if any; the job is not
    /// queued in that case.
    pub fn submit(&mut self, job: ClusterWrite) -> Result<()> {
        if let Some(err) = self.shared.take_failure() {
            return Err(err);
        }

        #[cfg(feature = "parallel")]
        {
            let shared = self.shared;
            let permit = shared.acquire();
            self.scope.spawn(move |_| {
                let _permit = permit;
                if let Err(err) = shared.devices.write(&job) {
                    shared.record(err);
                }
            });
            Ok(())
        }

        #[cfg(not(feature = "parallel"))]
        {
            self.shared.devices.write(&job)
        }
    }
}

/// Run `body` as the reader, with writes fanned out to the pool.
///
/// Returns once `body` has returned and every submitted job has finished.
/// An error from `body` takes precedence over writer errors.
pub fn dispatch<T, F>(devices: &DeviceSet, config: &DispatchConfig, body: F) -> Result<T>
where
    F: FnOnce(&mut Submitter<'_, '_>) -> Result<T>,
{
    let shared = Shared::new(devices, config.max_in_flight);

    #[cfg(feature = "parallel")]
    let outcome = {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.workers.max(1))
            .thread_name(|i| format!("vmax-writer-{i}"))
            .build()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        tracing::debug!(workers = pool.current_num_threads(), limit = shared.limit, "writer pool started");
        pool.in_place_scope(|scope| body(&mut Submitter { shared: &shared, scope }))
    };

    #[cfg(not(feature = "parallel"))]
    let outcome = body(&mut Submitter { shared: &shared, _scope: std::marker::PhantomData });

    let late = shared.failure.into_inner().unwrap_or_else(|p| p.into_inner());
    match (outcome, late) {
        (Err(err), late) => {
            if let Some(late) = late {
                tracing::error!(error = %late, "write failed while draining");
            }
            Err(err)
        }
        (Ok(_), Some(err)) => Err(err),
        (Ok(value), None)  => Ok(value),
    }
}
