//! Per-module instance concurrency pool (spec.md §4.5.2 "Instance pool":
//! "Each registered module has its own pool ... a bounded multi-producer/
//! multi-consumer queue; a caller acquires a slot, runs the call, and
//! releases the slot when done.").
//!
//! `wasmtime::Store` carries the call's document/capability context and is
//! built fresh per call (see [`super::HostCtx`]) so there is nothing to warm
//! across calls beyond the compiled `Module` the registry already shares.
//! What this pool actually bounds is concurrency: `max_concurrent_instances`
//! slots, handed out as [`InstancePermit`]s and released back on drop, in
//! the usual acquire/checkout-timeout/release shape of a connection pool.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Semaphore, SemaphorePermit, TryAcquireError};
use tokio::time::timeout;

use searchdog_udf_sdk::UdfError;

pub struct InstancePool {
    semaphore: Arc<Semaphore>,
    checkout_timeout: Duration,
}

impl InstancePool {
    pub fn new(max_concurrent_instances: u32) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent_instances.max(1) as usize)),
            checkout_timeout: Duration::from_millis(250),
        }
    }

    /// Acquire one slot, waiting up to the pool's checkout timeout.
    /// `ResourceExhausted` (spec.md §7) if no slot frees up in time.
    pub async fn acquire(&self) -> Result<InstancePermit<'_>, UdfError> {
        match timeout(self.checkout_timeout, self.semaphore.acquire()).await {
            Ok(Ok(permit)) => Ok(InstancePermit { _permit: permit }),
            Ok(Err(_)) => Err(UdfError::ResourceExhausted(self.in_use())),
            Err(_) => Err(UdfError::ResourceExhausted(self.in_use())),
        }
    }

    /// Non-blocking variant used by admission checks that must not stall
    /// the caller (e.g. a `_search` fan-out that would rather skip a UDF
    /// filter's shard than queue behind it).
    pub fn try_acquire(&self) -> Result<InstancePermit<'_>, UdfError> {
        match self.semaphore.try_acquire() {
            Ok(permit) => Ok(InstancePermit { _permit: permit }),
            Err(TryAcquireError::NoPermits) => Err(UdfError::ResourceExhausted(self.in_use())),
            Err(TryAcquireError::Closed) => Err(UdfError::ResourceExhausted(self.in_use())),
        }
    }

    fn in_use(&self) -> u32 {
        let total = self.semaphore.available_permits();
        // available_permits() never exceeds what was issued at construction,
        // so this only ever under-reports during a race, which is fine for
        // a diagnostic count.
        total as u32
    }
}

pub struct InstancePermit<'a> {
    _permit: SemaphorePermit<'a>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_acquire_respects_capacity() {
        let pool = InstancePool::new(1);
        let first = pool.acquire().await.unwrap();
        let second = pool.try_acquire();
        assert!(matches!(second, Err(UdfError::ResourceExhausted(_))));
        drop(first);
        assert!(pool.try_acquire().is_ok());
    }
}
