//! Admission control for concurrent shards
//!
//! A semaphore with one permit per slot. Holding an [`AdmissionPermit`] is
//! what "actively fetching" means; the permit is released on drop, so a
//! worker that errors or panics cannot leak capacity.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::metrics;

/// Admission errors
#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    /// The gate was closed
    #[error("admission gate closed")]
    Closed,
}

#[derive(Debug, Default)]
struct Occupancy {
    active: AtomicUsize,
    peak: AtomicUsize,
    admitted: AtomicUsize,
}

/// Bounds how many shards fetch at once
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    occupancy: Arc<Occupancy>,
}

impl AdmissionGate {
    /// Gate with `capacity` slots
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            occupancy: Arc::new(Occupancy::default()),
        }
    }

    /// Wait for a free slot
    pub async fn admit(&self) -> Result<AdmissionPermit, AdmissionError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AdmissionError::Closed)?;

        let active = self.occupancy.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.occupancy.peak.fetch_max(active, Ordering::SeqCst);
        self.occupancy.admitted.fetch_add(1, Ordering::SeqCst);
        metrics::set_active_shards(active);

        Ok(AdmissionPermit {
            _permit: permit,
            occupancy: self.occupancy.clone(),
            active,
        })
    }

    /// Refuse all further admissions
    pub fn close(&self) {
        self.semaphore.close();
    }

    /// Configured ceiling
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Shards holding a permit right now
    pub fn active(&self) -> usize {
        self.occupancy.active.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously held permits
    pub fn peak(&self) -> usize {
        self.occupancy.peak.load(Ordering::SeqCst)
    }

    /// Total admissions so far
    pub fn admitted(&self) -> usize {
        self.occupancy.admitted.load(Ordering::SeqCst)
    }
}

/// A held admission slot
#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
    occupancy: Arc<Occupancy>,
    active: usize,
}

impl AdmissionPermit {
    /// Active shards at the moment this permit was granted, itself included
    pub fn active_at_admission(&self) -> usize {
        self.active
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        let active = self.occupancy.active.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::set_active_shards(active);
    }
}
