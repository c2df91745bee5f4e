//! Uniform random load balancing.
//!
//! # Design Decisions
//! - Non-cryptographic PRNG (SmallRng) seeded once at construction
//! - The RNG sits behind a Mutex; selection holds it only for one draw

use std::sync::{Arc, Mutex};

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::balancer::backend::Backend;
use crate::balancer::registry::BackendRegistry;
use crate::balancer::{LoadBalancer, SelectError};

/// Uniform choice over the available origin subset.
pub struct Random {
    registry: Arc<BackendRegistry>,
    rng: Mutex<SmallRng>,
}

impl Random {
    pub fn new(registry: Arc<BackendRegistry>) -> Self {
        Self {
            registry,
            rng: Mutex::new(SmallRng::from_entropy()),
        }
    }
}

impl LoadBalancer for Random {
    fn select(&self) -> Result<Arc<Backend>, SelectError> {
        let available = self.registry.snapshot_available();
        if available.is_empty() {
            return Err(SelectError::NoAvailableBackend);
        }

        let i = self
            .rng
            .lock()
            .expect("balancer rng mutex poisoned")
            .gen_range(0..available.len());
        Ok(available[i].clone())
    }

    fn mark_failed(&self, id: &str) {
        self.registry.set_available(id, false);
    }

    fn mark_available(&self, id: &str) {
        self.registry.set_available(id, true);
    }

    fn available_backends(&self) -> Vec<Arc<Backend>> {
        self.registry.snapshot_available()
    }
}
