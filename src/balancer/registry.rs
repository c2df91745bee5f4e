//! Origin registry with per-origin availability bits.
//!
//! # Responsibilities
//! - Own the fixed origin set for the process lifetime
//! - Track one mutable availability bit per origin
//! - Produce snapshots of the currently-eligible subset
//!
//! # Design Decisions
//! - Availability is an AtomicBool per origin, no locks on the hot path
//! - The origin list itself is immutable; only the bits flip

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::balancer::backend::Backend;
use crate::config::OriginConfig;

/// Holds the origin set and their availability bits.
pub struct BackendRegistry {
    backends: Vec<Arc<Backend>>,
    availability: Vec<AtomicBool>,
    index: HashMap<String, usize>,
}

impl BackendRegistry {
    /// Build the registry from configuration. Origins start available.
    pub fn from_config(origins: &[OriginConfig]) -> Result<Self, url::ParseError> {
        let mut backends = Vec::with_capacity(origins.len());
        let mut availability = Vec::with_capacity(origins.len());
        let mut index = HashMap::with_capacity(origins.len());

        for (i, origin) in origins.iter().enumerate() {
            backends.push(Arc::new(Backend::from_config(origin)?));
            availability.push(AtomicBool::new(true));
            index.insert(origin.id.clone(), i);
        }

        Ok(Self {
            backends,
            availability,
            index,
        })
    }

    /// Snapshot the currently-available subset, in registry order.
    pub fn snapshot_available(&self) -> Vec<Arc<Backend>> {
        self.backends
            .iter()
            .zip(self.availability.iter())
            .filter(|(_, bit)| bit.load(Ordering::Acquire))
            .map(|(backend, _)| backend.clone())
            .collect()
    }

    /// Flip the availability bit for one origin. Unknown ids are ignored.
    pub fn set_available(&self, id: &str, available: bool) {
        if let Some(&i) = self.index.get(id) {
            let was = self.availability[i].swap(available, Ordering::AcqRel);
            if was != available {
                tracing::info!(
                    origin = %id,
                    available,
                    "Origin availability changed"
                );
            }
        }
    }

    /// Whether one origin is currently eligible.
    pub fn is_available(&self, id: &str) -> bool {
        self.index
            .get(id)
            .map(|&i| self.availability[i].load(Ordering::Acquire))
            .unwrap_or(false)
    }

    /// All origins regardless of availability.
    pub fn all_backends(&self) -> &[Arc<Backend>] {
        &self.backends
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin(id: &str, port: u16) -> OriginConfig {
        OriginConfig {
            id: id.into(),
            url: format!("http://127.0.0.1:{}", port),
            weight: 1,
            health_path: "/health".into(),
        }
    }

    #[test]
    fn all_origins_start_available() {
        let registry =
            BackendRegistry::from_config(&[origin("b1", 9001), origin("b2", 9002)]).unwrap();
        assert_eq!(registry.snapshot_available().len(), 2);
    }

    #[test]
    fn mark_failed_removes_from_snapshot() {
        let registry =
            BackendRegistry::from_config(&[origin("b1", 9001), origin("b2", 9002)]).unwrap();
        registry.set_available("b1", false);

        let available = registry.snapshot_available();
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].id, "b2");
        assert!(!registry.is_available("b1"));

        registry.set_available("b1", true);
        assert_eq!(registry.snapshot_available().len(), 2);
    }

    #[test]
    fn unknown_id_is_ignored() {
        let registry = BackendRegistry::from_config(&[origin("b1", 9001)]).unwrap();
        registry.set_available("nope", false);
        assert_eq!(registry.snapshot_available().len(), 1);
    }
}
